use thiserror::Error;
use uuid::Uuid;

/// Failures that can occur while scoring one student.
///
/// `StudentNotFound` and `InsufficientData` are terminal for the student and
/// carry no retry value. `UnknownCategory` means the extractor emitted a value
/// the trained vocabulary does not contain, which is an internal consistency
/// bug rather than a data problem. Store errors are transient and left to the
/// caller to handle.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("student {0} does not exist")]
    StudentNotFound(Uuid),

    #[error("student {0} has no academic history to score")]
    InsufficientData(Uuid),

    #[error("value {value:?} is outside the trained vocabulary for {feature}")]
    UnknownCategory { feature: String, value: String },

    #[error("record store unavailable: {0}")]
    Store(#[from] sqlx::Error),
}

/// Failures while loading the scoring artifact bundle. All of these are fatal
/// at startup: the process must not score anything without a complete,
/// version-consistent bundle.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read artifact bundle at {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact bundle is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("artifact component {component} is version {found:?}, bundle is {expected:?}")]
    VersionMismatch {
        component: &'static str,
        found: String,
        expected: String,
    },

    #[error("artifact feature column {0:?} is not a known feature")]
    UnknownColumn(String),

    #[error("artifact shape mismatch: {0}")]
    Shape(String),
}
