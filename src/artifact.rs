use std::path::Path;

use serde::Deserialize;

use crate::error::ArtifactError;

/// Feature names the encoder knows how to produce. An artifact asking for
/// anything else was trained against a different extractor and is rejected at
/// load time.
pub const KNOWN_COLUMNS: &[&str] = &[
    "age",
    "gender",
    "standard",
    "term_avg_score",
    "school_attendance_rate",
    "class_repetitions",
    "bullying_incidents_total",
    "distance_to_school_km",
    "special_learning",
    "household_income",
    "orphan_status",
    "age_grade_mismatch",
];

/// On-disk layout of the trained bundle: classifier, scaler, column order and
/// label encoders are exported together and must carry the same version tag.
#[derive(Debug, Deserialize)]
pub struct ArtifactBundle {
    pub version: String,
    pub classifier: ClassifierArtifact,
    pub scaler: ScalerArtifact,
    pub feature_columns: FeatureColumnsArtifact,
    pub label_encoders: LabelEncodersArtifact,
}

#[derive(Debug, Deserialize)]
pub struct ClassifierArtifact {
    pub version: String,
    pub weights: Vec<f64>,
    pub bias: f64,
}

#[derive(Debug, Deserialize)]
pub struct ScalerArtifact {
    pub version: String,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

#[derive(Debug, Deserialize)]
pub struct FeatureColumnsArtifact {
    pub version: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LabelEncodersArtifact {
    pub version: String,
    pub gender: Vec<String>,
    pub household_income: Vec<String>,
    pub orphan_status: Vec<String>,
}

/// Maps a categorical value onto the integer index it had during training.
#[derive(Debug, Clone)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    fn new(classes: Vec<String>) -> LabelEncoder {
        LabelEncoder { classes }
    }

    pub fn encode(&self, value: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == value)
    }
}

/// Logistic-regression classifier over the scaled feature row. Opaque to the
/// rest of the pipeline; callers only see `predict`.
#[derive(Debug, Clone)]
struct Classifier {
    weights: Vec<f64>,
    bias: f64,
}

impl Classifier {
    fn predict(&self, row: &[f64]) -> f64 {
        let z: f64 = self
            .weights
            .iter()
            .zip(row.iter())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias;
        1.0 / (1.0 + (-z).exp())
    }
}

/// Immutable scoring state built once at startup and shared by reference
/// across every scoring call. Holding all four components in one struct keeps
/// encoder and classifier versions from drifting apart.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub version: String,
    classifier: Classifier,
    means: Vec<f64>,
    stds: Vec<f64>,
    pub columns: Vec<String>,
    pub gender: LabelEncoder,
    pub household_income: LabelEncoder,
    pub orphan_status: LabelEncoder,
}

impl ScoringContext {
    pub fn load(path: &Path) -> Result<ScoringContext, ArtifactError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let bundle: ArtifactBundle = serde_json::from_str(&raw)?;
        ScoringContext::from_bundle(bundle)
    }

    pub fn from_bundle(bundle: ArtifactBundle) -> Result<ScoringContext, ArtifactError> {
        let expected = &bundle.version;
        for (component, found) in [
            ("classifier", &bundle.classifier.version),
            ("scaler", &bundle.scaler.version),
            ("feature_columns", &bundle.feature_columns.version),
            ("label_encoders", &bundle.label_encoders.version),
        ] {
            if found != expected {
                return Err(ArtifactError::VersionMismatch {
                    component,
                    found: found.clone(),
                    expected: expected.clone(),
                });
            }
        }

        let columns = bundle.feature_columns.columns;
        for column in &columns {
            if !KNOWN_COLUMNS.contains(&column.as_str()) {
                return Err(ArtifactError::UnknownColumn(column.clone()));
            }
        }
        if columns.iter().any(|c| columns.iter().filter(|o| *o == c).count() > 1) {
            return Err(ArtifactError::Shape("duplicate feature column".into()));
        }

        let n = columns.len();
        if bundle.classifier.weights.len() != n {
            return Err(ArtifactError::Shape(format!(
                "{} weights for {} columns",
                bundle.classifier.weights.len(),
                n
            )));
        }
        if bundle.scaler.means.len() != n || bundle.scaler.stds.len() != n {
            return Err(ArtifactError::Shape(format!(
                "scaler has {} means / {} stds for {} columns",
                bundle.scaler.means.len(),
                bundle.scaler.stds.len(),
                n
            )));
        }

        Ok(ScoringContext {
            version: bundle.version,
            classifier: Classifier {
                weights: bundle.classifier.weights,
                bias: bundle.classifier.bias,
            },
            means: bundle.scaler.means,
            stds: bundle.scaler.stds,
            columns,
            gender: LabelEncoder::new(bundle.label_encoders.gender),
            household_income: LabelEncoder::new(bundle.label_encoders.household_income),
            orphan_status: LabelEncoder::new(bundle.label_encoders.orphan_status),
        })
    }

    /// Standard scaling with the fitted parameters for one column. A zero
    /// variance column is centered only, matching how the scaler was fit.
    pub fn scale(&self, column_index: usize, value: f64) -> f64 {
        let mean = self.means[column_index];
        let std = self.stds[column_index];
        if std.abs() < f64::EPSILON {
            value - mean
        } else {
            (value - mean) / std
        }
    }

    /// Dropout probability in [0, 1] for one encoded, scaled row.
    pub fn predict(&self, row: &[f64]) -> f64 {
        self.classifier.predict(row)
    }
}

#[cfg(test)]
pub(crate) fn test_bundle_json(version: &str) -> String {
    format!(
        r#"{{
            "version": "{version}",
            "classifier": {{"version": "{version}", "weights": [0.0, 0.0, 0.0, -1.0, -1.0, 0.5, 0.5, 0.2, 0.2, 0.1, 0.1, 0.3], "bias": 0.0}},
            "scaler": {{"version": "{version}",
                        "means": [11.0, 0.5, 4.5, 320.0, 0.82, 0.4, 1.2, 4.5, 0.1, 1.0, 0.3, 0.15],
                        "stds":  [2.5, 0.5, 2.0, 90.0, 0.12, 0.7, 2.1, 3.2, 0.3, 0.7, 0.6, 0.36]}},
            "feature_columns": {{"version": "{version}",
                "columns": ["age", "gender", "standard", "term_avg_score",
                            "school_attendance_rate", "class_repetitions",
                            "bullying_incidents_total", "distance_to_school_km",
                            "special_learning", "household_income",
                            "orphan_status", "age_grade_mismatch"]}},
            "label_encoders": {{"version": "{version}",
                "gender": ["female", "male"],
                "household_income": ["high", "low", "medium"],
                "orphan_status": ["no", "partial", "yes"]}}
        }}"#
    )
}

#[cfg(test)]
pub(crate) fn test_context() -> ScoringContext {
    let bundle: ArtifactBundle = serde_json::from_str(&test_bundle_json("test-v1")).unwrap();
    ScoringContext::from_bundle(bundle).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_consistent_bundle() {
        let ctx = test_context();
        assert_eq!(ctx.version, "test-v1");
        assert_eq!(ctx.columns.len(), KNOWN_COLUMNS.len());
        assert_eq!(ctx.gender.encode("male"), Some(1));
        assert_eq!(ctx.household_income.encode("low"), Some(1));
        assert_eq!(ctx.orphan_status.encode("maybe"), None);
    }

    #[test]
    fn rejects_mixed_component_versions() {
        let mut bundle: ArtifactBundle =
            serde_json::from_str(&test_bundle_json("test-v1")).unwrap();
        bundle.scaler.version = "test-v2".to_string();
        let err = ScoringContext::from_bundle(bundle).unwrap_err();
        assert!(matches!(
            err,
            ArtifactError::VersionMismatch {
                component: "scaler",
                ..
            }
        ));
    }

    #[test]
    fn rejects_weight_column_shape_mismatch() {
        let mut bundle: ArtifactBundle =
            serde_json::from_str(&test_bundle_json("test-v1")).unwrap();
        bundle.classifier.weights.pop();
        assert!(matches!(
            ScoringContext::from_bundle(bundle).unwrap_err(),
            ArtifactError::Shape(_)
        ));
    }

    #[test]
    fn rejects_unknown_feature_column() {
        let mut bundle: ArtifactBundle =
            serde_json::from_str(&test_bundle_json("test-v1")).unwrap();
        bundle.feature_columns.columns[0] = "shoe_size".to_string();
        assert!(matches!(
            ScoringContext::from_bundle(bundle).unwrap_err(),
            ArtifactError::UnknownColumn(_)
        ));
    }

    #[test]
    fn prediction_stays_in_unit_interval() {
        let ctx = test_context();
        let extreme = vec![10.0; ctx.columns.len()];
        let p = ctx.predict(&extreme);
        assert!((0.0..=1.0).contains(&p));
        let zero = vec![0.0; ctx.columns.len()];
        assert!((ctx.predict(&zero) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn shipped_demo_artifact_parses() {
        let raw = include_str!("../artifacts/dropout_model.json");
        let bundle: ArtifactBundle = serde_json::from_str(raw).unwrap();
        let ctx = ScoringContext::from_bundle(bundle).unwrap();
        assert_eq!(ctx.version, "dropout-logreg-v1.0");
    }
}
