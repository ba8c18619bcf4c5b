use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Ordinal risk category derived from the dropout probability. Declaration
/// order is severity order, so `PartialOrd` follows low < medium < high <
/// critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<RiskLevel> {
        match value {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

/// Canonical gender vocabulary as the model was trained on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Female,
    Male,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
        }
    }

    /// Collapse whatever the student row carries onto the trained vocabulary.
    /// Unset or unrecognized values default to female, the majority class in
    /// the training data.
    pub fn from_source(value: Option<&str>) -> Gender {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("male") | Some("m") => Gender::Male,
            _ => Gender::Female,
        }
    }
}

/// Canonical household income vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomeBand {
    Low,
    Medium,
    High,
}

impl IncomeBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncomeBand::Low => "low",
            IncomeBand::Medium => "medium",
            IncomeBand::High => "high",
        }
    }

    /// Unknown or unset income bands collapse to medium so the encoder never
    /// sees an out-of-vocabulary value.
    pub fn from_source(value: Option<&str>) -> IncomeBand {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("low") => IncomeBand::Low,
            Some("high") => IncomeBand::High,
            _ => IncomeBand::Medium,
        }
    }
}

/// Orphan status, derived from the guardian's relationship to the student.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanStatus {
    No,
    Partial,
    Yes,
}

impl OrphanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrphanStatus::No => "no",
            OrphanStatus::Partial => "partial",
            OrphanStatus::Yes => "yes",
        }
    }

    /// A guardian or relative standing in for a parent indicates an orphaned
    /// student; a single parent maps to partial. Unknown relationships default
    /// to no.
    pub fn from_relationship(value: Option<&str>) -> OrphanStatus {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("guardian") | Some("relative") => OrphanStatus::Yes,
            Some("single_parent") | Some("single parent") => OrphanStatus::Partial,
            _ => OrphanStatus::No,
        }
    }
}

/// Flat feature set for one scoring event. Every field is always populated;
/// the extractor applies configured defaults before this struct is built, so
/// downstream stages never reason about missing data.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    pub age: f64,
    pub gender: Gender,
    pub standard: i32,
    pub term_avg_score: f64,
    pub school_attendance_rate: f64,
    pub class_repetitions: i32,
    pub bullying_incidents_total: i32,
    pub distance_to_school_km: f64,
    pub special_learning: bool,
    pub household_income: IncomeBand,
    pub orphan_status: OrphanStatus,
    pub age_grade_mismatch: bool,
}

/// Outcome of one scoring invocation.
#[derive(Debug, Clone)]
pub struct PredictionResult {
    pub student_id: Uuid,
    /// Raw classifier output in [0, 1].
    pub probability: f64,
    pub risk_level: RiskLevel,
    pub contributing_factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub predicted_at: DateTime<Utc>,
    pub algorithm_version: String,
}

impl PredictionResult {
    /// Stored risk score on the 0-100 scale.
    pub fn risk_score(&self) -> f64 {
        self.probability * 100.0
    }
}

/// One persisted row of prediction history.
#[derive(Debug, Clone)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub contributing_factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub predicted_at: DateTime<Utc>,
    pub algorithm_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchRunStatus {
    Running,
    Completed,
    Failed,
}

impl BatchRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchRunStatus::Running => "running",
            BatchRunStatus::Completed => "completed",
            BatchRunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<BatchRunStatus> {
        match value {
            "running" => Some(BatchRunStatus::Running),
            "completed" => Some(BatchRunStatus::Completed),
            "failed" => Some(BatchRunStatus::Failed),
            _ => None,
        }
    }
}

/// Process-level audit record for one roster sweep.
#[derive(Debug, Clone)]
pub struct BatchRunRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: BatchRunStatus,
    pub total_students: i64,
    pub processed_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub error_summary: Option<String>,
    pub duration_seconds: Option<f64>,
}

/// Raw student row as the record store hands it over, guardian fields joined
/// in. Optional fields are defaulted by the feature extractor.
#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: Uuid,
    pub full_name: String,
    pub gender: Option<String>,
    pub age: i32,
    pub standard: i32,
    pub distance_to_school_km: Option<f64>,
    pub special_needs: Option<bool>,
    pub class_repetitions: Option<i32>,
    pub income_band: Option<String>,
    pub guardian_relationship: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct TermRow {
    pub id: Uuid,
    pub academic_year: i32,
    pub term_ordinal: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AttendanceCounts {
    pub present_days: i64,
    pub absent_days: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_levels_order_by_severity() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn risk_level_round_trips_through_text() {
        for level in [
            RiskLevel::Low,
            RiskLevel::Medium,
            RiskLevel::High,
            RiskLevel::Critical,
        ] {
            assert_eq!(RiskLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(RiskLevel::parse("severe"), None);
    }

    #[test]
    fn unknown_income_collapses_to_medium() {
        assert_eq!(IncomeBand::from_source(Some("LOW")), IncomeBand::Low);
        assert_eq!(IncomeBand::from_source(Some("affluent")), IncomeBand::Medium);
        assert_eq!(IncomeBand::from_source(None), IncomeBand::Medium);
    }

    #[test]
    fn orphan_status_follows_guardian_relationship() {
        assert_eq!(
            OrphanStatus::from_relationship(Some("guardian")),
            OrphanStatus::Yes
        );
        assert_eq!(
            OrphanStatus::from_relationship(Some("Relative")),
            OrphanStatus::Yes
        );
        assert_eq!(
            OrphanStatus::from_relationship(Some("single_parent")),
            OrphanStatus::Partial
        );
        assert_eq!(
            OrphanStatus::from_relationship(Some("mother")),
            OrphanStatus::No
        );
        assert_eq!(OrphanStatus::from_relationship(None), OrphanStatus::No);
    }
}
