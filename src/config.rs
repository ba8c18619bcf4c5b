use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Fallback values applied when a student's records are missing a field.
/// These are heuristic constants kept configurable pending confirmation from
/// the product owner.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorDefaults {
    /// Used when the most recent term has no subject scores (0-600 scale).
    pub term_avg_score: f64,
    /// Used when a student has no attendance rows at all.
    pub attendance_rate: f64,
    /// Used when the student row has no recorded distance (km).
    pub distance_to_school_km: f64,
    /// Years past the expected age for a grade before flagging a mismatch.
    pub age_grade_tolerance: i32,
}

impl Default for ExtractorDefaults {
    fn default() -> Self {
        ExtractorDefaults {
            term_avg_score: 300.0,
            attendance_rate: 0.8,
            distance_to_school_km: 5.0,
            age_grade_tolerance: 2,
        }
    }
}

/// Cutoffs for the contributing-factor rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FactorThresholds {
    pub low_score_below: f64,
    pub poor_attendance_below: f64,
    pub high_bullying_above: i32,
    pub long_distance_km: f64,
}

impl Default for FactorThresholds {
    fn default() -> Self {
        FactorThresholds {
            low_score_below: 300.0,
            poor_attendance_below: 0.8,
            high_bullying_above: 5,
            long_distance_km: 7.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub defaults: ExtractorDefaults,
    pub thresholds: FactorThresholds,
}

impl ScoringConfig {
    /// Load overrides from a JSON file; absent keys keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<ScoringConfig> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("invalid config JSON at {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployed_constants() {
        let config = ScoringConfig::default();
        assert_eq!(config.defaults.term_avg_score, 300.0);
        assert_eq!(config.defaults.attendance_rate, 0.8);
        assert_eq!(config.defaults.age_grade_tolerance, 2);
        assert_eq!(config.thresholds.high_bullying_above, 5);
    }

    #[test]
    fn partial_config_keeps_unset_defaults() {
        let config: ScoringConfig =
            serde_json::from_str(r#"{"defaults": {"attendance_rate": 0.9}}"#).unwrap();
        assert_eq!(config.defaults.attendance_rate, 0.9);
        assert_eq!(config.defaults.term_avg_score, 300.0);
        assert_eq!(config.thresholds.long_distance_km, 7.0);
    }
}
