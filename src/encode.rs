use crate::artifact::{LabelEncoder, ScoringContext};
use crate::error::ScoringError;
use crate::models::FeatureVector;

/// Turn a populated feature vector into the scaled numeric row the classifier
/// was trained on, with columns in exactly the artifact's order.
///
/// Categorical fields must already sit inside the trained vocabulary; the
/// extractor's normalization guarantees that, so an `UnknownCategory` here is
/// an internal bug to surface, not a condition to default away.
pub fn encode(ctx: &ScoringContext, vector: &FeatureVector) -> Result<Vec<f64>, ScoringError> {
    let mut row = Vec::with_capacity(ctx.columns.len());
    for (index, column) in ctx.columns.iter().enumerate() {
        let raw = raw_value(ctx, vector, column)?;
        row.push(ctx.scale(index, raw));
    }
    Ok(row)
}

fn raw_value(
    ctx: &ScoringContext,
    vector: &FeatureVector,
    column: &str,
) -> Result<f64, ScoringError> {
    let value = match column {
        "age" => vector.age,
        "gender" => label(&ctx.gender, "gender", vector.gender.as_str())?,
        "standard" => f64::from(vector.standard),
        "term_avg_score" => vector.term_avg_score,
        "school_attendance_rate" => vector.school_attendance_rate,
        "class_repetitions" => f64::from(vector.class_repetitions),
        "bullying_incidents_total" => f64::from(vector.bullying_incidents_total),
        "distance_to_school_km" => vector.distance_to_school_km,
        "special_learning" => bit(vector.special_learning),
        "household_income" => label(
            &ctx.household_income,
            "household_income",
            vector.household_income.as_str(),
        )?,
        "orphan_status" => label(
            &ctx.orphan_status,
            "orphan_status",
            vector.orphan_status.as_str(),
        )?,
        "age_grade_mismatch" => bit(vector.age_grade_mismatch),
        // Context loading validates column names, so this only fires if the
        // artifact and this match ever drift apart.
        other => {
            return Err(ScoringError::UnknownCategory {
                feature: "feature_columns".to_string(),
                value: other.to_string(),
            })
        }
    };
    Ok(value)
}

fn label(encoder: &LabelEncoder, feature: &str, value: &str) -> Result<f64, ScoringError> {
    encoder
        .encode(value)
        .map(|index| index as f64)
        .ok_or_else(|| ScoringError::UnknownCategory {
            feature: feature.to_string(),
            value: value.to_string(),
        })
}

fn bit(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{test_bundle_json, test_context, ArtifactBundle, ScoringContext};
    use crate::models::{Gender, IncomeBand, OrphanStatus};

    fn sample_vector() -> FeatureVector {
        FeatureVector {
            age: 12.0,
            gender: Gender::Male,
            standard: 5,
            term_avg_score: 310.0,
            school_attendance_rate: 0.9,
            class_repetitions: 1,
            bullying_incidents_total: 2,
            distance_to_school_km: 3.5,
            special_learning: false,
            household_income: IncomeBand::Medium,
            orphan_status: OrphanStatus::No,
            age_grade_mismatch: false,
        }
    }

    #[test]
    fn encoding_is_idempotent() {
        let ctx = test_context();
        let vector = sample_vector();
        let first = encode(&ctx, &vector).unwrap();
        let second = encode(&ctx, &vector).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn row_length_matches_column_count() {
        let ctx = test_context();
        let row = encode(&ctx, &sample_vector()).unwrap();
        assert_eq!(row.len(), ctx.columns.len());
    }

    #[test]
    fn columns_follow_artifact_order() {
        let ctx = test_context();
        let mut bundle: ArtifactBundle =
            serde_json::from_str(&test_bundle_json("test-v1")).unwrap();
        bundle.feature_columns.columns.reverse();
        bundle.scaler.means.reverse();
        bundle.scaler.stds.reverse();
        bundle.classifier.weights.reverse();
        let reversed_ctx = ScoringContext::from_bundle(bundle).unwrap();

        let vector = sample_vector();
        let row = encode(&ctx, &vector).unwrap();
        let mut reversed = encode(&reversed_ctx, &vector).unwrap();
        reversed.reverse();
        assert_eq!(row, reversed);
    }

    #[test]
    fn out_of_vocabulary_category_is_a_hard_error() {
        let mut bundle: ArtifactBundle =
            serde_json::from_str(&test_bundle_json("test-v1")).unwrap();
        bundle.label_encoders.gender = vec!["female".to_string()];
        let ctx = ScoringContext::from_bundle(bundle).unwrap();

        let err = encode(&ctx, &sample_vector()).unwrap_err();
        match err {
            ScoringError::UnknownCategory { feature, value } => {
                assert_eq!(feature, "gender");
                assert_eq!(value, "male");
            }
            other => panic!("expected UnknownCategory, got {other:?}"),
        }
    }

    #[test]
    fn all_default_vector_scores_without_error() {
        use crate::config::ExtractorDefaults;
        use crate::features;
        use crate::models::{AttendanceCounts, StudentRow};

        let student = StudentRow {
            id: uuid::Uuid::new_v4(),
            full_name: "No Records".to_string(),
            gender: None,
            age: 11,
            standard: 4,
            distance_to_school_km: None,
            special_needs: None,
            class_repetitions: None,
            income_band: None,
            guardian_relationship: None,
        };
        let vector = features::assemble(
            &student,
            &[],
            AttendanceCounts::default(),
            0,
            &ExtractorDefaults::default(),
        );

        let ctx = test_context();
        let row = encode(&ctx, &vector).unwrap();
        let probability = ctx.predict(&row);
        assert!((0.0..=1.0).contains(&probability));
    }

    #[test]
    fn booleans_coerce_to_unit_values() {
        let ctx = test_context();
        let mut vector = sample_vector();
        vector.special_learning = true;
        vector.age_grade_mismatch = true;
        let with = encode(&ctx, &vector).unwrap();
        vector.special_learning = false;
        vector.age_grade_mismatch = false;
        let without = encode(&ctx, &vector).unwrap();

        let special = ctx.columns.iter().position(|c| c == "special_learning").unwrap();
        let mismatch = ctx
            .columns
            .iter()
            .position(|c| c == "age_grade_mismatch")
            .unwrap();
        assert!(with[special] > without[special]);
        assert!(with[mismatch] > without[mismatch]);
    }
}
