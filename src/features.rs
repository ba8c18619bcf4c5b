use sqlx::PgPool;
use uuid::Uuid;

use crate::config::ExtractorDefaults;
use crate::error::ScoringError;
use crate::models::{
    AttendanceCounts, FeatureVector, Gender, IncomeBand, OrphanStatus, StudentRow,
};
use crate::store;

/// Build the feature vector for one student from the record store.
///
/// Only two conditions fail: an unknown student, and a student with zero
/// academic terms. Every other gap in the records is absorbed by a configured
/// default so a single missing row never blocks an assessment.
pub async fn extract(
    pool: &PgPool,
    defaults: &ExtractorDefaults,
    student_id: Uuid,
) -> Result<FeatureVector, ScoringError> {
    let student = store::get_student(pool, student_id)
        .await?
        .ok_or(ScoringError::StudentNotFound(student_id))?;

    let term = store::get_latest_academic_term(pool, student_id)
        .await?
        .ok_or(ScoringError::InsufficientData(student_id))?;
    tracing::debug!(
        student = %student.full_name,
        year = term.academic_year,
        term = term.term_ordinal,
        "extracting features from latest term"
    );

    let scores = store::get_subject_scores(pool, term.id).await?;
    let attendance = store::get_attendance_counts(pool, student_id).await?;
    let bullying = store::get_bullying_count(pool, term.id).await?;

    Ok(assemble(&student, &scores, attendance, bullying, defaults))
}

/// Pure assembly of the vector from already-fetched raw parts. Split out from
/// `extract` so the defaulting rules test without a database.
pub fn assemble(
    student: &StudentRow,
    subject_scores: &[f64],
    attendance: AttendanceCounts,
    bullying_incidents: i64,
    defaults: &ExtractorDefaults,
) -> FeatureVector {
    let term_avg_score = if subject_scores.is_empty() {
        defaults.term_avg_score
    } else {
        subject_scores.iter().sum::<f64>() / subject_scores.len() as f64
    };

    let attended = attendance.present_days + attendance.absent_days;
    let school_attendance_rate = if attended == 0 {
        defaults.attendance_rate
    } else {
        attendance.present_days as f64 / attended as f64
    };

    let class_repetitions = student.class_repetitions.unwrap_or(0);
    let age = f64::from(student.age);
    let expected_age_limit =
        6 + student.standard + class_repetitions + defaults.age_grade_tolerance;
    let age_grade_mismatch = age > f64::from(expected_age_limit);

    FeatureVector {
        age,
        gender: Gender::from_source(student.gender.as_deref()),
        standard: student.standard,
        term_avg_score,
        school_attendance_rate,
        class_repetitions,
        bullying_incidents_total: bullying_incidents.min(i64::from(i32::MAX)) as i32,
        distance_to_school_km: student
            .distance_to_school_km
            .unwrap_or(defaults.distance_to_school_km),
        special_learning: student.special_needs.unwrap_or(false),
        household_income: IncomeBand::from_source(student.income_band.as_deref()),
        orphan_status: OrphanStatus::from_relationship(student.guardian_relationship.as_deref()),
        age_grade_mismatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_student() -> StudentRow {
        StudentRow {
            id: Uuid::new_v4(),
            full_name: "Chikondi Banda".to_string(),
            gender: None,
            age: 11,
            standard: 4,
            distance_to_school_km: None,
            special_needs: None,
            class_repetitions: None,
            income_band: None,
            guardian_relationship: None,
        }
    }

    #[test]
    fn zero_attendance_rows_fall_back_to_default_rate() {
        let vector = assemble(
            &bare_student(),
            &[320.0],
            AttendanceCounts {
                present_days: 0,
                absent_days: 0,
            },
            0,
            &ExtractorDefaults::default(),
        );
        assert!((vector.school_attendance_rate - 0.8).abs() < 1e-12);
    }

    #[test]
    fn attendance_rate_uses_present_over_total() {
        let vector = assemble(
            &bare_student(),
            &[320.0],
            AttendanceCounts {
                present_days: 39,
                absent_days: 21,
            },
            0,
            &ExtractorDefaults::default(),
        );
        assert!((vector.school_attendance_rate - 0.65).abs() < 1e-12);
    }

    #[test]
    fn empty_score_rows_fall_back_to_default_average() {
        let vector = assemble(
            &bare_student(),
            &[],
            AttendanceCounts::default(),
            0,
            &ExtractorDefaults::default(),
        );
        assert!((vector.term_avg_score - 300.0).abs() < 1e-12);
    }

    #[test]
    fn term_average_is_the_mean_of_subject_scores() {
        let vector = assemble(
            &bare_student(),
            &[200.0, 300.0, 400.0],
            AttendanceCounts::default(),
            0,
            &ExtractorDefaults::default(),
        );
        assert!((vector.term_avg_score - 300.0).abs() < 1e-12);
    }

    #[test]
    fn bare_student_gets_every_documented_default() {
        let vector = assemble(
            &bare_student(),
            &[],
            AttendanceCounts::default(),
            0,
            &ExtractorDefaults::default(),
        );
        assert_eq!(vector.gender, Gender::Female);
        assert_eq!(vector.household_income, IncomeBand::Medium);
        assert_eq!(vector.orphan_status, OrphanStatus::No);
        assert_eq!(vector.class_repetitions, 0);
        assert!(!vector.special_learning);
        assert!((vector.distance_to_school_km - 5.0).abs() < 1e-12);
    }

    #[test]
    fn age_grade_mismatch_allows_two_year_tolerance() {
        let mut student = bare_student();
        // Expected age for standard 4 with no repetitions is 10; flag above 12.
        student.age = 12;
        let ok = assemble(
            &student,
            &[],
            AttendanceCounts::default(),
            0,
            &ExtractorDefaults::default(),
        );
        assert!(!ok.age_grade_mismatch);

        student.age = 13;
        let flagged = assemble(
            &student,
            &[],
            AttendanceCounts::default(),
            0,
            &ExtractorDefaults::default(),
        );
        assert!(flagged.age_grade_mismatch);
    }

    #[test]
    fn repetitions_shift_the_expected_age() {
        let mut student = bare_student();
        student.age = 14;
        student.class_repetitions = Some(2);
        let vector = assemble(
            &student,
            &[],
            AttendanceCounts::default(),
            0,
            &ExtractorDefaults::default(),
        );
        // 6 + 4 + 2 + 2 = 14, so exactly 14 is still inside tolerance.
        assert!(!vector.age_grade_mismatch);
    }
}
