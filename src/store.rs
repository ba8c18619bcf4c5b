use anyhow::Context;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::ScoringError;
use crate::models::{
    AttendanceCounts, BatchRunRecord, BatchRunStatus, PredictionRecord, PredictionResult,
    RiskLevel, StudentRow, TermRow,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn get_student(
    pool: &PgPool,
    student_id: Uuid,
) -> Result<Option<StudentRow>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT s.id, s.full_name, s.gender, s.age, s.standard,
               s.distance_to_school_km, s.special_needs, s.class_repetitions,
               g.monthly_income_band, g.relationship
        FROM dropout_risk.students s
        LEFT JOIN dropout_risk.guardians g ON g.id = s.guardian_id
        WHERE s.id = $1
        "#,
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| StudentRow {
        id: row.get("id"),
        full_name: row.get("full_name"),
        gender: row.get("gender"),
        age: row.get("age"),
        standard: row.get("standard"),
        distance_to_school_km: row.get("distance_to_school_km"),
        special_needs: row.get("special_needs"),
        class_repetitions: row.get("class_repetitions"),
        income_band: row.get("monthly_income_band"),
        guardian_relationship: row.get("relationship"),
    }))
}

pub async fn get_latest_academic_term(
    pool: &PgPool,
    student_id: Uuid,
) -> Result<Option<TermRow>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, academic_year, term_ordinal
        FROM dropout_risk.academic_terms
        WHERE student_id = $1
        ORDER BY academic_year DESC, term_ordinal DESC
        LIMIT 1
        "#,
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| TermRow {
        id: row.get("id"),
        academic_year: row.get("academic_year"),
        term_ordinal: row.get("term_ordinal"),
    }))
}

pub async fn get_subject_scores(pool: &PgPool, term_id: Uuid) -> Result<Vec<f64>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT score FROM dropout_risk.subject_scores WHERE term_id = $1 ORDER BY subject",
    )
    .bind(term_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|row| row.get("score")).collect())
}

pub async fn get_attendance_counts(
    pool: &PgPool,
    student_id: Uuid,
) -> Result<AttendanceCounts, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT
            count(*) FILTER (WHERE status = 'present') AS present_days,
            count(*) FILTER (WHERE status = 'absent') AS absent_days
        FROM dropout_risk.attendance_records
        WHERE student_id = $1
        "#,
    )
    .bind(student_id)
    .fetch_one(pool)
    .await?;

    Ok(AttendanceCounts {
        present_days: row.get("present_days"),
        absent_days: row.get("absent_days"),
    })
}

pub async fn get_bullying_count(pool: &PgPool, term_id: Uuid) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "SELECT count(*) AS incidents FROM dropout_risk.bullying_incidents WHERE term_id = $1",
    )
    .bind(term_id)
    .fetch_one(pool)
    .await?;

    Ok(row.get("incidents"))
}

pub async fn get_active_student_ids(pool: &PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id FROM dropout_risk.students WHERE status = 'active' ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|row| row.get("id")).collect())
}

/// Persist one prediction. Always an insert; history is append-only. The
/// student existence check runs inside the same transaction as the insert so
/// a student deleted mid-pipeline cannot leave a dangling row.
pub async fn insert_prediction(
    pool: &PgPool,
    result: &PredictionResult,
) -> Result<PredictionRecord, ScoringError> {
    let mut tx = pool.begin().await?;

    let exists = sqlx::query("SELECT 1 AS one FROM dropout_risk.students WHERE id = $1")
        .bind(result.student_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(ScoringError::StudentNotFound(result.student_id));
    }

    let record = PredictionRecord {
        id: Uuid::new_v4(),
        student_id: result.student_id,
        risk_score: result.risk_score(),
        risk_level: result.risk_level,
        contributing_factors: result.contributing_factors.clone(),
        recommendations: result.recommendations.clone(),
        predicted_at: result.predicted_at,
        algorithm_version: result.algorithm_version.clone(),
    };

    sqlx::query(
        r#"
        INSERT INTO dropout_risk.predictions
        (id, student_id, risk_score, risk_level, contributing_factors,
         recommendations, predicted_at, algorithm_version)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(record.id)
    .bind(record.student_id)
    .bind(record.risk_score)
    .bind(record.risk_level.as_str())
    .bind(&record.contributing_factors)
    .bind(&record.recommendations)
    .bind(record.predicted_at)
    .bind(&record.algorithm_version)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(record)
}

fn prediction_from_row(row: &PgRow) -> anyhow::Result<PredictionRecord> {
    let level: String = row.get("risk_level");
    Ok(PredictionRecord {
        id: row.get("id"),
        student_id: row.get("student_id"),
        risk_score: row.get("risk_score"),
        risk_level: RiskLevel::parse(&level)
            .with_context(|| format!("unknown risk level {level:?} in record store"))?,
        contributing_factors: row.get("contributing_factors"),
        recommendations: row.get("recommendations"),
        predicted_at: row.get("predicted_at"),
        algorithm_version: row.get("algorithm_version"),
    })
}

pub async fn get_latest_prediction(
    pool: &PgPool,
    student_id: Uuid,
) -> anyhow::Result<Option<PredictionRecord>> {
    let row = sqlx::query(
        r#"
        SELECT id, student_id, risk_score, risk_level, contributing_factors,
               recommendations, predicted_at, algorithm_version
        FROM dropout_risk.predictions
        WHERE student_id = $1
        ORDER BY predicted_at DESC
        LIMIT 1
        "#,
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(prediction_from_row).transpose()
}

pub async fn get_prediction_history(
    pool: &PgPool,
    student_id: Uuid,
    limit: i64,
) -> anyhow::Result<Vec<PredictionRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, student_id, risk_score, risk_level, contributing_factors,
               recommendations, predicted_at, algorithm_version
        FROM dropout_risk.predictions
        WHERE student_id = $1
        ORDER BY predicted_at DESC
        LIMIT $2
        "#,
    )
    .bind(student_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(prediction_from_row).collect()
}

/// Risk-level counts over each student's most recent prediction.
pub async fn risk_distribution(pool: &PgPool) -> anyhow::Result<Vec<(RiskLevel, i64)>> {
    let rows = sqlx::query(
        r#"
        SELECT risk_level, count(*) AS students
        FROM (
            SELECT DISTINCT ON (student_id) risk_level
            FROM dropout_risk.predictions
            ORDER BY student_id, predicted_at DESC
        ) latest
        GROUP BY risk_level
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut distribution = Vec::new();
    for row in rows {
        let level: String = row.get("risk_level");
        let level = RiskLevel::parse(&level)
            .with_context(|| format!("unknown risk level {level:?} in record store"))?;
        distribution.push((level, row.get("students")));
    }
    distribution.sort_by_key(|(level, _)| *level);
    Ok(distribution)
}

/// Open a batch run record in `running` state. The partial unique index on
/// status means a second concurrent run fails here instead of racing on the
/// counters later.
pub async fn create_batch_run(pool: &PgPool, total_students: i64) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    let result = sqlx::query(
        r#"
        INSERT INTO dropout_risk.batch_runs (id, started_at, status, total_students)
        VALUES ($1, $2, 'running', $3)
        "#,
    )
    .bind(id)
    .bind(Utc::now())
    .bind(total_students)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(id),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            anyhow::bail!("another batch run is already in progress")
        }
        Err(err) => Err(err).context("failed to create batch run record"),
    }
}

pub async fn update_batch_run_progress(
    pool: &PgPool,
    run_id: Uuid,
    processed: i64,
    success: i64,
    failure: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE dropout_risk.batch_runs
        SET processed_count = $2, success_count = $3, failure_count = $4
        WHERE id = $1
        "#,
    )
    .bind(run_id)
    .bind(processed)
    .bind(success)
    .bind(failure)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn finalize_batch_run(
    pool: &PgPool,
    run_id: Uuid,
    status: BatchRunStatus,
    error_summary: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE dropout_risk.batch_runs
        SET status = $2,
            completed_at = now(),
            duration_seconds = EXTRACT(EPOCH FROM (now() - started_at))::float8,
            error_summary = $3
        WHERE id = $1
        "#,
    )
    .bind(run_id)
    .bind(status.as_str())
    .bind(error_summary)
    .execute(pool)
    .await?;
    Ok(())
}

fn batch_run_from_row(row: &PgRow) -> anyhow::Result<BatchRunRecord> {
    let status: String = row.get("status");
    Ok(BatchRunRecord {
        id: row.get("id"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        status: BatchRunStatus::parse(&status)
            .with_context(|| format!("unknown batch run status {status:?} in record store"))?,
        total_students: row.get("total_students"),
        processed_count: row.get("processed_count"),
        success_count: row.get("success_count"),
        failure_count: row.get("failure_count"),
        error_summary: row.get("error_summary"),
        duration_seconds: row.get("duration_seconds"),
    })
}

pub async fn get_batch_run(pool: &PgPool, run_id: Uuid) -> anyhow::Result<BatchRunRecord> {
    let row = sqlx::query(
        r#"
        SELECT id, started_at, completed_at, status, total_students,
               processed_count, success_count, failure_count, error_summary,
               duration_seconds
        FROM dropout_risk.batch_runs
        WHERE id = $1
        "#,
    )
    .bind(run_id)
    .fetch_one(pool)
    .await?;

    batch_run_from_row(&row)
}

pub async fn get_last_batch_run(pool: &PgPool) -> anyhow::Result<Option<BatchRunRecord>> {
    let row = sqlx::query(
        r#"
        SELECT id, started_at, completed_at, status, total_students,
               processed_count, success_count, failure_count, error_summary,
               duration_seconds
        FROM dropout_risk.batch_runs
        ORDER BY started_at DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(batch_run_from_row).transpose()
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let guardians = vec![
        (
            Uuid::parse_str("7f3c1d2e-5a68-4b1f-9c7d-2e8f4a6b0c11")?,
            "Esnart Phiri",
            "mother",
            Some("medium"),
        ),
        (
            Uuid::parse_str("9a5b2c3d-6e71-4f82-8a9b-3c4d5e6f7a22")?,
            "Yamikani Mwale",
            "guardian",
            Some("low"),
        ),
        (
            Uuid::parse_str("b1c2d3e4-7f80-4a91-b2c3-4d5e6f708a33")?,
            "Grace Chirwa",
            "single_parent",
            None,
        ),
    ];

    for (id, full_name, relationship, income) in guardians {
        sqlx::query(
            r#"
            INSERT INTO dropout_risk.guardians (id, full_name, relationship, monthly_income_band)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(full_name)
        .bind(relationship)
        .bind(income)
        .execute(pool)
        .await?;
    }

    let students = vec![
        (
            Uuid::parse_str("1a2b3c4d-1111-4e5f-8a9b-0c1d2e3f4a01")?,
            "Tamanda Phiri",
            Some("female"),
            10,
            4,
            Some(2.5_f64),
            Some(false),
            Some(0),
            Some(Uuid::parse_str("7f3c1d2e-5a68-4b1f-9c7d-2e8f4a6b0c11")?),
        ),
        (
            Uuid::parse_str("1a2b3c4d-2222-4e5f-8a9b-0c1d2e3f4a02")?,
            "Gift Mwale",
            Some("male"),
            14,
            5,
            Some(8.0_f64),
            Some(false),
            Some(2),
            Some(Uuid::parse_str("9a5b2c3d-6e71-4f82-8a9b-3c4d5e6f7a22")?),
        ),
        (
            Uuid::parse_str("1a2b3c4d-3333-4e5f-8a9b-0c1d2e3f4a03")?,
            "Mary Chirwa",
            None,
            9,
            3,
            None,
            None,
            None,
            Some(Uuid::parse_str("b1c2d3e4-7f80-4a91-b2c3-4d5e6f708a33")?),
        ),
        (
            Uuid::parse_str("1a2b3c4d-4444-4e5f-8a9b-0c1d2e3f4a04")?,
            "Blessings Nkhoma",
            Some("male"),
            7,
            1,
            Some(1.0_f64),
            Some(false),
            Some(0),
            None,
        ),
    ];

    for (id, full_name, gender, age, standard, distance, special, repetitions, guardian_id) in
        students
    {
        sqlx::query(
            r#"
            INSERT INTO dropout_risk.students
            (id, full_name, gender, age, standard, distance_to_school_km,
             special_needs, class_repetitions, guardian_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'active')
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(full_name)
        .bind(gender)
        .bind(age)
        .bind(standard)
        .bind(distance)
        .bind(special)
        .bind(repetitions)
        .bind(guardian_id)
        .execute(pool)
        .await?;
    }

    // Terms and subject scores. Blessings Nkhoma deliberately has no terms so
    // the insufficient-data path is reachable from seed data.
    let terms = vec![
        (
            Uuid::parse_str("2b3c4d5e-1111-4f60-9a0b-1c2d3e4f5a01")?,
            Uuid::parse_str("1a2b3c4d-1111-4e5f-8a9b-0c1d2e3f4a01")?,
            2025,
            2,
            vec![("english", 470.0), ("mathematics", 440.0), ("science", 455.0)],
        ),
        (
            Uuid::parse_str("2b3c4d5e-2222-4f60-9a0b-1c2d3e4f5a02")?,
            Uuid::parse_str("1a2b3c4d-2222-4e5f-8a9b-0c1d2e3f4a02")?,
            2025,
            2,
            vec![("english", 240.0), ("mathematics", 255.0), ("science", 255.0)],
        ),
        (
            Uuid::parse_str("2b3c4d5e-3333-4f60-9a0b-1c2d3e4f5a03")?,
            Uuid::parse_str("1a2b3c4d-3333-4e5f-8a9b-0c1d2e3f4a03")?,
            2025,
            1,
            vec![],
        ),
    ];

    for (term_id, student_id, academic_year, term_ordinal, scores) in terms {
        sqlx::query(
            r#"
            INSERT INTO dropout_risk.academic_terms (id, student_id, academic_year, term_ordinal)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(term_id)
        .bind(student_id)
        .bind(academic_year)
        .bind(term_ordinal)
        .execute(pool)
        .await?;

        for (subject, score) in scores {
            sqlx::query(
                r#"
                INSERT INTO dropout_risk.subject_scores (id, term_id, subject, score)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(term_id)
            .bind(subject)
            .bind(score)
            .execute(pool)
            .await?;
        }
    }

    seed_attendance(
        pool,
        Uuid::parse_str("1a2b3c4d-1111-4e5f-8a9b-0c1d2e3f4a01")?,
        57,
        3,
    )
    .await?;
    seed_attendance(
        pool,
        Uuid::parse_str("1a2b3c4d-2222-4e5f-8a9b-0c1d2e3f4a02")?,
        39,
        21,
    )
    .await?;

    // Bullying incidents for the high-risk student's current term. Rows have
    // generated ids, so clear before inserting to keep reseeding idempotent.
    let incident_term = Uuid::parse_str("2b3c4d5e-2222-4f60-9a0b-1c2d3e4f5a02")?;
    let victim = Uuid::parse_str("1a2b3c4d-2222-4e5f-8a9b-0c1d2e3f4a02")?;
    sqlx::query("DELETE FROM dropout_risk.bullying_incidents WHERE term_id = $1")
        .bind(incident_term)
        .execute(pool)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO dropout_risk.bullying_incidents (id, student_id, term_id, occurred_on, note)
        SELECT gen_random_uuid(), $1, $2, current_date - offs, 'reported incident'
        FROM generate_series(1, 6) AS offs
        "#,
    )
    .bind(victim)
    .bind(incident_term)
    .execute(pool)
    .await?;

    Ok(())
}

async fn seed_attendance(
    pool: &PgPool,
    student_id: Uuid,
    present_days: i32,
    absent_days: i32,
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM dropout_risk.attendance_records WHERE student_id = $1")
        .bind(student_id)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO dropout_risk.attendance_records (id, student_id, attended_on, status)
        SELECT gen_random_uuid(), $1, current_date - offs, 'present'
        FROM generate_series(1, $2) AS offs
        "#,
    )
    .bind(student_id)
    .bind(present_days)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO dropout_risk.attendance_records (id, student_id, attended_on, status)
        SELECT gen_random_uuid(), $1, current_date - $2 - offs, 'absent'
        FROM generate_series(1, $3) AS offs
        "#,
    )
    .bind(student_id)
    .bind(present_days)
    .bind(absent_days)
    .execute(pool)
    .await?;

    Ok(())
}
