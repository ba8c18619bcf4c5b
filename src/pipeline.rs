use chrono::Utc;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::artifact::ScoringContext;
use crate::config::ScoringConfig;
use crate::error::ScoringError;
use crate::models::PredictionResult;
use crate::{encode, features, interpret, store};

/// Score one student end to end: extract, encode, classify, interpret,
/// record. Stages run strictly in order and the prediction write is awaited,
/// so by the time this returns Ok the record store holds the new row.
pub async fn score_student(
    pool: &PgPool,
    ctx: &ScoringContext,
    config: &ScoringConfig,
    student_id: Uuid,
) -> Result<PredictionResult, ScoringError> {
    let vector = features::extract(pool, &config.defaults, student_id).await?;
    let row = encode::encode(ctx, &vector)?;
    let probability = ctx.predict(&row);
    let interpretation = interpret::interpret(probability, &vector, &config.thresholds);

    let result = PredictionResult {
        student_id,
        probability,
        risk_level: interpretation.risk_level,
        contributing_factors: interpretation.contributing_factors,
        recommendations: interpretation.recommendations,
        predicted_at: Utc::now(),
        algorithm_version: ctx.version.clone(),
    };

    store::insert_prediction(pool, &result).await?;
    info!(
        student = %student_id,
        probability = result.probability,
        level = result.risk_level.as_str(),
        "student scored"
    );

    Ok(result)
}
