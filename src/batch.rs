use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDateTime, TimeDelta};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifact::ScoringContext;
use crate::config::ScoringConfig;
use crate::error::ScoringError;
use crate::models::{BatchRunRecord, BatchRunStatus};
use crate::{pipeline, store};

/// Running counters for one roster sweep. Every student ends up in exactly
/// one of success or failure, so processed = success + failure throughout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTally {
    pub processed: i64,
    pub success: i64,
    pub failure: i64,
}

impl BatchTally {
    pub fn absorb(&mut self, outcome: &Result<(), ScoringError>) {
        self.processed += 1;
        match outcome {
            Ok(()) => self.success += 1,
            Err(_) => self.failure += 1,
        }
    }
}

/// One complete sweep of the active roster. Students are scored concurrently
/// within each fixed-size sub-batch and sequentially across sub-batches;
/// progress is persisted after every sub-batch so a crash or cancellation
/// leaves an accurate partial record.
///
/// Per-student failures are tallied and never abort the run. A record-store
/// failure at the run level (roster snapshot, progress write, connection
/// loss) finalizes the run as failed with the error captured.
pub async fn run_batch(
    pool: &PgPool,
    ctx: &Arc<ScoringContext>,
    config: &Arc<ScoringConfig>,
    batch_size: usize,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<BatchRunRecord> {
    let roster = store::get_active_student_ids(pool)
        .await
        .context("failed to snapshot the active roster")?;
    let run_id = store::create_batch_run(pool, roster.len() as i64).await?;
    info!(run = %run_id, total = roster.len(), "batch run started");

    match sweep(pool, ctx, config, batch_size, shutdown, run_id, &roster).await {
        Ok(tally) => {
            store::finalize_batch_run(pool, run_id, BatchRunStatus::Completed, None)
                .await
                .context("failed to finalize batch run")?;
            info!(
                run = %run_id,
                processed = tally.processed,
                success = tally.success,
                failure = tally.failure,
                "batch run completed"
            );
        }
        Err(err) => {
            let summary: String = format!("{err:#}").chars().take(500).collect();
            let _ = store::finalize_batch_run(
                pool,
                run_id,
                BatchRunStatus::Failed,
                Some(&summary),
            )
            .await;
            return Err(err);
        }
    }

    store::get_batch_run(pool, run_id).await
}

async fn sweep(
    pool: &PgPool,
    ctx: &Arc<ScoringContext>,
    config: &Arc<ScoringConfig>,
    batch_size: usize,
    shutdown: &watch::Receiver<bool>,
    run_id: Uuid,
    roster: &[Uuid],
) -> anyhow::Result<BatchTally> {
    let mut tally = BatchTally::default();

    for chunk in roster.chunks(batch_size.max(1)) {
        if *shutdown.borrow() {
            anyhow::bail!("shutdown signal received before the roster sweep finished");
        }

        let mut set = JoinSet::new();
        for &student_id in chunk {
            let pool = pool.clone();
            let ctx = Arc::clone(ctx);
            let config = Arc::clone(config);
            set.spawn(async move {
                let outcome = pipeline::score_student(&pool, &ctx, &config, student_id)
                    .await
                    .map(|_| ());
                (student_id, outcome)
            });
        }

        let mut store_failure: Option<String> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((student_id, outcome)) => {
                    log_outcome(student_id, &outcome);
                    if let Err(ScoringError::Store(err)) = &outcome {
                        store_failure = Some(err.to_string());
                    }
                    tally.absorb(&outcome);
                }
                Err(join_err) => {
                    error!(error = %join_err, "scoring task aborted");
                    tally.processed += 1;
                    tally.failure += 1;
                }
            }
        }

        store::update_batch_run_progress(
            pool,
            run_id,
            tally.processed,
            tally.success,
            tally.failure,
        )
        .await
        .context("failed to persist batch run progress")?;

        // A store outage is a run-level condition, not a per-student one.
        if let Some(err) = store_failure {
            anyhow::bail!("record store unavailable during sub-batch: {err}");
        }
    }

    Ok(tally)
}

fn log_outcome(student_id: Uuid, outcome: &Result<(), ScoringError>) {
    match outcome {
        Ok(()) => {}
        // A vocabulary mismatch is a code or data-migration defect, not a
        // data-quality condition, so it logs at error level.
        Err(err @ ScoringError::UnknownCategory { .. }) => {
            error!(student = %student_id, error = %err, "vocabulary mismatch while scoring");
        }
        Err(err) => {
            warn!(student = %student_id, error = %err, "student scoring failed");
        }
    }
}

/// Delay from `now` to the next daily fire time, rolling to tomorrow when the
/// time has already passed today. Returns None only for an invalid hour or
/// minute.
pub fn delay_until_daily(now: NaiveDateTime, hour: u32, minute: u32) -> Option<TimeDelta> {
    let mut target = now.date().and_hms_opt(hour, minute, 0)?;
    if target <= now {
        target += TimeDelta::days(1);
    }
    Some(target - now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn failure() -> Result<(), ScoringError> {
        Err(ScoringError::InsufficientData(Uuid::new_v4()))
    }

    #[test]
    fn tally_accounts_for_every_student() {
        let outcomes: Vec<Result<(), ScoringError>> = vec![
            Ok(()),
            failure(),
            Ok(()),
            Err(ScoringError::StudentNotFound(Uuid::new_v4())),
            Ok(()),
        ];

        let mut tally = BatchTally::default();
        for outcome in &outcomes {
            tally.absorb(outcome);
        }

        assert_eq!(tally.processed, 5);
        assert_eq!(tally.success, 3);
        assert_eq!(tally.failure, 2);
        assert_eq!(tally.processed, tally.success + tally.failure);
    }

    #[test]
    fn tally_with_all_failures_still_processes_everyone() {
        let mut tally = BatchTally::default();
        for _ in 0..4 {
            tally.absorb(&failure());
        }
        assert_eq!(tally.processed, 4);
        assert_eq!(tally.success, 0);
        assert_eq!(tally.failure, 4);
    }

    #[test]
    fn daily_delay_targets_today_when_still_ahead() {
        let now = NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(1, 0, 0)
            .unwrap();
        let delay = delay_until_daily(now, 2, 0).unwrap();
        assert_eq!(delay, TimeDelta::hours(1));
    }

    #[test]
    fn daily_delay_rolls_to_tomorrow_when_past() {
        let now = NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        let delay = delay_until_daily(now, 2, 0).unwrap();
        assert_eq!(delay, TimeDelta::hours(11) + TimeDelta::minutes(30));
    }

    #[test]
    fn daily_delay_rejects_invalid_times() {
        let now = NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert!(delay_until_daily(now, 24, 0).is_none());
    }
}
