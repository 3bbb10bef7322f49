//! Cause-expiry sweep — transitions causes past their end date from
//! `active` to `completed`.
//!
//! The sweep itself is a plain async function taking an explicit `now`, so
//! it can be called on demand (admin endpoint, tests) independently of the
//! timer task that drives it in production.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::audit;
use crate::config::Config;
use crate::errors::Result;
use crate::models::CauseStatus;

pub struct SweeperState {
    pub pool: SqlitePool,
    pub config: Config,
}

/// Counts reported by one sweep run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SweepOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// Transition every `active` cause whose `end_date` has passed to
/// `completed`, in one bulk update.
///
/// Idempotent: a second run with no newly expired causes modifies nothing,
/// and `completed` / `archived` causes are never touched.
pub async fn sweep(pool: &SqlitePool, now: i64) -> Result<SweepOutcome> {
    let mut tx = pool.begin().await?;

    let (matched,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM   causes
        WHERE  status = ?1 AND end_date IS NOT NULL AND end_date < ?2
        "#,
    )
    .bind(CauseStatus::Active.as_str())
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    let modified = sqlx::query(
        r#"
        UPDATE causes
        SET    status = ?1
        WHERE  status = ?2 AND end_date IS NOT NULL AND end_date < ?3
        "#,
    )
    .bind(CauseStatus::Completed.as_str())
    .bind(CauseStatus::Active.as_str())
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if modified > 0 {
        audit::append(
            &mut *tx,
            None,
            "causes_expired",
            Some("cause"),
            None,
            Some(&serde_json::json!({ "modified": modified })),
        )
        .await?;
    }

    tx.commit().await?;

    Ok(SweepOutcome {
        matched: matched as u64,
        modified,
    })
}

/// Timer loop driving the sweep on a fixed schedule (daily by default).
///
/// Failures are logged and re-attempted on the next tick only — there is no
/// automatic retry within a tick. The token stops the loop cleanly at
/// shutdown.
pub async fn run(state: Arc<SweeperState>, shutdown: CancellationToken) {
    let interval = Duration::from_secs(state.config.sweep_interval_secs);
    info!("Expiry sweep scheduled every {}s", interval.as_secs());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Expiry sweep shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match sweep(&state.pool, Utc::now().timestamp()).await {
            Ok(outcome) => {
                if outcome.modified > 0 {
                    info!(
                        "Expiry sweep: {} matched, {} transitioned to completed",
                        outcome.matched, outcome.modified
                    );
                }
            }
            Err(e) => {
                error!("Expiry sweep failed: {e}");
            }
        }
    }
}
