//! Atomic donation recording.
//!
//! A donation is a multi-record write: the donation row, the cause's running
//! total, and the audit entry must become durable together or not at all.
//! Every path goes through a single sqlx transaction; the increment happens
//! inside the storage engine (`current_amount = current_amount + ?`) so
//! concurrent donors can never lose updates to a stale in-memory read.

use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::error;

use crate::audit;
use crate::errors::{Result, ServerError};
use crate::models::CauseStatus;

/// Input for a single donation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDonation {
    pub cause_id: i64,
    pub donor_id: i64,
    /// Amount in minor currency units.
    pub amount: i64,
}

/// What the caller gets back after a committed donation.
#[derive(Debug, Clone, Serialize)]
pub struct DonationReceipt {
    pub donation_id: i64,
    pub cause_id: i64,
    pub amount: i64,
    pub payment_ref: String,
}

/// Fault-injection seam for exercising rollback behaviour.
///
/// Production callers always pass [`FailPoint::None`]; tests inject
/// [`FailPoint::BeforeCommit`] to abort the transaction after every write
/// has been staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    None,
    BeforeCommit,
}

/// Record one donation atomically.
pub async fn record_donation(pool: &SqlitePool, donation: &NewDonation) -> Result<DonationReceipt> {
    record_donation_with(pool, donation, FailPoint::None).await
}

/// Record one donation atomically, with an injectable fault.
pub async fn record_donation_with(
    pool: &SqlitePool,
    donation: &NewDonation,
    fail_point: FailPoint,
) -> Result<DonationReceipt> {
    validate_amount(pool, donation.amount).await?;

    let mut tx = pool.begin().await.map_err(internal)?;

    let receipt = stage_donation(&mut tx, donation).await?;

    if fail_point == FailPoint::BeforeCommit {
        // Dropping the transaction rolls back everything staged above.
        return Err(ServerError::Processing);
    }

    tx.commit().await.map_err(internal)?;
    Ok(receipt)
}

/// Record donations to several causes as one all-or-nothing unit.
///
/// Every item is validated up front; a failure staging any item aborts the
/// whole batch and none of the causes are credited.
pub async fn record_donation_batch(
    pool: &SqlitePool,
    donor_id: i64,
    items: &[(i64, i64)],
) -> Result<Vec<DonationReceipt>> {
    if items.is_empty() {
        return Err(ServerError::Validation(
            "a batch donation needs at least one item".to_string(),
        ));
    }
    for &(_, amount) in items {
        validate_amount(pool, amount).await?;
    }

    let mut tx = pool.begin().await.map_err(internal)?;
    let mut receipts = Vec::with_capacity(items.len());

    for &(cause_id, amount) in items {
        let donation = NewDonation {
            cause_id,
            donor_id,
            amount,
        };
        receipts.push(stage_donation(&mut tx, &donation).await?);
    }

    tx.commit().await.map_err(internal)?;
    Ok(receipts)
}

/// Stage one donation inside an open transaction: increment the cause total,
/// insert the donation row, append the audit entry.
async fn stage_donation(
    tx: &mut Transaction<'_, Sqlite>,
    donation: &NewDonation,
) -> Result<DonationReceipt> {
    // Increment guarded by status so only active causes are credited. The
    // read-modify-write runs inside SQLite under the transaction's lock.
    let rows_affected = sqlx::query(
        "UPDATE causes SET current_amount = current_amount + ?1 WHERE id = ?2 AND status = ?3",
    )
    .bind(donation.amount)
    .bind(donation.cause_id)
    .bind(CauseStatus::Active.as_str())
    .execute(&mut **tx)
    .await
    .map_err(internal)?
    .rows_affected();

    if rows_affected == 0 {
        // Distinguish "no such cause" from "cause exists but is closed".
        let status: Option<(String,)> = sqlx::query_as("SELECT status FROM causes WHERE id = ?1")
            .bind(donation.cause_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(internal)?;
        return Err(match status {
            None => ServerError::NotFound(format!("cause {}", donation.cause_id)),
            Some((s,)) => ServerError::Validation(format!(
                "cause {} is not accepting donations (status: {s})",
                donation.cause_id
            )),
        });
    }

    let donor_exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?1")
        .bind(donation.donor_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(internal)?;
    if donor_exists.is_none() {
        return Err(ServerError::NotFound(format!("user {}", donation.donor_id)));
    }

    let payment_ref = hex::encode(rand::random::<[u8; 16]>());

    let donation_id = sqlx::query(
        r#"
        INSERT INTO donations (cause_id, donor_id, amount, payment_ref)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(donation.cause_id)
    .bind(donation.donor_id)
    .bind(donation.amount)
    .bind(&payment_ref)
    .execute(&mut **tx)
    .await
    .map_err(internal)?
    .last_insert_rowid();

    audit::append(
        &mut **tx,
        Some(donation.donor_id),
        "donation_recorded",
        Some("cause"),
        Some(donation.cause_id),
        Some(&serde_json::json!({
            "donation_id": donation_id,
            "amount": donation.amount,
        })),
    )
    .await
    .map_err(|e| match e {
        ServerError::Database(e) => internal(e),
        other => other,
    })?;

    Ok(DonationReceipt {
        donation_id,
        cause_id: donation.cause_id,
        amount: donation.amount,
        payment_ref,
    })
}

/// Reject non-positive amounts and, when enforcement is on, amounts below
/// the configured platform minimum.
async fn validate_amount(pool: &SqlitePool, amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(ServerError::Validation(
            "donation amount must be positive".to_string(),
        ));
    }

    let cfg = crate::db::get_platform_config(pool).await?;
    if cfg.min_donation_enabled && amount < cfg.min_donation_amount {
        return Err(ServerError::Validation(format!(
            "donation amount is below the minimum of {}",
            cfg.min_donation_amount
        )));
    }
    Ok(())
}

/// Persistence failures inside the donation path surface as the generic
/// processing error; the real cause only goes to the internal log.
fn internal(e: sqlx::Error) -> ServerError {
    error!("Donation transaction error: {e}");
    ServerError::Processing
}
