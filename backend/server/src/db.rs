//! Database layer — migrations, queries, and platform settings.

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::errors::{Result, ServerError};
use crate::models::{Cause, CauseStatus, Donation, PlatformConfig, User};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    // Make sure the file is created if it doesn't exist yet.
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Platform settings (single-row table, id = 1)
// ─────────────────────────────────────────────────────────

pub async fn get_platform_config(pool: &SqlitePool) -> Result<PlatformConfig> {
    let cfg = sqlx::query_as::<_, PlatformConfig>(
        "SELECT id, min_donation_enabled, min_donation_amount FROM platform_config WHERE id = 1",
    )
    .fetch_one(pool)
    .await?;
    Ok(cfg)
}

pub async fn set_platform_config(
    pool: &SqlitePool,
    min_donation_enabled: bool,
    min_donation_amount: i64,
) -> Result<()> {
    if min_donation_amount < 0 {
        return Err(ServerError::Validation(
            "minimum donation amount must not be negative".to_string(),
        ));
    }
    sqlx::query(
        "UPDATE platform_config SET min_donation_enabled = ?1, min_donation_amount = ?2 WHERE id = 1",
    )
    .bind(min_donation_enabled)
    .bind(min_donation_amount)
    .execute(pool)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Causes
// ─────────────────────────────────────────────────────────

pub async fn create_cause(
    pool: &SqlitePool,
    title: &str,
    description: &str,
    target_amount: i64,
    end_date: Option<i64>,
) -> Result<Cause> {
    if title.trim().is_empty() {
        return Err(ServerError::Validation("title must not be empty".to_string()));
    }
    if target_amount <= 0 {
        return Err(ServerError::Validation(
            "target amount must be positive".to_string(),
        ));
    }

    let id = sqlx::query(
        r#"
        INSERT INTO causes (title, description, target_amount, status, end_date)
        VALUES (?1, ?2, ?3, 'active', ?4)
        "#,
    )
    .bind(title)
    .bind(description)
    .bind(target_amount)
    .bind(end_date)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_cause(pool, id).await
}

pub async fn get_cause(pool: &SqlitePool, id: i64) -> Result<Cause> {
    sqlx::query_as::<_, Cause>(
        r#"
        SELECT id, title, description, target_amount, current_amount, status,
               end_date, created_at
        FROM   causes
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ServerError::NotFound(format!("cause {id}")))
}

/// Fetch all causes, newest first.
pub async fn list_causes(pool: &SqlitePool) -> Result<Vec<Cause>> {
    let rows = sqlx::query_as::<_, Cause>(
        r#"
        SELECT id, title, description, target_amount, current_amount, status,
               end_date, created_at
        FROM   causes
        ORDER  BY created_at DESC, id DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Retire a cause. Archived causes stop accepting donations but keep their
/// donation history; causes are never physically deleted.
pub async fn archive_cause(pool: &SqlitePool, id: i64) -> Result<Cause> {
    let rows_affected = sqlx::query("UPDATE causes SET status = ?1 WHERE id = ?2")
        .bind(CauseStatus::Archived.as_str())
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();

    if rows_affected == 0 {
        return Err(ServerError::NotFound(format!("cause {id}")));
    }
    get_cause(pool, id).await
}

// ─────────────────────────────────────────────────────────
// Donations (reads — writes go through `donations::record_*`)
// ─────────────────────────────────────────────────────────

/// Fetch all donations for a given cause, oldest first.
pub async fn get_donations_for_cause(pool: &SqlitePool, cause_id: i64) -> Result<Vec<Donation>> {
    let rows = sqlx::query_as::<_, Donation>(
        r#"
        SELECT id, cause_id, donor_id, amount, payment_ref, created_at
        FROM   donations
        WHERE  cause_id = ?1
        ORDER  BY created_at ASC, id ASC
        "#,
    )
    .bind(cause_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────

pub async fn create_user(
    pool: &SqlitePool,
    email: &str,
    password_hash: &str,
    role: &str,
) -> Result<User> {
    let id = sqlx::query("INSERT INTO users (email, password_hash, role) VALUES (?1, ?2, ?3)")
        .bind(email)
        .bind(password_hash)
        .bind(role)
        .execute(pool)
        .await?
        .last_insert_rowid();

    get_user(pool, id).await
}

pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<User> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT id, email, password_hash, role, totp_secret, totp_enabled, created_at
        FROM   users
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ServerError::NotFound(format!("user {id}")))
}

/// Error unless the given user exists and carries the `admin` role.
pub async fn require_admin(pool: &SqlitePool, user_id: i64) -> Result<User> {
    let user = get_user(pool, user_id).await?;
    if user.role != "admin" {
        return Err(ServerError::Unauthorized(
            "admin role required".to_string(),
        ));
    }
    Ok(user)
}
