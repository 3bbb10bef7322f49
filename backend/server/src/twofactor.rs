//! Two-factor authentication — TOTP secrets, enablement, and backup codes.
//!
//! Per-user state machine: `disabled → secret-issued → enabled`. Going back
//! to `disabled` requires password re-confirmation and wipes the secret plus
//! every backup code.

use std::collections::HashSet;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::audit;
use crate::db;
use crate::errors::{Result, ServerError};
use crate::models::User;

const BACKUP_CODE_COUNT: usize = 10;
const ISSUER: &str = "microdonate";

/// Result of issuing a fresh TOTP secret.
#[derive(Debug, Clone, Serialize)]
pub struct SecretIssued {
    /// Base32-encoded shared secret, shown to the user exactly once.
    pub secret: String,
    /// `otpauth://` provisioning URL for authenticator apps.
    pub otpauth_url: String,
}

// ─────────────────────────────────────────────────────────
// Password hashing
// ─────────────────────────────────────────────────────────

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ServerError::Credential(format!("password hashing failed: {e}")))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| ServerError::Credential(format!("stored hash is malformed: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

// ─────────────────────────────────────────────────────────
// State transitions
// ─────────────────────────────────────────────────────────

/// Issue (or re-issue) a TOTP secret for a user.
///
/// Rejected once 2FA is fully enabled; while still in the `secret-issued`
/// state a new call replaces the previous secret.
pub async fn issue_secret(pool: &SqlitePool, user_id: i64) -> Result<SecretIssued> {
    let user = db::get_user(pool, user_id).await?;
    if user.totp_enabled {
        return Err(ServerError::Validation(
            "two-factor authentication is already enabled".to_string(),
        ));
    }

    let raw: [u8; 20] = rand::random();
    let Secret::Encoded(encoded) = Secret::Raw(raw.to_vec()).to_encoded() else {
        return Err(ServerError::Credential("secret encoding failed".to_string()));
    };

    let totp = build_totp(&encoded, &user.email)?;
    let otpauth_url = totp.get_url();

    sqlx::query("UPDATE users SET totp_secret = ?1 WHERE id = ?2")
        .bind(&encoded)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(SecretIssued {
        secret: encoded,
        otpauth_url,
    })
}

/// Complete enrolment: check a live TOTP code against the issued secret,
/// flip the enabled flag, and hand back ten fresh single-use backup codes.
pub async fn enable(pool: &SqlitePool, user_id: i64, code: &str) -> Result<Vec<String>> {
    let user = db::get_user(pool, user_id).await?;
    if user.totp_enabled {
        return Err(ServerError::Validation(
            "two-factor authentication is already enabled".to_string(),
        ));
    }
    let secret = user.totp_secret.as_deref().ok_or_else(|| {
        ServerError::Validation("no two-factor secret has been issued".to_string())
    })?;

    if !check_totp(secret, &user.email, code)? {
        return Err(ServerError::Validation(
            "invalid verification code".to_string(),
        ));
    }

    let codes = generate_backup_codes();

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE users SET totp_enabled = 1 WHERE id = ?1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM backup_codes WHERE user_id = ?1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    for code in &codes {
        sqlx::query("INSERT INTO backup_codes (user_id, code) VALUES (?1, ?2)")
            .bind(user_id)
            .bind(code)
            .execute(&mut *tx)
            .await?;
    }
    audit::append(
        &mut *tx,
        Some(user_id),
        "two_factor_enabled",
        Some("user"),
        Some(user_id),
        None,
    )
    .await?;
    tx.commit().await?;

    Ok(codes)
}

/// Check a candidate code for an enabled user: current TOTP window first,
/// then the backup codes. A matching backup code is consumed in the same
/// statement, so a second use of it returns `false`.
pub async fn verify(pool: &SqlitePool, user_id: i64, candidate: &str) -> Result<bool> {
    let user = db::get_user(pool, user_id).await?;
    if !user.totp_enabled {
        return Err(ServerError::Validation(
            "two-factor authentication is not enabled".to_string(),
        ));
    }
    let secret = user.totp_secret.as_deref().ok_or_else(|| {
        ServerError::Credential(format!("user {user_id} is enabled but has no secret"))
    })?;

    if check_totp(secret, &user.email, candidate)? {
        return Ok(true);
    }
    consume_backup_code(pool, user_id, candidate).await
}

/// Tear down 2FA after re-confirming the account password. Clears the
/// secret, the enabled flag, and every backup code.
pub async fn disable(pool: &SqlitePool, user_id: i64, password: &str) -> Result<()> {
    let user = db::get_user(pool, user_id).await?;
    if !user.totp_enabled {
        return Err(ServerError::Validation(
            "two-factor authentication is not enabled".to_string(),
        ));
    }
    if !verify_password(password, &user.password_hash)? {
        return Err(ServerError::Unauthorized("incorrect password".to_string()));
    }

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE users SET totp_secret = NULL, totp_enabled = 0 WHERE id = ?1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM backup_codes WHERE user_id = ?1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    audit::append(
        &mut *tx,
        Some(user_id),
        "two_factor_disabled",
        Some("user"),
        Some(user_id),
        None,
    )
    .await?;
    tx.commit().await?;

    Ok(())
}

// ─────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────

fn build_totp(encoded_secret: &str, account: &str) -> Result<TOTP> {
    let bytes = Secret::Encoded(encoded_secret.to_string())
        .to_bytes()
        .map_err(|e| ServerError::Credential(format!("stored secret is malformed: {e:?}")))?;
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        bytes,
        Some(ISSUER.to_string()),
        account.to_string(),
    )
    .map_err(|e| ServerError::Credential(format!("TOTP construction failed: {e}")))
}

fn check_totp(encoded_secret: &str, account: &str, code: &str) -> Result<bool> {
    let totp = build_totp(encoded_secret, account)?;
    totp.check_current(code)
        .map_err(|e| ServerError::Credential(format!("system clock error: {e}")))
}

/// Ten pairwise-unique 8-hex-character codes, stored and matched uppercase.
fn generate_backup_codes() -> Vec<String> {
    let mut seen = HashSet::with_capacity(BACKUP_CODE_COUNT);
    while seen.len() < BACKUP_CODE_COUNT {
        seen.insert(hex::encode(rand::random::<[u8; 4]>()).to_uppercase());
    }
    seen.into_iter().collect()
}

/// Atomically mark a backup code used. Case-insensitive; a code that is
/// unknown or already consumed matches zero rows.
async fn consume_backup_code(pool: &SqlitePool, user_id: i64, candidate: &str) -> Result<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE backup_codes
        SET    used_at = ?1
        WHERE  user_id = ?2 AND code = UPPER(?3) AND used_at IS NULL
        "#,
    )
    .bind(Utc::now().timestamp())
    .bind(user_id)
    .bind(candidate)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected == 1)
}

/// The 2FA state a user is in, for API reporting.
pub fn state_of(user: &User) -> &'static str {
    if user.totp_enabled {
        "enabled"
    } else if user.totp_secret.is_some() {
        "secret-issued"
    } else {
        "disabled"
    }
}
