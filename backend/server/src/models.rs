//! Typed records stored in / read from the database.
//!
//! Sensitive fields (`password_hash`, `totp_secret`) are excluded from
//! serialization so no API response or structured log can leak them.

use serde::{Deserialize, Serialize};

/// Lifecycle states of a cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseStatus {
    /// Accepting donations.
    Active,
    /// End date passed; no further donations.
    Completed,
    /// Retired by an admin.
    Archived,
}

impl CauseStatus {
    /// Return the identifier string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }

}

/// A fundraising campaign with a target and a running total.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cause {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub target_amount: i64,
    pub current_amount: i64,
    pub status: String,
    pub end_date: Option<i64>,
    pub created_at: i64,
}

/// An immutable record of a single contribution to a cause.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Donation {
    pub id: i64,
    pub cause_id: i64,
    pub donor_id: i64,
    pub amount: i64,
    pub payment_ref: String,
    pub created_at: i64,
}

/// A platform account. Secret material never serializes outward.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    #[serde(skip_serializing)]
    pub totp_secret: Option<String>,
    pub totp_enabled: bool,
    pub created_at: i64,
}

/// An append-only audit record. Never updated or deleted by application code.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub actor_id: Option<i64>,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub details: Option<String>,
    pub created_at: i64,
}

/// The single-row platform settings record (always `id = 1`).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PlatformConfig {
    pub id: i64,
    pub min_donation_enabled: bool,
    pub min_donation_amount: i64,
}
