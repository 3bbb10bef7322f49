//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::audit::{self, AuditQuery};
use crate::db;
use crate::donations::{self, DonationReceipt, NewDonation};
use crate::errors::{Result, ServerError};
use crate::expiry;
use crate::models::{AuditEntry, Cause, Donation, PlatformConfig, User};
use crate::twofactor;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub role: Option<String>,
}

#[derive(Serialize)]
pub struct UserResponse {
    #[serde(flatten)]
    pub user: User,
    pub two_factor: &'static str,
}

#[derive(Deserialize)]
pub struct CreateCauseRequest {
    pub actor_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub target_amount: i64,
    pub end_date: Option<i64>,
}

#[derive(Deserialize)]
pub struct ActorRequest {
    pub actor_id: i64,
}

#[derive(Serialize)]
pub struct CausesResponse {
    pub count: usize,
    pub causes: Vec<Cause>,
}

#[derive(Serialize)]
pub struct CauseDonationsResponse {
    pub cause_id: i64,
    pub count: usize,
    pub donations: Vec<Donation>,
}

#[derive(Deserialize)]
pub struct BatchDonationRequest {
    pub donor_id: i64,
    pub items: Vec<BatchItem>,
}

#[derive(Deserialize)]
pub struct BatchItem {
    pub cause_id: i64,
    pub amount: i64,
}

#[derive(Serialize)]
pub struct BatchDonationResponse {
    pub count: usize,
    pub receipts: Vec<DonationReceipt>,
}

#[derive(Deserialize)]
pub struct AdminAuditQuery {
    pub admin_id: i64,
    pub action: Option<String>,
    pub actor_id: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct AuditResponse {
    pub count: usize,
    pub entries: Vec<AuditEntry>,
}

#[derive(Deserialize)]
pub struct UpdateConfigRequest {
    pub admin_id: i64,
    pub min_donation_enabled: bool,
    pub min_donation_amount: i64,
}

#[derive(Deserialize)]
pub struct TwoFactorRequest {
    pub user_id: i64,
}

#[derive(Deserialize)]
pub struct TwoFactorCodeRequest {
    pub user_id: i64,
    pub code: String,
}

#[derive(Deserialize)]
pub struct TwoFactorDisableRequest {
    pub user_id: i64,
    pub password: String,
}

#[derive(Serialize)]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /users`
pub async fn create_user(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse> {
    if req.email.trim().is_empty() {
        return Err(ServerError::Validation("email must not be empty".to_string()));
    }
    let role = req.role.as_deref().unwrap_or("donor");
    if role != "donor" && role != "admin" {
        return Err(ServerError::Validation(format!("unknown role: {role}")));
    }

    let hash = twofactor::hash_password(&req.password)?;
    let user = db::create_user(&state.pool, req.email.trim(), &hash, role).await?;
    let two_factor = twofactor::state_of(&user);
    Ok((StatusCode::CREATED, Json(UserResponse { user, two_factor })))
}

/// `GET /users/:id`
pub async fn get_user(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let user = db::get_user(&state.pool, id).await?;
    let two_factor = twofactor::state_of(&user);
    Ok(Json(UserResponse { user, two_factor }))
}

/// `GET /causes`
pub async fn list_causes(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse> {
    let causes = db::list_causes(&state.pool).await?;
    let count = causes.len();
    Ok(Json(CausesResponse { count, causes }))
}

/// `GET /causes/:id`
pub async fn get_cause(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    Ok(Json(db::get_cause(&state.pool, id).await?))
}

/// `GET /causes/:id/donations`
pub async fn get_cause_donations(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    // 404 for unknown causes rather than an empty list.
    db::get_cause(&state.pool, id).await?;
    let donations = db::get_donations_for_cause(&state.pool, id).await?;
    let count = donations.len();
    Ok(Json(CauseDonationsResponse {
        cause_id: id,
        count,
        donations,
    }))
}

/// `POST /causes` — admin only.
pub async fn create_cause(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateCauseRequest>,
) -> Result<impl IntoResponse> {
    db::require_admin(&state.pool, req.actor_id).await?;
    let cause = db::create_cause(
        &state.pool,
        &req.title,
        &req.description,
        req.target_amount,
        req.end_date,
    )
    .await?;
    audit::append(
        &state.pool,
        Some(req.actor_id),
        "cause_created",
        Some("cause"),
        Some(cause.id),
        None,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(cause)))
}

/// `POST /causes/:id/archive` — admin only.
pub async fn archive_cause(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    Json(req): Json<ActorRequest>,
) -> Result<impl IntoResponse> {
    db::require_admin(&state.pool, req.actor_id).await?;
    let cause = db::archive_cause(&state.pool, id).await?;
    audit::append(
        &state.pool,
        Some(req.actor_id),
        "cause_archived",
        Some("cause"),
        Some(id),
        None,
    )
    .await?;
    Ok(Json(cause))
}

/// `POST /donations`
pub async fn create_donation(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<NewDonation>,
) -> Result<impl IntoResponse> {
    let receipt = donations::record_donation(&state.pool, &req).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// `POST /donations/batch`
pub async fn create_donation_batch(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<BatchDonationRequest>,
) -> Result<impl IntoResponse> {
    let items: Vec<(i64, i64)> = req.items.iter().map(|i| (i.cause_id, i.amount)).collect();
    let receipts = donations::record_donation_batch(&state.pool, req.donor_id, &items).await?;
    let count = receipts.len();
    Ok((
        StatusCode::CREATED,
        Json(BatchDonationResponse { count, receipts }),
    ))
}

/// `POST /admin/sweep` — run the cause-expiry sweep on demand.
pub async fn run_sweep(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ActorRequest>,
) -> Result<impl IntoResponse> {
    db::require_admin(&state.pool, req.actor_id).await?;
    let outcome = expiry::sweep(&state.pool, Utc::now().timestamp()).await?;
    Ok(Json(outcome))
}

/// `GET /admin/audit`
pub async fn list_audit(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AdminAuditQuery>,
) -> Result<impl IntoResponse> {
    db::require_admin(&state.pool, query.admin_id).await?;
    let filter = AuditQuery {
        action: query.action,
        actor_id: query.actor_id,
        limit: query.limit,
        offset: query.offset,
    };
    let entries = audit::list(&state.pool, &filter).await?;
    let count = entries.len();
    Ok(Json(AuditResponse { count, entries }))
}

/// `GET /admin/config`
pub async fn get_config(
    State(state): State<Arc<ApiState>>,
    Query(req): Query<AdminOnly>,
) -> Result<impl IntoResponse> {
    db::require_admin(&state.pool, req.admin_id).await?;
    let cfg: PlatformConfig = db::get_platform_config(&state.pool).await?;
    Ok(Json(cfg))
}

#[derive(Deserialize)]
pub struct AdminOnly {
    pub admin_id: i64,
}

/// `PUT /admin/config`
pub async fn update_config(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<UpdateConfigRequest>,
) -> Result<impl IntoResponse> {
    db::require_admin(&state.pool, req.admin_id).await?;
    db::set_platform_config(&state.pool, req.min_donation_enabled, req.min_donation_amount)
        .await?;
    audit::append(
        &state.pool,
        Some(req.admin_id),
        "platform_config_updated",
        None,
        None,
        Some(&serde_json::json!({
            "min_donation_enabled": req.min_donation_enabled,
            "min_donation_amount": req.min_donation_amount,
        })),
    )
    .await?;
    Ok(Json(db::get_platform_config(&state.pool).await?))
}

/// `POST /2fa/setup`
pub async fn two_factor_setup(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<TwoFactorRequest>,
) -> Result<impl IntoResponse> {
    let issued = twofactor::issue_secret(&state.pool, req.user_id).await?;
    Ok(Json(issued))
}

/// `POST /2fa/enable`
pub async fn two_factor_enable(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<TwoFactorCodeRequest>,
) -> Result<impl IntoResponse> {
    let backup_codes = twofactor::enable(&state.pool, req.user_id, &req.code).await?;
    Ok(Json(BackupCodesResponse { backup_codes }))
}

/// `POST /2fa/verify`
pub async fn two_factor_verify(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<TwoFactorCodeRequest>,
) -> Result<impl IntoResponse> {
    let valid = twofactor::verify(&state.pool, req.user_id, &req.code).await?;
    Ok(Json(VerifyResponse { valid }))
}

/// `POST /2fa/disable`
pub async fn two_factor_disable(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<TwoFactorDisableRequest>,
) -> Result<impl IntoResponse> {
    twofactor::disable(&state.pool, req.user_id, &req.password).await?;
    Ok(StatusCode::NO_CONTENT)
}
