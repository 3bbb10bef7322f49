use std::collections::HashSet;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::db;
use crate::errors::ServerError;
use crate::twofactor;

const PASSWORD: &str = "correct horse battery staple";

async fn setup() -> (SqlitePool, i64) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let hash = twofactor::hash_password(PASSWORD).unwrap();
    let user = db::create_user(&pool, "alice@example.com", &hash, "donor")
        .await
        .unwrap();
    (pool, user.id)
}

/// Build an authenticator-side TOTP from the issued base32 secret.
fn authenticator(secret: &str) -> TOTP {
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        Secret::Encoded(secret.to_string()).to_bytes().unwrap(),
        Some("microdonate".to_string()),
        "alice@example.com".to_string(),
    )
    .unwrap()
}

async fn enroll(pool: &SqlitePool, user_id: i64) -> Vec<String> {
    let issued = twofactor::issue_secret(pool, user_id).await.unwrap();
    let code = authenticator(&issued.secret).generate_current().unwrap();
    twofactor::enable(pool, user_id, &code).await.unwrap()
}

#[tokio::test]
async fn test_state_machine_walks_disabled_to_enabled() {
    let (pool, user_id) = setup().await;

    let user = db::get_user(&pool, user_id).await.unwrap();
    assert_eq!(twofactor::state_of(&user), "disabled");

    let issued = twofactor::issue_secret(&pool, user_id).await.unwrap();
    assert!(issued.otpauth_url.starts_with("otpauth://totp/"));
    let user = db::get_user(&pool, user_id).await.unwrap();
    assert_eq!(twofactor::state_of(&user), "secret-issued");

    let code = authenticator(&issued.secret).generate_current().unwrap();
    twofactor::enable(&pool, user_id, &code).await.unwrap();
    let user = db::get_user(&pool, user_id).await.unwrap();
    assert_eq!(twofactor::state_of(&user), "enabled");
}

#[tokio::test]
async fn test_issue_secret_rejected_once_enabled() {
    let (pool, user_id) = setup().await;
    enroll(&pool, user_id).await;

    let err = twofactor::issue_secret(&pool, user_id).await.unwrap_err();
    assert!(matches!(err, ServerError::Validation(_)));
}

#[tokio::test]
async fn test_reissue_replaces_pending_secret() {
    let (pool, user_id) = setup().await;

    let first = twofactor::issue_secret(&pool, user_id).await.unwrap();
    let second = twofactor::issue_secret(&pool, user_id).await.unwrap();
    assert_ne!(first.secret, second.secret);

    // Only the latest secret enables.
    let stale = authenticator(&first.secret).generate_current().unwrap();
    let fresh = authenticator(&second.secret).generate_current().unwrap();
    if stale != fresh {
        let err = twofactor::enable(&pool, user_id, &stale).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }
    twofactor::enable(&pool, user_id, &fresh).await.unwrap();
}

#[tokio::test]
async fn test_enable_without_issued_secret_is_rejected() {
    let (pool, user_id) = setup().await;

    let err = twofactor::enable(&pool, user_id, "123456").await.unwrap_err();
    assert!(matches!(err, ServerError::Validation(_)));
}

#[tokio::test]
async fn test_enable_with_wrong_code_is_rejected() {
    let (pool, user_id) = setup().await;
    twofactor::issue_secret(&pool, user_id).await.unwrap();

    // Wrong length can never match a 6-digit TOTP.
    let err = twofactor::enable(&pool, user_id, "not-a-code").await.unwrap_err();
    assert!(matches!(err, ServerError::Validation(_)));

    let user = db::get_user(&pool, user_id).await.unwrap();
    assert_eq!(twofactor::state_of(&user), "secret-issued");
}

#[tokio::test]
async fn test_backup_codes_are_ten_and_pairwise_unique() {
    let (pool, user_id) = setup().await;
    let codes = enroll(&pool, user_id).await;

    assert_eq!(codes.len(), 10);
    let unique: HashSet<&String> = codes.iter().collect();
    assert_eq!(unique.len(), 10);
    for code in &codes {
        assert_eq!(code.len(), 8);
    }
}

#[tokio::test]
async fn test_verify_accepts_current_totp_code() {
    let (pool, user_id) = setup().await;
    let issued = twofactor::issue_secret(&pool, user_id).await.unwrap();
    let totp = authenticator(&issued.secret);
    let code = totp.generate_current().unwrap();
    twofactor::enable(&pool, user_id, &code).await.unwrap();

    let valid = twofactor::verify(&pool, user_id, &totp.generate_current().unwrap())
        .await
        .unwrap();
    assert!(valid);
}

#[tokio::test]
async fn test_backup_code_is_single_use_and_case_insensitive() {
    let (pool, user_id) = setup().await;
    let codes = enroll(&pool, user_id).await;
    let code = codes[0].to_lowercase();

    assert!(twofactor::verify(&pool, user_id, &code).await.unwrap());
    // Reuse is rejected.
    assert!(!twofactor::verify(&pool, user_id, &code).await.unwrap());
    // The other nine codes are unaffected.
    assert!(twofactor::verify(&pool, user_id, &codes[1]).await.unwrap());
}

#[tokio::test]
async fn test_verify_rejects_unknown_code() {
    let (pool, user_id) = setup().await;
    enroll(&pool, user_id).await;

    assert!(!twofactor::verify(&pool, user_id, "ZZZZZZZZ").await.unwrap());
}

#[tokio::test]
async fn test_verify_requires_enabled_state() {
    let (pool, user_id) = setup().await;

    let err = twofactor::verify(&pool, user_id, "123456").await.unwrap_err();
    assert!(matches!(err, ServerError::Validation(_)));
}

#[tokio::test]
async fn test_disable_requires_correct_password() {
    let (pool, user_id) = setup().await;
    enroll(&pool, user_id).await;

    let err = twofactor::disable(&pool, user_id, "wrong password").await.unwrap_err();
    assert!(matches!(err, ServerError::Unauthorized(_)));

    let user = db::get_user(&pool, user_id).await.unwrap();
    assert_eq!(twofactor::state_of(&user), "enabled");
}

#[tokio::test]
async fn test_disable_clears_secret_and_backup_codes() {
    let (pool, user_id) = setup().await;
    enroll(&pool, user_id).await;

    twofactor::disable(&pool, user_id, PASSWORD).await.unwrap();

    let user = db::get_user(&pool, user_id).await.unwrap();
    assert_eq!(twofactor::state_of(&user), "disabled");
    assert!(user.totp_secret.is_none());

    let (remaining,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM backup_codes WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(remaining, 0);

    let err = twofactor::verify(&pool, user_id, "123456").await.unwrap_err();
    assert!(matches!(err, ServerError::Validation(_)));
}

#[tokio::test]
async fn test_password_hash_roundtrip() {
    let hash = twofactor::hash_password(PASSWORD).unwrap();
    assert_ne!(hash, PASSWORD);
    assert!(twofactor::verify_password(PASSWORD, &hash).unwrap());
    assert!(!twofactor::verify_password("nope", &hash).unwrap());
}

#[tokio::test]
async fn test_user_serialization_redacts_secrets() {
    let (pool, user_id) = setup().await;
    enroll(&pool, user_id).await;

    let user = db::get_user(&pool, user_id).await.unwrap();
    let json = serde_json::to_value(&user).unwrap();
    assert!(json.get("password_hash").is_none());
    assert!(json.get("totp_secret").is_none());
    assert_eq!(json["email"], "alice@example.com");
}
