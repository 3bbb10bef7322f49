use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::db;
use crate::expiry;
use crate::models::CauseStatus;

async fn setup() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

async fn cause_with(pool: &SqlitePool, title: &str, end_date: Option<i64>) -> i64 {
    db::create_cause(pool, title, "", 1_000, end_date)
        .await
        .unwrap()
        .id
}

async fn status_of(pool: &SqlitePool, id: i64) -> String {
    db::get_cause(pool, id).await.unwrap().status
}

#[tokio::test]
async fn test_expired_active_cause_transitions_to_completed() {
    let pool = setup().await;
    let now = Utc::now().timestamp();
    let expired = cause_with(&pool, "Yesterday's drive", Some(now - 86_400)).await;

    let outcome = expiry::sweep(&pool, now).await.unwrap();
    assert_eq!(outcome.matched, 1);
    assert_eq!(outcome.modified, 1);
    assert_eq!(status_of(&pool, expired).await, CauseStatus::Completed.as_str());
}

#[tokio::test]
async fn test_future_and_open_ended_causes_are_untouched() {
    let pool = setup().await;
    let now = Utc::now().timestamp();
    let future = cause_with(&pool, "Next month", Some(now + 86_400)).await;
    let open_ended = cause_with(&pool, "Evergreen fund", None).await;

    let outcome = expiry::sweep(&pool, now).await.unwrap();
    assert_eq!(outcome.matched, 0);
    assert_eq!(outcome.modified, 0);
    assert_eq!(status_of(&pool, future).await, CauseStatus::Active.as_str());
    assert_eq!(status_of(&pool, open_ended).await, CauseStatus::Active.as_str());
}

#[tokio::test]
async fn test_non_active_causes_are_never_touched() {
    let pool = setup().await;
    let now = Utc::now().timestamp();
    let archived = cause_with(&pool, "Old drive", Some(now - 86_400)).await;
    db::archive_cause(&pool, archived).await.unwrap();

    let done = cause_with(&pool, "Done drive", Some(now - 86_400)).await;
    sqlx::query("UPDATE causes SET status = 'completed' WHERE id = ?1")
        .bind(done)
        .execute(&pool)
        .await
        .unwrap();

    let outcome = expiry::sweep(&pool, now).await.unwrap();
    assert_eq!(outcome.matched, 0);
    assert_eq!(outcome.modified, 0);
    assert_eq!(status_of(&pool, archived).await, CauseStatus::Archived.as_str());
    assert_eq!(status_of(&pool, done).await, CauseStatus::Completed.as_str());
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let pool = setup().await;
    let now = Utc::now().timestamp();
    cause_with(&pool, "Yesterday's drive", Some(now - 10)).await;

    let first = expiry::sweep(&pool, now).await.unwrap();
    assert_eq!(first.modified, 1);

    let second = expiry::sweep(&pool, now).await.unwrap();
    assert_eq!(second.matched, 0);
    assert_eq!(second.modified, 0);
}

#[tokio::test]
async fn test_sweep_transitions_all_expired_in_one_pass() {
    let pool = setup().await;
    let now = Utc::now().timestamp();
    for i in 0..5 {
        cause_with(&pool, &format!("Drive {i}"), Some(now - 1 - i)).await;
    }
    cause_with(&pool, "Still open", Some(now + 3600)).await;

    let outcome = expiry::sweep(&pool, now).await.unwrap();
    assert_eq!(outcome.matched, 5);
    assert_eq!(outcome.modified, 5);
}

#[tokio::test]
async fn test_sweep_logs_an_audit_entry_only_when_it_modifies() {
    let pool = setup().await;
    let now = Utc::now().timestamp();

    expiry::sweep(&pool, now).await.unwrap();
    let (none,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM audit_logs WHERE action = 'causes_expired'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(none, 0);

    cause_with(&pool, "Yesterday's drive", Some(now - 10)).await;
    expiry::sweep(&pool, now).await.unwrap();
    let (one,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM audit_logs WHERE action = 'causes_expired'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(one, 1);
}
