//! Append-only audit trail.
//!
//! Application code only ever inserts and reads here — there is deliberately
//! no update or delete path.

use serde::Deserialize;
use sqlx::{Sqlite, SqlitePool};

use crate::errors::Result;
use crate::models::AuditEntry;

/// Append one audit record.
///
/// Generic over the executor so callers inside an open transaction (the
/// donation path) commit their audit row atomically with the rest of the
/// write, while standalone callers pass the pool directly.
pub async fn append<'e, E>(
    executor: E,
    actor_id: Option<i64>,
    action: &str,
    entity_type: Option<&str>,
    entity_id: Option<i64>,
    details: Option<&serde_json::Value>,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO audit_logs (actor_id, action, entity_type, entity_id, details)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(actor_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(details.map(|d| d.to_string()))
    .execute(executor)
    .await?;
    Ok(())
}

/// Filter parameters for the admin audit-log listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub actor_id: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Fetch audit records, newest first.
pub async fn list(pool: &SqlitePool, query: &AuditQuery) -> Result<Vec<AuditEntry>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let offset = query.offset.unwrap_or(0).max(0);

    let rows = sqlx::query_as::<_, AuditEntry>(
        r#"
        SELECT id, actor_id, action, entity_type, entity_id, details, created_at
        FROM   audit_logs
        WHERE  (?1 IS NULL OR action = ?1)
          AND  (?2 IS NULL OR actor_id = ?2)
        ORDER  BY created_at DESC, id DESC
        LIMIT  ?3 OFFSET ?4
        "#,
    )
    .bind(&query.action)
    .bind(query.actor_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
