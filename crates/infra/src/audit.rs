//! Audit sinks: detached dispatch in front of a pluggable writer.

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;

use gatehouse_auth::{AuditEvent, AuditSink};

use crate::store::postgres::map_sqlx_error;

#[derive(Debug, Error)]
#[error("audit write failed: {0}")]
pub struct AuditWriteError(pub String);

/// Durable destination for audit events.
#[async_trait::async_trait]
pub trait AuditWriter: Send + Sync + 'static {
    async fn write(&self, event: &AuditEvent) -> Result<(), AuditWriteError>;
}

/// Hands each event to a detached tokio task; the caller never waits and
/// never sees a failure. Failures are logged.
///
/// Must be used from inside a tokio runtime.
#[derive(Debug)]
pub struct SpawnedAuditSink<W> {
    writer: Arc<W>,
}

impl<W: AuditWriter> SpawnedAuditSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(writer),
        }
    }
}

impl<W: AuditWriter> AuditSink for SpawnedAuditSink<W> {
    fn record(&self, event: AuditEvent) {
        let writer = self.writer.clone();
        tokio::spawn(async move {
            if let Err(e) = writer.write(&event).await {
                tracing::warn!(
                    error = %e,
                    action = %event.action,
                    target_id = %event.target_id,
                    "failed to write audit event"
                );
            }
        });
    }
}

/// Emits one structured log line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditWriter;

#[async_trait::async_trait]
impl AuditWriter for TracingAuditWriter {
    async fn write(&self, event: &AuditEvent) -> Result<(), AuditWriteError> {
        tracing::info!(
            target: "gatehouse::audit",
            actor_id = %event.actor_id,
            target_id = %event.target_id,
            target_collection = %event.target_collection,
            action = %event.action,
            occurred_at = %event.occurred_at,
            "audit"
        );
        Ok(())
    }
}

/// Appends to the `activities` table.
#[derive(Debug, Clone)]
pub struct PostgresAuditWriter {
    pool: Arc<PgPool>,
}

impl PostgresAuditWriter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl AuditWriter for PostgresAuditWriter {
    async fn write(&self, event: &AuditEvent) -> Result<(), AuditWriteError> {
        sqlx::query(
            r#"
            INSERT INTO activities
                (actor_id, target_id, target_collection, action, previous_state, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.actor_id.as_uuid())
        .bind(event.target_id)
        .bind(&event.target_collection)
        .bind(event.action.as_str())
        .bind(&event.previous_state)
        .bind(event.occurred_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| AuditWriteError(map_sqlx_error("insert_activity", e).to_string()))?;
        Ok(())
    }
}
