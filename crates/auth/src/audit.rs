//! Audit trail of security-relevant mutations.
//!
//! Recording is fire-and-forget: a sink must return immediately and never
//! report failure to the caller.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use gatehouse_core::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    MoveToTrash,
    Restore,
    Login,
    Logout,
    Grant,
    Revoke,
    UpdatePassword,
    ResetPassword,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::MoveToTrash => "move-to-trash",
            Self::Restore => "restore",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Grant => "grant",
            Self::Revoke => "revoke",
            Self::UpdatePassword => "update-password",
            Self::ResetPassword => "reset-password",
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Nil for anonymous actors (e.g. self-registration).
    pub actor_id: UserId,
    pub target_id: Uuid,
    pub target_collection: String,
    pub action: AuditAction,
    pub previous_state: Option<JsonValue>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        actor_id: UserId,
        target_collection: impl Into<String>,
        target_id: impl Into<Uuid>,
        action: AuditAction,
    ) -> Self {
        Self {
            actor_id,
            target_id: target_id.into(),
            target_collection: target_collection.into(),
            action,
            previous_state: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_previous_state(mut self, state: JsonValue) -> Self {
        self.previous_state = Some(state);
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn record(&self, event: AuditEvent) {
        (**self).record(event)
    }
}

/// Keeps every recorded event in memory. Tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.events().into_iter().map(|e| e.action).collect()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
