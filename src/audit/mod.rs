//! Append-only audit trail of hook and lifecycle invocations.

mod logger;

pub use logger::HookAuditLog;

use crate::errors::HookError;
use crate::hooks::types::{Context, HookDescriptor};
use crate::plugin::protocol::LifecycleEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Outcome label for a successful invocation.
pub const OUTCOME_OK: &str = "ok";

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub invocation_id: Uuid,
    pub hook: String,
    /// `user` or `plugin:<name>`
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// `ok` or the error class
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl AuditEntry {
    /// Record a pipeline hook invocation.
    pub fn hook<T>(
        hook: &HookDescriptor,
        context: &Context,
        result: &Result<T, HookError>,
        elapsed: Duration,
    ) -> Self {
        let (outcome, message) = outcome_of(result);
        Self {
            timestamp: Utc::now(),
            invocation_id: Uuid::new_v4(),
            hook: hook.name.clone(),
            source: hook.source.to_string(),
            command: Some(context.command.clone()),
            stage: Some(hook.stage.to_string()),
            event: None,
            outcome,
            message,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    /// Record a lifecycle event sent to a plugin.
    pub fn lifecycle<T>(
        plugin: &str,
        event: LifecycleEvent,
        result: &Result<T, HookError>,
        elapsed: Duration,
    ) -> Self {
        let (outcome, message) = outcome_of(result);
        Self {
            timestamp: Utc::now(),
            invocation_id: Uuid::new_v4(),
            hook: plugin.to_string(),
            source: format!("plugin:{}", plugin),
            command: None,
            stage: None,
            event: Some(event.to_string()),
            outcome,
            message,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    /// Record a plugin's custom command.
    pub fn plugin_command<T>(
        plugin: &str,
        command: &str,
        result: &Result<T, HookError>,
        elapsed: Duration,
    ) -> Self {
        let (outcome, message) = outcome_of(result);
        Self {
            timestamp: Utc::now(),
            invocation_id: Uuid::new_v4(),
            hook: plugin.to_string(),
            source: format!("plugin:{}", plugin),
            command: Some(format!("{}.{}", plugin, command)),
            stage: None,
            event: None,
            outcome,
            message,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == OUTCOME_OK
    }
}

fn outcome_of<T>(result: &Result<T, HookError>) -> (String, Option<String>) {
    match result {
        Ok(_) => (OUTCOME_OK.to_string(), None),
        Err(e) => (e.class().to_string(), Some(e.to_string())),
    }
}
