//! Plugin lifecycle events: `init`, `shutdown` and `health`.

use crate::errors::HookError;
use crate::hooks::pipeline::NotifyDispatcher;
use crate::plugin::invoker::{LifecycleReply, PluginInvoker};
use crate::plugin::manifest::InstalledPlugin;
use crate::plugin::protocol::{LifecycleEvent, PROTOCOL_VERSION, is_compatible};
use std::time::{Duration, Instant};

/// Deadline for each lifecycle invocation.
pub const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a health check.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub plugin: String,
    pub healthy: bool,
    /// Why the plugin is unhealthy
    pub reason: Option<String>,
    pub elapsed: Duration,
}

/// Send `event` to every compatible plugin without waiting for replies.
pub fn broadcast(dispatcher: &NotifyDispatcher, plugins: &[InstalledPlugin], event: LifecycleEvent) {
    for plugin in plugins {
        if !is_compatible(&plugin.manifest.plugin.protocol_version) {
            tracing::debug!(plugin = %plugin.name(), event = %event, "skipping incompatible plugin");
            continue;
        }
        dispatcher.dispatch_lifecycle(plugin, event, LIFECYCLE_TIMEOUT);
    }
}

/// Probe a plugin. Never fails; every problem becomes an unhealthy report.
pub async fn health(invoker: &PluginInvoker, plugin: &InstalledPlugin) -> HealthReport {
    let started = Instant::now();
    let declared = &plugin.manifest.plugin.protocol_version;

    let outcome = if is_compatible(declared) {
        invoker
            .invoke_lifecycle(plugin, LifecycleEvent::Health, LIFECYCLE_TIMEOUT)
            .await
    } else {
        Err(HookError::ProtocolMismatch {
            plugin: plugin.name().to_string(),
            declared: declared.clone(),
            supported: PROTOCOL_VERSION.to_string(),
        })
    };

    let reason = match outcome {
        Ok(LifecycleReply::Acknowledged) => None,
        Ok(LifecycleReply::Silent) => Some("no response to health check".to_string()),
        Err(e) => Some(e.to_string()),
    };

    HealthReport {
        plugin: plugin.name().to_string(),
        healthy: reason.is_none(),
        reason,
        elapsed: started.elapsed(),
    }
}
