//! CLI command implementations.
//!
//! Every command body is a [`CommandHandler`] registered through the hook
//! pipeline under a dotted name, so hookline's own commands can be hooked
//! like any other:
//!
//! | Module   | Commands handled                                            |
//! |----------|-------------------------------------------------------------|
//! | `hook`   | `hook.list`, `hook.create`, `hook.test`, `hook.run`         |
//! | `plugin` | `plugin.list`, `plugin.info`, `plugin.health`, `plugin.run` |
//! | `config` | `config.show`, `config.validate`                            |
//!
//! Plugin commands run as `<plugin>.<command>` inside `plugin.run`.

pub mod config;
pub mod hook;
pub mod plugin;

pub use config::cmd_config;
pub use hook::cmd_hook;
pub use plugin::cmd_plugin;

use hookline::audit::HookAuditLog;
use hookline::config::HostConfig;
use hookline::hooks::{
    CommandHandler, CommandInput, CommandOutput, CommandPipeline, HookRegistry,
    discover_user_hooks,
};
use hookline::plugin::{InstalledPlugin, LifecycleEvent, PluginInvoker, broadcast, discover_plugins};
use serde_json::Value;
use std::sync::Arc;

/// Everything loaded at startup, shared by all commands.
pub struct Host {
    pub config: HostConfig,
    pub plugins: Vec<InstalledPlugin>,
    /// Problems found while loading hooks and plugins
    pub diagnostics: Vec<String>,
    pub pipeline: CommandPipeline,
}

impl Host {
    /// Discover hooks and plugins and build the registry.
    pub fn start(config: HostConfig) -> Self {
        let mut diagnostics = Vec::new();

        let (user_hooks, user_diagnostics) = discover_user_hooks(&config);
        diagnostics.extend(user_diagnostics);

        let discovery = discover_plugins(&config.paths.plugins_dir(), config.disabled_plugins());
        diagnostics.extend(discovery.diagnostics);

        let mut plugin_hooks = Vec::new();
        for plugin in &discovery.plugins {
            let (hooks, plugin_diagnostics) = plugin.hook_descriptors();
            plugin_hooks.extend(hooks);
            diagnostics.extend(plugin_diagnostics);
        }

        let build = HookRegistry::build(user_hooks, plugin_hooks);
        diagnostics.extend(build.diagnostics);

        let mut invoker = PluginInvoker::new(config.paths.clone());
        if config.audit_enabled() {
            invoker = invoker.with_audit(Arc::new(HookAuditLog::new(config.paths.audit_file())));
        }
        let pipeline = CommandPipeline::new(Arc::new(build.registry), Arc::new(invoker));

        tracing::debug!(
            hooks = pipeline.registry().len(),
            plugins = discovery.plugins.len(),
            "host started"
        );

        Self {
            config,
            plugins: discovery.plugins,
            diagnostics,
            pipeline,
        }
    }

    /// Tell every plugin the host is up.
    pub fn announce_init(&self) {
        broadcast(self.pipeline.notifier(), &self.plugins, LifecycleEvent::Init);
    }

    /// Send `shutdown` and wait for in-flight notify tasks.
    pub async fn shutdown(&self) {
        broadcast(self.pipeline.notifier(), &self.plugins, LifecycleEvent::Shutdown);
        self.pipeline
            .notifier()
            .drain(self.config.notify_drain_grace())
            .await;
    }

    /// Wrap `handler` as `name` and run it once.
    pub async fn run<H: CommandHandler>(
        &self,
        name: &str,
        handler: H,
        input: CommandInput,
    ) -> anyhow::Result<CommandOutput> {
        self.pipeline.wrap(name, handler).call(input).await
    }
}

/// Print a command's output: strings verbatim, anything else as JSON.
pub fn print_output(output: &CommandOutput) {
    match &output.value {
        Value::Null => {}
        Value::String(text) => println!("{}", text.trim_end()),
        other => match serde_json::to_string_pretty(other) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", other),
        },
    }

    for warning in &output.warnings {
        eprintln!("{} {}", console::style("warning:").yellow().bold(), warning);
    }
}

/// Positional argument `index`, or a usage error naming it.
pub(crate) fn required_arg<'a>(input: &'a CommandInput, index: usize, name: &str) -> anyhow::Result<&'a str> {
    input
        .args
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing required argument <{}>", name))
}
