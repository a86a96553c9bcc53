//! Plugin commands: `hookline plugin`.

use anyhow::Result;
use async_trait::async_trait;
use hookline::hooks::{CommandHandler, CommandInput, CommandOutput};
use hookline::plugin::manifest::permission_summary;
use hookline::plugin::protocol::is_compatible;
use hookline::plugin::{HealthReport, InstalledPlugin, discover_plugins, health};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::super::PluginCommands;
use super::{Host, required_arg};

pub async fn cmd_plugin(host: &Host, command: &PluginCommands) -> Result<CommandOutput> {
    match command {
        PluginCommands::List => {
            host.run("plugin.list", ListPlugins { host }, CommandInput::default())
                .await
        }
        PluginCommands::Info { name } => {
            let input = CommandInput::new(vec![name.clone()], BTreeMap::new());
            host.run("plugin.info", ShowPluginInfo { host }, input).await
        }
        PluginCommands::Health { name } => {
            let input = CommandInput::new(name.iter().cloned().collect(), BTreeMap::new());
            host.run("plugin.health", CheckHealth { host }, input).await
        }
        PluginCommands::Run {
            plugin,
            command,
            args,
            flags,
        } => {
            let mut positional = vec![plugin.clone(), command.clone()];
            positional.extend(args.iter().cloned());
            let input = CommandInput::new(positional, flags.iter().cloned().collect());
            host.run("plugin.run", RunPluginCommand { host }, input).await
        }
    }
}

fn find_plugin<'a>(host: &'a Host, name: &str) -> Result<&'a InstalledPlugin> {
    host.plugins
        .iter()
        .find(|p| p.name() == name)
        .ok_or_else(|| anyhow::anyhow!("plugin '{}' is not installed", name))
}

struct ListPlugins<'a> {
    host: &'a Host,
}

#[async_trait]
impl<'a> CommandHandler for ListPlugins<'a> {
    async fn call(&self, _input: CommandInput) -> Result<CommandOutput> {
        let mut out = String::new();

        if self.host.plugins.is_empty() {
            writeln!(
                out,
                "No plugins installed in {}",
                self.host.config.paths.plugins_dir().display()
            )?;
        }

        for plugin in &self.host.plugins {
            let meta = &plugin.manifest.plugin;
            writeln!(out, "{} {}", console::style(&meta.name).bold(), meta.version)?;
            if !meta.description.is_empty() {
                writeln!(out, "  {}", meta.description)?;
            }
            if !meta.author.is_empty() {
                writeln!(out, "  Author: {}", meta.author)?;
            }
            let compatibility = if is_compatible(&meta.protocol_version) {
                "compatible"
            } else {
                "incompatible, hooks disabled"
            };
            writeln!(out, "  Protocol: {} ({})", meta.protocol_version, compatibility)?;
            writeln!(out, "  Executable: {}", plugin.executable().display())?;

            for hook in &plugin.manifest.hooks {
                writeln!(out, "  Hook: {} {} ({})", hook.command, hook.stage, hook.mode)?;
            }
            for command in &plugin.manifest.commands {
                writeln!(out, "  Command: {}", command.name)?;
            }
            for line in permission_summary(&plugin.manifest.permissions) {
                writeln!(out, "  {}", line)?;
            }
            writeln!(out)?;
        }

        if !self.host.diagnostics.is_empty() {
            writeln!(out, "Diagnostics:")?;
            for diagnostic in &self.host.diagnostics {
                writeln!(out, "  - {}", diagnostic)?;
            }
        }

        Ok(CommandOutput::new(Value::String(out)))
    }
}

struct CheckHealth<'a> {
    host: &'a Host,
}

#[async_trait]
impl<'a> CommandHandler for CheckHealth<'a> {
    async fn call(&self, input: CommandInput) -> Result<CommandOutput> {
        let selected: Vec<_> = match input.args.first() {
            Some(name) => vec![find_plugin(self.host, name)?],
            None => self.host.plugins.iter().collect(),
        };

        if selected.is_empty() {
            return Ok(CommandOutput::new(Value::String(
                "No plugins installed.".to_string(),
            )));
        }

        let invoker = self.host.pipeline.invoker();
        let mut reports = Vec::with_capacity(selected.len());
        for plugin in selected {
            reports.push(health(invoker, plugin).await);
        }

        let text = render_reports(&reports)?;
        let unhealthy = reports.iter().filter(|r| !r.healthy).count();
        if unhealthy > 0 {
            anyhow::bail!("{}{} plugin(s) unhealthy", text, unhealthy);
        }
        Ok(CommandOutput::new(Value::String(text)))
    }
}

/// Detailed manifest view. Plugins disabled in config are shown too.
struct ShowPluginInfo<'a> {
    host: &'a Host,
}

#[async_trait]
impl<'a> CommandHandler for ShowPluginInfo<'a> {
    async fn call(&self, input: CommandInput) -> Result<CommandOutput> {
        let name = required_arg(&input, 0, "name")?;
        let enabled = self.host.plugins.iter().any(|p| p.name() == name);
        let plugin = discover_plugins(&self.host.config.paths.plugins_dir(), &[])
            .plugins
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| anyhow::anyhow!("plugin '{}' is not installed", name))?;

        let meta = &plugin.manifest.plugin;
        let mut out = String::new();
        writeln!(out, "{}", console::style(&meta.name).bold())?;
        writeln!(out)?;
        writeln!(out, "  Version:     {}", meta.version)?;
        if !meta.author.is_empty() {
            writeln!(out, "  Author:      {}", meta.author)?;
        }
        if !meta.description.is_empty() {
            writeln!(out, "  Description: {}", meta.description)?;
        }
        writeln!(out, "  Protocol:    {}", meta.protocol_version)?;
        writeln!(out, "  Directory:   {}", plugin.dir.display())?;
        writeln!(out, "  Executable:  {}", plugin.executable().display())?;
        writeln!(out, "  Enabled:     {}", if enabled { "yes" } else { "no" })?;

        if !plugin.manifest.hooks.is_empty() {
            writeln!(out)?;
            writeln!(out, "  Hooks")?;
            for hook in &plugin.manifest.hooks {
                let timeout = hook.timeout.as_deref().unwrap_or("default");
                writeln!(
                    out,
                    "    {:<20} {:<12} {:<10} timeout {}",
                    hook.command, hook.stage, hook.mode, timeout
                )?;
            }
        }

        if !plugin.manifest.commands.is_empty() {
            writeln!(out)?;
            writeln!(out, "  Commands")?;
            for command in &plugin.manifest.commands {
                let usage = format!(
                    "hookline plugin run {} {} {}",
                    meta.name, command.name, command.args
                );
                writeln!(out, "    {}  {}", usage.trim_end(), command.description)?;
            }
        }

        writeln!(out)?;
        writeln!(out, "  Permissions")?;
        for line in permission_summary(&plugin.manifest.permissions) {
            writeln!(out, "    {}", line)?;
        }

        Ok(CommandOutput::new(Value::String(out)))
    }
}

/// Resolves the plugin and command, then runs the command through the
/// pipeline as `<plugin>.<command>` so hooks can target it.
struct RunPluginCommand<'a> {
    host: &'a Host,
}

#[async_trait]
impl<'a> CommandHandler for RunPluginCommand<'a> {
    async fn call(&self, input: CommandInput) -> Result<CommandOutput> {
        let plugin = find_plugin(self.host, required_arg(&input, 0, "plugin")?)?;
        let command = required_arg(&input, 1, "command")?;
        if plugin.manifest.command(command).is_none() {
            let available: Vec<&str> = plugin
                .manifest
                .commands
                .iter()
                .map(|c| c.name.as_str())
                .collect();
            anyhow::bail!(
                "plugin '{}' has no command '{}' (available: {})",
                plugin.name(),
                command,
                if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                }
            );
        }

        let inner = CommandInput::new(input.args[2..].to_vec(), input.flags.clone());
        let body = PluginCommandBody {
            host: self.host,
            plugin,
            command,
        };
        self.host.run(&plugin.command_name(command), body, inner).await
    }
}

struct PluginCommandBody<'a> {
    host: &'a Host,
    plugin: &'a InstalledPlugin,
    command: &'a str,
}

#[async_trait]
impl<'a> CommandHandler for PluginCommandBody<'a> {
    async fn call(&self, input: CommandInput) -> Result<CommandOutput> {
        self.host
            .pipeline
            .invoker()
            .run_command(self.plugin, self.command, input.args, input.flags)
            .await?;
        Ok(CommandOutput::new(Value::Null))
    }
}

fn render_reports(reports: &[HealthReport]) -> Result<String> {
    let mut out = String::new();
    for report in reports {
        if report.healthy {
            writeln!(
                out,
                "{} {} ({}ms)",
                console::style("ok").green(),
                report.plugin,
                report.elapsed.as_millis()
            )?;
        } else {
            writeln!(
                out,
                "{} {}: {}",
                console::style("unhealthy").red(),
                report.plugin,
                report.reason.as_deref().unwrap_or("unknown")
            )?;
        }
    }
    Ok(out)
}
