//! Configuration view and validation commands: `hookline config`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hookline::hooks::{CommandHandler, CommandInput, CommandOutput};
use serde_json::Value;
use std::fmt::Write as _;

use super::super::ConfigCommands;
use super::Host;

pub async fn cmd_config(host: &Host, command: Option<&ConfigCommands>) -> Result<CommandOutput> {
    match command {
        None | Some(ConfigCommands::Show) => {
            host.run("config.show", ShowConfig { host }, CommandInput::default())
                .await
        }
        Some(ConfigCommands::Validate) => {
            host.run(
                "config.validate",
                ValidateConfig { host },
                CommandInput::default(),
            )
            .await
        }
    }
}

struct ShowConfig<'a> {
    host: &'a Host,
}

#[async_trait]
impl<'a> CommandHandler for ShowConfig<'a> {
    async fn call(&self, _input: CommandInput) -> Result<CommandOutput> {
        let config = &self.host.config;
        let paths = &config.paths;
        let mut out = String::new();

        writeln!(out, "hookline configuration")?;
        writeln!(out, "======================")?;
        writeln!(out)?;
        writeln!(out, "Config dir:  {}", paths.config_dir.display())?;
        writeln!(out, "Data dir:    {}", paths.data_dir.display())?;
        writeln!(out, "Hooks dir:   {}", paths.hooks_dir().display())?;
        writeln!(out, "Plugins dir: {}", paths.plugins_dir().display())?;
        writeln!(out, "Audit log:   {}", paths.audit_file().display())?;
        writeln!(out)?;

        if paths.config_file().exists() {
            writeln!(out, "Config file: {}", paths.config_file().display())?;
        } else {
            writeln!(
                out,
                "No {} found; using defaults.",
                paths.config_file().display()
            )?;
        }
        writeln!(out)?;

        let rendered =
            toml::to_string_pretty(&config.toml).context("Failed to render configuration")?;
        writeln!(out, "{}", rendered.trim_end())?;
        writeln!(out)?;
        writeln!(
            out,
            "Effective notify drain grace: {}ms",
            config.notify_drain_grace().as_millis()
        )?;

        Ok(CommandOutput::new(Value::String(out)))
    }
}

struct ValidateConfig<'a> {
    host: &'a Host,
}

#[async_trait]
impl<'a> CommandHandler for ValidateConfig<'a> {
    async fn call(&self, _input: CommandInput) -> Result<CommandOutput> {
        let mut out = String::new();
        let warnings = self.host.config.validate();

        if warnings.is_empty() && self.host.diagnostics.is_empty() {
            writeln!(out, "Configuration is valid.")?;
        } else {
            if !warnings.is_empty() {
                writeln!(out, "Configuration warnings:")?;
                for warning in &warnings {
                    writeln!(out, "  - {}", warning)?;
                }
            }
            if !self.host.diagnostics.is_empty() {
                writeln!(out, "Hook and plugin diagnostics:")?;
                for diagnostic in &self.host.diagnostics {
                    writeln!(out, "  - {}", diagnostic)?;
                }
            }
        }

        Ok(CommandOutput::new(Value::String(out)))
    }
}
