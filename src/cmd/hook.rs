//! Hook management commands: `hookline hook`.

use anyhow::Result;
use async_trait::async_trait;
use hookline::hooks::{
    CommandHandler, CommandInput, CommandOutput, HookSource, Stage, create_hook_script,
    handler_fn, test_hook,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use super::super::HookCommands;
use super::{Host, required_arg};

pub async fn cmd_hook(host: &Host, command: &HookCommands) -> Result<CommandOutput> {
    match command {
        HookCommands::List => {
            host.run("hook.list", ListHooks { host }, CommandInput::default())
                .await
        }
        HookCommands::Create { command, stage } => {
            let input = CommandInput::new(vec![command.clone(), stage.clone()], BTreeMap::new());
            host.run("hook.create", CreateHook { host }, input).await
        }
        HookCommands::Test { path } => {
            let input = CommandInput::new(vec![path.display().to_string()], BTreeMap::new());
            host.run("hook.test", TestHook { host }, input).await
        }
        HookCommands::Run {
            command,
            args,
            flags,
        } => {
            let mut positional = vec![command.clone()];
            positional.extend(args.iter().cloned());
            let input = CommandInput::new(positional, flags.iter().cloned().collect());
            host.run("hook.run", RunThroughPipeline { host }, input).await
        }
    }
}

struct ListHooks<'a> {
    host: &'a Host,
}

#[async_trait]
impl<'a> CommandHandler for ListHooks<'a> {
    async fn call(&self, _input: CommandInput) -> Result<CommandOutput> {
        let registry = self.host.pipeline.registry();
        let mut out = String::new();

        if registry.is_empty() {
            writeln!(out, "No hooks registered.")?;
            writeln!(
                out,
                "Create one with: hookline hook create <command> <stage>"
            )?;
        } else {
            writeln!(out, "Registered hooks ({}):", registry.len())?;
            writeln!(out)?;
            for hook in registry.iter() {
                let origin = match &hook.source {
                    HookSource::User => "user".to_string(),
                    HookSource::Plugin(origin) => format!("plugin {}", origin.name),
                };
                writeln!(
                    out,
                    "  {:<12} {:<20} {:<10} {:>7}ms  {} ({})",
                    hook.stage.as_str(),
                    hook.command,
                    hook.mode.as_str(),
                    hook.effective_timeout().as_millis(),
                    hook.name,
                    origin
                )?;
            }
        }

        if !self.host.diagnostics.is_empty() {
            writeln!(out)?;
            writeln!(out, "Diagnostics:")?;
            for diagnostic in &self.host.diagnostics {
                writeln!(out, "  - {}", diagnostic)?;
            }
        }

        Ok(CommandOutput::new(Value::String(out)))
    }
}

struct CreateHook<'a> {
    host: &'a Host,
}

#[async_trait]
impl<'a> CommandHandler for CreateHook<'a> {
    async fn call(&self, input: CommandInput) -> Result<CommandOutput> {
        let command = required_arg(&input, 0, "command")?;
        let stage: Stage = required_arg(&input, 1, "stage")?.parse()?;

        let path = create_hook_script(&self.host.config.paths.hooks_dir(), command, stage)?;
        Ok(CommandOutput::new(Value::String(format!(
            "Created hook: {}\nTry it with: hookline hook test {}",
            path.display(),
            path.display()
        ))))
    }
}

struct TestHook<'a> {
    host: &'a Host,
}

#[async_trait]
impl<'a> CommandHandler for TestHook<'a> {
    async fn call(&self, input: CommandInput) -> Result<CommandOutput> {
        let path = required_arg(&input, 0, "path")?;
        let report = test_hook(Path::new(path), self.host.pipeline.invoker()).await?;

        let mut out = format!(
            "Hook for '{}' at {} stage ({} mode) ran successfully.\n",
            report.command, report.stage, report.mode
        );
        match report.output {
            Some(context) => {
                out.push_str("Returned context:\n");
                out.push_str(&serde_json::to_string_pretty(&context)?);
            }
            None => out.push_str("Notify hook executed (no output expected)."),
        }
        Ok(CommandOutput::new(Value::String(out)))
    }
}

/// Runs an echo handler registered as an arbitrary command name, so the
/// hooks bound to that name can be exercised end to end.
struct RunThroughPipeline<'a> {
    host: &'a Host,
}

#[async_trait]
impl<'a> CommandHandler for RunThroughPipeline<'a> {
    async fn call(&self, input: CommandInput) -> Result<CommandOutput> {
        let target = required_arg(&input, 0, "command")?.to_string();
        let inner = CommandInput::new(input.args[1..].to_vec(), input.flags.clone());

        let name = target.clone();
        let echo = handler_fn(move |input: CommandInput| {
            let command = name.clone();
            async move {
                Ok(CommandOutput::new(json!({
                    "command": command,
                    "args": input.args,
                    "flags": input.flags,
                })))
            }
        });

        self.host.run(&target, echo, inner).await
    }
}
