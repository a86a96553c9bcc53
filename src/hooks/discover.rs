//! User hook discovery and scaffolding.
//!
//! User hooks come from two places, in this order:
//! 1. `[[hooks]]` declarations in `hookline.toml`
//! 2. executable scripts in `<config_dir>/hooks/` named
//!    `<command>.<stage>[.<ext>]`, e.g. `todo.add.prevalidate.sh`

use super::types::{Context, HookDescriptor, Mode, Stage};
use crate::config::{HostConfig, parse_duration};
use crate::plugin::invoker::{PluginInvoker, check_available, resolve_executable};
use anyhow::{Context as _, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Split a script filename into its command and stage.
///
/// The stage is the last dot-separated segment, or the one before it when a
/// single extension follows. At least one segment must precede the stage.
pub fn parse_hook_filename(filename: &str) -> Option<(String, Stage)> {
    if filename.starts_with('.') {
        return None;
    }
    let parts: Vec<&str> = filename.split('.').collect();
    let n = parts.len();

    for stage_idx in [n.checked_sub(1), n.checked_sub(2)].into_iter().flatten() {
        if stage_idx == 0 {
            continue;
        }
        let Some(stage) = Stage::all().iter().find(|s| s.as_str() == parts[stage_idx]) else {
            continue;
        };
        let command = parts[..stage_idx].join(".");
        if parts[..stage_idx].iter().any(|p| p.is_empty()) {
            return None;
        }
        return Some((command, *stage));
    }
    None
}

/// Scan a hooks directory; non-matching and non-executable files are skipped.
pub fn scan_hooks_dir(dir: &Path) -> Vec<HookDescriptor> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    files
        .into_iter()
        .filter_map(|path| {
            let filename = path.file_name()?.to_str()?;
            let (command, stage) = parse_hook_filename(filename)?;
            if let Err(e) = check_available(filename, &path) {
                tracing::debug!("skipping hook script: {}", e);
                return None;
            }
            Some(HookDescriptor::user(command, stage, &path))
        })
        .collect()
}

/// Collect every user hook: config declarations first, then scripts.
pub fn discover_user_hooks(config: &HostConfig) -> (Vec<HookDescriptor>, Vec<String>) {
    let mut hooks = Vec::new();
    let mut diagnostics = Vec::new();

    for (i, decl) in config.toml.hooks.iter().enumerate() {
        let stage = match decl.stage.parse::<Stage>() {
            Ok(stage) => stage,
            Err(e) => {
                diagnostics.push(format!("hookline.toml hooks[{}]: {}", i, e));
                continue;
            }
        };
        let executable = resolve_executable(&decl.executable, &config.paths.config_dir);
        let mut hook = HookDescriptor::user(&decl.command, stage, &executable);
        if let Some(raw) = &decl.timeout {
            match parse_duration(raw) {
                Ok(timeout) => hook = hook.with_timeout(timeout),
                Err(e) => {
                    diagnostics.push(format!("hookline.toml hooks[{}]: invalid timeout: {}", i, e));
                    continue;
                }
            }
        }
        hooks.push(hook);
    }

    hooks.extend(scan_hooks_dir(&config.paths.hooks_dir()));
    (hooks, diagnostics)
}

/// Write an executable starter script for `command` at `stage`.
pub fn create_hook_script(dir: &Path, command: &str, stage: Stage) -> Result<PathBuf> {
    if command.trim().is_empty() {
        anyhow::bail!("command must not be empty");
    }
    if command.contains(['/', '\\']) {
        anyhow::bail!("command '{}' must not contain path separators", command);
    }
    if command.contains("..") {
        anyhow::bail!("command '{}' must not contain path traversal", command);
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create hooks directory: {}", dir.display()))?;

    let path = dir.join(format!("{}.{}.sh", command, stage));
    if path.exists() {
        anyhow::bail!("hook already exists: {}", path.display());
    }

    std::fs::write(&path, script_template(command, stage))
        .with_context(|| format!("Failed to write hook script: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("Failed to make hook executable: {}", path.display()))?;
    }

    Ok(path)
}

fn script_template(command: &str, stage: Stage) -> String {
    let mode = stage.required_mode();
    let body = match mode {
        Mode::Transform => {
            "# Reply with {\"status\":\"ok\",\"context\":{...}} to replace the context,\n\
             # print nothing to leave it unchanged, or exit non-zero with\n\
             # {\"status\":\"error\",\"error\":\"...\"} on stderr to reject.\n\
             exit 0\n"
        }
        Mode::Notify => "# Output is ignored; do side effects here.\nexit 0\n",
    };
    format!(
        "#!/bin/sh\n\
         # hookline hook: {command} at {stage} stage ({mode} mode)\n\
         #\n\
         # stdin carries one JSON envelope:\n\
         # {{\"protocol_version\":\"1.0.0\",\"type\":\"hook\",\"stage\":\"{stage}\",\"mode\":\"{mode}\",\n\
         #  \"context\":{{\"command\":\"{command}\",\"args\":[],\"flags\":{{}},\"result\":null,\"timestamp\":\"...\"}}}}\n\
         \n\
         ENVELOPE=$(cat)\n\
         \n\
         {body}"
    )
}

/// Outcome of a dry run.
#[derive(Debug, Clone)]
pub struct HookTestReport {
    pub command: String,
    pub stage: Stage,
    pub mode: Mode,
    /// The context the hook returned (transform hooks only)
    pub output: Option<Context>,
}

/// Dry-run a hook script against a sample context.
pub async fn test_hook(path: &Path, invoker: &PluginInvoker) -> Result<HookTestReport> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("not a file path: {}", path.display()))?;
    let (command, stage) = parse_hook_filename(filename).with_context(|| {
        format!(
            "'{}' does not match <command>.<stage>[.<ext>] (stages: prevalidate, preexec, postexec, notify)",
            filename
        )
    })?;
    check_available(filename, path)?;

    let hook = HookDescriptor::user(&command, stage, path);
    let sample = Context::new(
        "test.command",
        vec!["sample".to_string(), "args".to_string()],
        BTreeMap::from([("flag1".to_string(), "value1".to_string())]),
    );

    let result = invoker
        .invoke(&hook, &sample)
        .await
        .context("hook execution failed")?;

    Ok(HookTestReport {
        command,
        stage,
        mode: hook.mode,
        output: (hook.mode == Mode::Transform).then_some(result),
    })
}
