//! Subprocess invocation of hooks and plugins.
//!
//! Every invocation follows the same shape:
//! 1. check the executable exists and is runnable
//! 2. spawn it with piped stdio, write one envelope to stdin, close stdin
//! 3. wait for exit under a hard deadline, killing the child on expiry
//! 4. interpret exit status, stdout and stderr according to the mode

use crate::audit::{AuditEntry, HookAuditLog};
use crate::config::HostPaths;
use crate::errors::HookError;
use crate::hooks::types::{Context, HookDescriptor, HookSource, Mode};
use crate::plugin::manifest::{InstalledPlugin, plugin_env};
use crate::plugin::protocol::{
    Invocation, LifecycleEvent, PROTOCOL_VERSION, Response, is_compatible,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;

/// Longest excerpt of raw output kept in logs and errors.
const RAW_EXCERPT_LIMIT: usize = 512;

/// How long to keep reading output after the process has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(200);

/// What a plugin answered to a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleReply {
    /// Exit 0 with a `{"status":"ok"}` envelope
    Acknowledged,
    /// Exit 0 with nothing on stdout
    Silent,
}

/// Runs hook executables and interprets their responses.
#[derive(Debug, Clone)]
pub struct PluginInvoker {
    paths: HostPaths,
    audit: Option<Arc<HookAuditLog>>,
}

struct ProcessTarget<'a> {
    name: &'a str,
    executable: &'a Path,
    /// `None` inherits the host environment
    env: Option<Vec<(String, String)>>,
}

struct ProcessOutput {
    success: bool,
    exit_code: Option<i32>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl PluginInvoker {
    pub fn new(paths: HostPaths) -> Self {
        Self { paths, audit: None }
    }

    pub fn with_audit(mut self, audit: Arc<HookAuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }

    /// Run one hook against `context`.
    ///
    /// Transform hooks return the (possibly replaced) context; notify hooks
    /// return the input unchanged on success. `command` and `timestamp`
    /// always come from the input.
    pub async fn invoke(
        &self,
        hook: &HookDescriptor,
        context: &Context,
    ) -> Result<Context, HookError> {
        let started = Instant::now();
        let result = self.run_hook(hook, context).await;

        tracing::debug!(
            hook = %hook.name,
            command = %context.command,
            stage = %hook.stage,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "hook finished"
        );
        if let Some(audit) = &self.audit {
            audit.record(&AuditEntry::hook(hook, context, &result, started.elapsed()));
        }
        result
    }

    /// Run a hook for side effects only. Failures are logged, never returned.
    pub async fn notify(&self, hook: &HookDescriptor, context: &Context) {
        if let Err(e) = self.invoke(hook, context).await {
            tracing::warn!(
                hook = %hook.name,
                command = %context.command,
                class = e.class(),
                "notify hook failed: {}",
                e
            );
        }
    }

    /// Send a lifecycle event to a plugin and wait for its reply.
    pub async fn invoke_lifecycle(
        &self,
        plugin: &InstalledPlugin,
        event: LifecycleEvent,
        deadline: Duration,
    ) -> Result<LifecycleReply, HookError> {
        let started = Instant::now();
        let result = self.run_lifecycle(plugin, event, deadline).await;

        if let Some(audit) = &self.audit {
            audit.record(&AuditEntry::lifecycle(
                plugin.name(),
                event,
                &result,
                started.elapsed(),
            ));
        }
        result
    }

    /// Run one of a plugin's custom commands with the terminal attached.
    ///
    /// The envelope goes to stdin; stdout and stderr are inherited. Commands
    /// have no deadline since they may wait on the user.
    pub async fn run_command(
        &self,
        plugin: &InstalledPlugin,
        command: &str,
        args: Vec<String>,
        flags: BTreeMap<String, String>,
    ) -> Result<(), HookError> {
        let started = Instant::now();
        let result = self.spawn_command(plugin, command, args, flags).await;

        tracing::debug!(
            plugin = plugin.name(),
            command,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "plugin command finished"
        );
        if let Some(audit) = &self.audit {
            audit.record(&AuditEntry::plugin_command(
                plugin.name(),
                command,
                &result,
                started.elapsed(),
            ));
        }
        result
    }

    async fn spawn_command(
        &self,
        plugin: &InstalledPlugin,
        command: &str,
        args: Vec<String>,
        flags: BTreeMap<String, String>,
    ) -> Result<(), HookError> {
        let declared = &plugin.manifest.plugin.protocol_version;
        if !is_compatible(declared) {
            return Err(HookError::ProtocolMismatch {
                plugin: plugin.name().to_string(),
                declared: declared.clone(),
                supported: PROTOCOL_VERSION.to_string(),
            });
        }

        let payload = Invocation::command(command, args, flags)
            .encode()
            .map_err(|source| HookError::MalformedRequest {
                hook: plugin.name().to_string(),
                source,
            })?;

        let executable = plugin.executable();
        check_available(plugin.name(), &executable)?;
        let io_error = |source: std::io::Error| HookError::Io {
            hook: plugin.name().to_string(),
            source,
        };

        let mut child = Command::new(&executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .env_clear()
            .envs(plugin_env(&plugin.manifest.permissions, &self.paths))
            .kill_on_drop(true)
            .spawn()
            .map_err(io_error)?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(io_error(e)),
            }
        }

        let status = child.wait().await.map_err(io_error)?;
        if status.success() {
            Ok(())
        } else {
            Err(HookError::ProcessError {
                hook: plugin.name().to_string(),
                exit_code: status.code(),
                stderr: String::new(),
            })
        }
    }

    async fn run_hook(&self, hook: &HookDescriptor, context: &Context) -> Result<Context, HookError> {
        let payload = Invocation::hook(hook.stage, hook.mode, context.clone())
            .encode()
            .map_err(|source| HookError::MalformedRequest {
                hook: hook.name.clone(),
                source,
            })?;

        let env = match &hook.source {
            HookSource::User => None,
            HookSource::Plugin(origin) => Some(plugin_env(&origin.permissions, &self.paths)),
        };
        let target = ProcessTarget {
            name: &hook.name,
            executable: &hook.executable,
            env,
        };

        let output = run_process(&target, &payload, hook.effective_timeout()).await?;

        if !output.success {
            return Err(failure_from_stderr(&hook.name, &output));
        }

        match hook.mode {
            Mode::Notify => Ok(context.clone()),
            Mode::Transform => interpret_transform(&hook.name, context, &output.stdout),
        }
    }

    async fn run_lifecycle(
        &self,
        plugin: &InstalledPlugin,
        event: LifecycleEvent,
        deadline: Duration,
    ) -> Result<LifecycleReply, HookError> {
        let payload = Invocation::lifecycle(event)
            .encode()
            .map_err(|source| HookError::MalformedRequest {
                hook: plugin.name().to_string(),
                source,
            })?;

        let executable = plugin.executable();
        let target = ProcessTarget {
            name: plugin.name(),
            executable: &executable,
            env: Some(plugin_env(&plugin.manifest.permissions, &self.paths)),
        };

        let output = run_process(&target, &payload, deadline).await?;
        if !output.success {
            return Err(failure_from_stderr(plugin.name(), &output));
        }

        let trimmed = output.stdout.trim_ascii();
        if trimmed.is_empty() {
            return Ok(LifecycleReply::Silent);
        }
        match Response::parse(trimmed) {
            Ok(Response::Ok { .. }) => Ok(LifecycleReply::Acknowledged),
            Ok(Response::Error { error, code }) => Err(HookError::PluginReported {
                hook: plugin.name().to_string(),
                message: error,
                code,
            }),
            Err(e) => Err(malformed(plugin.name(), &e, trimmed)),
        }
    }
}

/// Whether `path` can be spawned.
pub(crate) fn check_available(name: &str, path: &Path) -> Result<(), HookError> {
    let unavailable = |reason: &str| HookError::Unavailable {
        hook: name.to_string(),
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let metadata = std::fs::metadata(path).map_err(|_| unavailable("does not exist"))?;
    if !metadata.is_file() {
        return Err(unavailable("is not a regular file"));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(unavailable("is not executable"));
        }
    }
    Ok(())
}

async fn run_process(
    target: &ProcessTarget<'_>,
    payload: &[u8],
    deadline: Duration,
) -> Result<ProcessOutput, HookError> {
    check_available(target.name, target.executable)?;

    let io_error = |source: std::io::Error| HookError::Io {
        hook: target.name.to_string(),
        source,
    };

    let mut command = Command::new(target.executable);
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(env) = &target.env {
        command.env_clear().envs(env.iter().cloned());
    }

    let mut child = command.spawn().map_err(io_error)?;
    let mut stdin = child.stdin.take();
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out = Vec::new();
    let mut err = Vec::new();

    let exchange = async {
        if let Some(mut pipe) = stdin.take() {
            match pipe.write_all(payload).await {
                Ok(()) => {}
                // The child may exit without reading its input.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e),
            }
        }

        let reading = async {
            tokio::try_join!(
                read_into(&mut stdout, &mut out),
                read_into(&mut stderr, &mut err)
            )
        };
        tokio::pin!(reading);

        // Exit is authoritative: a background grandchild may hold the pipes
        // open long after the hook itself is done.
        tokio::select! {
            read = &mut reading => {
                read?;
                child.wait().await
            }
            status = child.wait() => {
                let status = status?;
                match timeout(PIPE_DRAIN_GRACE, &mut reading).await {
                    Ok(read) => {
                        read?;
                    }
                    Err(_) => tracing::debug!(
                        hook = target.name,
                        "output pipes still open after exit, keeping what was read"
                    ),
                }
                Ok(status)
            }
        }
    };

    let outcome = timeout(deadline, exchange).await;
    match outcome {
        Ok(Ok(status)) => Ok(ProcessOutput {
            success: status.success(),
            exit_code: status.code(),
            stdout: out,
            stderr: err,
        }),
        Ok(Err(e)) => {
            let _ = child.kill().await;
            Err(io_error(e))
        }
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::debug!(hook = target.name, "kill after timeout failed: {}", e);
            }
            tracing::warn!(
                hook = target.name,
                timeout_ms = deadline.as_millis() as u64,
                "hook timed out and was killed"
            );
            Err(HookError::Timeout {
                hook: target.name.to_string(),
                timeout: deadline,
            })
        }
    }
}

/// Append everything readable from `pipe` to `buf`.
///
/// Each chunk is committed before the next read, so a cancelled read keeps
/// the output seen so far.
async fn read_into<R: AsyncRead + Unpin>(
    pipe: &mut Option<R>,
    buf: &mut Vec<u8>,
) -> std::io::Result<()> {
    let Some(pipe) = pipe.as_mut() else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn interpret_transform(name: &str, input: &Context, stdout: &[u8]) -> Result<Context, HookError> {
    let trimmed = stdout.trim_ascii();
    if trimmed.is_empty() {
        return Ok(input.clone());
    }

    match Response::parse(trimmed) {
        Ok(Response::Ok {
            context: Some(mut replaced),
        }) => {
            replaced.command = input.command.clone();
            replaced.timestamp = input.timestamp;
            Ok(replaced)
        }
        Ok(Response::Ok { context: None }) => Ok(input.clone()),
        Ok(Response::Error { error, code }) => Err(HookError::PluginReported {
            hook: name.to_string(),
            message: error,
            code,
        }),
        Err(e) => Err(malformed(name, &e, trimmed)),
    }
}

fn failure_from_stderr(name: &str, output: &ProcessOutput) -> HookError {
    let trimmed = output.stderr.trim_ascii();
    if let Ok(Response::Error { error, code }) = Response::parse(trimmed) {
        return HookError::PluginReported {
            hook: name.to_string(),
            message: error,
            code,
        };
    }
    HookError::ProcessError {
        hook: name.to_string(),
        exit_code: output.exit_code,
        stderr: excerpt(trimmed),
    }
}

fn malformed(name: &str, err: &serde_json::Error, raw: &[u8]) -> HookError {
    tracing::warn!(
        hook = name,
        raw = %excerpt(raw),
        "malformed response: {}",
        err
    );
    HookError::MalformedResponse {
        hook: name.to_string(),
        reason: err.to_string(),
        raw: raw.to_vec(),
    }
}

fn excerpt(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    if text.chars().count() <= RAW_EXCERPT_LIMIT {
        text.into_owned()
    } else {
        let mut cut: String = text.chars().take(RAW_EXCERPT_LIMIT).collect();
        cut.push('…');
        cut
    }
}

/// Absolute executable path for a user-declared hook.
pub fn resolve_executable(raw: &str, base: &Path) -> PathBuf {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
