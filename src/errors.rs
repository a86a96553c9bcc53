//! Typed error hierarchy for hookline.
//!
//! Three top-level enums cover the three seams:
//! - `HookError` - one hook or lifecycle invocation failed
//! - `PipelineError` - a blocking hook aborted a command
//! - `ManifestError` - a plugin manifest could not be loaded

use crate::hooks::types::Stage;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from a single plugin or hook invocation.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook '{hook}' timed out after {}ms", .timeout.as_millis())]
    Timeout { hook: String, timeout: Duration },

    #[error("hook '{hook}' exited unexpectedly ({}){}", describe_exit(.exit_code), describe_stderr(.stderr))]
    ProcessError {
        hook: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("hook '{hook}' reported an error: {message}{}", .code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    PluginReported {
        hook: String,
        message: String,
        code: Option<String>,
    },

    #[error("hook '{hook}' returned a malformed response: {reason}")]
    MalformedResponse {
        hook: String,
        reason: String,
        raw: Vec<u8>,
    },

    #[error("failed to encode invocation for hook '{hook}': {source}")]
    MalformedRequest {
        hook: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("hook '{hook}' is unavailable: {} {reason}", .path.display())]
    Unavailable {
        hook: String,
        path: PathBuf,
        reason: String,
    },

    #[error("plugin '{plugin}' speaks protocol {declared}, host supports {supported}")]
    ProtocolMismatch {
        plugin: String,
        declared: String,
        supported: String,
    },

    #[error("I/O error while running hook '{hook}': {source}")]
    Io {
        hook: String,
        #[source]
        source: std::io::Error,
    },
}

impl HookError {
    /// Short, stable classification used in audit records and logs.
    pub fn class(&self) -> &'static str {
        match self {
            HookError::Timeout { .. } => "timeout",
            HookError::ProcessError { .. } => "process_error",
            HookError::PluginReported { .. } => "plugin_reported_error",
            HookError::MalformedResponse { .. } => "malformed_response",
            HookError::MalformedRequest { .. } => "malformed_request",
            HookError::Unavailable { .. } => "unavailable",
            HookError::ProtocolMismatch { .. } => "protocol_mismatch",
            HookError::Io { .. } => "io",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HookError::Timeout { .. })
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn describe_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

/// A blocking hook failure that stopped a command before its handler ran.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} hook '{hook}' blocked {command}: {source}")]
    Aborted {
        command: String,
        stage: Stage,
        hook: String,
        #[source]
        source: HookError,
    },
}

impl PipelineError {
    pub fn hook_error(&self) -> &HookError {
        match self {
            PipelineError::Aborted { source, .. } => source,
        }
    }
}

/// Errors from loading or validating a plugin manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid manifest: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_carries_millis() {
        let err = HookError::Timeout {
            hook: "slow".into(),
            timeout: Duration::from_millis(100),
        };
        assert!(err.to_string().contains("100ms"));
        assert!(err.is_timeout());
        assert_eq!(err.class(), "timeout");
    }

    #[test]
    fn process_error_without_stderr_reads_unexpected_exit() {
        let err = HookError::ProcessError {
            hook: "crashy".into(),
            exit_code: Some(3),
            stderr: "   ".into(),
        };
        assert_eq!(
            err.to_string(),
            "hook 'crashy' exited unexpectedly (exit code 3)"
        );
    }

    #[test]
    fn process_error_killed_by_signal() {
        let err = HookError::ProcessError {
            hook: "x".into(),
            exit_code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn plugin_reported_includes_code_when_present() {
        let err = HookError::PluginReported {
            hook: "tags".into(),
            message: "missing tag".into(),
            code: Some("NO_TAG".into()),
        };
        assert_eq!(
            err.to_string(),
            "hook 'tags' reported an error: missing tag [NO_TAG]"
        );

        let err = HookError::PluginReported {
            hook: "tags".into(),
            message: "missing tag".into(),
            code: None,
        };
        assert!(!err.to_string().contains('['));
    }

    #[test]
    fn pipeline_error_exposes_inner_hook_error() {
        let err = PipelineError::Aborted {
            command: "todo.add".into(),
            stage: Stage::Prevalidate,
            hook: "require-tags".into(),
            source: HookError::PluginReported {
                hook: "require-tags".into(),
                message: "nope".into(),
                code: None,
            },
        };
        assert_eq!(err.hook_error().class(), "plugin_reported_error");
        assert!(err.to_string().starts_with("prevalidate hook 'require-tags' blocked todo.add"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&HookError::ProtocolMismatch {
            plugin: "p".into(),
            declared: "2.0.0".into(),
            supported: "1.0.0".into(),
        });
        assert_std_error(&ManifestError::Invalid("x".into()));
    }
}
