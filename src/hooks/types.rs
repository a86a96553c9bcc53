//! Core types for the hook pipeline.
//!
//! - `Stage`: the four fixed points in a command's lifecycle
//! - `Mode`: whether a hook's output is consumed (transform) or ignored (notify)
//! - `Context`: the serializable snapshot of one command invocation
//! - `HookDescriptor`: one static hook binding loaded at startup

use crate::plugin::manifest::Permissions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default deadline for transform hooks.
pub const DEFAULT_TRANSFORM_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for notify hooks.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// When a hook runs in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Before argument validation; can rewrite or reject the invocation
    Prevalidate,
    /// Right before the handler runs; can rewrite or reject the invocation
    Preexec,
    /// After a successful handler run; can rewrite the result before display
    Postexec,
    /// After everything else; fire-and-forget observers
    Notify,
}

impl Stage {
    /// All stages in pipeline order.
    pub fn all() -> &'static [Stage] {
        &[
            Stage::Prevalidate,
            Stage::Preexec,
            Stage::Postexec,
            Stage::Notify,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Prevalidate => "prevalidate",
            Stage::Preexec => "preexec",
            Stage::Postexec => "postexec",
            Stage::Notify => "notify",
        }
    }

    /// The only mode a hook bound to this stage may use.
    pub fn required_mode(&self) -> Mode {
        match self {
            Stage::Notify => Mode::Notify,
            _ => Mode::Transform,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Stage::Prevalidate => 0,
            Stage::Preexec => 1,
            Stage::Postexec => 2,
            Stage::Notify => 3,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prevalidate" => Ok(Stage::Prevalidate),
            "preexec" => Ok(Stage::Preexec),
            "postexec" => Ok(Stage::Postexec),
            "notify" => Ok(Stage::Notify),
            _ => anyhow::bail!(
                "Invalid hook stage '{}'. Valid values: prevalidate, preexec, postexec, notify",
                s
            ),
        }
    }
}

/// How a hook interacts with the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Receives the context and may return a replacement; can block the command
    Transform,
    /// Receives the context for side effects only; never blocks the command
    Notify,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Transform => "transform",
            Mode::Notify => "notify",
        }
    }

    pub fn default_timeout(&self) -> Duration {
        match self {
            Mode::Transform => DEFAULT_TRANSFORM_TIMEOUT,
            Mode::Notify => DEFAULT_NOTIFY_TIMEOUT,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "transform" => Ok(Mode::Transform),
            "notify" => Ok(Mode::Notify),
            _ => anyhow::bail!("Invalid hook mode '{}'. Valid values: transform, notify", s),
        }
    }
}

/// Snapshot of one command invocation as it flows through the pipeline.
///
/// Every hook receives its own clone; nothing is shared by reference between
/// hook invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Dotted command identifier, e.g. `todo.add`
    pub command: String,
    /// Positional arguments as typed by the user
    pub args: Vec<String>,
    /// Flag name to value
    pub flags: BTreeMap<String, String>,
    /// The handler's return value, present from postexec onward
    #[serde(default)]
    pub result: Option<Value>,
    /// When the invocation began
    pub timestamp: DateTime<Utc>,
}

impl Context {
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        flags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            flags,
            result: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_flag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.insert(key.into(), value.into());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// Where a hook binding came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookSource {
    /// Declared by the user in the config file or hooks directory
    User,
    /// Declared in an installed plugin's manifest
    Plugin(PluginOrigin),
}

impl HookSource {
    pub fn plugin(&self) -> Option<&PluginOrigin> {
        match self {
            HookSource::User => None,
            HookSource::Plugin(origin) => Some(origin),
        }
    }
}

impl std::fmt::Display for HookSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookSource::User => write!(f, "user"),
            HookSource::Plugin(origin) => write!(f, "plugin:{}", origin.name),
        }
    }
}

/// The owning plugin of a hook binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginOrigin {
    pub name: String,
    /// Protocol version the plugin declares it speaks
    pub protocol_version: String,
    /// Used to build the plugin's subprocess environment
    pub permissions: Permissions,
}

/// A single static hook binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookDescriptor {
    /// Human-readable identifier used in logs, errors and audit records
    pub name: String,
    /// Exact command identifier this hook applies to
    pub command: String,
    pub stage: Stage,
    pub mode: Mode,
    /// Program run for every invocation of this hook
    pub executable: PathBuf,
    /// Overrides the mode default when set
    pub timeout: Option<Duration>,
    pub source: HookSource,
}

impl HookDescriptor {
    /// Create a user hook. The mode follows from the stage.
    pub fn user(command: impl Into<String>, stage: Stage, executable: impl AsRef<Path>) -> Self {
        let command = command.into();
        let executable = executable.as_ref().to_path_buf();
        let name = executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.{}", command, stage));
        Self {
            name,
            command,
            stage,
            mode: stage.required_mode(),
            executable,
            timeout: None,
            source: HookSource::User,
        }
    }

    /// Create a plugin hook with an explicit mode, as declared in a manifest.
    pub fn plugin(
        origin: PluginOrigin,
        command: impl Into<String>,
        stage: Stage,
        mode: Mode,
        executable: impl AsRef<Path>,
    ) -> Self {
        let command = command.into();
        Self {
            name: format!("{}:{}:{}", origin.name, command, stage),
            command,
            stage,
            mode,
            executable: executable.as_ref().to_path_buf(),
            timeout: None,
            source: HookSource::Plugin(origin),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// The deadline applied to each invocation of this hook.
    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or_else(|| self.mode.default_timeout())
    }

    /// Whether the stage/mode pairing is legal.
    pub fn has_valid_pairing(&self) -> bool {
        self.stage.required_mode() == self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_from_str() {
        assert_eq!("prevalidate".parse::<Stage>().unwrap(), Stage::Prevalidate);
        assert_eq!("PostExec".parse::<Stage>().unwrap(), Stage::Postexec);
        assert!("pre_exec".parse::<Stage>().is_err());
    }

    #[test]
    fn test_stage_display_round_trips() {
        for stage in Stage::all() {
            assert_eq!(stage.to_string().parse::<Stage>().unwrap(), *stage);
        }
    }

    #[test]
    fn test_required_mode_pairs_notify_only_with_notify() {
        assert_eq!(Stage::Notify.required_mode(), Mode::Notify);
        assert_eq!(Stage::Prevalidate.required_mode(), Mode::Transform);
        assert_eq!(Stage::Preexec.required_mode(), Mode::Transform);
        assert_eq!(Stage::Postexec.required_mode(), Mode::Transform);
    }

    #[test]
    fn test_mode_default_timeouts() {
        assert_eq!(Mode::Transform.default_timeout(), Duration::from_secs(5));
        assert_eq!(Mode::Notify.default_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_context_serializes_expected_shape() {
        let ctx = Context::new("todo.add", vec!["buy milk".into()], BTreeMap::new());
        let json = serde_json::to_value(&ctx).unwrap();

        assert_eq!(json["command"], "todo.add");
        assert_eq!(json["args"][0], "buy milk");
        assert!(json["flags"].as_object().unwrap().is_empty());
        assert!(json["result"].is_null());
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_context_result_null_deserializes_to_none() {
        let raw = r#"{"command":"x","args":[],"flags":{},"result":null,"timestamp":"2026-01-15T10:30:00Z"}"#;
        let ctx: Context = serde_json::from_str(raw).unwrap();
        assert!(ctx.result.is_none());
    }

    #[test]
    fn test_context_requires_flags_field() {
        let raw = r#"{"command":"x","args":[],"timestamp":"2026-01-15T10:30:00Z"}"#;
        assert!(serde_json::from_str::<Context>(raw).is_err());
    }

    #[test]
    fn test_user_descriptor_derives_mode_and_name() {
        let hook = HookDescriptor::user("todo.add", Stage::Notify, "/hooks/todo.add.notify.sh");
        assert_eq!(hook.mode, Mode::Notify);
        assert_eq!(hook.name, "todo.add.notify.sh");
        assert_eq!(hook.effective_timeout(), DEFAULT_NOTIFY_TIMEOUT);
        assert!(hook.has_valid_pairing());
        assert_eq!(hook.source.to_string(), "user");
    }

    #[test]
    fn test_descriptor_timeout_override() {
        let hook = HookDescriptor::user("todo.add", Stage::Preexec, "/bin/true")
            .with_timeout(Duration::from_millis(250));
        assert_eq!(hook.effective_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_plugin_descriptor_name_and_pairing() {
        let origin = PluginOrigin {
            name: "tag-enforcer".into(),
            protocol_version: "1.0.0".into(),
            permissions: Permissions::default(),
        };
        let hook = HookDescriptor::plugin(
            origin,
            "todo.add",
            Stage::Preexec,
            Mode::Notify,
            "/plugins/tag-enforcer/bin",
        );
        assert_eq!(hook.name, "tag-enforcer:todo.add:preexec");
        assert_eq!(hook.source.to_string(), "plugin:tag-enforcer");
        assert!(!hook.has_valid_pairing());
    }
}
