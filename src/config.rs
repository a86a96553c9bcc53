//! Host configuration.
//!
//! Settings are layered file → environment → CLI:
//! - Directories come from `--config-dir`/`--data-dir`, then
//!   `HOOKLINE_CONFIG_DIR`/`HOOKLINE_DATA_DIR`, then the platform defaults.
//! - Everything else lives in `<config_dir>/hookline.toml`.
//!
//! # Configuration File Format
//!
//! ```toml
//! [runtime]
//! notify_drain_grace = "2s"
//! audit = true
//!
//! [plugins]
//! disabled = ["noisy-plugin"]
//!
//! [[hooks]]
//! command = "todo.add"
//! stage = "prevalidate"
//! executable = "~/bin/require-tags"
//! timeout = "2s"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name inside the config directory.
pub const CONFIG_FILE: &str = "hookline.toml";

/// Grace period for in-flight notify tasks at exit.
pub const DEFAULT_NOTIFY_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Where hookline keeps its configuration and its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl HostPaths {
    /// Resolve directories (CLI → env → platform default).
    pub fn resolve(config_dir: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let config_dir = match config_dir.or_else(|| env_path("HOOKLINE_CONFIG_DIR")) {
            Some(dir) => dir,
            None => dirs::config_dir()
                .context("Could not determine a configuration directory; set HOOKLINE_CONFIG_DIR")?
                .join("hookline"),
        };
        let data_dir = match data_dir.or_else(|| env_path("HOOKLINE_DATA_DIR")) {
            Some(dir) => dir,
            None => dirs::data_dir()
                .context("Could not determine a data directory; set HOOKLINE_DATA_DIR")?
                .join("hookline"),
        };
        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Directory scanned for user hook scripts.
    pub fn hooks_dir(&self) -> PathBuf {
        self.config_dir.join("hooks")
    }

    /// Directory holding one subdirectory per installed plugin.
    pub fn plugins_dir(&self) -> PathBuf {
        self.data_dir.join("plugins")
    }

    pub fn audit_file(&self) -> PathBuf {
        self.data_dir.join("hook-audit.jsonl")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// `[runtime]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSection {
    /// How long to wait for notify hooks at exit (duration string)
    #[serde(default = "default_notify_drain_grace")]
    pub notify_drain_grace: String,
    /// Whether to append to the hook audit log
    #[serde(default = "default_audit")]
    pub audit: bool,
}

fn default_notify_drain_grace() -> String {
    "2s".to_string()
}

fn default_audit() -> bool {
    true
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            notify_drain_grace: default_notify_drain_grace(),
            audit: default_audit(),
        }
    }
}

/// `[plugins]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsSection {
    /// Installed plugins that are never loaded
    #[serde(default)]
    pub disabled: Vec<String>,
}

/// A user hook declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDeclaration {
    pub command: String,
    pub stage: String,
    /// Absolute, `~/`-prefixed, or relative to the config directory
    pub executable: String,
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Parsed `hookline.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostToml {
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub plugins: PluginsSection,
    #[serde(default)]
    pub hooks: Vec<HookDeclaration>,
}

impl HostToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse hookline.toml")
    }

    /// Load from `path`, or defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = parse_duration(&self.runtime.notify_drain_grace) {
            warnings.push(format!(
                "Invalid runtime.notify_drain_grace '{}': {}",
                self.runtime.notify_drain_grace, e
            ));
        }

        for (i, hook) in self.hooks.iter().enumerate() {
            if hook.command.trim().is_empty() {
                warnings.push(format!("hooks[{}]: command is empty", i));
            }
            if let Err(e) = hook.stage.parse::<crate::hooks::Stage>() {
                warnings.push(format!("hooks[{}]: {}", i, e));
            }
            if hook.executable.trim().is_empty() {
                warnings.push(format!("hooks[{}]: executable is empty", i));
            }
            if let Some(ref timeout) = hook.timeout
                && let Err(e) = parse_duration(timeout)
            {
                warnings.push(format!("hooks[{}]: invalid timeout '{}': {}", i, timeout, e));
            }
        }

        for name in &self.plugins.disabled {
            if name.trim().is_empty() {
                warnings.push("plugins.disabled contains an empty name".to_string());
            }
        }

        warnings
    }
}

/// Fully resolved host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub paths: HostPaths,
    /// Parsed hookline.toml
    pub toml: HostToml,
    /// CLI override: verbose logging
    pub verbose: bool,
}

impl HostConfig {
    /// Load the config file under `paths`, falling back to defaults.
    pub fn load(paths: HostPaths) -> Result<Self> {
        let toml = HostToml::load_or_default(&paths.config_file())?;
        Ok(Self {
            paths,
            toml,
            verbose: false,
        })
    }

    /// Resolve directories and load with CLI overrides.
    pub fn with_cli_args(
        config_dir: Option<PathBuf>,
        data_dir: Option<PathBuf>,
        verbose: bool,
    ) -> Result<Self> {
        let mut config = Self::load(HostPaths::resolve(config_dir, data_dir)?)?;
        config.verbose = verbose;
        Ok(config)
    }

    /// Drain grace, falling back to the default when unparseable.
    pub fn notify_drain_grace(&self) -> Duration {
        parse_duration(&self.toml.runtime.notify_drain_grace).unwrap_or(DEFAULT_NOTIFY_DRAIN_GRACE)
    }

    pub fn audit_enabled(&self) -> bool {
        self.toml.runtime.audit
    }

    pub fn disabled_plugins(&self) -> &[String] {
        &self.toml.plugins.disabled
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

/// Parse a duration string: `500ms`, `5s`, `2m`, or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        anyhow::bail!("empty duration");
    }

    let (number, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => s.split_at(pos),
        None => (s, "s"),
    };
    let value: u64 = number
        .parse()
        .with_context(|| format!("invalid duration '{}'", input))?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .with_context(|| format!("duration '{}' is too large", input)),
        other => anyhow::bail!(
            "invalid duration unit '{}' in '{}'. Valid units: ms, s, m",
            other,
            input
        ),
    }
}
