//! Plugin manifest parsing, discovery and subprocess environment.
//!
//! Every installed plugin lives in its own directory under
//! `<data_dir>/plugins/` and carries a `hookline-plugin.toml`:
//!
//! ```toml
//! [plugin]
//! name = "tag-enforcer"
//! version = "0.2.0"
//! description = "Require a tag on every todo"
//! author = "someone"
//! protocol_version = "1.0.0"
//!
//! [[hooks]]
//! command = "todo.add"
//! stage = "prevalidate"
//! mode = "transform"
//! timeout = "2s"
//!
//! [[commands]]
//! name = "audit"
//! description = "List todos without tags"
//! args = "[project]"
//!
//! [permissions]
//! env_vars = ["EDITOR"]
//! config_read = true
//! ```

use crate::config::{HostPaths, parse_duration};
use crate::errors::ManifestError;
use crate::hooks::types::{HookDescriptor, Mode, PluginOrigin, Stage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

/// Manifest filename inside a plugin directory.
pub const MANIFEST_FILE: &str = "hookline-plugin.toml";

/// Kebab-case: lowercase letters, digits and single hyphens.
static VALID_PLUGIN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]*(-[a-z0-9]+)*$").expect("valid regex"));

/// A parsed `hookline-plugin.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub plugin: PluginMeta,
    #[serde(default)]
    pub hooks: Vec<HookDef>,
    #[serde(default)]
    pub commands: Vec<CommandDef>,
    #[serde(default)]
    pub permissions: Permissions,
}

/// Plugin identification and compatibility info.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginMeta {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    pub protocol_version: String,
    /// Binary name relative to the plugin directory
    #[serde(default)]
    pub entrypoint: Option<String>,
}

/// One hook binding declared by a plugin.
///
/// Stage and mode stay strings here so that a bad pairing can be reported by
/// the registry instead of failing the whole manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDef {
    pub command: String,
    pub stage: String,
    pub mode: String,
    #[serde(default)]
    pub timeout: Option<String>,
}

/// A custom command a plugin adds, run as `hookline plugin run <plugin> <name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDef {
    pub name: String,
    pub description: String,
    /// Usage hint shown by `plugin info`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub args: String,
}

/// System resources a plugin asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub network: bool,
    #[serde(default)]
    pub filesystem: Vec<String>,
    #[serde(default)]
    pub store: bool,
    #[serde(default)]
    pub config_read: bool,
    #[serde(default)]
    pub config_write: bool,
    #[serde(default)]
    pub env_vars: Vec<String>,
}

impl Manifest {
    /// Load and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate manifest TOML.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check required fields and identifier formats.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let meta = &self.plugin;
        if meta.name.trim().is_empty() {
            return Err(ManifestError::Invalid("plugin.name is required".into()));
        }
        if !VALID_PLUGIN_NAME.is_match(&meta.name) {
            return Err(ManifestError::Invalid(format!(
                "plugin.name '{}' must be kebab-case (lowercase letters, digits, and hyphens)",
                meta.name
            )));
        }
        if meta.version.trim().is_empty() {
            return Err(ManifestError::Invalid("plugin.version is required".into()));
        }
        if meta.protocol_version.trim().is_empty() {
            return Err(ManifestError::Invalid(
                "plugin.protocol_version is required".into(),
            ));
        }
        if let Some(entrypoint) = &meta.entrypoint {
            validate_entrypoint(entrypoint)?;
        }

        for (i, hook) in self.hooks.iter().enumerate() {
            if hook.command.trim().is_empty() {
                return Err(ManifestError::Invalid(format!(
                    "hooks[{}].command is required",
                    i
                )));
            }
            if hook.stage.trim().is_empty() {
                return Err(ManifestError::Invalid(format!("hooks[{}].stage is required", i)));
            }
            if hook.mode.trim().is_empty() {
                return Err(ManifestError::Invalid(format!("hooks[{}].mode is required", i)));
            }
        }

        for (i, command) in self.commands.iter().enumerate() {
            if command.name.trim().is_empty() {
                return Err(ManifestError::Invalid(format!(
                    "commands[{}].name is required",
                    i
                )));
            }
            if !VALID_PLUGIN_NAME.is_match(&command.name) {
                return Err(ManifestError::Invalid(format!(
                    "commands[{}].name '{}' must be kebab-case",
                    i, command.name
                )));
            }
            if command.description.trim().is_empty() {
                return Err(ManifestError::Invalid(format!(
                    "commands[{}].description is required",
                    i
                )));
            }
            if self.commands[..i].iter().any(|c| c.name == command.name) {
                return Err(ManifestError::Invalid(format!(
                    "commands[{}].name '{}' is declared twice",
                    i, command.name
                )));
            }
        }

        Ok(())
    }

    /// Look up a declared custom command.
    pub fn command(&self, name: &str) -> Option<&CommandDef> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Binary name for this plugin.
    pub fn entrypoint(&self) -> String {
        self.plugin
            .entrypoint
            .clone()
            .unwrap_or_else(|| format!("hookline-plugin-{}", self.plugin.name))
    }
}

fn validate_entrypoint(entrypoint: &str) -> Result<(), ManifestError> {
    let trimmed = entrypoint.trim();
    if trimmed.is_empty() {
        return Err(ManifestError::Invalid(
            "plugin.entrypoint must not be empty".into(),
        ));
    }
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(ManifestError::Invalid(format!(
                    "plugin.entrypoint '{}' must not contain parent traversals",
                    trimmed
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ManifestError::Invalid(format!(
                    "plugin.entrypoint '{}' must be relative",
                    trimmed
                )));
            }
        }
    }
    Ok(())
}

/// A plugin found on disk with its parsed manifest.
#[derive(Debug, Clone)]
pub struct InstalledPlugin {
    pub manifest: Manifest,
    pub dir: PathBuf,
}

impl InstalledPlugin {
    pub fn name(&self) -> &str {
        &self.manifest.plugin.name
    }

    pub fn executable(&self) -> PathBuf {
        self.dir.join(self.manifest.entrypoint())
    }

    /// Pipeline name for one of this plugin's commands: `<plugin>.<command>`.
    pub fn command_name(&self, command: &str) -> String {
        format!("{}.{}", self.name(), command)
    }

    pub fn origin(&self) -> PluginOrigin {
        PluginOrigin {
            name: self.manifest.plugin.name.clone(),
            protocol_version: self.manifest.plugin.protocol_version.clone(),
            permissions: self.manifest.permissions.clone(),
        }
    }

    /// Convert the manifest's hook declarations into descriptors.
    ///
    /// Declarations with an unknown stage, mode or timeout are skipped and
    /// reported. Stage/mode pairing is left to the registry.
    pub fn hook_descriptors(&self) -> (Vec<HookDescriptor>, Vec<String>) {
        let mut descriptors = Vec::new();
        let mut diagnostics = Vec::new();
        let executable = self.executable();

        for (i, def) in self.manifest.hooks.iter().enumerate() {
            let stage = match def.stage.parse::<Stage>() {
                Ok(stage) => stage,
                Err(e) => {
                    diagnostics.push(format!("plugin '{}' hooks[{}]: {}", self.name(), i, e));
                    continue;
                }
            };
            let mode = match def.mode.parse::<Mode>() {
                Ok(mode) => mode,
                Err(e) => {
                    diagnostics.push(format!("plugin '{}' hooks[{}]: {}", self.name(), i, e));
                    continue;
                }
            };

            let mut descriptor =
                HookDescriptor::plugin(self.origin(), &def.command, stage, mode, &executable);
            if let Some(raw) = &def.timeout {
                match parse_duration(raw) {
                    Ok(timeout) => descriptor = descriptor.with_timeout(timeout),
                    Err(e) => {
                        diagnostics.push(format!(
                            "plugin '{}' hooks[{}]: invalid timeout: {}",
                            self.name(),
                            i,
                            e
                        ));
                        continue;
                    }
                }
            }
            descriptors.push(descriptor);
        }

        (descriptors, diagnostics)
    }
}

/// Result of scanning the plugins directory.
#[derive(Debug, Default)]
pub struct PluginDiscovery {
    pub plugins: Vec<InstalledPlugin>,
    pub diagnostics: Vec<String>,
}

/// Scan `plugins_dir` for plugin directories, in name order.
///
/// A missing directory means no plugins. Broken manifests become diagnostics
/// so a single bad plugin never prevents startup.
pub fn discover_plugins(plugins_dir: &Path, disabled: &[String]) -> PluginDiscovery {
    let mut discovery = PluginDiscovery::default();

    let entries = match std::fs::read_dir(plugins_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return discovery,
        Err(e) => {
            discovery.diagnostics.push(format!(
                "failed to read plugins directory {}: {}",
                plugins_dir.display(),
                e
            ));
            return discovery;
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            continue;
        }
        match Manifest::load(&manifest_path) {
            Ok(manifest) => {
                if disabled.iter().any(|name| name == &manifest.plugin.name) {
                    tracing::debug!(plugin = %manifest.plugin.name, "plugin disabled in config");
                    continue;
                }
                discovery.plugins.push(InstalledPlugin { manifest, dir });
            }
            Err(e) => discovery
                .diagnostics
                .push(format!("{}: {}", manifest_path.display(), e)),
        }
    }

    discovery
}

/// Environment handed to a plugin subprocess.
///
/// Only `PATH`, `HOME`, the plugin's declared variables and, with
/// `config_read`, the host's directories are passed through.
pub fn plugin_env(permissions: &Permissions, paths: &HostPaths) -> Vec<(String, String)> {
    let mut env = Vec::new();
    for key in ["PATH", "HOME"] {
        if let Ok(value) = std::env::var(key) {
            env.push((key.to_string(), value));
        }
    }
    for key in &permissions.env_vars {
        if let Ok(value) = std::env::var(key)
            && !value.is_empty()
        {
            env.push((key.clone(), value));
        }
    }
    if permissions.config_read {
        env.push((
            "HOOKLINE_CONFIG_DIR".to_string(),
            paths.config_dir.display().to_string(),
        ));
        env.push((
            "HOOKLINE_DATA_DIR".to_string(),
            paths.data_dir.display().to_string(),
        ));
    }
    env
}

/// Human-readable permission lines for `plugin list`.
pub fn permission_summary(permissions: &Permissions) -> Vec<String> {
    let mut lines = Vec::new();
    if permissions.network {
        lines.push("Network: outbound access".to_string());
    }
    if !permissions.filesystem.is_empty() {
        lines.push(format!("Filesystem: {}", permissions.filesystem.join(", ")));
    }
    if permissions.store {
        lines.push("Store: read/write host database".to_string());
    }
    if permissions.config_read {
        lines.push("Config: read host configuration".to_string());
    }
    if permissions.config_write {
        lines.push("Config: write host configuration".to_string());
    }
    if !permissions.env_vars.is_empty() {
        lines.push(format!("Environment: {}", permissions.env_vars.join(", ")));
    }
    if lines.is_empty() {
        lines.push("No special permissions required".to_string());
    }
    lines
}
