//! Immutable `(command, stage) → hooks` lookup table.

use super::types::{HookDescriptor, HookSource, Stage};
use crate::errors::HookError;
use crate::plugin::protocol::{PROTOCOL_VERSION, is_compatible};
use std::collections::{BTreeSet, HashMap};

/// Hooks for one command, indexed by stage.
type StageTable = [Vec<HookDescriptor>; 4];

/// All hook bindings, built once at startup and never mutated.
///
/// Share it behind an `Arc`; lookups take `&self` only.
#[derive(Debug, Default)]
pub struct HookRegistry {
    by_command: HashMap<String, StageTable>,
    ordered: Vec<HookDescriptor>,
}

/// A built registry plus everything that was left out of it.
#[derive(Debug)]
pub struct RegistryBuild {
    pub registry: HookRegistry,
    pub diagnostics: Vec<String>,
}

impl HookRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge user and plugin hooks, users first, each in declaration order.
    ///
    /// Excluded with a diagnostic:
    /// - hooks whose stage/mode pairing is illegal
    /// - every hook of a plugin whose protocol major version differs from ours
    pub fn build(user_hooks: Vec<HookDescriptor>, plugin_hooks: Vec<HookDescriptor>) -> RegistryBuild {
        let mut registry = HookRegistry::default();
        let mut diagnostics = Vec::new();
        let mut mismatched: BTreeSet<String> = BTreeSet::new();

        for hook in user_hooks.into_iter().chain(plugin_hooks) {
            if let HookSource::Plugin(origin) = &hook.source
                && !is_compatible(&origin.protocol_version)
            {
                if mismatched.insert(origin.name.clone()) {
                    let err = HookError::ProtocolMismatch {
                        plugin: origin.name.clone(),
                        declared: origin.protocol_version.clone(),
                        supported: PROTOCOL_VERSION.to_string(),
                    };
                    diagnostics.push(format!("{}; all of its hooks are disabled", err));
                }
                continue;
            }

            if !hook.has_valid_pairing() {
                diagnostics.push(format!(
                    "hook '{}' ({}) rejected: stage '{}' requires mode '{}', got '{}'",
                    hook.name,
                    hook.source,
                    hook.stage,
                    hook.stage.required_mode(),
                    hook.mode
                ));
                continue;
            }

            registry.insert(hook);
        }

        for diagnostic in &diagnostics {
            tracing::warn!("{}", diagnostic);
        }
        tracing::debug!(hooks = registry.len(), "hook registry built");

        RegistryBuild {
            registry,
            diagnostics,
        }
    }

    fn insert(&mut self, hook: HookDescriptor) {
        let table = self.by_command.entry(hook.command.clone()).or_default();
        table[hook.stage.index()].push(hook.clone());
        self.ordered.push(hook);
    }

    /// Hooks bound to `(command, stage)` in execution order.
    pub fn resolve(&self, command: &str, stage: Stage) -> &[HookDescriptor] {
        self.by_command
            .get(command)
            .map(|table| table[stage.index()].as_slice())
            .unwrap_or(&[])
    }

    /// Whether any stage of `command` has a hook.
    pub fn has_hooks(&self, command: &str) -> bool {
        self.by_command.contains_key(command)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Every registered hook in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &HookDescriptor> {
        self.ordered.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::types::{Mode, PluginOrigin};
    use crate::plugin::manifest::Permissions;

    fn origin(name: &str, version: &str) -> PluginOrigin {
        PluginOrigin {
            name: name.into(),
            protocol_version: version.into(),
            permissions: Permissions::default(),
        }
    }

    fn plugin_hook(plugin: &str, version: &str, command: &str, stage: Stage) -> HookDescriptor {
        HookDescriptor::plugin(
            origin(plugin, version),
            command,
            stage,
            stage.required_mode(),
            format!("/plugins/{}/bin", plugin),
        )
    }

    #[test]
    fn test_resolve_unbound_is_empty() {
        let registry = HookRegistry::empty();
        assert!(registry.resolve("todo.add", Stage::Preexec).is_empty());
        assert!(!registry.has_hooks("todo.add"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_user_hooks_precede_plugin_hooks() {
        let user = vec![
            HookDescriptor::user("todo.add", Stage::Preexec, "/h/first"),
            HookDescriptor::user("todo.add", Stage::Preexec, "/h/second"),
        ];
        let plugin = vec![plugin_hook("tags", "1.0.0", "todo.add", Stage::Preexec)];

        let build = HookRegistry::build(user, plugin);
        assert!(build.diagnostics.is_empty());

        let names: Vec<&str> = build
            .registry
            .resolve("todo.add", Stage::Preexec)
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second", "tags:todo.add:preexec"]);
        assert_eq!(build.registry.len(), 3);
    }

    #[test]
    fn test_exact_command_match_only() {
        let build = HookRegistry::build(
            vec![HookDescriptor::user("todo.add", Stage::Preexec, "/h/x")],
            vec![],
        );
        assert!(build.registry.resolve("todo", Stage::Preexec).is_empty());
        assert!(build.registry.resolve("todo.add.extra", Stage::Preexec).is_empty());
        assert!(build.registry.resolve("todo.add", Stage::Postexec).is_empty());
        assert!(build.registry.has_hooks("todo.add"));
    }

    #[test]
    fn test_rejects_illegal_pairing() {
        let bad = HookDescriptor::plugin(
            origin("loud", "1.0.0"),
            "todo.add",
            Stage::Preexec,
            Mode::Notify,
            "/p/bin",
        );
        let also_bad = HookDescriptor::user("todo.add", Stage::Notify, "/h/n").with_mode(Mode::Transform);

        let build = HookRegistry::build(vec![also_bad], vec![bad]);
        assert!(build.registry.is_empty());
        assert_eq!(build.diagnostics.len(), 2);
        assert!(build.diagnostics[1].contains("requires mode 'transform'"));
    }

    #[test]
    fn test_protocol_mismatch_excludes_all_plugin_hooks_once() {
        let plugin = vec![
            plugin_hook("future", "2.0.0", "todo.add", Stage::Preexec),
            plugin_hook("future", "2.0.0", "todo.done", Stage::Notify),
            plugin_hook("current", "1.3.0", "todo.add", Stage::Notify),
        ];

        let build = HookRegistry::build(vec![], plugin);
        assert_eq!(build.diagnostics.len(), 1);
        assert!(build.diagnostics[0].contains("'future' speaks protocol 2.0.0"));
        assert_eq!(build.registry.len(), 1);
        assert!(!build.registry.has_hooks("todo.done"));
        assert_eq!(build.registry.resolve("todo.add", Stage::Notify).len(), 1);
    }

    #[test]
    fn test_iter_keeps_registration_order() {
        let user = vec![
            HookDescriptor::user("b", Stage::Postexec, "/h/b"),
            HookDescriptor::user("a", Stage::Prevalidate, "/h/a"),
        ];
        let build = HookRegistry::build(user, vec![]);
        let commands: Vec<&str> = build.registry.iter().map(|h| h.command.as_str()).collect();
        assert_eq!(commands, vec!["b", "a"]);
    }
}
