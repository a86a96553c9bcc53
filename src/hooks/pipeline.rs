//! Command pipeline wrapper.
//!
//! [`CommandPipeline::wrap`] turns any [`CommandHandler`] into one that runs
//! the registered hooks around it:
//!
//! ```text
//! prevalidate → preexec → handler → postexec → (notify, detached)
//! ```
//!
//! | Stage | On failure |
//! |-------|------------|
//! | prevalidate / preexec | abort, handler never runs |
//! | postexec | warning attached to the output |
//! | notify | logged and audited only |

use super::registry::HookRegistry;
use super::types::{Context, HookDescriptor, Stage};
use crate::errors::PipelineError;
use crate::plugin::invoker::PluginInvoker;
use crate::plugin::manifest::InstalledPlugin;
use crate::plugin::protocol::LifecycleEvent;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;

/// Arguments handed to a command handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandInput {
    pub args: Vec<String>,
    pub flags: BTreeMap<String, String>,
}

impl CommandInput {
    pub fn new(args: Vec<String>, flags: BTreeMap<String, String>) -> Self {
        Self { args, flags }
    }

    pub fn flag(&self, key: &str) -> Option<&str> {
        self.flags.get(key).map(String::as_str)
    }
}

/// A postexec hook that failed without failing the command.
#[derive(Debug, Clone, PartialEq)]
pub struct HookWarning {
    pub stage: Stage,
    pub hook: String,
    pub message: String,
}

impl std::fmt::Display for HookWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} hook '{}': {}", self.stage, self.hook, self.message)
    }
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub value: Value,
    pub warnings: Vec<HookWarning>,
}

impl CommandOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }
}

impl From<Value> for CommandOutput {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// A CLI command body.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn call(&self, input: CommandInput) -> Result<CommandOutput>;
}

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Build a [`CommandHandler`] from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(CommandInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CommandOutput>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(CommandInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CommandOutput>> + Send,
{
    async fn call(&self, input: CommandInput) -> Result<CommandOutput> {
        (self.f)(input).await
    }
}

/// Runs notify hooks and lifecycle broadcasts as detached tasks.
#[derive(Debug, Clone)]
pub struct NotifyDispatcher {
    invoker: Arc<PluginInvoker>,
    tracker: TaskTracker,
}

impl NotifyDispatcher {
    pub fn new(invoker: Arc<PluginInvoker>) -> Self {
        Self {
            invoker,
            tracker: TaskTracker::new(),
        }
    }

    /// Launch every hook with its own copy of `context` and return at once.
    pub fn dispatch(&self, hooks: &[HookDescriptor], context: &Context) {
        for hook in hooks {
            let invoker = Arc::clone(&self.invoker);
            let hook = hook.clone();
            let context = context.clone();
            self.tracker.spawn(async move {
                invoker.notify(&hook, &context).await;
            });
        }
    }

    /// Send `event` to `plugin` in the background; failures are only logged.
    pub fn dispatch_lifecycle(&self, plugin: &InstalledPlugin, event: LifecycleEvent, deadline: Duration) {
        let invoker = Arc::clone(&self.invoker);
        let plugin = plugin.clone();
        self.tracker.spawn(async move {
            if let Err(e) = invoker.invoke_lifecycle(&plugin, event, deadline).await {
                tracing::warn!(
                    plugin = %plugin.name(),
                    event = %event,
                    class = e.class(),
                    "lifecycle event failed: {}",
                    e
                );
            }
        });
    }

    /// Number of tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work and wait up to `grace` for running tasks.
    ///
    /// Returns `false` when tasks were still running at the deadline; their
    /// children are killed once the runtime drops them.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if !drained {
            tracing::warn!(
                remaining = self.tracker.len(),
                grace_ms = grace.as_millis() as u64,
                "abandoning notify hooks still running at exit"
            );
        }
        drained
    }
}

/// Wraps command handlers so every invocation flows through the hooks.
#[derive(Debug, Clone)]
pub struct CommandPipeline {
    registry: Arc<HookRegistry>,
    invoker: Arc<PluginInvoker>,
    notifier: NotifyDispatcher,
}

impl CommandPipeline {
    pub fn new(registry: Arc<HookRegistry>, invoker: Arc<PluginInvoker>) -> Self {
        let notifier = NotifyDispatcher::new(Arc::clone(&invoker));
        Self {
            registry,
            invoker,
            notifier,
        }
    }

    /// Register `handler` under the dotted command name `name`.
    pub fn wrap<H: CommandHandler>(&self, name: impl Into<String>, handler: H) -> WrappedCommand<H> {
        WrappedCommand {
            name: name.into(),
            handler,
            registry: Arc::clone(&self.registry),
            invoker: Arc::clone(&self.invoker),
            notifier: self.notifier.clone(),
        }
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn invoker(&self) -> &Arc<PluginInvoker> {
        &self.invoker
    }

    pub fn notifier(&self) -> &NotifyDispatcher {
        &self.notifier
    }
}

/// A handler wrapped by [`CommandPipeline::wrap`].
pub struct WrappedCommand<H> {
    name: String,
    handler: H,
    registry: Arc<HookRegistry>,
    invoker: Arc<PluginInvoker>,
    notifier: NotifyDispatcher,
}

impl<H> WrappedCommand<H> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Chain transform hooks; the first failure aborts the command.
    async fn run_blocking(&self, stage: Stage, mut context: Context) -> Result<Context> {
        for hook in self.registry.resolve(&self.name, stage) {
            tracing::debug!(command = %self.name, stage = %stage, hook = %hook.name, "running hook");
            match self.invoker.invoke(hook, &context).await {
                Ok(next) => context = next,
                Err(source) => {
                    return Err(PipelineError::Aborted {
                        command: self.name.clone(),
                        stage,
                        hook: hook.name.clone(),
                        source,
                    }
                    .into());
                }
            }
        }
        Ok(context)
    }

    /// Chain postexec hooks; failures become warnings.
    async fn run_advisory(&self, mut context: Context, warnings: &mut Vec<HookWarning>) -> Context {
        for hook in self.registry.resolve(&self.name, Stage::Postexec) {
            match self.invoker.invoke(hook, &context).await {
                Ok(next) => context = next,
                Err(e) => {
                    tracing::warn!(command = %self.name, hook = %hook.name, "postexec hook failed: {}", e);
                    warnings.push(HookWarning {
                        stage: Stage::Postexec,
                        hook: hook.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        context
    }
}

#[async_trait]
impl<H: CommandHandler> CommandHandler for WrappedCommand<H> {
    async fn call(&self, input: CommandInput) -> Result<CommandOutput> {
        if !self.registry.has_hooks(&self.name) {
            return self.handler.call(input).await;
        }

        let context = Context::new(&self.name, input.args, input.flags);
        let context = self.run_blocking(Stage::Prevalidate, context).await?;
        let context = self.run_blocking(Stage::Preexec, context).await?;

        let handled = self
            .handler
            .call(CommandInput::new(context.args.clone(), context.flags.clone()))
            .await;

        let (outcome, context) = match handled {
            Ok(output) => {
                let mut warnings = output.warnings;
                let context = self
                    .run_advisory(context.with_result(output.value), &mut warnings)
                    .await;
                let value = context.result.clone().unwrap_or(Value::Null);
                (Ok(CommandOutput { value, warnings }), context)
            }
            Err(e) => (Err(e), context),
        };

        self.notifier
            .dispatch(self.registry.resolve(&self.name, Stage::Notify), &context);

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostPaths;
    use crate::errors::HookError;
    use crate::hooks::registry::HookRegistry;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tempfile::{TempDir, tempdir};

    fn create_test_script(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let script_path = dir.path().join(name);
        std::fs::write(&script_path, content).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&script_path, perms).unwrap();
        }

        script_path
    }

    fn pipeline(dir: &TempDir, hooks: Vec<HookDescriptor>) -> CommandPipeline {
        let build = HookRegistry::build(hooks, vec![]);
        assert!(build.diagnostics.is_empty());
        let invoker = PluginInvoker::new(HostPaths {
            config_dir: dir.path().join("cfg"),
            data_dir: dir.path().join("data"),
        });
        CommandPipeline::new(Arc::new(build.registry), Arc::new(invoker))
    }

    fn input(args: &[&str], flags: &[(&str, &str)]) -> CommandInput {
        CommandInput::new(
            args.iter().map(|s| s.to_string()).collect(),
            flags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    /// Handler that echoes its input and counts calls.
    fn echo(calls: Arc<AtomicUsize>) -> impl CommandHandler {
        handler_fn(move |input: CommandInput| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(CommandOutput::new(json!({
                    "args": input.args,
                    "flags": input.flags,
                })))
            }
        })
    }

    // Inserts a `tags` flag into the context flags.
    const TAGGER: &str = r#"#!/bin/sh
input=$(cat)
ctx=${input#*\"context\":}
ctx=${ctx%\}}
ctx=$(printf '%s' "$ctx" | sed -e 's/"flags":{}/"flags":{"tags":"untagged"}/' -e t -e 's/"flags":{/"flags":{"tags":"untagged",/')
printf '{"status":"ok","context":%s}\n' "$ctx"
"#;

    // Replaces the result with a fixed value.
    const RESULT_REWRITER: &str = r#"#!/bin/sh
cat > /dev/null
printf '{"status":"ok","context":{"command":"x","args":[],"flags":{},"result":"rewritten","timestamp":"2026-01-15T10:30:00Z"}}\n'
"#;

    const FAILING: &str = "#!/bin/sh\ncat > /dev/null\necho '{\"status\":\"error\",\"error\":\"denied\"}' >&2\nexit 1\n";

    #[tokio::test]
    async fn test_unhooked_command_calls_handler_directly() {
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let wrapped = pipeline(&dir, vec![]).wrap("todo.add", echo(Arc::clone(&calls)));

        let out = wrapped.call(input(&["a", "b"], &[("p", "1")])).await.unwrap();
        assert_eq!(out.value, json!({"args": ["a", "b"], "flags": {"p": "1"}}));
        assert!(out.warnings.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unhooked_handler_error_passes_through() {
        let dir = tempdir().unwrap();
        let wrapped = pipeline(&dir, vec![]).wrap(
            "todo.add",
            handler_fn(|_| async { Err::<CommandOutput, _>(anyhow::anyhow!("store locked")) }),
        );

        let err = wrapped.call(CommandInput::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "store locked");
    }

    #[tokio::test]
    async fn test_prevalidate_transform_reaches_handler() {
        let dir = tempdir().unwrap();
        let script = create_test_script(&dir, "tagger.sh", TAGGER);
        let hooks = vec![HookDescriptor::user("todo.add", Stage::Prevalidate, &script)];
        let calls = Arc::new(AtomicUsize::new(0));
        let wrapped = pipeline(&dir, hooks).wrap("todo.add", echo(Arc::clone(&calls)));

        let out = wrapped.call(input(&["buy milk"], &[])).await.unwrap();
        assert_eq!(out.value["flags"]["tags"], "untagged");
        assert_eq!(out.value["args"][0], "buy milk");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transforms_chain_in_order() {
        let dir = tempdir().unwrap();
        let first = create_test_script(&dir, "tagger.sh", TAGGER);
        // Would fail if the first hook's flag did not reach it.
        let second = create_test_script(
            &dir,
            "check.sh",
            "#!/bin/sh\ninput=$(cat)\ncase \"$input\" in *'\"tags\":\"untagged\"'*) exit 0;; esac\nexit 4\n",
        );
        let hooks = vec![
            HookDescriptor::user("todo.add", Stage::Prevalidate, &first),
            HookDescriptor::user("todo.add", Stage::Preexec, &second),
        ];
        let calls = Arc::new(AtomicUsize::new(0));
        let wrapped = pipeline(&dir, hooks).wrap("todo.add", echo(Arc::clone(&calls)));

        let out = wrapped
            .call(input(&["x"], &[("priority", "high")]))
            .await
            .unwrap();
        assert_eq!(out.value["flags"]["tags"], "untagged");
        assert_eq!(out.value["flags"]["priority"], "high");
    }

    #[tokio::test]
    async fn test_prevalidate_failure_aborts_before_handler() {
        let dir = tempdir().unwrap();
        let script = create_test_script(&dir, "deny.sh", FAILING);
        let notify_marker = dir.path().join("notified");
        let notify = create_test_script(
            &dir,
            "notify.sh",
            &format!("#!/bin/sh\ntouch {}\n", notify_marker.display()),
        );
        let hooks = vec![
            HookDescriptor::user("todo.add", Stage::Prevalidate, &script),
            HookDescriptor::user("todo.add", Stage::Notify, &notify),
        ];
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline(&dir, hooks);
        let wrapped = pipeline.wrap("todo.add", echo(Arc::clone(&calls)));

        let err = wrapped.call(input(&["x"], &[])).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let pipeline_err = err.downcast_ref::<PipelineError>().unwrap();
        let PipelineError::Aborted { stage, hook, .. } = pipeline_err;
        assert_eq!(*stage, Stage::Prevalidate);
        assert_eq!(hook, "deny.sh");
        assert!(matches!(
            pipeline_err.hook_error(),
            HookError::PluginReported { .. }
        ));

        assert!(pipeline.notifier().drain(Duration::from_secs(2)).await);
        assert!(!notify_marker.exists());
    }

    #[tokio::test]
    async fn test_preexec_timeout_aborts() {
        let dir = tempdir().unwrap();
        let script = create_test_script(&dir, "slow.sh", "#!/bin/sh\nexec sleep 5\n");
        let hooks = vec![
            HookDescriptor::user("todo.add", Stage::Preexec, &script)
                .with_timeout(Duration::from_millis(100)),
        ];
        let calls = Arc::new(AtomicUsize::new(0));
        let wrapped = pipeline(&dir, hooks).wrap("todo.add", echo(Arc::clone(&calls)));

        let err = wrapped.call(input(&[], &[])).await.unwrap_err();
        let pipeline_err = err.downcast_ref::<PipelineError>().unwrap();
        assert!(pipeline_err.hook_error().is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_postexec_rewrites_result() {
        let dir = tempdir().unwrap();
        let script = create_test_script(&dir, "rewrite.sh", RESULT_REWRITER);
        let hooks = vec![HookDescriptor::user("todo.add", Stage::Postexec, &script)];
        let wrapped =
            pipeline(&dir, hooks).wrap("todo.add", echo(Arc::new(AtomicUsize::new(0))));

        let out = wrapped.call(input(&[], &[])).await.unwrap();
        assert_eq!(out.value, json!("rewritten"));
    }

    #[tokio::test]
    async fn test_postexec_failure_is_warning_and_later_hooks_run() {
        let dir = tempdir().unwrap();
        let failing = create_test_script(&dir, "a-fail.sh", FAILING);
        let marker = dir.path().join("second-ran");
        let second = create_test_script(
            &dir,
            "b-mark.sh",
            &format!("#!/bin/sh\ncat > /dev/null\ntouch {}\n", marker.display()),
        );
        let hooks = vec![
            HookDescriptor::user("todo.add", Stage::Postexec, &failing),
            HookDescriptor::user("todo.add", Stage::Postexec, &second),
        ];
        let wrapped =
            pipeline(&dir, hooks).wrap("todo.add", echo(Arc::new(AtomicUsize::new(0))));

        let out = wrapped.call(input(&["x"], &[])).await.unwrap();
        assert_eq!(out.value["args"][0], "x");
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].stage, Stage::Postexec);
        assert_eq!(out.warnings[0].hook, "a-fail.sh");
        assert!(out.warnings[0].message.contains("denied"));
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_handler_error_returned_unchanged_and_notify_still_runs() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("notified");
        let notify = create_test_script(
            &dir,
            "notify.sh",
            &format!("#!/bin/sh\ncat > /dev/null\ntouch {}\n", marker.display()),
        );
        let postexec_marker = dir.path().join("postexec");
        let postexec = create_test_script(
            &dir,
            "post.sh",
            &format!("#!/bin/sh\ncat > /dev/null\ntouch {}\n", postexec_marker.display()),
        );
        let hooks = vec![
            HookDescriptor::user("todo.add", Stage::Postexec, &postexec),
            HookDescriptor::user("todo.add", Stage::Notify, &notify),
        ];
        let pipeline = pipeline(&dir, hooks);
        let wrapped = pipeline.wrap(
            "todo.add",
            handler_fn(|_| async { Err::<CommandOutput, _>(anyhow::anyhow!("store locked")) }),
        );

        let err = wrapped.call(input(&[], &[])).await.unwrap_err();
        assert_eq!(err.to_string(), "store locked");
        assert!(err.downcast_ref::<PipelineError>().is_none());

        assert!(pipeline.notifier().drain(Duration::from_secs(5)).await);
        assert!(marker.exists());
        assert!(!postexec_marker.exists());
    }

    #[tokio::test]
    async fn test_notify_does_not_block_or_fail_the_command() {
        let dir = tempdir().unwrap();
        let notify = create_test_script(&dir, "slow-fail.sh", "#!/bin/sh\nsleep 1\nexit 1\n");
        let hooks = vec![HookDescriptor::user("todo.add", Stage::Notify, &notify)];
        let pipeline = pipeline(&dir, hooks);
        let wrapped = pipeline.wrap("todo.add", echo(Arc::new(AtomicUsize::new(0))));

        let started = Instant::now();
        let out = wrapped.call(input(&["x"], &[])).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(800));
        assert!(out.warnings.is_empty());
        assert_eq!(pipeline.notifier().in_flight(), 1);

        assert!(pipeline.notifier().drain(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_notify_receives_result() {
        let dir = tempdir().unwrap();
        let capture = dir.path().join("notify.json");
        let notify = create_test_script(
            &dir,
            "capture.sh",
            &format!("#!/bin/sh\ncat > {}\n", capture.display()),
        );
        let hooks = vec![HookDescriptor::user("todo.add", Stage::Notify, &notify)];
        let pipeline = pipeline(&dir, hooks);
        let wrapped = pipeline.wrap("todo.add", echo(Arc::new(AtomicUsize::new(0))));

        wrapped.call(input(&["milk"], &[])).await.unwrap();
        assert!(pipeline.notifier().drain(Duration::from_secs(5)).await);

        let raw = std::fs::read_to_string(&capture).unwrap();
        let envelope: Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(envelope["mode"], "notify");
        assert_eq!(envelope["context"]["result"]["args"][0], "milk");
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_grace() {
        let dir = tempdir().unwrap();
        let notify = create_test_script(&dir, "sleepy.sh", "#!/bin/sh\nexec sleep 5\n");
        let hooks = vec![HookDescriptor::user("todo.add", Stage::Notify, &notify)];
        let pipeline = pipeline(&dir, hooks);
        let wrapped = pipeline.wrap("todo.add", echo(Arc::new(AtomicUsize::new(0))));

        wrapped.call(input(&[], &[])).await.unwrap();
        let started = Instant::now();
        assert!(!pipeline.notifier().drain(Duration::from_millis(100)).await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
