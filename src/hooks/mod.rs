//! Hook dispatch pipeline.
//!
//! Hooks let external programs observe and modify a command invocation
//! without the host loading any of their code. Each hook is bound to one
//! command at one stage:
//!
//! # Stages
//!
//! - `prevalidate` - rewrite or reject the raw arguments (transform)
//! - `preexec` - last chance to rewrite or reject before the handler (transform)
//! - `postexec` - rewrite the handler's result; failures only warn (transform)
//! - `notify` - fire-and-forget observers (notify)
//!
//! # Sources
//!
//! - **User hooks**: `[[hooks]]` in `hookline.toml`, then executable scripts
//!   in `<config_dir>/hooks/` named `<command>.<stage>[.<ext>]`.
//! - **Plugin hooks**: `[[hooks]]` in an installed plugin's manifest.
//!
//! User hooks run before plugin hooks for the same stage.
//!
//! # Usage
//!
//! ```ignore
//! use hookline::hooks::{CommandPipeline, HookRegistry, handler_fn, CommandOutput};
//!
//! let build = HookRegistry::build(user_hooks, plugin_hooks);
//! let pipeline = CommandPipeline::new(Arc::new(build.registry), invoker);
//!
//! let add = pipeline.wrap("todo.add", handler_fn(|input| async move {
//!     Ok(CommandOutput::new(json!({ "title": input.args.join(" ") })))
//! }));
//! let output = add.call(input).await?;
//! ```

pub mod discover;
pub mod pipeline;
pub mod registry;
pub mod types;

pub use discover::{create_hook_script, discover_user_hooks, test_hook};
pub use pipeline::{
    CommandHandler, CommandInput, CommandOutput, CommandPipeline, HookWarning, NotifyDispatcher,
    WrappedCommand, handler_fn,
};
pub use registry::{HookRegistry, RegistryBuild};
pub use types::{Context, HookDescriptor, HookSource, Mode, Stage};
