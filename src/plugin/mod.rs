//! Out-of-process plugins.
//!
//! A plugin is an executable in `<data_dir>/plugins/<name>/` described by a
//! `hookline-plugin.toml` manifest. The host talks to it one process per
//! invocation: a single JSON envelope on stdin, a single response on stdout or
//! stderr.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `protocol` | invocation and response envelopes, version compatibility |
//! | `manifest` | manifest parsing, discovery, permission-filtered environment |
//! | `invoker` | spawning, deadlines, response interpretation, plugin commands, auditing |
//! | `lifecycle` | `init`/`shutdown` broadcast and `health` checks |

pub mod invoker;
pub mod lifecycle;
pub mod manifest;
pub mod protocol;

pub use invoker::{LifecycleReply, PluginInvoker};
pub use lifecycle::{HealthReport, broadcast, health};
pub use manifest::{InstalledPlugin, Manifest, Permissions, discover_plugins};
pub use protocol::{Invocation, LifecycleEvent, PROTOCOL_VERSION, Response};
