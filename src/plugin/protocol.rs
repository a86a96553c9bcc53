//! JSON envelopes exchanged between the host and a hook process.
//!
//! The host writes exactly one [`Invocation`] to the child's stdin and closes
//! it. A transform hook answers with one [`Response`] on stdout (success) or on
//! stderr together with a non-zero exit (failure).

use crate::hooks::types::{Context, Mode, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Protocol version spoken by this host.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Lifecycle events sent outside the command pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    Init,
    Shutdown,
    Health,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Init => "init",
            LifecycleEvent::Shutdown => "shutdown",
            LifecycleEvent::Health => "health",
        }
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The payload of an invocation, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    Hook {
        stage: Stage,
        mode: Mode,
        context: Context,
    },
    Lifecycle {
        event: LifecycleEvent,
    },
    /// A custom command the plugin declared in its manifest
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        flags: BTreeMap<String, String>,
    },
}

/// Host → plugin envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub protocol_version: String,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Invocation {
    pub fn hook(stage: Stage, mode: Mode, context: Context) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            payload: Payload::Hook {
                stage,
                mode,
                context,
            },
        }
    }

    pub fn lifecycle(event: LifecycleEvent) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            payload: Payload::Lifecycle { event },
        }
    }

    pub fn command(
        command: impl Into<String>,
        args: Vec<String>,
        flags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            payload: Payload::Command {
                command: command.into(),
                args,
                flags,
            },
        }
    }

    /// Serialize as a single JSON document followed by a newline.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Plugin → host envelope, discriminated by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Context>,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl Response {
    pub fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Whether a plugin declaring `version` can talk to this host.
///
/// Only the major component is compared.
pub fn is_compatible(version: &str) -> bool {
    match (major(version), major(PROTOCOL_VERSION)) {
        (Some(theirs), Some(ours)) => theirs == ours,
        _ => false,
    }
}

fn major(version: &str) -> Option<u64> {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .next()
        .and_then(|m| m.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_context() -> Context {
        Context::new(
            "todo.add",
            vec!["buy milk".to_string()],
            BTreeMap::from([("priority".to_string(), "high".to_string())]),
        )
    }

    #[test]
    fn test_hook_envelope_shape() {
        let inv = Invocation::hook(Stage::Preexec, Mode::Transform, sample_context());
        let value = serde_json::to_value(&inv).unwrap();

        assert_eq!(value["protocol_version"], "1.0.0");
        assert_eq!(value["type"], "hook");
        assert_eq!(value["stage"], "preexec");
        assert_eq!(value["mode"], "transform");
        assert_eq!(value["context"]["command"], "todo.add");
        assert_eq!(value["context"]["flags"]["priority"], "high");
        assert!(value["context"]["result"].is_null());
        assert!(value.get("event").is_none());
    }

    #[test]
    fn test_lifecycle_envelope_omits_context() {
        let inv = Invocation::lifecycle(LifecycleEvent::Health);
        let value = serde_json::to_value(&inv).unwrap();

        assert_eq!(
            value,
            json!({"protocol_version": "1.0.0", "type": "lifecycle", "event": "health"})
        );
    }

    #[test]
    fn test_command_envelope_shape() {
        let inv = Invocation::command(
            "sync",
            vec!["inbox".to_string()],
            BTreeMap::from([("dry-run".to_string(), "true".to_string())]),
        );
        let value = serde_json::to_value(&inv).unwrap();

        assert_eq!(
            value,
            json!({
                "protocol_version": "1.0.0",
                "type": "command",
                "command": "sync",
                "args": ["inbox"],
                "flags": {"dry-run": "true"}
            })
        );

        let decoded: Invocation =
            serde_json::from_str(r#"{"protocol_version":"1.0.0","type":"command","command":"sync"}"#)
                .unwrap();
        assert_eq!(
            decoded.payload,
            Payload::Command {
                command: "sync".into(),
                args: vec![],
                flags: BTreeMap::new(),
            }
        );
    }

    #[test]
    fn test_encode_is_one_line() {
        let bytes = Invocation::lifecycle(LifecycleEvent::Init).encode().unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn test_context_survives_invocation_and_response() {
        let ctx = sample_context().with_result(json!({"id": 7}));
        let encoded = Invocation::hook(Stage::Postexec, Mode::Transform, ctx.clone())
            .encode()
            .unwrap();
        let decoded: Invocation = serde_json::from_slice(&encoded).unwrap();
        let Payload::Hook { context, .. } = decoded.payload else {
            panic!("expected hook payload");
        };

        let reply = serde_json::to_vec(&Response::Ok {
            context: Some(context),
        })
        .unwrap();
        match Response::parse(&reply).unwrap() {
            Response::Ok { context: Some(back) } => assert_eq!(back, ctx),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_parse_ok_without_context() {
        let resp = Response::parse(br#"{"status":"ok"}"#).unwrap();
        assert_eq!(resp, Response::Ok { context: None });
    }

    #[test]
    fn test_parse_error_envelope() {
        let resp =
            Response::parse(br#"{"status":"error","error":"no tags","code":"NO_TAGS"}"#).unwrap();
        assert_eq!(
            resp,
            Response::Error {
                error: "no tags".into(),
                code: Some("NO_TAGS".into())
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_status_and_missing_fields() {
        assert!(Response::parse(br#"{"status":"maybe"}"#).is_err());
        assert!(Response::parse(br#"{"status":"error"}"#).is_err());
        assert!(Response::parse(br#"{"context":{}}"#).is_err());
        assert!(Response::parse(b"not json").is_err());
    }

    #[test]
    fn test_protocol_compatibility_checks_major_only() {
        assert!(is_compatible("1.0.0"));
        assert!(is_compatible("1.4.2"));
        assert!(is_compatible("1"));
        assert!(!is_compatible("2.0.0"));
        assert!(!is_compatible("0.9.0"));
        assert!(!is_compatible(""));
        assert!(!is_compatible("one"));
    }
}
