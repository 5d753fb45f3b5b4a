//! Shared types between the Quarry supervisor and its compiler worker
//!
//! These types are used by both:
//! - the runtime supervisor (`quarry-runtime`)
//! - the worker-side RPC endpoint embedded in the compiler worker
//!
//! Serializable with serde for line-delimited JSON over the worker channel.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// RPC frames
// ============================================================================

/// One request on the worker channel.
///
/// Operations are addressed as `(namespace, operation, args)` triples; the
/// `id` correlates the response frame back to the issuing caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestFrame {
    pub id: u64,
    pub ns: String,
    pub op: String,
    pub args: Vec<serde_json::Value>,
}

/// One response on the worker channel.
///
/// Exactly one of `ok` / `error` is set. Application-level remote errors and
/// worker-side dispatch failures both arrive through `error`; the supervisor
/// does not distinguish them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseFrame {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseFrame {
    pub fn ok(id: u64, value: serde_json::Value) -> Self {
        Self {
            id,
            ok: Some(value),
            error: None,
        }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: None,
            error: Some(message.into()),
        }
    }
}

/// A fully-qualified remote operation descriptor with an argument list.
///
/// The public face of [`RequestFrame`]: callers build these, the channel
/// assigns the request id.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub ns: String,
    pub op: String,
    pub args: Vec<serde_json::Value>,
}

impl CallRequest {
    pub fn new(
        ns: impl Into<String>,
        op: impl Into<String>,
        args: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            ns: ns.into(),
            op: op.into(),
            args,
        }
    }
}

// ============================================================================
// Compiler results
// ============================================================================

/// Severity of a compiler diagnostic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

/// Source position. Column and token metadata are retained by the worker's
/// parser options, so both fields are always populated for worker-produced
/// diagnostics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// One compiler diagnostic, as reported by the worker's `compile` entry
/// point and fanned out to extension subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diagnostic {
    pub file: String,
    pub severity: Severity,
    pub message: String,
    pub position: Position,
}

/// The result of one worker compile run. The supervisor discards the
/// artifacts and only propagates the diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompileReport {
    #[serde(default)]
    pub artifacts: serde_json::Value,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

// ============================================================================
// Parent identity
// ============================================================================

/// Identity of the process that owns a worker.
///
/// Passed to the worker at spawn time (base64-encoded through the
/// environment) and again as the first RPC call on every new connection, so
/// the worker can validate who it is talking to before accepting any other
/// call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentIdentity {
    /// Human-readable owner name, e.g. the supervisor's instance name.
    pub name: String,
    /// OS process id of the owner.
    pub pid: u32,
    /// Per-launch nonce; the worker rejects attach calls whose nonce does
    /// not match the one it was spawned with.
    pub nonce: String,
    /// When the owner generated this identity.
    pub launched_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid base64 in encoded identity: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid identity payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ParentIdentity {
    pub fn new(name: impl Into<String>, pid: u32) -> Self {
        Self {
            name: name.into(),
            pid,
            nonce: ulid::Ulid::new().to_string(),
            launched_at: Utc::now(),
        }
    }

    /// Encode for transport through an environment string.
    pub fn encode(&self) -> String {
        // serde_json cannot fail on this struct; fall back to an empty
        // object rather than panicking in the launcher path.
        let raw = serde_json::to_vec(self).unwrap_or_else(|_| b"{}".to_vec());
        base64::engine::general_purpose::STANDARD.encode(raw)
    }

    /// Decode a value produced by [`ParentIdentity::encode`].
    pub fn decode(encoded: &str) -> Result<Self, IdentityError> {
        let raw = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// The JSON payload sent in the `runtime/attach` bootstrap call.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
