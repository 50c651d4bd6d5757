//! Wire format for the request/result envelope.
//!
//! One JSON object is read from stdin and one is written to stdout per
//! process invocation. Nothing else may appear on either stream.
//!
//! # Security
//! - Request size is checked BEFORE parsing to prevent allocation attacks.
//! - The result envelope carries exactly one of `result` or `error`; raw
//!   faults or stack traces are never exposed to the caller.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SandboxError;

/// Maximum accepted request envelope size.
pub const MAX_REQUEST_SIZE: usize = 16 * 1024 * 1024; // 16 MB

/// Raw envelope as it appears on the wire.
#[derive(Debug, Clone, Deserialize)]
struct RequestEnvelope {
    /// Base64-encoded source text.
    code: String,
    /// Named arguments for the entry operation.
    #[serde(default)]
    params: serde_json::Map<String, Value>,
}

/// A decoded execution request. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Submitted source text, decoded and UTF-8 validated.
    pub source: String,
    /// Named arguments for the entry operation.
    pub params: serde_json::Map<String, Value>,
}

/// Result envelope written to stdout.
///
/// Exactly one of `result` / `error` is present, matching `ok`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn from_error(err: &SandboxError) -> Self {
        Self::failure(err.to_string())
    }
}

/// Decode the request envelope.
///
/// Size check happens before the JSON parse; the base64 payload must decode
/// to valid UTF-8 source text.
pub fn decode_request(bytes: &[u8]) -> Result<ExecutionRequest, SandboxError> {
    if bytes.len() > MAX_REQUEST_SIZE {
        return Err(SandboxError::Protocol(format!(
            "request too large: {} bytes (max {})",
            bytes.len(),
            MAX_REQUEST_SIZE
        )));
    }

    let envelope: RequestEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| SandboxError::Protocol(format!("malformed request: {e}")))?;

    let raw = base64::engine::general_purpose::STANDARD
        .decode(envelope.code.as_bytes())
        .map_err(|e| SandboxError::Protocol(format!("invalid code encoding: {e}")))?;

    let source = String::from_utf8(raw)
        .map_err(|_| SandboxError::Protocol("code is not valid UTF-8".to_string()))?;

    Ok(ExecutionRequest {
        source,
        params: envelope.params,
    })
}

/// Encode the result envelope.
///
/// The envelope holds only JSON-native values, so serialization cannot fail
/// for well-formed results; a fallback envelope covers the remaining cases
/// (e.g. non-finite floats smuggled into `result`).
pub fn encode_result(result: &ExecutionResult) -> Vec<u8> {
    serde_json::to_vec(result)
        .unwrap_or_else(|_| br#"{"ok":false,"error":"result encoding failed"}"#.to_vec())
}
