//! Tool entry-point discovery and invocation.
//!
//! A tool registers itself by leaving a global map named `tools` behind after
//! its top-level code runs. The map's `"run"` entry is the operation invoked
//! with the request parameters, bound by the function's declared parameter
//! names. Programs that register nothing still succeed with a fixed marker
//! string, so plain scripts remain usable for smoke checks.

use serde_json::Value as JsonValue;

use crate::error::SandboxError;
use crate::sandbox::value::Value;
use crate::sandbox::Interpreter;

/// Global binding a tool uses to register itself.
pub const ENTRY_OBJECT: &str = "tools";

/// Key inside the registration map that names the invocable operation.
pub const ENTRY_OPERATION: &str = "run";

/// Result reported when the program registered nothing.
pub const NO_TOOLS_RESULT: &str = "Code executed successfully";

/// Result reported when a registration exists but exposes no operation.
pub const TOOL_CREATED_RESULT: &str = "Tool instance created";

/// Locate the registered entry point in the program's global namespace and
/// invoke it with the request parameters.
pub fn resolve_and_invoke(
    interp: &mut Interpreter,
    params: &serde_json::Map<String, JsonValue>,
) -> Result<JsonValue, SandboxError> {
    let registration = match interp.global(ENTRY_OBJECT) {
        None => return Ok(JsonValue::String(NO_TOOLS_RESULT.to_string())),
        Some(value) => value.clone(),
    };

    let entries = match registration {
        Value::Map(entries) => entries,
        other => {
            return Err(SandboxError::EntryPoint(format!(
                "'{ENTRY_OBJECT}' must be a map, got {}",
                other.type_name()
            )))
        }
    };

    let callee = match entries.get(ENTRY_OPERATION) {
        None => return Ok(JsonValue::String(TOOL_CREATED_RESULT.to_string())),
        Some(value) => value.clone(),
    };

    let declared = match &callee {
        Value::Function(func) => func.params.clone(),
        other => {
            return Err(SandboxError::EntryPoint(format!(
                "entry '{ENTRY_OPERATION}' must be a fn, got {}",
                other.type_name()
            )))
        }
    };

    for name in params.keys() {
        if !declared.iter().any(|p| p == name) {
            return Err(SandboxError::EntryPoint(format!(
                "unexpected named argument '{name}'"
            )));
        }
    }

    let mut args = Vec::with_capacity(declared.len());
    for name in &declared {
        let json = params.get(name).ok_or_else(|| {
            SandboxError::EntryPoint(format!("missing named argument '{name}'"))
        })?;
        args.push(Value::from_json(json));
    }

    let result = interp.call_value(&callee, args).map_err(|err| match err {
        // Resource faults keep their own category even when raised inside
        // the entry point.
        SandboxError::Timeout | SandboxError::Memory => err,
        SandboxError::Runtime(msg) => SandboxError::EntryPoint(msg),
        other => other,
    })?;

    result.into_json()
}
