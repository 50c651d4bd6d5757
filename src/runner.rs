//! Execution pipeline for a decoded request.
//!
//! `execute_request` drives compile, top-level evaluation and entry-point
//! invocation, folding every fault into the response envelope. The process
//! never reports a failing exit status for a fault that was successfully
//! reported in the envelope; the caller decides exit codes from the decode
//! and limiter stages alone.

use tracing::{debug, info};

use crate::entry;
use crate::error::SandboxError;
use crate::limits;
use crate::protocol::{ExecutionRequest, ExecutionResult};
use crate::sandbox::{compile_restricted, EvalBudget, Interpreter};
use crate::watchdog;

/// Run one request to completion under the given budget.
pub fn execute_request(request: &ExecutionRequest, budget: EvalBudget) -> ExecutionResult {
    let unit = match compile_restricted(&request.source) {
        Ok(unit) => unit,
        Err(err) => {
            info!(kind = err.kind(), "compilation rejected");
            return ExecutionResult::from_error(&err);
        }
    };

    let mut interp = Interpreter::new(budget);
    if let Err(err) = interp.exec_program(&unit) {
        info!(kind = err.kind(), "top-level execution failed");
        return ExecutionResult::from_error(&err);
    }

    let outcome = entry::resolve_and_invoke(&mut interp, &request.params);

    if !interp.printed().is_empty() {
        debug!(output = interp.printed(), "captured tool output");
    }

    match outcome {
        Ok(result) => {
            info!("execution finished");
            ExecutionResult::success(result)
        }
        Err(err) => {
            info!(kind = err.kind(), "entry invocation failed");
            ExecutionResult::from_error(&err)
        }
    }
}

/// Run one request under the full production ceilings, with the watchdog
/// armed for the wall-clock budget. The watchdog emits the timeout envelope
/// and exits on its own if evaluation wedges past the deadline.
pub fn run_supervised(request: &ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
    let _guard = watchdog::arm(limits::MAX_WALL_CLOCK)?;
    Ok(execute_request(request, EvalBudget::standard()))
}
