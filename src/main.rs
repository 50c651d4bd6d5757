//! Tool sandbox entry point.
//!
//! One-shot pipeline: read a single JSON request from stdin, apply the
//! process resource ceilings, execute the code under watchdog supervision,
//! write exactly one response envelope to stdout and exit.
//!
//! ## Exit codes
//!
//! - `0` - an envelope was produced, whether `ok` is true or false
//! - `1` - the request could not be decoded at all
//! - `2` - a resource ceiling could not be applied; running unconfined is
//!   not an option

use std::io::{Read, Write};
use std::process::ExitCode;

use tracing::error;

use tool_sandbox::limits::{self, ResourceCeilings};
use tool_sandbox::logging::{init_logging, LogConfig};
use tool_sandbox::protocol::{self, ExecutionResult, MAX_REQUEST_SIZE};
use tool_sandbox::runner;

fn main() -> ExitCode {
    if let Err(e) = init_logging(&LogConfig::from_env()) {
        eprintln!("logging initialization failed: {e}");
    }

    let mut raw = Vec::new();
    let read = std::io::stdin()
        .lock()
        .take(MAX_REQUEST_SIZE as u64 + 1)
        .read_to_end(&mut raw);
    if let Err(e) = read {
        emit(&ExecutionResult::failure(format!(
            "Runner error: stdin read failed: {e}"
        )));
        return ExitCode::FAILURE;
    }

    let request = match protocol::decode_request(&raw) {
        Ok(request) => request,
        Err(err) => {
            error!(kind = err.kind(), "request rejected");
            emit(&ExecutionResult::failure(format!("Runner error: {err}")));
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = limits::apply_process_limits(&ResourceCeilings::default()) {
        error!(kind = err.kind(), "aborting before execution");
        emit(&ExecutionResult::from_error(&err));
        return ExitCode::from(2);
    }

    match runner::run_supervised(&request) {
        Ok(result) => {
            emit(&result);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(kind = err.kind(), "supervision could not be established");
            emit(&ExecutionResult::from_error(&err));
            ExitCode::from(2)
        }
    }
}

fn emit(result: &ExecutionResult) {
    let mut stdout = std::io::stdout().lock();
    let mut bytes = protocol::encode_result(result);
    bytes.push(b'\n');
    // Nothing sensible left to do if stdout itself is gone.
    let _ = stdout.write_all(&bytes);
    let _ = stdout.flush();
}
