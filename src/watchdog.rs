//! Wall-clock timeout supervision.
//!
//! The evaluator polls its own deadline and normally unwinds with a timeout
//! error well before the supervisor acts. The watchdog is the preemptive
//! backstop for the pathological cases where the executing thread can no
//! longer service its own deadline: a separate thread that, past the grace
//! window, emits the timeout envelope itself and terminates the process.
//!
//! One execution per process lifetime; re-arming while armed is a caller bug.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use crate::error::SandboxError;
use crate::protocol::{self, ExecutionResult};

/// Extra wall time granted beyond the in-band deadline before the watchdog
/// forcibly terminates the process.
const GRACE: Duration = Duration::from_secs(2);

static ARMED: AtomicBool = AtomicBool::new(false);

/// Scoped disarm handle. Dropping the guard disarms the watchdog; this runs
/// on every exit path of the execution, success or fault.
pub struct WatchdogGuard {
    disarm: Sender<()>,
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        // The supervisor thread also treats a disconnected channel as disarm.
        let _ = self.disarm.send(());
        ARMED.store(false, Ordering::SeqCst);
    }
}

/// Arm the watchdog for one execution.
///
/// If the guard is not dropped within `wall_budget` plus the grace window,
/// the supervisor thread writes the timeout envelope to stdout and exits the
/// process with code 0 (a parseable envelope was produced).
pub fn arm(wall_budget: Duration) -> Result<WatchdogGuard, SandboxError> {
    let was_armed = ARMED.swap(true, Ordering::SeqCst);
    assert!(!was_armed, "watchdog re-armed while an execution is in flight");

    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("sandbox-watchdog".to_string())
        .spawn(move || match rx.recv_timeout(wall_budget + GRACE) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!(
                    budget_secs = wall_budget.as_secs(),
                    "execution failed to honor its deadline; terminating"
                );
                let envelope =
                    protocol::encode_result(&ExecutionResult::from_error(&SandboxError::Timeout));
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(&envelope);
                let _ = stdout.write_all(b"\n");
                let _ = stdout.flush();
                std::process::exit(0);
            }
        });

    match spawned {
        Ok(_) => Ok(WatchdogGuard { disarm: tx }),
        Err(e) => {
            ARMED.store(false, Ordering::SeqCst);
            // Without the supervisor the wall-clock ceiling is unenforceable;
            // same fail-closed class as a refused rlimit.
            Err(SandboxError::Limiter(format!(
                "watchdog thread could not be spawned: {e}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test: the ARMED flag is process-global, so sequential arm/disarm
    // cycles must live in one test body.
    #[test]
    fn arm_disarm_lifecycle() {
        let guard = arm(Duration::from_secs(60)).unwrap();
        drop(guard);

        // Re-arming after a clean disarm is fine.
        let guard = arm(Duration::from_secs(60)).unwrap();
        drop(guard);

        // A disarmed watchdog must not fire even past a tiny budget.
        let guard = arm(Duration::from_millis(10)).unwrap();
        drop(guard);
        thread::sleep(Duration::from_millis(50));
    }
}
