//! Process-wide resource ceilings.
//!
//! Applied exactly once at startup, before any submitted code runs, and never
//! relaxed or tightened afterwards. There is no restore operation: the
//! process-per-execution model means the limits die with the process.
//!
//! The OS ceilings are the hard backstop; the evaluator's allocation
//! accounting (see `sandbox::eval`) is what turns a memory overrun into a
//! reportable result instead of an abort.

use std::time::Duration;

use crate::error::SandboxError;

/// Virtual memory ceiling for the whole process.
pub const MAX_MEMORY_BYTES: u64 = 256 * 1024 * 1024; // 256 MiB

/// CPU-time ceiling for the whole process.
pub const MAX_CPU_SECONDS: u64 = 60;

/// Wall-clock ceiling enforced by the timeout supervisor.
pub const MAX_WALL_CLOCK: Duration = Duration::from_secs(120);

/// The fixed ceilings applied to a sandbox process. Not configurable via any
/// flag or environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCeilings {
    pub memory_bytes: u64,
    pub cpu_seconds: u64,
    pub wall_clock: Duration,
}

impl Default for ResourceCeilings {
    fn default() -> Self {
        Self {
            memory_bytes: MAX_MEMORY_BYTES,
            cpu_seconds: MAX_CPU_SECONDS,
            wall_clock: MAX_WALL_CLOCK,
        }
    }
}

/// Apply the memory and CPU ceilings to the current process.
///
/// Irreversible for the process lifetime. Failure is fatal for the runner:
/// executing unrestricted code would silently void the containment
/// guarantee, so the caller must abort instead.
#[cfg(unix)]
pub fn apply_process_limits(ceilings: &ResourceCeilings) -> Result<(), SandboxError> {
    unsafe {
        let mem = libc::rlimit {
            rlim_cur: ceilings.memory_bytes as libc::rlim_t,
            rlim_max: ceilings.memory_bytes as libc::rlim_t,
        };
        if libc::setrlimit(libc::RLIMIT_AS, &mem) != 0 {
            return Err(limiter_error("RLIMIT_AS"));
        }

        let cpu = libc::rlimit {
            rlim_cur: ceilings.cpu_seconds as libc::rlim_t,
            rlim_max: ceilings.cpu_seconds as libc::rlim_t,
        };
        if libc::setrlimit(libc::RLIMIT_CPU, &cpu) != 0 {
            return Err(limiter_error("RLIMIT_CPU"));
        }

        // No core dumps of untrusted address space.
        let core = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if libc::setrlimit(libc::RLIMIT_CORE, &core) != 0 {
            return Err(limiter_error("RLIMIT_CORE"));
        }
    }

    tracing::debug!(
        memory_bytes = ceilings.memory_bytes,
        cpu_seconds = ceilings.cpu_seconds,
        "process resource ceilings applied"
    );
    Ok(())
}

/// Non-Unix targets cannot apply the ceilings; fail closed.
#[cfg(not(unix))]
pub fn apply_process_limits(_ceilings: &ResourceCeilings) -> Result<(), SandboxError> {
    Err(SandboxError::Limiter(
        "process resource ceilings are not supported on this platform".to_string(),
    ))
}

#[cfg(unix)]
fn limiter_error(resource: &str) -> SandboxError {
    SandboxError::Limiter(format!("{resource}: {}", std::io::Error::last_os_error()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // apply_process_limits is exercised only in the spawned runner process;
    // calling it here would cap the whole test harness.

    #[test]
    fn ceilings_default_to_fixed_constants() {
        let ceilings = ResourceCeilings::default();
        assert_eq!(ceilings.memory_bytes, 256 * 1024 * 1024);
        assert_eq!(ceilings.cpu_seconds, 60);
        assert_eq!(ceilings.wall_clock, Duration::from_secs(120));
    }

    #[test]
    fn wall_clock_exceeds_cpu_ceiling() {
        // The supervisor must not fire before the CPU ceiling can.
        let ceilings = ResourceCeilings::default();
        assert!(ceilings.wall_clock.as_secs() > ceilings.cpu_seconds);
    }
}
