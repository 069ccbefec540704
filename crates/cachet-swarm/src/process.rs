use std::thread;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::debug;

use crate::error::{SwarmError, SwarmResult};

/// How far a start time may lie outside `[boot time, now]` and still be
/// accepted, in seconds. Absorbs clock adjustments since boot.
pub const BOOT_TIME_SKEW_SECONDS: i64 = 86_400;

/// What the operating system reports about a live process id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessStatus {
    /// Unix timestamp, whole seconds.
    pub start_time: i64,
    /// `false` for zombies and processes that are being torn down.
    pub running: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

/// Operating-system view used for liveness checks.
pub trait ProcessProbe: Send + Sync {
    /// Status of `pid`, or `None` if no such process exists or it cannot be
    /// inspected.
    fn inspect(&self, pid: u32) -> Option<ProcessStatus>;

    /// System boot time as a unix timestamp.
    fn boot_time(&self) -> i64;

    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }

    /// Deliver `signal` to `pid`. Returns `false` if the process no longer
    /// exists.
    fn signal(&self, pid: u32, signal: Signal) -> SwarmResult<bool>;

    /// Accepted start times: `[boot - skew, now + skew]`.
    fn start_time_window(&self) -> (i64, i64) {
        (
            self.boot_time() - BOOT_TIME_SKEW_SECONDS,
            self.now() + BOOT_TIME_SKEW_SECONDS,
        )
    }
}

/// Whether the process `pid` that started at `start_time` is still running.
///
/// A live process under the same id but with another start time is a
/// different process that reused the id, and yields `false`.
pub fn process_is_alive(probe: &dyn ProcessProbe, pid: u32, start_time: i64) -> bool {
    if pid == 0 {
        return false;
    }
    let (min, max) = probe.start_time_window();
    if start_time < min || start_time > max {
        return false;
    }
    matches!(
        probe.inspect(pid),
        Some(status) if status.start_time == start_time && status.running
    )
}

/// Read the start time of a freshly spawned process, retrying with jittered
/// exponential backoff while the OS catches up.
pub fn start_time_with_retry(
    probe: &dyn ProcessProbe,
    pid: u32,
    max_retries: u32,
    base_delay: Duration,
) -> SwarmResult<i64> {
    let mut delay = Duration::ZERO;
    let mut rng = rand::thread_rng();
    for attempt in 0..max_retries {
        if let Some(status) = probe.inspect(pid) {
            if status.start_time > 0 {
                return Ok(status.start_time);
            }
        }
        if attempt + 1 < max_retries {
            let factor = f64::from(1u32 << attempt.min(16)) * rng.gen_range(0.5..1.25);
            delay += base_delay.mul_f64(factor);
            debug!(
                pid,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "start time not yet readable"
            );
            thread::sleep(delay);
        }
    }
    Err(SwarmError::StartTimeUnavailable {
        pid,
        attempts: max_retries,
    })
}

/// Probe backed by `/proc` and `kill(2)`.
///
/// On platforms without `/proc`, every process is reported as unknown and
/// therefore not alive.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn inspect(&self, pid: u32) -> Option<ProcessStatus> {
        proc_fs::inspect(pid)
    }

    fn boot_time(&self) -> i64 {
        proc_fs::boot_time().unwrap_or(0)
    }

    #[cfg(unix)]
    fn signal(&self, pid: u32, signal: Signal) -> SwarmResult<bool> {
        let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
            return Ok(false);
        };
        if raw_pid <= 0 {
            return Ok(false);
        }
        let signo = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // SAFETY: kill(2) has no memory-safety preconditions.
        if unsafe { libc::kill(raw_pid, signo) } == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Ok(false),
            _ => Err(err.into()),
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, _pid: u32, _signal: Signal) -> SwarmResult<bool> {
        Ok(false)
    }
}

#[cfg(target_os = "linux")]
mod proc_fs {
    use std::fs;

    use super::ProcessStatus;

    pub(super) fn inspect(pid: u32) -> Option<ProcessStatus> {
        let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        // The command name is parenthesized and may itself contain spaces
        // or parentheses, so parse from the last ')'.
        let rest = &stat[stat.rfind(')')? + 1..];
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let state = *fields.first()?;
        // Field 22 of stat(5), counted from the state field (field 3).
        let start_ticks: u64 = fields.get(19)?.parse().ok()?;
        let ticks_per_second = clock_ticks_per_second()?;
        let boot = boot_time()?;
        Some(ProcessStatus {
            start_time: boot + (start_ticks / ticks_per_second) as i64,
            running: !matches!(state, "Z" | "X" | "x"),
        })
    }

    pub(super) fn boot_time() -> Option<i64> {
        let stat = fs::read_to_string("/proc/stat").ok()?;
        stat.lines()
            .find_map(|line| line.strip_prefix("btime "))
            .and_then(|value| value.trim().parse().ok())
    }

    fn clock_ticks_per_second() -> Option<u64> {
        // SAFETY: sysconf only reads a system constant.
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        u64::try_from(ticks).ok().filter(|t| *t > 0)
    }
}

#[cfg(not(target_os = "linux"))]
mod proc_fs {
    use super::ProcessStatus;

    pub(super) fn inspect(_pid: u32) -> Option<ProcessStatus> {
        None
    }

    pub(super) fn boot_time() -> Option<i64> {
        None
    }
}
