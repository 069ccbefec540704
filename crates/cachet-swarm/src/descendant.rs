use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use cachet_store::validate_segment;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SwarmError, SwarmResult};
use crate::process::{process_is_alive, start_time_with_retry, ProcessProbe, Signal};

const TERMINATE_POLL: Duration = Duration::from_millis(20);

/// A process instance: its id plus its start time.
///
/// Process ids are recycled by the OS; the start time tells two holders of
/// the same id apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub process_id: u32,
    pub start_time: i64,
}

impl ProcessIdentity {
    /// Validate `process_id` and `start_time` against the probe's boot-time
    /// window.
    pub fn new(process_id: u32, start_time: i64, probe: &dyn ProcessProbe) -> SwarmResult<Self> {
        Self::validated("process_id", "process_start_time", process_id, start_time, probe)
    }

    fn validated(
        id_name: &'static str,
        time_name: &'static str,
        process_id: u32,
        start_time: i64,
        probe: &dyn ProcessProbe,
    ) -> SwarmResult<Self> {
        if process_id == 0 || i32::try_from(process_id).is_err() {
            return Err(SwarmError::InvalidProcessId {
                name: id_name,
                value: i64::from(process_id),
            });
        }
        let (min, max) = probe.start_time_window();
        if start_time < min || start_time > max {
            return Err(SwarmError::StartTimeOutOfWindow {
                name: time_name,
                value: start_time,
                min,
                max,
            });
        }
        Ok(Self {
            process_id,
            start_time,
        })
    }

    /// Identity of the calling process.
    pub fn current(probe: &dyn ProcessProbe) -> SwarmResult<Self> {
        let pid = std::process::id();
        let start_time = start_time_with_retry(probe, pid, 5, Duration::from_millis(10))?;
        Self::new(pid, start_time, probe)
    }

    pub fn is_alive(&self, probe: &dyn ProcessProbe) -> bool {
        process_is_alive(probe, self.process_id, self.start_time)
    }

    /// Stop this process: `SIGTERM`, wait up to `timeout`, then `SIGKILL`
    /// and wait again.
    ///
    /// A process that is already gone, or whose id now belongs to another
    /// process, is left alone.
    pub fn terminate(&self, probe: &dyn ProcessProbe, timeout: Duration) -> SwarmResult<()> {
        if !self.is_alive(probe) {
            return Ok(());
        }
        for signal in [Signal::Terminate, Signal::Kill] {
            if !probe.signal(self.process_id, signal)? {
                return Ok(());
            }
            if self.wait_for_exit(probe, timeout) {
                debug!(pid = self.process_id, ?signal, "process exited");
                return Ok(());
            }
        }
        warn!(pid = self.process_id, "process survived SIGKILL");
        Ok(())
    }

    fn wait_for_exit(&self, probe: &dyn ProcessProbe, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive(probe) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(TERMINATE_POLL.min(timeout));
        }
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.process_id, self.start_time)
    }
}

/// Liveness record of a process spawned on behalf of an ancestor.
///
/// A descendant counts as alive only while its ancestor is alive too, so
/// the claims of orphaned workers can be reclaimed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DescendantProcessInfo {
    process_id: u32,
    process_start_time: i64,
    ancestor_process_id: u32,
    ancestor_process_start_time: i64,
    process_type: String,
}

impl DescendantProcessInfo {
    pub fn new(
        descendant: ProcessIdentity,
        ancestor: ProcessIdentity,
        process_type: impl Into<String>,
        probe: &dyn ProcessProbe,
    ) -> SwarmResult<Self> {
        // Re-validate: the identities may have been deserialized.
        ProcessIdentity::validated(
            "process_id",
            "process_start_time",
            descendant.process_id,
            descendant.start_time,
            probe,
        )?;
        ProcessIdentity::validated(
            "ancestor_process_id",
            "ancestor_process_start_time",
            ancestor.process_id,
            ancestor.start_time,
            probe,
        )?;
        let process_type = process_type.into();
        validate_process_type(&process_type)?;
        Ok(Self {
            process_id: descendant.process_id,
            process_start_time: descendant.start_time,
            ancestor_process_id: ancestor.process_id,
            ancestor_process_start_time: ancestor.start_time,
            process_type,
        })
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn process_start_time(&self) -> i64 {
        self.process_start_time
    }

    pub fn ancestor_process_id(&self) -> u32 {
        self.ancestor_process_id
    }

    pub fn ancestor_process_start_time(&self) -> i64 {
        self.ancestor_process_start_time
    }

    pub fn process_type(&self) -> &str {
        &self.process_type
    }

    pub fn identity(&self) -> ProcessIdentity {
        ProcessIdentity {
            process_id: self.process_id,
            start_time: self.process_start_time,
        }
    }

    pub fn ancestor(&self) -> ProcessIdentity {
        ProcessIdentity {
            process_id: self.ancestor_process_id,
            start_time: self.ancestor_process_start_time,
        }
    }

    /// Both this process and its ancestor are running.
    pub fn is_alive(&self, probe: &dyn ProcessProbe) -> bool {
        self.identity().is_alive(probe) && self.ancestor().is_alive(probe)
    }

    pub fn terminate(&self, probe: &dyn ProcessProbe, timeout: Duration) -> SwarmResult<()> {
        self.identity().terminate(probe, timeout)
    }
}

/// Process types become store key segments.
pub fn validate_process_type(process_type: &str) -> SwarmResult<()> {
    if process_type.is_empty() {
        return Err(SwarmError::InvalidProcessType {
            value: String::new(),
            reason: "process type cannot be empty".into(),
        });
    }
    validate_segment(process_type).map_err(|e| SwarmError::InvalidProcessType {
        value: process_type.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::*;
    use crate::process::BOOT_TIME_SKEW_SECONDS;

    fn identity(probe: &FakeProbe, pid: u32, start: i64) -> ProcessIdentity {
        ProcessIdentity::new(pid, start, probe).unwrap()
    }

    // ---- validation ----

    #[test]
    fn zero_pid_is_rejected() {
        let probe = FakeProbe::default();
        let err = ProcessIdentity::new(0, BOOT, &probe).unwrap_err();
        assert!(matches!(err, SwarmError::InvalidProcessId { .. }));
        assert_eq!(err.kind(), cachet_types::ErrorKind::Validation);
    }

    #[test]
    fn start_time_window_is_enforced() {
        let probe = FakeProbe::default();
        assert!(ProcessIdentity::new(1, BOOT - BOOT_TIME_SKEW_SECONDS, &probe).is_ok());
        assert!(ProcessIdentity::new(1, NOW + BOOT_TIME_SKEW_SECONDS, &probe).is_ok());
        assert!(matches!(
            ProcessIdentity::new(1, BOOT - BOOT_TIME_SKEW_SECONDS - 1, &probe),
            Err(SwarmError::StartTimeOutOfWindow { .. })
        ));
        assert!(matches!(
            ProcessIdentity::new(1, NOW + BOOT_TIME_SKEW_SECONDS + 1, &probe),
            Err(SwarmError::StartTimeOutOfWindow { .. })
        ));
    }

    #[test]
    fn process_type_must_be_a_plain_label() {
        let probe = FakeProbe::default();
        let me = identity(&probe, 10, BOOT);
        let parent = identity(&probe, 1, BOOT);
        assert!(DescendantProcessInfo::new(me, parent, "worker", &probe).is_ok());
        for bad in ["", "a/b", "with space", ".."] {
            assert!(
                matches!(
                    DescendantProcessInfo::new(me, parent, bad, &probe),
                    Err(SwarmError::InvalidProcessType { .. })
                ),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn deserialized_identity_is_revalidated() {
        let probe = FakeProbe::default();
        let parent = identity(&probe, 1, BOOT);
        let forged: ProcessIdentity =
            serde_json::from_str(r#"{"process_id":0,"start_time":1}"#).unwrap();
        assert!(DescendantProcessInfo::new(forged, parent, "worker", &probe).is_err());
    }

    // ---- liveness ----

    #[test]
    fn descendant_alive_only_with_live_ancestor() {
        let probe = FakeProbe::default();
        probe.spawn(1, BOOT);
        probe.spawn(10, BOOT + 5);
        let info = DescendantProcessInfo::new(
            identity(&probe, 10, BOOT + 5),
            identity(&probe, 1, BOOT),
            "worker",
            &probe,
        )
        .unwrap();
        assert!(info.is_alive(&probe));

        probe.exit(1);
        assert!(info.identity().is_alive(&probe));
        assert!(!info.is_alive(&probe));
    }

    #[test]
    fn pid_reuse_is_detected() {
        let probe = FakeProbe::default();
        probe.spawn(10, BOOT + 5);
        let original = identity(&probe, 10, BOOT + 5);
        probe.exit(10);
        probe.spawn(10, BOOT + 900);
        assert!(!original.is_alive(&probe));
    }

    // ---- termination ----

    #[test]
    fn terminate_sends_sigterm_first() {
        let probe = FakeProbe::default();
        probe.spawn(10, BOOT);
        let target = identity(&probe, 10, BOOT);
        target.terminate(&probe, Duration::from_millis(50)).unwrap();
        assert!(!target.is_alive(&probe));
        assert_eq!(
            *probe.signals.lock().unwrap(),
            vec![(10, Signal::Terminate)]
        );
    }

    #[test]
    fn terminate_escalates_to_sigkill() {
        let probe = FakeProbe::default();
        probe.spawn(10, BOOT);
        probe.ignore_terminate(10);
        let target = identity(&probe, 10, BOOT);
        target.terminate(&probe, Duration::from_millis(30)).unwrap();
        assert!(!target.is_alive(&probe));
        assert_eq!(
            *probe.signals.lock().unwrap(),
            vec![(10, Signal::Terminate), (10, Signal::Kill)]
        );
    }

    #[test]
    fn terminating_dead_or_reused_process_is_a_no_op() {
        let probe = FakeProbe::default();
        let gone = identity(&probe, 10, BOOT);
        gone.terminate(&probe, Duration::from_millis(10)).unwrap();

        probe.spawn(10, BOOT + 77);
        gone.terminate(&probe, Duration::from_millis(10)).unwrap();
        assert!(probe.signals.lock().unwrap().is_empty());
        assert!(probe.inspect(10).is_some());
    }
}
