use std::sync::Arc;
use std::time::Duration;

use cachet_store::{KvStore, StoreKey, WriteOutcome};
use tracing::{debug, info, warn};

use crate::descendant::{validate_process_type, DescendantProcessInfo, ProcessIdentity};
use crate::error::SwarmResult;
use crate::process::ProcessProbe;

pub const PROCESSES_NAMESPACE: &str = "processes";

/// Registry of spawned processes, kept in the shared store so any process
/// can tell which workers are still around.
///
/// Layout: `processes/<process-type>/<pid>/<start-time>`, each holding a
/// JSON [`DescendantProcessInfo`].
#[derive(Clone)]
pub struct LivenessTracker {
    backend: Arc<dyn KvStore>,
    probe: Arc<dyn ProcessProbe>,
}

impl LivenessTracker {
    pub fn new(backend: Arc<dyn KvStore>, probe: Arc<dyn ProcessProbe>) -> Self {
        Self { backend, probe }
    }

    pub fn probe(&self) -> &dyn ProcessProbe {
        self.probe.as_ref()
    }

    fn key_for(info: &DescendantProcessInfo) -> SwarmResult<StoreKey> {
        Ok(StoreKey::new([
            PROCESSES_NAMESPACE.to_string(),
            info.process_type().to_string(),
            info.process_id().to_string(),
            info.process_start_time().to_string(),
        ])?)
    }

    /// Record `descendant` as spawned by `ancestor`.
    pub fn register(
        &self,
        process_type: &str,
        descendant: ProcessIdentity,
        ancestor: ProcessIdentity,
    ) -> SwarmResult<DescendantProcessInfo> {
        let info = DescendantProcessInfo::new(descendant, ancestor, process_type, self.probe())?;
        self.register_info(&info)?;
        Ok(info)
    }

    pub fn register_info(&self, info: &DescendantProcessInfo) -> SwarmResult<()> {
        let key = Self::key_for(info)?;
        let bytes = serde_json::to_vec(info)?;
        if let WriteOutcome::Exists(existing) = self.backend.write_once(&key, &bytes)? {
            if existing != bytes {
                // Same pid and start time under another ancestor: keep the newer record.
                warn!(key = %key, "replacing liveness record");
                self.backend.write(&key, &bytes)?;
            }
        }
        debug!(
            process_type = info.process_type(),
            pid = info.process_id(),
            ancestor = %info.ancestor(),
            "registered descendant"
        );
        Ok(())
    }

    /// Drop the record of `info`. Returns `true` if it existed.
    pub fn deregister(&self, info: &DescendantProcessInfo) -> SwarmResult<bool> {
        Ok(self.backend.delete(&Self::key_for(info)?)?)
    }

    /// Whether the process `pid` that started at `start_time` is running.
    pub fn is_alive(&self, process_id: u32, start_time: i64) -> bool {
        crate::process::process_is_alive(self.probe(), process_id, start_time)
    }

    /// Whether `info` and its ancestor are both running.
    pub fn is_descendant_alive(&self, info: &DescendantProcessInfo) -> bool {
        info.is_alive(self.probe())
    }

    /// Every registered descendant, optionally restricted to one type.
    pub fn descendants(&self, process_type: Option<&str>) -> SwarmResult<Vec<DescendantProcessInfo>> {
        let mut prefix = vec![PROCESSES_NAMESPACE.to_string()];
        if let Some(process_type) = process_type {
            validate_process_type(process_type)?;
            prefix.push(process_type.to_string());
        }
        let prefix = StoreKey::new(prefix)?;
        let mut found = Vec::new();
        for key in self.backend.list(&prefix)? {
            let Some(bytes) = self.backend.read(&key)? else {
                continue;
            };
            match serde_json::from_slice::<DescendantProcessInfo>(&bytes) {
                Ok(info) => found.push(info),
                Err(err) => warn!(key = %key, error = %err, "skipping unreadable liveness record"),
            }
        }
        Ok(found)
    }

    /// Remove records whose process and ancestor are both dead. Returns the
    /// number removed.
    pub fn collect_garbage(&self) -> SwarmResult<usize> {
        let mut removed = 0;
        for info in self.descendants(None)? {
            let probe = self.probe();
            if !info.identity().is_alive(probe) && !info.ancestor().is_alive(probe) {
                if self.deregister(&info)? {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "collected dead liveness records");
        }
        Ok(removed)
    }

    /// Live descendants of `ancestor`, after collecting garbage.
    pub fn count_active(
        &self,
        process_type: Option<&str>,
        ancestor: &ProcessIdentity,
    ) -> SwarmResult<usize> {
        self.collect_garbage()?;
        Ok(self
            .descendants(process_type)?
            .iter()
            .filter(|info| info.ancestor() == *ancestor && self.is_descendant_alive(info))
            .count())
    }

    /// Terminate every live descendant of `ancestor` and drop its record, as
    /// well as records of descendants that already exited.
    pub fn terminate_descendants(
        &self,
        ancestor: &ProcessIdentity,
        timeout: Duration,
    ) -> SwarmResult<usize> {
        let mut terminated = 0;
        for info in self.descendants(None)? {
            if info.ancestor() != *ancestor {
                continue;
            }
            if info.identity().is_alive(self.probe()) {
                info.terminate(self.probe(), timeout)?;
                terminated += 1;
            }
            self.deregister(&info)?;
        }
        if terminated > 0 {
            info!(terminated, ancestor = %ancestor, "terminated descendant processes");
        }
        Ok(terminated)
    }
}

impl std::fmt::Debug for LivenessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessTracker").finish_non_exhaustive()
    }
}
