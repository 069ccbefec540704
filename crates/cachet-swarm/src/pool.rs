use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::descendant::{validate_process_type, DescendantProcessInfo, ProcessIdentity};
use crate::error::SwarmResult;
use crate::process::start_time_with_retry;
use crate::tracker::LivenessTracker;

/// Builds the command that starts one worker. Receives the identity the
/// worker should treat as its ancestor.
pub type CommandFactory = Box<dyn Fn(&ProcessIdentity) -> Command + Send + Sync>;

/// Result of one maintenance round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStatus {
    pub target: usize,
    /// Live workers before spawning.
    pub active: usize,
    pub spawned: usize,
    pub reaped: usize,
}

/// Keeps a number of worker processes running on behalf of `ancestor`.
pub struct WorkerPool {
    tracker: LivenessTracker,
    config: PoolConfig,
    process_type: String,
    ancestor: ProcessIdentity,
    command: CommandFactory,
    children: Vec<(Child, DescendantProcessInfo)>,
}

impl WorkerPool {
    pub fn new(
        tracker: LivenessTracker,
        config: PoolConfig,
        process_type: impl Into<String>,
        ancestor: ProcessIdentity,
        command: CommandFactory,
    ) -> SwarmResult<Self> {
        config.validate()?;
        let process_type = process_type.into();
        validate_process_type(&process_type)?;
        Ok(Self {
            tracker,
            config,
            process_type,
            ancestor,
            command,
            children: Vec::new(),
        })
    }

    pub fn ancestor(&self) -> ProcessIdentity {
        self.ancestor
    }

    /// Number of workers this pool aims for on this machine.
    pub fn target(&self) -> usize {
        let cpus = thread::available_parallelism().map_or(1, |n| n.get());
        self.config.target(cpus)
    }

    /// Reap exited children, then spawn workers until the target is met.
    pub fn maintain(&mut self) -> SwarmResult<PoolStatus> {
        let reaped = self.reap()?;
        let target = self.target();
        let active = self
            .tracker
            .count_active(Some(&self.process_type), &self.ancestor)?;
        let mut spawned = 0;
        for _ in active..target {
            self.spawn()?;
            spawned += 1;
        }
        if spawned > 0 || reaped > 0 {
            info!(
                target_workers = target,
                active,
                spawned,
                reaped,
                "maintained worker pool"
            );
        }
        Ok(PoolStatus {
            target,
            active,
            spawned,
            reaped,
        })
    }

    fn spawn(&mut self) -> SwarmResult<()> {
        let mut child = (self.command)(&self.ancestor).spawn()?;
        let pid = child.id();
        let probe = self.tracker.probe();
        let registered = start_time_with_retry(probe, pid, 5, Duration::from_millis(10))
            .and_then(|start_time| ProcessIdentity::new(pid, start_time, probe))
            .and_then(|me| self.tracker.register(&self.process_type, me, self.ancestor));
        match registered {
            Ok(info) => {
                debug!(pid, "spawned worker");
                self.children.push((child, info));
                Ok(())
            }
            Err(err) => {
                // An unregistered worker would never be counted or stopped.
                let _ = child.kill();
                let _ = child.wait();
                Err(err)
            }
        }
    }

    fn reap(&mut self) -> SwarmResult<usize> {
        let mut reaped = 0;
        let mut running = Vec::with_capacity(self.children.len());
        for (mut child, info) in self.children.drain(..) {
            match child.try_wait()? {
                Some(status) => {
                    warn!(pid = info.process_id(), %status, "worker exited");
                    self.tracker.deregister(&info)?;
                    reaped += 1;
                }
                None => running.push((child, info)),
            }
        }
        self.children = running;
        Ok(reaped)
    }

    /// Maintain the pool until `stop` returns `true`, then shut it down.
    pub fn run_until(&mut self, stop: impl Fn() -> bool) -> SwarmResult<()> {
        let interval = Duration::from_millis(self.config.maintain_interval_ms);
        let outcome = loop {
            if stop() {
                break Ok(());
            }
            if let Err(err) = self.maintain() {
                break Err(err);
            }
            thread::sleep(interval);
        };
        self.shutdown()?;
        outcome
    }

    /// Maintain the pool for `duration`, or forever when `None`.
    pub fn run_for(&mut self, duration: Option<Duration>) -> SwarmResult<()> {
        let started = Instant::now();
        self.run_until(|| duration.is_some_and(|d| started.elapsed() >= d))
    }

    /// Terminate every worker of this pool. Returns how many were running.
    pub fn shutdown(&mut self) -> SwarmResult<usize> {
        let terminated = self
            .tracker
            .terminate_descendants(&self.ancestor, self.config.terminate_timeout())?;
        for (mut child, _) in self.children.drain(..) {
            if child.try_wait()?.is_none() {
                let _ = child.kill();
            }
            let _ = child.wait();
        }
        Ok(terminated)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("process_type", &self.process_type)
            .field("ancestor", &self.ancestor)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}
