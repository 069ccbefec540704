use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cachet_cache::{CacheError, IdempotentCache};
use cachet_ledger::FunctionError;
use cachet_types::ValueAddress;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::descendant::{DescendantProcessInfo, ProcessIdentity};
use crate::error::{SwarmError, SwarmResult};
use crate::queue::ExecutionQueue;

/// What one poll of the queue did.
#[derive(Debug)]
pub enum WorkerStep {
    /// Nothing was claimable.
    Idle,
    Computed {
        signature: ValueAddress,
        result: ValueAddress,
        /// `false` if the result was already in the ledger.
        fresh: bool,
    },
    Crashed {
        signature: ValueAddress,
        error: FunctionError,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub computed: usize,
    pub crashed: usize,
    pub idle_polls: usize,
}

impl WorkerStats {
    fn record(&mut self, step: &WorkerStep) {
        match step {
            WorkerStep::Idle => self.idle_polls += 1,
            WorkerStep::Computed { .. } => self.computed += 1,
            WorkerStep::Crashed { .. } => self.crashed += 1,
        }
    }
}

/// Poll, claim, execute, retire.
///
/// A worker runs single-threaded; parallelism comes from running several
/// worker processes against the same store.
pub struct Worker {
    cache: Arc<IdempotentCache>,
    queue: ExecutionQueue,
    info: DescendantProcessInfo,
    config: WorkerConfig,
    rng: StdRng,
}

impl Worker {
    pub fn new(
        cache: Arc<IdempotentCache>,
        queue: ExecutionQueue,
        info: DescendantProcessInfo,
        config: WorkerConfig,
    ) -> SwarmResult<Self> {
        config.validate()?;
        Ok(Self {
            cache,
            queue,
            info,
            config,
            rng: StdRng::from_entropy(),
        })
    }

    /// Register the calling process as a worker spawned by `ancestor`
    /// (itself when `None`) and build a worker for it.
    pub fn for_current_process(
        cache: Arc<IdempotentCache>,
        queue: ExecutionQueue,
        ancestor: Option<ProcessIdentity>,
        config: WorkerConfig,
    ) -> SwarmResult<Self> {
        config.validate()?;
        let tracker = queue.tracker().clone();
        let me = ProcessIdentity::current(tracker.probe())?;
        let info = tracker.register(&config.process_type, me, ancestor.unwrap_or(me))?;
        Self::new(cache, queue, info, config)
    }

    pub fn info(&self) -> &DescendantProcessInfo {
        &self.info
    }

    /// Claim and execute at most one entry.
    ///
    /// Crashes are recorded and retired like results. On any other error
    /// the claim is released if the error is transient, and kept otherwise
    /// so the entry is not handed straight back to this worker.
    pub fn run_once(&mut self) -> SwarmResult<WorkerStep> {
        let Some(claim) = self.queue.claim(&self.info)? else {
            return Ok(WorkerStep::Idle);
        };
        let signature = claim.signature.address()?;
        match self.cache.get_or_compute(&claim.signature) {
            Ok(call) => {
                self.queue.retire(&claim.signature)?;
                Ok(WorkerStep::Computed {
                    signature,
                    result: call.result.result,
                    fresh: call.fresh,
                })
            }
            Err(CacheError::ExecutionCrash(error)) => {
                self.queue.retire(&claim.signature)?;
                Ok(WorkerStep::Crashed { signature, error })
            }
            Err(err) => {
                let err = SwarmError::from(err);
                if err.kind().is_transient() {
                    self.queue.release(&claim.signature, &self.info)?;
                } else {
                    error!(
                        signature = %signature.short(),
                        error = %err,
                        "holding claim on failing entry"
                    );
                }
                Err(err)
            }
        }
    }

    /// Work until the queue has nothing claimable.
    pub fn drain(&mut self) -> SwarmResult<WorkerStats> {
        let mut stats = WorkerStats::default();
        loop {
            let step = self.run_once()?;
            stats.record(&step);
            if matches!(step, WorkerStep::Idle) {
                return Ok(stats);
            }
        }
    }

    /// Work until the ancestor process exits.
    pub fn run(&mut self) -> SwarmResult<WorkerStats> {
        self.run_until(|| false)
    }

    /// Work until `stop` returns `true` or the ancestor process exits.
    pub fn run_until(&mut self, stop: impl Fn() -> bool) -> SwarmResult<WorkerStats> {
        let mut stats = WorkerStats::default();
        info!(worker = %self.info.identity(), ancestor = %self.info.ancestor(), "worker started");
        loop {
            if stop() {
                break;
            }
            if !self.info.ancestor().is_alive(self.queue.tracker().probe()) {
                info!(ancestor = %self.info.ancestor(), "ancestor exited, stopping worker");
                break;
            }
            match self.run_once() {
                Ok(step) => {
                    stats.record(&step);
                    if matches!(step, WorkerStep::Idle) {
                        self.idle();
                    }
                }
                Err(err) => {
                    warn!(error = %err, kind = %err.kind(), "worker step failed");
                    self.idle();
                }
            }
        }
        info!(
            computed = stats.computed,
            crashed = stats.crashed,
            "worker stopped"
        );
        Ok(stats)
    }

    fn idle(&mut self) {
        let jitter = match self.config.idle_jitter_ms {
            0 => 0,
            max => self.rng.gen_range(0..=max),
        };
        thread::sleep(self.config.poll_interval() + Duration::from_millis(jitter));
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("info", &self.info)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::QueueConfig;
    use crate::process::testing::*;
    use crate::tracker::LivenessTracker;
    use cachet_cache::CacheConfig;
    use cachet_ledger::{pure_fn, CallSignature, FunctionIdentity, FunctionRegistry, SignatureKey};
    use cachet_store::{InMemoryKvStore, KvStore};
    use cachet_types::{RawArgs, Value, MAX_VALUE_DEPTH};

    struct Fixture {
        probe: Arc<FakeProbe>,
        cache: Arc<IdempotentCache>,
        queue: ExecutionQueue,
        worker: Worker,
    }

    fn id(name: &str) -> FunctionIdentity {
        FunctionIdentity::new(name, "1").unwrap()
    }

    fn fixture() -> Fixture {
        let backend: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let mut registry = FunctionRegistry::new();
        registry
            .register(pure_fn(id("square"), |_ctx, args| {
                let n = args.int("n")?;
                Ok(Value::from(n * n))
            }))
            .unwrap();
        registry
            .register(pure_fn(id("fail"), |_ctx, _args| {
                Err(FunctionError::new("ValueError", "always fails"))
            }))
            .unwrap();
        registry
            .register(pure_fn(id("deep"), |_ctx, _args| {
                let mut value = Value::Null;
                for _ in 0..=MAX_VALUE_DEPTH {
                    value = Value::List(vec![value]);
                }
                Ok(value)
            }))
            .unwrap();
        let registry = Arc::new(registry);

        let probe = Arc::new(FakeProbe::default());
        probe.spawn(1, BOOT);
        probe.spawn(10, BOOT + 10);
        let tracker = LivenessTracker::new(backend.clone(), probe.clone());
        let parent = ProcessIdentity::new(1, BOOT, probe.as_ref()).unwrap();
        let me = ProcessIdentity::new(10, BOOT + 10, probe.as_ref()).unwrap();
        let info = tracker.register("worker", me, parent).unwrap();

        let cache = Arc::new(
            IdempotentCache::new(backend.clone(), registry.clone(), CacheConfig::default())
                .unwrap(),
        );
        let queue =
            ExecutionQueue::new(backend, registry, tracker, QueueConfig::default()).unwrap();
        let config = WorkerConfig {
            poll_interval_ms: 1,
            idle_jitter_ms: 0,
            ..WorkerConfig::default()
        };
        let worker = Worker::new(cache.clone(), queue.clone(), info, config).unwrap();
        Fixture {
            probe,
            cache,
            queue,
            worker,
        }
    }

    impl Fixture {
        fn enqueue(&self, name: &str, n: i64) -> CallSignature {
            let sig = self
                .cache
                .signature(&id(name), &RawArgs::new().with("n", n).unwrap())
                .unwrap();
            self.queue.enqueue(&sig).unwrap();
            sig
        }
    }

    #[test]
    fn idle_on_empty_queue() {
        let mut fx = fixture();
        assert!(matches!(fx.worker.run_once().unwrap(), WorkerStep::Idle));
    }

    #[test]
    fn computes_and_retires() {
        let mut fx = fixture();
        let sig = fx.enqueue("square", 9);
        let WorkerStep::Computed { result, fresh, .. } = fx.worker.run_once().unwrap() else {
            panic!("expected a computation");
        };
        assert!(fresh);
        assert_eq!(fx.cache.store().get::<Value>(&result).unwrap(), Value::from(81i64));
        assert!(fx.queue.is_empty().unwrap());
        assert!(fx.cache.lookup(&sig).unwrap().is_some());
    }

    #[test]
    fn crash_is_recorded_and_retired() {
        let mut fx = fixture();
        let sig = fx.enqueue("fail", 1);
        let WorkerStep::Crashed { error, .. } = fx.worker.run_once().unwrap() else {
            panic!("expected a crash");
        };
        assert_eq!(error.kind(), "ValueError");
        assert!(fx.queue.is_empty().unwrap());
        let key = SignatureKey::for_signature(&sig).unwrap();
        assert_eq!(fx.cache.ledger().crashes(&key).unwrap().len(), 1);
    }

    #[test]
    fn unstorable_result_is_retired_not_held() {
        let mut fx = fixture();
        let sig = fx.enqueue("deep", 1);
        let WorkerStep::Crashed { error, .. } = fx.worker.run_once().unwrap() else {
            panic!("expected a crash");
        };
        assert_eq!(error.kind(), "ResultError");
        assert!(!fx.queue.is_queued(&sig).unwrap());
        assert_eq!(fx.queue.claimed_count().unwrap(), 0);
        let key = SignatureKey::for_signature(&sig).unwrap();
        let ledger = fx.cache.ledger();
        assert!(ledger.last_execution(&key).unwrap().unwrap().is_finished());
        assert!(ledger.latest_outcome_is_crash(&key).unwrap());
        assert!(matches!(fx.worker.run_once().unwrap(), WorkerStep::Idle));
    }

    #[test]
    fn drain_processes_everything() {
        let mut fx = fixture();
        for n in 0..5 {
            fx.enqueue("square", n);
        }
        fx.enqueue("fail", 0);
        let stats = fx.worker.drain().unwrap();
        assert_eq!(stats.computed, 5);
        assert_eq!(stats.crashed, 1);
        assert_eq!(stats.idle_polls, 1);
        assert!(fx.queue.is_empty().unwrap());
    }

    #[test]
    fn run_stops_when_ancestor_exits() {
        let mut fx = fixture();
        fx.enqueue("square", 3);
        fx.probe.exit(1);
        let stats = fx.worker.run().unwrap();
        assert_eq!(stats, WorkerStats::default());
        assert_eq!(fx.queue.len().unwrap(), 1);
    }

    #[test]
    fn run_until_stop_flag() {
        let mut fx = fixture();
        fx.enqueue("square", 3);
        let polls = AtomicUsize::new(0);
        let stats = fx
            .worker
            .run_until(|| polls.fetch_add(1, Ordering::SeqCst) >= 3)
            .unwrap();
        assert_eq!(stats.computed, 1);
        assert_eq!(stats.idle_polls, 2);
    }
}
