use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cachet_cache::{CachedCall, IdempotentCache};
use cachet_ledger::{
    AttemptOutcome, CallSignature, CrashRecord, EnvironmentProvider, EventRecord, ExecutionRecord,
    FunctionIdentity, FunctionRegistry, SignatureKey,
};
use cachet_store::{FsKvStore, InMemoryKvStore, KvStore};
use cachet_swarm::{
    CommandFactory, EnqueueOutcome, ExecutionQueue, LivenessTracker, ProcessIdentity,
    ProcessProbe, SystemProbe, Worker, WorkerPool,
};
use cachet_types::{RawArgs, Value, ValueAddress};
use chrono::NaiveDate;
use rand::Rng;
use tracing::{debug, info};

use crate::config::CachetConfig;
use crate::error::{SdkError, SdkResult};
use crate::resolver::{ActiveStoreResolver, EnvStoreResolver};
use crate::status::StatusSummary;

/// Configures and opens a [`Cachet`].
pub struct CachetBuilder {
    registry: FunctionRegistry,
    config: CachetConfig,
    store: Option<Arc<dyn KvStore>>,
    resolver: Option<Arc<dyn ActiveStoreResolver>>,
    probe: Arc<dyn ProcessProbe>,
    environment: Option<Arc<dyn EnvironmentProvider>>,
}

impl CachetBuilder {
    pub fn config(mut self, config: CachetConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this store instead of resolving the active one.
    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ActiveStoreResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn environment(mut self, environment: Arc<dyn EnvironmentProvider>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn open(self) -> SdkResult<Cachet> {
        self.config.validate()?;
        let backend = match self.store {
            Some(store) => store,
            None => {
                let resolver = self
                    .resolver
                    .unwrap_or_else(|| Arc::new(EnvStoreResolver::new(self.config.store.clone())));
                resolver.active_store()?.ok_or(SdkError::NoActiveStore)?
            }
        };
        let registry = Arc::new(self.registry);
        let mut cache =
            IdempotentCache::new(backend.clone(), registry.clone(), self.config.cache.clone())?;
        if let Some(environment) = self.environment {
            cache = cache.with_environment(environment);
        }
        let tracker = LivenessTracker::new(backend.clone(), self.probe);
        let queue = ExecutionQueue::new(
            backend.clone(),
            registry.clone(),
            tracker.clone(),
            self.config.queue.clone(),
        )?;
        Ok(Cachet {
            backend,
            registry,
            cache: Arc::new(cache),
            queue,
            tracker,
            config: self.config,
        })
    }
}

/// Memoized pure functions over one shared store.
///
/// Everything a `Cachet` knows lives in its backing store, so any number
/// of processes opening the same store share results, queue and workers.
pub struct Cachet {
    backend: Arc<dyn KvStore>,
    registry: Arc<FunctionRegistry>,
    cache: Arc<IdempotentCache>,
    queue: ExecutionQueue,
    tracker: LivenessTracker,
    config: CachetConfig,
}

impl Cachet {
    pub fn builder(registry: FunctionRegistry) -> CachetBuilder {
        CachetBuilder {
            registry,
            config: CachetConfig::default(),
            store: None,
            resolver: None,
            probe: Arc::new(SystemProbe),
            environment: None,
        }
    }

    /// Open (or create) a filesystem store at `root`.
    pub fn open(
        root: impl AsRef<Path>,
        registry: FunctionRegistry,
        config: CachetConfig,
    ) -> SdkResult<Self> {
        let store = FsKvStore::open(root, config.store.clone())?;
        Self::builder(registry)
            .config(config)
            .store(Arc::new(store))
            .open()
    }

    /// A private, non-persistent instance.
    pub fn in_memory(registry: FunctionRegistry) -> SdkResult<Self> {
        Self::builder(registry)
            .store(Arc::new(InMemoryKvStore::new()))
            .open()
    }

    pub fn backend(&self) -> &Arc<dyn KvStore> {
        &self.backend
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &IdempotentCache {
        &self.cache
    }

    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    pub fn tracker(&self) -> &LivenessTracker {
        &self.tracker
    }

    pub fn config(&self) -> &CachetConfig {
        &self.config
    }

    // ---- signatures ----

    pub fn signature(
        &self,
        function: &FunctionIdentity,
        arguments: &RawArgs,
    ) -> SdkResult<CallSignature> {
        Ok(self.cache.signature(function, arguments)?)
    }

    /// Signature for the registered function called `name`.
    pub fn signature_for(&self, name: &str, arguments: &RawArgs) -> SdkResult<CallSignature> {
        let function = self.registry.find(name)?;
        self.signature(function.identity(), arguments)
    }

    /// Load a signature persisted by [`Cachet::swarm`] in any process.
    pub fn load_signature(&self, address: &ValueAddress) -> SdkResult<CallSignature> {
        Ok(CallSignature::load(self.cache.store(), address)?)
    }

    // ---- local execution ----

    pub fn get_or_compute(&self, signature: &CallSignature) -> SdkResult<CachedCall> {
        Ok(self.cache.get_or_compute(signature)?)
    }

    /// Compute `signature` in this process, or return the recorded value.
    pub fn run(&self, signature: &CallSignature) -> SdkResult<Value> {
        let call = self.cache.get_or_compute(signature)?;
        Ok(self.cache.value(&call)?)
    }

    pub fn compute(&self, function: &FunctionIdentity, arguments: &RawArgs) -> SdkResult<Value> {
        Ok(self.cache.compute(function, arguments)?)
    }

    /// Compute every signature, in random order. Results keep input order.
    pub fn compute_many(&self, signatures: &[CallSignature]) -> Vec<SdkResult<Value>> {
        self.cache
            .compute_many(signatures)
            .into_iter()
            .map(|call| Ok(self.cache.value(&call?)?))
            .collect()
    }

    /// The recorded value, if the signature was computed already.
    pub fn result(&self, signature: &CallSignature) -> SdkResult<Option<Value>> {
        match self.cache.lookup(signature)? {
            Some(result) => Ok(Some(self.cache.store().get(&result.result)?)),
            None => Ok(None),
        }
    }

    pub fn is_ready(&self, signature: &CallSignature) -> SdkResult<bool> {
        Ok(self.cache.lookup(signature)?.is_some())
    }

    // ---- swarm execution ----

    /// Ask the workers to compute `signature`.
    pub fn swarm(&self, signature: &CallSignature) -> SdkResult<EnqueueOutcome> {
        Ok(self.queue.enqueue(signature)?)
    }

    pub fn swarm_many(&self, signatures: &[CallSignature]) -> SdkResult<Vec<EnqueueOutcome>> {
        Ok(self.queue.enqueue_many(signatures)?)
    }

    /// Enqueue `signature` and block until some worker has computed it.
    ///
    /// Polls with jittered exponential back-off. Fails with
    /// [`SdkError::RemoteCrash`] if the call crashed after it was enqueued,
    /// and with [`SdkError::Timeout`] once `timeout` has elapsed.
    pub fn wait_for_result(
        &self,
        signature: &CallSignature,
        timeout: Option<Duration>,
    ) -> SdkResult<Value> {
        if let Some(value) = self.result(signature)? {
            return Ok(value);
        }
        let key = SignatureKey::for_signature(signature)?;
        let attempts_before = self.cache.ledger().attempt_count(&key)?;
        self.swarm(signature)?;

        let started = Instant::now();
        let mut backoff = self.config.wait.initial_backoff();
        let mut rng = rand::thread_rng();
        loop {
            if let Some(value) = self.result(signature)? {
                return Ok(value);
            }
            if let Some(err) = self.remote_crash(signature, &key, attempts_before)? {
                return Err(err);
            }
            let mut sleep = backoff;
            if let Some(timeout) = timeout {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    return Err(SdkError::Timeout(timeout));
                }
                sleep = sleep.min(timeout - elapsed);
            }
            debug!(
                sleep_ms = u64::try_from(sleep.as_millis()).unwrap_or(u64::MAX),
                "waiting for result"
            );
            thread::sleep(sleep);

            let jitter = rng.gen_range(-0.25..0.25);
            backoff = backoff
                .mul_f64(2.0 + jitter)
                .clamp(self.config.wait.initial_backoff(), self.config.wait.max_backoff());
        }
    }

    /// The crash that ended a worker's attempt made after `attempts_before`,
    /// once the entry has been retired.
    fn remote_crash(
        &self,
        signature: &CallSignature,
        key: &SignatureKey,
        attempts_before: usize,
    ) -> SdkResult<Option<SdkError>> {
        let ledger = self.cache.ledger();
        if ledger.attempt_count(key)? <= attempts_before
            || !ledger.latest_outcome_is_crash(key)?
            || self.queue.is_queued(signature)?
        {
            return Ok(None);
        }
        let outcome = ledger.last_execution(key)?.and_then(|record| record.outcome);
        Ok(match outcome {
            Some(AttemptOutcome::Crashed {
                exception_type,
                message,
            }) => Some(SdkError::RemoteCrash {
                exception_type,
                message,
            }),
            _ => None,
        })
    }

    /// A worker for the calling process. `ancestor` defaults to the calling
    /// process itself.
    pub fn worker(&self, ancestor: Option<ProcessIdentity>) -> SdkResult<Worker> {
        Ok(Worker::for_current_process(
            Arc::clone(&self.cache),
            self.queue.clone(),
            ancestor,
            self.config.worker.clone(),
        )?)
    }

    /// A pool whose workers are started by `command` and descend from the
    /// calling process.
    pub fn pool(&self, command: CommandFactory) -> SdkResult<WorkerPool> {
        let ancestor = ProcessIdentity::current(self.tracker.probe())?;
        Ok(WorkerPool::new(
            self.tracker.clone(),
            self.config.pool.clone(),
            self.config.worker.process_type.clone(),
            ancestor,
            command,
        )?)
    }

    /// Release claims held by dead workers.
    pub fn sweep_abandoned(&self) -> SdkResult<Vec<ValueAddress>> {
        let freed = self.queue.sweep_abandoned()?;
        let collected = self.tracker.collect_garbage()?;
        if !freed.is_empty() || collected > 0 {
            info!(freed = freed.len(), collected, "swept abandoned work");
        }
        Ok(freed)
    }

    // ---- liveness ----

    pub fn is_alive(&self, process_id: u32, start_time: i64) -> bool {
        self.tracker.is_alive(process_id, start_time)
    }

    // ---- history ----

    pub fn execution_records(&self, signature: &CallSignature) -> SdkResult<Vec<ExecutionRecord>> {
        let key = SignatureKey::for_signature(signature)?;
        Ok(self.cache.ledger().execution_records(&key)?)
    }

    pub fn crash_history(&self, day: Option<NaiveDate>) -> SdkResult<Vec<CrashRecord>> {
        Ok(self.cache.ledger().crash_history(day)?)
    }

    pub fn event_history(&self, day: Option<NaiveDate>) -> SdkResult<Vec<EventRecord>> {
        Ok(self.cache.ledger().event_history(day)?)
    }

    pub fn status(&self) -> SdkResult<StatusSummary> {
        let worker_type = self.config.worker.process_type.as_str();
        let workers = self.tracker.descendants(Some(worker_type))?;
        Ok(StatusSummary {
            stored_values: self.cache.store().count()?,
            computed_signatures: self.cache.ledger().computed_signatures()?.len(),
            queued: self.queue.len()?,
            claimed: self.queue.claimed_count()?,
            registered_workers: workers.len(),
            live_workers: workers
                .iter()
                .filter(|w| self.tracker.is_descendant_alive(w))
                .count(),
            crashes: self.crash_history(None)?.len(),
            functions: self
                .registry
                .identities()
                .iter()
                .map(ToString::to_string)
                .collect(),
        })
    }
}

impl std::fmt::Debug for Cachet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cachet")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
