use std::sync::{Arc, Mutex};

use cachet_ledger::{
    CallSignature, CrashTracker, EnvironmentProvider, Execution, ExecutionLedger, ExecutionResult,
    Executor, FunctionError, FunctionIdentity, FunctionRegistry, NestedInvoker, SignatureKey,
    SystemEnvironment,
};
use cachet_store::{ContentStore, KvStore};
use cachet_types::{RawArgs, Value, ValueAddress};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, error};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};

/// A result returned by the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedCall {
    pub signature: ValueAddress,
    pub result: ExecutionResult,
    /// `true` if the function ran during this call.
    pub fresh: bool,
}

/// Read-through cache over the execution ledger.
///
/// Results are never evicted. Concurrent callers racing on the same cold
/// signature may each execute it; pure functions make that harmless and
/// every execution is recorded.
pub struct IdempotentCache {
    store: ContentStore,
    ledger: ExecutionLedger,
    registry: Arc<FunctionRegistry>,
    environment: Arc<dyn EnvironmentProvider>,
    config: CacheConfig,
    rng: Mutex<StdRng>,
}

impl IdempotentCache {
    pub fn new(
        backend: Arc<dyn KvStore>,
        registry: Arc<FunctionRegistry>,
        config: CacheConfig,
    ) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            store: ContentStore::new(backend.clone()),
            ledger: ExecutionLedger::new(backend),
            registry,
            environment: Arc::new(SystemEnvironment),
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    pub fn with_environment(mut self, environment: Arc<dyn EnvironmentProvider>) -> Self {
        self.environment = environment;
        self
    }

    /// Seed the sampling RNG, for reproducible consistency checks.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock().expect("lock poisoned") = StdRng::seed_from_u64(seed);
        self
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn ledger(&self) -> &ExecutionLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Build the signature for calling `function` with `arguments`.
    pub fn signature(
        &self,
        function: &FunctionIdentity,
        arguments: &RawArgs,
    ) -> CacheResult<CallSignature> {
        Ok(CallSignature::new(&self.store, function, arguments)?)
    }

    /// The recorded result for `signature`, without executing anything.
    pub fn lookup(&self, signature: &CallSignature) -> CacheResult<Option<ExecutionResult>> {
        let key = SignatureKey::for_signature(signature)?;
        Ok(self.ledger.latest_result(&key)?)
    }

    /// Return the recorded result, executing the function if there is none.
    ///
    /// If the function raises, the crash is recorded and the original error
    /// is returned as [`CacheError::ExecutionCrash`].
    pub fn get_or_compute(&self, signature: &CallSignature) -> CacheResult<CachedCall> {
        let tracker = CrashTracker::new();
        self.get_or_compute_at(signature, &tracker, 0)
    }

    /// Convenience: build the signature, compute it, and load the value.
    pub fn compute(&self, function: &FunctionIdentity, arguments: &RawArgs) -> CacheResult<Value> {
        let signature = self.signature(function, arguments)?;
        let call = self.get_or_compute(&signature)?;
        self.value(&call)
    }

    /// Load the value of a cached call.
    pub fn value(&self, call: &CachedCall) -> CacheResult<Value> {
        Ok(self.store.get(&call.result.result)?)
    }

    /// Compute several signatures in random order.
    ///
    /// Shuffling spreads independent processes working through the same
    /// batch across different signatures. Results come back in input order.
    pub fn compute_many(&self, signatures: &[CallSignature]) -> Vec<CacheResult<CachedCall>> {
        let mut order: Vec<usize> = (0..signatures.len()).collect();
        order.shuffle(&mut *self.rng.lock().expect("lock poisoned"));
        let mut results: Vec<Option<CacheResult<CachedCall>>> =
            (0..signatures.len()).map(|_| None).collect();
        for index in order {
            results[index] = Some(self.get_or_compute(&signatures[index]));
        }
        results.into_iter().flatten().collect()
    }

    fn get_or_compute_at(
        &self,
        signature: &CallSignature,
        tracker: &CrashTracker,
        depth: usize,
    ) -> CacheResult<CachedCall> {
        let address = signature.address()?;
        if let Some(cached) = self.lookup(signature)? {
            if self.should_verify() {
                debug!(signature = %address.short(), "re-executing cached call for consistency check");
                let recomputed = self.execute(signature, tracker, depth)?;
                if recomputed.result != cached.result {
                    error!(
                        signature = %address.short(),
                        cached = %cached.result.short(),
                        recomputed = %recomputed.result.short(),
                        "recomputed result differs from cached result"
                    );
                    return Err(CacheError::ConsistencyViolation {
                        signature: address,
                        cached: cached.result,
                        recomputed: recomputed.result,
                    });
                }
            }
            debug!(signature = %address.short(), "cache hit");
            return Ok(CachedCall {
                signature: address,
                result: cached,
                fresh: false,
            });
        }
        let result = self.execute(signature, tracker, depth)?;
        Ok(CachedCall {
            signature: address,
            result,
            fresh: true,
        })
    }

    fn execute(
        &self,
        signature: &CallSignature,
        tracker: &CrashTracker,
        depth: usize,
    ) -> CacheResult<ExecutionResult> {
        let executor = Executor {
            store: &self.store,
            ledger: &self.ledger,
            registry: &self.registry,
            environment: self.environment.as_ref(),
        };
        let invoker: &dyn NestedInvoker = self;
        match executor.execute(signature, tracker, Some(invoker), depth)? {
            Execution::Succeeded { result, .. } => Ok(result),
            Execution::Crashed(err) => Err(CacheError::ExecutionCrash(err)),
        }
    }

    fn should_verify(&self) -> bool {
        let p = self.config.consistency_check_probability;
        p > 0.0 && self.rng.lock().expect("lock poisoned").gen::<f64>() < p
    }
}

impl NestedInvoker for IdempotentCache {
    fn invoke(
        &self,
        function: &FunctionIdentity,
        arguments: &RawArgs,
        tracker: &CrashTracker,
        depth: usize,
    ) -> Result<Value, FunctionError> {
        let outcome = self
            .signature(function, arguments)
            .and_then(|signature| self.get_or_compute_at(&signature, tracker, depth))
            .and_then(|call| self.value(&call));
        match outcome {
            Ok(value) => Ok(value),
            // Same instance id, so outer frames will not record it again.
            Err(CacheError::ExecutionCrash(err)) => Err(err),
            Err(other) => Err(FunctionError::new("CacheError", other.to_string())),
        }
    }
}

impl std::fmt::Debug for IdempotentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotentCache")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
