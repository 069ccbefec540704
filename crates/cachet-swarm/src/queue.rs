use std::sync::{Arc, Mutex};

use cachet_ledger::{CallSignature, ExecutionLedger, LedgerError, RelocationPolicy, SignatureKey};
use cachet_store::{ContentStore, KvStore, StoreKey, WriteOutcome};
use cachet_types::ValueAddress;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::descendant::DescendantProcessInfo;
use crate::error::SwarmResult;
use crate::tracker::LivenessTracker;

pub const QUEUE_NAMESPACE: &str = "queue";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Queued,
    Claimed,
}

impl Slot {
    fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Claimed => "claimed",
        }
    }
}

/// A pending signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Address of the persisted [`CallSignature`].
    pub signature: ValueAddress,
    /// Ledger partition of the signature's function.
    pub function: String,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn ledger_key(&self) -> SignatureKey {
        SignatureKey::new(self.function.clone(), self.signature.clone())
    }
}

/// Who holds an entry and since when.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claimant: DescendantProcessInfo,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    AlreadyQueued,
    /// A result exists; nothing was queued.
    AlreadyComputed,
}

/// A successfully claimed entry.
#[derive(Debug)]
pub struct Claim {
    pub signature: CallSignature,
    pub entry: QueueEntry,
    /// The entry was taken over from a dead claimant.
    pub takeover: bool,
}

/// Work queue of call signatures shared by every process on one store.
///
/// Layout: `queue/<signature>/queued` holds the [`QueueEntry`] and
/// `queue/<signature>/claimed` the current [`ClaimRecord`]. Claims move by
/// compare-and-swap on the `claimed` key, so no other lock is needed.
///
/// Dispatch is at-least-once: a claim whose holder is no longer alive is
/// handed to the next worker, even if the first one got partway through.
#[derive(Clone)]
pub struct ExecutionQueue {
    backend: Arc<dyn KvStore>,
    store: ContentStore,
    ledger: ExecutionLedger,
    policy: Arc<dyn RelocationPolicy>,
    tracker: LivenessTracker,
    config: QueueConfig,
    rng: Arc<Mutex<StdRng>>,
}

impl ExecutionQueue {
    pub fn new(
        backend: Arc<dyn KvStore>,
        policy: Arc<dyn RelocationPolicy>,
        tracker: LivenessTracker,
        config: QueueConfig,
    ) -> SwarmResult<Self> {
        config.validate()?;
        Ok(Self {
            store: ContentStore::new(backend.clone()),
            ledger: ExecutionLedger::new(backend.clone()),
            backend,
            policy,
            tracker,
            config,
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        })
    }

    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock().expect("lock poisoned") = StdRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn tracker(&self) -> &LivenessTracker {
        &self.tracker
    }

    fn key(signature_hex: &str, slot: Slot) -> SwarmResult<StoreKey> {
        Ok(StoreKey::new([QUEUE_NAMESPACE, signature_hex, slot.as_str()])?)
    }

    /// Queue `signature` unless it is already computed or already queued.
    ///
    /// Fails with [`LedgerError::NotRelocatable`] if the function may not
    /// run in another process.
    pub fn enqueue(&self, signature: &CallSignature) -> SwarmResult<EnqueueOutcome> {
        let identity = signature.function_identity(&self.store)?;
        if !self.policy.is_relocatable(&identity) {
            return Err(LedgerError::NotRelocatable {
                identity: identity.to_string(),
            }
            .into());
        }
        let ledger_key = SignatureKey::for_signature(signature)?;
        if self.ledger.has_result(&ledger_key)? {
            return Ok(EnqueueOutcome::AlreadyComputed);
        }
        let address = signature.persist(&self.store)?;
        let entry = QueueEntry {
            signature: address.clone(),
            function: signature.function_segment().to_string(),
            enqueued_at: Utc::now(),
        };
        let key = Self::key(&address.to_hex(), Slot::Queued)?;
        match self.backend.write_once(&key, &serde_json::to_vec(&entry)?)? {
            WriteOutcome::Written => {
                info!(function = %identity, signature = %address.short(), "enqueued");
                Ok(EnqueueOutcome::Queued)
            }
            WriteOutcome::Exists(_) => Ok(EnqueueOutcome::AlreadyQueued),
        }
    }

    /// Enqueue every signature, stopping at the first error.
    pub fn enqueue_many(&self, signatures: &[CallSignature]) -> SwarmResult<Vec<EnqueueOutcome>> {
        signatures.iter().map(|s| self.enqueue(s)).collect()
    }

    /// Claim one pending entry for `claimant`.
    ///
    /// Entries are tried in random order. An entry is skipped while its
    /// claimant is alive, while it waits out its retry back-off, or once it
    /// has used up `max_attempts`. Entries that already have a result are
    /// removed on sight.
    pub fn claim(&self, claimant: &DescendantProcessInfo) -> SwarmResult<Option<Claim>> {
        let mut pending = self.pending()?;
        pending.shuffle(&mut *self.rng.lock().expect("lock poisoned"));
        let now = Utc::now();
        for signature_hex in pending {
            if let Some(claim) = self.try_claim(&signature_hex, claimant, now)? {
                return Ok(Some(claim));
            }
        }
        Ok(None)
    }

    fn try_claim(
        &self,
        signature_hex: &str,
        claimant: &DescendantProcessInfo,
        now: DateTime<Utc>,
    ) -> SwarmResult<Option<Claim>> {
        let Some(entry) = self.read_entry(signature_hex)? else {
            return Ok(None);
        };
        let ledger_key = entry.ledger_key();
        if self.ledger.has_result(&ledger_key)? {
            debug!(signature = %entry.signature.short(), "dropping computed entry");
            self.remove(signature_hex)?;
            return Ok(None);
        }
        if !self.ready_for_attempt(&entry, now)? {
            return Ok(None);
        }

        let claimed_key = Self::key(signature_hex, Slot::Claimed)?;
        let current = self.backend.read(&claimed_key)?;
        let takeover = match &current {
            None => false,
            Some(bytes) => match serde_json::from_slice::<ClaimRecord>(bytes) {
                Ok(existing) if self.tracker.is_descendant_alive(&existing.claimant) => {
                    return Ok(None);
                }
                Ok(_) => true,
                Err(err) => {
                    warn!(key = %claimed_key, error = %err, "overwriting unreadable claim");
                    true
                }
            },
        };
        let record = serde_json::to_vec(&ClaimRecord {
            claimant: claimant.clone(),
            claimed_at: now,
        })?;
        if !self
            .backend
            .compare_and_swap(&claimed_key, current.as_deref(), Some(&record))?
        {
            // Another worker got there first.
            return Ok(None);
        }
        if takeover {
            warn!(
                signature = %entry.signature.short(),
                claimant = %claimant.identity(),
                "took over abandoned claim"
            );
        } else {
            debug!(
                signature = %entry.signature.short(),
                claimant = %claimant.identity(),
                "claimed"
            );
        }
        let signature = CallSignature::load(&self.store, &entry.signature)?;
        Ok(Some(Claim {
            signature,
            entry,
            takeover,
        }))
    }

    fn ready_for_attempt(&self, entry: &QueueEntry, now: DateTime<Utc>) -> SwarmResult<bool> {
        let ledger_key = entry.ledger_key();
        let attempts = self.ledger.attempt_count(&ledger_key)?;
        if attempts >= self.config.max_attempts as usize {
            debug!(
                signature = %entry.signature.short(),
                attempts,
                "attempt limit reached, not offering"
            );
            return Ok(false);
        }
        if attempts == 0 {
            return Ok(true);
        }
        let Some(last_start) = self.ledger.latest_attempt_start(&ledger_key)? else {
            return Ok(true);
        };
        let ready_at = chrono::Duration::from_std(self.config.retry_delay(attempts))
            .ok()
            .and_then(|delay| last_start.checked_add_signed(delay));
        Ok(ready_at.is_some_and(|ready_at| now >= ready_at))
    }

    /// Remove the entry for `signature` once the ledger shows it finished,
    /// with a result or a crash. Returns `false` and leaves the entry alone
    /// otherwise.
    pub fn retire(&self, signature: &CallSignature) -> SwarmResult<bool> {
        let ledger_key = SignatureKey::for_signature(signature)?;
        let finished = self.ledger.has_result(&ledger_key)?
            || self.ledger.latest_outcome_is_crash(&ledger_key)?;
        let address = signature.address()?;
        if !finished {
            debug!(signature = %address.short(), "not retiring unfinished signature");
            return Ok(false);
        }
        self.remove(&address.to_hex())?;
        info!(signature = %address.short(), "retired");
        Ok(true)
    }

    /// Give up a claim held by `claimant` without retiring the entry.
    pub fn release(
        &self,
        signature: &CallSignature,
        claimant: &DescendantProcessInfo,
    ) -> SwarmResult<bool> {
        let key = Self::key(&signature.address()?.to_hex(), Slot::Claimed)?;
        let Some(bytes) = self.backend.read(&key)? else {
            return Ok(false);
        };
        let record: ClaimRecord = serde_json::from_slice(&bytes)?;
        if record.claimant != *claimant {
            return Ok(false);
        }
        Ok(self.backend.compare_and_swap(&key, Some(&bytes), None)?)
    }

    /// Free every claim whose holder is no longer alive. Returns the
    /// signatures that became claimable again.
    pub fn sweep_abandoned(&self) -> SwarmResult<Vec<ValueAddress>> {
        let mut freed = Vec::new();
        for signature_hex in self.slot_members(Slot::Claimed)? {
            let key = Self::key(&signature_hex, Slot::Claimed)?;
            let Some(bytes) = self.backend.read(&key)? else {
                continue;
            };
            let abandoned = match serde_json::from_slice::<ClaimRecord>(&bytes) {
                Ok(record) => !self.tracker.is_descendant_alive(&record.claimant),
                Err(_) => true,
            };
            if !abandoned || !self.backend.compare_and_swap(&key, Some(&bytes), None)? {
                continue;
            }
            if let Some(entry) = self.read_entry(&signature_hex)? {
                warn!(signature = %entry.signature.short(), "released abandoned claim");
                freed.push(entry.signature);
            }
        }
        Ok(freed)
    }

    /// Pending entries, claimed or not.
    pub fn entries(&self) -> SwarmResult<Vec<QueueEntry>> {
        let mut entries = Vec::new();
        for signature_hex in self.pending()? {
            if let Some(entry) = self.read_entry(&signature_hex)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub fn claim_of(&self, signature: &CallSignature) -> SwarmResult<Option<ClaimRecord>> {
        let key = Self::key(&signature.address()?.to_hex(), Slot::Claimed)?;
        match self.backend.read(&key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn is_queued(&self, signature: &CallSignature) -> SwarmResult<bool> {
        let key = Self::key(&signature.address()?.to_hex(), Slot::Queued)?;
        Ok(self.backend.exists(&key)?)
    }

    pub fn len(&self) -> SwarmResult<usize> {
        Ok(self.pending()?.len())
    }

    pub fn is_empty(&self) -> SwarmResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn claimed_count(&self) -> SwarmResult<usize> {
        Ok(self.slot_members(Slot::Claimed)?.len())
    }

    fn pending(&self) -> SwarmResult<Vec<String>> {
        self.slot_members(Slot::Queued)
    }

    fn slot_members(&self, slot: Slot) -> SwarmResult<Vec<String>> {
        let prefix = StoreKey::new([QUEUE_NAMESPACE])?;
        Ok(self
            .backend
            .list(&prefix)?
            .into_iter()
            .filter(|key| key.len() == 3 && key.last() == slot.as_str())
            .filter_map(|key| key.segment(1).map(str::to_string))
            .collect())
    }

    fn read_entry(&self, signature_hex: &str) -> SwarmResult<Option<QueueEntry>> {
        match self.backend.read(&Self::key(signature_hex, Slot::Queued)?)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn remove(&self, signature_hex: &str) -> SwarmResult<()> {
        // Queued first, so no worker claims the entry in between.
        self.backend.delete(&Self::key(signature_hex, Slot::Queued)?)?;
        self.backend.delete(&Self::key(signature_hex, Slot::Claimed)?)?;
        Ok(())
    }
}

impl std::fmt::Debug for ExecutionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descendant::ProcessIdentity;
    use crate::process::testing::*;
    use cachet_ledger::{
        pure_fn, AttemptId, AttemptRecord, EnvironmentProvider, FunctionError, FunctionIdentity,
        FunctionRegistry, SystemEnvironment,
    };
    use cachet_store::InMemoryKvStore;
    use cachet_types::{RawArgs, Value};

    struct Fixture {
        probe: Arc<FakeProbe>,
        queue: ExecutionQueue,
        store: ContentStore,
        ledger: ExecutionLedger,
        parent: ProcessIdentity,
    }

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry
            .register(pure_fn(id("double"), |_ctx, args| {
                Ok(Value::from(args.int("n")? * 2))
            }))
            .unwrap();
        registry
            .register_local(pure_fn(id("local_only"), |_ctx, _args| {
                Err(FunctionError::new("RuntimeError", "never dispatched"))
            }))
            .unwrap();
        registry
    }

    fn id(name: &str) -> FunctionIdentity {
        FunctionIdentity::new(name, "1").unwrap()
    }

    fn fixture_with(config: QueueConfig) -> Fixture {
        let backend: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let probe = Arc::new(FakeProbe::default());
        probe.spawn(1, BOOT);
        let tracker = LivenessTracker::new(backend.clone(), probe.clone());
        let queue = ExecutionQueue::new(backend.clone(), Arc::new(registry()), tracker, config)
            .unwrap()
            .with_seed(3);
        Fixture {
            store: ContentStore::new(backend.clone()),
            ledger: ExecutionLedger::new(backend.clone()),
            parent: ProcessIdentity::new(1, BOOT, probe.as_ref()).unwrap(),
            probe,
            queue,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(QueueConfig::default())
    }

    impl Fixture {
        fn worker(&self, pid: u32) -> DescendantProcessInfo {
            self.probe.spawn(pid, BOOT + i64::from(pid));
            let me = ProcessIdentity::new(pid, BOOT + i64::from(pid), self.probe.as_ref()).unwrap();
            self.queue.tracker().register("worker", me, self.parent).unwrap()
        }

        fn signature(&self, name: &str, n: i64) -> CallSignature {
            CallSignature::new(&self.store, &id(name), &RawArgs::new().with("n", n).unwrap())
                .unwrap()
        }

        fn start_attempt(&self, signature: &CallSignature, started_at: DateTime<Utc>) {
            self.ledger
                .record_attempt(
                    &SignatureKey::for_signature(signature).unwrap(),
                    &AttemptRecord::Started {
                        attempt_id: AttemptId::generate(),
                        started_at,
                        environment: SystemEnvironment.summary(),
                    },
                )
                .unwrap();
        }
    }

    // ---- enqueue ----

    #[test]
    fn enqueue_is_idempotent() {
        let fx = fixture();
        let sig = fx.signature("double", 2);
        assert_eq!(fx.queue.enqueue(&sig).unwrap(), EnqueueOutcome::Queued);
        assert_eq!(fx.queue.enqueue(&sig).unwrap(), EnqueueOutcome::AlreadyQueued);
        assert_eq!(fx.queue.len().unwrap(), 1);
        assert!(fx.queue.is_queued(&sig).unwrap());
    }

    #[test]
    fn computed_signature_is_not_queued() {
        let fx = fixture();
        let sig = fx.signature("double", 2);
        let key = SignatureKey::for_signature(&sig).unwrap();
        fx.ledger
            .record_result(
                &key,
                &cachet_ledger::ExecutionResult {
                    result: fx.store.put(&Value::from(4i64)).unwrap(),
                    attempt_id: AttemptId::generate(),
                    recorded_at: Utc::now(),
                },
            )
            .unwrap();
        assert_eq!(fx.queue.enqueue(&sig).unwrap(), EnqueueOutcome::AlreadyComputed);
        assert!(fx.queue.is_empty().unwrap());
    }

    #[test]
    fn local_functions_are_refused() {
        let fx = fixture();
        let err = fx.queue.enqueue(&fx.signature("local_only", 1)).unwrap_err();
        assert_eq!(err.kind(), cachet_types::ErrorKind::Validation);
        assert!(fx.queue.is_empty().unwrap());
    }

    #[test]
    fn enqueue_many_reports_each_outcome() {
        let fx = fixture();
        let a = fx.signature("double", 1);
        let b = fx.signature("double", 2);
        let outcomes = fx.queue.enqueue_many(&[a.clone(), b, a]).unwrap();
        assert_eq!(
            outcomes,
            vec![
                EnqueueOutcome::Queued,
                EnqueueOutcome::Queued,
                EnqueueOutcome::AlreadyQueued
            ]
        );
    }

    // ---- claim ----

    #[test]
    fn each_entry_is_claimed_once() {
        let fx = fixture();
        let sig = fx.signature("double", 2);
        fx.queue.enqueue(&sig).unwrap();

        let first = fx.queue.claim(&fx.worker(10)).unwrap().unwrap();
        assert_eq!(first.signature.address().unwrap(), sig.address().unwrap());
        assert!(!first.takeover);
        assert!(fx.queue.claim(&fx.worker(11)).unwrap().is_none());
        assert_eq!(fx.queue.claimed_count().unwrap(), 1);
    }

    #[test]
    fn claim_of_dead_worker_is_taken_over() {
        let fx = fixture();
        let sig = fx.signature("double", 2);
        fx.queue.enqueue(&sig).unwrap();
        let dead = fx.worker(10);
        fx.queue.claim(&dead).unwrap().unwrap();
        fx.probe.exit(10);

        let heir = fx.worker(11);
        let claim = fx.queue.claim(&heir).unwrap().unwrap();
        assert!(claim.takeover);
        assert_eq!(fx.queue.claim_of(&sig).unwrap().unwrap().claimant, heir);
    }

    #[test]
    fn computed_entries_are_dropped_on_claim() {
        let fx = fixture();
        let sig = fx.signature("double", 2);
        fx.queue.enqueue(&sig).unwrap();
        fx.ledger
            .record_result(
                &SignatureKey::for_signature(&sig).unwrap(),
                &cachet_ledger::ExecutionResult {
                    result: fx.store.put(&Value::from(4i64)).unwrap(),
                    attempt_id: AttemptId::generate(),
                    recorded_at: Utc::now(),
                },
            )
            .unwrap();
        assert!(fx.queue.claim(&fx.worker(10)).unwrap().is_none());
        assert!(fx.queue.is_empty().unwrap());
    }

    #[test]
    fn retry_waits_for_backoff() {
        let fx = fixture_with(QueueConfig {
            max_attempts: 5,
            retry_base_delay_ms: 60_000,
        });
        let sig = fx.signature("double", 2);
        fx.queue.enqueue(&sig).unwrap();
        fx.start_attempt(&sig, Utc::now());
        assert!(fx.queue.claim(&fx.worker(10)).unwrap().is_none());

        let fx = fixture_with(QueueConfig {
            max_attempts: 5,
            retry_base_delay_ms: 60_000,
        });
        let sig = fx.signature("double", 2);
        fx.queue.enqueue(&sig).unwrap();
        fx.start_attempt(&sig, Utc::now() - chrono::Duration::minutes(2));
        assert!(fx.queue.claim(&fx.worker(10)).unwrap().is_some());
    }

    #[test]
    fn exhausted_entries_are_not_offered() {
        let fx = fixture_with(QueueConfig {
            max_attempts: 2,
            retry_base_delay_ms: 0,
        });
        let sig = fx.signature("double", 2);
        fx.queue.enqueue(&sig).unwrap();
        let long_ago = Utc::now() - chrono::Duration::hours(1);
        fx.start_attempt(&sig, long_ago);
        fx.start_attempt(&sig, long_ago);
        assert!(fx.queue.claim(&fx.worker(10)).unwrap().is_none());
        assert_eq!(fx.queue.len().unwrap(), 1);
    }

    // ---- retire, release, sweep ----

    #[test]
    fn unfinished_signature_is_not_retired() {
        let fx = fixture();
        let sig = fx.signature("double", 2);
        fx.queue.enqueue(&sig).unwrap();
        assert!(!fx.queue.retire(&sig).unwrap());
        assert!(fx.queue.is_queued(&sig).unwrap());
    }

    #[test]
    fn release_only_by_the_holder() {
        let fx = fixture();
        let sig = fx.signature("double", 2);
        fx.queue.enqueue(&sig).unwrap();
        let holder = fx.worker(10);
        fx.queue.claim(&holder).unwrap().unwrap();

        assert!(!fx.queue.release(&sig, &fx.worker(11)).unwrap());
        assert!(fx.queue.release(&sig, &holder).unwrap());
        assert_eq!(fx.queue.claimed_count().unwrap(), 0);
        assert!(fx.queue.claim(&fx.worker(12)).unwrap().is_some());
    }

    #[test]
    fn sweep_frees_abandoned_claim_exactly_once() {
        let fx = fixture();
        let sig = fx.signature("double", 2);
        fx.queue.enqueue(&sig).unwrap();
        fx.queue.claim(&fx.worker(10)).unwrap().unwrap();
        let live = fx.signature("double", 3);
        fx.queue.enqueue(&live).unwrap();
        // The first entry is held by a live worker, so this claims `live`.
        let busy = fx.queue.claim(&fx.worker(11)).unwrap().unwrap();
        assert_eq!(busy.signature.address().unwrap(), live.address().unwrap());

        fx.probe.exit(10);
        assert_eq!(fx.queue.sweep_abandoned().unwrap(), vec![sig.address().unwrap()]);
        assert!(fx.queue.sweep_abandoned().unwrap().is_empty());

        let claimed = fx.queue.claim(&fx.worker(12)).unwrap().unwrap();
        assert_eq!(claimed.signature.address().unwrap(), sig.address().unwrap());
        assert!(!claimed.takeover);
        assert!(fx.queue.claim(&fx.worker(13)).unwrap().is_none());
    }

    #[test]
    fn orphaned_claims_are_swept() {
        let fx = fixture();
        let sig = fx.signature("double", 2);
        fx.queue.enqueue(&sig).unwrap();
        fx.queue.claim(&fx.worker(10)).unwrap().unwrap();
        // The worker still runs but its ancestor is gone.
        fx.probe.exit(1);
        assert_eq!(fx.queue.sweep_abandoned().unwrap().len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn killed_worker_process_releases_its_claim() {
        use crate::process::{start_time_with_retry, ProcessProbe, SystemProbe};
        use std::time::Duration;

        let backend: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let probe: Arc<dyn ProcessProbe> = Arc::new(SystemProbe);
        let tracker = LivenessTracker::new(backend.clone(), probe.clone());
        let queue = ExecutionQueue::new(
            backend.clone(),
            Arc::new(registry()),
            tracker.clone(),
            QueueConfig::default(),
        )
        .unwrap();
        let store = ContentStore::new(backend);
        let sig =
            CallSignature::new(&store, &id("double"), &RawArgs::new().with("n", 4i64).unwrap())
                .unwrap();
        queue.enqueue(&sig).unwrap();

        let me = ProcessIdentity::current(probe.as_ref()).unwrap();
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let start = start_time_with_retry(probe.as_ref(), child.id(), 5, Duration::from_millis(10))
            .unwrap();
        let child_identity = ProcessIdentity::new(child.id(), start, probe.as_ref()).unwrap();
        let doomed = tracker.register("worker", child_identity, me).unwrap();
        queue.claim(&doomed).unwrap().unwrap();

        let survivor = tracker.register("worker", me, me).unwrap();
        assert!(queue.claim(&survivor).unwrap().is_none());

        child.kill().unwrap();
        child.wait().unwrap();
        assert_eq!(queue.sweep_abandoned().unwrap().len(), 1);
        assert!(queue.claim(&survivor).unwrap().is_some());
        assert!(queue.claim(&survivor).unwrap().is_none());
    }
}
