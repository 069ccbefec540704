use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cachet_store::{KvStore, StoreKey, WriteOutcome};
use cachet_types::ValueAddress;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::records::{
    AttemptId, AttemptOutcome, AttemptRecord, CrashRecord, EventRecord, ExecutionRecord,
    ExecutionResult, OutputRecord,
};
use crate::signature::CallSignature;

pub const LEDGER_NAMESPACE: &str = "ledger";
pub const CRASH_HISTORY_NAMESPACE: &str = "crash_history";
pub const EVENT_HISTORY_NAMESPACE: &str = "event_history";

/// Record collections kept per call signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collection {
    Attempts,
    Results,
    Crashes,
    Outputs,
    Events,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attempts => "attempts",
            Self::Results => "results",
            Self::Crashes => "crashes",
            Self::Outputs => "outputs",
            Self::Events => "events",
        }
    }
}

/// Where a signature's records live: `ledger/<function>/<signature>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SignatureKey {
    function: String,
    signature: ValueAddress,
}

impl SignatureKey {
    pub fn new(function: impl Into<String>, signature: ValueAddress) -> Self {
        Self {
            function: function.into(),
            signature,
        }
    }

    pub fn for_signature(signature: &CallSignature) -> LedgerResult<Self> {
        Ok(Self::new(signature.function_segment(), signature.address()?))
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn signature(&self) -> &ValueAddress {
        &self.signature
    }

    fn collection(&self, collection: Collection) -> LedgerResult<StoreKey> {
        Ok(StoreKey::new([
            LEDGER_NAMESPACE.to_string(),
            self.function.clone(),
            self.signature.to_hex(),
            collection.as_str().to_string(),
        ])?)
    }
}

/// Sortable record id: zero-padded epoch milliseconds, then a unique tail.
pub fn record_id(timestamp: DateTime<Utc>, tail: &str) -> String {
    format!("{:013}_{tail}", timestamp.timestamp_millis().max(0))
}

/// Append-only log of everything that happened to every call signature.
///
/// Layout in the backing store:
/// ```text
/// ledger/<function>/<signature>/attempts/<record-id>
/// ledger/<function>/<signature>/results/<record-id>
/// ledger/<function>/<signature>/crashes/<record-id>
/// ledger/<function>/<signature>/outputs/<record-id>
/// ledger/<function>/<signature>/events/<record-id>
/// crash_history/<YYYY-MM-DD>/<record-id>
/// event_history/<YYYY-MM-DD>/<record-id>
/// ```
///
/// Records are JSON and written with `write_once`; nothing is ever updated
/// in place. Record ids start with a millisecond timestamp so listing a
/// collection yields records in time order.
#[derive(Clone)]
pub struct ExecutionLedger {
    backend: Arc<dyn KvStore>,
}

impl ExecutionLedger {
    pub fn new(backend: Arc<dyn KvStore>) -> Self {
        Self { backend }
    }

    // ---- writing ----

    pub fn record_attempt(&self, key: &SignatureKey, record: &AttemptRecord) -> LedgerResult<()> {
        let (timestamp, phase) = match record {
            AttemptRecord::Started { started_at, .. } => (*started_at, "start"),
            AttemptRecord::Finished { finished_at, .. } => (*finished_at, "end"),
        };
        let id = record_id(timestamp, &format!("{}_{phase}", record.attempt_id()));
        self.append(key.collection(Collection::Attempts)?, &id, record)
    }

    pub fn record_result(&self, key: &SignatureKey, result: &ExecutionResult) -> LedgerResult<()> {
        let id = record_id(result.recorded_at, result.attempt_id.as_str());
        self.append(key.collection(Collection::Results)?, &id, result)?;
        debug!(
            signature = %key.signature.short(),
            result = %result.result.short(),
            "recorded execution result"
        );
        Ok(())
    }

    /// Append a crash under the signature and to the daily crash history.
    pub fn record_crash(&self, key: &SignatureKey, crash: &CrashRecord) -> LedgerResult<()> {
        let id = record_id(crash.timestamp, &crash.instance_id.simple().to_string());
        self.append(key.collection(Collection::Crashes)?, &id, crash)?;
        self.append(
            history_day(CRASH_HISTORY_NAMESPACE, crash.timestamp.date_naive())?,
            &id,
            crash,
        )?;
        warn!(
            signature = %key.signature.short(),
            exception = %crash.exception_type,
            "recorded crash"
        );
        Ok(())
    }

    pub fn record_output(&self, key: &SignatureKey, output: &OutputRecord) -> LedgerResult<()> {
        let id = record_id(output.recorded_at, output.attempt_id.as_str());
        self.append(key.collection(Collection::Outputs)?, &id, output)
    }

    /// Append an event under the signature and to the daily event history.
    pub fn record_event(&self, key: &SignatureKey, event: &EventRecord) -> LedgerResult<()> {
        let id = record_id(event.timestamp, &event.event_id.simple().to_string());
        self.append(key.collection(Collection::Events)?, &id, event)?;
        self.append(
            history_day(EVENT_HISTORY_NAMESPACE, event.timestamp.date_naive())?,
            &id,
            event,
        )
    }

    /// Append an event that belongs to no particular signature.
    pub fn record_app_event(&self, event: &EventRecord) -> LedgerResult<()> {
        let id = record_id(event.timestamp, &event.event_id.simple().to_string());
        self.append(
            history_day(EVENT_HISTORY_NAMESPACE, event.timestamp.date_naive())?,
            &id,
            event,
        )
    }

    /// Append a crash that belongs to no particular signature.
    pub fn record_app_crash(&self, crash: &CrashRecord) -> LedgerResult<()> {
        let id = record_id(crash.timestamp, &crash.instance_id.simple().to_string());
        self.append(
            history_day(CRASH_HISTORY_NAMESPACE, crash.timestamp.date_naive())?,
            &id,
            crash,
        )
    }

    fn append<T: Serialize>(&self, collection: StoreKey, id: &str, record: &T) -> LedgerResult<()> {
        let key = collection.child(id)?;
        let bytes = serde_json::to_vec(record)?;
        match self.backend.write_once(&key, &bytes)? {
            WriteOutcome::Written => Ok(()),
            WriteOutcome::Exists(existing) if existing == bytes => Ok(()),
            WriteOutcome::Exists(_) => Err(LedgerError::RecordConflict {
                key: key.to_string(),
            }),
        }
    }

    // ---- reading ----

    fn read_all<T: DeserializeOwned>(&self, collection: &StoreKey) -> LedgerResult<Vec<T>> {
        let mut records = Vec::new();
        for key in self.backend.list(collection)? {
            // Only direct children are records.
            if key.len() != collection.len() + 1 {
                continue;
            }
            if let Some(bytes) = self.backend.read(&key)? {
                records.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(records)
    }

    pub fn attempts(&self, key: &SignatureKey) -> LedgerResult<Vec<AttemptRecord>> {
        self.read_all(&key.collection(Collection::Attempts)?)
    }

    pub fn results(&self, key: &SignatureKey) -> LedgerResult<Vec<ExecutionResult>> {
        self.read_all(&key.collection(Collection::Results)?)
    }

    pub fn crashes(&self, key: &SignatureKey) -> LedgerResult<Vec<CrashRecord>> {
        self.read_all(&key.collection(Collection::Crashes)?)
    }

    pub fn outputs(&self, key: &SignatureKey) -> LedgerResult<Vec<OutputRecord>> {
        self.read_all(&key.collection(Collection::Outputs)?)
    }

    pub fn events(&self, key: &SignatureKey) -> LedgerResult<Vec<EventRecord>> {
        self.read_all(&key.collection(Collection::Events)?)
    }

    /// The most recently recorded result, if any.
    pub fn latest_result(&self, key: &SignatureKey) -> LedgerResult<Option<ExecutionResult>> {
        let collection = key.collection(Collection::Results)?;
        let Some(last) = self.backend.list(&collection)?.pop() else {
            return Ok(None);
        };
        match self.backend.read(&last)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_result(&self, key: &SignatureKey) -> LedgerResult<bool> {
        Ok(self
            .backend
            .count(&key.collection(Collection::Results)?)?
            > 0)
    }

    /// Number of attempts that were started, finished or not.
    pub fn attempt_count(&self, key: &SignatureKey) -> LedgerResult<usize> {
        Ok(self
            .attempts(key)?
            .iter()
            .filter(|r| matches!(r, AttemptRecord::Started { .. }))
            .count())
    }

    pub fn latest_attempt_start(&self, key: &SignatureKey) -> LedgerResult<Option<DateTime<Utc>>> {
        Ok(self
            .attempts(key)?
            .into_iter()
            .filter_map(|r| match r {
                AttemptRecord::Started { started_at, .. } => Some(started_at),
                AttemptRecord::Finished { .. } => None,
            })
            .max())
    }

    /// Whether the latest finished attempt crashed and no result exists.
    pub fn latest_outcome_is_crash(&self, key: &SignatureKey) -> LedgerResult<bool> {
        if self.has_result(key)? {
            return Ok(false);
        }
        let last_finished = self
            .attempts(key)?
            .into_iter()
            .filter_map(|r| match r {
                AttemptRecord::Finished { outcome, .. } => Some(outcome),
                AttemptRecord::Started { .. } => None,
            })
            .last();
        Ok(matches!(last_finished, Some(AttemptOutcome::Crashed { .. })))
    }

    /// Every attempt's records, grouped and ordered by attempt id.
    pub fn execution_records(&self, key: &SignatureKey) -> LedgerResult<Vec<ExecutionRecord>> {
        let mut grouped: BTreeMap<AttemptId, ExecutionRecord> = BTreeMap::new();
        for record in self.attempts(key)? {
            match record {
                AttemptRecord::Started {
                    attempt_id,
                    started_at,
                    environment,
                } => {
                    let slot = slot(&mut grouped, &attempt_id);
                    slot.started_at = Some(started_at);
                    slot.environment = Some(environment);
                }
                AttemptRecord::Finished {
                    attempt_id,
                    finished_at,
                    outcome,
                } => {
                    let slot = slot(&mut grouped, &attempt_id);
                    slot.finished_at = Some(finished_at);
                    slot.outcome = Some(outcome);
                }
            }
        }
        for output in self.outputs(key)? {
            let id = output.attempt_id.clone();
            slot(&mut grouped, &id).output = Some(output);
        }
        for result in self.results(key)? {
            let id = result.attempt_id.clone();
            slot(&mut grouped, &id).result = Some(result);
        }
        for crash in self.crashes(key)? {
            if let Some(id) = crash.attempt_id.clone() {
                slot(&mut grouped, &id).crashes.push(crash);
            }
        }
        for event in self.events(key)? {
            if let Some(id) = event.attempt_id.clone() {
                slot(&mut grouped, &id).events.push(event);
            }
        }
        Ok(grouped.into_values().collect())
    }

    /// Records of the most recent attempt.
    pub fn last_execution(&self, key: &SignatureKey) -> LedgerResult<Option<ExecutionRecord>> {
        Ok(self.execution_records(key)?.pop())
    }

    /// Crash history for one day, or for all days.
    pub fn crash_history(&self, day: Option<NaiveDate>) -> LedgerResult<Vec<CrashRecord>> {
        self.history(CRASH_HISTORY_NAMESPACE, day)
    }

    /// Event history for one day, or for all days.
    pub fn event_history(&self, day: Option<NaiveDate>) -> LedgerResult<Vec<EventRecord>> {
        self.history(EVENT_HISTORY_NAMESPACE, day)
    }

    fn history<T: DeserializeOwned>(
        &self,
        namespace: &str,
        day: Option<NaiveDate>,
    ) -> LedgerResult<Vec<T>> {
        let prefix = match day {
            Some(day) => history_day(namespace, day)?,
            None => StoreKey::new([namespace])?,
        };
        let mut records = Vec::new();
        for key in self.backend.list(&prefix)? {
            if let Some(bytes) = self.backend.read(&key)? {
                records.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(records)
    }

    /// Every signature that has at least one recorded result.
    pub fn computed_signatures(&self) -> LedgerResult<BTreeSet<(String, String)>> {
        let root = StoreKey::new([LEDGER_NAMESPACE])?;
        let mut found = BTreeSet::new();
        for key in self.backend.list(&root)? {
            if key.segment(3) == Some(Collection::Results.as_str()) {
                if let (Some(function), Some(signature)) = (key.segment(1), key.segment(2)) {
                    found.insert((function.to_string(), signature.to_string()));
                }
            }
        }
        Ok(found)
    }
}

fn slot<'m>(
    grouped: &'m mut BTreeMap<AttemptId, ExecutionRecord>,
    id: &AttemptId,
) -> &'m mut ExecutionRecord {
    grouped
        .entry(id.clone())
        .or_insert_with(|| ExecutionRecord::empty(id.clone()))
}

fn history_day(namespace: &str, day: NaiveDate) -> LedgerResult<StoreKey> {
    Ok(StoreKey::new([
        namespace.to_string(),
        day.format("%Y-%m-%d").to_string(),
    ])?)
}

impl std::fmt::Debug for ExecutionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLedger").finish_non_exhaustive()
    }
}
