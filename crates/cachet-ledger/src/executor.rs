use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use cachet_store::ContentStore;
use cachet_types::Value;
use chrono::Utc;
use tracing::{info, warn};

use crate::context::{CapturedOutput, ExecutionContext, NestedInvoker};
use crate::crash::CrashTracker;
use crate::environment::EnvironmentProvider;
use crate::error::{LedgerError, LedgerResult};
use crate::function::{FunctionError, FunctionRegistry};
use crate::ledger::{ExecutionLedger, SignatureKey};
use crate::records::{
    AttemptId, AttemptOutcome, AttemptRecord, CrashRecord, ExecutionResult, OutputRecord,
};
use crate::signature::CallSignature;

/// Outcome of a single execution attempt.
#[derive(Debug)]
pub enum Execution {
    Succeeded {
        result: ExecutionResult,
        value: Value,
    },
    /// The body raised. The ledger already holds the crash (unless an inner
    /// frame recorded it first) and the attempt's end marker.
    Crashed(FunctionError),
}

/// Runs call signatures and writes everything that happens to the ledger.
///
/// Each call to [`Executor::execute`] is one attempt: it always appends a
/// start marker and an end marker, plus output, events, and either a
/// result or a crash. A storage outage after the start marker ends the
/// attempt as aborted and is returned as an error. It never consults the cache; deciding whether to run
/// at all is the caller's job.
pub struct Executor<'a> {
    pub store: &'a ContentStore,
    pub ledger: &'a ExecutionLedger,
    pub registry: &'a FunctionRegistry,
    pub environment: &'a dyn EnvironmentProvider,
}

impl Executor<'_> {
    pub fn execute(
        &self,
        signature: &CallSignature,
        tracker: &CrashTracker,
        invoker: Option<&dyn NestedInvoker>,
        depth: usize,
    ) -> LedgerResult<Execution> {
        let address = signature.address()?;
        let key = SignatureKey::for_signature(signature)?;
        let identity = signature.function_identity(self.store)?;
        let function = self.registry.resolve(&identity)?;
        let arguments = signature.materialize(self.store)?;

        let attempt_id = AttemptId::generate();
        let environment = self.environment.summary();
        self.ledger.record_attempt(
            &key,
            &AttemptRecord::Started {
                attempt_id: attempt_id.clone(),
                started_at: Utc::now(),
                environment: environment.clone(),
            },
        )?;
        info!(
            function = %identity,
            signature = %address.short(),
            attempt = %attempt_id,
            depth,
            "executing"
        );

        let started = Instant::now();
        let mut ctx = ExecutionContext::new(
            attempt_id.clone(),
            address.clone(),
            depth,
            tracker,
            invoker,
        );
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| function.call(&mut ctx, &arguments)))
            .unwrap_or_else(|payload| Err(panic_error(payload.as_ref())));
        let captured = ctx.into_captured();
        let side_channels = self.record_side_channels(&key, &attempt_id, identity.name(), captured);

        let ending = match outcome {
            Ok(value) => self.store_result(&key, &attempt_id, value),
            Err(error) => Ending::Crashed(error),
        };
        let ending = match ending {
            Ending::Crashed(error) if tracker.first_sighting(&error) => {
                let mut crash = CrashRecord::from_error(&error, environment);
                crash.attempt_id = Some(attempt_id.clone());
                crash.function = Some(identity.name().to_string());
                crash.signature = Some(address.clone());
                match self.ledger.record_crash(&key, &crash) {
                    Ok(()) => Ending::Crashed(error),
                    Err(err) => Ending::Aborted(err),
                }
            }
            other => other,
        };

        let outcome = match &ending {
            Ending::Stored { result, .. } => AttemptOutcome::Succeeded {
                result: result.result.clone(),
            },
            Ending::Crashed(error) => AttemptOutcome::Crashed {
                exception_type: error.kind().to_string(),
                message: error.message().to_string(),
            },
            Ending::Aborted(err) => AttemptOutcome::Aborted {
                reason: err.to_string(),
            },
        };
        let finished = self.ledger.record_attempt(
            &key,
            &AttemptRecord::Finished {
                attempt_id,
                finished_at: Utc::now(),
                outcome,
            },
        );

        match ending {
            Ending::Stored { result, value } => {
                finished?;
                side_channels?;
                info!(
                    function = %identity,
                    signature = %address.short(),
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "execution succeeded"
                );
                Ok(Execution::Succeeded { result, value })
            }
            Ending::Crashed(error) => {
                finished?;
                side_channels?;
                warn!(
                    function = %identity,
                    signature = %address.short(),
                    error = %error,
                    "execution crashed"
                );
                Ok(Execution::Crashed(error))
            }
            Ending::Aborted(err) => {
                if let Err(marker) = finished {
                    warn!(signature = %address.short(), error = %marker, "cannot write end marker");
                }
                warn!(
                    function = %identity,
                    signature = %address.short(),
                    error = %err,
                    "execution aborted"
                );
                Err(err)
            }
        }
    }

    /// Write captured output and events. Failures are reported only after
    /// the attempt's end marker is written.
    fn record_side_channels(
        &self,
        key: &SignatureKey,
        attempt_id: &AttemptId,
        function: &str,
        captured: CapturedOutput,
    ) -> LedgerResult<()> {
        if !captured.stdout.is_empty() || !captured.stderr.is_empty() {
            self.ledger.record_output(
                key,
                &OutputRecord {
                    attempt_id: attempt_id.clone(),
                    stdout: captured.stdout,
                    stderr: captured.stderr,
                    recorded_at: Utc::now(),
                },
            )?;
        }
        for mut event in captured.events {
            event.function = Some(function.to_string());
            self.ledger.record_event(key, &event)?;
        }
        Ok(())
    }

    /// Store the returned value and its result record. A value the store
    /// rejects is a crash of the call; a storage outage aborts the attempt.
    fn store_result(&self, key: &SignatureKey, attempt_id: &AttemptId, value: Value) -> Ending {
        let stored = self
            .store
            .put(&value)
            .map_err(LedgerError::from)
            .and_then(|address| {
                let result = ExecutionResult {
                    result: address,
                    attempt_id: attempt_id.clone(),
                    recorded_at: Utc::now(),
                };
                self.ledger.record_result(key, &result)?;
                Ok(result)
            });
        match stored {
            Ok(result) => Ending::Stored { result, value },
            Err(err) if err.kind().is_transient() => Ending::Aborted(err),
            Err(err) => Ending::Crashed(FunctionError::new(
                "ResultError",
                format!("cannot store result: {err}"),
            )),
        }
    }
}

/// How an attempt ends once its start marker is written.
enum Ending {
    Stored { result: ExecutionResult, value: Value },
    Crashed(FunctionError),
    Aborted(LedgerError),
}

fn panic_error(payload: &(dyn std::any::Any + Send)) -> FunctionError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "function panicked".to_string());
    FunctionError::new("Panic", message)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::environment::SystemEnvironment;
    use crate::function::{pure_fn, FunctionIdentity};
    use std::sync::atomic::{AtomicBool, Ordering};

    use cachet_store::{
        InMemoryKvStore, KvStore, StoreError, StoreKey, StoreResult, WriteOutcome, VALUES_NAMESPACE,
    };
    use cachet_types::{ErrorKind, RawArgs, MAX_VALUE_DEPTH};

    struct Fixture {
        store: ContentStore,
        ledger: ExecutionLedger,
        registry: FunctionRegistry,
    }

    /// Backend whose value namespace can be taken offline.
    struct OutageStore {
        inner: InMemoryKvStore,
        values_down: AtomicBool,
    }

    impl KvStore for OutageStore {
        fn read(&self, key: &StoreKey) -> StoreResult<Option<Vec<u8>>> {
            self.inner.read(key)
        }
        fn write(&self, key: &StoreKey, value: &[u8]) -> StoreResult<()> {
            self.inner.write(key, value)
        }
        fn write_once(&self, key: &StoreKey, value: &[u8]) -> StoreResult<WriteOutcome> {
            if self.values_down.load(Ordering::SeqCst) && key.segments()[0] == VALUES_NAMESPACE {
                return Err(StoreError::Io(std::io::Error::other("disk unplugged")));
            }
            self.inner.write_once(key, value)
        }
        fn compare_and_swap(
            &self,
            key: &StoreKey,
            expected: Option<&[u8]>,
            new: Option<&[u8]>,
        ) -> StoreResult<bool> {
            self.inner.compare_and_swap(key, expected, new)
        }
        fn delete(&self, key: &StoreKey) -> StoreResult<bool> {
            self.inner.delete(key)
        }
        fn list(&self, prefix: &StoreKey) -> StoreResult<Vec<StoreKey>> {
            self.inner.list(prefix)
        }
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_backend(Arc::new(InMemoryKvStore::new()))
        }

        fn with_backend(backend: Arc<dyn KvStore>) -> Self {
            let mut registry = FunctionRegistry::new();
            registry
                .register(pure_fn(
                    FunctionIdentity::new("square", "1").unwrap(),
                    |ctx, args| {
                        let n = args.int("n")?;
                        ctx.print(format!("squaring {n}"));
                        ctx.log_event("squared", serde_json::json!({ "n": n }));
                        Ok(Value::from(n * n))
                    },
                ))
                .unwrap();
            registry
                .register(pure_fn(
                    FunctionIdentity::new("explode", "1").unwrap(),
                    |ctx, _args| {
                        ctx.eprint("about to fail");
                        Err(FunctionError::new("ValueError", "exploded"))
                    },
                ))
                .unwrap();
            registry
                .register(pure_fn(
                    FunctionIdentity::new("panics", "1").unwrap(),
                    |_ctx, _args| panic!("unexpected state"),
                ))
                .unwrap();
            registry
                .register(pure_fn(
                    FunctionIdentity::new("deep", "1").unwrap(),
                    |ctx, _args| {
                        ctx.print("building");
                        let mut value = Value::Null;
                        for _ in 0..=MAX_VALUE_DEPTH {
                            value = Value::List(vec![value]);
                        }
                        Ok(value)
                    },
                ))
                .unwrap();
            Self {
                store: ContentStore::new(backend.clone()),
                ledger: ExecutionLedger::new(backend),
                registry,
            }
        }

        fn executor(&self) -> Executor<'_> {
            Executor {
                store: &self.store,
                ledger: &self.ledger,
                registry: &self.registry,
                environment: &SystemEnvironment,
            }
        }

        fn signature(&self, name: &str, args: RawArgs) -> CallSignature {
            let identity = FunctionIdentity::new(name, "1").unwrap();
            CallSignature::new(&self.store, &identity, &args).unwrap()
        }
    }

    #[test]
    fn success_records_result_output_and_events() {
        let fx = Fixture::new();
        let sig = fx.signature("square", RawArgs::new().with("n", 7i64).unwrap());
        let tracker = CrashTracker::new();

        let Execution::Succeeded { result, value } =
            fx.executor().execute(&sig, &tracker, None, 0).unwrap()
        else {
            panic!("expected success");
        };
        assert_eq!(value, Value::from(49i64));
        assert_eq!(fx.store.get::<Value>(&result.result).unwrap(), value);

        let key = SignatureKey::for_signature(&sig).unwrap();
        assert_eq!(fx.ledger.latest_result(&key).unwrap(), Some(result));
        let record = fx.ledger.last_execution(&key).unwrap().unwrap();
        assert!(record.succeeded());
        assert_eq!(record.output.unwrap().stdout, "squaring 7\n");
        assert_eq!(record.events.len(), 1);
        assert_eq!(record.events[0].function.as_deref(), Some("square"));
    }

    #[test]
    fn crash_records_crash_and_end_marker() {
        let fx = Fixture::new();
        let sig = fx.signature("explode", RawArgs::new());
        let tracker = CrashTracker::new();

        let Execution::Crashed(err) = fx.executor().execute(&sig, &tracker, None, 0).unwrap()
        else {
            panic!("expected crash");
        };
        assert_eq!(err.kind(), "ValueError");

        let key = SignatureKey::for_signature(&sig).unwrap();
        let crashes = fx.ledger.crashes(&key).unwrap();
        assert_eq!(crashes.len(), 1);
        assert_eq!(crashes[0].instance_id, err.instance());
        assert!(!fx.ledger.has_result(&key).unwrap());
        assert!(fx.ledger.latest_outcome_is_crash(&key).unwrap());
        assert_eq!(fx.ledger.crash_history(None).unwrap().len(), 1);
        let record = fx.ledger.last_execution(&key).unwrap().unwrap();
        assert_eq!(record.output.unwrap().stderr, "about to fail\n");
    }

    #[test]
    fn already_processed_crash_is_not_recorded_again() {
        let fx = Fixture::new();
        let sig = fx.signature("explode", RawArgs::new());
        let tracker = CrashTracker::new();
        fx.executor().execute(&sig, &tracker, None, 0).unwrap();
        fx.executor().execute(&sig, &tracker, None, 0).unwrap();

        // Two attempts, two distinct error instances, two crashes.
        let key = SignatureKey::for_signature(&sig).unwrap();
        assert_eq!(fx.ledger.attempt_count(&key).unwrap(), 2);
        assert_eq!(fx.ledger.crashes(&key).unwrap().len(), 2);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn panics_become_crashes() {
        let fx = Fixture::new();
        let sig = fx.signature("panics", RawArgs::new());
        let tracker = CrashTracker::new();
        let Execution::Crashed(err) = fx.executor().execute(&sig, &tracker, None, 0).unwrap()
        else {
            panic!("expected crash");
        };
        assert_eq!(err.kind(), "Panic");
        assert_eq!(err.message(), "unexpected state");
    }

    #[test]
    fn missing_argument_is_a_crash_not_an_infrastructure_error() {
        let fx = Fixture::new();
        let sig = fx.signature("square", RawArgs::new());
        let tracker = CrashTracker::new();
        let Execution::Crashed(err) = fx.executor().execute(&sig, &tracker, None, 0).unwrap()
        else {
            panic!("expected crash");
        };
        assert_eq!(err.kind(), "ArgumentError");
    }

    #[test]
    fn unknown_function_fails_before_any_attempt() {
        let fx = Fixture::new();
        let sig = fx.signature("unregistered", RawArgs::new());
        let tracker = CrashTracker::new();
        assert!(fx.executor().execute(&sig, &tracker, None, 0).is_err());
        let key = SignatureKey::for_signature(&sig).unwrap();
        assert_eq!(fx.ledger.attempt_count(&key).unwrap(), 0);
    }

    #[test]
    fn unstorable_result_is_a_finished_crash() {
        let fx = Fixture::new();
        let sig = fx.signature("deep", RawArgs::new());
        let tracker = CrashTracker::new();

        let Execution::Crashed(err) = fx.executor().execute(&sig, &tracker, None, 0).unwrap()
        else {
            panic!("expected crash");
        };
        assert_eq!(err.kind(), "ResultError");

        let key = SignatureKey::for_signature(&sig).unwrap();
        assert_eq!(fx.ledger.attempt_count(&key).unwrap(), 1);
        assert_eq!(fx.ledger.crashes(&key).unwrap().len(), 1);
        assert!(fx.ledger.latest_outcome_is_crash(&key).unwrap());
        assert!(!fx.ledger.has_result(&key).unwrap());
        let record = fx.ledger.last_execution(&key).unwrap().unwrap();
        assert!(record.is_finished());
        assert_eq!(record.output.unwrap().stdout, "building\n");
        assert!(matches!(
            record.outcome,
            Some(AttemptOutcome::Crashed { ref exception_type, .. }) if exception_type == "ResultError"
        ));
    }

    #[test]
    fn storage_outage_aborts_the_attempt() {
        let backend = Arc::new(OutageStore {
            inner: InMemoryKvStore::new(),
            values_down: AtomicBool::new(false),
        });
        let fx = Fixture::with_backend(backend.clone());
        let sig = fx.signature("square", RawArgs::new().with("n", 3i64).unwrap());
        let tracker = CrashTracker::new();
        backend.values_down.store(true, Ordering::SeqCst);

        let err = fx.executor().execute(&sig, &tracker, None, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);

        let key = SignatureKey::for_signature(&sig).unwrap();
        let record = fx.ledger.last_execution(&key).unwrap().unwrap();
        assert!(record.is_finished());
        assert!(matches!(record.outcome, Some(AttemptOutcome::Aborted { .. })));
        assert!(fx.ledger.crashes(&key).unwrap().is_empty());
        // Retryable: an aborted attempt is not a crash outcome.
        assert!(!fx.ledger.latest_outcome_is_crash(&key).unwrap());

        backend.values_down.store(false, Ordering::SeqCst);
        assert!(matches!(
            fx.executor().execute(&sig, &tracker, None, 0).unwrap(),
            Execution::Succeeded { .. }
        ));
    }
}
