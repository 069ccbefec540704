use cachet_types::{RawArgs, Value, ValueAddress};

use crate::crash::CrashTracker;
use crate::function::{FunctionError, FunctionIdentity};
use crate::records::{AttemptId, EventRecord};

/// Deepest chain of nested calls a single top-level call may make.
pub const MAX_CALL_DEPTH: usize = 256;

/// Runs a nested call on behalf of a function body.
///
/// Implemented by the cache so nested calls are memoized exactly like
/// top-level ones and share the caller's [`CrashTracker`].
pub trait NestedInvoker {
    fn invoke(
        &self,
        function: &FunctionIdentity,
        arguments: &RawArgs,
        tracker: &CrashTracker,
        depth: usize,
    ) -> Result<Value, FunctionError>;
}

/// Handle a function body uses to print, log events and call other
/// functions while it runs.
///
/// Everything written here is captured and appended to the execution
/// ledger under the current attempt once the body returns.
pub struct ExecutionContext<'a> {
    attempt_id: AttemptId,
    signature: ValueAddress,
    depth: usize,
    tracker: &'a CrashTracker,
    invoker: Option<&'a dyn NestedInvoker>,
    stdout: String,
    stderr: String,
    events: Vec<EventRecord>,
}

/// What a finished body left behind in its context.
#[derive(Debug, Default)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub events: Vec<EventRecord>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        attempt_id: AttemptId,
        signature: ValueAddress,
        depth: usize,
        tracker: &'a CrashTracker,
        invoker: Option<&'a dyn NestedInvoker>,
    ) -> Self {
        Self {
            attempt_id,
            signature,
            depth,
            tracker,
            invoker,
            stdout: String::new(),
            stderr: String::new(),
            events: Vec::new(),
        }
    }

    pub fn attempt_id(&self) -> &AttemptId {
        &self.attempt_id
    }

    /// Address of the call being executed.
    pub fn signature(&self) -> &ValueAddress {
        &self.signature
    }

    /// 0 for a top-level call, 1 for its direct nested calls, and so on.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Append a line to captured stdout.
    pub fn print(&mut self, line: impl AsRef<str>) {
        self.stdout.push_str(line.as_ref());
        self.stdout.push('\n');
    }

    /// Append a line to captured stderr.
    pub fn eprint(&mut self, line: impl AsRef<str>) {
        self.stderr.push_str(line.as_ref());
        self.stderr.push('\n');
    }

    /// Record a structured event.
    pub fn log_event(&mut self, message: impl Into<String>, payload: serde_json::Value) {
        let mut event = EventRecord::new(message, payload);
        event.attempt_id = Some(self.attempt_id.clone());
        event.signature = Some(self.signature.clone());
        self.events.push(event);
    }

    /// Call another pure function through the cache.
    pub fn call(
        &mut self,
        function: &FunctionIdentity,
        arguments: &RawArgs,
    ) -> Result<Value, FunctionError> {
        if self.depth + 1 > MAX_CALL_DEPTH {
            return Err(FunctionError::new(
                "RecursionError",
                format!("nested call depth exceeds {MAX_CALL_DEPTH}"),
            ));
        }
        let invoker = self.invoker.ok_or_else(|| {
            FunctionError::new(
                "RuntimeError",
                format!("no invoker available for nested call to {function}"),
            )
        })?;
        invoker.invoke(function, arguments, self.tracker, self.depth + 1)
    }

    pub fn into_captured(self) -> CapturedOutput {
        CapturedOutput {
            stdout: self.stdout,
            stderr: self.stderr,
            events: self.events,
        }
    }
}
