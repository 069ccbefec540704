//! Records appended to the execution ledger.
//!
//! Every record is written once and never edited. A single execution
//! attempt produces a `Started` marker, then output and events, then either
//! a result or a crash, and finally a `Finished` marker. Grouping these by
//! attempt id yields an [`ExecutionRecord`].

use std::fmt;

use cachet_types::ValueAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::environment::EnvironmentSummary;
use crate::function::FunctionError;

/// Identifier of one execution attempt, `run_<uuid v7>`.
///
/// UUID v7 ids sort by creation time.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttemptId(String);

impl AttemptId {
    pub fn generate() -> Self {
        Self(format!("run_{}", Uuid::now_v7().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttemptId({})", self.0)
    }
}

/// How an attempt ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded {
        result: ValueAddress,
    },
    Crashed {
        exception_type: String,
        message: String,
    },
    /// Storage failed before the attempt could record its outcome. The
    /// call itself is still eligible for retry.
    Aborted {
        reason: String,
    },
}

/// Start and end markers of an execution attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum AttemptRecord {
    Started {
        attempt_id: AttemptId,
        started_at: DateTime<Utc>,
        environment: EnvironmentSummary,
    },
    Finished {
        attempt_id: AttemptId,
        finished_at: DateTime<Utc>,
        outcome: AttemptOutcome,
    },
}

impl AttemptRecord {
    pub fn attempt_id(&self) -> &AttemptId {
        match self {
            Self::Started { attempt_id, .. } | Self::Finished { attempt_id, .. } => attempt_id,
        }
    }
}

/// The value produced by a successful attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub result: ValueAddress,
    pub attempt_id: AttemptId,
    pub recorded_at: DateTime<Utc>,
}

/// A failure raised by a function body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashRecord {
    pub exception_type: String,
    pub message: String,
    pub instance_id: Uuid,
    pub attempt_id: Option<AttemptId>,
    /// Function the crash originated in.
    pub function: Option<String>,
    pub signature: Option<ValueAddress>,
    pub timestamp: DateTime<Utc>,
    pub environment: EnvironmentSummary,
}

impl CrashRecord {
    pub fn from_error(error: &FunctionError, environment: EnvironmentSummary) -> Self {
        Self {
            exception_type: error.kind().to_string(),
            message: error.message().to_string(),
            instance_id: error.instance(),
            attempt_id: None,
            function: None,
            signature: None,
            timestamp: Utc::now(),
            environment,
        }
    }
}

/// Text a function printed while it ran.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub attempt_id: AttemptId,
    pub stdout: String,
    pub stderr: String,
    pub recorded_at: DateTime<Utc>,
}

/// A structured event logged by a function or by the runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: Uuid,
    pub message: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub attempt_id: Option<AttemptId>,
    pub function: Option<String>,
    pub signature: Option<ValueAddress>,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(message: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            message: message.into(),
            payload,
            attempt_id: None,
            function: None,
            signature: None,
            timestamp: Utc::now(),
        }
    }
}

/// Everything the ledger knows about one attempt.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub attempt_id: AttemptId,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub environment: Option<EnvironmentSummary>,
    pub outcome: Option<AttemptOutcome>,
    pub output: Option<OutputRecord>,
    pub events: Vec<EventRecord>,
    pub crashes: Vec<CrashRecord>,
    pub result: Option<ExecutionResult>,
}

impl ExecutionRecord {
    pub(crate) fn empty(attempt_id: AttemptId) -> Self {
        Self {
            attempt_id,
            started_at: None,
            finished_at: None,
            environment: None,
            outcome: None,
            output: None,
            events: Vec::new(),
            crashes: Vec::new(),
            result: None,
        }
    }

    /// Whether the attempt reached its end marker.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Some(AttemptOutcome::Succeeded { .. }))
    }
}
