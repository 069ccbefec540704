use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cachet_store::Addressable;
use cachet_types::{MaterializedArgs, TypeError, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::{LedgerError, LedgerResult};

pub const MAX_FUNCTION_NAME_LEN: usize = 100;
pub const MAX_VERSION_LEN: usize = 128;

/// Stable identity of a pure function: its name plus a version string that
/// changes whenever the function's code does.
///
/// Two calls share cached results only when their identities are equal, so
/// bumping the version invalidates every earlier result.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionIdentity {
    name: String,
    version: String,
}

impl FunctionIdentity {
    /// Names are `[a-z][a-z0-9_]*`; versions are any non-empty printable text.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> LedgerResult<Self> {
        let name = name.into();
        let version = version.into();
        let invalid = |reason: &str| LedgerError::InvalidFunctionName {
            name: name.clone(),
            reason: reason.to_string(),
        };
        if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
            return Err(invalid("name must start with a lowercase letter"));
        }
        if name.len() > MAX_FUNCTION_NAME_LEN {
            return Err(invalid("name is too long"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(invalid("name may only contain a-z, 0-9 and '_'"));
        }
        if version.is_empty() || version.len() > MAX_VERSION_LEN {
            return Err(invalid("version must be 1 to 128 bytes"));
        }
        if version.chars().any(char::is_control) {
            return Err(invalid("version contains control characters"));
        }
        Ok(Self { name, version })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for FunctionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl Addressable for FunctionIdentity {
    fn descriptor(&self) -> String {
        format!("fn_{}", self.name)
    }
}

/// A failure raised by a function body.
///
/// Every error carries an instance id. Clones keep the id, so the same
/// failure propagating through several nested executions is recognised as
/// one crash rather than many.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FunctionError {
    kind: String,
    message: String,
    instance: Uuid,
}

impl FunctionError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            instance: Uuid::new_v4(),
        }
    }

    /// Exception type, e.g. `ValueError`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }
}

impl From<TypeError> for FunctionError {
    fn from(err: TypeError) -> Self {
        Self::new("ArgumentError", err.to_string())
    }
}

/// A deterministic function whose results may be cached forever.
pub trait PureFunction: Send + Sync {
    fn identity(&self) -> &FunctionIdentity;

    /// Run the body. Output and events go through `ctx`; nested calls made
    /// through `ctx` are cached like top-level ones.
    fn call(
        &self,
        ctx: &mut ExecutionContext<'_>,
        args: &MaterializedArgs,
    ) -> Result<Value, FunctionError>;
}

/// Adapter turning a closure into a [`PureFunction`].
pub struct FnFunction<F> {
    identity: FunctionIdentity,
    body: F,
}

impl<F> PureFunction for FnFunction<F>
where
    F: Fn(&mut ExecutionContext<'_>, &MaterializedArgs) -> Result<Value, FunctionError>
        + Send
        + Sync,
{
    fn identity(&self) -> &FunctionIdentity {
        &self.identity
    }

    fn call(
        &self,
        ctx: &mut ExecutionContext<'_>,
        args: &MaterializedArgs,
    ) -> Result<Value, FunctionError> {
        (self.body)(ctx, args)
    }
}

/// Wrap a closure as a shareable [`PureFunction`].
pub fn pure_fn<F>(identity: FunctionIdentity, body: F) -> Arc<dyn PureFunction>
where
    F: Fn(&mut ExecutionContext<'_>, &MaterializedArgs) -> Result<Value, FunctionError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnFunction { identity, body })
}

/// Decides whether a function may run in a process other than the caller's.
pub trait RelocationPolicy: Send + Sync {
    fn is_relocatable(&self, identity: &FunctionIdentity) -> bool;
}

/// Treats every function as relocatable.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl RelocationPolicy for AllowAll {
    fn is_relocatable(&self, _identity: &FunctionIdentity) -> bool {
        true
    }
}

struct Registered {
    function: Arc<dyn PureFunction>,
    relocatable: bool,
}

/// Maps function identities to implementations.
///
/// Worker processes build the same registry as the process that enqueued
/// the work, which is how a queued call signature finds its code again.
/// Functions registered with [`FunctionRegistry::register_local`] are only
/// available to the registering process and are refused by the queue.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<FunctionIdentity, Registered>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function: Arc<dyn PureFunction>) -> LedgerResult<()> {
        self.insert(function, true)
    }

    /// Register a function that must never be dispatched to another process.
    pub fn register_local(&mut self, function: Arc<dyn PureFunction>) -> LedgerResult<()> {
        self.insert(function, false)
    }

    fn insert(&mut self, function: Arc<dyn PureFunction>, relocatable: bool) -> LedgerResult<()> {
        let identity = function.identity().clone();
        if self.functions.contains_key(&identity) {
            return Err(LedgerError::DuplicateFunction {
                identity: identity.to_string(),
            });
        }
        self.functions.insert(
            identity,
            Registered {
                function,
                relocatable,
            },
        );
        Ok(())
    }

    pub fn resolve(&self, identity: &FunctionIdentity) -> LedgerResult<Arc<dyn PureFunction>> {
        self.functions
            .get(identity)
            .map(|r| Arc::clone(&r.function))
            .ok_or_else(|| LedgerError::UnknownFunction {
                identity: identity.to_string(),
            })
    }

    /// Look a function up by name alone. Fails if the name is ambiguous.
    pub fn find(&self, name: &str) -> LedgerResult<Arc<dyn PureFunction>> {
        let mut matches = self.functions.iter().filter(|(id, _)| id.name() == name);
        match (matches.next(), matches.next()) {
            (Some((_, r)), None) => Ok(Arc::clone(&r.function)),
            _ => Err(LedgerError::UnknownFunction {
                identity: name.to_string(),
            }),
        }
    }

    /// Registered identities, sorted.
    pub fn identities(&self) -> Vec<FunctionIdentity> {
        let mut ids: Vec<_> = self.functions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl RelocationPolicy for FunctionRegistry {
    fn is_relocatable(&self, identity: &FunctionIdentity) -> bool {
        self.functions
            .get(identity)
            .is_some_and(|r| r.relocatable)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.identities())
            .finish()
    }
}
