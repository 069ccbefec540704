use std::path::PathBuf;
use std::sync::Arc;

use cachet_store::{FsKvStore, FsStoreConfig, KvStore};
use tracing::debug;

use crate::error::SdkResult;

/// Environment variable naming the directory of the active store.
pub const STORE_ENV_VAR: &str = "CACHET_STORE";

/// Finds the backing store when none is passed explicitly.
pub trait ActiveStoreResolver: Send + Sync {
    /// The currently active store, or `None` if there is none.
    fn active_store(&self) -> SdkResult<Option<Arc<dyn KvStore>>>;
}

/// Always resolves to the same store.
pub struct FixedStore(pub Arc<dyn KvStore>);

impl ActiveStoreResolver for FixedStore {
    fn active_store(&self) -> SdkResult<Option<Arc<dyn KvStore>>> {
        Ok(Some(Arc::clone(&self.0)))
    }
}

/// Opens a filesystem store at the directory named by `CACHET_STORE`.
#[derive(Clone, Debug, Default)]
pub struct EnvStoreResolver {
    pub config: FsStoreConfig,
}

impl EnvStoreResolver {
    pub fn new(config: FsStoreConfig) -> Self {
        Self { config }
    }

    fn root(&self) -> Option<PathBuf> {
        std::env::var_os(STORE_ENV_VAR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }
}

impl ActiveStoreResolver for EnvStoreResolver {
    fn active_store(&self) -> SdkResult<Option<Arc<dyn KvStore>>> {
        let Some(root) = self.root() else {
            return Ok(None);
        };
        debug!(root = %root.display(), "opening store from {STORE_ENV_VAR}");
        let store = FsKvStore::open(root, self.config.clone())?;
        Ok(Some(Arc::new(store)))
    }
}
