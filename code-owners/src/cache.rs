use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{
    backend::InvalidConfigError,
    loader::{ConfigLoader, LoadError},
    owner_config::{ConfigKey, OwnerConfig, Revision},
};

type CacheKey = (ConfigKey, Option<Revision>);
type CachedLoad = Result<Option<Arc<OwnerConfig>>, InvalidConfigError>;

/// Memoizes config loads for the duration of one status computation, so
/// that an ancestor folder's config is read once rather than once per changed
/// file. Entries are keyed by config key and requested revision; a cache is
/// created per request and dropped with it, so branch tips can't go stale.
///
/// Storage errors aren't cached. When a capacity is set and reached, further
/// loads go straight to the wrapped loader.
pub struct RequestCache<'a> {
    loader: &'a dyn ConfigLoader,
    entries: Arc<RwLock<HashMap<CacheKey, CachedLoad>>>,
    capacity: Option<usize>,
}

impl<'a> RequestCache<'a> {
    pub fn new(loader: &'a dyn ConfigLoader) -> Self {
        Self {
            loader,
            entries: Arc::new(RwLock::new(HashMap::new())),
            capacity: None,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("valid lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_cached(&self, key: &CacheKey) -> Option<CachedLoad> {
        self.entries.read().expect("valid lock").get(key).cloned()
    }

    fn set_cached(&self, key: CacheKey, value: CachedLoad) {
        let mut entries = self.entries.write().expect("valid lock");
        if self.capacity.map_or(true, |capacity| entries.len() < capacity) {
            entries.insert(key, value);
        }
    }
}

impl<'a> ConfigLoader for RequestCache<'a> {
    fn load(
        &self,
        key: &ConfigKey,
        revision: Option<&Revision>,
    ) -> Result<Option<Arc<OwnerConfig>>, LoadError> {
        let cache_key = (key.clone(), revision.cloned());
        if let Some(cached) = self.get_cached(&cache_key) {
            return cached.map_err(LoadError::InvalidConfig);
        }

        let loaded = match self.loader.load(key, revision) {
            Ok(config) => Ok(config),
            Err(LoadError::InvalidConfig(err)) => Err(err),
            Err(err @ LoadError::Storage(_)) => return Err(err),
        };
        self.set_cached(cache_key, loaded.clone());
        loaded.map_err(LoadError::InvalidConfig)
    }

    fn file_name(&self) -> &str {
        self.loader.file_name()
    }
}
