use crate::secrets::string::SecretString;
use crate::secrets::SecretManager;
use sdk::errors::EngineError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// An in-memory cache for resolved secrets.
///
/// Providers and tools ask the cache on every request; the environment and
/// the OS keychain are consulted once per key.
#[derive(Clone)]
pub struct SecretCache {
    manager: Arc<SecretManager>,
    cache: Arc<RwLock<HashMap<String, SecretString>>>,
}

impl SecretCache {
    /// Creates a new SecretCache wrapping the provided SecretManager
    pub fn new(manager: Arc<SecretManager>) -> Self {
        Self {
            manager,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Retrieves a secret, checking the memory cache first.
    pub fn get_secret(&self, key: &str) -> Result<SecretString, EngineError> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(secret) = cache.get(key) {
                return Ok(secret.clone());
            }
        }

        let secret = SecretString::new(self.manager.get_secret(key)?);
        self.insert(key, secret.clone());
        Ok(secret)
    }

    /// Places a secret directly into the cache, bypassing lookup.
    pub fn insert(&self, key: &str, secret: impl Into<SecretString>) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(key.to_string(), secret.into());
    }

    /// Pre-loads a set of keys so that missing secrets surface before a run starts.
    pub fn preload(&self, keys: &[&str]) -> Result<(), EngineError> {
        for key in keys {
            self.get_secret(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserted_secret_is_served_from_cache() {
        let cache = SecretCache::new(Arc::new(SecretManager::new("recap-cache-test")));
        cache.insert("serper_api_key", "abc123");
        assert_eq!(
            cache.get_secret("serper_api_key").unwrap().unsecure(),
            "abc123"
        );
    }

    #[test]
    fn test_missing_secret_fails() {
        let cache = SecretCache::new(Arc::new(SecretManager::new("recap-cache-test")));
        let result = cache.get_secret("recap_cache_missing_key_1187");
        assert!(result.is_err());
    }
}
