pub mod cache;
pub mod string;

pub use cache::SecretCache;
pub use string::SecretString;

use keyring::Entry;
use regex::Regex;
use sdk::errors::EngineError;
use std::sync::OnceLock;

/// SecretManager resolves API keys for the model backend and the web tools.
///
/// Lookup order for a secret named `openai_api_key`:
/// 1. Environment variable `OPENAI_API_KEY`
/// 2. OS keychain entry under the manager's service name
///
/// Runs never prompt. A missing secret is reported as
/// `EngineError::SecretNotFound` so that unattended runs fail fast.
///
/// The SecretManager also provides secret scrubbing functionality to remove
/// sensitive data from diagnostics before they are printed or persisted.
pub struct SecretManager {
    service_name: String,
}

/// Where a secret was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    Environment,
    Keychain,
    Missing,
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSource::Environment => write!(f, "environment"),
            SecretSource::Keychain => write!(f, "keychain"),
            SecretSource::Missing => write!(f, "missing"),
        }
    }
}

/// Regex patterns for detecting common secret formats.
/// These are compiled once and reused for performance.
static SECRET_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

/// Initializes and returns the secret detection patterns.
///
/// Patterns match:
/// - OpenAI-style API keys: sk-[a-zA-Z0-9]{20,}
/// - Google API keys: AIza[0-9A-Za-z-_]{35}
/// - Jina reader keys: jina_[a-zA-Z0-9]{20,}
/// - GitHub tokens: ghp_[a-zA-Z0-9]{36}
/// - Bearer tokens: Bearer\s+[^\s]{20,}
fn get_secret_patterns() -> &'static Vec<Regex> {
    SECRET_PATTERNS.get_or_init(|| {
        [
            r"sk-[a-zA-Z0-9\-_]{20,}",
            r"AIza[0-9A-Za-z\-_]{35}",
            r"jina_[a-zA-Z0-9\-_]{20,}",
            r"ghp_[a-zA-Z0-9]{36}",
            r"Bearer\s+[^\s]{20,}",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// Scrubs secrets from text by replacing them with [REDACTED].
///
/// # Examples
/// ```
/// let scrubbed = recap_engine::secrets::scrub("My API key is sk-1234567890abcdefghij");
/// assert_eq!(scrubbed, "My API key is [REDACTED]");
/// ```
pub fn scrub(text: &str) -> String {
    let mut result = text.to_string();
    for pattern in get_secret_patterns() {
        result = pattern.replace_all(&result, "[REDACTED]").to_string();
    }
    result
}

/// Name of the environment variable consulted for a secret key
pub fn env_var_name(key: &str) -> String {
    key.to_uppercase()
}

impl SecretManager {
    /// Creates a new SecretManager with the given service name.
    ///
    /// The service name is used to namespace secrets in the OS keychain.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Retrieves a secret from the environment or the OS keychain.
    ///
    /// # Errors
    /// - `EngineError::SecretNotFound` if neither source has the secret
    /// - `EngineError::KeyringError` if keychain access fails
    pub fn get_secret(&self, key: &str) -> Result<String, EngineError> {
        if let Ok(value) = std::env::var(env_var_name(key)) {
            if !value.trim().is_empty() {
                tracing::debug!("Resolved secret '{}' from environment", key);
                return Ok(value.trim().to_string());
            }
        }

        let entry = self.entry(key)?;
        match entry.get_password() {
            Ok(secret) => {
                tracing::debug!("Retrieved secret '{}' from keychain", key);
                Ok(secret)
            }
            Err(keyring::Error::NoEntry) => Err(EngineError::SecretNotFound(format!(
                "'{}' (set {} or run 'recap secret set {}')",
                key,
                env_var_name(key),
                key
            ))),
            Err(e) => Err(EngineError::KeyringError(format!(
                "Failed to retrieve secret '{}': {}",
                key, e
            ))),
        }
    }

    /// Stores a secret in the OS keychain.
    ///
    /// # Errors
    /// Returns `EngineError::KeyringError` if keychain access fails or the
    /// value is empty
    pub fn set_secret(&self, key: &str, value: &str) -> Result<(), EngineError> {
        if value.trim().is_empty() {
            return Err(EngineError::KeyringError(
                "Secret cannot be empty".to_string(),
            ));
        }

        self.entry(key)?.set_password(value.trim()).map_err(|e| {
            EngineError::KeyringError(format!("Failed to store secret '{}': {}", key, e))
        })?;

        tracing::info!("Stored secret '{}' in keychain", key);
        Ok(())
    }

    /// Deletes a secret from the OS keychain.
    ///
    /// # Errors
    /// Returns `EngineError::KeyringError` if keychain access fails
    pub fn delete_secret(&self, key: &str) -> Result<(), EngineError> {
        self.entry(key)?.delete_password().map_err(|e| {
            EngineError::KeyringError(format!("Failed to delete secret '{}': {}", key, e))
        })?;

        tracing::info!("Deleted secret '{}' from keychain", key);
        Ok(())
    }

    /// Reports where a secret would be resolved from, without reading it out.
    pub fn source_of(&self, key: &str) -> SecretSource {
        if std::env::var(env_var_name(key))
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
        {
            return SecretSource::Environment;
        }

        match self.entry(key) {
            Ok(entry) if entry.get_password().is_ok() => SecretSource::Keychain,
            _ => SecretSource::Missing,
        }
    }

    /// Checks if a secret can be resolved.
    pub fn has_secret(&self, key: &str) -> bool {
        self.source_of(key) != SecretSource::Missing
    }

    /// Scrubs secrets from text. See [`scrub`].
    pub fn scrub(&self, text: &str) -> String {
        scrub(text)
    }

    fn entry(&self, key: &str) -> Result<Entry, EngineError> {
        Entry::new(&self.service_name, key).map_err(|e| {
            EngineError::KeyringError(format!("Failed to create keyring entry: {}", e))
        })
    }
}
