//! Secrets management for account/upstream credentials sourced outside the
//! config file.
//!
//! Two backends ship in-tree: environment variables (default for local
//! development) and in-memory (for tests). Cloud-specific backends
//! (AWS/Azure/GCP/Vault) are not carried forward; the trait seam is kept so
//! an operator can add one without touching the core.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type SecretResult<T> = Result<T, SecretError>;

/// Trait for managing secrets (provider API keys, etc.)
#[async_trait]
pub trait SecretManager: Send + Sync {
    /// Get a secret by key. Returns None if not found.
    async fn get(&self, key: &str) -> SecretResult<Option<String>>;

    /// Set a secret. Not all backends support this.
    async fn set(&self, key: &str, value: &str) -> SecretResult<()>;

    /// Delete a secret. Not all backends support this.
    async fn delete(&self, key: &str) -> SecretResult<()>;

    /// Check if the secret manager is healthy/connected.
    async fn health_check(&self) -> SecretResult<()> {
        Ok(())
    }
}

/// In-memory secret manager (for testing only)
pub struct MemorySecretManager {
    secrets: std::sync::Arc<dashmap::DashMap<String, String>>,
}

impl MemorySecretManager {
    pub fn new() -> Self {
        Self {
            secrets: std::sync::Arc::new(dashmap::DashMap::new()),
        }
    }
}

impl Default for MemorySecretManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretManager for MemorySecretManager {
    async fn get(&self, key: &str) -> SecretResult<Option<String>> {
        Ok(self.secrets.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> SecretResult<()> {
        self.secrets.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> SecretResult<()> {
        self.secrets.remove(key);
        Ok(())
    }
}

/// Environment-based secret manager (reads from env vars)
pub struct EnvSecretManager;

impl EnvSecretManager {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnvSecretManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretManager for EnvSecretManager {
    async fn get(&self, key: &str) -> SecretResult<Option<String>> {
        Ok(std::env::var(key).ok())
    }

    async fn set(&self, _key: &str, _value: &str) -> SecretResult<()> {
        Err(SecretError::Internal(
            "Cannot set secrets in environment manager".to_string(),
        ))
    }

    async fn delete(&self, _key: &str) -> SecretResult<()> {
        Err(SecretError::Internal(
            "Cannot delete secrets from environment manager".to_string(),
        ))
    }
}
