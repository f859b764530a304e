use thiserror::Error;

use crate::{
    analytics::AnalyticsError, cache::error::CacheError, config::ConfigError,
    search_index::SearchIndexError, secrets::SecretError,
};

/// Crate-wide error taxonomy. Every component-level error (`CacheError`,
/// `SearchIndexError`, `AnalyticsError`, `SecretError`, ...) converts into
/// one of these variants, so callers outside the cache manager only ever
/// need to match on this shape.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Upstream returned a retryable-by-the-caller condition (5xx, timeout,
    /// connection reset). Not retried internally — see the upstream client.
    #[error("transient upstream error: {0}")]
    TransientUpstream(String),

    /// Upstream returned 429. The credential that made the call has
    /// already been cooled down by the time this surfaces.
    #[error("rate limited by upstream")]
    RateLimited,

    /// Upstream returned 403.
    #[error("forbidden by upstream")]
    Forbidden,

    /// Upstream returned 404 or an empty result set the caller should treat
    /// as absence rather than failure.
    #[error("not found")]
    NotFound,

    /// L1 (and, if configured, L2) are both unavailable; there is nowhere
    /// left to read from or write through to.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Neither pool (guest or account) has a usable credential.
    #[error("no credentials available")]
    CredentialsExhausted,

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<CacheError> for CoreError {
    fn from(err: CacheError) -> Self {
        CoreError::CacheUnavailable(err.to_string())
    }
}

impl From<SearchIndexError> for CoreError {
    fn from(err: SearchIndexError) -> Self {
        CoreError::CacheUnavailable(err.to_string())
    }
}

impl From<AnalyticsError> for CoreError {
    fn from(err: AnalyticsError) -> Self {
        // Analytics is best-effort by design (see cache_manager); a caller
        // that does surface this should treat it as non-fatal.
        CoreError::CacheUnavailable(err.to_string())
    }
}

impl From<SecretError> for CoreError {
    fn from(err: SecretError) -> Self {
        CoreError::Config(err.to_string())
    }
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
