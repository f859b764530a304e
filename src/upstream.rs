//! Upstream GraphQL client: resolves egress, assembles headers and cookies
//! for either credential class, serializes operation variables/features into
//! query parameters, and classifies the HTTP response into the typed
//! conditions pool-release logic reacts to. Grounded on `client.py`'s
//! `graphql_request`/`_get_headers`/`_get_cookies` — same header set and
//! cookie names (`gt`, `ct0`), generalized from a single hardcoded token set
//! to either credential class.
//!
//! No retry loop lives here by design — a failed call surfaces a typed
//! [`CoreError`] and it is up to the caller (credential pool release, then
//! whatever re-dispatches) to decide what happens next. The client does,
//! however, hold capability handles onto both credential pools (§9) so it
//! can rotate a credential that has gone bad *before* using it for a call
//! (§4.8): `graphql` takes ownership of the credential it is handed and
//! returns a possibly-replaced one, which the caller releases into the
//! matching pool same as any other.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    config::UpstreamConfig,
    credentials::{
        AccountCredential, AccountPool, GuestCredential, GuestMintError, GuestMinter, GuestPool,
    },
    egress::EgressSelector,
    error::{CoreError, CoreResult},
    observability::metrics,
    session::SessionPool,
    txn::TxnGenerator,
};

/// Either credential class, abstracted over the fields the upstream client
/// needs to assemble a request.
pub trait UpstreamCredential: Send + Sync {
    fn egress_identity(&self) -> &str;
    fn csrf_token(&self) -> &str;
    fn credential_cookies(&self) -> HashMap<String, String>;
    fn session_cookies(&self) -> HashMap<String, String>;
}

impl UpstreamCredential for GuestCredential {
    fn egress_identity(&self) -> &str {
        &self.egress_identity
    }

    fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    fn credential_cookies(&self) -> HashMap<String, String> {
        let mut cookies = HashMap::with_capacity(2);
        cookies.insert("gt".to_string(), self.guest_token.clone());
        cookies.insert("ct0".to_string(), self.csrf_token.clone());
        cookies
    }

    fn session_cookies(&self) -> HashMap<String, String> {
        self.session_cookies.clone()
    }
}

impl UpstreamCredential for AccountCredential {
    fn egress_identity(&self) -> &str {
        &self.egress_identity
    }

    fn csrf_token(&self) -> &str {
        &self.csrf_cookie
    }

    fn credential_cookies(&self) -> HashMap<String, String> {
        let mut cookies = HashMap::with_capacity(2);
        cookies.insert("auth_token".to_string(), self.auth_token.clone());
        cookies.insert("ct0".to_string(), self.csrf_cookie.clone());
        cookies
    }

    fn session_cookies(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Either credential class, owned. `graphql` takes one of these by value so
/// it can swap it out for a fresh credential before dispatching, then hands
/// back whichever one actually made the call.
pub enum CredentialHandle {
    Guest(GuestCredential),
    Account(AccountCredential),
}

impl UpstreamCredential for CredentialHandle {
    fn egress_identity(&self) -> &str {
        match self {
            CredentialHandle::Guest(g) => g.egress_identity(),
            CredentialHandle::Account(a) => a.egress_identity(),
        }
    }

    fn csrf_token(&self) -> &str {
        match self {
            CredentialHandle::Guest(g) => g.csrf_token(),
            CredentialHandle::Account(a) => a.csrf_token(),
        }
    }

    fn credential_cookies(&self) -> HashMap<String, String> {
        match self {
            CredentialHandle::Guest(g) => g.credential_cookies(),
            CredentialHandle::Account(a) => a.credential_cookies(),
        }
    }

    fn session_cookies(&self) -> HashMap<String, String> {
        match self {
            CredentialHandle::Guest(g) => g.session_cookies(),
            CredentialHandle::Account(a) => a.session_cookies(),
        }
    }
}

pub struct UpstreamClient {
    config: UpstreamConfig,
    sessions: SessionPool,
    txn: Arc<TxnGenerator>,
    guest_pool: Arc<GuestPool>,
    guest_minter: Arc<dyn GuestMinter>,
    account_pool: Arc<AccountPool>,
}

impl UpstreamClient {
    pub fn new(
        config: UpstreamConfig,
        sessions: SessionPool,
        txn: Arc<TxnGenerator>,
        guest_pool: Arc<GuestPool>,
        guest_minter: Arc<dyn GuestMinter>,
        account_pool: Arc<AccountPool>,
    ) -> Self {
        Self {
            config,
            sessions,
            txn,
            guest_pool,
            guest_minter,
            account_pool,
        }
    }

    /// §4.8: a guest credential that has expired or exhausted its request
    /// budget is dropped rather than used, and replaced inline — from the
    /// pool if it has a healthy entry, minted fresh otherwise. Account
    /// credentials have no analogous expiry; their cooldown is already
    /// enforced at [`AccountPool::acquire`], so they pass through unchanged.
    async fn ensure_healthy(&self, credential: CredentialHandle) -> CoreResult<CredentialHandle> {
        match credential {
            CredentialHandle::Guest(guest) if guest.is_expired() => {
                let fresh = acquire_guest(&self.guest_pool, self.guest_minter.as_ref())
                    .await
                    .map_err(|e| {
                        CoreError::TransientUpstream(format!(
                            "guest credential rotation failed: {e}"
                        ))
                    })?;
                Ok(CredentialHandle::Guest(fresh))
            }
            other => Ok(other),
        }
    }

    /// Exposed for symmetry with [`Self::ensure_healthy`]'s guest path and
    /// for callers acquiring an account credential directly.
    pub fn account_pool(&self) -> &AccountPool {
        &self.account_pool
    }

    /// Issues one GraphQL call. `features` is merged on top of the
    /// deployment's default feature flags. Checks the credential's health
    /// and rotates it before dispatching (§4.8), returning whichever
    /// credential actually made the call so the caller can release it.
    pub async fn graphql(
        &self,
        credential: CredentialHandle,
        http_method: &str,
        query_id: &str,
        operation_name: &str,
        variables: &Value,
        features: Option<&Value>,
    ) -> CoreResult<(Value, CredentialHandle)> {
        let credential = self.ensure_healthy(credential).await?;

        let path = format!("/{query_id}/{operation_name}");
        let url = format!("{}{path}", self.config.graphql_base_url);

        let txn_token = self
            .txn
            .generate(http_method, &path)
            .await
            .map_err(|e| CoreError::TransientUpstream(e.to_string()))?;

        let mut session = self
            .sessions
            .acquire(credential.egress_identity(), None)
            .map_err(|e| CoreError::TransientUpstream(e.to_string()))?;

        let features_payload = merge_features(&self.config.default_features, features);
        let cookie_header = render_cookie_header(&credential);
        let method = Method::from_bytes(http_method.as_bytes())
            .map_err(|e| CoreError::TransientUpstream(e.to_string()))?;

        let started = std::time::Instant::now();
        let result = session
            .client
            .request(method, &url)
            .query(&[
                ("variables", variables.to_string()),
                ("features", features_payload.to_string()),
            ])
            .bearer_auth(&self.config.bearer_token)
            .header("x-csrf-token", credential.csrf_token())
            .header("x-twitter-active-user", "yes")
            .header("cookie", cookie_header)
            .header("x-client-transaction-id", &txn_token)
            .header(reqwest::header::ORIGIN, &self.config.origin)
            .header(reqwest::header::REFERER, format!("{}/", self.config.origin))
            .send()
            .await;

        // Cookies live on the caller, not the reqwest client — there is
        // nothing to clear on the session itself before it goes back.
        self.sessions.release(session);
        let elapsed_secs = started.elapsed().as_secs_f64();

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                metrics::record_upstream_request("error", elapsed_secs);
                return Err(CoreError::TransientUpstream(e.to_string()));
            }
        };
        let status = response.status();
        if !status.is_success() {
            metrics::record_upstream_request(status.as_str(), elapsed_secs);
            return Err(classify_status(status.as_u16()));
        }
        metrics::record_upstream_request(status.as_str(), elapsed_secs);

        let value = response
            .json()
            .await
            .map_err(|e| CoreError::TransientUpstream(e.to_string()))?;
        Ok((value, credential))
    }
}

fn classify_status(status: u16) -> CoreError {
    match status {
        429 => CoreError::RateLimited,
        403 => CoreError::Forbidden,
        404 => CoreError::NotFound,
        _ => CoreError::TransientUpstream(format!("upstream returned status {status}")),
    }
}

fn merge_features(
    defaults: &serde_json::Map<String, Value>,
    overrides: Option<&Value>,
) -> Value {
    let mut merged = defaults.clone();
    if let Some(Value::Object(extra)) = overrides {
        for (k, v) in extra {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}

fn render_cookie_header(credential: &dyn UpstreamCredential) -> String {
    let mut cookies = credential.session_cookies();
    cookies.extend(credential.credential_cookies());
    cookies
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Deserialize)]
struct GuestTokenResponse {
    guest_token: String,
}

/// Mints guest credentials against the real activation endpoint. Grounded on
/// `create_token_set`/`get_guest_token`: reuses the Cloudflare-style cookies
/// the transaction-token generator already cached off the homepage fetch
/// (step 1) rather than issuing a second homepage request, posts to the
/// activation endpoint for the guest token (step 2), and generates the csrf
/// token locally (step 3, `secrets.token_hex(16)` equivalent).
pub struct DefaultGuestMinter {
    client: reqwest::Client,
    config: UpstreamConfig,
    egress: Arc<EgressSelector>,
    txn: Arc<TxnGenerator>,
}

impl DefaultGuestMinter {
    pub fn new(
        client: reqwest::Client,
        config: UpstreamConfig,
        egress: Arc<EgressSelector>,
        txn: Arc<TxnGenerator>,
    ) -> Self {
        Self {
            client,
            config,
            egress,
            txn,
        }
    }
}

#[async_trait]
impl GuestMinter for DefaultGuestMinter {
    async fn mint(&self) -> Result<GuestCredential, GuestMintError> {
        self.txn
            .ensure_ready()
            .await
            .map_err(|e| GuestMintError::Failed(e.to_string()))?;
        let session_cookies = self.txn.cached_session_cookies().await;
        let cookie_header = session_cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");

        let response = self
            .client
            .post(&self.config.guest_token_url)
            .bearer_auth(&self.config.bearer_token)
            .header(reqwest::header::COOKIE, cookie_header)
            .send()
            .await
            .map_err(|e| GuestMintError::Failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GuestMintError::Failed(format!(
                "guest token endpoint returned status {}",
                response.status()
            )));
        }

        let body: GuestTokenResponse = response
            .json()
            .await
            .map_err(|e| GuestMintError::Failed(e.to_string()))?;

        let egress_identity = self.egress.select(None).to_string();
        let csrf_token = Uuid::new_v4().simple().to_string();
        Ok(GuestCredential::new(
            body.guest_token,
            csrf_token,
            egress_identity,
            session_cookies,
        ))
    }
}

/// Resolves a guest credential for an outgoing call: pops a healthy one from
/// the pool, or mints inline when the pool is empty.
pub async fn acquire_guest(
    pool: &GuestPool,
    minter: &dyn GuestMinter,
) -> Result<GuestCredential, GuestMintError> {
    if let Some(cred) = pool.take() {
        return Ok(cred);
    }
    minter.mint().await
}

/// Draws an egress identity for credential-less calls (homepage/script
/// fetches made ahead of ever holding a credential).
pub fn bootstrap_egress(selector: &EgressSelector) -> &str {
    selector.select(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::guest::MAX_REQUESTS_PER_GUEST;

    #[test]
    fn classify_status_maps_known_codes() {
        assert!(matches!(classify_status(429), CoreError::RateLimited));
        assert!(matches!(classify_status(403), CoreError::Forbidden));
        assert!(matches!(classify_status(404), CoreError::NotFound));
        assert!(matches!(
            classify_status(503),
            CoreError::TransientUpstream(_)
        ));
    }

    #[test]
    fn merge_features_overlays_overrides_onto_defaults() {
        let mut defaults = serde_json::Map::new();
        defaults.insert("a".to_string(), Value::Bool(true));
        defaults.insert("b".to_string(), Value::Bool(false));
        let overrides = serde_json::json!({ "b": true, "c": true });

        let merged = merge_features(&defaults, Some(&overrides));
        assert_eq!(merged["a"], Value::Bool(true));
        assert_eq!(merged["b"], Value::Bool(true));
        assert_eq!(merged["c"], Value::Bool(true));
    }

    #[test]
    fn merge_features_with_no_overrides_returns_defaults() {
        let mut defaults = serde_json::Map::new();
        defaults.insert("a".to_string(), Value::Bool(true));
        let merged = merge_features(&defaults, None);
        assert_eq!(merged, Value::Object(defaults));
    }

    #[test]
    fn render_cookie_header_merges_session_and_credential_cookies() {
        let cred = GuestCredential::minted(
            "direct".to_string(),
            HashMap::from([("personalization_id".to_string(), "v1".to_string())]),
        );
        let header = render_cookie_header(&cred);
        assert!(header.contains("personalization_id=v1"));
        assert!(header.contains(&format!("gt={}", cred.guest_token)));
        assert!(header.contains(&format!("ct0={}", cred.csrf_token)));
    }

    struct StubMinter;

    #[async_trait]
    impl GuestMinter for StubMinter {
        async fn mint(&self) -> Result<GuestCredential, GuestMintError> {
            Ok(GuestCredential::minted("direct".to_string(), HashMap::new()))
        }
    }

    fn test_client(guest_minter: Arc<dyn GuestMinter>) -> UpstreamClient {
        UpstreamClient::new(
            UpstreamConfig::default(),
            SessionPool::new(1),
            TxnGenerator::new(reqwest::Client::new(), "https://example.test".to_string()),
            Arc::new(GuestPool::new(0, 10)),
            guest_minter,
            Arc::new(AccountPool::new(Vec::new(), 900, 3600)),
        )
    }

    #[tokio::test]
    async fn ensure_healthy_passes_through_a_fresh_guest_credential() {
        let client = test_client(Arc::new(StubMinter));
        let cred = GuestCredential::minted("direct".to_string(), HashMap::new());
        let token = cred.guest_token.clone();
        let rotated = client
            .ensure_healthy(CredentialHandle::Guest(cred))
            .await
            .unwrap();
        match rotated {
            CredentialHandle::Guest(g) => assert_eq!(g.guest_token, token),
            CredentialHandle::Account(_) => panic!("expected guest credential"),
        }
    }

    #[tokio::test]
    async fn ensure_healthy_mints_a_replacement_for_an_expired_guest_credential() {
        let client = test_client(Arc::new(StubMinter));
        let mut expired = GuestCredential::minted("direct".to_string(), HashMap::new());
        expired.request_count = MAX_REQUESTS_PER_GUEST;
        let expired_token = expired.guest_token.clone();

        let rotated = client
            .ensure_healthy(CredentialHandle::Guest(expired))
            .await
            .unwrap();
        match rotated {
            CredentialHandle::Guest(g) => {
                assert_ne!(g.guest_token, expired_token);
                assert!(!g.is_expired());
            }
            CredentialHandle::Account(_) => panic!("expected guest credential"),
        }
    }

    #[tokio::test]
    async fn ensure_healthy_takes_a_pooled_replacement_before_minting() {
        let pool = Arc::new(GuestPool::new(0, 10));
        let pooled = GuestCredential::minted("direct".to_string(), HashMap::new());
        let pooled_token = pooled.guest_token.clone();
        pool.add(pooled);

        let client = UpstreamClient::new(
            UpstreamConfig::default(),
            SessionPool::new(1),
            TxnGenerator::new(reqwest::Client::new(), "https://example.test".to_string()),
            pool,
            Arc::new(StubMinter),
            Arc::new(AccountPool::new(Vec::new(), 900, 3600)),
        );

        let mut expired = GuestCredential::minted("direct".to_string(), HashMap::new());
        expired.request_count = MAX_REQUESTS_PER_GUEST;

        let rotated = client
            .ensure_healthy(CredentialHandle::Guest(expired))
            .await
            .unwrap();
        match rotated {
            CredentialHandle::Guest(g) => assert_eq!(g.guest_token, pooled_token),
            CredentialHandle::Account(_) => panic!("expected guest credential"),
        }
    }

    #[tokio::test]
    async fn ensure_healthy_passes_through_account_credentials_unchanged() {
        let client = test_client(Arc::new(StubMinter));
        let account = AccountCredential {
            auth_token: "tok".to_string(),
            csrf_cookie: "csrf".to_string(),
            label: "acct-1".to_string(),
            egress_identity: "direct".to_string(),
            request_count: 0,
            cooldown_until: 0,
            failure_streak: 0,
        };
        let label = account.label.clone();
        let rotated = client
            .ensure_healthy(CredentialHandle::Account(account))
            .await
            .unwrap();
        match rotated {
            CredentialHandle::Account(a) => assert_eq!(a.label, label),
            CredentialHandle::Guest(_) => panic!("expected account credential"),
        }
    }
}
