//! Transaction-token generator: produces the per-request header the
//! upstream expects, derived from the HTTP method/path and material scraped
//! from the upstream's homepage and its on-demand script. Refreshed lazily
//! against `TXN_TTL`; a background init runs once at process start, and
//! callers that race it wait on a one-shot readiness signal before falling
//! back to an inline init.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, watch};

pub const TXN_TTL_SECS: u64 = 2 * 60 * 60;
pub const READY_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("request to fetch transaction material failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("on-demand script URL not found in homepage markup")]
    ScriptNotFound,
}

pub type TxnResult<T> = Result<T, TxnError>;

#[derive(Clone, Debug, Default)]
struct TxnMaterial {
    script: String,
    fetched_at: u64,
    session_cookies: HashMap<String, String>,
}

impl TxnMaterial {
    fn is_stale(&self) -> bool {
        self.fetched_at == 0 || now_secs().saturating_sub(self.fetched_at) > TXN_TTL_SECS
    }
}

pub struct TxnGenerator {
    client: reqwest::Client,
    homepage_url: String,
    material: AsyncMutex<TxnMaterial>,
    gen_lock: StdMutex<u64>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl TxnGenerator {
    pub fn new(client: reqwest::Client, homepage_url: impl Into<String>) -> Arc<Self> {
        let (ready_tx, ready_rx) = watch::channel(false);
        Arc::new(Self {
            client,
            homepage_url: homepage_url.into(),
            material: AsyncMutex::new(TxnMaterial::default()),
            gen_lock: StdMutex::new(0),
            ready_tx,
            ready_rx,
        })
    }

    /// Spawns the background init that should run once at process start.
    pub fn spawn_background_init(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let generator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = generator.ensure_ready().await {
                tracing::warn!(error = %e, "transaction-token material init failed");
            }
        })
    }

    /// Idempotent: fetches the homepage and on-demand script only when the
    /// cached material is missing or older than [`TXN_TTL_SECS`].
    pub async fn ensure_ready(&self) -> TxnResult<()> {
        {
            let material = self.material.lock().await;
            if !material.is_stale() {
                return Ok(());
            }
        }

        let homepage = self.client.get(&self.homepage_url).send().await?;
        let cookies = extract_cookies(homepage.headers());
        let dom = homepage.text().await?;
        let script_url = locate_script_url(&dom).ok_or(TxnError::ScriptNotFound)?;
        let script = self.client.get(&script_url).send().await?.text().await?;

        let mut material = self.material.lock().await;
        *material = TxnMaterial {
            script,
            fetched_at: now_secs(),
            session_cookies: cookies,
        };
        drop(material);
        let _ = self.ready_tx.send(true);
        tracing::info!("transaction-token material refreshed");
        Ok(())
    }

    /// Waits up to [`READY_WAIT_TIMEOUT`] for the background init to
    /// complete; on timeout, triggers an inline init itself.
    pub async fn wait_ready(&self) -> TxnResult<()> {
        if *self.ready_rx.borrow() {
            return Ok(());
        }
        let mut rx = self.ready_rx.clone();
        match tokio::time::timeout(READY_WAIT_TIMEOUT, rx.changed()).await {
            Ok(Ok(())) => Ok(()),
            _ => self.ensure_ready().await,
        }
    }

    /// Session cookies captured during the last homepage fetch, handed to
    /// guest-credential minting so it avoids a second homepage round-trip.
    pub async fn cached_session_cookies(&self) -> HashMap<String, String> {
        self.material.lock().await.session_cookies.clone()
    }

    /// Derives the per-request header value. Generation holds its own lock
    /// — it is not safe to run concurrently with itself because it advances
    /// an internal rolling counter mixed into the derivation.
    pub async fn generate(&self, method: &str, path: &str) -> TxnResult<String> {
        self.wait_ready().await?;
        let material = self.material.lock().await;
        let mut counter = self.gen_lock.lock().expect("txn generation lock poisoned");
        *counter = counter.wrapping_add(1);
        Ok(derive_token(&material, method, path, *counter))
    }
}

fn derive_token(material: &TxnMaterial, method: &str, path: &str, counter: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(path.as_bytes());
    hasher.update(material.script.as_bytes());
    hasher.update(material.fetched_at.to_be_bytes());
    hasher.update(counter.to_be_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn locate_script_url(dom: &str) -> Option<String> {
    let re = regex::Regex::new(r#"src=["'](https://[^"']+\.js)["']"#).ok()?;
    re.captures(dom).map(|c| c[1].to_string())
}

fn extract_cookies(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in headers.get_all(reqwest::header::SET_COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        let kv = raw.split(';').next().unwrap_or(raw);
        if let Some((k, v)) = kv.split_once('=') {
            cookies.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    cookies
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(script: &str, fetched_at: u64) -> TxnMaterial {
        TxnMaterial {
            script: script.to_string(),
            fetched_at,
            session_cookies: HashMap::new(),
        }
    }

    #[test]
    fn missing_material_is_stale() {
        assert!(TxnMaterial::default().is_stale());
    }

    #[test]
    fn fresh_material_is_not_stale() {
        assert!(!material("s", now_secs()).is_stale());
    }

    #[test]
    fn material_older_than_ttl_is_stale() {
        let old = now_secs().saturating_sub(TXN_TTL_SECS + 1);
        assert!(material("s", old).is_stale());
    }

    #[test]
    fn derive_token_changes_with_counter() {
        let m = material("script-body", now_secs());
        let a = derive_token(&m, "GET", "/i/api/graphql/x", 1);
        let b = derive_token(&m, "GET", "/i/api/graphql/x", 2);
        assert_ne!(a, b);
    }

    #[test]
    fn derive_token_is_deterministic_for_identical_inputs() {
        let m = material("script-body", 100);
        let a = derive_token(&m, "GET", "/path", 7);
        let b = derive_token(&m, "GET", "/path", 7);
        assert_eq!(a, b);
    }

    #[test]
    fn locate_script_url_finds_a_js_src() {
        let dom = r#"<html><script src="https://example.com/ondemand.s.abc123.js"></script></html>"#;
        assert_eq!(
            locate_script_url(dom),
            Some("https://example.com/ondemand.s.abc123.js".to_string())
        );
    }

    #[test]
    fn locate_script_url_returns_none_when_absent() {
        assert_eq!(locate_script_url("<html></html>"), None);
    }

    #[test]
    fn extract_cookies_parses_set_cookie_headers() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.append(
            reqwest::header::SET_COOKIE,
            "gt=123; Path=/; Secure".parse().unwrap(),
        );
        headers.append(
            reqwest::header::SET_COOKIE,
            "guest_id=abc; Path=/".parse().unwrap(),
        );
        let cookies = extract_cookies(&headers);
        assert_eq!(cookies.get("gt"), Some(&"123".to_string()));
        assert_eq!(cookies.get("guest_id"), Some(&"abc".to_string()));
    }
}
