//! Session pool: warm TLS client handles bucketed by egress identity, so
//! warmth is never misrouted to the wrong outbound IP. The bucket map uses
//! the same `Arc<RwLock<HashMap<...>>>` double-checked-locking shape as
//! `providers::registry::CircuitBreakerRegistry`, substituting a bounded
//! deque per bucket for the registry's single-entry-per-key store.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, RwLock},
};

use reqwest::Client;

use crate::observability::metrics;

/// Opaque egress identity: the upstream URL of a proxy, or empty for direct
/// egress. Used to partition the session pool and pin credentials.
pub type EgressIdentity = String;

pub const DIRECT: &str = "";

/// A warm TLS client handle. `reqwest::Client` already pools connections
/// internally per remote host, so a `Session` wraps one client configured
/// for a single egress identity; cookies are tracked by the caller, not by
/// the client, since they must be cleared between logical requests without
/// tearing down the TCP/TLS state.
pub struct Session {
    pub client: Client,
    pub egress_identity: EgressIdentity,
}

impl Session {
    fn new(egress_identity: EgressIdentity, proxy: Option<&str>) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(15));
        if let Some(proxy_url) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }
        Ok(Self {
            client: builder.build()?,
            egress_identity,
        })
    }
}

struct Bucket {
    sessions: VecDeque<Session>,
    max_size: usize,
}

/// Map `EgressIdentity -> bounded deque<Session>`. A session created for
/// egress A is only ever acquired under egress A — the bucket keying enforces
/// this by construction, there is no cross-bucket borrowing.
pub struct SessionPool {
    buckets: Arc<RwLock<HashMap<EgressIdentity, Bucket>>>,
    max_per_egress: usize,
}

impl SessionPool {
    pub fn new(max_per_egress: usize) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            max_per_egress,
        }
    }

    /// Pops one session from `egress`'s bucket; if empty, creates a new
    /// (un-warmed) session on demand — TLS handshakes lazily on first use.
    pub fn acquire(&self, egress: &str, proxy: Option<&str>) -> Result<Session, reqwest::Error> {
        {
            let mut buckets = self.buckets.write().expect("session pool lock poisoned");
            if let Some(bucket) = buckets.get_mut(egress)
                && let Some(session) = bucket.sessions.pop_front()
            {
                self.report_size(egress, &buckets);
                return Ok(session);
            }
        }
        Session::new(egress.to_string(), proxy)
    }

    /// Clears cookies (a no-op here since cookies live on the caller, not the
    /// client — see [`Session`]) and pushes the session back up to
    /// `max_per_egress`; past that it is simply dropped (closed).
    pub fn release(&self, session: Session) {
        let mut buckets = self.buckets.write().expect("session pool lock poisoned");
        let egress = session.egress_identity.clone();
        let bucket = buckets.entry(egress.clone()).or_insert_with(|| Bucket {
            sessions: VecDeque::new(),
            max_size: self.max_per_egress,
        });
        if bucket.sessions.len() < bucket.max_size {
            bucket.sessions.push_back(session);
        }
        self.report_size(&egress, &buckets);
    }

    /// Creates `n` sessions for `egress` and issues a best-effort no-op
    /// request to drive the TLS handshake and TCP establishment ahead of
    /// real traffic, then deposits them into the bucket.
    pub async fn prewarm(&self, egress: &str, proxy: Option<&str>, n: usize, warm_url: &str) {
        for _ in 0..n {
            let session = match Session::new(egress.to_string(), proxy) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(egress, error = %e, "session prewarm failed to build client");
                    continue;
                }
            };
            if let Err(e) = session.client.head(warm_url).send().await {
                tracing::debug!(egress, error = %e, "session prewarm probe request failed");
            }
            self.release(session);
        }
    }

    /// Drains every bucket, closing all sessions.
    pub fn close_all(&self) {
        let mut buckets = self.buckets.write().expect("session pool lock poisoned");
        for (egress, bucket) in buckets.iter_mut() {
            bucket.sessions.clear();
            metrics::set_session_pool_size(egress, 0);
        }
        buckets.clear();
    }

    fn report_size(&self, egress: &str, buckets: &HashMap<EgressIdentity, Bucket>) {
        let size = buckets.get(egress).map_or(0, |b| b.sessions.len());
        metrics::set_session_pool_size(egress, size as i64);
    }
}
