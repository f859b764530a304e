//! Self-minted "guest" credential pool. A max-heap ordered by health score,
//! topped up by a background minter. Health scoring, pool sizing and the
//! retirement thresholds are grounded on `token_pool.py`: health starts at
//! `1.0`, a failed use drops the base to `0.8`, age imposes a linear penalty
//! up to `0.3` of the score, the floor is `0.1`, and a credential is retired
//! outright past `MAX_REQUESTS_PER_GUEST` requests or `GUEST_TTL`.

use std::{cmp::Ordering, collections::BinaryHeap, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::observability::metrics;

use super::now_secs;

pub const MAX_REQUESTS_PER_GUEST: u32 = 400;
pub const GUEST_TTL_SECS: u64 = 3600;
pub const DEFAULT_POOL_MIN_SIZE: usize = 50;
pub const DEFAULT_POOL_TARGET_SIZE: usize = 100;
pub const DEFAULT_GENERATION_INTERVAL_SECS: u64 = 5;

const HEALTH_FLOOR: f64 = 0.1;
const AGE_PENALTY_WEIGHT: f64 = 0.3;

#[derive(Debug, Error)]
pub enum GuestMintError {
    #[error("guest credential mint failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct GuestCredential {
    pub guest_token: String,
    pub csrf_token: String,
    pub created_at: u64,
    pub session_cookies: HashMap<String, String>,
    pub request_count: u32,
    pub egress_identity: String,
    pub health: f64,
}

impl GuestCredential {
    /// Builds a credential from upstream-issued material: the guest token
    /// came back from the activation endpoint, the csrf token is generated
    /// locally the way `create_token_set` does (`secrets.token_hex(16)`).
    pub fn new(
        guest_token: String,
        csrf_token: String,
        egress_identity: String,
        session_cookies: HashMap<String, String>,
    ) -> Self {
        Self {
            guest_token,
            csrf_token,
            created_at: now_secs(),
            session_cookies,
            request_count: 0,
            egress_identity,
            health: 1.0,
        }
    }

    /// Test/offline convenience: a self-contained credential with locally
    /// generated token material, for callers that don't go through a real
    /// minter.
    pub fn minted(egress_identity: String, session_cookies: HashMap<String, String>) -> Self {
        Self::new(
            format!("gt-{}", Uuid::new_v4()),
            Uuid::new_v4().simple().to_string(),
            egress_identity,
            session_cookies,
        )
    }

    fn age_secs(&self) -> u64 {
        now_secs().saturating_sub(self.created_at)
    }

    pub fn is_expired(&self) -> bool {
        self.age_secs() > GUEST_TTL_SECS || self.request_count >= MAX_REQUESTS_PER_GUEST
    }
}

/// Mints a fresh guest credential. Implemented outside this module (the
/// concrete minter needs the transaction-token generator's cached homepage
/// cookies and an egress identity) — a capability interface, not ownership,
/// keeps the pool decoupled from the minting mechanics.
#[async_trait]
pub trait GuestMinter: Send + Sync {
    async fn mint(&self) -> Result<GuestCredential, GuestMintError>;
}

struct HeapEntry(GuestCredential);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.health == other.0.health
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .health
            .partial_cmp(&other.0.health)
            .unwrap_or(Ordering::Equal)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GuestPoolStats {
    pub size: usize,
    pub avg_health: f64,
    pub min_health: f64,
    pub max_health: f64,
}

/// In-process heap backend for the guest pool (§4.6 notes a shared sorted
/// set is an equally valid multi-instance backend; this crate targets a
/// single-process deployment).
pub struct GuestPool {
    heap: Mutex<BinaryHeap<HeapEntry>>,
    min_size: usize,
    target_size: usize,
}

impl GuestPool {
    pub fn new(min_size: usize, target_size: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            min_size,
            target_size,
        }
    }

    pub fn add(&self, cred: GuestCredential) {
        self.heap.lock().push(HeapEntry(cred));
        metrics::set_credential_pool_size("guest", self.len() as i64);
    }

    /// Atomically pops the highest-health credential, skipping (and
    /// dropping) any already-expired entries it encounters.
    pub fn take(&self) -> Option<GuestCredential> {
        let cred = {
            let mut heap = self.heap.lock();
            loop {
                match heap.pop() {
                    Some(HeapEntry(cred)) if cred.is_expired() => continue,
                    Some(HeapEntry(cred)) => break Some(cred),
                    None => break None,
                }
            }
        };
        metrics::set_credential_pool_size("guest", self.len() as i64);
        cred
    }

    /// Recomputes health and reinserts, unless the credential is now
    /// expired or exhausted, in which case it is dropped.
    pub fn return_credential(&self, mut cred: GuestCredential, ok: bool) {
        cred.request_count += 1;
        if cred.is_expired() {
            metrics::set_credential_pool_size("guest", self.len() as i64);
            return;
        }
        let base = if ok { 1.0 } else { 0.8 };
        let age_frac = cred.age_secs() as f64 / GUEST_TTL_SECS as f64;
        cred.health = (base - AGE_PENALTY_WEIGHT * age_frac).max(HEALTH_FLOOR);
        self.add(cred);
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn needs_mint(&self) -> bool {
        self.len() < self.target_size
    }

    pub fn is_below_min(&self) -> bool {
        self.len() < self.min_size
    }

    pub fn stats(&self) -> GuestPoolStats {
        let heap = self.heap.lock();
        if heap.is_empty() {
            return GuestPoolStats::default();
        }
        let healths: Vec<f64> = heap.iter().map(|e| e.0.health).collect();
        GuestPoolStats {
            size: healths.len(),
            avg_health: healths.iter().sum::<f64>() / healths.len() as f64,
            min_health: healths.iter().cloned().fold(f64::INFINITY, f64::min),
            max_health: healths.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

impl Default for GuestPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_MIN_SIZE, DEFAULT_POOL_TARGET_SIZE)
    }
}

/// Background minter: while the pool is below target size, mints and
/// inserts credentials on a fixed tick rather than reacting per-acquisition.
/// Runs until the returned handle is aborted.
pub fn start_minter(
    pool: Arc<GuestPool>,
    minter: Arc<dyn GuestMinter>,
    tick: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            while pool.needs_mint() {
                match minter.mint().await {
                    Ok(cred) => pool.add(cred),
                    Err(e) => {
                        tracing::warn!(error = %e, "guest credential mint failed, backing off");
                        break;
                    }
                }
            }
            metrics::set_credential_pool_health("guest", pool.stats().avg_health);
            tokio::time::sleep(tick).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(health: f64) -> GuestCredential {
        GuestCredential {
            health,
            ..GuestCredential::minted("direct".to_string(), HashMap::new())
        }
    }

    #[test]
    fn take_returns_highest_health_first() {
        let pool = GuestPool::new(0, 10);
        pool.add(cred(0.4));
        pool.add(cred(0.9));
        pool.add(cred(0.6));

        assert_eq!(pool.take().unwrap().health, 0.9);
        assert_eq!(pool.take().unwrap().health, 0.6);
        assert_eq!(pool.take().unwrap().health, 0.4);
        assert!(pool.take().is_none());
    }

    #[test]
    fn take_skips_and_drops_expired_entries() {
        let pool = GuestPool::new(0, 10);
        let mut expired = cred(0.99);
        expired.request_count = MAX_REQUESTS_PER_GUEST;
        pool.add(expired);
        pool.add(cred(0.5));

        assert_eq!(pool.take().unwrap().health, 0.5);
        assert!(pool.take().is_none());
    }

    #[test]
    fn successful_return_recomputes_health_near_one() {
        let pool = GuestPool::new(0, 10);
        let c = cred(0.5);
        pool.return_credential(c, true);
        let back = pool.take().unwrap();
        assert!(back.health > 0.9);
        assert_eq!(back.request_count, 1);
    }

    #[test]
    fn failed_return_applies_lower_base() {
        let pool = GuestPool::new(0, 10);
        let c = cred(0.5);
        pool.return_credential(c, false);
        let back = pool.take().unwrap();
        assert!(back.health <= 0.8);
        assert!(back.health >= HEALTH_FLOOR);
    }

    #[test]
    fn return_at_request_limit_retires_the_credential() {
        let pool = GuestPool::new(0, 10);
        let mut c = cred(0.5);
        c.request_count = MAX_REQUESTS_PER_GUEST - 1;
        pool.return_credential(c, true);
        assert!(pool.take().is_none());
    }

    #[test]
    fn needs_mint_reflects_target_size() {
        let pool = GuestPool::new(0, 2);
        assert!(pool.needs_mint());
        pool.add(cred(1.0));
        assert!(pool.needs_mint());
        pool.add(cred(1.0));
        assert!(!pool.needs_mint());
    }
}
