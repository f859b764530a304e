//! Operator-supplied "account" credential pool: round-robin acquisition
//! skipping cooled-down entries, with per-status cooldown extension on
//! release. Whole pool guarded by a single lock; the critical section is a
//! bounded scan over the (typically small) account list, same shape as
//! `CircuitBreakerRegistry`'s single-lock-over-a-map design, simplified to a
//! vector since accounts are few and round-robin order matters.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use crate::{config::AccountCredentialSpec, observability::metrics};

use super::now_secs;

#[derive(Debug, Clone)]
pub struct AccountCredential {
    pub auth_token: String,
    pub csrf_cookie: String,
    pub label: String,
    pub egress_identity: String,
    pub request_count: u64,
    pub cooldown_until: u64,
    pub failure_streak: u32,
}

impl From<AccountCredentialSpec> for AccountCredential {
    fn from(spec: AccountCredentialSpec) -> Self {
        Self {
            auth_token: spec.auth_token,
            csrf_cookie: spec.csrf_cookie,
            label: spec.label,
            egress_identity: spec.egress_identity,
            request_count: 0,
            cooldown_until: 0,
            failure_streak: 0,
        }
    }
}

impl AccountCredential {
    fn is_cooling(&self, now: u64) -> bool {
        now < self.cooldown_until
    }
}

pub struct AccountPool {
    accounts: Mutex<Vec<AccountCredential>>,
    next_index: AtomicUsize,
    rate_limit_cooldown_secs: u64,
    forbidden_cooldown_secs: u64,
}

impl AccountPool {
    pub fn new(
        accounts: Vec<AccountCredential>,
        rate_limit_cooldown_secs: u64,
        forbidden_cooldown_secs: u64,
    ) -> Self {
        Self {
            accounts: Mutex::new(accounts),
            next_index: AtomicUsize::new(0),
            rate_limit_cooldown_secs,
            forbidden_cooldown_secs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.accounts.lock().len()
    }

    /// Scans up to one full rotation starting from the next round-robin
    /// position, skipping anything still cooling down. The returned
    /// credential is removed from the pool — owned by at most one in-flight
    /// request until [`release`](Self::release) puts it back.
    pub fn acquire(&self) -> Option<AccountCredential> {
        let mut accounts = self.accounts.lock();
        let len = accounts.len();
        if len == 0 {
            return None;
        }
        let now = now_secs();
        let start = self.next_index.fetch_add(1, Ordering::Relaxed) % len;
        for offset in 0..len {
            let idx = (start + offset) % len;
            if !accounts[idx].is_cooling(now) {
                let cred = accounts.remove(idx);
                metrics::set_credential_pool_size("account", accounts.len() as i64);
                return Some(cred);
            }
        }
        None
    }

    pub fn release(&self, mut cred: AccountCredential, ok: bool, status: Option<u16>) {
        cred.request_count += 1;
        if ok {
            cred.failure_streak = 0;
        } else {
            match status {
                Some(429) => cred.cooldown_until = now_secs() + self.rate_limit_cooldown_secs,
                Some(403) => cred.cooldown_until = now_secs() + self.forbidden_cooldown_secs,
                _ => cred.failure_streak += 1,
            }
        }
        let mut accounts = self.accounts.lock();
        accounts.push(cred);
        let now = now_secs();
        let cooling = accounts.iter().filter(|a| a.is_cooling(now)).count();
        metrics::set_credential_pool_size("account", accounts.len() as i64);
        metrics::set_account_cooldowns_active(cooling as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(label: &str) -> AccountCredential {
        AccountCredential::from(AccountCredentialSpec {
            auth_token: format!("token-{label}"),
            csrf_cookie: "ct0".to_string(),
            label: label.to_string(),
            egress_identity: String::new(),
        })
    }

    #[test]
    fn acquire_returns_none_on_empty_pool() {
        let pool = AccountPool::new(Vec::new(), 900, 3600);
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn acquire_removes_and_release_returns_it() {
        let pool = AccountPool::new(vec![spec("a")], 900, 3600);
        let cred = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        pool.release(cred, true, None);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn release_with_429_sets_900s_cooldown() {
        let pool = AccountPool::new(vec![spec("a"), spec("b")], 900, 3600);
        let a = pool.acquire().unwrap();
        let released_at = now_secs();
        pool.release(a, false, Some(429));

        // "a" should now be skipped; only "b" is returned.
        let b = pool.acquire().unwrap();
        assert_eq!(b.label, "b");
        pool.release(b, true, None);

        let accounts = pool.accounts.lock();
        let a = accounts.iter().find(|c| c.label == "a").unwrap();
        assert!(a.cooldown_until >= released_at + 900);
    }

    #[test]
    fn release_with_403_sets_3600s_cooldown() {
        let pool = AccountPool::new(vec![spec("a")], 900, 3600);
        let a = pool.acquire().unwrap();
        let released_at = now_secs();
        pool.release(a, false, Some(403));
        assert!(pool.acquire().is_none());

        let accounts = pool.accounts.lock();
        assert!(accounts[0].cooldown_until >= released_at + 3600);
    }

    #[test]
    fn other_failure_increments_failure_streak_without_cooldown() {
        let pool = AccountPool::new(vec![spec("a")], 900, 3600);
        let a = pool.acquire().unwrap();
        pool.release(a, false, Some(500));
        let a = pool.acquire().unwrap();
        assert_eq!(a.failure_streak, 1);
        assert_eq!(a.cooldown_until, 0);
    }

    #[test]
    fn success_resets_failure_streak() {
        let pool = AccountPool::new(vec![spec("a")], 900, 3600);
        let a = pool.acquire().unwrap();
        pool.release(a, false, Some(500));
        let a = pool.acquire().unwrap();
        pool.release(a, true, None);
        let a = pool.acquire().unwrap();
        assert_eq!(a.failure_streak, 0);
    }

    #[test]
    fn rotation_skips_cooling_accounts_and_wraps() {
        let pool = AccountPool::new(vec![spec("a"), spec("b"), spec("c")], 900, 3600);
        let a = pool.acquire().unwrap();
        pool.release(a, false, Some(429));

        for _ in 0..5 {
            let cred = pool.acquire().unwrap();
            assert_ne!(cred.label, "a");
            pool.release(cred, true, None);
        }
    }
}
