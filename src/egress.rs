//! Egress selector: picks an outbound identity (direct, or one of the
//! configured proxies) per the deployment's rotation policy. The identity
//! returned partitions the session pool and pins credentials (§3); this
//! module only decides *which* identity, it owns no connections itself.

use std::sync::atomic::{AtomicUsize, Ordering};

use sha2::{Digest, Sha256};

use crate::{
    config::{EgressConfig, EgressRotationPolicy},
    session::DIRECT,
};

/// Selects egress identities for outbound calls. `None` in the proxy list
/// means direct egress only; `selector.select(None)` then always returns
/// [`DIRECT`].
pub struct EgressSelector {
    proxies: Vec<String>,
    rotation: EgressRotationPolicy,
    next: AtomicUsize,
}

impl EgressSelector {
    pub fn from_config(config: &EgressConfig) -> Self {
        Self {
            proxies: config.proxy_list.clone(),
            rotation: config.rotation.clone(),
            next: AtomicUsize::new(0),
        }
    }

    pub fn identities(&self) -> Vec<&str> {
        if self.proxies.is_empty() {
            vec![DIRECT]
        } else {
            self.proxies.iter().map(String::as_str).collect()
        }
    }

    /// Picks an identity. `sticky_key` is consulted only under
    /// [`EgressRotationPolicy::Sticky`] — a stable partition key (e.g. a
    /// credential id) that always maps to the same proxy as long as the
    /// proxy list doesn't change.
    pub fn select(&self, sticky_key: Option<&str>) -> &str {
        if self.proxies.is_empty() {
            return DIRECT;
        }
        match self.rotation {
            EgressRotationPolicy::RoundRobin => {
                let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
                &self.proxies[idx]
            }
            EgressRotationPolicy::Random => {
                let idx = rand::random::<usize>() % self.proxies.len();
                &self.proxies[idx]
            }
            EgressRotationPolicy::Sticky => {
                let key = sticky_key.unwrap_or("");
                let mut hasher = Sha256::new();
                hasher.update(key.as_bytes());
                let digest = hasher.finalize();
                let idx = (digest[0] as usize) % self.proxies.len();
                &self.proxies[idx]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(policy: EgressRotationPolicy, proxies: &[&str]) -> EgressConfig {
        EgressConfig {
            proxy_list: proxies.iter().map(|s| s.to_string()).collect(),
            rotation: policy,
            ..EgressConfig::default()
        }
    }

    #[test]
    fn empty_proxy_list_always_selects_direct() {
        let selector = EgressSelector::from_config(&config(EgressRotationPolicy::RoundRobin, &[]));
        assert_eq!(selector.select(None), DIRECT);
        assert_eq!(selector.select(None), DIRECT);
    }

    #[test]
    fn round_robin_cycles_through_all_proxies() {
        let selector = EgressSelector::from_config(&config(
            EgressRotationPolicy::RoundRobin,
            &["p1", "p2", "p3"],
        ));
        let picks: Vec<_> = (0..6).map(|_| selector.select(None).to_string()).collect();
        assert_eq!(picks, vec!["p1", "p2", "p3", "p1", "p2", "p3"]);
    }

    #[test]
    fn sticky_is_deterministic_for_the_same_key() {
        let selector =
            EgressSelector::from_config(&config(EgressRotationPolicy::Sticky, &["p1", "p2"]));
        let first = selector.select(Some("credential-42")).to_string();
        let second = selector.select(Some("credential-42")).to_string();
        assert_eq!(first, second);
    }

    #[test]
    fn identities_lists_direct_when_no_proxies_configured() {
        let selector = EgressSelector::from_config(&config(EgressRotationPolicy::RoundRobin, &[]));
        assert_eq!(selector.identities(), vec![DIRECT]);
    }
}
