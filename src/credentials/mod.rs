//! Credential substrate: two independently pooled credential classes.
//! `guest` holds self-minted, short-lived anonymous credentials in a
//! health-ordered priority queue; `account` holds operator-supplied,
//! long-lived credentials round-robined with per-status cooldowns.

pub mod account;
pub mod guest;

pub use account::{AccountCredential, AccountPool};
pub use guest::{GuestCredential, GuestMintError, GuestMinter, GuestPool};

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}
