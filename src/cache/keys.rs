use sha2::{Digest, Sha256};

/// The kind of record a cache key addresses. Determines the key's `<kind>`
/// segment and, indirectly via [`crate::config::CacheTtlConfig`], its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Profile,
    Tweet,
    TweetDetail,
    UserTweets,
    Search,
    Social,
}

impl RecordKind {
    fn as_str(self) -> &'static str {
        match self {
            RecordKind::Profile => "profile",
            RecordKind::Tweet => "tweet",
            RecordKind::TweetDetail => "tweet_detail",
            RecordKind::UserTweets => "user_tweets",
            RecordKind::Search => "search",
            RecordKind::Social => "social",
        }
    }
}

pub struct CacheKeys;

impl CacheKeys {
    /// Builds a key of the form `<kind>:v1:<digest>`.
    ///
    /// With a single argument the digest is the raw argument (cheap, still
    /// unique and short enough for the common single-id lookups). With more
    /// than one argument the digest is a 16-character hex prefix of a SHA-256
    /// hash of the arguments joined by `:`, which keeps multi-parameter keys
    /// (search, user timelines with cursor/count) short and collision
    /// resistant.
    pub fn build(kind: RecordKind, args: &[&str]) -> String {
        let digest = match args {
            [single] => (*single).to_string(),
            _ => Self::hash_args(args),
        };
        format!("{}:v1:{}", kind.as_str(), digest)
    }

    fn hash_args(args: &[&str]) -> String {
        let joined = args.join(":");
        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        let full = hasher.finalize();
        hex::encode(full)[..16].to_string()
    }

    pub fn profile(screen_name_or_id: &str) -> String {
        Self::build(RecordKind::Profile, &[screen_name_or_id])
    }

    pub fn tweet(id: &str) -> String {
        Self::build(RecordKind::Tweet, &[id])
    }

    pub fn tweet_detail(id: &str) -> String {
        Self::build(RecordKind::TweetDetail, &[id])
    }

    pub fn user_tweets(user_id: &str, count: &str, cursor: &str) -> String {
        Self::build(RecordKind::UserTweets, &[user_id, count, cursor])
    }

    pub fn search(query: &str, product: &str, count: &str, cursor: &str) -> String {
        Self::build(RecordKind::Search, &[query, product, count, cursor])
    }

    pub fn social(kind: &str, user_id: &str, count: &str, cursor: &str) -> String {
        Self::build(RecordKind::Social, &[kind, user_id, count, cursor])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_arg_key_uses_raw_digest() {
        assert_eq!(CacheKeys::tweet("12345"), "tweet:v1:12345");
        assert_eq!(CacheKeys::profile("jack"), "profile:v1:jack");
    }

    #[test]
    fn multi_arg_key_is_hashed_and_short() {
        let key = CacheKeys::search("bitcoin", "latest", "20", "");
        assert!(key.starts_with("search:v1:"));
        let digest = key.strip_prefix("search:v1:").unwrap();
        assert_eq!(digest.len(), 16);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn multi_arg_key_is_deterministic() {
        let a = CacheKeys::search("bitcoin", "latest", "20", "");
        let b = CacheKeys::search("bitcoin", "latest", "20", "");
        assert_eq!(a, b);
    }

    #[test]
    fn different_args_produce_different_keys() {
        let a = CacheKeys::search("bitcoin", "latest", "20", "");
        let b = CacheKeys::search("ethereum", "latest", "20", "");
        assert_ne!(a, b);
    }

    #[test]
    fn user_tweets_key_varies_by_cursor() {
        let a = CacheKeys::user_tweets("42", "20", "");
        let b = CacheKeys::user_tweets("42", "20", "cursor-abc");
        assert_ne!(a, b);
    }
}
