//! L2 search index (Typesense): indexes records for full-text search
//! fallback when a search query misses L1. Grounded directly on
//! `TypesenseCache` — same collection schema, same upsert-via-JSONL-import
//! write path, same ranked-id-only search response.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::SearchIndexConfig;

#[derive(Debug, Error)]
pub enum SearchIndexError {
    #[error("search index not configured")]
    NotConfigured,
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response status {0}")]
    Status(u16),
}

pub type SearchIndexResult<T> = Result<T, SearchIndexError>;

/// A single record as handed to the search index for indexing. Mirrors the
/// Typesense `tweets` collection schema field for field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub text: String,
    pub author_username: String,
    pub author_name: String,
    pub author_id: String,
    pub created_at_ts: i64,
    pub like_count: i64,
    pub retweet_count: i64,
    pub view_count: i64,
    pub language: String,
    pub is_reply: bool,
    pub is_retweet: bool,
    pub is_quote: bool,
}

const COLLECTION: &str = "tweets";

fn collection_schema() -> serde_json::Value {
    json!({
        "name": COLLECTION,
        "fields": [
            {"name": "id", "type": "string"},
            {"name": "text", "type": "string"},
            {"name": "author_username", "type": "string", "facet": true},
            {"name": "author_name", "type": "string"},
            {"name": "author_id", "type": "string", "facet": true},
            {"name": "created_at_ts", "type": "int64", "sort": true},
            {"name": "like_count", "type": "int32", "sort": true},
            {"name": "retweet_count", "type": "int32", "sort": true},
            {"name": "view_count", "type": "int64", "sort": true},
            {"name": "language", "type": "string", "facet": true},
            {"name": "is_reply", "type": "bool"},
            {"name": "is_retweet", "type": "bool"},
            {"name": "is_quote", "type": "bool"},
        ],
        "token_separators": ["@", "#"],
    })
}

/// L2 search index client. `available()` degrades to `false` rather than
/// erroring when the index can't be reached, matching the reference
/// deployment's best-effort treatment of L2 (a down index falls straight
/// through to a live fetch, it never fails the request).
pub struct SearchIndex {
    client: Client,
    base_url: String,
    api_key: String,
    enabled: bool,
    available: std::sync::atomic::AtomicBool,
}

impl SearchIndex {
    pub fn from_config(config: &SearchIndexConfig) -> SearchIndexResult<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url(),
            api_key: config.api_key.clone(),
            enabled: config.enabled,
            available: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn available(&self) -> bool {
        self.available.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Health-checks the index and creates the collection if missing. Never
    /// returns an error for connectivity failures; `available()` reflects
    /// the outcome.
    pub async fn connect(&self) {
        if !self.enabled {
            tracing::info!("search index disabled");
            return;
        }
        match self.client.get(format!("{}/health", self.base_url)).send().await {
            Ok(resp) if resp.status().is_success() => {
                self.available.store(true, std::sync::atomic::Ordering::Relaxed);
                if let Err(e) = self.ensure_collection().await {
                    tracing::warn!(error = %e, "search index collection bootstrap failed");
                }
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "search index health check failed");
            }
            Err(e) => {
                tracing::warn!(error = %e, "search index unavailable");
            }
        }
    }

    async fn ensure_collection(&self) -> SearchIndexResult<()> {
        let resp = self.authed(self.client.get(format!(
            "{}/collections/{COLLECTION}",
            self.base_url
        )))
        .send()
        .await?;
        if resp.status().is_success() {
            return Ok(());
        }

        let resp = self
            .authed(self.client.post(format!("{}/collections", self.base_url)))
            .json(&collection_schema())
            .send()
            .await?;
        if resp.status().is_success() {
            tracing::info!(collection = COLLECTION, "search index collection created");
            Ok(())
        } else {
            Err(SearchIndexError::Status(resp.status().as_u16()))
        }
    }

    /// Upserts documents via Typesense's JSONL import endpoint. Best-effort:
    /// failures are logged, never propagated, since indexing always runs
    /// detached from the write-through path that produced `docs`.
    pub async fn index(&self, docs: &[IndexDocument]) {
        if !self.available() || docs.is_empty() {
            return;
        }
        let body = docs
            .iter()
            .filter_map(|d| serde_json::to_string(d).ok())
            .collect::<Vec<_>>()
            .join("\n");

        let result = self
            .authed(self.client.post(format!(
                "{}/collections/{COLLECTION}/documents/import",
                self.base_url
            )))
            .query(&[("action", "upsert")])
            .header("Content-Type", "text/plain")
            .body(body)
            .send()
            .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "search index import failed");
        }
    }

    /// Ranked record ids for `query`, or an empty vec on any failure
    /// (disabled, unavailable, non-2xx, malformed response).
    pub async fn search(&self, query: &str, limit: usize) -> Vec<String> {
        if !self.available() {
            return Vec::new();
        }
        let resp = self
            .authed(self.client.get(format!(
                "{}/collections/{COLLECTION}/documents/search",
                self.base_url
            )))
            .query(&[
                ("q", query.to_string()),
                ("query_by", "text,author_username,author_name".to_string()),
                ("sort_by", "_text_match:desc,like_count:desc".to_string()),
                ("per_page", limit.to_string()),
            ])
            .send()
            .await;

        let resp = match resp {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::warn!(status = %r.status(), "search index query failed");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(error = %e, "search index query failed");
                return Vec::new();
            }
        };

        match resp.json::<SearchResponse>().await {
            Ok(parsed) => parsed
                .hits
                .into_iter()
                .map(|hit| hit.document.id)
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "search index response parse failed");
                Vec::new()
            }
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("X-TYPESENSE-API-KEY", &self.api_key)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    document: SearchDocumentId,
}

#[derive(Debug, Deserialize)]
struct SearchDocumentId {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_names_the_tweets_collection() {
        let schema = collection_schema();
        assert_eq!(schema["name"], "tweets");
    }

    #[tokio::test]
    async fn search_returns_empty_when_unavailable() {
        let config = SearchIndexConfig::default();
        let index = SearchIndex::from_config(&config).unwrap();
        assert!(!index.available());
        assert_eq!(index.search("hello", 10).await, Vec::<String>::new());
    }

    #[tokio::test]
    async fn index_is_a_noop_when_unavailable() {
        let config = SearchIndexConfig::default();
        let index = SearchIndex::from_config(&config).unwrap();
        let docs = vec![IndexDocument {
            id: "1".to_string(),
            text: "hi".to_string(),
            author_username: "a".to_string(),
            author_name: "A".to_string(),
            author_id: "2".to_string(),
            created_at_ts: 0,
            like_count: 0,
            retweet_count: 0,
            view_count: 0,
            language: "en".to_string(),
            is_reply: false,
            is_retweet: false,
            is_quote: false,
        }];
        index.index(&docs).await;
    }
}
