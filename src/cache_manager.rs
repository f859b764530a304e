//! Cache manager: the facade every route handler calls through. Implements
//! stale-while-revalidate over L1, the L2 first-page search fallback, and
//! write-through fan-out, generalizing `manager.py`'s `get_or_fetch` /
//! `search_or_fetch` from a single hardcoded Redis+Typesense pair to the
//! pluggable [`L1`] trait plus [`SearchIndex`].

use std::{future::Future, sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    analytics::{AnalyticsSink, RecordEvent, SearchQueryEvent},
    cache::{CacheKeys, L1, L1Ext, RecordKind},
    coalescer::Coalescer,
    config::CacheTtlConfig,
    error::{CoreError, CoreResult},
    observability::metrics,
    search_index::{IndexDocument, SearchIndex},
};

/// Where a returned value came from. Exposed so callers can tag metrics or
/// response headers without re-deriving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Live,
    Cache,
    Stale,
    Index,
}

/// A record that can participate in search write-through: hydrated into the
/// L1 per-record cache, indexed into L2, and logged to analytics.
pub trait SearchRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn record_id(&self) -> String;
    fn to_index_document(&self) -> IndexDocument;
    fn to_record_event(&self) -> RecordEvent;
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
struct SearchPage<T> {
    records: Vec<T>,
    next_cursor: Option<String>,
}

#[derive(Clone)]
pub struct CacheManager {
    l1: Option<Arc<dyn L1>>,
    l2: Arc<SearchIndex>,
    analytics: Arc<AnalyticsSink>,
    coalescer: Arc<Coalescer>,
    ttl: CacheTtlConfig,
    hydration_coverage_threshold: f64,
}

impl CacheManager {
    pub fn new(
        l1: Option<Arc<dyn L1>>,
        l2: Arc<SearchIndex>,
        analytics: Arc<AnalyticsSink>,
        ttl: CacheTtlConfig,
        hydration_coverage_threshold: f64,
    ) -> Self {
        Self {
            l1,
            l2,
            analytics,
            coalescer: Arc::new(Coalescer::new()),
            ttl,
            hydration_coverage_threshold,
        }
    }

    /// §4.5.1: single-record fetch with stale-while-revalidate.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        kind: RecordKind,
        fresh: bool,
        build: F,
    ) -> CoreResult<(T, Origin)>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        let ttl = self.ttl.ttl_for(kind);

        if fresh {
            let (result, _) = self.coalescer.do_(key, build).await;
            let value = result?;
            self.write_through_value(key, &value, ttl).await;
            metrics::record_cache_origin("live");
            return Ok((value, Origin::Live));
        }

        if let Some(l1) = &self.l1 {
            match l1.get_envelope::<T>(key).await {
                Ok(Some(env)) => {
                    metrics::record_cache_operation("l1", "get", "hit");
                    if env.is_fresh(self.ttl.swr_threshold_secs) {
                        metrics::record_cache_origin("cache");
                        return Ok((env.data, Origin::Cache));
                    }
                    metrics::record_cache_origin("stale");
                    self.spawn_value_refresh(key.to_string(), ttl, build);
                    return Ok((env.data, Origin::Stale));
                }
                Ok(None) => metrics::record_cache_operation("l1", "get", "miss"),
                Err(_) => metrics::record_cache_operation("l1", "get", "error"),
            }
        }

        let (result, _) = self.coalescer.do_(key, build).await;
        let value = result?;
        self.write_through_value(key, &value, ttl).await;
        metrics::record_cache_origin("live");
        Ok((value, Origin::Live))
    }

    /// §4.5.2: search with SWR plus an L2 fallback for first-page queries.
    pub async fn search_or_fetch<T, F, Fut>(
        &self,
        query: &str,
        product: &str,
        count: usize,
        cursor: Option<&str>,
        fresh: bool,
        build: F,
    ) -> CoreResult<(Vec<T>, Option<String>, Origin)>
    where
        T: SearchRecord,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<(Vec<T>, Option<String>)>> + Send + 'static,
    {
        let key = CacheKeys::search(query, product, &count.to_string(), cursor.unwrap_or(""));
        let search_ttl = Duration::from_secs(self.ttl.ttl_search_secs);

        if fresh {
            let started = std::time::Instant::now();
            let (result, _) = self.coalescer.do_(&key, build).await;
            let (records, next_cursor) = result?;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            self.write_through_search(&key, &records, &next_cursor, query, product, elapsed_ms)
                .await;
            metrics::record_cache_origin("live");
            return Ok((records, next_cursor, Origin::Live));
        }

        if let Some(l1) = &self.l1 {
            match l1.get_envelope::<SearchPage<T>>(&key).await {
                Ok(Some(env)) => {
                    metrics::record_cache_operation("l1", "get", "hit");
                    if env.is_fresh(self.ttl.swr_threshold_secs) {
                        metrics::record_cache_origin("cache");
                        return Ok((env.data.records, env.data.next_cursor, Origin::Cache));
                    }
                    metrics::record_cache_origin("stale");
                    self.spawn_search_refresh(
                        key.clone(),
                        query.to_string(),
                        product.to_string(),
                        build,
                    );
                    return Ok((env.data.records, env.data.next_cursor, Origin::Stale));
                }
                Ok(None) => metrics::record_cache_operation("l1", "get", "miss"),
                Err(_) => metrics::record_cache_operation("l1", "get", "error"),
            }
        }

        if cursor.is_none()
            && let Some(l1) = &self.l1
        {
            let ids = self.l2.search(query, count).await;
            metrics::record_cache_operation("l2", "search", if ids.is_empty() { "miss" } else { "hit" });
            if !ids.is_empty() {
                let hydrate_keys: Vec<String> = ids.iter().map(|id| CacheKeys::tweet(id)).collect();
                let envelopes = l1.mget_envelopes::<T>(&hydrate_keys).await.unwrap_or_default();
                let hydrated: Vec<T> = envelopes.into_iter().flatten().map(|e| e.data).collect();
                let coverage = hydrated.len() as f64 / ids.len() as f64;
                if coverage >= self.hydration_coverage_threshold {
                    let page = SearchPage {
                        records: hydrated.clone(),
                        next_cursor: None,
                    };
                    if let Err(e) = l1.set_envelope(&key, &page, search_ttl).await {
                        tracing::warn!(error = %e, key = %key, "index-hit write-through failed");
                    }
                    metrics::record_cache_origin("index");
                    return Ok((hydrated, None, Origin::Index));
                }
            }
        }

        let started = std::time::Instant::now();
        let (result, _) = self.coalescer.do_(&key, build).await;
        let (records, next_cursor) = result?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.write_through_search(&key, &records, &next_cursor, query, product, elapsed_ms)
            .await;
        metrics::record_cache_origin("live");
        Ok((records, next_cursor, Origin::Live))
    }

    async fn write_through_value<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) {
        if let Some(l1) = &self.l1 {
            match l1.set_envelope(key, value, ttl).await {
                Ok(()) => metrics::record_cache_operation("l1", "set", "ok"),
                Err(e) => {
                    metrics::record_cache_operation("l1", "set", "error");
                    tracing::warn!(error = %e, key, "write-through failed");
                }
            }
        }
    }

    /// §4.5.3: search-result write-through fan-out — L1 full page, L1
    /// per-record pipelined, L2 index detached, analytics buffered.
    async fn write_through_search<T: SearchRecord>(
        &self,
        key: &str,
        records: &[T],
        next_cursor: &Option<String>,
        query: &str,
        product: &str,
        response_time_ms: f64,
    ) {
        let search_ttl = Duration::from_secs(self.ttl.ttl_search_secs);
        let tweet_ttl = Duration::from_secs(self.ttl.ttl_tweet_secs);

        if let Some(l1) = &self.l1 {
            let page = SearchPage {
                records: records.to_vec(),
                next_cursor: next_cursor.clone(),
            };
            match l1.set_envelope(key, &page, search_ttl).await {
                Ok(()) => metrics::record_cache_operation("l1", "set", "ok"),
                Err(e) => {
                    metrics::record_cache_operation("l1", "set", "error");
                    tracing::warn!(error = %e, key, "search write-through failed");
                }
            }

            if !records.is_empty() {
                let keyed_values: Vec<(String, serde_json::Value)> = records
                    .iter()
                    .filter_map(|r| {
                        let envelope = crate::cache::CacheEnvelope::new(r.clone());
                        serde_json::to_value(&envelope)
                            .ok()
                            .map(|v| (CacheKeys::tweet(&r.record_id()), v))
                    })
                    .collect();
                let batch: Vec<crate::cache::BatchSetItem> = keyed_values
                    .iter()
                    .map(|(k, v)| crate::cache::BatchSetItem {
                        key: k.clone(),
                        value: v,
                        ttl: tweet_ttl,
                    })
                    .collect();
                match l1.batch_set_bytes(&batch).await {
                    Ok(()) => metrics::record_cache_operation("l1", "batch_set", "ok"),
                    Err(e) => {
                        metrics::record_cache_operation("l1", "batch_set", "error");
                        tracing::warn!(error = %e, "per-record write-through failed");
                    }
                }
            }
        }

        let l2 = Arc::clone(&self.l2);
        let docs: Vec<IndexDocument> = records.iter().map(|r| r.to_index_document()).collect();
        if !docs.is_empty() {
            tokio::spawn(async move {
                l2.index(&docs).await;
                metrics::record_cache_operation("l2", "index", "ok");
            });
        }

        self.analytics.buffer_search_query(SearchQueryEvent {
            query: query.to_string(),
            product: product.to_string(),
            result_count: records.len() as u32,
            cache_hit: false,
            response_time_ms,
        });
        for record in records {
            self.analytics.buffer_record(record.to_record_event());
        }
    }

    fn spawn_value_refresh<T, F, Fut>(&self, key: String, ttl: Duration, build: F)
    where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        let manager = self.clone();
        tokio::spawn(async move {
            match build().await {
                Ok(value) => manager.write_through_value(&key, &value, ttl).await,
                Err(e) => tracing::warn!(error = %e, key, "swr refresh failed"),
            }
        });
    }

    fn spawn_search_refresh<T, F, Fut>(
        &self,
        key: String,
        query: String,
        product: String,
        build: F,
    ) where
        T: SearchRecord,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<(Vec<T>, Option<String>)>> + Send + 'static,
    {
        let manager = self.clone();
        tokio::spawn(async move {
            match build().await {
                Ok((records, next_cursor)) => {
                    manager
                        .write_through_search(&key, &records, &next_cursor, &query, &product, 0.0)
                        .await
                }
                Err(e) => tracing::warn!(error = %e, key, "search swr refresh failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::MemoryCache,
        config::{AnalyticsConfig, MemoryL1Config, SearchIndexConfig},
    };

    #[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq)]
    struct Tweet {
        id: String,
        text: String,
    }

    impl SearchRecord for Tweet {
        fn record_id(&self) -> String {
            self.id.clone()
        }

        fn to_index_document(&self) -> IndexDocument {
            IndexDocument {
                id: self.id.clone(),
                text: self.text.clone(),
                author_username: String::new(),
                author_name: String::new(),
                author_id: String::new(),
                created_at_ts: 0,
                like_count: 0,
                retweet_count: 0,
                view_count: 0,
                language: "en".to_string(),
                is_reply: false,
                is_retweet: false,
                is_quote: false,
            }
        }

        fn to_record_event(&self) -> RecordEvent {
            RecordEvent {
                record_id: self.id.clone(),
                author_id: String::new(),
                author_username: String::new(),
                text: self.text.clone(),
                like_count: 0,
                retweet_count: 0,
                reply_count: 0,
                quote_count: 0,
                view_count: 0,
                bookmark_count: 0,
                is_reply: false,
                is_retweet: false,
                is_quote: false,
                language: "en".to_string(),
            }
        }
    }

    fn manager() -> CacheManager {
        let l1: Arc<dyn L1> = Arc::new(MemoryCache::new(&MemoryL1Config { max_entries: 1000 }));
        let l2 = Arc::new(SearchIndex::from_config(&SearchIndexConfig {
            enabled: false,
            ..SearchIndexConfig::default()
        })
        .unwrap());
        let analytics = Arc::new(AnalyticsSink::new(&AnalyticsConfig::default()).unwrap());
        CacheManager::new(Some(l1), l2, analytics, CacheTtlConfig::default(), 0.8)
    }

    #[tokio::test]
    async fn get_or_fetch_miss_builds_and_writes_through() {
        let manager = manager();
        let (value, origin) = manager
            .get_or_fetch("tweet:v1:1", RecordKind::Tweet, false, || async {
                Ok::<_, CoreError>("built".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "built");
        assert_eq!(origin, Origin::Live);

        let (value, origin): (String, _) = manager
            .get_or_fetch("tweet:v1:1", RecordKind::Tweet, false, || async {
                panic!("should not rebuild a fresh hit")
            })
            .await
            .unwrap();
        assert_eq!(value, "built");
        assert_eq!(origin, Origin::Cache);
    }

    #[tokio::test]
    async fn get_or_fetch_with_fresh_flag_always_rebuilds() {
        let manager = manager();
        manager
            .get_or_fetch("tweet:v1:2", RecordKind::Tweet, false, || async {
                Ok::<_, CoreError>("first".to_string())
            })
            .await
            .unwrap();

        let (value, origin) = manager
            .get_or_fetch("tweet:v1:2", RecordKind::Tweet, true, || async {
                Ok::<_, CoreError>("second".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "second");
        assert_eq!(origin, Origin::Live);
    }

    #[tokio::test]
    async fn search_or_fetch_miss_then_cache_hit() {
        let manager = manager();
        let tweets = vec![Tweet {
            id: "1".to_string(),
            text: "hello".to_string(),
        }];

        let (records, cursor, origin) = manager
            .search_or_fetch("rust", "Top", 20, None, false, {
                let tweets = tweets.clone();
                move || async move { Ok::<_, CoreError>((tweets, None)) }
            })
            .await
            .unwrap();
        assert_eq!(records, tweets);
        assert_eq!(cursor, None);
        assert_eq!(origin, Origin::Live);

        let (records, _, origin): (Vec<Tweet>, _, _) = manager
            .search_or_fetch("rust", "Top", 20, None, false, || async {
                panic!("should not rebuild a fresh search hit")
            })
            .await
            .unwrap();
        assert_eq!(records, tweets);
        assert_eq!(origin, Origin::Cache);
    }

    #[tokio::test]
    async fn search_or_fetch_error_propagates_without_caching() {
        let manager = manager();
        let result = manager
            .search_or_fetch("rust", "Top", 20, None, false, || async {
                Err::<(Vec<Tweet>, Option<String>), _>(CoreError::NotFound)
            })
            .await;
        assert!(matches!(result, Err(CoreError::NotFound)));
    }
}
