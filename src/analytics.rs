//! Analytics sink (ClickHouse-shaped): two lock-free ring buffers (records
//! served, search queries issued) drained by a background flush worker on
//! `flush_interval`. Buffering and the drain/flush worker loop are
//! generalized from `usage_buffer::UsageLogBuffer`; the two-buffer split
//! and row shapes are grounded on `ClickHouseWriter.buffer_tweets` /
//! `buffer_search_query`.
//!
//! Best-effort throughout: a down sink drops new entries past
//! `buffer_capacity` rather than applying backpressure to the caller, and a
//! failed flush just logs and retries on the next tick.

use std::{sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::{config::AnalyticsConfig, observability::metrics};

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("analytics sink not configured")]
    NotConfigured,
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

#[derive(Debug, Clone, Serialize)]
pub struct RecordEvent {
    pub record_id: String,
    pub author_id: String,
    pub author_username: String,
    pub text: String,
    pub like_count: i64,
    pub retweet_count: i64,
    pub reply_count: i64,
    pub quote_count: i64,
    pub view_count: i64,
    pub bookmark_count: i64,
    pub is_reply: bool,
    pub is_retweet: bool,
    pub is_quote: bool,
    pub language: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchQueryEvent {
    pub query: String,
    pub product: String,
    pub result_count: u32,
    /// `true` for both a cache-layer hit and a stale-but-served SWR hit;
    /// the richer per-request origin distinction lives only in the
    /// in-process metrics, not in this sink (§9).
    pub cache_hit: bool,
    pub response_time_ms: f64,
}

struct RingBuffer<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    dropped: std::sync::atomic::AtomicU64,
}

impl<T> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self {
            sender,
            receiver,
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn push(&self, item: T, sink_name: &str) {
        match self.sender.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics::record_analytics_buffer_dropped(sink_name);
                let count = self
                    .dropped
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if count.is_multiple_of(100) {
                    tracing::warn!(
                        sink = sink_name,
                        dropped_count = count + 1,
                        "analytics buffer overflow: dropping events"
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn drain(&self, batch: &mut Vec<T>, max_size: usize) {
        while batch.len() < max_size {
            match self.receiver.try_recv() {
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }
    }

    fn drain_all(&self, batch: &mut Vec<T>) {
        while let Ok(item) = self.receiver.try_recv() {
            batch.push(item);
        }
    }
}

/// Buffered ClickHouse sink. Construct with [`AnalyticsSink::connect`],
/// then spawn [`AnalyticsSink::start_worker`] once at startup.
pub struct AnalyticsSink {
    client: Client,
    base_url: String,
    database: String,
    enabled: bool,
    available: std::sync::atomic::AtomicBool,
    records: RingBuffer<RecordEvent>,
    search_queries: RingBuffer<SearchQueryEvent>,
    shutdown: std::sync::atomic::AtomicBool,
    flush_interval: Duration,
}

impl AnalyticsSink {
    pub fn new(config: &AnalyticsConfig) -> AnalyticsResult<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: format!("http://{}:{}", config.host, config.port),
            database: config.database.clone(),
            enabled: config.enabled,
            available: std::sync::atomic::AtomicBool::new(false),
            records: RingBuffer::new(config.buffer_capacity),
            search_queries: RingBuffer::new(config.buffer_capacity),
            shutdown: std::sync::atomic::AtomicBool::new(false),
            flush_interval: Duration::from_secs(config.flush_interval_secs),
        })
    }

    pub fn available(&self) -> bool {
        self.available.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Verifies connectivity with `SELECT 1`. Never errors out — a down
    /// sink just stays `available() == false` and every buffer push becomes
    /// a no-op drop.
    pub async fn connect(&self) {
        if !self.enabled {
            tracing::info!("analytics sink disabled");
            return;
        }
        match self
            .client
            .get(format!("{}/?query=SELECT+1", self.base_url))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                self.available
                    .store(true, std::sync::atomic::Ordering::Relaxed);
                tracing::info!(url = %self.base_url, "analytics sink connected");
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "analytics sink probe failed");
            }
            Err(e) => {
                tracing::warn!(error = %e, "analytics sink unavailable");
            }
        }
    }

    pub fn buffer_record(&self, event: RecordEvent) {
        if !self.available() {
            return;
        }
        self.records.push(event, "records");
    }

    pub fn buffer_search_query(&self, event: SearchQueryEvent) {
        if !self.available() {
            return;
        }
        self.search_queries.push(event, "search_queries");
    }

    /// Spawns the background flush loop. Mirrors
    /// `usage_buffer::UsageLogBuffer::start_worker`: periodic drain-and-
    /// flush, with a final drain on shutdown.
    pub fn start_worker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let sink = Arc::clone(self);
        tokio::spawn(async move {
            let mut records_batch = Vec::new();
            let mut queries_batch = Vec::new();
            loop {
                sink.records.drain(&mut records_batch, 1000);
                sink.search_queries.drain(&mut queries_batch, 1000);
                sink.flush(&mut records_batch, &mut queries_batch).await;

                if sink.shutdown.load(std::sync::atomic::Ordering::Acquire) {
                    sink.records.drain_all(&mut records_batch);
                    sink.search_queries.drain_all(&mut queries_batch);
                    sink.flush(&mut records_batch, &mut queries_batch).await;
                    tracing::info!("analytics sink worker shutting down");
                    break;
                }

                tokio::time::sleep(sink.flush_interval).await;
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown
            .store(true, std::sync::atomic::Ordering::Release);
    }

    async fn flush(&self, records: &mut Vec<RecordEvent>, queries: &mut Vec<SearchQueryEvent>) {
        if !records.is_empty() {
            if let Err(e) = self.insert("records", records).await {
                tracing::warn!(error = %e, count = records.len(), "analytics record flush failed");
            }
            records.clear();
        }
        if !queries.is_empty() {
            if let Err(e) = self.insert("search_queries", queries).await {
                tracing::warn!(error = %e, count = queries.len(), "analytics search query flush failed");
            }
            queries.clear();
        }
    }

    async fn insert<T: Serialize>(&self, table: &str, rows: &[T]) -> AnalyticsResult<()> {
        if !self.available() {
            return Ok(());
        }
        let body = rows
            .iter()
            .filter_map(|row| serde_json::to_string(row).ok())
            .collect::<Vec<_>>()
            .join("\n");

        let query = format!("INSERT INTO {}.{table} FORMAT JSONEachRow", self.database);
        self.client
            .post(&self.base_url)
            .query(&[("query", query)])
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffering_is_a_noop_before_connect() {
        let sink = AnalyticsSink::new(&AnalyticsConfig::default()).unwrap();
        assert!(!sink.available());
        sink.buffer_search_query(SearchQueryEvent {
            query: "rust".to_string(),
            product: "Top".to_string(),
            result_count: 0,
            cache_hit: false,
            response_time_ms: 1.0,
        });
    }

    #[test]
    fn ring_buffer_drains_up_to_max_size() {
        let buf: RingBuffer<u32> = RingBuffer::new(10);
        for i in 0..5 {
            buf.push(i, "test");
        }
        let mut batch = Vec::new();
        buf.drain(&mut batch, 3);
        assert_eq!(batch.len(), 3);
        buf.drain_all(&mut batch);
        assert_eq!(batch.len(), 5);
    }

    #[test]
    fn ring_buffer_drops_past_capacity() {
        let buf: RingBuffer<u32> = RingBuffer::new(2);
        buf.push(1, "test");
        buf.push(2, "test");
        buf.push(3, "test");
        assert_eq!(buf.dropped.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
