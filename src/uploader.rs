use crate::synchronizer::CompoundSample;
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use std::future::Future;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RETRY_BUDGET: u32 = 3;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Storage HTTP error: {0}")]
    Http(u16),

    #[error("Storage transport error: {0}")]
    Transport(String),
}

/// Durable blob store consumed by the upload queue.
pub trait StorageSink: Send + Sync {
    fn put(&self, key: &str, payload: Vec<u8>)
        -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// "Is upload currently permitted": a routing decision, not an error.
pub trait ConnectivityPolicy: Send + Sync {
    fn upload_permitted(&self) -> bool;
}

/// An ordered, non-empty run of raw sensor records covering one accumulation
/// interval. Owned by the queue until the sink confirms it or it is merged
/// back into the pending set.
#[derive(Clone, Debug)]
pub struct UploadBatch {
    records: Vec<CompoundSample>,
}

impl UploadBatch {
    pub fn new(records: Vec<CompoundSample>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(UploadBatch { records })
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn first_timestamp_ms(&self) -> i64 {
        self.records[0].timestamp_ms
    }

    /// Storage path component derived from the batch's earliest record.
    pub fn key(&self) -> String {
        let ts = self.first_timestamp_ms();
        match Utc.timestamp_millis_opt(ts).single() {
            Some(dt) => format!("data/{}", dt.format("%Y%m%d_%H%M%S")),
            None => format!("data/{}", ts),
        }
    }

    /// Newline-joined record lines, fixed column order, `null` markers for
    /// absent axis values.
    pub fn payload(&self) -> String {
        self.records
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Connectivity-gated queue with bounded retry and backlog preservation.
///
/// One flush cycle: the incoming batch and the whole pending set are taken
/// under the lock (the only critical section, never held across I/O), then
/// delivered concurrently; anything the sink cannot confirm within the retry
/// budget is merged back into the pending set for the next cycle. A batch is
/// never dropped on a transient failure.
pub struct UploadQueue<S: StorageSink> {
    pending: Mutex<Vec<UploadBatch>>,
    sink: S,
    policy: Arc<dyn ConnectivityPolicy>,
    retry_budget: u32,
}

impl<S: StorageSink> UploadQueue<S> {
    pub fn new(sink: S, policy: Arc<dyn ConnectivityPolicy>, retry_budget: u32) -> Self {
        UploadQueue {
            pending: Mutex::new(Vec::new()),
            sink,
            policy,
            retry_budget,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Run one flush cycle with a freshly produced batch.
    pub async fn flush(&self, batch: UploadBatch) {
        let current = {
            let mut pending = self.pending.lock().unwrap();
            pending.push(batch);
            std::mem::take(&mut *pending)
        };

        if !self.policy.upload_permitted() {
            log::info!(
                "Connectivity unfavorable, holding {} batch(es) for next cycle",
                current.len()
            );
            self.requeue(current);
            return;
        }

        join_all(current.into_iter().map(|b| self.deliver(b))).await;
    }

    /// Attempt one batch, retrying immediately up to the budget. Exhaustion
    /// requeues the batch rather than discarding it.
    async fn deliver(&self, batch: UploadBatch) {
        let key = batch.key();

        for attempt in 1..=self.retry_budget {
            match self.sink.put(&key, batch.payload().into_bytes()).await {
                Ok(()) => {
                    log::info!("Batch processed: {} records -> {}", batch.record_count(), key);
                    return;
                }
                Err(e) => {
                    log::warn!(
                        "Sink failure on attempt {}/{} for {}: {}",
                        attempt,
                        self.retry_budget,
                        key,
                        e
                    );
                }
            }
        }

        log::warn!("Retry budget exhausted for {}, requeueing", key);
        self.requeue(vec![batch]);
    }

    fn requeue(&self, batches: Vec<UploadBatch>) {
        self.pending.lock().unwrap().extend(batches);
    }

    #[cfg(test)]
    fn pending_keys(&self) -> Vec<String> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|b| b.key())
            .collect()
    }
}

/// Blob store reached over HTTP: `PUT <base_url>/<key>` with the rendered
/// batch as the body.
pub struct HttpStorageSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStorageSink {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        HttpStorageSink {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl StorageSink for HttpStorageSink {
    fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), SinkError>> + Send {
        let url = format!("{}/{}", self.base_url, key);
        let client = self.client.clone();

        async move {
            let response = client
                .put(&url)
                .body(payload)
                .send()
                .await
                .map_err(|e| SinkError::Transport(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(SinkError::Http(status.as_u16()))
            }
        }
    }
}

/// Default policy: upload only on Wi-Fi, unless the runtime override flag
/// permits any connectivity.
pub struct WifiPolicy {
    allow_any: Arc<AtomicBool>,
}

impl WifiPolicy {
    pub fn new(allow_any: Arc<AtomicBool>) -> Self {
        WifiPolicy { allow_any }
    }
}

impl ConnectivityPolicy for WifiPolicy {
    fn upload_permitted(&self) -> bool {
        if self.allow_any.load(Ordering::Relaxed) {
            return true;
        }
        wifi_connected()
    }
}

/// Override policy, also used on hosts without a Wi-Fi probe.
pub struct AlwaysPermitted;

impl ConnectivityPolicy for AlwaysPermitted {
    fn upload_permitted(&self) -> bool {
        true
    }
}

fn wifi_connected() -> bool {
    // termux-wifi-connectioninfo reports supplicant_state COMPLETED when
    // associated to an access point
    match Command::new("termux-wifi-connectioninfo").output() {
        Ok(output) => serde_json::from_slice::<serde_json::Value>(&output.stdout)
            .ok()
            .and_then(|v| {
                v.get("supplicant_state")
                    .and_then(|s| s.as_str())
                    .map(|s| s == "COMPLETED")
            })
            .unwrap_or(false),
        Err(_) => false,
    }
}
