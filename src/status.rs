use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Serialize, Deserialize, Clone)]
pub struct PipelineStatus {
    pub timestamp_ms: i64,
    pub windows_scored: u64,
    pub anomalies_detected: u64,
    pub score_failures: u64,
    pub alert_failures: u64,
    pub batches_flushed: u64,
    pub pending_batches: usize,
    pub uptime_seconds: u64,
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self {
            timestamp_ms: crate::sensors::current_millis(),
            windows_scored: 0,
            anomalies_detected: 0,
            score_failures: 0,
            alert_failures: 0,
            batches_flushed: 0,
            pending_batches: 0,
            uptime_seconds: 0,
        }
    }

    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self::new()
    }
}
