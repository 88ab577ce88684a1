use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::SourceClient;

/// A feed request recorded by [`InMemorySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub device_id: String,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
}

/// Source that serves a fixed byte buffer and settings document.
///
/// Records every feed request so callers can check the window that was asked
/// for.
#[derive(Debug, Default)]
pub struct InMemorySource {
    raw: Vec<u8>,
    settings: Option<serde_json::Value>,
    requests: Mutex<Vec<FeedRequest>>,
}

impl InMemorySource {
    pub fn new(raw: Vec<u8>) -> Self {
        Self {
            raw,
            ..Default::default()
        }
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn requests(&self) -> Vec<FeedRequest> {
        self.requests.lock().clone()
    }
}

impl SourceClient for InMemorySource {
    async fn pump_events_raw(
        &self,
        device_id: &str,
        time_start: DateTime<Utc>,
        time_end: DateTime<Utc>,
    ) -> Result<Vec<u8>> {
        self.requests.lock().push(FeedRequest {
            device_id: device_id.to_string(),
            time_start,
            time_end,
        });
        Ok(self.raw.clone())
    }

    async fn pump_settings(&self, device_id: &str) -> Result<serde_json::Value> {
        self.settings
            .clone()
            .ok_or_else(|| anyhow!("no pump settings for device {device_id}"))
    }
}
