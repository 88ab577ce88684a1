pub mod event;
pub mod http;
pub mod memory;
pub mod parse;

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Pump event feed service.
pub trait SourceClient: Send + Sync {
    /// Fetch the raw (already transport-decoded) event records for a device
    /// over `[time_start, time_end)`.
    fn pump_events_raw(
        &self,
        device_id: &str,
        time_start: DateTime<Utc>,
        time_end: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;

    /// Fetch the current pump settings document for a device.
    fn pump_settings(
        &self,
        device_id: &str,
    ) -> impl std::future::Future<Output = Result<serde_json::Value>> + Send;
}
