use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::SourceConfig;

use super::parse::decode_feed;
use super::SourceClient;

/// Callback type for recording source request metrics.
pub type MetricsCallback = Box<dyn Fn(&str, &str, Duration) + Send + Sync>;

/// HTTP client for the pump event feed service.
pub struct TandemSourceClient {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
    metrics: Option<MetricsCallback>,
}

impl TandemSourceClient {
    /// Create a new feed client.
    pub fn new(cfg: &SourceConfig) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            access_token: cfg.access_token.clone(),
            metrics: None,
        })
    }

    /// Set a metrics callback for recording request stats.
    /// The callback receives (endpoint_name, status, duration).
    pub fn with_metrics(mut self, cb: MetricsCallback) -> Self {
        self.metrics = Some(cb);
        self
    }

    fn record_request(&self, endpoint: &str, status: &str, duration: Duration) {
        if let Some(ref cb) = self.metrics {
            cb(endpoint, status, duration);
        }
    }

    /// Perform an authenticated GET and return the response body as text.
    /// Every outcome, transport failures included, is reported to the
    /// metrics callback.
    async fn get_text(&self, name: &str, path: &str, query: &[(&str, String)]) -> Result<String> {
        let start = Instant::now();
        let result = self.fetch_text(path, query).await;
        let status = if result.is_ok() { "success" } else { "error" };
        self.record_request(name, status, start.elapsed());
        result
    }

    async fn fetch_text(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let url = format!("{}{}", self.endpoint, path);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("requesting {path}"))?;

        let status_code = response.status();

        if !status_code.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {} from {}: {}", status_code, path, body);
        }

        response
            .text()
            .await
            .with_context(|| format!("reading response from {path}"))
    }
}

impl SourceClient for TandemSourceClient {
    async fn pump_events_raw(
        &self,
        device_id: &str,
        time_start: DateTime<Utc>,
        time_end: DateTime<Utc>,
    ) -> Result<Vec<u8>> {
        debug!(device_id, %time_start, %time_end, "fetching pump events");

        let path = format!("/api/reports/reportsfacade/v1/pumpevents/{device_id}");
        let query = feed_query(time_start, time_end);
        let body = self
            .get_text("pumpevents", &path, &query)
            .await
            .context("fetching pump events")?;

        decode_feed(&body).context("decoding pump event feed")
    }

    async fn pump_settings(&self, device_id: &str) -> Result<serde_json::Value> {
        debug!(device_id, "fetching pump settings");

        let path = format!("/api/reports/reportsfacade/v1/pumpsettings/{device_id}");
        let body = self
            .get_text("pumpsettings", &path, &[])
            .await
            .context("fetching pump settings")?;

        serde_json::from_str(&body).context("decoding pump settings")
    }
}

/// The feed takes inclusive calendar dates; the window end is exclusive so
/// an end exactly at midnight does not pull in the following day.
fn feed_query(time_start: DateTime<Utc>, time_end: DateTime<Utc>) -> Vec<(&'static str, String)> {
    let last_instant = time_end - chrono::Duration::seconds(1);
    let max_date = if last_instant < time_start {
        time_start
    } else {
        last_instant
    };
    vec![
        ("minDate", time_start.format("%Y-%m-%d").to_string()),
        ("maxDate", max_date.format("%Y-%m-%d").to_string()),
    ]
}
