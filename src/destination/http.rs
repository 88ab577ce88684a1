use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::DestinationConfig;

use super::{Collection, DestinationClient, Entry};

/// Upper bound on documents returned by one lookup query.
const LOOKUP_LIMIT: usize = 10_000;

/// HTTP client for a Nightscout-compatible tracking service.
pub struct NightscoutClient {
    http: reqwest::Client,
    url: String,
    token: String,
    entered_by: String,
}

impl NightscoutClient {
    /// Create a new destination client.
    pub fn new(cfg: &DestinationConfig) -> Result<Self> {
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
            url: cfg.url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
            entered_by: cfg.entered_by.clone(),
        })
    }

    fn auth_query(&self) -> Vec<(String, String)> {
        if self.token.is_empty() {
            Vec::new()
        } else {
            vec![("token".to_string(), self.token.clone())]
        }
    }

    /// Perform a GET request and deserialize the JSON response.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T> {
        let start = Instant::now();
        let url = format!("{}{}", self.url, path);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .query(&self.auth_query())
            .query(query)
            .send()
            .await
            .with_context(|| format!("requesting {path}"))?;

        let status_code = response.status();
        if !status_code.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {} from {}: {}", status_code, path, body);
        }

        let result: T = response
            .json()
            .await
            .with_context(|| format!("decoding response from {path}"))?;

        debug!(path, elapsed = ?start.elapsed(), "destination GET complete");

        Ok(result)
    }

    /// POST a JSON body, discarding the response.
    async fn post_json(&self, path: &str, body: &Value) -> Result<()> {
        let start = Instant::now();
        let url = format!("{}{}", self.url, path);

        let response = self
            .http
            .post(&url)
            .query(&self.auth_query())
            .json(body)
            .send()
            .await
            .with_context(|| format!("posting to {path}"))?;

        let status_code = response.status();
        if !status_code.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("unexpected status {} from {}: {}", status_code, path, body);
        }

        debug!(path, elapsed = ?start.elapsed(), "destination POST complete");

        Ok(())
    }
}

impl DestinationClient for NightscoutClient {
    async fn existing_identifiers(
        &self,
        collection: Collection,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let path = format!("{}.json", collection.api_path());
        let query = lookup_query(collection, start, end);

        let docs: Vec<Value> = self
            .get_json(&path, &query)
            .await
            .with_context(|| format!("listing existing {collection}"))?;

        if is_full_page(docs.len()) {
            warn!(
                %collection,
                %start,
                %end,
                limit = LOOKUP_LIMIT,
                "identifier lookup hit the page limit, older entries may be uploaded again"
            );
        }

        Ok(collect_identifiers(&docs))
    }

    async fn upload(&self, collection: Collection, entries: &[Entry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let docs: Vec<Value> = entries
            .iter()
            .map(|e| e.document(&self.entered_by))
            .collect();

        self.post_json(collection.api_path(), &Value::Array(docs))
            .await
            .with_context(|| format!("uploading {} {collection}", entries.len()))?;

        Ok(entries.len())
    }

    async fn current_profile(&self) -> Result<Option<Value>> {
        let query = vec![("count".to_string(), "1".to_string())];
        let docs: Vec<Value> = self
            .get_json("/api/v1/profile.json", &query)
            .await
            .context("fetching current profile")?;

        Ok(docs.into_iter().next())
    }

    async fn put_profile(&self, profile: &Value) -> Result<()> {
        self.post_json("/api/v1/profile", profile)
            .await
            .context("uploading profile")
    }
}

/// Build the range filter for an identifier lookup.
fn lookup_query(
    collection: Collection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<(String, String)> {
    let mut query = Vec::with_capacity(3);
    match collection {
        Collection::Treatments => {
            query.push((
                "find[created_at][$gte]".to_string(),
                start.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
            query.push((
                "find[created_at][$lte]".to_string(),
                end.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        Collection::Entries => {
            query.push((
                "find[date][$gte]".to_string(),
                start.timestamp_millis().to_string(),
            ));
            query.push((
                "find[date][$lte]".to_string(),
                end.timestamp_millis().to_string(),
            ));
        }
    }
    query.push(("count".to_string(), LOOKUP_LIMIT.to_string()));
    query
}

/// A lookup that returned the full page may have been cut short.
fn is_full_page(returned: usize) -> bool {
    returned >= LOOKUP_LIMIT
}

fn collect_identifiers(docs: &[Value]) -> HashSet<String> {
    docs.iter()
        .filter_map(|d| d.get("identifier").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}
