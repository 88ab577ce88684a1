use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::destination::{document_hash, DestinationClient};
use crate::features::{Feature, Features};
use crate::feed::SourceClient;

use super::dispatch::UpdaterRegistration;
use super::{SyncContext, Updater};

/// Profile field holding the hash of the settings it was built from.
const SETTINGS_HASH_FIELD: &str = "pumpSettingsHash";

/// Name of the profile store entry written for the pump.
const PROFILE_NAME: &str = "pump";

/// Mirrors the pump's settings document into the destination profile.
pub struct ProfilesUpdater<S, D> {
    source: Arc<S>,
    destination: Arc<D>,
    device_id: String,
    features: Features,
}

impl<S: SourceClient, D: DestinationClient> ProfilesUpdater<S, D> {
    pub fn new(ctx: &SyncContext<S, D>) -> Self {
        Self {
            source: Arc::clone(&ctx.source),
            destination: Arc::clone(&ctx.destination),
            device_id: ctx.device.device_id.clone(),
            features: ctx.features,
        }
    }
}

impl<S: SourceClient, D: DestinationClient> Updater for ProfilesUpdater<S, D> {
    fn name(&self) -> &str {
        "profiles"
    }

    fn enabled(&self) -> bool {
        self.features.contains(Feature::Profiles)
    }

    async fn update(&self, dry_run: bool) -> Result<bool> {
        let settings = self
            .source
            .pump_settings(&self.device_id)
            .await
            .context("fetching pump settings")?;
        let hash = document_hash(&settings);

        let current = self
            .destination
            .current_profile()
            .await
            .context("fetching current profile")?;
        let current_hash = current
            .as_ref()
            .and_then(|p| p.get(SETTINGS_HASH_FIELD))
            .and_then(Value::as_str);

        if current_hash == Some(hash.as_str()) {
            debug!(hash = %hash, "profile matches pump settings");
            return Ok(false);
        }

        if dry_run {
            info!(hash = %hash, "pretend mode, not updating profile");
            return Ok(true);
        }

        let profile = profile_document(&settings, &hash, &self.device_id);
        self.destination
            .put_profile(&profile)
            .await
            .context("storing profile")?;

        info!(hash = %hash, "profile updated from pump settings");

        Ok(true)
    }
}

fn profile_document(settings: &Value, hash: &str, device_id: &str) -> Value {
    json!({
        "defaultProfile": PROFILE_NAME,
        "startDate": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "store": { PROFILE_NAME: settings },
        "device": device_id,
        SETTINGS_HASH_FIELD: hash,
    })
}

/// The production updater table.
pub fn default_updaters<S: SourceClient, D: DestinationClient>(
) -> Vec<UpdaterRegistration<ProfilesUpdater<S, D>, S, D>> {
    vec![UpdaterRegistration::new("profiles", ProfilesUpdater::new)]
}
