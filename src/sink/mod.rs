pub mod class;
pub mod dispatch;
pub mod group;
pub mod processor;
pub mod profiles;
pub mod translate;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::destination::Entry;
use crate::export::metrics::SyncMetrics;
use crate::features::Features;
use crate::feed::event::ParsedEvent;

use self::group::Window;

/// Processor turns the events of one class into destination entries.
pub trait Processor: Send + Sync {
    /// Returns the processor's name for logging.
    fn name(&self) -> &str;

    /// Whether the processor should run at all for this configuration.
    fn enabled(&self) -> bool;

    /// Translate a class bucket into candidate entries. Must not perform I/O.
    fn process(&self, events: &[ParsedEvent], window: Window) -> Result<Vec<Entry>>;

    /// Persist candidates and return how many were newly written.
    fn write(
        &self,
        entries: Vec<Entry>,
    ) -> impl std::future::Future<Output = Result<usize>> + Send;
}

/// Updater runs once per sync, independent of the event batch.
pub trait Updater: Send + Sync {
    /// Returns the updater's name for logging.
    fn name(&self) -> &str;

    /// Whether the active features turn this updater on.
    fn enabled(&self) -> bool;

    /// Returns whether an update was required. With `dry_run` nothing is
    /// written.
    fn update(&self, dry_run: bool) -> impl std::future::Future<Output = Result<bool>> + Send;
}

/// The device a sync targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDevice {
    pub device_id: String,
    /// Newest event time already known to be synced, if any.
    pub max_date_with_events: Option<DateTime<Utc>>,
}

impl TargetDevice {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            max_date_with_events: None,
        }
    }
}

/// Everything a processor or updater is built from.
pub struct SyncContext<S, D> {
    pub source: Arc<S>,
    pub destination: Arc<D>,
    pub device: TargetDevice,
    pub pretend: bool,
    pub features: Features,
    pub metrics: Arc<SyncMetrics>,
}

impl<S, D> Clone for SyncContext<S, D> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            destination: Arc::clone(&self.destination),
            device: self.device.clone(),
            pretend: self.pretend,
            features: self.features,
            metrics: Arc::clone(&self.metrics),
        }
    }
}
