use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::destination::DestinationClient;
use crate::export::metrics::SyncMetrics;
use crate::features::{Feature, Features};
use crate::feed::event::pump_time;
use crate::feed::parse::{parse_events, record_count};
use crate::feed::SourceClient;
use crate::sink::dispatch::{Dispatcher, FailurePolicy};
use crate::sink::class::EventClass;
use crate::sink::group::{format_counts, group_events, Window};
use crate::sink::processor::{default_processors, ClassProcessor};
use crate::sink::profiles::{default_updaters, ProfilesUpdater};
use crate::sink::translate::open_basal;
use crate::sink::{Processor, SyncContext, TargetDevice, Updater};

/// Run-wide switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub pretend: bool,
    pub features: Features,
    pub failure_policy: FailurePolicy,
}

/// Outcome of one time range run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries newly written (or that would have been, in pretend mode).
    pub written: usize,
    pub decoded: usize,
    pub unclassified: usize,
    /// Span of the decoded events; `None` when the range held none.
    pub window: Option<Window>,
    /// Timestamp of a basal change still waiting for its successor.
    pub open_basal: Option<u32>,
}

impl SyncReport {
    /// Next high-water mark: the newest event seen, pulled back to an open
    /// basal change so the next run picks it up again.
    pub fn high_water_mark(&self) -> Option<DateTime<Utc>> {
        let window = self.window?;
        let mark = match self.open_basal {
            Some(ts) => ts.min(window.end),
            None => window.end,
        };
        Some(pump_time(mark))
    }
}

/// Syncs one device over a caller-chosen time range.
pub struct TimeRangeSync<S, D, P = ClassProcessor<D>, U = ProfilesUpdater<S, D>> {
    ctx: SyncContext<S, D>,
    dispatcher: Dispatcher<P, U, S, D>,
}

impl<S: SourceClient, D: DestinationClient> TimeRangeSync<S, D> {
    /// Sync with the production processor and updater tables.
    pub fn new(
        source: Arc<S>,
        destination: Arc<D>,
        device: TargetDevice,
        options: SyncOptions,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        let ctx = SyncContext {
            source,
            destination,
            device,
            pretend: options.pretend,
            features: options.features,
            metrics,
        };
        let dispatcher = Dispatcher::new(
            default_processors(),
            default_updaters(),
            options.failure_policy,
        );
        Self { ctx, dispatcher }
    }
}

impl<S, D, P, U> TimeRangeSync<S, D, P, U>
where
    S: SourceClient,
    D: DestinationClient,
    P: Processor,
    U: Updater,
{
    /// Sync with a caller-supplied dispatcher.
    pub fn with_dispatcher(ctx: SyncContext<S, D>, dispatcher: Dispatcher<P, U, S, D>) -> Self {
        Self { ctx, dispatcher }
    }

    pub fn device(&self) -> &TargetDevice {
        &self.ctx.device
    }

    /// Fetch, decode, group and dispatch `[time_start, time_end)`. Returns
    /// the number of entries written.
    pub async fn process(&self, time_start: DateTime<Utc>, time_end: DateTime<Utc>) -> Result<usize> {
        self.run(time_start, time_end).await.map(|r| r.written)
    }

    /// Same as [`Self::process`], returning the full report.
    pub async fn run(&self, time_start: DateTime<Utc>, time_end: DateTime<Utc>) -> Result<SyncReport> {
        let started = Instant::now();
        let device_id = self.ctx.device.device_id.as_str();

        info!(
            device_id,
            %time_start,
            %time_end,
            features = %self.ctx.features,
            pretend = self.ctx.pretend,
            policy = ?self.dispatcher.policy(),
            "processing time range"
        );

        let raw = self
            .ctx
            .source
            .pump_events_raw(device_id, time_start, time_end)
            .await
            .context("fetching pump events")?;
        info!(bytes = raw.len(), records = record_count(&raw), "read raw pump events");

        let events = parse_events(&raw).context("decoding pump events")?;
        let grouping = group_events(events);
        self.ctx.metrics.record_grouping(&grouping);

        info!(
            decoded = grouping.decoded,
            unclassified = grouping.unclassified,
            found = %format_counts(&grouping.groups.counts()),
            window_start = ?grouping.window.map(|w| w.start_time()),
            window_end = ?grouping.window.map(|w| w.end_time()),
            "grouped events"
        );

        let written = self
            .dispatcher
            .dispatch(&self.ctx, &grouping.groups, grouping.window)
            .await?;

        let held_basal = if self.ctx.features.contains(Feature::Basal) {
            open_basal(grouping.groups.get(EventClass::Basal)).map(|e| e.raw.timestamp)
        } else {
            None
        };

        let elapsed = started.elapsed();
        self.ctx.metrics.run_duration.observe(elapsed.as_secs_f64());
        info!(written, elapsed = ?elapsed, "processed time range");

        Ok(SyncReport {
            written,
            decoded: grouping.decoded,
            unclassified: grouping.unclassified,
            window: grouping.window,
            open_basal: held_basal,
        })
    }
}

/// Resolve the time range for a run.
///
/// Without an explicit start the range is the `lookback` before `end`,
/// moved up to `high_water` when that is later.
pub fn resolve_range(
    start: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
    lookback: Duration,
    high_water: Option<DateTime<Utc>>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = match start {
        Some(start) => start,
        None => {
            let lookback = chrono::Duration::from_std(lookback)
                .with_context(|| format!("lookback {lookback:?} out of range"))?;
            let from = end - lookback;
            match high_water {
                Some(mark) if mark > from => mark,
                _ => from,
            }
        }
    };

    if start >= end {
        bail!("start {start} is not before end {end}");
    }

    Ok((start, end))
}
