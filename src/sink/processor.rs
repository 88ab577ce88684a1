use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::destination::{Collection, DestinationClient, Entry};
use crate::features::{Feature, Features};
use crate::feed::event::ParsedEvent;

use super::class::EventClass;
use super::dispatch::Registration;
use super::group::Window;
use super::translate::{self, TranslateFn, Translation};
use super::{Processor, SyncContext};

/// Static description of how one class is synced.
pub struct Route {
    pub class: EventClass,
    /// Feature that must be enabled for the class to sync.
    pub feature: Feature,
    pub collection: Collection,
    pub translate: TranslateFn,
}

static BASAL: Route = Route {
    class: EventClass::Basal,
    feature: Feature::Basal,
    collection: Collection::Treatments,
    translate: translate::basal,
};

static BASAL_SUSPENSION: Route = Route {
    class: EventClass::BasalSuspension,
    feature: Feature::PumpEvents,
    collection: Collection::Treatments,
    translate: translate::basal_suspension,
};

static BASAL_RESUME: Route = Route {
    class: EventClass::BasalResume,
    feature: Feature::PumpEvents,
    collection: Collection::Treatments,
    translate: translate::basal_resume,
};

static ALARM: Route = Route {
    class: EventClass::Alarm,
    feature: Feature::PumpEvents,
    collection: Collection::Treatments,
    translate: translate::alarm,
};

static BOLUS: Route = Route {
    class: EventClass::Bolus,
    feature: Feature::Bolus,
    collection: Collection::Treatments,
    translate: translate::bolus,
};

static CARTRIDGE: Route = Route {
    class: EventClass::Cartridge,
    feature: Feature::PumpEvents,
    collection: Collection::Treatments,
    translate: translate::cartridge,
};

static CGM_ALERT: Route = Route {
    class: EventClass::CgmAlert,
    feature: Feature::CgmAlerts,
    collection: Collection::Treatments,
    translate: translate::cgm_alert,
};

static CGM_START_JOIN_STOP: Route = Route {
    class: EventClass::CgmStartJoinStop,
    feature: Feature::PumpEvents,
    collection: Collection::Treatments,
    translate: translate::cgm_session,
};

static CGM_READING: Route = Route {
    class: EventClass::CgmReading,
    feature: Feature::Cgm,
    collection: Collection::Entries,
    translate: translate::cgm_reading,
};

static USER_MODE: Route = Route {
    class: EventClass::UserMode,
    feature: Feature::PumpEvents,
    collection: Collection::Treatments,
    translate: translate::user_mode,
};

/// Processor driven by a [`Route`]: translates its class bucket and writes the
/// entries the destination does not already hold.
pub struct ClassProcessor<D> {
    route: &'static Route,
    destination: Arc<D>,
    device_id: String,
    pretend: bool,
    features: Features,
}

impl<D: DestinationClient> ClassProcessor<D> {
    fn from_route<S>(ctx: &SyncContext<S, D>, route: &'static Route) -> Self {
        Self {
            route,
            destination: Arc::clone(&ctx.destination),
            device_id: ctx.device.device_id.clone(),
            pretend: ctx.pretend,
            features: ctx.features,
        }
    }

    pub fn basal<S>(ctx: &SyncContext<S, D>) -> Self {
        Self::from_route(ctx, &BASAL)
    }

    pub fn basal_suspension<S>(ctx: &SyncContext<S, D>) -> Self {
        Self::from_route(ctx, &BASAL_SUSPENSION)
    }

    pub fn basal_resume<S>(ctx: &SyncContext<S, D>) -> Self {
        Self::from_route(ctx, &BASAL_RESUME)
    }

    pub fn alarm<S>(ctx: &SyncContext<S, D>) -> Self {
        Self::from_route(ctx, &ALARM)
    }

    pub fn bolus<S>(ctx: &SyncContext<S, D>) -> Self {
        Self::from_route(ctx, &BOLUS)
    }

    pub fn cartridge<S>(ctx: &SyncContext<S, D>) -> Self {
        Self::from_route(ctx, &CARTRIDGE)
    }

    pub fn cgm_alert<S>(ctx: &SyncContext<S, D>) -> Self {
        Self::from_route(ctx, &CGM_ALERT)
    }

    pub fn cgm_start_join_stop<S>(ctx: &SyncContext<S, D>) -> Self {
        Self::from_route(ctx, &CGM_START_JOIN_STOP)
    }

    pub fn cgm_reading<S>(ctx: &SyncContext<S, D>) -> Self {
        Self::from_route(ctx, &CGM_READING)
    }

    pub fn user_mode<S>(ctx: &SyncContext<S, D>) -> Self {
        Self::from_route(ctx, &USER_MODE)
    }

    pub fn class(&self) -> EventClass {
        self.route.class
    }
}

impl<D: DestinationClient> Processor for ClassProcessor<D> {
    fn name(&self) -> &str {
        self.route.class.as_str()
    }

    fn enabled(&self) -> bool {
        self.features.contains(self.route.feature)
    }

    fn process(&self, events: &[ParsedEvent], window: Window) -> Result<Vec<Entry>> {
        let tr = Translation {
            device_id: &self.device_id,
            features: self.features,
        };
        Ok((self.route.translate)(&tr, events, window))
    }

    async fn write(&self, entries: Vec<Entry>) -> Result<usize> {
        let (Some(start), Some(end)) = (
            entries.iter().map(|e| e.created_at).min(),
            entries.iter().map(|e| e.created_at).max(),
        ) else {
            return Ok(0);
        };

        let collection = self.route.collection;
        let existing = self
            .destination
            .existing_identifiers(collection, start, end)
            .await
            .with_context(|| format!("listing existing {collection} for {}", self.name()))?;

        let candidates = entries.len();
        let fresh: Vec<Entry> = entries
            .into_iter()
            .filter(|e| !existing.contains(&e.identifier))
            .collect();

        debug!(
            processor = self.name(),
            candidates,
            existing = candidates - fresh.len(),
            "deduplicated candidates"
        );

        if fresh.is_empty() {
            return Ok(0);
        }

        if self.pretend {
            info!(
                processor = self.name(),
                %collection,
                count = fresh.len(),
                "pretend mode, not writing entries"
            );
            return Ok(fresh.len());
        }

        self.destination
            .upload(collection, &fresh)
            .await
            .with_context(|| format!("uploading {} entries", self.name()))
    }
}

/// The production registration table, in dispatch order.
pub fn default_processors<S, D: DestinationClient>() -> Vec<Registration<ClassProcessor<D>, S, D>>
{
    vec![
        Registration::new(EventClass::Basal, ClassProcessor::basal),
        Registration::new(EventClass::BasalSuspension, ClassProcessor::basal_suspension),
        Registration::new(EventClass::BasalResume, ClassProcessor::basal_resume),
        Registration::new(EventClass::Alarm, ClassProcessor::alarm),
        Registration::new(EventClass::Bolus, ClassProcessor::bolus),
        Registration::new(EventClass::Cartridge, ClassProcessor::cartridge),
        Registration::new(EventClass::CgmAlert, ClassProcessor::cgm_alert),
        Registration::new(EventClass::CgmStartJoinStop, ClassProcessor::cgm_start_join_stop),
        Registration::new(EventClass::CgmReading, ClassProcessor::cgm_reading),
        Registration::new(EventClass::UserMode, ClassProcessor::user_mode),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::memory::InMemoryDestination;
    use crate::export::metrics::SyncMetrics;
    use crate::feed::event::{
        BolusCompletedEvent, RawEvent, ResumeEvent, TypedEvent,
    };
    use crate::feed::memory::InMemorySource;
    use crate::sink::TargetDevice;

    fn ctx(
        destination: Arc<InMemoryDestination>,
        features: &[Feature],
        pretend: bool,
    ) -> SyncContext<InMemorySource, InMemoryDestination> {
        SyncContext {
            source: Arc::new(InMemorySource::new(Vec::new())),
            destination,
            device: TargetDevice::new("dev-1"),
            pretend,
            features: Features::new(features),
            metrics: Arc::new(SyncMetrics::new().expect("metrics register")),
        }
    }

    fn bolus_event(seq: u32, ts: u32) -> ParsedEvent {
        ParsedEvent {
            raw: RawEvent {
                source: 0,
                id: 20,
                timestamp: ts,
                seq_num: seq,
            },
            typed: TypedEvent::BolusCompleted(BolusCompletedEvent {
                extended: false,
                completion_status: 3,
                bolus_id: seq as u16,
                iob: 0.0,
                insulin_delivered: 1.5,
                insulin_requested: 1.5,
            }),
        }
    }

    #[test]
    fn test_default_table_covers_every_class_once() {
        let table = default_processors::<InMemorySource, InMemoryDestination>();
        let classes: Vec<EventClass> = table.iter().map(|r| r.class).collect();
        assert_eq!(classes, EventClass::all().to_vec());

        let dest = Arc::new(InMemoryDestination::new());
        let ctx = ctx(dest, &[], false);
        for reg in &table {
            assert_eq!((reg.build)(&ctx).class(), reg.class);
        }
    }

    #[test]
    fn test_enabled_follows_feature() {
        let dest = Arc::new(InMemoryDestination::new());
        let ctx = ctx(dest, &[Feature::Bolus], false);
        assert!(ClassProcessor::bolus(&ctx).enabled());
        assert!(!ClassProcessor::basal(&ctx).enabled());
        assert!(!ClassProcessor::cgm_reading(&ctx).enabled());
    }

    #[test]
    fn test_process_ignores_foreign_payloads() {
        let dest = Arc::new(InMemoryDestination::new());
        let ctx = ctx(dest, &[Feature::Bolus], false);
        let resume = ParsedEvent {
            raw: RawEvent {
                source: 0,
                id: 12,
                timestamp: 5,
                seq_num: 1,
            },
            typed: TypedEvent::Resume(ResumeEvent {
                insulin_remaining: 100,
            }),
        };
        let entries = ClassProcessor::bolus(&ctx)
            .process(&[resume], Window::at(5))
            .expect("process");
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_write_is_idempotent() {
        let dest = Arc::new(InMemoryDestination::new());
        let ctx = ctx(Arc::clone(&dest), &[Feature::Bolus], false);
        let processor = ClassProcessor::bolus(&ctx);
        let events = vec![bolus_event(1, 100), bolus_event(2, 150)];
        let window = Window { start: 100, end: 150 };

        let entries = processor.process(&events, window).expect("process");
        assert_eq!(processor.write(entries).await.expect("write"), 2);

        let entries = processor.process(&events, window).expect("process");
        assert_eq!(processor.write(entries).await.expect("write"), 0);
        assert_eq!(dest.entries().len(), 2);
        // The second run found nothing new and never called upload.
        assert_eq!(dest.uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_pretend_counts_without_writing() {
        let dest = Arc::new(InMemoryDestination::new());
        let ctx = ctx(Arc::clone(&dest), &[Feature::Bolus], true);
        let processor = ClassProcessor::bolus(&ctx);

        let entries = processor
            .process(&[bolus_event(1, 100)], Window::at(100))
            .expect("process");
        assert_eq!(processor.write(entries).await.expect("write"), 1);
        assert!(dest.entries().is_empty());
        assert!(dest.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_write_empty_batch() {
        let dest = Arc::new(InMemoryDestination::new());
        let ctx = ctx(Arc::clone(&dest), &[Feature::Bolus], false);
        let processor = ClassProcessor::bolus(&ctx);
        assert_eq!(processor.write(Vec::new()).await.expect("write"), 0);
        assert!(dest.uploads().is_empty());
    }
}
