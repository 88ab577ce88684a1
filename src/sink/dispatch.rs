use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::class::EventClass;
use super::group::{EventGroups, Window};
use super::{Processor, SyncContext, Updater};

/// Builds a processor for one run from the shared context.
pub type ProcessorCtor<P, S, D> = fn(&SyncContext<S, D>) -> P;

/// Builds an updater for one run from the shared context.
pub type UpdaterCtor<U, S, D> = fn(&SyncContext<S, D>) -> U;

/// Binds an event class to the processor that handles it.
pub struct Registration<P, S, D> {
    pub class: EventClass,
    pub build: ProcessorCtor<P, S, D>,
}

impl<P, S, D> Registration<P, S, D> {
    pub fn new(class: EventClass, build: ProcessorCtor<P, S, D>) -> Self {
        Self { class, build }
    }
}

pub struct UpdaterRegistration<U, S, D> {
    pub name: &'static str,
    pub build: UpdaterCtor<U, S, D>,
}

impl<U, S, D> UpdaterRegistration<U, S, D> {
    pub fn new(name: &'static str, build: UpdaterCtor<U, S, D>) -> Self {
        Self { name, build }
    }
}

/// What a processor failure does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and continue with the next class.
    #[default]
    Isolate,
    /// Abort the run on the first failure.
    FailFast,
}

/// Routes class buckets to their processors, then runs updaters.
pub struct Dispatcher<P, U, S, D> {
    processors: Vec<Registration<P, S, D>>,
    updaters: Vec<UpdaterRegistration<U, S, D>>,
    policy: FailurePolicy,
}

impl<P, U, S, D> Dispatcher<P, U, S, D>
where
    P: Processor,
    U: Updater,
{
    pub fn new(
        processors: Vec<Registration<P, S, D>>,
        updaters: Vec<UpdaterRegistration<U, S, D>>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            processors,
            updaters,
            policy,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    fn is_registered(&self, class: EventClass) -> bool {
        self.processors.iter().any(|r| r.class == class)
    }

    /// Run every registered processor with a populated bucket, in table
    /// order, then every updater. Returns the total entries written.
    pub async fn dispatch(
        &self,
        ctx: &SyncContext<S, D>,
        groups: &EventGroups,
        window: Option<Window>,
    ) -> Result<usize> {
        let mut total = 0usize;

        if let Some(window) = window {
            for (class, count) in groups.counts() {
                if !self.is_registered(class) {
                    warn!(%class, count, "no processor registered, events not synced");
                    ctx.metrics.record_skipped(class, "unregistered");
                }
            }

            for reg in &self.processors {
                let events = groups.get(reg.class);
                if events.is_empty() {
                    continue;
                }

                let processor = (reg.build)(ctx);
                if !processor.enabled() {
                    info!(
                        processor = processor.name(),
                        count = events.len(),
                        "processor disabled, skipping"
                    );
                    ctx.metrics.record_skipped(reg.class, "disabled");
                    continue;
                }

                match run_processor(&processor, events, window).await {
                    Ok(written) => {
                        ctx.metrics.record_written(reg.class, written);
                        total += written;
                    }
                    Err(e) => {
                        ctx.metrics.record_processor_failure(processor.name());
                        match self.policy {
                            FailurePolicy::Isolate => {
                                let reason = format!("{e:#}");
                                error!(
                                    processor = processor.name(),
                                    error = %reason,
                                    "processor failed, continuing"
                                );
                            }
                            FailurePolicy::FailFast => {
                                return Err(e.context(format!(
                                    "processor {} failed",
                                    processor.name()
                                )));
                            }
                        }
                    }
                }
            }
        }

        self.run_updaters(ctx).await;

        Ok(total)
    }

    /// Updater outcomes are logged and counted, never propagated.
    async fn run_updaters(&self, ctx: &SyncContext<S, D>) {
        for reg in &self.updaters {
            let updater = (reg.build)(ctx);
            if !updater.enabled() {
                info!(updater = reg.name, "updater disabled, skipping");
                ctx.metrics.record_updater(reg.name, "disabled");
                continue;
            }

            match updater.update(ctx.pretend).await {
                Ok(true) => {
                    info!(updater = reg.name, dry_run = ctx.pretend, "update required");
                    ctx.metrics.record_updater(reg.name, "updated");
                }
                Ok(false) => {
                    debug!(updater = reg.name, "already up to date");
                    ctx.metrics.record_updater(reg.name, "unchanged");
                }
                Err(e) => {
                    let reason = format!("{e:#}");
                    error!(
                        updater = reg.name,
                        error = %reason,
                        "updater failed"
                    );
                    ctx.metrics.record_updater(reg.name, "failed");
                }
            }
        }
    }
}

async fn run_processor<P: Processor>(
    processor: &P,
    events: &[crate::feed::event::ParsedEvent],
    window: Window,
) -> Result<usize> {
    let entries = processor.process(events, window)?;
    let candidates = entries.len();
    let written = processor.write(entries).await?;

    info!(
        processor = processor.name(),
        events = events.len(),
        candidates,
        written,
        "processed class"
    );

    Ok(written)
}
