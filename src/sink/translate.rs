//! Per-class translation of decoded pump events into destination entries.
//!
//! Every function here is pure: it sees one class bucket in decode order plus
//! the batch window and returns candidate entries. Deduplication against the
//! destination happens later, in the processor's write step.

use std::collections::HashMap;

use crate::destination::{entry_identifier, Collection, Entry};
use crate::features::{Feature, Features};
use crate::feed::event::{
    AlarmKind, BolusRequestedEvent, FillKind, ParsedEvent, SessionPhase, TypedEvent,
};

use super::group::Window;

/// Signature shared by every class translation.
pub type TranslateFn = fn(&Translation<'_>, &[ParsedEvent], Window) -> Vec<Entry>;

/// Inputs a translation needs besides the events themselves.
#[derive(Debug, Clone, Copy)]
pub struct Translation<'a> {
    pub device_id: &'a str,
    pub features: Features,
}

impl Translation<'_> {
    fn entry(
        &self,
        collection: Collection,
        event_type: &str,
        event: &ParsedEvent,
        suffix: &str,
    ) -> Entry {
        Entry::new(
            collection,
            event_type,
            event.raw.time(),
            entry_identifier(self.device_id, &event.raw, suffix),
        )
    }

    fn treatment(&self, event_type: &str, event: &ParsedEvent) -> Entry {
        self.entry(Collection::Treatments, event_type, event, "")
    }
}

/// Round a pump float to three decimals so documents carry the value the pump
/// displayed rather than its f32 expansion.
fn round3(v: f32) -> f64 {
    (f64::from(v) * 1000.0).round() / 1000.0
}

fn basal_changes(events: &[ParsedEvent]) -> impl Iterator<Item = &ParsedEvent> {
    events
        .iter()
        .filter(|e| matches!(e.typed, TypedEvent::BasalRateChange(_)))
}

/// The newest basal change in a bucket. Its rate has no end yet, so it is
/// not emitted until a later batch carries its successor.
pub fn open_basal(events: &[ParsedEvent]) -> Option<&ParsedEvent> {
    basal_changes(events).last()
}

/// Temp basal entries. Each rate runs until the next change in the batch;
/// the newest change is held back (see [`open_basal`]).
pub fn basal(tr: &Translation<'_>, events: &[ParsedEvent], _: Window) -> Vec<Entry> {
    let changes: Vec<_> = basal_changes(events).collect();

    changes
        .windows(2)
        .filter_map(|pair| {
            let (event, next) = (pair[0], pair[1]);
            let TypedEvent::BasalRateChange(change) = &event.typed else {
                return None;
            };
            let minutes =
                f64::from(next.raw.timestamp.saturating_sub(event.raw.timestamp)) / 60.0;

            Some(
                tr.treatment("Temp Basal", event)
                    .with_field("rate", round3(change.commanded_rate))
                    .with_field("absolute", round3(change.commanded_rate))
                    .with_field("duration", (minutes * 100.0).round() / 100.0)
                    .with_field("baseRate", round3(change.base_rate)),
            )
        })
        .collect()
}

pub fn basal_suspension(tr: &Translation<'_>, events: &[ParsedEvent], _: Window) -> Vec<Entry> {
    events
        .iter()
        .filter_map(|e| match &e.typed {
            TypedEvent::Suspend(s) => Some(
                tr.treatment("Basal Suspension", e)
                    .with_field("reason", s.reason)
                    .with_field("insulinRemaining", s.insulin_remaining),
            ),
            _ => None,
        })
        .collect()
}

pub fn basal_resume(tr: &Translation<'_>, events: &[ParsedEvent], _: Window) -> Vec<Entry> {
    events
        .iter()
        .filter_map(|e| match &e.typed {
            TypedEvent::Resume(r) => Some(
                tr.treatment("Basal Resume", e)
                    .with_field("insulinRemaining", r.insulin_remaining),
            ),
            _ => None,
        })
        .collect()
}

/// Pump alerts, alarms and malfunctions as announcements.
pub fn alarm(tr: &Translation<'_>, events: &[ParsedEvent], _: Window) -> Vec<Entry> {
    events
        .iter()
        .filter_map(|e| match &e.typed {
            TypedEvent::Alarm(a) if a.kind != AlarmKind::CgmAlert => Some(
                tr.treatment("Announcement", e)
                    .with_field("notes", format!("Pump {} {}", a.kind.as_str(), a.alarm_id))
                    .with_field("alarmId", a.alarm_id),
            ),
            _ => None,
        })
        .collect()
}

/// Completed boluses, joined to their request by bolus id for carbs and BG.
pub fn bolus(tr: &Translation<'_>, events: &[ParsedEvent], _: Window) -> Vec<Entry> {
    let requests: HashMap<u16, &BolusRequestedEvent> = events
        .iter()
        .filter_map(|e| match &e.typed {
            TypedEvent::BolusRequested(r) => Some((r.bolus_id, r)),
            _ => None,
        })
        .collect();

    let with_bg = tr.features.contains(Feature::BolusBg);

    events
        .iter()
        .filter_map(|e| match &e.typed {
            TypedEvent::BolusCompleted(b) if b.insulin_delivered > 0.0 => Some((e, b)),
            _ => None,
        })
        .map(|(event, done)| {
            let event_type = if done.extended { "Combo Bolus" } else { "Bolus" };
            let mut entry = tr
                .treatment(event_type, event)
                .with_field("insulin", round3(done.insulin_delivered))
                .with_field("insulinRequested", round3(done.insulin_requested))
                .with_field("bolusId", done.bolus_id);

            if let Some(request) = requests.get(&done.bolus_id) {
                if request.carb_amount > 0 {
                    entry = entry.with_field("carbs", request.carb_amount);
                }
                if with_bg && request.bg > 0 {
                    entry = entry
                        .with_field("glucose", request.bg)
                        .with_field("glucoseType", "Finger")
                        .with_field("units", "mg/dl");
                }
            }
            entry
        })
        .collect()
}

pub fn cartridge(tr: &Translation<'_>, events: &[ParsedEvent], _: Window) -> Vec<Entry> {
    events
        .iter()
        .filter_map(|e| match &e.typed {
            TypedEvent::Fill(f) => Some(match f.kind {
                FillKind::Cartridge => tr
                    .treatment("Insulin Change", e)
                    .with_field("insulin", round3(f.amount)),
                FillKind::Cannula => tr
                    .treatment("Site Change", e)
                    .with_field("insulin", round3(f.amount)),
                FillKind::Tubing => tr
                    .treatment("Note", e)
                    .with_field("notes", format!("Tubing filled with {}u", round3(f.amount))),
            }),
            _ => None,
        })
        .collect()
}

pub fn cgm_alert(tr: &Translation<'_>, events: &[ParsedEvent], _: Window) -> Vec<Entry> {
    events
        .iter()
        .filter_map(|e| match &e.typed {
            TypedEvent::Alarm(a) if a.kind == AlarmKind::CgmAlert => Some(
                tr.treatment("Announcement", e)
                    .with_field("notes", format!("CGM alert {}", a.alarm_id))
                    .with_field("alarmId", a.alarm_id),
            ),
            _ => None,
        })
        .collect()
}

pub fn cgm_session(tr: &Translation<'_>, events: &[ParsedEvent], _: Window) -> Vec<Entry> {
    events
        .iter()
        .filter_map(|e| match &e.typed {
            TypedEvent::CgmSession(s) => {
                let event_type = match s.phase {
                    SessionPhase::Start | SessionPhase::Join => "Sensor Start",
                    SessionPhase::Stop => "Sensor Stop",
                };
                Some(
                    tr.treatment(event_type, e)
                        .with_field("transmitterId", s.transmitter_id),
                )
            }
            _ => None,
        })
        .collect()
}

/// Glucose readings as `sgv` entries. A zero reading is the sensor reporting
/// no value and is skipped.
pub fn cgm_reading(tr: &Translation<'_>, events: &[ParsedEvent], _: Window) -> Vec<Entry> {
    events
        .iter()
        .filter_map(|e| match &e.typed {
            TypedEvent::CgmReading(r) if r.glucose > 0 => Some(
                tr.entry(Collection::Entries, "sgv", e, "")
                    .with_field("sgv", r.glucose)
                    .with_field("direction", trend_direction(r.rate)),
            ),
            _ => None,
        })
        .collect()
}

/// Map a rate of change in tenths of mg/dL per minute to a trend arrow name.
pub fn trend_direction(rate: i8) -> &'static str {
    if rate == i8::MIN {
        return "NOT COMPUTABLE";
    }
    match rate {
        30.. => "DoubleUp",
        20..=29 => "SingleUp",
        10..=19 => "FortyFiveUp",
        -9..=9 => "Flat",
        -19..=-10 => "FortyFiveDown",
        -29..=-20 => "SingleDown",
        _ => "DoubleDown",
    }
}

fn mode_name(mode: u8) -> &'static str {
    match mode {
        0 => "Normal",
        1 => "Sleep",
        2 => "Exercise",
        _ => "Unknown",
    }
}

/// Sleep and exercise mode transitions.
pub fn user_mode(tr: &Translation<'_>, events: &[ParsedEvent], _: Window) -> Vec<Entry> {
    events
        .iter()
        .filter_map(|e| match &e.typed {
            TypedEvent::UserMode(m) if m.current_mode != m.previous_mode => {
                let entry = match m.current_mode {
                    1 | 2 => tr.treatment(mode_name(m.current_mode), e),
                    0 => tr.treatment("Note", e).with_field(
                        "notes",
                        format!("{} mode ended", mode_name(m.previous_mode)),
                    ),
                    _ => return None,
                };
                Some(entry)
            }
            _ => None,
        })
        .collect()
}
