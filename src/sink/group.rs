use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::feed::event::{pump_time, ParsedEvent};

use super::class::{EventClass, EVENT_CLASS_CARDINALITY};

/// Span of pump timestamps covered by a decoded batch, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Smallest event timestamp, in pump clock seconds.
    pub start: u32,
    /// Largest event timestamp, in pump clock seconds.
    pub end: u32,
}

impl Window {
    /// A window covering a single timestamp.
    pub const fn at(ts: u32) -> Self {
        Self { start: ts, end: ts }
    }

    /// Widen the window to cover `ts`.
    pub fn include(&mut self, ts: u32) {
        self.start = self.start.min(ts);
        self.end = self.end.max(ts);
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        pump_time(self.start)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        pump_time(self.end)
    }
}

/// Decoded events bucketed by class, each bucket in decode order.
#[derive(Debug, Clone)]
pub struct EventGroups {
    buckets: [Vec<ParsedEvent>; EVENT_CLASS_CARDINALITY],
}

impl EventGroups {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| Vec::new()),
        }
    }

    pub fn push(&mut self, class: EventClass, event: ParsedEvent) {
        if let Some(bucket) = self.buckets.get_mut(class as usize) {
            bucket.push(event);
        }
    }

    /// Events of one class, in decode order.
    pub fn get(&self, class: EventClass) -> &[ParsedEvent] {
        self.buckets
            .get(class as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_populated(&self, class: EventClass) -> bool {
        !self.get(class).is_empty()
    }

    /// Total events across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }

    /// Non-empty buckets as `(class, count)`, in class order.
    pub fn counts(&self) -> Vec<(EventClass, usize)> {
        EventClass::all()
            .iter()
            .map(|class| (*class, self.get(*class).len()))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}

impl Default for EventGroups {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of bucketing one decoded batch.
#[derive(Debug, Clone)]
pub struct Grouping {
    pub groups: EventGroups,
    /// `None` when the batch was empty.
    pub window: Option<Window>,
    /// Total events seen.
    pub decoded: usize,
    /// Events whose id maps to no class.
    pub unclassified: usize,
}

/// Bucket events by class in a single pass, tracking the timestamp window
/// over every event, classified or not.
pub fn group_events<I>(events: I) -> Grouping
where
    I: IntoIterator<Item = ParsedEvent>,
{
    let mut groups = EventGroups::new();
    let mut window: Option<Window> = None;
    let mut decoded = 0usize;
    let mut unclassified = 0usize;

    for event in events {
        decoded += 1;

        let ts = event.raw.timestamp;
        match window.as_mut() {
            Some(w) => w.include(ts),
            None => window = Some(Window::at(ts)),
        }

        match EventClass::for_event(&event) {
            Some(class) => groups.push(class, event),
            None => unclassified += 1,
        }
    }

    Grouping {
        groups,
        window,
        decoded,
        unclassified,
    }
}

/// Render class counts for logging, e.g. `BOLUS=2 ALARM=1`.
pub fn format_counts(counts: &[(EventClass, usize)]) -> String {
    let mut out = String::new();
    for (i, (class, n)) in counts.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{class}={n}");
    }
    out
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::feed::event::{RawEvent, TypedEvent, EVENT_DATA_LEN};

    fn event(id: u16, ts: u32, seq: u32) -> ParsedEvent {
        ParsedEvent {
            raw: RawEvent {
                source: 0,
                id,
                timestamp: ts,
                seq_num: seq,
            },
            typed: TypedEvent::Unknown([0; EVENT_DATA_LEN]),
        }
    }

    #[test]
    fn test_empty_batch_has_no_window() {
        let grouping = group_events(Vec::new());
        assert!(grouping.window.is_none());
        assert!(grouping.groups.is_empty());
        assert_eq!(grouping.decoded, 0);
        assert_eq!(grouping.unclassified, 0);
    }

    #[test]
    fn test_bolus_bolus_alarm_scenario() {
        let events = vec![event(20, 100, 0), event(20, 150, 1), event(5, 120, 2)];
        let grouping = group_events(events);

        assert_eq!(
            grouping.window,
            Some(Window {
                start: 100,
                end: 150
            })
        );
        let bolus: Vec<u32> = grouping
            .groups
            .get(EventClass::Bolus)
            .iter()
            .map(|e| e.raw.seq_num)
            .collect();
        assert_eq!(bolus, vec![0, 1]);
        let alarm: Vec<u32> = grouping
            .groups
            .get(EventClass::Alarm)
            .iter()
            .map(|e| e.raw.seq_num)
            .collect();
        assert_eq!(alarm, vec![2]);
        assert_eq!(
            grouping.groups.counts(),
            vec![(EventClass::Alarm, 1), (EventClass::Bolus, 2)]
        );
    }

    #[test]
    fn test_unclassified_events_widen_window() {
        // The unknown id carries both the earliest and the latest timestamp.
        let events = vec![event(4000, 10, 0), event(20, 50, 1), event(81, 90, 2)];
        let grouping = group_events(events);
        assert_eq!(grouping.window, Some(Window { start: 10, end: 90 }));
        assert_eq!(grouping.unclassified, 2);
        assert_eq!(grouping.groups.len(), 1);
    }

    /// Mostly routed ids, plus anything in the 12-bit id space.
    fn any_id() -> impl Strategy<Value = u16> {
        prop_oneof![
            prop::sample::select(vec![3u16, 20, 256, 81, 5, 229, 64, 33, 0, 207, 171, 11, 12]),
            0u16..4096,
        ]
    }

    proptest! {
        #[test]
        fn grouping_conserves_events_and_bounds_window(
            headers in prop::collection::vec((any_id(), any::<u32>()), 1..300)
        ) {
            let events: Vec<ParsedEvent> = headers
                .iter()
                .enumerate()
                .map(|(i, &(id, ts))| event(id, ts, i as u32))
                .collect();
            let min = events.iter().map(|e| e.raw.timestamp).min();
            let max = events.iter().map(|e| e.raw.timestamp).max();

            let grouping = group_events(events.clone());

            prop_assert_eq!(grouping.decoded, events.len());
            prop_assert_eq!(grouping.groups.len() + grouping.unclassified, grouping.decoded);
            let window = grouping.window.expect("non-empty batch has a window");
            prop_assert_eq!(Some(window.start), min);
            prop_assert_eq!(Some(window.end), max);

            // Every bucket holds only its own class, in decode order.
            for class in EventClass::all() {
                let bucket = grouping.groups.get(*class);
                prop_assert!(bucket.iter().all(|e| EventClass::for_event(e) == Some(*class)));
                prop_assert!(bucket.windows(2).all(|w| w[0].raw.seq_num < w[1].raw.seq_num));
            }
        }
    }

    #[test]
    fn test_format_counts() {
        let counts = vec![(EventClass::Alarm, 1), (EventClass::Bolus, 2)];
        assert_eq!(format_counts(&counts), "ALARM=1 BOLUS=2");
        assert_eq!(format_counts(&[]), "");
    }

    #[test]
    fn test_window_times() {
        let w = Window { start: 0, end: 60 };
        assert_eq!(w.start_time().to_rfc3339(), "2008-01-01T00:00:00+00:00");
        assert_eq!(w.end_time().to_rfc3339(), "2008-01-01T00:01:00+00:00");
    }
}
