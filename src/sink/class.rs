use std::fmt;

use crate::feed::event::{EventType, ParsedEvent};

/// Semantic category a decoded pump event is routed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EventClass {
    Basal = 0,
    BasalSuspension = 1,
    BasalResume = 2,
    Alarm = 3,
    Bolus = 4,
    Cartridge = 5,
    CgmAlert = 6,
    CgmStartJoinStop = 7,
    CgmReading = 8,
    UserMode = 9,
}

/// Number of EventClass variants, used for array sizing.
pub const EVENT_CLASS_CARDINALITY: usize = 10;

impl EventClass {
    /// Returns the canonical log/metric label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basal => "BASAL",
            Self::BasalSuspension => "BASAL_SUSPENSION",
            Self::BasalResume => "BASAL_RESUME",
            Self::Alarm => "ALARM",
            Self::Bolus => "BOLUS",
            Self::Cartridge => "CARTRIDGE",
            Self::CgmAlert => "CGM_ALERT",
            Self::CgmStartJoinStop => "CGM_START_JOIN_STOP",
            Self::CgmReading => "CGM_READING",
            Self::UserMode => "USER_MODE",
        }
    }

    /// Return all classes in registration order.
    pub fn all() -> &'static [Self] {
        &[
            Self::Basal,
            Self::BasalSuspension,
            Self::BasalResume,
            Self::Alarm,
            Self::Bolus,
            Self::Cartridge,
            Self::CgmAlert,
            Self::CgmStartJoinStop,
            Self::CgmReading,
            Self::UserMode,
        ]
    }

    /// Class of a known event type. `None` for types that are decoded but
    /// not synced.
    pub const fn for_event_type(event_type: EventType) -> Option<Self> {
        match event_type {
            EventType::BasalRateChange => Some(Self::Basal),
            EventType::PumpingSuspended => Some(Self::BasalSuspension),
            EventType::PumpingResumed => Some(Self::BasalResume),
            EventType::AlertActivated
            | EventType::AlarmActivated
            | EventType::MalfunctionActivated => Some(Self::Alarm),
            EventType::BolusCompleted
            | EventType::BolexCompleted
            | EventType::BolusRequestedMsg1 => Some(Self::Bolus),
            EventType::CartridgeFilled | EventType::CannulaFilled | EventType::TubingFilled => {
                Some(Self::Cartridge)
            }
            EventType::CgmAlertActivated => Some(Self::CgmAlert),
            EventType::CgmStartSession | EventType::CgmJoinSession | EventType::CgmStopSession => {
                Some(Self::CgmStartJoinStop)
            }
            EventType::CgmDataGxb | EventType::CgmDataFsl2 | EventType::CgmDataG7 => {
                Some(Self::CgmReading)
            }
            EventType::UserModeChange => Some(Self::UserMode),
            EventType::DailyBasal => None,
        }
    }

    /// Class of a raw event id. Total over every id value.
    pub fn for_id(id: u16) -> Option<Self> {
        EventType::from_id(id).and_then(Self::for_event_type)
    }

    /// Class of a decoded event.
    pub fn for_event(event: &ParsedEvent) -> Option<Self> {
        Self::for_id(event.raw.id)
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinality_matches_variants() {
        assert_eq!(EventClass::all().len(), EVENT_CLASS_CARDINALITY);
        for (i, class) in EventClass::all().iter().enumerate() {
            assert_eq!(*class as usize, i);
        }
    }

    #[test]
    fn test_known_ids() {
        assert_eq!(EventClass::for_id(3), Some(EventClass::Basal));
        assert_eq!(EventClass::for_id(11), Some(EventClass::BasalSuspension));
        assert_eq!(EventClass::for_id(12), Some(EventClass::BasalResume));
        for id in [4, 5, 6] {
            assert_eq!(EventClass::for_id(id), Some(EventClass::Alarm));
        }
        for id in [20, 21, 64] {
            assert_eq!(EventClass::for_id(id), Some(EventClass::Bolus));
        }
        for id in [33, 61, 63] {
            assert_eq!(EventClass::for_id(id), Some(EventClass::Cartridge));
        }
        assert_eq!(EventClass::for_id(171), Some(EventClass::CgmAlert));
        for id in [207, 208, 212] {
            assert_eq!(EventClass::for_id(id), Some(EventClass::CgmStartJoinStop));
        }
        for id in [256, 372, 399] {
            assert_eq!(EventClass::for_id(id), Some(EventClass::CgmReading));
        }
        assert_eq!(EventClass::for_id(229), Some(EventClass::UserMode));
    }

    #[test]
    fn test_decoded_but_unrouted() {
        assert_eq!(EventClass::for_id(81), None);
    }

    #[test]
    fn test_total_over_id_domain() {
        // Every 12-bit id maps to a class or to none; every known type with a
        // class round-trips through its id.
        let mut classified = 0;
        for id in 0..=0x0FFFu16 {
            if EventClass::for_id(id).is_some() {
                classified += 1;
            }
        }
        let expected = EventType::all()
            .iter()
            .filter(|et| EventClass::for_event_type(**et).is_some())
            .count();
        assert_eq!(classified, expected);
    }

    #[test]
    fn test_display() {
        assert_eq!(EventClass::CgmStartJoinStop.to_string(), "CGM_START_JOIN_STOP");
    }
}
