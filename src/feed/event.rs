use std::fmt;

use chrono::{DateTime, Utc};

/// Width in bytes of one pump event record.
pub const EVENT_LEN: usize = 26;

/// Size of the per-event data area that follows the 10-byte header.
pub const EVENT_DATA_LEN: usize = 16;

/// Unix time of the pump clock's zero point (2008-01-01T00:00:00Z).
pub const PUMP_EPOCH_SECS: i64 = 1_199_145_600;

/// Convert a raw pump timestamp into wall-clock UTC.
pub fn pump_time(raw: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(PUMP_EPOCH_SECS + i64::from(raw), 0).unwrap_or_default()
}

/// Convert a wall-clock UTC time into pump clock seconds, saturating at the
/// bounds of the 32-bit pump clock.
pub fn pump_seconds(time: DateTime<Utc>) -> u32 {
    let secs = time.timestamp() - PUMP_EPOCH_SECS;
    u32::try_from(secs.max(0)).unwrap_or(u32::MAX)
}

/// EventType identifies the pump event ids this crate knows how to decode.
/// Values are the 12-bit event ids from the record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EventType {
    BasalRateChange = 3,
    AlertActivated = 4,
    AlarmActivated = 5,
    MalfunctionActivated = 6,
    PumpingSuspended = 11,
    PumpingResumed = 12,
    BolusCompleted = 20,
    BolexCompleted = 21,
    CartridgeFilled = 33,
    CannulaFilled = 61,
    TubingFilled = 63,
    BolusRequestedMsg1 = 64,
    DailyBasal = 81,
    CgmAlertActivated = 171,
    CgmStartSession = 207,
    CgmStopSession = 208,
    CgmJoinSession = 212,
    UserModeChange = 229,
    CgmDataGxb = 256,
    CgmDataFsl2 = 372,
    CgmDataG7 = 399,
}

impl EventType {
    /// Returns the canonical log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BasalRateChange => "basal_rate_change",
            Self::AlertActivated => "alert_activated",
            Self::AlarmActivated => "alarm_activated",
            Self::MalfunctionActivated => "malfunction_activated",
            Self::PumpingSuspended => "pumping_suspended",
            Self::PumpingResumed => "pumping_resumed",
            Self::BolusCompleted => "bolus_completed",
            Self::BolexCompleted => "bolex_completed",
            Self::CartridgeFilled => "cartridge_filled",
            Self::CannulaFilled => "cannula_filled",
            Self::TubingFilled => "tubing_filled",
            Self::BolusRequestedMsg1 => "bolus_requested_msg1",
            Self::DailyBasal => "daily_basal",
            Self::CgmAlertActivated => "cgm_alert_activated",
            Self::CgmStartSession => "cgm_start_session",
            Self::CgmStopSession => "cgm_stop_session",
            Self::CgmJoinSession => "cgm_join_session",
            Self::UserModeChange => "user_mode_change",
            Self::CgmDataGxb => "cgm_data_gxb",
            Self::CgmDataFsl2 => "cgm_data_fsl2",
            Self::CgmDataG7 => "cgm_data_g7",
        }
    }

    /// Convert from a raw event id.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            3 => Some(Self::BasalRateChange),
            4 => Some(Self::AlertActivated),
            5 => Some(Self::AlarmActivated),
            6 => Some(Self::MalfunctionActivated),
            11 => Some(Self::PumpingSuspended),
            12 => Some(Self::PumpingResumed),
            20 => Some(Self::BolusCompleted),
            21 => Some(Self::BolexCompleted),
            33 => Some(Self::CartridgeFilled),
            61 => Some(Self::CannulaFilled),
            63 => Some(Self::TubingFilled),
            64 => Some(Self::BolusRequestedMsg1),
            81 => Some(Self::DailyBasal),
            171 => Some(Self::CgmAlertActivated),
            207 => Some(Self::CgmStartSession),
            208 => Some(Self::CgmStopSession),
            212 => Some(Self::CgmJoinSession),
            229 => Some(Self::UserModeChange),
            256 => Some(Self::CgmDataGxb),
            372 => Some(Self::CgmDataFsl2),
            399 => Some(Self::CgmDataG7),
            _ => None,
        }
    }

    /// Return all known event types in numeric order.
    pub fn all() -> &'static [Self] {
        &[
            Self::BasalRateChange,
            Self::AlertActivated,
            Self::AlarmActivated,
            Self::MalfunctionActivated,
            Self::PumpingSuspended,
            Self::PumpingResumed,
            Self::BolusCompleted,
            Self::BolexCompleted,
            Self::CartridgeFilled,
            Self::CannulaFilled,
            Self::TubingFilled,
            Self::BolusRequestedMsg1,
            Self::DailyBasal,
            Self::CgmAlertActivated,
            Self::CgmStartSession,
            Self::CgmStopSession,
            Self::CgmJoinSession,
            Self::UserModeChange,
            Self::CgmDataGxb,
            Self::CgmDataFsl2,
            Self::CgmDataG7,
        ]
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common record header (10 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    /// Upper 4 bits of the first header word.
    pub source: u8,
    /// Lower 12 bits of the first header word; the type discriminant.
    pub id: u16,
    /// Seconds since [`PUMP_EPOCH_SECS`].
    pub timestamp: u32,
    pub seq_num: u32,
}

impl RawEvent {
    /// Wall-clock time of the event.
    pub fn time(&self) -> DateTime<Utc> {
        pump_time(self.timestamp)
    }
}

/// Basal rate change; rates in units per hour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasalRateChangeEvent {
    pub commanded_rate: f32,
    pub base_rate: f32,
    pub max_rate: f32,
    pub change_type: u8,
}

/// Which of the three pump notification families raised an [`AlarmEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    Alert,
    Alarm,
    Malfunction,
    CgmAlert,
}

impl AlarmKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Alarm => "alarm",
            Self::Malfunction => "malfunction",
            Self::CgmAlert => "cgm_alert",
        }
    }
}

/// Alert, alarm, malfunction or CGM alert activation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmEvent {
    pub kind: AlarmKind,
    pub alarm_id: u32,
    pub fault_locator: u32,
    pub param1: u32,
    pub param2: f32,
}

/// Insulin delivery suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspendEvent {
    pub reason: u8,
    pub insulin_remaining: u16,
}

/// Insulin delivery resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeEvent {
    pub insulin_remaining: u16,
}

/// Standard or extended bolus completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BolusCompletedEvent {
    /// True for extended (bolex) deliveries.
    pub extended: bool,
    pub completion_status: u16,
    pub bolus_id: u16,
    pub iob: f32,
    pub insulin_delivered: f32,
    pub insulin_requested: f32,
}

/// First message of a bolus request, carrying the calculator inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BolusRequestedEvent {
    pub bolus_id: u16,
    pub bolus_type: u8,
    pub correction_included: bool,
    /// Grams.
    pub carb_amount: u16,
    /// mg/dL, zero when not entered.
    pub bg: u16,
    pub iob: f32,
    pub carb_ratio: u32,
}

/// Which part of the fluid path a [`FillEvent`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillKind {
    Cartridge,
    Cannula,
    Tubing,
}

/// Cartridge, cannula or tubing fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillEvent {
    pub kind: FillKind,
    /// Units of insulin; cartridge fills report the loaded amount, primes the
    /// primed amount.
    pub amount: f32,
    /// Cartridge fills only: amount shown on the pump display.
    pub insulin_display: u32,
    pub completion_status: u16,
}

/// Phase of a CGM sensor session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Start,
    Join,
    Stop,
}

/// CGM session start, join or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CgmSessionEvent {
    pub phase: SessionPhase,
    pub transmitter_id: u32,
}

/// One CGM glucose reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CgmReadingEvent {
    pub status: u16,
    pub kind: u8,
    /// Rate of change in tenths of mg/dL per minute.
    pub rate: i8,
    /// mg/dL.
    pub glucose: u16,
    pub rssi: i8,
    pub transmitter_timestamp: u32,
}

/// Automation user mode transition (normal, sleep, exercise).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserModeEvent {
    pub current_mode: u8,
    pub previous_mode: u8,
    pub requested_action: u8,
}

/// Daily basal summary. Decoded but not routed anywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyBasalEvent {
    pub daily_total: f32,
    pub basal_rate: f32,
    pub iob: f32,
    pub battery_pct: u8,
}

/// A parsed event wrapping the common header and a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    /// Common record header.
    pub raw: RawEvent,
    /// Typed event payload.
    pub typed: TypedEvent,
}

impl ParsedEvent {
    /// The known event type, if the id is one this crate decodes.
    pub fn event_type(&self) -> Option<EventType> {
        EventType::from_id(self.raw.id)
    }
}

/// Typed event payload variants.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedEvent {
    BasalRateChange(BasalRateChangeEvent),
    Alarm(AlarmEvent),
    Suspend(SuspendEvent),
    Resume(ResumeEvent),
    BolusCompleted(BolusCompletedEvent),
    BolusRequested(BolusRequestedEvent),
    Fill(FillEvent),
    CgmSession(CgmSessionEvent),
    CgmReading(CgmReadingEvent),
    UserMode(UserModeEvent),
    DailyBasal(DailyBasalEvent),
    /// Event id with no decoder; the data area is preserved verbatim.
    Unknown([u8; EVENT_DATA_LEN]),
}
