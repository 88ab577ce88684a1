//! Decoding of raw pump event feeds.
//!
//! A feed is a flat concatenation of [`EVENT_LEN`]-byte records. The buffer
//! length is checked once up front, after which every record is decoded with
//! fixed-offset big-endian reads.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

use super::event::{
    AlarmEvent, AlarmKind, BasalRateChangeEvent, BolusCompletedEvent, BolusRequestedEvent,
    CgmReadingEvent, CgmSessionEvent, DailyBasalEvent, EventType, FillEvent, FillKind,
    ParsedEvent, RawEvent, ResumeEvent, SessionPhase, SuspendEvent, TypedEvent, UserModeEvent,
    EVENT_DATA_LEN, EVENT_LEN,
};

/// Header size in bytes (source/id word, timestamp, sequence number).
const HEADER_SIZE: usize = 10;

/// Errors that can occur while decoding a feed.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("feed length {len} is not a multiple of {} ({remainder} trailing bytes)", EVENT_LEN)]
    Misaligned { len: usize, remainder: usize },

    #[error("event record must be {} bytes, got {size}", EVENT_LEN)]
    RecordLength { size: usize },

    #[error("feed body is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Decode the base64 text body returned by the event feed into raw bytes.
pub fn decode_feed(body: &str) -> Result<Vec<u8>, ParseError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(STANDARD.decode(trimmed)?)
}

/// Decode a whole feed into events, preserving record order.
///
/// Fails without returning any events when the buffer is not an exact
/// multiple of [`EVENT_LEN`].
pub fn parse_events(data: &[u8]) -> Result<Vec<ParsedEvent>, ParseError> {
    let remainder = data.len() % EVENT_LEN;
    if remainder != 0 {
        return Err(ParseError::Misaligned {
            len: data.len(),
            remainder,
        });
    }

    data.chunks_exact(EVENT_LEN).map(parse_event).collect()
}

/// Number of whole records in a buffer.
pub fn record_count(data: &[u8]) -> usize {
    data.len() / EVENT_LEN
}

/// Decode a single [`EVENT_LEN`]-byte record.
pub fn parse_event(record: &[u8]) -> Result<ParsedEvent, ParseError> {
    if record.len() != EVENT_LEN {
        return Err(ParseError::RecordLength { size: record.len() });
    }

    let source_and_id = read_u16_be(record, 0);
    let raw = RawEvent {
        source: ((source_and_id & 0xF000) >> 12) as u8,
        id: source_and_id & 0x0FFF,
        timestamp: read_u32_be(record, 2),
        seq_num: read_u32_be(record, 6),
    };

    let data: [u8; EVENT_DATA_LEN] = read_fixed(record, HEADER_SIZE);

    let typed = match EventType::from_id(raw.id) {
        Some(EventType::BasalRateChange) => TypedEvent::BasalRateChange(parse_basal(&data)),
        Some(EventType::AlertActivated) => TypedEvent::Alarm(parse_alarm(AlarmKind::Alert, &data)),
        Some(EventType::AlarmActivated) => TypedEvent::Alarm(parse_alarm(AlarmKind::Alarm, &data)),
        Some(EventType::MalfunctionActivated) => {
            TypedEvent::Alarm(parse_alarm(AlarmKind::Malfunction, &data))
        }
        Some(EventType::CgmAlertActivated) => {
            TypedEvent::Alarm(parse_alarm(AlarmKind::CgmAlert, &data))
        }
        Some(EventType::PumpingSuspended) => TypedEvent::Suspend(SuspendEvent {
            reason: read_u8(&data, 0),
            insulin_remaining: read_u16_be(&data, 4),
        }),
        Some(EventType::PumpingResumed) => TypedEvent::Resume(ResumeEvent {
            insulin_remaining: read_u16_be(&data, 4),
        }),
        Some(EventType::BolusCompleted) => {
            TypedEvent::BolusCompleted(parse_bolus_completed(false, &data))
        }
        Some(EventType::BolexCompleted) => {
            TypedEvent::BolusCompleted(parse_bolus_completed(true, &data))
        }
        Some(EventType::BolusRequestedMsg1) => {
            TypedEvent::BolusRequested(parse_bolus_requested(&data))
        }
        Some(EventType::CartridgeFilled) => TypedEvent::Fill(FillEvent {
            kind: FillKind::Cartridge,
            amount: read_f32_be(&data, 4),
            insulin_display: read_u32_be(&data, 0),
            completion_status: 0,
        }),
        Some(EventType::CannulaFilled) => TypedEvent::Fill(parse_prime(FillKind::Cannula, &data)),
        Some(EventType::TubingFilled) => TypedEvent::Fill(parse_prime(FillKind::Tubing, &data)),
        Some(EventType::CgmStartSession) => {
            TypedEvent::CgmSession(parse_session(SessionPhase::Start, &data))
        }
        Some(EventType::CgmJoinSession) => {
            TypedEvent::CgmSession(parse_session(SessionPhase::Join, &data))
        }
        Some(EventType::CgmStopSession) => {
            TypedEvent::CgmSession(parse_session(SessionPhase::Stop, &data))
        }
        Some(EventType::CgmDataGxb | EventType::CgmDataFsl2 | EventType::CgmDataG7) => {
            TypedEvent::CgmReading(parse_cgm_reading(&data))
        }
        Some(EventType::UserModeChange) => TypedEvent::UserMode(UserModeEvent {
            current_mode: read_u8(&data, 0),
            previous_mode: read_u8(&data, 1),
            requested_action: read_u8(&data, 2),
        }),
        Some(EventType::DailyBasal) => TypedEvent::DailyBasal(DailyBasalEvent {
            daily_total: read_f32_be(&data, 0),
            basal_rate: read_f32_be(&data, 4),
            iob: read_f32_be(&data, 8),
            battery_pct: read_u8(&data, 12),
        }),
        None => TypedEvent::Unknown(data),
    };

    Ok(ParsedEvent { raw, typed })
}

// ---------------------------------------------------------------------------
// Byte-reading helpers. Callers only pass full records or the fixed-size data
// area, so every offset is in bounds.
// ---------------------------------------------------------------------------

#[inline(always)]
fn read_u8(data: &[u8], offset: usize) -> u8 {
    read_fixed::<1>(data, offset)[0]
}

#[inline(always)]
fn read_i8(data: &[u8], offset: usize) -> i8 {
    read_u8(data, offset) as i8
}

#[inline(always)]
fn read_u16_be(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes(read_fixed::<2>(data, offset))
}

#[inline(always)]
fn read_u32_be(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(read_fixed::<4>(data, offset))
}

#[inline(always)]
fn read_f32_be(data: &[u8], offset: usize) -> f32 {
    f32::from_bits(read_u32_be(data, offset))
}

#[inline(always)]
fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    assert!(offset + N <= data.len());
    // Safety: the assertion above keeps `offset..offset + N` inside `data`.
    unsafe { (data.as_ptr().add(offset) as *const [u8; N]).read_unaligned() }
}

// ---------------------------------------------------------------------------
// Per-event-type payload decoders (offsets relative to the data area)
// ---------------------------------------------------------------------------

/// Basal rate change: id 3.
fn parse_basal(data: &[u8; EVENT_DATA_LEN]) -> BasalRateChangeEvent {
    BasalRateChangeEvent {
        commanded_rate: read_f32_be(data, 0),
        base_rate: read_f32_be(data, 4),
        max_rate: read_f32_be(data, 8),
        // pad at 12-14
        change_type: read_u8(data, 15),
    }
}

/// Alert, alarm, malfunction and CGM alert activations: ids 4, 5, 6, 171.
fn parse_alarm(kind: AlarmKind, data: &[u8; EVENT_DATA_LEN]) -> AlarmEvent {
    AlarmEvent {
        kind,
        alarm_id: read_u32_be(data, 0),
        fault_locator: read_u32_be(data, 4),
        param1: read_u32_be(data, 8),
        param2: read_f32_be(data, 12),
    }
}

/// Bolus and bolex completion: ids 20, 21.
fn parse_bolus_completed(extended: bool, data: &[u8; EVENT_DATA_LEN]) -> BolusCompletedEvent {
    BolusCompletedEvent {
        extended,
        completion_status: read_u16_be(data, 0),
        bolus_id: read_u16_be(data, 2),
        iob: read_f32_be(data, 4),
        insulin_delivered: read_f32_be(data, 8),
        insulin_requested: read_f32_be(data, 12),
    }
}

/// Bolus request message 1: id 64.
fn parse_bolus_requested(data: &[u8; EVENT_DATA_LEN]) -> BolusRequestedEvent {
    BolusRequestedEvent {
        bolus_id: read_u16_be(data, 0),
        bolus_type: read_u8(data, 2),
        correction_included: read_u8(data, 3) != 0,
        carb_amount: read_u16_be(data, 4),
        bg: read_u16_be(data, 6),
        iob: read_f32_be(data, 8),
        carb_ratio: read_u32_be(data, 12),
    }
}

/// Cannula and tubing primes: ids 61, 63.
fn parse_prime(kind: FillKind, data: &[u8; EVENT_DATA_LEN]) -> FillEvent {
    FillEvent {
        kind,
        amount: read_f32_be(data, 0),
        insulin_display: 0,
        completion_status: read_u16_be(data, 4),
    }
}

/// CGM session transitions: ids 207, 208, 212.
fn parse_session(phase: SessionPhase, data: &[u8; EVENT_DATA_LEN]) -> CgmSessionEvent {
    CgmSessionEvent {
        phase,
        transmitter_id: read_u32_be(data, 0),
    }
}

/// CGM readings: ids 256, 372, 399.
fn parse_cgm_reading(data: &[u8; EVENT_DATA_LEN]) -> CgmReadingEvent {
    CgmReadingEvent {
        status: read_u16_be(data, 0),
        kind: read_u8(data, 2),
        rate: read_i8(data, 3),
        glucose: read_u16_be(data, 4),
        rssi: read_i8(data, 6),
        // pad at 7
        transmitter_timestamp: read_u32_be(data, 8),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    /// Build one record from a header and up to 16 bytes of data.
    fn record(id: u16, ts: u32, seq: u32, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(EVENT_LEN);
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&ts.to_be_bytes());
        buf.extend_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(data);
        buf.resize(EVENT_LEN, 0);
        buf
    }

    // -- Framing --

    #[test]
    fn test_empty_feed() {
        assert!(parse_events(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_misaligned_feed() {
        let mut data = record(20, 1, 1, &[]);
        data.extend_from_slice(&[0u8; 5]);
        let err = parse_events(&data).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Misaligned {
                len: 31,
                remainder: 5
            }
        ));
    }

    #[test]
    fn test_misaligned_short_feed() {
        let err = parse_events(&[0u8; EVENT_LEN - 1]).unwrap_err();
        assert!(matches!(err, ParseError::Misaligned { .. }));
    }

    #[test]
    fn test_single_record_wrong_size() {
        let err = parse_event(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, ParseError::RecordLength { size: 10 }));
    }

    #[test]
    fn test_header_fields() {
        // Source 2 in the top nibble, id 20 below it.
        let word: u16 = (2 << 12) | 20;
        let data = record(word, 0x0102_0304, 77, &[]);
        let event = parse_event(&data).unwrap();
        assert_eq!(event.raw.source, 2);
        assert_eq!(event.raw.id, 20);
        assert_eq!(event.raw.timestamp, 0x0102_0304);
        assert_eq!(event.raw.seq_num, 77);
        assert_eq!(event.event_type(), Some(EventType::BolusCompleted));
    }

    #[test]
    fn test_order_preserved() {
        let mut feed = Vec::new();
        for i in 0..5u32 {
            feed.extend_from_slice(&record(if i % 2 == 0 { 20 } else { 5 }, 100 + i, i, &[]));
        }
        let full = parse_events(&feed).unwrap();
        assert_eq!(full.len(), 5);
        for (i, event) in full.iter().enumerate() {
            assert_eq!(event.raw.seq_num, i as u32);
        }
    }

    proptest! {
        #[test]
        fn subrange_decode_matches_slice_of_full_decode(
            records in prop::collection::vec(prop::array::uniform26(any::<u8>()), 0..40),
            a in 0usize..=40,
            b in 0usize..=40,
        ) {
            let feed = records.concat();
            let n = records.len();
            let (lo, hi) = (a.min(b).min(n), a.max(b).min(n));

            let full = parse_events(&feed).expect("aligned feed decodes");
            let sub = parse_events(&feed[lo * EVENT_LEN..hi * EVENT_LEN])
                .expect("aligned sub-range decodes");

            prop_assert_eq!(full.len(), n);
            // Debug output compares NaN payload floats as equal.
            prop_assert_eq!(format!("{sub:?}"), format!("{:?}", &full[lo..hi]));
        }

        #[test]
        fn misaligned_length_always_rejected(len in 0usize..2_000) {
            prop_assume!(len % EVENT_LEN != 0);
            let is_misaligned = matches!(
                parse_events(&vec![0u8; len]),
                Err(ParseError::Misaligned { .. })
            );
            prop_assert!(is_misaligned);
        }
    }

    #[test]
    fn test_unknown_id_decodes_generic() {
        let payload: Vec<u8> = (1..=16).collect();
        let event = parse_event(&record(4000, 9, 9, &payload)).unwrap();
        assert_eq!(event.event_type(), None);
        match event.typed {
            TypedEvent::Unknown(data) => assert_eq!(data.to_vec(), payload),
            other => panic!("expected unknown payload, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_feed_base64() {
        let raw = record(5, 1, 1, &[]);
        let body = format!("  {}\n", STANDARD.encode(&raw));
        assert_eq!(decode_feed(&body).unwrap(), raw);
        assert!(decode_feed("").unwrap().is_empty());
        assert!(matches!(
            decode_feed("not base64!").unwrap_err(),
            ParseError::Base64(_)
        ));
    }

    #[test]
    fn test_record_count() {
        assert_eq!(record_count(&[0u8; EVENT_LEN * 3]), 3);
        assert_eq!(record_count(&[]), 0);
    }

    // -- Payloads --

    #[test]
    fn test_parse_basal_rate_change() {
        let mut data = Vec::new();
        data.extend_from_slice(&0.85f32.to_be_bytes());
        data.extend_from_slice(&1.0f32.to_be_bytes());
        data.extend_from_slice(&3.0f32.to_be_bytes());
        data.extend_from_slice(&[0, 0, 0, 4]);
        let event = parse_event(&record(3, 10, 1, &data)).unwrap();
        match event.typed {
            TypedEvent::BasalRateChange(b) => {
                assert_eq!(b.commanded_rate, 0.85);
                assert_eq!(b.base_rate, 1.0);
                assert_eq!(b.max_rate, 3.0);
                assert_eq!(b.change_type, 4);
            }
            other => panic!("expected basal, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_alarm_kinds() {
        let mut data = Vec::new();
        data.extend_from_slice(&18u32.to_be_bytes());
        data.extend_from_slice(&7u32.to_be_bytes());
        let cases = [
            (4u16, AlarmKind::Alert),
            (5, AlarmKind::Alarm),
            (6, AlarmKind::Malfunction),
            (171, AlarmKind::CgmAlert),
        ];
        for (id, kind) in cases {
            let event = parse_event(&record(id, 1, 1, &data)).unwrap();
            match event.typed {
                TypedEvent::Alarm(a) => {
                    assert_eq!(a.kind, kind);
                    assert_eq!(a.alarm_id, 18);
                    assert_eq!(a.fault_locator, 7);
                }
                other => panic!("expected alarm for id {id}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_bolus_completed_and_bolex() {
        let mut data = Vec::new();
        data.extend_from_slice(&3u16.to_be_bytes());
        data.extend_from_slice(&42u16.to_be_bytes());
        data.extend_from_slice(&1.5f32.to_be_bytes());
        data.extend_from_slice(&2.25f32.to_be_bytes());
        data.extend_from_slice(&2.5f32.to_be_bytes());

        let bolus = parse_event(&record(20, 1, 1, &data)).unwrap();
        match bolus.typed {
            TypedEvent::BolusCompleted(b) => {
                assert!(!b.extended);
                assert_eq!(b.completion_status, 3);
                assert_eq!(b.bolus_id, 42);
                assert_eq!(b.iob, 1.5);
                assert_eq!(b.insulin_delivered, 2.25);
                assert_eq!(b.insulin_requested, 2.5);
            }
            other => panic!("expected bolus, got {other:?}"),
        }

        let bolex = parse_event(&record(21, 1, 1, &data)).unwrap();
        assert!(matches!(
            bolex.typed,
            TypedEvent::BolusCompleted(BolusCompletedEvent { extended: true, .. })
        ));
    }

    #[test]
    fn test_parse_bolus_requested() {
        let mut data = Vec::new();
        data.extend_from_slice(&42u16.to_be_bytes());
        data.push(1);
        data.push(1);
        data.extend_from_slice(&45u16.to_be_bytes());
        data.extend_from_slice(&180u16.to_be_bytes());
        data.extend_from_slice(&0.5f32.to_be_bytes());
        data.extend_from_slice(&10_000u32.to_be_bytes());
        let event = parse_event(&record(64, 1, 1, &data)).unwrap();
        match event.typed {
            TypedEvent::BolusRequested(r) => {
                assert_eq!(r.bolus_id, 42);
                assert!(r.correction_included);
                assert_eq!(r.carb_amount, 45);
                assert_eq!(r.bg, 180);
                assert_eq!(r.carb_ratio, 10_000);
            }
            other => panic!("expected bolus request, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_fills() {
        let mut cart = Vec::new();
        cart.extend_from_slice(&200u32.to_be_bytes());
        cart.extend_from_slice(&195.5f32.to_be_bytes());
        let event = parse_event(&record(33, 1, 1, &cart)).unwrap();
        assert_eq!(
            event.typed,
            TypedEvent::Fill(FillEvent {
                kind: FillKind::Cartridge,
                amount: 195.5,
                insulin_display: 200,
                completion_status: 0,
            })
        );

        let mut prime = Vec::new();
        prime.extend_from_slice(&0.3f32.to_be_bytes());
        prime.extend_from_slice(&1u16.to_be_bytes());
        let event = parse_event(&record(61, 1, 1, &prime)).unwrap();
        assert!(matches!(
            event.typed,
            TypedEvent::Fill(FillEvent {
                kind: FillKind::Cannula,
                completion_status: 1,
                ..
            })
        ));
        let event = parse_event(&record(63, 1, 1, &prime)).unwrap();
        assert!(matches!(
            event.typed,
            TypedEvent::Fill(FillEvent {
                kind: FillKind::Tubing,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_cgm_reading() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u16.to_be_bytes());
        data.push(1);
        data.push((-12i8) as u8);
        data.extend_from_slice(&143u16.to_be_bytes());
        data.push((-70i8) as u8);
        data.push(0);
        data.extend_from_slice(&555u32.to_be_bytes());
        for id in [256u16, 372, 399] {
            let event = parse_event(&record(id, 1, 1, &data)).unwrap();
            assert_eq!(
                event.typed,
                TypedEvent::CgmReading(CgmReadingEvent {
                    status: 0,
                    kind: 1,
                    rate: -12,
                    glucose: 143,
                    rssi: -70,
                    transmitter_timestamp: 555,
                })
            );
        }
    }

    #[test]
    fn test_parse_sessions_and_user_mode() {
        let tx = 0xABCD_0001u32.to_be_bytes();
        let phases = [
            (207u16, SessionPhase::Start),
            (212, SessionPhase::Join),
            (208, SessionPhase::Stop),
        ];
        for (id, phase) in phases {
            let event = parse_event(&record(id, 1, 1, &tx)).unwrap();
            assert_eq!(
                event.typed,
                TypedEvent::CgmSession(CgmSessionEvent {
                    phase,
                    transmitter_id: 0xABCD_0001,
                })
            );
        }

        let event = parse_event(&record(229, 1, 1, &[1, 0, 2])).unwrap();
        assert_eq!(
            event.typed,
            TypedEvent::UserMode(UserModeEvent {
                current_mode: 1,
                previous_mode: 0,
                requested_action: 2,
            })
        );
    }

    #[test]
    fn test_parse_suspend_resume_and_daily_basal() {
        let mut data = vec![3, 0, 0, 0];
        data.extend_from_slice(&120u16.to_be_bytes());
        let event = parse_event(&record(11, 1, 1, &data)).unwrap();
        assert_eq!(
            event.typed,
            TypedEvent::Suspend(SuspendEvent {
                reason: 3,
                insulin_remaining: 120,
            })
        );
        let event = parse_event(&record(12, 1, 1, &data)).unwrap();
        assert_eq!(
            event.typed,
            TypedEvent::Resume(ResumeEvent {
                insulin_remaining: 120,
            })
        );

        let event = parse_event(&record(81, 1, 1, &[])).unwrap();
        assert!(matches!(event.typed, TypedEvent::DailyBasal(_)));
    }
}
