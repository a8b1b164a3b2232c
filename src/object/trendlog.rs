//! Trend-Log Object
//!
//! A trend log samples one property of one object into a fixed-capacity
//! ring buffer. Record numbering is logical: position 1 is the oldest
//! retained record, and `total_record_count` counts every insert ever made,
//! so sequence numbers keep growing after the ring wraps.
//!
//! Log-status records are inserted into the buffer itself when the
//! effective enable state changes (`log-disabled`), when the buffer is
//! purged (`buffer-purged`), and when logging resumes after an outage
//! (`log-interrupted`), matching clause 12.25.
//!
//! The effective enable of a log is `enable AND (start-time <= now <=
//! stop-time)`, where a wildcard start or stop extends the window to
//! infinity on that side.

#[cfg(feature = "std")]
use std::string::String;

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use crate::encoding::{
    encode_application_date, encode_application_time, encode_closing_tag, encode_context_bit_string,
    encode_context_boolean, encode_context_date_time, encode_context_enumerated,
    encode_context_real, encode_context_signed, encode_context_unsigned, encode_opening_tag,
    ApplicationValue, BitString, DateTime, TagReader,
};
use crate::object::{
    encode_with, BacnetError, ErrorClass, ErrorCode, EventState, ObjectIdentifier, ObjectTable,
    ObjectType, PropertyIdentifier, PropertyLists, PropertyResult, ReadAccess, StatusFlags,
    WriteAccess,
};
use crate::service::readrange::ReadRangeSpec;

use log::debug;

/// Ring-buffer capacity of each log instance
pub const TL_MAX_ENTRIES: usize = 100;

/// Worst-case encoding of one log record, used for APDU budgeting
const TL_MAX_ENCODED_RECORD: usize = 32;

/// Default polling interval applied when polled logging is selected with a
/// zero interval (clause 12.25.27)
const TL_DEFAULT_POLL_INTERVAL_S: u32 = 900;

const TREND_LOG_PROPERTIES_REQUIRED: &[PropertyIdentifier] = &[
    PropertyIdentifier::ObjectIdentifierProp,
    PropertyIdentifier::ObjectName,
    PropertyIdentifier::ObjectTypeProp,
    PropertyIdentifier::Enable,
    PropertyIdentifier::StopWhenFull,
    PropertyIdentifier::BufferSize,
    PropertyIdentifier::LogBuffer,
    PropertyIdentifier::RecordCount,
    PropertyIdentifier::TotalRecordCount,
    PropertyIdentifier::EventState,
    PropertyIdentifier::LoggingType,
    PropertyIdentifier::StatusFlags,
];

const TREND_LOG_PROPERTIES_OPTIONAL: &[PropertyIdentifier] = &[
    PropertyIdentifier::Description,
    PropertyIdentifier::StartTime,
    PropertyIdentifier::StopTime,
    PropertyIdentifier::LogDeviceObjectProperty,
    PropertyIdentifier::LogInterval,
    PropertyIdentifier::AlignIntervals,
    PropertyIdentifier::IntervalOffset,
    PropertyIdentifier::Trigger,
];

/// How the log acquires samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LoggingType {
    #[default]
    Polled = 0,
    Cov = 1,
    Triggered = 2,
}

/// Log-status bits recorded in status entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogStatus {
    LogDisabled = 0,
    BufferPurged = 1,
    LogInterrupted = 2,
}

/// The datum of one record, choice-tagged `[0]`..`[9]` on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum LogDatum {
    /// `[0]` log-status bit string
    Status(BitString),
    /// `[1]`
    Boolean(bool),
    /// `[2]`
    Real(f32),
    /// `[3]`
    Enumerated(u32),
    /// `[4]`
    Unsigned(u64),
    /// `[5]`
    Signed(i64),
    /// `[6]`
    Bits(BitString),
    /// `[7]`
    Null,
    /// `[8]` failure reading the monitored property
    Error { class: u32, code: u32 },
    /// `[9]` clock adjustment, in seconds
    TimeChange(f32),
}

impl LogDatum {
    /// The context tag selecting this datum type
    pub fn context_tag(&self) -> u8 {
        match self {
            LogDatum::Status(_) => 0,
            LogDatum::Boolean(_) => 1,
            LogDatum::Real(_) => 2,
            LogDatum::Enumerated(_) => 3,
            LogDatum::Unsigned(_) => 4,
            LogDatum::Signed(_) => 5,
            LogDatum::Bits(_) => 6,
            LogDatum::Null => 7,
            LogDatum::Error { .. } => 8,
            LogDatum::TimeChange(_) => 9,
        }
    }

    /// Build a datum from a sampled application value
    pub fn from_value(value: &ApplicationValue) -> Self {
        match value {
            ApplicationValue::Null => LogDatum::Null,
            ApplicationValue::Boolean(v) => LogDatum::Boolean(*v),
            ApplicationValue::Unsigned(v) => LogDatum::Unsigned(*v),
            ApplicationValue::Signed(v) => LogDatum::Signed(*v),
            ApplicationValue::Real(v) => LogDatum::Real(*v),
            ApplicationValue::Double(v) => LogDatum::Real(*v as f32),
            ApplicationValue::Enumerated(v) => LogDatum::Enumerated(*v),
            ApplicationValue::BitString(v) => LogDatum::Bits(v.clone()),
            _ => LogDatum::Error {
                class: ErrorClass::Property as u32,
                code: u16::from(ErrorCode::DatatypeNotSupported) as u32,
            },
        }
    }
}

/// One buffered record
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime,
    pub datum: LogDatum,
    /// Status flags of the monitored object at sample time, when known
    pub status_flags: Option<StatusFlags>,
}

impl LogRecord {
    /// Encode as a BACnetLogRecord: `[0]` timestamp, `[1]` choice-tagged
    /// datum, optional `[2]` status flags
    pub fn encode(&self, buffer: &mut Vec<u8>) -> crate::encoding::Result<()> {
        encode_context_date_time(buffer, 0, &self.timestamp)?;
        encode_opening_tag(buffer, 1)?;
        let tag = self.datum.context_tag();
        match &self.datum {
            LogDatum::Status(bits) | LogDatum::Bits(bits) => {
                encode_context_bit_string(buffer, tag, bits)?;
            }
            LogDatum::Boolean(value) => encode_context_boolean(buffer, tag, *value)?,
            LogDatum::Real(value) | LogDatum::TimeChange(value) => {
                encode_context_real(buffer, tag, *value)?;
            }
            LogDatum::Enumerated(value) => encode_context_enumerated(buffer, tag, *value)?,
            LogDatum::Unsigned(value) => encode_context_unsigned(buffer, tag, *value)?,
            LogDatum::Signed(value) => encode_context_signed(buffer, tag, *value)?,
            LogDatum::Null => crate::encoding::encode_context_null(buffer, tag)?,
            LogDatum::Error { class, code } => {
                encode_opening_tag(buffer, tag)?;
                crate::encoding::encode_application_enumerated(buffer, *class)?;
                crate::encoding::encode_application_enumerated(buffer, *code)?;
                encode_closing_tag(buffer, tag)?;
            }
        }
        encode_closing_tag(buffer, 1)?;
        if let Some(flags) = self.status_flags {
            encode_context_bit_string(buffer, 2, &flags.to_bit_string())?;
        }
        Ok(())
    }
}

/// The monitored property reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceObjectPropertyReference {
    pub object: ObjectIdentifier,
    pub property: PropertyIdentifier,
    pub array_index: Option<u32>,
    pub device: Option<ObjectIdentifier>,
}

impl DeviceObjectPropertyReference {
    fn encode(&self, buffer: &mut Vec<u8>) -> crate::encoding::Result<()> {
        let (object_type, instance) = self.object.raw();
        crate::encoding::encode_context_object_id(buffer, 0, object_type, instance)?;
        crate::encoding::encode_context_unsigned(buffer, 1, u32::from(self.property) as u64)?;
        if let Some(index) = self.array_index {
            crate::encoding::encode_context_unsigned(buffer, 2, index as u64)?;
        }
        if let Some(device) = self.device {
            let (device_type, device_instance) = device.raw();
            crate::encoding::encode_context_object_id(buffer, 3, device_type, device_instance)?;
        }
        Ok(())
    }

    fn decode(data: &[u8]) -> crate::encoding::Result<Self> {
        let mut reader = TagReader::new(data);
        let (object_type, instance) = reader.context_object_id(0)?;
        let property = reader.context_unsigned(1)?;
        let array_index = if reader.at_context(2) {
            Some(reader.context_unsigned(2)? as u32)
        } else {
            None
        };
        let device = if reader.at_context(3) {
            let (device_type, device_instance) = reader.context_object_id(3)?;
            Some(ObjectIdentifier::from_raw(device_type, device_instance))
        } else {
            None
        };
        Ok(Self {
            object: ObjectIdentifier::from_raw(object_type, instance),
            property: PropertyIdentifier::from(property as u32),
            array_index,
            device,
        })
    }
}

/// Wall-clock now as a BACnet date-time; wildcard when no clock exists
#[cfg(feature = "std")]
pub fn local_now() -> DateTime {
    use chrono::{Datelike, Local, Timelike};
    let now = Local::now();
    DateTime::new(
        crate::encoding::Date::new(
            now.year().clamp(1900, 2154) as u16,
            now.month() as u8,
            now.day() as u8,
            now.weekday().number_from_monday() as u8,
        ),
        crate::encoding::Time::new(
            now.hour() as u8,
            now.minute() as u8,
            now.second() as u8,
            (now.nanosecond() / 10_000_000).min(99) as u8,
        ),
    )
}

#[cfg(not(feature = "std"))]
pub fn local_now() -> DateTime {
    DateTime::WILDCARD
}

/// Compare two concrete (wildcard-free) date-times
fn compare_date_time(a: &DateTime, b: &DateTime) -> core::cmp::Ordering {
    let key = |dt: &DateTime| {
        (
            dt.date.year,
            dt.date.month,
            dt.date.day,
            dt.time.hour,
            dt.time.minute,
            dt.time.second,
            dt.time.hundredths,
        )
    };
    key(a).cmp(&key(b))
}

/// One Trend-Log instance
#[derive(Debug, Clone)]
pub struct TrendLog {
    pub instance: u32,
    pub object_name: String,
    pub description: String,
    enable: bool,
    stop_when_full: bool,
    records: Vec<LogRecord>,
    /// Next write slot, once the ring has wrapped
    head: usize,
    total_record_count: u32,
    start_time: DateTime,
    stop_time: DateTime,
    logging_type: LoggingType,
    /// Polling interval in seconds; zero for triggered logging
    log_interval_seconds: u32,
    align_intervals: bool,
    interval_offset_seconds: u32,
    trigger_pending: bool,
    source: DeviceObjectPropertyReference,
    /// Effective enable at the time of the last state-change record
    last_effective_enable: bool,
}

impl TrendLog {
    pub fn new(instance: u32, object_name: &str, source: DeviceObjectPropertyReference) -> Self {
        Self {
            instance,
            object_name: object_name.into(),
            description: String::new(),
            enable: false,
            stop_when_full: false,
            records: Vec::with_capacity(TL_MAX_ENTRIES),
            head: 0,
            total_record_count: 0,
            start_time: DateTime::WILDCARD,
            stop_time: DateTime::WILDCARD,
            logging_type: LoggingType::Polled,
            log_interval_seconds: TL_DEFAULT_POLL_INTERVAL_S,
            align_intervals: false,
            interval_offset_seconds: 0,
            trigger_pending: false,
            source,
            last_effective_enable: false,
        }
    }

    pub fn record_count(&self) -> u32 {
        self.records.len() as u32
    }

    pub fn total_record_count(&self) -> u32 {
        self.total_record_count
    }

    pub fn enable(&self) -> bool {
        self.enable
    }

    pub fn logging_type(&self) -> LoggingType {
        self.logging_type
    }

    pub fn log_interval_seconds(&self) -> u32 {
        self.log_interval_seconds
    }

    pub fn source(&self) -> &DeviceObjectPropertyReference {
        &self.source
    }

    /// Consume a pending trigger request
    pub fn take_trigger(&mut self) -> bool {
        core::mem::replace(&mut self.trigger_pending, false)
    }

    fn is_full(&self) -> bool {
        self.records.len() == TL_MAX_ENTRIES
    }

    /// The start/stop schedule window contains `now`; wildcard boundaries
    /// extend the window to infinity on that side
    fn in_schedule(&self, now: &DateTime) -> bool {
        if now.has_wildcard() {
            // No clock available: the schedule cannot gate logging.
            return true;
        }
        if !self.start_time.has_wildcard()
            && compare_date_time(now, &self.start_time) == core::cmp::Ordering::Less
        {
            return false;
        }
        if !self.stop_time.has_wildcard()
            && compare_date_time(now, &self.stop_time) == core::cmp::Ordering::Greater
        {
            return false;
        }
        true
    }

    /// The runtime predicate combining `enable` with the schedule
    pub fn effective_enable(&self, now: &DateTime) -> bool {
        self.enable && self.in_schedule(now)
    }

    /// Unconditional ring insert; wraps over the oldest record
    fn insert(&mut self, record: LogRecord) {
        if self.records.len() < TL_MAX_ENTRIES {
            self.records.push(record);
        } else {
            self.records[self.head] = record;
            self.head = (self.head + 1) % TL_MAX_ENTRIES;
        }
        self.total_record_count = self.total_record_count.wrapping_add(1);
    }

    fn insert_status(&mut self, status: LogStatus, state: bool, now: DateTime) {
        let mut bits = BitString::new();
        let _ = bits.set_bit(LogStatus::LogDisabled as u8, false);
        let _ = bits.set_bit(LogStatus::BufferPurged as u8, false);
        let _ = bits.set_bit(LogStatus::LogInterrupted as u8, false);
        let _ = bits.set_bit(status as u8, state);
        self.insert(LogRecord {
            timestamp: now,
            datum: LogDatum::Status(bits),
            status_flags: None,
        });
    }

    /// Record the effective-enable transition if one happened
    fn note_enable_transition(&mut self, now: DateTime) {
        let effective = self.effective_enable(&now);
        if effective != self.last_effective_enable {
            self.insert_status(LogStatus::LogDisabled, !effective, now);
            self.last_effective_enable = effective;
        }
    }

    /// Purge the buffer: head and count reset together, and the
    /// buffer-purged notice is the first record written afterwards
    fn purge(&mut self, now: DateTime) {
        self.records.clear();
        self.head = 0;
        self.insert_status(LogStatus::BufferPurged, true, now);
        debug!("trend log {} purged", self.instance);
    }

    /// Append a sampled datum. Returns false when the log is not
    /// effectively enabled or the full/stop-when-full rule blocks it.
    pub fn record_datum(&mut self, datum: LogDatum, status_flags: Option<StatusFlags>, now: DateTime) -> bool {
        if !self.effective_enable(&now) {
            return false;
        }
        if self.is_full() && self.stop_when_full {
            if self.enable {
                // Clause 12.25.12: a full stop-when-full log disables itself.
                self.enable = false;
                self.note_enable_transition(now);
            }
            return false;
        }
        self.insert(LogRecord {
            timestamp: now,
            datum,
            status_flags,
        });
        true
    }

    /// Read one record by 1-based logical position; position 1 is the
    /// oldest retained record
    pub fn record_at_position(&self, position: u32) -> Option<&LogRecord> {
        if position == 0 || position > self.records.len() as u32 {
            return None;
        }
        let physical = if self.is_full() {
            (self.head + position as usize - 1) % TL_MAX_ENTRIES
        } else {
            position as usize - 1
        };
        self.records.get(physical)
    }

    /// Sequence number of the record at a 1-based position
    pub fn sequence_of_position(&self, position: u32) -> u32 {
        self.total_record_count - self.record_count() + position
    }
}

/// Outcome of a ReadRange evaluation
#[derive(Debug, Clone)]
pub struct RangeReadout {
    pub item_data: Vec<u8>,
    pub item_count: u32,
    pub first_item: bool,
    pub last_item: bool,
    pub more_items: bool,
    pub first_sequence_number: Option<u32>,
}

/// All Trend-Log instances of the device
#[derive(Debug, Default)]
pub struct TrendLogTable {
    logs: Vec<TrendLog>,
}

impl TrendLogTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, log: TrendLog) {
        let position = self
            .logs
            .partition_point(|existing| existing.instance < log.instance);
        self.logs.insert(position, log);
    }

    pub fn get(&self, instance: u32) -> Option<&TrendLog> {
        self.logs.iter().find(|log| log.instance == instance)
    }

    pub fn get_mut(&mut self, instance: u32) -> Option<&mut TrendLog> {
        self.logs.iter_mut().find(|log| log.instance == instance)
    }

    /// Evaluate a ReadRange against one log's buffer.
    ///
    /// `max_bytes` bounds the encoded item data so the ack fits the APDU.
    pub fn read_range(
        &self,
        instance: u32,
        range: &ReadRangeSpec,
        max_bytes: usize,
    ) -> PropertyResult<RangeReadout> {
        let log = self.get(instance).ok_or_else(BacnetError::unknown_object)?;

        let record_count = log.record_count() as i64;
        let (start, count, by_sequence) = match range {
            ReadRangeSpec::ReadAll => (1i64, record_count, false),
            ReadRangeSpec::ByPosition {
                reference_index,
                count,
            } => (*reference_index as i64, *count as i64, false),
            ReadRangeSpec::BySequence {
                reference_sequence,
                count,
            } => {
                let base = log.total_record_count as i64 - record_count;
                (*reference_sequence as i64 - base, *count as i64, true)
            }
            ReadRangeSpec::ByTime { .. } => return Err(BacnetError::services_other()),
        };

        // Normalize a negative count into start/positive-count form.
        let (mut start, count) = if count < 0 {
            let adjusted = start + count + 1;
            if adjusted < 1 {
                (1, start)
            } else {
                (adjusted, -count)
            }
        } else {
            (start, count)
        };
        if start < 1 {
            // A sequence reference older than the buffer clamps forward.
            start = 1;
        }

        let mut readout = RangeReadout {
            item_data: Vec::new(),
            item_count: 0,
            first_item: false,
            last_item: false,
            more_items: false,
            first_sequence_number: None,
        };

        if record_count == 0 || start > record_count || count <= 0 {
            return Ok(readout);
        }

        let target = (start + count - 1).min(record_count);
        let mut position = start;
        let mut last_encoded = 0i64;
        while position <= target {
            if readout.item_data.len() + TL_MAX_ENCODED_RECORD > max_bytes {
                readout.more_items = true;
                break;
            }
            let record = log
                .record_at_position(position as u32)
                .ok_or_else(BacnetError::unknown_object)?;
            record
                .encode(&mut readout.item_data)
                .map_err(BacnetError::from)?;
            if readout.item_count == 0 && by_sequence {
                readout.first_sequence_number = Some(log.sequence_of_position(position as u32));
            }
            readout.item_count += 1;
            last_encoded = position;
            position += 1;
        }

        readout.first_item = start == 1 && readout.item_count > 0;
        readout.last_item = last_encoded == record_count;
        Ok(readout)
    }
}

impl ObjectTable for TrendLogTable {
    fn object_type(&self) -> ObjectType {
        ObjectType::TrendLog
    }

    fn count(&self) -> u32 {
        self.logs.len() as u32
    }

    fn valid_instance(&self, instance: u32) -> bool {
        self.get(instance).is_some()
    }

    fn index_to_instance(&self, index: u32) -> Option<u32> {
        self.logs.get(index as usize).map(|log| log.instance)
    }

    fn instance_to_index(&self, instance: u32) -> Option<u32> {
        self.logs
            .iter()
            .position(|log| log.instance == instance)
            .map(|index| index as u32)
    }

    fn property_lists(&self) -> PropertyLists {
        PropertyLists {
            required: TREND_LOG_PROPERTIES_REQUIRED,
            optional: TREND_LOG_PROPERTIES_OPTIONAL,
            proprietary: &[],
        }
    }

    fn read_property(&self, access: &ReadAccess, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
        let log = self
            .get(access.object.instance)
            .ok_or_else(BacnetError::unknown_object)?;
        if access.array_index.is_some() {
            return Err(BacnetError::invalid_array_index());
        }
        match access.property {
            PropertyIdentifier::ObjectIdentifierProp => encode_with(buffer, |b| {
                crate::encoding::encode_application_object_id(
                    b,
                    ObjectType::TrendLog.into(),
                    log.instance,
                )
            }),
            PropertyIdentifier::ObjectName => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &log.object_name)
            }),
            PropertyIdentifier::ObjectTypeProp => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(
                    b,
                    u16::from(ObjectType::TrendLog) as u32,
                )
            }),
            PropertyIdentifier::Description => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &log.description)
            }),
            PropertyIdentifier::Enable => encode_with(buffer, |b| {
                crate::encoding::encode_application_boolean(b, log.enable)
            }),
            PropertyIdentifier::StopWhenFull => encode_with(buffer, |b| {
                crate::encoding::encode_application_boolean(b, log.stop_when_full)
            }),
            PropertyIdentifier::BufferSize => encode_with(buffer, |b| {
                crate::encoding::encode_application_unsigned(b, TL_MAX_ENTRIES as u64)
            }),
            // The buffer itself is read through ReadRange only.
            PropertyIdentifier::LogBuffer => Err(BacnetError::new(
                ErrorClass::Property,
                ErrorCode::ReadAccessDenied,
            )),
            PropertyIdentifier::RecordCount => encode_with(buffer, |b| {
                crate::encoding::encode_application_unsigned(b, log.record_count() as u64)
            }),
            PropertyIdentifier::TotalRecordCount => encode_with(buffer, |b| {
                crate::encoding::encode_application_unsigned(b, log.total_record_count() as u64)
            }),
            PropertyIdentifier::EventState => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(b, EventState::Normal as u32)
            }),
            PropertyIdentifier::LoggingType => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(b, log.logging_type as u32)
            }),
            PropertyIdentifier::StatusFlags => encode_with(buffer, |b| {
                crate::encoding::encode_application_bit_string(
                    b,
                    &StatusFlags::empty().to_bit_string(),
                )
            }),
            PropertyIdentifier::StartTime => encode_with(buffer, |b| {
                encode_application_date(b, &log.start_time.date)?;
                encode_application_time(b, &log.start_time.time)
            }),
            PropertyIdentifier::StopTime => encode_with(buffer, |b| {
                encode_application_date(b, &log.stop_time.date)?;
                encode_application_time(b, &log.stop_time.time)
            }),
            PropertyIdentifier::LogDeviceObjectProperty => {
                encode_with(buffer, |b| log.source.encode(b))
            }
            PropertyIdentifier::LogInterval => encode_with(buffer, |b| {
                // On the wire the interval is hundredths of a second.
                crate::encoding::encode_application_unsigned(
                    b,
                    log.log_interval_seconds as u64 * 100,
                )
            }),
            PropertyIdentifier::AlignIntervals => encode_with(buffer, |b| {
                crate::encoding::encode_application_boolean(b, log.align_intervals)
            }),
            PropertyIdentifier::IntervalOffset => encode_with(buffer, |b| {
                crate::encoding::encode_application_unsigned(
                    b,
                    log.interval_offset_seconds as u64 * 100,
                )
            }),
            PropertyIdentifier::Trigger => encode_with(buffer, |b| {
                crate::encoding::encode_application_boolean(b, log.trigger_pending)
            }),
            _ => Err(BacnetError::unknown_property()),
        }
    }

    fn write_property(&mut self, access: &WriteAccess<'_>) -> PropertyResult<()> {
        let now = local_now();
        let log = self
            .get_mut(access.object.instance)
            .ok_or_else(BacnetError::unknown_object)?;
        if access.array_index.is_some() {
            return Err(BacnetError::invalid_array_index());
        }

        let mut reader = TagReader::new(access.application_data);

        match access.property {
            PropertyIdentifier::Enable => {
                let value = decode_boolean(&mut reader)?;
                // Clause 12.25.5: a full stop-when-full log cannot be
                // re-enabled until it is purged.
                if value
                    && !log.enable
                    && log.stop_when_full
                    && log.is_full()
                {
                    return Err(BacnetError::log_buffer_full());
                }
                if log.enable != value {
                    log.enable = value;
                    log.note_enable_transition(now);
                }
                Ok(())
            }
            PropertyIdentifier::StopWhenFull => {
                let value = decode_boolean(&mut reader)?;
                if log.stop_when_full != value {
                    log.stop_when_full = value;
                    if value && log.is_full() && log.enable {
                        log.enable = false;
                        log.note_enable_transition(now);
                    }
                }
                Ok(())
            }
            PropertyIdentifier::BufferSize => Err(BacnetError::write_access_denied()),
            PropertyIdentifier::RecordCount => {
                let value = decode_unsigned(&mut reader)?;
                if value == 0 {
                    log.purge(now);
                }
                Ok(())
            }
            PropertyIdentifier::LoggingType => {
                let value = decode_enumerated(&mut reader)?;
                match value {
                    0 => {
                        log.logging_type = LoggingType::Polled;
                        if log.log_interval_seconds == 0 {
                            log.log_interval_seconds = TL_DEFAULT_POLL_INTERVAL_S;
                        }
                        Ok(())
                    }
                    1 => Err(BacnetError::new(
                        ErrorClass::Property,
                        ErrorCode::OptionalFunctionalityNotSupported,
                    )),
                    2 => {
                        log.logging_type = LoggingType::Triggered;
                        log.log_interval_seconds = 0;
                        Ok(())
                    }
                    _ => Err(BacnetError::value_out_of_range()),
                }
            }
            PropertyIdentifier::StartTime => {
                let date = reader.application_date().map_err(BacnetError::from)?;
                let time = reader.application_time().map_err(BacnetError::from)?;
                log.start_time = DateTime::new(date, time);
                log.note_enable_transition(now);
                Ok(())
            }
            PropertyIdentifier::StopTime => {
                let date = reader.application_date().map_err(BacnetError::from)?;
                let time = reader.application_time().map_err(BacnetError::from)?;
                log.stop_time = DateTime::new(date, time);
                log.note_enable_transition(now);
                Ok(())
            }
            PropertyIdentifier::LogDeviceObjectProperty => {
                let source = DeviceObjectPropertyReference::decode(access.application_data)
                    .map_err(BacnetError::from)?;
                log.source = source;
                // Retargeting invalidates everything sampled so far.
                log.purge(now);
                Ok(())
            }
            PropertyIdentifier::LogInterval => {
                let value = decode_unsigned(&mut reader)?;
                if log.logging_type == LoggingType::Triggered && value != 0 {
                    return Err(BacnetError::write_access_denied());
                }
                log.log_interval_seconds = (value / 100) as u32;
                Ok(())
            }
            PropertyIdentifier::AlignIntervals => {
                log.align_intervals = decode_boolean(&mut reader)?;
                Ok(())
            }
            PropertyIdentifier::IntervalOffset => {
                let value = decode_unsigned(&mut reader)?;
                log.interval_offset_seconds = (value / 100) as u32;
                Ok(())
            }
            PropertyIdentifier::Trigger => {
                if decode_boolean(&mut reader)? {
                    log.trigger_pending = true;
                }
                Ok(())
            }
            PropertyIdentifier::ObjectIdentifierProp
            | PropertyIdentifier::ObjectName
            | PropertyIdentifier::ObjectTypeProp
            | PropertyIdentifier::Description
            | PropertyIdentifier::LogBuffer
            | PropertyIdentifier::TotalRecordCount
            | PropertyIdentifier::EventState
            | PropertyIdentifier::StatusFlags => Err(BacnetError::write_access_denied()),
            _ => Err(BacnetError::unknown_property()),
        }
    }
}

fn decode_boolean(reader: &mut TagReader<'_>) -> PropertyResult<bool> {
    match reader.application_value() {
        Ok(ApplicationValue::Boolean(value)) => Ok(value),
        Ok(_) => Err(BacnetError::invalid_data_type()),
        Err(e) => Err(BacnetError::from(e)),
    }
}

fn decode_unsigned(reader: &mut TagReader<'_>) -> PropertyResult<u64> {
    match reader.application_value() {
        Ok(ApplicationValue::Unsigned(value)) => Ok(value),
        Ok(_) => Err(BacnetError::invalid_data_type()),
        Err(e) => Err(BacnetError::from(e)),
    }
}

fn decode_enumerated(reader: &mut TagReader<'_>) -> PropertyResult<u32> {
    match reader.application_value() {
        Ok(ApplicationValue::Enumerated(value)) => Ok(value),
        Ok(_) => Err(BacnetError::invalid_data_type()),
        Err(e) => Err(BacnetError::from(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{Date, Time};

    fn test_source() -> DeviceObjectPropertyReference {
        DeviceObjectPropertyReference {
            object: ObjectIdentifier::new(ObjectType::AnalogInput, 1),
            property: PropertyIdentifier::PresentValue,
            array_index: None,
            device: None,
        }
    }

    fn stamp(second: u8) -> DateTime {
        DateTime::new(Date::new(2024, 5, 1, 3), Time::new(12, 0, second, 0))
    }

    fn enabled_log() -> TrendLog {
        let mut log = TrendLog::new(1, "TL-1", test_source());
        log.enable = true;
        log.last_effective_enable = true;
        log
    }

    fn write_access<'a>(
        property: PropertyIdentifier,
        data: &'a [u8],
    ) -> WriteAccess<'a> {
        WriteAccess {
            object: ObjectIdentifier::new(ObjectType::TrendLog, 1),
            property,
            array_index: None,
            application_data: data,
            priority: None,
        }
    }

    #[test]
    fn test_ring_wraps_and_counts() {
        let mut log = enabled_log();
        let inserts = TL_MAX_ENTRIES as u32 + 25;
        for i in 0..inserts {
            assert!(log.record_datum(LogDatum::Real(i as f32), None, stamp((i % 60) as u8)));
        }

        assert_eq!(log.record_count(), TL_MAX_ENTRIES as u32);
        assert_eq!(log.total_record_count(), inserts);

        // Position 1 is the oldest retained logical entry.
        let oldest = log.record_at_position(1).unwrap();
        assert_eq!(
            oldest.datum,
            LogDatum::Real((inserts - TL_MAX_ENTRIES as u32) as f32)
        );
        let newest = log.record_at_position(TL_MAX_ENTRIES as u32).unwrap();
        assert_eq!(newest.datum, LogDatum::Real((inserts - 1) as f32));
        assert!(log.record_at_position(TL_MAX_ENTRIES as u32 + 1).is_none());

        // Sequence numbers follow the inserts.
        assert_eq!(log.sequence_of_position(1), inserts - TL_MAX_ENTRIES as u32 + 1);
    }

    #[test]
    fn test_purge_resets_and_leaves_notice() {
        let mut table = TrendLogTable::new();
        let mut log = enabled_log();
        for i in 0..10 {
            log.record_datum(LogDatum::Real(i as f32), None, stamp(i as u8));
        }
        table.add(log);

        let mut zero = Vec::new();
        ApplicationValue::Unsigned(0).encode(&mut zero).unwrap();
        table
            .write_property(&write_access(PropertyIdentifier::RecordCount, &zero))
            .unwrap();

        let log = table.get(1).unwrap();
        assert_eq!(log.record_count(), 1);
        let record = log.record_at_position(1).unwrap();
        match &record.datum {
            LogDatum::Status(bits) => {
                assert!(!bits.bit(LogStatus::LogDisabled as u8));
                assert!(bits.bit(LogStatus::BufferPurged as u8));
            }
            other => panic!("unexpected datum {:?}", other),
        }
    }

    #[test]
    fn test_enable_blocked_when_full_and_stop_when_full() {
        let mut table = TrendLogTable::new();
        let mut log = enabled_log();
        log.stop_when_full = true;
        for i in 0..TL_MAX_ENTRIES {
            log.insert(LogRecord {
                timestamp: stamp((i % 60) as u8),
                datum: LogDatum::Real(0.0),
                status_flags: None,
            });
        }
        log.enable = false;
        log.last_effective_enable = false;
        table.add(log);

        let mut yes = Vec::new();
        ApplicationValue::Boolean(true).encode(&mut yes).unwrap();
        assert_eq!(
            table
                .write_property(&write_access(PropertyIdentifier::Enable, &yes))
                .unwrap_err(),
            BacnetError::log_buffer_full()
        );

        // After a purge the log can be enabled again.
        let mut zero = Vec::new();
        ApplicationValue::Unsigned(0).encode(&mut zero).unwrap();
        table
            .write_property(&write_access(PropertyIdentifier::RecordCount, &zero))
            .unwrap();
        table
            .write_property(&write_access(PropertyIdentifier::Enable, &yes))
            .unwrap();
        assert!(table.get(1).unwrap().enable());
    }

    #[test]
    fn test_disable_inserts_log_status() {
        let mut table = TrendLogTable::new();
        table.add(enabled_log());

        let mut no = Vec::new();
        ApplicationValue::Boolean(false).encode(&mut no).unwrap();
        table
            .write_property(&write_access(PropertyIdentifier::Enable, &no))
            .unwrap();

        let log = table.get(1).unwrap();
        let last = log.record_at_position(log.record_count()).unwrap();
        match &last.datum {
            LogDatum::Status(bits) => assert!(bits.bit(LogStatus::LogDisabled as u8)),
            other => panic!("unexpected datum {:?}", other),
        }
    }

    #[test]
    fn test_logging_type_rules() {
        let mut table = TrendLogTable::new();
        table.add(enabled_log());

        // COV is not supported.
        let mut cov = Vec::new();
        ApplicationValue::Enumerated(1).encode(&mut cov).unwrap();
        let error = table
            .write_property(&write_access(PropertyIdentifier::LoggingType, &cov))
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::OptionalFunctionalityNotSupported);

        // Triggered forces the interval to zero.
        let mut triggered = Vec::new();
        ApplicationValue::Enumerated(2).encode(&mut triggered).unwrap();
        table
            .write_property(&write_access(PropertyIdentifier::LoggingType, &triggered))
            .unwrap();
        assert_eq!(table.get(1).unwrap().log_interval_seconds(), 0);

        // Back to polled with a zero interval picks the 900 s default.
        let mut polled = Vec::new();
        ApplicationValue::Enumerated(0).encode(&mut polled).unwrap();
        table
            .write_property(&write_access(PropertyIdentifier::LoggingType, &polled))
            .unwrap();
        assert_eq!(table.get(1).unwrap().log_interval_seconds(), 900);
    }

    #[test]
    fn test_retarget_purges() {
        let mut table = TrendLogTable::new();
        let mut log = enabled_log();
        for i in 0..5 {
            log.record_datum(LogDatum::Real(i as f32), None, stamp(i as u8));
        }
        table.add(log);

        let mut reference = Vec::new();
        DeviceObjectPropertyReference {
            object: ObjectIdentifier::new(ObjectType::AnalogValue, 9),
            property: PropertyIdentifier::PresentValue,
            array_index: None,
            device: None,
        }
        .encode(&mut reference)
        .unwrap();
        table
            .write_property(&write_access(
                PropertyIdentifier::LogDeviceObjectProperty,
                &reference,
            ))
            .unwrap();

        let log = table.get(1).unwrap();
        assert_eq!(log.source().object.instance, 9);
        assert_eq!(log.record_count(), 1);
        match &log.record_at_position(1).unwrap().datum {
            LogDatum::Status(bits) => assert!(bits.bit(LogStatus::BufferPurged as u8)),
            other => panic!("unexpected datum {:?}", other),
        }
    }

    #[test]
    fn test_schedule_gates_effective_enable() {
        let mut log = enabled_log();
        log.start_time = stamp(10);
        log.stop_time = stamp(20);

        assert!(!log.effective_enable(&stamp(5)));
        assert!(log.effective_enable(&stamp(10)));
        assert!(log.effective_enable(&stamp(15)));
        assert!(log.effective_enable(&stamp(20)));
        assert!(!log.effective_enable(&stamp(25)));

        // Wildcard boundaries are open-ended.
        log.stop_time = DateTime::WILDCARD;
        assert!(log.effective_enable(&stamp(25)));
    }

    #[test]
    fn test_read_range_by_position() {
        let mut table = TrendLogTable::new();
        let mut log = enabled_log();
        for i in 0..10 {
            log.record_datum(LogDatum::Real(i as f32), None, stamp(i as u8));
        }
        table.add(log);

        let readout = table
            .read_range(
                1,
                &ReadRangeSpec::ByPosition {
                    reference_index: 1,
                    count: 4,
                },
                1024,
            )
            .unwrap();
        assert_eq!(readout.item_count, 4);
        assert!(readout.first_item);
        assert!(!readout.last_item);
        assert!(!readout.more_items);

        // Negative count works backwards from the reference.
        let readout = table
            .read_range(
                1,
                &ReadRangeSpec::ByPosition {
                    reference_index: 10,
                    count: -3,
                },
                1024,
            )
            .unwrap();
        assert_eq!(readout.item_count, 3);
        assert!(readout.last_item);
    }

    #[test]
    fn test_read_range_by_sequence() {
        let mut table = TrendLogTable::new();
        let mut log = enabled_log();
        let inserts = TL_MAX_ENTRIES as u32 + 10;
        for i in 0..inserts {
            log.record_datum(LogDatum::Unsigned(i as u64), None, stamp((i % 60) as u8));
        }
        table.add(log);

        // Oldest retained sequence number.
        let first_seq = inserts - TL_MAX_ENTRIES as u32 + 1;
        let readout = table
            .read_range(
                1,
                &ReadRangeSpec::BySequence {
                    reference_sequence: first_seq,
                    count: 2,
                },
                1024,
            )
            .unwrap();
        assert_eq!(readout.item_count, 2);
        assert_eq!(readout.first_sequence_number, Some(first_seq));
        assert!(readout.first_item);
    }

    #[test]
    fn test_read_range_apdu_budget() {
        let mut table = TrendLogTable::new();
        let mut log = enabled_log();
        for i in 0..50 {
            log.record_datum(LogDatum::Real(i as f32), None, stamp((i % 60) as u8));
        }
        table.add(log);

        let readout = table
            .read_range(1, &ReadRangeSpec::ReadAll, 5 * TL_MAX_ENCODED_RECORD)
            .unwrap();
        assert!(readout.item_count <= 5);
        assert!(readout.more_items);
        assert!(!readout.last_item);
    }

    #[test]
    fn test_read_range_by_time_unsupported() {
        let mut table = TrendLogTable::new();
        table.add(enabled_log());
        let error = table
            .read_range(
                1,
                &ReadRangeSpec::ByTime {
                    reference_time: stamp(0),
                    count: 5,
                },
                1024,
            )
            .unwrap_err();
        assert_eq!(error, BacnetError::services_other());
    }

    #[test]
    fn test_log_record_encoding_shape() {
        let record = LogRecord {
            timestamp: stamp(30),
            datum: LogDatum::Real(21.5),
            status_flags: Some(StatusFlags::empty()),
        };
        let mut buffer = Vec::new();
        record.encode(&mut buffer).unwrap();

        let (timestamp, used) = crate::encoding::decode_context_date_time(&buffer, 0).unwrap();
        assert_eq!(timestamp, stamp(30));

        let mut reader = TagReader::new(&buffer[used..]);
        reader.open(1).unwrap();
        let (value, datum_used) =
            crate::encoding::decode_context_real(&buffer[used + 1..], 2).unwrap();
        assert_eq!(value, 21.5);

        // Closing [1], then the [2] status-flags bit string.
        let tail = &buffer[used + 1 + datum_used..];
        assert!(crate::encoding::is_closing_tag_number(tail, 1));
        let (flags, _) = crate::encoding::decode_context_bit_string(&tail[1..], 2).unwrap();
        assert_eq!(flags.bits_used(), 4);
    }
}
