//! ReadRange Request and Ack
//!
//! ReadRange reads a slice of a list-valued property, most prominently the
//! trend-log buffer. The range is selected by position, by sequence number,
//! or by time; omitting the range reads as much of the whole list as fits.
//! The ack carries result flags (first-item, last-item, more-items), the
//! item count, and the items inside `[5]`.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::encoding::{
    encode_application_signed, encode_application_unsigned, encode_closing_tag,
    encode_context_bit_string, encode_context_object_id, encode_context_unsigned,
    encode_opening_tag, BitString, DateTime, TagReader,
};
use crate::object::{ObjectIdentifier, PropertyIdentifier};
use crate::service::{Result, ServiceError};

/// Bit positions inside the ack's result-flags bit string
pub const RESULT_FLAG_FIRST_ITEM: u8 = 0;
pub const RESULT_FLAG_LAST_ITEM: u8 = 1;
pub const RESULT_FLAG_MORE_ITEMS: u8 = 2;

/// Range selector of a ReadRange request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadRangeSpec {
    /// No range: return from the start of the list
    ReadAll,
    /// `[3]` by 1-based position
    ByPosition { reference_index: u32, count: i32 },
    /// `[6]` by sequence number
    BySequence { reference_sequence: u32, count: i32 },
    /// `[7]` by timestamp
    ByTime { reference_time: DateTime, count: i32 },
}

/// ReadRange-Request
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRangeRequest {
    pub object_identifier: ObjectIdentifier,
    pub property_identifier: PropertyIdentifier,
    pub array_index: Option<u32>,
    pub range: ReadRangeSpec,
}

impl ReadRangeRequest {
    pub fn new(object_identifier: ObjectIdentifier, property_identifier: PropertyIdentifier) -> Self {
        Self {
            object_identifier,
            property_identifier,
            array_index: None,
            range: ReadRangeSpec::ReadAll,
        }
    }

    pub fn by_position(mut self, reference_index: u32, count: i32) -> Self {
        self.range = ReadRangeSpec::ByPosition {
            reference_index,
            count,
        };
        self
    }

    pub fn by_sequence(mut self, reference_sequence: u32, count: i32) -> Self {
        self.range = ReadRangeSpec::BySequence {
            reference_sequence,
            count,
        };
        self
    }

    pub fn by_time(mut self, reference_time: DateTime, count: i32) -> Self {
        self.range = ReadRangeSpec::ByTime {
            reference_time,
            count,
        };
        self
    }

    /// Encode the service body (without the APDU header)
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        encode_context_object_id(
            buffer,
            0,
            self.object_identifier.object_type.into(),
            self.object_identifier.instance,
        )?;
        encode_context_unsigned(buffer, 1, u32::from(self.property_identifier) as u64)?;
        if let Some(index) = self.array_index {
            encode_context_unsigned(buffer, 2, index as u64)?;
        }
        match &self.range {
            ReadRangeSpec::ReadAll => {}
            ReadRangeSpec::ByPosition {
                reference_index,
                count,
            } => {
                if *count == 0 {
                    return Err(ServiceError::ValueOutOfRange("count"));
                }
                encode_opening_tag(buffer, 3)?;
                encode_application_unsigned(buffer, *reference_index as u64)?;
                encode_application_signed(buffer, *count as i64)?;
                encode_closing_tag(buffer, 3)?;
            }
            ReadRangeSpec::BySequence {
                reference_sequence,
                count,
            } => {
                if *count == 0 {
                    return Err(ServiceError::ValueOutOfRange("count"));
                }
                encode_opening_tag(buffer, 6)?;
                encode_application_unsigned(buffer, *reference_sequence as u64)?;
                encode_application_signed(buffer, *count as i64)?;
                encode_closing_tag(buffer, 6)?;
            }
            ReadRangeSpec::ByTime {
                reference_time,
                count,
            } => {
                if *count == 0 {
                    return Err(ServiceError::ValueOutOfRange("count"));
                }
                encode_opening_tag(buffer, 7)?;
                crate::encoding::encode_application_date(buffer, &reference_time.date)?;
                crate::encoding::encode_application_time(buffer, &reference_time.time)?;
                encode_application_signed(buffer, *count as i64)?;
                encode_closing_tag(buffer, 7)?;
            }
        }
        Ok(())
    }

    /// Decode the service body
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = TagReader::new(data);
        let (object_type, instance) = reader.context_object_id(0)?;
        let property = reader.context_unsigned(1)?;
        let array_index = if reader.at_context(2) {
            Some(reader.context_unsigned(2)? as u32)
        } else {
            None
        };

        let range = if reader.at_opening(3) {
            reader.open(3)?;
            let reference_index = reader.application_unsigned()?;
            let count = Self::decode_count(&mut reader)?;
            reader.close(3)?;
            ReadRangeSpec::ByPosition {
                reference_index: reference_index as u32,
                count,
            }
        } else if reader.at_opening(6) {
            reader.open(6)?;
            let reference_sequence = reader.application_unsigned()?;
            let count = Self::decode_count(&mut reader)?;
            reader.close(6)?;
            ReadRangeSpec::BySequence {
                reference_sequence: reference_sequence as u32,
                count,
            }
        } else if reader.at_opening(7) {
            reader.open(7)?;
            let date = reader.application_date()?;
            let time = reader.application_time()?;
            let count = Self::decode_count(&mut reader)?;
            reader.close(7)?;
            ReadRangeSpec::ByTime {
                reference_time: DateTime::new(date, time),
                count,
            }
        } else {
            ReadRangeSpec::ReadAll
        };

        if reader.has_data() {
            return Err(ServiceError::UnexpectedField("read-range-request"));
        }

        Ok(Self {
            object_identifier: ObjectIdentifier::from_raw(object_type, instance),
            property_identifier: PropertyIdentifier::from(property as u32),
            array_index,
            range,
        })
    }

    fn decode_count(reader: &mut TagReader<'_>) -> Result<i32> {
        match reader.application_value()? {
            crate::encoding::ApplicationValue::Signed(count)
                if count != 0 && (i32::MIN as i64..=i32::MAX as i64).contains(&count) =>
            {
                Ok(count as i32)
            }
            _ => Err(ServiceError::ValueOutOfRange("count")),
        }
    }
}

/// ReadRange-Ack
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRangeAck {
    pub object_identifier: ObjectIdentifier,
    pub property_identifier: PropertyIdentifier,
    pub array_index: Option<u32>,
    /// first-item / last-item / more-items
    pub result_flags: BitString,
    pub item_count: u32,
    /// Encoded items, the content of `[5]`
    pub item_data: Vec<u8>,
    /// Sequence number of the first item, for by-sequence continuation
    pub first_sequence_number: Option<u32>,
}

impl ReadRangeAck {
    /// Build the result-flags bit string
    pub fn result_flags(first: bool, last: bool, more: bool) -> BitString {
        let mut flags = BitString::new();
        let _ = flags.set_bit(RESULT_FLAG_FIRST_ITEM, first);
        let _ = flags.set_bit(RESULT_FLAG_LAST_ITEM, last);
        let _ = flags.set_bit(RESULT_FLAG_MORE_ITEMS, more);
        flags
    }

    /// Encode the service-ack body
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        encode_context_object_id(
            buffer,
            0,
            self.object_identifier.object_type.into(),
            self.object_identifier.instance,
        )?;
        encode_context_unsigned(buffer, 1, u32::from(self.property_identifier) as u64)?;
        if let Some(index) = self.array_index {
            encode_context_unsigned(buffer, 2, index as u64)?;
        }
        encode_context_bit_string(buffer, 3, &self.result_flags)?;
        encode_context_unsigned(buffer, 4, self.item_count as u64)?;
        encode_opening_tag(buffer, 5)?;
        buffer.extend_from_slice(&self.item_data);
        encode_closing_tag(buffer, 5)?;
        if let Some(sequence) = self.first_sequence_number {
            encode_context_unsigned(buffer, 6, sequence as u64)?;
        }
        Ok(())
    }

    /// Decode a service-ack body
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = TagReader::new(data);
        let (object_type, instance) = reader.context_object_id(0)?;
        let property = reader.context_unsigned(1)?;
        let array_index = if reader.at_context(2) {
            Some(reader.context_unsigned(2)? as u32)
        } else {
            None
        };
        let (result_flags, _) =
            crate::encoding::decode_context_bit_string(&data[reader.position()..], 3)?;
        reader.skip_value()?;
        let item_count = reader.context_unsigned(4)?;
        let item_data = reader.constructed_slice(5)?.to_vec();
        let first_sequence_number = if reader.at_context(6) {
            Some(reader.context_unsigned(6)? as u32)
        } else {
            None
        };

        Ok(Self {
            object_identifier: ObjectIdentifier::from_raw(object_type, instance),
            property_identifier: PropertyIdentifier::from(property as u32),
            array_index,
            result_flags,
            item_count: item_count as u32,
            item_data,
            first_sequence_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{Date, Time};
    use crate::object::ObjectType;

    fn log_object() -> ObjectIdentifier {
        ObjectIdentifier::new(ObjectType::TrendLog, 1)
    }

    #[test]
    fn test_by_position_round_trip() {
        let request = ReadRangeRequest::new(log_object(), PropertyIdentifier::LogBuffer)
            .by_position(1, 10);
        let mut body = Vec::new();
        request.encode(&mut body).unwrap();
        assert_eq!(ReadRangeRequest::decode(&body).unwrap(), request);
    }

    #[test]
    fn test_by_sequence_negative_count() {
        let request = ReadRangeRequest::new(log_object(), PropertyIdentifier::LogBuffer)
            .by_sequence(500, -20);
        let mut body = Vec::new();
        request.encode(&mut body).unwrap();
        let decoded = ReadRangeRequest::decode(&body).unwrap();
        assert_eq!(
            decoded.range,
            ReadRangeSpec::BySequence {
                reference_sequence: 500,
                count: -20
            }
        );
    }

    #[test]
    fn test_by_time_round_trip() {
        let reference = DateTime::new(Date::new(2024, 6, 1, 6), Time::new(12, 0, 0, 0));
        let request = ReadRangeRequest::new(log_object(), PropertyIdentifier::LogBuffer)
            .by_time(reference, 5);
        let mut body = Vec::new();
        request.encode(&mut body).unwrap();
        assert_eq!(ReadRangeRequest::decode(&body).unwrap(), request);
    }

    #[test]
    fn test_read_all_form() {
        let request = ReadRangeRequest::new(log_object(), PropertyIdentifier::LogBuffer);
        let mut body = Vec::new();
        request.encode(&mut body).unwrap();
        let decoded = ReadRangeRequest::decode(&body).unwrap();
        assert_eq!(decoded.range, ReadRangeSpec::ReadAll);
    }

    #[test]
    fn test_zero_count_rejected() {
        let request = ReadRangeRequest::new(log_object(), PropertyIdentifier::LogBuffer)
            .by_position(1, 0);
        let mut body = Vec::new();
        assert!(request.encode(&mut body).is_err());
    }

    #[test]
    fn test_ack_round_trip() {
        let ack = ReadRangeAck {
            object_identifier: log_object(),
            property_identifier: PropertyIdentifier::LogBuffer,
            array_index: None,
            result_flags: ReadRangeAck::result_flags(true, false, true),
            item_count: 2,
            item_data: vec![0x21, 0x01, 0x21, 0x02],
            first_sequence_number: Some(77),
        };
        let mut body = Vec::new();
        ack.encode(&mut body).unwrap();
        let decoded = ReadRangeAck::decode(&body).unwrap();
        assert_eq!(decoded, ack);
        assert!(decoded.result_flags.bit(RESULT_FLAG_FIRST_ITEM));
        assert!(!decoded.result_flags.bit(RESULT_FLAG_LAST_ITEM));
        assert!(decoded.result_flags.bit(RESULT_FLAG_MORE_ITEMS));
    }
}
