//! WriteGroup Request
//!
//! WriteGroup-Request ::= SEQUENCE {
//!   group-number   [0] Unsigned32 (1..4294967295),
//!   write-priority [1] Unsigned (1..16),
//!   change-list    [2] SEQUENCE OF BACnetGroupChannelValue,
//!   inhibit-delay  [3] BOOLEAN OPTIONAL
//! }
//!
//! Each change-list element carries its channel in `[0]`, an optional
//! overriding priority in `[1]` (omitted when zero), and the value inside a
//! `[2]` constructed tag.
//!
//! The change list can be long and controllers rarely need it materialized,
//! so the decoder is streaming: [`WriteGroupRequest::decode_streaming`]
//! invokes a callback once per element and allocates nothing per element
//! beyond the decoded value itself.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::app::ApduType;
use crate::encoding::{
    encode_closing_tag, encode_context_boolean, encode_context_unsigned, encode_opening_tag,
    ApplicationValue, TagReader,
};
use crate::service::{Result, ServiceError, UnconfirmedServiceChoice};
use crate::util::is_valid_priority;

/// Tri-state inhibit-delay field; `NotSpecified` omits the field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InhibitDelay {
    #[default]
    NotSpecified,
    Inhibit,
    Allow,
}

/// One element of the change list
#[derive(Debug, Clone, PartialEq)]
pub struct GroupChannelValue {
    /// Channel number 0..=65535
    pub channel: u16,
    /// Overriding priority 1..=16; omitted on the wire when absent
    pub overriding_priority: Option<u8>,
    pub value: ApplicationValue,
}

/// WriteGroup-Request
#[derive(Debug, Clone, PartialEq)]
pub struct WriteGroupRequest {
    /// Control group 1..=4294967295; zero is reserved and never sent
    pub group_number: u32,
    pub write_priority: u8,
    pub change_list: Vec<GroupChannelValue>,
    pub inhibit_delay: InhibitDelay,
}

impl WriteGroupRequest {
    pub fn new(group_number: u32, write_priority: u8) -> Self {
        Self {
            group_number,
            write_priority,
            change_list: Vec::new(),
            inhibit_delay: InhibitDelay::NotSpecified,
        }
    }

    pub fn add_change(mut self, change: GroupChannelValue) -> Self {
        self.change_list.push(change);
        self
    }

    pub fn with_inhibit_delay(mut self, inhibit_delay: InhibitDelay) -> Self {
        self.inhibit_delay = inhibit_delay;
        self
    }

    /// Encode the service body (without the APDU header)
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        if self.group_number == 0 {
            return Err(ServiceError::ValueOutOfRange("group-number"));
        }
        if !is_valid_priority(self.write_priority) {
            return Err(ServiceError::ValueOutOfRange("write-priority"));
        }

        encode_context_unsigned(buffer, 0, self.group_number as u64)?;
        encode_context_unsigned(buffer, 1, self.write_priority as u64)?;

        encode_opening_tag(buffer, 2)?;
        for change in &self.change_list {
            encode_context_unsigned(buffer, 0, change.channel as u64)?;
            if let Some(priority) = change.overriding_priority {
                if !is_valid_priority(priority) {
                    return Err(ServiceError::ValueOutOfRange("overriding-priority"));
                }
                encode_context_unsigned(buffer, 1, priority as u64)?;
            }
            encode_opening_tag(buffer, 2)?;
            change.value.encode(buffer)?;
            encode_closing_tag(buffer, 2)?;
        }
        encode_closing_tag(buffer, 2)?;

        match self.inhibit_delay {
            InhibitDelay::Inhibit => encode_context_boolean(buffer, 3, true)?,
            InhibitDelay::Allow => encode_context_boolean(buffer, 3, false)?,
            InhibitDelay::NotSpecified => {}
        }
        Ok(())
    }

    /// Encode the full unconfirmed APDU
    pub fn encode_apdu(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(32);
        buffer.push((ApduType::UnconfirmedRequest as u8) << 4);
        buffer.push(UnconfirmedServiceChoice::WriteGroup as u8);
        self.encode(&mut buffer)?;
        Ok(buffer)
    }

    /// Decode the service body, invoking `on_change` once per change-list
    /// element. Returns the request with an empty change list.
    pub fn decode_streaming<F>(data: &[u8], mut on_change: F) -> Result<Self>
    where
        F: FnMut(&GroupChannelValue) -> Result<()>,
    {
        let mut reader = TagReader::new(data);

        let group_number = reader.context_unsigned(0)?;
        if group_number == 0 || group_number > u32::MAX as u64 {
            return Err(ServiceError::ValueOutOfRange("group-number"));
        }
        let write_priority = reader.context_unsigned(1)?;
        if !is_valid_priority(write_priority.min(255) as u8) {
            return Err(ServiceError::ValueOutOfRange("write-priority"));
        }

        reader.open(2)?;
        while !reader.at_closing(2) {
            let channel = reader.context_unsigned(0)?;
            if channel > u16::MAX as u64 {
                return Err(ServiceError::ValueOutOfRange("channel"));
            }
            let overriding_priority = if reader.at_context(1) {
                let priority = reader.context_unsigned(1)?;
                if !is_valid_priority(priority.min(255) as u8) {
                    return Err(ServiceError::ValueOutOfRange("overriding-priority"));
                }
                Some(priority as u8)
            } else {
                None
            };
            reader.open(2)?;
            let value = reader.application_value()?;
            reader.close(2)?;

            on_change(&GroupChannelValue {
                channel: channel as u16,
                overriding_priority,
                value,
            })?;
        }
        reader.close(2)?;

        let inhibit_delay = if reader.at_context(3) {
            if reader.context_boolean(3)? {
                InhibitDelay::Inhibit
            } else {
                InhibitDelay::Allow
            }
        } else {
            InhibitDelay::NotSpecified
        };

        if reader.has_data() {
            return Err(ServiceError::UnexpectedField("write-group-request"));
        }

        Ok(Self {
            group_number: group_number as u32,
            write_priority: write_priority as u8,
            change_list: Vec::new(),
            inhibit_delay,
        })
    }

    /// Decode the service body with the change list materialized
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut changes = Vec::new();
        let mut request = Self::decode_streaming(data, |change| {
            changes.push(change.clone());
            Ok(())
        })?;
        request.change_list = changes;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_form() {
        // group 1, priority 2, inhibit, changes: channel 3 Real(100.0),
        // channel 4 Null.
        let request = WriteGroupRequest::new(1, 2)
            .add_change(GroupChannelValue {
                channel: 3,
                overriding_priority: None,
                value: ApplicationValue::Real(100.0),
            })
            .add_change(GroupChannelValue {
                channel: 4,
                overriding_priority: None,
                value: ApplicationValue::Null,
            })
            .with_inhibit_delay(InhibitDelay::Inhibit);

        let apdu = request.encode_apdu().unwrap();
        assert_eq!(
            apdu,
            [
                0x10, 0x0A, 0x09, 0x01, 0x19, 0x02, 0x2E, 0x09, 0x03, 0x2E, 0x44, 0x42, 0xC8,
                0x00, 0x00, 0x2F, 0x09, 0x04, 0x2E, 0x00, 0x2F, 0x2F, 0x39, 0x01
            ]
        );
    }

    #[test]
    fn test_streaming_decode_counts_elements() {
        let request = WriteGroupRequest::new(7, 16)
            .add_change(GroupChannelValue {
                channel: 1,
                overriding_priority: Some(3),
                value: ApplicationValue::Unsigned(42),
            })
            .add_change(GroupChannelValue {
                channel: 2,
                overriding_priority: None,
                value: ApplicationValue::Enumerated(1),
            });
        let mut body = Vec::new();
        request.encode(&mut body).unwrap();

        let mut seen = Vec::new();
        let header = WriteGroupRequest::decode_streaming(&body, |change| {
            seen.push(change.clone());
            Ok(())
        })
        .unwrap();

        assert_eq!(header.group_number, 7);
        assert_eq!(header.write_priority, 16);
        assert_eq!(header.inhibit_delay, InhibitDelay::NotSpecified);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].overriding_priority, Some(3));
        assert_eq!(seen[1].value, ApplicationValue::Enumerated(1));
    }

    #[test]
    fn test_full_decode_round_trip() {
        let request = WriteGroupRequest::new(0xFFFF_FFFF, 1)
            .add_change(GroupChannelValue {
                channel: 65535,
                overriding_priority: Some(16),
                value: ApplicationValue::Signed(-5),
            })
            .with_inhibit_delay(InhibitDelay::Allow);
        let mut body = Vec::new();
        request.encode(&mut body).unwrap();
        assert_eq!(WriteGroupRequest::decode(&body).unwrap(), request);
    }

    #[test]
    fn test_group_number_zero_reserved() {
        let mut body = Vec::new();
        assert_eq!(
            WriteGroupRequest::new(0, 1).encode(&mut body).unwrap_err(),
            ServiceError::ValueOutOfRange("group-number")
        );

        // A received group number of zero is equally invalid.
        let mut encoded = Vec::new();
        encode_context_unsigned(&mut encoded, 0, 0).unwrap();
        encode_context_unsigned(&mut encoded, 1, 1).unwrap();
        encode_opening_tag(&mut encoded, 2).unwrap();
        encode_closing_tag(&mut encoded, 2).unwrap();
        assert!(WriteGroupRequest::decode(&encoded).is_err());
    }

    #[test]
    fn test_callback_error_stops_decode() {
        let request = WriteGroupRequest::new(1, 1)
            .add_change(GroupChannelValue {
                channel: 1,
                overriding_priority: None,
                value: ApplicationValue::Null,
            })
            .add_change(GroupChannelValue {
                channel: 2,
                overriding_priority: None,
                value: ApplicationValue::Null,
            });
        let mut body = Vec::new();
        request.encode(&mut body).unwrap();

        let mut calls = 0;
        let result = WriteGroupRequest::decode_streaming(&body, |_| {
            calls += 1;
            Err(ServiceError::ValueOutOfRange("channel"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
