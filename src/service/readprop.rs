//! ReadProperty Request and Ack
//!
//! The request names an object, a property, and an optional array index;
//! the ack echoes all three and carries the property value inside a `[3]`
//! constructed tag. The ack decoder borrows the value octets rather than
//! decoding them, so callers pick the interpretation (or stream them on).

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::encoding::{
    encode_closing_tag, encode_context_object_id, encode_context_unsigned, encode_opening_tag,
    TagReader,
};
use crate::object::{ObjectIdentifier, PropertyIdentifier};
use crate::service::{Result, ServiceError};

/// BACnet "all elements" array index; on the wire it is simply absent
pub const ARRAY_INDEX_ALL: Option<u32> = None;

/// ReadProperty-Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPropertyRequest {
    pub object_identifier: ObjectIdentifier,
    pub property_identifier: PropertyIdentifier,
    pub array_index: Option<u32>,
}

impl ReadPropertyRequest {
    pub fn new(object_identifier: ObjectIdentifier, property_identifier: PropertyIdentifier) -> Self {
        Self {
            object_identifier,
            property_identifier,
            array_index: None,
        }
    }

    pub fn with_array_index(mut self, array_index: u32) -> Self {
        self.array_index = Some(array_index);
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
        Ok(())
    }

    /// Decode the service body
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = TagReader::new(data);
        let (object_type, instance) = reader.context_object_id(0)?;
        let property = reader.context_unsigned(1)?;
        if property > 0x3FFFFF {
            return Err(ServiceError::ValueOutOfRange("property-identifier"));
        }
        let array_index = if reader.at_context(2) {
            Some(reader.context_unsigned(2)? as u32)
        } else {
            None
        };
        if reader.has_data() {
            return Err(ServiceError::UnexpectedField("read-property-request"));
        }
        Ok(Self {
            object_identifier: ObjectIdentifier::from_raw(object_type, instance),
            property_identifier: PropertyIdentifier::from(property as u32),
            array_index,
        })
    }
}

/// ReadProperty-Ack with the value octets borrowed from the input buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPropertyAck<'a> {
    pub object_identifier: ObjectIdentifier,
    pub property_identifier: PropertyIdentifier,
    pub array_index: Option<u32>,
    /// Application-encoded property value(s), the content of `[3]`
    pub value: &'a [u8],
}

impl<'a> ReadPropertyAck<'a> {
    /// Encode a service-ack body from already-encoded value octets
    pub fn encode(
        buffer: &mut Vec<u8>,
        object_identifier: ObjectIdentifier,
        property_identifier: PropertyIdentifier,
        array_index: Option<u32>,
        value: &[u8],
    ) -> Result<()> {
        encode_context_object_id(
            buffer,
            0,
            object_identifier.object_type.into(),
            object_identifier.instance,
        )?;
        encode_context_unsigned(buffer, 1, u32::from(property_identifier) as u64)?;
        if let Some(index) = array_index {
            encode_context_unsigned(buffer, 2, index as u64)?;
        }
        encode_opening_tag(buffer, 3)?;
        buffer.extend_from_slice(value);
        encode_closing_tag(buffer, 3)?;
        Ok(())
    }

    /// Decode a service-ack body, borrowing the `[3]` content
    pub fn decode(data: &'a [u8]) -> Result<Self> {
        let mut reader = TagReader::new(data);
        let (object_type, instance) = reader.context_object_id(0)?;
        let property = reader.context_unsigned(1)?;
        let array_index = if reader.at_context(2) {
            Some(reader.context_unsigned(2)? as u32)
        } else {
            None
        };
        let value = reader.constructed_slice(3)?;
        Ok(Self {
            object_identifier: ObjectIdentifier::from_raw(object_type, instance),
            property_identifier: PropertyIdentifier::from(property as u32),
            array_index,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::ApplicationValue;
    use crate::object::ObjectType;

    #[test]
    fn test_request_wire_form() {
        // ReadProperty analog-input 101 present-value, whole property.
        let request = ReadPropertyRequest::new(
            ObjectIdentifier::new(ObjectType::AnalogInput, 101),
            PropertyIdentifier::PresentValue,
        );
        let mut body = Vec::new();
        request.encode(&mut body).unwrap();
        assert_eq!(body, [0x0C, 0x00, 0x00, 0x00, 0x65, 0x19, 0x55]);

        let decoded = ReadPropertyRequest::decode(&body).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.array_index, ARRAY_INDEX_ALL);
    }

    #[test]
    fn test_request_with_array_index() {
        let request = ReadPropertyRequest::new(
            ObjectIdentifier::new(ObjectType::Device, 1),
            PropertyIdentifier::ObjectList,
        )
        .with_array_index(0);
        let mut body = Vec::new();
        request.encode(&mut body).unwrap();
        let decoded = ReadPropertyRequest::decode(&body).unwrap();
        assert_eq!(decoded.array_index, Some(0));
    }

    #[test]
    fn test_request_rejects_trailing_data() {
        let mut body = Vec::new();
        ReadPropertyRequest::new(
            ObjectIdentifier::new(ObjectType::AnalogInput, 1),
            PropertyIdentifier::PresentValue,
        )
        .encode(&mut body)
        .unwrap();
        body.push(0x00);
        assert!(ReadPropertyRequest::decode(&body).is_err());
    }

    #[test]
    fn test_ack_round_trip() {
        // Ack body for analog-input 101 present-value = Real(50.0), as it
        // appears after the ComplexAck header `30 01 0C`.
        let body = [
            0x0C, 0x00, 0x00, 0x00, 0x65, 0x19, 0x55, 0x3E, 0x44, 0x42, 0x48, 0x00, 0x00, 0x3F,
        ];
        let ack = ReadPropertyAck::decode(&body).unwrap();
        assert_eq!(ack.object_identifier.object_type, ObjectType::AnalogInput);
        assert_eq!(ack.object_identifier.instance, 101);
        assert_eq!(ack.property_identifier, PropertyIdentifier::PresentValue);
        assert_eq!(ack.value, [0x44, 0x42, 0x48, 0x00, 0x00]);

        let (value, _) = ApplicationValue::decode(ack.value).unwrap();
        assert_eq!(value, ApplicationValue::Real(50.0));

        let mut encoded = Vec::new();
        ReadPropertyAck::encode(
            &mut encoded,
            ack.object_identifier,
            ack.property_identifier,
            ack.array_index,
            ack.value,
        )
        .unwrap();
        assert_eq!(encoded, body);
    }
}
