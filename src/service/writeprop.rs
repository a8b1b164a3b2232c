//! WriteProperty Request
//!
//! Same shape as the ReadProperty ack — object, property, optional array
//! index, value inside `[3]` — plus an optional `[4]` write priority in the
//! commandable range 1..=16.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::encoding::{
    encode_closing_tag, encode_context_object_id, encode_context_unsigned, encode_opening_tag,
    ApplicationValue, TagReader,
};
use crate::object::{ObjectIdentifier, PropertyIdentifier};
use crate::service::{Result, ServiceError};
use crate::util::is_valid_priority;

/// WriteProperty-Request
#[derive(Debug, Clone, PartialEq)]
pub struct WritePropertyRequest {
    pub object_identifier: ObjectIdentifier,
    pub property_identifier: PropertyIdentifier,
    pub array_index: Option<u32>,
    /// Application-encoded value octets (the content of `[3]`)
    pub value: Vec<u8>,
    /// Commandable-property priority 1..=16
    pub priority: Option<u8>,
}

impl WritePropertyRequest {
    pub fn new(
        object_identifier: ObjectIdentifier,
        property_identifier: PropertyIdentifier,
        value: &ApplicationValue,
    ) -> Result<Self> {
        let mut encoded = Vec::new();
        value.encode(&mut encoded)?;
        Ok(Self {
            object_identifier,
            property_identifier,
            array_index: None,
            value: encoded,
            priority: None,
        })
    }

    pub fn with_array_index(mut self, array_index: u32) -> Self {
        self.array_index = Some(array_index);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Encode the service body (without the APDU header)
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        if let Some(priority) = self.priority {
            if !is_valid_priority(priority) {
                return Err(ServiceError::ValueOutOfRange("priority"));
            }
        }
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
        encode_opening_tag(buffer, 3)?;
        buffer.extend_from_slice(&self.value);
        encode_closing_tag(buffer, 3)?;
        if let Some(priority) = self.priority {
            encode_context_unsigned(buffer, 4, priority as u64)?;
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
        let value = reader.constructed_slice(3)?.to_vec();
        if value.is_empty() {
            return Err(ServiceError::MissingParameter("property-value"));
        }
        let priority = if reader.at_context(4) {
            let priority = reader.context_unsigned(4)?;
            if !is_valid_priority(priority as u8) || priority > u8::MAX as u64 {
                return Err(ServiceError::ValueOutOfRange("priority"));
            }
            Some(priority as u8)
        } else {
            None
        };
        if reader.has_data() {
            return Err(ServiceError::UnexpectedField("write-property-request"));
        }
        Ok(Self {
            object_identifier: ObjectIdentifier::from_raw(object_type, instance),
            property_identifier: PropertyIdentifier::from(property as u32),
            array_index,
            value,
            priority,
        })
    }

    /// Decode the first application value from the `[3]` content
    pub fn decoded_value(&self) -> Result<ApplicationValue> {
        let (value, _) = ApplicationValue::decode(&self.value)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectType;

    #[test]
    fn test_round_trip_with_priority() {
        let request = WritePropertyRequest::new(
            ObjectIdentifier::new(ObjectType::AnalogValue, 7),
            PropertyIdentifier::PresentValue,
            &ApplicationValue::Real(72.5),
        )
        .unwrap()
        .with_priority(8);

        let mut body = Vec::new();
        request.encode(&mut body).unwrap();
        let decoded = WritePropertyRequest::decode(&body).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.priority, Some(8));
        assert_eq!(decoded.decoded_value().unwrap(), ApplicationValue::Real(72.5));
    }

    #[test]
    fn test_priority_range_enforced() {
        let request = WritePropertyRequest::new(
            ObjectIdentifier::new(ObjectType::AnalogValue, 7),
            PropertyIdentifier::PresentValue,
            &ApplicationValue::Real(1.0),
        )
        .unwrap()
        .with_priority(17);
        let mut body = Vec::new();
        assert_eq!(
            request.encode(&mut body).unwrap_err(),
            ServiceError::ValueOutOfRange("priority")
        );
    }

    #[test]
    fn test_missing_value_rejected() {
        let mut body = Vec::new();
        encode_context_object_id(&mut body, 0, 2, 7).unwrap();
        encode_context_unsigned(&mut body, 1, 85).unwrap();
        encode_opening_tag(&mut body, 3).unwrap();
        encode_closing_tag(&mut body, 3).unwrap();
        assert_eq!(
            WritePropertyRequest::decode(&body).unwrap_err(),
            ServiceError::MissingParameter("property-value")
        );
    }

    #[test]
    fn test_null_value_write() {
        // Relinquishing a priority slot writes Null.
        let request = WritePropertyRequest::new(
            ObjectIdentifier::new(ObjectType::AnalogValue, 7),
            PropertyIdentifier::PresentValue,
            &ApplicationValue::Null,
        )
        .unwrap()
        .with_priority(8);
        let mut body = Vec::new();
        request.encode(&mut body).unwrap();
        let decoded = WritePropertyRequest::decode(&body).unwrap();
        assert_eq!(decoded.decoded_value().unwrap(), ApplicationValue::Null);
    }
}
