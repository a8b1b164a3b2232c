//! Who-Is and I-Am Device Discovery
//!
//! Who-Is broadcasts an optional device-instance range; devices whose
//! instance falls inside the range answer with I-Am carrying their
//! instance, APDU limits, segmentation support, and vendor identifier.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::encoding::{
    decode_context_unsigned, encode_context_unsigned, TagReader,
};
use crate::object::{ObjectIdentifier, ObjectType, Segmentation};
use crate::service::{Result, ServiceError, UnconfirmedServiceChoice};
use crate::app::ApduType;

/// Who-Is request with an optional instance range filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WhoIsRequest {
    pub device_instance_low: Option<u32>,
    pub device_instance_high: Option<u32>,
}

impl WhoIsRequest {
    /// A global Who-Is with no range filter
    pub fn new() -> Self {
        Self::default()
    }

    /// A Who-Is for a single device instance
    pub fn for_device(device_instance: u32) -> Self {
        Self {
            device_instance_low: Some(device_instance),
            device_instance_high: Some(device_instance),
        }
    }

    /// A Who-Is for an inclusive instance range
    pub fn for_range(low: u32, high: u32) -> Self {
        Self {
            device_instance_low: Some(low),
            device_instance_high: Some(high),
        }
    }

    /// Encode the service body (without the APDU header)
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        if let (Some(low), Some(high)) = (self.device_instance_low, self.device_instance_high) {
            if low > 0x3FFFFF || high > 0x3FFFFF || low > high {
                return Err(ServiceError::ValueOutOfRange("device-instance-range"));
            }
            encode_context_unsigned(buffer, 0, low as u64)?;
            encode_context_unsigned(buffer, 1, high as u64)?;
        }
        Ok(())
    }

    /// Encode the full unconfirmed APDU
    pub fn encode_apdu(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(8);
        buffer.push((ApduType::UnconfirmedRequest as u8) << 4);
        buffer.push(UnconfirmedServiceChoice::WhoIs as u8);
        self.encode(&mut buffer)?;
        Ok(buffer)
    }

    /// Decode the service body; an empty body is the global form
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Ok(Self::new());
        }
        let (low, used) = decode_context_unsigned(data, 0)?;
        let (high, _) = decode_context_unsigned(&data[used..], 1)?;
        if low > 0x3FFFFF || high > 0x3FFFFF {
            return Err(ServiceError::ValueOutOfRange("device-instance-range"));
        }
        Ok(Self::for_range(low as u32, high as u32))
    }

    /// Whether a device with the given instance should answer
    pub fn matches(&self, device_instance: u32) -> bool {
        match (self.device_instance_low, self.device_instance_high) {
            (Some(low), Some(high)) => (low..=high).contains(&device_instance),
            _ => true,
        }
    }
}

/// I-Am announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IAmRequest {
    pub device_identifier: ObjectIdentifier,
    pub max_apdu_length_accepted: u32,
    pub segmentation_supported: Segmentation,
    pub vendor_identifier: u16,
}

impl IAmRequest {
    pub fn new(
        device_instance: u32,
        max_apdu_length_accepted: u32,
        segmentation_supported: Segmentation,
        vendor_identifier: u16,
    ) -> Self {
        Self {
            device_identifier: ObjectIdentifier::new(ObjectType::Device, device_instance),
            max_apdu_length_accepted,
            segmentation_supported,
            vendor_identifier,
        }
    }

    /// Encode the service body (without the APDU header)
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        crate::encoding::encode_application_object_id(
            buffer,
            self.device_identifier.object_type.into(),
            self.device_identifier.instance,
        )?;
        crate::encoding::encode_application_unsigned(buffer, self.max_apdu_length_accepted as u64)?;
        crate::encoding::encode_application_enumerated(buffer, self.segmentation_supported as u32)?;
        crate::encoding::encode_application_unsigned(buffer, self.vendor_identifier as u64)?;
        Ok(())
    }

    /// Encode the full unconfirmed APDU
    pub fn encode_apdu(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(16);
        buffer.push((ApduType::UnconfirmedRequest as u8) << 4);
        buffer.push(UnconfirmedServiceChoice::IAm as u8);
        self.encode(&mut buffer)?;
        Ok(buffer)
    }

    /// Decode the service body
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = TagReader::new(data);

        let (object_type, instance) = reader.application_object_id()?;
        if object_type != u16::from(ObjectType::Device) {
            return Err(ServiceError::UnexpectedField("device-identifier"));
        }
        let max_apdu = reader.application_unsigned()?;
        let segmentation = match reader.application_value()? {
            crate::encoding::ApplicationValue::Enumerated(v) => {
                Segmentation::try_from(v).map_err(|_| {
                    ServiceError::ValueOutOfRange("segmentation-supported")
                })?
            }
            _ => return Err(ServiceError::UnexpectedField("segmentation-supported")),
        };
        let vendor = reader.application_unsigned()?;
        if vendor > u16::MAX as u64 {
            return Err(ServiceError::ValueOutOfRange("vendor-id"));
        }

        Ok(Self {
            device_identifier: ObjectIdentifier::new(ObjectType::Device, instance),
            max_apdu_length_accepted: max_apdu as u32,
            segmentation_supported: segmentation,
            vendor_identifier: vendor as u16,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_who_is_wire_form() {
        let request = WhoIsRequest::new();
        assert_eq!(request.encode_apdu().unwrap(), [0x10, 0x08]);

        let decoded = WhoIsRequest::decode(&[]).unwrap();
        assert!(decoded.matches(0));
        assert!(decoded.matches(4_194_303));
    }

    #[test]
    fn test_who_is_range_wire_form() {
        let request = WhoIsRequest::for_range(100, 200);
        let apdu = request.encode_apdu().unwrap();
        assert_eq!(apdu, [0x10, 0x08, 0x09, 0x64, 0x19, 0xC8]);

        let decoded = WhoIsRequest::decode(&apdu[2..]).unwrap();
        assert_eq!(decoded, request);
        assert!(decoded.matches(100));
        assert!(decoded.matches(150));
        assert!(!decoded.matches(99));
        assert!(!decoded.matches(201));
    }

    #[test]
    fn test_who_is_rejects_inverted_range() {
        let mut buffer = Vec::new();
        assert!(WhoIsRequest::for_range(200, 100).encode(&mut buffer).is_err());
    }

    #[test]
    fn test_i_am_wire_form() {
        let request = IAmRequest::new(111, 1476, Segmentation::NoSegmentation, 260);
        let apdu = request.encode_apdu().unwrap();
        assert_eq!(
            apdu,
            [0x10, 0x00, 0xC4, 0x02, 0x00, 0x00, 0x6F, 0x22, 0x05, 0xC4, 0x91, 0x03, 0x22, 0x01, 0x04]
        );

        let decoded = IAmRequest::decode(&apdu[2..]).unwrap();
        assert_eq!(decoded.device_identifier.instance, 111);
        assert_eq!(decoded.max_apdu_length_accepted, 1476);
        assert_eq!(decoded.segmentation_supported, Segmentation::NoSegmentation);
        assert_eq!(decoded.vendor_identifier, 260);
    }

    #[test]
    fn test_i_am_rejects_non_device_identifier() {
        let mut body = Vec::new();
        crate::encoding::encode_application_object_id(&mut body, 0, 1).unwrap();
        crate::encoding::encode_application_unsigned(&mut body, 1476).unwrap();
        crate::encoding::encode_application_enumerated(&mut body, 3).unwrap();
        crate::encoding::encode_application_unsigned(&mut body, 1).unwrap();
        assert!(IAmRequest::decode(&body).is_err());
    }
}
