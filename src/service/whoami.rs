//! Who-Am-I and You-Are Address Assignment
//!
//! A device without a configured address broadcasts Who-Am-I with its
//! vendor id, model name, and serial number; a commissioning tool answers
//! with You-Are naming the device instance and, optionally, the MAC address
//! the device should adopt.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::app::ApduType;
use crate::encoding::{CharacterString, TagReader};
use crate::service::{Result, ServiceError, UnconfirmedServiceChoice};

/// Who-Am-I request: the identity of an unconfigured device
#[derive(Debug, Clone, PartialEq)]
pub struct WhoAmIRequest {
    pub vendor_id: u16,
    pub model_name: CharacterString,
    pub serial_number: CharacterString,
}

impl WhoAmIRequest {
    pub fn new(vendor_id: u16, model_name: &str, serial_number: &str) -> Self {
        Self {
            vendor_id,
            model_name: CharacterString::utf8(model_name),
            serial_number: CharacterString::utf8(serial_number),
        }
    }

    /// Encode the service body (without the APDU header)
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        crate::encoding::encode_application_unsigned(buffer, self.vendor_id as u64)?;
        crate::encoding::encode_application_character_string(buffer, &self.model_name)?;
        crate::encoding::encode_application_character_string(buffer, &self.serial_number)?;
        Ok(())
    }

    /// Encode the full unconfirmed APDU
    pub fn encode_apdu(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(32);
        buffer.push((ApduType::UnconfirmedRequest as u8) << 4);
        buffer.push(UnconfirmedServiceChoice::WhoAmI as u8);
        self.encode(&mut buffer)?;
        Ok(buffer)
    }

    /// Decode the service body
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = TagReader::new(data);
        let vendor_id = reader.application_unsigned()?;
        if vendor_id > u16::MAX as u64 {
            return Err(ServiceError::ValueOutOfRange("vendor-id"));
        }
        let model_name = reader.application_character_string()?;
        let serial_number = reader.application_character_string()?;
        Ok(Self {
            vendor_id: vendor_id as u16,
            model_name,
            serial_number,
        })
    }
}

/// You-Are request: assigns a device instance and optionally a MAC address
/// to the device whose identity matches
#[derive(Debug, Clone, PartialEq)]
pub struct YouAreRequest {
    pub vendor_id: u16,
    pub model_name: CharacterString,
    pub serial_number: CharacterString,
    /// Device instance the target should adopt
    pub device_instance: Option<u32>,
    /// Datalink MAC address the target should adopt
    pub mac_address: Option<Vec<u8>>,
}

impl YouAreRequest {
    pub fn new(vendor_id: u16, model_name: &str, serial_number: &str) -> Self {
        Self {
            vendor_id,
            model_name: CharacterString::utf8(model_name),
            serial_number: CharacterString::utf8(serial_number),
            device_instance: None,
            mac_address: None,
        }
    }

    pub fn with_device_instance(mut self, device_instance: u32) -> Self {
        self.device_instance = Some(device_instance);
        self
    }

    pub fn with_mac_address(mut self, mac: &[u8]) -> Self {
        self.mac_address = Some(mac.to_vec());
        self
    }

    /// Encode the service body (without the APDU header)
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        if let Some(instance) = self.device_instance {
            if instance > 0x3FFFFF {
                return Err(ServiceError::ValueOutOfRange("device-instance"));
            }
        }
        crate::encoding::encode_application_unsigned(buffer, self.vendor_id as u64)?;
        crate::encoding::encode_application_character_string(buffer, &self.model_name)?;
        crate::encoding::encode_application_character_string(buffer, &self.serial_number)?;
        if let Some(instance) = self.device_instance {
            crate::encoding::encode_application_unsigned(buffer, instance as u64)?;
        }
        if let Some(mac) = &self.mac_address {
            crate::encoding::encode_application_octet_string(buffer, mac)?;
        }
        Ok(())
    }

    /// Encode the full unconfirmed APDU
    pub fn encode_apdu(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(48);
        buffer.push((ApduType::UnconfirmedRequest as u8) << 4);
        buffer.push(UnconfirmedServiceChoice::YouAre as u8);
        self.encode(&mut buffer)?;
        Ok(buffer)
    }

    /// Decode the service body; the trailing device instance and MAC are
    /// optional and independent
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = TagReader::new(data);
        let vendor_id = reader.application_unsigned()?;
        if vendor_id > u16::MAX as u64 {
            return Err(ServiceError::ValueOutOfRange("vendor-id"));
        }
        let model_name = reader.application_character_string()?;
        let serial_number = reader.application_character_string()?;

        let mut request = Self {
            vendor_id: vendor_id as u16,
            model_name,
            serial_number,
            device_instance: None,
            mac_address: None,
        };

        if reader.has_data() {
            if let Ok(instance) = reader.application_unsigned() {
                if instance > 0x3FFFFF {
                    return Err(ServiceError::ValueOutOfRange("device-instance"));
                }
                request.device_instance = Some(instance as u32);
            }
        }
        if reader.has_data() {
            let mac = reader.application_octet_string()?;
            request.mac_address = Some(mac.to_vec());
        }

        Ok(request)
    }

    /// Whether this assignment addresses the given device identity
    pub fn matches(&self, vendor_id: u16, model_name: &str, serial_number: &str) -> bool {
        self.vendor_id == vendor_id
            && self.model_name.to_string_lossless().as_deref() == Ok(model_name)
            && self.serial_number.to_string_lossless().as_deref() == Ok(serial_number)
    }
}
