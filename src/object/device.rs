//! Device Object
//!
//! Every BACnet device exposes exactly one Device object carrying its
//! identity (instance, vendor, model, firmware), its protocol capabilities
//! (services supported, max APDU, segmentation), and the object-list array
//! enumerating every object the device contains. The object-list itself is
//! composed by the [`super::ObjectDatabase`], which owns all the tables.

#[cfg(feature = "std")]
use std::string::String;

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use crate::encoding::BitString;
use crate::object::{
    encode_with, BacnetError, ObjectTable as _, ObjectType, PropertyIdentifier, PropertyLists,
    PropertyResult, ReadAccess, Segmentation, StatusFlags, WriteAccess,
};
use crate::{BACNET_MAX_APDU, BACNET_PROTOCOL_VERSION};

/// BACnetServicesSupported bit positions (clause 21)
pub mod services_supported {
    pub const SUBSCRIBE_COV: u8 = 5;
    pub const READ_PROPERTY: u8 = 12;
    pub const WRITE_PROPERTY: u8 = 15;
    pub const DEVICE_COMMUNICATION_CONTROL: u8 = 17;
    pub const REINITIALIZE_DEVICE: u8 = 20;
    pub const I_AM: u8 = 26;
    pub const UNCONFIRMED_COV_NOTIFICATION: u8 = 28;
    pub const TIME_SYNCHRONIZATION: u8 = 32;
    pub const WHO_HAS: u8 = 33;
    pub const WHO_IS: u8 = 34;
    pub const READ_RANGE: u8 = 35;
    pub const WRITE_GROUP: u8 = 40;

    /// Size of the bit string
    pub const MAX: u8 = 41;
}

/// Protocol revision implemented by the stack
pub const BACNET_PROTOCOL_REVISION: u8 = 22;

const DEVICE_PROPERTIES_REQUIRED: &[PropertyIdentifier] = &[
    PropertyIdentifier::ObjectIdentifierProp,
    PropertyIdentifier::ObjectName,
    PropertyIdentifier::ObjectTypeProp,
    PropertyIdentifier::SystemStatus,
    PropertyIdentifier::VendorName,
    PropertyIdentifier::VendorIdentifier,
    PropertyIdentifier::ModelName,
    PropertyIdentifier::FirmwareRevision,
    PropertyIdentifier::ApplicationSoftwareVersion,
    PropertyIdentifier::ProtocolVersion,
    PropertyIdentifier::ProtocolRevision,
    PropertyIdentifier::ProtocolServicesSupported,
    PropertyIdentifier::ProtocolObjectTypesSupported,
    PropertyIdentifier::ObjectList,
    PropertyIdentifier::MaxApduLengthAccepted,
    PropertyIdentifier::SegmentationSupported,
    PropertyIdentifier::ApduTimeout,
    PropertyIdentifier::NumberOfApduRetries,
    PropertyIdentifier::DeviceAddressBinding,
    PropertyIdentifier::DatabaseRevision,
];

const DEVICE_PROPERTIES_OPTIONAL: &[PropertyIdentifier] = &[
    PropertyIdentifier::Description,
    PropertyIdentifier::Location,
    PropertyIdentifier::LocalDate,
    PropertyIdentifier::LocalTime,
];

/// Device system status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DeviceStatus {
    #[default]
    Operational = 0,
    OperationalReadOnly = 1,
    DownloadRequired = 2,
    DownloadInProgress = 3,
    NonOperational = 4,
    BackupInProgress = 5,
}

/// The device object's own properties
#[derive(Debug, Clone)]
pub struct DeviceObject {
    pub instance: u32,
    pub object_name: String,
    pub description: String,
    pub location: String,
    pub vendor_name: String,
    pub vendor_identifier: u16,
    pub model_name: String,
    pub firmware_revision: String,
    pub application_software_version: String,
    pub system_status: DeviceStatus,
    pub apdu_timeout_ms: u32,
    pub apdu_retries: u8,
    services: BitString,
}

impl DeviceObject {
    pub fn new(instance: u32, object_name: &str) -> Self {
        let mut services = BitString::new();
        for bit in 0..services_supported::MAX {
            let _ = services.set_bit(bit, false);
        }
        for bit in [
            services_supported::SUBSCRIBE_COV,
            services_supported::READ_PROPERTY,
            services_supported::WRITE_PROPERTY,
            services_supported::I_AM,
            services_supported::UNCONFIRMED_COV_NOTIFICATION,
            services_supported::WHO_IS,
            services_supported::READ_RANGE,
            services_supported::WRITE_GROUP,
        ] {
            let _ = services.set_bit(bit, true);
        }

        Self {
            instance,
            object_name: object_name.into(),
            description: String::new(),
            location: String::new(),
            vendor_name: "bacstack".into(),
            vendor_identifier: 260,
            model_name: "bacstack-device".into(),
            firmware_revision: env!("CARGO_PKG_VERSION").into(),
            application_software_version: "1.0".into(),
            system_status: DeviceStatus::Operational,
            apdu_timeout_ms: crate::app::tsm::APDU_TIMEOUT_MS,
            apdu_retries: crate::app::tsm::APDU_RETRIES,
            services,
        }
    }

    pub fn property_lists(&self) -> PropertyLists {
        PropertyLists {
            required: DEVICE_PROPERTIES_REQUIRED,
            optional: DEVICE_PROPERTIES_OPTIONAL,
            proprietary: &[],
        }
    }

    /// Object types present on this device, as the protocol bit string
    fn object_types_supported(tables: &[&dyn super::ObjectTable]) -> BitString {
        let mut bits = BitString::new();
        // The bit string spans the standard object space.
        let _ = bits.set_bit(u16::from(ObjectType::TrendLog) as u8, false);
        let _ = bits.set_bit(u16::from(ObjectType::Device) as u8, true);
        for table in tables {
            if table.count() > 0 {
                let _ = bits.set_bit(u16::from(table.object_type()) as u8, true);
            }
        }
        bits
    }

    /// Read a device property other than object-list (which the database
    /// composes from all tables)
    pub(super) fn read_property(
        &self,
        access: &ReadAccess,
        tables: &[&dyn super::ObjectTable],
        database_revision: u32,
        buffer: &mut Vec<u8>,
    ) -> PropertyResult<usize> {
        if access.array_index.is_some() && access.property != PropertyIdentifier::ObjectList {
            return Err(BacnetError::invalid_array_index());
        }
        match access.property {
            PropertyIdentifier::ObjectIdentifierProp => encode_with(buffer, |b| {
                crate::encoding::encode_application_object_id(
                    b,
                    ObjectType::Device.into(),
                    self.instance,
                )
            }),
            PropertyIdentifier::ObjectName => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &self.object_name)
            }),
            PropertyIdentifier::ObjectTypeProp => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(b, u16::from(ObjectType::Device) as u32)
            }),
            PropertyIdentifier::Description => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &self.description)
            }),
            PropertyIdentifier::Location => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &self.location)
            }),
            PropertyIdentifier::SystemStatus => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(b, self.system_status as u32)
            }),
            PropertyIdentifier::VendorName => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &self.vendor_name)
            }),
            PropertyIdentifier::VendorIdentifier => encode_with(buffer, |b| {
                crate::encoding::encode_application_unsigned(b, self.vendor_identifier as u64)
            }),
            PropertyIdentifier::ModelName => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &self.model_name)
            }),
            PropertyIdentifier::FirmwareRevision => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &self.firmware_revision)
            }),
            PropertyIdentifier::ApplicationSoftwareVersion => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &self.application_software_version)
            }),
            PropertyIdentifier::ProtocolVersion => encode_with(buffer, |b| {
                crate::encoding::encode_application_unsigned(b, BACNET_PROTOCOL_VERSION as u64)
            }),
            PropertyIdentifier::ProtocolRevision => encode_with(buffer, |b| {
                crate::encoding::encode_application_unsigned(b, BACNET_PROTOCOL_REVISION as u64)
            }),
            PropertyIdentifier::ProtocolServicesSupported => encode_with(buffer, |b| {
                crate::encoding::encode_application_bit_string(b, &self.services)
            }),
            PropertyIdentifier::ProtocolObjectTypesSupported => encode_with(buffer, |b| {
                crate::encoding::encode_application_bit_string(
                    b,
                    &Self::object_types_supported(tables),
                )
            }),
            PropertyIdentifier::MaxApduLengthAccepted => encode_with(buffer, |b| {
                crate::encoding::encode_application_unsigned(b, BACNET_MAX_APDU as u64)
            }),
            PropertyIdentifier::SegmentationSupported => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(
                    b,
                    Segmentation::NoSegmentation as u32,
                )
            }),
            PropertyIdentifier::ApduTimeout => encode_with(buffer, |b| {
                crate::encoding::encode_application_unsigned(b, self.apdu_timeout_ms as u64)
            }),
            PropertyIdentifier::NumberOfApduRetries => encode_with(buffer, |b| {
                crate::encoding::encode_application_unsigned(b, self.apdu_retries as u64)
            }),
            // No bindings are cached persistently; the list is empty.
            PropertyIdentifier::DeviceAddressBinding => Ok(0),
            PropertyIdentifier::DatabaseRevision => encode_with(buffer, |b| {
                crate::encoding::encode_application_unsigned(b, database_revision as u64)
            }),
            PropertyIdentifier::StatusFlags => encode_with(buffer, |b| {
                crate::encoding::encode_application_bit_string(
                    b,
                    &StatusFlags::empty().to_bit_string(),
                )
            }),
            #[cfg(feature = "std")]
            PropertyIdentifier::LocalDate => encode_with(buffer, |b| {
                let now = crate::object::trendlog::local_now();
                crate::encoding::encode_application_date(b, &now.date)
            }),
            #[cfg(feature = "std")]
            PropertyIdentifier::LocalTime => encode_with(buffer, |b| {
                let now = crate::object::trendlog::local_now();
                crate::encoding::encode_application_time(b, &now.time)
            }),
            _ => Err(BacnetError::unknown_property()),
        }
    }

    pub(super) fn write_property(&mut self, access: &WriteAccess<'_>) -> PropertyResult<()> {
        match access.property {
            PropertyIdentifier::ObjectName
            | PropertyIdentifier::Description
            | PropertyIdentifier::Location => {
                let (value, _) = crate::encoding::ApplicationValue::decode(access.application_data)?;
                let text = match value {
                    crate::encoding::ApplicationValue::CharacterString(text) => text
                        .to_string_lossless()
                        .map_err(|_| BacnetError::invalid_data_type())?,
                    _ => return Err(BacnetError::invalid_data_type()),
                };
                match access.property {
                    PropertyIdentifier::ObjectName => self.object_name = text,
                    PropertyIdentifier::Description => self.description = text,
                    _ => self.location = text,
                }
                Ok(())
            }
            property
                if DEVICE_PROPERTIES_REQUIRED.contains(&property)
                    || DEVICE_PROPERTIES_OPTIONAL.contains(&property) =>
            {
                Err(BacnetError::write_access_denied())
            }
            _ => Err(BacnetError::unknown_property()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectIdentifier;

    fn access(property: PropertyIdentifier) -> ReadAccess {
        ReadAccess {
            object: ObjectIdentifier::new(ObjectType::Device, 123),
            property,
            array_index: None,
        }
    }

    #[test]
    fn test_identity_reads() {
        let device = DeviceObject::new(123, "controller-1");
        let mut buffer = Vec::new();
        device
            .read_property(&access(PropertyIdentifier::ObjectIdentifierProp), &[], 1, &mut buffer)
            .unwrap();
        assert_eq!(buffer, [0xC4, 0x02, 0x00, 0x00, 0x7B]);

        let mut buffer = Vec::new();
        device
            .read_property(&access(PropertyIdentifier::MaxApduLengthAccepted), &[], 1, &mut buffer)
            .unwrap();
        assert_eq!(buffer, [0x22, 0x05, 0xC4]);

        let mut buffer = Vec::new();
        device
            .read_property(&access(PropertyIdentifier::SegmentationSupported), &[], 1, &mut buffer)
            .unwrap();
        assert_eq!(buffer, [0x91, 0x03]);
    }

    #[test]
    fn test_services_supported_bits() {
        let device = DeviceObject::new(1, "d");
        let mut buffer = Vec::new();
        device
            .read_property(
                &access(PropertyIdentifier::ProtocolServicesSupported),
                &[],
                1,
                &mut buffer,
            )
            .unwrap();
        let (bits, _) = crate::encoding::decode_application_bit_string(&buffer).unwrap();
        assert_eq!(bits.bits_used(), services_supported::MAX);
        assert!(bits.bit(services_supported::READ_PROPERTY));
        assert!(bits.bit(services_supported::WHO_IS));
        assert!(bits.bit(services_supported::WRITE_GROUP));
        assert!(!bits.bit(services_supported::REINITIALIZE_DEVICE));
    }

    #[test]
    fn test_writable_texts_only() {
        let mut device = DeviceObject::new(1, "d");

        let mut name = Vec::new();
        crate::encoding::encode_application_string(&mut name, "renamed").unwrap();
        device
            .write_property(&WriteAccess {
                object: ObjectIdentifier::new(ObjectType::Device, 1),
                property: PropertyIdentifier::ObjectName,
                array_index: None,
                application_data: &name,
                priority: None,
            })
            .unwrap();
        assert_eq!(device.object_name, "renamed");

        let mut vendor = Vec::new();
        crate::encoding::encode_application_unsigned(&mut vendor, 9).unwrap();
        assert_eq!(
            device
                .write_property(&WriteAccess {
                    object: ObjectIdentifier::new(ObjectType::Device, 1),
                    property: PropertyIdentifier::VendorIdentifier,
                    array_index: None,
                    application_data: &vendor,
                    priority: None,
                })
                .unwrap_err(),
            BacnetError::write_access_denied()
        );
    }
}
