//! Binary Object Types
//!
//! Binary-Input mirrors a contact or digital input, with polarity applied
//! between the physical level and the logical present value. Binary-Value
//! is a commandable software point with a 16-level priority array.

#[cfg(feature = "std")]
use std::string::String;

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use crate::encoding::{encode_application_null, ApplicationValue};
use crate::object::{
    encode_with, BacnetError, BinaryPv, EventState, ObjectIdentifier, ObjectTable, ObjectType,
    Polarity, PropertyIdentifier, PropertyLists, PropertyResult, ReadAccess, Reliability,
    StatusFlags, WriteAccess,
};
use crate::util::is_valid_priority;

const BINARY_INPUT_PROPERTIES_REQUIRED: &[PropertyIdentifier] = &[
    PropertyIdentifier::ObjectIdentifierProp,
    PropertyIdentifier::ObjectName,
    PropertyIdentifier::ObjectTypeProp,
    PropertyIdentifier::PresentValue,
    PropertyIdentifier::StatusFlags,
    PropertyIdentifier::EventState,
    PropertyIdentifier::OutOfService,
    PropertyIdentifier::Polarity,
];

const BINARY_INPUT_PROPERTIES_OPTIONAL: &[PropertyIdentifier] = &[
    PropertyIdentifier::Description,
    PropertyIdentifier::Reliability,
    PropertyIdentifier::ActiveText,
    PropertyIdentifier::InactiveText,
];

const BINARY_VALUE_PROPERTIES_REQUIRED: &[PropertyIdentifier] = &[
    PropertyIdentifier::ObjectIdentifierProp,
    PropertyIdentifier::ObjectName,
    PropertyIdentifier::ObjectTypeProp,
    PropertyIdentifier::PresentValue,
    PropertyIdentifier::StatusFlags,
    PropertyIdentifier::EventState,
    PropertyIdentifier::OutOfService,
];

const BINARY_VALUE_PROPERTIES_OPTIONAL: &[PropertyIdentifier] = &[
    PropertyIdentifier::Description,
    PropertyIdentifier::ActiveText,
    PropertyIdentifier::InactiveText,
    PropertyIdentifier::PriorityArray,
    PropertyIdentifier::RelinquishDefault,
];

/// One Binary-Input instance
#[derive(Debug, Clone)]
pub struct BinaryInput {
    pub instance: u32,
    pub object_name: String,
    pub description: String,
    /// Physical level before polarity is applied
    pub physical_level: bool,
    pub polarity: Polarity,
    pub reliability: Reliability,
    pub event_state: EventState,
    pub out_of_service: bool,
    /// Override used while out of service
    pub override_value: BinaryPv,
    pub active_text: String,
    pub inactive_text: String,
}

impl BinaryInput {
    pub fn new(instance: u32, object_name: &str) -> Self {
        Self {
            instance,
            object_name: object_name.into(),
            description: String::new(),
            physical_level: false,
            polarity: Polarity::Normal,
            reliability: Reliability::NoFaultDetected,
            event_state: EventState::Normal,
            out_of_service: false,
            override_value: BinaryPv::Inactive,
            active_text: "active".into(),
            inactive_text: "inactive".into(),
        }
    }

    /// Logical present value with polarity applied
    pub fn present_value(&self) -> BinaryPv {
        if self.out_of_service {
            return self.override_value;
        }
        let active = match self.polarity {
            Polarity::Normal => self.physical_level,
            Polarity::Reverse => !self.physical_level,
        };
        if active {
            BinaryPv::Active
        } else {
            BinaryPv::Inactive
        }
    }

    fn status_flags(&self) -> StatusFlags {
        let mut flags = StatusFlags::empty();
        if self.reliability != Reliability::NoFaultDetected {
            flags |= StatusFlags::FAULT;
        }
        if self.out_of_service {
            flags |= StatusFlags::OUT_OF_SERVICE;
        }
        flags
    }
}

/// All Binary-Input instances of the device
#[derive(Debug, Default)]
pub struct BinaryInputTable {
    points: Vec<BinaryInput>,
}

impl BinaryInputTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, point: BinaryInput) {
        let position = self
            .points
            .partition_point(|existing| existing.instance < point.instance);
        self.points.insert(position, point);
    }

    pub fn get(&self, instance: u32) -> Option<&BinaryInput> {
        self.points.iter().find(|point| point.instance == instance)
    }

    pub fn get_mut(&mut self, instance: u32) -> Option<&mut BinaryInput> {
        self.points
            .iter_mut()
            .find(|point| point.instance == instance)
    }

    /// Update the physical level from hardware; ignored while out of service
    pub fn set_physical_level(&mut self, instance: u32, level: bool) {
        if let Some(point) = self.get_mut(instance) {
            if !point.out_of_service {
                point.physical_level = level;
            }
        }
    }
}

impl ObjectTable for BinaryInputTable {
    fn object_type(&self) -> ObjectType {
        ObjectType::BinaryInput
    }

    fn count(&self) -> u32 {
        self.points.len() as u32
    }

    fn valid_instance(&self, instance: u32) -> bool {
        self.get(instance).is_some()
    }

    fn index_to_instance(&self, index: u32) -> Option<u32> {
        self.points.get(index as usize).map(|point| point.instance)
    }

    fn instance_to_index(&self, instance: u32) -> Option<u32> {
        self.points
            .iter()
            .position(|point| point.instance == instance)
            .map(|index| index as u32)
    }

    fn property_lists(&self) -> PropertyLists {
        PropertyLists {
            required: BINARY_INPUT_PROPERTIES_REQUIRED,
            optional: BINARY_INPUT_PROPERTIES_OPTIONAL,
            proprietary: &[],
        }
    }

    fn read_property(&self, access: &ReadAccess, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
        let point = self
            .get(access.object.instance)
            .ok_or_else(BacnetError::unknown_object)?;
        if access.array_index.is_some() {
            return Err(BacnetError::invalid_array_index());
        }
        match access.property {
            PropertyIdentifier::ObjectIdentifierProp => encode_with(buffer, |b| {
                crate::encoding::encode_application_object_id(
                    b,
                    ObjectType::BinaryInput.into(),
                    point.instance,
                )
            }),
            PropertyIdentifier::ObjectName => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &point.object_name)
            }),
            PropertyIdentifier::ObjectTypeProp => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(
                    b,
                    u16::from(ObjectType::BinaryInput) as u32,
                )
            }),
            PropertyIdentifier::PresentValue => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(b, point.present_value() as u32)
            }),
            PropertyIdentifier::StatusFlags => encode_with(buffer, |b| {
                crate::encoding::encode_application_bit_string(b, &point.status_flags().to_bit_string())
            }),
            PropertyIdentifier::EventState => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(b, point.event_state as u32)
            }),
            PropertyIdentifier::Reliability => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(b, point.reliability as u32)
            }),
            PropertyIdentifier::OutOfService => encode_with(buffer, |b| {
                crate::encoding::encode_application_boolean(b, point.out_of_service)
            }),
            PropertyIdentifier::Polarity => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(b, point.polarity as u32)
            }),
            PropertyIdentifier::Description => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &point.description)
            }),
            PropertyIdentifier::ActiveText => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &point.active_text)
            }),
            PropertyIdentifier::InactiveText => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &point.inactive_text)
            }),
            _ => Err(BacnetError::unknown_property()),
        }
    }

    fn write_property(&mut self, access: &WriteAccess<'_>) -> PropertyResult<()> {
        let point = self
            .get_mut(access.object.instance)
            .ok_or_else(BacnetError::unknown_object)?;
        if access.array_index.is_some() {
            return Err(BacnetError::invalid_array_index());
        }
        let (value, _) = ApplicationValue::decode(access.application_data)?;
        match access.property {
            PropertyIdentifier::PresentValue => {
                if !point.out_of_service {
                    return Err(BacnetError::write_access_denied());
                }
                match value {
                    ApplicationValue::Enumerated(0) => {
                        point.override_value = BinaryPv::Inactive;
                        Ok(())
                    }
                    ApplicationValue::Enumerated(1) => {
                        point.override_value = BinaryPv::Active;
                        Ok(())
                    }
                    ApplicationValue::Enumerated(_) => Err(BacnetError::value_out_of_range()),
                    _ => Err(BacnetError::invalid_data_type()),
                }
            }
            PropertyIdentifier::OutOfService => match value {
                ApplicationValue::Boolean(out_of_service) => {
                    point.out_of_service = out_of_service;
                    Ok(())
                }
                _ => Err(BacnetError::invalid_data_type()),
            },
            PropertyIdentifier::Polarity => match value {
                ApplicationValue::Enumerated(0) => {
                    point.polarity = Polarity::Normal;
                    Ok(())
                }
                ApplicationValue::Enumerated(1) => {
                    point.polarity = Polarity::Reverse;
                    Ok(())
                }
                ApplicationValue::Enumerated(_) => Err(BacnetError::value_out_of_range()),
                _ => Err(BacnetError::invalid_data_type()),
            },
            PropertyIdentifier::ObjectIdentifierProp
            | PropertyIdentifier::ObjectName
            | PropertyIdentifier::ObjectTypeProp
            | PropertyIdentifier::StatusFlags
            | PropertyIdentifier::EventState
            | PropertyIdentifier::Reliability
            | PropertyIdentifier::Description
            | PropertyIdentifier::ActiveText
            | PropertyIdentifier::InactiveText => Err(BacnetError::write_access_denied()),
            _ => Err(BacnetError::unknown_property()),
        }
    }
}

/// One commandable Binary-Value instance
#[derive(Debug, Clone)]
pub struct BinaryValue {
    pub instance: u32,
    pub object_name: String,
    pub description: String,
    pub event_state: EventState,
    pub out_of_service: bool,
    pub priority_array: [Option<BinaryPv>; 16],
    pub relinquish_default: BinaryPv,
    pub active_text: String,
    pub inactive_text: String,
}

impl BinaryValue {
    pub fn new(instance: u32, object_name: &str) -> Self {
        Self {
            instance,
            object_name: object_name.into(),
            description: String::new(),
            event_state: EventState::Normal,
            out_of_service: false,
            priority_array: [None; 16],
            relinquish_default: BinaryPv::Inactive,
            active_text: "active".into(),
            inactive_text: "inactive".into(),
        }
    }

    pub fn present_value(&self) -> BinaryPv {
        self.priority_array
            .iter()
            .flatten()
            .next()
            .copied()
            .unwrap_or(self.relinquish_default)
    }
}

/// All Binary-Value instances of the device
#[derive(Debug, Default)]
pub struct BinaryValueTable {
    points: Vec<BinaryValue>,
}

impl BinaryValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, point: BinaryValue) {
        let position = self
            .points
            .partition_point(|existing| existing.instance < point.instance);
        self.points.insert(position, point);
    }

    pub fn get(&self, instance: u32) -> Option<&BinaryValue> {
        self.points.iter().find(|point| point.instance == instance)
    }

    pub fn get_mut(&mut self, instance: u32) -> Option<&mut BinaryValue> {
        self.points
            .iter_mut()
            .find(|point| point.instance == instance)
    }
}

impl ObjectTable for BinaryValueTable {
    fn object_type(&self) -> ObjectType {
        ObjectType::BinaryValue
    }

    fn count(&self) -> u32 {
        self.points.len() as u32
    }

    fn valid_instance(&self, instance: u32) -> bool {
        self.get(instance).is_some()
    }

    fn index_to_instance(&self, index: u32) -> Option<u32> {
        self.points.get(index as usize).map(|point| point.instance)
    }

    fn instance_to_index(&self, instance: u32) -> Option<u32> {
        self.points
            .iter()
            .position(|point| point.instance == instance)
            .map(|index| index as u32)
    }

    fn property_lists(&self) -> PropertyLists {
        PropertyLists {
            required: BINARY_VALUE_PROPERTIES_REQUIRED,
            optional: BINARY_VALUE_PROPERTIES_OPTIONAL,
            proprietary: &[],
        }
    }

    fn read_property(&self, access: &ReadAccess, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
        let point = self
            .get(access.object.instance)
            .ok_or_else(BacnetError::unknown_object)?;

        if access.property == PropertyIdentifier::PriorityArray {
            return read_binary_priority_array(&point.priority_array, access.array_index, buffer);
        }
        if access.array_index.is_some() {
            return Err(BacnetError::invalid_array_index());
        }

        match access.property {
            PropertyIdentifier::ObjectIdentifierProp => encode_with(buffer, |b| {
                crate::encoding::encode_application_object_id(
                    b,
                    ObjectType::BinaryValue.into(),
                    point.instance,
                )
            }),
            PropertyIdentifier::ObjectName => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &point.object_name)
            }),
            PropertyIdentifier::ObjectTypeProp => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(
                    b,
                    u16::from(ObjectType::BinaryValue) as u32,
                )
            }),
            PropertyIdentifier::PresentValue => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(b, point.present_value() as u32)
            }),
            PropertyIdentifier::StatusFlags => encode_with(buffer, |b| {
                let mut flags = StatusFlags::empty();
                if point.out_of_service {
                    flags |= StatusFlags::OUT_OF_SERVICE;
                }
                crate::encoding::encode_application_bit_string(b, &flags.to_bit_string())
            }),
            PropertyIdentifier::EventState => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(b, point.event_state as u32)
            }),
            PropertyIdentifier::OutOfService => encode_with(buffer, |b| {
                crate::encoding::encode_application_boolean(b, point.out_of_service)
            }),
            PropertyIdentifier::Description => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &point.description)
            }),
            PropertyIdentifier::ActiveText => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &point.active_text)
            }),
            PropertyIdentifier::InactiveText => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &point.inactive_text)
            }),
            PropertyIdentifier::RelinquishDefault => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(b, point.relinquish_default as u32)
            }),
            _ => Err(BacnetError::unknown_property()),
        }
    }

    fn write_property(&mut self, access: &WriteAccess<'_>) -> PropertyResult<()> {
        let point = self
            .get_mut(access.object.instance)
            .ok_or_else(BacnetError::unknown_object)?;
        if access.array_index.is_some() {
            return Err(BacnetError::invalid_array_index());
        }
        let (value, _) = ApplicationValue::decode(access.application_data)?;
        let decode_pv = |value: &ApplicationValue| match value {
            ApplicationValue::Enumerated(0) => Ok(BinaryPv::Inactive),
            ApplicationValue::Enumerated(1) => Ok(BinaryPv::Active),
            ApplicationValue::Enumerated(_) => Err(BacnetError::value_out_of_range()),
            _ => Err(BacnetError::invalid_data_type()),
        };
        match access.property {
            PropertyIdentifier::PresentValue => {
                let priority = access.priority.unwrap_or(16);
                if !is_valid_priority(priority) {
                    return Err(BacnetError::value_out_of_range());
                }
                let slot = (priority - 1) as usize;
                if matches!(value, ApplicationValue::Null) {
                    point.priority_array[slot] = None;
                    return Ok(());
                }
                point.priority_array[slot] = Some(decode_pv(&value)?);
                Ok(())
            }
            PropertyIdentifier::RelinquishDefault => {
                point.relinquish_default = decode_pv(&value)?;
                Ok(())
            }
            PropertyIdentifier::OutOfService => match value {
                ApplicationValue::Boolean(out_of_service) => {
                    point.out_of_service = out_of_service;
                    Ok(())
                }
                _ => Err(BacnetError::invalid_data_type()),
            },
            PropertyIdentifier::ObjectIdentifierProp
            | PropertyIdentifier::ObjectName
            | PropertyIdentifier::ObjectTypeProp
            | PropertyIdentifier::StatusFlags
            | PropertyIdentifier::EventState
            | PropertyIdentifier::Description
            | PropertyIdentifier::ActiveText
            | PropertyIdentifier::InactiveText
            | PropertyIdentifier::PriorityArray => Err(BacnetError::write_access_denied()),
            _ => Err(BacnetError::unknown_property()),
        }
    }
}

fn read_binary_priority_array(
    slots: &[Option<BinaryPv>; 16],
    array_index: Option<u32>,
    buffer: &mut Vec<u8>,
) -> PropertyResult<usize> {
    let encode_slot = |b: &mut Vec<u8>, slot: Option<BinaryPv>| match slot {
        Some(value) => crate::encoding::encode_application_enumerated(b, value as u32),
        None => encode_application_null(b),
    };
    match array_index {
        None => encode_with(buffer, |b| {
            for slot in slots {
                encode_slot(b, *slot)?;
            }
            Ok(())
        }),
        Some(0) => encode_with(buffer, |b| crate::encoding::encode_application_unsigned(b, 16)),
        Some(index) if (1..=16).contains(&index) => {
            encode_with(buffer, |b| encode_slot(b, slots[(index - 1) as usize]))
        }
        Some(_) => Err(BacnetError::invalid_array_index()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectIdentifier;

    #[test]
    fn test_bi_polarity() {
        let mut point = BinaryInput::new(1, "DI-1");
        assert_eq!(point.present_value(), BinaryPv::Inactive);

        point.physical_level = true;
        assert_eq!(point.present_value(), BinaryPv::Active);

        point.polarity = Polarity::Reverse;
        assert_eq!(point.present_value(), BinaryPv::Inactive);
    }

    #[test]
    fn test_bi_out_of_service_override() {
        let mut table = BinaryInputTable::new();
        table.add(BinaryInput::new(2, "DI-2"));
        let object = ObjectIdentifier::new(ObjectType::BinaryInput, 2);

        let mut oos = Vec::new();
        ApplicationValue::Boolean(true).encode(&mut oos).unwrap();
        table
            .write_property(&WriteAccess {
                object,
                property: PropertyIdentifier::OutOfService,
                array_index: None,
                application_data: &oos,
                priority: None,
            })
            .unwrap();

        // Hardware updates are ignored while overridden.
        table.set_physical_level(2, true);
        assert_eq!(table.get(2).unwrap().physical_level, false);

        let mut active = Vec::new();
        ApplicationValue::Enumerated(1).encode(&mut active).unwrap();
        table
            .write_property(&WriteAccess {
                object,
                property: PropertyIdentifier::PresentValue,
                array_index: None,
                application_data: &active,
                priority: None,
            })
            .unwrap();
        assert_eq!(table.get(2).unwrap().present_value(), BinaryPv::Active);
    }

    #[test]
    fn test_bv_priority_commanding() {
        let mut table = BinaryValueTable::new();
        table.add(BinaryValue::new(3, "FAN-CMD"));
        let object = ObjectIdentifier::new(ObjectType::BinaryValue, 3);

        let mut active = Vec::new();
        ApplicationValue::Enumerated(1).encode(&mut active).unwrap();
        table
            .write_property(&WriteAccess {
                object,
                property: PropertyIdentifier::PresentValue,
                array_index: None,
                application_data: &active,
                priority: Some(8),
            })
            .unwrap();
        assert_eq!(table.get(3).unwrap().present_value(), BinaryPv::Active);

        let mut null = Vec::new();
        ApplicationValue::Null.encode(&mut null).unwrap();
        table
            .write_property(&WriteAccess {
                object,
                property: PropertyIdentifier::PresentValue,
                array_index: None,
                application_data: &null,
                priority: Some(8),
            })
            .unwrap();
        assert_eq!(table.get(3).unwrap().present_value(), BinaryPv::Inactive);
    }

    #[test]
    fn test_bi_read_texts() {
        let mut table = BinaryInputTable::new();
        let mut point = BinaryInput::new(1, "DI-1");
        point.active_text = "run".into();
        point.inactive_text = "stop".into();
        table.add(point);

        let mut buffer = Vec::new();
        table
            .read_property(
                &ReadAccess {
                    object: ObjectIdentifier::new(ObjectType::BinaryInput, 1),
                    property: PropertyIdentifier::ActiveText,
                    array_index: None,
                },
                &mut buffer,
            )
            .unwrap();
        assert_eq!(buffer, [0x74, 0x00, b'r', b'u', b'n']);
    }
}
