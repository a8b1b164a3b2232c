//! Analog Object Types
//!
//! Analog-Input mirrors a sensor: its present value comes from hardware
//! and is only writable while the point is out of service. Analog-Value is
//! a commandable software point with a 16-level priority array and a
//! relinquish default.

#[cfg(feature = "std")]
use std::string::String;

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use crate::encoding::{encode_application_null, ApplicationValue};
use crate::object::{
    encode_with, BacnetError, EngineeringUnits, EventState, ObjectIdentifier, ObjectTable,
    ObjectType, PropertyIdentifier, PropertyLists, PropertyResult, ReadAccess, Reliability,
    StatusFlags, WriteAccess,
};
use crate::util::is_valid_priority;

const ANALOG_INPUT_PROPERTIES_REQUIRED: &[PropertyIdentifier] = &[
    PropertyIdentifier::ObjectIdentifierProp,
    PropertyIdentifier::ObjectName,
    PropertyIdentifier::ObjectTypeProp,
    PropertyIdentifier::PresentValue,
    PropertyIdentifier::StatusFlags,
    PropertyIdentifier::EventState,
    PropertyIdentifier::OutOfService,
    PropertyIdentifier::Units,
];

const ANALOG_INPUT_PROPERTIES_OPTIONAL: &[PropertyIdentifier] = &[
    PropertyIdentifier::Description,
    PropertyIdentifier::Reliability,
    PropertyIdentifier::CovIncrement,
];

const ANALOG_VALUE_PROPERTIES_REQUIRED: &[PropertyIdentifier] = &[
    PropertyIdentifier::ObjectIdentifierProp,
    PropertyIdentifier::ObjectName,
    PropertyIdentifier::ObjectTypeProp,
    PropertyIdentifier::PresentValue,
    PropertyIdentifier::StatusFlags,
    PropertyIdentifier::EventState,
    PropertyIdentifier::OutOfService,
    PropertyIdentifier::Units,
];

const ANALOG_VALUE_PROPERTIES_OPTIONAL: &[PropertyIdentifier] = &[
    PropertyIdentifier::Description,
    PropertyIdentifier::PriorityArray,
    PropertyIdentifier::RelinquishDefault,
    PropertyIdentifier::CovIncrement,
];

/// One Analog-Input instance
#[derive(Debug, Clone)]
pub struct AnalogInput {
    pub instance: u32,
    pub object_name: String,
    pub description: String,
    pub present_value: f32,
    pub units: EngineeringUnits,
    pub reliability: Reliability,
    pub event_state: EventState,
    pub out_of_service: bool,
    pub cov_increment: f32,
}

impl AnalogInput {
    pub fn new(instance: u32, object_name: &str, units: EngineeringUnits) -> Self {
        Self {
            instance,
            object_name: object_name.into(),
            description: String::new(),
            present_value: 0.0,
            units,
            reliability: Reliability::NoFaultDetected,
            event_state: EventState::Normal,
            out_of_service: false,
            cov_increment: 0.1,
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

type AiReader = fn(&AnalogInput, &mut Vec<u8>) -> PropertyResult<usize>;

fn ai_read_object_identifier(point: &AnalogInput, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
    encode_with(buffer, |b| {
        crate::encoding::encode_application_object_id(b, ObjectType::AnalogInput.into(), point.instance)
    })
}

fn ai_read_object_name(point: &AnalogInput, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
    encode_with(buffer, |b| {
        crate::encoding::encode_application_string(b, &point.object_name)
    })
}

fn ai_read_object_type(_point: &AnalogInput, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
    encode_with(buffer, |b| {
        crate::encoding::encode_application_enumerated(b, u16::from(ObjectType::AnalogInput) as u32)
    })
}

fn ai_read_present_value(point: &AnalogInput, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
    encode_with(buffer, |b| {
        crate::encoding::encode_application_real(b, point.present_value)
    })
}

fn ai_read_status_flags(point: &AnalogInput, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
    encode_with(buffer, |b| {
        crate::encoding::encode_application_bit_string(b, &point.status_flags().to_bit_string())
    })
}

fn ai_read_event_state(point: &AnalogInput, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
    encode_with(buffer, |b| {
        crate::encoding::encode_application_enumerated(b, point.event_state as u32)
    })
}

fn ai_read_reliability(point: &AnalogInput, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
    encode_with(buffer, |b| {
        crate::encoding::encode_application_enumerated(b, point.reliability as u32)
    })
}

fn ai_read_out_of_service(point: &AnalogInput, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
    encode_with(buffer, |b| {
        crate::encoding::encode_application_boolean(b, point.out_of_service)
    })
}

fn ai_read_units(point: &AnalogInput, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
    encode_with(buffer, |b| {
        crate::encoding::encode_application_enumerated(b, u16::from(point.units) as u32)
    })
}

fn ai_read_description(point: &AnalogInput, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
    encode_with(buffer, |b| {
        crate::encoding::encode_application_string(b, &point.description)
    })
}

fn ai_read_cov_increment(point: &AnalogInput, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
    encode_with(buffer, |b| {
        crate::encoding::encode_application_real(b, point.cov_increment)
    })
}

/// Property dispatch table; an unknown property is a missing entry
const AI_READERS: &[(PropertyIdentifier, AiReader)] = &[
    (PropertyIdentifier::ObjectIdentifierProp, ai_read_object_identifier),
    (PropertyIdentifier::ObjectName, ai_read_object_name),
    (PropertyIdentifier::ObjectTypeProp, ai_read_object_type),
    (PropertyIdentifier::PresentValue, ai_read_present_value),
    (PropertyIdentifier::StatusFlags, ai_read_status_flags),
    (PropertyIdentifier::EventState, ai_read_event_state),
    (PropertyIdentifier::Reliability, ai_read_reliability),
    (PropertyIdentifier::OutOfService, ai_read_out_of_service),
    (PropertyIdentifier::Units, ai_read_units),
    (PropertyIdentifier::Description, ai_read_description),
    (PropertyIdentifier::CovIncrement, ai_read_cov_increment),
];

/// All Analog-Input instances of the device
#[derive(Debug, Default)]
pub struct AnalogInputTable {
    points: Vec<AnalogInput>,
}

impl AnalogInputTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance; keeps the table sorted by instance number
    pub fn add(&mut self, point: AnalogInput) {
        let position = self
            .points
            .partition_point(|existing| existing.instance < point.instance);
        self.points.insert(position, point);
    }

    pub fn get(&self, instance: u32) -> Option<&AnalogInput> {
        self.points.iter().find(|point| point.instance == instance)
    }

    pub fn get_mut(&mut self, instance: u32) -> Option<&mut AnalogInput> {
        self.points
            .iter_mut()
            .find(|point| point.instance == instance)
    }

    /// Update a hardware reading; ignored while out of service
    pub fn set_present_value(&mut self, instance: u32, value: f32) {
        if let Some(point) = self.get_mut(instance) {
            if !point.out_of_service {
                point.present_value = value;
            }
        }
    }
}

impl ObjectTable for AnalogInputTable {
    fn object_type(&self) -> ObjectType {
        ObjectType::AnalogInput
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
            required: ANALOG_INPUT_PROPERTIES_REQUIRED,
            optional: ANALOG_INPUT_PROPERTIES_OPTIONAL,
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
        let reader = AI_READERS
            .iter()
            .find(|(property, _)| *property == access.property)
            .map(|(_, reader)| reader)
            .ok_or_else(BacnetError::unknown_property)?;
        reader(point, buffer)
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
                // Writable only while the point is decoupled from hardware.
                if !point.out_of_service {
                    return Err(BacnetError::write_access_denied());
                }
                match value {
                    ApplicationValue::Real(new_value) => {
                        point.present_value = new_value;
                        Ok(())
                    }
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
            PropertyIdentifier::CovIncrement => match value {
                ApplicationValue::Real(increment) if increment >= 0.0 => {
                    point.cov_increment = increment;
                    Ok(())
                }
                ApplicationValue::Real(_) => Err(BacnetError::value_out_of_range()),
                _ => Err(BacnetError::invalid_data_type()),
            },
            property if AI_READERS.iter().any(|(p, _)| *p == property) => {
                Err(BacnetError::write_access_denied())
            }
            _ => Err(BacnetError::unknown_property()),
        }
    }
}

/// One commandable Analog-Value instance
#[derive(Debug, Clone)]
pub struct AnalogValue {
    pub instance: u32,
    pub object_name: String,
    pub description: String,
    pub units: EngineeringUnits,
    pub event_state: EventState,
    pub out_of_service: bool,
    pub priority_array: [Option<f32>; 16],
    pub relinquish_default: f32,
    pub cov_increment: f32,
}

impl AnalogValue {
    pub fn new(instance: u32, object_name: &str, units: EngineeringUnits) -> Self {
        Self {
            instance,
            object_name: object_name.into(),
            description: String::new(),
            units,
            event_state: EventState::Normal,
            out_of_service: false,
            priority_array: [None; 16],
            relinquish_default: 0.0,
            cov_increment: 0.1,
        }
    }

    /// Effective present value: highest active priority, else the default
    pub fn present_value(&self) -> f32 {
        self.priority_array
            .iter()
            .flatten()
            .next()
            .copied()
            .unwrap_or(self.relinquish_default)
    }
}

/// All Analog-Value instances of the device
#[derive(Debug, Default)]
pub struct AnalogValueTable {
    points: Vec<AnalogValue>,
}

impl AnalogValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, point: AnalogValue) {
        let position = self
            .points
            .partition_point(|existing| existing.instance < point.instance);
        self.points.insert(position, point);
    }

    pub fn get(&self, instance: u32) -> Option<&AnalogValue> {
        self.points.iter().find(|point| point.instance == instance)
    }

    pub fn get_mut(&mut self, instance: u32) -> Option<&mut AnalogValue> {
        self.points
            .iter_mut()
            .find(|point| point.instance == instance)
    }
}

impl ObjectTable for AnalogValueTable {
    fn object_type(&self) -> ObjectType {
        ObjectType::AnalogValue
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
            required: ANALOG_VALUE_PROPERTIES_REQUIRED,
            optional: ANALOG_VALUE_PROPERTIES_OPTIONAL,
            proprietary: &[],
        }
    }

    fn read_property(&self, access: &ReadAccess, buffer: &mut Vec<u8>) -> PropertyResult<usize> {
        let point = self
            .get(access.object.instance)
            .ok_or_else(BacnetError::unknown_object)?;

        if access.property == PropertyIdentifier::PriorityArray {
            return read_priority_array(&point.priority_array, access.array_index, buffer);
        }
        if access.array_index.is_some() {
            return Err(BacnetError::invalid_array_index());
        }

        match access.property {
            PropertyIdentifier::ObjectIdentifierProp => encode_with(buffer, |b| {
                crate::encoding::encode_application_object_id(
                    b,
                    ObjectType::AnalogValue.into(),
                    point.instance,
                )
            }),
            PropertyIdentifier::ObjectName => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &point.object_name)
            }),
            PropertyIdentifier::ObjectTypeProp => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(
                    b,
                    u16::from(ObjectType::AnalogValue) as u32,
                )
            }),
            PropertyIdentifier::PresentValue => encode_with(buffer, |b| {
                crate::encoding::encode_application_real(b, point.present_value())
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
            PropertyIdentifier::Units => encode_with(buffer, |b| {
                crate::encoding::encode_application_enumerated(b, u16::from(point.units) as u32)
            }),
            PropertyIdentifier::Description => encode_with(buffer, |b| {
                crate::encoding::encode_application_string(b, &point.description)
            }),
            PropertyIdentifier::RelinquishDefault => encode_with(buffer, |b| {
                crate::encoding::encode_application_real(b, point.relinquish_default)
            }),
            PropertyIdentifier::CovIncrement => encode_with(buffer, |b| {
                crate::encoding::encode_application_real(b, point.cov_increment)
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
                let priority = access.priority.unwrap_or(16);
                if !is_valid_priority(priority) {
                    return Err(BacnetError::value_out_of_range());
                }
                let slot = (priority - 1) as usize;
                match value {
                    ApplicationValue::Real(new_value) => {
                        point.priority_array[slot] = Some(new_value);
                        Ok(())
                    }
                    // Writing Null relinquishes the priority slot.
                    ApplicationValue::Null => {
                        point.priority_array[slot] = None;
                        Ok(())
                    }
                    _ => Err(BacnetError::invalid_data_type()),
                }
            }
            PropertyIdentifier::RelinquishDefault => match value {
                ApplicationValue::Real(new_value) => {
                    point.relinquish_default = new_value;
                    Ok(())
                }
                _ => Err(BacnetError::invalid_data_type()),
            },
            PropertyIdentifier::OutOfService => match value {
                ApplicationValue::Boolean(out_of_service) => {
                    point.out_of_service = out_of_service;
                    Ok(())
                }
                _ => Err(BacnetError::invalid_data_type()),
            },
            PropertyIdentifier::CovIncrement => match value {
                ApplicationValue::Real(increment) if increment >= 0.0 => {
                    point.cov_increment = increment;
                    Ok(())
                }
                _ => Err(BacnetError::invalid_data_type()),
            },
            PropertyIdentifier::ObjectIdentifierProp
            | PropertyIdentifier::ObjectName
            | PropertyIdentifier::ObjectTypeProp
            | PropertyIdentifier::StatusFlags
            | PropertyIdentifier::EventState
            | PropertyIdentifier::Units
            | PropertyIdentifier::Description
            | PropertyIdentifier::PriorityArray => Err(BacnetError::write_access_denied()),
            _ => Err(BacnetError::unknown_property()),
        }
    }
}

/// Encode a 16-slot priority array, as a whole or one element.
///
/// Array index 0 is the element count; 1..=16 address the slots.
pub(crate) fn read_priority_array(
    slots: &[Option<f32>; 16],
    array_index: Option<u32>,
    buffer: &mut Vec<u8>,
) -> PropertyResult<usize> {
    let encode_slot = |b: &mut Vec<u8>, slot: Option<f32>| match slot {
        Some(value) => crate::encoding::encode_application_real(b, value),
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
