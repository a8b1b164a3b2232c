//! Object Database
//!
//! Owns the device object and the per-type object tables, and provides the
//! device-wide ReadProperty/WriteProperty/ReadRange façade the service
//! handlers call into. The object-list array is composed here, since only
//! the database sees every table.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use log::debug;

use crate::object::analog::{AnalogInputTable, AnalogValueTable};
use crate::object::binary::{BinaryInputTable, BinaryValueTable};
use crate::object::device::DeviceObject;
use crate::object::trendlog::TrendLogTable;
use crate::object::{
    BacnetError, ObjectIdentifier, ObjectTable, ObjectType, PropertyIdentifier, PropertyResult,
    ReadAccess, WriteAccess,
};
use crate::service::readprop::{ReadPropertyAck, ReadPropertyRequest};
use crate::service::readrange::{ReadRangeAck, ReadRangeRequest};
use crate::service::writeprop::WritePropertyRequest;

/// Wildcard device instance addressing "whichever device you are"
pub const WILDCARD_DEVICE_INSTANCE: u32 = 0x3FFFFF;

/// The device-wide object table
pub struct ObjectDatabase {
    pub device: DeviceObject,
    pub analog_inputs: AnalogInputTable,
    pub analog_values: AnalogValueTable,
    pub binary_inputs: BinaryInputTable,
    pub binary_values: BinaryValueTable,
    pub trend_logs: TrendLogTable,
    revision: u32,
}

impl ObjectDatabase {
    pub fn new(device: DeviceObject) -> Self {
        Self {
            device,
            analog_inputs: AnalogInputTable::new(),
            analog_values: AnalogValueTable::new(),
            binary_inputs: BinaryInputTable::new(),
            binary_values: BinaryValueTable::new(),
            trend_logs: TrendLogTable::new(),
            revision: 1,
        }
    }

    /// Database revision; changes whenever the object population changes
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Call after adding or removing objects
    pub fn bump_revision(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    fn tables(&self) -> [&dyn ObjectTable; 5] {
        [
            &self.analog_inputs,
            &self.analog_values,
            &self.binary_inputs,
            &self.binary_values,
            &self.trend_logs,
        ]
    }

    fn table_for(&self, object_type: ObjectType) -> Option<&dyn ObjectTable> {
        self.tables()
            .into_iter()
            .find(|table| table.object_type() == object_type)
    }

    fn table_for_mut(&mut self, object_type: ObjectType) -> Option<&mut dyn ObjectTable> {
        let tables: [&mut dyn ObjectTable; 5] = [
            &mut self.analog_inputs,
            &mut self.analog_values,
            &mut self.binary_inputs,
            &mut self.binary_values,
            &mut self.trend_logs,
        ];
        tables
            .into_iter()
            .find(|table| table.object_type() == object_type)
    }

    fn is_this_device(&self, object: &ObjectIdentifier) -> bool {
        object.object_type == ObjectType::Device
            && (object.instance == self.device.instance
                || object.instance == WILDCARD_DEVICE_INSTANCE)
    }

    /// Total object count, the device object included
    pub fn object_count(&self) -> u32 {
        1 + self.tables().iter().map(|table| table.count()).sum::<u32>()
    }

    /// Identifier of the 1-based object-list element
    pub fn object_list_element(&self, element: u32) -> Option<ObjectIdentifier> {
        if element == 0 {
            return None;
        }
        if element == 1 {
            return Some(ObjectIdentifier::new(ObjectType::Device, self.device.instance));
        }
        let mut index = element - 2;
        for table in self.tables() {
            if index < table.count() {
                let instance = table.index_to_instance(index)?;
                return Some(ObjectIdentifier::new(table.object_type(), instance));
            }
            index -= table.count();
        }
        None
    }

    /// Whether the named object exists on this device
    pub fn contains(&self, object: &ObjectIdentifier) -> bool {
        if self.is_this_device(object) {
            return true;
        }
        self.table_for(object.object_type)
            .map(|table| table.valid_instance(object.instance))
            .unwrap_or(false)
    }

    fn read_object_list(
        &self,
        array_index: Option<u32>,
        max_bytes: usize,
        buffer: &mut Vec<u8>,
    ) -> PropertyResult<usize> {
        let count = self.object_count();
        match array_index {
            Some(0) => super::encode_with(buffer, |b| {
                crate::encoding::encode_application_unsigned(b, count as u64)
            }),
            Some(element) => {
                let id = self
                    .object_list_element(element)
                    .ok_or_else(BacnetError::invalid_array_index)?;
                let (object_type, instance) = id.raw();
                super::encode_with(buffer, |b| {
                    crate::encoding::encode_application_object_id(b, object_type, instance)
                })
            }
            None => {
                let start = buffer.len();
                for element in 1..=count {
                    // Each identifier encodes to 5 octets; stop rather than
                    // overflow the reply APDU.
                    if buffer.len() - start + 5 > max_bytes {
                        return Err(BacnetError::no_space_for_object());
                    }
                    let id = self
                        .object_list_element(element)
                        .ok_or_else(BacnetError::invalid_array_index)?;
                    let (object_type, instance) = id.raw();
                    super::encode_with(buffer, |b| {
                        crate::encoding::encode_application_object_id(b, object_type, instance)
                    })?;
                }
                Ok(buffer.len() - start)
            }
        }
    }

    /// Device-wide property read; `max_bytes` bounds the encoded value
    pub fn read_property(
        &self,
        access: &ReadAccess,
        max_bytes: usize,
        buffer: &mut Vec<u8>,
    ) -> PropertyResult<usize> {
        if self.is_this_device(&access.object) {
            if access.property == PropertyIdentifier::ObjectList {
                return self.read_object_list(access.array_index, max_bytes, buffer);
            }
            return self
                .device
                .read_property(access, &self.tables(), self.revision, buffer);
        }
        let table = self
            .table_for(access.object.object_type)
            .ok_or_else(BacnetError::unknown_object)?;
        table.read_property(access, buffer)
    }

    /// Device-wide property write
    pub fn write_property(&mut self, access: &WriteAccess<'_>) -> PropertyResult<()> {
        if self.is_this_device(&access.object) {
            return self.device.write_property(access);
        }
        let Some(table) = self.table_for_mut(access.object.object_type) else {
            return Err(BacnetError::unknown_object());
        };
        table.write_property(access)
    }

    /// Build a ReadProperty service-ack body for a decoded request
    pub fn read_property_ack(
        &self,
        request: &ReadPropertyRequest,
        max_apdu: usize,
    ) -> PropertyResult<Vec<u8>> {
        let access = ReadAccess {
            object: request.object_identifier,
            property: request.property_identifier,
            array_index: request.array_index,
        };
        // Leave headroom for the ack's own identifier/property echo.
        let max_value_bytes = max_apdu.saturating_sub(32);
        let mut value = Vec::new();
        self.read_property(&access, max_value_bytes, &mut value)?;

        let mut ack = Vec::new();
        let echo_object = if access.object.instance == WILDCARD_DEVICE_INSTANCE
            && access.object.object_type == ObjectType::Device
        {
            ObjectIdentifier::new(ObjectType::Device, self.device.instance)
        } else {
            access.object
        };
        ReadPropertyAck::encode(
            &mut ack,
            echo_object,
            request.property_identifier,
            request.array_index,
            &value,
        )
        .map_err(|_| BacnetError::services_other())?;
        Ok(ack)
    }

    /// Execute a decoded WriteProperty request
    pub fn execute_write(&mut self, request: &WritePropertyRequest) -> PropertyResult<()> {
        let access = WriteAccess {
            object: request.object_identifier,
            property: request.property_identifier,
            array_index: request.array_index,
            application_data: &request.value,
            priority: request.priority,
        };
        debug!(
            "write {:?} instance {} property {:?}",
            access.object.object_type, access.object.instance, access.property
        );
        self.write_property(&access)
    }

    /// Build a ReadRange service-ack body for a decoded request
    pub fn read_range_ack(
        &self,
        request: &ReadRangeRequest,
        max_apdu: usize,
    ) -> PropertyResult<Vec<u8>> {
        if request.object_identifier.object_type != ObjectType::TrendLog {
            return Err(BacnetError::unknown_object());
        }
        if request.property_identifier != PropertyIdentifier::LogBuffer {
            return Err(BacnetError::unknown_property());
        }
        let max_item_bytes = max_apdu.saturating_sub(64);
        let readout = self.trend_logs.read_range(
            request.object_identifier.instance,
            &request.range,
            max_item_bytes,
        )?;

        let ack = ReadRangeAck {
            object_identifier: request.object_identifier,
            property_identifier: request.property_identifier,
            array_index: request.array_index,
            result_flags: ReadRangeAck::result_flags(
                readout.first_item,
                readout.last_item,
                readout.more_items,
            ),
            item_count: readout.item_count,
            item_data: readout.item_data,
            first_sequence_number: readout.first_sequence_number,
        };
        let mut body = Vec::new();
        ack.encode(&mut body).map_err(|_| BacnetError::services_other())?;
        Ok(body)
    }

    /// Periodic processing for all tables
    pub fn tick(&mut self, elapsed_ms: u32) {
        self.analog_inputs.tick(elapsed_ms);
        self.analog_values.tick(elapsed_ms);
        self.binary_inputs.tick(elapsed_ms);
        self.binary_values.tick(elapsed_ms);
        self.trend_logs.tick(elapsed_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::ApplicationValue;
    use crate::object::analog::{AnalogInput, AnalogValue};
    use crate::object::binary::BinaryInput;
    use crate::object::trendlog::{DeviceObjectPropertyReference, TrendLog};
    use crate::object::EngineeringUnits;

    fn build_database() -> ObjectDatabase {
        let mut db = ObjectDatabase::new(DeviceObject::new(123, "controller"));
        db.analog_inputs
            .add(AnalogInput::new(101, "OAT", EngineeringUnits::DegreesCelsius));
        db.analog_inputs
            .add(AnalogInput::new(102, "RAT", EngineeringUnits::DegreesCelsius));
        db.analog_values
            .add(AnalogValue::new(1, "SP", EngineeringUnits::DegreesCelsius));
        db.binary_inputs.add(BinaryInput::new(1, "DI-1"));
        db.trend_logs.add(TrendLog::new(
            1,
            "TL-1",
            DeviceObjectPropertyReference {
                object: ObjectIdentifier::new(ObjectType::AnalogInput, 101),
                property: PropertyIdentifier::PresentValue,
                array_index: None,
                device: None,
            },
        ));
        db
    }

    #[test]
    fn test_object_list_enumeration() {
        let db = build_database();
        assert_eq!(db.object_count(), 6);

        assert_eq!(
            db.object_list_element(1),
            Some(ObjectIdentifier::new(ObjectType::Device, 123))
        );
        assert_eq!(
            db.object_list_element(2),
            Some(ObjectIdentifier::new(ObjectType::AnalogInput, 101))
        );
        assert_eq!(
            db.object_list_element(3),
            Some(ObjectIdentifier::new(ObjectType::AnalogInput, 102))
        );
        assert_eq!(
            db.object_list_element(6),
            Some(ObjectIdentifier::new(ObjectType::TrendLog, 1))
        );
        assert_eq!(db.object_list_element(7), None);
    }

    #[test]
    fn test_object_list_read_count_and_element() {
        let db = build_database();
        let access = ReadAccess {
            object: ObjectIdentifier::new(ObjectType::Device, 123),
            property: PropertyIdentifier::ObjectList,
            array_index: Some(0),
        };
        let mut buffer = Vec::new();
        db.read_property(&access, 1400, &mut buffer).unwrap();
        assert_eq!(buffer, [0x21, 6]);

        let mut buffer = Vec::new();
        db.read_property(
            &ReadAccess {
                array_index: None,
                ..access
            },
            1400,
            &mut buffer,
        )
        .unwrap();
        // Six identifiers, five octets each.
        assert_eq!(buffer.len(), 30);
    }

    #[test]
    fn test_object_list_overflow() {
        let db = build_database();
        let access = ReadAccess {
            object: ObjectIdentifier::new(ObjectType::Device, 123),
            property: PropertyIdentifier::ObjectList,
            array_index: None,
        };
        let mut buffer = Vec::new();
        assert_eq!(
            db.read_property(&access, 20, &mut buffer).unwrap_err(),
            BacnetError::no_space_for_object()
        );
    }

    #[test]
    fn test_wildcard_device_instance() {
        let db = build_database();
        let access = ReadAccess {
            object: ObjectIdentifier::new(ObjectType::Device, WILDCARD_DEVICE_INSTANCE),
            property: PropertyIdentifier::ObjectIdentifierProp,
            array_index: None,
        };
        let mut buffer = Vec::new();
        db.read_property(&access, 1400, &mut buffer).unwrap();
        assert_eq!(buffer, [0xC4, 0x02, 0x00, 0x00, 0x7B]);
    }

    #[test]
    fn test_routing_to_tables() {
        let mut db = build_database();
        db.analog_inputs.set_present_value(101, 50.0);

        let request = ReadPropertyRequest::new(
            ObjectIdentifier::new(ObjectType::AnalogInput, 101),
            PropertyIdentifier::PresentValue,
        );
        let ack_body = db.read_property_ack(&request, 1476).unwrap();
        let ack = crate::service::readprop::ReadPropertyAck::decode(&ack_body).unwrap();
        let (value, _) = ApplicationValue::decode(ack.value).unwrap();
        assert_eq!(value, ApplicationValue::Real(50.0));
    }

    #[test]
    fn test_unknown_object_errors() {
        let db = build_database();
        let access = ReadAccess {
            object: ObjectIdentifier::new(ObjectType::AnalogInput, 999),
            property: PropertyIdentifier::PresentValue,
            array_index: None,
        };
        let mut buffer = Vec::new();
        assert_eq!(
            db.read_property(&access, 1400, &mut buffer).unwrap_err(),
            BacnetError::unknown_object()
        );

        let access = ReadAccess {
            object: ObjectIdentifier::new(ObjectType::MultiStateInput, 1),
            property: PropertyIdentifier::PresentValue,
            array_index: None,
        };
        let mut buffer = Vec::new();
        assert_eq!(
            db.read_property(&access, 1400, &mut buffer).unwrap_err(),
            BacnetError::unknown_object()
        );
    }

    #[test]
    fn test_write_through_facade() {
        let mut db = build_database();
        let request = WritePropertyRequest::new(
            ObjectIdentifier::new(ObjectType::AnalogValue, 1),
            PropertyIdentifier::PresentValue,
            &ApplicationValue::Real(22.5),
        )
        .unwrap()
        .with_priority(8);
        db.execute_write(&request).unwrap();
        assert_eq!(db.analog_values.get(1).unwrap().present_value(), 22.5);
    }

    #[test]
    fn test_read_range_facade() {
        let db = build_database();
        let request = crate::service::readrange::ReadRangeRequest::new(
            ObjectIdentifier::new(ObjectType::TrendLog, 1),
            PropertyIdentifier::LogBuffer,
        );
        // Empty log: valid ack with zero items.
        let body = db.read_range_ack(&request, 1476).unwrap();
        let ack = crate::service::readrange::ReadRangeAck::decode(&body).unwrap();
        assert_eq!(ack.item_count, 0);
    }
}
