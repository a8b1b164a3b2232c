//! BACnet Object Model
//!
//! Objects are the modeling concept of BACnet: each object is a typed
//! collection of properties addressed by `(object-type, instance)`. This
//! module defines the shared vocabulary (object types, property
//! identifiers, error classes and codes, status flags) and the
//! [`ObjectTable`] trait every object implementation provides:
//!
//! - instance validity and `index ↔ instance` enumeration
//! - required/optional/proprietary property lists
//! - `read_property` / `write_property` with BACnet error pairs
//!
//! Implementations live in the submodules: [`device`], [`analog`],
//! [`binary`], [`trendlog`], with [`database`] tying the per-type tables
//! into one device-wide façade.

pub mod analog;
pub mod binary;
pub mod database;
pub mod device;
pub mod trendlog;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::encoding::{BitString, EncodingError};
use crate::vendor_range_enum;

pub use database::ObjectDatabase;

vendor_range_enum! {
    /// BACnet object types; 128..=1023 are vendor-proprietary
    ObjectType {
        AnalogInput = 0,
        AnalogOutput = 1,
        AnalogValue = 2,
        BinaryInput = 3,
        BinaryOutput = 4,
        BinaryValue = 5,
        Calendar = 6,
        Command = 7,
        Device = 8,
        EventEnrollment = 9,
        File = 10,
        Group = 11,
        Loop = 12,
        MultiStateInput = 13,
        MultiStateOutput = 14,
        NotificationClass = 15,
        Program = 16,
        Schedule = 17,
        Averaging = 18,
        MultiStateValue = 19,
        TrendLog = 20,
        LifeSafetyPoint = 21,
        LifeSafetyZone = 22,
        Accumulator = 23,
        PulseConverter = 24,
    },
    u16,
    128..=1023
}

vendor_range_enum! {
    /// BACnet property identifiers; 512..=4194303 are vendor-proprietary
    PropertyIdentifier {
        AckedTransitions = 0,
        AckRequired = 1,
        Action = 2,
        ActionText = 3,
        ActiveText = 4,
        AlarmValue = 6,
        All = 8,
        ApduSegmentTimeout = 10,
        ApduTimeout = 11,
        ApplicationSoftwareVersion = 12,
        ChangeOfStateCount = 15,
        ChangeOfStateTime = 16,
        CovIncrement = 22,
        DaylightSavingsStatus = 24,
        Deadband = 25,
        Description = 28,
        DeviceAddressBinding = 30,
        DeviceType = 31,
        ElapsedActiveTime = 33,
        EventEnable = 35,
        EventState = 36,
        EventType = 37,
        FirmwareRevision = 44,
        HighLimit = 45,
        InactiveText = 46,
        LocalDate = 56,
        LocalTime = 57,
        Location = 58,
        LowLimit = 59,
        MaxApduLengthAccepted = 62,
        MaxInfoFrames = 63,
        MaxMaster = 64,
        MaxPresValue = 65,
        MinPresValue = 69,
        ModelName = 70,
        NotifyType = 72,
        NumberOfApduRetries = 73,
        ObjectIdentifierProp = 75,
        ObjectList = 76,
        ObjectName = 77,
        ObjectTypeProp = 79,
        OutOfService = 81,
        Polarity = 84,
        PresentValue = 85,
        PriorityArray = 87,
        ProtocolObjectTypesSupported = 96,
        ProtocolServicesSupported = 97,
        ProtocolVersion = 98,
        Reliability = 103,
        RelinquishDefault = 104,
        Resolution = 106,
        SegmentationSupported = 107,
        StatusFlags = 111,
        SystemStatus = 112,
        Units = 117,
        UpdateInterval = 118,
        UtcOffset = 119,
        VendorIdentifier = 120,
        VendorName = 121,
        AttemptedSamples = 124,
        AverageValue = 125,
        BufferSize = 126,
        ClientCovIncrement = 127,
        CovResubscriptionInterval = 128,
        EventTimeStamps = 130,
        LogBuffer = 131,
        LogDeviceObjectProperty = 132,
        Enable = 133,
        LogInterval = 134,
        ProtocolRevision = 139,
        RecordsSinceNotification = 140,
        RecordCount = 141,
        StartTime = 142,
        StopTime = 143,
        StopWhenFull = 144,
        TotalRecordCount = 145,
        ValidSamples = 146,
        DatabaseRevision = 155,
        LastRestoreTime = 157,
        AlignIntervals = 193,
        IntervalOffset = 195,
        LoggingType = 197,
        Trigger = 205,
    },
    u32,
    512..=4194303
}

vendor_range_enum! {
    /// Engineering units; 256..=65535 are vendor-proprietary
    EngineeringUnits {
        Amperes = 3,
        Volts = 5,
        KilowattHours = 19,
        Hertz = 27,
        Lux = 37,
        Watts = 47,
        Kilowatts = 48,
        Pascals = 53,
        Kilopascals = 54,
        DegreesCelsius = 62,
        DegreesFahrenheit = 64,
        LitersPerSecond = 87,
        NoUnits = 95,
        PartsPerMillion = 96,
        Percent = 98,
        PercentRelativeHumidity = 29,
    },
    u16,
    256..=65535
}

vendor_range_enum! {
    /// BACnet error codes; 256..=65535 are vendor-proprietary.
    ///
    /// The 142..=152 block carries the BACnet/SC additions from 135-2020
    /// Addendum cc.
    ErrorCode {
        Other = 0,
        ConfigurationInProgress = 2,
        DeviceBusy = 3,
        InconsistentParameters = 7,
        InvalidDataType = 9,
        MissingRequiredParameter = 16,
        NoObjectsOfSpecifiedType = 17,
        NoSpaceForObject = 18,
        NoSpaceToAddListElement = 19,
        NoSpaceToWriteProperty = 20,
        OperationalProblem = 25,
        ReadAccessDenied = 27,
        ServiceRequestDenied = 29,
        Timeout = 30,
        UnknownObject = 31,
        UnknownProperty = 32,
        UnsupportedObjectType = 36,
        ValueOutOfRange = 37,
        WriteAccessDenied = 40,
        CharacterSetNotSupported = 41,
        InvalidArrayIndex = 42,
        CovSubscriptionFailed = 43,
        NotCovProperty = 44,
        OptionalFunctionalityNotSupported = 45,
        InvalidConfigurationData = 46,
        DatatypeNotSupported = 47,
        PropertyIsNotAnArray = 50,
        LogBufferFull = 75,
        OutOfMemory = 142,
        BvlcFunctionUnknown = 143,
        BvlcProprietaryFunctionUnknown = 144,
        HeaderEncodingError = 145,
        HeaderNotUnderstood = 146,
        MessageIncomplete = 147,
        NotABacnetScHub = 148,
        PayloadExpected = 149,
        UnexpectedData = 150,
        NodeDuplicateVmac = 151,
        HttpError = 152,
    },
    u16,
    256..=65535
}

/// BACnet error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorClass {
    Device = 0,
    Object = 1,
    Property = 2,
    Resources = 3,
    Security = 4,
    Services = 5,
    Vt = 6,
    Communication = 7,
}

/// An error class/code pair as carried in Error PDUs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacnetError {
    pub class: ErrorClass,
    pub code: ErrorCode,
}

impl BacnetError {
    pub fn new(class: ErrorClass, code: ErrorCode) -> Self {
        Self { class, code }
    }

    pub fn unknown_object() -> Self {
        Self::new(ErrorClass::Object, ErrorCode::UnknownObject)
    }

    pub fn unknown_property() -> Self {
        Self::new(ErrorClass::Property, ErrorCode::UnknownProperty)
    }

    pub fn write_access_denied() -> Self {
        Self::new(ErrorClass::Property, ErrorCode::WriteAccessDenied)
    }

    pub fn invalid_data_type() -> Self {
        Self::new(ErrorClass::Property, ErrorCode::InvalidDataType)
    }

    pub fn value_out_of_range() -> Self {
        Self::new(ErrorClass::Property, ErrorCode::ValueOutOfRange)
    }

    pub fn invalid_array_index() -> Self {
        Self::new(ErrorClass::Property, ErrorCode::InvalidArrayIndex)
    }

    pub fn no_space_for_object() -> Self {
        Self::new(ErrorClass::Services, ErrorCode::NoSpaceForObject)
    }

    pub fn log_buffer_full() -> Self {
        Self::new(ErrorClass::Object, ErrorCode::LogBufferFull)
    }

    pub fn services_other() -> Self {
        Self::new(ErrorClass::Services, ErrorCode::Other)
    }

    /// The raw pair for an Error PDU
    pub fn wire_pair(&self) -> (u32, u32) {
        (self.class as u32, u16::from(self.code) as u32)
    }
}

impl From<EncodingError> for BacnetError {
    fn from(_: EncodingError) -> Self {
        BacnetError::invalid_data_type()
    }
}

/// Result type for object property access
pub type PropertyResult<T> = core::result::Result<T, BacnetError>;

/// An object identifier: type plus 22-bit instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectIdentifier {
    #[cfg_attr(feature = "serde", serde(with = "object_type_serde"))]
    pub object_type: ObjectType,
    pub instance: u32,
}

#[cfg(feature = "serde")]
mod object_type_serde {
    use super::ObjectType;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &ObjectType, serializer: S) -> Result<S::Ok, S::Error> {
        u16::from(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ObjectType, D::Error> {
        Ok(ObjectType::from(u16::deserialize(deserializer)?))
    }
}

impl ObjectIdentifier {
    pub fn new(object_type: ObjectType, instance: u32) -> Self {
        Self {
            object_type,
            instance,
        }
    }

    /// Build from the raw wire pair
    pub fn from_raw(object_type: u16, instance: u32) -> Self {
        Self {
            object_type: ObjectType::from(object_type),
            instance,
        }
    }

    /// The raw wire pair
    pub fn raw(&self) -> (u16, u32) {
        (self.object_type.into(), self.instance)
    }

    pub fn is_valid(&self) -> bool {
        u16::from(self.object_type) <= 0x3FF && self.instance <= 0x3FFFFF
    }
}

/// Segmentation support advertised in I-Am
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Segmentation {
    SegmentedBoth = 0,
    SegmentedTransmit = 1,
    SegmentedReceive = 2,
    NoSegmentation = 3,
}

impl TryFrom<u32> for Segmentation {
    type Error = EncodingError;

    fn try_from(value: u32) -> core::result::Result<Self, EncodingError> {
        match value {
            0 => Ok(Segmentation::SegmentedBoth),
            1 => Ok(Segmentation::SegmentedTransmit),
            2 => Ok(Segmentation::SegmentedReceive),
            3 => Ok(Segmentation::NoSegmentation),
            _ => Err(EncodingError::ValueOutOfRange),
        }
    }
}

/// Event state of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EventState {
    #[default]
    Normal = 0,
    Fault = 1,
    OffNormal = 2,
    HighLimit = 3,
    LowLimit = 4,
    LifeSafetyAlarm = 5,
}

/// Reliability of an input or output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Reliability {
    #[default]
    NoFaultDetected = 0,
    NoSensor = 1,
    OverRange = 2,
    UnderRange = 3,
    OpenLoop = 4,
    ShortedLoop = 5,
    NoOutput = 6,
    UnreliableOther = 7,
}

/// Binary input polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Polarity {
    #[default]
    Normal = 0,
    Reverse = 1,
}

/// Binary present value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum BinaryPv {
    #[default]
    Inactive = 0,
    Active = 1,
}

bitflags::bitflags! {
    /// The four standard status flags, in BACnet bit order
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusFlags: u8 {
        const IN_ALARM = 0b0001;
        const FAULT = 0b0010;
        const OVERRIDDEN = 0b0100;
        const OUT_OF_SERVICE = 0b1000;
    }
}

impl StatusFlags {
    /// The 4-bit status-flags bit string
    pub fn to_bit_string(self) -> BitString {
        let mut bits = BitString::new();
        let _ = bits.set_bit(0, self.contains(StatusFlags::IN_ALARM));
        let _ = bits.set_bit(1, self.contains(StatusFlags::FAULT));
        let _ = bits.set_bit(2, self.contains(StatusFlags::OVERRIDDEN));
        let _ = bits.set_bit(3, self.contains(StatusFlags::OUT_OF_SERVICE));
        bits
    }
}

/// Required/optional/proprietary property identifier lists of an object type
#[derive(Debug, Clone, Copy)]
pub struct PropertyLists {
    pub required: &'static [PropertyIdentifier],
    pub optional: &'static [PropertyIdentifier],
    pub proprietary: &'static [PropertyIdentifier],
}

/// A decoded ReadProperty target
#[derive(Debug, Clone, Copy)]
pub struct ReadAccess {
    pub object: ObjectIdentifier,
    pub property: PropertyIdentifier,
    pub array_index: Option<u32>,
}

/// A decoded WriteProperty target with the value octets
#[derive(Debug, Clone, Copy)]
pub struct WriteAccess<'a> {
    pub object: ObjectIdentifier,
    pub property: PropertyIdentifier,
    pub array_index: Option<u32>,
    /// Application-encoded value (content of `[3]`)
    pub application_data: &'a [u8],
    pub priority: Option<u8>,
}

/// Run an encoder against the buffer, returning the octets appended
pub(crate) fn encode_with<F>(buffer: &mut Vec<u8>, encode: F) -> PropertyResult<usize>
where
    F: FnOnce(&mut Vec<u8>) -> crate::encoding::Result<()>,
{
    let start = buffer.len();
    encode(buffer)?;
    Ok(buffer.len() - start)
}

/// The capability set every object type provides.
///
/// A table manages all instances of one object type; the device-wide
/// [`ObjectDatabase`] composes the tables and routes access by object type.
pub trait ObjectTable {
    fn object_type(&self) -> ObjectType;

    /// Number of instances
    fn count(&self) -> u32;

    fn valid_instance(&self, instance: u32) -> bool;

    /// Instance number of the 0-based index, for object-list enumeration
    fn index_to_instance(&self, index: u32) -> Option<u32>;

    fn instance_to_index(&self, instance: u32) -> Option<u32>;

    fn property_lists(&self) -> PropertyLists;

    /// Encode the property value(s) into `buffer`, returning the octet
    /// count appended
    fn read_property(&self, access: &ReadAccess, buffer: &mut Vec<u8>) -> PropertyResult<usize>;

    fn write_property(&mut self, access: &WriteAccess<'_>) -> PropertyResult<()>;

    /// Periodic processing (sampling, schedule evaluation); default none
    fn tick(&mut self, _elapsed_ms: u32) {}
}
