//! BACnet Service Encoders and Decoders
//!
//! One submodule per service family, each exposing request/ack structs with
//! `encode`/`decode` pairs built on the tagged codec:
//!
//! - [`whois`] — Who-Is and I-Am device discovery
//! - [`whoami`] — Who-Am-I and You-Are address assignment
//! - [`readprop`] — ReadProperty request and ack
//! - [`writeprop`] — WriteProperty request
//! - [`writegroup`] — WriteGroup with streaming change-list decode
//! - [`cov`] — SubscribeCOV and COV notifications
//! - [`readrange`] — ReadRange request and ack
//!
//! Service decoders validate tag order and value ranges; each failure names
//! the offending field so handlers can answer with the right Reject reason.

pub mod cov;
pub mod readprop;
pub mod readrange;
pub mod whoami;
pub mod whois;
pub mod writegroup;
pub mod writeprop;

#[cfg(feature = "std")]
use std::error::Error;

#[cfg(not(feature = "std"))]
use core::fmt;

#[cfg(feature = "std")]
use std::fmt;

use crate::encoding::EncodingError;

/// Result type for service encode/decode operations
#[cfg(feature = "std")]
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(not(feature = "std"))]
pub type Result<T> = core::result::Result<T, ServiceError>;

/// Errors from service-level encoding and decoding
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// Tagged content failed to decode
    Encoding(EncodingError),
    /// A required field is absent; names the field
    MissingParameter(&'static str),
    /// A field decoded but violates its range; names the field
    ValueOutOfRange(&'static str),
    /// A field appeared out of order or where none is allowed; names it
    UnexpectedField(&'static str),
    /// Service choice octet is not a known service
    UnknownService(u8),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Encoding(e) => write!(f, "Service encoding: {}", e),
            ServiceError::MissingParameter(field) => {
                write!(f, "Missing required parameter: {}", field)
            }
            ServiceError::ValueOutOfRange(field) => write!(f, "Value out of range: {}", field),
            ServiceError::UnexpectedField(field) => write!(f, "Unexpected field: {}", field),
            ServiceError::UnknownService(choice) => write!(f, "Unknown service choice {}", choice),
        }
    }
}

#[cfg(feature = "std")]
impl Error for ServiceError {}

impl From<EncodingError> for ServiceError {
    fn from(value: EncodingError) -> Self {
        ServiceError::Encoding(value)
    }
}

impl ServiceError {
    /// The Reject reason a confirmed-service handler answers with when the
    /// request body fails to decode
    pub fn reject_reason(&self) -> RejectReason {
        match self {
            ServiceError::Encoding(EncodingError::Truncated) => {
                RejectReason::MissingRequiredParameter
            }
            ServiceError::Encoding(_) => RejectReason::InvalidTag,
            ServiceError::MissingParameter(_) => RejectReason::MissingRequiredParameter,
            ServiceError::ValueOutOfRange(_) => RejectReason::ParameterOutOfRange,
            ServiceError::UnexpectedField(_) => RejectReason::TooManyArguments,
            ServiceError::UnknownService(_) => RejectReason::UnrecognizedService,
        }
    }
}

/// Confirmed service choices (clause 21)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfirmedServiceChoice {
    AcknowledgeAlarm = 0,
    ConfirmedCovNotification = 1,
    ConfirmedEventNotification = 2,
    GetAlarmSummary = 3,
    GetEnrollmentSummary = 4,
    SubscribeCov = 5,
    AtomicReadFile = 6,
    AtomicWriteFile = 7,
    AddListElement = 8,
    RemoveListElement = 9,
    CreateObject = 10,
    DeleteObject = 11,
    ReadProperty = 12,
    ReadPropertyMultiple = 14,
    WriteProperty = 15,
    WritePropertyMultiple = 16,
    DeviceCommunicationControl = 17,
    ConfirmedPrivateTransfer = 18,
    ConfirmedTextMessage = 19,
    ReinitializeDevice = 20,
    VtOpen = 21,
    VtClose = 22,
    VtData = 23,
    ReadRange = 26,
    LifeSafetyOperation = 27,
    SubscribeCovProperty = 28,
    GetEventInformation = 29,
}

impl TryFrom<u8> for ConfirmedServiceChoice {
    type Error = ServiceError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ConfirmedServiceChoice::AcknowledgeAlarm),
            1 => Ok(ConfirmedServiceChoice::ConfirmedCovNotification),
            2 => Ok(ConfirmedServiceChoice::ConfirmedEventNotification),
            3 => Ok(ConfirmedServiceChoice::GetAlarmSummary),
            4 => Ok(ConfirmedServiceChoice::GetEnrollmentSummary),
            5 => Ok(ConfirmedServiceChoice::SubscribeCov),
            6 => Ok(ConfirmedServiceChoice::AtomicReadFile),
            7 => Ok(ConfirmedServiceChoice::AtomicWriteFile),
            8 => Ok(ConfirmedServiceChoice::AddListElement),
            9 => Ok(ConfirmedServiceChoice::RemoveListElement),
            10 => Ok(ConfirmedServiceChoice::CreateObject),
            11 => Ok(ConfirmedServiceChoice::DeleteObject),
            12 => Ok(ConfirmedServiceChoice::ReadProperty),
            14 => Ok(ConfirmedServiceChoice::ReadPropertyMultiple),
            15 => Ok(ConfirmedServiceChoice::WriteProperty),
            16 => Ok(ConfirmedServiceChoice::WritePropertyMultiple),
            17 => Ok(ConfirmedServiceChoice::DeviceCommunicationControl),
            18 => Ok(ConfirmedServiceChoice::ConfirmedPrivateTransfer),
            19 => Ok(ConfirmedServiceChoice::ConfirmedTextMessage),
            20 => Ok(ConfirmedServiceChoice::ReinitializeDevice),
            21 => Ok(ConfirmedServiceChoice::VtOpen),
            22 => Ok(ConfirmedServiceChoice::VtClose),
            23 => Ok(ConfirmedServiceChoice::VtData),
            26 => Ok(ConfirmedServiceChoice::ReadRange),
            27 => Ok(ConfirmedServiceChoice::LifeSafetyOperation),
            28 => Ok(ConfirmedServiceChoice::SubscribeCovProperty),
            29 => Ok(ConfirmedServiceChoice::GetEventInformation),
            choice => Err(ServiceError::UnknownService(choice)),
        }
    }
}

/// Unconfirmed service choices (clause 21)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnconfirmedServiceChoice {
    IAm = 0,
    IHave = 1,
    UnconfirmedCovNotification = 2,
    UnconfirmedEventNotification = 3,
    UnconfirmedPrivateTransfer = 4,
    UnconfirmedTextMessage = 5,
    TimeSynchronization = 6,
    WhoHas = 7,
    WhoIs = 8,
    UtcTimeSynchronization = 9,
    WriteGroup = 10,
    WhoAmI = 13,
    YouAre = 14,
}

impl TryFrom<u8> for UnconfirmedServiceChoice {
    type Error = ServiceError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(UnconfirmedServiceChoice::IAm),
            1 => Ok(UnconfirmedServiceChoice::IHave),
            2 => Ok(UnconfirmedServiceChoice::UnconfirmedCovNotification),
            3 => Ok(UnconfirmedServiceChoice::UnconfirmedEventNotification),
            4 => Ok(UnconfirmedServiceChoice::UnconfirmedPrivateTransfer),
            5 => Ok(UnconfirmedServiceChoice::UnconfirmedTextMessage),
            6 => Ok(UnconfirmedServiceChoice::TimeSynchronization),
            7 => Ok(UnconfirmedServiceChoice::WhoHas),
            8 => Ok(UnconfirmedServiceChoice::WhoIs),
            9 => Ok(UnconfirmedServiceChoice::UtcTimeSynchronization),
            10 => Ok(UnconfirmedServiceChoice::WriteGroup),
            13 => Ok(UnconfirmedServiceChoice::WhoAmI),
            14 => Ok(UnconfirmedServiceChoice::YouAre),
            choice => Err(ServiceError::UnknownService(choice)),
        }
    }
}

/// Reasons carried in a Reject PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    Other = 0,
    BufferOverflow = 1,
    InconsistentParameters = 2,
    InvalidParameterDataType = 3,
    InvalidTag = 4,
    MissingRequiredParameter = 5,
    ParameterOutOfRange = 6,
    TooManyArguments = 7,
    UndefinedEnumeration = 8,
    UnrecognizedService = 9,
}

/// Reasons carried in an Abort PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AbortReason {
    Other = 0,
    BufferOverflow = 1,
    InvalidApduInThisState = 2,
    PreemptedByHigherPriorityTask = 3,
    SegmentationNotSupported = 4,
    SecurityError = 5,
    InsufficientSecurity = 6,
    WindowSizeOutOfRange = 7,
    ApplicationExceededReplyTime = 8,
    OutOfResources = 9,
    TsmTimeout = 10,
    ApduTooLong = 11,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_choice_values() {
        assert_eq!(ConfirmedServiceChoice::ReadProperty as u8, 12);
        assert_eq!(ConfirmedServiceChoice::WriteProperty as u8, 15);
        assert_eq!(ConfirmedServiceChoice::ReadRange as u8, 26);
        assert_eq!(UnconfirmedServiceChoice::WhoIs as u8, 8);
        assert_eq!(UnconfirmedServiceChoice::WriteGroup as u8, 10);
        assert_eq!(UnconfirmedServiceChoice::WhoAmI as u8, 13);
        assert_eq!(UnconfirmedServiceChoice::YouAre as u8, 14);
    }

    #[test]
    fn test_unknown_service_choice() {
        assert_eq!(
            ConfirmedServiceChoice::try_from(200).unwrap_err(),
            ServiceError::UnknownService(200)
        );
        assert_eq!(
            UnconfirmedServiceChoice::try_from(99).unwrap_err(),
            ServiceError::UnknownService(99)
        );
    }

    #[test]
    fn test_reject_reason_mapping() {
        use crate::encoding::EncodingError;

        assert_eq!(
            ServiceError::Encoding(EncodingError::WrongTagNumber).reject_reason(),
            RejectReason::InvalidTag
        );
        assert_eq!(
            ServiceError::MissingParameter("object-identifier").reject_reason(),
            RejectReason::MissingRequiredParameter
        );
        assert_eq!(
            ServiceError::ValueOutOfRange("priority").reject_reason(),
            RejectReason::ParameterOutOfRange
        );
    }
}
