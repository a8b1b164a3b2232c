//! BACnet Application Layer (APDU)
//!
//! This module implements the application-layer protocol data units defined
//! in ASHRAE 135 clause 20.1: the eight PDU types, their fixed headers, and
//! encoding/decoding between them and the [`Apdu`] sum type.
//!
//! Segmentation is parsed but not performed; the stack declares
//! `segmentation-none` and a segmented request is answered with an abort by
//! the dispatcher.
//!
//! # Example
//!
//! ```rust
//! use bacstack::app::Apdu;
//!
//! let apdu = Apdu::UnconfirmedRequest {
//!     service_choice: 8,
//!     service_data: vec![],
//! };
//! assert_eq!(apdu.encode(), [0x10, 0x08]);
//! ```

pub mod binding;
pub mod dispatch;
pub mod tsm;

#[cfg(feature = "std")]
use std::error::Error;

#[cfg(not(feature = "std"))]
use core::fmt;

#[cfg(feature = "std")]
use std::fmt;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::encoding::{
    decode_application_enumerated, encode_application_enumerated, EncodingError,
};

/// Result type for application layer operations
#[cfg(feature = "std")]
pub type Result<T> = std::result::Result<T, ApplicationError>;

#[cfg(not(feature = "std"))]
pub type Result<T> = core::result::Result<T, ApplicationError>;

/// Errors that can occur in the application layer
#[derive(Debug, Clone, PartialEq)]
pub enum ApplicationError {
    /// Data ended inside a fixed PDU header
    Truncated,
    /// PDU type nibble is not a known type
    UnknownPduType(u8),
    /// Segmented PDU received; segmentation is not supported
    SegmentationNotSupported,
    /// Tagged content inside the PDU failed to decode
    Encoding(EncodingError),
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::Truncated => write!(f, "APDU truncated"),
            ApplicationError::UnknownPduType(t) => write!(f, "Unknown PDU type {}", t),
            ApplicationError::SegmentationNotSupported => {
                write!(f, "Segmented APDU not supported")
            }
            ApplicationError::Encoding(e) => write!(f, "APDU content: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl Error for ApplicationError {}

impl From<EncodingError> for ApplicationError {
    fn from(value: EncodingError) -> Self {
        ApplicationError::Encoding(value)
    }
}

/// PDU type from bits 7..4 of the first APDU octet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApduType {
    ConfirmedRequest = 0,
    UnconfirmedRequest = 1,
    SimpleAck = 2,
    ComplexAck = 3,
    SegmentAck = 4,
    Error = 5,
    Reject = 6,
    Abort = 7,
}

impl TryFrom<u8> for ApduType {
    type Error = ApplicationError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ApduType::ConfirmedRequest),
            1 => Ok(ApduType::UnconfirmedRequest),
            2 => Ok(ApduType::SimpleAck),
            3 => Ok(ApduType::ComplexAck),
            4 => Ok(ApduType::SegmentAck),
            5 => Ok(ApduType::Error),
            6 => Ok(ApduType::Reject),
            7 => Ok(ApduType::Abort),
            t => Err(ApplicationError::UnknownPduType(t)),
        }
    }
}

/// Maximum segments accepted, encoded in bits 6..4 of the second octet of a
/// confirmed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MaxSegments {
    #[default]
    Unspecified = 0,
    Two = 1,
    Four = 2,
    Eight = 3,
    Sixteen = 4,
    ThirtyTwo = 5,
    SixtyFour = 6,
    MoreThanSixtyFour = 7,
}

impl From<u8> for MaxSegments {
    fn from(value: u8) -> Self {
        match value & 0x07 {
            1 => MaxSegments::Two,
            2 => MaxSegments::Four,
            3 => MaxSegments::Eight,
            4 => MaxSegments::Sixteen,
            5 => MaxSegments::ThirtyTwo,
            6 => MaxSegments::SixtyFour,
            7 => MaxSegments::MoreThanSixtyFour,
            _ => MaxSegments::Unspecified,
        }
    }
}

/// Maximum APDU length accepted, encoded in bits 3..0 of the second octet of
/// a confirmed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MaxApduSize {
    UpTo50 = 0,
    UpTo128 = 1,
    UpTo206 = 2,
    UpTo480 = 3,
    UpTo1024 = 4,
    #[default]
    UpTo1476 = 5,
}

impl MaxApduSize {
    /// The octet count this code stands for
    pub fn size(&self) -> usize {
        match self {
            MaxApduSize::UpTo50 => 50,
            MaxApduSize::UpTo128 => 128,
            MaxApduSize::UpTo206 => 206,
            MaxApduSize::UpTo480 => 480,
            MaxApduSize::UpTo1024 => 1024,
            MaxApduSize::UpTo1476 => 1476,
        }
    }

    /// The largest code whose size fits `size` octets
    pub fn for_size(size: usize) -> Self {
        match size {
            0..=50 => MaxApduSize::UpTo50,
            51..=128 => MaxApduSize::UpTo128,
            129..=206 => MaxApduSize::UpTo206,
            207..=480 => MaxApduSize::UpTo480,
            481..=1024 => MaxApduSize::UpTo1024,
            _ => MaxApduSize::UpTo1476,
        }
    }
}

impl From<u8> for MaxApduSize {
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0 => MaxApduSize::UpTo50,
            1 => MaxApduSize::UpTo128,
            2 => MaxApduSize::UpTo206,
            3 => MaxApduSize::UpTo480,
            4 => MaxApduSize::UpTo1024,
            _ => MaxApduSize::UpTo1476,
        }
    }
}

/// A decoded application PDU
#[derive(Debug, Clone, PartialEq)]
pub enum Apdu {
    ConfirmedRequest {
        segmented: bool,
        more_follows: bool,
        segmented_response_accepted: bool,
        max_segments: MaxSegments,
        max_apdu: MaxApduSize,
        invoke_id: u8,
        sequence_number: Option<u8>,
        proposed_window_size: Option<u8>,
        service_choice: u8,
        service_data: Vec<u8>,
    },
    UnconfirmedRequest {
        service_choice: u8,
        service_data: Vec<u8>,
    },
    SimpleAck {
        invoke_id: u8,
        service_choice: u8,
    },
    ComplexAck {
        segmented: bool,
        more_follows: bool,
        invoke_id: u8,
        sequence_number: Option<u8>,
        proposed_window_size: Option<u8>,
        service_choice: u8,
        service_data: Vec<u8>,
    },
    Error {
        invoke_id: u8,
        service_choice: u8,
        error_class: u32,
        error_code: u32,
    },
    Reject {
        invoke_id: u8,
        reason: u8,
    },
    Abort {
        server: bool,
        invoke_id: u8,
        reason: u8,
    },
}

impl Apdu {
    /// A plain (unsegmented) confirmed request
    pub fn confirmed_request(
        invoke_id: u8,
        service_choice: u8,
        service_data: Vec<u8>,
        max_apdu: MaxApduSize,
    ) -> Self {
        Apdu::ConfirmedRequest {
            segmented: false,
            more_follows: false,
            segmented_response_accepted: false,
            max_segments: MaxSegments::Unspecified,
            max_apdu,
            invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice,
            service_data,
        }
    }

    /// A plain (unsegmented) complex ack
    pub fn complex_ack(invoke_id: u8, service_choice: u8, service_data: Vec<u8>) -> Self {
        Apdu::ComplexAck {
            segmented: false,
            more_follows: false,
            invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice,
            service_data,
        }
    }

    /// Encode the PDU to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        match self {
            Apdu::ConfirmedRequest {
                segmented,
                more_follows,
                segmented_response_accepted,
                max_segments,
                max_apdu,
                invoke_id,
                sequence_number,
                proposed_window_size,
                service_choice,
                service_data,
            } => {
                let mut first = (ApduType::ConfirmedRequest as u8) << 4;
                if *segmented {
                    first |= 0x08;
                }
                if *more_follows {
                    first |= 0x04;
                }
                if *segmented_response_accepted {
                    first |= 0x02;
                }
                buffer.push(first);
                buffer.push(((*max_segments as u8) << 4) | (*max_apdu as u8));
                buffer.push(*invoke_id);
                if *segmented {
                    buffer.push(sequence_number.unwrap_or(0));
                    buffer.push(proposed_window_size.unwrap_or(1));
                }
                buffer.push(*service_choice);
                buffer.extend_from_slice(service_data);
            }
            Apdu::UnconfirmedRequest {
                service_choice,
                service_data,
            } => {
                buffer.push((ApduType::UnconfirmedRequest as u8) << 4);
                buffer.push(*service_choice);
                buffer.extend_from_slice(service_data);
            }
            Apdu::SimpleAck {
                invoke_id,
                service_choice,
            } => {
                buffer.push((ApduType::SimpleAck as u8) << 4);
                buffer.push(*invoke_id);
                buffer.push(*service_choice);
            }
            Apdu::ComplexAck {
                segmented,
                more_follows,
                invoke_id,
                sequence_number,
                proposed_window_size,
                service_choice,
                service_data,
            } => {
                let mut first = (ApduType::ComplexAck as u8) << 4;
                if *segmented {
                    first |= 0x08;
                }
                if *more_follows {
                    first |= 0x04;
                }
                buffer.push(first);
                buffer.push(*invoke_id);
                if *segmented {
                    buffer.push(sequence_number.unwrap_or(0));
                    buffer.push(proposed_window_size.unwrap_or(1));
                }
                buffer.push(*service_choice);
                buffer.extend_from_slice(service_data);
            }
            Apdu::Error {
                invoke_id,
                service_choice,
                error_class,
                error_code,
            } => {
                buffer.push((ApduType::Error as u8) << 4);
                buffer.push(*invoke_id);
                buffer.push(*service_choice);
                // Error ::= SEQUENCE of two application enumerateds.
                let _ = encode_application_enumerated(&mut buffer, *error_class);
                let _ = encode_application_enumerated(&mut buffer, *error_code);
            }
            Apdu::Reject { invoke_id, reason } => {
                buffer.push((ApduType::Reject as u8) << 4);
                buffer.push(*invoke_id);
                buffer.push(*reason);
            }
            Apdu::Abort {
                server,
                invoke_id,
                reason,
            } => {
                let mut first = (ApduType::Abort as u8) << 4;
                if *server {
                    first |= 0x01;
                }
                buffer.push(first);
                buffer.push(*invoke_id);
                buffer.push(*reason);
            }
        }
        buffer
    }

    /// Decode a PDU from wire bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        let first = *data.first().ok_or(ApplicationError::Truncated)?;
        let pdu_type = ApduType::try_from(first >> 4)?;

        match pdu_type {
            ApduType::ConfirmedRequest => {
                if data.len() < 4 {
                    return Err(ApplicationError::Truncated);
                }
                let segmented = first & 0x08 != 0;
                let more_follows = first & 0x04 != 0;
                let segmented_response_accepted = first & 0x02 != 0;
                let max_segments = MaxSegments::from(data[1] >> 4);
                let max_apdu = MaxApduSize::from(data[1]);
                let invoke_id = data[2];
                let mut pos = 3;
                let (sequence_number, proposed_window_size) = if segmented {
                    if data.len() < 6 {
                        return Err(ApplicationError::Truncated);
                    }
                    let seq = data[3];
                    let window = data[4];
                    pos = 5;
                    (Some(seq), Some(window))
                } else {
                    (None, None)
                };
                let service_choice = *data.get(pos).ok_or(ApplicationError::Truncated)?;
                pos += 1;
                Ok(Apdu::ConfirmedRequest {
                    segmented,
                    more_follows,
                    segmented_response_accepted,
                    max_segments,
                    max_apdu,
                    invoke_id,
                    sequence_number,
                    proposed_window_size,
                    service_choice,
                    service_data: data[pos..].to_vec(),
                })
            }
            ApduType::UnconfirmedRequest => {
                let service_choice = *data.get(1).ok_or(ApplicationError::Truncated)?;
                Ok(Apdu::UnconfirmedRequest {
                    service_choice,
                    service_data: data[2..].to_vec(),
                })
            }
            ApduType::SimpleAck => {
                if data.len() < 3 {
                    return Err(ApplicationError::Truncated);
                }
                Ok(Apdu::SimpleAck {
                    invoke_id: data[1],
                    service_choice: data[2],
                })
            }
            ApduType::ComplexAck => {
                if data.len() < 3 {
                    return Err(ApplicationError::Truncated);
                }
                let segmented = first & 0x08 != 0;
                let more_follows = first & 0x04 != 0;
                let invoke_id = data[1];
                let mut pos = 2;
                let (sequence_number, proposed_window_size) = if segmented {
                    if data.len() < 5 {
                        return Err(ApplicationError::Truncated);
                    }
                    let seq = data[2];
                    let window = data[3];
                    pos = 4;
                    (Some(seq), Some(window))
                } else {
                    (None, None)
                };
                let service_choice = *data.get(pos).ok_or(ApplicationError::Truncated)?;
                pos += 1;
                Ok(Apdu::ComplexAck {
                    segmented,
                    more_follows,
                    invoke_id,
                    sequence_number,
                    proposed_window_size,
                    service_choice,
                    service_data: data[pos..].to_vec(),
                })
            }
            ApduType::Error => {
                if data.len() < 3 {
                    return Err(ApplicationError::Truncated);
                }
                let invoke_id = data[1];
                let service_choice = data[2];
                let (error_class, used) = decode_application_enumerated(&data[3..])?;
                let (error_code, _) = decode_application_enumerated(&data[3 + used..])?;
                Ok(Apdu::Error {
                    invoke_id,
                    service_choice,
                    error_class,
                    error_code,
                })
            }
            ApduType::Reject => {
                if data.len() < 3 {
                    return Err(ApplicationError::Truncated);
                }
                Ok(Apdu::Reject {
                    invoke_id: data[1],
                    reason: data[2],
                })
            }
            ApduType::Abort => {
                if data.len() < 3 {
                    return Err(ApplicationError::Truncated);
                }
                Ok(Apdu::Abort {
                    server: first & 0x01 != 0,
                    invoke_id: data[1],
                    reason: data[2],
                })
            }
            ApduType::SegmentAck => Err(ApplicationError::SegmentationNotSupported),
        }
    }

    /// The invoke-id, for PDU types that carry one
    pub fn invoke_id(&self) -> Option<u8> {
        match self {
            Apdu::ConfirmedRequest { invoke_id, .. }
            | Apdu::SimpleAck { invoke_id, .. }
            | Apdu::ComplexAck { invoke_id, .. }
            | Apdu::Error { invoke_id, .. }
            | Apdu::Reject { invoke_id, .. }
            | Apdu::Abort { invoke_id, .. } => Some(*invoke_id),
            Apdu::UnconfirmedRequest { .. } => None,
        }
    }
}
