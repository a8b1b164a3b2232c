//! BACnet/SC Message Framing (BVLC-SC)
//!
//! Implements the BACnet Secure Connect virtual link control defined in
//! ANSI/ASHRAE 135-2020 Addendum cc: the fixed four-octet header, the
//! conditional VMAC fields, the destination/data header-option lists, and
//! the thirteen BVLC functions (0x00..=0x0C).
//!
//! # Message Layout
//!
//! ```text
//! function | control | message-id (LE) | [origin VMAC] | [dest VMAC]
//!          | [destination options] | [data options] | payload
//! ```
//!
//! Header options are a chain of marker octets: bits 0..4 carry the option
//! type, bit 5 must-understand, bit 6 announces a data header (2-octet LE
//! length plus content), bit 7 links to another option. Only Secure-Path
//! (1) and Proprietary (31) are valid types; Secure-Path may only appear in
//! the data-option list and never carries data.
//!
//! Multi-octet numeric fields in BVLC-SC are little-endian, unlike the
//! application layer above it.
//!
//! The decoder borrows from the input buffer throughout; no payload bytes
//! are copied.

pub mod session;

#[cfg(feature = "async")]
pub mod pump;

#[cfg(feature = "std")]
use std::error::Error;

#[cfg(not(feature = "std"))]
use core::fmt;

#[cfg(feature = "std")]
use std::fmt;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::object::{ErrorClass, ErrorCode};

/// BVLC-SC function codes
pub const BVLC_SC_RESULT: u8 = 0x00;
pub const BVLC_SC_ENCAPSULATED_NPDU: u8 = 0x01;
pub const BVLC_SC_ADDRESS_RESOLUTION: u8 = 0x02;
pub const BVLC_SC_ADDRESS_RESOLUTION_ACK: u8 = 0x03;
pub const BVLC_SC_ADVERTISEMENT: u8 = 0x04;
pub const BVLC_SC_ADVERTISEMENT_SOLICITATION: u8 = 0x05;
pub const BVLC_SC_CONNECT_REQUEST: u8 = 0x06;
pub const BVLC_SC_CONNECT_ACCEPT: u8 = 0x07;
pub const BVLC_SC_DISCONNECT_REQUEST: u8 = 0x08;
pub const BVLC_SC_DISCONNECT_ACK: u8 = 0x09;
pub const BVLC_SC_HEARTBEAT_REQUEST: u8 = 0x0A;
pub const BVLC_SC_HEARTBEAT_ACK: u8 = 0x0B;
pub const BVLC_SC_PROPRIETARY_MESSAGE: u8 = 0x0C;

/// Octets in a virtual MAC address
pub const BVLC_SC_VMAC_SIZE: usize = 6;

/// Octets in the device UUID of the connect handshake
pub const BVLC_SC_UUID_SIZE: usize = 16;

/// Most header options accepted per list
pub const BVLC_SC_HEADER_OPTION_MAX: usize = 4;

/// Header-option marker layout
pub const OPTION_TYPE_MASK: u8 = 0x1F;
pub const OPTION_MUST_UNDERSTAND: u8 = 0x20;
pub const OPTION_HAS_DATA: u8 = 0x40;
pub const OPTION_MORE_FOLLOWS: u8 = 0x80;

/// Header-option types
pub const OPTION_TYPE_SECURE_PATH: u8 = 1;
pub const OPTION_TYPE_PROPRIETARY: u8 = 31;

bitflags::bitflags! {
    /// Control-flags octet of the fixed header
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ControlFlags: u8 {
        const ORIGINATING_VMAC = 0b0000_1000;
        const DESTINATION_VMAC = 0b0000_0100;
        const DEST_OPTIONS = 0b0000_0010;
        const DATA_OPTIONS = 0b0000_0001;
    }
}

/// Errors raised by the BVLC-SC codec, each mapping to the BACnet error
/// pair reported in a BVLC-Result NAK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BscError {
    /// Message ended before a declared field
    MessageIncomplete,
    /// Malformed header-option list
    HeaderEncodingError,
    /// Function code above 0x0C
    UnknownBvlcFunction(u8),
    /// Field present that the function forbids
    InconsistentParameters,
    /// Payload present where none is allowed, or longer than allowed
    UnexpectedData,
    /// Payload absent where one is required
    PayloadExpected,
    /// More options than the implementation accepts
    OutOfMemory,
}

impl BscError {
    /// The error class/code pair carried in a BVLC-Result NAK
    pub fn error_pair(&self) -> (ErrorClass, ErrorCode) {
        match self {
            BscError::MessageIncomplete => (ErrorClass::Communication, ErrorCode::MessageIncomplete),
            BscError::HeaderEncodingError => {
                (ErrorClass::Communication, ErrorCode::HeaderEncodingError)
            }
            BscError::UnknownBvlcFunction(_) => {
                (ErrorClass::Communication, ErrorCode::BvlcFunctionUnknown)
            }
            BscError::InconsistentParameters => {
                (ErrorClass::Communication, ErrorCode::InconsistentParameters)
            }
            BscError::UnexpectedData => (ErrorClass::Communication, ErrorCode::UnexpectedData),
            BscError::PayloadExpected => (ErrorClass::Communication, ErrorCode::PayloadExpected),
            BscError::OutOfMemory => (ErrorClass::Resources, ErrorCode::OutOfMemory),
        }
    }
}

impl fmt::Display for BscError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BscError::MessageIncomplete => write!(f, "BVLC-SC message incomplete"),
            BscError::HeaderEncodingError => write!(f, "BVLC-SC header encoding error"),
            BscError::UnknownBvlcFunction(code) => {
                write!(f, "Unknown BVLC-SC function {:#04x}", code)
            }
            BscError::InconsistentParameters => write!(f, "BVLC-SC inconsistent parameters"),
            BscError::UnexpectedData => write!(f, "BVLC-SC unexpected data"),
            BscError::PayloadExpected => write!(f, "BVLC-SC payload expected"),
            BscError::OutOfMemory => write!(f, "BVLC-SC header option list too long"),
        }
    }
}

#[cfg(feature = "std")]
impl Error for BscError {}

/// Result type for BVLC-SC operations
#[cfg(feature = "std")]
pub type Result<T> = std::result::Result<T, BscError>;

#[cfg(not(feature = "std"))]
pub type Result<T> = core::result::Result<T, BscError>;

/// A BACnet/SC virtual MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VMacAddress(pub [u8; BVLC_SC_VMAC_SIZE]);

impl VMacAddress {
    /// The local-broadcast VMAC, all ones
    pub const BROADCAST: VMacAddress = VMacAddress([0xFF; BVLC_SC_VMAC_SIZE]);

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; BVLC_SC_VMAC_SIZE]
    }
}

impl fmt::Display for VMacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// The 16-octet persistent device identifier of the connect handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScUuid(pub [u8; BVLC_SC_UUID_SIZE]);

impl fmt::Display for ScUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A header option to encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionSpec {
    SecurePath {
        must_understand: bool,
    },
    Proprietary {
        must_understand: bool,
        vendor_id: u16,
        option_type: u8,
        data: Vec<u8>,
    },
}

/// A decoded header option borrowing its data from the message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedOption<'a> {
    pub marker: u8,
    pub must_understand: bool,
    pub option: HeaderOption<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOption<'a> {
    SecurePath,
    Proprietary {
        vendor_id: u16,
        option_type: u8,
        data: &'a [u8],
    },
}

fn encode_option_list(buffer: &mut Vec<u8>, options: &[OptionSpec]) -> Result<()> {
    if options.len() > BVLC_SC_HEADER_OPTION_MAX {
        return Err(BscError::OutOfMemory);
    }
    for (index, option) in options.iter().enumerate() {
        let more = if index + 1 < options.len() {
            OPTION_MORE_FOLLOWS
        } else {
            0
        };
        match option {
            OptionSpec::SecurePath { must_understand } => {
                let mut marker = OPTION_TYPE_SECURE_PATH | more;
                if *must_understand {
                    marker |= OPTION_MUST_UNDERSTAND;
                }
                buffer.push(marker);
            }
            OptionSpec::Proprietary {
                must_understand,
                vendor_id,
                option_type,
                data,
            } => {
                let mut marker = OPTION_TYPE_PROPRIETARY | OPTION_HAS_DATA | more;
                if *must_understand {
                    marker |= OPTION_MUST_UNDERSTAND;
                }
                buffer.push(marker);
                let length = 3 + data.len() as u16;
                buffer.extend_from_slice(&length.to_le_bytes());
                buffer.extend_from_slice(&vendor_id.to_le_bytes());
                buffer.push(*option_type);
                buffer.extend_from_slice(data);
            }
        }
    }
    Ok(())
}

/// Walk and validate one header-option list.
///
/// `dest_list` applies the Secure-Path placement rule. Returns the list
/// length in octets and the option count.
fn validate_option_list(data: &[u8], dest_list: bool) -> Result<(usize, usize)> {
    let mut offset = 0usize;
    let mut count = 0usize;

    loop {
        let marker = *data.get(offset).ok_or(BscError::MessageIncomplete)?;
        match marker & OPTION_TYPE_MASK {
            OPTION_TYPE_SECURE_PATH => {
                if dest_list {
                    // AB.2.3.1: secure path lives in the data options only.
                    return Err(BscError::HeaderEncodingError);
                }
                if marker & OPTION_HAS_DATA != 0 {
                    return Err(BscError::HeaderEncodingError);
                }
                offset += 1;
            }
            OPTION_TYPE_PROPRIETARY => {
                if marker & OPTION_HAS_DATA == 0 {
                    return Err(BscError::HeaderEncodingError);
                }
                offset += 1;
                if offset + 2 > data.len() {
                    return Err(BscError::MessageIncomplete);
                }
                let header_length =
                    u16::from_le_bytes([data[offset], data[offset + 1]]) as usize;
                if header_length < 3 {
                    return Err(BscError::HeaderEncodingError);
                }
                offset += 2 + header_length;
                if offset > data.len() {
                    return Err(BscError::MessageIncomplete);
                }
            }
            _ => return Err(BscError::HeaderEncodingError),
        }

        count += 1;
        if marker & OPTION_MORE_FOLLOWS == 0 {
            break;
        }
    }

    Ok((offset, count))
}

/// Iterator over a validated header-option list
pub struct OptionIter<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> OptionIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            done: data.is_empty(),
        }
    }
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = DecodedOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.data.len() {
            return None;
        }
        let marker = self.data[self.offset];
        let must_understand = marker & OPTION_MUST_UNDERSTAND != 0;

        let option = match marker & OPTION_TYPE_MASK {
            OPTION_TYPE_SECURE_PATH => {
                self.offset += 1;
                HeaderOption::SecurePath
            }
            OPTION_TYPE_PROPRIETARY => {
                // Tolerate iteration over an unvalidated list.
                if self.offset + 3 > self.data.len() {
                    self.done = true;
                    return None;
                }
                let header_length = u16::from_le_bytes([
                    self.data[self.offset + 1],
                    self.data[self.offset + 2],
                ]) as usize;
                if header_length < 3 || self.offset + 3 + header_length > self.data.len() {
                    self.done = true;
                    return None;
                }
                let body = &self.data[self.offset + 3..self.offset + 3 + header_length];
                self.offset += 3 + header_length;
                HeaderOption::Proprietary {
                    vendor_id: u16::from_le_bytes([body[0], body[1]]),
                    option_type: body[2],
                    data: &body[3..],
                }
            }
            _ => {
                self.done = true;
                return None;
            }
        };

        if marker & OPTION_MORE_FOLLOWS == 0 {
            self.done = true;
        }
        Some(DecodedOption {
            marker,
            must_understand,
            option,
        })
    }
}

fn encode_common(
    buffer: &mut Vec<u8>,
    function: u8,
    message_id: u16,
    origin: Option<&VMacAddress>,
    destination: Option<&VMacAddress>,
) {
    let mut control = ControlFlags::empty();
    if origin.is_some() {
        control |= ControlFlags::ORIGINATING_VMAC;
    }
    if destination.is_some() {
        control |= ControlFlags::DESTINATION_VMAC;
    }
    buffer.push(function);
    buffer.push(control.bits());
    buffer.extend_from_slice(&message_id.to_le_bytes());
    if let Some(origin) = origin {
        buffer.extend_from_slice(&origin.0);
    }
    if let Some(destination) = destination {
        buffer.extend_from_slice(&destination.0);
    }
}

/// Error parameters of a BVLC-Result NAK
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultError<'a> {
    pub error_header_marker: u8,
    pub error_class: u16,
    pub error_code: u16,
    pub details: &'a str,
}

/// Encode a BVLC-Result; `error` must be present exactly for NAKs
pub fn encode_result(
    message_id: u16,
    origin: Option<&VMacAddress>,
    destination: Option<&VMacAddress>,
    bvlc_function: u8,
    error: Option<ResultError<'_>>,
) -> Result<Vec<u8>> {
    if bvlc_function > BVLC_SC_PROPRIETARY_MESSAGE {
        return Err(BscError::UnknownBvlcFunction(bvlc_function));
    }
    let mut buffer = Vec::with_capacity(32);
    encode_common(&mut buffer, BVLC_SC_RESULT, message_id, origin, destination);
    buffer.push(bvlc_function);
    match error {
        None => buffer.push(0),
        Some(error) => {
            buffer.push(1);
            buffer.push(error.error_header_marker);
            buffer.extend_from_slice(&error.error_class.to_le_bytes());
            buffer.extend_from_slice(&error.error_code.to_le_bytes());
            buffer.extend_from_slice(error.details.as_bytes());
        }
    }
    Ok(buffer)
}

/// Encode an Encapsulated-NPDU with optional header options
pub fn encode_encapsulated_npdu(
    message_id: u16,
    origin: Option<&VMacAddress>,
    destination: Option<&VMacAddress>,
    dest_options: &[OptionSpec],
    data_options: &[OptionSpec],
    npdu: &[u8],
) -> Result<Vec<u8>> {
    if npdu.is_empty() {
        return Err(BscError::PayloadExpected);
    }
    if dest_options
        .iter()
        .any(|option| matches!(option, OptionSpec::SecurePath { .. }))
    {
        return Err(BscError::HeaderEncodingError);
    }
    let mut buffer = Vec::with_capacity(16 + npdu.len());
    encode_common(
        &mut buffer,
        BVLC_SC_ENCAPSULATED_NPDU,
        message_id,
        origin,
        destination,
    );
    if !dest_options.is_empty() {
        buffer[1] |= ControlFlags::DEST_OPTIONS.bits();
        encode_option_list(&mut buffer, dest_options)?;
    }
    if !data_options.is_empty() {
        buffer[1] |= ControlFlags::DATA_OPTIONS.bits();
        encode_option_list(&mut buffer, data_options)?;
    }
    buffer.extend_from_slice(npdu);
    Ok(buffer)
}

pub fn encode_address_resolution(
    message_id: u16,
    origin: Option<&VMacAddress>,
    destination: Option<&VMacAddress>,
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(16);
    encode_common(
        &mut buffer,
        BVLC_SC_ADDRESS_RESOLUTION,
        message_id,
        origin,
        destination,
    );
    buffer
}

/// The ack carries a space-separated WebSocket URI list
pub fn encode_address_resolution_ack(
    message_id: u16,
    origin: Option<&VMacAddress>,
    destination: Option<&VMacAddress>,
    websocket_uris: &str,
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(16 + websocket_uris.len());
    encode_common(
        &mut buffer,
        BVLC_SC_ADDRESS_RESOLUTION_ACK,
        message_id,
        origin,
        destination,
    );
    buffer.extend_from_slice(websocket_uris.as_bytes());
    buffer
}

pub fn encode_advertisement(
    message_id: u16,
    origin: Option<&VMacAddress>,
    destination: Option<&VMacAddress>,
    hub_connection_status: u8,
    accept_direct_connections: u8,
    max_bvlc_length: u16,
    max_npdu_length: u16,
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(24);
    encode_common(
        &mut buffer,
        BVLC_SC_ADVERTISEMENT,
        message_id,
        origin,
        destination,
    );
    buffer.push(hub_connection_status);
    buffer.push(accept_direct_connections);
    buffer.extend_from_slice(&max_bvlc_length.to_le_bytes());
    buffer.extend_from_slice(&max_npdu_length.to_le_bytes());
    buffer
}

pub fn encode_advertisement_solicitation(
    message_id: u16,
    origin: Option<&VMacAddress>,
    destination: Option<&VMacAddress>,
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(16);
    encode_common(
        &mut buffer,
        BVLC_SC_ADVERTISEMENT_SOLICITATION,
        message_id,
        origin,
        destination,
    );
    buffer
}

fn encode_connect_payload(
    buffer: &mut Vec<u8>,
    vmac: &VMacAddress,
    uuid: &ScUuid,
    max_bvlc_length: u16,
    max_npdu_length: u16,
) {
    buffer.extend_from_slice(&vmac.0);
    buffer.extend_from_slice(&uuid.0);
    buffer.extend_from_slice(&max_bvlc_length.to_le_bytes());
    buffer.extend_from_slice(&max_npdu_length.to_le_bytes());
}

/// Connect-Request: no VMAC fields, 26-octet payload
pub fn encode_connect_request(
    message_id: u16,
    vmac: &VMacAddress,
    uuid: &ScUuid,
    max_bvlc_length: u16,
    max_npdu_length: u16,
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(30);
    encode_common(&mut buffer, BVLC_SC_CONNECT_REQUEST, message_id, None, None);
    encode_connect_payload(&mut buffer, vmac, uuid, max_bvlc_length, max_npdu_length);
    buffer
}

pub fn encode_connect_accept(
    message_id: u16,
    vmac: &VMacAddress,
    uuid: &ScUuid,
    max_bvlc_length: u16,
    max_npdu_length: u16,
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(30);
    encode_common(&mut buffer, BVLC_SC_CONNECT_ACCEPT, message_id, None, None);
    encode_connect_payload(&mut buffer, vmac, uuid, max_bvlc_length, max_npdu_length);
    buffer
}

pub fn encode_disconnect_request(message_id: u16) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(4);
    encode_common(&mut buffer, BVLC_SC_DISCONNECT_REQUEST, message_id, None, None);
    buffer
}

pub fn encode_disconnect_ack(message_id: u16) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(4);
    encode_common(&mut buffer, BVLC_SC_DISCONNECT_ACK, message_id, None, None);
    buffer
}

pub fn encode_heartbeat_request(message_id: u16) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(4);
    encode_common(&mut buffer, BVLC_SC_HEARTBEAT_REQUEST, message_id, None, None);
    buffer
}

pub fn encode_heartbeat_ack(message_id: u16) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(4);
    encode_common(&mut buffer, BVLC_SC_HEARTBEAT_ACK, message_id, None, None);
    buffer
}

pub fn encode_proprietary_message(
    message_id: u16,
    origin: Option<&VMacAddress>,
    destination: Option<&VMacAddress>,
    vendor_id: u16,
    proprietary_function: u8,
    data: &[u8],
) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(20 + data.len());
    encode_common(
        &mut buffer,
        BVLC_SC_PROPRIETARY_MESSAGE,
        message_id,
        origin,
        destination,
    );
    buffer.extend_from_slice(&vendor_id.to_le_bytes());
    buffer.push(proprietary_function);
    buffer.extend_from_slice(data);
    buffer
}

/// Result-NAK error details borrowed from the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultErrorInfo<'a> {
    pub error_header_marker: u8,
    pub error_class: u16,
    pub error_code: u16,
    pub details: &'a [u8],
}

/// Decoded function-specific payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScPayload<'a> {
    Result {
        bvlc_function: u8,
        result_code: u8,
        error: Option<ResultErrorInfo<'a>>,
    },
    EncapsulatedNpdu(&'a [u8]),
    AddressResolution,
    AddressResolutionAck {
        websocket_uris: &'a [u8],
    },
    Advertisement {
        hub_connection_status: u8,
        accept_direct_connections: u8,
        max_bvlc_length: u16,
        max_npdu_length: u16,
    },
    AdvertisementSolicitation,
    ConnectRequest {
        vmac: VMacAddress,
        uuid: ScUuid,
        max_bvlc_length: u16,
        max_npdu_length: u16,
    },
    ConnectAccept {
        vmac: VMacAddress,
        uuid: ScUuid,
        max_bvlc_length: u16,
        max_npdu_length: u16,
    },
    DisconnectRequest,
    DisconnectAck,
    HeartbeatRequest,
    HeartbeatAck,
    Proprietary {
        vendor_id: u16,
        proprietary_function: u8,
        data: &'a [u8],
    },
}

/// A fully decoded BVLC-SC message, borrowing from the input buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage<'a> {
    pub function: u8,
    pub control: ControlFlags,
    pub message_id: u16,
    pub origin: Option<VMacAddress>,
    pub destination: Option<VMacAddress>,
    pub dest_options_raw: &'a [u8],
    pub data_options_raw: &'a [u8],
    pub payload_raw: &'a [u8],
    pub payload: ScPayload<'a>,
}

impl<'a> DecodedMessage<'a> {
    pub fn dest_options(&self) -> OptionIter<'a> {
        OptionIter::new(self.dest_options_raw)
    }

    pub fn data_options(&self) -> OptionIter<'a> {
        OptionIter::new(self.data_options_raw)
    }
}

fn read_vmac(data: &[u8], offset: &mut usize) -> Result<VMacAddress> {
    if *offset + BVLC_SC_VMAC_SIZE > data.len() {
        return Err(BscError::MessageIncomplete);
    }
    let mut vmac = [0u8; BVLC_SC_VMAC_SIZE];
    vmac.copy_from_slice(&data[*offset..*offset + BVLC_SC_VMAC_SIZE]);
    *offset += BVLC_SC_VMAC_SIZE;
    Ok(VMacAddress(vmac))
}

fn decode_result_payload(payload: &[u8]) -> Result<ScPayload<'_>> {
    if payload.len() < 2 {
        return Err(BscError::PayloadExpected);
    }
    let bvlc_function = payload[0];
    if bvlc_function > BVLC_SC_PROPRIETARY_MESSAGE {
        return Err(BscError::UnknownBvlcFunction(bvlc_function));
    }
    match payload[1] {
        0 => {
            if payload.len() > 2 {
                return Err(BscError::UnexpectedData);
            }
            Ok(ScPayload::Result {
                bvlc_function,
                result_code: 0,
                error: None,
            })
        }
        1 => {
            if payload.len() < 7 {
                return Err(BscError::MessageIncomplete);
            }
            Ok(ScPayload::Result {
                bvlc_function,
                result_code: 1,
                error: Some(ResultErrorInfo {
                    error_header_marker: payload[2],
                    error_class: u16::from_le_bytes([payload[3], payload[4]]),
                    error_code: u16::from_le_bytes([payload[5], payload[6]]),
                    details: &payload[7..],
                }),
            })
        }
        _ => Err(BscError::HeaderEncodingError),
    }
}

fn decode_connect_payload(payload: &[u8]) -> Result<(VMacAddress, ScUuid, u16, u16)> {
    const CONNECT_PAYLOAD_LEN: usize = BVLC_SC_VMAC_SIZE + BVLC_SC_UUID_SIZE + 4;
    if payload.len() < CONNECT_PAYLOAD_LEN {
        return Err(BscError::MessageIncomplete);
    }
    if payload.len() > CONNECT_PAYLOAD_LEN {
        return Err(BscError::UnexpectedData);
    }
    let mut vmac = [0u8; BVLC_SC_VMAC_SIZE];
    vmac.copy_from_slice(&payload[..BVLC_SC_VMAC_SIZE]);
    let mut uuid = [0u8; BVLC_SC_UUID_SIZE];
    uuid.copy_from_slice(&payload[BVLC_SC_VMAC_SIZE..BVLC_SC_VMAC_SIZE + BVLC_SC_UUID_SIZE]);
    let max_bvlc_length = u16::from_le_bytes([payload[22], payload[23]]);
    let max_npdu_length = u16::from_le_bytes([payload[24], payload[25]]);
    Ok((VMacAddress(vmac), ScUuid(uuid), max_bvlc_length, max_npdu_length))
}

/// Decode and validate a complete BVLC-SC message
pub fn decode_message(data: &[u8]) -> Result<DecodedMessage<'_>> {
    if data.len() < 4 {
        return Err(BscError::MessageIncomplete);
    }
    let function = data[0];
    if function > BVLC_SC_PROPRIETARY_MESSAGE {
        return Err(BscError::UnknownBvlcFunction(function));
    }
    let control = ControlFlags::from_bits_truncate(data[1]);
    let message_id = u16::from_le_bytes([data[2], data[3]]);
    let mut offset = 4;

    let origin = if control.contains(ControlFlags::ORIGINATING_VMAC) {
        Some(read_vmac(data, &mut offset)?)
    } else {
        None
    };
    let destination = if control.contains(ControlFlags::DESTINATION_VMAC) {
        Some(read_vmac(data, &mut offset)?)
    } else {
        None
    };

    let dest_options_raw = if control.contains(ControlFlags::DEST_OPTIONS) {
        let (length, count) = validate_option_list(&data[offset..], true)?;
        if count > BVLC_SC_HEADER_OPTION_MAX {
            return Err(BscError::OutOfMemory);
        }
        let raw = &data[offset..offset + length];
        offset += length;
        raw
    } else {
        &data[0..0]
    };

    let data_options_raw = if control.contains(ControlFlags::DATA_OPTIONS) {
        let (length, count) = validate_option_list(&data[offset..], false)?;
        if count > BVLC_SC_HEADER_OPTION_MAX {
            return Err(BscError::OutOfMemory);
        }
        let raw = &data[offset..offset + length];
        offset += length;
        raw
    } else {
        &data[0..0]
    };

    let payload_raw = &data[offset..];
    let has_data_options = !data_options_raw.is_empty();
    let has_vmacs = origin.is_some() || destination.is_some();

    let payload = match function {
        BVLC_SC_RESULT => {
            if has_data_options {
                return Err(BscError::InconsistentParameters);
            }
            decode_result_payload(payload_raw)?
        }
        BVLC_SC_ENCAPSULATED_NPDU => {
            if payload_raw.is_empty() {
                return Err(BscError::MessageIncomplete);
            }
            ScPayload::EncapsulatedNpdu(payload_raw)
        }
        BVLC_SC_ADDRESS_RESOLUTION => {
            if has_data_options {
                return Err(BscError::InconsistentParameters);
            }
            if !payload_raw.is_empty() {
                return Err(BscError::UnexpectedData);
            }
            ScPayload::AddressResolution
        }
        BVLC_SC_ADDRESS_RESOLUTION_ACK => {
            if has_data_options {
                return Err(BscError::InconsistentParameters);
            }
            ScPayload::AddressResolutionAck {
                websocket_uris: payload_raw,
            }
        }
        BVLC_SC_ADVERTISEMENT => {
            if has_data_options {
                return Err(BscError::InconsistentParameters);
            }
            if payload_raw.is_empty() {
                return Err(BscError::MessageIncomplete);
            }
            match payload_raw.len().cmp(&6) {
                core::cmp::Ordering::Less => return Err(BscError::PayloadExpected),
                core::cmp::Ordering::Greater => return Err(BscError::UnexpectedData),
                core::cmp::Ordering::Equal => {}
            }
            ScPayload::Advertisement {
                hub_connection_status: payload_raw[0],
                accept_direct_connections: payload_raw[1],
                max_bvlc_length: u16::from_le_bytes([payload_raw[2], payload_raw[3]]),
                max_npdu_length: u16::from_le_bytes([payload_raw[4], payload_raw[5]]),
            }
        }
        BVLC_SC_ADVERTISEMENT_SOLICITATION => {
            if has_data_options {
                return Err(BscError::InconsistentParameters);
            }
            if !payload_raw.is_empty() {
                return Err(BscError::UnexpectedData);
            }
            ScPayload::AdvertisementSolicitation
        }
        BVLC_SC_CONNECT_REQUEST
        | BVLC_SC_CONNECT_ACCEPT
        | BVLC_SC_DISCONNECT_REQUEST
        | BVLC_SC_DISCONNECT_ACK
        | BVLC_SC_HEARTBEAT_REQUEST
        | BVLC_SC_HEARTBEAT_ACK => {
            if has_vmacs || has_data_options {
                return Err(BscError::InconsistentParameters);
            }
            match function {
                BVLC_SC_CONNECT_REQUEST => {
                    if payload_raw.is_empty() {
                        return Err(BscError::MessageIncomplete);
                    }
                    let (vmac, uuid, max_bvlc_length, max_npdu_length) =
                        decode_connect_payload(payload_raw)?;
                    ScPayload::ConnectRequest {
                        vmac,
                        uuid,
                        max_bvlc_length,
                        max_npdu_length,
                    }
                }
                BVLC_SC_CONNECT_ACCEPT => {
                    if payload_raw.is_empty() {
                        return Err(BscError::MessageIncomplete);
                    }
                    let (vmac, uuid, max_bvlc_length, max_npdu_length) =
                        decode_connect_payload(payload_raw)?;
                    ScPayload::ConnectAccept {
                        vmac,
                        uuid,
                        max_bvlc_length,
                        max_npdu_length,
                    }
                }
                _ => {
                    if !payload_raw.is_empty() {
                        return Err(BscError::UnexpectedData);
                    }
                    match function {
                        BVLC_SC_DISCONNECT_REQUEST => ScPayload::DisconnectRequest,
                        BVLC_SC_DISCONNECT_ACK => ScPayload::DisconnectAck,
                        BVLC_SC_HEARTBEAT_REQUEST => ScPayload::HeartbeatRequest,
                        _ => ScPayload::HeartbeatAck,
                    }
                }
            }
        }
        BVLC_SC_PROPRIETARY_MESSAGE => {
            if has_data_options {
                return Err(BscError::InconsistentParameters);
            }
            if payload_raw.len() < 3 {
                return Err(BscError::MessageIncomplete);
            }
            ScPayload::Proprietary {
                vendor_id: u16::from_le_bytes([payload_raw[0], payload_raw[1]]),
                proprietary_function: payload_raw[2],
                data: &payload_raw[3..],
            }
        }
        _ => unreachable!(),
    };

    Ok(DecodedMessage {
        function,
        control,
        message_id,
        origin,
        destination,
        dest_options_raw,
        data_options_raw,
        payload_raw,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_wire_form() {
        let vmac = VMacAddress([0, 0, 0, 0, 0, 1]);
        let uuid = ScUuid([0; 16]);
        let message = encode_connect_request(0x1234, &vmac, &uuid, 1500, 1476);
        // 4-octet fixed header plus the 26-octet connect payload.
        assert_eq!(message.len(), 30);
        assert_eq!(message[0], BVLC_SC_CONNECT_REQUEST);
        assert_eq!(message[1], 0);
        assert_eq!(u16::from_le_bytes([message[2], message[3]]), 0x1234);

        let decoded = decode_message(&message).unwrap();
        assert_eq!(decoded.message_id, 0x1234);
        match decoded.payload {
            ScPayload::ConnectRequest {
                vmac: decoded_vmac,
                uuid: decoded_uuid,
                max_bvlc_length,
                max_npdu_length,
            } => {
                assert_eq!(decoded_vmac, vmac);
                assert_eq!(decoded_uuid, uuid);
                assert_eq!(max_bvlc_length, 1500);
                assert_eq!(max_npdu_length, 1476);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        // Truncating the payload by one octet is an incomplete message.
        assert_eq!(
            decode_message(&message[..29]).unwrap_err(),
            BscError::MessageIncomplete
        );
    }

    #[test]
    fn test_connect_request_rejects_vmac_fields() {
        let vmac = VMacAddress([0, 0, 0, 0, 0, 1]);
        let mut message = encode_connect_request(1, &vmac, &ScUuid([0; 16]), 1500, 1476);
        // Claim an originating VMAC without carrying one: the 26-octet
        // payload is then misparsed as VMAC + truncated payload.
        message[1] = ControlFlags::ORIGINATING_VMAC.bits();
        assert!(decode_message(&message).is_err());
    }

    #[test]
    fn test_encapsulated_npdu_round_trip() {
        let origin = VMacAddress([1, 2, 3, 4, 5, 6]);
        let destination = VMacAddress([9, 9, 9, 9, 9, 9]);
        let npdu = [0x01, 0x20, 0xFF, 0xFF, 0x00, 0xFF, 0x10, 0x08];
        let message = encode_encapsulated_npdu(
            7,
            Some(&origin),
            Some(&destination),
            &[],
            &[OptionSpec::SecurePath {
                must_understand: false,
            }],
            &npdu,
        )
        .unwrap();

        let decoded = decode_message(&message).unwrap();
        assert_eq!(decoded.origin, Some(origin));
        assert_eq!(decoded.destination, Some(destination));
        assert_eq!(decoded.payload, ScPayload::EncapsulatedNpdu(&npdu[..]));

        let options: Vec<_> = decoded.data_options().collect();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].option, HeaderOption::SecurePath);
    }

    #[test]
    fn test_secure_path_rejected_in_dest_options() {
        // Build an encapsulated NPDU whose destination options carry a
        // secure-path marker.
        let mut message = Vec::new();
        message.push(BVLC_SC_ENCAPSULATED_NPDU);
        message.push(ControlFlags::DEST_OPTIONS.bits());
        message.extend_from_slice(&1u16.to_le_bytes());
        message.push(OPTION_TYPE_SECURE_PATH);
        message.push(0x01); // payload
        assert_eq!(
            decode_message(&message).unwrap_err(),
            BscError::HeaderEncodingError
        );
    }

    #[test]
    fn test_proprietary_option_round_trip() {
        let npdu = [0x01, 0x00];
        let message = encode_encapsulated_npdu(
            3,
            None,
            None,
            &[OptionSpec::Proprietary {
                must_understand: true,
                vendor_id: 260,
                option_type: 9,
                data: vec![0xAA, 0xBB],
            }],
            &[],
            &npdu,
        )
        .unwrap();

        let decoded = decode_message(&message).unwrap();
        let options: Vec<_> = decoded.dest_options().collect();
        assert_eq!(options.len(), 1);
        assert!(options[0].must_understand);
        assert_eq!(
            options[0].option,
            HeaderOption::Proprietary {
                vendor_id: 260,
                option_type: 9,
                data: &[0xAA, 0xBB],
            }
        );
    }

    #[test]
    fn test_zero_length_proprietary_option_accepted() {
        // Vendor id + option type only: header length 3, no data octets.
        let mut message = Vec::new();
        message.push(BVLC_SC_ENCAPSULATED_NPDU);
        message.push(ControlFlags::DEST_OPTIONS.bits());
        message.extend_from_slice(&5u16.to_le_bytes());
        message.push(OPTION_TYPE_PROPRIETARY | OPTION_HAS_DATA);
        message.extend_from_slice(&3u16.to_le_bytes());
        message.extend_from_slice(&555u16.to_le_bytes());
        message.push(42);
        message.push(0x01); // payload

        let decoded = decode_message(&message).unwrap();
        let options: Vec<_> = decoded.dest_options().collect();
        assert_eq!(
            options[0].option,
            HeaderOption::Proprietary {
                vendor_id: 555,
                option_type: 42,
                data: &[],
            }
        );
    }

    #[test]
    fn test_option_walker_counts_match_validator() {
        let message = encode_encapsulated_npdu(
            1,
            None,
            None,
            &[
                OptionSpec::Proprietary {
                    must_understand: false,
                    vendor_id: 1,
                    option_type: 1,
                    data: vec![1],
                },
                OptionSpec::Proprietary {
                    must_understand: false,
                    vendor_id: 2,
                    option_type: 2,
                    data: vec![],
                },
            ],
            &[OptionSpec::SecurePath {
                must_understand: false,
            }],
            &[0x01],
        )
        .unwrap();

        let decoded = decode_message(&message).unwrap();
        let (dest_len, dest_count) = validate_option_list(decoded.dest_options_raw, true).unwrap();
        assert_eq!(dest_len, decoded.dest_options_raw.len());
        assert_eq!(dest_count, decoded.dest_options().count());
        assert_eq!(dest_count, 2);
        assert_eq!(decoded.data_options().count(), 1);
    }

    #[test]
    fn test_advertisement_payload_length() {
        let message = encode_advertisement(5, None, None, 1, 1, 1500, 1476);
        let decoded = decode_message(&message).unwrap();
        assert_eq!(
            decoded.payload,
            ScPayload::Advertisement {
                hub_connection_status: 1,
                accept_direct_connections: 1,
                max_bvlc_length: 1500,
                max_npdu_length: 1476,
            }
        );

        // One octet short of the fixed six.
        assert_eq!(
            decode_message(&message[..message.len() - 1]).unwrap_err(),
            BscError::PayloadExpected
        );
        // One octet over.
        let mut long = message.clone();
        long.push(0);
        assert_eq!(decode_message(&long).unwrap_err(), BscError::UnexpectedData);
    }

    #[test]
    fn test_result_ack_and_nak() {
        let ack = encode_result(9, None, None, BVLC_SC_CONNECT_REQUEST, None).unwrap();
        match decode_message(&ack).unwrap().payload {
            ScPayload::Result {
                bvlc_function,
                result_code,
                error,
            } => {
                assert_eq!(bvlc_function, BVLC_SC_CONNECT_REQUEST);
                assert_eq!(result_code, 0);
                assert!(error.is_none());
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let nak = encode_result(
            9,
            None,
            None,
            BVLC_SC_CONNECT_REQUEST,
            Some(ResultError {
                error_header_marker: 0,
                error_class: ErrorClass::Communication as u16,
                error_code: u16::from(ErrorCode::NodeDuplicateVmac),
                details: "duplicate vmac",
            }),
        )
        .unwrap();
        match decode_message(&nak).unwrap().payload {
            ScPayload::Result {
                result_code, error, ..
            } => {
                assert_eq!(result_code, 1);
                let error = error.unwrap();
                assert_eq!(error.error_code, u16::from(ErrorCode::NodeDuplicateVmac));
                assert_eq!(error.details, b"duplicate vmac");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_heartbeat_payload_must_be_empty() {
        let message = encode_heartbeat_request(11);
        assert_eq!(
            decode_message(&message).unwrap().payload,
            ScPayload::HeartbeatRequest
        );

        let mut bad = message.clone();
        bad.push(0x00);
        assert_eq!(decode_message(&bad).unwrap_err(), BscError::UnexpectedData);
    }

    #[test]
    fn test_proprietary_message_round_trip() {
        let message = encode_proprietary_message(2, None, None, 555, 7, &[1, 2, 3]);
        match decode_message(&message).unwrap().payload {
            ScPayload::Proprietary {
                vendor_id,
                proprietary_function,
                data,
            } => {
                assert_eq!(vendor_id, 555);
                assert_eq!(proprietary_function, 7);
                assert_eq!(data, [1, 2, 3]);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        // Below the vendor-id + function minimum.
        let short = encode_proprietary_message(2, None, None, 555, 7, &[]);
        assert!(decode_message(&short[..short.len() - 1]).is_err());
    }

    #[test]
    fn test_unknown_function_rejected() {
        let message = [0x0D, 0x00, 0x01, 0x00];
        assert_eq!(
            decode_message(&message).unwrap_err(),
            BscError::UnknownBvlcFunction(0x0D)
        );
    }

    #[test]
    fn test_truncated_option_list() {
        let mut message = Vec::new();
        message.push(BVLC_SC_ENCAPSULATED_NPDU);
        message.push(ControlFlags::DEST_OPTIONS.bits());
        message.extend_from_slice(&1u16.to_le_bytes());
        message.push(OPTION_TYPE_PROPRIETARY | OPTION_HAS_DATA);
        message.extend_from_slice(&10u16.to_le_bytes());
        // Declared 10 octets of option data, none present.
        assert_eq!(
            decode_message(&message).unwrap_err(),
            BscError::MessageIncomplete
        );
    }
}
