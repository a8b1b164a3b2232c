//! BACnet Tagged Value Encoding and Decoding
//!
//! This module implements the BACnet application-layer codec defined in
//! ASHRAE Standard 135 clause 20: the tag-length-value scheme shared by
//! every BACnet service, and encoders/decoders for all primitive data types.
//!
//! # Overview
//!
//! Each encoded data element consists of:
//!
//! - **Tag**: identifies the data type (application class) or the position
//!   of a field within a service (context class)
//! - **Length/Value/Type**: a 3-bit field that either carries the content
//!   length directly, selects the extended-length forms, or marks the
//!   opening/closing tags of constructed data
//! - **Content**: the value octets
//!
//! # Application Tags
//!
//! | Tag | Type |
//! |-----|------|
//! | 0 | Null |
//! | 1 | Boolean |
//! | 2 | Unsigned Integer (1..8 octets) |
//! | 3 | Signed Integer (1..8 octets, two's complement) |
//! | 4 | Real (IEEE-754 single) |
//! | 5 | Double (IEEE-754 double) |
//! | 6 | Octet String |
//! | 7 | Character String (with character-set octet) |
//! | 8 | Bit String (with unused-bit-count octet) |
//! | 9 | Enumerated |
//! | 10 | Date |
//! | 11 | Time |
//! | 12 | Object Identifier |
//!
//! # Examples
//!
//! ```rust
//! use bacstack::encoding::{encode_application_unsigned, decode_application_unsigned};
//!
//! let mut buffer = Vec::new();
//! encode_application_unsigned(&mut buffer, 42).unwrap();
//! assert_eq!(buffer, [0x21, 0x2A]);
//!
//! let (value, consumed) = decode_application_unsigned(&buffer).unwrap();
//! assert_eq!(value, 42);
//! assert_eq!(consumed, 2);
//! ```
//!
//! ```rust
//! use bacstack::encoding::{encode_context_unsigned, decode_context_unsigned};
//!
//! let mut buffer = Vec::new();
//! encode_context_unsigned(&mut buffer, 3, 1000).unwrap();
//! let (value, consumed) = decode_context_unsigned(&buffer, 3).unwrap();
//! assert_eq!(value, 1000);
//! assert_eq!(consumed, buffer.len());
//! ```
//!
//! # Error Handling
//!
//! Decoders never panic on malformed input; every violation maps to a
//! specific [`EncodingError`] so service handlers can translate it into the
//! proper Reject reason.

#[cfg(feature = "std")]
use std::error::Error;

#[cfg(not(feature = "std"))]
use core::fmt;

#[cfg(feature = "std")]
use std::fmt;

#[cfg(not(feature = "std"))]
use alloc::{string::String, string::ToString, vec::Vec};

/// Result type for encoding operations
#[cfg(feature = "std")]
pub type Result<T> = std::result::Result<T, EncodingError>;

#[cfg(not(feature = "std"))]
pub type Result<T> = core::result::Result<T, EncodingError>;

/// Maximum bit-string content, in octets
pub const MAX_BITSTRING_BYTES: usize = 15;

/// Maximum character-string content, in octets, excluding the character-set octet
pub const MAX_CHARACTER_STRING_BYTES: usize = 1470;

/// Maximum octet-string content, in octets
pub const MAX_OCTET_STRING_BYTES: usize = 1470;

/// Errors that can occur during encoding/decoding operations
#[derive(Debug, Clone, PartialEq)]
pub enum EncodingError {
    /// Encoded value would not fit the output constraints
    BufferOverflow,
    /// Tag octet is malformed or uses a reserved form
    MalformedTag,
    /// Tag number does not match the expected field
    WrongTagNumber,
    /// Application tag found where a context tag was required, or vice versa
    WrongTagClass,
    /// Content length is not valid for the data type
    InvalidLength,
    /// Data ended before the declared content
    Truncated,
    /// Well-formed tag carrying data that the field does not allow
    UnexpectedData,
    /// Character string declared UTF-8 but contains invalid sequences
    InvalidUtf8,
    /// Value outside the range representable for the type
    ValueOutOfRange,
    /// Other malformed content
    InvalidFormat(String),
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingError::BufferOverflow => write!(f, "Buffer overflow during encoding"),
            EncodingError::MalformedTag => write!(f, "Malformed tag octet"),
            EncodingError::WrongTagNumber => write!(f, "Unexpected tag number"),
            EncodingError::WrongTagClass => write!(f, "Unexpected tag class"),
            EncodingError::InvalidLength => write!(f, "Invalid length for data type"),
            EncodingError::Truncated => write!(f, "Unexpected end of data"),
            EncodingError::UnexpectedData => write!(f, "Unexpected data present"),
            EncodingError::InvalidUtf8 => write!(f, "Invalid UTF-8 character string"),
            EncodingError::ValueOutOfRange => write!(f, "Value out of valid range"),
            EncodingError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl Error for EncodingError {}

/// BACnet application tag numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApplicationTag {
    Null = 0,
    Boolean = 1,
    UnsignedInt = 2,
    SignedInt = 3,
    Real = 4,
    Double = 5,
    OctetString = 6,
    CharacterString = 7,
    BitString = 8,
    Enumerated = 9,
    Date = 10,
    Time = 11,
    ObjectIdentifier = 12,
    Reserved13 = 13,
    Reserved14 = 14,
    Reserved15 = 15,
}

impl TryFrom<u8> for ApplicationTag {
    type Error = EncodingError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ApplicationTag::Null),
            1 => Ok(ApplicationTag::Boolean),
            2 => Ok(ApplicationTag::UnsignedInt),
            3 => Ok(ApplicationTag::SignedInt),
            4 => Ok(ApplicationTag::Real),
            5 => Ok(ApplicationTag::Double),
            6 => Ok(ApplicationTag::OctetString),
            7 => Ok(ApplicationTag::CharacterString),
            8 => Ok(ApplicationTag::BitString),
            9 => Ok(ApplicationTag::Enumerated),
            10 => Ok(ApplicationTag::Date),
            11 => Ok(ApplicationTag::Time),
            12 => Ok(ApplicationTag::ObjectIdentifier),
            _ => Err(EncodingError::MalformedTag),
        }
    }
}

/// What the length/value/type bits of a decoded tag describe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagContent {
    /// Primitive content of the given length in octets; for application
    /// boolean tags the "length" is the value itself
    Length(usize),
    /// Opening tag of constructed data
    Opening,
    /// Closing tag of constructed data
    Closing,
}

/// A decoded tag header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    /// Tag number: application type 0..15, or context tag 0..254
    pub number: u8,
    /// True for context-specific class, false for application class
    pub context: bool,
    /// Length or constructed marker
    pub content: TagContent,
}

impl Tag {
    /// Content length for primitive tags; opening/closing tags report 0
    pub fn length(&self) -> usize {
        match self.content {
            TagContent::Length(len) => len,
            TagContent::Opening | TagContent::Closing => 0,
        }
    }

    pub fn is_opening(&self) -> bool {
        self.content == TagContent::Opening
    }

    pub fn is_closing(&self) -> bool {
        self.content == TagContent::Closing
    }

    /// Octets of content following the header. Application booleans carry
    /// their value inside the LVT bits and have no content octets.
    pub fn content_length(&self) -> usize {
        if !self.context && self.number == ApplicationTag::Boolean as u8 {
            return 0;
        }
        self.length()
    }
}

/// Number of content octets in the minimal encoding of an unsigned integer
pub fn unsigned_length(value: u64) -> usize {
    match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        0x100_0000..=0xFFFF_FFFF => 4,
        0x1_0000_0000..=0xFF_FFFF_FFFF => 5,
        0x100_0000_0000..=0xFFFF_FFFF_FFFF => 6,
        0x1_0000_0000_0000..=0xFF_FFFF_FFFF_FFFF => 7,
        _ => 8,
    }
}

/// Number of content octets in the minimal two's-complement encoding of a
/// signed integer, preserving the sign bit
pub fn signed_length(value: i64) -> usize {
    match value {
        -0x80..=0x7F => 1,
        -0x8000..=0x7FFF => 2,
        -0x80_0000..=0x7F_FFFF => 3,
        -0x8000_0000..=0x7FFF_FFFF => 4,
        -0x80_0000_0000..=0x7F_FFFF_FFFF => 5,
        -0x8000_0000_0000..=0x7FFF_FFFF_FFFF => 6,
        -0x80_0000_0000_0000..=0x7F_FFFF_FFFF_FFFF => 7,
        _ => 8,
    }
}

fn encode_tag_inner(buffer: &mut Vec<u8>, number: u8, context: bool, lvt: u8, length: usize) {
    let class_bit = if context { 0x08 } else { 0x00 };

    if number < 15 {
        buffer.push((number << 4) | class_bit | lvt);
    } else {
        buffer.push(0xF0 | class_bit | lvt);
        buffer.push(number);
    }

    if lvt == 5 {
        if length < 254 {
            buffer.push(length as u8);
        } else if length <= 0xFFFF {
            buffer.push(254);
            buffer.extend_from_slice(&(length as u16).to_be_bytes());
        } else {
            buffer.push(255);
            buffer.extend_from_slice(&(length as u32).to_be_bytes());
        }
    }
}

/// Encode a tag header for primitive content of the given length.
///
/// Application tags pass `context = false`; context tags may use tag numbers
/// up to 254 (the extended tag-number octet is emitted automatically).
pub fn encode_tag(buffer: &mut Vec<u8>, number: u8, context: bool, length: usize) -> Result<()> {
    if number == 255 {
        return Err(EncodingError::ValueOutOfRange);
    }
    if length > u32::MAX as usize {
        return Err(EncodingError::BufferOverflow);
    }
    if length < 5 {
        encode_tag_inner(buffer, number, context, length as u8, 0);
    } else {
        encode_tag_inner(buffer, number, context, 5, length);
    }
    Ok(())
}

/// Encode an opening tag for constructed data
pub fn encode_opening_tag(buffer: &mut Vec<u8>, number: u8) -> Result<()> {
    if number == 255 {
        return Err(EncodingError::ValueOutOfRange);
    }
    encode_tag_inner(buffer, number, true, 6, 0);
    Ok(())
}

/// Encode a closing tag for constructed data
pub fn encode_closing_tag(buffer: &mut Vec<u8>, number: u8) -> Result<()> {
    if number == 255 {
        return Err(EncodingError::ValueOutOfRange);
    }
    encode_tag_inner(buffer, number, true, 7, 0);
    Ok(())
}

/// Decode a tag header, returning the tag and the octets consumed.
///
/// Rejects reserved forms and non-minimal extended-length encodings.
pub fn decode_tag(data: &[u8]) -> Result<(Tag, usize)> {
    let first = *data.first().ok_or(EncodingError::Truncated)?;
    let context = first & 0x08 != 0;
    let mut consumed = 1;

    let number = if first & 0xF0 == 0xF0 {
        if !context {
            // Application tag numbers stop at 15; the 0xF nibble on an
            // application-class tag has no extended form.
            return Err(EncodingError::MalformedTag);
        }
        let ext = *data.get(1).ok_or(EncodingError::Truncated)?;
        if ext == 255 {
            return Err(EncodingError::MalformedTag);
        }
        consumed += 1;
        ext
    } else {
        first >> 4
    };

    let content = match first & 0x07 {
        len @ 0..=4 => TagContent::Length(len as usize),
        5 => {
            let len_byte = *data.get(consumed).ok_or(EncodingError::Truncated)?;
            consumed += 1;
            match len_byte {
                0..=253 => {
                    if len_byte < 5 {
                        return Err(EncodingError::MalformedTag);
                    }
                    TagContent::Length(len_byte as usize)
                }
                254 => {
                    if data.len() < consumed + 2 {
                        return Err(EncodingError::Truncated);
                    }
                    let len = u16::from_be_bytes([data[consumed], data[consumed + 1]]) as usize;
                    consumed += 2;
                    if len < 254 {
                        return Err(EncodingError::MalformedTag);
                    }
                    TagContent::Length(len)
                }
                255 => {
                    if data.len() < consumed + 4 {
                        return Err(EncodingError::Truncated);
                    }
                    let len = u32::from_be_bytes([
                        data[consumed],
                        data[consumed + 1],
                        data[consumed + 2],
                        data[consumed + 3],
                    ]) as usize;
                    consumed += 4;
                    if len <= 0xFFFF {
                        return Err(EncodingError::MalformedTag);
                    }
                    TagContent::Length(len)
                }
            }
        }
        6 => TagContent::Opening,
        7 => TagContent::Closing,
        _ => unreachable!(),
    };

    if matches!(content, TagContent::Opening | TagContent::Closing) && !context {
        return Err(EncodingError::MalformedTag);
    }

    Ok((
        Tag {
            number,
            context,
            content,
        },
        consumed,
    ))
}

fn expect_application_tag(data: &[u8], expected: ApplicationTag) -> Result<(usize, usize)> {
    let (tag, consumed) = decode_tag(data)?;
    if tag.context {
        return Err(EncodingError::WrongTagClass);
    }
    if tag.number != expected as u8 {
        return Err(EncodingError::WrongTagNumber);
    }
    let length = tag.length();
    if data.len() < consumed + length {
        return Err(EncodingError::Truncated);
    }
    Ok((length, consumed))
}

fn expect_context_tag(data: &[u8], tag_number: u8) -> Result<(usize, usize)> {
    let (tag, consumed) = decode_tag(data)?;
    if !tag.context {
        return Err(EncodingError::WrongTagClass);
    }
    if tag.number != tag_number {
        return Err(EncodingError::WrongTagNumber);
    }
    match tag.content {
        TagContent::Length(length) => {
            if data.len() < consumed + length {
                return Err(EncodingError::Truncated);
            }
            Ok((length, consumed))
        }
        _ => Err(EncodingError::MalformedTag),
    }
}

/// Check whether the data starts with the given opening tag
pub fn is_opening_tag_number(data: &[u8], tag_number: u8) -> bool {
    matches!(decode_tag(data), Ok((tag, _)) if tag.context && tag.number == tag_number && tag.is_opening())
}

/// Check whether the data starts with the given closing tag
pub fn is_closing_tag_number(data: &[u8], tag_number: u8) -> bool {
    matches!(decode_tag(data), Ok((tag, _)) if tag.context && tag.number == tag_number && tag.is_closing())
}

/// Check whether the data starts with the given context tag (any form)
pub fn is_context_tag_number(data: &[u8], tag_number: u8) -> bool {
    matches!(decode_tag(data), Ok((tag, _)) if tag.context && tag.number == tag_number)
}

// --- Null ---

/// Encode an application-tagged null
pub fn encode_application_null(buffer: &mut Vec<u8>) -> Result<()> {
    encode_tag(buffer, ApplicationTag::Null as u8, false, 0)
}

/// Decode an application-tagged null
pub fn decode_application_null(data: &[u8]) -> Result<usize> {
    let (length, consumed) = expect_application_tag(data, ApplicationTag::Null)?;
    if length != 0 {
        return Err(EncodingError::InvalidLength);
    }
    Ok(consumed)
}

/// Encode a context-tagged null (a zero-length context tag)
pub fn encode_context_null(buffer: &mut Vec<u8>, tag_number: u8) -> Result<()> {
    encode_tag(buffer, tag_number, true, 0)
}

// --- Boolean ---

/// Encode an application-tagged boolean; the value lives in the LVT bits
pub fn encode_application_boolean(buffer: &mut Vec<u8>, value: bool) -> Result<()> {
    encode_tag(
        buffer,
        ApplicationTag::Boolean as u8,
        false,
        if value { 1 } else { 0 },
    )
}

/// Decode an application-tagged boolean
pub fn decode_application_boolean(data: &[u8]) -> Result<(bool, usize)> {
    let (tag, consumed) = decode_tag(data)?;
    if tag.context {
        return Err(EncodingError::WrongTagClass);
    }
    if tag.number != ApplicationTag::Boolean as u8 {
        return Err(EncodingError::WrongTagNumber);
    }
    match tag.content {
        TagContent::Length(0) => Ok((false, consumed)),
        TagContent::Length(1) => Ok((true, consumed)),
        _ => Err(EncodingError::InvalidLength),
    }
}

/// Encode a context-tagged boolean; context class moves the value into a
/// single content octet
pub fn encode_context_boolean(buffer: &mut Vec<u8>, tag_number: u8, value: bool) -> Result<()> {
    encode_tag(buffer, tag_number, true, 1)?;
    buffer.push(if value { 1 } else { 0 });
    Ok(())
}

/// Decode a context-tagged boolean
pub fn decode_context_boolean(data: &[u8], tag_number: u8) -> Result<(bool, usize)> {
    let (length, consumed) = expect_context_tag(data, tag_number)?;
    if length != 1 {
        return Err(EncodingError::InvalidLength);
    }
    match data[consumed] {
        0 => Ok((false, consumed + 1)),
        1 => Ok((true, consumed + 1)),
        _ => Err(EncodingError::InvalidFormat("boolean octet".to_string())),
    }
}

// --- Unsigned integer ---

fn push_unsigned_content(buffer: &mut Vec<u8>, value: u64) {
    let len = unsigned_length(value);
    buffer.extend_from_slice(&value.to_be_bytes()[8 - len..]);
}

fn parse_unsigned_content(data: &[u8]) -> Result<u64> {
    if data.is_empty() || data.len() > 8 {
        return Err(EncodingError::InvalidLength);
    }
    let mut value = 0u64;
    for &byte in data {
        value = (value << 8) | byte as u64;
    }
    Ok(value)
}

fn parse_signed_content(data: &[u8]) -> Result<i64> {
    if data.is_empty() || data.len() > 8 {
        return Err(EncodingError::InvalidLength);
    }
    let mut value: i64 = if data[0] & 0x80 != 0 { -1 } else { 0 };
    for &byte in data {
        value = (value << 8) | byte as i64;
    }
    Ok(value)
}

/// Encode an application-tagged unsigned integer in its minimal width
pub fn encode_application_unsigned(buffer: &mut Vec<u8>, value: u64) -> Result<()> {
    encode_tag(
        buffer,
        ApplicationTag::UnsignedInt as u8,
        false,
        unsigned_length(value),
    )?;
    push_unsigned_content(buffer, value);
    Ok(())
}

/// Decode an application-tagged unsigned integer
pub fn decode_application_unsigned(data: &[u8]) -> Result<(u64, usize)> {
    let (length, consumed) = expect_application_tag(data, ApplicationTag::UnsignedInt)?;
    let value = parse_unsigned_content(&data[consumed..consumed + length])?;
    Ok((value, consumed + length))
}

/// Encode a context-tagged unsigned integer
pub fn encode_context_unsigned(buffer: &mut Vec<u8>, tag_number: u8, value: u64) -> Result<()> {
    encode_tag(buffer, tag_number, true, unsigned_length(value))?;
    push_unsigned_content(buffer, value);
    Ok(())
}

/// Decode a context-tagged unsigned integer
pub fn decode_context_unsigned(data: &[u8], tag_number: u8) -> Result<(u64, usize)> {
    let (length, consumed) = expect_context_tag(data, tag_number)?;
    let value = parse_unsigned_content(&data[consumed..consumed + length])?;
    Ok((value, consumed + length))
}

// --- Signed integer ---

fn push_signed_content(buffer: &mut Vec<u8>, value: i64) {
    let len = signed_length(value);
    buffer.extend_from_slice(&value.to_be_bytes()[8 - len..]);
}

/// Encode an application-tagged signed integer in its minimal width
pub fn encode_application_signed(buffer: &mut Vec<u8>, value: i64) -> Result<()> {
    encode_tag(
        buffer,
        ApplicationTag::SignedInt as u8,
        false,
        signed_length(value),
    )?;
    push_signed_content(buffer, value);
    Ok(())
}

/// Decode an application-tagged signed integer
pub fn decode_application_signed(data: &[u8]) -> Result<(i64, usize)> {
    let (length, consumed) = expect_application_tag(data, ApplicationTag::SignedInt)?;
    let value = parse_signed_content(&data[consumed..consumed + length])?;
    Ok((value, consumed + length))
}

/// Encode a context-tagged signed integer
pub fn encode_context_signed(buffer: &mut Vec<u8>, tag_number: u8, value: i64) -> Result<()> {
    encode_tag(buffer, tag_number, true, signed_length(value))?;
    push_signed_content(buffer, value);
    Ok(())
}

/// Decode a context-tagged signed integer
pub fn decode_context_signed(data: &[u8], tag_number: u8) -> Result<(i64, usize)> {
    let (length, consumed) = expect_context_tag(data, tag_number)?;
    let value = parse_signed_content(&data[consumed..consumed + length])?;
    Ok((value, consumed + length))
}

// --- Real / Double ---

/// Encode an application-tagged IEEE-754 single
pub fn encode_application_real(buffer: &mut Vec<u8>, value: f32) -> Result<()> {
    encode_tag(buffer, ApplicationTag::Real as u8, false, 4)?;
    buffer.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Decode an application-tagged IEEE-754 single
pub fn decode_application_real(data: &[u8]) -> Result<(f32, usize)> {
    let (length, consumed) = expect_application_tag(data, ApplicationTag::Real)?;
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }
    let value = f32::from_be_bytes([
        data[consumed],
        data[consumed + 1],
        data[consumed + 2],
        data[consumed + 3],
    ]);
    Ok((value, consumed + 4))
}

/// Encode a context-tagged IEEE-754 single
pub fn encode_context_real(buffer: &mut Vec<u8>, tag_number: u8, value: f32) -> Result<()> {
    encode_tag(buffer, tag_number, true, 4)?;
    buffer.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Decode a context-tagged IEEE-754 single
pub fn decode_context_real(data: &[u8], tag_number: u8) -> Result<(f32, usize)> {
    let (length, consumed) = expect_context_tag(data, tag_number)?;
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }
    let value = f32::from_be_bytes([
        data[consumed],
        data[consumed + 1],
        data[consumed + 2],
        data[consumed + 3],
    ]);
    Ok((value, consumed + 4))
}

/// Encode an application-tagged IEEE-754 double
pub fn encode_application_double(buffer: &mut Vec<u8>, value: f64) -> Result<()> {
    encode_tag(buffer, ApplicationTag::Double as u8, false, 8)?;
    buffer.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Decode an application-tagged IEEE-754 double
pub fn decode_application_double(data: &[u8]) -> Result<(f64, usize)> {
    let (length, consumed) = expect_application_tag(data, ApplicationTag::Double)?;
    if length != 8 {
        return Err(EncodingError::InvalidLength);
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[consumed..consumed + 8]);
    Ok((f64::from_be_bytes(bytes), consumed + 8))
}

// --- Octet string ---

/// Encode an application-tagged octet string
pub fn encode_application_octet_string(buffer: &mut Vec<u8>, value: &[u8]) -> Result<()> {
    if value.len() > MAX_OCTET_STRING_BYTES {
        return Err(EncodingError::BufferOverflow);
    }
    encode_tag(buffer, ApplicationTag::OctetString as u8, false, value.len())?;
    buffer.extend_from_slice(value);
    Ok(())
}

/// Decode an application-tagged octet string, borrowing the content
pub fn decode_application_octet_string(data: &[u8]) -> Result<(&[u8], usize)> {
    let (length, consumed) = expect_application_tag(data, ApplicationTag::OctetString)?;
    if length > MAX_OCTET_STRING_BYTES {
        return Err(EncodingError::ValueOutOfRange);
    }
    Ok((&data[consumed..consumed + length], consumed + length))
}

/// Encode a context-tagged octet string
pub fn encode_context_octet_string(buffer: &mut Vec<u8>, tag_number: u8, value: &[u8]) -> Result<()> {
    if value.len() > MAX_OCTET_STRING_BYTES {
        return Err(EncodingError::BufferOverflow);
    }
    encode_tag(buffer, tag_number, true, value.len())?;
    buffer.extend_from_slice(value);
    Ok(())
}

/// Decode a context-tagged octet string, borrowing the content
pub fn decode_context_octet_string(data: &[u8], tag_number: u8) -> Result<(&[u8], usize)> {
    let (length, consumed) = expect_context_tag(data, tag_number)?;
    Ok((&data[consumed..consumed + length], consumed + length))
}

// --- Character string ---

/// BACnet character-set codes (clause 20.2.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CharacterSet {
    /// ANSI X3.4 / UTF-8
    Utf8 = 0,
    /// IBM/Microsoft double-byte character set
    Dbcs = 1,
    /// JIS X 0208
    Jis = 2,
    /// ISO 10646 UCS-4
    Ucs4 = 3,
    /// ISO 10646 UCS-2 (big endian)
    Ucs2 = 4,
    /// ISO 8859-1
    Latin1 = 5,
}

impl TryFrom<u8> for CharacterSet {
    type Error = EncodingError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CharacterSet::Utf8),
            1 => Ok(CharacterSet::Dbcs),
            2 => Ok(CharacterSet::Jis),
            3 => Ok(CharacterSet::Ucs4),
            4 => Ok(CharacterSet::Ucs2),
            5 => Ok(CharacterSet::Latin1),
            _ => Err(EncodingError::InvalidFormat("character set".to_string())),
        }
    }
}

/// A BACnet character string: raw content octets plus the character-set code
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterString {
    pub encoding: CharacterSet,
    pub bytes: Vec<u8>,
}

impl CharacterString {
    /// Build a UTF-8 character string
    pub fn utf8(value: &str) -> Self {
        Self {
            encoding: CharacterSet::Utf8,
            bytes: value.as_bytes().to_vec(),
        }
    }

    /// Convert the content to a Rust string.
    ///
    /// UTF-8 content is validated; UCS-2 and Latin-1 are transcoded through
    /// `encoding_rs`; UCS-4 is transcoded code point by code point. DBCS and
    /// JIS content is not convertible.
    pub fn to_string_lossless(&self) -> Result<String> {
        match self.encoding {
            CharacterSet::Utf8 => core::str::from_utf8(&self.bytes)
                .map(|s| s.to_string())
                .map_err(|_| EncodingError::InvalidUtf8),
            CharacterSet::Ucs2 => {
                if self.bytes.len() % 2 != 0 {
                    return Err(EncodingError::InvalidLength);
                }
                let (decoded, _, had_errors) = encoding_rs::UTF_16BE.decode(&self.bytes);
                if had_errors {
                    return Err(EncodingError::InvalidFormat("UCS-2 content".to_string()));
                }
                Ok(decoded.into_owned())
            }
            CharacterSet::Latin1 => {
                let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&self.bytes);
                Ok(decoded.into_owned())
            }
            CharacterSet::Ucs4 => {
                if self.bytes.len() % 4 != 0 {
                    return Err(EncodingError::InvalidLength);
                }
                let mut out = String::with_capacity(self.bytes.len() / 4);
                for chunk in self.bytes.chunks_exact(4) {
                    let code = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    let ch = char::from_u32(code)
                        .ok_or_else(|| EncodingError::InvalidFormat("UCS-4 code point".to_string()))?;
                    out.push(ch);
                }
                Ok(out)
            }
            CharacterSet::Dbcs | CharacterSet::Jis => Err(EncodingError::InvalidFormat(
                "character set has no lossless conversion".to_string(),
            )),
        }
    }
}

/// Encode an application-tagged character string
pub fn encode_application_character_string(
    buffer: &mut Vec<u8>,
    value: &CharacterString,
) -> Result<()> {
    if value.bytes.len() > MAX_CHARACTER_STRING_BYTES {
        return Err(EncodingError::BufferOverflow);
    }
    encode_tag(
        buffer,
        ApplicationTag::CharacterString as u8,
        false,
        value.bytes.len() + 1,
    )?;
    buffer.push(value.encoding as u8);
    buffer.extend_from_slice(&value.bytes);
    Ok(())
}

/// Encode a UTF-8 string as an application-tagged character string
pub fn encode_application_string(buffer: &mut Vec<u8>, value: &str) -> Result<()> {
    encode_application_character_string(buffer, &CharacterString::utf8(value))
}

fn character_string_from_content(content: &[u8]) -> Result<CharacterString> {
    let encoding = CharacterSet::try_from(*content.first().ok_or(EncodingError::InvalidLength)?)?;
    let bytes = content[1..].to_vec();
    if encoding == CharacterSet::Utf8 && core::str::from_utf8(&bytes).is_err() {
        return Err(EncodingError::InvalidUtf8);
    }
    Ok(CharacterString { encoding, bytes })
}

/// Decode an application-tagged character string
pub fn decode_application_character_string(data: &[u8]) -> Result<(CharacterString, usize)> {
    let (length, consumed) = expect_application_tag(data, ApplicationTag::CharacterString)?;
    let value = character_string_from_content(&data[consumed..consumed + length])?;
    Ok((value, consumed + length))
}

/// Encode a context-tagged character string
pub fn encode_context_character_string(
    buffer: &mut Vec<u8>,
    tag_number: u8,
    value: &CharacterString,
) -> Result<()> {
    if value.bytes.len() > MAX_CHARACTER_STRING_BYTES {
        return Err(EncodingError::BufferOverflow);
    }
    encode_tag(buffer, tag_number, true, value.bytes.len() + 1)?;
    buffer.push(value.encoding as u8);
    buffer.extend_from_slice(&value.bytes);
    Ok(())
}

/// Decode a context-tagged character string
pub fn decode_context_character_string(
    data: &[u8],
    tag_number: u8,
) -> Result<(CharacterString, usize)> {
    let (length, consumed) = expect_context_tag(data, tag_number)?;
    let value = character_string_from_content(&data[consumed..consumed + length])?;
    Ok((value, consumed + length))
}

// --- Bit string ---

/// A BACnet bit string, most-significant bit first within each octet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitString {
    bits_used: u8,
    octets: Vec<u8>,
}

impl BitString {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bit string from individual bits, first bit first
    pub fn from_bits(bits: &[bool]) -> Result<Self> {
        if bits.len() > MAX_BITSTRING_BYTES * 8 {
            return Err(EncodingError::ValueOutOfRange);
        }
        let mut value = Self::new();
        for (i, &bit) in bits.iter().enumerate() {
            value.set_bit(i as u8, bit)?;
        }
        Ok(value)
    }

    /// Set bit `bit_number`, growing the string if needed
    pub fn set_bit(&mut self, bit_number: u8, value: bool) -> Result<()> {
        let byte_index = (bit_number / 8) as usize;
        if byte_index >= MAX_BITSTRING_BYTES {
            return Err(EncodingError::ValueOutOfRange);
        }
        while self.octets.len() <= byte_index {
            self.octets.push(0);
        }
        let mask = 1 << (7 - (bit_number % 8));
        if value {
            self.octets[byte_index] |= mask;
        } else {
            self.octets[byte_index] &= !mask;
        }
        if bit_number >= self.bits_used {
            self.bits_used = bit_number + 1;
        }
        Ok(())
    }

    /// Read bit `bit_number`; bits beyond `bits_used` read as false
    pub fn bit(&self, bit_number: u8) -> bool {
        if bit_number >= self.bits_used {
            return false;
        }
        let byte_index = (bit_number / 8) as usize;
        self.octets[byte_index] & (1 << (7 - (bit_number % 8))) != 0
    }

    pub fn bits_used(&self) -> u8 {
        self.bits_used
    }

    pub fn octets(&self) -> &[u8] {
        &self.octets
    }

    /// Number of content octets the string occupies
    pub fn bytes_used(&self) -> usize {
        (self.bits_used as usize).div_ceil(8)
    }
}

/// Encode an application-tagged bit string
pub fn encode_application_bit_string(buffer: &mut Vec<u8>, value: &BitString) -> Result<()> {
    let bytes_used = value.bytes_used();
    encode_tag(buffer, ApplicationTag::BitString as u8, false, bytes_used + 1)?;
    push_bit_string_content(buffer, value, bytes_used);
    Ok(())
}

fn push_bit_string_content(buffer: &mut Vec<u8>, value: &BitString, bytes_used: usize) {
    let unused = (8 - value.bits_used() % 8) % 8;
    buffer.push(unused);
    for (i, &octet) in value.octets()[..bytes_used].iter().enumerate() {
        // Zero the trailing unused bits on the wire.
        if i == bytes_used - 1 && unused > 0 {
            buffer.push(octet & (0xFF << unused));
        } else {
            buffer.push(octet);
        }
    }
}

fn bit_string_from_content(content: &[u8]) -> Result<BitString> {
    let unused = *content.first().ok_or(EncodingError::InvalidLength)?;
    if unused > 7 {
        return Err(EncodingError::InvalidFormat("unused bit count".to_string()));
    }
    let octets = &content[1..];
    if octets.len() > MAX_BITSTRING_BYTES {
        return Err(EncodingError::ValueOutOfRange);
    }
    if octets.is_empty() && unused != 0 {
        return Err(EncodingError::InvalidFormat("unused bit count".to_string()));
    }
    let bits_used = octets.len() * 8 - unused as usize;
    let mut value = BitString {
        bits_used: bits_used as u8,
        octets: octets.to_vec(),
    };
    // Mask trailing unused bits so equality is well defined.
    if unused > 0 {
        let last = value.octets.len() - 1;
        value.octets[last] &= 0xFF << unused;
    }
    Ok(value)
}

/// Decode an application-tagged bit string
pub fn decode_application_bit_string(data: &[u8]) -> Result<(BitString, usize)> {
    let (length, consumed) = expect_application_tag(data, ApplicationTag::BitString)?;
    let value = bit_string_from_content(&data[consumed..consumed + length])?;
    Ok((value, consumed + length))
}

/// Encode a context-tagged bit string
pub fn encode_context_bit_string(buffer: &mut Vec<u8>, tag_number: u8, value: &BitString) -> Result<()> {
    let bytes_used = value.bytes_used();
    encode_tag(buffer, tag_number, true, bytes_used + 1)?;
    push_bit_string_content(buffer, value, bytes_used);
    Ok(())
}

/// Decode a context-tagged bit string
pub fn decode_context_bit_string(data: &[u8], tag_number: u8) -> Result<(BitString, usize)> {
    let (length, consumed) = expect_context_tag(data, tag_number)?;
    let value = bit_string_from_content(&data[consumed..consumed + length])?;
    Ok((value, consumed + length))
}

// --- Enumerated ---

/// Encode an application-tagged enumerated value
pub fn encode_application_enumerated(buffer: &mut Vec<u8>, value: u32) -> Result<()> {
    encode_tag(
        buffer,
        ApplicationTag::Enumerated as u8,
        false,
        unsigned_length(value as u64),
    )?;
    push_unsigned_content(buffer, value as u64);
    Ok(())
}

/// Decode an application-tagged enumerated value
pub fn decode_application_enumerated(data: &[u8]) -> Result<(u32, usize)> {
    let (length, consumed) = expect_application_tag(data, ApplicationTag::Enumerated)?;
    if length > 4 {
        return Err(EncodingError::InvalidLength);
    }
    let value = parse_unsigned_content(&data[consumed..consumed + length])?;
    Ok((value as u32, consumed + length))
}

/// Encode a context-tagged enumerated value
pub fn encode_context_enumerated(buffer: &mut Vec<u8>, tag_number: u8, value: u32) -> Result<()> {
    encode_tag(buffer, tag_number, true, unsigned_length(value as u64))?;
    push_unsigned_content(buffer, value as u64);
    Ok(())
}

/// Decode a context-tagged enumerated value
pub fn decode_context_enumerated(data: &[u8], tag_number: u8) -> Result<(u32, usize)> {
    let (length, consumed) = expect_context_tag(data, tag_number)?;
    if length > 4 {
        return Err(EncodingError::InvalidLength);
    }
    let value = parse_unsigned_content(&data[consumed..consumed + length])?;
    Ok((value as u32, consumed + length))
}

// --- Date / Time ---

/// A BACnet date; 255 in any octet is the "any" wildcard.
///
/// The year octet on the wire is offset from 1900; this struct stores the
/// full year (or 255 for the wildcard). Month 13/14 mean odd/even months,
/// day 32 means the last day of the month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub weekday: u8,
}

impl Date {
    pub const WILDCARD: Date = Date {
        year: 255,
        month: 255,
        day: 255,
        weekday: 255,
    };

    pub fn new(year: u16, month: u8, day: u8, weekday: u8) -> Self {
        Self {
            year,
            month,
            day,
            weekday,
        }
    }

    /// True when any field carries a wildcard or range sentinel
    pub fn has_wildcard(&self) -> bool {
        self.year == 255 || self.month >= 13 || self.day >= 32 || self.weekday == 255
    }
}

/// A BACnet time; 255 in any octet is the "any" wildcard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
}

impl Time {
    pub const WILDCARD: Time = Time {
        hour: 255,
        minute: 255,
        second: 255,
        hundredths: 255,
    };

    pub fn new(hour: u8, minute: u8, second: u8, hundredths: u8) -> Self {
        Self {
            hour,
            minute,
            second,
            hundredths,
        }
    }

    pub fn has_wildcard(&self) -> bool {
        self.hour == 255 || self.minute == 255 || self.second == 255 || self.hundredths == 255
    }
}

fn date_content(value: &Date) -> [u8; 4] {
    let year_octet = if value.year == 255 {
        255
    } else {
        (value.year.wrapping_sub(1900) & 0xFF) as u8
    };
    [year_octet, value.month, value.day, value.weekday]
}

fn date_from_content(content: &[u8]) -> Date {
    let year = if content[0] == 255 {
        255
    } else {
        1900 + content[0] as u16
    };
    Date {
        year,
        month: content[1],
        day: content[2],
        weekday: content[3],
    }
}

/// Encode an application-tagged date
pub fn encode_application_date(buffer: &mut Vec<u8>, value: &Date) -> Result<()> {
    encode_tag(buffer, ApplicationTag::Date as u8, false, 4)?;
    buffer.extend_from_slice(&date_content(value));
    Ok(())
}

/// Decode an application-tagged date
pub fn decode_application_date(data: &[u8]) -> Result<(Date, usize)> {
    let (length, consumed) = expect_application_tag(data, ApplicationTag::Date)?;
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }
    Ok((date_from_content(&data[consumed..consumed + 4]), consumed + 4))
}

/// Encode a context-tagged date
pub fn encode_context_date(buffer: &mut Vec<u8>, tag_number: u8, value: &Date) -> Result<()> {
    encode_tag(buffer, tag_number, true, 4)?;
    buffer.extend_from_slice(&date_content(value));
    Ok(())
}

/// Decode a context-tagged date
pub fn decode_context_date(data: &[u8], tag_number: u8) -> Result<(Date, usize)> {
    let (length, consumed) = expect_context_tag(data, tag_number)?;
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }
    Ok((date_from_content(&data[consumed..consumed + 4]), consumed + 4))
}

/// Encode an application-tagged time
pub fn encode_application_time(buffer: &mut Vec<u8>, value: &Time) -> Result<()> {
    encode_tag(buffer, ApplicationTag::Time as u8, false, 4)?;
    buffer.extend_from_slice(&[value.hour, value.minute, value.second, value.hundredths]);
    Ok(())
}

/// Decode an application-tagged time
pub fn decode_application_time(data: &[u8]) -> Result<(Time, usize)> {
    let (length, consumed) = expect_application_tag(data, ApplicationTag::Time)?;
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }
    let value = Time {
        hour: data[consumed],
        minute: data[consumed + 1],
        second: data[consumed + 2],
        hundredths: data[consumed + 3],
    };
    Ok((value, consumed + 4))
}

/// Encode a context-tagged time
pub fn encode_context_time(buffer: &mut Vec<u8>, tag_number: u8, value: &Time) -> Result<()> {
    encode_tag(buffer, tag_number, true, 4)?;
    buffer.extend_from_slice(&[value.hour, value.minute, value.second, value.hundredths]);
    Ok(())
}

/// Decode a context-tagged time
pub fn decode_context_time(data: &[u8], tag_number: u8) -> Result<(Time, usize)> {
    let (length, consumed) = expect_context_tag(data, tag_number)?;
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }
    let value = Time {
        hour: data[consumed],
        minute: data[consumed + 1],
        second: data[consumed + 2],
        hundredths: data[consumed + 3],
    };
    Ok((value, consumed + 4))
}

/// A BACnet date-time pair, encoded as consecutive date and time values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
}

impl DateTime {
    pub const WILDCARD: DateTime = DateTime {
        date: Date::WILDCARD,
        time: Time::WILDCARD,
    };

    pub fn new(date: Date, time: Time) -> Self {
        Self { date, time }
    }

    pub fn has_wildcard(&self) -> bool {
        self.date.has_wildcard() || self.time.has_wildcard()
    }
}

/// Encode a date-time wrapped in an opening/closing context tag pair
pub fn encode_context_date_time(buffer: &mut Vec<u8>, tag_number: u8, value: &DateTime) -> Result<()> {
    encode_opening_tag(buffer, tag_number)?;
    encode_application_date(buffer, &value.date)?;
    encode_application_time(buffer, &value.time)?;
    encode_closing_tag(buffer, tag_number)
}

/// Decode a date-time wrapped in an opening/closing context tag pair
pub fn decode_context_date_time(data: &[u8], tag_number: u8) -> Result<(DateTime, usize)> {
    let (tag, mut pos) = decode_tag(data)?;
    if !tag.context || tag.number != tag_number || !tag.is_opening() {
        return Err(EncodingError::WrongTagNumber);
    }
    let (date, used) = decode_application_date(&data[pos..])?;
    pos += used;
    let (time, used) = decode_application_time(&data[pos..])?;
    pos += used;
    let (tag, used) = decode_tag(&data[pos..])?;
    if !tag.context || tag.number != tag_number || !tag.is_closing() {
        return Err(EncodingError::WrongTagNumber);
    }
    pos += used;
    Ok((DateTime { date, time }, pos))
}

// --- Object identifier ---

/// Encode an application-tagged object identifier
pub fn encode_application_object_id(buffer: &mut Vec<u8>, object_type: u16, instance: u32) -> Result<()> {
    if object_type > 0x3FF || instance > 0x3FFFFF {
        return Err(EncodingError::ValueOutOfRange);
    }
    encode_tag(buffer, ApplicationTag::ObjectIdentifier as u8, false, 4)?;
    buffer.extend_from_slice(&(((object_type as u32) << 22) | instance).to_be_bytes());
    Ok(())
}

/// Decode an application-tagged object identifier
pub fn decode_application_object_id(data: &[u8]) -> Result<((u16, u32), usize)> {
    let (length, consumed) = expect_application_tag(data, ApplicationTag::ObjectIdentifier)?;
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }
    let raw = u32::from_be_bytes([
        data[consumed],
        data[consumed + 1],
        data[consumed + 2],
        data[consumed + 3],
    ]);
    Ok((((raw >> 22) as u16, raw & 0x3FFFFF), consumed + 4))
}

/// Encode a context-tagged object identifier
pub fn encode_context_object_id(
    buffer: &mut Vec<u8>,
    tag_number: u8,
    object_type: u16,
    instance: u32,
) -> Result<()> {
    if object_type > 0x3FF || instance > 0x3FFFFF {
        return Err(EncodingError::ValueOutOfRange);
    }
    encode_tag(buffer, tag_number, true, 4)?;
    buffer.extend_from_slice(&(((object_type as u32) << 22) | instance).to_be_bytes());
    Ok(())
}

/// Decode a context-tagged object identifier
pub fn decode_context_object_id(data: &[u8], tag_number: u8) -> Result<((u16, u32), usize)> {
    let (length, consumed) = expect_context_tag(data, tag_number)?;
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }
    let raw = u32::from_be_bytes([
        data[consumed],
        data[consumed + 1],
        data[consumed + 2],
        data[consumed + 3],
    ]);
    Ok((((raw >> 22) as u16, raw & 0x3FFFFF), consumed + 4))
}

// --- Application value sum type ---

/// A decoded application-tagged value of any primitive type
#[derive(Debug, Clone, PartialEq)]
pub enum ApplicationValue {
    Null,
    Boolean(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f32),
    Double(f64),
    OctetString(Vec<u8>),
    CharacterString(CharacterString),
    BitString(BitString),
    Enumerated(u32),
    Date(Date),
    Time(Time),
    ObjectIdentifier(u16, u32),
}

impl ApplicationValue {
    /// The application tag this value encodes with
    pub fn tag(&self) -> ApplicationTag {
        match self {
            ApplicationValue::Null => ApplicationTag::Null,
            ApplicationValue::Boolean(_) => ApplicationTag::Boolean,
            ApplicationValue::Unsigned(_) => ApplicationTag::UnsignedInt,
            ApplicationValue::Signed(_) => ApplicationTag::SignedInt,
            ApplicationValue::Real(_) => ApplicationTag::Real,
            ApplicationValue::Double(_) => ApplicationTag::Double,
            ApplicationValue::OctetString(_) => ApplicationTag::OctetString,
            ApplicationValue::CharacterString(_) => ApplicationTag::CharacterString,
            ApplicationValue::BitString(_) => ApplicationTag::BitString,
            ApplicationValue::Enumerated(_) => ApplicationTag::Enumerated,
            ApplicationValue::Date(_) => ApplicationTag::Date,
            ApplicationValue::Time(_) => ApplicationTag::Time,
            ApplicationValue::ObjectIdentifier(_, _) => ApplicationTag::ObjectIdentifier,
        }
    }

    /// Encode the value with its application tag
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        match self {
            ApplicationValue::Null => encode_application_null(buffer),
            ApplicationValue::Boolean(v) => encode_application_boolean(buffer, *v),
            ApplicationValue::Unsigned(v) => encode_application_unsigned(buffer, *v),
            ApplicationValue::Signed(v) => encode_application_signed(buffer, *v),
            ApplicationValue::Real(v) => encode_application_real(buffer, *v),
            ApplicationValue::Double(v) => encode_application_double(buffer, *v),
            ApplicationValue::OctetString(v) => encode_application_octet_string(buffer, v),
            ApplicationValue::CharacterString(v) => encode_application_character_string(buffer, v),
            ApplicationValue::BitString(v) => encode_application_bit_string(buffer, v),
            ApplicationValue::Enumerated(v) => encode_application_enumerated(buffer, *v),
            ApplicationValue::Date(v) => encode_application_date(buffer, v),
            ApplicationValue::Time(v) => encode_application_time(buffer, v),
            ApplicationValue::ObjectIdentifier(t, i) => {
                encode_application_object_id(buffer, *t, *i)
            }
        }
    }

    /// Decode one application-tagged value of any primitive type
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let (tag, _) = decode_tag(data)?;
        if tag.context {
            return Err(EncodingError::WrongTagClass);
        }
        match ApplicationTag::try_from(tag.number)? {
            ApplicationTag::Null => decode_application_null(data).map(|c| (ApplicationValue::Null, c)),
            ApplicationTag::Boolean => {
                decode_application_boolean(data).map(|(v, c)| (ApplicationValue::Boolean(v), c))
            }
            ApplicationTag::UnsignedInt => {
                decode_application_unsigned(data).map(|(v, c)| (ApplicationValue::Unsigned(v), c))
            }
            ApplicationTag::SignedInt => {
                decode_application_signed(data).map(|(v, c)| (ApplicationValue::Signed(v), c))
            }
            ApplicationTag::Real => {
                decode_application_real(data).map(|(v, c)| (ApplicationValue::Real(v), c))
            }
            ApplicationTag::Double => {
                decode_application_double(data).map(|(v, c)| (ApplicationValue::Double(v), c))
            }
            ApplicationTag::OctetString => decode_application_octet_string(data)
                .map(|(v, c)| (ApplicationValue::OctetString(v.to_vec()), c)),
            ApplicationTag::CharacterString => decode_application_character_string(data)
                .map(|(v, c)| (ApplicationValue::CharacterString(v), c)),
            ApplicationTag::BitString => {
                decode_application_bit_string(data).map(|(v, c)| (ApplicationValue::BitString(v), c))
            }
            ApplicationTag::Enumerated => {
                decode_application_enumerated(data).map(|(v, c)| (ApplicationValue::Enumerated(v), c))
            }
            ApplicationTag::Date => {
                decode_application_date(data).map(|(v, c)| (ApplicationValue::Date(v), c))
            }
            ApplicationTag::Time => {
                decode_application_time(data).map(|(v, c)| (ApplicationValue::Time(v), c))
            }
            ApplicationTag::ObjectIdentifier => decode_application_object_id(data)
                .map(|((t, i), c)| (ApplicationValue::ObjectIdentifier(t, i), c)),
            _ => Err(EncodingError::MalformedTag),
        }
    }
}

/// Cursor-based reader over a run of tagged values.
///
/// Service decoders use this to walk their fields in order without
/// re-slicing by hand after every element.
pub struct TagReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> TagReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn has_data(&self) -> bool {
        self.position < self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    /// Peek the next tag without consuming it
    pub fn peek_tag(&self) -> Result<Tag> {
        decode_tag(self.rest()).map(|(tag, _)| tag)
    }

    /// True when the next tag is the given context tag (primitive form)
    pub fn at_context(&self, tag_number: u8) -> bool {
        matches!(self.peek_tag(), Ok(tag) if tag.context && tag.number == tag_number && !tag.is_closing() && !tag.is_opening())
    }

    /// True when the next tag opens the given context
    pub fn at_opening(&self, tag_number: u8) -> bool {
        is_opening_tag_number(self.rest(), tag_number)
    }

    /// True when the next tag closes the given context
    pub fn at_closing(&self, tag_number: u8) -> bool {
        is_closing_tag_number(self.rest(), tag_number)
    }

    /// Consume the expected opening tag
    pub fn open(&mut self, tag_number: u8) -> Result<()> {
        let (tag, consumed) = decode_tag(self.rest())?;
        if !tag.context || tag.number != tag_number || !tag.is_opening() {
            return Err(EncodingError::WrongTagNumber);
        }
        self.position += consumed;
        Ok(())
    }

    /// Consume the expected closing tag
    pub fn close(&mut self, tag_number: u8) -> Result<()> {
        let (tag, consumed) = decode_tag(self.rest())?;
        if !tag.context || tag.number != tag_number || !tag.is_closing() {
            return Err(EncodingError::WrongTagNumber);
        }
        self.position += consumed;
        Ok(())
    }

    pub fn context_unsigned(&mut self, tag_number: u8) -> Result<u64> {
        let (value, consumed) = decode_context_unsigned(self.rest(), tag_number)?;
        self.position += consumed;
        Ok(value)
    }

    pub fn context_enumerated(&mut self, tag_number: u8) -> Result<u32> {
        let (value, consumed) = decode_context_enumerated(self.rest(), tag_number)?;
        self.position += consumed;
        Ok(value)
    }

    pub fn context_boolean(&mut self, tag_number: u8) -> Result<bool> {
        let (value, consumed) = decode_context_boolean(self.rest(), tag_number)?;
        self.position += consumed;
        Ok(value)
    }

    pub fn context_object_id(&mut self, tag_number: u8) -> Result<(u16, u32)> {
        let (value, consumed) = decode_context_object_id(self.rest(), tag_number)?;
        self.position += consumed;
        Ok(value)
    }

    pub fn context_octet_string(&mut self, tag_number: u8) -> Result<&'a [u8]> {
        let (value, consumed) = decode_context_octet_string(self.rest(), tag_number)?;
        self.position += consumed;
        Ok(value)
    }

    pub fn application_value(&mut self) -> Result<ApplicationValue> {
        let (value, consumed) = ApplicationValue::decode(self.rest())?;
        self.position += consumed;
        Ok(value)
    }

    pub fn application_unsigned(&mut self) -> Result<u64> {
        let (value, consumed) = decode_application_unsigned(self.rest())?;
        self.position += consumed;
        Ok(value)
    }

    pub fn application_character_string(&mut self) -> Result<CharacterString> {
        let (value, consumed) = decode_application_character_string(self.rest())?;
        self.position += consumed;
        Ok(value)
    }

    pub fn application_octet_string(&mut self) -> Result<&'a [u8]> {
        let (value, consumed) = decode_application_octet_string(self.rest())?;
        self.position += consumed;
        Ok(value)
    }

    pub fn application_object_id(&mut self) -> Result<(u16, u32)> {
        let (value, consumed) = decode_application_object_id(self.rest())?;
        self.position += consumed;
        Ok(value)
    }

    pub fn application_date(&mut self) -> Result<Date> {
        let (value, consumed) = decode_application_date(self.rest())?;
        self.position += consumed;
        Ok(value)
    }

    pub fn application_time(&mut self) -> Result<Time> {
        let (value, consumed) = decode_application_time(self.rest())?;
        self.position += consumed;
        Ok(value)
    }

    /// Borrow the content between an opening and matching closing tag,
    /// consuming the whole construct. Nested constructs are skipped over.
    pub fn constructed_slice(&mut self, tag_number: u8) -> Result<&'a [u8]> {
        self.open(tag_number)?;
        let start = self.position;
        let mut depth = 0usize;
        loop {
            let rest = &self.data[self.position..];
            let (tag, consumed) = decode_tag(rest)?;
            if tag.context && tag.is_opening() {
                depth += 1;
                self.position += consumed;
            } else if tag.context && tag.is_closing() {
                if depth == 0 && tag.number == tag_number {
                    let content = &self.data[start..self.position];
                    self.position += consumed;
                    return Ok(content);
                }
                depth = depth.checked_sub(1).ok_or(EncodingError::MalformedTag)?;
                self.position += consumed;
            } else {
                self.position += consumed + tag.content_length();
                if self.position > self.data.len() {
                    return Err(EncodingError::Truncated);
                }
            }
        }
    }

    /// Skip a single primitive value
    pub fn skip_value(&mut self) -> Result<()> {
        let (tag, consumed) = decode_tag(self.rest())?;
        self.position += consumed + tag.content_length();
        if self.position > self.data.len() {
            return Err(EncodingError::Truncated);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unsigned_length_boundaries() {
        let cases: [(u64, usize); 16] = [
            (0, 1),
            (0x7F, 1),
            (0xFF, 1),
            (0x100, 2),
            (0xFFFF, 2),
            (0x10000, 3),
            (0xFFFFFF, 3),
            (0x0100_0000, 4),
            (0xFFFF_FFFF, 4),
            (0x1_0000_0000, 5),
            (0xFF_FFFF_FFFF, 5),
            (0x100_0000_0000, 6),
            (0xFFFF_FFFF_FFFF, 6),
            (0x1_0000_0000_0000, 7),
            (0x100_0000_0000_0000, 8),
            (u64::MAX, 8),
        ];
        for (value, expected) in cases {
            assert_eq!(unsigned_length(value), expected, "value {:#x}", value);

            let mut buffer = Vec::new();
            encode_application_unsigned(&mut buffer, value).unwrap();
            // Tag octet + content octets: the encoded width matches the table.
            assert_eq!(buffer.len(), 1 + expected, "value {:#x}", value);
        }
    }

    #[test]
    fn test_signed_length_boundaries() {
        let cases: [(i64, usize); 14] = [
            (0, 1),
            (1, 1),
            (-1, 1),
            (i8::MIN as i64, 1),
            (i8::MIN as i64 - 1, 2),
            (i8::MAX as i64, 1),
            (i16::MIN as i64, 2),
            (i16::MIN as i64 - 1, 3),
            (-(1 << 23), 3),
            (-(1 << 23) - 1, 4),
            ((1 << 23) - 1, 3),
            (i32::MIN as i64, 4),
            (i32::MAX as i64, 4),
            (i64::MIN, 8),
        ];
        for (value, expected) in cases {
            assert_eq!(signed_length(value), expected, "value {}", value);
        }
    }

    #[test]
    fn test_tag_round_trip_minimal_lengths() {
        for length in [0usize, 4, 5, 253, 254, 65535, 65536, 100_000] {
            let mut buffer = Vec::new();
            encode_tag(&mut buffer, 6, true, length).unwrap();
            let (tag, consumed) = decode_tag(&buffer).unwrap();
            assert_eq!(tag.number, 6);
            assert!(tag.context);
            assert_eq!(tag.content, TagContent::Length(length));
            assert_eq!(consumed, buffer.len());
        }
    }

    #[test]
    fn test_tag_rejects_non_minimal_length() {
        // Extended-length octet carrying a value that fits the LVT bits.
        assert_eq!(
            decode_tag(&[0x2D, 0x03, 0, 0, 0]).unwrap_err(),
            EncodingError::MalformedTag
        );
        // Two-octet length form for a length under 254.
        assert_eq!(
            decode_tag(&[0x2D, 254, 0x00, 0x10]).unwrap_err(),
            EncodingError::MalformedTag
        );
        // Four-octet length form for a length under 65536.
        assert_eq!(
            decode_tag(&[0x2D, 255, 0x00, 0x00, 0x10, 0x00]).unwrap_err(),
            EncodingError::MalformedTag
        );
    }

    #[test]
    fn test_extended_context_tag_number() {
        let mut buffer = Vec::new();
        encode_tag(&mut buffer, 200, true, 1).unwrap();
        assert_eq!(buffer, [0xF9, 200]);
        let (tag, consumed) = decode_tag(&buffer).unwrap();
        assert_eq!(tag.number, 200);
        assert!(tag.context);
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_boolean_round_trip() {
        let mut buffer = Vec::new();
        encode_application_boolean(&mut buffer, true).unwrap();
        encode_application_boolean(&mut buffer, false).unwrap();
        assert_eq!(buffer, [0x11, 0x10]);

        let (value, used) = decode_application_boolean(&buffer).unwrap();
        assert!(value);
        let (value, _) = decode_application_boolean(&buffer[used..]).unwrap();
        assert!(!value);

        let mut buffer = Vec::new();
        encode_context_boolean(&mut buffer, 3, true).unwrap();
        assert_eq!(buffer, [0x39, 0x01]);
        assert_eq!(decode_context_boolean(&buffer, 3).unwrap().0, true);
    }

    #[test]
    fn test_unsigned_round_trip_wire_form() {
        let mut buffer = Vec::new();
        encode_application_unsigned(&mut buffer, 42).unwrap();
        assert_eq!(buffer, [0x21, 0x2A]);

        let mut buffer = Vec::new();
        encode_application_unsigned(&mut buffer, 1476).unwrap();
        assert_eq!(buffer, [0x22, 0x05, 0xC4]);
    }

    #[test]
    fn test_signed_sign_extension() {
        let mut buffer = Vec::new();
        encode_application_signed(&mut buffer, -1).unwrap();
        assert_eq!(buffer, [0x31, 0xFF]);
        assert_eq!(decode_application_signed(&buffer).unwrap().0, -1);

        let mut buffer = Vec::new();
        encode_application_signed(&mut buffer, -8_388_608).unwrap();
        assert_eq!(buffer.len(), 4);
        assert_eq!(decode_application_signed(&buffer).unwrap().0, -8_388_608);
    }

    #[test]
    fn test_real_round_trip() {
        let mut buffer = Vec::new();
        encode_application_real(&mut buffer, 50.0).unwrap();
        assert_eq!(buffer, [0x44, 0x42, 0x48, 0x00, 0x00]);
        assert_eq!(decode_application_real(&buffer).unwrap().0, 50.0);
    }

    #[test]
    fn test_character_string_utf8() {
        let mut buffer = Vec::new();
        encode_application_string(&mut buffer, "OK").unwrap();
        assert_eq!(buffer, [0x73, 0x00, b'O', b'K']);

        let (value, consumed) = decode_application_character_string(&buffer).unwrap();
        assert_eq!(consumed, buffer.len());
        assert_eq!(value.to_string_lossless().unwrap(), "OK");
    }

    #[test]
    fn test_character_string_invalid_utf8() {
        // Tag, length 3, character set 0, invalid continuation byte.
        let data = [0x73, 0x00, 0xC3, 0x28];
        assert_eq!(
            decode_application_character_string(&data).unwrap_err(),
            EncodingError::InvalidUtf8
        );
    }

    #[test]
    fn test_character_string_ucs2() {
        let value = CharacterString {
            encoding: CharacterSet::Ucs2,
            bytes: vec![0x00, 0x41, 0x00, 0x42],
        };
        assert_eq!(value.to_string_lossless().unwrap(), "AB");
    }

    #[test]
    fn test_bit_string_round_trip_all_widths() {
        for bits_used in 0..=32u8 {
            let mut value = BitString::new();
            for bit in 0..bits_used {
                // Alternating pattern to exercise octet boundaries.
                value.set_bit(bit, bit % 3 == 0).unwrap();
            }
            if bits_used > 0 {
                value.set_bit(bits_used - 1, true).unwrap();
            }

            let mut buffer = Vec::new();
            encode_application_bit_string(&mut buffer, &value).unwrap();
            let (decoded, consumed) = decode_application_bit_string(&buffer).unwrap();
            assert_eq!(consumed, buffer.len());
            assert_eq!(decoded.bits_used(), bits_used, "bits_used {}", bits_used);
            for bit in 0..bits_used {
                assert_eq!(decoded.bit(bit), value.bit(bit));
            }
            // Trailing unused bits on the wire are zero.
            if bits_used % 8 != 0 {
                let unused = 8 - bits_used % 8;
                let last = *buffer.last().unwrap();
                assert_eq!(last & ((1 << unused) - 1), 0);
            }
        }
    }

    #[test]
    fn test_bit_string_rejects_bad_unused_count() {
        let data = [0x82, 0x08, 0xFF];
        assert!(decode_application_bit_string(&data).is_err());
    }

    #[test]
    fn test_date_time_round_trip() {
        let date = Date::new(2024, 3, 15, 5);
        let mut buffer = Vec::new();
        encode_application_date(&mut buffer, &date).unwrap();
        assert_eq!(buffer, [0xA4, 124, 3, 15, 5]);
        assert_eq!(decode_application_date(&buffer).unwrap().0, date);

        let time = Time::new(13, 5, 30, 99);
        let mut buffer = Vec::new();
        encode_application_time(&mut buffer, &time).unwrap();
        assert_eq!(decode_application_time(&buffer).unwrap().0, time);

        let wildcard = Date::WILDCARD;
        let mut buffer = Vec::new();
        encode_application_date(&mut buffer, &wildcard).unwrap();
        assert_eq!(buffer, [0xA4, 255, 255, 255, 255]);
        let decoded = decode_application_date(&buffer).unwrap().0;
        assert_eq!(decoded.year, 255);
        assert!(decoded.has_wildcard());
    }

    #[test]
    fn test_object_id_round_trip() {
        let mut buffer = Vec::new();
        encode_application_object_id(&mut buffer, 8, 123).unwrap();
        assert_eq!(buffer, [0xC4, 0x02, 0x00, 0x00, 0x7B]);
        assert_eq!(decode_application_object_id(&buffer).unwrap().0, (8, 123));

        assert!(encode_application_object_id(&mut buffer, 1024, 0).is_err());
        assert!(encode_application_object_id(&mut buffer, 0, 0x400000).is_err());
    }

    #[test]
    fn test_context_date_time() {
        let value = DateTime::new(Date::new(2020, 1, 1, 3), Time::new(0, 0, 0, 0));
        let mut buffer = Vec::new();
        encode_context_date_time(&mut buffer, 0, &value).unwrap();
        let (decoded, consumed) = decode_context_date_time(&buffer, 0).unwrap();
        assert_eq!(consumed, buffer.len());
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_application_value_dispatch() {
        let values = [
            ApplicationValue::Null,
            ApplicationValue::Boolean(true),
            ApplicationValue::Unsigned(900),
            ApplicationValue::Signed(-40),
            ApplicationValue::Real(21.5),
            ApplicationValue::Double(-0.25),
            ApplicationValue::OctetString(vec![1, 2, 3]),
            ApplicationValue::CharacterString(CharacterString::utf8("zone-1")),
            ApplicationValue::Enumerated(3),
            ApplicationValue::Date(Date::new(1999, 12, 31, 5)),
            ApplicationValue::Time(Time::new(23, 59, 59, 99)),
            ApplicationValue::ObjectIdentifier(0, 101),
        ];
        for value in values {
            let mut buffer = Vec::new();
            value.encode(&mut buffer).unwrap();
            let (decoded, consumed) = ApplicationValue::decode(&buffer).unwrap();
            assert_eq!(consumed, buffer.len());
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_tag_reader_constructed_slice() {
        let mut buffer = Vec::new();
        encode_context_unsigned(&mut buffer, 0, 7).unwrap();
        encode_opening_tag(&mut buffer, 3).unwrap();
        encode_application_real(&mut buffer, 1.0).unwrap();
        encode_application_real(&mut buffer, 2.0).unwrap();
        encode_closing_tag(&mut buffer, 3).unwrap();

        let mut reader = TagReader::new(&buffer);
        assert_eq!(reader.context_unsigned(0).unwrap(), 7);
        let inner = reader.constructed_slice(3).unwrap();
        assert!(!reader.has_data());

        let mut inner_reader = TagReader::new(inner);
        assert!(matches!(
            inner_reader.application_value().unwrap(),
            ApplicationValue::Real(v) if v == 1.0
        ));
        assert!(matches!(
            inner_reader.application_value().unwrap(),
            ApplicationValue::Real(v) if v == 2.0
        ));
        assert!(!inner_reader.has_data());
    }

    #[test]
    fn test_truncated_inputs() {
        assert_eq!(
            decode_application_unsigned(&[0x22, 0x01]).unwrap_err(),
            EncodingError::Truncated
        );
        assert_eq!(
            decode_application_real(&[0x44, 0x42]).unwrap_err(),
            EncodingError::Truncated
        );
        assert_eq!(decode_tag(&[]).unwrap_err(), EncodingError::Truncated);
    }

    proptest! {
        #[test]
        fn prop_unsigned_round_trip(value in any::<u64>()) {
            let mut buffer = Vec::new();
            encode_application_unsigned(&mut buffer, value).unwrap();
            let (decoded, consumed) = decode_application_unsigned(&buffer).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, buffer.len());
        }

        #[test]
        fn prop_signed_round_trip(value in any::<i64>()) {
            let mut buffer = Vec::new();
            encode_application_signed(&mut buffer, value).unwrap();
            let (decoded, consumed) = decode_application_signed(&buffer).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, buffer.len());
        }

        #[test]
        fn prop_context_unsigned_round_trip(value in any::<u64>(), tag in 0u8..=254) {
            let mut buffer = Vec::new();
            encode_context_unsigned(&mut buffer, tag, value).unwrap();
            let (decoded, consumed) = decode_context_unsigned(&buffer, tag).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, buffer.len());
        }

        #[test]
        fn prop_octet_string_round_trip(content in proptest::collection::vec(any::<u8>(), 0..300)) {
            let mut buffer = Vec::new();
            encode_application_octet_string(&mut buffer, &content).unwrap();
            let (decoded, consumed) = decode_application_octet_string(&buffer).unwrap();
            prop_assert_eq!(decoded, &content[..]);
            prop_assert_eq!(consumed, buffer.len());
        }

        #[test]
        fn prop_string_round_trip(content in "[a-zA-Z0-9 .:_-]{0,64}") {
            let mut buffer = Vec::new();
            encode_application_string(&mut buffer, &content).unwrap();
            let (decoded, _) = decode_application_character_string(&buffer).unwrap();
            prop_assert_eq!(decoded.to_string_lossless().unwrap(), content);
        }
    }
}
