//! BACnet Network Layer (NPDU)
//!
//! This module implements the network-layer protocol data unit defined in
//! ASHRAE 135 clause 6: the header that wraps every APDU with routing
//! metadata (destination/source network and address, hop count, priority),
//! and the network-layer message types exchanged between routers.
//!
//! The stack itself is not a router; the routing fields are parsed and
//! generated so devices behind routers can be addressed, but messages are
//! never forwarded.
//!
//! # Example
//!
//! ```rust
//! use bacstack::network::{Npdu, BacnetAddress};
//!
//! let npdu = Npdu::global_broadcast();
//! let header = npdu.encode();
//! let (decoded, consumed) = Npdu::decode(&header).unwrap();
//! assert_eq!(consumed, header.len());
//! assert!(decoded.destination.as_ref().unwrap().is_global_broadcast());
//! ```

#[cfg(feature = "std")]
use std::error::Error;

#[cfg(not(feature = "std"))]
use core::fmt;

#[cfg(feature = "std")]
use std::fmt;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::BACNET_PROTOCOL_VERSION;

/// Result type for network layer operations
#[cfg(feature = "std")]
pub type Result<T> = std::result::Result<T, NetworkError>;

#[cfg(not(feature = "std"))]
pub type Result<T> = core::result::Result<T, NetworkError>;

/// Errors that can occur in the network layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Protocol version octet was not 1
    UnsupportedVersion(u8),
    /// Data ended inside the header
    Truncated,
    /// DLEN/SLEN outside 0..=7
    InvalidAddressLength(u8),
    /// A network-layer message carried no message type octet
    MissingMessageType,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::UnsupportedVersion(v) => write!(f, "Unsupported NPDU version {}", v),
            NetworkError::Truncated => write!(f, "NPDU header truncated"),
            NetworkError::InvalidAddressLength(len) => {
                write!(f, "Invalid NPDU address length {}", len)
            }
            NetworkError::MissingMessageType => write!(f, "Network message without message type"),
        }
    }
}

#[cfg(feature = "std")]
impl Error for NetworkError {}

/// Network number meaning "broadcast to all networks"
pub const BACNET_BROADCAST_NETWORK: u16 = 0xFFFF;

/// Maximum MAC or routed-address length in octets
pub const MAX_MAC_LEN: usize = 7;

/// A BACnet device address: local MAC plus optional routed network address.
///
/// `net == 0` means the device is on the local network; `net == 0xFFFF` is
/// the global broadcast network. A zero `mac_len` addresses the local
/// broadcast MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BacnetAddress {
    /// Destination network number, 0 for local
    pub net: u16,
    /// Octets used in `mac`
    pub mac_len: u8,
    /// Local datalink MAC address
    pub mac: [u8; MAX_MAC_LEN],
    /// Octets used in `adr`
    pub len: u8,
    /// Address on the remote network, when `net != 0`
    pub adr: [u8; MAX_MAC_LEN],
}

impl BacnetAddress {
    /// Address of a station on the local network
    pub fn local(mac: &[u8]) -> Self {
        let mut addr = Self::default();
        let used = mac.len().min(MAX_MAC_LEN);
        addr.mac_len = used as u8;
        addr.mac[..used].copy_from_slice(&mac[..used]);
        addr
    }

    /// Address of a station behind a router
    pub fn remote(net: u16, adr: &[u8]) -> Self {
        let mut addr = Self::default();
        addr.net = net;
        let used = adr.len().min(MAX_MAC_LEN);
        addr.len = used as u8;
        addr.adr[..used].copy_from_slice(&adr[..used]);
        addr
    }

    /// The global broadcast address
    pub fn global_broadcast() -> Self {
        Self {
            net: BACNET_BROADCAST_NETWORK,
            ..Self::default()
        }
    }

    pub fn is_local(&self) -> bool {
        self.net == 0
    }

    pub fn is_global_broadcast(&self) -> bool {
        self.net == BACNET_BROADCAST_NETWORK
    }

    /// True for the global broadcast, a remote-network broadcast, or a
    /// local broadcast MAC
    pub fn is_broadcast(&self) -> bool {
        self.is_global_broadcast() || (self.net != 0 && self.len == 0) || self.mac_len == 0
    }

    /// Used portion of the local MAC
    pub fn mac_bytes(&self) -> &[u8] {
        &self.mac[..self.mac_len as usize]
    }

    /// Used portion of the routed address
    pub fn adr_bytes(&self) -> &[u8] {
        &self.adr[..self.len as usize]
    }

    /// Two addresses match when network, lengths, and the used portions of
    /// both address fields are equal
    pub fn matches(&self, other: &BacnetAddress) -> bool {
        self.net == other.net
            && self.mac_len == other.mac_len
            && self.len == other.len
            && self.mac_bytes() == other.mac_bytes()
            && self.adr_bytes() == other.adr_bytes()
    }
}

impl Default for BacnetAddress {
    fn default() -> Self {
        Self {
            net: 0,
            mac_len: 0,
            mac: [0; MAX_MAC_LEN],
            len: 0,
            adr: [0; MAX_MAC_LEN],
        }
    }
}

/// Network priority carried in the low control bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum NetworkPriority {
    #[default]
    Normal = 0,
    Urgent = 1,
    CriticalEquipment = 2,
    LifeSafety = 3,
}

impl From<u8> for NetworkPriority {
    fn from(value: u8) -> Self {
        match value & 0x03 {
            1 => NetworkPriority::Urgent,
            2 => NetworkPriority::CriticalEquipment,
            3 => NetworkPriority::LifeSafety,
            _ => NetworkPriority::Normal,
        }
    }
}

/// Network-layer message types (clause 6.4); 0x80.. are vendor specific
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMessageType {
    WhoIsRouterToNetwork,
    IAmRouterToNetwork,
    ICouldBeRouterToNetwork,
    RejectMessageToNetwork,
    RouterBusyToNetwork,
    RouterAvailableToNetwork,
    InitializeRoutingTable,
    InitializeRoutingTableAck,
    EstablishConnectionToNetwork,
    DisconnectConnectionToNetwork,
    WhatIsNetworkNumber,
    NetworkNumberIs,
    Reserved(u8),
    VendorProprietary(u8),
}

impl NetworkMessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => NetworkMessageType::WhoIsRouterToNetwork,
            0x01 => NetworkMessageType::IAmRouterToNetwork,
            0x02 => NetworkMessageType::ICouldBeRouterToNetwork,
            0x03 => NetworkMessageType::RejectMessageToNetwork,
            0x04 => NetworkMessageType::RouterBusyToNetwork,
            0x05 => NetworkMessageType::RouterAvailableToNetwork,
            0x06 => NetworkMessageType::InitializeRoutingTable,
            0x07 => NetworkMessageType::InitializeRoutingTableAck,
            0x08 => NetworkMessageType::EstablishConnectionToNetwork,
            0x09 => NetworkMessageType::DisconnectConnectionToNetwork,
            0x12 => NetworkMessageType::WhatIsNetworkNumber,
            0x13 => NetworkMessageType::NetworkNumberIs,
            v if v >= 0x80 => NetworkMessageType::VendorProprietary(v),
            v => NetworkMessageType::Reserved(v),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            NetworkMessageType::WhoIsRouterToNetwork => 0x00,
            NetworkMessageType::IAmRouterToNetwork => 0x01,
            NetworkMessageType::ICouldBeRouterToNetwork => 0x02,
            NetworkMessageType::RejectMessageToNetwork => 0x03,
            NetworkMessageType::RouterBusyToNetwork => 0x04,
            NetworkMessageType::RouterAvailableToNetwork => 0x05,
            NetworkMessageType::InitializeRoutingTable => 0x06,
            NetworkMessageType::InitializeRoutingTableAck => 0x07,
            NetworkMessageType::EstablishConnectionToNetwork => 0x08,
            NetworkMessageType::DisconnectConnectionToNetwork => 0x09,
            NetworkMessageType::WhatIsNetworkNumber => 0x12,
            NetworkMessageType::NetworkNumberIs => 0x13,
            NetworkMessageType::Reserved(v) => v,
            NetworkMessageType::VendorProprietary(v) => v,
        }
    }
}

/// A destination or source routing entry in the NPDU header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpduAddress {
    pub net: u16,
    pub adr: Vec<u8>,
}

impl NpduAddress {
    pub fn is_global_broadcast(&self) -> bool {
        self.net == BACNET_BROADCAST_NETWORK
    }
}

/// Default hop count for freshly originated routed messages
pub const DEFAULT_HOP_COUNT: u8 = 255;

/// Decoded NPDU header
#[derive(Debug, Clone, PartialEq)]
pub struct Npdu {
    /// Protocol version, always 1 on encode
    pub version: u8,
    /// Network-layer message (true) vs. APDU carrier (false)
    pub network_message: bool,
    /// Reply expected by the application layer
    pub expecting_reply: bool,
    pub priority: NetworkPriority,
    pub destination: Option<NpduAddress>,
    pub source: Option<NpduAddress>,
    /// Present whenever a destination is present
    pub hop_count: Option<u8>,
    pub message_type: Option<NetworkMessageType>,
    /// Present for vendor-proprietary network messages
    pub vendor_id: Option<u16>,
}

impl Default for Npdu {
    fn default() -> Self {
        Self::new()
    }
}

impl Npdu {
    /// A local-network APDU carrier with normal priority
    pub fn new() -> Self {
        Self {
            version: BACNET_PROTOCOL_VERSION,
            network_message: false,
            expecting_reply: false,
            priority: NetworkPriority::Normal,
            destination: None,
            source: None,
            hop_count: None,
            message_type: None,
            vendor_id: None,
        }
    }

    /// An APDU carrier addressed to all networks
    pub fn global_broadcast() -> Self {
        let mut npdu = Self::new();
        npdu.destination = Some(NpduAddress {
            net: BACNET_BROADCAST_NETWORK,
            adr: Vec::new(),
        });
        npdu.hop_count = Some(DEFAULT_HOP_COUNT);
        npdu
    }

    /// An APDU carrier with routing taken from a device address
    pub fn for_destination(dest: &BacnetAddress, expecting_reply: bool) -> Self {
        let mut npdu = Self::new();
        npdu.expecting_reply = expecting_reply;
        if !dest.is_local() {
            npdu.destination = Some(NpduAddress {
                net: dest.net,
                adr: dest.adr_bytes().to_vec(),
            });
            npdu.hop_count = Some(DEFAULT_HOP_COUNT);
        }
        npdu
    }

    fn control_byte(&self) -> u8 {
        let mut control = self.priority as u8;
        if self.network_message {
            control |= 0x80;
        }
        if self.destination.is_some() {
            control |= 0x20;
        }
        if self.source.is_some() {
            control |= 0x08;
        }
        if self.expecting_reply {
            control |= 0x04;
        }
        control
    }

    /// Encode the NPDU header; the APDU or message payload follows it
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(24);
        buffer.push(BACNET_PROTOCOL_VERSION);
        buffer.push(self.control_byte());

        if let Some(dest) = &self.destination {
            buffer.extend_from_slice(&dest.net.to_be_bytes());
            buffer.push(dest.adr.len() as u8);
            buffer.extend_from_slice(&dest.adr);
        }

        if let Some(src) = &self.source {
            buffer.extend_from_slice(&src.net.to_be_bytes());
            buffer.push(src.adr.len() as u8);
            buffer.extend_from_slice(&src.adr);
        }

        if self.destination.is_some() {
            buffer.push(self.hop_count.unwrap_or(DEFAULT_HOP_COUNT));
        }

        if self.network_message {
            if let Some(message_type) = self.message_type {
                buffer.push(message_type.to_u8());
                if let NetworkMessageType::VendorProprietary(_) = message_type {
                    buffer.extend_from_slice(&self.vendor_id.unwrap_or(0).to_be_bytes());
                }
            }
        }

        buffer
    }

    /// Decode an NPDU header, returning it and the octets consumed; the
    /// remainder of the buffer is the APDU or network message body
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 2 {
            return Err(NetworkError::Truncated);
        }
        if data[0] != BACNET_PROTOCOL_VERSION {
            return Err(NetworkError::UnsupportedVersion(data[0]));
        }

        let control = data[1];
        let mut npdu = Npdu::new();
        npdu.network_message = control & 0x80 != 0;
        npdu.expecting_reply = control & 0x04 != 0;
        npdu.priority = NetworkPriority::from(control);

        let mut pos = 2;

        if control & 0x20 != 0 {
            let (addr, used) = Self::decode_address(&data[pos..])?;
            npdu.destination = Some(addr);
            pos += used;
        }

        if control & 0x08 != 0 {
            let (addr, used) = Self::decode_address(&data[pos..])?;
            npdu.source = Some(addr);
            pos += used;
        }

        if npdu.destination.is_some() {
            let hop = *data.get(pos).ok_or(NetworkError::Truncated)?;
            npdu.hop_count = Some(hop);
            pos += 1;
        }

        if npdu.network_message {
            let type_octet = *data.get(pos).ok_or(NetworkError::MissingMessageType)?;
            pos += 1;
            let message_type = NetworkMessageType::from_u8(type_octet);
            if let NetworkMessageType::VendorProprietary(_) = message_type {
                if data.len() < pos + 2 {
                    return Err(NetworkError::Truncated);
                }
                npdu.vendor_id = Some(u16::from_be_bytes([data[pos], data[pos + 1]]));
                pos += 2;
            }
            npdu.message_type = Some(message_type);
        }

        Ok((npdu, pos))
    }

    fn decode_address(data: &[u8]) -> Result<(NpduAddress, usize)> {
        if data.len() < 3 {
            return Err(NetworkError::Truncated);
        }
        let net = u16::from_be_bytes([data[0], data[1]]);
        let len = data[2];
        if len as usize > MAX_MAC_LEN {
            return Err(NetworkError::InvalidAddressLength(len));
        }
        if data.len() < 3 + len as usize {
            return Err(NetworkError::Truncated);
        }
        Ok((
            NpduAddress {
                net,
                adr: data[3..3 + len as usize].to_vec(),
            },
            3 + len as usize,
        ))
    }

    /// Fold the decoded source routing entry and the datalink MAC into a
    /// reply address for the transaction layer
    pub fn source_address(&self, mac: &[u8]) -> BacnetAddress {
        let mut addr = BacnetAddress::local(mac);
        if let Some(src) = &self.source {
            addr.net = src.net;
            let used = src.adr.len().min(MAX_MAC_LEN);
            addr.len = used as u8;
            addr.adr[..used].copy_from_slice(&src.adr[..used]);
        }
        addr
    }
}
