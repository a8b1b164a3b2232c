//! MS/TP Data Link (Master-Slave/Token-Passing)
//!
//! Implements ASHRAE 135 clause 9: framing with header CRC-8 and data
//! CRC-16, the octet-driven receive state machine, and the master-node
//! state machine that arbitrates bus access by passing a token between
//! master stations in address order.
//!
//! # Frame Format
//!
//! - Preamble: `0x55 0xFF`
//! - Frame type, destination, source, data length (big endian u16)
//! - Header CRC (1 octet, complemented CRC-8)
//! - Data (0..=501 octets) and data CRC (2 octets LSB-first, complemented
//!   CRC-16), present only when the data length is nonzero
//!
//! # Driving the Port
//!
//! The port is sans-I/O: the serial driver feeds received octets into
//! [`MstpPort::receive_octet`] and reports passing time with
//! [`MstpPort::advance_silence`]; [`MstpPort::run_master`] then returns the
//! frames to transmit and the NPDUs to hand upward. All timers are plain
//! millisecond counters, so the machine behaves the same under test and on
//! hardware.

#[cfg(not(feature = "std"))]
use alloc::{vec::Vec, collections::VecDeque};

#[cfg(feature = "std")]
use std::collections::VecDeque;

use log::{debug, trace, warn};

use crate::datalink::{DataLinkError, Result};
use crate::util::{
    crc16_mstp, crc8_mstp_header, crc_calc_data, crc_calc_header, CRC_DATA_RESIDUE,
    CRC_HEADER_RESIDUE,
};

pub const MSTP_PREAMBLE_55: u8 = 0x55;
pub const MSTP_PREAMBLE_FF: u8 = 0xFF;

/// Maximum MS/TP data length
pub const MSTP_MAX_DATA_LENGTH: usize = 501;

/// Preamble + header octets
pub const MSTP_HEADER_SIZE: usize = 8;

/// MS/TP broadcast station address
pub const MSTP_BROADCAST: u8 = 255;

/// Lost-token base timeout; each station adds 10 ms per address
pub const T_NO_TOKEN_BASE_MS: u32 = 500;

/// Silence after a token pass before the pass is considered failed
pub const T_USAGE_TIMEOUT_MS: u32 = 20;

/// Silence while waiting for a reply to a data-expecting-reply frame
pub const T_REPLY_TIMEOUT_MS: u32 = 255;

/// Time the application has to produce a reply before ReplyPostponed
pub const T_REPLY_DELAY_MS: u32 = 250;

/// Inter-octet silence that aborts a frame in progress
pub const T_FRAME_ABORT_MS: u32 = 95;

/// Tokens held between poll-for-master maintenance cycles
const N_POLL: u32 = 50;

/// Token-pass retransmissions before searching for a new successor
const N_RETRY_TOKEN: u8 = 1;

/// MS/TP frame types; 128..=255 are vendor-proprietary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Token,
    PollForMaster,
    ReplyToPollForMaster,
    TestRequest,
    TestResponse,
    BacnetDataExpectingReply,
    BacnetDataNotExpectingReply,
    ReplyPostponed,
    Proprietary(u8),
}

impl FrameType {
    /// Decode a frame-type octet; 8..=127 are reserved and unknown
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Token),
            1 => Some(Self::PollForMaster),
            2 => Some(Self::ReplyToPollForMaster),
            3 => Some(Self::TestRequest),
            4 => Some(Self::TestResponse),
            5 => Some(Self::BacnetDataExpectingReply),
            6 => Some(Self::BacnetDataNotExpectingReply),
            7 => Some(Self::ReplyPostponed),
            128..=255 => Some(Self::Proprietary(value)),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Token => 0,
            Self::PollForMaster => 1,
            Self::ReplyToPollForMaster => 2,
            Self::TestRequest => 3,
            Self::TestResponse => 4,
            Self::BacnetDataExpectingReply => 5,
            Self::BacnetDataNotExpectingReply => 6,
            Self::ReplyPostponed => 7,
            Self::Proprietary(value) => value,
        }
    }
}

/// An MS/TP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MstpFrame {
    pub frame_type: FrameType,
    pub destination: u8,
    pub source: u8,
    pub data: Vec<u8>,
}

impl MstpFrame {
    pub fn new(frame_type: FrameType, destination: u8, source: u8, data: Vec<u8>) -> Result<Self> {
        if data.len() > MSTP_MAX_DATA_LENGTH {
            return Err(DataLinkError::FrameTooLarge);
        }
        Ok(Self {
            frame_type,
            destination,
            source,
            data,
        })
    }

    pub fn token(destination: u8, source: u8) -> Self {
        Self {
            frame_type: FrameType::Token,
            destination,
            source,
            data: Vec::new(),
        }
    }

    pub fn poll_for_master(destination: u8, source: u8) -> Self {
        Self {
            frame_type: FrameType::PollForMaster,
            destination,
            source,
            data: Vec::new(),
        }
    }

    pub fn bacnet_data(
        destination: u8,
        source: u8,
        data: Vec<u8>,
        expecting_reply: bool,
    ) -> Result<Self> {
        let frame_type = if expecting_reply {
            FrameType::BacnetDataExpectingReply
        } else {
            FrameType::BacnetDataNotExpectingReply
        };
        Self::new(frame_type, destination, source, data)
    }

    /// Encode preamble, header, header CRC, data, and data CRC
    pub fn encode(&self) -> Vec<u8> {
        let data_length = self.data.len() as u16;
        let mut frame = Vec::with_capacity(MSTP_HEADER_SIZE + self.data.len() + 2);

        frame.push(MSTP_PREAMBLE_55);
        frame.push(MSTP_PREAMBLE_FF);

        let header = [
            self.frame_type.to_u8(),
            self.destination,
            self.source,
            (data_length >> 8) as u8,
            (data_length & 0xFF) as u8,
        ];
        frame.extend_from_slice(&header);
        frame.push(crc8_mstp_header(&header));

        if !self.data.is_empty() {
            frame.extend_from_slice(&self.data);
            let crc = crc16_mstp(&self.data);
            frame.push((crc & 0xFF) as u8);
            frame.push((crc >> 8) as u8);
        }

        frame
    }

    /// Decode a complete frame from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MSTP_HEADER_SIZE {
            return Err(DataLinkError::InvalidFrame);
        }
        if data[0] != MSTP_PREAMBLE_55 || data[1] != MSTP_PREAMBLE_FF {
            return Err(DataLinkError::InvalidFrame);
        }

        let frame_type = FrameType::from_u8(data[2]).ok_or(DataLinkError::InvalidFrame)?;
        let destination = data[3];
        let source = data[4];
        let data_length = u16::from_be_bytes([data[5], data[6]]) as usize;
        if data_length > MSTP_MAX_DATA_LENGTH {
            return Err(DataLinkError::FrameTooLarge);
        }

        if crc8_mstp_header(&data[2..7]) != data[7] {
            return Err(DataLinkError::CrcError);
        }

        let expected = MSTP_HEADER_SIZE + data_length + if data_length > 0 { 2 } else { 0 };
        if data.len() != expected {
            return Err(DataLinkError::InvalidFrame);
        }

        let frame_data = if data_length > 0 {
            let payload = &data[MSTP_HEADER_SIZE..MSTP_HEADER_SIZE + data_length];
            let crc = u16::from_le_bytes([data[expected - 2], data[expected - 1]]);
            if crc16_mstp(payload) != crc {
                return Err(DataLinkError::CrcError);
            }
            payload.to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            frame_type,
            destination,
            source,
            data: frame_data,
        })
    }
}

/// Receive state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveState {
    #[default]
    Idle,
    Preamble,
    Header,
    HeaderCrc,
    Data,
}

/// Master node state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MasterState {
    #[default]
    Initialize,
    Idle,
    UseToken,
    WaitForReply,
    DoneWithToken,
    PassToken,
    NoToken,
    PollForMaster,
    AnswerDataRequest,
}

/// What the master state machine wants done
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MstpEvent {
    /// Transmit these octets on the wire
    Transmit(Vec<u8>),
    /// Hand a received NPDU upward
    NpduReceived {
        source: u8,
        data: Vec<u8>,
        expecting_reply: bool,
    },
}

/// A frame queued for transmission while holding the token
#[derive(Debug, Clone)]
struct PendingFrame {
    frame: MstpFrame,
    expecting_reply: bool,
}

#[derive(Debug, Default)]
struct ReceiveBuffer {
    header: [u8; 5],
    header_index: usize,
    header_crc: u8,
    data: Vec<u8>,
    data_length: usize,
    data_index: usize,
    data_crc: u16,
}

/// MS/TP master-node port state, shared by both state machines
pub struct MstpPort {
    this_station: u8,
    next_station: u8,
    poll_station: u8,
    max_master: u8,
    max_info_frames: u8,
    sole_master: bool,

    token_count: u32,
    frame_count: u8,
    retry_count: u8,
    event_count: u32,
    silence_timer_ms: u32,
    reply_timer_ms: u32,

    receive_state: ReceiveState,
    master_state: MasterState,
    rx: ReceiveBuffer,
    received_valid_frame: Option<MstpFrame>,
    received_invalid_frame: bool,

    tx_queue: VecDeque<PendingFrame>,
    reply_queue: VecDeque<MstpFrame>,
    /// Source of the data-expecting-reply frame being answered
    reply_to: u8,
    /// A token pass is awaiting evidence of bus activity
    token_pass_pending: bool,
}

impl MstpPort {
    pub fn new(this_station: u8, max_master: u8, max_info_frames: u8) -> Self {
        Self {
            this_station,
            next_station: this_station,
            poll_station: this_station,
            max_master: max_master.min(127),
            max_info_frames: max_info_frames.max(1),
            sole_master: false,
            token_count: 0,
            frame_count: 0,
            retry_count: 0,
            event_count: 0,
            silence_timer_ms: 0,
            reply_timer_ms: 0,
            receive_state: ReceiveState::Idle,
            master_state: MasterState::Initialize,
            rx: ReceiveBuffer::default(),
            received_valid_frame: None,
            received_invalid_frame: false,
            tx_queue: VecDeque::new(),
            reply_queue: VecDeque::new(),
            reply_to: MSTP_BROADCAST,
            token_pass_pending: false,
        }
    }

    pub fn this_station(&self) -> u8 {
        self.this_station
    }

    pub fn master_state(&self) -> MasterState {
        self.master_state
    }

    pub fn receive_state(&self) -> ReceiveState {
        self.receive_state
    }

    pub fn sole_master(&self) -> bool {
        self.sole_master
    }

    /// Lost-token timeout for this station
    fn no_token_timeout(&self) -> u32 {
        T_NO_TOKEN_BASE_MS + 10 * self.this_station as u32
    }

    /// Queue an NPDU for transmission during the next token hold
    pub fn queue_npdu(&mut self, destination: u8, npdu: Vec<u8>, expecting_reply: bool) -> Result<()> {
        let frame = MstpFrame::bacnet_data(destination, self.this_station, npdu, expecting_reply)?;
        self.tx_queue.push_back(PendingFrame {
            frame,
            expecting_reply,
        });
        Ok(())
    }

    /// Provide the application's reply for the data-expecting-reply frame
    /// currently being answered
    pub fn reply_available(&mut self, npdu: Vec<u8>) -> Result<()> {
        let frame = MstpFrame::bacnet_data(self.reply_to, self.this_station, npdu, false)?;
        self.reply_queue.push_back(frame);
        Ok(())
    }

    /// Account for passing time with no received octets
    pub fn advance_silence(&mut self, elapsed_ms: u32) {
        self.silence_timer_ms = self.silence_timer_ms.saturating_add(elapsed_ms);
        self.reply_timer_ms = self.reply_timer_ms.saturating_add(elapsed_ms);
    }

    /// Feed one received octet into the receive state machine
    pub fn receive_octet(&mut self, octet: u8) {
        self.event_count = self.event_count.wrapping_add(1);

        // A long gap aborts any frame in progress.
        if self.receive_state != ReceiveState::Idle && self.silence_timer_ms >= T_FRAME_ABORT_MS {
            trace!("frame aborted after {} ms silence", self.silence_timer_ms);
            self.received_invalid_frame = true;
            self.receive_state = ReceiveState::Idle;
        }
        self.silence_timer_ms = 0;

        match self.receive_state {
            ReceiveState::Idle => {
                if octet == MSTP_PREAMBLE_55 {
                    self.receive_state = ReceiveState::Preamble;
                }
            }
            ReceiveState::Preamble => {
                if octet == MSTP_PREAMBLE_FF {
                    self.rx = ReceiveBuffer::default();
                    self.rx.header_crc = 0xFF;
                    self.receive_state = ReceiveState::Header;
                } else if octet != MSTP_PREAMBLE_55 {
                    // Repeated 0x55 keeps us synchronized on the preamble.
                    self.receive_state = ReceiveState::Idle;
                }
            }
            ReceiveState::Header => {
                self.rx.header[self.rx.header_index] = octet;
                self.rx.header_crc = crc_calc_header(octet, self.rx.header_crc);
                self.rx.header_index += 1;
                if self.rx.header_index == 5 {
                    self.receive_state = ReceiveState::HeaderCrc;
                }
            }
            ReceiveState::HeaderCrc => {
                self.rx.header_crc = crc_calc_header(octet, self.rx.header_crc);
                if self.rx.header_crc != CRC_HEADER_RESIDUE {
                    warn!("header CRC mismatch");
                    self.received_invalid_frame = true;
                    self.receive_state = ReceiveState::Idle;
                    return;
                }
                let data_length =
                    u16::from_be_bytes([self.rx.header[3], self.rx.header[4]]) as usize;
                if FrameType::from_u8(self.rx.header[0]).is_none()
                    || data_length > MSTP_MAX_DATA_LENGTH
                {
                    self.received_invalid_frame = true;
                    self.receive_state = ReceiveState::Idle;
                    return;
                }
                if data_length == 0 {
                    self.emit_received_frame(Vec::new());
                    self.receive_state = ReceiveState::Idle;
                } else {
                    self.rx.data_length = data_length;
                    self.rx.data_index = 0;
                    self.rx.data.clear();
                    self.rx.data_crc = 0xFFFF;
                    self.receive_state = ReceiveState::Data;
                }
            }
            ReceiveState::Data => {
                self.rx.data_crc = crc_calc_data(octet, self.rx.data_crc);
                self.rx.data_index += 1;
                if self.rx.data_index <= self.rx.data_length {
                    self.rx.data.push(octet);
                }
                if self.rx.data_index == self.rx.data_length + 2 {
                    if self.rx.data_crc == CRC_DATA_RESIDUE {
                        let data = core::mem::take(&mut self.rx.data);
                        self.emit_received_frame(data);
                    } else {
                        warn!("data CRC mismatch");
                        self.received_invalid_frame = true;
                    }
                    self.receive_state = ReceiveState::Idle;
                }
            }
        }
    }

    fn emit_received_frame(&mut self, data: Vec<u8>) {
        // Frame type was validated before entering the data state.
        if let Some(frame_type) = FrameType::from_u8(self.rx.header[0]) {
            trace!(
                "frame {:?} {} -> {} ({} octets)",
                frame_type,
                self.rx.header[2],
                self.rx.header[1],
                data.len()
            );
            self.received_valid_frame = Some(MstpFrame {
                frame_type,
                destination: self.rx.header[1],
                source: self.rx.header[2],
                data,
            });
        }
    }

    fn addressed_to_us(&self, frame: &MstpFrame) -> bool {
        frame.destination == self.this_station
    }

    fn transmit(&mut self, events: &mut Vec<MstpEvent>, frame: MstpFrame) {
        events.push(MstpEvent::Transmit(frame.encode()));
        self.silence_timer_ms = 0;
    }

    fn next_poll_candidate(&self, station: u8) -> u8 {
        if station >= self.max_master {
            0
        } else {
            station + 1
        }
    }

    /// Run the master state machine until it settles, returning the frames
    /// to transmit and the NPDUs to deliver
    pub fn run_master(&mut self) -> Vec<MstpEvent> {
        let mut events = Vec::new();
        // Bounded by the poll sweep; one pass never loops unboundedly.
        for _ in 0..(self.max_master as usize + 16) {
            if !self.step_master(&mut events) {
                break;
            }
        }
        events
    }

    /// One master FSM transition; true when another step may follow
    fn step_master(&mut self, events: &mut Vec<MstpEvent>) -> bool {
        match self.master_state {
            MasterState::Initialize => {
                self.next_station = self.this_station;
                self.poll_station = self.next_poll_candidate(self.this_station);
                self.token_count = 0;
                self.frame_count = 0;
                self.retry_count = 0;
                self.sole_master = false;
                self.master_state = MasterState::Idle;
                true
            }
            MasterState::Idle => {
                self.received_invalid_frame = false;
                if let Some(frame) = self.received_valid_frame.take() {
                    return self.idle_frame(events, frame);
                }
                if self.silence_timer_ms >= self.no_token_timeout() {
                    debug!("station {} lost the token", self.this_station);
                    self.poll_station = self.next_poll_candidate(self.this_station);
                    self.master_state = MasterState::NoToken;
                    return true;
                }
                false
            }
            MasterState::NoToken => {
                let poll = MstpFrame::poll_for_master(self.poll_station, self.this_station);
                self.transmit(events, poll);
                self.master_state = MasterState::PollForMaster;
                false
            }
            MasterState::UseToken => {
                if self.frame_count >= self.max_info_frames {
                    self.master_state = MasterState::DoneWithToken;
                    return true;
                }
                match self.tx_queue.pop_front() {
                    Some(pending) => {
                        let expecting_reply = pending.expecting_reply
                            && pending.frame.destination != MSTP_BROADCAST;
                        self.transmit(events, pending.frame);
                        self.frame_count += 1;
                        if expecting_reply {
                            self.reply_timer_ms = 0;
                            self.master_state = MasterState::WaitForReply;
                            return false;
                        }
                        true
                    }
                    None => {
                        self.master_state = MasterState::DoneWithToken;
                        true
                    }
                }
            }
            MasterState::WaitForReply => {
                if let Some(frame) = self.received_valid_frame.take() {
                    if self.addressed_to_us(&frame) {
                        match frame.frame_type {
                            FrameType::BacnetDataNotExpectingReply
                            | FrameType::TestResponse => {
                                if frame.frame_type == FrameType::BacnetDataNotExpectingReply {
                                    events.push(MstpEvent::NpduReceived {
                                        source: frame.source,
                                        data: frame.data,
                                        expecting_reply: false,
                                    });
                                }
                                self.master_state = MasterState::DoneWithToken;
                                return true;
                            }
                            FrameType::ReplyPostponed => {
                                self.master_state = MasterState::DoneWithToken;
                                return true;
                            }
                            _ => {}
                        }
                    }
                    // Unexpected frame ends the wait without a reply.
                    self.master_state = MasterState::DoneWithToken;
                    return true;
                }
                if self.silence_timer_ms >= T_REPLY_TIMEOUT_MS {
                    debug!("reply timeout toward {}", self.next_station);
                    self.master_state = MasterState::DoneWithToken;
                    return true;
                }
                false
            }
            MasterState::DoneWithToken => {
                self.token_count = self.token_count.wrapping_add(1);
                if self.sole_master && self.token_count % N_POLL != 0 {
                    // Nobody to pass to; keep using the token but poll for
                    // newcomers periodically.
                    self.frame_count = 0;
                    self.master_state = if self.tx_queue.is_empty() {
                        self.poll_station = self.next_poll_candidate(self.this_station);
                        MasterState::NoToken
                    } else {
                        MasterState::UseToken
                    };
                    return true;
                }
                if self.next_station == self.this_station {
                    // No successor known yet; search before passing.
                    self.poll_station = self.next_poll_candidate(self.this_station);
                    self.master_state = MasterState::NoToken;
                    return true;
                }
                self.master_state = MasterState::PassToken;
                true
            }
            MasterState::PassToken => {
                if !self.token_pass_pending {
                    let token = MstpFrame::token(self.next_station, self.this_station);
                    self.transmit(events, token);
                    self.token_pass_pending = true;
                    self.retry_count = 0;
                    self.event_count = 0;
                    return false;
                }
                // Any bus activity means the successor took the token.
                if self.event_count > 0 || self.received_valid_frame.is_some() {
                    self.event_count = 0;
                    self.token_pass_pending = false;
                    self.master_state = MasterState::Idle;
                    return true;
                }
                if self.silence_timer_ms >= T_USAGE_TIMEOUT_MS {
                    if self.retry_count < N_RETRY_TOKEN {
                        self.retry_count += 1;
                        debug!("token pass to {} retried", self.next_station);
                        let token = MstpFrame::token(self.next_station, self.this_station);
                        self.transmit(events, token);
                        return false;
                    }
                    // The successor is gone; search for a new one after it.
                    self.token_pass_pending = false;
                    self.poll_station = self.next_poll_candidate(self.next_station);
                    let poll = MstpFrame::poll_for_master(self.poll_station, self.this_station);
                    self.transmit(events, poll);
                    self.master_state = MasterState::PollForMaster;
                    return false;
                }
                false
            }
            MasterState::PollForMaster => {
                if let Some(frame) = self.received_valid_frame.take() {
                    if frame.frame_type == FrameType::ReplyToPollForMaster
                        && self.addressed_to_us(&frame)
                    {
                        debug!("found successor {}", frame.source);
                        self.next_station = frame.source;
                        self.sole_master = false;
                        self.token_count = 0;
                        let token = MstpFrame::token(self.next_station, self.this_station);
                        self.transmit(events, token);
                        self.token_pass_pending = true;
                        self.retry_count = 0;
                        self.event_count = 0;
                        self.master_state = MasterState::PassToken;
                        return false;
                    }
                    // Some other frame: fall back to idle processing.
                    self.received_valid_frame = Some(frame);
                    self.master_state = MasterState::Idle;
                    return true;
                }
                if self.silence_timer_ms >= T_USAGE_TIMEOUT_MS {
                    if self.poll_station == self.this_station {
                        // Swept the whole address space without an answer.
                        debug!("station {} is sole master", self.this_station);
                        self.sole_master = true;
                        self.next_station = self.this_station;
                        self.frame_count = 0;
                        self.master_state = MasterState::UseToken;
                        return true;
                    }
                    self.poll_station = self.next_poll_candidate(self.poll_station);
                    let poll = MstpFrame::poll_for_master(self.poll_station, self.this_station);
                    self.transmit(events, poll);
                    return false;
                }
                false
            }
            MasterState::AnswerDataRequest => {
                if let Some(reply) = self.reply_queue.pop_front() {
                    self.transmit(events, reply);
                    self.master_state = MasterState::Idle;
                    return false;
                }
                if self.reply_timer_ms >= T_REPLY_DELAY_MS {
                    let postponed = MstpFrame {
                        frame_type: FrameType::ReplyPostponed,
                        destination: self.reply_to,
                        source: self.this_station,
                        data: Vec::new(),
                    };
                    self.transmit(events, postponed);
                    self.master_state = MasterState::Idle;
                    return false;
                }
                false
            }
        }
    }

    fn idle_frame(&mut self, events: &mut Vec<MstpEvent>, frame: MstpFrame) -> bool {
        let broadcast = frame.destination == MSTP_BROADCAST;
        if !self.addressed_to_us(&frame) && !broadcast {
            return true;
        }
        match frame.frame_type {
            FrameType::Token => {
                if broadcast {
                    // Tokens are never broadcast.
                    return true;
                }
                self.frame_count = 0;
                self.sole_master = false;
                self.master_state = MasterState::UseToken;
                true
            }
            FrameType::PollForMaster => {
                if !broadcast {
                    let reply = MstpFrame {
                        frame_type: FrameType::ReplyToPollForMaster,
                        destination: frame.source,
                        source: self.this_station,
                        data: Vec::new(),
                    };
                    self.transmit(events, reply);
                }
                false
            }
            FrameType::TestRequest => {
                if !broadcast {
                    let reply = MstpFrame {
                        frame_type: FrameType::TestResponse,
                        destination: frame.source,
                        source: self.this_station,
                        data: frame.data,
                    };
                    self.transmit(events, reply);
                }
                false
            }
            FrameType::BacnetDataExpectingReply => {
                if broadcast {
                    // A broadcast cannot expect a directed reply.
                    events.push(MstpEvent::NpduReceived {
                        source: frame.source,
                        data: frame.data,
                        expecting_reply: false,
                    });
                    return true;
                }
                self.reply_to = frame.source;
                self.reply_timer_ms = 0;
                events.push(MstpEvent::NpduReceived {
                    source: frame.source,
                    data: frame.data,
                    expecting_reply: true,
                });
                self.master_state = MasterState::AnswerDataRequest;
                false
            }
            FrameType::BacnetDataNotExpectingReply => {
                events.push(MstpEvent::NpduReceived {
                    source: frame.source,
                    data: frame.data,
                    expecting_reply: false,
                });
                true
            }
            FrameType::ReplyToPollForMaster
            | FrameType::TestResponse
            | FrameType::ReplyPostponed
            | FrameType::Proprietary(_) => true,
        }
    }
}

/// Compare a pending reply NPDU with the request it should answer.
///
/// The pair matches when the APDU invoke-ids and service choices line up
/// and the network priority is preserved, so a slow application cannot
/// release an unrelated frame as the reply.
pub fn reply_matches(request_npdu: &[u8], reply_npdu: &[u8]) -> bool {
    use crate::app::Apdu;
    use crate::network::Npdu;

    let Ok((request_header, request_used)) = Npdu::decode(request_npdu) else {
        return false;
    };
    let Ok((reply_header, reply_used)) = Npdu::decode(reply_npdu) else {
        return false;
    };
    if request_header.priority != reply_header.priority {
        return false;
    }

    let (Ok(request_apdu), Ok(reply_apdu)) = (
        Apdu::decode(&request_npdu[request_used..]),
        Apdu::decode(&reply_npdu[reply_used..]),
    ) else {
        return false;
    };

    match (request_apdu.invoke_id(), reply_apdu.invoke_id()) {
        (Some(request_id), Some(reply_id)) if request_id == reply_id => {}
        _ => return false,
    }

    let service_of = |apdu: &Apdu| match apdu {
        Apdu::ConfirmedRequest { service_choice, .. }
        | Apdu::SimpleAck { service_choice, .. }
        | Apdu::ComplexAck { service_choice, .. }
        | Apdu::Error { service_choice, .. } => Some(*service_choice),
        _ => None,
    };
    match (service_of(&request_apdu), service_of(&reply_apdu)) {
        (Some(request_sc), Some(reply_sc)) => request_sc == reply_sc,
        // Reject/Abort replies carry no service choice.
        (Some(_), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_transmits(events: &[MstpEvent]) -> Vec<MstpFrame> {
        events
            .iter()
            .filter_map(|event| match event {
                MstpEvent::Transmit(bytes) => Some(MstpFrame::decode(bytes).unwrap()),
                _ => None,
            })
            .collect()
    }

    fn feed_frame(port: &mut MstpPort, frame: &MstpFrame) {
        for octet in frame.encode() {
            port.receive_octet(octet);
        }
    }

    #[test]
    fn test_frame_encode_decode() {
        let token = MstpFrame::token(5, 3);
        let encoded = token.encode();
        assert_eq!(encoded.len(), MSTP_HEADER_SIZE);
        assert_eq!(MstpFrame::decode(&encoded).unwrap(), token);

        let data = MstpFrame::bacnet_data(10, 20, vec![0x01, 0x02, 0x03, 0x04], true).unwrap();
        let encoded = data.encode();
        assert_eq!(encoded.len(), MSTP_HEADER_SIZE + 4 + 2);
        assert_eq!(MstpFrame::decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_reference_header_crc() {
        // Frame type 0, destination 0x10, source 5, length 5.
        let frame = MstpFrame {
            frame_type: FrameType::Token,
            destination: 0x10,
            source: 0x05,
            data: vec![0; 5],
        };
        let encoded = frame.encode();
        assert_eq!(encoded[..7], [0x55, 0xFF, 0x00, 0x10, 0x05, 0x00, 0x05]);
        assert_eq!(encoded[7], 0x8F);
    }

    #[test]
    fn test_corrupted_frames_rejected() {
        let frame = MstpFrame::bacnet_data(1, 2, vec![0xAA, 0xBB], false).unwrap();
        let mut encoded = frame.encode();

        let mut bad_header = encoded.clone();
        bad_header[3] ^= 0x01;
        assert_eq!(
            MstpFrame::decode(&bad_header).unwrap_err(),
            DataLinkError::CrcError
        );

        let last = encoded.len() - 3;
        encoded[last] ^= 0xFF;
        assert_eq!(
            MstpFrame::decode(&encoded).unwrap_err(),
            DataLinkError::CrcError
        );
    }

    #[test]
    fn test_oversize_data_rejected() {
        assert_eq!(
            MstpFrame::bacnet_data(1, 2, vec![0; MSTP_MAX_DATA_LENGTH + 1], false).unwrap_err(),
            DataLinkError::FrameTooLarge
        );
        assert!(MstpFrame::bacnet_data(1, 2, vec![0; MSTP_MAX_DATA_LENGTH], false).is_ok());
    }

    #[test]
    fn test_receive_fsm_accepts_valid_frame() {
        let mut port = MstpPort::new(5, 127, 1);
        let frame = MstpFrame::bacnet_data(5, 9, vec![0x01, 0x22, 0x30], false).unwrap();
        feed_frame(&mut port, &frame);
        assert_eq!(port.received_valid_frame.as_ref(), Some(&frame));
        assert_eq!(port.receive_state(), ReceiveState::Idle);
    }

    #[test]
    fn test_receive_fsm_rejects_bad_header_crc() {
        let mut port = MstpPort::new(5, 127, 1);
        let mut encoded = MstpFrame::token(5, 9).encode();
        encoded[7] ^= 0x55;
        for octet in encoded {
            port.receive_octet(octet);
        }
        assert!(port.received_valid_frame.is_none());
        assert!(port.received_invalid_frame);
    }

    #[test]
    fn test_receive_fsm_gap_aborts_frame() {
        let mut port = MstpPort::new(5, 127, 1);
        let encoded = MstpFrame::token(5, 9).encode();

        // Half the frame, then a long silence, then the rest.
        for &octet in &encoded[..4] {
            port.receive_octet(octet);
        }
        port.advance_silence(T_FRAME_ABORT_MS);
        for &octet in &encoded[4..] {
            port.receive_octet(octet);
        }
        assert!(port.received_valid_frame.is_none());
        assert!(port.received_invalid_frame);
    }

    #[test]
    fn test_token_receipt_enables_transmission() {
        let mut port = MstpPort::new(5, 127, 1);
        port.run_master(); // initialize -> idle
        port.queue_npdu(9, vec![0x01, 0x00], false).unwrap();

        feed_frame(&mut port, &MstpFrame::token(5, 4));
        let events = port.run_master();
        let frames = drain_transmits(&events);

        // Our application frame, then a successor search (no other master
        // has been seen yet, so there is nobody to pass the token to).
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].frame_type, FrameType::BacnetDataNotExpectingReply);
        assert_eq!(frames[0].destination, 9);
        assert_eq!(frames[1].frame_type, FrameType::PollForMaster);
        assert_eq!(frames[1].destination, 6);
    }

    #[test]
    fn test_token_pass_retry_then_poll() {
        // Station 5 passing to 7; after the usage timeout it retries once,
        // then polls for a new successor at station 8.
        let mut port = MstpPort::new(5, 127, 1);
        port.run_master();
        port.next_station = 7;
        port.master_state = MasterState::PassToken;

        let events = port.run_master();
        let frames = drain_transmits(&events);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::Token);
        assert_eq!(frames[0].destination, 7);

        // No activity within the usage timeout: one retry.
        port.advance_silence(T_USAGE_TIMEOUT_MS);
        let frames = drain_transmits(&port.run_master());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::Token);
        assert_eq!(frames[0].destination, 7);

        // Still nothing: search for a successor after station 7.
        port.advance_silence(T_USAGE_TIMEOUT_MS);
        let frames = drain_transmits(&port.run_master());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::PollForMaster);
        assert_eq!(frames[0].destination, 8);
        assert_eq!(port.master_state(), MasterState::PollForMaster);
    }

    #[test]
    fn test_poll_for_master_finds_successor() {
        let mut port = MstpPort::new(5, 127, 1);
        port.run_master();
        port.master_state = MasterState::PollForMaster;
        port.poll_station = 8;

        feed_frame(
            &mut port,
            &MstpFrame {
                frame_type: FrameType::ReplyToPollForMaster,
                destination: 5,
                source: 8,
                data: Vec::new(),
            },
        );
        let frames = drain_transmits(&port.run_master());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::Token);
        assert_eq!(frames[0].destination, 8);
        assert_eq!(port.next_station, 8);
    }

    #[test]
    fn test_sole_master_after_full_sweep() {
        let mut port = MstpPort::new(5, 6, 1);
        port.run_master();
        port.master_state = MasterState::PollForMaster;
        port.poll_station = 6;

        // Nobody answers station 6; the sweep wraps 6 -> 0 .. -> 5 and we
        // declare ourselves sole master.
        for _ in 0..16 {
            port.advance_silence(T_USAGE_TIMEOUT_MS);
            port.run_master();
            if port.sole_master() {
                break;
            }
        }
        assert!(port.sole_master());
    }

    #[test]
    fn test_poll_for_master_answered() {
        let mut port = MstpPort::new(9, 127, 1);
        port.run_master();

        feed_frame(&mut port, &MstpFrame::poll_for_master(9, 3));
        let frames = drain_transmits(&port.run_master());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::ReplyToPollForMaster);
        assert_eq!(frames[0].destination, 3);
    }

    #[test]
    fn test_data_expecting_reply_roundtrip() {
        let mut port = MstpPort::new(9, 127, 1);
        port.run_master();

        let request = MstpFrame::bacnet_data(9, 3, vec![0x01, 0x04, 0x00, 0x05, 0x01, 0x0C], true)
            .unwrap();
        feed_frame(&mut port, &request);
        let events = port.run_master();
        assert!(events.iter().any(|event| matches!(
            event,
            MstpEvent::NpduReceived {
                source: 3,
                expecting_reply: true,
                ..
            }
        )));
        assert_eq!(port.master_state(), MasterState::AnswerDataRequest);

        port.reply_available(vec![0x01, 0x00, 0x20, 0x01, 0x0C]).unwrap();
        let frames = drain_transmits(&port.run_master());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::BacnetDataNotExpectingReply);
        assert_eq!(frames[0].destination, 3);
        assert_eq!(port.master_state(), MasterState::Idle);
    }

    #[test]
    fn test_slow_reply_postponed() {
        let mut port = MstpPort::new(9, 127, 1);
        port.run_master();

        let request = MstpFrame::bacnet_data(9, 3, vec![0x01, 0x04], true).unwrap();
        feed_frame(&mut port, &request);
        port.run_master();

        port.advance_silence(T_REPLY_DELAY_MS);
        let frames = drain_transmits(&port.run_master());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::ReplyPostponed);
        assert_eq!(frames[0].destination, 3);
    }

    #[test]
    fn test_lost_token_recovery() {
        let mut port = MstpPort::new(5, 127, 1);
        port.run_master();

        port.advance_silence(T_NO_TOKEN_BASE_MS + 10 * 5);
        let frames = drain_transmits(&port.run_master());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type, FrameType::PollForMaster);
        assert_eq!(frames[0].destination, 6);
    }

    #[test]
    fn test_reply_matching() {
        use crate::app::{Apdu, MaxApduSize};
        use crate::network::Npdu;

        let mut request = Npdu::new().encode();
        request.extend_from_slice(
            &Apdu::confirmed_request(7, 12, vec![0x0C, 0x00, 0x00, 0x00, 0x01], MaxApduSize::UpTo1476)
                .encode(),
        );

        let mut reply = Npdu::new().encode();
        reply.extend_from_slice(&Apdu::complex_ack(7, 12, vec![0x3E, 0x3F]).encode());
        assert!(reply_matches(&request, &reply));

        let mut wrong_invoke = Npdu::new().encode();
        wrong_invoke.extend_from_slice(&Apdu::complex_ack(8, 12, vec![]).encode());
        assert!(!reply_matches(&request, &wrong_invoke));

        let mut wrong_service = Npdu::new().encode();
        wrong_service.extend_from_slice(&Apdu::complex_ack(7, 15, vec![]).encode());
        assert!(!reply_matches(&request, &wrong_service));
    }
}
