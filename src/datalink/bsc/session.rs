//! BACnet/SC Connection Session
//!
//! The hub/direct-connect session model: open a WebSocket to the hub, send
//! Connect-Request, keep the link alive with heartbeats, and re-establish
//! on failure alternating primary → failover → primary with exponential
//! backoff capped at [`SC_MAXIMUM_RECONNECT_TIME_S`].
//!
//! The session owns no sockets. Every call returns the actions the caller
//! must perform ([`ScSessionEvent`]); the WebSocket task reports what
//! happened on the wire back into the session. This keeps the state
//! machine synchronous and fully testable.

#[cfg(feature = "std")]
use std::string::String;

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use log::{debug, info, warn};

use super::{
    decode_message, encode_connect_request, encode_disconnect_ack, encode_disconnect_request,
    encode_encapsulated_npdu, encode_heartbeat_ack, encode_heartbeat_request, ScPayload, ScUuid,
    VMacAddress,
};

/// Ceiling for the reconnect backoff
pub const SC_MAXIMUM_RECONNECT_TIME_S: u32 = 600;

/// Initial reconnect delay
pub const SC_MINIMUM_RECONNECT_TIME_S: u32 = 2;

/// Environment variables consumed by [`ScSessionConfig::from_env`]
pub mod env_keys {
    pub const PRIMARY_HUB_URI: &str = "BACNET_SC_PRIMARY_HUB_URI";
    pub const FAILOVER_HUB_URI: &str = "BACNET_SC_FAILOVER_HUB_URI";
    pub const ISSUER_1_CERTIFICATE_FILE: &str = "BACNET_SC_ISSUER_1_CERTIFICATE_FILE";
    pub const OPERATIONAL_CERTIFICATE_FILE: &str = "BACNET_SC_OPERATIONAL_CERTIFICATE_FILE";
    pub const OPERATIONAL_CERTIFICATE_PRIVATE_KEY_FILE: &str =
        "BACNET_SC_OPERATIONAL_CERTIFICATE_PRIVATE_KEY_FILE";
    pub const HUB_FUNCTION_BINDING: &str = "BACNET_SC_HUB_FUNCTION_BINDING";
    pub const DIRECT_CONNECT_INITIATE: &str = "BACNET_SC_DIRECT_CONNECT_INITIATE";
}

/// TLS material locations, loaded by the platform WebSocket layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScCertificates {
    pub issuer_certificate_file: Option<String>,
    pub operational_certificate_file: Option<String>,
    pub operational_private_key_file: Option<String>,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScSessionConfig {
    pub primary_hub_uri: String,
    pub failover_hub_uri: Option<String>,
    pub certificates: ScCertificates,
    /// Local address binding for a node also acting as a hub
    pub hub_function_binding: Option<String>,
    /// Accept direct-connect initiations
    pub direct_connect_initiate: bool,
    pub local_vmac: VMacAddress,
    pub local_uuid: ScUuid,
    pub max_bvlc_length: u16,
    pub max_npdu_length: u16,
    pub connect_timeout_ms: u32,
    pub heartbeat_interval_ms: u32,
    pub heartbeat_timeout_ms: u32,
    pub disconnect_timeout_ms: u32,
}

impl ScSessionConfig {
    pub fn new(primary_hub_uri: &str, local_vmac: VMacAddress, local_uuid: ScUuid) -> Self {
        Self {
            primary_hub_uri: primary_hub_uri.into(),
            failover_hub_uri: None,
            certificates: ScCertificates::default(),
            hub_function_binding: None,
            direct_connect_initiate: false,
            local_vmac,
            local_uuid,
            max_bvlc_length: 1500,
            max_npdu_length: 1476,
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            disconnect_timeout_ms: 10_000,
        }
    }

    /// Build from the standard `BACNET_SC_*` environment variables.
    /// Returns `None` when no primary hub URI is configured.
    #[cfg(feature = "std")]
    pub fn from_env(local_vmac: VMacAddress, local_uuid: ScUuid) -> Option<Self> {
        let primary = std::env::var(env_keys::PRIMARY_HUB_URI).ok()?;
        let mut config = Self::new(&primary, local_vmac, local_uuid);
        config.failover_hub_uri = std::env::var(env_keys::FAILOVER_HUB_URI).ok();
        config.certificates = ScCertificates {
            issuer_certificate_file: std::env::var(env_keys::ISSUER_1_CERTIFICATE_FILE).ok(),
            operational_certificate_file: std::env::var(env_keys::OPERATIONAL_CERTIFICATE_FILE)
                .ok(),
            operational_private_key_file: std::env::var(
                env_keys::OPERATIONAL_CERTIFICATE_PRIVATE_KEY_FILE,
            )
            .ok(),
        };
        config.hub_function_binding = std::env::var(env_keys::HUB_FUNCTION_BINDING).ok();
        config.direct_connect_initiate = std::env::var(env_keys::DIRECT_CONNECT_INITIATE)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Some(config)
    }
}

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScConnectionState {
    #[default]
    Idle,
    /// Waiting for the WebSocket to open
    AwaitingWebsocket,
    /// Connect-Request sent, waiting for Connect-Accept
    AwaitingAccept,
    Connected,
    /// Disconnect-Request sent, waiting for the ack
    Disconnecting,
    /// Backoff delay before the next attempt
    WaitingToRetry,
}

/// Actions the owner must carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScSessionEvent {
    /// Open a WebSocket to this URI (TLS material from the config)
    OpenWebsocket { uri: String },
    /// Send these octets on the open WebSocket
    Send(Vec<u8>),
    /// Close the WebSocket
    CloseWebsocket,
    /// Deliver a received NPDU upward
    NpduReceived {
        source: Option<VMacAddress>,
        npdu: Vec<u8>,
    },
}

/// The hub-connection state machine
pub struct ScSession {
    config: ScSessionConfig,
    state: ScConnectionState,
    /// Next attempt goes to the failover URI
    use_failover: bool,
    reconnect_delay_s: u32,
    retry_timer_ms: u32,
    connect_timer_ms: u32,
    heartbeat_timer_ms: u32,
    heartbeat_outstanding: bool,
    disconnect_timer_ms: u32,
    message_id: u16,
    hub_vmac: Option<VMacAddress>,
}

impl ScSession {
    pub fn new(config: ScSessionConfig) -> Self {
        Self {
            config,
            state: ScConnectionState::Idle,
            use_failover: false,
            reconnect_delay_s: SC_MINIMUM_RECONNECT_TIME_S,
            retry_timer_ms: 0,
            connect_timer_ms: 0,
            heartbeat_timer_ms: 0,
            heartbeat_outstanding: false,
            disconnect_timer_ms: 0,
            message_id: 0,
            hub_vmac: None,
        }
    }

    pub fn state(&self) -> ScConnectionState {
        self.state
    }

    pub fn hub_vmac(&self) -> Option<VMacAddress> {
        self.hub_vmac
    }

    fn next_message_id(&mut self) -> u16 {
        self.message_id = self.message_id.wrapping_add(1);
        self.message_id
    }

    fn current_uri(&self) -> String {
        if self.use_failover {
            self.config
                .failover_hub_uri
                .clone()
                .unwrap_or_else(|| self.config.primary_hub_uri.clone())
        } else {
            self.config.primary_hub_uri.clone()
        }
    }

    /// Begin connecting to the hub
    pub fn start(&mut self) -> Vec<ScSessionEvent> {
        self.state = ScConnectionState::AwaitingWebsocket;
        self.connect_timer_ms = 0;
        let uri = self.current_uri();
        info!("connecting to hub {}", uri);
        [ScSessionEvent::OpenWebsocket { uri }].into()
    }

    /// The WebSocket is open; send the connect handshake
    pub fn websocket_opened(&mut self) -> Vec<ScSessionEvent> {
        if self.state != ScConnectionState::AwaitingWebsocket {
            return Vec::new();
        }
        self.state = ScConnectionState::AwaitingAccept;
        self.connect_timer_ms = 0;
        let message_id = self.next_message_id();
        let request = encode_connect_request(
            message_id,
            &self.config.local_vmac,
            &self.config.local_uuid,
            self.config.max_bvlc_length,
            self.config.max_npdu_length,
        );
        [ScSessionEvent::Send(request)].into()
    }

    /// The WebSocket dropped; schedule the next attempt
    pub fn websocket_closed(&mut self) -> Vec<ScSessionEvent> {
        match self.state {
            ScConnectionState::Idle => Vec::new(),
            ScConnectionState::Disconnecting => {
                self.state = ScConnectionState::Idle;
                Vec::new()
            }
            _ => {
                self.schedule_retry();
                Vec::new()
            }
        }
    }

    fn schedule_retry(&mut self) {
        self.state = ScConnectionState::WaitingToRetry;
        self.retry_timer_ms = self.reconnect_delay_s * 1000;
        warn!(
            "hub connection lost; retrying in {} s ({})",
            self.reconnect_delay_s,
            if self.use_failover { "failover" } else { "primary" }
        );
        // Alternate hubs before growing the delay.
        if self.config.failover_hub_uri.is_some() {
            self.use_failover = !self.use_failover;
        }
        self.reconnect_delay_s = (self.reconnect_delay_s * 2).min(SC_MAXIMUM_RECONNECT_TIME_S);
        self.heartbeat_outstanding = false;
        self.hub_vmac = None;
    }

    fn connection_failed(&mut self) -> Vec<ScSessionEvent> {
        self.schedule_retry();
        [ScSessionEvent::CloseWebsocket].into()
    }

    /// Queue an NPDU toward the hub; valid only while connected
    pub fn send_npdu(
        &mut self,
        destination: Option<&VMacAddress>,
        npdu: &[u8],
    ) -> super::Result<Vec<ScSessionEvent>> {
        if self.state != ScConnectionState::Connected {
            return Err(super::BscError::InconsistentParameters);
        }
        let message_id = self.next_message_id();
        let message = encode_encapsulated_npdu(
            message_id,
            Some(&self.config.local_vmac),
            destination,
            &[],
            &[],
            npdu,
        )?;
        Ok([ScSessionEvent::Send(message)].into())
    }

    /// Initiate an orderly disconnect
    pub fn disconnect(&mut self) -> Vec<ScSessionEvent> {
        if self.state != ScConnectionState::Connected {
            self.state = ScConnectionState::Idle;
            return [ScSessionEvent::CloseWebsocket].into();
        }
        self.state = ScConnectionState::Disconnecting;
        self.disconnect_timer_ms = 0;
        let message_id = self.next_message_id();
        [ScSessionEvent::Send(encode_disconnect_request(message_id))].into()
    }

    /// Process one received BVLC-SC message
    pub fn handle_frame(&mut self, data: &[u8]) -> Vec<ScSessionEvent> {
        let message = match decode_message(data) {
            Ok(message) => message,
            Err(error) => {
                // Framing errors are logged and the message dropped.
                warn!("dropping BVLC-SC message: {}", error);
                return Vec::new();
            }
        };

        match (&self.state, &message.payload) {
            (ScConnectionState::AwaitingAccept, ScPayload::ConnectAccept { vmac, .. }) => {
                info!("connected to hub {}", vmac);
                self.hub_vmac = Some(*vmac);
                self.state = ScConnectionState::Connected;
                self.heartbeat_timer_ms = 0;
                self.heartbeat_outstanding = false;
                // A successful connect resets the failover rotation.
                self.use_failover = false;
                self.reconnect_delay_s = SC_MINIMUM_RECONNECT_TIME_S;
                Vec::new()
            }
            (ScConnectionState::AwaitingAccept, ScPayload::Result { result_code, .. })
                if *result_code != 0 =>
            {
                warn!("hub refused the connect request");
                self.connection_failed()
            }
            (ScConnectionState::Connected, ScPayload::EncapsulatedNpdu(npdu)) => {
                [ScSessionEvent::NpduReceived {
                    source: message.origin,
                    npdu: npdu.to_vec(),
                }]
                .into()
            }
            (ScConnectionState::Connected, ScPayload::HeartbeatRequest) => {
                [ScSessionEvent::Send(encode_heartbeat_ack(message.message_id))].into()
            }
            (ScConnectionState::Connected, ScPayload::HeartbeatAck) => {
                self.heartbeat_outstanding = false;
                Vec::new()
            }
            (ScConnectionState::Connected, ScPayload::DisconnectRequest) => {
                debug!("hub requested disconnect");
                self.state = ScConnectionState::Idle;
                [
                    ScSessionEvent::Send(encode_disconnect_ack(message.message_id)),
                    ScSessionEvent::CloseWebsocket,
                ]
                .into()
            }
            (ScConnectionState::Disconnecting, ScPayload::DisconnectAck) => {
                self.state = ScConnectionState::Idle;
                [ScSessionEvent::CloseWebsocket].into()
            }
            _ => Vec::new(),
        }
    }

    /// Advance the session timers
    pub fn tick(&mut self, elapsed_ms: u32) -> Vec<ScSessionEvent> {
        match self.state {
            ScConnectionState::AwaitingWebsocket | ScConnectionState::AwaitingAccept => {
                self.connect_timer_ms = self.connect_timer_ms.saturating_add(elapsed_ms);
                if self.connect_timer_ms >= self.config.connect_timeout_ms {
                    warn!("connect timeout");
                    return self.connection_failed();
                }
                Vec::new()
            }
            ScConnectionState::Connected => {
                self.heartbeat_timer_ms = self.heartbeat_timer_ms.saturating_add(elapsed_ms);
                if self.heartbeat_outstanding {
                    if self.heartbeat_timer_ms >= self.config.heartbeat_timeout_ms {
                        warn!("heartbeat timeout");
                        return self.connection_failed();
                    }
                } else if self.heartbeat_timer_ms >= self.config.heartbeat_interval_ms {
                    self.heartbeat_timer_ms = 0;
                    self.heartbeat_outstanding = true;
                    let message_id = self.next_message_id();
                    return [ScSessionEvent::Send(encode_heartbeat_request(message_id))].into();
                }
                Vec::new()
            }
            ScConnectionState::Disconnecting => {
                self.disconnect_timer_ms = self.disconnect_timer_ms.saturating_add(elapsed_ms);
                if self.disconnect_timer_ms >= self.config.disconnect_timeout_ms {
                    self.state = ScConnectionState::Idle;
                    return [ScSessionEvent::CloseWebsocket].into();
                }
                Vec::new()
            }
            ScConnectionState::WaitingToRetry => {
                self.retry_timer_ms = self.retry_timer_ms.saturating_sub(elapsed_ms);
                if self.retry_timer_ms == 0 {
                    return self.start();
                }
                Vec::new()
            }
            ScConnectionState::Idle => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datalink::bsc::encode_connect_accept;

    fn config() -> ScSessionConfig {
        let mut config = ScSessionConfig::new(
            "wss://hub.example:4443",
            VMacAddress([0, 0, 0, 0, 0, 1]),
            ScUuid([0x11; 16]),
        );
        config.failover_hub_uri = Some("wss://failover.example:4443".into());
        config
    }

    fn accept_frame() -> Vec<u8> {
        encode_connect_accept(1, &VMacAddress([9; 6]), &ScUuid([0x22; 16]), 1500, 1476)
    }

    fn connect(session: &mut ScSession) {
        session.start();
        session.websocket_opened();
        session.handle_frame(&accept_frame());
        assert_eq!(session.state(), ScConnectionState::Connected);
    }

    #[test]
    fn test_connect_handshake() {
        let mut session = ScSession::new(config());

        let events = session.start();
        assert_eq!(
            events,
            vec![ScSessionEvent::OpenWebsocket {
                uri: "wss://hub.example:4443".into()
            }]
        );

        let events = session.websocket_opened();
        match &events[..] {
            [ScSessionEvent::Send(bytes)] => {
                assert_eq!(bytes[0], crate::datalink::bsc::BVLC_SC_CONNECT_REQUEST);
                assert_eq!(bytes.len(), 30);
            }
            other => panic!("unexpected events {:?}", other),
        }

        session.handle_frame(&accept_frame());
        assert_eq!(session.state(), ScConnectionState::Connected);
        assert_eq!(session.hub_vmac(), Some(VMacAddress([9; 6])));
    }

    #[test]
    fn test_npdu_round_trip() {
        let mut session = ScSession::new(config());
        connect(&mut session);

        let events = session.send_npdu(None, &[0x01, 0x00, 0x10, 0x08]).unwrap();
        match &events[..] {
            [ScSessionEvent::Send(bytes)] => {
                let decoded = crate::datalink::bsc::decode_message(bytes).unwrap();
                assert_eq!(decoded.function, crate::datalink::bsc::BVLC_SC_ENCAPSULATED_NPDU);
            }
            other => panic!("unexpected events {:?}", other),
        }

        let incoming = crate::datalink::bsc::encode_encapsulated_npdu(
            7,
            Some(&VMacAddress([9; 6])),
            None,
            &[],
            &[],
            &[0x01, 0x00, 0x20, 0x01, 0x0C],
        )
        .unwrap();
        let events = session.handle_frame(&incoming);
        assert_eq!(
            events,
            vec![ScSessionEvent::NpduReceived {
                source: Some(VMacAddress([9; 6])),
                npdu: vec![0x01, 0x00, 0x20, 0x01, 0x0C],
            }]
        );
    }

    #[test]
    fn test_send_requires_connection() {
        let mut session = ScSession::new(config());
        assert!(session.send_npdu(None, &[0x01]).is_err());
    }

    #[test]
    fn test_heartbeat_cycle() {
        let mut session = ScSession::new(config());
        connect(&mut session);

        // Interval elapses: heartbeat request goes out.
        let events = session.tick(30_000);
        match &events[..] {
            [ScSessionEvent::Send(bytes)] => {
                assert_eq!(bytes[0], crate::datalink::bsc::BVLC_SC_HEARTBEAT_REQUEST);
            }
            other => panic!("unexpected events {:?}", other),
        }

        // Ack in time keeps the connection up.
        session.handle_frame(&crate::datalink::bsc::encode_heartbeat_ack(2));
        assert_eq!(session.state(), ScConnectionState::Connected);

        // Next heartbeat goes unanswered: the connection drops.
        session.tick(30_000);
        let events = session.tick(10_000);
        assert_eq!(events, vec![ScSessionEvent::CloseWebsocket]);
        assert_eq!(session.state(), ScConnectionState::WaitingToRetry);
    }

    #[test]
    fn test_failover_rotation_and_backoff() {
        let mut session = ScSession::new(config());
        session.start();
        session.websocket_opened();

        // Connect timeout: first retry goes to the failover after the
        // minimum delay.
        let events = session.tick(10_000);
        assert_eq!(events, vec![ScSessionEvent::CloseWebsocket]);
        assert_eq!(session.state(), ScConnectionState::WaitingToRetry);

        let events = session.tick(SC_MINIMUM_RECONNECT_TIME_S * 1000);
        assert_eq!(
            events,
            vec![ScSessionEvent::OpenWebsocket {
                uri: "wss://failover.example:4443".into()
            }]
        );

        // Second failure: back to the primary with a doubled delay.
        session.websocket_opened();
        session.tick(10_000);
        assert!(session.tick(SC_MINIMUM_RECONNECT_TIME_S * 1000).is_empty());
        let events = session.tick(SC_MINIMUM_RECONNECT_TIME_S * 1000);
        assert_eq!(
            events,
            vec![ScSessionEvent::OpenWebsocket {
                uri: "wss://hub.example:4443".into()
            }]
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut session = ScSession::new(config());
        for _ in 0..16 {
            session.schedule_retry();
        }
        assert_eq!(session.reconnect_delay_s, SC_MAXIMUM_RECONNECT_TIME_S);
    }

    #[test]
    fn test_successful_connect_resets_backoff() {
        let mut session = ScSession::new(config());
        session.schedule_retry();
        session.schedule_retry();
        session.state = ScConnectionState::AwaitingAccept;
        session.handle_frame(&accept_frame());
        assert_eq!(session.reconnect_delay_s, SC_MINIMUM_RECONNECT_TIME_S);
        assert!(!session.use_failover);
    }

    #[test]
    fn test_orderly_disconnect() {
        let mut session = ScSession::new(config());
        connect(&mut session);

        let events = session.disconnect();
        match &events[..] {
            [ScSessionEvent::Send(bytes)] => {
                assert_eq!(bytes[0], crate::datalink::bsc::BVLC_SC_DISCONNECT_REQUEST);
            }
            other => panic!("unexpected events {:?}", other),
        }
        assert_eq!(session.state(), ScConnectionState::Disconnecting);

        let events = session.handle_frame(&crate::datalink::bsc::encode_disconnect_ack(3));
        assert_eq!(events, vec![ScSessionEvent::CloseWebsocket]);
        assert_eq!(session.state(), ScConnectionState::Idle);
    }

    #[test]
    fn test_hub_initiated_disconnect() {
        let mut session = ScSession::new(config());
        connect(&mut session);

        let events =
            session.handle_frame(&crate::datalink::bsc::encode_disconnect_request(5));
        assert_eq!(events.len(), 2);
        assert_eq!(session.state(), ScConnectionState::Idle);
    }
}
