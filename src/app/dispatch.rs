//! APDU Dispatcher
//!
//! Routes decoded PDUs to per-service handlers. Handlers register in tables
//! indexed by service choice; incoming confirmed requests with no handler
//! are answered with `Reject(unrecognized-service)`, acks and errors are
//! matched against the transaction table before their handlers run, and
//! segmented requests are answered with `Abort(segmentation-not-supported)`.
//!
//! The dispatcher never performs I/O. Every call returns the response APDU
//! (if any) as bytes; the owning loop wraps it in an NPDU and hands it to
//! the transport.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec::Vec};

use log::{debug, trace, warn};

use crate::app::tsm::{ResponseMatch, TransactionManager};
use crate::app::{Apdu, MaxApduSize, Result};
use crate::network::BacnetAddress;
use crate::service::{AbortReason, RejectReason};

/// What a confirmed-service handler produced
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmedResponse {
    /// Service completed with no data to return
    SimpleAck,
    /// Service completed; the payload is the service-ack body
    ComplexAck(Vec<u8>),
    /// Service failed with a BACnet error class/code pair
    Error { class: u32, code: u32 },
    Reject(RejectReason),
    Abort(AbortReason),
}

/// Context handed to a confirmed-service handler
pub struct ConfirmedInvocation<'a> {
    pub invoke_id: u8,
    pub service_choice: u8,
    /// Largest APDU the requester accepts for the reply
    pub max_apdu: MaxApduSize,
    pub body: &'a [u8],
    pub source: &'a BacnetAddress,
}

pub type ConfirmedHandler = Box<dyn FnMut(&ConfirmedInvocation<'_>) -> ConfirmedResponse>;
pub type UnconfirmedHandler = Box<dyn FnMut(u8, &[u8], &BacnetAddress)>;
pub type AckHandler = Box<dyn FnMut(u8, &[u8], &BacnetAddress)>;
pub type ErrorHandler = Box<dyn FnMut(u8, u32, u32, &BacnetAddress)>;
pub type AbortHandler = Box<dyn FnMut(u8, u8, &BacnetAddress)>;
pub type RejectHandler = Box<dyn FnMut(u8, u8, &BacnetAddress)>;

/// Registration tables for every PDU path
pub struct ApduDispatcher {
    unconfirmed: [Option<UnconfirmedHandler>; 256],
    confirmed: [Option<ConfirmedHandler>; 256],
    confirmed_ack: [Option<AckHandler>; 256],
    error_handlers: [Option<ErrorHandler>; 256],
    abort_handler: Option<AbortHandler>,
    reject_handler: Option<RejectHandler>,
    unrecognized_handler: Option<UnconfirmedHandler>,
}

impl ApduDispatcher {
    pub fn new() -> Self {
        Self {
            unconfirmed: core::array::from_fn(|_| None),
            confirmed: core::array::from_fn(|_| None),
            confirmed_ack: core::array::from_fn(|_| None),
            error_handlers: core::array::from_fn(|_| None),
            abort_handler: None,
            reject_handler: None,
            unrecognized_handler: None,
        }
    }

    pub fn register_unconfirmed(&mut self, service_choice: u8, handler: UnconfirmedHandler) {
        self.unconfirmed[service_choice as usize] = Some(handler);
    }

    pub fn register_confirmed(&mut self, service_choice: u8, handler: ConfirmedHandler) {
        self.confirmed[service_choice as usize] = Some(handler);
    }

    pub fn register_confirmed_ack(&mut self, service_choice: u8, handler: AckHandler) {
        self.confirmed_ack[service_choice as usize] = Some(handler);
    }

    pub fn register_error(&mut self, service_choice: u8, handler: ErrorHandler) {
        self.error_handlers[service_choice as usize] = Some(handler);
    }

    pub fn register_abort(&mut self, handler: AbortHandler) {
        self.abort_handler = Some(handler);
    }

    pub fn register_reject(&mut self, handler: RejectHandler) {
        self.reject_handler = Some(handler);
    }

    /// Handler for unconfirmed services nobody registered for
    pub fn register_unrecognized_service(&mut self, handler: UnconfirmedHandler) {
        self.unrecognized_handler = Some(handler);
    }

    /// Decode and route one APDU. Returns the response APDU bytes to send
    /// back to `source`, when the PDU calls for one.
    pub fn dispatch(
        &mut self,
        tsm: &mut TransactionManager,
        data: &[u8],
        source: &BacnetAddress,
    ) -> Result<Option<Vec<u8>>> {
        let apdu = Apdu::decode(data)?;
        trace!("dispatch {:?} from {:?}", apdu.invoke_id(), source);

        match apdu {
            Apdu::UnconfirmedRequest {
                service_choice,
                service_data,
            } => {
                match &mut self.unconfirmed[service_choice as usize] {
                    Some(handler) => handler(service_choice, &service_data, source),
                    None => {
                        if let Some(handler) = &mut self.unrecognized_handler {
                            handler(service_choice, &service_data, source);
                        } else {
                            debug!("unconfirmed service {} unhandled", service_choice);
                        }
                    }
                }
                Ok(None)
            }
            Apdu::ConfirmedRequest {
                segmented,
                invoke_id,
                service_choice,
                max_apdu,
                service_data,
                ..
            } => {
                if segmented {
                    let abort = Apdu::Abort {
                        server: true,
                        invoke_id,
                        reason: AbortReason::SegmentationNotSupported as u8,
                    };
                    return Ok(Some(abort.encode()));
                }
                let response = match &mut self.confirmed[service_choice as usize] {
                    Some(handler) => {
                        let invocation = ConfirmedInvocation {
                            invoke_id,
                            service_choice,
                            max_apdu,
                            body: &service_data,
                            source,
                        };
                        handler(&invocation)
                    }
                    None => ConfirmedResponse::Reject(RejectReason::UnrecognizedService),
                };
                let reply = match response {
                    ConfirmedResponse::SimpleAck => Apdu::SimpleAck {
                        invoke_id,
                        service_choice,
                    },
                    ConfirmedResponse::ComplexAck(body) => {
                        Apdu::complex_ack(invoke_id, service_choice, body)
                    }
                    ConfirmedResponse::Error { class, code } => Apdu::Error {
                        invoke_id,
                        service_choice,
                        error_class: class,
                        error_code: code,
                    },
                    ConfirmedResponse::Reject(reason) => Apdu::Reject {
                        invoke_id,
                        reason: reason as u8,
                    },
                    ConfirmedResponse::Abort(reason) => Apdu::Abort {
                        server: true,
                        invoke_id,
                        reason: reason as u8,
                    },
                };
                Ok(Some(reply.encode()))
            }
            Apdu::SimpleAck {
                invoke_id,
                service_choice,
            } => {
                self.deliver_ack(tsm, invoke_id, service_choice, &[], source);
                Ok(None)
            }
            Apdu::ComplexAck {
                segmented,
                invoke_id,
                service_choice,
                service_data,
                ..
            } => {
                if segmented {
                    // The request never advertised segmentation support.
                    warn!("segmented ack for invoke-id {} dropped", invoke_id);
                    return Ok(None);
                }
                self.deliver_ack(tsm, invoke_id, service_choice, &service_data, source);
                Ok(None)
            }
            Apdu::Error {
                invoke_id,
                service_choice,
                error_class,
                error_code,
            } => {
                if tsm.on_response(invoke_id, source, service_choice) == ResponseMatch::Match {
                    if let Some(handler) = &mut self.error_handlers[service_choice as usize] {
                        handler(invoke_id, error_class, error_code, source);
                    } else {
                        debug!(
                            "error {}/{} for invoke-id {} unhandled",
                            error_class, error_code, invoke_id
                        );
                    }
                    tsm.free(invoke_id);
                }
                Ok(None)
            }
            Apdu::Reject { invoke_id, reason } => {
                if let Some(handler) = &mut self.reject_handler {
                    handler(invoke_id, reason, source);
                }
                if tsm.on_abort(invoke_id, source) == ResponseMatch::Match {
                    tsm.free(invoke_id);
                }
                Ok(None)
            }
            Apdu::Abort {
                invoke_id, reason, ..
            } => {
                if let Some(handler) = &mut self.abort_handler {
                    handler(invoke_id, reason, source);
                }
                if tsm.on_abort(invoke_id, source) == ResponseMatch::Match {
                    tsm.free(invoke_id);
                }
                Ok(None)
            }
        }
    }

    fn deliver_ack(
        &mut self,
        tsm: &mut TransactionManager,
        invoke_id: u8,
        service_choice: u8,
        body: &[u8],
        source: &BacnetAddress,
    ) {
        match tsm.on_response(invoke_id, source, service_choice) {
            ResponseMatch::Match => {
                if let Some(handler) = &mut self.confirmed_ack[service_choice as usize] {
                    handler(invoke_id, body, source);
                }
                tsm.free(invoke_id);
            }
            ResponseMatch::Mismatch => {
                debug!("ack for unknown invoke-id {} dropped", invoke_id);
            }
        }
    }

    /// Surface transactions that exhausted their retries as locally
    /// generated `Abort(tsm-timeout)` indications to the abort handler.
    pub fn surface_timeouts(&mut self, tsm: &mut TransactionManager) {
        for failed in tsm.drain_failed() {
            warn!(
                "invoke-id {} timed out toward {:?}",
                failed.invoke_id, failed.peer
            );
            if let Some(handler) = &mut self.abort_handler {
                handler(failed.invoke_id, AbortReason::TsmTimeout as u8, &failed.peer);
            }
        }
    }
}

impl Default for ApduDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Apdu;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn source() -> BacnetAddress {
        BacnetAddress::local(&[7])
    }

    #[test]
    fn test_confirmed_dispatch_complex_ack() {
        let mut dispatcher = ApduDispatcher::new();
        let mut tsm = TransactionManager::new();

        dispatcher.register_confirmed(
            12,
            Box::new(|invocation| {
                assert_eq!(invocation.service_choice, 12);
                ConfirmedResponse::ComplexAck(invocation.body.to_vec())
            }),
        );

        let request = Apdu::confirmed_request(1, 12, vec![0xAA, 0xBB], MaxApduSize::UpTo1476);
        let reply = dispatcher
            .dispatch(&mut tsm, &request.encode(), &source())
            .unwrap()
            .unwrap();
        match Apdu::decode(&reply).unwrap() {
            Apdu::ComplexAck {
                invoke_id,
                service_choice,
                service_data,
                ..
            } => {
                assert_eq!(invoke_id, 1);
                assert_eq!(service_choice, 12);
                assert_eq!(service_data, vec![0xAA, 0xBB]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unregistered_confirmed_service_rejected() {
        let mut dispatcher = ApduDispatcher::new();
        let mut tsm = TransactionManager::new();

        let request = Apdu::confirmed_request(9, 99, vec![], MaxApduSize::UpTo1476);
        let reply = dispatcher
            .dispatch(&mut tsm, &request.encode(), &source())
            .unwrap()
            .unwrap();
        assert_eq!(
            Apdu::decode(&reply).unwrap(),
            Apdu::Reject {
                invoke_id: 9,
                reason: RejectReason::UnrecognizedService as u8,
            }
        );
    }

    #[test]
    fn test_segmented_request_aborted() {
        let mut dispatcher = ApduDispatcher::new();
        let mut tsm = TransactionManager::new();

        // Segmented confirmed request, sequence 0, window 1.
        let data = [0x08, 0x05, 0x03, 0x00, 0x01, 0x0C];
        let reply = dispatcher.dispatch(&mut tsm, &data, &source()).unwrap().unwrap();
        assert_eq!(
            Apdu::decode(&reply).unwrap(),
            Apdu::Abort {
                server: true,
                invoke_id: 3,
                reason: AbortReason::SegmentationNotSupported as u8,
            }
        );
    }

    #[test]
    fn test_ack_routing_frees_transaction() {
        let mut dispatcher = ApduDispatcher::new();
        let mut tsm = TransactionManager::new();
        let peer = source();

        let hits = Arc::new(AtomicU32::new(0));
        let hits_in_handler = hits.clone();
        dispatcher.register_confirmed_ack(
            12,
            Box::new(move |_, body, _| {
                assert_eq!(body, [0x3E, 0x3F]);
                hits_in_handler.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let invoke_id = tsm.allocate(&peer, 12, &[0x00]).unwrap();
        let ack = Apdu::complex_ack(invoke_id, 12, vec![0x3E, 0x3F]);
        assert!(dispatcher
            .dispatch(&mut tsm, &ack.encode(), &peer)
            .unwrap()
            .is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(tsm.invoke_id_free(invoke_id));
    }

    #[test]
    fn test_mismatched_ack_dropped() {
        let mut dispatcher = ApduDispatcher::new();
        let mut tsm = TransactionManager::new();
        let peer = source();

        let invoke_id = tsm.allocate(&peer, 12, &[]).unwrap();
        // Ack with the wrong service choice never reaches handlers and the
        // transaction stays outstanding.
        let ack = Apdu::SimpleAck {
            invoke_id,
            service_choice: 15,
        };
        dispatcher.dispatch(&mut tsm, &ack.encode(), &peer).unwrap();
        assert!(!tsm.invoke_id_free(invoke_id));
    }

    #[test]
    fn test_timeout_surfaces_abort() {
        let mut dispatcher = ApduDispatcher::new();
        let mut tsm = TransactionManager::new();
        tsm.set_policy(10, 0);

        let reasons = Arc::new(AtomicU32::new(0));
        let reasons_in_handler = reasons.clone();
        dispatcher.register_abort(Box::new(move |_, reason, _| {
            reasons_in_handler.store(reason as u32, Ordering::SeqCst);
        }));

        tsm.allocate(&source(), 12, &[]).unwrap();
        tsm.tick(10);
        dispatcher.surface_timeouts(&mut tsm);
        assert_eq!(
            reasons.load(Ordering::SeqCst),
            AbortReason::TsmTimeout as u32
        );
    }
}
