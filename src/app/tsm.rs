//! Transaction State Machine
//!
//! Tracks outstanding confirmed requests by invoke-id: allocation, binding
//! to a destination address and expected service choice, retransmission on
//! timeout, and release.
//!
//! The manager is driven cooperatively: the owning loop calls
//! [`TransactionManager::tick`] with the elapsed milliseconds after each
//! pass over the transport, transmits whatever retransmissions come back,
//! and surfaces entries that exhausted their retries as local
//! `Abort(tsm-timeout)` indications via [`TransactionManager::drain_failed`].

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use log::{debug, warn};

use crate::network::BacnetAddress;
use crate::MAX_TSM_TRANSACTIONS;

/// Milliseconds an outstanding request waits before retransmission
pub const APDU_TIMEOUT_MS: u32 = 3000;

/// Retransmissions attempted before a transaction is failed
pub const APDU_RETRIES: u8 = 3;

/// States of a confirmed-request transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    AwaitConfirmation,
    SegmentedRequest,
    SegmentedConfirmation,
}

/// Outcome of matching a response against the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMatch {
    /// Invoke-id, peer, and service choice all agree
    Match,
    /// No such transaction, or peer/service disagree
    Mismatch,
}

#[derive(Debug, Clone)]
struct Transaction {
    invoke_id: u8,
    state: TransactionState,
    failed: bool,
    peer: BacnetAddress,
    service_choice: u8,
    apdu: Vec<u8>,
    retry_count: u8,
    timer_ms: u32,
}

/// A retransmission owed to the transport after a timeout
#[derive(Debug, Clone)]
pub struct Retransmission {
    pub invoke_id: u8,
    pub peer: BacnetAddress,
    pub apdu: Vec<u8>,
}

/// A transaction that exhausted its retries
#[derive(Debug, Clone)]
pub struct FailedTransaction {
    pub invoke_id: u8,
    pub peer: BacnetAddress,
    pub service_choice: u8,
}

/// Bounded table of outstanding confirmed requests.
///
/// Invoke-id 0 is reserved as the "free" marker and never allocated.
pub struct TransactionManager {
    transactions: Vec<Transaction>,
    capacity: usize,
    next_invoke_id: u8,
    timeout_ms: u32,
    retries: u8,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::with_capacity(MAX_TSM_TRANSACTIONS)
    }

    /// A manager bounded to at most `capacity` concurrent transactions
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            transactions: Vec::new(),
            capacity: capacity.clamp(1, MAX_TSM_TRANSACTIONS),
            next_invoke_id: 1,
            timeout_ms: APDU_TIMEOUT_MS,
            retries: APDU_RETRIES,
        }
    }

    /// Override the timeout/retry policy (e.g. from device configuration)
    pub fn set_policy(&mut self, timeout_ms: u32, retries: u8) {
        self.timeout_ms = timeout_ms.max(1);
        self.retries = retries;
    }

    pub fn active_count(&self) -> usize {
        self.transactions.len()
    }

    fn find(&self, invoke_id: u8) -> Option<usize> {
        self.transactions
            .iter()
            .position(|t| t.invoke_id == invoke_id)
    }

    /// Allocate a free invoke-id and bind it to the peer, expected service
    /// choice, and request bytes. Returns `None` when the table is full.
    pub fn allocate(&mut self, peer: &BacnetAddress, service_choice: u8, apdu: &[u8]) -> Option<u8> {
        if self.transactions.len() >= self.capacity {
            warn!("TSM table full ({} transactions)", self.capacity);
            return None;
        }

        // Scan the 1..=255 space starting at the rotating candidate.
        for _ in 0..255 {
            let candidate = self.next_invoke_id;
            self.next_invoke_id = if self.next_invoke_id == 255 {
                1
            } else {
                self.next_invoke_id + 1
            };
            if self.find(candidate).is_none() {
                self.transactions.push(Transaction {
                    invoke_id: candidate,
                    state: TransactionState::AwaitConfirmation,
                    failed: false,
                    peer: *peer,
                    service_choice,
                    apdu: apdu.to_vec(),
                    retry_count: 0,
                    timer_ms: self.timeout_ms,
                });
                debug!("TSM allocate invoke-id {}", candidate);
                return Some(candidate);
            }
        }
        None
    }

    /// Advance all timers; expired transactions either produce a
    /// retransmission or are flagged failed once retries are exhausted.
    pub fn tick(&mut self, elapsed_ms: u32) -> Vec<Retransmission> {
        let mut retransmit = Vec::new();
        let timeout = self.timeout_ms;
        let retries = self.retries;

        for transaction in &mut self.transactions {
            if transaction.failed || transaction.state != TransactionState::AwaitConfirmation {
                continue;
            }
            transaction.timer_ms = transaction.timer_ms.saturating_sub(elapsed_ms);
            if transaction.timer_ms > 0 {
                continue;
            }
            if transaction.retry_count < retries {
                transaction.retry_count += 1;
                transaction.timer_ms = timeout;
                debug!(
                    "TSM retransmit invoke-id {} (attempt {})",
                    transaction.invoke_id, transaction.retry_count
                );
                retransmit.push(Retransmission {
                    invoke_id: transaction.invoke_id,
                    peer: transaction.peer,
                    apdu: transaction.apdu.clone(),
                });
            } else {
                warn!(
                    "TSM invoke-id {} failed after {} retries",
                    transaction.invoke_id, retries
                );
                transaction.failed = true;
            }
        }
        retransmit
    }

    /// Match an incoming ack/error against the table. Does not free the
    /// entry; the dispatcher frees after the handler ran.
    pub fn on_response(
        &self,
        invoke_id: u8,
        peer: &BacnetAddress,
        service_choice: u8,
    ) -> ResponseMatch {
        match self.find(invoke_id) {
            Some(index) => {
                let transaction = &self.transactions[index];
                if transaction.peer.matches(peer) && transaction.service_choice == service_choice {
                    ResponseMatch::Match
                } else {
                    ResponseMatch::Mismatch
                }
            }
            None => ResponseMatch::Mismatch,
        }
    }

    /// Match an abort/reject, which carries no service choice
    pub fn on_abort(&self, invoke_id: u8, peer: &BacnetAddress) -> ResponseMatch {
        match self.find(invoke_id) {
            Some(index) if self.transactions[index].peer.matches(peer) => ResponseMatch::Match,
            _ => ResponseMatch::Mismatch,
        }
    }

    /// Return the slot to the pool
    pub fn free(&mut self, invoke_id: u8) {
        if let Some(index) = self.find(invoke_id) {
            self.transactions.swap_remove(index);
            debug!("TSM free invoke-id {}", invoke_id);
        }
    }

    /// True when the invoke-id has no outstanding transaction
    pub fn invoke_id_free(&self, invoke_id: u8) -> bool {
        invoke_id == 0 || self.find(invoke_id).is_none()
    }

    /// True when the transaction exhausted its retries and awaits pickup
    pub fn invoke_id_failed(&self, invoke_id: u8) -> bool {
        matches!(self.find(invoke_id), Some(index) if self.transactions[index].failed)
    }

    /// Remove failed transactions and hand them to the caller, which
    /// surfaces each as a locally generated `Abort(tsm-timeout)`
    pub fn drain_failed(&mut self) -> Vec<FailedTransaction> {
        let mut failed = Vec::new();
        let mut index = 0;
        while index < self.transactions.len() {
            if self.transactions[index].failed {
                let transaction = self.transactions.swap_remove(index);
                failed.push(FailedTransaction {
                    invoke_id: transaction.invoke_id,
                    peer: transaction.peer,
                    service_choice: transaction.service_choice,
                });
            } else {
                index += 1;
            }
        }
        failed
    }

    /// Expected service choice of an outstanding transaction
    pub fn service_choice(&self, invoke_id: u8) -> Option<u8> {
        self.find(invoke_id)
            .map(|index| self.transactions[index].service_choice)
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(mac: u8) -> BacnetAddress {
        BacnetAddress::local(&[mac])
    }

    #[test]
    fn test_allocate_and_match() {
        let mut tsm = TransactionManager::new();
        let id = tsm.allocate(&peer(10), 12, &[0x00, 0x01]).unwrap();
        assert_ne!(id, 0);
        assert!(!tsm.invoke_id_free(id));

        assert_eq!(tsm.on_response(id, &peer(10), 12), ResponseMatch::Match);
        assert_eq!(tsm.on_response(id, &peer(11), 12), ResponseMatch::Mismatch);
        assert_eq!(tsm.on_response(id, &peer(10), 15), ResponseMatch::Mismatch);

        tsm.free(id);
        assert!(tsm.invoke_id_free(id));
    }

    #[test]
    fn test_invoke_ids_are_distinct() {
        let mut tsm = TransactionManager::new();
        let a = tsm.allocate(&peer(1), 12, &[]).unwrap();
        let b = tsm.allocate(&peer(1), 12, &[]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_capacity_bound() {
        let mut tsm = TransactionManager::with_capacity(2);
        assert!(tsm.allocate(&peer(1), 12, &[]).is_some());
        assert!(tsm.allocate(&peer(2), 12, &[]).is_some());
        assert!(tsm.allocate(&peer(3), 12, &[]).is_none());
    }

    #[test]
    fn test_retry_then_fail() {
        let mut tsm = TransactionManager::new();
        tsm.set_policy(100, 2);
        let id = tsm.allocate(&peer(10), 12, &[0xAA]).unwrap();

        // First expiry: retransmission 1.
        let out = tsm.tick(100);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].invoke_id, id);
        assert_eq!(out[0].apdu, vec![0xAA]);

        // Second expiry: retransmission 2.
        assert_eq!(tsm.tick(100).len(), 1);

        // Third expiry: retries exhausted.
        assert!(tsm.tick(100).is_empty());
        assert!(tsm.invoke_id_failed(id));

        let failed = tsm.drain_failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].invoke_id, id);
        assert_eq!(failed[0].service_choice, 12);
        assert!(tsm.invoke_id_free(id));
    }

    #[test]
    fn test_partial_ticks_accumulate() {
        let mut tsm = TransactionManager::new();
        tsm.set_policy(100, 1);
        let id = tsm.allocate(&peer(10), 12, &[]).unwrap();

        assert!(tsm.tick(60).is_empty());
        let out = tsm.tick(60);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].invoke_id, id);
    }

    #[test]
    fn test_invoke_id_zero_reserved() {
        let tsm = TransactionManager::new();
        assert!(tsm.invoke_id_free(0));
    }
}
