//! Per-address session locks
//!
//! A ratchet session must not be advanced by two operations at once. The
//! registry tracks which protocol addresses are held; a caller blocks until
//! every address it asked for is free, then takes all of them together, so
//! multi-recipient sends cannot deadlock against each other.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex, PoisonError};

use courier_core::types::ProtocolAddress;

#[derive(Debug, Default)]
pub struct SessionLocks {
    held: Mutex<BTreeSet<ProtocolAddress>>,
    released: Condvar,
}

/// Holds a set of addresses until dropped.
#[derive(Debug)]
pub struct SessionGuard<'a> {
    locks: &'a SessionLocks,
    addresses: Vec<ProtocolAddress>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, address: &ProtocolAddress) -> SessionGuard<'_> {
        self.acquire_all(std::iter::once(address))
    }

    /// Block until none of `addresses` is held, then take them all.
    ///
    /// Not reentrant: acquiring an address the current thread already holds
    /// blocks forever.
    pub fn acquire_all<'b>(
        &self,
        addresses: impl IntoIterator<Item = &'b ProtocolAddress>,
    ) -> SessionGuard<'_> {
        let wanted: BTreeSet<ProtocolAddress> = addresses.into_iter().cloned().collect();

        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while wanted.iter().any(|a| held.contains(a)) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.extend(wanted.iter().cloned());
        tracing::trace!(count = wanted.len(), "session locks acquired");

        SessionGuard {
            locks: self,
            addresses: wanted.into_iter().collect(),
        }
    }

    pub fn is_locked(&self, address: &ProtocolAddress) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(address)
    }
}

impl SessionGuard<'_> {
    pub fn addresses(&self) -> &[ProtocolAddress] {
        &self.addresses
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for address in &self.addresses {
            held.remove(address);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}
