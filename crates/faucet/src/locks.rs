//! Per-address mutual exclusion.
//!
//! Locks are created on first use and dropped from the map as soon as no
//! holder or waiter references them, so the map only ever contains
//! addresses with a claim in flight.

use drip_common::types::Address;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct AddressLocks {
    slots: Mutex<HashMap<Address, Weak<AsyncMutex<()>>>>,
}

/// Exclusive hold on one address. Released on drop.
pub struct AddressGuard<'a> {
    address: Address,
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a AddressLocks,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other attempt holds `address`, then take it.
    pub async fn acquire(&self, address: Address) -> AddressGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            match slots.get(&address).and_then(Weak::upgrade) {
                Some(slot) => slot,
                None => {
                    // A waiter dropped after its holder left cannot prune itself.
                    slots.retain(|_, slot| slot.strong_count() > 0);
                    let slot = Arc::new(AsyncMutex::new(()));
                    slots.insert(address, Arc::downgrade(&slot));
                    slot
                }
            }
        };

        let guard = slot.lock_owned().await;
        AddressGuard {
            address,
            guard: Some(guard),
            locks: self,
        }
    }

    /// Addresses currently held or waited on.
    pub fn in_flight(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.values().filter(|slot| slot.strong_count() > 0).count()
    }
}

impl AddressGuard<'_> {
    pub fn address(&self) -> &Address {
        &self.address
    }
}

impl Drop for AddressGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock().unwrap_or_else(|e| e.into_inner());
        // Release while holding the map so a concurrent acquire either sees
        // the live slot or none at all.
        drop(self.guard.take());
        if slots
            .get(&self.address)
            .map_or(false, |slot| slot.strong_count() == 0)
        {
            slots.remove(&self.address);
        }
    }
}
