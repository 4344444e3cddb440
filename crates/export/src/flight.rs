//! Per-key single-flight registry.
//!
//! At most one export per cache key runs at a time. Later callers for the
//! same key queue on the key's slot. When they get it they take the
//! outcome the previous holder recorded instead of exporting again; a slot
//! with no recorded outcome means the holder gave up, and the next caller
//! does the work itself.

use crate::error::ErrorKind;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// What an export ended with, as handed to queued callers.
pub(crate) type Outcome = std::result::Result<PathBuf, ErrorKind>;

type Slot = Arc<AsyncMutex<Option<Outcome>>>;

#[derive(Debug, Default)]
struct Entry {
    slot: Slot,
    tickets: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Flights {
    slots: Mutex<HashMap<String, Entry>>,
}

impl Flights {
    /// Wait for exclusive use of `key`.
    pub(crate) async fn enter(&self, key: &str) -> Flight<'_> {
        let slot = {
            let mut slots = self.lock();
            let entry = slots.entry(key.to_string()).or_default();
            entry.tickets += 1;
            Arc::clone(&entry.slot)
        };
        let _ticket = Ticket { flights: self, key: key.to_string() };
        let guard = slot.lock_owned().await;
        Flight { guard, _ticket }
    }

    /// Keys with a holder or waiters.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // The map is only ever touched for a handful of instructions; a
        // panic can't leave it half-updated.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive hold on one key.
#[derive(Debug)]
pub(crate) struct Flight<'a> {
    guard: OwnedMutexGuard<Option<Outcome>>,
    _ticket: Ticket<'a>,
}

impl Flight<'_> {
    /// Outcome left by the previous holder, if it finished.
    pub(crate) fn outcome(&self) -> Option<&Outcome> {
        self.guard.as_ref()
    }

    /// Hand `outcome` to everyone queued behind this flight.
    pub(crate) fn record(&mut self, outcome: Outcome) {
        *self.guard = Some(outcome);
    }
}

/// A caller's interest in a slot, held while queued and while flying. The
/// last ticket out removes the slot, so a finished outcome never outlives
/// the callers that were waiting for it.
#[derive(Debug)]
struct Ticket<'a> {
    flights: &'a Flights,
    key: String,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        let mut slots = self.flights.lock();
        if let Some(entry) = slots.get_mut(&self.key) {
            entry.tickets -= 1;
            if entry.tickets == 0 {
                slots.remove(&self.key);
            }
        }
    }
}
