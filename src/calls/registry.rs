//! Pending call invitations.

use crate::types::call::{CallId, CallInvitation};
use crate::types::events::{EventBus, IncomingCallsChanged};
use log::debug;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Invitations not yet accepted, declined or claimed, in arrival order.
///
/// Every change publishes the complete list on `incoming_call_received`.
/// Handlers may change the registry themselves; the resulting snapshot is
/// delivered after the current one.
pub struct CallRegistry {
    events: Arc<EventBus>,
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    invitations: Vec<CallInvitation>,
    // Snapshots waiting for delivery, oldest first.
    pending: VecDeque<Vec<CallInvitation>>,
    delivering: bool,
}

impl RegistryInner {
    fn record_change(&mut self) {
        self.pending.push_back(self.invitations.clone());
    }
}

impl CallRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            events,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Inserts `invitation`, or replaces the one with the same call id in place.
    pub fn upsert(&self, invitation: CallInvitation) {
        {
            let mut inner = self.lock();
            match inner
                .invitations
                .iter_mut()
                .find(|existing| existing.call_id == invitation.call_id)
            {
                Some(existing) => {
                    debug!(target: "Client/Calls", "Replacing invitation {}", invitation.call_id);
                    *existing = invitation;
                }
                None => inner.invitations.push(invitation),
            }
            inner.record_change();
        }
        self.deliver_pending();
    }

    pub fn remove(&self, call_id: &CallId) -> Option<CallInvitation> {
        let removed = {
            let mut inner = self.lock();
            let position = inner.invitations.iter().position(|i| &i.call_id == call_id)?;
            let removed = inner.invitations.remove(position);
            inner.record_change();
            removed
        };
        self.deliver_pending();
        Some(removed)
    }

    pub fn clear(&self) {
        {
            let mut inner = self.lock();
            if inner.invitations.is_empty() {
                return;
            }
            inner.invitations.clear();
            inner.record_change();
        }
        self.deliver_pending();
    }

    pub fn snapshot(&self) -> Vec<CallInvitation> {
        self.lock().invitations.clone()
    }

    pub fn get(&self, call_id: &CallId) -> Option<CallInvitation> {
        self.lock()
            .invitations
            .iter()
            .find(|i| &i.call_id == call_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().invitations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().invitations.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("Mutex should not be poisoned")
    }

    /// Publishes queued snapshots in order. Whoever finds delivery already
    /// under way leaves its snapshot to that caller.
    fn deliver_pending(&self) {
        {
            let mut inner = self.lock();
            if inner.delivering {
                return;
            }
            inner.delivering = true;
        }
        let _unwinding = scopeguard::guard_on_unwind((), |_| {
            self.lock().delivering = false;
        });

        loop {
            let calls = {
                let mut inner = self.lock();
                match inner.pending.pop_front() {
                    Some(calls) => calls,
                    None => {
                        inner.delivering = false;
                        return;
                    }
                }
            };
            self.events
                .incoming_call_received
                .emit(&IncomingCallsChanged { calls });
        }
    }
}
