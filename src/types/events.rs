use crate::media::{LocalStream, RemoteStream};
use crate::transport::TransportState;
use crate::types::call::{CallId, CallInvitation};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStateChanged {
    pub state: TransportState,
    /// Identity assigned by the rendezvous server, once known.
    pub endpoint_id: Option<String>,
}

/// The complete list of pending invitations after a change.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCallsChanged {
    pub calls: Vec<CallInvitation>,
}

/// `None` once the local capture has been released.
#[derive(Debug, Clone)]
pub struct LocalStreamUpdated {
    pub stream: Option<LocalStream>,
}

/// `None` once the remote media has been discarded.
#[derive(Debug, Clone)]
pub struct RemoteStreamUpdated {
    pub stream: Option<RemoteStream>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallConnected {
    pub call_id: CallId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEndReason {
    LocalHangup,
    RemoteHangup,
    MediaDisconnected,
    MediaFailed,
    MediaClosed,
    NegotiationFailed,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEnded {
    pub call_id: CallId,
    pub reason: CallEndReason,
}

/// Returned by `on`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Subscribers for a single event kind.
pub struct Handlers<T> {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(HandlerId, Handler<T>)>>,
}

impl<T> Handlers<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn on<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .expect("RwLock should not be poisoned");
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    /// Calls every handler in subscription order on the current task.
    ///
    /// The list is snapshotted first, so a handler may subscribe or
    /// unsubscribe without deadlocking; such changes apply from the next emit.
    pub fn emit(&self, payload: &T) {
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in snapshot {
            handler(payload);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .expect("RwLock should not be poisoned")
            .len()
    }
}

impl<T> Default for Handlers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Handlers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("count", &self.handler_count())
            .finish()
    }
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with a separate subscriber list per event kind.
        ///
        /// Delivery is synchronous: handlers run on whichever task emits, in
        /// the order they subscribed. Ordering holds within one kind only.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: Handlers<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: Handlers::new(),
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    (connection_state_changed, ConnectionStateChanged),
    (incoming_call_received, IncomingCallsChanged),
    (local_stream_updated, LocalStreamUpdated),
    (remote_stream_updated, RemoteStreamUpdated),
    (call_connected, CallConnected),
    (call_ended, CallEnded),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
