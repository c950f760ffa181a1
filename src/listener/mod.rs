// src/listener/mod.rs

use log::{debug, warn};
use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::protocol::{self, InboundMessage, MessageKind};

/// Marker string for listeners that receive every message.
pub const WILDCARD: &str = "*";

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener_{}", self.0)
    }
}

/// What a listener is registered under: one message kind, or everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerKey {
    Kind(MessageKind),
    Wildcard,
}

impl From<MessageKind> for ListenerKey {
    fn from(kind: MessageKind) -> Self {
        Self::Kind(kind)
    }
}

impl From<&str> for ListenerKey {
    fn from(key: &str) -> Self {
        if key == WILDCARD {
            Self::Wildcard
        } else {
            Self::Kind(MessageKind::from(key))
        }
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kind(kind) => write!(f, "{kind}"),
            Self::Wildcard => f.write_str(WILDCARD),
        }
    }
}

type Callback = dyn Fn(&InboundMessage) -> anyhow::Result<()> + Send + Sync;

/// A callback plus the identity used to unregister it.
///
/// Cloning keeps the identity, so one listener can be registered under
/// several keys and removed from each independently.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    description: Arc<str>,
    callback: Arc<Callback>,
}

impl Listener {
    pub fn new<F, S>(description: S, callback: F) -> Self
    where
        F: Fn(&InboundMessage) -> anyhow::Result<()> + Send + Sync + 'static,
        S: Into<String>,
    {
        Self {
            id: ListenerId::next(),
            description: Arc::from(description.into()),
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn handle(&self, message: &InboundMessage) -> anyhow::Result<()> {
        (self.callback)(message)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish()
    }
}

type ListenerMap = HashMap<ListenerKey, HashMap<ListenerId, Listener>>;

/// Routes decoded messages to the listeners registered for their kind.
#[derive(Clone, Default)]
pub struct Dispatcher {
    listeners: Arc<RwLock<ListenerMap>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering the same listener twice under one key is a no-op.
    pub fn add_listener(&self, key: impl Into<ListenerKey>, listener: &Listener) -> ListenerId {
        let key = key.into();
        debug!("Adding {} ({}) under {}", listener.id, listener.description, key);

        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        listeners
            .entry(key)
            .or_default()
            .insert(listener.id, listener.clone());

        listener.id
    }

    /// Returns whether anything was removed.
    pub fn remove_listener(&self, key: impl Into<ListenerKey>, id: ListenerId) -> bool {
        let key = key.into();
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);

        let Some(registered) = listeners.get_mut(&key) else {
            return false;
        };
        let removed = registered.remove(&id).is_some();
        if registered.is_empty() {
            listeners.remove(&key);
        }
        if removed {
            debug!("Removed {} from {}", id, key);
        }
        removed
    }

    pub fn listener_count(&self, key: impl Into<ListenerKey>) -> usize {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        listeners.get(&key.into()).map_or(0, HashMap::len)
    }

    /// Decode a raw text frame and dispatch every envelope in it, in order.
    /// Malformed envelopes are dropped.
    pub fn dispatch_frame(&self, frame: &str) {
        for decoded in protocol::decode_frame(frame) {
            match decoded {
                Ok(message) => self.dispatch(&message),
                Err(e) => warn!("Discarding inbound frame: {e}"),
            }
        }
    }

    pub fn dispatch(&self, message: &InboundMessage) {
        let kind = message.kind();

        for listener in self.matching(&kind) {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.handle(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "Listener {} ({}) failed on {}: {:#}",
                    listener.id, listener.description, kind, e
                ),
                Err(_) => warn!(
                    "Listener {} ({}) panicked on {}",
                    listener.id, listener.description, kind
                ),
            }
        }
    }

    // Snapshot taken under the read lock; callbacks run after it is released
    // so they may add or remove listeners.
    fn matching(&self, kind: &MessageKind) -> Vec<Listener> {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);

        let mut seen = HashMap::new();
        let exact = listeners.get(&ListenerKey::Kind(kind.clone()));
        let wildcard = listeners.get(&ListenerKey::Wildcard);
        for registered in exact.into_iter().chain(wildcard) {
            for (id, listener) in registered {
                seen.entry(*id).or_insert_with(|| listener.clone());
            }
        }

        // Registration order
        let mut matched: Vec<Listener> = seen.into_values().collect();
        matched.sort_by_key(|listener| listener.id.0);
        matched
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Dispatcher")
            .field("keys", &listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}
