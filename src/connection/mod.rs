//! Drives connect/disconnect/reconnect transitions; dispatches inbound
//! events; feeds outbound messages to the socket (spec.md §4.1).

mod backend;
mod manager;
mod types;

pub use manager::{ConnectionHandle, SubscriptionErrorInfo};
pub(crate) use manager::ConnectionManager;
pub use types::{backoff_seconds, ConnectionState, NORMAL_CLOSURE_CODE};

use std::sync::{Arc, Mutex};

use crate::{
    error::Error,
    event::{BindingId, ChannelName},
    registry::{ChannelRegistry, GlobalChannel},
};

pub(crate) type StateChangeCallback = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;
pub(crate) type SubscriptionSucceededCallback = Arc<dyn Fn(&ChannelName) + Send + Sync>;
pub(crate) type SubscriptionErrorCallback = Arc<dyn Fn(&SubscriptionErrorInfo) + Send + Sync>;
/// Fired once the reconnect attempt cap is hit (spec.md §7
/// `ReconnectExhausted`); the connection is already pinned to `Disconnected`
/// by the time this runs.
pub(crate) type ReconnectFailedCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// State shared between the [`crate::Client`] facade and the background
/// [`manager::ConnectionManager`] task: registry, global bindings, and the
/// connection-state observable. Mutated only while the mutex is held, which
/// is the "mutex-guarded region around the Connection" variant spec.md §5
/// explicitly allows as an alternative to a pure actor.
pub(crate) struct SharedState {
    pub state: ConnectionState,
    pub socket_id: Option<String>,
    pub registry: ChannelRegistry,
    pub global: GlobalChannel,
    pub next_binding_id: u64,
    pub on_state_change: Option<StateChangeCallback>,
    pub on_subscription_succeeded: Option<SubscriptionSucceededCallback>,
    pub on_subscription_error: Option<SubscriptionErrorCallback>,
    pub on_reconnect_failed: Option<ReconnectFailedCallback>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            socket_id: None,
            registry: ChannelRegistry::default(),
            global: GlobalChannel::default(),
            next_binding_id: 0,
            on_state_change: None,
            on_subscription_succeeded: None,
            on_subscription_error: None,
            on_reconnect_failed: None,
        }
    }

    pub fn next_binding_id(&mut self) -> BindingId {
        let id = BindingId::new(self.next_binding_id);
        self.next_binding_id += 1;
        id
    }

    pub fn set_state(&mut self, new: ConnectionState) {
        let old = self.state;
        if old == new {
            return;
        }
        self.state = new;
        tracing::debug!(?old, ?new, "connection state transition");
        if let Some(cb) = self.on_state_change.clone() {
            cb(old, new);
        }
    }
}

pub(crate) type Shared = Arc<Mutex<SharedState>>;
