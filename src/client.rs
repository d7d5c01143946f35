//! Public façade: subscribe, unsubscribe, bind, connect, disconnect
//! (spec.md §4 "Top-Level Client").

use std::sync::Arc;

use serde_json::Value;

use crate::{
    channel::{EventCallback, MemberCallback},
    connection::{
        ConnectionHandle, ConnectionManager, ConnectionState, ReconnectFailedCallback, Shared,
        StateChangeCallback, SubscriptionErrorCallback, SubscriptionErrorInfo,
        SubscriptionSucceededCallback,
    },
    error::Error,
    event::{BindingId, ChannelName, Member, Payload},
    options::Options,
    reachability::{ReachabilityMonitor, SystemReachability},
};

/// The real-time pub/sub client. Cheaply cloneable; every clone talks to the
/// same background connection manager (spec.md §4 "Top-Level Client").
#[derive(Clone)]
pub struct Client {
    handle: ConnectionHandle,
}

impl Client {
    /// Connects with the default (always-reachable) reachability monitor.
    pub fn new(options: Options) -> Self {
        Self::with_reachability(options, Arc::new(SystemReachability))
    }

    pub fn with_reachability(options: Options, reachability: Arc<dyn ReachabilityMonitor>) -> Self {
        Self { handle: ConnectionManager::spawn(options, reachability) }
    }

    pub fn connect(&self) -> Result<(), Error> {
        self.handle.connect()
    }

    pub fn disconnect(&self) -> Result<(), Error> {
        self.handle.disconnect()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.shared.lock().unwrap().state
    }

    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    {
        self.handle.shared.lock().unwrap().on_state_change = Some(Arc::new(callback) as StateChangeCallback);
    }

    pub fn on_subscription_succeeded<F>(&self, callback: F)
    where
        F: Fn(&ChannelName) + Send + Sync + 'static,
    {
        self.handle.shared.lock().unwrap().on_subscription_succeeded =
            Some(Arc::new(callback) as SubscriptionSucceededCallback);
    }

    pub fn on_subscription_error<F>(&self, callback: F)
    where
        F: Fn(&SubscriptionErrorInfo) + Send + Sync + 'static,
    {
        self.handle.shared.lock().unwrap().on_subscription_error =
            Some(Arc::new(callback) as SubscriptionErrorCallback);
    }

    /// Fired once the reconnect attempt cap is hit and the connection gives
    /// up (spec.md §7 `ReconnectExhausted`); by the time this runs the state
    /// observable has already moved to `Disconnected`.
    pub fn on_reconnect_failed<F>(&self, callback: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.handle.shared.lock().unwrap().on_reconnect_failed =
            Some(Arc::new(callback) as ReconnectFailedCallback);
    }

    /// Binds a global handler, fired for every inbound event regardless of
    /// channel (spec.md §3 "GlobalChannel").
    pub fn bind<F>(&self, event: impl Into<String>, callback: F) -> BindingId
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        let mut shared = self.handle.shared.lock().unwrap();
        let id = shared.next_binding_id();
        shared.global.bind(id, event, Arc::new(callback) as EventCallback);
        id
    }

    /// Removes exactly the binding `id`, whether it was bound globally or on
    /// a channel (spec.md §4.3 "`unbind(id)` removes exactly that entry").
    pub fn unbind(&self, id: BindingId) {
        let mut shared = self.handle.shared.lock().unwrap();
        if shared.global.unbind(id) {
            return;
        }
        for (_, channel) in shared.registry.iter_mut() {
            if channel.unbind(id) {
                return;
            }
        }
    }

    pub fn unbind_all(&self) {
        self.handle.shared.lock().unwrap().global.unbind_all();
    }

    /// Subscribes to `name`, creating the channel if this is the first call
    /// (idempotent, spec.md §4.3). `on_member_added`/`on_member_removed` are
    /// only meaningful for presence channels.
    pub fn subscribe(&self, name: impl Into<ChannelName>) -> ChannelHandle {
        self.subscribe_with(name, None, None)
    }

    pub fn subscribe_with(
        &self,
        name: impl Into<ChannelName>,
        on_member_added: Option<MemberCallback>,
        on_member_removed: Option<MemberCallback>,
    ) -> ChannelHandle {
        let name = name.into();
        let _ = self.handle.subscribe(name.clone(), on_member_added, on_member_removed);
        ChannelHandle { name, shared: self.handle.shared.clone(), handle: self.handle.clone() }
    }

    pub fn unsubscribe(&self, name: impl Into<ChannelName>) -> Result<(), Error> {
        self.handle.unsubscribe(name.into())
    }

    pub async fn trigger(
        &self,
        channel: impl Into<ChannelName>,
        event: impl Into<String>,
        data: Value,
    ) -> Result<(), Error> {
        self.handle.trigger(channel.into(), event.into(), data).await
    }
}

/// A handle to a single channel, returned by [`Client::subscribe`]. Cheap to
/// clone; every clone shares the same underlying channel state.
#[derive(Clone)]
pub struct ChannelHandle {
    name: ChannelName,
    shared: Shared,
    handle: ConnectionHandle,
}

impl ChannelHandle {
    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared
            .lock()
            .unwrap()
            .registry
            .get(&self.name)
            .map(|c| c.is_subscribed())
            .unwrap_or(false)
    }

    pub fn bind<F>(&self, event: impl Into<String>, callback: F) -> BindingId
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        let mut shared = self.shared.lock().unwrap();
        let id = shared.next_binding_id();
        let channel = shared.registry.find_or_create(self.name.clone());
        channel.bind(id, event, Arc::new(callback) as EventCallback);
        id
    }

    pub fn unbind(&self, id: BindingId) {
        let mut shared = self.shared.lock().unwrap();
        if let Some(channel) = shared.registry.get_mut(&self.name) {
            channel.unbind(id);
        }
    }

    pub fn unbind_all(&self) {
        let mut shared = self.shared.lock().unwrap();
        if let Some(channel) = shared.registry.get_mut(&self.name) {
            channel.unbind_all();
        }
    }

    /// Members of a presence channel's roster; empty for public/private
    /// channels (spec.md §4.4).
    pub fn members(&self) -> Vec<Member> {
        self.shared
            .lock()
            .unwrap()
            .registry
            .get(&self.name)
            .and_then(|c| c.presence())
            .map(|p| p.members().cloned().collect())
            .unwrap_or_default()
    }

    pub fn me(&self) -> Option<Member> {
        self.shared
            .lock()
            .unwrap()
            .registry
            .get(&self.name)
            .and_then(|c| c.presence())
            .and_then(|p| p.me().cloned())
    }

    /// Emits a `client-*` event; only valid on a subscribed private or
    /// presence channel (spec.md §3 invariant).
    pub async fn trigger(&self, event: impl Into<String>, data: Value) -> Result<(), Error> {
        self.handle.trigger(self.name.clone(), event.into(), data).await
    }

    pub fn unsubscribe(self) -> Result<(), Error> {
        self.handle.unsubscribe(self.name)
    }
}
