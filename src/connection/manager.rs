use std::sync::Arc;

use futures_channel::{mpsc, oneshot};
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;

use crate::{
    auth,
    channel::MemberCallback,
    connection::{
        backend::{BackendDriver, CloseReason, ConnectionBackend},
        types::{backoff_seconds, ConnectionState},
        Shared, SharedState,
    },
    error::Error,
    event::{
        wire_events, ChannelName, ConnectionEstablishedData, MemberAddedData,
        MemberRemovedData, Member, Payload, SubscriptionSucceededData, WireFrame,
    },
    options::Options,
    reachability::{ReachabilityEvent, ReachabilityMonitor},
};

/// What a subscription-error callback is handed: spec.md §6
/// `(channelName, response?, body?, error?)`.
#[derive(Debug, Clone)]
pub struct SubscriptionErrorInfo {
    pub channel: ChannelName,
    pub status: Option<u16>,
    pub body: Option<String>,
    pub message: String,
}

pub(crate) enum Instruction {
    Connect,
    Disconnect,
    Subscribe {
        name: ChannelName,
        on_member_added: Option<MemberCallback>,
        on_member_removed: Option<MemberCallback>,
    },
    Unsubscribe(ChannelName),
    Trigger {
        channel: ChannelName,
        event: String,
        data: Value,
        respond: oneshot::Sender<Result<(), Error>>,
    },
}

/// Front handle the [`crate::Client`] holds: an instruction sender plus the
/// shared state the manager task also touches.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub(crate) instructions: mpsc::UnboundedSender<Instruction>,
    pub(crate) shared: Shared,
}

impl ConnectionHandle {
    fn send(&self, instruction: Instruction) -> Result<(), Error> {
        self.instructions.unbounded_send(instruction).map_err(|_| Error::ManagerGone)
    }

    pub fn connect(&self) -> Result<(), Error> {
        self.send(Instruction::Connect)
    }

    pub fn disconnect(&self) -> Result<(), Error> {
        self.send(Instruction::Disconnect)
    }

    pub fn subscribe(
        &self,
        name: ChannelName,
        on_member_added: Option<MemberCallback>,
        on_member_removed: Option<MemberCallback>,
    ) -> Result<(), Error> {
        self.send(Instruction::Subscribe { name, on_member_added, on_member_removed })
    }

    pub fn unsubscribe(&self, name: ChannelName) -> Result<(), Error> {
        self.send(Instruction::Unsubscribe(name))
    }

    pub async fn trigger(&self, channel: ChannelName, event: String, data: Value) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.send(Instruction::Trigger { channel, event, data, respond: tx })?;
        rx.await.map_err(|_| Error::ManagerGone)?
    }
}

/// Drives connect/disconnect/reconnect and event dispatch for one logical
/// connection (spec.md §4.1). Spawned once by [`crate::Client::new`].
pub(crate) struct ConnectionManager {
    shared: Shared,
    options: Options,
    http: reqwest::Client,
    reachability: Arc<dyn ReachabilityMonitor>,
    instructions: mpsc::UnboundedReceiver<Instruction>,
    backend: Option<BackendDriver>,
    attempt: usize,
    /// `channel_data` captured from auth, applied to the presence roster once
    /// `subscription_succeeded` names the `myId` (spec.md §4.4).
    pending_my_id: HashMap<ChannelName, String>,
    reachability_rx: Option<mpsc::UnboundedReceiver<ReachabilityEvent>>,
}

/// What happened on the currently-running backend, polled as a single
/// future so the manager never needs two live `&mut` borrows of
/// `self.backend` in the same `select!` (one for the frame stream, one for
/// the error oneshot).
enum BackendEvent {
    Frame(WireFrame),
    Closed(CloseReason),
}

async fn next_backend_event(backend: &mut Option<BackendDriver>) -> Option<BackendEvent> {
    match backend {
        Some(b) => {
            tokio::select! {
                frame = b.inbound.next() => frame.map(BackendEvent::Frame),
                reason = &mut b.error => Some(BackendEvent::Closed(reason.unwrap_or(CloseReason::Abnormal))),
            }
        }
        None => futures_util::future::pending().await,
    }
}

async fn next_reachable(rx: &mut Option<mpsc::UnboundedReceiver<ReachabilityEvent>>) -> Option<ReachabilityEvent> {
    match rx {
        Some(r) => r.next().await,
        None => futures_util::future::pending().await,
    }
}

impl ConnectionManager {
    pub fn spawn(
        options: Options,
        reachability: Arc<dyn ReachabilityMonitor>,
    ) -> ConnectionHandle {
        let shared: Shared = Arc::new(std::sync::Mutex::new(SharedState::new()));
        let (tx, rx) = mpsc::unbounded();
        let manager = ConnectionManager {
            shared: shared.clone(),
            options,
            http: reqwest::Client::new(),
            reachability,
            instructions: rx,
            backend: None,
            attempt: 0,
            pending_my_id: HashMap::new(),
            reachability_rx: None,
        };
        tokio::spawn(manager.run());
        ConnectionHandle { instructions: tx, shared }
    }

    fn set_state(&self, state: ConnectionState) {
        self.shared.lock().unwrap().set_state(state);
    }

    fn state(&self) -> ConnectionState {
        self.shared.lock().unwrap().state
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                instruction = self.instructions.next() => {
                    match instruction {
                        Some(instruction) => self.handle_instruction(instruction).await,
                        None => {
                            tracing::debug!("client handle dropped, shutting down connection manager");
                            break;
                        }
                    }
                }
                event = next_backend_event(&mut self.backend) => {
                    match event {
                        Some(BackendEvent::Frame(frame)) => self.handle_frame(frame).await,
                        Some(BackendEvent::Closed(reason)) => {
                            self.backend = None;
                            self.on_unexpected_close(reason).await;
                        }
                        None => if self.backend.is_some() {
                            self.backend = None;
                            self.on_unexpected_close(CloseReason::Abnormal).await;
                        }
                    }
                }
                reach = next_reachable(&mut self.reachability_rx) => {
                    if let Some(ReachabilityEvent::Reachable) = reach {
                        if self.state() == ConnectionState::ReconnectingWhenNetworkBecomesReachable {
                            self.reachability_rx = None;
                            self.begin_reconnect_attempt().await;
                        }
                    }
                }
            }
        }

        if let Some(backend) = self.backend.take() {
            backend.shutdown();
        }
    }

    async fn handle_instruction(&mut self, instruction: Instruction) {
        match instruction {
            Instruction::Connect => self.do_connect().await,
            Instruction::Disconnect => self.do_disconnect().await,
            Instruction::Subscribe { name, on_member_added, on_member_removed } => {
                self.do_subscribe(name, on_member_added, on_member_removed).await
            }
            Instruction::Unsubscribe(name) => self.do_unsubscribe(name).await,
            Instruction::Trigger { channel, event, data, respond } => {
                let result = self.do_trigger(channel, event, data).await;
                let _ = respond.send(result);
            }
        }
    }

    async fn do_connect(&mut self) {
        if self.backend.is_some() {
            return;
        }
        self.set_state(ConnectionState::Connecting);
        match self.connect_backend().await {
            Ok(driver) => self.backend = Some(driver),
            Err(err) => {
                tracing::error!(err = %err, "initial connect failed");
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    async fn connect_backend(&self) -> Result<BackendDriver, Error> {
        let url = self.options.socket_url()?;
        ConnectionBackend::connect(&url).await.map(|(backend, driver)| {
            backend.spawn();
            driver
        }).map_err(Error::from)
    }

    async fn do_disconnect(&mut self) {
        self.set_state(ConnectionState::Disconnecting);
        self.reachability_rx = None;
        if let Some(backend) = self.backend.take() {
            backend.shutdown();
        }
        {
            let mut shared = self.shared.lock().unwrap();
            shared.registry.mark_all_unsubscribed();
            shared.socket_id = None;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn do_subscribe(
        &mut self,
        name: ChannelName,
        on_member_added: Option<MemberCallback>,
        on_member_removed: Option<MemberCallback>,
    ) {
        {
            let mut shared = self.shared.lock().unwrap();
            let channel = shared.registry.find_or_create(name.clone());
            if let Some(presence) = channel.presence_mut() {
                if let Some(cb) = on_member_added {
                    presence.set_on_member_added(cb);
                }
                if let Some(cb) = on_member_removed {
                    presence.set_on_member_removed(cb);
                }
            }
        }

        if self.state() == ConnectionState::Connected {
            self.begin_subscribe(name).await;
        }
    }

    async fn do_unsubscribe(&mut self, name: ChannelName) {
        if let Some(backend) = &self.backend {
            let frame = serde_json::json!({
                "event": wire_events::UNSUBSCRIBE,
                "data": { "channel": name.as_str() },
            });
            let _ = backend.outbound.unbounded_send(frame.to_string());
        }
        self.shared.lock().unwrap().registry.remove(&name);
        self.pending_my_id.remove(&name);
    }

    async fn do_trigger(&mut self, channel: ChannelName, event: String, data: Value) -> Result<(), Error> {
        if !event.starts_with(wire_events::CLIENT_EVENT_PREFIX) {
            return Err(Error::InvalidClientEvent {
                channel,
                event,
                reason: "client events must be prefixed with `client-`",
            });
        }

        // Derived from the name itself, not the registry: a private/presence
        // channel not yet subscribed (or not yet even `subscribe()`d through
        // this handle) still requires auth and must still be queued below,
        // rather than being mistaken for public.
        let kind = channel.kind();
        if !kind.requires_auth() {
            return Err(Error::InvalidClientEvent {
                channel,
                event,
                reason: "client events are only valid on private or presence channels",
            });
        }

        let subscribed = {
            let mut shared = self.shared.lock().unwrap();
            match shared.registry.get_mut(&channel) {
                Some(existing) if existing.is_subscribed() => true,
                Some(existing) => {
                    // Buffered for replay once `subscription_succeeded`
                    // arrives (spec.md §3/§4.3 "unsentClientEvents").
                    existing.queue_client_event(event.clone(), data.clone());
                    false
                }
                None => {
                    return Err(Error::InvalidClientEvent {
                        channel,
                        event,
                        reason: "channel is not yet subscribed",
                    });
                }
            }
        };

        if !subscribed {
            return Ok(());
        }

        let backend = self.backend.as_ref().ok_or(Error::ManagerGone)?;
        let frame = serde_json::json!({
            "event": event,
            "channel": channel.as_str(),
            "data": data,
        });
        backend
            .outbound
            .unbounded_send(frame.to_string())
            .map_err(|_| Error::TransportClosed)
    }

    async fn handle_frame(&mut self, frame: WireFrame) {
        match frame.event.as_str() {
            wire_events::CONNECTION_ESTABLISHED => self.handle_connection_established(frame).await,
            wire_events::SUBSCRIPTION_SUCCEEDED => self.handle_subscription_succeeded(frame).await,
            wire_events::MEMBER_ADDED => self.handle_member_added(frame),
            wire_events::MEMBER_REMOVED => self.handle_member_removed(frame),
            _ => self.dispatch_generic(&frame),
        }
    }

    async fn handle_connection_established(&mut self, frame: WireFrame) {
        let data: ConnectionEstablishedData = match frame.data_as() {
            Ok(data) => data,
            Err(err) => {
                // spec.md §9 open question: the attempt counter is *not*
                // reset when `socket_id` fails to parse; preserved as-is.
                tracing::warn!(err = %err, "connection_established frame missing a usable socket_id");
                return;
            }
        };

        self.attempt = 0;
        {
            let mut shared = self.shared.lock().unwrap();
            shared.socket_id = Some(data.socket_id);
            shared.set_state(ConnectionState::Connected);
        }
        self.resubscribe_all().await;
    }

    async fn resubscribe_all(&mut self) {
        let pending: Vec<ChannelName> = {
            let mut shared = self.shared.lock().unwrap();
            shared
                .registry
                .iter_mut()
                .filter(|(_, c)| !c.is_subscribed())
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in pending {
            self.begin_subscribe(name).await;
        }
    }

    async fn begin_subscribe(&mut self, name: ChannelName) {
        let kind = name.kind();

        if !kind.requires_auth() {
            self.send_subscribe(&name, None, None);
            return;
        }

        let socket_id = match self.shared.lock().unwrap().socket_id.clone() {
            Some(id) => id,
            None => return,
        };

        match auth::authenticate(&self.options, &self.http, &socket_id, &name).await {
            Ok(result) => {
                if kind.is_presence() {
                    if let Some(data) = &result.channel_data {
                        if let Ok(parsed) = serde_json::from_str::<crate::event::ChannelData>(data) {
                            self.pending_my_id.insert(name.clone(), parsed.user_id);
                        }
                    }
                }
                self.send_subscribe(&name, Some(result.auth), result.channel_data);
            }
            Err(err) => self.fail_subscription(&name, &err),
        }
    }

    fn send_subscribe(&self, name: &ChannelName, auth: Option<String>, channel_data: Option<String>) {
        let Some(backend) = &self.backend else { return };
        let mut data = serde_json::Map::new();
        data.insert("channel".to_string(), Value::String(name.to_string()));
        if let Some(auth) = auth {
            data.insert("auth".to_string(), Value::String(auth));
        }
        if let Some(channel_data) = channel_data {
            data.insert("channel_data".to_string(), Value::String(channel_data));
        }
        let frame = serde_json::json!({ "event": wire_events::SUBSCRIBE, "data": Value::Object(data) });
        let _ = backend.outbound.unbounded_send(frame.to_string());
    }

    fn fail_subscription(&self, name: &ChannelName, err: &Error) {
        let info = SubscriptionErrorInfo {
            channel: name.clone(),
            status: None,
            body: None,
            message: err.to_string(),
        };
        tracing::warn!(channel = %name, err = %err, "subscription auth failed");

        let handler = self.shared.lock().unwrap().on_subscription_error.clone();
        if let Some(handler) = handler {
            handler(&info);
        }

        // Synthesized inbound event, per spec.md §4.2: a single delivery path
        // for user code regardless of which strategy failed.
        let shared = self.shared.lock().unwrap();
        let payload = Payload::Json(serde_json::json!({
            "status": info.status,
            "body": info.body,
            "message": info.message,
        }));
        shared.global.dispatch(wire_events::SUBSCRIPTION_ERROR, payload.clone());
        if let Some(channel) = shared.registry.get(name) {
            channel.dispatch(wire_events::SUBSCRIPTION_ERROR, payload);
        }
    }

    async fn handle_subscription_succeeded(&mut self, frame: WireFrame) {
        let Some(channel_name) = frame.channel.clone().map(ChannelName::new) else { return };

        let data: SubscriptionSucceededData = frame.data_as().unwrap_or(SubscriptionSucceededData { presence: None });
        let payload = Payload::from_frame(&frame, self.options.attempt_to_return_json_object)
            .unwrap_or(Payload::Raw("null".to_string()));

        let drained = {
            let mut shared = self.shared.lock().unwrap();
            let shared = &mut *shared;
            let Some(channel) = shared.registry.get_mut(&channel_name) else { return };
            channel.mark_subscribed();

            if let Some(presence_data) = data.presence {
                if let Some(presence) = channel.presence_mut() {
                    presence.reset_from_hash(presence_data.hash);
                }
            }
            if let Some(my_id) = self.pending_my_id.remove(&channel_name) {
                if let Some(presence) = channel.presence_mut() {
                    presence.set_my_id(my_id);
                }
            }

            channel.dispatch(wire_events::SUBSCRIPTION_SUCCEEDED, payload.clone());
            shared.global.dispatch(wire_events::SUBSCRIPTION_SUCCEEDED, payload);

            channel.drain_client_events()
        };

        if let Some(backend) = &self.backend {
            for (event, data) in drained {
                let frame = serde_json::json!({
                    "event": event,
                    "channel": channel_name.as_str(),
                    "data": data,
                });
                let _ = backend.outbound.unbounded_send(frame.to_string());
            }
        }

        let handler = self.shared.lock().unwrap().on_subscription_succeeded.clone();
        if let Some(handler) = handler {
            handler(&channel_name);
        }
    }

    fn handle_member_added(&mut self, frame: WireFrame) {
        let Some(channel_name) = frame.channel.clone().map(ChannelName::new) else { return };
        let Ok(data) = frame.data_as::<MemberAddedData>() else {
            tracing::warn!(channel = %channel_name, "dropping unparseable member_added frame");
            return;
        };
        let mut shared = self.shared.lock().unwrap();
        if let Some(channel) = shared.registry.get_mut(&channel_name) {
            if let Some(presence) = channel.presence_mut() {
                presence.add_member(Member { user_id: data.user_id, user_info: data.user_info });
            }
        }
    }

    fn handle_member_removed(&mut self, frame: WireFrame) {
        let Some(channel_name) = frame.channel.clone().map(ChannelName::new) else { return };
        let Ok(data) = frame.data_as::<MemberRemovedData>() else {
            tracing::warn!(channel = %channel_name, "dropping unparseable member_removed frame");
            return;
        };
        let mut shared = self.shared.lock().unwrap();
        if let Some(channel) = shared.registry.get_mut(&channel_name) {
            if let Some(presence) = channel.presence_mut() {
                presence.remove_member(&data.user_id);
            }
        }
    }

    fn dispatch_generic(&self, frame: &WireFrame) {
        let payload = match Payload::from_frame(frame, self.options.attempt_to_return_json_object) {
            Some(p) => p,
            None => return,
        };
        let shared = self.shared.lock().unwrap();
        shared.global.dispatch(&frame.event, payload.clone());
        if let Some(name) = &frame.channel {
            if let Some(channel) = shared.registry.get(&ChannelName::new(name.clone())) {
                channel.dispatch(&frame.event, payload);
            }
        }
    }

    async fn on_unexpected_close(&mut self, reason: CloseReason) {
        self.shared.lock().unwrap().registry.mark_all_unsubscribed();
        self.shared.lock().unwrap().socket_id = None;

        if reason == CloseReason::Normal {
            // A normal-closure close code pins the connection to
            // `Disconnected` regardless of autoReconnect or the attempt cap.
            tracing::debug!("socket closed with the normal closure code; not reconnecting");
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        if self.state() == ConnectionState::Disconnecting {
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        if !self.options.auto_reconnect {
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        if let Some(max) = self.options.max_reconnect_attempts {
            if self.attempt >= max {
                let err = Error::ReconnectExhausted(self.attempt);
                tracing::error!(attempts = self.attempt, "reconnect attempts exhausted");
                let handler = self.shared.lock().unwrap().on_reconnect_failed.clone();
                if let Some(handler) = handler {
                    handler(&err);
                }
                self.set_state(ConnectionState::Disconnected);
                return;
            }
        }

        if self.reachability.is_reachable() {
            self.set_state(ConnectionState::Reconnecting);
            self.begin_reconnect_attempt().await;
        } else {
            self.set_state(ConnectionState::ReconnectingWhenNetworkBecomesReachable);
            self.reachability_rx = Some(self.reachability.subscribe());
        }
    }

    async fn begin_reconnect_attempt(&mut self) {
        self.set_state(ConnectionState::Reconnecting);
        let wait = backoff_seconds(self.attempt, self.options.reconnect_gap_cap());
        self.attempt += 1;
        if wait > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
        }

        self.set_state(ConnectionState::Connecting);
        match self.connect_backend().await {
            Ok(driver) => self.backend = Some(driver),
            Err(err) => {
                tracing::error!(err = %err, attempt = self.attempt, "reconnect attempt failed");
                self.on_unexpected_close_after_failed_attempt().await;
            }
        }
    }

    async fn on_unexpected_close_after_failed_attempt(&mut self) {
        // A failed reconnect attempt is itself treated as another
        // unexpected close, so the same backoff/reachability logic applies.
        // It's always abnormal: no close frame was ever received.
        Box::pin(self.on_unexpected_close(CloseReason::Abnormal)).await;
    }
}
