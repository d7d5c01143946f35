//! Channel lifecycle: event-handler bindings, subscribed flag, buffered
//! client events prior to subscription (spec.md §3/§4.3).

use std::{collections::HashMap, sync::Arc};

use serde_json::Value;

use crate::event::{BindingId, ChannelName, ChannelType, Member, Payload};

pub type EventCallback = Arc<dyn Fn(Payload) + Send + Sync>;
pub type MemberCallback = Arc<dyn Fn(&Member) + Send + Sync>;

/// Presence-only membership state, folded into [`Channel`] rather than
/// expressed as a subtype: spec.md §9 asks for the channel kind itself to be
/// a discriminated variant derived once from the name, so presence data just
/// lives behind `Option` and is only populated for `ChannelType::Presence`.
#[derive(Default)]
pub(crate) struct PresenceState {
    members: HashMap<String, Member>,
    my_id: Option<String>,
    on_member_added: Option<MemberCallback>,
    on_member_removed: Option<MemberCallback>,
}

impl PresenceState {
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn me(&self) -> Option<&Member> {
        self.my_id.as_ref().and_then(|id| self.members.get(id))
    }

    pub fn set_my_id(&mut self, id: impl Into<String>) {
        self.my_id = Some(id.into());
    }

    pub fn set_on_member_added(&mut self, callback: MemberCallback) {
        self.on_member_added = Some(callback);
    }

    pub fn set_on_member_removed(&mut self, callback: MemberCallback) {
        self.on_member_removed = Some(callback);
    }

    pub fn add_member(&mut self, member: Member) {
        if let Some(cb) = &self.on_member_added {
            cb(&member);
        }
        self.members.insert(member.user_id.clone(), member);
    }

    pub fn remove_member(&mut self, user_id: &str) {
        if let Some(member) = self.members.remove(user_id) {
            if let Some(cb) = &self.on_member_removed {
                cb(&member);
            }
        }
    }

    pub fn reset_from_hash(&mut self, hash: HashMap<String, Option<Value>>) {
        self.members.clear();
        for (user_id, user_info) in hash {
            self.members.insert(user_id.clone(), Member { user_id, user_info });
        }
    }
}

/// A named channel: public, private, or presence (type derived from the name
/// prefix, spec.md §3).
pub struct Channel {
    name: ChannelName,
    kind: ChannelType,
    subscribed: bool,
    bindings: HashMap<String, Vec<(BindingId, EventCallback)>>,
    /// Spec.md §9 "Open questions": drained pop-from-tail (LIFO) on purpose —
    /// preserved even though it looks incidental, per the explicit
    /// instruction not to silently "fix" it.
    unsent_client_events: Vec<(String, Value)>,
    presence: Option<PresenceState>,
}

impl Channel {
    pub fn new(name: ChannelName) -> Self {
        let kind = name.kind();
        let presence = if kind.is_presence() { Some(PresenceState::default()) } else { None };
        Self {
            name,
            kind,
            subscribed: false,
            bindings: HashMap::new(),
            unsent_client_events: Vec::new(),
            presence,
        }
    }

    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    pub fn kind(&self) -> ChannelType {
        self.kind
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Becomes true only after `subscription_succeeded` (spec.md §3 invariant).
    pub(crate) fn mark_subscribed(&mut self) {
        self.subscribed = true;
    }

    /// Becomes false on any disconnect (spec.md §3 invariant).
    pub(crate) fn mark_unsubscribed(&mut self) {
        self.subscribed = false;
    }

    pub fn bind(&mut self, id: BindingId, event: impl Into<String>, callback: EventCallback) {
        self.bindings.entry(event.into()).or_default().push((id, callback));
    }

    /// Returns true if a binding with `id` was found and removed.
    pub fn unbind(&mut self, id: BindingId) -> bool {
        let mut found = false;
        for handlers in self.bindings.values_mut() {
            let before = handlers.len();
            handlers.retain(|(bid, _)| *bid != id);
            found |= handlers.len() != before;
        }
        self.bindings.retain(|_, handlers| !handlers.is_empty());
        found
    }

    pub fn unbind_all(&mut self) {
        self.bindings.clear();
    }

    pub fn dispatch(&self, event: &str, payload: Payload) {
        if let Some(handlers) = self.bindings.get(event) {
            for (_, cb) in handlers {
                cb(payload.clone());
            }
        }
    }

    /// Queues a client event until the channel is subscribed (spec.md §4.3).
    pub fn queue_client_event(&mut self, event: impl Into<String>, data: Value) {
        self.unsent_client_events.push((event.into(), data));
    }

    /// Drains buffered client events in LIFO order (see struct doc).
    pub fn drain_client_events(&mut self) -> Vec<(String, Value)> {
        let mut drained = Vec::with_capacity(self.unsent_client_events.len());
        while let Some(item) = self.unsent_client_events.pop() {
            drained.push(item);
        }
        drained
    }

    pub(crate) fn presence_mut(&mut self) -> Option<&mut PresenceState> {
        self.presence.as_mut()
    }

    pub fn presence(&self) -> Option<&PresenceState> {
        self.presence.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_derived_from_name_prefix() {
        assert_eq!(Channel::new(ChannelName::new("news")).kind(), ChannelType::Public);
        assert_eq!(Channel::new(ChannelName::new("private-orders")).kind(), ChannelType::Private);
        assert_eq!(Channel::new(ChannelName::new("presence-office")).kind(), ChannelType::Presence);
    }

    #[test]
    fn client_events_drain_in_lifo_order() {
        let mut channel = Channel::new(ChannelName::new("private-x"));
        channel.queue_client_event("client-a", Value::from(1));
        channel.queue_client_event("client-b", Value::from(2));
        channel.queue_client_event("client-c", Value::from(3));

        let drained = channel.drain_client_events();
        let order: Vec<&str> = drained.iter().map(|(e, _)| e.as_str()).collect();
        assert_eq!(order, vec!["client-c", "client-b", "client-a"]);
    }

    #[test]
    fn unbind_removes_exactly_one_binding() {
        let mut channel = Channel::new(ChannelName::new("news"));
        let a = BindingId::new(1);
        let b = BindingId::new(2);
        channel.bind(a, "greeting", Arc::new(|_| {}));
        channel.bind(b, "greeting", Arc::new(|_| {}));

        assert!(channel.unbind(a));
        assert!(!channel.unbind(a));
        assert_eq!(channel.bindings.get("greeting").map(Vec::len), Some(1));
    }

    #[test]
    fn presence_roster_tracks_add_and_remove() {
        let mut channel = Channel::new(ChannelName::new("presence-foo"));
        let presence = channel.presence_mut().unwrap();
        presence.reset_from_hash(HashMap::from([
            ("u1".to_string(), None),
            ("u2".to_string(), None),
        ]));
        presence.add_member(Member { user_id: "u3".to_string(), user_info: None });
        presence.remove_member("u1");

        let mut ids: Vec<_> = presence.members().map(|m| m.user_id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["u2", "u3"]);
    }
}
