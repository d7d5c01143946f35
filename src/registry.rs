//! Mapping from channel name to channel object (spec.md §4.3 "Channel Registry"),
//! plus the singleton [`GlobalChannel`] sink.

use std::collections::HashMap;

use crate::{
    channel::{Channel, EventCallback},
    event::{BindingId, ChannelName, Payload},
};

/// Exactly one [`Channel`] per name at any time within a client
/// (spec.md §3 invariant). Creation is idempotent: `find_or_create` returns
/// the same object and reuses its bindings on repeated subscribe.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelName, Channel>,
}

impl ChannelRegistry {
    pub fn find_or_create(&mut self, name: ChannelName) -> &mut Channel {
        self.channels.entry(name.clone()).or_insert_with(|| Channel::new(name))
    }

    pub fn get(&self, name: &ChannelName) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn get_mut(&mut self, name: &ChannelName) -> Option<&mut Channel> {
        self.channels.get_mut(name)
    }

    pub fn remove(&mut self, name: &ChannelName) -> Option<Channel> {
        self.channels.remove(name)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ChannelName, &mut Channel)> {
        self.channels.iter_mut()
    }

    /// Every channel's `subscribed` flag becomes false (spec.md §3 invariant,
    /// `disconnect()` per spec.md §5 "Cancellation").
    pub fn mark_all_unsubscribed(&mut self) {
        for channel in self.channels.values_mut() {
            channel.mark_unsubscribed();
        }
    }
}

/// A singleton channel-like object whose bindings fire for every inbound
/// event regardless of channel (spec.md §3).
#[derive(Default)]
pub struct GlobalChannel {
    bindings: HashMap<String, Vec<(BindingId, EventCallback)>>,
}

impl GlobalChannel {
    pub fn bind(&mut self, id: BindingId, event: impl Into<String>, callback: EventCallback) {
        self.bindings.entry(event.into()).or_default().push((id, callback));
    }

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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_size_tracks_subscribe_and_unsubscribe() {
        let mut registry = ChannelRegistry::default();
        registry.find_or_create(ChannelName::new("a"));
        registry.find_or_create(ChannelName::new("b"));
        assert_eq!(registry.len(), 2);

        registry.remove(&ChannelName::new("a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let mut registry = ChannelRegistry::default();
        registry.find_or_create(ChannelName::new("news")).mark_subscribed();
        assert!(registry.find_or_create(ChannelName::new("news")).is_subscribed());
    }
}
