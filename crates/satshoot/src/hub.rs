//! Fan-out of wire subscriptions to stores.
//!
//! Groupable requests with the same canonical filter list share one wire
//! subscription, but only until that subscription has delivered its first
//! message: a late joiner would otherwise miss the backfill. Non-groupable
//! requests always get their own wire subscription.

use crate::error::Result;
use crate::transport::{Transport, WireMessage};
use nostr::{Filter, canonical_key};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct WireGroup {
    /// Canonical filter key, set while the group accepts joiners
    key: Option<String>,
    members: HashMap<u64, mpsc::UnboundedSender<WireMessage>>,
    delivered: bool,
}

#[derive(Default)]
struct HubState {
    groups: HashMap<String, WireGroup>,
    /// canonical filter key -> wire id still open to joiners
    joinable: HashMap<String, String>,
    next_member: u64,
}

impl HubState {
    fn remove_group(&mut self, wire_id: &str) -> bool {
        let Some(group) = self.groups.remove(wire_id) else {
            return false;
        };
        if let Some(key) = group.key
            && self.joinable.get(&key).map(String::as_str) == Some(wire_id)
        {
            self.joinable.remove(&key);
        }
        true
    }
}

/// Shared entry point for every store's relay traffic.
#[derive(Clone)]
pub struct SubscriptionHub {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<HubState>>,
}

impl SubscriptionHub {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(HubState::default())),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Number of wire subscriptions currently held open.
    pub fn wire_count(&self) -> usize {
        self.state.lock().groups.len()
    }

    pub fn member_count(&self, wire_id: &str) -> usize {
        self.state
            .lock()
            .groups
            .get(wire_id)
            .map_or(0, |group| group.members.len())
    }

    pub async fn subscribe(&self, filters: Vec<Filter>, groupable: bool) -> Result<HubSubscription> {
        let key = groupable.then(|| canonical_key(&filters));

        if let Some(key) = &key
            && let Some(joined) = self.try_join(key)
        {
            return Ok(joined);
        }

        let wire = self.transport.open_subscription(filters).await?;
        let (sink, messages) = mpsc::unbounded_channel();

        let member = {
            let mut state = self.state.lock();
            state.next_member += 1;
            let member = state.next_member;

            let mut group = WireGroup {
                key: None,
                members: HashMap::from([(member, sink)]),
                delivered: false,
            };
            if let Some(key) = key
                && !state.joinable.contains_key(&key)
            {
                state.joinable.insert(key.clone(), wire.id.clone());
                group.key = Some(key);
            }
            state.groups.insert(wire.id.clone(), group);
            member
        };

        debug!("Opened wire subscription {} (groupable: {})", wire.id, groupable);
        self.spawn_pump(wire.id.clone(), wire.messages);
        Ok(HubSubscription::new(self.clone(), wire.id, member, messages))
    }

    fn try_join(&self, key: &str) -> Option<HubSubscription> {
        let mut state = self.state.lock();
        let wire_id = state.joinable.get(key)?.clone();
        state.next_member += 1;
        let member = state.next_member;

        let group = state.groups.get_mut(&wire_id)?;
        if group.delivered {
            return None;
        }
        let (sink, messages) = mpsc::unbounded_channel();
        group.members.insert(member, sink);
        debug!("Joined wire subscription {} ({} members)", wire_id, group.members.len());

        Some(HubSubscription::new(self.clone(), wire_id, member, messages))
    }

    fn spawn_pump(&self, wire_id: String, mut messages: mpsc::UnboundedReceiver<WireMessage>) {
        let state = Arc::clone(&self.state);
        let transport = Arc::clone(&self.transport);

        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                let abandoned = {
                    let mut guard = state.lock();
                    let state = &mut *guard;
                    let Some(group) = state.groups.get_mut(&wire_id) else {
                        return;
                    };

                    if !group.delivered {
                        group.delivered = true;
                        if let Some(key) = group.key.take()
                            && state.joinable.get(&key) == Some(&wire_id)
                        {
                            state.joinable.remove(&key);
                        }
                    }

                    group
                        .members
                        .retain(|_, sink| sink.send(message.clone()).is_ok());
                    group.members.is_empty() && state.remove_group(&wire_id)
                };

                if abandoned {
                    debug!("All members of {} are gone, closing", wire_id);
                    transport.close_subscription(&wire_id).await;
                    return;
                }
            }

            // The transport ended the stream; dropping the sinks ends every member.
            state.lock().remove_group(&wire_id);
            debug!("Wire subscription {} ended", wire_id);
        });
    }

    /// Remove a member; returns the wire id when it was the last one.
    fn leave(&self, wire_id: &str, member: u64) -> Option<String> {
        let mut state = self.state.lock();
        let group = state.groups.get_mut(wire_id)?;
        group.members.remove(&member);
        if group.members.is_empty() && state.remove_group(wire_id) {
            Some(wire_id.to_string())
        } else {
            None
        }
    }

    fn leave_detached(&self, wire_id: &str, member: u64) {
        let Some(wire_id) = self.leave(wire_id, member) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let transport = Arc::clone(&self.transport);
                handle.spawn(async move { transport.close_subscription(&wire_id).await });
            }
            Err(_) => warn!("No runtime to close wire subscription {}", wire_id),
        }
    }
}

/// One member's view of a (possibly shared) wire subscription.
///
/// Dropping it leaves the group; the last member out closes the wire
/// subscription.
pub struct HubSubscription {
    pub messages: mpsc::UnboundedReceiver<WireMessage>,
    hub: SubscriptionHub,
    wire_id: String,
    member: u64,
    left: bool,
}

impl HubSubscription {
    fn new(
        hub: SubscriptionHub,
        wire_id: String,
        member: u64,
        messages: mpsc::UnboundedReceiver<WireMessage>,
    ) -> Self {
        Self {
            messages,
            hub,
            wire_id,
            member,
            left: false,
        }
    }

    pub fn wire_id(&self) -> &str {
        &self.wire_id
    }

    /// Leave now, waiting for the wire subscription to close if this was the
    /// last member.
    pub async fn close(mut self) {
        self.left = true;
        if let Some(wire_id) = self.hub.leave(&self.wire_id, self.member) {
            self.hub.transport.close_subscription(&wire_id).await;
        }
    }
}

impl Drop for HubSubscription {
    fn drop(&mut self) {
        if !self.left {
            self.hub.leave_detached(&self.wire_id, self.member);
        }
    }
}
