//! WebSocket fan-out state: one owner, one mutex covering every map — the
//! invariants linking `localSubscriptions`/`socketTopics`/
//! `connectedSockets`/`brokerSubscriptions` require atomic updates across
//! all of them, so the locks are never split.
//!
//! Every method here is synchronous and holds the lock only across plain
//! `HashMap`/`HashSet` mutation, never across an `.await` — broker I/O
//! (which does need to await) lives in [`super::provider::FanoutProvider`]
//! and is driven by the outcome enums these methods return.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// What the caller must do after a local subscribe, decided while holding
/// the lock so the decision and the bookkeeping update are atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSubscribeOutcome {
    /// No broker action required (already subscribed, or another local
    /// subscriber already holds the channel).
    NoBrokerActionNeeded,
    /// This was the first local subscriber for the topic and the channel
    /// is not already subscribed or pending — caller must SUBSCRIBE.
    NeedsBrokerSubscribe,
}

/// What the caller must do after a local unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalUnsubscribeOutcome {
    /// No broker action required (other local subscribers remain).
    NoBrokerActionNeeded,
    /// The topic's last local subscriber just left — caller must
    /// UNSUBSCRIBE the channel.
    NeedsBrokerUnsubscribe,
}

#[derive(Default)]
struct Inner {
    local_subscriptions: HashMap<String, HashSet<String>>,
    socket_topics: HashMap<String, HashSet<String>>,
    connected_sockets: HashSet<String>,
    broker_subscriptions: HashSet<String>,
    pending_subscribes: HashSet<String>,
    pending_unsubscribes: HashSet<String>,
}

/// Single-owner fan-out bookkeeping.
#[derive(Default)]
pub struct FanoutState(Mutex<Inner>);

impl FanoutState {
    /// Build empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local (socket, topic) subscription; idempotent. Returns
    /// whether the caller must now arrange a broker SUBSCRIBE for
    /// `channel`.
    pub fn subscribe_local(&self, socket_id: &str, topic: &str, channel: &str) -> LocalSubscribeOutcome {
        let mut inner = self.0.lock().unwrap();

        let topic_set = inner.local_subscriptions.entry(topic.to_string()).or_default();
        let newly_added = topic_set.insert(socket_id.to_string());
        let topic_subscriber_count = topic_set.len();

        inner.socket_topics.entry(socket_id.to_string()).or_default().insert(topic.to_string());
        inner.connected_sockets.insert(socket_id.to_string());

        if !newly_added || topic_subscriber_count != 1 {
            return LocalSubscribeOutcome::NoBrokerActionNeeded;
        }

        if inner.pending_unsubscribes.remove(channel) {
            inner.broker_subscriptions.insert(channel.to_string());
            return LocalSubscribeOutcome::NoBrokerActionNeeded;
        }

        if inner.broker_subscriptions.contains(channel) || inner.pending_subscribes.contains(channel) {
            return LocalSubscribeOutcome::NoBrokerActionNeeded;
        }

        inner.pending_subscribes.insert(channel.to_string());
        LocalSubscribeOutcome::NeedsBrokerSubscribe
    }

    /// Remove a local (socket, topic) subscription; idempotent. Returns
    /// whether the caller must now arrange a broker UNSUBSCRIBE for
    /// `channel`.
    pub fn unsubscribe_local(&self, socket_id: &str, topic: &str, channel: &str) -> LocalUnsubscribeOutcome {
        let mut inner = self.0.lock().unwrap();

        if let Some(topic_set) = inner.local_subscriptions.get_mut(topic) {
            topic_set.remove(socket_id);
            if topic_set.is_empty() {
                inner.local_subscriptions.remove(topic);
            }
        }
        if let Some(socket_set) = inner.socket_topics.get_mut(socket_id) {
            socket_set.remove(topic);
            if socket_set.is_empty() {
                inner.socket_topics.remove(socket_id);
                inner.connected_sockets.remove(socket_id);
            }
        }

        let topic_is_now_empty = !inner.local_subscriptions.contains_key(topic);
        if topic_is_now_empty && inner.broker_subscriptions.remove(channel) {
            inner.pending_unsubscribes.insert(channel.to_string());
            return LocalUnsubscribeOutcome::NeedsBrokerUnsubscribe;
        }
        LocalUnsubscribeOutcome::NoBrokerActionNeeded
    }

    /// Topics `socket_id` is currently subscribed to (for `disconnect`).
    pub fn topics_for(&self, socket_id: &str) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .socket_topics
            .get(socket_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all bookkeeping for a socket once its topic set is empty.
    pub fn finish_disconnect(&self, socket_id: &str) {
        let mut inner = self.0.lock().unwrap();
        inner.connected_sockets.remove(socket_id);
        inner.socket_topics.remove(socket_id);
    }

    /// Mark a pending SUBSCRIBE as confirmed.
    pub fn confirm_broker_subscribed(&self, channel: &str) {
        let mut inner = self.0.lock().unwrap();
        inner.pending_subscribes.remove(channel);
        inner.broker_subscriptions.insert(channel.to_string());
    }

    /// Drop a pending SUBSCRIBE marker after exhausting retries.
    pub fn clear_pending_subscribe(&self, channel: &str) {
        self.0.lock().unwrap().pending_subscribes.remove(channel);
    }

    /// Mark a pending UNSUBSCRIBE as settled (success or failure; either
    /// way the channel should not remain marked pending forever).
    pub fn confirm_broker_unsubscribed(&self, channel: &str) {
        self.0.lock().unwrap().pending_unsubscribes.remove(channel);
    }

    /// Snapshot of every currently-subscribed channel, for reconnection
    /// resubscription.
    pub fn broker_subscriptions_snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().broker_subscriptions.iter().cloned().collect()
    }

    /// `true` if `socket_id` has any local subscription.
    pub fn is_connected(&self, socket_id: &str) -> bool {
        self.0.lock().unwrap().connected_sockets.contains(socket_id)
    }
}
