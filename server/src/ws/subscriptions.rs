//! Channel subscription index: which users want events for which channels.
//!
//! Subscriptions are scoped to a connection batch — they are cleared when a
//! user's last connection closes and must be re-established on reconnect.
//! Membership authorization happens at the call site (the WS dispatch layer
//! consults the membership table on every subscribe); this index only owns
//! the relation itself.

use std::collections::HashSet;

use dashmap::DashMap;

pub struct SubscriptionIndex {
    /// channel id → subscribed user ids
    channels: DashMap<String, HashSet<String>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Record a user's interest in a channel. Returns false when the
    /// subscription already existed.
    pub fn subscribe(&self, user_id: &str, channel_id: &str) -> bool {
        self.channels
            .entry(channel_id.to_string())
            .or_default()
            .insert(user_id.to_string())
    }

    /// Idempotent removal.
    pub fn unsubscribe(&self, user_id: &str, channel_id: &str) {
        let emptied = self
            .channels
            .get_mut(channel_id)
            .map(|mut users| {
                users.remove(user_id);
                users.is_empty()
            })
            .unwrap_or(false);
        if emptied {
            self.channels.remove_if(channel_id, |_, users| users.is_empty());
        }
    }

    /// Snapshot of a channel's subscribers, consistent under concurrent
    /// subscribe/unsubscribe.
    pub fn subscribers_of(&self, channel_id: &str) -> Vec<String> {
        self.channels
            .get(channel_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, user_id: &str, channel_id: &str) -> bool {
        self.channels
            .get(channel_id)
            .map(|users| users.contains(user_id))
            .unwrap_or(false)
    }

    /// Drop every subscription a user holds. Called when the user's last
    /// connection closes; a fresh reconnect must re-subscribe.
    pub fn clear_user(&self, user_id: &str) {
        self.channels.retain(|_, users| {
            users.remove(user_id);
            !users.is_empty()
        });
    }
}

impl Default for SubscriptionIndex {
    fn default() -> Self {
        Self::new()
    }
}
