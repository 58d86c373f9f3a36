//! Tracks which live channels belong to which user.
//!
//! A user may hold several channels at once (phone and laptop). Presence is
//! derived from the channel count: the first channel brings the user online,
//! the last one leaving takes them offline.

use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};

/// A message to be sent to a WebSocket connection.
#[derive(Debug, Clone)]
pub enum WsOutMessage {
    Text(String),
    Close,
}

pub struct ChannelHandle {
    pub conn_id: String,
    pub tx: mpsc::UnboundedSender<WsOutMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// The user's first channel arrived or last channel left.
    Changed,
    Unchanged,
}

pub struct SubscriberRegistry {
    channels: RwLock<HashMap<i64, Vec<ChannelHandle>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register a channel for a user. Returns `Changed` when this is the
    /// user's first live channel.
    pub async fn add_channel(
        &self,
        user_id: i64,
        conn_id: String,
        tx: mpsc::UnboundedSender<WsOutMessage>,
    ) -> PresenceChange {
        let mut channels = self.channels.write().await;
        let entry = channels.entry(user_id).or_default();
        let was_offline = entry.is_empty();
        entry.push(ChannelHandle { conn_id, tx });
        if was_offline {
            PresenceChange::Changed
        } else {
            PresenceChange::Unchanged
        }
    }

    /// Remove a channel. Returns `Changed` when it was the user's last one.
    pub async fn remove_channel(&self, user_id: i64, conn_id: &str) -> PresenceChange {
        let mut channels = self.channels.write().await;
        let Some(entry) = channels.get_mut(&user_id) else {
            return PresenceChange::Unchanged;
        };
        let before = entry.len();
        entry.retain(|c| c.conn_id != conn_id);
        let removed = entry.len() < before;
        if entry.is_empty() {
            channels.remove(&user_id);
            if removed && before > 0 {
                return PresenceChange::Changed;
            }
        }
        PresenceChange::Unchanged
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.channels
            .read()
            .await
            .get(&user_id)
            .is_some_and(|v| !v.is_empty())
    }

    pub async fn channel_count(&self, user_id: i64) -> usize {
        self.channels
            .read()
            .await
            .get(&user_id)
            .map_or(0, |v| v.len())
    }

    /// Send a text message to every channel of one user. A dead channel is
    /// skipped; its cleanup happens when the socket task exits.
    pub async fn send_to_user(&self, user_id: i64, msg: &str) -> usize {
        let channels = self.channels.read().await;
        let Some(entry) = channels.get(&user_id) else {
            return 0;
        };
        entry
            .iter()
            .filter(|c| c.tx.send(WsOutMessage::Text(msg.to_string())).is_ok())
            .count()
    }

    /// Send Close to every channel for graceful shutdown.
    pub async fn close_all(&self) {
        let channels = self.channels.read().await;
        for entry in channels.values() {
            for c in entry {
                let _ = c.tx.send(WsOutMessage::Close);
            }
        }
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn first_channel_changes_presence_second_does_not() {
        let registry = SubscriberRegistry::new();
        let (tx1, _rx1) = unbounded_channel();
        let (tx2, _rx2) = unbounded_channel();

        assert_eq!(
            registry.add_channel(1, "a".into(), tx1).await,
            PresenceChange::Changed
        );
        assert_eq!(
            registry.add_channel(1, "b".into(), tx2).await,
            PresenceChange::Unchanged
        );
        assert_eq!(registry.channel_count(1).await, 2);

        // Dropping one of two channels keeps the user online.
        assert_eq!(
            registry.remove_channel(1, "a").await,
            PresenceChange::Unchanged
        );
        assert!(registry.is_online(1).await);

        assert_eq!(
            registry.remove_channel(1, "b").await,
            PresenceChange::Changed
        );
        assert!(!registry.is_online(1).await);
    }

    #[tokio::test]
    async fn send_reaches_all_live_channels_of_one_user() {
        let registry = SubscriberRegistry::new();
        let (tx1, mut rx1) = unbounded_channel();
        let (tx2, mut rx2) = unbounded_channel();
        let (tx3, mut rx3) = unbounded_channel();
        registry.add_channel(1, "a".into(), tx1).await;
        registry.add_channel(1, "b".into(), tx2).await;
        registry.add_channel(2, "c".into(), tx3).await;

        let delivered = registry.send_to_user(1, "hello").await;
        assert_eq!(delivered, 2);
        assert!(matches!(rx1.try_recv(), Ok(WsOutMessage::Text(t)) if t == "hello"));
        assert!(matches!(rx2.try_recv(), Ok(WsOutMessage::Text(t)) if t == "hello"));
        // User 2 got nothing.
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_channel_does_not_block_delivery() {
        let registry = SubscriberRegistry::new();
        let (tx_dead, rx_dead) = unbounded_channel();
        drop(rx_dead);
        let (tx_live, mut rx_live) = unbounded_channel();
        registry.add_channel(1, "dead".into(), tx_dead).await;
        registry.add_channel(1, "live".into(), tx_live).await;

        let delivered = registry.send_to_user(1, "ping").await;
        assert_eq!(delivered, 1);
        assert!(rx_live.try_recv().is_ok());
    }

    #[tokio::test]
    async fn removing_unknown_channel_is_a_no_op() {
        let registry = SubscriberRegistry::new();
        assert_eq!(
            registry.remove_channel(9, "nope").await,
            PresenceChange::Unchanged
        );
    }
}
