use std::collections::HashMap;

use crate::reconcile::{reconcile_with_stats, MatchPolicy, ReconcileStats};
use crate::state::{ConversationKey, DeliveryState, Message};

/// Per-conversation ordered logs, confirmed and optimistic entries side by side.
#[derive(Debug, Default)]
pub struct MessageStore {
    policy: MatchPolicy,
    logs: HashMap<ConversationKey, Vec<Message>>,
}

impl MessageStore {
    pub fn new(policy: MatchPolicy) -> Self {
        Self {
            policy,
            logs: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    pub fn log(&self, key: &ConversationKey) -> &[Message] {
        self.logs.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn insert_optimistic(&mut self, message: Message) {
        let log = self.logs.entry(message.conversation.clone()).or_default();
        log.push(message);
        log.sort_by_key(|m| m.timestamp);
    }

    pub fn remove(&mut self, key: &ConversationKey, id: &str) -> Option<Message> {
        let log = self.logs.get_mut(key)?;
        let pos = log.iter().position(|m| m.id == id)?;
        Some(log.remove(pos))
    }

    /// Swap a pending entry's local preview for a durable URL.
    pub fn set_media_ref(&mut self, key: &ConversationKey, id: &str, media_ref: String) -> bool {
        let Some(m) = self
            .logs
            .get_mut(key)
            .and_then(|log| log.iter_mut().find(|m| m.id == id))
        else {
            return false;
        };
        m.media_ref = Some(media_ref);
        true
    }

    /// Re-key a pending entry under the ID the server assigned, so the next
    /// fetch refreshes it by ID. Refuses if that ID is already in the log.
    pub fn assign_server_id(&mut self, key: &ConversationKey, local_id: &str, server_id: &str) -> bool {
        let Some(log) = self.logs.get_mut(key) else {
            return false;
        };
        if log.iter().any(|m| m.id == server_id) {
            return false;
        }
        match log.iter_mut().find(|m| m.id == local_id) {
            Some(m) => {
                m.id = server_id.to_string();
                true
            }
            None => false,
        }
    }

    /// Drop a pending entry whose server copy is already in the log. The
    /// server copy keeps the local preview if it has no media of its own.
    pub fn fold_pending_into(&mut self, key: &ConversationKey, local_id: &str, server_id: &str) -> bool {
        if local_id == server_id || !self.contains(key, server_id) {
            return false;
        }
        let Some(local) = self.remove(key, local_id) else {
            return false;
        };
        if let Some(server) = self
            .logs
            .get_mut(key)
            .and_then(|log| log.iter_mut().find(|m| m.id == server_id))
        {
            if server.media_ref.is_none() {
                server.media_ref = local.media_ref;
            }
        }
        true
    }

    pub fn apply_server_batch(&mut self, key: &ConversationKey, batch: &[Message]) -> ReconcileStats {
        let current = self.logs.remove(key).unwrap_or_default();
        let (next, stats) = reconcile_with_stats(&current, batch, &self.policy);
        self.logs.insert(key.clone(), next);
        stats
    }

    pub fn pending_count(&self, key: &ConversationKey) -> usize {
        self.log(key)
            .iter()
            .filter(|m| m.delivery == DeliveryState::Pending)
            .count()
    }

    pub fn contains(&self, key: &ConversationKey, id: &str) -> bool {
        self.log(key).iter().any(|m| m.id == id)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ContentType, Direction, Platform};

    fn key(contact: &str) -> ConversationKey {
        ConversationKey::new(Platform::WhatsApp, contact)
    }

    fn msg(k: &ConversationKey, id: &str, content: &str, ts: i64, pending: bool) -> Message {
        Message {
            id: id.into(),
            conversation: k.clone(),
            direction: Direction::Outgoing,
            content_type: ContentType::Text,
            content: content.into(),
            media_ref: None,
            timestamp: ts,
            delivery: if pending {
                DeliveryState::Pending
            } else {
                DeliveryState::Confirmed
            },
        }
    }

    #[test]
    fn optimistic_entry_then_confirmation_leaves_one_message() {
        let k = key("01001234567");
        let mut store = MessageStore::new(MatchPolicy::default());
        store.insert_optimistic(msg(&k, "local:1", "hello", 1_000, true));
        assert_eq!(store.pending_count(&k), 1);

        let stats = store.apply_server_batch(&k, &[msg(&k, "wamid.A", "hello", 1_050, false)]);
        assert_eq!(stats.matched, 1);
        assert_eq!(store.log(&k).len(), 1);
        assert_eq!(store.log(&k)[0].id, "wamid.A");
        assert_eq!(store.pending_count(&k), 0);
    }

    #[test]
    fn removing_a_failed_send_drops_it_entirely() {
        let k = key("01001234567");
        let mut store = MessageStore::new(MatchPolicy::default());
        store.insert_optimistic(msg(&k, "local:1", "hello", 1_000, true));
        assert!(store.remove(&k, "local:1").is_some());
        assert!(store.log(&k).is_empty());
        assert!(store.remove(&k, "local:1").is_none());
    }

    #[test]
    fn batches_only_touch_their_conversation() {
        let a = key("01001234567");
        let b = key("01111234567");
        let mut store = MessageStore::new(MatchPolicy::default());
        store.insert_optimistic(msg(&a, "local:1", "hi", 1, true));
        store.apply_server_batch(&b, &[msg(&b, "s1", "yo", 2, false)]);
        assert_eq!(store.log(&a).len(), 1);
        assert_eq!(store.log(&b).len(), 1);
    }

    #[test]
    fn server_id_from_receipt_lets_the_refetch_refresh_in_place() {
        let k = key("01001234567");
        let mut store = MessageStore::new(MatchPolicy::default());
        store.insert_optimistic(msg(&k, "local:1", "hello", 1_000, true));
        assert!(store.assign_server_id(&k, "local:1", "wamid.A"));
        assert_eq!(store.pending_count(&k), 1);

        // Server clock far outside the match window still lands on the same row.
        let stats = store.apply_server_batch(&k, &[msg(&k, "wamid.A", "hello", 500_000, false)]);
        assert_eq!(stats.refreshed, 1);
        assert_eq!(store.log(&k).len(), 1);
        assert_eq!(store.pending_count(&k), 0);
    }

    #[test]
    fn server_id_is_not_assigned_twice() {
        let k = key("01001234567");
        let mut store = MessageStore::new(MatchPolicy::default());
        store.insert_optimistic(msg(&k, "local:1", "hello", 1_000, true));
        store.apply_server_batch(&k, &[msg(&k, "wamid.A", "hello", 1_010, false)]);
        assert!(!store.assign_server_id(&k, "local:1", "wamid.A"));
        assert!(store.contains(&k, "wamid.A"));
    }

    #[test]
    fn pending_entry_folds_into_an_unmatched_server_copy() {
        let k = key("01001234567");
        let mut store = MessageStore::new(MatchPolicy::default());
        let mut local = msg(&k, "local:1", "", 1_000, true);
        local.content_type = ContentType::Image;
        local.media_ref = Some("blob:preview".into());
        store.insert_optimistic(local);
        // Server clock is two minutes ahead, so the window never matches.
        let mut server = msg(&k, "wamid.A", "", 121_000, false);
        server.content_type = ContentType::Image;
        store.apply_server_batch(&k, &[server]);
        assert_eq!(store.log(&k).len(), 2);

        assert!(!store.assign_server_id(&k, "local:1", "wamid.A"));
        assert!(store.fold_pending_into(&k, "local:1", "wamid.A"));
        assert_eq!(store.log(&k).len(), 1);
        assert_eq!(store.log(&k)[0].id, "wamid.A");
        assert_eq!(store.log(&k)[0].media_ref.as_deref(), Some("blob:preview"));
        assert!(!store.fold_pending_into(&k, "local:1", "wamid.A"));
    }

    #[test]
    fn durable_media_url_replaces_preview() {
        let k = key("01001234567");
        let mut store = MessageStore::new(MatchPolicy::default());
        let mut m = msg(&k, "local:1", "", 1, true);
        m.content_type = ContentType::Image;
        m.media_ref = Some("blob:preview".into());
        store.insert_optimistic(m);
        assert!(store.set_media_ref(&k, "local:1", "https://cdn/i.jpg".into()));
        assert_eq!(store.log(&k)[0].media_ref.as_deref(), Some("https://cdn/i.jpg"));
        assert!(!store.set_media_ref(&k, "missing", "x".into()));
    }
}
