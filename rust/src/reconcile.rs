//! Folding fetched server messages into a log that may hold optimistic sends.

use std::collections::HashMap;

use crate::state::{DeliveryState, Message};

/// How close a server copy must be to an optimistic send to be "the same send".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchPolicy {
    pub text_window_ms: i64,
    pub media_window_ms: i64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            text_window_ms: 30_000,
            media_window_ms: 60_000,
        }
    }
}

impl MatchPolicy {
    pub fn matches(&self, optimistic: &Message, server: &Message) -> bool {
        if optimistic.conversation != server.conversation
            || optimistic.direction != server.direction
        {
            return false;
        }
        let delta = (server.timestamp - optimistic.timestamp).abs();
        if server.content_type.is_media() || optimistic.content_type.is_media() {
            optimistic.content_type == server.content_type && delta < self.media_window_ms
        } else {
            optimistic.content == server.content && delta < self.text_window_ms
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Optimistic entries replaced by their server copy.
    pub matched: usize,
    /// Entries updated in place by ID.
    pub refreshed: usize,
    /// Server messages new to the log.
    pub appended: usize,
    /// Optimistic entries still waiting.
    pub pending: usize,
}

/// Server copy wins, but never lose a media reference we already had.
fn with_media_fallback(server: Message, previous: &Message) -> Message {
    if server.media_ref.is_some() {
        return server;
    }
    Message {
        media_ref: previous.media_ref.clone(),
        ..server
    }
}

pub fn reconcile(current: &[Message], batch: &[Message], policy: &MatchPolicy) -> Vec<Message> {
    reconcile_with_stats(current, batch, policy).0
}

pub fn reconcile_with_stats(
    current: &[Message],
    batch: &[Message],
    policy: &MatchPolicy,
) -> (Vec<Message>, ReconcileStats) {
    let mut stats = ReconcileStats::default();

    // Last copy of a repeated server ID wins, at its first position.
    let mut server: Vec<Message> = Vec::with_capacity(batch.len());
    let mut server_pos: HashMap<&str, usize> = HashMap::with_capacity(batch.len());
    for m in batch {
        match server_pos.get(m.id.as_str()) {
            Some(&i) => server[i] = m.clone(),
            None => {
                server_pos.insert(m.id.as_str(), server.len());
                server.push(m.clone());
            }
        }
    }

    let mut out: Vec<Message> = current.to_vec();
    let by_id: HashMap<String, usize> = out
        .iter()
        .enumerate()
        .map(|(i, m)| (m.id.clone(), i))
        .collect();

    let mut fresh: Vec<Message> = Vec::new();
    for s in server {
        match by_id.get(&s.id) {
            Some(&i) => {
                out[i] = with_media_fallback(s, &out[i]);
                stats.refreshed += 1;
            }
            None => fresh.push(s),
        }
    }

    let mut consumed = vec![false; out.len()];
    let mut appended: Vec<Message> = Vec::new();
    for s in fresh {
        let hit = out.iter().enumerate().position(|(i, o)| {
            !consumed[i] && o.delivery == DeliveryState::Pending && policy.matches(o, &s)
        });
        match hit {
            Some(i) => {
                consumed[i] = true;
                let mut confirmed = with_media_fallback(s, &out[i]);
                if confirmed.delivery == DeliveryState::Pending {
                    confirmed.delivery = DeliveryState::Confirmed;
                }
                out[i] = confirmed;
                stats.matched += 1;
            }
            None => {
                appended.push(s);
                stats.appended += 1;
            }
        }
    }
    out.extend(appended);

    // Stable: equal timestamps keep insertion order, never ID order.
    out.sort_by_key(|m| m.timestamp);
    stats.pending = out
        .iter()
        .filter(|m| m.delivery == DeliveryState::Pending)
        .count();
    (out, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ContentType, ConversationKey, Direction, Platform};

    fn key() -> ConversationKey {
        ConversationKey::new(Platform::WhatsApp, "01001234567")
    }

    fn optimistic(id: &str, content: &str, ts: i64) -> Message {
        Message {
            id: id.into(),
            conversation: key(),
            direction: Direction::Outgoing,
            content_type: ContentType::Text,
            content: content.into(),
            media_ref: None,
            timestamp: ts,
            delivery: DeliveryState::Pending,
        }
    }

    fn server(id: &str, content: &str, ts: i64) -> Message {
        Message {
            delivery: DeliveryState::Confirmed,
            ..optimistic(id, content, ts)
        }
    }

    fn media(id: &str, ct: ContentType, media_ref: Option<&str>, ts: i64, pending: bool) -> Message {
        Message {
            content_type: ct,
            content: String::new(),
            media_ref: media_ref.map(String::from),
            delivery: if pending {
                DeliveryState::Pending
            } else {
                DeliveryState::Confirmed
            },
            ..optimistic(id, "", ts)
        }
    }

    #[test]
    fn server_copy_replaces_matching_optimistic_send() {
        let log = vec![optimistic("local:1", "hello", 1_000)];
        let out = reconcile(&log, &[server("wamid.A", "hello", 1_050)], &MatchPolicy::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "wamid.A");
        assert_eq!(out[0].delivery, DeliveryState::Confirmed);
    }

    #[test]
    fn different_content_does_not_match() {
        let log = vec![optimistic("local:1", "hello", 1_000)];
        let (out, stats) = reconcile_with_stats(
            &log,
            &[server("wamid.A", "hello there", 1_050)],
            &MatchPolicy::default(),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(stats.pending, 1);
        assert!(out.iter().all(|m| m.direction == Direction::Outgoing));
    }

    #[test]
    fn text_window_is_exclusive() {
        let policy = MatchPolicy {
            text_window_ms: 100,
            media_window_ms: 200,
        };
        let log = vec![optimistic("local:1", "hi", 1_000)];
        assert_eq!(reconcile(&log, &[server("s", "hi", 1_099)], &policy).len(), 1);
        assert_eq!(reconcile(&log, &[server("s", "hi", 1_100)], &policy).len(), 2);
        assert_eq!(reconcile(&log, &[server("s", "hi", 901)], &policy).len(), 1);
    }

    #[test]
    fn media_matches_on_type_within_wider_window() {
        let log = vec![media("local:1", ContentType::Image, Some("file:///tmp/p.jpg"), 0, true)];
        let out = reconcile(
            &log,
            &[media("wamid.I", ContentType::Image, None, 45_000, false)],
            &MatchPolicy::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "wamid.I");
        assert_eq!(out[0].media_ref.as_deref(), Some("file:///tmp/p.jpg"));

        let out = reconcile(
            &log,
            &[media("wamid.V", ContentType::Video, None, 1_000, false)],
            &MatchPolicy::default(),
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn server_media_url_wins_over_preview() {
        let log = vec![media("local:1", ContentType::Image, Some("blob:preview"), 0, true)];
        let out = reconcile(
            &log,
            &[media("wamid.I", ContentType::Image, Some("https://cdn/i.jpg"), 10, false)],
            &MatchPolicy::default(),
        );
        assert_eq!(out[0].media_ref.as_deref(), Some("https://cdn/i.jpg"));
    }

    #[test]
    fn refresh_by_id_keeps_known_media_ref() {
        let log = vec![media("wamid.I", ContentType::Image, Some("blob:preview"), 0, false)];
        let out = reconcile(
            &log,
            &[media("wamid.I", ContentType::Image, None, 0, false)],
            &MatchPolicy::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].media_ref.as_deref(), Some("blob:preview"));
    }

    #[test]
    fn each_optimistic_send_is_consumed_once() {
        let log = vec![
            optimistic("local:1", "ok", 1_000),
            optimistic("local:2", "ok", 2_000),
        ];
        let out = reconcile(&log, &[server("s1", "ok", 1_500)], &MatchPolicy::default());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "s1");
        assert_eq!(out[1].id, "local:2");
        assert_eq!(out[1].delivery, DeliveryState::Pending);
    }

    #[test]
    fn incoming_messages_never_match_outgoing_sends() {
        let log = vec![optimistic("local:1", "hi", 1_000)];
        let mut s = server("s1", "hi", 1_000);
        s.direction = Direction::Incoming;
        assert_eq!(reconcile(&log, &[s], &MatchPolicy::default()).len(), 2);
    }

    #[test]
    fn reapplying_the_same_batch_is_idempotent() {
        let log = vec![
            optimistic("local:1", "a", 1_000),
            optimistic("local:2", "a", 1_200),
        ];
        let batch = vec![server("s1", "a", 1_100), server("s2", "b", 900)];
        let once = reconcile(&log, &batch, &MatchPolicy::default());
        let twice = reconcile(&once, &batch, &MatchPolicy::default());
        assert_eq!(once, twice);
    }

    #[test]
    fn output_has_unique_ids_and_sorted_timestamps() {
        let log = vec![server("s1", "x", 5), optimistic("local:1", "y", 7)];
        let batch = vec![
            server("s1", "x", 5),
            server("s2", "z", 3),
            server("s2", "z2", 3),
            server("s3", "y", 8),
        ];
        let out = reconcile(&log, &batch, &MatchPolicy::default());
        let mut ids: Vec<_> = out.iter().map(|m| m.id.as_str()).collect();
        assert!(out.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(ids, vec!["s2", "s1", "s3"]);
        assert_eq!(out[0].content, "z2");
        ids.dedup();
        assert_eq!(ids.len(), out.len());
    }

    #[test]
    fn timestamp_ties_keep_insertion_order() {
        let log = vec![server("zzz", "first", 10)];
        let out = reconcile(&log, &[server("aaa", "second", 10)], &MatchPolicy::default());
        let ids: Vec<_> = out.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["zzz", "aaa"]);
    }
}
