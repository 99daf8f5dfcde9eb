//! The REST backend seam and its wire shapes.
//!
//! Payloads are decoded into the wire types below exactly once; anything
//! that doesn't fit is dropped here with a warning so the engine never sees
//! a half-valid record.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::directory::RawContactEntry;
use crate::state::{ContentType, ConversationKey, DeliveryState, Direction, Message, Platform};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// A conversation as the backend addresses it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationRef {
    pub key: ConversationKey,
    /// Identifier the backend routes on (usually the raw transport ID).
    pub remote_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawConversation {
    pub platform: Platform,
    pub identifier: String,
    pub name: Option<String>,
    pub last_message_time: i64,
    pub unread_count: u32,
    pub is_escalated: bool,
    pub has_open_note: bool,
    pub is_ai_blocked: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationPage {
    pub conversations: Vec<RawConversation>,
    pub has_more: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    #[serde(default, alias = "messageId")]
    pub id: Option<String>,
    #[serde(default, alias = "url")]
    pub media_url: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct BotStatus {
    #[serde(alias = "isPaused")]
    pub paused: bool,
}

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn fetch_conversations(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<ConversationPage, BackendError>;

    async fn fetch_messages(&self, conv: &ConversationRef) -> Result<Vec<Message>, BackendError>;

    async fn fetch_contacts(&self) -> Result<Vec<RawContactEntry>, BackendError>;

    async fn send_message(
        &self,
        conv: &ConversationRef,
        outgoing: &OutgoingMessage,
    ) -> Result<SendReceipt, BackendError>;

    async fn fetch_bot_status(&self, conv: &ConversationRef) -> Result<BotStatus, BackendError>;

    async fn set_bot_paused(
        &self,
        conv: &ConversationRef,
        paused: bool,
    ) -> Result<BotStatus, BackendError>;
}

/// Walk list pages until the backend says stop or `max_pages` is reached.
pub async fn fetch_all_conversations(
    backend: &dyn Backend,
    page_size: u32,
    max_pages: u32,
) -> Result<Vec<RawConversation>, BackendError> {
    let mut out = Vec::new();
    for page in 0..max_pages.max(1) {
        let batch = backend.fetch_conversations(page, page_size).await?;
        let done = !batch.has_more || batch.conversations.is_empty();
        out.extend(batch.conversations);
        if done {
            return Ok(out);
        }
    }
    tracing::warn!(max_pages, "conversation list truncated at page cap");
    Ok(out)
}

// ── Wire shapes ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Int(i64),
    Float(f64),
    Text(String),
}

// Anything below this is unix seconds rather than millis (year ~5138 cut-off).
const SECONDS_CUTOFF: i64 = 100_000_000_000;

fn normalize_epoch(n: i64) -> i64 {
    if n.abs() < SECONDS_CUTOFF {
        n.saturating_mul(1000)
    } else {
        n
    }
}

impl WireTimestamp {
    fn to_millis(&self) -> Option<i64> {
        match self {
            WireTimestamp::Int(n) => Some(normalize_epoch(*n)),
            WireTimestamp::Float(f) if f.is_finite() => Some(normalize_epoch(*f as i64)),
            WireTimestamp::Float(_) => None,
            WireTimestamp::Text(s) => {
                let s = s.trim();
                if let Ok(n) = s.parse::<i64>() {
                    return Some(normalize_epoch(n));
                }
                chrono::DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.timestamp_millis())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireContent {
    Text {
        #[serde(alias = "text", alias = "body")]
        content: String,
    },
    Image {
        #[serde(default, rename = "mediaUrl", alias = "url")]
        media_url: Option<String>,
        #[serde(default, alias = "content")]
        caption: Option<String>,
    },
    Video {
        #[serde(default, rename = "mediaUrl", alias = "url")]
        media_url: Option<String>,
        #[serde(default, alias = "content")]
        caption: Option<String>,
    },
    Audio {
        #[serde(default, rename = "mediaUrl", alias = "url")]
        media_url: Option<String>,
    },
    Document {
        #[serde(default, rename = "mediaUrl", alias = "url")]
        media_url: Option<String>,
        #[serde(default, alias = "filename", alias = "content")]
        caption: Option<String>,
    },
}

impl WireContent {
    fn into_parts(self) -> (ContentType, String, Option<String>) {
        match self {
            WireContent::Text { content } => (ContentType::Text, content, None),
            WireContent::Image { media_url, caption } => {
                (ContentType::Image, caption.unwrap_or_default(), media_url)
            }
            WireContent::Video { media_url, caption } => {
                (ContentType::Video, caption.unwrap_or_default(), media_url)
            }
            WireContent::Audio { media_url } => (ContentType::Audio, String::new(), media_url),
            WireContent::Document { media_url, caption } => {
                (ContentType::Document, caption.unwrap_or_default(), media_url)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: String,
    direction: Direction,
    timestamp: WireTimestamp,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    content: WireContent,
}

impl WireMessage {
    fn into_message(self, key: &ConversationKey) -> Result<Message, String> {
        if self.id.trim().is_empty() {
            return Err("message without id".into());
        }
        let timestamp = self
            .timestamp
            .to_millis()
            .ok_or_else(|| format!("message {}: bad timestamp", self.id))?;
        let delivery = match self.status.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("failed") | Some("error") => DeliveryState::Failed {
                reason: self.error.unwrap_or_else(|| "delivery failed".into()),
            },
            _ => DeliveryState::Confirmed,
        };
        let (content_type, content, media_ref) = self.content.into_parts();
        Ok(Message {
            id: self.id,
            conversation: key.clone(),
            direction: self.direction,
            content_type,
            content,
            media_ref: media_ref.filter(|s| !s.trim().is_empty()),
            timestamp,
            delivery,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireConversation {
    platform: Platform,
    #[serde(alias = "contact", alias = "chatId")]
    contact_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    last_message_time: Option<WireTimestamp>,
    #[serde(default)]
    unread_count: u32,
    #[serde(default)]
    is_escalated: bool,
    #[serde(default)]
    has_open_note: bool,
    #[serde(default)]
    is_ai_blocked: bool,
}

impl WireConversation {
    fn into_raw(self) -> Result<RawConversation, String> {
        if self.contact_id.trim().is_empty() {
            return Err("conversation without contact id".into());
        }
        Ok(RawConversation {
            platform: self.platform,
            identifier: self.contact_id,
            name: self.name.filter(|n| !n.trim().is_empty()),
            last_message_time: self
                .last_message_time
                .and_then(|t| t.to_millis())
                .unwrap_or(0),
            unread_count: self.unread_count,
            is_escalated: self.is_escalated,
            has_open_note: self.has_open_note,
            is_ai_blocked: self.is_ai_blocked,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireContact {
    #[serde(default = "default_platform")]
    platform: Platform,
    #[serde(alias = "jid")]
    identifier: String,
    #[serde(default, alias = "aliases")]
    alternate_identifiers: Vec<String>,
    #[serde(default, alias = "name", alias = "pushName")]
    display_name: Option<String>,
    #[serde(default, alias = "avatar")]
    profile_picture: Option<String>,
    #[serde(default)]
    message_count: u64,
    #[serde(default)]
    last_message_time: Option<WireTimestamp>,
}

impl WireContact {
    fn into_entry(self) -> RawContactEntry {
        RawContactEntry {
            platform: self.platform,
            identifier: self.identifier,
            alternate_identifiers: self.alternate_identifiers,
            display_name: self.display_name,
            profile_picture: self.profile_picture,
            message_count: self.message_count,
            last_message_time: self
                .last_message_time
                .and_then(|t| t.to_millis())
                .unwrap_or(0),
        }
    }
}

fn default_platform() -> Platform {
    Platform::WhatsApp
}

/// Accept a bare array or the usual `{ "<field>": [...] }` / `{ "data": [...] }` envelopes.
fn list_items(json: Value, field: &str) -> Result<Vec<Value>, BackendError> {
    match json {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => match obj.remove(field).or_else(|| obj.remove("data")) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(BackendError::InvalidPayload(format!("expected `{field}` array"))),
        },
        _ => Err(BackendError::InvalidPayload(format!("expected `{field}` array"))),
    }
}

fn decode_each<W, T>(
    items: Vec<Value>,
    what: &'static str,
    convert: impl Fn(W) -> Result<T, String>,
) -> Vec<T>
where
    W: serde::de::DeserializeOwned,
{
    items
        .into_iter()
        .filter_map(|item| {
            let decoded = serde_json::from_value::<W>(item)
                .map_err(|e| e.to_string())
                .and_then(&convert);
            match decoded {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(what, err = %e, "dropping malformed backend item");
                    None
                }
            }
        })
        .collect()
}

pub fn decode_messages(json: Value, key: &ConversationKey) -> Result<Vec<Message>, BackendError> {
    let items = list_items(json, "messages")?;
    Ok(decode_each(items, "message", |w: WireMessage| w.into_message(key)))
}

pub fn decode_conversation_page(json: Value) -> Result<ConversationPage, BackendError> {
    let has_more = json
        .get("hasMore")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let items = list_items(json, "conversations")?;
    Ok(ConversationPage {
        conversations: decode_each(items, "conversation", WireConversation::into_raw),
        has_more,
    })
}

pub fn decode_contacts(json: Value) -> Result<Vec<RawContactEntry>, BackendError> {
    let items = list_items(json, "contacts")?;
    Ok(decode_each(items, "contact", |w: WireContact| {
        if w.identifier.trim().is_empty() {
            return Err("contact without identifier".to_string());
        }
        Ok(w.into_entry())
    }))
}

// ── HTTP implementation ─────────────────────────────────────────────────────

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: reqwest::Url,
    api_token: Option<String>,
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let base_url = reqwest::Url::parse(base_url.trim())
            .map_err(|e| BackendError::InvalidPayload(format!("base url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transient(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            api_token: api_token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidPayload("base url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn conversation_url(
        &self,
        conv: &ConversationRef,
        tail: &str,
    ) -> Result<reqwest::Url, BackendError> {
        self.url(&[
            "conversations",
            conv.key.platform.as_str(),
            conv.remote_id.as_str(),
            tail,
        ])
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_json(&self, req: reqwest::RequestBuilder) -> Result<Value, BackendError> {
        let resp = self.authed(req).send().await.map_err(classify_reqwest)?;
        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        let bytes = resp.bytes().await.map_err(classify_reqwest)?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| BackendError::InvalidPayload(e.to_string()))
    }
}

fn classify_reqwest(e: reqwest::Error) -> BackendError {
    if e.is_decode() {
        BackendError::InvalidPayload(e.to_string())
    } else {
        BackendError::Transient(e.to_string())
    }
}

/// Pull a human message out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        for field in ["error", "message", "detail"] {
            if let Some(msg) = json.get(field).and_then(Value::as_str) {
                return msg.to_string();
            }
        }
    }
    body.chars().take(200).collect()
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_conversations(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<ConversationPage, BackendError> {
        let url = self.url(&["conversations"])?;
        let req = self
            .client
            .get(url)
            .query(&[("page", page), ("limit", limit)]);
        decode_conversation_page(self.send_json(req).await?)
    }

    async fn fetch_messages(&self, conv: &ConversationRef) -> Result<Vec<Message>, BackendError> {
        let url = self.conversation_url(conv, "messages")?;
        decode_messages(self.send_json(self.client.get(url)).await?, &conv.key)
    }

    async fn fetch_contacts(&self) -> Result<Vec<RawContactEntry>, BackendError> {
        let url = self.url(&["contacts"])?;
        decode_contacts(self.send_json(self.client.get(url)).await?)
    }

    async fn send_message(
        &self,
        conv: &ConversationRef,
        outgoing: &OutgoingMessage,
    ) -> Result<SendReceipt, BackendError> {
        let url = self.conversation_url(conv, "messages")?;
        let json = self.send_json(self.client.post(url).json(outgoing)).await?;
        if let Some(false) = json.get("success").and_then(Value::as_bool) {
            return Err(BackendError::Rejected {
                status: 200,
                message: error_message(&json.to_string()),
            });
        }
        if json.is_null() {
            return Ok(SendReceipt::default());
        }
        serde_json::from_value(json).map_err(|e| BackendError::InvalidPayload(e.to_string()))
    }

    async fn fetch_bot_status(&self, conv: &ConversationRef) -> Result<BotStatus, BackendError> {
        let url = self.conversation_url(conv, "bot")?;
        let json = self.send_json(self.client.get(url)).await?;
        serde_json::from_value(json).map_err(|e| BackendError::InvalidPayload(e.to_string()))
    }

    async fn set_bot_paused(
        &self,
        conv: &ConversationRef,
        paused: bool,
    ) -> Result<BotStatus, BackendError> {
        let url = self.conversation_url(conv, "bot")?;
        let body = serde_json::json!({ "paused": paused });
        let json = self.send_json(self.client.put(url).json(&body)).await?;
        if json.is_null() {
            return Ok(BotStatus { paused });
        }
        serde_json::from_value(json).map_err(|e| BackendError::InvalidPayload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> ConversationKey {
        ConversationKey::new(Platform::WhatsApp, "01001234567")
    }

    #[test]
    fn decodes_tagged_message_shapes() {
        let json = json!({ "messages": [
            { "id": "m1", "direction": "outgoing", "timestamp": 1_700_000_000, "type": "text", "content": "hello" },
            { "id": "m2", "direction": "incoming", "timestamp": "2024-01-01T00:00:00Z", "type": "image", "mediaUrl": "https://cdn/i.jpg" },
            { "id": "m3", "direction": "outgoing", "timestamp": 1_700_000_000_123_i64, "type": "document", "filename": "cv.pdf", "status": "failed" },
        ]});
        let msgs = decode_messages(json, &key()).unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].timestamp, 1_700_000_000_000);
        assert_eq!(msgs[0].content, "hello");
        assert_eq!(msgs[1].content_type, ContentType::Image);
        assert_eq!(msgs[1].media_ref.as_deref(), Some("https://cdn/i.jpg"));
        assert_eq!(msgs[1].timestamp, 1_704_067_200_000);
        assert_eq!(msgs[2].timestamp, 1_700_000_000_123);
        assert_eq!(msgs[2].content, "cv.pdf");
        assert!(matches!(msgs[2].delivery, DeliveryState::Failed { .. }));
        assert!(msgs.iter().all(|m| m.conversation == key()));
    }

    #[test]
    fn malformed_items_are_dropped_not_fatal() {
        let json = json!([
            { "id": "m1", "direction": "outgoing", "timestamp": 1, "type": "text", "content": "ok" },
            { "id": "m2", "direction": "sideways", "timestamp": 1, "type": "text", "content": "bad" },
            { "id": "m3", "direction": "incoming", "timestamp": "yesterday", "type": "text", "content": "bad" },
            { "id": "m4", "direction": "incoming", "timestamp": 1, "type": "sticker" },
        ]);
        let msgs = decode_messages(json, &key()).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, "m1");
    }

    #[test]
    fn non_list_payload_is_invalid() {
        let err = decode_messages(json!({ "oops": 1 }), &key()).unwrap_err();
        assert!(matches!(err, BackendError::InvalidPayload(_)));
    }

    #[test]
    fn decodes_conversation_page_with_overlay_flags() {
        let json = json!({
            "conversations": [
                { "platform": "whatsapp", "contactId": "201001234567@s.whatsapp.net", "name": "Mona",
                  "lastMessageTime": 1_700_000_000, "unreadCount": 2, "isEscalated": true, "isAiBlocked": true },
                { "platform": "telegram", "contactId": "" },
            ],
            "hasMore": true,
        });
        let page = decode_conversation_page(json).unwrap();
        assert!(page.has_more);
        assert_eq!(page.conversations.len(), 1);
        let c = &page.conversations[0];
        assert_eq!(c.unread_count, 2);
        assert!(c.is_escalated && c.is_ai_blocked && !c.has_open_note);
        assert_eq!(c.last_message_time, 1_700_000_000_000);
    }

    #[test]
    fn decodes_contacts_with_aliases() {
        let json = json!({ "data": [
            { "jid": "201001234567@lid", "aliases": ["201001234567@s.whatsapp.net"], "pushName": "Mona", "messageCount": 3 },
            { "identifier": "  " },
        ]});
        let contacts = decode_contacts(json).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].platform, Platform::WhatsApp);
        assert_eq!(contacts[0].alternate_identifiers.len(), 1);
        assert_eq!(contacts[0].display_name.as_deref(), Some("Mona"));
    }

    #[test]
    fn outgoing_message_serializes_type_tag() {
        let out = OutgoingMessage {
            content_type: ContentType::Image,
            content: "look".into(),
            media_ref: Some("https://cdn/i.jpg".into()),
        };
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v, json!({ "type": "image", "content": "look", "mediaRef": "https://cdn/i.jpg" }));
    }

    #[test]
    fn error_body_message_is_extracted() {
        assert_eq!(error_message(r#"{"error":"window closed"}"#), "window closed");
        assert_eq!(error_message("plain"), "plain");
    }

    #[test]
    fn conversation_urls_are_segment_encoded() {
        let backend =
            HttpBackend::new("https://api.example.com/v1/", None, Duration::from_secs(5)).unwrap();
        let conv = ConversationRef {
            key: key(),
            remote_id: "201001234567@s.whatsapp.net".into(),
        };
        let url = backend.conversation_url(&conv, "messages").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/conversations/whatsapp/201001234567@s.whatsapp.net/messages"
        );
    }

    struct Paged;

    #[async_trait]
    impl Backend for Paged {
        async fn fetch_conversations(&self, page: u32, _limit: u32) -> Result<ConversationPage, BackendError> {
            Ok(ConversationPage {
                conversations: vec![RawConversation {
                    platform: Platform::WhatsApp,
                    identifier: format!("20100123456{page}"),
                    name: None,
                    last_message_time: 0,
                    unread_count: 0,
                    is_escalated: false,
                    has_open_note: false,
                    is_ai_blocked: false,
                }],
                has_more: page < 2,
            })
        }
        async fn fetch_messages(&self, _: &ConversationRef) -> Result<Vec<Message>, BackendError> {
            Ok(vec![])
        }
        async fn fetch_contacts(&self) -> Result<Vec<RawContactEntry>, BackendError> {
            Ok(vec![])
        }
        async fn send_message(&self, _: &ConversationRef, _: &OutgoingMessage) -> Result<SendReceipt, BackendError> {
            Ok(SendReceipt::default())
        }
        async fn fetch_bot_status(&self, _: &ConversationRef) -> Result<BotStatus, BackendError> {
            Ok(BotStatus::default())
        }
        async fn set_bot_paused(&self, _: &ConversationRef, paused: bool) -> Result<BotStatus, BackendError> {
            Ok(BotStatus { paused })
        }
    }

    #[tokio::test]
    async fn list_fetch_walks_pages_until_done_or_capped() {
        assert_eq!(fetch_all_conversations(&Paged, 1, 10).await.unwrap().len(), 3);
        assert_eq!(fetch_all_conversations(&Paged, 1, 2).await.unwrap().len(), 2);
    }
}
