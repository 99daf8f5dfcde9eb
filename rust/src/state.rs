use std::fmt;

/// Prefix of locally generated message IDs. Server IDs never carry it.
pub const LOCAL_ID_PREFIX: &str = "local:";

#[derive(
    uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(alias = "wa")]
    WhatsApp,
    #[serde(alias = "tg")]
    Telegram,
    #[serde(alias = "live_chat", alias = "webchat")]
    LiveChat,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::WhatsApp => "whatsapp",
            Platform::Telegram => "telegram",
            Platform::LiveChat => "livechat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whatsapp" | "wa" => Some(Platform::WhatsApp),
            "telegram" | "tg" => Some(Platform::Telegram),
            "livechat" | "live_chat" | "webchat" => Some(Platform::LiveChat),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    uniffi::Record, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ConversationKey {
    pub platform: Platform,
    /// Canonical contact key.
    pub contact_id: String,
}

impl ConversationKey {
    pub fn new(platform: Platform, contact_id: impl Into<String>) -> Self {
        Self {
            platform,
            contact_id: contact_id.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform, self.contact_id)
    }
}

#[derive(
    uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "in", alias = "inbound")]
    Incoming,
    #[serde(alias = "out", alias = "outbound")]
    Outgoing,
}

#[derive(
    uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl ContentType {
    pub fn is_media(&self) -> bool {
        !matches!(self, ContentType::Text)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Video => "video",
            ContentType::Audio => "audio",
            ContentType::Document => "document",
        }
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Confirmed,
    Failed { reason: String },
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Message {
    pub id: String,
    pub conversation: ConversationKey,
    pub direction: Direction,
    pub content_type: ContentType,
    pub content: String,
    pub media_ref: Option<String>,
    pub timestamp: i64,
    pub delivery: DeliveryState,
}

impl Message {
    pub fn new_local_id() -> String {
        format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::new_v4())
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct CanonicalContact {
    pub platform: Platform,
    pub canonical_key: String,
    pub display_identifier: String,
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    pub message_count: u64,
    pub last_message_time: i64,
    pub is_opaque: bool,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ConversationSummary {
    pub key: ConversationKey,
    pub name: String,
    pub display_identifier: String,
    pub last_message_time: i64,
    pub unread_count: u32,
    pub is_escalated: bool,
    pub has_open_note: bool,
    pub is_ai_blocked: bool,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollTier {
    Fast,
    Slow,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ConversationViewState {
    pub key: ConversationKey,
    pub name: String,
    pub messages: Vec<Message>,
    pub bot_paused: bool,
    pub poll_tier: PollTier,
    pub generation: u64,
}

/// "In flight" flags for fetches the UI should reflect.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub loading_conversations: bool,
    pub loading_contacts: bool,
    pub loading_messages: bool,
    pub sending: u32,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            loading_conversations: false,
            loading_contacts: false,
            loading_messages: false,
            sending: 0,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub busy: BusyState,
    pub conversations: Vec<ConversationSummary>,
    pub contacts: Vec<CanonicalContact>,
    pub current_conversation: Option<ConversationViewState>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            busy: BusyState::idle(),
            conversations: vec![],
            contacts: vec![],
            current_conversation: None,
            toast: None,
        }
    }
}

pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parse_accepts_aliases() {
        assert_eq!(Platform::parse("WA"), Some(Platform::WhatsApp));
        assert_eq!(Platform::parse("telegram"), Some(Platform::Telegram));
        assert_eq!(Platform::parse(" webchat "), Some(Platform::LiveChat));
        assert_eq!(Platform::parse("sms"), None);
    }

    #[test]
    fn local_ids_are_namespaced() {
        let id = Message::new_local_id();
        assert!(id.starts_with(LOCAL_ID_PREFIX));
        assert_ne!(id, Message::new_local_id());
    }

    #[test]
    fn only_non_text_content_is_media() {
        let m = Message {
            id: "wamid.1".into(),
            conversation: ConversationKey::new(Platform::WhatsApp, "01001234567"),
            direction: Direction::Outgoing,
            content_type: ContentType::Text,
            content: "hi".into(),
            media_ref: None,
            timestamp: 1,
            delivery: DeliveryState::Confirmed,
        };
        assert!(!m.content_type.is_media());
        assert!(ContentType::Image.is_media());
        assert!(ContentType::Document.is_media());
    }
}
