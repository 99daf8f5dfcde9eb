use crate::state::{ContentType, ConversationKey};

#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Conversations
    SelectConversation {
        key: ConversationKey,
    },
    CloseConversation,
    RefreshConversations,
    RefreshMessages,

    // Sending
    SendMessage {
        key: ConversationKey,
        content: String,
    },
    SendMedia {
        key: ConversationKey,
        content_type: ContentType,
        /// Local preview (file path or blob URL) shown until the server answers.
        local_ref: String,
        caption: Option<String>,
    },

    // Bot overlay
    SetBotPaused {
        key: ConversationKey,
        paused: bool,
    },

    // Directory
    RefreshContacts,

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes message bodies).
    pub fn tag(&self) -> &'static str {
        match self {
            // Conversations
            AppAction::SelectConversation { .. } => "SelectConversation",
            AppAction::CloseConversation => "CloseConversation",
            AppAction::RefreshConversations => "RefreshConversations",
            AppAction::RefreshMessages => "RefreshMessages",

            // Sending
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::SendMedia { .. } => "SendMedia",

            // Bot overlay
            AppAction::SetBotPaused { .. } => "SetBotPaused",

            // Directory
            AppAction::RefreshContacts => "RefreshContacts",

            // UI
            AppAction::ClearToast => "ClearToast",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
        }
    }
}
