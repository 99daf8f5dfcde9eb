use crate::backend::{BackendError, BotStatus, RawConversation, SendReceipt};
use crate::directory::RawContactEntry;
use crate::scheduler::Generation;
use crate::state::{AppState, ConversationKey, Message};
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Why a message fetch was issued. Only `Tick` fetches re-arm the poll timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchOrigin {
    Tick,
    Manual,
    AfterSend,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollTarget {
    ConversationList,
    Messages { generation: Generation },
}

#[derive(Debug)]
pub enum InternalEvent {
    // Timers
    PollTick(PollTarget),

    // Async results
    ConversationsFetched {
        scheduled: bool,
        result: Result<Vec<RawConversation>, BackendError>,
    },
    ContactsFetched {
        result: Result<Vec<RawContactEntry>, BackendError>,
    },
    MessagesFetched {
        generation: Generation,
        key: ConversationKey,
        origin: FetchOrigin,
        result: Result<Vec<Message>, BackendError>,
    },
    BotStatusFetched {
        generation: Generation,
        key: ConversationKey,
        /// Answer to an operator's pause/resume rather than a poll.
        requested: bool,
        result: Result<BotStatus, BackendError>,
    },
    SendCompleted {
        key: ConversationKey,
        local_id: String,
        result: Result<SendReceipt, BackendError>,
    },
}
