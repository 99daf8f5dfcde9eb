mod config;
mod conversations;
mod messages;
mod polling;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::backend::{Backend, BackendError, ConversationRef, HttpBackend, RawConversation};
use crate::directory::ContactDirectory;
use crate::error::ConsoleError;
use crate::scheduler::PollScheduler;
use crate::state::{AppState, ConversationKey, Message};
use crate::store::MessageStore;
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

pub use config::{load_app_config, AppConfig, CONFIG_FILE};

/// Per-conversation visible logs, published by the actor for synchronous reads.
pub type SharedLogs = Arc<RwLock<HashMap<ConversationKey, Vec<Message>>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum FetchKind {
    Conversations,
    Contacts,
    Messages,
    BotStatus,
}

impl FetchKind {
    fn as_str(&self) -> &'static str {
        match self {
            FetchKind::Conversations => "conversations",
            FetchKind::Contacts => "contacts",
            FetchKind::Messages => "messages",
            FetchKind::BotStatus => "bot_status",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FetchKind::BotStatus => "bot status",
            other => other.as_str(),
        }
    }
}

pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,
    shared_logs: SharedLogs,

    config: AppConfig,
    runtime: tokio::runtime::Runtime,
    backend: Option<Arc<dyn Backend>>,

    directory: ContactDirectory,
    store: MessageStore,
    scheduler: PollScheduler,
    timers: polling::PollTimers,

    // Last raw list from the backend; re-resolved whenever the directory changes.
    raw_conversations: Vec<RawConversation>,
    // canonical key -> identifier the backend routes on
    remote_ids: HashMap<ConversationKey, String>,
    // consecutive transient failures per fetch kind
    failures: HashMap<FetchKind, u32>,
    // kinds whose current rejection has already been toasted
    rejected: HashSet<FetchKind>,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        shared_logs: SharedLogs,
        backend: Option<Arc<dyn Backend>>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let state = AppState::empty();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let backend = backend.or_else(|| http_backend_from_config(&config));
        if backend.is_none() {
            tracing::warn!("no backend configured; running offline");
        }

        let this = Self {
            state,
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            shared_logs,
            directory: ContactDirectory::new(config.canonicalizer()),
            store: MessageStore::new(config.match_policy()),
            scheduler: PollScheduler::new(config.poll_intervals()),
            timers: polling::PollTimers::default(),
            config,
            runtime,
            backend,
            raw_conversations: Vec::new(),
            remote_ids: HashMap::new(),
            failures: HashMap::new(),
            rejected: HashSet::new(),
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    /// Kick off the first directory and list fetches. The list fetch starts
    /// the conversation-list tick chain.
    pub fn start(&mut self) {
        if self.backend.is_none() {
            return;
        }
        self.refresh_contacts();
        self.refresh_conversations(true);
        self.emit_state();
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Keep toast in state until the UI explicitly clears it.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }

    /// Copy the store's log for `key` into the published map and, when it is
    /// the open conversation, into the state snapshot. Does not emit.
    fn publish_log(&mut self, key: &ConversationKey) {
        let log = self.store.log(key).to_vec();
        if let Some(view) = self.state.current_conversation.as_mut() {
            if &view.key == key {
                view.messages = log.clone();
            }
        }
        match self.shared_logs.write() {
            Ok(mut g) => {
                g.insert(key.clone(), log);
            }
            Err(poison) => {
                poison.into_inner().insert(key.clone(), log);
            }
        }
    }

    fn conversation_ref(&self, key: &ConversationKey) -> ConversationRef {
        let remote_id = self.remote_ids.get(key).cloned().unwrap_or_else(|| {
            self.directory
                .canonicalizer()
                .remote_form(key.platform, &key.contact_id)
        });
        ConversationRef {
            key: key.clone(),
            remote_id,
        }
    }

    /// Run `task` against the backend on the runtime and feed its event back
    /// into the actor. Returns `false` when there is no backend.
    fn spawn_backend<F, Fut>(&self, task: F) -> bool
    where
        F: FnOnce(Arc<dyn Backend>) -> Fut,
        Fut: Future<Output = InternalEvent> + Send + 'static,
    {
        let Some(backend) = self.backend.clone() else {
            return false;
        };
        let tx = self.core_sender.clone();
        let fut = task(backend);
        self.runtime.spawn(async move {
            let ev = fut.await;
            let _ = tx.send(CoreMsg::Internal(Box::new(ev)));
        });
        true
    }

    fn note_fetch_ok(&mut self, kind: FetchKind) {
        self.failures.remove(&kind);
        self.rejected.remove(&kind);
    }

    /// Count a failed fetch. State is never cleared. Transient failures toast
    /// once per streak when the streak reaches the configured threshold; a
    /// rejection toasts right away, once until the next success.
    fn note_fetch_failed(&mut self, kind: FetchKind, err: BackendError) {
        if !err.is_transient() {
            tracing::warn!(kind = kind.as_str(), %err, "fetch rejected");
            if self.rejected.insert(kind) {
                let err = ConsoleError::fetch_rejected(kind.label(), &err);
                if let Some(msg) = err.user_visible_message() {
                    self.toast(msg);
                }
            }
            return;
        }
        let streak = {
            let n = self.failures.entry(kind).or_insert(0);
            *n += 1;
            *n
        };
        tracing::warn!(kind = kind.as_str(), streak, %err, "fetch failed");
        if streak == self.config.failure_toast_after() {
            if let Some(msg) = ConsoleError::TransientFetch(err).user_visible_message() {
                self.toast(msg);
            }
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: it can carry message bodies.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::PollTick(target) => self.handle_poll_tick(target),
            InternalEvent::ConversationsFetched { scheduled, result } => {
                self.handle_conversations_fetched(scheduled, result)
            }
            InternalEvent::ContactsFetched { result } => self.handle_contacts_fetched(result),
            InternalEvent::MessagesFetched {
                generation,
                key,
                origin,
                result,
            } => self.handle_messages_fetched(generation, key, origin, result),
            InternalEvent::BotStatusFetched {
                generation,
                key,
                requested,
                result,
            } => self.handle_bot_status(generation, key, requested, result),
            InternalEvent::SendCompleted {
                key,
                local_id,
                result,
            } => self.handle_send_completed(key, local_id, result),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            // Conversations
            AppAction::SelectConversation { key } => self.select_conversation(key),
            AppAction::CloseConversation => self.close_conversation(),
            AppAction::RefreshConversations => {
                self.refresh_conversations(false);
                self.emit_state();
            }
            AppAction::RefreshMessages => {
                self.refresh_current_messages();
                self.emit_state();
            }

            // Sending
            AppAction::SendMessage { key, content } => self.send_text(key, content),
            AppAction::SendMedia {
                key,
                content_type,
                local_ref,
                caption,
            } => self.send_media(key, content_type, local_ref, caption),

            // Bot overlay
            AppAction::SetBotPaused { key, paused } => self.request_bot_paused(key, paused),

            // Directory
            AppAction::RefreshContacts => {
                self.refresh_contacts();
                self.emit_state();
            }

            // UI
            AppAction::ClearToast => {
                if self.state.toast.take().is_some() {
                    self.emit_state();
                }
            }

            // Lifecycle
            AppAction::Foregrounded => {
                self.refresh_contacts();
                self.refresh_conversations(false);
                self.refresh_current_messages();
                self.emit_state();
            }
        }
    }
}

fn http_backend_from_config(config: &AppConfig) -> Option<Arc<dyn Backend>> {
    if !config.network_enabled() {
        return None;
    }
    let base_url = config.base_url()?;
    match HttpBackend::new(&base_url, config.api_token(), config.request_timeout()) {
        Ok(b) => {
            tracing::info!(base_url = %base_url, "using http backend");
            Some(Arc::new(b))
        }
        Err(e) => {
            tracing::error!(base_url = %base_url, %e, "could not build http backend");
            None
        }
    }
}
