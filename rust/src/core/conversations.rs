use std::collections::HashMap;

use super::{AppCore, FetchKind};
use crate::backend::{fetch_all_conversations, BackendError, RawConversation};
use crate::directory::RawContactEntry;
use crate::state::{ConversationKey, ConversationSummary};
use crate::updates::InternalEvent;

impl AppCore {
    /// Fetch the whole conversation list. Only `scheduled` fetches re-arm the
    /// list timer when they land.
    pub(super) fn refresh_conversations(&mut self, scheduled: bool) {
        let page_size = self.config.page_size();
        let max_pages = self.config.max_pages();
        let spawned = self.spawn_backend(move |backend| async move {
            let result = fetch_all_conversations(backend.as_ref(), page_size, max_pages).await;
            InternalEvent::ConversationsFetched { scheduled, result }
        });
        if spawned {
            self.state.busy.loading_conversations = true;
        }
    }

    pub(super) fn refresh_contacts(&mut self) {
        let spawned = self.spawn_backend(|backend| async move {
            let result = backend.fetch_contacts().await;
            InternalEvent::ContactsFetched { result }
        });
        if spawned {
            self.state.busy.loading_contacts = true;
        }
    }

    pub(super) fn handle_conversations_fetched(
        &mut self,
        scheduled: bool,
        result: Result<Vec<RawConversation>, BackendError>,
    ) {
        self.state.busy.loading_conversations = false;
        match result {
            Ok(list) => {
                self.note_fetch_ok(FetchKind::Conversations);
                tracing::debug!(count = list.len(), "conversation list fetched");
                self.raw_conversations = list;
                self.rebuild_conversation_list();
            }
            Err(e) => self.note_fetch_failed(FetchKind::Conversations, e),
        }
        if scheduled {
            self.arm_list_timer();
        }
        self.emit_state();
    }

    pub(super) fn handle_contacts_fetched(
        &mut self,
        result: Result<Vec<RawContactEntry>, BackendError>,
    ) {
        self.state.busy.loading_contacts = false;
        match result {
            Ok(entries) => {
                self.note_fetch_ok(FetchKind::Contacts);
                self.directory.rebuild(&entries);
                self.state.contacts = self.directory.visible();
                tracing::info!(
                    entries = entries.len(),
                    contacts = self.directory.len(),
                    visible = self.state.contacts.len(),
                    "directory refreshed"
                );
                // Newly learned aliases can fold list rows together.
                self.rebuild_conversation_list();
            }
            Err(e) => self.note_fetch_failed(FetchKind::Contacts, e),
        }
        self.emit_state();
    }

    /// Resolve the raw list through the directory, one row per canonical key.
    fn rebuild_conversation_list(&mut self) {
        let mut rows: Vec<ConversationSummary> = Vec::with_capacity(self.raw_conversations.len());
        let mut index: HashMap<ConversationKey, usize> = HashMap::new();
        let mut remote_ids: HashMap<ConversationKey, String> = HashMap::new();

        for raw in &self.raw_conversations {
            let id = self.directory.resolve(raw.platform, &raw.identifier);
            if id.key.is_empty() {
                continue;
            }
            let key = ConversationKey::new(raw.platform, id.key.clone());

            // Route on a dialable raw form when the backend gave us one.
            let dialable = self
                .directory
                .canonicalizer()
                .is_dialable(raw.platform, &raw.identifier);
            match remote_ids.get(&key) {
                Some(_) if !dialable => {}
                _ => {
                    remote_ids.insert(key.clone(), raw.identifier.clone());
                }
            }

            let contact = self.directory.get(raw.platform, &id.key);
            let display_identifier = contact
                .map(|c| c.display_identifier.clone())
                .unwrap_or_else(|| id.display_form.clone());
            let name = raw
                .name
                .clone()
                .or_else(|| contact.and_then(|c| c.display_name.clone()))
                .unwrap_or_else(|| display_identifier.clone());

            match index.get(&key) {
                Some(&i) => {
                    let row = &mut rows[i];
                    if raw.last_message_time > row.last_message_time {
                        row.last_message_time = raw.last_message_time;
                        if raw.name.is_some() {
                            row.name = name;
                        }
                    }
                    row.unread_count = row.unread_count.max(raw.unread_count);
                    row.is_escalated |= raw.is_escalated;
                    row.has_open_note |= raw.has_open_note;
                    row.is_ai_blocked |= raw.is_ai_blocked;
                }
                None => {
                    index.insert(key.clone(), rows.len());
                    rows.push(ConversationSummary {
                        key,
                        name,
                        display_identifier,
                        last_message_time: raw.last_message_time,
                        unread_count: raw.unread_count,
                        is_escalated: raw.is_escalated,
                        has_open_note: raw.has_open_note,
                        is_ai_blocked: raw.is_ai_blocked,
                    });
                }
            }
        }

        rows.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));

        if let Some(view) = self.state.current_conversation.as_mut() {
            if let Some(row) = rows.iter().find(|r| r.key == view.key) {
                view.name = row.name.clone();
            }
        }
        self.remote_ids = remote_ids;
        self.state.conversations = rows;
    }
}
