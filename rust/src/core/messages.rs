use super::{AppCore, FetchKind};
use crate::backend::{BackendError, BotStatus, OutgoingMessage, SendReceipt};
use crate::error::ConsoleError;
use crate::scheduler::Generation;
use crate::state::{
    now_millis, ContentType, ConversationKey, ConversationViewState, DeliveryState, Direction,
    Message, PollTier,
};
use crate::updates::{FetchOrigin, InternalEvent};

impl AppCore {
    pub(super) fn select_conversation(&mut self, key: ConversationKey) {
        self.cancel_message_timer();
        let generation = self.scheduler.select(key.clone());
        tracing::info!(conversation = %key, generation = generation.0, "select");

        let name = self
            .state
            .conversations
            .iter()
            .find(|c| c.key == key)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| key.contact_id.clone());
        self.state.current_conversation = Some(ConversationViewState {
            key: key.clone(),
            name,
            messages: self.store.log(&key).to_vec(),
            bot_paused: false,
            poll_tier: self.scheduler.tier().unwrap_or(PollTier::Slow),
            generation: generation.0,
        });

        // The initial fetch starts this selection's tick chain.
        self.state.busy.loading_messages = self.fetch_messages(generation, &key, FetchOrigin::Tick);
        self.fetch_bot_status(generation, &key);
        self.emit_state();
    }

    pub(super) fn close_conversation(&mut self) {
        self.cancel_message_timer();
        if let Some(closed) = self.scheduler.close() {
            tracing::info!(generation = closed.0, "close");
        }
        self.state.busy.loading_messages = false;
        if self.state.current_conversation.take().is_some() {
            self.emit_state();
        }
    }

    pub(super) fn refresh_current_messages(&mut self) {
        let Some(key) = self.scheduler.current_key().cloned() else {
            return;
        };
        let generation = self.scheduler.generation();
        self.fetch_messages(generation, &key, FetchOrigin::Manual);
    }

    pub(super) fn poll_current_conversation(&mut self, generation: Generation) {
        let Some(key) = self.scheduler.current_key().cloned() else {
            return;
        };
        if self.fetch_messages(generation, &key, FetchOrigin::Tick) {
            self.fetch_bot_status(generation, &key);
        }
    }

    fn fetch_messages(
        &mut self,
        generation: Generation,
        key: &ConversationKey,
        origin: FetchOrigin,
    ) -> bool {
        let conv = self.conversation_ref(key);
        let key = key.clone();
        self.spawn_backend(move |backend| async move {
            let result = backend.fetch_messages(&conv).await;
            InternalEvent::MessagesFetched {
                generation,
                key,
                origin,
                result,
            }
        })
    }

    fn fetch_bot_status(&mut self, generation: Generation, key: &ConversationKey) {
        let conv = self.conversation_ref(key);
        let key = key.clone();
        self.spawn_backend(move |backend| async move {
            let result = backend.fetch_bot_status(&conv).await;
            InternalEvent::BotStatusFetched {
                generation,
                key,
                requested: false,
                result,
            }
        });
    }

    pub(super) fn handle_messages_fetched(
        &mut self,
        generation: Generation,
        key: ConversationKey,
        origin: FetchOrigin,
        result: Result<Vec<Message>, BackendError>,
    ) {
        if !self.scheduler.accepts(generation, &key) {
            tracing::debug!(
                conversation = %key,
                generation = generation.0,
                live = self.scheduler.generation().0,
                "stale message fetch dropped"
            );
            return;
        }

        self.state.busy.loading_messages = false;
        match result {
            Ok(batch) => {
                self.note_fetch_ok(FetchKind::Messages);
                let stats = self.store.apply_server_batch(&key, &batch);
                tracing::debug!(
                    conversation = %key,
                    fetched = batch.len(),
                    matched = stats.matched,
                    appended = stats.appended,
                    pending = stats.pending,
                    "messages reconciled"
                );
                self.publish_log(&key);
            }
            Err(e) => self.note_fetch_failed(FetchKind::Messages, e),
        }

        if origin == FetchOrigin::Tick {
            self.arm_message_timer(generation);
        }
        self.emit_state();
    }

    pub(super) fn request_bot_paused(&mut self, key: ConversationKey, paused: bool) {
        let generation = self.scheduler.generation();
        let conv = self.conversation_ref(&key);
        let spawned = self.spawn_backend(move |backend| async move {
            let result = backend.set_bot_paused(&conv, paused).await;
            InternalEvent::BotStatusFetched {
                generation,
                key,
                requested: true,
                result,
            }
        });
        if !spawned {
            self.toast("Bot control unavailable while offline");
        }
    }

    pub(super) fn handle_bot_status(
        &mut self,
        generation: Generation,
        key: ConversationKey,
        requested: bool,
        result: Result<BotStatus, BackendError>,
    ) {
        let status = match result {
            Ok(status) => status,
            Err(e) if requested => {
                tracing::warn!(conversation = %key, %e, "bot pause request failed");
                self.toast(format!("Could not update bot: {e}"));
                return;
            }
            Err(e) => {
                self.note_fetch_failed(FetchKind::BotStatus, e);
                return;
            }
        };
        if !requested {
            self.note_fetch_ok(FetchKind::BotStatus);
        }
        if !self.scheduler.accepts(generation, &key) {
            tracing::debug!(conversation = %key, generation = generation.0, "stale bot status dropped");
            return;
        }
        if !self.scheduler.set_bot_paused(status.paused) {
            return;
        }
        tracing::info!(conversation = %key, paused = status.paused, "bot status changed");
        let tier = self.scheduler.tier().unwrap_or(PollTier::Slow);
        if let Some(view) = self.state.current_conversation.as_mut() {
            view.bot_paused = status.paused;
            view.poll_tier = tier;
        }
        self.retime_message_timer();
        self.emit_state();
    }

    pub(super) fn send_text(&mut self, key: ConversationKey, content: String) {
        if content.trim().is_empty() {
            return;
        }
        self.send_outgoing(
            key,
            OutgoingMessage {
                content_type: ContentType::Text,
                content,
                media_ref: None,
            },
        );
    }

    pub(super) fn send_media(
        &mut self,
        key: ConversationKey,
        content_type: ContentType,
        local_ref: String,
        caption: Option<String>,
    ) {
        if !content_type.is_media() || local_ref.trim().is_empty() {
            self.toast("Nothing to send");
            return;
        }
        self.send_outgoing(
            key,
            OutgoingMessage {
                content_type,
                content: caption.unwrap_or_default(),
                media_ref: Some(local_ref),
            },
        );
    }

    fn send_outgoing(&mut self, key: ConversationKey, outgoing: OutgoingMessage) {
        let local_id = Message::new_local_id();
        self.store.insert_optimistic(Message {
            id: local_id.clone(),
            conversation: key.clone(),
            direction: Direction::Outgoing,
            content_type: outgoing.content_type,
            content: outgoing.content.clone(),
            media_ref: outgoing.media_ref.clone(),
            timestamp: now_millis(),
            delivery: DeliveryState::Pending,
        });
        self.publish_log(&key);
        self.state.busy.sending += 1;

        let conv = self.conversation_ref(&key);
        let task_key = key.clone();
        let task_id = local_id.clone();
        let spawned = self.spawn_backend(move |backend| async move {
            let result = backend.send_message(&conv, &outgoing).await;
            InternalEvent::SendCompleted {
                key: task_key,
                local_id: task_id,
                result,
            }
        });
        if spawned {
            self.emit_state();
        } else {
            self.handle_send_completed(
                key,
                local_id,
                Err(BackendError::Transient("offline".into())),
            );
        }
    }

    pub(super) fn handle_send_completed(
        &mut self,
        key: ConversationKey,
        local_id: String,
        result: Result<SendReceipt, BackendError>,
    ) {
        self.state.busy.sending = self.state.busy.sending.saturating_sub(1);
        match result {
            Ok(receipt) => {
                tracing::info!(conversation = %key, server_id = ?receipt.id, "send accepted");
                self.apply_receipt(&key, &local_id, receipt);
                self.publish_log(&key);
                // Pull the server copy now rather than waiting for the next tick.
                if self.scheduler.current_key() == Some(&key) {
                    let generation = self.scheduler.generation();
                    self.fetch_messages(generation, &key, FetchOrigin::AfterSend);
                }
                self.emit_state();
            }
            Err(e) => {
                tracing::warn!(conversation = %key, %e, "send failed");
                self.store.remove(&key, &local_id);
                self.publish_log(&key);
                let err = ConsoleError::send_failure(&e);
                match err.user_visible_message() {
                    Some(msg) => self.toast(msg),
                    None => self.emit_state(),
                }
            }
        }
    }

    /// Tie the optimistic entry to what the server told us about it.
    fn apply_receipt(&mut self, key: &ConversationKey, local_id: &str, receipt: SendReceipt) {
        let SendReceipt { id, media_url } = receipt;
        let target = match id {
            Some(server_id) if !server_id.trim().is_empty() => {
                if self.store.assign_server_id(key, local_id, &server_id) {
                    server_id
                } else if self.store.contains(key, &server_id) {
                    // A poll got the server copy first; both rows are this send.
                    if self.store.fold_pending_into(key, local_id, &server_id) {
                        tracing::debug!(conversation = %key, %server_id, "pending entry folded into polled copy");
                    }
                    server_id
                } else {
                    local_id.to_string()
                }
            }
            _ => local_id.to_string(),
        };
        if let Some(url) = media_url.filter(|u| !u.trim().is_empty()) {
            self.store.set_media_ref(key, &target, url);
        }
    }
}
