use std::time::Duration;

use tokio::task::JoinHandle;

use super::AppCore;
use crate::scheduler::Generation;
use crate::updates::{CoreMsg, InternalEvent, PollTarget};

/// Armed one-shot timers. Each chain has at most one outstanding timer;
/// the next one is armed only when the fetch it triggered has landed.
#[derive(Default)]
pub(super) struct PollTimers {
    list: Option<JoinHandle<()>>,
    messages: Option<JoinHandle<()>>,
}

impl PollTimers {
    fn cancel_messages(&mut self) {
        if let Some(h) = self.messages.take() {
            h.abort();
        }
    }
}

impl AppCore {
    fn arm_timer(&self, delay: Duration, target: PollTarget) -> JoinHandle<()> {
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::PollTick(target))));
        })
    }

    pub(super) fn arm_list_timer(&mut self) {
        if let Some(h) = self.timers.list.take() {
            h.abort();
        }
        let delay = self.scheduler.conversation_delay();
        self.timers.list = Some(self.arm_timer(delay, PollTarget::ConversationList));
    }

    /// Arm the next message tick for `generation` at the current tier's delay.
    pub(super) fn arm_message_timer(&mut self, generation: Generation) {
        self.timers.cancel_messages();
        if !self.scheduler.generation_is_current(generation) {
            return;
        }
        let Some(delay) = self.scheduler.message_delay() else {
            return;
        };
        tracing::trace!(generation = generation.0, ?delay, "arming message tick");
        self.timers.messages = Some(self.arm_timer(delay, PollTarget::Messages { generation }));
    }

    /// Tier changed while a tick is waiting: restart it at the new delay.
    /// If the tick already fired its fetch is in flight and will re-arm itself.
    pub(super) fn retime_message_timer(&mut self) {
        if self.timers.messages.is_some() {
            let generation = self.scheduler.generation();
            self.arm_message_timer(generation);
        }
    }

    pub(super) fn cancel_message_timer(&mut self) {
        self.timers.cancel_messages();
    }

    pub(super) fn handle_poll_tick(&mut self, target: PollTarget) {
        match target {
            PollTarget::ConversationList => {
                self.timers.list = None;
                self.refresh_conversations(true);
            }
            PollTarget::Messages { generation } => {
                // Aborting a sleeping task can still race a tick already queued.
                if !self.scheduler.generation_is_current(generation) {
                    tracing::debug!(generation = generation.0, "stale message tick dropped");
                    return;
                }
                self.timers.messages = None;
                self.poll_current_conversation(generation);
            }
        }
    }
}
