//! When to poll, and which in-flight results still count.
//!
//! The actor owns one [`PollScheduler`]. Selecting a conversation moves it to
//! `Polling` and bumps the selection generation; every fetch and timer
//! captures the generation it was issued under and its result is dropped if
//! the generation has moved on by the time it lands.

use std::time::Duration;

use crate::state::{ConversationKey, PollTier};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u64);

#[derive(Debug, Default)]
pub struct GenerationGuard {
    live: u64,
}

impl GenerationGuard {
    pub fn advance(&mut self) -> Generation {
        self.live += 1;
        Generation(self.live)
    }

    pub fn current(&self) -> Generation {
        Generation(self.live)
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        generation.0 == self.live
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollIntervals {
    pub conversations: Duration,
    pub fast: Duration,
    pub slow: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            conversations: Duration::from_secs(10),
            fast: Duration::from_secs(3),
            slow: Duration::from_secs(15),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Polling {
        key: ConversationKey,
        bot_paused: bool,
    },
}

#[derive(Debug)]
pub struct PollScheduler {
    intervals: PollIntervals,
    guard: GenerationGuard,
    phase: PollPhase,
}

impl PollScheduler {
    pub fn new(intervals: PollIntervals) -> Self {
        Self {
            intervals,
            guard: GenerationGuard::default(),
            phase: PollPhase::Idle,
        }
    }

    pub fn phase(&self) -> &PollPhase {
        &self.phase
    }

    pub fn generation(&self) -> Generation {
        self.guard.current()
    }

    pub fn current_key(&self) -> Option<&ConversationKey> {
        match &self.phase {
            PollPhase::Polling { key, .. } => Some(key),
            PollPhase::Idle => None,
        }
    }

    /// Enter `Polling` for `key`. Always opens a new generation so anything
    /// issued for the previous selection is orphaned.
    pub fn select(&mut self, key: ConversationKey) -> Generation {
        self.phase = PollPhase::Polling {
            key,
            bot_paused: false,
        };
        self.guard.advance()
    }

    /// Back to `Idle`. Returns the generation that was closed, if any.
    pub fn close(&mut self) -> Option<Generation> {
        if self.phase == PollPhase::Idle {
            return None;
        }
        let closed = self.guard.current();
        self.phase = PollPhase::Idle;
        self.guard.advance();
        Some(closed)
    }

    /// Whether `generation` is still the live selection.
    pub fn generation_is_current(&self, generation: Generation) -> bool {
        self.guard.is_current(generation) && self.phase != PollPhase::Idle
    }

    /// Whether a result issued under `generation` for `key` may touch state.
    pub fn accepts(&self, generation: Generation, key: &ConversationKey) -> bool {
        self.guard.is_current(generation) && self.current_key() == Some(key)
    }

    /// Record the bot-pause flag. Returns `true` when the poll tier changed.
    pub fn set_bot_paused(&mut self, paused: bool) -> bool {
        match &mut self.phase {
            PollPhase::Polling { bot_paused, .. } if *bot_paused != paused => {
                *bot_paused = paused;
                true
            }
            _ => false,
        }
    }

    pub fn bot_paused(&self) -> bool {
        matches!(
            self.phase,
            PollPhase::Polling {
                bot_paused: true,
                ..
            }
        )
    }

    pub fn tier(&self) -> Option<PollTier> {
        match self.phase {
            PollPhase::Idle => None,
            // A paused bot means a human is answering; keep latency low.
            PollPhase::Polling {
                bot_paused: true, ..
            } => Some(PollTier::Fast),
            PollPhase::Polling { .. } => Some(PollTier::Slow),
        }
    }

    pub fn message_delay(&self) -> Option<Duration> {
        self.tier().map(|tier| match tier {
            PollTier::Fast => self.intervals.fast,
            PollTier::Slow => self.intervals.slow,
        })
    }

    pub fn conversation_delay(&self) -> Duration {
        self.intervals.conversations
    }
}
