mod actions;
pub mod backend;
mod core;
pub mod directory;
mod error;
pub mod identity;
mod logging;
pub mod reconcile;
pub mod scheduler;
mod state;
pub mod store;
mod updates;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use backend::{Backend, BackendError, HttpBackend};
pub use crate::core::{load_app_config, AppConfig, CONFIG_FILE};
pub use error::ConsoleError;
pub use identity::CanonicalIdentity;
pub use state::*;
pub use updates::*;

/// Canonical identity of a raw transport identifier under the default number plan.
#[uniffi::export]
pub fn canonicalize_identifier(raw: &str) -> CanonicalIdentity {
    identity::Canonicalizer::default().canonicalize(raw)
}

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

#[derive(uniffi::Object)]
pub struct FfiApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
    shared_logs: crate::core::SharedLogs,
}

#[uniffi::export]
impl FfiApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String) -> Arc<Self> {
        Self::spawn(data_dir, None)
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }

    /// Ordered, de-duplicated log for `key` as of the last published state.
    pub fn visible_log(&self, key: ConversationKey) -> Vec<Message> {
        let read = |logs: &HashMap<ConversationKey, Vec<Message>>| {
            logs.get(&key).cloned().unwrap_or_default()
        };
        match self.shared_logs.read() {
            Ok(g) => read(&g),
            Err(poison) => read(&poison.into_inner()),
        }
    }

    /// Contacts shown to the operator, most recent first.
    pub fn contact_list(&self) -> Vec<CanonicalContact> {
        self.state().contacts
    }
}

impl FfiApp {
    /// Start the actor against an injected backend instead of the configured
    /// HTTP one. Used by the CLI and tests.
    pub fn with_backend(data_dir: String, backend: Arc<dyn Backend>) -> Arc<Self> {
        Self::spawn(data_dir, Some(backend))
    }

    fn spawn(data_dir: String, backend: Option<Arc<dyn Backend>>) -> Arc<Self> {
        logging::init_logging(&data_dir);
        tracing::info!(data_dir = %data_dir, "FfiApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));
        let shared_logs: crate::core::SharedLogs = Arc::new(RwLock::new(HashMap::new()));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        let logs_for_core = shared_logs.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                shared_for_core,
                logs_for_core,
                backend,
            );
            core.start();
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            shared_logs,
        })
    }
}

uniffi::setup_scaffolding!();
