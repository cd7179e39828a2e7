use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::{ApiClient, Backend};
use crate::config::ClientConfig;
use crate::crypto::{load_or_create_device_secret, Sealer};
use crate::error::{Error, Result};
use crate::events::{ClientEvent, EventBus};
use crate::exchange::{EncryptionState, KeyExchange};
use crate::models::{Identity, SharedKeyRecord};
use crate::selector::Conversation;
use crate::session::{SessionStore, Storage};

/// Everything the components share. Only ever touched under `Inner::state`,
/// and never across an `.await`, so each transition applies as a whole.
pub(crate) struct ClientState {
    pub(crate) session: SessionStore,
    pub(crate) exchange: KeyExchange,
    pub(crate) conversation: Option<Conversation>,
    next_generation: u64,
}

impl ClientState {
    pub(crate) fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

pub(crate) struct Inner {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) poll_interval: Duration,
    pub(crate) state: Mutex<ClientState>,
    /// The single live polling task. Lock order: `poller` before `state`.
    pub(crate) poller: Mutex<Option<JoinHandle<()>>>,
    pub(crate) events: EventBus,
}

/// Client facade: session, key exchange, conversation selection and sync.
///
/// Selecting a conversation spawns its polling task, so `select` must be
/// called from within a tokio runtime.
pub struct Messenger {
    pub(crate) inner: Arc<Inner>,
}

impl Messenger {
    pub fn new(backend: Arc<dyn Backend>, session: SessionStore, poll_interval: Duration) -> Self {
        let mut exchange = KeyExchange::new();
        if let Some(username) = session.username() {
            exchange.rehydrate(username, session.keys());
            info!(%username, keys = session.key_count(), "restored session");
        }

        Self {
            inner: Arc::new(Inner {
                backend,
                poll_interval,
                state: Mutex::new(ClientState {
                    session,
                    exchange,
                    conversation: None,
                    next_generation: 0,
                }),
                poller: Mutex::new(None),
                events: EventBus::new(),
            }),
        }
    }

    /// Build the production client: REST backend, sealed SQLite store, restored session.
    pub fn open(config: &ClientConfig) -> Result<Self> {
        let backend = ApiClient::new(config).map_err(Error::Http)?;
        let secret = load_or_create_device_secret(&config.data_dir)?;
        let storage = Storage::open_or_recreate(&config.database_path(), Sealer::new(secret))?;
        let session = SessionStore::restore(storage);
        Ok(Self::new(Arc::new(backend), session, config.poll_interval))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.state.lock().session.identity().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().session.is_authenticated()
    }

    pub fn shared_keys(&self) -> Vec<SharedKeyRecord> {
        self.inner.state.lock().session.keys().cloned().collect()
    }

    /// Every peer whose state is not `None`.
    pub fn encryption_states(&self) -> HashMap<String, EncryptionState> {
        self.inner.state.lock().exchange.states()
    }

    pub fn encryption_state_of(&self, peer: &str) -> EncryptionState {
        self.inner.state.lock().exchange.state(peer)
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        self.inner.stop_polling();
    }
}
