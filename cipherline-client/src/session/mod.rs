mod storage;

pub use storage::Storage;

use std::collections::HashMap;

use tracing::{info, warn};

use crate::api::WireSharedKey;
use crate::error::{Error, Result, StorageError};
use crate::events::ClientEvent;
use crate::messenger::Messenger;
use crate::models::{Identity, KeyMaterial, Participants, SharedKeyRecord};

/// Owner of the identity and the shared key set; the single source of truth
/// for whether a pair already has a key.
///
/// Memory is updated first, then mirrored to [`Storage`]. A failed write
/// leaves memory as the caller asked for and reports the error.
pub struct SessionStore {
    storage: Storage,
    identity: Option<Identity>,
    keys: HashMap<Participants, SharedKeyRecord>,
}

impl SessionStore {
    /// Load the persisted session. Anything unreadable is wiped and the store
    /// starts unauthenticated.
    pub fn restore(storage: Storage) -> Self {
        let mut store = Self {
            storage,
            identity: None,
            keys: HashMap::new(),
        };

        match load(&store.storage) {
            Ok(Some((identity, keys))) => {
                store.keys = keys
                    .into_iter()
                    .map(|record| (record.participants.clone(), record))
                    .collect();
                store.identity = Some(identity);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "discarding unreadable persisted session");
                if let Err(e) = store.storage.wipe() {
                    warn!(error = %e, "failed to wipe persisted session");
                }
            }
        }
        store
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn username(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.username.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &SharedKeyRecord> {
        self.keys.values()
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn key_with(&self, peer: &str) -> Option<&SharedKeyRecord> {
        let local = self.username()?;
        self.keys.get(&Participants::new(local, peer)?)
    }

    pub fn has_key_with(&self, peer: &str) -> bool {
        self.key_with(peer).is_some()
    }

    /// Replace identity and key set wholesale.
    pub(crate) fn establish(
        &mut self,
        identity: Identity,
        keys: Vec<SharedKeyRecord>,
    ) -> Result<(), StorageError> {
        self.keys = keys
            .into_iter()
            .map(|record| (record.participants.clone(), record))
            .collect();
        self.identity = Some(identity.clone());

        let records: Vec<SharedKeyRecord> = self.keys.values().cloned().collect();
        self.storage.replace_session(&identity, &records)
    }

    /// Create or overwrite the record for its pair. Ignored when logged out.
    pub(crate) fn insert_key(&mut self, record: SharedKeyRecord) -> Result<(), StorageError> {
        let Some(owner) = self.identity.as_ref().map(|i| i.username.clone()) else {
            return Ok(());
        };
        self.keys.insert(record.participants.clone(), record.clone());
        self.storage.upsert_key(&owner, &record)
    }

    /// Drop the record shared with `peer`. Returns whether one existed.
    pub(crate) fn remove_key_with(&mut self, peer: &str) -> Result<bool, StorageError> {
        let Some(owner) = self.identity.as_ref().map(|i| i.username.clone()) else {
            return Ok(false);
        };
        let Some(participants) = Participants::new(&owner, peer) else {
            return Ok(false);
        };
        if self.keys.remove(&participants).is_none() {
            return Ok(false);
        }
        self.storage.delete_key(&owner, &participants)?;
        Ok(true)
    }

    /// Forget identity and every key, in memory and on disk.
    pub(crate) fn clear(&mut self) -> Result<(), StorageError> {
        self.identity = None;
        self.keys.clear();
        self.storage.wipe()
    }
}

fn load(storage: &Storage) -> Result<Option<(Identity, Vec<SharedKeyRecord>)>, StorageError> {
    let Some(identity) = storage.load_identity()? else {
        return Ok(None);
    };
    let keys = storage.load_keys(&identity.username)?;
    Ok(Some((identity, keys)))
}

/// Keep only the inline keys that name `local` and carry a decodable key.
fn shared_keys_from_login(local: &str, wire: &[WireSharedKey]) -> Vec<SharedKeyRecord> {
    wire.iter()
        .filter_map(|entry| {
            let participants = Participants::from_users(&entry.users)
                .filter(|p| p.contains(local));
            let key = KeyMaterial::from_hex(&entry.aes_key);
            match (participants, key) {
                (Some(participants), Some(key)) => Some(SharedKeyRecord::new(participants, key)),
                _ => {
                    warn!(users = ?entry.users, "skipping malformed shared key from login");
                    None
                }
            }
        })
        .collect()
}

impl Messenger {
    /// Authenticate and replace the local session with the backend's view.
    ///
    /// On failure nothing local changes.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let username = username.trim();
        let response = match self.inner.backend.login(username, password).await {
            Ok(response) => response,
            Err(e) => {
                warn!(%username, error = %e, "login failed");
                self.inner
                    .events
                    .error(format!("Login failed: {}", e.server_message()));
                return Err(Error::Auth(e));
            }
        };

        let keys = shared_keys_from_login(username, &response.shared_keys);
        let identity = Identity::new(username, response.rsa_public_key, response.certificate);

        self.inner.stop_polling();
        let persisted = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;

            if st.conversation.take().is_some() {
                self.inner
                    .events
                    .emit(ClientEvent::ActivePeerChanged { peer: None });
            }
            let before = st.exchange.states();
            st.exchange.clear();
            let persisted = st.session.establish(identity, keys);
            st.exchange.rehydrate(username, st.session.keys());
            self.inner.announce_states(before, st.exchange.states());

            info!(%username, keys = st.session.key_count(), "logged in");
            persisted
        };

        if let Err(e) = persisted {
            warn!(error = %e, "failed to persist session");
            self.inner.events.error("Failed to save session locally");
        }
        self.inner.events.success("Login successful");
        Ok(())
    }

    /// Create an account. Does not log in.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<()> {
        let username = username.trim();
        match self
            .inner
            .backend
            .register(username, email.trim(), password)
            .await
        {
            Ok(()) => {
                info!(%username, "registered");
                self.inner
                    .events
                    .success("Registration successful! Please log in.");
                Ok(())
            }
            Err(e) => {
                warn!(%username, error = %e, "registration failed");
                self.inner
                    .events
                    .error(format!("Registration failed: {}", e.server_message()));
                Err(Error::Registration(e))
            }
        }
    }

    /// Stop polling and wipe identity, keys and every encryption state.
    pub fn logout(&self) {
        self.inner.stop_polling();
        let persisted = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;

            if st.conversation.take().is_some() {
                self.inner
                    .events
                    .emit(ClientEvent::ActivePeerChanged { peer: None });
            }
            let before = st.exchange.states();
            st.exchange.clear();
            let persisted = st.session.clear();
            self.inner.announce_states(before, st.exchange.states());
            persisted
        };

        if let Err(e) = persisted {
            warn!(error = %e, "failed to wipe persisted session");
            self.inner.events.error("Failed to clear local session data");
        }
        info!("logged out");
        self.inner.events.success("Logged out successfully");
    }
}
