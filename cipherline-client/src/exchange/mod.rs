mod state;

pub use state::{EncryptionState, KeyExchange, PendingExchange};

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::api::PublicValue;
use crate::error::{ApiError, Error, HandshakeError, Result, StorageError};
use crate::events::ClientEvent;
use crate::messenger::{ClientState, Inner, Messenger};
use crate::models::{Participants, SharedKeyRecord};

impl Inner {
    /// Emit `EncryptionChanged` for every peer whose state differs.
    pub(crate) fn announce_states(
        &self,
        before: HashMap<String, EncryptionState>,
        after: HashMap<String, EncryptionState>,
    ) {
        for (peer, state) in &after {
            if before.get(peer) != Some(state) {
                self.announce(peer, *state);
            }
        }
        for peer in before.keys().filter(|peer| !after.contains_key(*peer)) {
            self.announce(peer, EncryptionState::None);
        }
    }

    fn announce(&self, peer: &str, state: EncryptionState) {
        self.events.emit(ClientEvent::EncryptionChanged {
            peer: peer.to_string(),
            state,
        });
    }

    /// Drop `peer` back to `None`. Only valid while no key record exists.
    fn revert(&self, st: &mut ClientState, peer: &str) {
        if st.exchange.state(peer) != EncryptionState::None {
            st.exchange.mark_none(peer);
            self.announce(peer, EncryptionState::None);
        }
    }

    /// Remove the key shared with `peer`, clear its state and, if it is the
    /// active conversation, its messages.
    pub(crate) fn discard_key(&self, st: &mut ClientState, peer: &str) {
        if let Err(e) = st.session.remove_key_with(peer) {
            self.report_storage_failure(e);
        }
        self.revert(st, peer);
        self.clear_messages_if_active(st, peer);
    }

    pub(crate) fn report_storage_failure(&self, err: StorageError) {
        warn!(error = %err, "failed to update local key storage");
        self.events.error("Failed to update local key storage");
    }
}

/// Validate `peer` against the logged-in user and return the local username.
pub(crate) fn check_peer(st: &ClientState, peer: &str) -> Result<String> {
    let local = st.session.username().ok_or(Error::NotAuthenticated)?;
    if peer.is_empty() {
        return Err(HandshakeError::EmptyPeer.into());
    }
    if peer == local {
        return Err(HandshakeError::SelfExchange.into());
    }
    Ok(local.to_string())
}

impl Messenger {
    /// Ask the backend for this side's public value and wait for the peer's.
    ///
    /// On an `Established` peer the old key is discarded first.
    pub async fn initiate(&self, peer: &str) -> Result<PublicValue> {
        let peer = peer.trim();
        let attempt = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            check_peer(st, peer)?;

            if st.exchange.state(peer) == EncryptionState::Established {
                info!(%peer, "discarding established key before re-keying");
                self.inner.discard_key(st, peer);
            }
            st.exchange.begin_attempt(peer)
        };

        let result = self.inner.backend.start_dh(peer).await;

        let mut guard = self.inner.state.lock();
        let st = &mut *guard;
        if !st.exchange.is_current(peer, attempt) {
            debug!(%peer, attempt, "dropping superseded initiate response");
            return Err(HandshakeError::Superseded(peer.to_string()).into());
        }

        let result = result.and_then(|value| {
            if value.is_empty() {
                Err(ApiError::Decode("empty public value".to_string()))
            } else {
                Ok(value)
            }
        });

        match result {
            Ok(value) => {
                st.exchange.mark_in_progress(
                    peer,
                    PendingExchange {
                        public_value: value.clone(),
                        started_at: Utc::now(),
                    },
                );
                self.inner.announce(peer, EncryptionState::InProgress);
                info!(%peer, "key exchange initiated");
                self.inner
                    .events
                    .success("Encryption initiated, waiting for peer to complete");
                Ok(value)
            }
            Err(source) => {
                self.inner.revert(st, peer);
                warn!(%peer, error = %source, "initiate failed");
                self.inner.events.error("Failed to initiate encryption");
                Err(HandshakeError::Initiate {
                    peer: peer.to_string(),
                    source,
                }
                .into())
            }
        }
    }

    /// Submit the peer's public value. Consumes the pending exchange whatever
    /// the outcome; a failure leaves the peer at `None`.
    pub async fn complete(&self, peer: &str, peer_value: &str) -> Result<()> {
        let peer = peer.trim();
        let peer_value = PublicValue::new(peer_value);
        let attempt = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            check_peer(st, peer)?;

            if st.exchange.take_pending(peer).is_none() {
                return Err(HandshakeError::NoPendingExchange(peer.to_string()).into());
            }
            if peer_value.is_empty() {
                self.inner.revert(st, peer);
                self.inner.events.error("Failed to establish encryption");
                return Err(HandshakeError::EmptyPublicValue.into());
            }
            st.exchange.begin_attempt(peer)
        };

        let result = self.inner.backend.complete_dh(peer, &peer_value).await;

        let mut guard = self.inner.state.lock();
        let st = &mut *guard;
        if !st.exchange.is_current(peer, attempt) {
            debug!(%peer, attempt, "dropping superseded completion");
            return Err(HandshakeError::Superseded(peer.to_string()).into());
        }

        match result {
            Ok(key) => {
                let participants = st
                    .session
                    .username()
                    .and_then(|local| Participants::new(local, peer))
                    .ok_or_else(|| HandshakeError::Superseded(peer.to_string()))?;
                let server_held = key.is_server_held();
                if let Err(e) = st
                    .session
                    .insert_key(SharedKeyRecord::new(participants, key))
                {
                    self.inner.report_storage_failure(e);
                }
                st.exchange.mark_established(peer);
                self.inner.announce(peer, EncryptionState::Established);
                info!(%peer, server_held, "key exchange completed");
                self.inner
                    .events
                    .success("End-to-end encryption established");
                Ok(())
            }
            Err(source) => {
                self.inner.revert(st, peer);
                warn!(%peer, error = %source, "completion failed");
                self.inner.events.error("Failed to establish encryption");
                Err(HandshakeError::Complete {
                    peer: peer.to_string(),
                    source,
                }
                .into())
            }
        }
    }

    /// Forget the key shared with `peer` so a new exchange can start.
    /// Any handshake step still in flight for `peer` is superseded.
    pub fn reset(&self, peer: &str) -> Result<()> {
        let peer = peer.trim();
        {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            check_peer(st, peer)?;

            st.exchange.begin_attempt(peer);
            self.inner.discard_key(st, peer);
        }
        info!(%peer, "encryption reset");
        self.inner
            .events
            .info("Encryption reset. You'll need to establish a new secure connection.");
        Ok(())
    }

    /// This side's public value for `peer`, to hand over out of band.
    pub fn pending_exchange(&self, peer: &str) -> Option<PendingExchange> {
        self.inner.state.lock().exchange.pending(peer.trim()).cloned()
    }
}
