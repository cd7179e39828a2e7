use tracing::{info, warn};

use crate::api::PublicValue;
use crate::error::{Error, Result};
use crate::events::ClientEvent;
use crate::exchange::{check_peer, EncryptionState};
use crate::messenger::{ClientState, Inner, Messenger};
use crate::models::{Message, User};

/// The active conversation. Replaced, never reused, when the peer changes.
#[derive(Debug)]
pub(crate) struct Conversation {
    pub(crate) peer: String,
    pub(crate) generation: u64,
    pub(crate) messages: Vec<Message>,
}

/// Snapshot of the active conversation for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView {
    pub peer: String,
    pub messages: Vec<Message>,
    /// Projection of the per-peer table for `peer`.
    pub encryption_state: EncryptionState,
    pub pending_exchange: Option<PublicValue>,
}

impl ClientState {
    pub(crate) fn active_peer(&self) -> Option<&str> {
        self.conversation.as_ref().map(|c| c.peer.as_str())
    }

    /// Whether the conversation activated as `generation` is still the active one.
    pub(crate) fn is_active(&self, generation: u64) -> bool {
        self.conversation
            .as_ref()
            .is_some_and(|c| c.generation == generation)
    }
}

impl Inner {
    pub(crate) fn clear_messages_if_active(&self, st: &mut ClientState, peer: &str) {
        if let Some(conversation) = st.conversation.as_mut().filter(|c| c.peer == peer) {
            conversation.messages.clear();
            self.events.emit(ClientEvent::MessagesUpdated {
                peer: peer.to_string(),
                messages: Vec::new(),
            });
        }
    }
}

impl Messenger {
    /// Make `peer` the active conversation and start polling it.
    ///
    /// Selecting the peer that is already active changes nothing.
    pub fn select(&self, peer: &str) -> Result<()> {
        let peer = peer.trim();
        let mut poller = self.inner.poller.lock();
        let generation = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            check_peer(st, peer)?;

            if st.active_peer() == Some(peer) {
                return Ok(());
            }
            let generation = st.next_generation();
            st.conversation = Some(Conversation {
                peer: peer.to_string(),
                generation,
                messages: Vec::new(),
            });
            generation
        };

        if let Some(previous) = poller.take() {
            previous.abort();
        }
        *poller = Some(self.inner.spawn_poller(peer.to_string(), generation));
        drop(poller);

        info!(%peer, "conversation selected");
        self.inner.events.emit(ClientEvent::ActivePeerChanged {
            peer: Some(peer.to_string()),
        });
        self.inner.events.emit(ClientEvent::MessagesUpdated {
            peer: peer.to_string(),
            messages: Vec::new(),
        });
        Ok(())
    }

    /// Leave the active conversation, if any.
    pub fn deselect(&self) {
        self.inner.stop_polling();
        if self.inner.state.lock().conversation.take().is_some() {
            self.inner
                .events
                .emit(ClientEvent::ActivePeerChanged { peer: None });
        }
    }

    pub fn active_peer(&self) -> Option<String> {
        self.inner.state.lock().active_peer().map(str::to_string)
    }

    pub fn conversation(&self) -> Option<ConversationView> {
        let st = self.inner.state.lock();
        let conversation = st.conversation.as_ref()?;
        Some(ConversationView {
            peer: conversation.peer.clone(),
            messages: conversation.messages.clone(),
            encryption_state: st.exchange.state(&conversation.peer),
            pending_exchange: st
                .exchange
                .pending(&conversation.peer)
                .map(|p| p.public_value.clone()),
        })
    }

    /// Encryption state of the active peer; `None` when nothing is selected.
    pub fn encryption_state(&self) -> EncryptionState {
        let st = self.inner.state.lock();
        st.active_peer()
            .map(|peer| st.exchange.state(peer))
            .unwrap_or_default()
    }

    /// Every registered user except the local one.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let local = self
            .inner
            .state
            .lock()
            .session
            .username()
            .map(str::to_string)
            .ok_or(Error::NotAuthenticated)?;

        match self.inner.backend.list_users().await {
            Ok(users) => Ok(users.into_iter().filter(|u| u.username != local).collect()),
            Err(source) => {
                warn!(error = %source, "failed to load users");
                self.inner.events.error("Failed to load users");
                Err(Error::Fetch {
                    what: "users",
                    source,
                })
            }
        }
    }
}
