use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{ApiError, Error, Result, SendError};
use crate::events::ClientEvent;
use crate::exchange::EncryptionState;
use crate::messenger::{Inner, Messenger};

/// Outcome of one fetch for the active conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fetched {
    /// The peer is not `Established`; nothing was requested.
    Skipped,
    /// The conversation changed while the request was in flight.
    Stale,
    Updated(usize),
    /// The backend had no key for the pair; local state was corrected.
    NoSharedKey,
}

impl Inner {
    pub(crate) fn stop_polling(&self) {
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
            debug!("polling stopped");
        }
    }

    /// Poll `peer` every `poll_interval`, starting now, until aborted or the
    /// conversation `generation` is no longer active.
    pub(crate) fn spawn_poller(self: &Arc<Self>, peer: String, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match inner.fetch_conversation(&peer, generation).await {
                    Ok(Fetched::Stale) => break,
                    Ok(Fetched::Updated(count)) => debug!(%peer, count, "conversation refreshed"),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%peer, error = %e, "poll failed");
                        inner.report_fetch_failure(&e);
                    }
                }
            }
            debug!(%peer, generation, "poller exited");
        })
    }

    /// Fetch the full message list for `peer` and replace the active list with it.
    pub(crate) async fn fetch_conversation(
        &self,
        peer: &str,
        generation: u64,
    ) -> Result<Fetched, ApiError> {
        let attempt = {
            let st = self.state.lock();
            if !st.is_active(generation) {
                return Ok(Fetched::Stale);
            }
            if st.exchange.state(peer) != EncryptionState::Established {
                return Ok(Fetched::Skipped);
            }
            st.exchange.attempt(peer)
        };

        let result = self.backend.get_messages(peer).await;

        let mut guard = self.state.lock();
        let st = &mut *guard;
        if !st.is_active(generation) {
            debug!(%peer, generation, "dropping response for inactive conversation");
            return Ok(Fetched::Stale);
        }

        match result {
            Ok(messages) => {
                let count = messages.len();
                if let Some(conversation) = st.conversation.as_mut() {
                    conversation.messages = messages.clone();
                }
                self.events.emit(ClientEvent::MessagesUpdated {
                    peer: peer.to_string(),
                    messages,
                });
                Ok(Fetched::Updated(count))
            }
            Err(ApiError::NoSharedKey) => {
                // A handshake step since the request started makes this answer outdated
                if st.exchange.attempt(peer) == attempt {
                    info!(%peer, "backend has no shared key; resetting encryption state");
                    self.discard_key(st, peer);
                }
                Ok(Fetched::NoSharedKey)
            }
            Err(e) => Err(e),
        }
    }

    fn report_fetch_failure(&self, err: &ApiError) {
        self.events
            .error(format!("Failed to load messages: {}", err.server_message()));
    }
}

impl Messenger {
    /// Fetch the active conversation now, outside the polling cadence.
    pub async fn refresh_messages(&self) -> Result<()> {
        let Some((peer, generation)) = self
            .inner
            .state
            .lock()
            .conversation
            .as_ref()
            .map(|c| (c.peer.clone(), c.generation))
        else {
            return Ok(());
        };

        match self.inner.fetch_conversation(&peer, generation).await {
            Ok(_) => Ok(()),
            Err(source) => {
                warn!(%peer, error = %source, "refresh failed");
                self.inner.report_fetch_failure(&source);
                Err(Error::Fetch {
                    what: "messages",
                    source,
                })
            }
        }
    }

    /// Send `text` to the active peer, then refresh the conversation.
    ///
    /// Refused locally unless encryption with the peer is established.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let text = text.trim();
        let peer = {
            let st = self.inner.state.lock();
            if !st.session.is_authenticated() {
                return Err(Error::NotAuthenticated);
            }
            let peer = st
                .active_peer()
                .map(str::to_string)
                .ok_or(SendError::NoActiveConversation)?;
            if st.exchange.state(&peer) != EncryptionState::Established {
                drop(st);
                self.inner
                    .events
                    .error("Establish encryption before sending messages");
                return Err(SendError::NotEstablished(peer).into());
            }
            peer
        };
        if text.is_empty() {
            return Err(SendError::Empty.into());
        }

        if let Err(source) = self.inner.backend.send_message(&peer, text).await {
            warn!(%peer, error = %source, "send failed");
            self.inner.events.error("Failed to send message");
            return Err(SendError::Rejected { peer, source }.into());
        }
        debug!(%peer, "message sent");

        // The refresh reports its own failures
        let _ = self.refresh_messages().await;
        Ok(())
    }
}
