use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::PublicValue;
use crate::models::SharedKeyRecord;

/// Handshake progress with one peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionState {
    #[default]
    None,
    InProgress,
    Established,
}

/// This side's public value while waiting for the peer's. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExchange {
    pub public_value: PublicValue,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PeerExchange {
    state: EncryptionState,
    pending: Option<PendingExchange>,
    attempt: u64,
}

/// Per-peer handshake table.
///
/// `Established` is only ever set together with a shared key record for the
/// pair and cleared together with it; [`KeyExchange::rehydrate`] re-derives it
/// from the key set whenever that set is replaced wholesale.
#[derive(Debug, Default)]
pub struct KeyExchange {
    peers: HashMap<String, PeerExchange>,
}

impl KeyExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, peer: &str) -> EncryptionState {
        self.peers.get(peer).map(|p| p.state).unwrap_or_default()
    }

    pub fn pending(&self, peer: &str) -> Option<&PendingExchange> {
        self.peers.get(peer).and_then(|p| p.pending.as_ref())
    }

    /// Snapshot of every peer with a non-`None` state.
    pub fn states(&self) -> HashMap<String, EncryptionState> {
        self.peers
            .iter()
            .filter(|(_, p)| p.state != EncryptionState::None)
            .map(|(peer, p)| (peer.clone(), p.state))
            .collect()
    }

    /// Start a new attempt for `peer`, invalidating any attempt still in flight.
    pub(crate) fn begin_attempt(&mut self, peer: &str) -> u64 {
        let entry = self.peers.entry(peer.to_string()).or_default();
        entry.attempt += 1;
        entry.attempt
    }

    pub(crate) fn attempt(&self, peer: &str) -> u64 {
        self.peers.get(peer).map(|p| p.attempt).unwrap_or_default()
    }

    pub(crate) fn is_current(&self, peer: &str, attempt: u64) -> bool {
        self.peers.get(peer).map(|p| p.attempt) == Some(attempt)
    }

    pub(crate) fn mark_in_progress(&mut self, peer: &str, pending: PendingExchange) {
        let entry = self.peers.entry(peer.to_string()).or_default();
        entry.state = EncryptionState::InProgress;
        entry.pending = Some(pending);
    }

    /// Consume the pending value. The peer stays `InProgress` until the
    /// completion resolves, but no second completion can be issued.
    pub(crate) fn take_pending(&mut self, peer: &str) -> Option<PendingExchange> {
        self.peers.get_mut(peer).and_then(|p| p.pending.take())
    }

    pub(crate) fn mark_established(&mut self, peer: &str) {
        let entry = self.peers.entry(peer.to_string()).or_default();
        entry.state = EncryptionState::Established;
        entry.pending = None;
    }

    pub(crate) fn mark_none(&mut self, peer: &str) {
        if let Some(entry) = self.peers.get_mut(peer) {
            entry.state = EncryptionState::None;
            entry.pending = None;
        }
    }

    /// Align the table with a freshly loaded key set for `local`.
    ///
    /// Peers with a record become `Established`; `Established` peers without
    /// one drop to `None`. Attempts in flight are left alone unless a record
    /// now exists for them.
    pub(crate) fn rehydrate<'a>(
        &mut self,
        local: &str,
        keys: impl IntoIterator<Item = &'a SharedKeyRecord>,
    ) -> Vec<(String, EncryptionState)> {
        let established: Vec<String> = keys
            .into_iter()
            .filter_map(|record| record.participants.other(local).map(str::to_string))
            .collect();

        let mut changed = Vec::new();
        for (peer, entry) in self.peers.iter_mut() {
            if entry.state == EncryptionState::Established && !established.contains(peer) {
                entry.state = EncryptionState::None;
                entry.pending = None;
                changed.push((peer.clone(), EncryptionState::None));
            }
        }
        for peer in established {
            if self.state(&peer) != EncryptionState::Established {
                self.mark_established(&peer);
                changed.push((peer, EncryptionState::Established));
            }
        }
        changed
    }

    /// Forget every peer. Attempt counters survive so late responses stay stale.
    pub(crate) fn clear(&mut self) {
        for entry in self.peers.values_mut() {
            entry.state = EncryptionState::None;
            entry.pending = None;
            entry.attempt += 1;
        }
    }
}
