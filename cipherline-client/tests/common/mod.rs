//! In-memory backend shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cipherline::{
    ApiError, Backend, ClientEvent, EncryptionState, KeyMaterial, LoginResponse, Message,
    Messenger, NoticeLevel, PublicValue, Sealer, SessionStore, Storage, User, WireSharedKey,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;

pub const POLL: Duration = Duration::from_secs(2);
pub const DEVICE_SECRET: [u8; 32] = [42u8; 32];

fn pair(a: &str, b: &str) -> (String, String) {
    if a < b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Default)]
struct ServerState {
    passwords: HashMap<String, String>,
    keys: HashMap<(String, String), Vec<u8>>,
    /// (initiator, peer) -> public value handed out by start_dh
    pending: HashMap<(String, String), String>,
    messages: Vec<Message>,
    /// (requesting user, peer) per get_messages call
    fetches: Vec<(String, String)>,
    next_value: u64,
    fail_start: bool,
    fail_send: bool,
    fail_fetch: Option<ApiError>,
    server_held_keys: bool,
    start_delay: Duration,
    complete_delay: Duration,
    fetch_delays: HashMap<String, Duration>,
}

/// Shared backend state; every [`FakeBackend`] is one client session against it.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(names: &[&str]) -> Self {
        let server = Self::new();
        for name in names {
            server.add_user(name, "secret");
        }
        server
    }

    pub fn add_user(&self, name: &str, password: &str) {
        self.state
            .lock()
            .passwords
            .insert(name.to_string(), password.to_string());
    }

    pub fn has_user(&self, name: &str) -> bool {
        self.state.lock().passwords.contains_key(name)
    }

    pub fn session(&self) -> Arc<FakeBackend> {
        Arc::new(FakeBackend {
            server: self.clone(),
            user: Mutex::new(None),
        })
    }

    pub fn establish_pair(&self, a: &str, b: &str) {
        self.state.lock().keys.insert(pair(a, b), vec![7u8; 32]);
    }

    pub fn drop_pair(&self, a: &str, b: &str) {
        self.state.lock().keys.remove(&pair(a, b));
    }

    pub fn has_pair(&self, a: &str, b: &str) -> bool {
        self.state.lock().keys.contains_key(&pair(a, b))
    }

    pub fn push_message(&self, from: &str, to: &str, body: &str) {
        self.state.lock().messages.push(Message {
            sender: from.to_string(),
            recipient: to.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// How many times `user` fetched the conversation with `peer`.
    pub fn fetch_count(&self, user: &str, peer: &str) -> usize {
        self.state
            .lock()
            .fetches
            .iter()
            .filter(|(u, p)| u == user && p == peer)
            .count()
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state.lock().fail_start = fail;
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.state.lock().fail_send = fail;
    }

    pub fn set_fail_fetch(&self, error: Option<ApiError>) {
        self.state.lock().fail_fetch = error;
    }

    pub fn set_server_held_keys(&self, held: bool) {
        self.state.lock().server_held_keys = held;
    }

    pub fn set_start_delay(&self, delay: Duration) {
        self.state.lock().start_delay = delay;
    }

    pub fn set_complete_delay(&self, delay: Duration) {
        self.state.lock().complete_delay = delay;
    }

    pub fn set_fetch_delay(&self, peer: &str, delay: Duration) {
        self.state.lock().fetch_delays.insert(peer.to_string(), delay);
    }
}

pub struct FakeBackend {
    server: FakeServer,
    user: Mutex<Option<String>>,
}

impl FakeBackend {
    fn current_user(&self) -> Result<String, ApiError> {
        self.user.lock().clone().ok_or(ApiError::Status {
            status: 401,
            message: "Not logged in".to_string(),
        })
    }
}

fn bad_request(message: &str) -> ApiError {
    ApiError::Status {
        status: 400,
        message: message.to_string(),
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let state = self.server.state.lock();
        if state.passwords.get(username).map(String::as_str) != Some(password) {
            return Err(ApiError::Status {
                status: 401,
                message: "Invalid credentials".to_string(),
            });
        }
        let shared_keys = state
            .keys
            .iter()
            .filter(|((a, b), _)| a == username || b == username)
            .map(|((a, b), key)| WireSharedKey {
                users: vec![a.clone(), b.clone()],
                aes_key: hex::encode(key),
            })
            .collect();
        *self.user.lock() = Some(username.to_string());

        Ok(LoginResponse {
            rsa_public_key: format!("pk-{}", username),
            certificate: format!("cert-{}", username),
            shared_keys,
        })
    }

    async fn register(&self, username: &str, _email: &str, password: &str) -> Result<(), ApiError> {
        let mut state = self.server.state.lock();
        if state.passwords.contains_key(username) {
            return Err(bad_request("Username already exists"));
        }
        state
            .passwords
            .insert(username.to_string(), password.to_string());
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.current_user()?;
        let mut users: Vec<User> = self
            .server
            .state
            .lock()
            .passwords
            .keys()
            .map(|name| User {
                username: name.clone(),
            })
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn start_dh(&self, peer: &str) -> Result<PublicValue, ApiError> {
        let me = self.current_user()?;
        let delay = self.server.state.lock().start_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.server.state.lock();
        if state.fail_start {
            return Err(ApiError::Status {
                status: 500,
                message: "DH generation failed".to_string(),
            });
        }
        state.next_value += 1;
        let value = (1000 + state.next_value).to_string();
        state
            .pending
            .insert((me, peer.to_string()), value.clone());
        Ok(PublicValue::new(value))
    }

    async fn complete_dh(&self, peer: &str, peer_y: &PublicValue) -> Result<KeyMaterial, ApiError> {
        let me = self.current_user()?;
        let delay = self.server.state.lock().complete_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.server.state.lock();
        if state.pending.remove(&(me.clone(), peer.to_string())).is_none() {
            return Err(bad_request("No DH session started"));
        }
        let y: u64 = peer_y
            .as_str()
            .parse()
            .map_err(|_| bad_request("Invalid public value"))?;

        let key = vec![(y % 251) as u8; 32];
        state.keys.insert(pair(&me, peer), key.clone());
        if state.server_held_keys {
            Ok(KeyMaterial::default())
        } else {
            Ok(KeyMaterial::new(key))
        }
    }

    async fn send_message(&self, peer: &str, message: &str) -> Result<(), ApiError> {
        let me = self.current_user()?;
        let mut state = self.server.state.lock();
        if state.fail_send {
            return Err(ApiError::Transport("connection reset".to_string()));
        }
        if !state.keys.contains_key(&pair(&me, peer)) {
            return Err(ApiError::NoSharedKey);
        }
        state.messages.push(Message {
            sender: me,
            recipient: peer.to_string(),
            body: message.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn get_messages(&self, peer: &str) -> Result<Vec<Message>, ApiError> {
        let me = self.current_user()?;
        let delay = {
            let mut state = self.server.state.lock();
            state.fetches.push((me.clone(), peer.to_string()));
            state.fetch_delays.get(peer).copied().unwrap_or_default()
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let state = self.server.state.lock();
        if let Some(error) = state.fail_fetch.clone() {
            return Err(error);
        }
        if !state.keys.contains_key(&pair(&me, peer)) {
            return Err(ApiError::NoSharedKey);
        }
        Ok(state
            .messages
            .iter()
            .filter(|m| {
                (m.sender == me && m.recipient == peer) || (m.sender == peer && m.recipient == me)
            })
            .cloned()
            .collect())
    }
}

/// Client with an in-memory store.
pub fn messenger(backend: Arc<FakeBackend>) -> Messenger {
    let storage = Storage::open_in_memory(Sealer::new(DEVICE_SECRET)).unwrap();
    Messenger::new(backend, SessionStore::restore(storage), POLL)
}

/// Client whose store lives at `path`, as after a process start.
pub fn messenger_at(backend: Arc<FakeBackend>, path: &Path) -> Messenger {
    let storage = Storage::open_or_recreate(path, Sealer::new(DEVICE_SECRET)).unwrap();
    Messenger::new(backend, SessionStore::restore(storage), POLL)
}

pub async fn logged_in(server: &FakeServer, username: &str) -> Messenger {
    let messenger = messenger(server.session());
    messenger.login(username, "secret").await.unwrap();
    messenger
}

pub fn drain(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn error_notices(events: &[ClientEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ClientEvent::Notice(notice) if notice.level == NoticeLevel::Error => {
                Some(notice.message.clone())
            }
            _ => None,
        })
        .collect()
}

/// `Established` for exactly the peers that have a shared key record.
pub fn assert_keys_match_states(messenger: &Messenger) {
    let Some(local) = messenger.identity().map(|i| i.username) else {
        assert!(messenger.encryption_states().is_empty());
        assert!(messenger.shared_keys().is_empty());
        return;
    };

    let established: HashSet<String> = messenger
        .encryption_states()
        .into_iter()
        .filter(|(_, state)| *state == EncryptionState::Established)
        .map(|(peer, _)| peer)
        .collect();
    let keyed: HashSet<String> = messenger
        .shared_keys()
        .iter()
        .filter_map(|record| record.participants.other(&local).map(str::to_string))
        .collect();
    assert_eq!(established, keyed);
}
