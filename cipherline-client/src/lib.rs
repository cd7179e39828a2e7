//! Client core for an end-to-end encrypted messenger whose backend performs
//! every cryptographic step.
//!
//! [`Messenger`] ties together the session store, the per-peer key exchange
//! state machine, the conversation selector and the polling sync loop.

mod api;
mod config;
mod crypto;
mod error;
mod events;
mod exchange;
mod messenger;
mod models;
mod selector;
mod session;
mod sync;

pub use api::{ApiClient, Backend, LoginResponse, PublicValue, WireSharedKey};
pub use config::{default_data_dir, ClientConfig};
pub use crypto::{load_or_create_device_secret, Sealer};
pub use error::{
    ApiError, ConfigError, Error, HandshakeError, Result, SendError, StorageError,
};
pub use events::{ClientEvent, EventBus, Notice, NoticeLevel};
pub use exchange::{EncryptionState, KeyExchange, PendingExchange};
pub use messenger::Messenger;
pub use models::{Identity, KeyMaterial, Message, Participants, SharedKeyRecord, User};
pub use selector::ConversationView;
pub use session::{SessionStore, Storage};
