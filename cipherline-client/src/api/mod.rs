mod client;
mod messages;

pub use client::ApiClient;
pub use messages::{LoginResponse, PublicValue, WireSharedKey};

use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::{KeyMaterial, Message, User};

/// Request/response contract of the messaging backend.
///
/// The backend performs every cryptographic computation; the client only
/// orchestrates these calls and keeps track of what they established.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError>;

    async fn register(&self, username: &str, email: &str, password: &str) -> Result<(), ApiError>;

    async fn list_users(&self) -> Result<Vec<User>, ApiError>;

    /// Ask the backend for this side's public exchange value towards `peer`.
    async fn start_dh(&self, peer: &str) -> Result<PublicValue, ApiError>;

    /// Submit the peer's public value. The returned material is empty when the
    /// backend keeps the derived key to itself.
    async fn complete_dh(&self, peer: &str, peer_y: &PublicValue) -> Result<KeyMaterial, ApiError>;

    async fn send_message(&self, peer: &str, message: &str) -> Result<(), ApiError>;

    /// Fails with [`ApiError::NoSharedKey`] when the pair has no key.
    async fn get_messages(&self, peer: &str) -> Result<Vec<Message>, ApiError>;
}
