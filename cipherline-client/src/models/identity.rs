use serde::{Deserialize, Serialize};

/// Authenticated identity, established at login and immutable for the session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    /// Base64 PEM public key issued by the backend.
    pub public_key: String,
    /// Base64 PEM certificate issued by the backend.
    pub certificate: String,
}

impl Identity {
    pub fn new(username: impl Into<String>, public_key: String, certificate: String) -> Self {
        Self {
            username: username.into(),
            public_key,
            certificate,
        }
    }
}
