use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{Message, User};

/// Marker the backend puts in the error body when a pair has no shared key.
pub(crate) const NO_SHARED_KEY_MARKER: &str = "shared key not found";

/// Opaque Diffie-Hellman public value, exchanged between peers out of band.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PublicValue(String);

impl PublicValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PublicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PublicValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Ok(PublicValue::new(text)),
            // Anything past u64 has already lost digits to f64
            Raw::Number(number) => number
                .as_u64()
                .map(|n| PublicValue::new(n.to_string()))
                .ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "public value {number} is not an exact integer; expected a string"
                    ))
                }),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSharedKey {
    pub users: Vec<String>,
    /// Hex encoded symmetric key.
    pub aes_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub rsa_public_key: String,
    pub certificate: String,
    #[serde(default)]
    pub shared_keys: Vec<WireSharedKey>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UsersResponse {
    pub users: Vec<User>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StartDhRequest<'a> {
    pub to: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DhPublic {
    pub y: PublicValue,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartDhResponse {
    pub dh_public: DhPublic,
}

#[derive(Debug, Serialize)]
pub(crate) struct CompleteDhRequest<'a> {
    pub to: &'a str,
    pub peer_y: &'a str,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CompleteDhResponse {
    /// Present only when the backend hands the derived key back.
    #[serde(default)]
    pub aes_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SendMessageRequest<'a> {
    pub to: &'a str,
    pub message: &'a str,
}

/// `get_messages` answers with either a wrapped or a bare list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum MessagesPayload {
    Wrapped { messages: Vec<Message> },
    Bare(Vec<Message>),
}

impl MessagesPayload {
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            MessagesPayload::Wrapped { messages } | MessagesPayload::Bare(messages) => messages,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
