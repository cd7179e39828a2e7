use thiserror::Error;

/// Failures reported by the backend REST contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("network error: {0}")]
    Transport(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    /// The backend holds no shared key for this pair of users.
    #[error("shared key not found")]
    NoSharedKey,
}

impl ApiError {
    /// Message the server attached to the failure, or the error itself.
    pub fn server_message(&self) -> String {
        match self {
            ApiError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("failed to initiate key exchange with {peer}: {source}")]
    Initiate {
        peer: String,
        #[source]
        source: ApiError,
    },

    #[error("failed to complete key exchange with {peer}: {source}")]
    Complete {
        peer: String,
        #[source]
        source: ApiError,
    },

    #[error("no pending key exchange with {0}; initiate one first")]
    NoPendingExchange(String),

    #[error("peer public value is empty")]
    EmptyPublicValue,

    #[error("cannot exchange keys with yourself")]
    SelfExchange,

    #[error("peer name is empty")]
    EmptyPeer,

    /// A newer initiate, reset or logout replaced this attempt while it was in flight.
    #[error("key exchange with {0} was superseded")]
    Superseded(String),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("no active conversation")]
    NoActiveConversation,

    #[error("message is empty")]
    Empty,

    #[error("encryption with {0} is not established")]
    NotEstablished(String),

    #[error("failed to send message to {peer}: {source}")]
    Rejected {
        peer: String,
        #[source]
        source: ApiError,
    },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to seal key material")]
    Seal,

    #[error("failed to unseal key material for {0}")]
    Unseal(String),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server url {value:?}: {source}")]
    ServerUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid value for {name}: {value:?}")]
    Number { name: &'static str, value: String },

    #[error("no data directory available on this platform")]
    NoDataDir,
}

/// Error taxonomy surfaced by the client operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication failed: {}", .0.server_message())]
    Auth(#[source] ApiError),

    #[error("not logged in")]
    NotAuthenticated,

    #[error("registration failed: {}", .0.server_message())]
    Registration(#[source] ApiError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Expected state, corrected internally; never shown to the user.
    #[error("no shared key with {0}")]
    NoSharedKey(String),

    #[error("failed to load {what}: {source}")]
    Fetch {
        what: &'static str,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build http client: {0}")]
    Http(#[source] ApiError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
