use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use tracing::debug;
use url::Url;

use super::messages::{
    CompleteDhRequest, CompleteDhResponse, ErrorBody, LoginRequest, LoginResponse,
    MessagesPayload, PublicValue, RegisterRequest, SendMessageRequest, StartDhRequest,
    StartDhResponse, UsersResponse, NO_SHARED_KEY_MARKER,
};
use super::Backend;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::models::{KeyMaterial, Message, User};

/// JSON-over-HTTP backend client. The session cookie set by `login` is kept
/// in the client's cookie store and authenticates every later request.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cipherline/", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()?;

        let mut base_url = config.server_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Transport(format!("invalid endpoint {}: {}", path, e)))
    }

    async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, ApiError> {
        let url = self.endpoint(path)?;
        debug!(%url, "POST");
        let res = self.client.post(url).json(body).send().await?;
        check_status(res).await
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Response, ApiError> {
        let url = self.endpoint(path)?;
        debug!(%url, "GET");
        let res = self.client.get(url).query(query).send().await?;
        check_status(res).await
    }
}

/// Turn a non-2xx response into an [`ApiError`] carrying the server's message.
async fn check_status(res: Response) -> Result<Response, ApiError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(classify_failure(status, &body))
}

pub(crate) fn classify_failure(status: StatusCode, body: &str) -> ApiError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .error
        .or(parsed.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });

    if message.to_ascii_lowercase().contains(NO_SHARED_KEY_MARKER) {
        return ApiError::NoSharedKey;
    }
    ApiError::Status {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let res = self
            .post_json("login", &LoginRequest { username, password })
            .await?;
        Ok(res.json().await?)
    }

    async fn register(&self, username: &str, email: &str, password: &str) -> Result<(), ApiError> {
        self.post_json(
            "register",
            &RegisterRequest {
                username,
                email,
                password,
            },
        )
        .await?;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        let res = self.get("users", &[]).await?;
        let body: UsersResponse = res.json().await?;
        Ok(body.users)
    }

    async fn start_dh(&self, peer: &str) -> Result<PublicValue, ApiError> {
        let res = self.post_json("start_dh", &StartDhRequest { to: peer }).await?;
        let body: StartDhResponse = res.json().await?;
        if body.dh_public.y.is_empty() {
            return Err(ApiError::Decode("empty public value".to_string()));
        }
        Ok(body.dh_public.y)
    }

    async fn complete_dh(&self, peer: &str, peer_y: &PublicValue) -> Result<KeyMaterial, ApiError> {
        let res = self
            .post_json(
                "complete_dh",
                &CompleteDhRequest {
                    to: peer,
                    peer_y: peer_y.as_str(),
                },
            )
            .await?;
        // An ack without a body is still a success
        let text = res.text().await?;
        let body: CompleteDhResponse = serde_json::from_str(&text).unwrap_or_default();
        match body.aes_key {
            Some(hex_key) => KeyMaterial::from_hex(&hex_key)
                .ok_or_else(|| ApiError::Decode("aes_key is not hex".to_string())),
            None => Ok(KeyMaterial::default()),
        }
    }

    async fn send_message(&self, peer: &str, message: &str) -> Result<(), ApiError> {
        self.post_json("send_message", &SendMessageRequest { to: peer, message })
            .await?;
        Ok(())
    }

    async fn get_messages(&self, peer: &str) -> Result<Vec<Message>, ApiError> {
        let res = self.get("get_messages", &[("with", peer)]).await?;
        let payload: MessagesPayload = res.json().await?;
        Ok(payload.into_messages())
    }
}
