use std::path::Path;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ChatApiClientOptions, ChatApiDefaults};
use crate::response::{self, describe_rejection, ApiResponse, FieldErrors};

const JSON_MEDIA_TYPE: &str = "application/json";
const UPLOAD_FALLBACK_FILE_NAME: &str = "upload";

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const CURRENT_USER_PATH: &str = "/auth/me";
pub const CONVERSATIONS_PATH: &str = "/chat/conversations";
pub const UPLOAD_PATH: &str = "/chat/upload";

/// REST client for the chat API.
///
/// Every call issues exactly one request and returns an [`ApiResponse`];
/// transport and HTTP failures are captured rather than returned as errors.
///
/// The client is `Send + Sync`. Concurrent calls share the pooled HTTP
/// client, and the bearer token sits behind a lock that is only held while
/// it is read or replaced, never across an await. Wrap the client in an
/// `Arc` to share one session between tasks.
#[derive(Debug)]
pub struct ChatApiClient {
    http: Client,
    base_url: String,
    token: RwLock<Option<SecretString>>,
    timeout: Duration,
}

impl ChatApiClient {
    pub fn new() -> Result<Self, ChatApiError> {
        Self::with_options(ChatApiClientOptions::default())
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ChatApiError> {
        Self::with_options(ChatApiClientOptions::default().with_base_url(base_url))
    }

    pub fn with_options(options: ChatApiClientOptions) -> Result<Self, ChatApiError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(ChatApiError::Transport)?;

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(options.token),
            timeout: options.timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Replaces the bearer token. `None` removes the `Authorization` header
    /// from subsequent requests.
    pub fn set_token(&self, token: Option<SecretString>) {
        let mut guard = self.token.write().unwrap_or_else(PoisonError::into_inner);
        *guard = token;
    }

    pub fn clear_token(&self) {
        self.set_token(None);
    }

    pub fn token(&self) -> Option<SecretString> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn has_token(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Logs in and, on success, stores the returned `token` for later calls.
    pub async fn login(&self, email: &str, password: &str) -> ApiResponse {
        let response = self
            .send_json(Method::POST, LOGIN_PATH, &LoginRequest { email, password })
            .await;

        if response.is_success() {
            if let Some(token) = response.data_str("token").filter(|token| !token.is_empty()) {
                self.set_token(Some(SecretString::new(token.to_string())));
                debug!(event = "chat_api_token_stored");
            }
        }

        response
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> ApiResponse {
        self.send_json(
            Method::POST,
            REGISTER_PATH,
            &RegisterRequest {
                name,
                email,
                password,
            },
        )
        .await
    }

    /// Logs out and, on success, clears the stored token.
    pub async fn logout(&self) -> ApiResponse {
        let response = self
            .request(Method::POST, LOGOUT_PATH, None, RequestBody::Empty)
            .await;

        if response.is_success() {
            self.clear_token();
            debug!(event = "chat_api_token_cleared");
        }

        response
    }

    pub async fn get_current_user(&self) -> ApiResponse {
        self.request(Method::GET, CURRENT_USER_PATH, None, RequestBody::Empty)
            .await
    }

    /// Lists conversations. Use [`PageRequest::conversations`] for the
    /// server's default page size.
    pub async fn get_conversations(&self, page: PageRequest) -> ApiResponse {
        self.request(
            Method::GET,
            CONVERSATIONS_PATH,
            Some(&page),
            RequestBody::Empty,
        )
        .await
    }

    pub async fn create_conversation(
        &self,
        title: Option<&str>,
        description: Option<&str>,
    ) -> ApiResponse {
        self.send_json(
            Method::POST,
            CONVERSATIONS_PATH,
            &ConversationFields::new(title, description),
        )
        .await
    }

    pub async fn get_conversation(&self, conversation_id: u64) -> ApiResponse {
        self.request(
            Method::GET,
            &conversation_path(conversation_id),
            None,
            RequestBody::Empty,
        )
        .await
    }

    pub async fn update_conversation(
        &self,
        conversation_id: u64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> ApiResponse {
        self.send_json(
            Method::PUT,
            &conversation_path(conversation_id),
            &ConversationFields::new(title, description),
        )
        .await
    }

    pub async fn delete_conversation(&self, conversation_id: u64) -> ApiResponse {
        self.request(
            Method::DELETE,
            &conversation_path(conversation_id),
            None,
            RequestBody::Empty,
        )
        .await
    }

    /// Lists messages of a conversation. Use [`PageRequest::messages`] for the
    /// server's default page size.
    pub async fn get_messages(&self, conversation_id: u64, page: PageRequest) -> ApiResponse {
        self.request(
            Method::GET,
            &messages_path(conversation_id),
            Some(&page),
            RequestBody::Empty,
        )
        .await
    }

    pub async fn send_message(
        &self,
        conversation_id: u64,
        content: &str,
        attachments: Option<&[String]>,
    ) -> ApiResponse {
        let request = SendMessageRequest {
            content,
            attachments: attachments.filter(|attachments| !attachments.is_empty()),
        };
        self.send_json(Method::POST, &messages_path(conversation_id), &request)
            .await
    }

    /// Uploads a file from disk as multipart form data.
    ///
    /// A file that cannot be read is reported as a failed response without
    /// issuing a request.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        conversation_id: Option<u64>,
    ) -> ApiResponse {
        let path = path.as_ref();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    event = "chat_api_upload_read_failed",
                    path = %path.display(),
                    error = %err
                );
                return ApiResponse::Failure {
                    data: None,
                    message: format!("failed to read {}: {err}", path.display()),
                    errors: None,
                };
            }
        };

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| UPLOAD_FALLBACK_FILE_NAME.to_string());

        self.upload_bytes(file_name, bytes, conversation_id).await
    }

    /// Uploads in-memory file content as multipart form data.
    pub async fn upload_bytes(
        &self,
        file_name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        conversation_id: Option<u64>,
    ) -> ApiResponse {
        let mut form = Form::new();
        if let Some(conversation_id) = conversation_id {
            form = form.text("conversation_id", conversation_id.to_string());
        }
        form = form.part("file", Part::bytes(bytes.into()).file_name(file_name.into()));

        self.request(Method::POST, UPLOAD_PATH, None, RequestBody::Multipart(form))
            .await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_json<T>(&self, method: Method, path: &str, payload: &T) -> ApiResponse
    where
        T: Serialize + ?Sized,
    {
        match RequestBody::json(payload) {
            Ok(body) => self.request(method, path, None, body).await,
            Err(err) => response::from_transport_error(&err),
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: Option<&PageRequest>,
        body: RequestBody,
    ) -> ApiResponse {
        let url = self.endpoint(path);
        let mut builder = self
            .http
            .request(method.clone(), &url)
            .timeout(self.timeout)
            .header(ACCEPT, JSON_MEDIA_TYPE);

        if let Some(query) = query {
            builder = builder.query(query);
        }

        builder = match body {
            RequestBody::Empty => builder.header(CONTENT_TYPE, JSON_MEDIA_TYPE),
            RequestBody::Json(value) => builder.header(CONTENT_TYPE, JSON_MEDIA_TYPE).json(&value),
            RequestBody::Multipart(form) => builder.multipart(form),
        };

        if let Some(token) = self.token() {
            builder = builder.bearer_auth(token.expose_secret());
        }

        debug!(event = "chat_api_request", method = %method, path);

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    event = "chat_api_transport_failed",
                    method = %method,
                    path,
                    error = %err
                );
                return response::from_transport_error(&err);
            }
        };

        let status = response.status();
        let http_error = response.error_for_status_ref().err().map(|err| err.to_string());
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return response::from_transport_error(&err),
        };

        debug!(
            event = "chat_api_response",
            method = %method,
            path,
            status = status.as_u16()
        );

        match http_error {
            Some(http_error) => response::from_http_error(&http_error, &body),
            None => response::from_success_body(&body),
        }
    }
}

/// Page/limit pair forwarded as query parameters. Bounds are left to the
/// server.
#[derive(Clone, Copy, Debug, Serialize, Eq, PartialEq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// First page with the default conversation page size.
    pub fn conversations() -> Self {
        Self::new(ChatApiDefaults::PAGE, ChatApiDefaults::CONVERSATIONS_LIMIT)
    }

    /// First page with the default message page size.
    pub fn messages() -> Self {
        Self::new(ChatApiDefaults::PAGE, ChatApiDefaults::MESSAGES_LIMIT)
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct ConversationFields<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

impl<'a> ConversationFields<'a> {
    fn new(title: Option<&'a str>, description: Option<&'a str>) -> Self {
        Self {
            title: title.filter(|title| !title.is_empty()),
            description: description.filter(|description| !description.is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachments: Option<&'a [String]>,
}

#[derive(Debug)]
enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Form),
}

impl RequestBody {
    /// Serializes `payload`; an empty object sends no body at all.
    fn json<T: Serialize + ?Sized>(payload: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(payload)? {
            Value::Object(fields) if fields.is_empty() => Ok(Self::Empty),
            Value::Null => Ok(Self::Empty),
            value => Ok(Self::Json(value)),
        }
    }
}

fn conversation_path(conversation_id: u64) -> String {
    format!("{CONVERSATIONS_PATH}/{conversation_id}")
}

fn messages_path(conversation_id: u64) -> String {
    format!("{CONVERSATIONS_PATH}/{conversation_id}/messages")
}

#[derive(Debug, Error)]
pub enum ChatApiError {
    #[error("failed to build http client: {0}")]
    Transport(reqwest::Error),

    #[error("{}", describe_rejection(.message, .errors))]
    Rejected {
        message: String,
        errors: Option<FieldErrors>,
    },
}
