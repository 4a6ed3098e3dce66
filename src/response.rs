//! Uniform outcome of every REST call.
//!
//! Responses are normalized from three sources: a 2xx body, an HTTP error
//! status with its body, or a transport failure. Callers always receive an
//! [`ApiResponse`], never an error.

use std::collections::BTreeMap;
use std::error::Error as StdError;

use serde_json::Value;

use crate::chat_api::ChatApiError;

/// Field name to ordered validation messages.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

const REPORTED_FAILURE_MESSAGE: &str = "request reported failure";

/// Outcome of a REST call.
#[derive(Clone, Debug, PartialEq)]
pub enum ApiResponse {
    /// The server accepted the request.
    Success {
        /// Full parsed response body (`null` for an empty body).
        data: Value,
        /// Body `message` field, if present.
        message: Option<String>,
    },
    /// The request failed at the transport, HTTP, or application level.
    Failure {
        /// Parsed body when one was available.
        data: Option<Value>,
        /// Human-readable failure description. Never empty.
        message: String,
        /// Body `errors` field, if present.
        errors: Option<FieldErrors>,
    },
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Parsed body, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Failure { data, .. } => data.as_ref(),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success { message, .. } => message.as_deref(),
            Self::Failure { message, .. } => Some(message),
        }
    }

    pub fn errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { errors, .. } => errors.as_ref(),
        }
    }

    /// Looks up a top-level string field of the parsed body.
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data()
            .and_then(|data| data.get(field))
            .and_then(Value::as_str)
    }

    /// Returns the body on success, or a [`ChatApiError::Rejected`] carrying
    /// the failure message and field errors.
    pub fn into_result(self) -> Result<Value, ChatApiError> {
        match self {
            Self::Success { data, .. } => Ok(data),
            Self::Failure {
                message, errors, ..
            } => Err(ChatApiError::Rejected { message, errors }),
        }
    }
}

/// Normalizes a 2xx response body.
///
/// A body without a `success` field is treated as successful.
pub(crate) fn from_success_body(body: &str) -> ApiResponse {
    if body.trim().is_empty() {
        return ApiResponse::Success {
            data: Value::Null,
            message: None,
        };
    }

    let data = match serde_json::from_str::<Value>(body) {
        Ok(data) => data,
        Err(err) => {
            return ApiResponse::Failure {
                data: None,
                message: format!("failed to parse response: {err}"),
                errors: None,
            }
        }
    };

    let message = message_field(&data);
    if success_flag(&data) {
        return ApiResponse::Success { data, message };
    }

    let errors = field_errors(&data);
    ApiResponse::Failure {
        message: message.unwrap_or_else(|| REPORTED_FAILURE_MESSAGE.to_string()),
        data: Some(data),
        errors,
    }
}

/// Normalizes a non-2xx response. `http_error` is the stringified status
/// error used when the body carries no message of its own.
pub(crate) fn from_http_error(http_error: &str, body: &str) -> ApiResponse {
    match serde_json::from_str::<Value>(body) {
        Ok(data) => ApiResponse::Failure {
            message: message_field(&data).unwrap_or_else(|| http_error.to_string()),
            errors: field_errors(&data),
            data: Some(data),
        },
        Err(_) => ApiResponse::Failure {
            data: None,
            message: http_error.to_string(),
            errors: None,
        },
    }
}

/// Captures a transport-level failure, including its source chain.
pub(crate) fn from_transport_error(error: &dyn StdError) -> ApiResponse {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !text.is_empty() && !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    if message.is_empty() {
        message = "request failed".to_string();
    }
    ApiResponse::Failure {
        data: None,
        message,
        errors: None,
    }
}

/// Reads `success` by truthiness: `false`, `null`, zero, and empty
/// strings, arrays or objects are failures. An absent field is success.
fn success_flag(data: &Value) -> bool {
    match data.get("success") {
        None => true,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Null) => false,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|value| value != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(fields)) => !fields.is_empty(),
    }
}

fn message_field(data: &Value) -> Option<String> {
    data.get("message")
        .and_then(Value::as_str)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

fn field_errors(data: &Value) -> Option<FieldErrors> {
    let errors = data.get("errors")?.as_object()?;

    let parsed = errors
        .iter()
        .map(|(field, value)| {
            let messages = match value {
                Value::String(message) => vec![message.clone()],
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            };
            (field.clone(), messages)
        })
        .collect();

    Some(parsed)
}

pub(crate) fn describe_rejection(message: &str, errors: &Option<FieldErrors>) -> String {
    let mut text = if message.is_empty() {
        "API request failed".to_string()
    } else {
        message.to_string()
    };

    if let Some(errors) = errors.as_ref().filter(|errors| !errors.is_empty()) {
        let encoded = serde_json::to_string(errors).unwrap_or_default();
        text.push_str(". Errors: ");
        text.push_str(&encoded);
    }

    text
}
