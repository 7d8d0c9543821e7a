use serde::Deserialize;
use thiserror::Error;

/// Errors surfaced by [`ApiClient`](super::ApiClient) and the transport beneath it.
///
/// `Clone` so that one renewal outcome can be fanned out to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Credential expired: {message}")]
    Expired { message: String },

    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Credential renewal failed: {0}")]
    RefreshFailure(String),

    #[error("Credential renewal timed out")]
    RefreshTimeout,

    #[error("Request failed ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Shapes the backend uses for error bodies.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    detail: Option<String>,
    error: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Pull a human readable message out of an error body.
    ///
    /// Looks for `message`, `detail` and `error` keys in that order and falls
    /// back to the (truncated) raw body.
    pub fn extract_message(body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
            if let Some(msg) = parsed.message.or(parsed.detail).or(parsed.error) {
                return Self::truncate_body(&msg);
            }
        }
        Self::truncate_body(body.trim())
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let message = Self::extract_message(body);
        match status {
            401 => ApiError::Expired { message },
            _ => ApiError::Status { status, message },
        }
    }

    /// True for the single signal the refresh coordinator reacts to.
    pub fn is_expiry(&self) -> bool {
        matches!(self, ApiError::Expired { .. })
    }

    /// HTTP status associated with the error, if a response was received.
    ///
    /// Renewal failures carry none: the renewal may have died on the network
    /// or the timeout without any status coming back.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Expired { .. } => Some(401),
            ApiError::Auth { status, .. } | ApiError::Status { status, .. } => Some(*status),
            ApiError::RefreshFailure(_)
            | ApiError::RefreshTimeout
            | ApiError::Network(_)
            | ApiError::InvalidResponse(_) => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::Expired { message }
            | ApiError::Auth { message, .. }
            | ApiError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Reclassify an error coming back from an auth endpoint.
    ///
    /// Any 4xx there is terminal for the session rather than a renewal trigger.
    pub(crate) fn into_auth_failure(self) -> Self {
        match self {
            ApiError::Expired { message } => ApiError::Auth { status: 401, message },
            ApiError::Status { status, message } if (400..500).contains(&status) => {
                ApiError::Auth { status, message }
            }
            other => other,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InvalidResponse(err.to_string())
    }
}
