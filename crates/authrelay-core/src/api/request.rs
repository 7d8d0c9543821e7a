//! Replayable request descriptors and normalized responses.

use reqwest::header;
use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};

use super::ApiError;

/// A captured, replayable outbound request.
///
/// Descriptors are never mutated once sent; a replay is a fresh value from
/// [`RequestDescriptor::retried`] with the attempt counter bumped.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    attempt: u32,
    authenticated: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            attempt: 0,
            authenticated: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send without a credential and never route a 401 into renewal.
    /// Used for the login and renewal endpoints themselves.
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Number of times this request has already been replayed.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The same request, marked as one replay further along.
    pub fn retried(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    /// Copy of this descriptor carrying `token` as its bearer credential.
    /// Any caller-supplied `Authorization` header is replaced.
    pub fn with_bearer(&self, token: &str) -> Self {
        let mut out = self.clone();
        out.headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case(header::AUTHORIZATION.as_str()));
        out.headers
            .push((header::AUTHORIZATION.to_string(), format!("Bearer {}", token)));
        out
    }

    /// The bearer token carried by this descriptor, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(header::AUTHORIZATION.as_str()))
            .and_then(|(_, value)| value.strip_prefix("Bearer "))
    }
}

/// A successful response, normalized away from the HTTP library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e))
        })
    }

    /// True when the body carries nothing but whitespace.
    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty()
    }
}
