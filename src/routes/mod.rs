//! HTTP routes for impact-core
//!
//! Handlers take a fully read [`ApiRequest`] and return a JSON response or an
//! [`ImpactError`]; `server::http` turns errors into responses.

pub mod companion;
pub mod health;
pub mod leaderboard;
pub mod submissions;
pub mod tasks;
pub mod users;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tracing::{error, warn};

use crate::types::{ImpactError, Result};

pub use health::{health_check, version_info};

pub type FullBody = Full<Bytes>;

/// A request with its body already collected
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            authorization: None,
            body: Bytes::new(),
        }
    }

    pub fn with_bearer(mut self, token: &str) -> Self {
        self.authorization = Some(format!("Bearer {token}"));
        self
    }

    pub fn with_json<T: Serialize>(mut self, body: &T) -> Self {
        self.body = Bytes::from(serde_json::to_vec(body).unwrap_or_default());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Deserialize the JSON body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Err(ImpactError::Validation("Request body is required".into()));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// First value of a query parameter, URL-decoded
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key != name {
                return None;
            }
            urlencoding::decode(value).ok().map(|v| v.into_owned())
        })
    }
}

/// Decode one path segment
pub fn path_segment(raw: &str) -> Result<String> {
    let decoded = urlencoding::decode(raw)
        .map_err(|_| ImpactError::Validation("Malformed path".into()))?;
    if decoded.is_empty() {
        return Err(ImpactError::NotFound("Resource".into()));
    }
    Ok(decoded.into_owned())
}

/// Run a state-changing operation on its own task, so a caller that goes
/// away mid-request cannot cancel it between retries.
pub async fn detached<T, F>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(|e| ImpactError::Internal(format!("Detached operation failed: {e}")))?
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

pub fn ok<T: Serialize>(body: &T) -> Result<Response<FullBody>> {
    Ok(json_response(StatusCode::OK, body))
}

pub fn created<T: Serialize>(body: &T) -> Result<Response<FullBody>> {
    Ok(json_response(StatusCode::CREATED, body))
}

/// Response for a failed operation. Detail of store and internal errors is
/// logged here and never sent to the caller.
pub fn error_response(err: ImpactError) -> Response<FullBody> {
    match &err {
        ImpactError::Transient(detail) => warn!(detail = %detail, "Request failed transiently"),
        ImpactError::Internal(detail) | ImpactError::Config(detail) => {
            error!(detail = %detail, "Request failed")
        }
        _ => {}
    }

    let (status, body) = err.into_status_code_and_body();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

pub fn not_found_response(path: &str) -> Response<FullBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": "Not Found", "code": "NOT_FOUND", "path": path }),
    )
}
