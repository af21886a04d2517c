use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

/// Longest response excerpt carried inside a `SourceError`.
pub const SNIPPET_LEN: usize = 200;

/// Abnormal outcome of a single `fetch_listings` call.
///
/// "No new listings" is never an error; adapters return an empty vector for that.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("authentication failed{}: {message}", fmt_status(.status))]
    Auth {
        status: Option<u16>,
        message: String,
    },

    #[error("rate limited{}: {snippet}", fmt_status(.status))]
    RateLimited { status: Option<u16>, snippet: String },

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("parse error: {message}")]
    Parse { message: String, snippet: String },

    #[error("unsupported response (HTTP {status}): {snippet}")]
    UnsupportedResponse { status: u16, snippet: String },
}

/// Discriminant of `SourceError`, used in events and status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    Auth,
    RateLimited,
    TransientNetwork,
    Parse,
    UnsupportedResponse,
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl SourceError {
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            SourceError::Auth { .. } => SourceErrorKind::Auth,
            SourceError::RateLimited { .. } => SourceErrorKind::RateLimited,
            SourceError::TransientNetwork(_) => SourceErrorKind::TransientNetwork,
            SourceError::Parse { .. } => SourceErrorKind::Parse,
            SourceError::UnsupportedResponse { .. } => SourceErrorKind::UnsupportedResponse,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SourceError::Auth { status, .. } | SourceError::RateLimited { status, .. } => *status,
            SourceError::UnsupportedResponse { status, .. } => Some(*status),
            SourceError::TransientNetwork(_) | SourceError::Parse { .. } => None,
        }
    }

    pub fn parse(message: impl Into<String>, body: &str) -> Self {
        SourceError::Parse {
            message: message.into(),
            snippet: snippet(body),
        }
    }

    /// Classify a non-success HTTP response.
    ///
    /// `rate_limit_exhausted` is set by callers that saw an exhausted quota header
    /// (GitHub answers 403 rather than 429 in that case).
    pub fn from_status(status: u16, body: &str, rate_limit_exhausted: bool) -> Self {
        match status {
            401 => SourceError::Auth {
                status: Some(status),
                message: snippet(body),
            },
            403 if rate_limit_exhausted => SourceError::RateLimited {
                status: Some(status),
                snippet: snippet(body),
            },
            403 => SourceError::Auth {
                status: Some(status),
                message: snippet(body),
            },
            429 => SourceError::RateLimited {
                status: Some(status),
                snippet: snippet(body),
            },
            408 | 500..=599 => {
                SourceError::TransientNetwork(format!("HTTP {status}: {}", snippet(body)))
            }
            _ => SourceError::UnsupportedResponse {
                status,
                snippet: snippet(body),
            },
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return SourceError::Parse {
                message: e.to_string(),
                snippet: String::new(),
            };
        }
        if let Some(status) = e.status() {
            return SourceError::from_status(status.as_u16(), "", false);
        }
        SourceError::TransientNetwork(e.to_string())
    }
}

/// Trim a response body down to something safe to log.
pub fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= SNIPPET_LEN {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(SNIPPET_LEN).collect();
    out.push_str("...");
    out
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Store(StoreError::Database(e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Store(e) => {
                tracing::error!("Store error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = axum::Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
