use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use once_cell::sync::OnceCell;
use serde_json::{json, Map, Value};

static DIAGNOSTICS: OnceCell<bool> = OnceCell::new();

/// Enables the `details` field in error bodies. Set once at startup from
/// `APP_ENV=development`; later calls are ignored.
pub fn enable_diagnostics(enabled: bool) {
    let _ = DIAGNOSTICS.set(enabled);
}

fn diagnostics_enabled() -> bool {
    DIAGNOSTICS.get().copied().unwrap_or(false)
}

/// Failures talking to a third-party API.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream rejected credentials: {0}")]
    Auth(String),

    #[error("upstream rate limit reached: {0}")]
    RateLimited(String),

    #[error("upstream metric unavailable: {0}")]
    MissingMetric(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream call timed out")]
    Timeout,

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("unexpected upstream response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else if err.is_decode() {
            UpstreamError::Decode(err.to_string())
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Unauthorized(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("{entity} is no longer available")]
    Gone { entity: &'static str, id: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Gone { .. } => StatusCode::GONE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::MissingConfig(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// JSON body for this error. `details` is only attached when diagnostics
    /// are switched on.
    pub fn body(&self, with_details: bool) -> Value {
        let mut body = Map::new();
        match self {
            AppError::Validation(msg) => {
                body.insert("error".into(), json!("Validation error"));
                body.insert("message".into(), json!(msg));
            }
            AppError::NotFound { entity, id } | AppError::Gone { entity, id } => {
                body.insert("error".into(), json!(self.to_string()));
                body.insert(id_field(entity), json!(id));
            }
            AppError::Unauthorized(msg) => {
                body.insert("error".into(), json!("Unauthorized"));
                body.insert("message".into(), json!(msg));
            }
            AppError::MethodNotAllowed => {
                body.insert("error".into(), json!("Method not allowed"));
            }
            AppError::MissingConfig(name) => {
                body.insert("error".into(), json!("Server configuration error"));
                body.insert("message".into(), json!(format!("{} is not configured", name)));
            }
            AppError::Upstream(err) => {
                body.insert("error".into(), json!("Upstream service error"));
                body.insert("message".into(), json!(err.to_string()));
            }
            AppError::Config(_) | AppError::Internal(_) => {
                body.insert("error".into(), json!("Internal server error"));
            }
        }
        if with_details {
            body.insert("details".into(), json!(format!("{:?}", self)));
        }
        Value::Object(body)
    }
}

/// `Organization` -> `organizationId`
fn id_field(entity: &str) -> String {
    let mut chars = entity.chars();
    match chars.next() {
        Some(first) => format!("{}{}Id", first.to_lowercase(), chars.as_str()),
        None => "id".to_string(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }
        (status, Json(self.body(diagnostics_enabled()))).into_response()
    }
}

impl From<std::env::VarError> for AppError {
    fn from(err: std::env::VarError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
