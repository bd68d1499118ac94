use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("A turn is already in progress for session {0}")]
    TurnInProgress(Uuid),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::TurnInProgress(_) => StatusCode::CONFLICT,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::JsonParse(_) => StatusCode::BAD_REQUEST,
            AppError::TomlParse(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::TurnInProgress(_) => "turn_in_progress",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::Io(_) => "io_error",
            AppError::JsonParse(_) => "json_parse_error",
            AppError::TomlParse(_) => "toml_parse_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        error!(error_code = code, message = %message, "Request failed");

        let body = Json(json!({
            "error": {
                "message": message,
                "code": code
            }
        }));

        (status, body).into_response()
    }
}

/// Failure of a scrape through the extraction proxy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("Could not build a proxy request for {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to fetch the page content. Status code: {0}")]
    Status(u16),

    #[error("Scraping error: {0}")]
    Transport(String),
}

/// Failure of a chat-completion call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnswerError {
    #[error("Error generating response: {0}")]
    Transport(String),

    #[error("Error generating response: completion service returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Error generating response: provider returned error: {0}")]
    Provider(String),

    #[error("Error generating response: response missing content field: {0}")]
    Malformed(String),
}
