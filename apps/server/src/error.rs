use std::io::Error as IoError;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use pulsewatch_service::SiteError;
use pulsewatch_service::alerts::AlertError;
use pulsewatch_service::config::ConfigError;
use pulsewatch_service::database::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Startup failures
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0:#}")]
    Startup(#[from] anyhow::Error),
}

/// Handler failures; the message is all a client ever sees.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Site not found")]
    NotFound,
    #[error("A check run is already in progress")]
    Busy,
    #[error("Webhook test failed")]
    Webhook,
    #[error("Something went wrong, please try again")]
    Internal,
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ServerError::NotFound,
            err => {
                error!("Store error: {}", err);
                ServerError::Internal
            }
        }
    }
}

impl From<SiteError> for ServerError {
    fn from(err: SiteError) -> Self {
        match err {
            SiteError::Invalid(message) => ServerError::BadRequest(message),
            SiteError::Store(err) => err.into(),
        }
    }
}

impl From<AlertError> for ServerError {
    fn from(err: AlertError) -> Self {
        match err {
            AlertError::WebhookNotConfigured => ServerError::BadRequest("No webhook URL configured".into()),
            AlertError::InvalidAddress(_) => ServerError::BadRequest("Please enter a valid webhook URL.".into()),
            AlertError::Store(err) => err.into(),
            err => {
                error!("Webhook test failed: {}", err);
                ServerError::Webhook
            }
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Busy => StatusCode::CONFLICT,
            ServerError::Webhook => StatusCode::BAD_GATEWAY,
            ServerError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "message": self.to_string(),
        }))
    }
}
