use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};
pub mod alert;
mod api;
mod app;
pub mod ledger;
mod overlay;
pub mod reconcile;
mod service;
pub mod setting;

pub use {app::*, service::*};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Gateway(#[from] paylabs_client::Error),
    #[error(transparent)]
    DbErr(#[from] sea_orm::DbErr),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Str(&'static str),
    #[error("{0}")]
    InvalidParam(String),
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("{0} not found")]
    NotFound(String),
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidParam(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::InvalidSignature => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Gateway(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Creates full response for error.
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": true,
            "status_code": self.status_code().as_u16(),
            "message": self.to_string()
        }))
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
