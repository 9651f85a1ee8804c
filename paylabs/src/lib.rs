#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Signature(#[from] rsa::signature::Error),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("paylabs returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("paylabs error: {code} - {desc}")]
    Psp { code: String, desc: String },
    #[error("invalid: {0}")]
    Invalid(String),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

pub mod signature;
pub use signature::{Signer, Verifier};

pub mod gateway;
pub use gateway::{
    CancelResult, Gateway, Notification, OpenRequest, PaymentActions, PaymentDisplay,
    PaymentMethod, QueryResult, TradeStatus, Transaction,
};

pub mod client;
pub use client::{notify_url, Paylabs, PaylabsConfig};
