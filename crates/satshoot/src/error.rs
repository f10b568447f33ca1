//! Error types for the sync layer

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(#[from] nostr_client::ClientError),

    #[error("transport error: {0}")]
    TransportMessage(String),

    #[error("no relay connected")]
    NoRelays,

    #[error("no signer available")]
    NoSigner,

    #[error("signing failed: {0}")]
    Signer(String),

    #[error("web of trust unavailable: {0}")]
    WotUnavailable(String),

    #[error("invalid relay list: {0}")]
    RelayList(#[from] nostr::Nip65Error),

    #[error("invalid event field: {0}")]
    Field(#[from] crate::events::FieldError),

    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
