//! Errors from the scratch-service HTTP client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScratchError {
    #[error("request to scratch service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("scratch service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("ownership of scratch {slug} could not be reclaimed")]
    OwnershipLost { slug: String },

    #[error("no candidate scratch-service URL responded")]
    NoBaseUrlAvailable,

    #[error("invalid base URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("failed to (de)serialize scratch-client state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error persisting scratch-client state: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScratchError>;
