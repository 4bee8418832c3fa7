//! Error types for the State Store (component A) and the layers built on it.

use thiserror::Error;

use crate::model::{AgentId, FunctionName, SubdirectoryKey};

/// Errors surfaced by the State Store, Claim Arbiter, and Lifecycle Engine.
///
/// Variants map onto the taxonomy in : `ClaimHeld`/`LockHeld` are
/// precondition errors (no state change, surfaced immediately); `Sqlite` and
/// `Migration` are schema/integrity errors and indicate a fatal bug if they
/// ever escape a fresh database.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("function '{name}' is already claimed by agent '{holder}'")]
    ClaimHeld { name: FunctionName, holder: AgentId },

    #[error("agent '{agent}' already holds a claim on '{name}'; agents must not double-claim")]
    DoubleClaim { name: FunctionName, agent: AgentId },

    #[error("no active claim on '{name}' held by agent '{agent}'")]
    ClaimNotHeldByAgent { name: FunctionName, agent: AgentId },

    #[error("subdirectory '{key}' is already locked by agent '{holder}'")]
    LockHeld { key: SubdirectoryKey, holder: AgentId },

    #[error("no active lock on '{key}' held by agent '{agent}'")]
    LockNotHeldByAgent { key: SubdirectoryKey, agent: AgentId },

    #[error("function '{0}' not found")]
    FunctionNotFound(FunctionName),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("schema migration failed: {0}")]
    Migration(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
