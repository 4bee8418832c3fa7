//! `warden-core`: the State Store (A), Claim Arbiter (B), Lifecycle Engine
//! (C), and Audit & Query Layer (G) for the decompilation-agent coordinator.
//!
//! Every other crate in the workspace reads and writes shared state only
//! through [`store::Store`]'s transactional API — there is no direct
//! cross-component linkage; all relationships are by identifier lookup
//! ("Cyclic references").

pub mod buildconfig;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use store::Store;
