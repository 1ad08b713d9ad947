//! Spotwise Core - Shared types and traits
//!
//! This crate defines the core abstractions used across:
//! - spotwise-orchestrator (retry engine, completion poller, spot decisions)
//! - per-cloud provider adapters (implemented outside this workspace)
//!
//! Key types:
//! - ProviderAdapter trait (interface for cloud providers)
//! - Spot configuration, price quotes and interruption events
//! - Error taxonomy shared by every layer

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
