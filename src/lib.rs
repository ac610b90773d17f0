//! One-way synchronization bridge from a portal search catalog into the
//! AIoD REST catalog.
//!
//! The crate is organized around three cores: the translation-and-upload
//! engine ([`bridge`]), the durable sync ledger ([`memory`]) and the
//! time-windowed ingestion driver ([`sync`]). The HTTP clients for both
//! catalogs ([`aiod`], [`source`]) sit behind traits so the engine can be
//! exercised without a network.

// Module declarations
pub mod aiod;
pub mod bridge;
pub mod config;
pub mod errors;
pub mod memory;
pub mod models;
pub mod platform;
pub mod queries;
pub mod source;
pub mod sync;

pub use crate::aiod::{AiodClient, ApiResult, CatalogApi, KeycloakAuth};
pub use crate::bridge::Bridge;
pub use crate::config::BridgeConfig;
pub use crate::errors::{AppError, AppResult};
pub use crate::memory::{memory_from_connection_string, Memory};
pub use crate::models::SourceRecord;
pub use crate::queries::QueryTemplates;
pub use crate::source::{PortalClient, SourceApi};
pub use crate::sync::CatalogSync;
