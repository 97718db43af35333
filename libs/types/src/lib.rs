//! Types library for the market-data feed
//!
//! Shared definitions used by the market-data library and the gateway
//! binary.
//!
//! # Modules
//! - `ids`: Identifiers (TickerId, SubscriberId, SyncJobId)
//! - `market`: Symbols, contracts, quotes and tick messages
//! - `health`: Health status, DHI records and snapshots
//! - `sync`: Sync-job audit records
//! - `errors`: Error taxonomy

pub mod ids;
pub mod market;
pub mod health;
pub mod sync;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::market::*;
    pub use crate::health::*;
    pub use crate::sync::*;
    pub use crate::errors::*;
}
