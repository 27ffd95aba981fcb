//! Cardhub - fan-out/collect core for card connectors
//!
//! Connectors answer one inbound request by calling a backend once per work
//! item, in parallel, and returning every successful payload as a single
//! collection. This crate provides the pieces they share:
//!
//! - [`context`]: request context carried across task and thread hops
//! - [`deferred`]: bridge from callback-style backend calls to futures
//! - [`classify`]: per-connector rules for which backend failures to drop
//! - [`aggregate`]: the fan-out/collect aggregator itself
//! - [`response`]: translation of an aggregate's outcome for the host

pub mod aggregate;
pub mod backend;
pub mod classify;
pub mod config;
pub mod context;
pub mod deferred;
pub mod response;
pub mod utils;


pub use aggregate::{aggregate, AggregateError, Aggregator};
pub use backend::{BackendCall, HttpBackend};
pub use classify::{classify, BackendError, Outcome, SuppressionPolicy};
pub use config::{Config, ConnectorConfig};
pub use context::{ContextCarrier, RequestContext};
pub use deferred::{bridge, Deferred};
pub use response::{respond, Cards, ErrorResponse};
