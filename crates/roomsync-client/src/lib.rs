//! Runtime side of the room store: push event applier, request façade,
//! RPC transport seam, configuration and logging bootstrap.

/// Push frame dispatch into the store.
pub mod applier;
/// Environment-backed configuration.
pub mod config;
/// Tracing subscriber setup.
pub mod logging;
/// Outbound requests with per-room in-flight guards.
pub mod requests;
/// RPC transport trait and method names.
pub mod transport;

pub use applier::{ApplierTask, SyncApplier};
pub use config::{ClientConfig, ConfigError};
pub use requests::{LoadOutcome, MediaDownload, RequestFacade, SendMessageParams};
pub use transport::{RpcTransport, method};
