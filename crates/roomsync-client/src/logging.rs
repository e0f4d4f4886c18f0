//! Log output for processes that embed the room store.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,roomsync_core=info,roomsync_client=debug";

/// Install a `fmt` subscriber for the store's `tracing` events.
///
/// The filter comes from `RUST_LOG` when it parses, else from `ROOMSYNC_LOG`,
/// else the store crates log at debug level and everything else at info.
/// Only the first call in a process installs anything.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_env_filter(pick_filter(|key| env::var(key).ok()))
        .try_init();
}

fn pick_filter(lookup: impl Fn(&str) -> Option<String>) -> EnvFilter {
    ["RUST_LOG", "ROOMSYNC_LOG"]
        .into_iter()
        .filter_map(|key| lookup(key).filter(|value| !value.trim().is_empty()))
        .find_map(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
