//! Tracing setup for binaries and tests embedding the engine.
//!
//! The engine itself only emits `tracing` events; installing a
//! subscriber is the host's choice.

use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install a global fmt subscriber honoring `RUST_LOG`, defaulting to
/// the given directive. Second call is a no-op (init may race in
/// tests).
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish()
        .try_init();
}
