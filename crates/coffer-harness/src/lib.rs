//! Deterministic simulation harness for the Coffer device core.
//!
//! Everything the device touches is virtual here: a seeded RNG stands in
//! for the hardware entropy source, a millisecond counter for the clock,
//! and an in-memory flash (optionally with a power-loss cutoff) for the
//! real array. The [`SimHost`] drives a device exactly the way a USB host
//! plus a human finger would: wire packets in, button edges and clock
//! ticks as explicit events.
//!
//! # Invariant testing
//!
//! The [`invariants`] module checks behavioral properties over device
//! snapshots after every step of a scripted or randomized run, in the
//! style of a model-based test: WHAT must hold, not which scenario ran.

pub mod chaos;
pub mod env;
pub mod firmware;
pub mod host;
pub mod invariants;

pub use chaos::CutoffFlash;
pub use env::{SeededEntropy, SimInstant};
pub use firmware::FirmwareImage;
pub use host::SimHost;
pub use invariants::{DeviceSnapshot, Invariant, InvariantRegistry, Violation};

/// Install a log subscriber for scenario debugging.
///
/// Safe to call from every test; only the first wins. Control with
/// `COFFER_LOG=debug`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter =
        EnvFilter::try_from_env("COFFER_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(filter)
        .try_init();
}
