//! Near-real-time ride dispatch engine.
//!
//! Matches pending ride requests from the passenger-side store against
//! drivers in the driver-side store, reserves the chosen driver and writes a
//! proposal transactionally, and keeps both stores' lifecycle state in sync
//! while the ride progresses. The stores themselves are external; the engine
//! only consumes the [`store::DocumentStore`] interface.

pub mod config;
pub mod engine;
pub mod ingestion;
pub mod location_sync;
pub mod matcher;
pub mod proposal_sync;
pub mod reservation;
pub mod retry;
pub mod store;
pub mod telemetry;

#[cfg(feature = "test-helpers")]
pub mod memory;
