//! Corridor Guardian - device-side agent of the corridor relay
//!
//! Runs on the vehicle (or a viewer device) and talks to the kernel relay:
//! - Periodic position/battery sampling (`sampler`, `sources`)
//! - Reference-counted relay connection with room membership (`channel`, `mqtt`)
//! - Per-trip telemetry publishing into `safe-<vehicleId>` (`session`)
//! - Pre-arrival notes: persisted over REST, mirrored onto the zone (`prearrival`)

pub mod channel;
pub mod config;
pub mod mqtt;
pub mod prearrival;
pub mod sampler;
pub mod session;
pub mod sources;
