#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Channel Sounding ranging controller shared by firmware and host tooling.
//
// The crate owns the per-connection negotiation state machine, the
// configuration registry, the ranging data path and the distance filter. It
// avoids the standard library so the same logic runs on the SoC and inside the
// host emulator.

pub mod config;
pub mod controller;
pub mod events;
pub mod filter;
pub mod hci;
pub mod procedure;
pub mod ranging;
pub mod repl;
pub mod telemetry;

pub use controller::RangingController;
pub use procedure::{ConnHandle, CsRole, LinkRole, Step};
