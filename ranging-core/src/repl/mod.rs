//! Operator console shared between firmware and emulator targets.
//!
//! Lines are tokenized and parsed in [`grammar`], then dispatched to a
//! [`commands::RangingControl`] implementation by [`commands::CommandExecutor`].

pub mod catalog;
pub mod commands;
pub mod grammar;
pub mod status;
