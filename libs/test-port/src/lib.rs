//! Calibration and diagnostic engine for the trip-unit test port.
//!
//! This crate is the command/calibration layer of the firmware: the ASCII
//! test-port tokenizer and dispatcher, the offset/gain/phase calibration
//! engines, the on-board signal-injection driver and its own calibration,
//! and the execute-action protocol front end. Everything runs under a
//! cooperative scheduler: each `tick()` does a bounded amount of work and
//! records its progress in explicit state machines.
//!
//! Hardware (the sampling aggregates, waveform capture, injection DAC,
//! persistent stores) is reached exclusively through the capability traits
//! in [`hw`] and [`store`], which keeps the crate `no_std` and
//! host-testable via the library target.

#![no_std]

#[cfg(test)]
extern crate std;

// This must go first so the macros are visible to the other modules.
#[macro_use]
pub(crate) mod fmt;

pub mod cal;
pub mod dispatch;
pub mod display;
pub mod exact;
pub mod hw;
pub mod inject;
pub mod session;
pub mod sim;
pub mod store;
pub mod token;

pub use dispatch::TestPort;
pub use exact::ExecuteAction;
pub use hw::{CalPath, Channel, Hardware};
pub use store::{BlockKind, CalRam, CalStore, SensingConfig};
