//! Subsystem power-state coordination for Intel MID-class SoCs.
//!
//! The engine tracks an OS-requested power level (D0i0..D0i3) for up to 64
//! logical sub-systems (LSS), keeps that request set synchronized with the
//! SCU power-management firmware through the memory-mapped PMU register
//! block, gates entry into the platform idle states (S0i1/LPMP3/S0i3/S3),
//! and sequences the north-complex power islands over the message bus.
//!
//! Hardware access goes through the [`pmu::hw::PmuBus`] trait, so the whole
//! engine runs against a mock bus in the unit tests.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod logging;
pub mod serial;

pub mod pmu;

pub use pmu::{PmuConfig, PmuEngine, PmuError, PowerLevel, SleepState};
