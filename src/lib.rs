//! Bare-metal (`no_std`) HAL for MicroBlaze-class I/O processors found in
//! FPGA overlay designs. Where applicable, drivers implement the
//! [embedded-hal] traits.
//!
//! ## Overview
//!
//! I/O processors in overlay designs sit behind a set of memory-mapped AXI
//! GPIO-style controllers, each exposing up to two channels of up to 32 pins,
//! and optionally an I/O switch which routes individual header pins to the
//! peripheral functions of the processor.
//!
//! The set of blocks present in a given overlay is not known to this crate at
//! compile time. Instead, the overlay's address map is described at runtime
//! with a [`platform::Platform`] value, and the [`gpio::Gpio`] driver is
//! built from that description. Capabilities that depend on optional blocks
//! (single-pin routing via the I/O switch) are reported through the
//! descriptor and fail with a well-defined error when absent.
//!
//! Pins are owned exclusively: every handle claims its pin range in a global
//! registry when it is created, and overlapping claims are refused. Handles
//! carry a generation counter, so operations on a closed handle are rejected
//! instead of touching pins the handle no longer owns.
//!
//! [embedded-hal]: https://github.com/rust-embedded/embedded-hal/tree/master/embedded-hal
//!
//! ## Feature Flags
#![doc = document_features::document_features!()]
#![deny(missing_docs)]
#![no_std]

// MUST be the first module
mod fmt;

pub mod gpio;
pub mod io_switch;
pub mod platform;

/// Number of pins exposed by one channel of a GPIO controller.
pub const PINS_PER_CHANNEL: u8 = 32;

/// Maximum number of GPIO controllers a platform descriptor can carry.
pub const MAX_CONTROLLERS: usize = 8;

/// Maximum number of channels per GPIO controller.
pub const MAX_CHANNELS: u8 = 2;

/// Capacity of the driver's handle table.
pub const MAX_HANDLES: usize = 16;
