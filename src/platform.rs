//! Runtime description of the overlay's I/O address map.
//!
//! An overlay design wires up some number of GPIO controllers and, on boards
//! with a routable header, an I/O switch. Which blocks exist, and where they
//! live in the address space, is a property of the bitstream rather than of
//! this crate, so it is described at runtime: the overlay loader (or a board
//! support crate) builds a [`Platform`] and hands it to
//! [`Gpio::new`](crate::gpio::Gpio::new).
//!
//! The descriptor doubles as the capability query: [`Platform::device_count`]
//! reports how many controllers can be opened, and
//! [`Platform::has_pin_routing`] whether single-pin handles are available.

use crate::{MAX_CHANNELS, MAX_CONTROLLERS};

/// Description of one memory-mapped GPIO controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Controller {
    base: usize,
    channels: u8,
}

impl Controller {
    /// Describes a single-channel controller at `base`.
    pub const fn new(base: usize) -> Self {
        Self { base, channels: 1 }
    }

    /// Sets the number of channels the controller exposes.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is zero or larger than [`MAX_CHANNELS`].
    pub const fn with_channels(mut self, channels: u8) -> Self {
        ::core::assert!(channels >= 1 && channels <= MAX_CHANNELS);
        self.channels = channels;
        self
    }

    /// Base address of the controller's register block.
    #[inline]
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Number of channels the controller exposes.
    #[inline]
    pub const fn channels(&self) -> u8 {
        self.channels
    }
}

/// Description of the I/O switch routing block.
///
/// The switch sits between the board's header pins and the processor's
/// peripherals. Pins routed to the GPIO function terminate on one of the
/// platform's controllers; `device` names that controller by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IoSwitch {
    base: usize,
    device: u8,
    pins: u8,
}

impl IoSwitch {
    /// Describes an I/O switch at `base` whose GPIO function terminates on
    /// controller `device`.
    pub const fn new(base: usize, device: u8) -> Self {
        Self {
            base,
            device,
            pins: crate::PINS_PER_CHANNEL,
        }
    }

    /// Sets the number of routable header pins.
    ///
    /// # Panics
    ///
    /// Panics if `pins` is zero or larger than
    /// [`PINS_PER_CHANNEL`](crate::PINS_PER_CHANNEL).
    pub const fn with_pins(mut self, pins: u8) -> Self {
        ::core::assert!(pins >= 1 && pins <= crate::PINS_PER_CHANNEL);
        self.pins = pins;
        self
    }

    /// Base address of the switch's register block.
    #[inline]
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Index of the controller the routed pins terminate on.
    #[inline]
    pub const fn device(&self) -> u8 {
        self.device
    }

    /// Number of routable header pins.
    #[inline]
    pub const fn pins(&self) -> u8 {
        self.pins
    }
}

/// The overlay's I/O address map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Platform {
    controllers: heapless::Vec<Controller, MAX_CONTROLLERS>,
    io_switch: Option<IoSwitch>,
}

impl Platform {
    /// Creates an empty platform description.
    pub const fn new() -> Self {
        Self {
            controllers: heapless::Vec::new(),
            io_switch: None,
        }
    }

    /// Adds a GPIO controller to the description.
    ///
    /// Controllers are indexed in the order they are added.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_CONTROLLERS`] controllers are added.
    pub fn with_controller(mut self, controller: Controller) -> Self {
        if self.controllers.push(controller).is_err() {
            panic!("too many GPIO controllers");
        }
        self
    }

    /// Adds the I/O switch to the description.
    pub fn with_io_switch(mut self, io_switch: IoSwitch) -> Self {
        self.io_switch = Some(io_switch);
        self
    }

    /// Number of GPIO controllers present.
    #[inline]
    pub fn device_count(&self) -> usize {
        self.controllers.len()
    }

    /// Whether the platform can route individual header pins to GPIO.
    #[inline]
    pub fn has_pin_routing(&self) -> bool {
        self.io_switch.is_some()
    }

    /// The controller at `device`, if present.
    #[inline]
    pub fn controller(&self, device: usize) -> Option<&Controller> {
        self.controllers.get(device)
    }

    pub(crate) fn io_switch(&self) -> Option<&IoSwitch> {
        self.io_switch.as_ref()
    }
}
