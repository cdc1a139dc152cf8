//! # General Purpose Input/Output (GPIO)
//!
//! ## Overview
//!
//! The [`Gpio`] driver gives handle-based access to the overlay's GPIO
//! controllers. A handle ([`GpioHandle`]) represents either a whole
//! controller, a sub-range of pins on one of its channels, or a single
//! header pin routed through the I/O switch.
//!
//! Handles are created with [`Gpio::open_device`], [`Gpio::configure`] and
//! [`Gpio::open_pin`], and released with [`Gpio::close`], which also
//! tristates the pins. Every handle claims its pins in a global registry
//! when it is created; overlapping claims are refused with
//! [`Error::Claimed`], so two live handles can never drive the same pins.
//!
//! Values are bit-packed: a handle over pins `[low, high]` reads and writes
//! a `(high - low + 1)`-bit value in the low bits of a `u32`.
//!
//! ## Working with single pins
//!
//! For handles covering exactly one pin, the [`Input`] and [`Output`]
//! drivers wrap a handle and borrow the driver. They implement the
//! pin-related traits from [embedded-hal].
//!
//! [embedded-hal]: embedded_hal

use core::cell::RefCell;

use critical_section::Mutex;

use crate::{
    MAX_HANDLES,
    PINS_PER_CHANNEL,
    io_switch::{Function, SwitchRegs},
    platform::Platform,
};

/// GPIO driver errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The device index does not name a controller present on the platform.
    InvalidDevice,

    /// The pin range is empty, reversed, or exceeds the channel width.
    InvalidRange,

    /// The channel index exceeds the controller's channel count.
    InvalidChannel,

    /// The handle has been closed, or does not belong to this driver.
    InvalidHandle,

    /// The operation requires a whole-controller handle.
    ///
    /// Sub-ranges can only be derived from handles returned by
    /// [`Gpio::open_device`], not from other sub-ranges or routed pins.
    NotAController,

    /// Some of the requested pins are claimed by another live handle.
    Claimed,

    /// The controller is already open as a whole device.
    DeviceInUse,

    /// The handle's direction does not permit the operation.
    ///
    /// Reading requires the handle to have been set to input, writing to
    /// output. A handle whose direction was never set rejects both.
    WrongDirection,

    /// The platform has no I/O switch, so single pins cannot be routed.
    NoPinRouting,

    /// The handle table is full.
    Exhausted,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidDevice => write!(f, "Device index out of range"),
            Error::InvalidRange => write!(f, "Pin range out of range"),
            Error::InvalidChannel => write!(f, "Channel index out of range"),
            Error::InvalidHandle => write!(f, "Handle is closed or invalid"),
            Error::NotAController => write!(f, "Operation requires a whole-controller handle"),
            Error::Claimed => write!(f, "Pins are claimed by another handle"),
            Error::DeviceInUse => write!(f, "Controller is already open"),
            Error::WrongDirection => write!(f, "Handle direction does not permit the operation"),
            Error::NoPinRouting => write!(f, "Platform has no I/O switch"),
            Error::Exhausted => write!(f, "Handle table is full"),
        }
    }
}

impl core::error::Error for Error {}

#[cfg(feature = "embedded-hal")]
impl embedded_hal::digital::Error for Error {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

/// Digital input or output level.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    /// Low
    Low,
    /// High
    High,
}

impl core::ops::Not for Level {
    type Output = Self;

    fn not(self) -> Self {
        match self {
            Self::Low => Self::High,
            Self::High => Self::Low,
        }
    }
}

impl From<bool> for Level {
    fn from(val: bool) -> Self {
        match val {
            true => Self::High,
            false => Self::Low,
        }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> bool {
        match level {
            Level::Low => false,
            Level::High => true,
        }
    }
}

/// Direction of the pins under a handle.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// The pins are inputs.
    Input,
    /// The pins are outputs.
    Output,
}

/// Handle to an open controller, pin range, or routed pin.
///
/// Handles are plain copyable values. They stay tied to the slot they were
/// created in: after [`Gpio::close`], the slot's generation is bumped and
/// every copy of the handle is rejected with [`Error::InvalidHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpioHandle {
    slot: u8,
    generation: u16,
}

// One claim entry per live handle with a pin claim.
const CLAIMED_RANGES: usize = 64;
const CLAIMED_DEVICES: usize = 32;

struct Claim {
    base: usize,
    channel: u8,
    mask: u32,
}

/// Registry of claimed pins, keyed by controller base address.
///
/// Global rather than per-driver so that a driver rebuilt over the same
/// address map cannot re-claim pins a previous instance still holds.
struct Claims {
    ranges: heapless::Vec<Claim, CLAIMED_RANGES>,
    devices: heapless::Vec<usize, CLAIMED_DEVICES>,
}

impl Claims {
    const fn new() -> Self {
        Self {
            ranges: heapless::Vec::new(),
            devices: heapless::Vec::new(),
        }
    }

    fn claim_range(&mut self, base: usize, channel: u8, mask: u32) -> Result<(), Error> {
        for claim in self.ranges.iter() {
            if claim.base == base && claim.channel == channel && claim.mask & mask != 0 {
                return Err(Error::Claimed);
            }
        }
        self.ranges
            .push(Claim {
                base,
                channel,
                mask,
            })
            .map_err(|_| Error::Exhausted)
    }

    fn release_range(&mut self, base: usize, channel: u8, mask: u32) {
        for claim in self.ranges.iter_mut() {
            if claim.base == base && claim.channel == channel {
                claim.mask &= !mask;
            }
        }
        self.ranges.retain(|claim| claim.mask != 0);
    }

    fn claim_device(&mut self, base: usize) -> Result<(), Error> {
        if self.devices.contains(&base) {
            return Err(Error::DeviceInUse);
        }
        self.devices.push(base).map_err(|_| Error::Exhausted)
    }

    fn release_device(&mut self, base: usize) {
        self.devices.retain(|&claimed| claimed != base);
    }

    fn release_controller(&mut self, base: usize) {
        self.ranges.retain(|claim| claim.base != base);
        self.devices.retain(|&claimed| claimed != base);
    }
}

static CLAIMS: Mutex<RefCell<Claims>> = Mutex::new(RefCell::new(Claims::new()));

fn with_claims<R>(f: impl FnOnce(&mut Claims) -> R) -> R {
    critical_section::with(|cs| f(&mut CLAIMS.borrow_ref_mut(cs)))
}

/// Register access for one AXI GPIO-style controller.
///
/// Channel `c` has its data register at `base + 8 * c` and its tristate
/// register at `base + 8 * c + 4`. A tristate bit of 1 puts the pin into
/// input/high-impedance state, 0 drives it.
#[derive(Debug, Clone, Copy)]
struct CtrlRegs {
    base: usize,
}

impl CtrlRegs {
    const CHANNEL_STRIDE: usize = 0x8;
    const TRI_OFFSET: usize = 0x4;

    const fn new(base: usize) -> Self {
        Self { base }
    }

    fn data_ptr(self, channel: u8) -> *mut u32 {
        (self.base + Self::CHANNEL_STRIDE * channel as usize) as *mut u32
    }

    fn tri_ptr(self, channel: u8) -> *mut u32 {
        (self.base + Self::CHANNEL_STRIDE * channel as usize + Self::TRI_OFFSET) as *mut u32
    }

    fn read_data(self, channel: u8) -> u32 {
        unsafe { self.data_ptr(channel).read_volatile() }
    }

    fn modify_data(self, channel: u8, field_mask: u32, bits: u32) {
        let ptr = self.data_ptr(channel);
        let current = unsafe { ptr.read_volatile() };
        unsafe { ptr.write_volatile(current & !field_mask | bits & field_mask) };
    }

    fn modify_tri(self, channel: u8, field_mask: u32, tristate: bool) {
        let ptr = self.tri_ptr(channel);
        let current = unsafe { ptr.read_volatile() };
        let value = if tristate {
            current | field_mask
        } else {
            current & !field_mask
        };
        unsafe { ptr.write_volatile(value) };
    }
}

#[derive(Debug, Clone, Copy)]
struct Range {
    device: u8,
    channel: u8,
    low: u8,
    high: u8,
    direction: Option<Direction>,
    owns_device: bool,
}

impl Range {
    fn width(&self) -> u8 {
        self.high - self.low + 1
    }

    /// Value mask, right-aligned.
    fn mask(&self) -> u32 {
        u32::MAX >> (32 - self.width() as u32)
    }

    /// Value mask, in register position.
    fn field_mask(&self) -> u32 {
        self.mask() << self.low
    }
}

struct Slot {
    generation: u16,
    range: Option<Range>,
}

impl Slot {
    const EMPTY: Slot = Slot {
        generation: 0,
        range: None,
    };
}

/// GPIO driver for the platform's controllers.
///
/// Constructed from a [`Platform`] description, which it consumes. All
/// handles are created through, and addressed to, this driver.
pub struct Gpio {
    platform: Platform,
    slots: [Slot; MAX_HANDLES],
}

impl Gpio {
    /// Creates the driver for the given platform.
    pub fn new(platform: Platform) -> Self {
        debug!("gpio: driver created, {} controllers", platform.device_count());
        Self {
            platform,
            slots: [Slot::EMPTY; MAX_HANDLES],
        }
    }

    /// Number of GPIO controllers available on the platform.
    ///
    /// Stable for the lifetime of the driver; valid device indices are
    /// `0..device_count()`.
    #[inline]
    pub fn device_count(&self) -> usize {
        self.platform.device_count()
    }

    /// Opens a whole controller.
    ///
    /// The returned handle covers the full width of the controller's first
    /// channel and is the only handle sub-ranges can be derived from. The
    /// controller stays owned until the handle is closed: a second
    /// `open_device` for the same controller returns [`Error::DeviceInUse`].
    pub fn open_device(&mut self, device: usize) -> Result<GpioHandle, Error> {
        let ctrl = self.platform.controller(device).ok_or(Error::InvalidDevice)?;
        let base = ctrl.base();

        let slot = self.free_slot()?;
        with_claims(|claims| claims.claim_device(base))?;

        let handle = self.fill_slot(
            slot,
            Range {
                device: device as u8,
                channel: 0,
                low: 0,
                high: PINS_PER_CHANNEL - 1,
                direction: None,
                owns_device: true,
            },
        );
        debug!("gpio: opened device {}", device);
        Ok(handle)
    }

    /// Opens a single header pin as its own handle.
    ///
    /// Routes the pin to the GPIO function through the platform's I/O
    /// switch, claims it, and returns a one-pin-wide handle. On platforms
    /// without an I/O switch this returns [`Error::NoPinRouting`].
    pub fn open_pin(&mut self, pin: u8) -> Result<GpioHandle, Error> {
        let switch = *self.platform.io_switch().ok_or(Error::NoPinRouting)?;
        if pin >= switch.pins() {
            return Err(Error::InvalidRange);
        }
        let device = switch.device() as usize;
        let ctrl = self.platform.controller(device).ok_or(Error::InvalidDevice)?;
        let base = ctrl.base();

        let slot = self.free_slot()?;
        with_claims(|claims| claims.claim_range(base, 0, 1 << pin))?;
        SwitchRegs::new(switch.base()).set_function(pin, Function::Gpio);

        let handle = self.fill_slot(
            slot,
            Range {
                device: device as u8,
                channel: 0,
                low: pin,
                high: pin,
                direction: None,
                owns_device: false,
            },
        );
        debug!("gpio: opened pin {}", pin);
        Ok(handle)
    }

    /// Derives a handle for pins `[low, high]` on `channel` of a controller.
    ///
    /// `parent` must be a whole-controller handle returned by
    /// [`Gpio::open_device`]. The same parent can be configured repeatedly
    /// to create independent child ranges, as long as the ranges do not
    /// overlap any outstanding claim.
    pub fn configure(
        &mut self,
        parent: GpioHandle,
        low: u8,
        high: u8,
        channel: u8,
    ) -> Result<GpioHandle, Error> {
        let parent_range = self.range(parent)?;
        if !parent_range.owns_device {
            return Err(Error::NotAController);
        }
        let device = parent_range.device;
        let ctrl = unwrap!(self.platform.controller(device as usize));
        if channel >= ctrl.channels() {
            return Err(Error::InvalidChannel);
        }
        if low > high || high >= PINS_PER_CHANNEL {
            return Err(Error::InvalidRange);
        }
        let base = ctrl.base();

        let range = Range {
            device,
            channel,
            low,
            high,
            direction: None,
            owns_device: false,
        };

        let slot = self.free_slot()?;
        with_claims(|claims| claims.claim_range(base, channel, range.field_mask()))?;

        let handle = self.fill_slot(slot, range);
        debug!(
            "gpio: configured range {}..={} on device {} channel {}",
            low, high, device, channel
        );
        Ok(handle)
    }

    /// Sets the direction of all pins under the handle.
    ///
    /// For a whole-controller handle this programs every channel of the
    /// controller.
    pub fn set_direction(&mut self, handle: GpioHandle, direction: Direction) -> Result<(), Error> {
        let range = self.range(handle)?;
        let regs = self.regs(range.device);
        let tristate = direction == Direction::Input;

        if range.owns_device {
            let channels = unwrap!(self.platform.controller(range.device as usize)).channels();
            for channel in 0..channels {
                regs.modify_tri(channel, u32::MAX, tristate);
            }
        } else {
            regs.modify_tri(range.channel, range.field_mask(), tristate);
        }

        let slot = handle.slot as usize;
        unwrap!(self.slots[slot].range.as_mut()).direction = Some(direction);
        trace!("gpio: set direction {:?} on slot {}", direction, handle.slot);
        Ok(())
    }

    /// Reads the pins under the handle.
    ///
    /// Returns the bit-packed value of the range, shifted down so the lowest
    /// pin is bit 0 and masked to the range width. The handle must have been
    /// set to input with [`Gpio::set_direction`].
    pub fn read(&self, handle: GpioHandle) -> Result<u32, Error> {
        let range = self.range(handle)?;
        if range.direction != Some(Direction::Input) {
            return Err(Error::WrongDirection);
        }
        let value = self.regs(range.device).read_data(range.channel);
        Ok((value >> range.low) & range.mask())
    }

    /// Writes the pins under the handle.
    ///
    /// `data` is masked to the range width and shifted into place; pins
    /// outside the range are untouched. The handle must have been set to
    /// output with [`Gpio::set_direction`].
    pub fn write(&mut self, handle: GpioHandle, data: u32) -> Result<(), Error> {
        let range = self.range(handle)?;
        if range.direction != Some(Direction::Output) {
            return Err(Error::WrongDirection);
        }
        self.write_field(range, data);
        Ok(())
    }

    /// Inverts the output pins under the handle.
    pub fn toggle(&mut self, handle: GpioHandle) -> Result<(), Error> {
        let range = self.range(handle)?;
        if range.direction != Some(Direction::Output) {
            return Err(Error::WrongDirection);
        }
        let regs = self.regs(range.device);
        let current = regs.read_data(range.channel);
        regs.modify_data(range.channel, range.field_mask(), !current);
        Ok(())
    }

    /// Reads the level of a single-pin input handle.
    pub fn level(&self, handle: GpioHandle) -> Result<Level, Error> {
        let range = self.range(handle)?;
        if range.width() != 1 {
            return Err(Error::InvalidRange);
        }
        self.read(handle).map(|value| Level::from(value != 0))
    }

    /// Reads back the driven level of a single-pin output handle.
    pub fn output_level(&self, handle: GpioHandle) -> Result<Level, Error> {
        let range = self.range(handle)?;
        if range.width() != 1 {
            return Err(Error::InvalidRange);
        }
        if range.direction != Some(Direction::Output) {
            return Err(Error::WrongDirection);
        }
        let value = self.regs(range.device).read_data(range.channel);
        Ok(Level::from(value >> range.low & 1 != 0))
    }

    /// Closes the handle and tristates its pins.
    ///
    /// The pins return to high-impedance state and their claims are
    /// released. For a whole-controller handle every channel is tristated
    /// and the controller can be opened again. The handle (and every copy
    /// of it) becomes invalid; further operations on it, including a second
    /// `close`, return [`Error::InvalidHandle`].
    pub fn close(&mut self, handle: GpioHandle) -> Result<(), Error> {
        let range = self.range(handle)?;
        let ctrl = unwrap!(self.platform.controller(range.device as usize));
        let base = ctrl.base();
        let regs = self.regs(range.device);

        if range.owns_device {
            for channel in 0..ctrl.channels() {
                regs.modify_tri(channel, u32::MAX, true);
            }
            with_claims(|claims| claims.release_device(base));
        } else {
            regs.modify_tri(range.channel, range.field_mask(), true);
            with_claims(|claims| claims.release_range(base, range.channel, range.field_mask()));
        }

        let slot = &mut self.slots[handle.slot as usize];
        slot.range = None;
        slot.generation = slot.generation.wrapping_add(1);
        debug!("gpio: closed slot {}", handle.slot);
        Ok(())
    }

    fn free_slot(&self) -> Result<usize, Error> {
        self.slots
            .iter()
            .position(|slot| slot.range.is_none())
            .ok_or(Error::Exhausted)
    }

    fn fill_slot(&mut self, slot: usize, range: Range) -> GpioHandle {
        self.slots[slot].range = Some(range);
        GpioHandle {
            slot: slot as u8,
            generation: self.slots[slot].generation,
        }
    }

    fn range(&self, handle: GpioHandle) -> Result<Range, Error> {
        let slot = self
            .slots
            .get(handle.slot as usize)
            .ok_or(Error::InvalidHandle)?;
        if slot.generation != handle.generation {
            return Err(Error::InvalidHandle);
        }
        slot.range.ok_or(Error::InvalidHandle)
    }

    fn regs(&self, device: u8) -> CtrlRegs {
        CtrlRegs::new(unwrap!(self.platform.controller(device as usize)).base())
    }

    fn write_field(&mut self, range: Range, data: u32) {
        self.regs(range.device).modify_data(
            range.channel,
            range.field_mask(),
            (data & range.mask()) << range.low,
        );
    }
}

impl Drop for Gpio {
    fn drop(&mut self) {
        // The registry outlives the driver; forget this driver's claims so a
        // rebuilt driver over the same address map starts clean.
        for device in 0..self.platform.device_count() {
            let base = unwrap!(self.platform.controller(device)).base();
            with_claims(|claims| claims.release_controller(base));
        }
    }
}

/// Single-pin input driver over a one-pin handle.
///
/// Borrows the GPIO driver for its lifetime and sets the handle to input at
/// construction.
pub struct Input<'d> {
    gpio: &'d mut Gpio,
    handle: GpioHandle,
}

impl<'d> Input<'d> {
    /// Creates an input driver for a single-pin handle.
    ///
    /// Returns [`Error::InvalidRange`] if the handle covers more than one
    /// pin.
    pub fn new(gpio: &'d mut Gpio, handle: GpioHandle) -> Result<Self, Error> {
        if gpio.range(handle)?.width() != 1 {
            return Err(Error::InvalidRange);
        }
        gpio.set_direction(handle, Direction::Input)?;
        Ok(Self { gpio, handle })
    }

    /// Current level of the pin.
    #[inline]
    pub fn level(&self) -> Result<Level, Error> {
        self.gpio.level(self.handle)
    }

    /// Whether the pin is high.
    #[inline]
    pub fn is_high(&self) -> Result<bool, Error> {
        self.level().map(|level| level == Level::High)
    }

    /// Whether the pin is low.
    #[inline]
    pub fn is_low(&self) -> Result<bool, Error> {
        self.level().map(|level| level == Level::Low)
    }

    /// Releases the borrow, returning the underlying handle.
    #[inline]
    pub fn into_handle(self) -> GpioHandle {
        self.handle
    }
}

/// Single-pin output driver over a one-pin handle.
///
/// Borrows the GPIO driver for its lifetime. The pin is driven to
/// `initial_level` before the output is enabled, so it never glitches
/// through the opposite level.
pub struct Output<'d> {
    gpio: &'d mut Gpio,
    handle: GpioHandle,
}

impl<'d> Output<'d> {
    /// Creates an output driver for a single-pin handle.
    ///
    /// Returns [`Error::InvalidRange`] if the handle covers more than one
    /// pin.
    pub fn new(gpio: &'d mut Gpio, handle: GpioHandle, initial_level: Level) -> Result<Self, Error> {
        let range = gpio.range(handle)?;
        if range.width() != 1 {
            return Err(Error::InvalidRange);
        }
        // Latch the level while the pin is still tristated.
        gpio.write_field(range, bool::from(initial_level) as u32);
        gpio.set_direction(handle, Direction::Output)?;
        Ok(Self { gpio, handle })
    }

    /// Drives the pin to `level`.
    #[inline]
    pub fn set_level(&mut self, level: Level) -> Result<(), Error> {
        self.gpio.write(self.handle, bool::from(level) as u32)
    }

    /// Drives the pin high.
    #[inline]
    pub fn set_high(&mut self) -> Result<(), Error> {
        self.set_level(Level::High)
    }

    /// Drives the pin low.
    #[inline]
    pub fn set_low(&mut self) -> Result<(), Error> {
        self.set_level(Level::Low)
    }

    /// Inverts the driven level.
    #[inline]
    pub fn toggle(&mut self) -> Result<(), Error> {
        self.gpio.toggle(self.handle)
    }

    /// Level the pin is currently driven to.
    #[inline]
    pub fn level(&self) -> Result<Level, Error> {
        self.gpio.output_level(self.handle)
    }

    /// Whether the pin is driven high.
    #[inline]
    pub fn is_set_high(&self) -> Result<bool, Error> {
        self.level().map(|level| level == Level::High)
    }

    /// Whether the pin is driven low.
    #[inline]
    pub fn is_set_low(&self) -> Result<bool, Error> {
        self.level().map(|level| level == Level::Low)
    }

    /// Releases the borrow, returning the underlying handle.
    #[inline]
    pub fn into_handle(self) -> GpioHandle {
        self.handle
    }
}

#[cfg(feature = "embedded-hal")]
impl embedded_hal::digital::ErrorType for Input<'_> {
    type Error = Error;
}

#[cfg(feature = "embedded-hal")]
impl embedded_hal::digital::InputPin for Input<'_> {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Input::is_high(self)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Input::is_low(self)
    }
}

#[cfg(feature = "embedded-hal")]
impl embedded_hal::digital::ErrorType for Output<'_> {
    type Error = Error;
}

#[cfg(feature = "embedded-hal")]
impl embedded_hal::digital::OutputPin for Output<'_> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Output::set_low(self)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Output::set_high(self)
    }
}

#[cfg(feature = "embedded-hal")]
impl embedded_hal::digital::StatefulOutputPin for Output<'_> {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Output::is_set_high(self)
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Output::is_set_low(self)
    }
}

#[cfg(test)]
mod tests {
    use core::cell::UnsafeCell;

    use super::*;
    use crate::platform::{Controller, IoSwitch};

    // In-memory stand-in for a two-channel controller's register block.
    // Layout matches CtrlRegs: [data0, tri0, data1, tri1].
    struct FakeController {
        regs: UnsafeCell<[u32; 4]>,
    }

    impl FakeController {
        fn new() -> Self {
            // Tristate registers reset to all-inputs.
            Self {
                regs: UnsafeCell::new([0, u32::MAX, 0, u32::MAX]),
            }
        }

        fn base(&self) -> usize {
            self.regs.get() as usize
        }

        fn data(&self, channel: usize) -> u32 {
            unsafe { (self.regs.get() as *const u32).add(2 * channel).read_volatile() }
        }

        fn tri(&self, channel: usize) -> u32 {
            unsafe {
                (self.regs.get() as *const u32)
                    .add(2 * channel + 1)
                    .read_volatile()
            }
        }

        fn set_data(&self, channel: usize, value: u32) {
            unsafe {
                (self.regs.get() as *mut u32)
                    .add(2 * channel)
                    .write_volatile(value)
            }
        }
    }

    struct FakeSwitch {
        regs: UnsafeCell<[u32; 32]>,
    }

    impl FakeSwitch {
        fn new() -> Self {
            Self {
                regs: UnsafeCell::new([u32::MAX; 32]),
            }
        }

        fn base(&self) -> usize {
            self.regs.get() as usize
        }

        fn select(&self, pin: usize) -> u32 {
            unsafe { (self.regs.get() as *const u32).add(pin).read_volatile() }
        }
    }

    fn single_controller(ctrl: &FakeController) -> Gpio {
        Gpio::new(Platform::new().with_controller(Controller::new(ctrl.base()).with_channels(2)))
    }

    #[test]
    fn device_count_is_stable_and_bounds_open_device() {
        let ctrl_a = FakeController::new();
        let ctrl_b = FakeController::new();
        let mut gpio = Gpio::new(
            Platform::new()
                .with_controller(Controller::new(ctrl_a.base()))
                .with_controller(Controller::new(ctrl_b.base())),
        );

        assert_eq!(gpio.device_count(), 2);
        assert_eq!(gpio.device_count(), 2);

        let first = gpio.open_device(0).unwrap();
        let second = gpio.open_device(1).unwrap();
        assert!(first != second);

        assert_eq!(gpio.open_device(2), Err(Error::InvalidDevice));
    }

    #[test]
    fn double_open_of_a_device_is_rejected_until_close() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);

        let handle = gpio.open_device(0).unwrap();
        assert_eq!(gpio.open_device(0), Err(Error::DeviceInUse));

        gpio.close(handle).unwrap();
        gpio.open_device(0).unwrap();
    }

    #[test]
    fn configure_validates_range_channel_and_parent() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);
        let parent = gpio.open_device(0).unwrap();

        assert_eq!(gpio.configure(parent, 4, 2, 0), Err(Error::InvalidRange));
        assert_eq!(gpio.configure(parent, 0, 32, 0), Err(Error::InvalidRange));
        assert_eq!(gpio.configure(parent, 0, 3, 2), Err(Error::InvalidChannel));

        let child = gpio.configure(parent, 0, 3, 0).unwrap();
        assert_eq!(gpio.configure(child, 0, 1, 0), Err(Error::NotAController));
    }

    #[test]
    fn overlapping_sibling_ranges_are_rejected() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);
        let parent = gpio.open_device(0).unwrap();

        let low = gpio.configure(parent, 0, 7, 0).unwrap();
        assert_eq!(gpio.configure(parent, 4, 11, 0), Err(Error::Claimed));

        // Same pins on the other channel are a different resource.
        gpio.configure(parent, 4, 11, 1).unwrap();

        // Closing releases the claim for re-use.
        gpio.close(low).unwrap();
        gpio.configure(parent, 4, 11, 0).unwrap();
    }

    #[test]
    fn write_drives_only_the_configured_field() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);
        let parent = gpio.open_device(0).unwrap();

        let nibble = gpio.configure(parent, 4, 7, 0).unwrap();
        gpio.set_direction(nibble, Direction::Output).unwrap();
        gpio.write(nibble, 0xA).unwrap();

        assert_eq!(ctrl.data(0), 0xA0);
        // Direction bits cleared for the field only.
        assert_eq!(ctrl.tri(0), !0xF0);

        // Extra bits of the value are masked off.
        gpio.write(nibble, 0x1F5).unwrap();
        assert_eq!(ctrl.data(0), 0x50);
    }

    #[test]
    fn non_overlapping_ranges_operate_independently() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);
        let parent = gpio.open_device(0).unwrap();

        let a = gpio.configure(parent, 0, 3, 0).unwrap();
        let b = gpio.configure(parent, 8, 11, 0).unwrap();
        gpio.set_direction(a, Direction::Output).unwrap();
        gpio.set_direction(b, Direction::Input).unwrap();

        ctrl.set_data(0, 0x500);
        let before = gpio.read(b).unwrap();
        gpio.write(a, 0xF).unwrap();

        assert_eq!(gpio.read(b).unwrap(), before);
        assert_eq!(gpio.read(b).unwrap(), 0x5);
        assert_eq!(ctrl.data(0) & 0xF, 0xF);
    }

    #[test]
    fn read_shifts_and_masks_the_register_value() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);
        let parent = gpio.open_device(0).unwrap();

        let field = gpio.configure(parent, 8, 15, 1).unwrap();
        gpio.set_direction(field, Direction::Input).unwrap();

        ctrl.set_data(1, 0x0003_CB00);
        assert_eq!(gpio.read(field).unwrap(), 0xCB);
    }

    #[test]
    fn direction_is_enforced() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);
        let parent = gpio.open_device(0).unwrap();
        let field = gpio.configure(parent, 0, 3, 0).unwrap();

        // No direction set yet: both accesses rejected.
        assert_eq!(gpio.read(field), Err(Error::WrongDirection));
        assert_eq!(gpio.write(field, 1), Err(Error::WrongDirection));

        gpio.set_direction(field, Direction::Input).unwrap();
        assert_eq!(gpio.write(field, 1), Err(Error::WrongDirection));
        gpio.read(field).unwrap();

        gpio.set_direction(field, Direction::Output).unwrap();
        assert_eq!(gpio.read(field), Err(Error::WrongDirection));
        gpio.write(field, 1).unwrap();
    }

    #[test]
    fn close_tristates_and_invalidates() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);
        let parent = gpio.open_device(0).unwrap();
        let field = gpio.configure(parent, 0, 7, 0).unwrap();

        gpio.set_direction(field, Direction::Output).unwrap();
        assert_eq!(ctrl.tri(0), !0xFF);

        gpio.close(field).unwrap();
        assert_eq!(ctrl.tri(0), u32::MAX);

        assert_eq!(gpio.close(field), Err(Error::InvalidHandle));
        assert_eq!(gpio.read(field), Err(Error::InvalidHandle));
        assert_eq!(gpio.write(field, 0), Err(Error::InvalidHandle));
        assert_eq!(
            gpio.set_direction(field, Direction::Input),
            Err(Error::InvalidHandle)
        );
    }

    #[test]
    fn stale_handles_stay_invalid_after_slot_reuse() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);
        let parent = gpio.open_device(0).unwrap();

        let old = gpio.configure(parent, 0, 3, 0).unwrap();
        gpio.close(old).unwrap();

        // Re-uses the slot the old handle lived in.
        let new = gpio.configure(parent, 0, 3, 0).unwrap();
        assert_eq!(gpio.read(old), Err(Error::InvalidHandle));

        gpio.set_direction(new, Direction::Input).unwrap();
        gpio.read(new).unwrap();
    }

    #[test]
    fn closing_a_device_tristates_every_channel() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);

        let device = gpio.open_device(0).unwrap();
        gpio.set_direction(device, Direction::Output).unwrap();
        assert_eq!(ctrl.tri(0), 0);
        assert_eq!(ctrl.tri(1), 0);

        gpio.close(device).unwrap();
        assert_eq!(ctrl.tri(0), u32::MAX);
        assert_eq!(ctrl.tri(1), u32::MAX);
    }

    #[test]
    fn handle_table_exhaustion_is_reported() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);
        let parent = gpio.open_device(0).unwrap();

        for pin in 0..(crate::MAX_HANDLES as u8 - 1) {
            gpio.configure(parent, pin, pin, 0).unwrap();
        }
        assert_eq!(
            gpio.configure(parent, 20, 20, 1),
            Err(Error::Exhausted)
        );
    }

    #[test]
    fn open_pin_requires_an_io_switch() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);

        assert_eq!(gpio.open_pin(0), Err(Error::NoPinRouting));
    }

    #[test]
    fn open_pin_routes_claims_and_reads() {
        let ctrl = FakeController::new();
        let switch = FakeSwitch::new();
        let mut gpio = Gpio::new(
            Platform::new()
                .with_controller(Controller::new(ctrl.base()))
                .with_io_switch(IoSwitch::new(switch.base(), 0).with_pins(20)),
        );

        assert_eq!(gpio.open_pin(20), Err(Error::InvalidRange));

        let pin = gpio.open_pin(5).unwrap();
        // Routed to the GPIO function.
        assert_eq!(switch.select(5), Function::Gpio.code());
        // Pin is claimed on the terminating controller.
        assert_eq!(gpio.open_pin(5), Err(Error::Claimed));

        gpio.set_direction(pin, Direction::Input).unwrap();
        ctrl.set_data(0, 1 << 5);
        assert_eq!(gpio.read(pin).unwrap(), 1);
        assert_eq!(gpio.level(pin).unwrap(), Level::High);

        gpio.close(pin).unwrap();
        gpio.open_pin(5).unwrap();
    }

    #[test]
    fn dropping_the_driver_releases_its_claims() {
        let ctrl = FakeController::new();
        let platform =
            Platform::new().with_controller(Controller::new(ctrl.base()).with_channels(2));

        let mut gpio = Gpio::new(platform.clone());
        let parent = gpio.open_device(0).unwrap();
        gpio.configure(parent, 0, 7, 0).unwrap();
        drop(gpio);

        let mut gpio = Gpio::new(platform);
        let parent = gpio.open_device(0).unwrap();
        gpio.configure(parent, 0, 7, 0).unwrap();
    }

    #[test]
    fn single_pin_drivers_round_trip() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);
        let parent = gpio.open_device(0).unwrap();

        let out_handle = gpio.configure(parent, 3, 3, 0).unwrap();
        {
            let mut led = Output::new(&mut gpio, out_handle, Level::High).unwrap();
            assert_eq!(ctrl.data(0) & 1 << 3, 1 << 3);
            assert!(led.is_set_high().unwrap());

            led.toggle().unwrap();
            assert!(led.is_set_low().unwrap());
            led.set_high().unwrap();
            assert!(led.is_set_high().unwrap());
        }

        let in_handle = gpio.configure(parent, 4, 4, 0).unwrap();
        let button = Input::new(&mut gpio, in_handle).unwrap();
        ctrl.set_data(0, 1 << 4);
        assert!(button.is_high().unwrap());
        assert_eq!(button.level().unwrap(), Level::High);
    }

    #[test]
    fn wide_handles_are_rejected_by_single_pin_drivers() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);
        let parent = gpio.open_device(0).unwrap();
        let wide = gpio.configure(parent, 0, 3, 0).unwrap();

        assert_eq!(
            Input::new(&mut gpio, wide).map(|_| ()),
            Err(Error::InvalidRange)
        );
        assert_eq!(
            Output::new(&mut gpio, wide, Level::Low).map(|_| ()),
            Err(Error::InvalidRange)
        );
    }

    #[test]
    fn initial_level_is_latched_before_output_enable() {
        let ctrl = FakeController::new();
        let mut gpio = single_controller(&ctrl);
        let parent = gpio.open_device(0).unwrap();
        let handle = gpio.configure(parent, 0, 0, 0).unwrap();

        Output::new(&mut gpio, handle, Level::High).unwrap();
        assert_eq!(ctrl.data(0) & 1, 1);
        assert_eq!(ctrl.tri(0) & 1, 0);
    }

    #[test]
    fn levels_convert_and_invert() {
        assert_eq!(Level::from(true), Level::High);
        assert_eq!(Level::from(false), Level::Low);
        assert_eq!(!Level::High, Level::Low);
        assert!(bool::from(Level::High));
    }
}
