//! I/O switch pin routing.
//!
//! Boards with a routable header place an I/O switch between the header pins
//! and the processor's peripherals. Each pin has a function-select register;
//! programming it connects the pin to one of the peripheral functions in the
//! overlay. The switch's location and the controller its GPIO function
//! terminates on are described by [`platform::IoSwitch`](crate::platform::IoSwitch).
//!
//! [`Gpio::open_pin`](crate::gpio::Gpio::open_pin) claims the pin and routes
//! it to [`Function::Gpio`]; other functions are selected by the respective
//! peripheral drivers.

/// Peripheral function a header pin can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Function {
    /// General-purpose input/output.
    Gpio,
    /// UART receive/transmit.
    Uart,
    /// SPI clock/data/select.
    Spi,
    /// I2C clock/data.
    I2c,
    /// PWM output.
    Pwm,
    /// Timer capture/generate.
    Timer,
}

impl Function {
    /// Value written to a pin's function-select register.
    pub const fn code(self) -> u32 {
        match self {
            Function::Gpio => 0x00,
            Function::Uart => 0x02,
            Function::Spi => 0x04,
            Function::I2c => 0x08,
            Function::Pwm => 0x10,
            Function::Timer => 0x20,
        }
    }
}

/// Register access for the switch: one function-select word per pin.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SwitchRegs {
    base: usize,
}

impl SwitchRegs {
    pub(crate) const fn new(base: usize) -> Self {
        Self { base }
    }

    fn select_ptr(self, pin: u8) -> *mut u32 {
        (self.base + 4 * pin as usize) as *mut u32
    }

    pub(crate) fn set_function(self, pin: u8, function: Function) {
        trace!("io_switch: routing pin {} to {:?}", pin, function);
        unsafe { self.select_ptr(pin).write_volatile(function.code()) };
    }

    #[cfg(test)]
    pub(crate) fn function_code(self, pin: u8) -> u32 {
        unsafe { self.select_ptr(pin).read_volatile() }
    }
}
