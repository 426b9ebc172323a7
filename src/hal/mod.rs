//! Hardware abstraction for the radio module.
//!
//! This module contains:
//! - [`pins`]: Logical digital I/O with an "unused pin" sentinel
//! - [`bus`]: SPI transaction manager with chip-select discipline
//! - [`port`]: The porting contract the MAC engine calls into
//! - [`sim`]: In-memory board used on any host and in tests
//! - [`rpi`]: BCM283x GPIO through `rppal`, SPI through `spidev` (rpi feature only)
//!
//! The backend traits below are the register-level seam: everything above
//! them is host-testable, everything below them touches hardware.

mod bus;
mod pins;
mod port;
mod sim;

#[cfg(feature = "rpi")]
mod rpi;

pub use bus::{
    BitOrder, BusManager, BusSettings, BusState, ChipSelectSet, ClockDivider, DataMode,
    CORE_CLOCK_HZ,
};
pub use pins::PinController;
pub use port::{EnginePort, HostHal, RadioPins};
pub use sim::{BoardState, SimBoard, SimGpio, SimSpi};

#[cfg(feature = "rpi")]
pub use rpi::{RpiGpio, RpiSpi};

use std::fmt;

/// Logical pin number (BCM GPIO numbering on the Raspberry Pi).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pin(u8);

impl Pin {
    /// Sentinel for "not physically connected".
    ///
    /// Any operation addressed to it is a no-op.
    pub const UNUSED: Pin = Pin(0xFF);

    /// CE0 on the Raspberry Pi header (GPIO8).
    pub const CE0: Pin = Pin(8);

    /// CE1 on the Raspberry Pi header (GPIO7).
    pub const CE1: Pin = Pin(7);

    /// Create a pin from its number.
    pub const fn new(number: u8) -> Self {
        Self(number)
    }

    /// Pin number.
    pub const fn number(self) -> u8 {
        self.0
    }

    /// Whether this is the unused sentinel.
    pub const fn is_unused(self) -> bool {
        self.0 == Self::UNUSED.0
    }
}

impl Default for Pin {
    fn default() -> Self {
        Self::UNUSED
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unused() {
            write!(f, "unused")
        } else {
            write!(f, "GPIO{}", self.0)
        }
    }
}

/// Pin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
    /// Alternate function (e.g. SPI CE0/CE1). Never requested by this crate,
    /// but backends report it when the SPI peripheral takes a pin over.
    Alt0,
}

/// Digital level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    /// Level as the 0/1 value the MAC engine expects.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::High => 1,
        }
    }

    /// Any non-zero value is high.
    pub fn from_u8(value: u8) -> Self {
        if value == 0 {
            Self::Low
        } else {
            Self::High
        }
    }
}

/// Register-level GPIO primitives.
pub trait GpioBackend: Send {
    /// Select the pin function.
    fn set_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), HalError>;

    /// Drive an output level.
    fn write(&mut self, pin: u8, level: Level) -> Result<(), HalError>;

    /// Sample the live pin level.
    fn read(&mut self, pin: u8) -> Result<Level, HalError>;
}

/// Register-level SPI primitives.
pub trait SpiBackend: Send {
    /// Claim and initialise the SPI peripheral.
    fn begin(&mut self) -> Result<(), HalError>;

    /// Stop the peripheral from driving any chip-select line.
    fn disable_hardware_chip_select(&mut self) -> Result<(), HalError>;

    /// Set the clock divider.
    fn set_clock_divider(&mut self, divider: ClockDivider) -> Result<(), HalError>;

    /// Set the bit order.
    fn set_bit_order(&mut self, order: BitOrder) -> Result<(), HalError>;

    /// Set clock polarity/phase.
    fn set_data_mode(&mut self, mode: DataMode) -> Result<(), HalError>;

    /// Exchange one byte.
    fn transfer(&mut self, byte: u8) -> Result<u8, HalError>;

    /// Release the peripheral.
    fn end(&mut self);
}

/// HAL errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    /// GPIO access failed.
    Gpio { pin: u8, reason: String },
    /// SPI access failed.
    Spi(String),
    /// Operation not valid in the current bus state.
    BusState {
        operation: &'static str,
        state: BusState,
    },
    /// Backend could not be opened.
    Backend(String),
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpio { pin, reason } => write!(f, "GPIO{} error: {}", pin, reason),
            Self::Spi(e) => write!(f, "SPI error: {}", e),
            Self::BusState { operation, state } => {
                write!(f, "{} not allowed while bus is {:?}", operation, state)
            }
            Self::Backend(e) => write!(f, "backend error: {}", e),
        }
    }
}

impl std::error::Error for HalError {}
