//! Logical digital I/O.
//!
//! Every operation checks [`Pin::UNUSED`] first, so callers can drive
//! optional hardware (LED, reset line, DIO lines) without branching.
//! Nothing is cached: each read samples the backend.

use super::{GpioBackend, HalError, Level, Pin, PinMode};

/// Pin controller over a GPIO backend.
pub struct PinController<G> {
    backend: G,
}

impl<G: GpioBackend> PinController<G> {
    /// Wrap a GPIO backend.
    pub fn new(backend: G) -> Self {
        Self { backend }
    }

    /// Configure a pin as input or output.
    pub fn set_mode(&mut self, pin: Pin, mode: PinMode) -> Result<(), HalError> {
        if pin.is_unused() {
            return Ok(());
        }
        self.backend.set_mode(pin.number(), mode)
    }

    /// Drive a pin level.
    pub fn write(&mut self, pin: Pin, level: Level) -> Result<(), HalError> {
        if pin.is_unused() {
            return Ok(());
        }
        self.backend.write(pin.number(), level)
    }

    /// Read a pin level. The unused pin reads [`Level::Low`].
    pub fn read(&mut self, pin: Pin) -> Result<Level, HalError> {
        if pin.is_unused() {
            return Ok(Level::Low);
        }
        self.backend.read(pin.number())
    }

    /// Access the backend (tests and diagnostics).
    pub fn backend(&self) -> &G {
        &self.backend
    }
}
