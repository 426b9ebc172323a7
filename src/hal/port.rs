//! Porting contract between the MAC engine and the host.
//!
//! The engine was written for a microcontroller: its pin and SPI calls cannot
//! fail and it expects a free-running timer. [`HostHal`] keeps that contract by
//! recording failures as transient faults (reads fall back to `Low`, transfers
//! to `0x00`) which the driver loop drains and reports after each step.

use super::{
    BusManager, BusSettings, ChipSelectSet, GpioBackend, HalError, Level, Pin, PinController,
    PinMode, SpiBackend,
};
use crate::clock::{self, Clock};
use log::{debug, info};

/// Radio wiring, in the engine's terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioPins {
    /// Radio chip-select.
    pub nss: Pin,
    /// Antenna switch, if any.
    pub rxtx: Pin,
    /// Radio reset line.
    pub rst: Pin,
    /// DIO0..DIO2 interrupt lines (polled on the host).
    pub dio: [Pin; 3],
}

impl Default for RadioPins {
    /// Radio on CE0, everything else unconnected.
    fn default() -> Self {
        Self {
            nss: Pin::CE0,
            rxtx: Pin::UNUSED,
            rst: Pin::UNUSED,
            dio: [Pin::UNUSED; 3],
        }
    }
}

/// Host services the MAC engine calls into.
pub trait EnginePort {
    /// Milliseconds since epoch (wrapping).
    fn now_millis(&self) -> u32;
    /// Microseconds since epoch (wrapping).
    fn now_micros(&self) -> u32;
    /// Configure a pin.
    fn pin_mode(&mut self, pin: Pin, mode: PinMode);
    /// Drive a pin.
    fn digital_write(&mut self, pin: Pin, level: Level);
    /// Sample a pin.
    fn digital_read(&mut self, pin: Pin) -> Level;
    /// Open an SPI transaction.
    fn spi_begin_transaction(&mut self, settings: &BusSettings);
    /// Exchange one byte.
    fn spi_transfer(&mut self, byte: u8) -> u8;
    /// Close an SPI transaction (deselects every chip-select).
    fn spi_end_transaction(&mut self);
    /// Radio wiring.
    fn radio_pins(&self) -> &RadioPins;
}

/// Host implementation of [`EnginePort`].
pub struct HostHal<G, S, C> {
    clock: C,
    pins: PinController<G>,
    bus: BusManager<S>,
    radio: RadioPins,
    faults: Vec<HalError>,
}

impl<G: GpioBackend, S: SpiBackend, C: Clock> HostHal<G, S, C> {
    /// Assemble the HAL. The radio's NSS joins the chip-select registry.
    pub fn new(clock: C, gpio: G, spi: S, radio: RadioPins, mut chip_selects: ChipSelectSet) -> Self {
        chip_selects.register(radio.nss);
        Self {
            clock,
            pins: PinController::new(gpio),
            bus: BusManager::new(spi, chip_selects),
            radio,
            faults: Vec::new(),
        }
    }

    /// Bring the hardware to its idle state.
    ///
    /// Order matters: epoch first, then NSS high before the bus is opened,
    /// then the full chip-select sweep. Any failure here is fatal for the
    /// caller.
    pub fn init(&mut self) -> Result<(), HalError> {
        clock::init_epoch();
        self.pins.set_mode(self.radio.nss, PinMode::Output)?;
        self.pins.write(self.radio.nss, Level::High)?;
        self.bus.begin()?;
        self.bus.deselect_all(&mut self.pins)?;
        for dio in self.radio.dio {
            self.pins.set_mode(dio, PinMode::Input)?;
        }
        self.pins.set_mode(self.radio.rxtx, PinMode::Output)?;
        info!(
            "HAL ready: NSS {}, RST {}, RXTX {}",
            self.radio.nss, self.radio.rst, self.radio.rxtx
        );
        Ok(())
    }

    /// Deselect every chip-select and release the bus.
    pub fn shutdown(&mut self) -> Result<(), HalError> {
        let result = self.bus.deselect_all(&mut self.pins);
        self.bus.end();
        result
    }

    /// Drain faults recorded since the last call.
    pub fn take_faults(&mut self) -> Vec<HalError> {
        std::mem::take(&mut self.faults)
    }

    /// The clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// The pin controller (for application pins such as an LED).
    pub fn pins_mut(&mut self) -> &mut PinController<G> {
        &mut self.pins
    }

    /// The bus manager.
    pub fn bus(&self) -> &BusManager<S> {
        &self.bus
    }

    /// Deselect every chip-select now.
    pub fn deselect_all(&mut self) -> Result<(), HalError> {
        self.bus.deselect_all(&mut self.pins)
    }

    fn record(&mut self, error: HalError) {
        debug!("HAL fault: {}", error);
        self.faults.push(error);
    }
}

impl<G: GpioBackend, S: SpiBackend, C: Clock> EnginePort for HostHal<G, S, C> {
    fn now_millis(&self) -> u32 {
        self.clock.now_millis()
    }

    fn now_micros(&self) -> u32 {
        self.clock.now_micros()
    }

    fn pin_mode(&mut self, pin: Pin, mode: PinMode) {
        if let Err(e) = self.pins.set_mode(pin, mode) {
            self.record(e);
        }
    }

    fn digital_write(&mut self, pin: Pin, level: Level) {
        if let Err(e) = self.pins.write(pin, level) {
            self.record(e);
        }
    }

    fn digital_read(&mut self, pin: Pin) -> Level {
        match self.pins.read(pin) {
            Ok(level) => level,
            Err(e) => {
                self.record(e);
                Level::Low
            }
        }
    }

    fn spi_begin_transaction(&mut self, settings: &BusSettings) {
        if let Err(e) = self.bus.begin_transaction(settings) {
            self.record(e);
        }
    }

    fn spi_transfer(&mut self, byte: u8) -> u8 {
        match self.bus.transfer(byte) {
            Ok(reply) => reply,
            Err(e) => {
                self.record(e);
                0
            }
        }
    }

    fn spi_end_transaction(&mut self) {
        if let Err(e) = self.bus.end_transaction(&mut self.pins) {
            self.record(e);
        }
    }

    fn radio_pins(&self) -> &RadioPins {
        &self.radio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::hal::{BusState, SimBoard, SimGpio, SimSpi};
    use std::time::Duration;

    fn hal(board: &SimBoard) -> HostHal<SimGpio, SimSpi, ManualClock> {
        HostHal::new(
            ManualClock::new(),
            board.gpio(),
            board.spi(),
            RadioPins {
                nss: Pin::new(25),
                ..Default::default()
            },
            ChipSelectSet::raspberry_pi(),
        )
    }

    #[test]
    fn test_radio_nss_joins_chip_selects() {
        let board = SimBoard::new();
        let hal = hal(&board);
        assert!(hal.bus().chip_selects().contains(Pin::new(25)));
        assert_eq!(hal.bus().chip_selects().len(), 3);
    }

    #[test]
    fn test_init_leaves_bus_idle_and_deselected() {
        let board = SimBoard::new();
        let mut hal = hal(&board);
        hal.init().unwrap();
        assert!(board.spi_open());
        assert!(board.hardware_cs_disabled());
        for pin in [7, 8, 25] {
            assert_eq!(board.level(pin), Level::High);
            assert_eq!(board.mode(pin), PinMode::Output);
        }
    }

    #[test]
    fn test_init_fails_when_spi_refuses() {
        let board = SimBoard::new();
        board.fail_spi_begin();
        let mut hal = hal(&board);
        assert!(matches!(hal.init(), Err(HalError::Backend(_))));
        assert_eq!(hal.bus().state(), BusState::Closed);
    }

    #[test]
    fn test_port_records_faults_instead_of_failing() {
        let board = SimBoard::new();
        board.fail_pin(4);
        let mut hal = hal(&board);
        hal.init().unwrap();

        assert_eq!(hal.digital_read(Pin::new(4)), Level::Low);
        hal.digital_write(Pin::new(4), Level::High);
        assert_eq!(hal.spi_transfer(0x42), 0);

        let faults = hal.take_faults();
        assert_eq!(faults.len(), 3);
        assert!(matches!(faults[2], HalError::BusState { .. }));
        assert!(hal.take_faults().is_empty());
    }

    #[test]
    fn test_port_transaction_deselects_radio() {
        let board = SimBoard::with_radio(25);
        let mut hal = hal(&board);
        hal.init().unwrap();

        hal.spi_begin_transaction(&BusSettings::default());
        hal.digital_write(Pin::new(25), Level::Low);
        hal.spi_transfer(0x42);
        assert_eq!(hal.spi_transfer(0x00), 0x12);
        hal.spi_end_transaction();

        assert_eq!(board.level(25), Level::High);
        assert!(hal.take_faults().is_empty());
    }

    #[test]
    fn test_port_time_comes_from_clock() {
        let board = SimBoard::new();
        let hal = hal(&board);
        hal.clock().advance(Duration::from_micros(1_500));
        assert_eq!(hal.now_millis(), 1);
        assert_eq!(hal.now_micros(), 1_500);
    }

    #[test]
    fn test_shutdown_releases_bus() {
        let board = SimBoard::new();
        let mut hal = hal(&board);
        hal.init().unwrap();
        hal.shutdown().unwrap();
        assert!(!board.spi_open());
        assert_eq!(board.level(8), Level::High);
    }
}
