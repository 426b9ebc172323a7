//! BCM283x GPIO and SPI backends (Raspberry Pi).
//!
//! GPIO goes through `rppal` (`/dev/gpiomem`). SPI talks to the kernel's
//! `spidev` node directly so the controller can be told to leave CE0/CE1
//! alone (`SPI_NO_CS`); the pin controller drives every select line.
//!
//! # Wiring (LoRasPi / RPI-Lora-Gateway style)
//!
//! | Signal | GPIO | Header pin |
//! |--------|------|------------|
//! | NSS (CE0) | 8 | 24 |
//! | CE1 | 7 | 26 |
//! | DIO0 | 25 | 22 |
//! | RESET | 17 | 11 |
//! | LED | 4 / 23 | 7 / 16 |

use super::{BitOrder, ClockDivider, DataMode, GpioBackend, HalError, Level, PinMode, SpiBackend};
use log::debug;
use rppal::gpio::{self, Gpio, IoPin};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

/// GPIO backend over `rppal`.
pub struct RpiGpio {
    gpio: Gpio,
    pins: HashMap<u8, IoPin>,
}

impl RpiGpio {
    /// Open the GPIO peripheral.
    pub fn new() -> Result<Self, HalError> {
        let gpio = Gpio::new().map_err(|e| HalError::Backend(format!("GPIO: {}", e)))?;
        Ok(Self {
            gpio,
            pins: HashMap::new(),
        })
    }

    fn io_pin(&mut self, pin: u8, mode: gpio::Mode) -> Result<&mut IoPin, HalError> {
        if !self.pins.contains_key(&pin) {
            let mut io = self
                .gpio
                .get(pin)
                .map_err(|e| HalError::Gpio {
                    pin,
                    reason: e.to_string(),
                })?
                .into_io(mode);
            // Leave lines where we put them on exit; chip-selects must stay high.
            io.set_reset_on_drop(false);
            debug!("Acquired GPIO{} as {:?}", pin, mode);
            self.pins.insert(pin, io);
        }
        self.pins.get_mut(&pin).ok_or(HalError::Gpio {
            pin,
            reason: "pin not acquired".into(),
        })
    }
}

fn to_rppal_mode(mode: PinMode) -> gpio::Mode {
    match mode {
        PinMode::Input => gpio::Mode::Input,
        PinMode::Output => gpio::Mode::Output,
        PinMode::Alt0 => gpio::Mode::Alt0,
    }
}

impl GpioBackend for RpiGpio {
    fn set_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), HalError> {
        let mode = to_rppal_mode(mode);
        self.io_pin(pin, mode)?.set_mode(mode);
        Ok(())
    }

    fn write(&mut self, pin: u8, level: Level) -> Result<(), HalError> {
        let io = self.io_pin(pin, gpio::Mode::Output)?;
        io.write(match level {
            Level::Low => gpio::Level::Low,
            Level::High => gpio::Level::High,
        });
        Ok(())
    }

    fn read(&mut self, pin: u8) -> Result<Level, HalError> {
        let io = self.io_pin(pin, gpio::Mode::Input)?;
        Ok(match io.read() {
            gpio::Level::Low => Level::Low,
            gpio::Level::High => Level::High,
        })
    }
}

/// SPI backend over the kernel `spidev` interface.
pub struct RpiSpi {
    path: PathBuf,
    device: Option<Spidev>,
    speed_hz: u32,
    bit_order: BitOrder,
    data_mode: DataMode,
    no_cs: bool,
}

impl RpiSpi {
    /// SPI0 through the CE0 device node.
    pub fn new() -> Self {
        Self::with_device("/dev/spidev0.0")
    }

    /// A specific `spidev` device node.
    pub fn with_device(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            device: None,
            speed_hz: ClockDivider::for_frequency(1_000_000).frequency_hz(),
            bit_order: BitOrder::MsbFirst,
            data_mode: DataMode::Mode0,
            no_cs: false,
        }
    }

    fn device(&self) -> Result<&Spidev, HalError> {
        self.device
            .as_ref()
            .ok_or_else(|| HalError::Spi("peripheral not open".into()))
    }

    /// Push the cached settings to the open device.
    fn configure(&mut self) -> Result<(), HalError> {
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(self.speed_hz)
            .mode(mode_flags(self.data_mode, self.bit_order, self.no_cs))
            .build();
        let path = self.path.display().to_string();
        self.device
            .as_mut()
            .ok_or_else(|| HalError::Spi("peripheral not open".into()))?
            .configure(&options)
            .map_err(|e| HalError::Spi(format!("{}: {}", path, e)))
    }
}

impl Default for RpiSpi {
    fn default() -> Self {
        Self::new()
    }
}

/// `spidev` mode word for the given clock mode and bit order.
fn mode_flags(mode: DataMode, order: BitOrder, no_cs: bool) -> SpiModeFlags {
    let mut flags = match mode {
        DataMode::Mode0 => SpiModeFlags::SPI_MODE_0,
        DataMode::Mode1 => SpiModeFlags::SPI_MODE_1,
        DataMode::Mode2 => SpiModeFlags::SPI_MODE_2,
        DataMode::Mode3 => SpiModeFlags::SPI_MODE_3,
    };
    if order == BitOrder::LsbFirst {
        flags |= SpiModeFlags::SPI_LSB_FIRST;
    }
    if no_cs {
        flags |= SpiModeFlags::SPI_NO_CS;
    }
    flags
}

fn spi_error(e: io::Error) -> HalError {
    HalError::Spi(e.to_string())
}

impl SpiBackend for RpiSpi {
    fn begin(&mut self) -> Result<(), HalError> {
        let device = Spidev::open(&self.path).map_err(|e| {
            HalError::Backend(format!(
                "{} (is SPI enabled and are you running as root?): {}",
                self.path.display(),
                e
            ))
        })?;
        self.device = Some(device);
        self.no_cs = false;
        if let Err(e) = self.configure() {
            self.device = None;
            return Err(HalError::Backend(e.to_string()));
        }
        debug!("Opened {}", self.path.display());
        Ok(())
    }

    fn disable_hardware_chip_select(&mut self) -> Result<(), HalError> {
        self.no_cs = true;
        if let Err(e) = self.configure() {
            self.no_cs = false;
            return Err(HalError::Backend(format!(
                "controller refused SPI_NO_CS: {}",
                e
            )));
        }
        debug!("{}: hardware chip-select released", self.path.display());
        Ok(())
    }

    fn set_clock_divider(&mut self, divider: ClockDivider) -> Result<(), HalError> {
        self.speed_hz = divider.frequency_hz();
        self.configure()
    }

    fn set_bit_order(&mut self, order: BitOrder) -> Result<(), HalError> {
        self.bit_order = order;
        self.configure()
    }

    fn set_data_mode(&mut self, mode: DataMode) -> Result<(), HalError> {
        self.data_mode = mode;
        self.configure()
    }

    fn transfer(&mut self, byte: u8) -> Result<u8, HalError> {
        let tx = [byte];
        let mut rx = [0u8; 1];
        {
            let mut transfer = SpidevTransfer::read_write(&tx, &mut rx);
            self.device()?.transfer(&mut transfer).map_err(spi_error)?;
        }
        Ok(rx[0])
    }

    fn end(&mut self) {
        self.device = None;
        self.no_cs = false;
    }
}
