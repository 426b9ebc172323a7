//! In-memory board for hosts without radio hardware.
//!
//! [`SimGpio`] and [`SimSpi`] share one [`BoardState`], so effects cross over
//! the way they do on real silicon:
//! - pulling the radio's NSS line low starts a new register access,
//! - an SPI transfer can flip configured pins to their alternate function
//!   (what the BCM283x does to CE0/CE1),
//! - individual pins or the SPI peripheral can be made to fail.
//!
//! The SPI side answers like an SX127x register file: the first byte after
//! NSS goes low is the address (bit 7 set for writes), later bytes read or
//! write that register. Writes to register 0x00 are collected as FIFO data.

use super::{BitOrder, ClockDivider, DataMode, GpioBackend, HalError, Level, PinMode, SpiBackend};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// SX127x FIFO register.
const REG_FIFO: u8 = 0x00;
/// SX127x silicon version register.
const REG_VERSION: u8 = 0x42;
/// Version reported by an SX1276.
const SX1276_VERSION: u8 = 0x12;

/// Register access phase of the simulated radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessPhase {
    Address,
    Read(u8),
    Write(u8),
}

/// Shared state of the simulated board.
#[derive(Debug)]
pub struct BoardState {
    modes: HashMap<u8, PinMode>,
    levels: HashMap<u8, Level>,
    alt_function_pins: Vec<u8>,
    failing_pins: HashSet<u8>,
    radio_nss: Option<u8>,
    spi_open: bool,
    hardware_cs_disabled: bool,
    fail_spi_begin: bool,
    divider: Option<ClockDivider>,
    bit_order: Option<BitOrder>,
    data_mode: Option<DataMode>,
    phase: AccessPhase,
    registers: [u8; 128],
    fifo: Vec<u8>,
    transfers: u64,
}

impl Default for BoardState {
    fn default() -> Self {
        let mut registers = [0u8; 128];
        registers[REG_VERSION as usize] = SX1276_VERSION;
        Self {
            modes: HashMap::new(),
            levels: HashMap::new(),
            alt_function_pins: Vec::new(),
            failing_pins: HashSet::new(),
            radio_nss: None,
            spi_open: false,
            hardware_cs_disabled: false,
            fail_spi_begin: false,
            divider: None,
            bit_order: None,
            data_mode: None,
            phase: AccessPhase::Address,
            registers,
            fifo: Vec::new(),
            transfers: 0,
        }
    }
}

/// Handle to a simulated board. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimBoard {
    state: Arc<Mutex<BoardState>>,
}

impl SimBoard {
    /// Board with no radio attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Board with an SX127x-like radio selected by `nss`.
    pub fn with_radio(nss: u8) -> Self {
        let board = Self::new();
        board.lock().radio_nss = Some(nss);
        board
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// GPIO half of the board.
    pub fn gpio(&self) -> SimGpio {
        SimGpio {
            board: self.clone(),
        }
    }

    /// SPI half of the board.
    pub fn spi(&self) -> SimSpi {
        SimSpi {
            board: self.clone(),
        }
    }

    /// Pins the SPI peripheral takes over during each transfer.
    pub fn set_alt_function_pins(&self, pins: &[u8]) {
        self.lock().alt_function_pins = pins.to_vec();
    }

    /// Make every access to `pin` fail.
    pub fn fail_pin(&self, pin: u8) {
        self.lock().failing_pins.insert(pin);
    }

    /// Make the SPI peripheral refuse to open.
    pub fn fail_spi_begin(&self) {
        self.lock().fail_spi_begin = true;
    }

    /// Drive an input from the outside (e.g. a DIO line).
    pub fn set_input(&self, pin: u8, level: Level) {
        self.lock().levels.insert(pin, level);
    }

    /// Current level of `pin` (low if never driven).
    pub fn level(&self, pin: u8) -> Level {
        self.lock().levels.get(&pin).copied().unwrap_or_default()
    }

    /// Current function of `pin` (input if never configured).
    pub fn mode(&self, pin: u8) -> PinMode {
        self.lock().modes.get(&pin).copied().unwrap_or(PinMode::Input)
    }

    /// Whether the SPI peripheral is open.
    pub fn spi_open(&self) -> bool {
        self.lock().spi_open
    }

    /// Whether hardware chip-select was disabled on open.
    pub fn hardware_cs_disabled(&self) -> bool {
        self.lock().hardware_cs_disabled
    }

    /// Last applied bus settings.
    pub fn applied_settings(&self) -> (Option<ClockDivider>, Option<BitOrder>, Option<DataMode>) {
        let state = self.lock();
        (state.divider, state.bit_order, state.data_mode)
    }

    /// Value of a simulated radio register.
    pub fn register(&self, address: u8) -> u8 {
        self.lock().registers[(address & 0x7F) as usize]
    }

    /// Bytes written to the radio FIFO so far.
    pub fn fifo(&self) -> Vec<u8> {
        self.lock().fifo.clone()
    }

    /// Number of bytes exchanged on the bus.
    pub fn transfers(&self) -> u64 {
        self.lock().transfers
    }
}

/// GPIO backend of a [`SimBoard`].
#[derive(Debug, Clone)]
pub struct SimGpio {
    board: SimBoard,
}

impl SimGpio {
    fn check(state: &BoardState, pin: u8) -> Result<(), HalError> {
        if state.failing_pins.contains(&pin) {
            return Err(HalError::Gpio {
                pin,
                reason: "simulated fault".into(),
            });
        }
        Ok(())
    }
}

impl GpioBackend for SimGpio {
    fn set_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), HalError> {
        let mut state = self.board.lock();
        Self::check(&state, pin)?;
        state.modes.insert(pin, mode);
        Ok(())
    }

    fn write(&mut self, pin: u8, level: Level) -> Result<(), HalError> {
        let mut state = self.board.lock();
        Self::check(&state, pin)?;
        if state.radio_nss == Some(pin) && level == Level::Low {
            state.phase = AccessPhase::Address;
        }
        state.levels.insert(pin, level);
        Ok(())
    }

    fn read(&mut self, pin: u8) -> Result<Level, HalError> {
        let state = self.board.lock();
        Self::check(&state, pin)?;
        Ok(state.levels.get(&pin).copied().unwrap_or_default())
    }
}

/// SPI backend of a [`SimBoard`].
#[derive(Debug, Clone)]
pub struct SimSpi {
    board: SimBoard,
}

impl SpiBackend for SimSpi {
    fn begin(&mut self) -> Result<(), HalError> {
        let mut state = self.board.lock();
        if state.fail_spi_begin {
            return Err(HalError::Backend("simulated SPI refused to open".into()));
        }
        state.spi_open = true;
        Ok(())
    }

    fn disable_hardware_chip_select(&mut self) -> Result<(), HalError> {
        self.board.lock().hardware_cs_disabled = true;
        Ok(())
    }

    fn set_clock_divider(&mut self, divider: ClockDivider) -> Result<(), HalError> {
        self.board.lock().divider = Some(divider);
        Ok(())
    }

    fn set_bit_order(&mut self, order: BitOrder) -> Result<(), HalError> {
        self.board.lock().bit_order = Some(order);
        Ok(())
    }

    fn set_data_mode(&mut self, mode: DataMode) -> Result<(), HalError> {
        self.board.lock().data_mode = Some(mode);
        Ok(())
    }

    fn transfer(&mut self, byte: u8) -> Result<u8, HalError> {
        let mut state = self.board.lock();
        if !state.spi_open {
            return Err(HalError::Spi("transfer on closed peripheral".into()));
        }
        state.transfers += 1;

        // The peripheral grabs its select pins for the duration of the transfer.
        let alt = state.alt_function_pins.clone();
        for pin in alt {
            state.modes.insert(pin, PinMode::Alt0);
            state.levels.insert(pin, Level::Low);
        }

        let reply = match state.phase {
            AccessPhase::Address => {
                let register = byte & 0x7F;
                state.phase = if byte & 0x80 != 0 {
                    AccessPhase::Write(register)
                } else {
                    AccessPhase::Read(register)
                };
                0
            }
            AccessPhase::Read(register) => {
                let value = state.registers[register as usize];
                if register != REG_FIFO {
                    state.phase = AccessPhase::Read((register + 1) & 0x7F);
                }
                value
            }
            AccessPhase::Write(register) => {
                if register == REG_FIFO {
                    state.fifo.push(byte);
                } else {
                    state.registers[register as usize] = byte;
                    state.phase = AccessPhase::Write((register + 1) & 0x7F);
                }
                0
            }
        };
        Ok(reply)
    }

    fn end(&mut self) {
        self.board.lock().spi_open = false;
    }
}
