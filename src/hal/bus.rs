//! SPI transaction manager.
//!
//! Several devices may share one physical bus, each with its own select line.
//! Two rules keep that safe:
//!
//! 1. Bus settings belong to a transaction, not to the bus. They are applied
//!    at every [`BusManager::begin_transaction`].
//! 2. Every transaction end is a barrier: every registered chip-select is put
//!    back into output mode and driven high (inactive), not only the one the
//!    current device used. On the BCM283x the SPI peripheral can switch CE0/CE1
//!    back to their alternate function during a transfer, which leaves them
//!    selected or floating, so the mode is re-asserted before the level.

use super::{GpioBackend, HalError, Level, Pin, PinController, PinMode, SpiBackend};
use log::{debug, info, warn};

/// BCM283x core clock the SPI divider is applied to.
pub const CORE_CLOCK_HZ: u32 = 250_000_000;

/// SPI clock divider (power of two, 2..=32768).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDivider(u16);

impl ClockDivider {
    /// Smallest divider accepted by the peripheral.
    pub const MIN: ClockDivider = ClockDivider(2);
    /// Largest divider accepted by the peripheral.
    pub const MAX: ClockDivider = ClockDivider(32768);

    /// Divider from a raw value, rounded up to the next power of two and
    /// clamped to the valid range.
    pub fn new(raw: u32) -> Self {
        let rounded = raw.max(Self::MIN.0 as u32).next_power_of_two();
        Self(rounded.min(Self::MAX.0 as u32) as u16)
    }

    /// Slowest divider that still reaches at most `hz`.
    pub fn for_frequency(hz: u32) -> Self {
        if hz == 0 {
            return Self::MAX;
        }
        Self::new(CORE_CLOCK_HZ.div_ceil(hz))
    }

    /// Raw divider value.
    pub fn value(self) -> u16 {
        self.0
    }

    /// Resulting SCLK frequency.
    pub fn frequency_hz(self) -> u32 {
        CORE_CLOCK_HZ / self.0 as u32
    }
}

/// Bit order on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    #[default]
    MsbFirst,
    LsbFirst,
}

/// SPI clock polarity/phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataMode {
    #[default]
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

/// Per-transaction bus settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSettings {
    pub divider: ClockDivider,
    pub bit_order: BitOrder,
    pub data_mode: DataMode,
}

impl BusSettings {
    /// Settings for a target clock frequency.
    pub fn new(clock_hz: u32, bit_order: BitOrder, data_mode: DataMode) -> Self {
        Self {
            divider: ClockDivider::for_frequency(clock_hz),
            bit_order,
            data_mode,
        }
    }
}

impl Default for BusSettings {
    /// 1 MHz, MSB first, mode 0 (what the SX127x radio path uses).
    fn default() -> Self {
        Self::new(1_000_000, BitOrder::MsbFirst, DataMode::Mode0)
    }
}

/// Chip-select lines of every device sharing the bus.
///
/// Closed and explicit: populated at configuration time, iterated at every
/// transaction end. The unused sentinel is never registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChipSelectSet {
    pins: Vec<Pin>,
}

impl ChipSelectSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// CE0 and CE1, the two hardware selects on the Raspberry Pi header.
    pub fn raspberry_pi() -> Self {
        let mut set = Self::new();
        set.register(Pin::CE0);
        set.register(Pin::CE1);
        set
    }

    /// Add a chip-select. Returns `false` for duplicates and the unused pin.
    pub fn register(&mut self, pin: Pin) -> bool {
        if pin.is_unused() || self.pins.contains(&pin) {
            return false;
        }
        self.pins.push(pin);
        true
    }

    /// Whether `pin` is registered.
    pub fn contains(&self, pin: Pin) -> bool {
        self.pins.contains(&pin)
    }

    /// Registered pins in registration order.
    pub fn iter(&self) -> impl Iterator<Item = Pin> + '_ {
        self.pins.iter().copied()
    }

    /// Number of registered pins.
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// Whether no pin is registered.
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

impl FromIterator<Pin> for ChipSelectSet {
    fn from_iter<I: IntoIterator<Item = Pin>>(iter: I) -> Self {
        let mut set = Self::new();
        for pin in iter {
            set.register(pin);
        }
        set
    }
}

/// Bus lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Not initialised, or released by `end()`.
    Closed,
    /// Initialised, no transaction open.
    Idle,
    /// Between `begin_transaction` and `end_transaction`.
    InTransaction,
}

/// SPI bus with transaction bracketing.
///
/// Owns the chip-select registry. Pin access is borrowed per call so the pin
/// controller stays shared with the rest of the HAL.
pub struct BusManager<S> {
    backend: S,
    chip_selects: ChipSelectSet,
    state: BusState,
    transactions: u64,
}

impl<S: SpiBackend> BusManager<S> {
    /// Create a bus over `backend` guarding `chip_selects`.
    pub fn new(backend: S, chip_selects: ChipSelectSet) -> Self {
        Self {
            backend,
            chip_selects,
            state: BusState::Closed,
            transactions: 0,
        }
    }

    /// Initialise the bus.
    ///
    /// Puts the peripheral in "no hardware chip-select" mode; every device
    /// drives its own select line. Calling it again before [`end`](Self::end)
    /// is a no-op.
    pub fn begin(&mut self) -> Result<(), HalError> {
        if self.state != BusState::Closed {
            debug!("SPI begin ignored, bus already open");
            return Ok(());
        }
        self.backend.begin()?;
        if let Err(e) = self.backend.disable_hardware_chip_select() {
            self.backend.end();
            return Err(e);
        }
        self.state = BusState::Idle;
        info!(
            "SPI bus open, {} chip-select(s) guarded",
            self.chip_selects.len()
        );
        Ok(())
    }

    /// Apply `settings` and open a transaction.
    pub fn begin_transaction(&mut self, settings: &BusSettings) -> Result<(), HalError> {
        if self.state != BusState::Idle {
            return Err(HalError::BusState {
                operation: "begin_transaction",
                state: self.state,
            });
        }
        self.backend.set_clock_divider(settings.divider)?;
        self.backend.set_bit_order(settings.bit_order)?;
        self.backend.set_data_mode(settings.data_mode)?;
        self.state = BusState::InTransaction;
        Ok(())
    }

    /// Exchange one byte.
    pub fn transfer(&mut self, byte: u8) -> Result<u8, HalError> {
        if self.state != BusState::InTransaction {
            return Err(HalError::BusState {
                operation: "transfer",
                state: self.state,
            });
        }
        self.backend.transfer(byte)
    }

    /// Close the transaction and deselect every registered chip-select.
    ///
    /// The barrier runs even if no transaction is open. All chip-selects are
    /// attempted; the first failure is returned after the sweep.
    pub fn end_transaction<G: GpioBackend>(
        &mut self,
        pins: &mut PinController<G>,
    ) -> Result<(), HalError> {
        if self.state == BusState::InTransaction {
            self.state = BusState::Idle;
            self.transactions += 1;
        }
        self.deselect_all(pins)
    }

    /// Drive every registered chip-select to output-high.
    pub fn deselect_all<G: GpioBackend>(
        &mut self,
        pins: &mut PinController<G>,
    ) -> Result<(), HalError> {
        let mut first_error = None;
        for cs in self.chip_selects.iter() {
            let result = pins
                .set_mode(cs, PinMode::Output)
                .and_then(|()| pins.write(cs, Level::High));
            if let Err(e) = result {
                warn!("Failed to deselect {}: {}", cs, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Release the bus.
    pub fn end(&mut self) {
        if self.state == BusState::Closed {
            return;
        }
        self.backend.end();
        self.state = BusState::Closed;
        debug!("SPI bus closed after {} transaction(s)", self.transactions);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BusState {
        self.state
    }

    /// The chip-select registry.
    pub fn chip_selects(&self) -> &ChipSelectSet {
        &self.chip_selects
    }

    /// Completed transactions.
    pub fn transactions(&self) -> u64 {
        self.transactions
    }

    /// Access the backend (tests and diagnostics).
    pub fn backend(&self) -> &S {
        &self.backend
    }
}
