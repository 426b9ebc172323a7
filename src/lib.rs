//! Host HAL and driver loop for running a LoRaWAN MAC engine on a
//! Raspberry Pi class Linux board.
//!
//! Everything except [`hal::RpiGpio`]/[`hal::RpiSpi`] (feature `rpi`) runs on
//! any host against the simulated board in [`hal`].

pub mod clock;
pub mod config;
pub mod hal;
pub mod identity;
pub mod mac;
pub mod stats;

// Re-export commonly used items
pub use clock::{Clock, HostClock, Sleeper, ThreadSleeper};
pub use config::{ConfigError, NodeConfig};
pub use hal::{BusManager, HalError, HostHal, Level, Pin, PinController, PinMode};
pub use identity::{derive_device_eui, DeviceEui, EuiSource, SysfsInterfaces};
pub use mac::{DriverError, MacDriver, MacEngine, MacEvent, SimulatedMac, UplinkJob};
pub use stats::{LoopStats, StatsServer};
