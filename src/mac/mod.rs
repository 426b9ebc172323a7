//! LoRaWAN MAC engine contract and the loop that drives it.
//!
//! The MAC state machine (framing, keys, channels, duty cycle) is an external
//! collaborator behind [`MacEngine`]. This crate supplies the host side: the
//! [`EnginePort`](crate::hal::EnginePort) it calls back into and the
//! [`MacDriver`] loop that services it, reacts to its events and re-arms the
//! periodic uplink.
//!
//! [`SimulatedMac`] is a stand-in engine that exercises the radio through the
//! port so the node can run without the C library.

mod airtime;
mod driver;
mod sim;

pub use airtime::{time_on_air_ms, time_on_air_us, ModulationParams};
pub use driver::{DriverConfig, DriverError, JobState, MacDriver, SubmitOutcome};
pub use sim::{SimulatedMac, SimulatedMacConfig};

use crate::hal::{EnginePort, HalError};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Largest application payload any data rate accepts.
pub const MAX_PAYLOAD: usize = 222;

/// 128-bit AES key. Zeroed on drop, never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AesKey([u8; 16]);

impl AesKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesKey(<redacted>)")
    }
}

/// Static (activation-by-personalisation) session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbpSession {
    pub net_id: u32,
    pub dev_addr: u32,
    pub nwk_skey: AesKey,
    pub app_skey: AesKey,
}

/// Over-the-air join credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaaCredentials {
    pub dev_eui: [u8; 8],
    pub app_eui: [u8; 8],
    pub app_key: AesKey,
}

/// How the engine gets its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    /// Keys installed directly.
    Abp(AbpSession),
    /// Keys negotiated by a join.
    Otaa(OtaaCredentials),
}

/// EU868 LoRa data rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataRate {
    Sf12,
    Sf11,
    Sf10,
    Sf9,
    Sf8,
    Sf7,
}

impl DataRate {
    /// Spreading factor.
    pub fn spreading_factor(self) -> u8 {
        match self {
            DataRate::Sf12 => 12,
            DataRate::Sf11 => 11,
            DataRate::Sf10 => 10,
            DataRate::Sf9 => 9,
            DataRate::Sf8 => 8,
            DataRate::Sf7 => 7,
        }
    }

    /// Data rate for a spreading factor.
    pub fn from_spreading_factor(sf: u8) -> Option<Self> {
        match sf {
            12 => Some(DataRate::Sf12),
            11 => Some(DataRate::Sf11),
            10 => Some(DataRate::Sf10),
            9 => Some(DataRate::Sf9),
            8 => Some(DataRate::Sf8),
            7 => Some(DataRate::Sf7),
            _ => None,
        }
    }

    /// Maximum application payload (EU868, no FOpts).
    pub fn max_payload(self) -> usize {
        match self {
            DataRate::Sf12 | DataRate::Sf11 | DataRate::Sf10 => 51,
            DataRate::Sf9 => 115,
            DataRate::Sf8 | DataRate::Sf7 => MAX_PAYLOAD,
        }
    }
}

/// Regulatory sub-band duty-cycle class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    /// 10%.
    Deci,
    /// 1%.
    Centi,
    /// 0.1%.
    Milli,
}

impl Band {
    /// Airtime multiplier: after `t` on air the band is closed for
    /// `t * (factor - 1)`.
    pub fn duty_cycle_factor(self) -> u64 {
        match self {
            Band::Deci => 10,
            Band::Centi => 100,
            Band::Milli => 1000,
        }
    }
}

/// One uplink channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub index: u8,
    pub frequency_hz: u32,
    pub min_dr: DataRate,
    pub max_dr: DataRate,
    pub band: Band,
}

/// Application uplink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkJob {
    /// FPort, 1..=223.
    pub port: u8,
    pub payload: Vec<u8>,
    pub confirmed: bool,
}

/// Downlink delivered with a transmit completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downlink {
    pub port: u8,
    pub payload: Vec<u8>,
}

/// Events raised by the MAC engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacEvent {
    ScanTimeout,
    BeaconFound,
    BeaconMissed,
    BeaconTracked,
    Joining,
    Joined,
    Rfu1,
    JoinFailed,
    RejoinFailed,
    /// Uplink finished, including its receive windows.
    TxComplete {
        ack: bool,
        downlink: Option<Downlink>,
    },
    LostTsync,
    Reset,
    RxComplete,
    LinkDead,
    LinkAlive,
    /// Code outside the known set.
    Unknown(u8),
}

impl MacEvent {
    /// Event from the engine's numeric code. `TxComplete` carries no
    /// acknowledgement or downlink when built this way.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => MacEvent::ScanTimeout,
            2 => MacEvent::BeaconFound,
            3 => MacEvent::BeaconMissed,
            4 => MacEvent::BeaconTracked,
            5 => MacEvent::Joining,
            6 => MacEvent::Joined,
            7 => MacEvent::Rfu1,
            8 => MacEvent::JoinFailed,
            9 => MacEvent::RejoinFailed,
            10 => MacEvent::TxComplete {
                ack: false,
                downlink: None,
            },
            11 => MacEvent::LostTsync,
            12 => MacEvent::Reset,
            13 => MacEvent::RxComplete,
            14 => MacEvent::LinkDead,
            15 => MacEvent::LinkAlive,
            other => MacEvent::Unknown(other),
        }
    }

    /// Numeric code.
    pub fn code(&self) -> u8 {
        match self {
            MacEvent::ScanTimeout => 1,
            MacEvent::BeaconFound => 2,
            MacEvent::BeaconMissed => 3,
            MacEvent::BeaconTracked => 4,
            MacEvent::Joining => 5,
            MacEvent::Joined => 6,
            MacEvent::Rfu1 => 7,
            MacEvent::JoinFailed => 8,
            MacEvent::RejoinFailed => 9,
            MacEvent::TxComplete { .. } => 10,
            MacEvent::LostTsync => 11,
            MacEvent::Reset => 12,
            MacEvent::RxComplete => 13,
            MacEvent::LinkDead => 14,
            MacEvent::LinkAlive => 15,
            MacEvent::Unknown(code) => *code,
        }
    }

    /// Log name.
    pub fn name(&self) -> &'static str {
        match self {
            MacEvent::ScanTimeout => "EV_SCAN_TIMEOUT",
            MacEvent::BeaconFound => "EV_BEACON_FOUND",
            MacEvent::BeaconMissed => "EV_BEACON_MISSED",
            MacEvent::BeaconTracked => "EV_BEACON_TRACKED",
            MacEvent::Joining => "EV_JOINING",
            MacEvent::Joined => "EV_JOINED",
            MacEvent::Rfu1 => "EV_RFU1",
            MacEvent::JoinFailed => "EV_JOIN_FAILED",
            MacEvent::RejoinFailed => "EV_REJOIN_FAILED",
            MacEvent::TxComplete { .. } => "EV_TXCOMPLETE",
            MacEvent::LostTsync => "EV_LOST_TSYNC",
            MacEvent::Reset => "EV_RESET",
            MacEvent::RxComplete => "EV_RXCOMPLETE",
            MacEvent::LinkDead => "EV_LINK_DEAD",
            MacEvent::LinkAlive => "EV_LINK_ALIVE",
            MacEvent::Unknown(_) => "Unknown event",
        }
    }
}

impl fmt::Display for MacEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacEvent::Unknown(code) => write!(f, "Unknown event {}", code),
            other => f.write_str(other.name()),
        }
    }
}

/// Errors returned by a MAC engine.
#[derive(Debug)]
pub enum EngineError {
    /// A transmit/receive cycle is pending.
    Busy,
    /// Payload exceeds what the current data rate allows.
    PayloadTooLarge { len: usize, max: usize },
    /// FPort outside 1..=223.
    InvalidPort(u8),
    /// No session yet (join pending).
    NotJoined,
    /// Radio access failed.
    Hal(HalError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Busy => write!(f, "transmit/receive pending"),
            EngineError::PayloadTooLarge { len, max } => {
                write!(f, "payload of {} bytes exceeds {} byte limit", len, max)
            }
            EngineError::InvalidPort(port) => write!(f, "invalid FPort {}", port),
            EngineError::NotJoined => write!(f, "no session established"),
            EngineError::Hal(e) => write!(f, "radio access failed: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Hal(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HalError> for EngineError {
    fn from(e: HalError) -> Self {
        EngineError::Hal(e)
    }
}

/// The MAC/PHY state machine as seen by the driver loop.
///
/// Every hardware access goes through the [`EnginePort`] passed in; the
/// engine holds no host resources of its own.
pub trait MacEngine: Send {
    /// Reset all MAC state. Pending jobs and sessions are discarded.
    fn reset(&mut self, port: &mut dyn EnginePort) -> Result<(), EngineError>;

    /// Install a static session.
    fn set_session(&mut self, session: &AbpSession);

    /// Begin an over-the-air join. `Joining` and later `Joined` or
    /// `JoinFailed` are reported through [`run_once`](Self::run_once).
    fn start_join(&mut self, credentials: &OtaaCredentials) -> Result<(), EngineError>;

    /// Define or replace an uplink channel.
    fn setup_channel(&mut self, channel: &Channel);

    /// Data rate of the second receive window.
    fn set_rx2_data_rate(&mut self, data_rate: DataRate);

    /// Enable or disable link-check validation.
    fn set_link_check_mode(&mut self, enabled: bool);

    /// Uplink data rate and transmit power.
    fn set_data_rate_and_power(&mut self, data_rate: DataRate, power_dbm: i8);

    /// Queue an uplink for transmission.
    fn queue_uplink(&mut self, port: &mut dyn EnginePort, job: &UplinkJob) -> Result<(), EngineError>;

    /// Whether a transmit/receive cycle is pending.
    fn is_busy(&self) -> bool;

    /// Run due engine work once and report the resulting events.
    /// Must not block.
    fn run_once(&mut self, port: &mut dyn EnginePort, on_event: &mut dyn FnMut(MacEvent));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_codes_roundtrip_known_set() {
        for code in 1..=15u8 {
            assert_eq!(MacEvent::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_unknown_event() {
        let event = MacEvent::from_code(42);
        assert_eq!(event, MacEvent::Unknown(42));
        assert_eq!(event.to_string(), "Unknown event 42");
        assert_eq!(MacEvent::from_code(0), MacEvent::Unknown(0));
    }

    #[test]
    fn test_event_names() {
        assert_eq!(MacEvent::Joined.to_string(), "EV_JOINED");
        let done = MacEvent::TxComplete {
            ack: true,
            downlink: None,
        };
        assert_eq!(done.to_string(), "EV_TXCOMPLETE");
    }

    #[test]
    fn test_data_rate_limits() {
        assert_eq!(DataRate::Sf7.max_payload(), 222);
        assert_eq!(DataRate::Sf9.max_payload(), 115);
        assert_eq!(DataRate::Sf12.max_payload(), 51);
        assert_eq!(DataRate::from_spreading_factor(9), Some(DataRate::Sf9));
        assert_eq!(DataRate::from_spreading_factor(6), None);
        assert!(DataRate::Sf7 > DataRate::Sf12);
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = AesKey::new([0xAB; 16]);
        let text = format!("{:?}", key);
        assert!(!text.contains("171"));
        assert!(!text.to_lowercase().contains("ab, "));
        assert_eq!(text, "AesKey(<redacted>)");
    }

    #[test]
    fn test_band_factor() {
        assert_eq!(Band::Centi.duty_cycle_factor(), 100);
        assert_eq!(Band::Milli.duty_cycle_factor(), 1000);
    }
}
