//! JSON node configuration and its validation.

use crate::hal::{BitOrder, BusSettings, ChipSelectSet, DataMode, Pin, RadioPins};
use crate::identity::DeviceEui;
use crate::mac::{
    AbpSession, AesKey, Band, Channel, DataRate, DriverConfig, OtaaCredentials, Session,
    UplinkJob, MAX_PAYLOAD,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use zeroize::Zeroize;

/// BCM283x GPIO lines are numbered 0..54.
pub const MAX_GPIO: u8 = 54;

/// Longest schedule delay the wrapping millisecond clock can compare.
const MAX_INTERVAL_SECS: u64 = (u32::MAX / 2 / 1000) as u64;

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub pins: PinConfig,
    pub bus: BusConfig,
    pub session: SessionConfig,
    pub uplink: UplinkConfig,
    pub radio: RadioConfig,
    pub schedule: ScheduleConfig,
    /// Port for the `/stats` endpoint; disabled when absent.
    pub stats_port: Option<u16>,
}

/// GPIO wiring. `None` means not connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PinConfig {
    pub nss: u8,
    pub rxtx: Option<u8>,
    pub rst: Option<u8>,
    pub dio: [Option<u8>; 3],
    pub led: Option<u8>,
    /// Chip-selects of every other device on the bus.
    pub chip_selects: Vec<u8>,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            nss: Pin::CE0.number(),
            rxtx: None,
            rst: None,
            dio: [None; 3],
            led: None,
            chip_selects: vec![Pin::CE0.number(), Pin::CE1.number()],
        }
    }
}

/// SPI settings for radio access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    pub clock_hz: u32,
    pub lsb_first: bool,
    /// SPI mode 0-3.
    pub mode: u8,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            clock_hz: 1_000_000,
            lsb_first: false,
            mode: 0,
        }
    }
}

/// Session provisioning. Keys and EUIs are hex strings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase", deny_unknown_fields)]
pub enum SessionConfig {
    Abp {
        net_id: u32,
        dev_addr: String,
        nwk_skey: String,
        app_skey: String,
    },
    Otaa {
        /// Derived from the network adapter when absent.
        #[serde(default)]
        dev_eui: Option<String>,
        app_eui: String,
        app_key: String,
    },
}

impl Default for SessionConfig {
    /// The Semtech sample keys with device address 0x03FF0001.
    fn default() -> Self {
        SessionConfig::Abp {
            net_id: 0x1,
            dev_addr: "03FF0001".into(),
            nwk_skey: "2B7E151628AED2A6ABF7158809CF4F3C".into(),
            app_skey: "2B7E151628AED2A6ABF7158809CF4F3C".into(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionConfig::Abp {
                net_id, dev_addr, ..
            } => f
                .debug_struct("Abp")
                .field("net_id", net_id)
                .field("dev_addr", dev_addr)
                .finish_non_exhaustive(),
            SessionConfig::Otaa {
                dev_eui, app_eui, ..
            } => f
                .debug_struct("Otaa")
                .field("dev_eui", dev_eui)
                .field("app_eui", app_eui)
                .finish_non_exhaustive(),
        }
    }
}

impl Drop for SessionConfig {
    fn drop(&mut self) {
        match self {
            SessionConfig::Abp {
                nwk_skey, app_skey, ..
            } => {
                nwk_skey.zeroize();
                app_skey.zeroize();
            }
            SessionConfig::Otaa { app_key, .. } => app_key.zeroize(),
        }
    }
}

/// The periodic uplink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UplinkConfig {
    pub port: u8,
    pub payload: String,
    pub confirmed: bool,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            port: 1,
            payload: "Hello, world!".into(),
            confirmed: false,
        }
    }
}

/// Uplink channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPlan {
    /// Whatever the engine sets up on reset.
    Default,
    /// All nine channel slots on one frequency, for single-channel gateways.
    SingleChannel { frequency_hz: u32 },
}

/// Modulation and channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RadioConfig {
    pub spreading_factor: u8,
    pub tx_power_dbm: i8,
    pub rx2_spreading_factor: u8,
    pub channel_plan: ChannelPlan,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            spreading_factor: 7,
            tx_power_dbm: 14,
            rx2_spreading_factor: 9,
            channel_plan: ChannelPlan::SingleChannel {
                frequency_hz: 868_100_000,
            },
        }
    }
}

/// Loop timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Transmit completion to next uplink.
    pub tx_interval_secs: u64,
    /// Sleep between loop iterations.
    pub poll_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tx_interval_secs: 120,
            poll_interval_ms: 1,
        }
    }
}

/// Errors loading or validating a configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// File could not be read.
    Io(std::io::Error),
    /// Not valid JSON for this schema.
    Parse(serde_json::Error),
    /// Key, EUI or address is not the expected hex.
    InvalidKey { field: &'static str, reason: String },
    /// Pin number out of range or assigned twice.
    InvalidPin { field: &'static str, pin: u8 },
    /// Interval zero or too long.
    InvalidInterval { field: &'static str, value: u64 },
    /// Payload exceeds the data rate's limit.
    PayloadTooLarge { len: usize, max: usize },
    /// Any other out-of-range setting.
    InvalidValue { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot read config: {}", e),
            Self::Parse(e) => write!(f, "invalid config: {}", e),
            Self::InvalidKey { field, reason } => write!(f, "{}: {}", field, reason),
            Self::InvalidPin { field, pin } => write!(f, "{}: invalid pin {}", field, pin),
            Self::InvalidInterval { field, value } => {
                write!(f, "{}: interval {} out of range", field, value)
            }
            Self::PayloadTooLarge { len, max } => {
                write!(f, "payload too long: {} bytes (max {})", len, max)
            }
            Self::InvalidValue { field, reason } => write!(f, "{}: {}", field, reason),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

/// Parse `N` bytes of hex. `:`, `-` and spaces between digits are ignored.
fn parse_hex<const N: usize>(field: &'static str, text: &str) -> Result<[u8; N], ConfigError> {
    let digits: String = text
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .collect();
    if !digits.is_ascii() {
        return Err(ConfigError::InvalidKey {
            field,
            reason: "not hexadecimal".into(),
        });
    }
    if digits.len() != N * 2 {
        return Err(ConfigError::InvalidKey {
            field,
            reason: format!("expected {} hex digits, got {}", N * 2, digits.len()),
        });
    }
    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).map_err(|_| {
            ConfigError::InvalidKey {
                field,
                reason: "not hexadecimal".into(),
            }
        })?;
    }
    Ok(out)
}

fn data_rate(field: &'static str, sf: u8) -> Result<DataRate, ConfigError> {
    DataRate::from_spreading_factor(sf).ok_or_else(|| ConfigError::InvalidValue {
        field,
        reason: format!("spreading factor {} not in 7..=12", sf),
    })
}

fn check_pin(field: &'static str, pin: u8) -> Result<(), ConfigError> {
    if pin >= MAX_GPIO {
        return Err(ConfigError::InvalidPin { field, pin });
    }
    Ok(())
}

fn optional_pin(pin: Option<u8>) -> Pin {
    pin.map(Pin::new).unwrap_or(Pin::UNUSED)
}

impl NodeConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Pretty JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pins = &self.pins;
        check_pin("pins.nss", pins.nss)?;
        for (field, pin) in [("pins.rxtx", pins.rxtx), ("pins.rst", pins.rst)] {
            if let Some(pin) = pin {
                check_pin(field, pin)?;
            }
        }
        for pin in pins.dio.iter().flatten() {
            check_pin("pins.dio", *pin)?;
        }
        for pin in &pins.chip_selects {
            check_pin("pins.chip_selects", *pin)?;
        }
        if let Some(led) = pins.led {
            check_pin("pins.led", led)?;
            if led == pins.nss || pins.chip_selects.contains(&led) {
                return Err(ConfigError::InvalidPin {
                    field: "pins.led",
                    pin: led,
                });
            }
        }

        if self.bus.clock_hz == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bus.clock_hz",
                reason: "must be positive".into(),
            });
        }
        if self.bus.mode > 3 {
            return Err(ConfigError::InvalidValue {
                field: "bus.mode",
                reason: format!("SPI mode {} not in 0..=3", self.bus.mode),
            });
        }

        let dr = data_rate("radio.spreading_factor", self.radio.spreading_factor)?;
        data_rate("radio.rx2_spreading_factor", self.radio.rx2_spreading_factor)?;
        if !(2..=20).contains(&self.radio.tx_power_dbm) {
            return Err(ConfigError::InvalidValue {
                field: "radio.tx_power_dbm",
                reason: format!("{} dBm not in 2..=20", self.radio.tx_power_dbm),
            });
        }
        if let ChannelPlan::SingleChannel { frequency_hz } = self.radio.channel_plan {
            if !(863_000_000..=870_000_000).contains(&frequency_hz) {
                return Err(ConfigError::InvalidValue {
                    field: "radio.channel_plan",
                    reason: format!("{} Hz outside the EU868 band", frequency_hz),
                });
            }
        }

        if !(1..=223).contains(&self.uplink.port) {
            return Err(ConfigError::InvalidValue {
                field: "uplink.port",
                reason: format!("FPort {} not in 1..=223", self.uplink.port),
            });
        }
        let max = dr.max_payload().min(MAX_PAYLOAD);
        if self.uplink.payload.len() > max {
            return Err(ConfigError::PayloadTooLarge {
                len: self.uplink.payload.len(),
                max,
            });
        }

        let schedule = &self.schedule;
        if schedule.tx_interval_secs == 0 || schedule.tx_interval_secs > MAX_INTERVAL_SECS {
            return Err(ConfigError::InvalidInterval {
                field: "schedule.tx_interval_secs",
                value: schedule.tx_interval_secs,
            });
        }
        if schedule.poll_interval_ms == 0 || schedule.poll_interval_ms > 1000 {
            return Err(ConfigError::InvalidInterval {
                field: "schedule.poll_interval_ms",
                value: schedule.poll_interval_ms,
            });
        }

        // Parse once to surface malformed keys at load time.
        self.session(DeviceEui::FALLBACK).map(|_| ())
    }

    /// Radio wiring.
    pub fn radio_pins(&self) -> RadioPins {
        RadioPins {
            nss: Pin::new(self.pins.nss),
            rxtx: optional_pin(self.pins.rxtx),
            rst: optional_pin(self.pins.rst),
            dio: self.pins.dio.map(optional_pin),
        }
    }

    /// Activity LED, if wired.
    pub fn led(&self) -> Pin {
        optional_pin(self.pins.led)
    }

    /// Chip-select registry (the radio's NSS is added by the HAL).
    pub fn chip_selects(&self) -> ChipSelectSet {
        self.pins.chip_selects.iter().map(|&p| Pin::new(p)).collect()
    }

    /// Radio bus settings.
    pub fn bus_settings(&self) -> BusSettings {
        let order = if self.bus.lsb_first {
            BitOrder::LsbFirst
        } else {
            BitOrder::MsbFirst
        };
        let mode = match self.bus.mode {
            1 => DataMode::Mode1,
            2 => DataMode::Mode2,
            3 => DataMode::Mode3,
            _ => DataMode::Mode0,
        };
        BusSettings::new(self.bus.clock_hz, order, mode)
    }

    /// Channels to configure after the session.
    pub fn channels(&self) -> Vec<Channel> {
        match self.radio.channel_plan {
            ChannelPlan::Default => Vec::new(),
            ChannelPlan::SingleChannel { frequency_hz } => {
                let dr = DataRate::from_spreading_factor(self.radio.spreading_factor)
                    .unwrap_or(DataRate::Sf7);
                (0..=8u8)
                    .map(|index| Channel {
                        index,
                        frequency_hz,
                        min_dr: dr,
                        max_dr: dr,
                        band: if index == 8 { Band::Milli } else { Band::Centi },
                    })
                    .collect()
            }
        }
    }

    /// Session with parsed keys. `device_eui` fills in an absent OTAA DevEUI.
    pub fn session(&self, device_eui: DeviceEui) -> Result<Session, ConfigError> {
        match &self.session {
            SessionConfig::Abp {
                net_id,
                dev_addr,
                nwk_skey,
                app_skey,
            } => Ok(Session::Abp(AbpSession {
                net_id: *net_id,
                dev_addr: u32::from_be_bytes(parse_hex::<4>("session.dev_addr", dev_addr)?),
                nwk_skey: AesKey::new(parse_hex::<16>("session.nwk_skey", nwk_skey)?),
                app_skey: AesKey::new(parse_hex::<16>("session.app_skey", app_skey)?),
            })),
            SessionConfig::Otaa {
                dev_eui,
                app_eui,
                app_key,
            } => {
                let dev_eui = match dev_eui {
                    Some(text) => parse_hex::<8>("session.dev_eui", text)?,
                    None => *device_eui.as_bytes(),
                };
                Ok(Session::Otaa(OtaaCredentials {
                    dev_eui,
                    app_eui: parse_hex::<8>("session.app_eui", app_eui)?,
                    app_key: AesKey::new(parse_hex::<16>("session.app_key", app_key)?),
                }))
            }
        }
    }

    /// Whether the session needs a derived DevEUI.
    pub fn needs_device_eui(&self) -> bool {
        matches!(self.session, SessionConfig::Otaa { dev_eui: None, .. })
    }

    /// The periodic uplink.
    pub fn uplink_job(&self) -> UplinkJob {
        UplinkJob {
            port: self.uplink.port,
            payload: self.uplink.payload.as_bytes().to_vec(),
            confirmed: self.uplink.confirmed,
        }
    }

    /// Everything the driver loop needs.
    pub fn driver_config(&self, device_eui: DeviceEui) -> Result<DriverConfig, ConfigError> {
        let mut config = DriverConfig::new(self.session(device_eui)?, self.uplink_job());
        config.channels = self.channels();
        config.data_rate = data_rate("radio.spreading_factor", self.radio.spreading_factor)?;
        config.rx2_data_rate =
            data_rate("radio.rx2_spreading_factor", self.radio.rx2_spreading_factor)?;
        config.tx_power_dbm = self.radio.tx_power_dbm;
        config.tx_interval = Duration::from_secs(self.schedule.tx_interval_secs);
        config.poll_interval = Duration::from_millis(self.schedule.poll_interval_ms);
        config.led = self.led();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_empty_document_is_default() {
        let config = NodeConfig::from_json("{}").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_match_single_channel_abp_node() {
        let config = NodeConfig::default();
        let driver = config.driver_config(DeviceEui::FALLBACK).unwrap();
        let Session::Abp(session) = &driver.session else {
            panic!("expected ABP session");
        };
        assert_eq!(session.net_id, 1);
        assert_eq!(session.dev_addr, 0x03FF_0001);
        assert_eq!(session.nwk_skey.as_bytes()[0], 0x2B);
        assert_eq!(session.app_skey.as_bytes()[15], 0x3C);
        assert_eq!(driver.job.payload, b"Hello, world!");
        assert_eq!(driver.job.port, 1);
        assert!(!driver.job.confirmed);
        assert_eq!(driver.tx_interval, Duration::from_secs(120));
        assert_eq!(driver.poll_interval, Duration::from_millis(1));
        assert_eq!(driver.data_rate, DataRate::Sf7);
        assert_eq!(driver.rx2_data_rate, DataRate::Sf9);
        assert_eq!(driver.tx_power_dbm, 14);
        assert_eq!(driver.led, Pin::UNUSED);
        assert_eq!(config.stats_port, None);

        assert_eq!(driver.channels.len(), 9);
        assert!(driver
            .channels
            .iter()
            .all(|c| c.frequency_hz == 868_100_000 && c.min_dr == DataRate::Sf7));
        assert_eq!(driver.channels[7].band, Band::Centi);
        assert_eq!(driver.channels[8].band, Band::Milli);
    }

    #[test]
    fn test_default_wiring() {
        let config = NodeConfig::default();
        let pins = config.radio_pins();
        assert_eq!(pins.nss, Pin::CE0);
        assert!(pins.rst.is_unused());
        assert!(pins.dio.iter().all(|p| p.is_unused()));
        let cs = config.chip_selects();
        assert!(cs.contains(Pin::CE0) && cs.contains(Pin::CE1));
        assert_eq!(config.bus_settings(), BusSettings::default());
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = NodeConfig::default();
        config.pins.led = Some(23);
        config.stats_port = Some(8080);
        let text = config.to_json().unwrap();
        assert_eq!(NodeConfig::from_json(&text).unwrap(), config);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = NodeConfig::from_json(r#"{ "schedule": { "interval": 5 } }"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_bad_key_rejected() {
        let json = r#"{ "session": { "mode": "abp", "net_id": 1, "dev_addr": "03FF0001",
            "nwk_skey": "2B7E1516", "app_skey": "2B7E151628AED2A6ABF7158809CF4F3C" } }"#;
        assert!(matches!(
            NodeConfig::from_json(json),
            Err(ConfigError::InvalidKey {
                field: "session.nwk_skey",
                ..
            })
        ));

        let json = r#"{ "session": { "mode": "abp", "net_id": 1, "dev_addr": "03FF00zz",
            "nwk_skey": "2B7E151628AED2A6ABF7158809CF4F3C", "app_skey": "2B7E151628AED2A6ABF7158809CF4F3C" } }"#;
        assert!(matches!(
            NodeConfig::from_json(json),
            Err(ConfigError::InvalidKey {
                field: "session.dev_addr",
                ..
            })
        ));
    }

    #[test]
    fn test_otaa_uses_derived_eui_when_absent() {
        let json = r#"{ "session": { "mode": "otaa", "app_eui": "70B3D57ED0000000",
            "app_key": "00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD:EE:FF" } }"#;
        let config = NodeConfig::from_json(json).unwrap();
        assert!(config.needs_device_eui());
        let eui = DeviceEui::new([0xB8, 0x27, 0xEB, 1, 2, 3, 0, 0]);
        let Session::Otaa(credentials) = config.session(eui).unwrap() else {
            panic!("expected OTAA credentials");
        };
        assert_eq!(&credentials.dev_eui, eui.as_bytes());
        assert_eq!(credentials.app_eui[0], 0x70);
        assert_eq!(credentials.app_key.as_bytes()[15], 0xFF);
    }

    #[test]
    fn test_otaa_explicit_dev_eui() {
        let json = r#"{ "session": { "mode": "otaa", "dev_eui": "0011223344556677",
            "app_eui": "70B3D57ED0000000", "app_key": "00112233445566778899AABBCCDDEEFF" } }"#;
        let config = NodeConfig::from_json(json).unwrap();
        assert!(!config.needs_device_eui());
        let Session::Otaa(credentials) = config.session(DeviceEui::FALLBACK).unwrap() else {
            panic!("expected OTAA credentials");
        };
        assert_eq!(credentials.dev_eui, [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);
    }

    #[test]
    fn test_payload_limit_follows_data_rate() {
        let mut config = NodeConfig::default();
        config.radio.spreading_factor = 12;
        config.radio.channel_plan = ChannelPlan::Default;
        config.uplink.payload = "x".repeat(52);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PayloadTooLarge { len: 52, max: 51 })
        ));
        config.uplink.payload = "x".repeat(51);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_pins() {
        let mut config = NodeConfig::default();
        config.pins.rst = Some(60);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPin {
                field: "pins.rst",
                pin: 60
            })
        ));

        let mut config = NodeConfig::default();
        config.pins.led = Some(7);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPin { field: "pins.led", .. })
        ));
    }

    #[test]
    fn test_invalid_intervals() {
        let mut config = NodeConfig::default();
        config.schedule.tx_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidInterval { .. })));

        let mut config = NodeConfig::default();
        config.schedule.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidInterval { .. })));

        let mut config = NodeConfig::default();
        config.schedule.tx_interval_secs = MAX_INTERVAL_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_radio_values() {
        let mut config = NodeConfig::default();
        config.radio.spreading_factor = 6;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));

        let mut config = NodeConfig::default();
        config.bus.mode = 4;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));

        let mut config = NodeConfig::default();
        config.radio.channel_plan = ChannelPlan::SingleChannel {
            frequency_hz: 915_000_000,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_hides_keys() {
        let text = format!("{:?}", NodeConfig::default());
        assert!(!text.contains("2B7E151628AED2A6ABF7158809CF4F3C"));
        assert!(text.contains("03FF0001"));
    }

    #[test]
    fn test_load_from_file() {
        let path = env::temp_dir().join(format!("lmic-raspi-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "stats_port": 9000, "pins": { "led": 23 } }"#).unwrap();
        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.stats_port, Some(9000));
        assert_eq!(config.led(), Pin::new(23));
        let _ = std::fs::remove_file(&path);

        assert!(matches!(
            NodeConfig::load("/nonexistent/lmic.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
