//! Device EUI derivation from the host's network adapters.
//!
//! A LoRaWAN device needs an 8-byte DevEUI. On a Raspberry Pi the natural
//! stable source is the MAC address of the active network adapter: its six
//! bytes followed by two zero bytes. When no adapter qualifies, the fixed
//! sequence `01 02 03 04 05 06 07 08` is used and the resolution says so.
//!
//! An adapter qualifies when it is not loopback, has a 6-byte link-layer
//! address and its operational state reads `up` (administratively up is not
//! enough: a cable must be connected). The first qualifying adapter in
//! enumeration order wins; that order comes from the platform and is not
//! guaranteed to be stable.
//!
//! # Example
//!
//! ```no_run
//! use lmic_raspi::identity::{derive_device_eui, SysfsInterfaces};
//!
//! let resolution = derive_device_eui(&SysfsInterfaces::new());
//! if resolution.is_derived() {
//!     println!("DevEUI {}", resolution.eui);
//! }
//! ```

mod sysfs;

pub use sysfs::{SysfsInterfaces, SYSFS_NET};

use log::{debug, info, warn};
use std::fmt;
use std::io;

/// 8-byte device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceEui([u8; 8]);

impl DeviceEui {
    /// Identifier used when no adapter qualifies.
    pub const FALLBACK: DeviceEui = DeviceEui([1, 2, 3, 4, 5, 6, 7, 8]);

    /// Identifier from raw bytes.
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// MAC address followed by two zero bytes.
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut bytes = [0u8; 8];
        bytes[..6].copy_from_slice(&mac);
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// C array declaration ready to paste into a sketch.
    ///
    /// `static const u1_t PROGMEM DEVEUI[8]={ 0xb8, ..., 0x00, 0x00 }; // eth0`
    pub fn source_literal(&self, interface: &str) -> String {
        c_array_literal(&self.0, interface)
    }
}

fn c_array_literal(bytes: &[u8], interface: &str) -> String {
    let bytes: Vec<String> = bytes.iter().map(|b| format!("0x{:02x}", b)).collect();
    format!(
        "static const u1_t PROGMEM DEVEUI[8]={{ {} }}; // {}",
        bytes.join(", "),
        interface
    )
}

impl fmt::Display for DeviceEui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// One network adapter as seen by the enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Kernel interface name.
    pub name: String,
    /// Loopback flag.
    pub loopback: bool,
    /// Administratively up (IFF_UP).
    pub admin_up: bool,
    /// Packet-family link-layer address of any length (empty for point to
    /// point links such as `tun0`), `None` when the adapter has none.
    pub hw_addr: Option<Vec<u8>>,
}

/// Enumerates adapters and reads their operational state.
pub trait InterfaceSource {
    /// All adapters, in platform order.
    fn interfaces(&self) -> io::Result<Vec<InterfaceInfo>>;

    /// Raw operational state of `name` (`up`, `down`, `dormant`, ...).
    fn operstate(&self, name: &str) -> io::Result<String>;
}

/// Where the EUI came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EuiSource {
    /// Derived from the named adapter.
    Derived { interface: String },
    /// No adapter qualified.
    Fallback,
}

/// Result of [`derive_device_eui`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EuiResolution {
    pub eui: DeviceEui,
    pub source: EuiSource,
}

impl EuiResolution {
    /// Whether the EUI comes from real hardware.
    pub fn is_derived(&self) -> bool {
        matches!(self.source, EuiSource::Derived { .. })
    }
}

fn is_linked(source: &dyn InterfaceSource, name: &str) -> bool {
    match source.operstate(name) {
        Ok(state) => state.trim() == "up",
        Err(e) => {
            debug!("Cannot read operstate of {}: {}", name, e);
            false
        }
    }
}

/// Derive the DevEUI from the first active adapter.
pub fn derive_device_eui(source: &dyn InterfaceSource) -> EuiResolution {
    let interfaces = match source.interfaces() {
        Ok(list) => list,
        Err(e) => {
            warn!("Interface enumeration failed: {}", e);
            return EuiResolution {
                eui: DeviceEui::FALLBACK,
                source: EuiSource::Fallback,
            };
        }
    };

    for iface in interfaces {
        if iface.loopback {
            continue;
        }
        let Some(mac) = iface.hw_addr.as_deref().and_then(|a| <[u8; 6]>::try_from(a).ok()) else {
            continue;
        };
        if !is_linked(source, &iface.name) {
            continue;
        }
        let eui = DeviceEui::from_mac(mac);
        info!("DevEUI {} from {}", eui, iface.name);
        return EuiResolution {
            eui,
            source: EuiSource::Derived {
                interface: iface.name,
            },
        };
    }

    warn!("No active network adapter, using fallback DevEUI");
    EuiResolution {
        eui: DeviceEui::FALLBACK,
        source: EuiSource::Fallback,
    }
}

/// Per-adapter line of the inspection utility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceReport {
    pub name: String,
    pub admin_up: bool,
    pub linked: bool,
    /// Link-layer address as enumerated, any length.
    pub hw_addr: Vec<u8>,
}

impl InterfaceReport {
    /// DevEUI this adapter would give, if its address is a 6-byte MAC.
    pub fn eui(&self) -> Option<DeviceEui> {
        <[u8; 6]>::try_from(self.hw_addr.as_slice())
            .ok()
            .map(DeviceEui::from_mac)
    }

    /// Address bytes followed by two zero bytes as a C array declaration.
    /// Addresses that are not six bytes long are printed as they are.
    pub fn source_literal(&self) -> String {
        let mut bytes = self.hw_addr.clone();
        bytes.extend_from_slice(&[0, 0]);
        c_array_literal(&bytes, &self.name)
    }

    /// `// eth0 Up Linked` header line.
    pub fn status_line(&self) -> String {
        format!(
            "// {} {} {}",
            self.name,
            if self.admin_up { "Up" } else { "Down" },
            if self.linked { "Linked" } else { "No Link" }
        )
    }
}

/// Candidate adapters for the inspection utility.
///
/// Loopback and adapters without a packet-family address are never listed;
/// addresses of any length are. Without `all`, only linked adapters are
/// listed.
pub fn list_interfaces(
    source: &dyn InterfaceSource,
    all: bool,
) -> io::Result<Vec<InterfaceReport>> {
    let mut reports = Vec::new();
    for iface in source.interfaces()? {
        if iface.loopback {
            continue;
        }
        let Some(hw_addr) = iface.hw_addr else {
            continue;
        };
        let linked = is_linked(source, &iface.name);
        if all || linked {
            reports.push(InterfaceReport {
                name: iface.name,
                admin_up: iface.admin_up,
                linked,
                hw_addr,
            });
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Synthetic adapter list.
    #[derive(Default)]
    struct StaticInterfaces {
        interfaces: Vec<InterfaceInfo>,
        operstates: HashMap<String, String>,
        fail_enumeration: bool,
    }

    impl StaticInterfaces {
        fn with(self, name: &str, loopback: bool, mac: Option<[u8; 6]>, state: &str) -> Self {
            self.with_addr(name, loopback, mac.map(|m| m.to_vec()), state)
        }

        fn with_addr(mut self, name: &str, loopback: bool, addr: Option<Vec<u8>>, state: &str) -> Self {
            self.interfaces.push(InterfaceInfo {
                name: name.to_string(),
                loopback,
                admin_up: state == "up",
                hw_addr: addr,
            });
            if !state.is_empty() {
                self.operstates.insert(name.to_string(), format!("{}\n", state));
            }
            self
        }
    }

    impl InterfaceSource for StaticInterfaces {
        fn interfaces(&self) -> io::Result<Vec<InterfaceInfo>> {
            if self.fail_enumeration {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            Ok(self.interfaces.clone())
        }

        fn operstate(&self, name: &str) -> io::Result<String> {
            self.operstates
                .get(name)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no operstate"))
        }
    }

    const ETH0: [u8; 6] = [0xb8, 0x27, 0xeb, 0x12, 0x34, 0x56];
    const WLAN0: [u8; 6] = [0xdc, 0xa6, 0x32, 0xaa, 0xbb, 0xcc];

    #[test]
    fn test_single_active_adapter_is_used() {
        let source = StaticInterfaces::default()
            .with("lo", true, Some([0; 6]), "unknown")
            .with("eth0", false, Some(ETH0), "up");
        let resolution = derive_device_eui(&source);
        assert!(resolution.is_derived());
        assert_eq!(
            resolution.eui.as_bytes(),
            &[0xb8, 0x27, 0xeb, 0x12, 0x34, 0x56, 0x00, 0x00]
        );
        assert_eq!(
            resolution.source,
            EuiSource::Derived {
                interface: "eth0".into()
            }
        );
    }

    #[test]
    fn test_only_loopback_or_down_falls_back() {
        let source = StaticInterfaces::default()
            .with("lo", true, Some([0; 6]), "up")
            .with("eth0", false, Some(ETH0), "down");
        let resolution = derive_device_eui(&source);
        assert!(!resolution.is_derived());
        assert_eq!(resolution.eui, DeviceEui::FALLBACK);
        assert_eq!(resolution.eui.as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_first_qualifying_in_enumeration_order_wins() {
        let source = StaticInterfaces::default()
            .with("wlan0", false, Some(WLAN0), "up")
            .with("eth0", false, Some(ETH0), "up");
        let resolution = derive_device_eui(&source);
        assert_eq!(resolution.eui, DeviceEui::from_mac(WLAN0));
    }

    #[test]
    fn test_operstate_error_skips_adapter() {
        let source = StaticInterfaces::default()
            .with("eth0", false, Some(ETH0), "")
            .with("wlan0", false, Some(WLAN0), "up");
        let resolution = derive_device_eui(&source);
        assert_eq!(resolution.eui, DeviceEui::from_mac(WLAN0));
    }

    #[test]
    fn test_adapter_without_hw_addr_skipped() {
        let source = StaticInterfaces::default().with("tun0", false, None, "up");
        assert!(!derive_device_eui(&source).is_derived());
    }

    #[test]
    fn test_adapter_with_short_address_skipped() {
        let source = StaticInterfaces::default()
            .with_addr("tun0", false, Some(Vec::new()), "up")
            .with_addr("ib0", false, Some(vec![0x80; 20]), "up");
        assert!(!derive_device_eui(&source).is_derived());
    }

    #[test]
    fn test_enumeration_failure_falls_back() {
        let source = StaticInterfaces {
            fail_enumeration: true,
            ..Default::default()
        };
        let resolution = derive_device_eui(&source);
        assert_eq!(resolution.source, EuiSource::Fallback);
        assert_eq!(resolution.eui, DeviceEui::FALLBACK);
    }

    #[test]
    fn test_fallback_distinguishable_from_lookalike_mac() {
        // An adapter whose address happens to be 01:02:03:04:05:06 still
        // reports as derived.
        let source = StaticInterfaces::default().with("eth0", false, Some([1, 2, 3, 4, 5, 6]), "up");
        let resolution = derive_device_eui(&source);
        assert!(resolution.is_derived());
    }

    #[test]
    fn test_source_literal() {
        let eui = DeviceEui::from_mac(ETH0);
        assert_eq!(
            eui.source_literal("eth0"),
            "static const u1_t PROGMEM DEVEUI[8]={ 0xb8, 0x27, 0xeb, 0x12, 0x34, 0x56, 0x00, 0x00 }; // eth0"
        );
        assert_eq!(eui.to_string(), "B827EB1234560000");
    }

    #[test]
    fn test_list_linked_only_by_default() {
        let source = StaticInterfaces::default()
            .with("lo", true, Some([0; 6]), "unknown")
            .with("eth0", false, Some(ETH0), "down")
            .with("wlan0", false, Some(WLAN0), "up");
        let reports = list_interfaces(&source, false).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "wlan0");
        assert_eq!(reports[0].status_line(), "// wlan0 Up Linked");
    }

    #[test]
    fn test_list_all_includes_down_adapters() {
        let source = StaticInterfaces::default()
            .with("lo", true, Some([0; 6]), "unknown")
            .with("eth0", false, Some(ETH0), "down")
            .with("wlan0", false, Some(WLAN0), "up");
        let reports = list_interfaces(&source, true).unwrap();
        let names: Vec<_> = reports.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["eth0", "wlan0"]);
        assert_eq!(reports[0].status_line(), "// eth0 Down No Link");
    }

    #[test]
    fn test_list_all_prints_odd_length_addresses() {
        let source = StaticInterfaces::default()
            .with("eth0", false, Some(ETH0), "up")
            .with_addr("tun0", false, Some(Vec::new()), "unknown")
            .with_addr("sit0", false, Some(vec![0, 0, 0, 0]), "down")
            .with_addr("dummy0", false, None, "down");
        let reports = list_interfaces(&source, true).unwrap();
        let names: Vec<_> = reports.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["eth0", "tun0", "sit0"]);

        assert_eq!(reports[0].eui(), Some(DeviceEui::from_mac(ETH0)));
        assert_eq!(
            reports[0].source_literal(),
            DeviceEui::from_mac(ETH0).source_literal("eth0")
        );
        assert_eq!(reports[1].eui(), None);
        assert_eq!(
            reports[1].source_literal(),
            "static const u1_t PROGMEM DEVEUI[8]={ 0x00, 0x00 }; // tun0"
        );
        assert_eq!(
            reports[2].source_literal(),
            "static const u1_t PROGMEM DEVEUI[8]={ 0x00, 0x00, 0x00, 0x00, 0x00, 0x00 }; // sit0"
        );
    }
}
