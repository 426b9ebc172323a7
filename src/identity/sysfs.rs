//! Adapter enumeration through `/sys/class/net`.

use super::{InterfaceInfo, InterfaceSource};
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default sysfs network class directory.
pub const SYSFS_NET: &str = "/sys/class/net";

/// `IFF_UP` from `<net/if.h>`.
const IFF_UP: u32 = 0x1;
/// `IFF_LOOPBACK` from `<net/if.h>`.
const IFF_LOOPBACK: u32 = 0x8;
/// `ARPHRD_LOOPBACK` from `<net/if_arp.h>`.
const ARPHRD_LOOPBACK: u32 = 772;
/// `MAX_ADDR_LEN` from `<linux/netdevice.h>`.
const MAX_ADDR_LEN: usize = 32;

/// Adapters listed under a sysfs network class directory.
#[derive(Debug, Clone)]
pub struct SysfsInterfaces {
    root: PathBuf,
}

impl SysfsInterfaces {
    /// Read from [`SYSFS_NET`].
    pub fn new() -> Self {
        Self::with_root(SYSFS_NET)
    }

    /// Read from another directory laid out like `/sys/class/net`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_attr(dir: &Path, attr: &str) -> io::Result<String> {
        fs::read_to_string(dir.join(attr)).map(|s| s.trim().to_string())
    }

    fn read_info(dir: &Path, name: String) -> InterfaceInfo {
        let flags = Self::read_attr(dir, "flags")
            .ok()
            .and_then(|s| u32::from_str_radix(s.trim_start_matches("0x"), 16).ok())
            .unwrap_or(0);
        let arp_type = Self::read_attr(dir, "type")
            .ok()
            .and_then(|s| s.parse::<u32>().ok());
        let hw_addr = Self::read_attr(dir, "address")
            .ok()
            .and_then(|s| parse_link_addr(&s));

        InterfaceInfo {
            name,
            loopback: flags & IFF_LOOPBACK != 0 || arp_type == Some(ARPHRD_LOOPBACK),
            admin_up: flags & IFF_UP != 0,
            hw_addr,
        }
    }
}

impl Default for SysfsInterfaces {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a colon separated link-layer address of any length. An empty
/// attribute is a zero-length address (`tun0` and other point to point links).
fn parse_link_addr(text: &str) -> Option<Vec<u8>> {
    if text.is_empty() {
        return Some(Vec::new());
    }
    let mut addr = Vec::new();
    for part in text.split(':') {
        if part.is_empty() || part.len() > 2 || addr.len() == MAX_ADDR_LEN {
            return None;
        }
        addr.push(u8::from_str_radix(part, 16).ok()?);
    }
    Some(addr)
}

impl InterfaceSource for SysfsInterfaces {
    fn interfaces(&self) -> io::Result<Vec<InterfaceInfo>> {
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", self.root.display()),
            ));
        }
        let pattern = self.root.join("*");
        let paths = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        let mut interfaces = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    debug!("Skipping unreadable interface entry: {}", e);
                    continue;
                }
            };
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            interfaces.push(Self::read_info(&path, name));
        }
        Ok(interfaces)
    }

    fn operstate(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.root.join(name).join("operstate"))
    }
}
