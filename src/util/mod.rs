//! Utility functions and helpers.

use std::net::IpAddr;

use serde::Serialize;

use crate::types::InterfaceType;

mod connectivity;
mod interface;

pub use connectivity::*;
pub use interface::*;

/// A network interface with every address currently assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInterface {
    pub name: String,
    pub index: u32,
    pub addresses: Vec<IpAddr>,
    pub is_up: bool,
    pub is_running: bool,
    pub is_loopback: bool,
    pub mtu: Option<u32>,
    pub interface_type: InterfaceType,
}

impl NetworkInterface {
    /// Addresses usable as a local endpoint for egress traffic.
    pub fn usable_addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.addresses.iter().copied().filter(|a| is_usable_address(*a))
    }

    /// Preferred local address: IPv4 first, then IPv6.
    pub fn primary_address(&self) -> Option<IpAddr> {
        self.usable_addresses()
            .find(IpAddr::is_ipv4)
            .or_else(|| self.usable_addresses().next())
    }

    /// Whether the interface can carry egress traffic right now.
    pub fn is_usable(&self) -> bool {
        self.is_up && !self.is_loopback && self.primary_address().is_some()
    }
}

/// Not loopback, not unspecified and not link-local.
pub fn is_usable_address(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_link_local() && !v4.is_unspecified(),
        IpAddr::V6(v6) => {
            !v6.is_loopback() && !v6.is_unspecified() && (v6.segments()[0] & 0xffc0) != 0xfe80
        }
    }
}

/// Format duration as human-readable.
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    let ms = duration.subsec_millis();

    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{secs}.{ms:03}s")
    } else {
        format!("{ms}ms")
    }
}

/// Get interface index by name.
#[cfg(unix)]
pub fn if_nametoindex(name: &str) -> Option<u32> {
    use std::ffi::CString;
    let cname = CString::new(name).ok()?;
    let idx = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if idx == 0 {
        None
    } else {
        Some(idx)
    }
}

#[cfg(not(unix))]
pub fn if_nametoindex(_name: &str) -> Option<u32> {
    None
}
