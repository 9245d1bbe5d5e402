//! Network interface discovery.
//!
//! Enumerates interfaces through `getifaddrs`, grouping every address under
//! its interface name.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::NetworkInterface;
use crate::types::InterfaceType;

/// Which interfaces discovery should consider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Interface name prefixes to skip.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Explicit allow-list of interface names (empty = all).
    #[serde(default)]
    pub interfaces: Vec<String>,
}

fn default_ignore_patterns() -> Vec<String> {
    ["lo", "docker", "virbr", "veth", "br-"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: default_ignore_patterns(),
            interfaces: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    /// Whether an interface name passes the allow-list and ignore patterns.
    pub fn admits(&self, name: &str) -> bool {
        if !self.interfaces.is_empty() {
            return self.interfaces.iter().any(|i| i == name);
        }
        !self.ignore_patterns.iter().any(|p| name.starts_with(p.as_str()))
    }
}

/// Get all network interfaces, sorted by name.
#[cfg(unix)]
pub fn get_network_interfaces() -> Vec<NetworkInterface> {
    let mut by_name: BTreeMap<String, NetworkInterface> = BTreeMap::new();

    for (name, flags, addr) in getifaddrs_entries() {
        let entry = by_name.entry(name.clone()).or_insert_with(|| NetworkInterface {
            index: super::if_nametoindex(&name).unwrap_or(0),
            mtu: read_mtu(&name),
            interface_type: InterfaceType::guess(&name),
            name,
            addresses: Vec::new(),
            is_up: false,
            is_running: false,
            is_loopback: false,
        });

        entry.is_up |= (flags & libc::IFF_UP as u32) != 0;
        entry.is_running |= (flags & libc::IFF_RUNNING as u32) != 0;
        entry.is_loopback |= (flags & libc::IFF_LOOPBACK as u32) != 0;
        if entry.is_loopback {
            entry.interface_type = InterfaceType::Loopback;
        }
        if let Some(addr) = addr {
            if !entry.addresses.contains(&addr) {
                entry.addresses.push(addr);
            }
        }
    }

    by_name.into_values().collect()
}

#[cfg(not(unix))]
pub fn get_network_interfaces() -> Vec<NetworkInterface> {
    Vec::new()
}

/// Get a single interface by name.
pub fn get_interface(name: &str) -> Option<NetworkInterface> {
    get_network_interfaces().into_iter().find(|i| i.name == name)
}

/// Interfaces admitted by `config` that can currently carry traffic.
pub fn get_usable_interfaces(config: &DiscoveryConfig) -> Vec<NetworkInterface> {
    get_network_interfaces()
        .into_iter()
        .filter(|i| config.admits(&i.name) && i.is_usable())
        .collect()
}

/// Raw `(name, flags, address)` triples from `getifaddrs`.
#[cfg(unix)]
fn getifaddrs_entries() -> Vec<(String, u32, Option<IpAddr>)> {
    use std::ffi::CStr;

    let mut entries = Vec::new();

    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(std::ptr::addr_of_mut!(ifaddrs)) != 0 {
            tracing::debug!(
                "getifaddrs failed: {}",
                std::io::Error::last_os_error()
            );
            return entries;
        }

        let mut current = ifaddrs;
        while !current.is_null() {
            let ifa = &*current;

            if !ifa.ifa_name.is_null() {
                let name = CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned();
                let flags = ifa.ifa_flags as u32;

                #[allow(clippy::cast_ptr_alignment)]
                let addr = if ifa.ifa_addr.is_null() {
                    None
                } else {
                    match i32::from((*ifa.ifa_addr).sa_family) {
                        libc::AF_INET => {
                            let sin = ifa.ifa_addr.cast::<libc::sockaddr_in>();
                            Some(IpAddr::V4(std::net::Ipv4Addr::from(u32::from_be(
                                (*sin).sin_addr.s_addr,
                            ))))
                        }
                        libc::AF_INET6 => {
                            let sin6 = ifa.ifa_addr.cast::<libc::sockaddr_in6>();
                            Some(IpAddr::V6(std::net::Ipv6Addr::from(
                                (*sin6).sin6_addr.s6_addr,
                            )))
                        }
                        _ => None,
                    }
                };

                entries.push((name, flags, addr));
            }

            current = ifa.ifa_next;
        }

        libc::freeifaddrs(ifaddrs);
    }

    entries
}

#[cfg(target_os = "linux")]
fn read_mtu(name: &str) -> Option<u32> {
    std::fs::read_to_string(format!("/sys/class/net/{name}/mtu"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(all(unix, not(target_os = "linux")))]
fn read_mtu(_name: &str) -> Option<u32> {
    None
}
