//! Internet connectivity probing.
//!
//! Verifies that an interface actually reaches the internet by sending a STUN
//! binding request (falling back to a DNS root query) through a socket bound
//! to that interface.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

/// STUN servers for connectivity testing.
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun.l.google.com:19302",
    "stun1.l.google.com:19302",
    "stun.cloudflare.com:3478",
];

/// DNS servers for connectivity testing.
pub const DEFAULT_DNS_SERVERS: &[&str] = &["8.8.8.8:53", "1.1.1.1:53", "9.9.9.9:53"];

const STUN_MAGIC_COOKIE: [u8; 4] = [0x21, 0x12, 0xa4, 0x42];

/// Connectivity probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// STUN servers to use.
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
    /// DNS servers to use.
    #[serde(default = "default_dns_servers")]
    pub dns_servers: Vec<String>,
    /// Per-attempt timeout.
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Attempts per server.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_stun_servers() -> Vec<String> {
    DEFAULT_STUN_SERVERS.iter().map(|s| (*s).to_string()).collect()
}
fn default_dns_servers() -> Vec<String> {
    DEFAULT_DNS_SERVERS.iter().map(|s| (*s).to_string()).collect()
}
fn default_probe_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_retries() -> u32 {
    2
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            stun_servers: default_stun_servers(),
            dns_servers: default_dns_servers(),
            timeout: default_probe_timeout(),
            retries: default_retries(),
        }
    }
}

/// Successful probe outcome.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Interface name.
    pub interface: String,
    /// Local address used.
    pub local_addr: SocketAddr,
    /// External address (only known from STUN).
    pub external_addr: Option<SocketAddr>,
    /// Round-trip time to the probe server.
    pub rtt: Duration,
    /// Which method succeeded.
    pub method: ProbeMethod,
}

/// Probe method that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Stun,
    Dns,
}

/// Connectivity prober for network interfaces.
#[derive(Debug, Clone)]
pub struct ConnectivityProber {
    config: ProbeConfig,
}

impl ConnectivityProber {
    /// Create a new connectivity prober.
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe connectivity through `interface` using `local_addr`.
    pub async fn probe(&self, interface: &str, local_addr: IpAddr) -> Result<ProbeResult, String> {
        let mut last_error = String::from("no probe servers configured");

        for server in &self.config.stun_servers {
            for attempt in 0..self.config.retries.max(1) {
                match self.stun_probe(interface, local_addr, server).await {
                    Ok(result) => return Ok(result),
                    Err(e) => {
                        debug!(
                            "STUN probe via {} to {} failed (attempt {}): {}",
                            interface,
                            server,
                            attempt + 1,
                            e
                        );
                        last_error = e;
                    }
                }
            }
        }

        for server in &self.config.dns_servers {
            for attempt in 0..self.config.retries.max(1) {
                match self.dns_probe(interface, local_addr, server).await {
                    Ok(result) => return Ok(result),
                    Err(e) => {
                        debug!(
                            "DNS probe via {} to {} failed (attempt {}): {}",
                            interface,
                            server,
                            attempt + 1,
                            e
                        );
                        last_error = e;
                    }
                }
            }
        }

        Err(last_error)
    }

    /// Perform a single STUN probe.
    async fn stun_probe(
        &self,
        interface: &str,
        local_addr: IpAddr,
        server: &str,
    ) -> Result<ProbeResult, String> {
        let server_addr = resolve(server, local_addr.is_ipv6()).await?;
        let socket = bound_udp_socket(SocketAddr::new(local_addr, 0), interface)
            .map_err(|e| format!("Failed to create socket: {e}"))?;

        let txn_id: [u8; 12] = rand::random();
        let request = build_stun_binding_request(&txn_id);

        let start = Instant::now();
        socket
            .send_to(&request, server_addr)
            .await
            .map_err(|e| format!("Failed to send STUN request: {e}"))?;

        let mut buf = [0u8; 1024];
        let (len, _) = tokio::time::timeout(self.config.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| "STUN response timeout".to_string())?
            .map_err(|e| format!("Failed to receive STUN response: {e}"))?;
        let rtt = start.elapsed();

        let external_addr = parse_stun_response(&buf[..len], &txn_id)
            .ok_or_else(|| "Failed to parse STUN response".to_string())?;

        Ok(ProbeResult {
            interface: interface.to_string(),
            local_addr: socket.local_addr().map_err(|e| e.to_string())?,
            external_addr: Some(external_addr),
            rtt,
            method: ProbeMethod::Stun,
        })
    }

    /// Perform a single DNS probe.
    async fn dns_probe(
        &self,
        interface: &str,
        local_addr: IpAddr,
        server: &str,
    ) -> Result<ProbeResult, String> {
        let server_addr = resolve(server, local_addr.is_ipv6()).await?;
        let socket = bound_udp_socket(SocketAddr::new(local_addr, 0), interface)
            .map_err(|e| format!("Failed to create socket: {e}"))?;

        let txn_id: u16 = rand::random();
        let query = build_dns_query(txn_id);

        let start = Instant::now();
        socket
            .send_to(&query, server_addr)
            .await
            .map_err(|e| format!("Failed to send DNS query: {e}"))?;

        let mut buf = [0u8; 512];
        let (len, _) = tokio::time::timeout(self.config.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| "DNS response timeout".to_string())?
            .map_err(|e| format!("Failed to receive DNS response: {e}"))?;
        let rtt = start.elapsed();

        if !is_dns_response(&buf[..len], txn_id) {
            return Err("Malformed DNS response".to_string());
        }

        Ok(ProbeResult {
            interface: interface.to_string(),
            local_addr: socket.local_addr().map_err(|e| e.to_string())?,
            external_addr: None,
            rtt,
            method: ProbeMethod::Dns,
        })
    }
}

/// Resolve `host:port`, keeping only addresses of the wanted family.
async fn resolve(server: &str, ipv6: bool) -> Result<SocketAddr, String> {
    tokio::net::lookup_host(server)
        .await
        .map_err(|e| format!("Failed to resolve {server}: {e}"))?
        .find(|a| a.is_ipv6() == ipv6)
        .ok_or_else(|| format!("No {} address for {server}", if ipv6 { "IPv6" } else { "IPv4" }))
}

/// Create a raw socket pinned to `interface` where the platform allows it.
///
/// Pinning failures (usually missing `CAP_NET_RAW`) are logged and the socket
/// falls back to plain address binding.
pub fn interface_socket(
    domain: Domain,
    ty: Type,
    protocol: Protocol,
    interface: &str,
) -> std::io::Result<Socket> {
    let socket = Socket::new(domain, ty, Some(protocol))?;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    if let Err(e) = socket.bind_device(Some(interface.as_bytes())) {
        debug!(
            "SO_BINDTODEVICE failed for {}: {}, falling back to address binding",
            interface, e
        );
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    if let Some(idx) = std::num::NonZeroU32::new(super::if_nametoindex(interface).unwrap_or(0)) {
        let res = if domain == Domain::IPV6 {
            socket.bind_device_by_index_v6(Some(idx))
        } else {
            socket.bind_device_by_index_v4(Some(idx))
        };
        if let Err(e) = res {
            debug!(
                "IP_BOUND_IF failed for {}: {}, falling back to address binding",
                interface, e
            );
        }
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios"
    )))]
    let _ = interface;

    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Create a UDP socket bound to `bind_addr` and pinned to `interface`.
pub fn bound_udp_socket(bind_addr: SocketAddr, interface: &str) -> std::io::Result<UdpSocket> {
    let socket = interface_socket(
        Domain::for_address(bind_addr),
        Type::DGRAM,
        Protocol::UDP,
        interface,
    )?;
    socket.bind(&bind_addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Build a STUN Binding Request.
fn build_stun_binding_request(txn_id: &[u8; 12]) -> Vec<u8> {
    let mut request = Vec::with_capacity(20);
    // Binding Request, zero-length body
    request.extend_from_slice(&[0x00, 0x01, 0x00, 0x00]);
    request.extend_from_slice(&STUN_MAGIC_COOKIE);
    request.extend_from_slice(txn_id);
    request
}

/// Parse a STUN Binding Response and extract the mapped address.
fn parse_stun_response(data: &[u8], expected_txn_id: &[u8; 12]) -> Option<SocketAddr> {
    if data.len() < 20
        || data[0..2] != [0x01, 0x01]
        || data[4..8] != STUN_MAGIC_COOKIE
        || &data[8..20] != expected_txn_id
    {
        return None;
    }

    let msg_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let attrs_end = 20 + msg_len.min(data.len() - 20);
    let mut pos = 20;

    while pos + 4 <= attrs_end {
        let attr_type = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let attr_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        pos += 4;
        if pos + attr_len > attrs_end {
            break;
        }

        // XOR-MAPPED-ADDRESS (0x0020) or MAPPED-ADDRESS (0x0001)
        let xor = attr_type == 0x0020;
        if (xor || attr_type == 0x0001) && attr_len >= 8 {
            let family = data[pos + 1];
            let mut port = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);
            if xor {
                port ^= 0x2112;
            }

            if family == 0x01 {
                let mut octets = [data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]];
                if xor {
                    for (o, k) in octets.iter_mut().zip(STUN_MAGIC_COOKIE) {
                        *o ^= k;
                    }
                }
                return Some(SocketAddr::new(IpAddr::from(octets), port));
            } else if family == 0x02 && attr_len >= 20 {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&data[pos + 4..pos + 20]);
                if xor {
                    let mut key = [0u8; 16];
                    key[..4].copy_from_slice(&STUN_MAGIC_COOKIE);
                    key[4..].copy_from_slice(expected_txn_id);
                    for (o, k) in octets.iter_mut().zip(key) {
                        *o ^= k;
                    }
                }
                return Some(SocketAddr::new(IpAddr::from(octets), port));
            }
        }

        // Attributes are 4-byte aligned
        pos += (attr_len + 3) & !3;
    }

    None
}

/// Build a minimal DNS query for the root zone.
fn build_dns_query(txn_id: u16) -> Vec<u8> {
    let mut query = Vec::with_capacity(17);
    query.extend_from_slice(&txn_id.to_be_bytes());
    // Standard query, recursion desired
    query.extend_from_slice(&[0x01, 0x00]);
    // QDCOUNT=1, ANCOUNT=0, NSCOUNT=0, ARCOUNT=0
    query.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    // Root label, type A, class IN
    query.extend_from_slice(&[0x00, 0x00, 0x01, 0x00, 0x01]);
    query
}

/// A reply carrying our transaction id with the QR bit set.
fn is_dns_response(data: &[u8], txn_id: u16) -> bool {
    data.len() >= 12 && data[0..2] == txn_id.to_be_bytes() && data[2] & 0x80 != 0
}
