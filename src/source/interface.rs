//! OS network interfaces as sources.
//!
//! An [`Interface`] dials through sockets pinned to one interface and bound to
//! one of its addresses. [`InterfaceProvider`] discovers interfaces with
//! `getifaddrs` and verifies them with the connectivity prober.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Type};
use tokio::net::TcpSocket;
use tracing::{debug, trace};

use super::{Conn, DialErrHook, Provider, SharedSource, Source};
use crate::error::{Error, Result};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::types::{Confidence, InterfaceType, Network};
use crate::util::{
    bound_udp_socket, get_interface, get_usable_interfaces, interface_socket, ConnectivityProber,
    DiscoveryConfig, NetworkInterface, ProbeConfig,
};

/// Callbacks injected into every source a provider creates.
#[derive(Clone)]
pub struct SourceHooks {
    /// Invoked with every failed dial.
    pub on_dial_err: Option<DialErrHook>,
    /// Receives dial outcomes.
    pub metrics: Arc<dyn MetricsSink>,
}

impl Default for SourceHooks {
    fn default() -> Self {
        Self {
            on_dial_err: None,
            metrics: Arc::new(NoopMetrics),
        }
    }
}

impl fmt::Debug for SourceHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHooks")
            .field("on_dial_err", &self.on_dial_err.is_some())
            .finish_non_exhaustive()
    }
}

/// A network interface usable as an egress source.
#[derive(Debug, Clone)]
pub struct Interface {
    name: String,
    addresses: Vec<IpAddr>,
    mtu: Option<u32>,
    interface_type: InterfaceType,
    hooks: SourceHooks,
}

impl Interface {
    /// Create a source for `name` dialing from `addresses`.
    pub fn new(name: impl Into<String>, addresses: Vec<IpAddr>, mtu: Option<u32>) -> Self {
        let name = name.into();
        Self {
            interface_type: InterfaceType::guess(&name),
            name,
            addresses,
            mtu,
            hooks: SourceHooks::default(),
        }
    }

    /// Build a source from a discovered interface, keeping only usable addresses.
    pub fn from_network_interface(iface: &NetworkInterface, hooks: SourceHooks) -> Self {
        Self {
            name: iface.name.clone(),
            addresses: iface.usable_addresses().collect(),
            mtu: iface.mtu,
            interface_type: iface.interface_type,
            hooks,
        }
    }

    pub fn with_hooks(mut self, hooks: SourceHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    pub fn interface_type(&self) -> InterfaceType {
        self.interface_type
    }

    /// Local address of the same family as `remote`.
    fn local_for(&self, remote: &SocketAddr) -> Option<IpAddr> {
        self.addresses
            .iter()
            .copied()
            .find(|a| a.is_ipv6() == remote.is_ipv6())
    }

    async fn connect(&self, network: Network, address: &str) -> Result<Conn> {
        let candidates = tokio::net::lookup_host(address).await?;

        let mut last_err: Option<Error> = None;
        for remote in candidates.filter(|a| network.accepts(a.is_ipv6())) {
            let Some(local) = self.local_for(&remote) else {
                continue;
            };
            trace!(source = %self.name, %local, %remote, "Dialing");

            let attempt = if network.is_tcp() {
                self.connect_tcp(local, remote).await
            } else {
                self.connect_udp(local, remote).await
            };
            match attempt {
                Ok(conn) => return Ok(conn),
                Err(e) => last_err = Some(e.into()),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::Internal(format!(
                "{} has no address usable for {} {}",
                self.name, network, address
            ))
        }))
    }

    async fn connect_tcp(&self, local: IpAddr, remote: SocketAddr) -> std::io::Result<Conn> {
        let socket = interface_socket(
            Domain::for_address(remote),
            Type::STREAM,
            Protocol::TCP,
            &self.name,
        )?;
        socket.bind(&SocketAddr::new(local, 0).into())?;

        let socket = TcpSocket::from_std_stream(socket.into());
        let stream = socket.connect(remote).await?;
        Ok(Conn::Tcp(stream))
    }

    async fn connect_udp(&self, local: IpAddr, remote: SocketAddr) -> std::io::Result<Conn> {
        let socket = bound_udp_socket(SocketAddr::new(local, 0), &self.name)?;
        socket.connect(remote).await?;
        Ok(Conn::Udp(socket))
    }
}

#[async_trait]
impl Source for Interface {
    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> Option<u32> {
        self.mtu
    }

    async fn dial(&self, network: Network, address: &str) -> Result<Conn> {
        let start = Instant::now();
        let result = self.connect(network, address).await;
        self.hooks
            .metrics
            .record_dial(&self.name, network, result.is_ok(), start.elapsed());

        result.map_err(|e| {
            let reason = e.to_string();
            if let Some(hook) = &self.hooks.on_dial_err {
                hook(&self.name, network, address, &reason);
            }
            Error::DialFailed {
                source_name: self.name.clone(),
                network: network.to_string(),
                address: address.to_string(),
                reason,
            }
        })
    }
}

/// Provider backed by the host's network interfaces.
#[derive(Debug)]
pub struct InterfaceProvider {
    discovery: DiscoveryConfig,
    prober: ConnectivityProber,
    hooks: SourceHooks,
}

impl InterfaceProvider {
    pub fn new(discovery: DiscoveryConfig, probe: ProbeConfig, hooks: SourceHooks) -> Self {
        Self {
            discovery,
            prober: ConnectivityProber::new(probe),
            hooks,
        }
    }

    pub fn discovery(&self) -> &DiscoveryConfig {
        &self.discovery
    }
}

#[async_trait]
impl Provider for InterfaceProvider {
    async fn provide(&self) -> Result<Vec<SharedSource>> {
        let discovery = self.discovery.clone();
        let interfaces = tokio::task::spawn_blocking(move || get_usable_interfaces(&discovery))
            .await
            .map_err(|e| Error::Provider(format!("interface enumeration panicked: {e}")))?;

        debug!("Discovered {} usable interfaces", interfaces.len());

        Ok(interfaces
            .iter()
            .map(|i| {
                Arc::new(Interface::from_network_interface(i, self.hooks.clone())) as SharedSource
            })
            .collect())
    }

    async fn check(&self, source: &dyn Source, level: Confidence) -> Result<()> {
        let name = source.name();
        let failed = |reason: String| Error::CheckFailed {
            source_name: name.to_string(),
            reason,
        };

        let lookup = name.to_string();
        let iface = tokio::task::spawn_blocking(move || get_interface(&lookup))
            .await
            .map_err(|e| failed(format!("interface lookup panicked: {e}")))?
            .ok_or_else(|| Error::SourceNotFound(name.to_string()))?;
        if !iface.is_up {
            return Err(failed("interface is down".into()));
        }
        let local = iface
            .primary_address()
            .ok_or_else(|| failed("no usable address".into()))?;

        if level == Confidence::Low {
            return Ok(());
        }

        let result = self.prober.probe(name, local).await.map_err(failed)?;
        debug!(
            source = name,
            rtt_ms = result.rtt.as_millis() as u64,
            method = ?result.method,
            "Connectivity verified"
        );
        Ok(())
    }
}
