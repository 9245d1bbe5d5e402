//! Sources: discovery, health verification and the reconciliation loop.
//!
//! A [`Source`] is a named, dial-capable egress endpoint. A [`Provider`]
//! enumerates candidate sources and verifies their connectivity; the
//! [`Listener`] keeps the store's active set in line with what the provider
//! reports, using faults recorded in the [`Hooker`] by live traffic to
//! trigger re-validation.

mod hooker;
mod interface;
mod listener;
mod provider;

pub use hooker::{DialErrHook, HookFault, Hooker};
pub use interface::{Interface, InterfaceProvider, SourceHooks};
pub use listener::{diff, Listener, ListenerConfig, Store};
pub use provider::{MergedProvider, Provider};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};

use crate::error::Result;
use crate::types::Network;

/// A named, dial-capable egress endpoint.
#[async_trait]
pub trait Source: Send + Sync + fmt::Debug {
    /// Unique, stable name.
    fn name(&self) -> &str;

    /// Maximum transmission unit hint, if known.
    fn mtu(&self) -> Option<u32>;

    /// Open a connection to `address` (`host:port`) over this source.
    async fn dial(&self, network: Network, address: &str) -> Result<Conn>;
}

/// Shared handle to a source.
pub type SharedSource = Arc<dyn Source>;

/// Connection established through a source.
#[derive(Debug)]
pub enum Conn {
    Tcp(TcpStream),
    /// UDP socket already connected to the remote address.
    Udp(UdpSocket),
}

impl Conn {
    /// Local address of the connection.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        match self {
            Self::Tcp(s) => s.local_addr(),
            Self::Udp(s) => s.local_addr(),
        }
    }

    /// Remote address of the connection.
    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        match self {
            Self::Tcp(s) => s.peer_addr(),
            Self::Udp(s) => s.peer_addr(),
        }
    }
}
