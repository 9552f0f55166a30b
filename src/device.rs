//! Seams to the collaborators outside this crate: the tunnel device that is
//! programmed with resolved endpoints and the TURN client's allocation.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::endpoint::Endpoint;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerConfig {
    pub public_key: String,
    pub endpoint: Endpoint,
    pub allowed_ips: Vec<String>,
    pub persistent_keepalive: u16,
}

#[async_trait]
pub trait Device: Send + Sync {
    async fn configure_peer(&self, peer: &PeerConfig) -> io::Result<()>;
    async fn remove_peer(&self, public_key: &str) -> io::Result<()>;
    async fn add_route(&self, allowed_ips: &[String]) -> io::Result<()>;
}

#[async_trait]
pub trait RelayConn: Send + Sync {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl RelayConn for UdpSocket {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr).await
    }
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }
    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// A TURN allocation.
#[derive(Clone)]
pub struct RelayInfo {
    /// Server-reflexive address seen by the TURN server
    pub mapped_addr: SocketAddr,
    /// Relayed transport address peers send to
    pub relay_addr: SocketAddr,
    pub relay_conn: Arc<dyn RelayConn>,
}

pub trait RelayInfoProvider: Send + Sync {
    fn relay_info(&self) -> Option<RelayInfo>;
}

impl RelayInfoProvider for RelayInfo {
    fn relay_info(&self) -> Option<RelayInfo> {
        Some(self.clone())
    }
}
