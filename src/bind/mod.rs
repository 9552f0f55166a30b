//! Transport multiplexer handed to the tunnel device.
//!
//! One [`Bind`] carries tunnel packets over three paths and the endpoint
//! decides which one:
//!
//! ```text
//!                    +-------------------+
//!   Endpoint::Direct |  udp v4 / udp v6  | <- check packets -> CheckDemux
//!                    +-------------------+
//!   Endpoint::Relay  |  TURN relay conn  |
//!                    +-------------------+
//!   Endpoint::Drp    |  DRP client/proxy |
//!                    +-------------------+
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_shutdown::ShutdownManager;
use async_trait::async_trait;
use dashmap::DashMap;
use meshlink_core::protocol::MsgType;
use parking_lot::Mutex;

use crate::agent::CheckDemux;
use crate::device::RelayInfoProvider;
use crate::drp::{DrpClient, DrpDataReceiver};
use crate::endpoint::Endpoint;
use crate::error::Error;

pub use direct::DirectSockets;

mod direct;
mod drp;
mod relay;

/// Fills `bufs`, `sizes` and `eps` with up to `bufs.len()` packets and returns
/// how many were read. Each buffer must be sized for the largest packet.
#[async_trait]
pub trait ReceiveFunc: Send + Sync {
    async fn recv(
        &self,
        bufs: &mut [Vec<u8>],
        sizes: &mut [usize],
        eps: &mut Vec<Endpoint>,
    ) -> io::Result<usize>;
}

#[async_trait]
pub trait Bind: Send + Sync {
    /// Returns the receive functions and the port actually bound.
    fn open(&self, port: u16) -> io::Result<(Vec<Box<dyn ReceiveFunc>>, u16)>;
    async fn send(&self, bufs: &[&[u8]], endpoint: &Endpoint) -> io::Result<()>;
    fn close(&self) -> io::Result<()>;
    fn parse_endpoint(&self, s: &str) -> io::Result<Endpoint>;
}

pub(crate) fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "bind closed")
}

pub struct DefaultBind {
    local_key: String,
    sockets: Arc<DirectSockets>,
    demux: CheckDemux,
    relay: Option<Arc<dyn RelayInfoProvider>>,
    relay_peers: Arc<DashMap<SocketAddr, String>>,
    drp: Option<DrpClient>,
    drp_receiver: Option<Arc<tokio::sync::Mutex<DrpDataReceiver>>>,
    drp_server: Option<SocketAddr>,
    closed: Mutex<Option<ShutdownManager<()>>>,
}

impl DefaultBind {
    pub fn new(local_key: &str, demux: CheckDemux) -> Self {
        Self {
            local_key: local_key.to_string(),
            sockets: Arc::new(DirectSockets::default()),
            demux,
            relay: None,
            relay_peers: Arc::new(DashMap::new()),
            drp: None,
            drp_receiver: None,
            drp_server: None,
            closed: Mutex::new(None),
        }
    }
    pub fn set_relay(mut self, relay: Arc<dyn RelayInfoProvider>) -> Self {
        self.relay.replace(relay);
        self
    }
    pub fn set_drp(
        mut self,
        client: DrpClient,
        receiver: DrpDataReceiver,
        server: SocketAddr,
    ) -> Self {
        self.drp.replace(client);
        self.drp_receiver
            .replace(Arc::new(tokio::sync::Mutex::new(receiver)));
        self.drp_server.replace(server);
        self
    }
    pub fn local_key(&self) -> &str {
        &self.local_key
    }
    pub fn direct_sockets(&self) -> Arc<DirectSockets> {
        self.sockets.clone()
    }
    pub fn port(&self) -> Option<u16> {
        self.sockets.port()
    }
    pub fn drp_server(&self) -> Option<SocketAddr> {
        self.drp_server
    }
    /// Packets arriving on the relay from `addr` are attributed to `public_key`.
    pub fn add_relay_peer(&self, addr: SocketAddr, public_key: &str) {
        self.relay_peers.insert(addr, public_key.to_string());
    }
    pub fn remove_relay_peer(&self, addr: &SocketAddr) -> Option<String> {
        self.relay_peers.remove(addr).map(|(_, v)| v)
    }
    pub fn relay_peer(&self, addr: &SocketAddr) -> Option<String> {
        self.relay_peers.get(addr).map(|v| v.value().clone())
    }
}

#[async_trait]
impl Bind for DefaultBind {
    fn open(&self, port: u16) -> io::Result<(Vec<Box<dyn ReceiveFunc>>, u16)> {
        self.close()?;
        let (v4, v6, port) = self.sockets.open(port)?;
        let closed = ShutdownManager::new();
        let mut funcs: Vec<Box<dyn ReceiveFunc>> = Vec::with_capacity(4);
        funcs.push(Box::new(direct::DirectReceiver::new(
            v4,
            self.demux.clone(),
            closed.clone(),
        )));
        if let Some(v6) = v6 {
            funcs.push(Box::new(direct::DirectReceiver::new(
                v6,
                self.demux.clone(),
                closed.clone(),
            )));
        }
        if let Some(info) = self.relay.as_ref().and_then(|r| r.relay_info()) {
            funcs.push(Box::new(relay::RelayReceiver::new(
                info.relay_conn,
                self.local_key.clone(),
                self.relay_peers.clone(),
                closed.clone(),
            )));
        }
        if let (Some(receiver), Some(server)) = (self.drp_receiver.as_ref(), self.drp_server) {
            funcs.push(Box::new(drp::DrpReceiver::new(
                receiver.clone(),
                server,
                closed.clone(),
            )));
        }
        *self.closed.lock() = Some(closed);
        log::info!("bind open port={port},receivers={}", funcs.len());
        Ok((funcs, port))
    }

    async fn send(&self, bufs: &[&[u8]], endpoint: &Endpoint) -> io::Result<()> {
        match endpoint {
            Endpoint::Direct { addr } => {
                for buf in bufs {
                    self.sockets.send_to(buf, *addr).await?;
                }
            }
            Endpoint::Relay { addr, .. } => {
                let info = self
                    .relay
                    .as_ref()
                    .and_then(|r| r.relay_info())
                    .ok_or(Error::RelayUnavailable)?;
                for buf in bufs {
                    info.relay_conn.send_to(buf, *addr).await?;
                }
            }
            Endpoint::Drp { to, .. } => {
                let client = self.drp.as_ref().ok_or(Error::NotOpen)?;
                for buf in bufs {
                    client.send_to(to, MsgType::DrpData, buf).await?;
                }
            }
        }
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        if let Some(closed) = self.closed.lock().take() {
            _ = closed.trigger_shutdown(());
        }
        self.sockets.close();
        Ok(())
    }

    fn parse_endpoint(&self, s: &str) -> io::Result<Endpoint> {
        let mut endpoint: Endpoint = s.parse()?;
        match &mut endpoint {
            Endpoint::Relay { from, .. } | Endpoint::Drp { from, .. } => {
                from.clone_from(&self.local_key);
            }
            Endpoint::Direct { .. } => {}
        }
        Ok(endpoint)
    }
}

impl Drop for DefaultBind {
    fn drop(&mut self) {
        _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use tokio::net::UdpSocket;

    use super::*;
    use crate::agent::{Candidate, CheckKind, CheckPacket, UdpAgent};
    use crate::device::RelayInfo;

    fn bufs() -> (Vec<Vec<u8>>, Vec<usize>, Vec<Endpoint>) {
        (vec![vec![0u8; 2048]; 8], vec![0; 8], Vec::new())
    }

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_direct_send_recv() {
        let a = DefaultBind::new("a", CheckDemux::new());
        let b = DefaultBind::new("b", CheckDemux::new());
        let (_a_funcs, a_port) = a.open(0).unwrap();
        let (b_funcs, b_port) = b.open(0).unwrap();
        assert_ne!(b_port, 0);

        let endpoint = a.parse_endpoint(&loopback(b_port).to_string()).unwrap();
        a.send(&[&b"hello"[..], &b"world"[..]], &endpoint).await.unwrap();

        let (mut bufs, mut sizes, mut eps) = bufs();
        let mut received = Vec::new();
        while received.len() < 2 {
            let n = b_funcs[0].recv(&mut bufs, &mut sizes, &mut eps).await.unwrap();
            for i in 0..n {
                received.push(bufs[i][..sizes[i]].to_vec());
                assert_eq!(eps[i], Endpoint::Direct { addr: loopback(a_port) });
            }
        }
        assert_eq!(received, vec![b"hello".to_vec(), b"world".to_vec()]);
    }

    #[tokio::test]
    async fn test_check_packets_are_intercepted() {
        let demux = CheckDemux::new();
        let (inbox, mut checks) = tokio::sync::mpsc::channel(4);
        let b = DefaultBind::new("b", demux.clone());
        let (b_funcs, b_port) = b.open(0).unwrap();
        assert!(demux.register("ufrag-b", inbox));

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = BytesMut::new();
        CheckPacket {
            kind: CheckKind::Request,
            nominate: false,
            txn: 1,
            ufrag: "ufrag-b".into(),
            pwd: "pwd".into(),
        }
        .encode(&mut buf);
        socket.send_to(&buf, loopback(b_port)).await.unwrap();
        socket.send_to(b"data", loopback(b_port)).await.unwrap();

        let (mut bufs, mut sizes, mut eps) = bufs();
        let n = b_funcs[0].recv(&mut bufs, &mut sizes, &mut eps).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(&bufs[0][..sizes[0]], b"data");
        let (packet, _) = checks.recv().await.unwrap();
        assert_eq!(packet.txn, 1);
    }

    #[tokio::test]
    async fn test_drp_send_rejects_oversize() {
        let server: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let config = crate::config::MeshConfig::new("a").set_drp_server(server);
        let (client, _proxy, data) = crate::drp::channel(&config).unwrap();
        let bind = DefaultBind::new("a", CheckDemux::new()).set_drp(client, data, server);
        let endpoint = bind.parse_endpoint("drp:to=b//127.0.0.1:1").unwrap();
        let big = vec![0u8; meshlink_core::protocol::MAX_BODY_LEN + 1];
        let err = bind.send(&[&big[..]], &endpoint).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        bind.send(&[&b"small"[..]], &endpoint).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_fails_receivers() {
        let bind = DefaultBind::new("a", CheckDemux::new());
        let (funcs, _) = bind.open(0).unwrap();
        let func = &funcs[0];
        let (mut bufs, mut sizes, mut eps) = bufs();
        let pending = func.recv(&mut bufs, &mut sizes, &mut eps);
        bind.close().unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        let err = bind
            .send(&[&b"x"[..]], &Endpoint::Direct { addr: loopback(9) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_relay_path() {
        let a_conn = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b_conn = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let a_relay = a_conn.local_addr().unwrap();
        let b_relay = b_conn.local_addr().unwrap();
        let a = DefaultBind::new("a", CheckDemux::new()).set_relay(Arc::new(RelayInfo {
            mapped_addr: a_relay,
            relay_addr: a_relay,
            relay_conn: a_conn,
        }));
        let b = DefaultBind::new("b", CheckDemux::new()).set_relay(Arc::new(RelayInfo {
            mapped_addr: b_relay,
            relay_addr: b_relay,
            relay_conn: b_conn,
        }));
        a.open(0).unwrap();
        let (mut b_funcs, _) = b.open(0).unwrap();
        b.add_relay_peer(a_relay, "a");
        let relay_func = b_funcs.pop().unwrap();

        let endpoint = a.parse_endpoint(&format!("relay:to=b//{b_relay}")).unwrap();
        assert_eq!(endpoint.from(), "a");
        a.send(&[&b"over relay"[..]], &endpoint).await.unwrap();

        let (mut bufs, mut sizes, mut eps) = bufs();
        let n = relay_func.recv(&mut bufs, &mut sizes, &mut eps).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(&bufs[0][..sizes[0]], b"over relay");
        assert_eq!(
            eps[0],
            Endpoint::Relay {
                from: "a".into(),
                to: "b".into(),
                addr: a_relay,
            }
        );
    }

    async fn pump(func: Box<dyn ReceiveFunc>) {
        let (mut bufs, mut sizes, mut eps) = bufs();
        while func.recv(&mut bufs, &mut sizes, &mut eps).await.is_ok() {}
    }

    #[tokio::test]
    async fn test_agents_over_binds() {
        let a_demux = CheckDemux::new();
        let b_demux = CheckDemux::new();
        let a = DefaultBind::new("a", a_demux.clone());
        let b = DefaultBind::new("b", b_demux.clone());
        let (a_funcs, a_port) = a.open(0).unwrap();
        let (b_funcs, b_port) = b.open(0).unwrap();
        for func in a_funcs.into_iter().chain(b_funcs) {
            tokio::spawn(pump(func));
        }
        let interval = Duration::from_millis(50);
        let timeout = Duration::from_secs(5);
        let a_agent = UdpAgent::new(a.direct_sockets(), a_demux, interval, timeout);
        let b_agent = UdpAgent::new(b.direct_sockets(), b_demux, interval, timeout);
        let a_candidates = vec![Candidate::host(loopback(a_port))];
        let b_candidates = vec![Candidate::host(loopback(b_port))];

        let (dialed, accepted) = tokio::join!(
            a_agent.dial(b_agent.credentials(), &b_candidates),
            b_agent.accept(a_agent.credentials(), &a_candidates),
        );
        assert_eq!(dialed.unwrap(), loopback(b_port));
        assert_eq!(accepted.unwrap(), loopback(a_port));
    }

    #[tokio::test]
    async fn test_agent_timeout() {
        let demux = CheckDemux::new();
        let a = DefaultBind::new("a", demux.clone());
        a.open(0).unwrap();
        let agent = UdpAgent::new(
            a.direct_sockets(),
            demux,
            Duration::from_millis(20),
            Duration::from_millis(200),
        );
        let remote = crate::agent::Credentials::random();
        let rs = agent
            .dial(&remote, &[Candidate::host(loopback(9))])
            .await;
        assert!(matches!(rs, Err(Error::CheckTimeout)));
    }
}
