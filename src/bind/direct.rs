use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_shutdown::ShutdownManager;
use async_trait::async_trait;
use meshlink_core::socket::bind_udp;
use parking_lot::RwLock;
use tokio::net::UdpSocket;

use crate::agent::CheckDemux;
use crate::bind::{not_connected, ReceiveFunc};
use crate::endpoint::Endpoint;

/// The v4 and v6 sockets shared by the data plane and the check agents.
#[derive(Default)]
pub struct DirectSockets {
    inner: RwLock<Option<Opened>>,
}

struct Opened {
    v4: Arc<UdpSocket>,
    v6: Option<Arc<UdpSocket>>,
    port: u16,
}

type OpenedSockets = (Arc<UdpSocket>, Option<Arc<UdpSocket>>, u16);

impl DirectSockets {
    /// Binds `0.0.0.0:port` and best-effort `[::]` on the same port.
    pub(crate) fn open(&self, port: u16) -> io::Result<OpenedSockets> {
        let v4 = Arc::new(bind_udp(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?);
        let port = v4.local_addr()?.port();
        let v6 = match bind_udp(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))) {
            Ok(socket) => Some(Arc::new(socket)),
            Err(e) => {
                log::warn!("bind v6 e={e:?},port={port}");
                None
            }
        };
        *self.inner.write() = Some(Opened {
            v4: v4.clone(),
            v6: v6.clone(),
            port,
        });
        Ok((v4, v6, port))
    }
    pub(crate) fn close(&self) {
        self.inner.write().take();
    }
    pub fn is_open(&self) -> bool {
        self.inner.read().is_some()
    }
    pub fn port(&self) -> Option<u16> {
        self.inner.read().as_ref().map(|v| v.port)
    }
    /// Ports of the v4 and v6 sockets that are currently open.
    pub fn ports(&self) -> (Option<u16>, Option<u16>) {
        let guard = self.inner.read();
        match guard.as_ref() {
            Some(opened) => (
                Some(opened.port),
                opened.v6.as_ref().map(|_| opened.port),
            ),
            None => (None, None),
        }
    }
    fn socket(&self, addr: &SocketAddr) -> io::Result<Arc<UdpSocket>> {
        let guard = self.inner.read();
        let opened = guard.as_ref().ok_or_else(not_connected)?;
        if addr.is_ipv4() {
            Ok(opened.v4.clone())
        } else {
            opened.v6.clone().ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no ipv6 socket")
            })
        }
    }
    pub async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let socket = self.socket(&addr)?;
        socket.send_to(buf, addr).await
    }
}

/// Reads one direct socket. Check packets go to the demux and are never
/// returned to the caller.
pub(crate) struct DirectReceiver {
    socket: Arc<UdpSocket>,
    demux: CheckDemux,
    closed: ShutdownManager<()>,
}

impl DirectReceiver {
    pub(crate) fn new(socket: Arc<UdpSocket>, demux: CheckDemux, closed: ShutdownManager<()>) -> Self {
        Self {
            socket,
            demux,
            closed,
        }
    }
}

#[async_trait]
impl ReceiveFunc for DirectReceiver {
    async fn recv(
        &self,
        bufs: &mut [Vec<u8>],
        sizes: &mut [usize],
        eps: &mut Vec<Endpoint>,
    ) -> io::Result<usize> {
        eps.clear();
        if bufs.is_empty() || self.closed.is_shutdown_triggered() {
            return Err(not_connected());
        }
        loop {
            let (len, addr) = self
                .closed
                .wrap_cancel(self.socket.recv_from(&mut bufs[0]))
                .await
                .map_err(|_| not_connected())??;
            if self.demux.intercept(&bufs[0][..len], addr) {
                continue;
            }
            sizes[0] = len;
            eps.push(Endpoint::Direct { addr });
            break;
        }
        let mut n = 1;
        while n < bufs.len() {
            match self.socket.try_recv_from(&mut bufs[n]) {
                Ok((len, addr)) => {
                    if self.demux.intercept(&bufs[n][..len], addr) {
                        continue;
                    }
                    sizes[n] = len;
                    eps.push(Endpoint::Direct { addr });
                    n += 1;
                }
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        log::debug!("try_recv_from e={e:?}");
                    }
                    break;
                }
            }
        }
        Ok(n)
    }
}
