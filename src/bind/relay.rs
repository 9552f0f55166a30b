use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_shutdown::ShutdownManager;
use async_trait::async_trait;
use dashmap::DashMap;

use crate::bind::{not_connected, ReceiveFunc};
use crate::device::RelayConn;
use crate::endpoint::Endpoint;

/// Reads the TURN relay connection. The relay path carries one packet per call.
pub(crate) struct RelayReceiver {
    conn: Arc<dyn RelayConn>,
    local_key: String,
    peers: Arc<DashMap<SocketAddr, String>>,
    closed: ShutdownManager<()>,
}

impl RelayReceiver {
    pub(crate) fn new(
        conn: Arc<dyn RelayConn>,
        local_key: String,
        peers: Arc<DashMap<SocketAddr, String>>,
        closed: ShutdownManager<()>,
    ) -> Self {
        Self {
            conn,
            local_key,
            peers,
            closed,
        }
    }
}

#[async_trait]
impl ReceiveFunc for RelayReceiver {
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
                .wrap_cancel(self.conn.recv_from(&mut bufs[0]))
                .await
                .map_err(|_| not_connected())??;
            let Some(from) = self.peers.get(&addr).map(|v| v.value().clone()) else {
                log::debug!("relay packet from unknown peer {addr}");
                continue;
            };
            sizes[0] = len;
            eps.push(Endpoint::Relay {
                from,
                to: self.local_key.clone(),
                addr,
            });
            return Ok(1);
        }
    }
}
