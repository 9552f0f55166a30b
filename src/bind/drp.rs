use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_shutdown::ShutdownManager;
use async_trait::async_trait;
use meshlink_core::pool::Block;
use meshlink_core::protocol::DrpMessage;

use crate::bind::{not_connected, ReceiveFunc};
use crate::drp::DrpDataReceiver;
use crate::endpoint::Endpoint;

/// Drains tunnel payloads the DRP proxy received.
pub(crate) struct DrpReceiver {
    receiver: Arc<tokio::sync::Mutex<DrpDataReceiver>>,
    server: SocketAddr,
    closed: ShutdownManager<()>,
}

impl DrpReceiver {
    pub(crate) fn new(
        receiver: Arc<tokio::sync::Mutex<DrpDataReceiver>>,
        server: SocketAddr,
        closed: ShutdownManager<()>,
    ) -> Self {
        Self {
            receiver,
            server,
            closed,
        }
    }
    fn fill(
        &self,
        msg: Block<DrpMessage>,
        buf: &mut [u8],
        size: &mut usize,
        eps: &mut Vec<Endpoint>,
    ) -> bool {
        let len = msg.body.len();
        if len > buf.len() {
            log::warn!("drp data too long {len},from={}", msg.from);
            return false;
        }
        buf[..len].copy_from_slice(&msg.body);
        *size = len;
        eps.push(Endpoint::Drp {
            from: msg.from.clone(),
            to: msg.to.clone(),
            addr: self.server,
        });
        true
    }
}

#[async_trait]
impl ReceiveFunc for DrpReceiver {
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
        let mut receiver = self
            .closed
            .wrap_cancel(self.receiver.lock())
            .await
            .map_err(|_| not_connected())?;
        let mut n = 0;
        while n == 0 {
            let msg = self
                .closed
                .wrap_cancel(receiver.recv())
                .await
                .map_err(|_| not_connected())?
                .ok_or_else(not_connected)?;
            if self.fill(msg, &mut bufs[0], &mut sizes[0], eps) {
                n = 1;
            }
        }
        while n < bufs.len() {
            let Ok(msg) = receiver.try_recv() else {
                break;
            };
            if self.fill(msg, &mut bufs[n], &mut sizes[n], eps) {
                n += 1;
            }
        }
        Ok(n)
    }
}
