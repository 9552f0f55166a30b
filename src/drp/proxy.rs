use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use meshlink_core::pool::{Block, MessagePool};
use meshlink_core::protocol::codec::{FramedRead, FramedWrite};
use meshlink_core::protocol::{DrpMessage, MsgType};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::drp::SignalHandler;
use crate::error::{Error, Result};

/// Upper bound of frames coalesced into one write.
const WRITE_BATCH: usize = 16;

/// Owner of the connection to the DRP server.
pub struct DrpProxy {
    server: SocketAddr,
    local_key: Arc<str>,
    heartbeat_sender: Sender<Block<DrpMessage>>,
    receiver: Receiver<Block<DrpMessage>>,
    data_sender: Sender<Block<DrpMessage>>,
    pool: MessagePool,
    heartbeat_interval: Duration,
    reconnect_delay: Duration,
}

impl DrpProxy {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        server: SocketAddr,
        local_key: Arc<str>,
        heartbeat_sender: Sender<Block<DrpMessage>>,
        receiver: Receiver<Block<DrpMessage>>,
        data_sender: Sender<Block<DrpMessage>>,
        pool: MessagePool,
        heartbeat_interval: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            server,
            local_key,
            heartbeat_sender,
            receiver,
            data_sender,
            pool,
            heartbeat_interval,
            reconnect_delay,
        }
    }
    pub fn server(&self) -> SocketAddr {
        self.server
    }
    #[cfg(test)]
    pub(crate) fn outbound(&mut self) -> &mut Receiver<Block<DrpMessage>> {
        &mut self.receiver
    }
    /// Connect, register and pump until the connection breaks, then reconnect
    /// after `reconnect_delay`. Runs until cancelled.
    pub async fn run(mut self, handler: Arc<dyn SignalHandler>) {
        loop {
            match self.connect(&handler).await {
                Err(Error::ChannelClosed) => {
                    log::info!("drp proxy stopped,server={}", self.server);
                    return;
                }
                Err(e) => {
                    log::warn!("drp connection e={e:?},server={}", self.server);
                }
                Ok(()) => {}
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }
    async fn connect(&mut self, handler: &Arc<dyn SignalHandler>) -> Result<()> {
        let stream = TcpStream::connect(self.server).await?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        let mut write = FramedWrite::new(write);
        {
            let mut register = self.pool.alloc();
            register.fill(&self.local_key, "", MsgType::Register, &[]);
            write.write_message(&register).await?;
        }
        log::info!("drp register key={},server={}", self.local_key, self.server);
        let read = FramedRead::new(read);
        tokio::select! {
            rs = outbound_pump(write, &mut self.receiver) => rs,
            rs = inbound_pump(read, &self.pool, &self.data_sender, handler) => rs,
            rs = heartbeat(&self.local_key, &self.pool, &self.heartbeat_sender, self.heartbeat_interval) => rs,
        }
    }
}

async fn outbound_pump(
    mut write: FramedWrite<OwnedWriteHalf>,
    receiver: &mut Receiver<Block<DrpMessage>>,
) -> Result<()> {
    loop {
        let Some(msg) = receiver.recv().await else {
            return Err(Error::ChannelClosed);
        };
        if let Err(e) = write.encode(&msg) {
            log::warn!("drop outbound e={e:?},to={}", msg.to);
        }
        drop(msg);
        let mut count = 1;
        while count < WRITE_BATCH {
            let Ok(msg) = receiver.try_recv() else {
                break;
            };
            if let Err(e) = write.encode(&msg) {
                log::warn!("drop outbound e={e:?},to={}", msg.to);
            }
            count += 1;
        }
        write.flush().await?;
    }
}

async fn inbound_pump(
    mut read: FramedRead<OwnedReadHalf>,
    pool: &MessagePool,
    data_sender: &Sender<Block<DrpMessage>>,
    handler: &Arc<dyn SignalHandler>,
) -> Result<()> {
    loop {
        let mut msg = pool.alloc();
        match read.read_message(&mut msg).await {
            Ok(()) => {}
            Err(meshlink_core::error::Error::InvalidMsgType(v)) => {
                log::warn!("invalid msg type {v}");
                continue;
            }
            Err(e) => return Err(e.into()),
        }
        match msg.msg_type {
            MsgType::HeartBeat => {}
            MsgType::DrpData => {
                if data_sender.send(msg).await.is_err() {
                    log::debug!("drp data receiver closed");
                }
            }
            MsgType::Register => {
                log::warn!("unexpected register from={}", msg.from);
            }
            _ => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let from = msg.from.clone();
                    let msg_type = msg.msg_type;
                    if let Err(e) = handler.handle(msg).await {
                        log::warn!("handle e={e:?},from={from},type={msg_type:?}");
                    }
                });
            }
        }
    }
}

async fn heartbeat(
    local_key: &str,
    pool: &MessagePool,
    sender: &Sender<Block<DrpMessage>>,
    interval: Duration,
) -> Result<()> {
    loop {
        tokio::time::sleep(interval).await;
        let mut msg = pool.alloc();
        msg.fill(local_key, "", MsgType::HeartBeat, &[]);
        sender.send(msg).await.map_err(|_| Error::ChannelClosed)?;
    }
}
