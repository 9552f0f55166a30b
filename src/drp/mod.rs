//! Client side of the DRP relay.
//!
//! [`channel`] splits the relay connection into three parts:
//!
//! - [`DrpClient`], a cloneable handle that enqueues outbound messages
//! - [`DrpProxy`], which owns the TCP stream and reconnects it
//! - [`DrpDataReceiver`], the bounded queue of tunnel payloads for the bind

use std::sync::Arc;

use async_trait::async_trait;
use meshlink_core::error::Error as ProtocolError;
use meshlink_core::pool::{Block, MessagePool};
use meshlink_core::protocol::{DrpMessage, MsgType, MAX_BODY_LEN, MAX_KEY_LEN};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::config::MeshConfig;
use crate::error::{Error, Result};

pub use proxy::DrpProxy;

mod proxy;

/// Consumer of inbound signaling messages.
#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn handle(&self, msg: Block<DrpMessage>) -> Result<()>;
}

pub fn channel(config: &MeshConfig) -> Result<(DrpClient, DrpProxy, DrpDataReceiver)> {
    let server = config
        .drp_server
        .ok_or_else(|| Error::InvalidArgument("drp_server is required".into()))?;
    let pool = MessagePool::new(config.message_pool_cap, config.message_buf_cap);
    let (sender, receiver) = tokio::sync::mpsc::channel(config.outbound_queue_cap);
    let (data_sender, data_receiver) = tokio::sync::mpsc::channel(config.inbound_queue_cap);
    let local_key: Arc<str> = Arc::from(config.local_key.as_str());
    let client = DrpClient {
        local_key: local_key.clone(),
        sender: sender.clone(),
        pool: pool.clone(),
    };
    let proxy = DrpProxy::new(
        server,
        local_key,
        sender,
        receiver,
        data_sender,
        pool,
        config.heartbeat_interval,
        config.reconnect_delay,
    );
    Ok((client, proxy, DrpDataReceiver {
        receiver: data_receiver,
    }))
}

#[derive(Clone)]
pub struct DrpClient {
    local_key: Arc<str>,
    sender: Sender<Block<DrpMessage>>,
    pool: MessagePool,
}

impl DrpClient {
    pub fn local_key(&self) -> &str {
        &self.local_key
    }
    pub fn alloc(&self) -> Block<DrpMessage> {
        self.pool.alloc()
    }
    /// Waits while the outbound queue is full. Messages too large to frame
    /// are rejected.
    pub async fn send(&self, msg: Block<DrpMessage>) -> Result<()> {
        if msg.body.len() > MAX_BODY_LEN {
            return Err(ProtocolError::FrameTooLong {
                len: msg.body.len(),
                limit: MAX_BODY_LEN,
            }
            .into());
        }
        if msg.to.len() > MAX_KEY_LEN {
            return Err(ProtocolError::KeyTooLong(msg.to.len()).into());
        }
        self.sender.send(msg).await.map_err(|_| Error::ChannelClosed)
    }
    pub async fn send_to(&self, to: &str, msg_type: MsgType, body: &[u8]) -> Result<()> {
        let mut msg = self.alloc();
        msg.fill(&self.local_key, to, msg_type, body);
        self.send(msg).await
    }
}

/// Tunnel payloads received from the relay.
pub struct DrpDataReceiver {
    receiver: Receiver<Block<DrpMessage>>,
}

impl DrpDataReceiver {
    pub async fn recv(&mut self) -> Option<Block<DrpMessage>> {
        self.receiver.recv().await
    }
    pub fn try_recv(&mut self) -> std::result::Result<Block<DrpMessage>, TryRecvError> {
        self.receiver.try_recv()
    }
}
