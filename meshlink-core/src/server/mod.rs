//! DRP relay server.
//!
//! Every client keeps one stream open. The server maps the public key a client
//! registered to the outbound queue of its stream and re-queues each frame it
//! receives onto the queue of `msg.to`.
//!
//! Frames from one connection pass through a forwarding lane per destination,
//! so a destination that stops reading only backs up its own lane. Once that
//! lane is full, further frames for it are dropped.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_shutdown::ShutdownManager;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::error::{Error, Result};
use crate::pool::{Block, MessagePool};
use crate::protocol::codec::{FramedRead, FramedWrite};
use crate::protocol::{DrpMessage, MsgType};
use crate::socket::create_tcp_listener;

pub use table::{ClientQueue, ClientTable};

mod table;

/// Upper bound of frames coalesced into one write.
const WRITE_BATCH: usize = 16;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub queue_cap: usize,
    pub pool_cap: usize,
    pub buf_cap: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 6266)),
            queue_cap: 1024,
            pool_cap: 1024,
            buf_cap: 2048,
        }
    }
}

impl ServerConfig {
    pub fn set_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }
    pub fn set_queue_cap(mut self, queue_cap: usize) -> Self {
        self.queue_cap = queue_cap;
        self
    }
    pub fn set_pool_cap(mut self, pool_cap: usize) -> Self {
        self.pool_cap = pool_cap;
        self
    }
    pub fn set_buf_cap(mut self, buf_cap: usize) -> Self {
        self.buf_cap = buf_cap;
        self
    }
    fn check(&self) -> io::Result<()> {
        if self.queue_cap == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "queue_cap cannot be 0",
            ));
        }
        Ok(())
    }
}

pub struct DrpServer {
    listener: TcpListener,
    table: ClientTable,
    pool: MessagePool,
    queue_cap: usize,
    conn_seq: AtomicU64,
    shutdown_manager: ShutdownManager<()>,
}

impl DrpServer {
    pub fn bind(config: ServerConfig) -> io::Result<DrpServer> {
        config.check()?;
        let listener = create_tcp_listener(config.listen)?;
        Ok(Self {
            listener,
            table: ClientTable::new(),
            pool: MessagePool::new(config.pool_cap, config.buf_cap),
            queue_cap: config.queue_cap,
            conn_seq: AtomicU64::new(1),
            shutdown_manager: ShutdownManager::new(),
        })
    }
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
    pub fn client_table(&self) -> ClientTable {
        self.table.clone()
    }
    /// Triggering the returned manager stops the accept loop and every connection.
    pub fn shutdown_manager(&self) -> ShutdownManager<()> {
        self.shutdown_manager.clone()
    }
    pub async fn serve(self) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        log::info!("drp server listen {local_addr}");
        loop {
            let Ok(rs) = self
                .shutdown_manager
                .wrap_cancel(self.listener.accept())
                .await
            else {
                log::info!("drp server {local_addr} shutdown");
                return Ok(());
            };
            let (stream, addr) = match rs {
                Ok(rs) => rs,
                Err(e) => {
                    log::warn!("accept e={e:?}");
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                log::warn!("set_nodelay e={e:?},addr={addr}");
            }
            let conn_id = self.conn_seq.fetch_add(1, Ordering::Relaxed);
            let fut = self.shutdown_manager.wrap_cancel(handle_conn(
                stream,
                addr,
                conn_id,
                self.table.clone(),
                self.pool.clone(),
                self.queue_cap,
            ));
            tokio::spawn(async move {
                if fut.await.is_err() {
                    log::debug!("connection {conn_id} closed by shutdown");
                }
            });
        }
    }
}

impl Drop for DrpServer {
    fn drop(&mut self) {
        _ = self.shutdown_manager.trigger_shutdown(());
    }
}

async fn handle_conn(
    stream: TcpStream,
    addr: SocketAddr,
    conn_id: u64,
    table: ClientTable,
    pool: MessagePool,
    queue_cap: usize,
) {
    let (read, write) = stream.into_split();
    let (sender, receiver) = tokio::sync::mpsc::channel(queue_cap);
    let mut registered: Option<String> = None;
    let mut lanes = Lanes::new(table.clone(), queue_cap);
    let rs = tokio::select! {
        rs = send_pump(write, receiver) => rs,
        rs = recv_pump(read, addr, conn_id, &table, &pool, &sender, &mut lanes, &mut registered) => rs,
    };
    match rs {
        Ok(()) | Err(Error::Eof) => log::debug!("connection closed addr={addr},conn={conn_id}"),
        Err(e) => log::warn!("connection error addr={addr},conn={conn_id},e={e:?}"),
    }
    if let Some(key) = registered {
        if table.unregister(&key, conn_id) {
            log::info!("unregister key={key},addr={addr}");
        }
    }
}

async fn send_pump(write: OwnedWriteHalf, mut receiver: Receiver<Block<DrpMessage>>) -> Result<()> {
    let mut framed = FramedWrite::new(write);
    while let Some(msg) = receiver.recv().await {
        framed.encode(&msg)?;
        drop(msg);
        let mut count = 1;
        while count < WRITE_BATCH {
            let Ok(msg) = receiver.try_recv() else {
                break;
            };
            framed.encode(&msg)?;
            count += 1;
        }
        framed.flush().await?;
    }
    Ok(())
}

/// Forwarding lanes of one connection, keyed by destination.
struct Lanes {
    table: ClientTable,
    cap: usize,
    lanes: HashMap<String, Sender<Block<DrpMessage>>>,
}

impl Lanes {
    fn new(table: ClientTable, cap: usize) -> Self {
        Self {
            table,
            cap,
            lanes: HashMap::new(),
        }
    }
    /// Hand `msg` to the lane of `msg.to` without waiting.
    fn forward(&mut self, msg: Block<DrpMessage>) -> Result<()> {
        if !self.table.contains(&msg.to) {
            log::debug!(
                "drop message type={:?},from={},to={}: not registered",
                msg.msg_type,
                msg.from,
                msg.to
            );
            return Err(Error::NotRegistered(msg.to.clone()));
        }
        let table = &self.table;
        let cap = self.cap;
        let lane = self.lanes.entry(msg.to.clone()).or_insert_with(|| {
            let (sender, receiver) = tokio::sync::mpsc::channel(cap);
            tokio::spawn(lane_pump(table.clone(), receiver));
            sender
        });
        match lane.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => Err(Error::QueueFull(msg.to.clone())),
            Err(TrySendError::Closed(msg)) => {
                self.lanes.remove(&msg.to);
                Err(Error::NotRegistered(msg.to.clone()))
            }
        }
    }
}

async fn lane_pump(table: ClientTable, mut receiver: Receiver<Block<DrpMessage>>) {
    while let Some(msg) = receiver.recv().await {
        if let Err(e) = table.forward(msg).await {
            log::debug!("forward e={e:?}");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn recv_pump(
    read: OwnedReadHalf,
    addr: SocketAddr,
    conn_id: u64,
    table: &ClientTable,
    pool: &MessagePool,
    sender: &ClientQueue,
    lanes: &mut Lanes,
    registered: &mut Option<String>,
) -> Result<()> {
    let mut framed = FramedRead::new(read);
    loop {
        let mut msg = pool.alloc();
        match framed.read_message(&mut msg).await {
            Ok(()) => {}
            Err(Error::InvalidMsgType(v)) => {
                log::warn!("invalid msg type {v},addr={addr}");
                continue;
            }
            Err(e) => return Err(e),
        }
        match msg.msg_type {
            MsgType::Register => {
                if let Some(old) = registered.as_ref() {
                    if old != &msg.from {
                        table.unregister(old, conn_id);
                    }
                }
                if table.register(&msg.from, conn_id, sender.clone()) {
                    log::info!("register key={},addr={addr}", msg.from);
                }
                *registered = Some(msg.from.clone());
            }
            MsgType::HeartBeat => {
                if let Some(key) = registered.as_ref() {
                    table.touch(key);
                }
            }
            _ => {
                let Some(key) = registered.as_ref() else {
                    log::warn!("message before register,addr={addr},type={:?}", msg.msg_type);
                    continue;
                };
                if &msg.from != key {
                    log::warn!("drop message with from={},registered={key}", msg.from);
                    continue;
                }
                match lanes.forward(msg) {
                    Ok(()) | Err(Error::NotRegistered(_)) => {}
                    Err(e) => log::debug!("forward e={e:?},addr={addr}"),
                }
            }
        }
    }
}
