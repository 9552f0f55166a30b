#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use meshlink::bind::ReceiveFunc;
use meshlink::device::{Device, PeerConfig};
use meshlink::endpoint::Endpoint;
use meshlink_core::server::{ClientTable, DrpServer, ServerConfig};
use parking_lot::Mutex;
use tokio::sync::mpsc::Receiver;

pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(true)
        .try_init();
}

#[derive(Default)]
pub struct RecordingDevice {
    pub peers: Mutex<Vec<PeerConfig>>,
    pub routes: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
}

#[async_trait]
impl Device for RecordingDevice {
    async fn configure_peer(&self, peer: &PeerConfig) -> io::Result<()> {
        self.peers.lock().push(peer.clone());
        Ok(())
    }
    async fn remove_peer(&self, public_key: &str) -> io::Result<()> {
        self.removed.lock().push(public_key.to_string());
        Ok(())
    }
    async fn add_route(&self, allowed_ips: &[String]) -> io::Result<()> {
        self.routes.lock().extend_from_slice(allowed_ips);
        Ok(())
    }
}

pub async fn start_server() -> (SocketAddr, ClientTable) {
    let config = ServerConfig::default().set_listen("127.0.0.1:0".parse().unwrap());
    let server = DrpServer::bind(config).unwrap();
    let addr = server.local_addr().unwrap();
    let table = server.client_table();
    tokio::spawn(server.serve());
    (addr, table)
}

pub async fn wait_until<F: Fn() -> bool>(what: &str, f: F) {
    let rs = tokio::time::timeout(Duration::from_secs(10), async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(rs.is_ok(), "timed out waiting for {what}");
}

pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("timed out")
}

/// Run every receive function, forwarding what it reads.
pub fn spawn_receivers(funcs: Vec<Box<dyn ReceiveFunc>>) -> Receiver<(Vec<u8>, Endpoint)> {
    let (sender, receiver) = tokio::sync::mpsc::channel(64);
    for func in funcs {
        let sender = sender.clone();
        tokio::spawn(async move {
            let mut bufs = vec![vec![0u8; 2048]; 8];
            let mut sizes = vec![0; 8];
            let mut eps = Vec::new();
            while let Ok(n) = func.recv(&mut bufs, &mut sizes, &mut eps).await {
                for (i, ep) in eps.drain(..).enumerate().take(n) {
                    if sender.send((bufs[i][..sizes[i]].to_vec(), ep)).await.is_err() {
                        return;
                    }
                }
            }
        });
    }
    receiver
}
