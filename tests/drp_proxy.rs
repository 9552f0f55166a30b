use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshlink::config::MeshConfig;
use meshlink::drp::{self, DrpClient, DrpDataReceiver, SignalHandler};
use meshlink::error::Result;
use meshlink_core::pool::Block;
use meshlink_core::protocol::{DrpMessage, MsgType};
use meshlink_core::server::{DrpServer, ServerConfig};
use tokio::sync::mpsc::{Receiver, Sender};

mod common;

use common::*;

struct ForwardHandler {
    sender: Sender<(String, MsgType, Vec<u8>)>,
}

#[async_trait]
impl SignalHandler for ForwardHandler {
    async fn handle(&self, msg: Block<DrpMessage>) -> Result<()> {
        _ = self
            .sender
            .send((msg.from.clone(), msg.msg_type, msg.body.clone()))
            .await;
        Ok(())
    }
}

fn config(key: &str, server: SocketAddr) -> MeshConfig {
    MeshConfig::new(key)
        .set_drp_server(server)
        .set_heartbeat_interval(Duration::from_millis(200))
        .set_reconnect_delay(Duration::from_millis(100))
}

fn start_proxy(
    key: &str,
    server: SocketAddr,
) -> (
    DrpClient,
    DrpDataReceiver,
    Receiver<(String, MsgType, Vec<u8>)>,
) {
    let (client, proxy, data) = drp::channel(&config(key, server)).unwrap();
    let (sender, signals) = tokio::sync::mpsc::channel(16);
    tokio::spawn(proxy.run(Arc::new(ForwardHandler { sender })));
    (client, data, signals)
}

#[tokio::test]
async fn signaling_and_data_are_split() {
    init_logger();
    let (server, table) = start_server().await;
    let (a, _a_data, _a_signals) = start_proxy("a", server);
    let (_b, mut b_data, mut b_signals) = start_proxy("b", server);
    wait_until("registration", || table.contains("a") && table.contains("b")).await;

    a.send_to("b", MsgType::DrpOffer, b"{\"node\":{}}").await.unwrap();
    a.send_to("b", MsgType::DrpData, b"payload").await.unwrap();

    let (from, msg_type, body) = within(b_signals.recv()).await.unwrap();
    assert_eq!(from, "a");
    assert_eq!(msg_type, MsgType::DrpOffer);
    assert_eq!(body, b"{\"node\":{}}");

    let data = within(b_data.recv()).await.unwrap();
    assert_eq!(data.from, "a");
    assert_eq!(data.to, "b");
    assert_eq!(data.body, b"payload");
    assert!(b_signals.try_recv().is_err());
}

#[tokio::test]
async fn heartbeats_keep_the_client_fresh() {
    init_logger();
    let (server, table) = start_server().await;
    let (_a, _data, _signals) = start_proxy("a", server);
    wait_until("registration", || table.contains("a")).await;
    let first = table.last_seen("a").unwrap();
    wait_until("heartbeat", || table.last_seen("a").unwrap() > first).await;
}

#[tokio::test]
async fn reconnects_until_server_is_up() {
    init_logger();
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let (a, _data, _signals) = start_proxy("a", addr);
    let (b, _b_data, mut b_signals) = start_proxy("b", addr);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let server = DrpServer::bind(ServerConfig::default().set_listen(addr)).unwrap();
    let table = server.client_table();
    tokio::spawn(server.serve());
    wait_until("registration", || table.contains("a") && table.contains("b")).await;

    a.send_to("b", MsgType::RelayOffer, b"{}").await.unwrap();
    let (from, msg_type, _) = within(b_signals.recv()).await.unwrap();
    assert_eq!(from, "a");
    assert_eq!(msg_type, MsgType::RelayOffer);
    drop(b);
}
