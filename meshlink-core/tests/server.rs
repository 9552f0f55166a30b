use std::net::SocketAddr;
use std::time::Duration;

use meshlink_core::protocol::codec::{FramedRead, FramedWrite};
use meshlink_core::protocol::{DrpMessage, MsgType};
use meshlink_core::server::{ClientTable, DrpServer, ServerConfig};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

type Client = (FramedRead<OwnedReadHalf>, FramedWrite<OwnedWriteHalf>);

async fn start_server() -> (SocketAddr, ClientTable) {
    start_server_with(ServerConfig::default()).await
}

async fn start_server_with(config: ServerConfig) -> (SocketAddr, ClientTable) {
    let config = config.set_listen("127.0.0.1:0".parse().unwrap());
    let server = DrpServer::bind(config).unwrap();
    let addr = server.local_addr().unwrap();
    let table = server.client_table();
    tokio::spawn(server.serve());
    (addr, table)
}

async fn connect(addr: SocketAddr, key: &str, table: &ClientTable) -> Client {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, write) = stream.into_split();
    let mut write = FramedWrite::new(write);
    write
        .write_message(&DrpMessage::new(key, "", MsgType::Register, &[]))
        .await
        .unwrap();
    wait_until(|| table.contains(key)).await;
    (FramedRead::new(read), write)
}

async fn wait_until<F: Fn() -> bool>(f: F) {
    for _ in 0..200 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

async fn recv(read: &mut FramedRead<OwnedReadHalf>) -> DrpMessage {
    let mut msg = DrpMessage::default();
    tokio::time::timeout(Duration::from_secs(3), read.read_message(&mut msg))
        .await
        .expect("recv timeout")
        .unwrap();
    msg
}

#[tokio::test]
async fn relay_between_registered_clients() {
    let (addr, table) = start_server().await;
    let (_a_read, mut a_write) = connect(addr, "A", &table).await;
    let (mut b_read, _b_write) = connect(addr, "B", &table).await;

    a_write
        .write_message(&DrpMessage::new("A", "", MsgType::HeartBeat, &[]))
        .await
        .unwrap();
    let offer = DrpMessage::new("A", "B", MsgType::DirectOffer, b"{}");
    a_write.write_message(&offer).await.unwrap();

    // the heartbeat is consumed by the relay, the offer is the first frame B sees
    let got = recv(&mut b_read).await;
    assert_eq!(got, offer);
}

#[tokio::test]
async fn drop_until_destination_registers() {
    let (addr, table) = start_server().await;
    let (_a_read, mut a_write) = connect(addr, "A", &table).await;

    let lost = DrpMessage::new("A", "C", MsgType::DrpOffer, b"lost");
    a_write.write_message(&lost).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (mut c_read, _c_write) = connect(addr, "C", &table).await;
    let delivered = DrpMessage::new("A", "C", MsgType::DrpOffer, b"delivered");
    a_write.write_message(&delivered).await.unwrap();
    let got = recv(&mut c_read).await;
    assert_eq!(got.body, b"delivered");
}

#[tokio::test]
async fn spoofed_sender_is_dropped() {
    let (addr, table) = start_server().await;
    let (_a_read, mut a_write) = connect(addr, "A", &table).await;
    let (mut b_read, _b_write) = connect(addr, "B", &table).await;

    a_write
        .write_message(&DrpMessage::new("Mallory", "B", MsgType::DrpData, b"x"))
        .await
        .unwrap();
    a_write
        .write_message(&DrpMessage::new("A", "B", MsgType::DrpData, b"y"))
        .await
        .unwrap();
    let got = recv(&mut b_read).await;
    assert_eq!(got.from, "A");
    assert_eq!(got.body, b"y");
}

#[tokio::test]
async fn unregister_on_disconnect() {
    let (addr, table) = start_server().await;
    let client = connect(addr, "A", &table).await;
    assert_eq!(table.len(), 1);
    drop(client);
    wait_until(|| !table.contains("A")).await;
}

#[tokio::test]
async fn stalled_destination_does_not_block_others() {
    let (addr, table) = start_server_with(ServerConfig::default().set_queue_cap(4)).await;
    let (_a_read, mut a_write) = connect(addr, "A", &table).await;
    // B registers and never reads
    let (_b_read, _b_write) = connect(addr, "B", &table).await;
    let (mut c_read, _c_write) = connect(addr, "C", &table).await;

    let body = vec![7u8; 60_000];
    for _ in 0..400 {
        a_write
            .write_message(&DrpMessage::new("A", "B", MsgType::DrpData, &body))
            .await
            .unwrap();
    }
    a_write
        .write_message(&DrpMessage::new("A", "C", MsgType::DrpData, b"through"))
        .await
        .unwrap();
    let got = recv(&mut c_read).await;
    assert_eq!(got.from, "A");
    assert_eq!(got.body, b"through");
    assert!(table.contains("B"));
}
