use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::Sender;

use crate::agent::packet::{is_check_packet, CheckPacket};

pub(crate) type Inbound = (CheckPacket, SocketAddr);

/// Routes check packets read by the bind to the agent owning the local ufrag.
#[derive(Clone, Default)]
pub struct CheckDemux {
    inboxes: Arc<DashMap<String, Sender<Inbound>>>,
}

impl CheckDemux {
    pub fn new() -> Self {
        Self::default()
    }
    pub(crate) fn register(&self, ufrag: &str, inbox: Sender<Inbound>) -> bool {
        if self.inboxes.contains_key(ufrag) {
            return false;
        }
        self.inboxes.insert(ufrag.to_string(), inbox);
        true
    }
    pub fn remove(&self, ufrag: &str) {
        self.inboxes.remove(ufrag);
    }
    pub fn len(&self) -> usize {
        self.inboxes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }
    /// Returns true when `buf` is a check packet. Such packets are consumed
    /// here whether or not an agent claims them.
    pub fn intercept(&self, buf: &[u8], src: SocketAddr) -> bool {
        if !is_check_packet(buf) {
            return false;
        }
        let packet = match CheckPacket::decode(buf) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("bad check packet e={e:?},src={src}");
                return true;
            }
        };
        let Some(inbox) = self.inboxes.get(&packet.ufrag).map(|v| v.value().clone()) else {
            log::debug!("no agent for ufrag={},src={src}", packet.ufrag);
            return true;
        };
        if let Err(e) = inbox.try_send((packet, src)) {
            log::debug!("agent inbox e={e:?},src={src}");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::agent::packet::CheckKind;

    #[tokio::test]
    async fn test_route_by_ufrag() {
        let demux = CheckDemux::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        assert!(demux.register("local", tx.clone()));
        assert!(!demux.register("local", tx));
        let src: SocketAddr = "127.0.0.1:1000".parse().unwrap();

        let mut buf = BytesMut::new();
        CheckPacket {
            kind: CheckKind::Response,
            nominate: false,
            txn: 7,
            ufrag: "local".into(),
            pwd: "pwd".into(),
        }
        .encode(&mut buf);
        assert!(demux.intercept(&buf, src));
        let (packet, from) = rx.recv().await.unwrap();
        assert_eq!(packet.txn, 7);
        assert_eq!(from, src);

        assert!(!demux.intercept(b"plain tunnel data", src));
        demux.remove("local");
        assert!(demux.intercept(&buf, src));
        assert!(rx.try_recv().is_err());
    }
}
