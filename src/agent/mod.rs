//! ICE-like connectivity checks over the bind's direct sockets.
//!
//! Both sides send requests to every remote candidate at a fixed interval and
//! answer the requests they receive. The controlling side picks the first
//! candidate that answers and nominates it; the controlled side settles on the
//! first nominated request.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_shutdown::ShutdownManager;
use bytes::BytesMut;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc::Receiver;

use crate::bind::DirectSockets;
use crate::error::{Error, Result};

pub use candidate::{Candidate, CandidateKind};
pub use demux::CheckDemux;
pub use packet::{CheckKind, CheckPacket};

mod candidate;
mod demux;
mod packet;

use demux::Inbound;

pub const UFRAG_LEN: usize = 16;
pub const PWD_LEN: usize = 32;
const INBOX_CAP: usize = 64;
const NOMINATE_REPEAT: usize = 3;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Credentials {
    pub ufrag: String,
    pub pwd: String,
}

impl Credentials {
    pub fn random() -> Self {
        Self {
            ufrag: random_string(UFRAG_LEN),
            pwd: random_string(PWD_LEN),
        }
    }
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub struct UdpAgent {
    credentials: Credentials,
    sockets: Arc<DirectSockets>,
    demux: CheckDemux,
    inbox: tokio::sync::Mutex<Receiver<Inbound>>,
    check_interval: Duration,
    check_timeout: Duration,
    shutdown: ShutdownManager<()>,
}

impl UdpAgent {
    pub(crate) fn new(
        sockets: Arc<DirectSockets>,
        demux: CheckDemux,
        check_interval: Duration,
        check_timeout: Duration,
    ) -> Arc<UdpAgent> {
        let (sender, receiver) = tokio::sync::mpsc::channel(INBOX_CAP);
        let credentials = loop {
            let credentials = Credentials::random();
            if demux.register(&credentials.ufrag, sender.clone()) {
                break credentials;
            }
        };
        Arc::new(Self {
            credentials,
            sockets,
            demux,
            inbox: tokio::sync::Mutex::new(receiver),
            check_interval,
            check_timeout,
            shutdown: ShutdownManager::new(),
        })
    }
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
    /// Host candidates on the bind's ports plus `mapped_addr` as server-reflexive.
    /// Without explicit `candidate_ips` the addresses of the local network cards are used.
    pub fn gather_candidates(
        &self,
        candidate_ips: Option<&[IpAddr]>,
        mapped_addr: Option<SocketAddr>,
    ) -> Vec<Candidate> {
        let ips = match candidate_ips {
            Some(ips) => ips.to_vec(),
            None => meshlink_core::socket::local_ips().unwrap_or_else(|e| {
                log::warn!("local_ips e={e:?}");
                Vec::new()
            }),
        };
        let (v4_port, v6_port) = self.sockets.ports();
        candidate::gather(&ips, v4_port, v6_port, mapped_addr)
    }
    /// Controlling side.
    pub async fn dial(&self, remote: &Credentials, candidates: &[Candidate]) -> Result<SocketAddr> {
        self.run_checks(remote, candidates, true).await
    }
    /// Controlled side.
    pub async fn accept(
        &self,
        remote: &Credentials,
        candidates: &[Candidate],
    ) -> Result<SocketAddr> {
        self.run_checks(remote, candidates, false).await
    }
    pub fn close(&self) {
        _ = self.shutdown.trigger_shutdown(());
        self.demux.remove(&self.credentials.ufrag);
    }
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_shutdown_triggered()
    }
    async fn run_checks(
        &self,
        remote: &Credentials,
        candidates: &[Candidate],
        controlling: bool,
    ) -> Result<SocketAddr> {
        match self
            .shutdown
            .wrap_cancel(self.check(remote, candidates, controlling))
            .await
        {
            Ok(rs) => rs,
            Err(_) => Err(Error::Shutdown),
        }
    }
    async fn check(
        &self,
        remote: &Credentials,
        candidates: &[Candidate],
        controlling: bool,
    ) -> Result<SocketAddr> {
        let mut inbox = self.inbox.lock().await;
        let deadline = tokio::time::sleep(self.check_timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(self.check_interval);
        let mut buf = BytesMut::with_capacity(128);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(Error::CheckTimeout);
                }
                _ = ticker.tick() => {
                    for candidate in candidates {
                        let txn = rand::random();
                        self.send_check(&mut buf, remote, CheckKind::Request, false, txn, candidate.addr)
                            .await;
                    }
                }
                inbound = inbox.recv() => {
                    let Some((packet, src)) = inbound else {
                        return Err(Error::Shutdown);
                    };
                    if packet.pwd != self.credentials.pwd {
                        log::debug!("check with wrong pwd,src={src}");
                        continue;
                    }
                    match packet.kind {
                        CheckKind::Request => {
                            self.send_check(&mut buf, remote, CheckKind::Response, packet.nominate, packet.txn, src)
                                .await;
                            if !controlling && packet.nominate {
                                log::debug!("nominated {src},ufrag={}", self.credentials.ufrag);
                                return Ok(src);
                            }
                        }
                        CheckKind::Response => {
                            if controlling {
                                for _ in 0..NOMINATE_REPEAT {
                                    let txn = rand::random();
                                    self.send_check(&mut buf, remote, CheckKind::Request, true, txn, src)
                                        .await;
                                }
                                log::debug!("selected {src},ufrag={}", self.credentials.ufrag);
                                return Ok(src);
                            }
                        }
                    }
                }
            }
        }
    }
    async fn send_check(
        &self,
        buf: &mut BytesMut,
        remote: &Credentials,
        kind: CheckKind,
        nominate: bool,
        txn: u64,
        dst: SocketAddr,
    ) {
        buf.clear();
        CheckPacket {
            kind,
            nominate,
            txn,
            ufrag: remote.ufrag.clone(),
            pwd: remote.pwd.clone(),
        }
        .encode(buf);
        if let Err(e) = self.sockets.send_to(buf, dst).await {
            log::debug!("send check e={e:?},dst={dst}");
        }
    }
}

impl Drop for UdpAgent {
    fn drop(&mut self) {
        self.close();
    }
}
