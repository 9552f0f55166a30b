//! Per-peer connectivity state machine.
//!
//! ```text
//!   New --start/offer--> Checking --probe_success--> Connected
//!                           |
//!                           +------probe_failed----> Failed
//! ```
//!
//! Connected and Failed only end when the prober is cleared. Moving a peer to
//! another tier is an explicit [`ProbeManager::retry`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_shutdown::ShutdownManager;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::agent::{Candidate, CheckDemux, UdpAgent};
use crate::bind::DefaultBind;
use crate::config::{ConnectType, MeshConfig};
use crate::device::{Device, PeerConfig, RelayInfo, RelayInfoProvider};
use crate::drp::DrpClient;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::node::{Node, NodeRegistry};
use crate::offer::{is_controlling, DirectOffer, DrpOffer, Offer, OfferKind, OfferType, RelayOffer};

pub use checker::Checker;
pub use manager::ProbeManager;

mod checker;
mod manager;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Failed,
}

/// Everything a prober needs from the session it belongs to.
pub struct ProbeContext {
    pub(crate) config: MeshConfig,
    pub(crate) local_node: Node,
    pub(crate) drp: DrpClient,
    pub(crate) device: Arc<dyn Device>,
    pub(crate) bind: Arc<DefaultBind>,
    pub(crate) relay: Option<Arc<dyn RelayInfoProvider>>,
    pub(crate) demux: CheckDemux,
    pub(crate) nodes: NodeRegistry,
}

impl ProbeContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: MeshConfig,
        drp: DrpClient,
        device: Arc<dyn Device>,
        bind: Arc<DefaultBind>,
        relay: Option<Arc<dyn RelayInfoProvider>>,
        demux: CheckDemux,
        nodes: NodeRegistry,
    ) -> Self {
        let local_node = config.node();
        Self {
            config,
            local_node,
            drp,
            device,
            bind,
            relay,
            demux,
            nodes,
        }
    }
    fn relay_info(&self) -> Option<RelayInfo> {
        self.relay.as_ref().and_then(|r| r.relay_info())
    }
    fn local_key(&self) -> &str {
        &self.config.local_key
    }
}

struct ProberInner {
    state: ConnectionState,
    remote_tie_breaker: Option<u64>,
    active: Option<OfferKind>,
    endpoint: Option<Endpoint>,
    candidates: Vec<Candidate>,
}

pub struct Prober {
    remote_key: String,
    connect_type: ConnectType,
    tie_breaker: u64,
    ctx: Arc<ProbeContext>,
    agent: Option<Arc<UdpAgent>>,
    checkers: Vec<Checker>,
    inner: Mutex<ProberInner>,
    state_sender: watch::Sender<ConnectionState>,
    done: ShutdownManager<()>,
    closed: AtomicBool,
}

impl Prober {
    pub(crate) fn new(remote_key: &str, connect_type: ConnectType, ctx: Arc<ProbeContext>) -> Arc<Prober> {
        let mut checkers = Vec::with_capacity(3);
        let mut candidates = Vec::new();
        let agent = if connect_type == ConnectType::Direct {
            let agent = UdpAgent::new(
                ctx.bind.direct_sockets(),
                ctx.demux.clone(),
                ctx.config.check_interval,
                ctx.config.check_timeout,
            );
            candidates = agent.gather_candidates(
                ctx.config.candidate_ips.as_deref(),
                ctx.relay_info().map(|v| v.mapped_addr),
            );
            checkers.push(Checker::direct(agent.clone()));
            Some(agent)
        } else {
            None
        };
        checkers.push(Checker::relay());
        checkers.push(Checker::drp());
        let (state_sender, _) = watch::channel(ConnectionState::New);
        Arc::new(Self {
            remote_key: remote_key.to_string(),
            connect_type,
            tie_breaker: rand::random(),
            ctx,
            agent,
            checkers,
            inner: Mutex::new(ProberInner {
                state: ConnectionState::New,
                remote_tie_breaker: None,
                active: None,
                endpoint: None,
                candidates,
            }),
            state_sender,
            done: ShutdownManager::new(),
            closed: AtomicBool::new(false),
        })
    }
    pub fn remote_key(&self) -> &str {
        &self.remote_key
    }
    pub fn connect_type(&self) -> ConnectType {
        self.connect_type
    }
    pub fn tie_breaker(&self) -> u64 {
        self.tie_breaker
    }
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_sender.subscribe()
    }
    /// Kind of the checker driven most recently.
    pub fn active_kind(&self) -> Option<OfferKind> {
        self.inner.lock().active
    }
    /// The endpoint the tunnel peer was programmed with.
    pub fn endpoint(&self) -> Option<Endpoint> {
        let inner = self.inner.lock();
        if inner.state == ConnectionState::Connected {
            inner.endpoint.clone()
        } else {
            None
        }
    }
    /// `None` until a direct offer from the peer was seen.
    pub fn is_controlling(&self) -> Option<bool> {
        let remote = self.inner.lock().remote_tie_breaker?;
        Some(self.controlling_against(remote))
    }
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
    fn controlling_against(&self, remote_tie_breaker: u64) -> bool {
        is_controlling(
            self.tie_breaker,
            remote_tie_breaker,
            self.ctx.local_key(),
            &self.remote_key,
        )
    }
    fn set_state(inner: &mut ProberInner, sender: &watch::Sender<ConnectionState>, state: ConnectionState) {
        inner.state = state;
        sender.send_replace(state);
    }

    /// Send the configured offer kind. Connected probers do nothing and failed
    /// ones must be cleared first.
    pub async fn start(&self) -> Result<()> {
        let kind = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Failed => return Err(Error::ProbeFailed(self.remote_key.clone())),
                ConnectionState::New => {
                    Self::set_state(&mut inner, &self.state_sender, ConnectionState::Checking);
                    let kind = self.connect_type.offer_kind();
                    inner.active = Some(kind);
                    kind
                }
                ConnectionState::Checking => inner.active.unwrap_or(self.connect_type.offer_kind()),
            }
        };
        match self.send_offer(kind, false).await {
            Err(Error::RelayUnavailable) => Err(self.probe_failed(kind, Error::RelayUnavailable)),
            rs => rs,
        }
    }
    /// Reply to an initial offer with our own offer of the same kind.
    pub async fn answer(&self, kind: OfferKind) -> Result<()> {
        self.send_offer(kind, true).await
    }
    pub async fn handle_offer(self: &Arc<Self>, offer: Offer) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Connected {
                log::debug!("ignore {:?} offer,remote={} connected", offer.kind(), self.remote_key);
                return Ok(());
            }
            if let Offer::Direct(direct) = &offer {
                inner.remote_tie_breaker = Some(direct.local_key);
            }
        }
        self.probe_connect(offer).await
    }
    /// Drive the checker matching the offer's kind.
    pub async fn probe_connect(self: &Arc<Self>, offer: Offer) -> Result<()> {
        let kind = offer.kind();
        if self.is_closed() {
            return Err(Error::Shutdown);
        }
        let Some(checker) = self.checkers.iter().find(|c| c.kind() == kind) else {
            log::debug!(
                "ignore {kind:?} offer,remote={},connect_type={:?}",
                self.remote_key,
                self.connect_type
            );
            return Ok(());
        };
        {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Failed => return Err(Error::ProbeFailed(self.remote_key.clone())),
                ConnectionState::New => {
                    Self::set_state(&mut inner, &self.state_sender, ConnectionState::Checking);
                }
                ConnectionState::Checking => {}
            }
            inner.active = Some(kind);
        }
        checker.probe_connect(self, offer).await
    }
    /// Program the tunnel peer with `endpoint` and move to Connected.
    pub async fn probe_success(&self, endpoint: Endpoint) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if self.is_closed()
                || !matches!(inner.state, ConnectionState::New | ConnectionState::Checking)
                || inner.endpoint.is_some()
            {
                log::debug!("ignore success {endpoint},remote={},state={:?}", self.remote_key, inner.state);
                return Ok(());
            }
            inner.endpoint = Some(endpoint.clone());
        }
        if let Err(e) = self.program_device(&endpoint).await {
            self.inner.lock().endpoint = None;
            return Err(self.probe_failed(endpoint.kind(), e));
        }
        let mut inner = self.inner.lock();
        if matches!(inner.state, ConnectionState::New | ConnectionState::Checking) {
            Self::set_state(&mut inner, &self.state_sender, ConnectionState::Connected);
            log::info!("connected remote={},endpoint={endpoint}", self.remote_key);
        }
        Ok(())
    }
    async fn program_device(&self, endpoint: &Endpoint) -> Result<()> {
        let allowed_ips = self
            .ctx
            .nodes
            .get(&self.remote_key)
            .map(|node| node.allowed_ips)
            .unwrap_or_default();
        if let Endpoint::Relay { addr, .. } = endpoint {
            self.ctx.bind.add_relay_peer(*addr, &self.remote_key);
        }
        let peer = PeerConfig {
            public_key: self.remote_key.clone(),
            endpoint: endpoint.clone(),
            allowed_ips,
            persistent_keepalive: self.ctx.config.persistent_keepalive,
        };
        self.ctx.device.configure_peer(&peer).await?;
        self.ctx.device.add_route(&peer.allowed_ips).await?;
        Ok(())
    }
    /// Mark the prober failed. The returned error is what callers surface.
    pub fn probe_failed(&self, kind: OfferKind, err: Error) -> Error {
        log::warn!("probe failed kind={kind:?},remote={},e={err:?}", self.remote_key);
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Connected {
            Self::set_state(&mut inner, &self.state_sender, ConnectionState::Failed);
        }
        Error::CheckNetwork(self.remote_key.clone())
    }
    /// Stop running checks and release the agent. Safe to call repeatedly.
    pub fn clear(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        _ = self.done.trigger_shutdown(());
        if let Some(agent) = &self.agent {
            agent.close();
        }
        if let Some(Endpoint::Relay { addr, .. }) = &self.inner.lock().endpoint {
            self.ctx.bind.remove_relay_peer(addr);
        }
        log::debug!("prober cleared remote={}", self.remote_key);
    }
    pub(crate) fn done(&self) -> &ShutdownManager<()> {
        &self.done
    }

    async fn send_offer(&self, kind: OfferKind, is_answer: bool) -> Result<()> {
        let offer = self.build_offer(kind, is_answer)?;
        let body = offer.marshal()?;
        self.ctx
            .drp
            .send_to(&self.remote_key, kind.msg_type(is_answer), &body)
            .await?;
        log::debug!("send {kind:?} offer,answer={is_answer},remote={}", self.remote_key);
        Ok(())
    }
    fn build_offer(&self, kind: OfferKind, is_answer: bool) -> Result<Offer> {
        let node = self.ctx.local_node.clone();
        let offer = match kind {
            OfferKind::Direct => {
                let agent = self.agent.as_ref().ok_or(Error::OfferMismatch {
                    offer: OfferKind::Direct,
                    checker: self.connect_type.offer_kind(),
                })?;
                let mut candidates = self.inner.lock().candidates.clone();
                if candidates.is_empty() {
                    candidates = agent.gather_candidates(
                        self.ctx.config.candidate_ips.as_deref(),
                        self.ctx.relay_info().map(|v| v.mapped_addr),
                    );
                    self.inner.lock().candidates.clone_from(&candidates);
                }
                let credentials = agent.credentials();
                Offer::Direct(DirectOffer {
                    wg_port: self.ctx.bind.port().unwrap_or_default() as u32,
                    ufrag: credentials.ufrag.clone(),
                    pwd: credentials.pwd.clone(),
                    local_key: self.tie_breaker,
                    candidates,
                    node,
                })
            }
            OfferKind::Relay => {
                let info = self.ctx.relay_info().ok_or(Error::RelayUnavailable)?;
                Offer::Relay(RelayOffer {
                    node,
                    local_key: self.tie_breaker,
                    mapped_addr: info.mapped_addr,
                    relay_conn: info.relay_addr,
                    offer_type: if is_answer {
                        OfferType::Answer
                    } else {
                        OfferType::Offer
                    },
                })
            }
            OfferKind::Drp => Offer::Drp(DrpOffer { node }),
        };
        Ok(offer)
    }
}

impl Drop for Prober {
    fn drop(&mut self) {
        self.clear();
    }
}
