use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::agent::UdpAgent;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::offer::{DirectOffer, Offer, OfferKind, RelayOffer};
use crate::probe::Prober;

/// Drives one transport tier for a prober. Each checker starts at most once.
pub enum Checker {
    Direct(DirectChecker),
    Relay(RelayChecker),
    Drp(DrpChecker),
}

pub struct DirectChecker {
    agent: Arc<UdpAgent>,
    started: AtomicBool,
}

#[derive(Default)]
pub struct RelayChecker {
    started: AtomicBool,
}

#[derive(Default)]
pub struct DrpChecker {
    started: AtomicBool,
}

fn start_once(started: &AtomicBool) -> bool {
    !started.swap(true, Ordering::AcqRel)
}

impl Checker {
    pub fn direct(agent: Arc<UdpAgent>) -> Self {
        Checker::Direct(DirectChecker {
            agent,
            started: AtomicBool::new(false),
        })
    }
    pub fn relay() -> Self {
        Checker::Relay(RelayChecker::default())
    }
    pub fn drp() -> Self {
        Checker::Drp(DrpChecker::default())
    }
    pub fn kind(&self) -> OfferKind {
        match self {
            Checker::Direct(_) => OfferKind::Direct,
            Checker::Relay(_) => OfferKind::Relay,
            Checker::Drp(_) => OfferKind::Drp,
        }
    }
    pub fn is_started(&self) -> bool {
        let started = match self {
            Checker::Direct(c) => &c.started,
            Checker::Relay(c) => &c.started,
            Checker::Drp(c) => &c.started,
        };
        started.load(Ordering::Acquire)
    }
    /// Results come back through `probe_success`/`probe_failed` on the prober.
    pub(crate) async fn probe_connect(&self, prober: &Arc<Prober>, offer: Offer) -> Result<()> {
        match (self, offer) {
            (Checker::Direct(checker), Offer::Direct(offer)) => {
                checker.probe_connect(prober, offer);
                Ok(())
            }
            (Checker::Relay(checker), Offer::Relay(offer)) => {
                checker.probe_connect(prober, offer).await
            }
            (Checker::Drp(checker), Offer::Drp(_)) => checker.probe_connect(prober).await,
            (checker, offer) => Err(Error::OfferMismatch {
                offer: offer.kind(),
                checker: checker.kind(),
            }),
        }
    }
}

impl DirectChecker {
    fn probe_connect(&self, prober: &Arc<Prober>, offer: DirectOffer) {
        if !start_once(&self.started) {
            log::debug!("direct check already running,remote={}", prober.remote_key());
            return;
        }
        let controlling = prober.controlling_against(offer.local_key);
        log::info!(
            "direct check remote={},controlling={controlling},candidates={}",
            prober.remote_key(),
            offer.candidates.len()
        );
        let agent = self.agent.clone();
        let remote = offer.credentials();
        let candidates = offer.candidates;
        let task_prober = prober.clone();
        let task = async move {
            let prober = task_prober;
            let rs = if controlling {
                agent.dial(&remote, &candidates).await
            } else {
                agent.accept(&remote, &candidates).await
            };
            match rs {
                Ok(addr) => {
                    if let Err(e) = prober.probe_success(Endpoint::Direct { addr }).await {
                        log::warn!("direct probe_success e={e:?},remote={}", prober.remote_key());
                    }
                }
                Err(Error::Shutdown) => {
                    log::debug!("direct check stopped,remote={}", prober.remote_key());
                }
                Err(e) => {
                    let e = prober.probe_failed(OfferKind::Direct, e);
                    log::warn!("{e}");
                }
            }
        };
        let task = prober.done().wrap_cancel(task);
        tokio::spawn(async move {
            _ = task.await;
        });
    }
}

impl RelayChecker {
    async fn probe_connect(&self, prober: &Arc<Prober>, offer: RelayOffer) -> Result<()> {
        if !start_once(&self.started) {
            return Ok(());
        }
        if prober.ctx.relay_info().is_none() {
            return Err(prober.probe_failed(OfferKind::Relay, Error::RelayUnavailable));
        }
        prober
            .probe_success(Endpoint::Relay {
                from: prober.ctx.local_key().to_string(),
                to: prober.remote_key().to_string(),
                addr: offer.relay_conn,
            })
            .await
    }
}

impl DrpChecker {
    async fn probe_connect(&self, prober: &Arc<Prober>) -> Result<()> {
        if !start_once(&self.started) {
            return Ok(());
        }
        let Some(server) = prober.ctx.config.drp_server else {
            return Err(prober.probe_failed(
                OfferKind::Drp,
                Error::InvalidArgument("drp_server is required".into()),
            ));
        };
        prober
            .probe_success(Endpoint::Drp {
                from: prober.ctx.local_key().to_string(),
                to: prober.remote_key().to_string(),
                addr: server,
            })
            .await
    }
}
