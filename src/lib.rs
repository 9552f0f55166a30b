//! # meshlink
//!
//! Connectivity establishment for mesh VPN peers. For every remote peer a
//! [`Prober`](probe::Prober) exchanges offers through the DRP relay and picks
//! a transport: direct UDP after ICE-like checks, a TURN relay, or the DRP
//! relay itself. The winning [`Endpoint`](endpoint::Endpoint) is programmed
//! into the tunnel [`Device`](device::Device) and later packets travel through
//! the [`Bind`](bind::Bind).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshlink::config::MeshConfig;
//! use meshlink::device::Device;
//! use meshlink::node::Node;
//! use meshlink::Builder;
//!
//! # async fn run(device: Arc<dyn Device>, peers: Vec<Node>) -> meshlink::error::Result<()> {
//! let config = MeshConfig::new("local-public-key")
//!     .set_drp_server("203.0.113.1:6266".parse().unwrap());
//! let mesh = Builder::new(config).device(device).build().await?;
//! let (_receivers, _port) = meshlink::bind::Bind::open(mesh.bind().as_ref(), 51820)?;
//! mesh.add_peers(peers).await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_shutdown::ShutdownManager;
use tokio::task::JoinHandle;

use crate::agent::CheckDemux;
use crate::bind::{Bind, DefaultBind};
use crate::config::{ConnectType, MeshConfig};
use crate::device::{Device, RelayInfoProvider};
use crate::drp::{DrpClient, SignalHandler};
use crate::error::{Error, Result};
use crate::handler::OfferHandler;
use crate::node::{Node, NodeRegistry};
use crate::probe::{ProbeContext, ProbeManager, Prober};

pub mod agent;
pub mod bind;
pub mod config;
pub mod device;
pub mod drp;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod node;
pub mod offer;
pub mod probe;

pub use meshlink_core;

struct OwnedJoinHandle {
    handle: JoinHandle<()>,
}

impl Drop for OwnedJoinHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One mesh session: the peers it knows, their probers and the transports.
pub struct Mesh {
    local_key: String,
    nodes: NodeRegistry,
    probes: Arc<ProbeManager>,
    handler: Arc<OfferHandler>,
    drp: DrpClient,
    bind: Arc<DefaultBind>,
    device: Arc<dyn Device>,
    shutdown: ShutdownManager<()>,
    _handle: OwnedJoinHandle,
}

impl Mesh {
    pub fn local_key(&self) -> &str {
        &self.local_key
    }
    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }
    pub fn probe_manager(&self) -> &Arc<ProbeManager> {
        &self.probes
    }
    pub fn prober(&self, remote_key: &str) -> Option<Arc<Prober>> {
        self.probes.get(remote_key)
    }
    pub fn handler(&self) -> Arc<OfferHandler> {
        self.handler.clone()
    }
    pub fn drp_client(&self) -> &DrpClient {
        &self.drp
    }
    pub fn bind(&self) -> Arc<DefaultBind> {
        self.bind.clone()
    }
    /// Register the peers from the control plane and start probing each of
    /// them. Failures are logged per peer.
    pub async fn add_peers(&self, peers: Vec<Node>) {
        for node in peers {
            if node.public_key.is_empty() || node.public_key == self.local_key {
                continue;
            }
            let key = node.public_key.clone();
            self.nodes.insert(node);
            let prober = match self.probes.get_or_create(&key) {
                Ok(prober) => prober,
                Err(e) => {
                    log::warn!("get_or_create e={e:?},remote={key}");
                    continue;
                }
            };
            if let Err(e) = prober.start().await {
                log::warn!("start e={e:?},remote={key}");
            }
        }
    }
    /// Forget peers the control plane no longer lists.
    pub async fn remove_peers(&self, keys: &[String]) {
        for key in keys {
            self.probes.clear(key);
            self.nodes.remove(key);
            if let Err(e) = self.device.remove_peer(key).await {
                log::warn!("remove_peer e={e:?},remote={key}");
            }
        }
    }
    pub fn clear(&self, remote_key: &str) -> bool {
        self.probes.clear(remote_key)
    }
    pub async fn retry(&self, remote_key: &str, connect_type: ConnectType) -> Result<Arc<Prober>> {
        self.probes.retry(remote_key, connect_type).await
    }
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_shutdown_triggered()
    }
    pub fn shutdown(&self) {
        if self.shutdown.trigger_shutdown(()).is_ok() {
            self.probes.clear_all();
            _ = self.bind.close();
            log::info!("mesh shutdown key={}", self.local_key);
        }
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct Builder {
    config: MeshConfig,
    device: Option<Arc<dyn Device>>,
    relay: Option<Arc<dyn RelayInfoProvider>>,
}

impl Builder {
    pub fn new(config: MeshConfig) -> Self {
        Self {
            config,
            device: None,
            relay: None,
        }
    }
    pub fn device(mut self, device: Arc<dyn Device>) -> Self {
        self.device = Some(device);
        self
    }
    pub fn relay(mut self, relay: Arc<dyn RelayInfoProvider>) -> Self {
        self.relay = Some(relay);
        self
    }
    /// Starts the DRP proxy. The bind is returned closed; open it through
    /// [`Mesh::bind`] before probing direct peers.
    pub async fn build(self) -> Result<Mesh> {
        self.config.check()?;
        let device = self
            .device
            .ok_or_else(|| Error::InvalidArgument("device is required".into()))?;
        let (drp, proxy, data) = drp::channel(&self.config)?;
        let demux = CheckDemux::new();
        let mut bind =
            DefaultBind::new(&self.config.local_key, demux.clone()).set_drp(drp.clone(), data, proxy.server());
        if let Some(relay) = &self.relay {
            bind = bind.set_relay(relay.clone());
        }
        let bind = Arc::new(bind);
        let nodes = NodeRegistry::new();
        let local_key = self.config.local_key.clone();
        let ctx = Arc::new(ProbeContext::new(
            self.config,
            drp.clone(),
            device.clone(),
            bind.clone(),
            self.relay,
            demux,
            nodes.clone(),
        ));
        let probes = Arc::new(ProbeManager::new(ctx));
        let handler = Arc::new(OfferHandler::new(probes.clone(), nodes.clone()));

        let shutdown = ShutdownManager::new();
        let signal_handler: Arc<dyn SignalHandler> = handler.clone();
        let run = shutdown.wrap_cancel(proxy.run(signal_handler));
        let handle = tokio::spawn(async move {
            if run.await.is_err() {
                log::debug!("drp proxy cancelled");
            }
        });
        Ok(Mesh {
            local_key,
            nodes,
            probes,
            handler,
            drp,
            bind,
            device,
            shutdown,
            _handle: OwnedJoinHandle { handle },
        })
    }
}
