use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use meshlink_core::protocol::MAX_KEY_LEN;

use crate::error::{Error, Result};
use crate::node::Node;
use crate::offer::OfferKind;

pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
pub(crate) const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Which tier a prober offers first.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum ConnectType {
    /// Direct UDP through connectivity checks
    #[default]
    Direct,
    /// Force the TURN relay, direct offers are ignored
    Relay,
    /// Tunnel everything through the DRP server
    Drp,
}

impl ConnectType {
    pub fn offer_kind(&self) -> OfferKind {
        match self {
            ConnectType::Direct => OfferKind::Direct,
            ConnectType::Relay => OfferKind::Relay,
            ConnectType::Drp => OfferKind::Drp,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MeshConfig {
    pub local_key: String,
    pub local_node: Option<Node>,
    pub drp_server: Option<SocketAddr>,
    pub connect_type: ConnectType,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub outbound_queue_cap: usize,
    pub inbound_queue_cap: usize,
    pub message_pool_cap: usize,
    pub message_buf_cap: usize,
    pub check_interval: Duration,
    pub check_timeout: Duration,
    pub candidate_ips: Option<Vec<IpAddr>>,
    pub persistent_keepalive: u16,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            local_key: String::new(),
            local_node: None,
            drp_server: None,
            connect_type: ConnectType::Direct,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            reconnect_delay: RECONNECT_DELAY,
            outbound_queue_cap: 1024,
            inbound_queue_cap: 1024,
            message_pool_cap: 256,
            message_buf_cap: 2048,
            check_interval: Duration::from_millis(200),
            check_timeout: Duration::from_secs(15),
            candidate_ips: None,
            persistent_keepalive: 25,
        }
    }
}

impl MeshConfig {
    pub fn new(local_key: impl Into<String>) -> Self {
        Self::default().set_local_key(local_key)
    }
    pub fn set_local_key(mut self, local_key: impl Into<String>) -> Self {
        self.local_key = local_key.into();
        self
    }
    pub fn set_local_node(mut self, local_node: Node) -> Self {
        self.local_node.replace(local_node);
        self
    }
    pub fn set_drp_server(mut self, drp_server: SocketAddr) -> Self {
        self.drp_server.replace(drp_server);
        self
    }
    pub fn set_connect_type(mut self, connect_type: ConnectType) -> Self {
        self.connect_type = connect_type;
        self
    }
    pub fn set_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }
    pub fn set_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }
    pub fn set_outbound_queue_cap(mut self, outbound_queue_cap: usize) -> Self {
        self.outbound_queue_cap = outbound_queue_cap;
        self
    }
    pub fn set_inbound_queue_cap(mut self, inbound_queue_cap: usize) -> Self {
        self.inbound_queue_cap = inbound_queue_cap;
        self
    }
    pub fn set_message_pool_cap(mut self, message_pool_cap: usize) -> Self {
        self.message_pool_cap = message_pool_cap;
        self
    }
    pub fn set_message_buf_cap(mut self, message_buf_cap: usize) -> Self {
        self.message_buf_cap = message_buf_cap;
        self
    }
    pub fn set_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }
    pub fn set_check_timeout(mut self, check_timeout: Duration) -> Self {
        self.check_timeout = check_timeout;
        self
    }
    pub fn set_candidate_ips(mut self, candidate_ips: Vec<IpAddr>) -> Self {
        self.candidate_ips.replace(candidate_ips);
        self
    }
    pub fn set_persistent_keepalive(mut self, persistent_keepalive: u16) -> Self {
        self.persistent_keepalive = persistent_keepalive;
        self
    }
    /// The descriptor advertised in every offer.
    pub fn node(&self) -> Node {
        let mut node = self.local_node.clone().unwrap_or_default();
        node.public_key.clone_from(&self.local_key);
        if node.persistent_keepalive == 0 {
            node.persistent_keepalive = self.persistent_keepalive;
        }
        node
    }
    pub(crate) fn check(&self) -> Result<()> {
        if self.local_key.is_empty() {
            return Err(Error::InvalidArgument("local_key is required".into()));
        }
        if self.local_key.len() > MAX_KEY_LEN {
            return Err(Error::InvalidArgument(format!(
                "local_key longer than {MAX_KEY_LEN}"
            )));
        }
        if self.drp_server.is_none() {
            return Err(Error::InvalidArgument("drp_server is required".into()));
        }
        if self.outbound_queue_cap == 0 || self.inbound_queue_cap == 0 {
            return Err(Error::InvalidArgument("queue cap cannot be 0".into()));
        }
        if self.check_interval.is_zero() || self.check_interval >= self.check_timeout {
            return Err(Error::InvalidArgument(
                "check_interval must be non-zero and below check_timeout".into(),
            ));
        }
        Ok(())
    }
}
