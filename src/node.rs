use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Peer descriptor as handed out by the control plane and carried in offers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Node {
    pub public_key: String,
    pub name: String,
    pub address: String,
    pub allowed_ips: Vec<String>,
    pub endpoint: String,
    pub persistent_keepalive: u16,
}

/// Known peers keyed by public key.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<DashMap<String, Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    /// Returns false when a node with the same key is already known.
    pub fn add_if_absent(&self, node: Node) -> bool {
        match self.nodes.entry(node.public_key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(node);
                true
            }
        }
    }
    pub fn insert(&self, node: Node) -> Option<Node> {
        self.nodes.insert(node.public_key.clone(), node)
    }
    pub fn get(&self, public_key: &str) -> Option<Node> {
        self.nodes.get(public_key).map(|v| v.value().clone())
    }
    pub fn remove(&self, public_key: &str) -> Option<Node> {
        self.nodes.remove(public_key).map(|(_, v)| v)
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
