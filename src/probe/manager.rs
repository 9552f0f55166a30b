use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ConnectType;
use crate::error::{Error, Result};
use crate::probe::{ProbeContext, Prober};

/// Owns at most one prober per remote key.
pub struct ProbeManager {
    ctx: Arc<ProbeContext>,
    probers: Mutex<HashMap<String, Arc<Prober>>>,
}

impl ProbeManager {
    pub(crate) fn new(ctx: Arc<ProbeContext>) -> Self {
        Self {
            ctx,
            probers: Mutex::new(HashMap::new()),
        }
    }
    pub fn get_or_create(&self, remote_key: &str) -> Result<Arc<Prober>> {
        self.get_or_create_with(remote_key, self.ctx.config.connect_type)
    }
    fn get_or_create_with(&self, remote_key: &str, connect_type: ConnectType) -> Result<Arc<Prober>> {
        if remote_key.is_empty() || remote_key == self.ctx.local_key() {
            return Err(Error::InvalidArgument(format!("remote key {remote_key:?}")));
        }
        let mut probers = self.probers.lock();
        if let Some(prober) = probers.get(remote_key) {
            return Ok(prober.clone());
        }
        let prober = Prober::new(remote_key, connect_type, self.ctx.clone());
        probers.insert(remote_key.to_string(), prober.clone());
        log::info!("new prober remote={remote_key},connect_type={connect_type:?}");
        Ok(prober)
    }
    pub fn get(&self, remote_key: &str) -> Option<Arc<Prober>> {
        self.probers.lock().get(remote_key).cloned()
    }
    pub fn len(&self) -> usize {
        self.probers.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.probers.lock().is_empty()
    }
    pub fn keys(&self) -> Vec<String> {
        self.probers.lock().keys().cloned().collect()
    }
    /// Returns false when no prober existed for the key.
    pub fn clear(&self, remote_key: &str) -> bool {
        let prober = self.probers.lock().remove(remote_key);
        match prober {
            Some(prober) => {
                prober.clear();
                true
            }
            None => false,
        }
    }
    pub fn clear_all(&self) {
        let probers: Vec<_> = self.probers.lock().drain().map(|(_, v)| v).collect();
        for prober in probers {
            prober.clear();
        }
    }
    /// Drop the current prober for the peer and start over with `connect_type`.
    pub async fn retry(&self, remote_key: &str, connect_type: ConnectType) -> Result<Arc<Prober>> {
        self.clear(remote_key);
        let prober = self.get_or_create_with(remote_key, connect_type)?;
        prober.start().await?;
        Ok(prober)
    }
}
