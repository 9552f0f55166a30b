use std::sync::Arc;

use async_trait::async_trait;
use meshlink_core::pool::Block;
use meshlink_core::protocol::{DrpMessage, MsgType};

use crate::drp::SignalHandler;
use crate::error::{Error, Result};
use crate::node::NodeRegistry;
use crate::offer::{Offer, OfferKind};
use crate::probe::{ConnectionState, ProbeManager};

/// Routes inbound offers and answers to the prober of the sending peer,
/// creating it on first contact.
pub struct OfferHandler {
    probes: Arc<ProbeManager>,
    nodes: NodeRegistry,
}

impl OfferHandler {
    pub fn new(probes: Arc<ProbeManager>, nodes: NodeRegistry) -> Self {
        Self { probes, nodes }
    }
}

#[async_trait]
impl SignalHandler for OfferHandler {
    async fn handle(&self, msg: Block<DrpMessage>) -> Result<()> {
        let msg_type = msg.msg_type;
        if matches!(
            msg_type,
            MsgType::Register | MsgType::HeartBeat | MsgType::DrpData
        ) {
            return Err(Error::UnexpectedMessage(msg_type));
        }
        if msg.body.is_empty() {
            return Err(Error::EmptyBody);
        }
        let kind = OfferKind::try_from(msg_type)?;
        let mut offer = Offer::unmarshal(kind, &msg.body)?;
        let from = msg.from.clone();
        drop(msg);

        let node = offer.node_mut();
        if node.public_key != from {
            node.public_key.clone_from(&from);
        }
        if self.nodes.add_if_absent(node.clone()) {
            log::info!("new node {from},name={}", node.name);
        }

        let prober = self.probes.get_or_create(&from)?;
        if prober.is_closed() || prober.state() == ConnectionState::Failed {
            log::debug!("drop {msg_type:?},remote={from} failed");
            return Err(Error::ProbeFailed(from));
        }
        if !msg_type.is_answer() {
            prober.answer(kind).await?;
        }
        prober.handle_offer(offer).await
    }
}
