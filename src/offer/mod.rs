//! Offer/answer bodies exchanged over the DRP relay.
//!
//! Every kind travels as a JSON body; the answer of a kind reuses the offer's
//! shape under the matching answer message type.

use std::net::SocketAddr;

use meshlink_core::protocol::MsgType;
use serde::{Deserialize, Serialize};

use crate::agent::{Candidate, Credentials};
use crate::error::{Error, Result};
use crate::node::Node;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OfferKind {
    Direct,
    Relay,
    Drp,
}

impl OfferKind {
    pub fn msg_type(&self, is_answer: bool) -> MsgType {
        match (self, is_answer) {
            (OfferKind::Direct, false) => MsgType::DirectOffer,
            (OfferKind::Direct, true) => MsgType::DirectOfferAnswer,
            (OfferKind::Relay, false) => MsgType::RelayOffer,
            (OfferKind::Relay, true) => MsgType::RelayAnswer,
            (OfferKind::Drp, false) => MsgType::DrpOffer,
            (OfferKind::Drp, true) => MsgType::DrpOfferAnswer,
        }
    }
}

impl TryFrom<MsgType> for OfferKind {
    type Error = Error;

    fn try_from(value: MsgType) -> Result<Self> {
        match value {
            MsgType::DirectOffer | MsgType::DirectOfferAnswer => Ok(OfferKind::Direct),
            MsgType::RelayOffer | MsgType::RelayAnswer => Ok(OfferKind::Relay),
            MsgType::DrpOffer | MsgType::DrpOfferAnswer => Ok(OfferKind::Drp),
            MsgType::Register | MsgType::HeartBeat | MsgType::DrpData => {
                Err(Error::UnexpectedMessage(value))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectOffer {
    pub wg_port: u32,
    pub ufrag: String,
    pub pwd: String,
    /// Tie-breaker, the higher side is controlling
    pub local_key: u64,
    #[serde(rename = "candidate", with = "candidate_list")]
    pub candidates: Vec<Candidate>,
    pub node: Node,
}

impl DirectOffer {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            ufrag: self.ufrag.clone(),
            pwd: self.pwd.clone(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferType {
    Offer,
    Answer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayOffer {
    pub node: Node,
    pub local_key: u64,
    pub mapped_addr: SocketAddr,
    /// Relayed address allocated to the sender; the peer sends here
    pub relay_conn: SocketAddr,
    pub offer_type: OfferType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrpOffer {
    pub node: Node,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Offer {
    Direct(DirectOffer),
    Relay(RelayOffer),
    Drp(DrpOffer),
}

impl Offer {
    pub fn kind(&self) -> OfferKind {
        match self {
            Offer::Direct(_) => OfferKind::Direct,
            Offer::Relay(_) => OfferKind::Relay,
            Offer::Drp(_) => OfferKind::Drp,
        }
    }
    pub fn node(&self) -> &Node {
        match self {
            Offer::Direct(offer) => &offer.node,
            Offer::Relay(offer) => &offer.node,
            Offer::Drp(offer) => &offer.node,
        }
    }
    pub fn node_mut(&mut self) -> &mut Node {
        match self {
            Offer::Direct(offer) => &mut offer.node,
            Offer::Relay(offer) => &mut offer.node,
            Offer::Drp(offer) => &mut offer.node,
        }
    }
    /// Only direct offers take part in role selection.
    pub fn tie_breaker(&self) -> u64 {
        match self {
            Offer::Direct(offer) => offer.local_key,
            Offer::Relay(_) | Offer::Drp(_) => 0,
        }
    }
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let body = match self {
            Offer::Direct(offer) => serde_json::to_vec(offer)?,
            Offer::Relay(offer) => serde_json::to_vec(offer)?,
            Offer::Drp(offer) => serde_json::to_vec(offer)?,
        };
        Ok(body)
    }
    pub fn unmarshal(kind: OfferKind, body: &[u8]) -> Result<Offer> {
        if body.is_empty() {
            return Err(Error::EmptyBody);
        }
        let offer = match kind {
            OfferKind::Direct => Offer::Direct(serde_json::from_slice(body)?),
            OfferKind::Relay => Offer::Relay(serde_json::from_slice(body)?),
            OfferKind::Drp => Offer::Drp(serde_json::from_slice(body)?),
        };
        Ok(offer)
    }
}

/// `controlling` when the local tie-breaker wins. Equal tie-breakers fall back
/// to the public keys so both sides reach opposite answers.
pub fn is_controlling(local_tie: u64, remote_tie: u64, local_key: &str, remote_key: &str) -> bool {
    if local_tie != remote_tie {
        local_tie > remote_tie
    } else {
        local_key > remote_key
    }
}

mod candidate_list {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::agent::Candidate;

    pub fn serialize<S: Serializer>(candidates: &[Candidate], serializer: S) -> Result<S::Ok, S::Error> {
        let joined = candidates
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(";");
        serializer.serialize_str(&joined)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Candidate>, D::Error> {
        let joined = String::deserialize(deserializer)?;
        joined
            .split(';')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node {
            public_key: "pk-a".into(),
            name: "a".into(),
            address: "10.10.0.1".into(),
            allowed_ips: vec!["10.10.0.1/32".into()],
            endpoint: String::new(),
            persistent_keepalive: 25,
        }
    }

    fn direct() -> Offer {
        Offer::Direct(DirectOffer {
            wg_port: 51820,
            ufrag: "u".repeat(16),
            pwd: "p".repeat(32),
            local_key: 5,
            candidates: vec![
                Candidate::host("192.168.1.2:51820".parse().unwrap()),
                Candidate::srflx("1.2.3.4:40000".parse().unwrap()),
            ],
            node: node(),
        })
    }

    #[test]
    fn test_roundtrip() {
        let relay = Offer::Relay(RelayOffer {
            node: node(),
            local_key: 9,
            mapped_addr: "1.2.3.4:40000".parse().unwrap(),
            relay_conn: "5.6.7.8:3478".parse().unwrap(),
            offer_type: OfferType::Answer,
        });
        let drp = Offer::Drp(DrpOffer { node: node() });
        for offer in [direct(), relay, drp] {
            let body = offer.marshal().unwrap();
            assert_eq!(Offer::unmarshal(offer.kind(), &body).unwrap(), offer);
        }
    }

    #[test]
    fn test_direct_json_shape() {
        let body = direct().marshal().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["wgPort"], 51820);
        assert_eq!(value["localKey"], 5);
        assert_eq!(
            value["candidate"],
            "host 192.168.1.2:51820;srflx 1.2.3.4:40000"
        );
        assert_eq!(value["node"]["publicKey"], "pk-a");
    }

    #[test]
    fn test_relay_json_shape() {
        let json = r#"{"node":{"publicKey":"k"},"localKey":1,"mappedAddr":"1.1.1.1:1","relayConn":"2.2.2.2:2","offerType":"offer"}"#;
        let Offer::Relay(offer) = Offer::unmarshal(OfferKind::Relay, json.as_bytes()).unwrap() else {
            panic!("expected relay offer");
        };
        assert_eq!(offer.offer_type, OfferType::Offer);
        assert_eq!(offer.relay_conn, "2.2.2.2:2".parse().unwrap());
    }

    #[test]
    fn test_unmarshal_errors() {
        assert!(matches!(
            Offer::unmarshal(OfferKind::Drp, &[]),
            Err(Error::EmptyBody)
        ));
        assert!(matches!(
            Offer::unmarshal(OfferKind::Direct, b"{}"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_kind_msg_type() {
        for kind in [OfferKind::Direct, OfferKind::Relay, OfferKind::Drp] {
            assert!(!kind.msg_type(false).is_answer());
            assert!(kind.msg_type(true).is_answer());
            assert_eq!(OfferKind::try_from(kind.msg_type(true)).unwrap(), kind);
        }
        assert!(OfferKind::try_from(MsgType::DrpData).is_err());
    }

    #[test]
    fn test_tie_breaker() {
        assert_eq!(direct().tie_breaker(), 5);
        assert_eq!(Offer::Drp(DrpOffer { node: node() }).tie_breaker(), 0);
        assert!(is_controlling(5, 3, "a", "b"));
        assert!(!is_controlling(3, 5, "b", "a"));
        assert!(is_controlling(7, 7, "b", "a"));
        assert!(!is_controlling(7, 7, "a", "b"));
    }
}
