/*
   0                                            15                                              31
   0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5  6  7  8  9  0  1
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |                                        frame length(32)                                     |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |      msg type(8)      |     from len(8)       |       to len(8)       |      unused(8)        |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |                                       timestamp ms(64)                                      |
  |                                                                                             |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |                                        from key(n)                                          |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |                                         to key(n)                                           |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |                                          body(n)                                            |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
*/

use std::time::UNIX_EPOCH;

use crate::error::{Error, Result};

pub mod codec;

/// Length of the fixed header following the frame length prefix.
pub const HEAD_LEN: usize = 12;
pub const MAX_KEY_LEN: usize = u8::MAX as usize;
pub const MAX_BODY_LEN: usize = 65536;
pub const MAX_FRAME_LEN: usize = HEAD_LEN + 2 * MAX_KEY_LEN + MAX_BODY_LEN;

#[derive(Eq, PartialEq, Copy, Clone, Debug, Hash, Default)]
#[repr(u8)]
pub enum MsgType {
    Register = 0,
    #[default]
    HeartBeat = 1,
    DirectOffer = 2,
    DirectOfferAnswer = 3,
    RelayOffer = 4,
    RelayAnswer = 5,
    DrpOffer = 6,
    DrpOfferAnswer = 7,
    /// Tunnel payload carried over the relay
    DrpData = 8,
}

impl MsgType {
    /// Offer and answer messages, which the relay forwards but never inspects.
    pub fn is_signaling(&self) -> bool {
        !matches!(
            self,
            MsgType::Register | MsgType::HeartBeat | MsgType::DrpData
        )
    }
    pub fn is_answer(&self) -> bool {
        matches!(
            self,
            MsgType::DirectOfferAnswer | MsgType::RelayAnswer | MsgType::DrpOfferAnswer
        )
    }
}

impl TryFrom<u8> for MsgType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        let msg_type = match value {
            0 => MsgType::Register,
            1 => MsgType::HeartBeat,
            2 => MsgType::DirectOffer,
            3 => MsgType::DirectOfferAnswer,
            4 => MsgType::RelayOffer,
            5 => MsgType::RelayAnswer,
            6 => MsgType::DrpOffer,
            7 => MsgType::DrpOfferAnswer,
            8 => MsgType::DrpData,
            v => return Err(Error::InvalidMsgType(v)),
        };
        Ok(msg_type)
    }
}

impl From<MsgType> for u8 {
    fn from(value: MsgType) -> Self {
        value as u8
    }
}

/// A message exchanged with the DRP relay.
///
/// `from` and `to` are always peer public keys. The relay routes on `to` and
/// never looks at `body`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrpMessage {
    pub from: String,
    pub to: String,
    pub msg_type: MsgType,
    pub body: Vec<u8>,
    pub timestamp: i64,
}

impl DrpMessage {
    pub(crate) fn with_capacity(body_capacity: usize) -> Self {
        Self {
            from: String::with_capacity(64),
            to: String::with_capacity(64),
            msg_type: MsgType::default(),
            body: Vec::with_capacity(body_capacity),
            timestamp: 0,
        }
    }
    pub(crate) fn reset(&mut self) {
        self.from.clear();
        self.to.clear();
        self.msg_type = MsgType::default();
        self.body.clear();
        self.timestamp = 0;
    }
    pub fn new(from: &str, to: &str, msg_type: MsgType, body: &[u8]) -> Self {
        let mut msg = DrpMessage::default();
        msg.fill(from, to, msg_type, body);
        msg
    }
    /// Overwrite every field, reusing the existing allocations.
    pub fn fill(&mut self, from: &str, to: &str, msg_type: MsgType, body: &[u8]) {
        self.from.clear();
        self.from.push_str(from);
        self.to.clear();
        self.to.push_str(to);
        self.msg_type = msg_type;
        self.body.clear();
        self.body.extend_from_slice(body);
        self.timestamp = now_millis();
    }
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::MsgType;

    #[test]
    fn test_msg_type() {
        assert_eq!(MsgType::try_from(3).unwrap(), MsgType::DirectOfferAnswer);
        assert_eq!(u8::from(MsgType::DrpData), 8);
        assert!(MsgType::try_from(9).is_err());
        assert!(MsgType::RelayAnswer.is_answer());
        assert!(!MsgType::HeartBeat.is_signaling());
        assert!(MsgType::DrpOffer.is_signaling());
    }
}
