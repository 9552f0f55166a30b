use meshlink_core::protocol::MsgType;
use thiserror::Error;

use crate::offer::OfferKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("drp protocol: {0}")]
    Protocol(#[from] meshlink_core::error::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid argument:{0}")]
    InvalidArgument(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),
    #[error("empty message body")]
    EmptyBody,
    #[error("unexpected message type {0:?}")]
    UnexpectedMessage(MsgType),
    #[error("{offer:?} offer cannot be handled by the {checker:?} checker")]
    OfferMismatch { offer: OfferKind, checker: OfferKind },
    #[error("probe to {0} failed, check your network")]
    CheckNetwork(String),
    #[error("probe to {0} already failed, clear it before retrying")]
    ProbeFailed(String),
    #[error("relay allocation unavailable")]
    RelayUnavailable,
    #[error("direct transport is not open")]
    NotOpen,
    #[error("connectivity check timed out")]
    CheckTimeout,
    #[error("drp channel closed")]
    ChannelClosed,
    #[error("shutdown")]
    Shutdown,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(e) => e,
            Error::Protocol(e) => e.into(),
            Error::ChannelClosed | Error::Shutdown => {
                std::io::Error::new(std::io::ErrorKind::NotConnected, value.to_string())
            }
            e => std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        }
    }
}
