use std::io;

use thiserror::Error;

use crate::protocol::MsgType;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io")]
    Io(#[from] io::Error),
    #[error("eof")]
    Eof,
    #[error("invalid message type: {0}")]
    InvalidMsgType(u8),
    #[error("frame too long: len is {len} but the limit is {limit}")]
    FrameTooLong { len: usize, limit: usize },
    #[error("frame too short: {0}")]
    FrameTooShort(usize),
    #[error("key too long: {0}")]
    KeyTooLong(usize),
    #[error("invalid utf-8 key")]
    InvalidKey,
    #[error("client not registered: {0}")]
    NotRegistered(String),
    #[error("queue full: {0}")]
    QueueFull(String),
    #[error("unexpected message {0:?}")]
    UnexpectedMessage(MsgType),
}

pub type Result<T, E = Error> = ::std::result::Result<T, E>;

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(e) => e,
            Error::Eof => io::Error::from(io::ErrorKind::UnexpectedEof),
            e => io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
        }
    }
}
