/*
   0                                            15                                              31
   0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5  6  7  8  9  0  1
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |                                          magic(32)                                          |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |        kind(8)        |       flags(8)        |                  txn(64) ...                |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |                    ... txn                    |     ufrag len(8)      |     ufrag(n) ...    |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  |      pwd len(8)       |                              pwd(n)                                 |
  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
  ufrag/pwd are the credentials of the receiving agent.
*/

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

pub const MAGIC: [u8; 4] = *b"MLCK";
const FIXED_LEN: usize = 4 + 1 + 1 + 8;
const FLAG_NOMINATE: u8 = 0x01;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CheckKind {
    Request = 1,
    Response = 2,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CheckPacket {
    pub kind: CheckKind,
    pub nominate: bool,
    pub txn: u64,
    pub ufrag: String,
    pub pwd: String,
}

/// Cheap test used on the data path before anything is decoded.
#[inline]
pub fn is_check_packet(buf: &[u8]) -> bool {
    buf.len() >= FIXED_LEN && buf[..4] == MAGIC
}

impl CheckPacket {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FIXED_LEN + 2 + self.ufrag.len() + self.pwd.len());
        buf.put_slice(&MAGIC);
        buf.put_u8(self.kind as u8);
        buf.put_u8(if self.nominate { FLAG_NOMINATE } else { 0 });
        buf.put_u64(self.txn);
        put_str(buf, &self.ufrag);
        put_str(buf, &self.pwd);
    }
    pub fn decode(mut buf: &[u8]) -> Result<CheckPacket> {
        if !is_check_packet(buf) {
            return Err(Error::InvalidArgument("not a check packet".into()));
        }
        buf.advance(4);
        let kind = match buf.get_u8() {
            1 => CheckKind::Request,
            2 => CheckKind::Response,
            v => return Err(Error::InvalidArgument(format!("check kind {v}"))),
        };
        let nominate = buf.get_u8() & FLAG_NOMINATE != 0;
        let txn = buf.get_u64();
        let ufrag = get_str(&mut buf)?;
        let pwd = get_str(&mut buf)?;
        Ok(CheckPacket {
            kind,
            nominate,
            txn,
            ufrag,
            pwd,
        })
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    let len = s.len().min(u8::MAX as usize);
    buf.put_u8(len as u8);
    buf.put_slice(&s.as_bytes()[..len]);
}

fn get_str(buf: &mut &[u8]) -> Result<String> {
    if buf.is_empty() {
        return Err(Error::InvalidArgument("truncated check packet".into()));
    }
    let len = buf.get_u8() as usize;
    if buf.len() < len {
        return Err(Error::InvalidArgument("truncated check packet".into()));
    }
    let s = String::from_utf8(buf[..len].to_vec())
        .map_err(|_| Error::InvalidArgument("check credential is not utf-8".into()))?;
    buf.advance(len);
    Ok(s)
}
