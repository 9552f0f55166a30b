use std::io;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::{DrpMessage, MsgType, HEAD_LEN, MAX_BODY_LEN, MAX_FRAME_LEN, MAX_KEY_LEN};

/// Reads length-prefixed [`DrpMessage`] frames.
pub struct FramedRead<R> {
    read: R,
}

impl<R: AsyncRead + Unpin> FramedRead<R> {
    pub fn new(read: R) -> Self {
        Self { read }
    }

    /// Decode the next frame into `msg`, reusing its allocations.
    ///
    /// A frame with an unknown message type is consumed completely before the
    /// error is returned, so the stream stays aligned and the caller may skip it.
    pub async fn read_message(&mut self, msg: &mut DrpMessage) -> Result<()> {
        let mut prefix = [0u8; 4];
        if let Err(e) = self.read.read_exact(&mut prefix).await {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Err(Error::Eof);
            }
            return Err(e.into());
        }
        let len = u32::from_be_bytes(prefix) as usize;
        if len > MAX_FRAME_LEN {
            return Err(Error::FrameTooLong {
                len,
                limit: MAX_FRAME_LEN,
            });
        }
        if len < HEAD_LEN {
            return Err(Error::FrameTooShort(len));
        }
        let mut head = [0u8; HEAD_LEN];
        self.read.read_exact(&mut head).await?;
        let from_len = head[1] as usize;
        let to_len = head[2] as usize;
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&head[4..HEAD_LEN]);

        msg.from.clear();
        msg.to.clear();
        msg.body.clear();
        msg.body.resize(len - HEAD_LEN, 0);
        self.read.read_exact(&mut msg.body).await?;
        if from_len + to_len > msg.body.len() {
            return Err(Error::FrameTooShort(len));
        }
        let msg_type = MsgType::try_from(head[0])?;
        let from = std::str::from_utf8(&msg.body[..from_len]).map_err(|_| Error::InvalidKey)?;
        msg.from.push_str(from);
        let to = std::str::from_utf8(&msg.body[from_len..from_len + to_len])
            .map_err(|_| Error::InvalidKey)?;
        msg.to.push_str(to);
        msg.body.drain(..from_len + to_len);
        msg.msg_type = msg_type;
        msg.timestamp = i64::from_be_bytes(timestamp);
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.read
    }
}

/// Buffers encoded frames and writes them with a single call per flush.
pub struct FramedWrite<W> {
    write: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> FramedWrite<W> {
    pub fn new(write: W) -> Self {
        Self {
            write,
            buf: BytesMut::with_capacity(4096),
        }
    }
    /// Append `msg` to the pending buffer without touching the stream.
    pub fn encode(&mut self, msg: &DrpMessage) -> Result<()> {
        encode_message(msg, &mut self.buf)
    }
    pub async fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let rs = self.write.write_all(&self.buf).await;
        self.buf.clear();
        rs?;
        Ok(())
    }
    pub async fn write_message(&mut self, msg: &DrpMessage) -> Result<()> {
        self.encode(msg)?;
        self.flush().await
    }
    pub fn into_inner(self) -> W {
        self.write
    }
}

pub fn encode_message(msg: &DrpMessage, dst: &mut BytesMut) -> Result<()> {
    if msg.from.len() > MAX_KEY_LEN {
        return Err(Error::KeyTooLong(msg.from.len()));
    }
    if msg.to.len() > MAX_KEY_LEN {
        return Err(Error::KeyTooLong(msg.to.len()));
    }
    if msg.body.len() > MAX_BODY_LEN {
        return Err(Error::FrameTooLong {
            len: msg.body.len(),
            limit: MAX_BODY_LEN,
        });
    }
    let len = HEAD_LEN + msg.from.len() + msg.to.len() + msg.body.len();
    dst.reserve(4 + len);
    dst.put_u32(len as u32);
    dst.put_u8(msg.msg_type.into());
    dst.put_u8(msg.from.len() as u8);
    dst.put_u8(msg.to.len() as u8);
    dst.put_u8(0);
    dst.put_i64(msg.timestamp);
    dst.put_slice(msg.from.as_bytes());
    dst.put_slice(msg.to.as_bytes());
    dst.put_slice(&msg.body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use crate::error::Error;
    use crate::protocol::codec::{encode_message, FramedRead, FramedWrite};
    use crate::protocol::{DrpMessage, MsgType};

    #[tokio::test]
    async fn test_stream_frames() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FramedWrite::new(client);
        let first = DrpMessage::new("alice", "bob", MsgType::DirectOffer, b"{\"a\":1}");
        let second = DrpMessage::new("alice", "", MsgType::HeartBeat, &[]);
        writer.encode(&first).unwrap();
        writer.encode(&second).unwrap();
        writer.flush().await.unwrap();

        let mut reader = FramedRead::new(server);
        let mut msg = DrpMessage::default();
        reader.read_message(&mut msg).await.unwrap();
        assert_eq!(msg, first);
        reader.read_message(&mut msg).await.unwrap();
        assert_eq!(msg, second);
        drop(writer);
        assert!(matches!(reader.read_message(&mut msg).await, Err(Error::Eof)));
    }

    #[tokio::test]
    async fn test_skip_unknown_type() {
        let mut buf = BytesMut::new();
        let mut bad = BytesMut::new();
        encode_message(&DrpMessage::new("a", "b", MsgType::DrpData, &[9; 4]), &mut bad).unwrap();
        // corrupt the msg type byte
        bad[4] = 200;
        buf.put_slice(&bad);
        let good = DrpMessage::new("a", "b", MsgType::DrpData, &[1; 4]);
        encode_message(&good, &mut buf).unwrap();

        let mut reader = FramedRead::new(&buf[..]);
        let mut msg = DrpMessage::default();
        assert!(matches!(
            reader.read_message(&mut msg).await,
            Err(Error::InvalidMsgType(200))
        ));
        reader.read_message(&mut msg).await.unwrap();
        assert_eq!(msg, good);
    }

    #[tokio::test]
    async fn test_reject_oversize() {
        let mut buf = BytesMut::new();
        buf.put_u32(u32::MAX);
        let mut reader = FramedRead::new(&buf[..]);
        let mut msg = DrpMessage::default();
        assert!(matches!(
            reader.read_message(&mut msg).await,
            Err(Error::FrameTooLong { .. })
        ));
    }
}
