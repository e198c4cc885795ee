//! Encode/decode for the coordinator protocol.
//!
//! Frames are peeled off a connection's input buffer incrementally: a
//! partial frame stays in the buffer until more bytes arrive. Outbound
//! frames are produced with [`FrameBuilder`], which commits the frame
//! (patching the size field) at `finish`.

use bytes::{BufMut, Bytes, BytesMut};

use kestrel_common::types::{Gxid, LocalXid, NodeId, Participant, Snapshot, TxnStatus, Vote};

use crate::error::ProtocolError;
use crate::types::*;

type Result<T> = std::result::Result<T, ProtocolError>;

// ── Helper: read primitives ──────────────────────────────────────────────

fn ensure(buf: &[u8], need: usize) -> Result<()> {
    if buf.len() < need {
        return Err(ProtocolError::Truncated {
            expected: need,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    ensure(buf, 1)?;
    let v = buf[0];
    *buf = &buf[1..];
    Ok(v)
}

fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    ensure(buf, 4)?;
    let v = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    *buf = &buf[4..];
    Ok(v)
}

fn read_u64(buf: &mut &[u8]) -> Result<u64> {
    ensure(buf, 8)?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&buf[..8]);
    let v = u64::from_le_bytes(arr);
    *buf = &buf[8..];
    Ok(v)
}

fn expect_empty(buf: &[u8]) -> Result<()> {
    if !buf.is_empty() {
        return Err(ProtocolError::TrailingBytes(buf.len()));
    }
    Ok(())
}

// ── Frame decode ─────────────────────────────────────────────────────────

/// Try to peel one whole frame off `buf`. Returns `Ok(None)` when the
/// buffer holds only a partial frame. A frame whose total length exceeds
/// `max_frame` can never complete and is a fatal framing violation.
pub fn decode_frame(buf: &mut BytesMut, max_frame: usize) -> Result<Option<Frame>> {
    use bytes::Buf;

    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let size = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let total = HEADER_LEN + size;
    if total > max_frame {
        return Err(ProtocolError::FrameTooLarge {
            size: total,
            max: max_frame,
        });
    }
    if buf.len() < total {
        return Ok(None);
    }

    let code = buf[4];
    let chan = u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);
    let mut frame = buf.split_to(total);
    frame.advance(HEADER_LEN);
    Ok(Some(Frame {
        code,
        chan,
        payload: frame.freeze(),
    }))
}

// ── Request decode ───────────────────────────────────────────────────────

/// Parse a frame body into a typed request.
pub fn decode_request(code: u8, payload: &[u8]) -> Result<Request> {
    let mut buf = payload;
    match code {
        REQ_START => {
            let n = read_u32(&mut buf)? as usize;
            // Each participant is a fixed 12 bytes; the count must match
            // the body exactly.
            let body = n
                .checked_mul(12)
                .ok_or(ProtocolError::InvalidValue {
                    field: "participant count",
                    value: n as u64,
                })?;
            if buf.len() != body {
                return Err(ProtocolError::Truncated {
                    expected: body,
                    actual: buf.len(),
                });
            }
            let mut participants = Vec::with_capacity(n);
            for _ in 0..n {
                let node = NodeId(read_u32(&mut buf)?);
                let local_xid = LocalXid(read_u64(&mut buf)?);
                participants.push(Participant { node, local_xid });
            }
            Ok(Request::Start { participants })
        }
        REQ_SNAPSHOT => {
            let gxid = Gxid(read_u64(&mut buf)?);
            expect_empty(buf)?;
            Ok(Request::Snapshot { gxid })
        }
        REQ_SETSTATUS => {
            let gxid = Gxid(read_u64(&mut buf)?);
            let node = NodeId(read_u32(&mut buf)?);
            let vote = match read_u8(&mut buf)? {
                VOTE_COMMIT => Vote::Commit,
                VOTE_ABORT => Vote::Abort,
                other => {
                    return Err(ProtocolError::InvalidValue {
                        field: "vote",
                        value: other as u64,
                    })
                }
            };
            expect_empty(buf)?;
            Ok(Request::SetStatus { gxid, node, vote })
        }
        REQ_GETSTATUS => {
            let gxid = Gxid(read_u64(&mut buf)?);
            expect_empty(buf)?;
            Ok(Request::GetStatus { gxid })
        }
        MSG_DISCONNECT => {
            expect_empty(buf)?;
            Ok(Request::Disconnect)
        }
        other => Err(ProtocolError::UnknownMessageType(other)),
    }
}

// ── Outbound frame builder ───────────────────────────────────────────────

/// Builds one outbound frame: `start → append* → finish`. The size field
/// is patched at `finish`, so multi-part replies are committed atomically.
pub struct FrameBuilder {
    buf: BytesMut,
    max_frame: usize,
}

impl FrameBuilder {
    pub fn start(code: u8, chan: u32, max_frame: usize) -> Self {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 16);
        buf.put_u32_le(0); // patched at finish
        buf.put_u8(code);
        buf.put_u32_le(chan);
        Self { buf, max_frame }
    }

    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        let total = self.buf.len() + data.len();
        if total > self.max_frame {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: self.max_frame,
            });
        }
        self.buf.put_slice(data);
        Ok(())
    }

    pub fn append_u8(&mut self, v: u8) -> Result<()> {
        self.append(&[v])
    }

    pub fn append_u32(&mut self, v: u32) -> Result<()> {
        self.append(&v.to_le_bytes())
    }

    pub fn append_u64(&mut self, v: u64) -> Result<()> {
        self.append(&v.to_le_bytes())
    }

    pub fn finish(mut self) -> Bytes {
        let size = (self.buf.len() - HEADER_LEN) as u32;
        self.buf[0..4].copy_from_slice(&size.to_le_bytes());
        self.buf.freeze()
    }

    /// One-call path for the common single-`u64` reply.
    pub fn shortcut(code: u8, chan: u32, value: u64, max_frame: usize) -> Result<Bytes> {
        let mut b = FrameBuilder::start(code, chan, max_frame);
        b.append_u64(value)?;
        Ok(b.finish())
    }
}

// ── Reply encode ─────────────────────────────────────────────────────────

/// Encode a reply as one committed frame for `chan`.
pub fn encode_reply(chan: u32, reply: &Reply, max_frame: usize) -> Result<Bytes> {
    match reply {
        Reply::Started { gxid } => FrameBuilder::shortcut(RES_OK, chan, gxid.0, max_frame),
        Reply::Snapshot(snapshot) => encode_snapshot(chan, snapshot, max_frame),
        Reply::Status(status) => {
            let mut b = FrameBuilder::start(RES_OK, chan, max_frame);
            b.append_u8(status_byte(*status))?;
            Ok(b.finish())
        }
        Reply::Error(kind) => {
            let mut b = FrameBuilder::start(RES_ERROR, chan, max_frame);
            b.append_u8(*kind)?;
            Ok(b.finish())
        }
    }
}

fn encode_snapshot(chan: u32, snapshot: &Snapshot, max_frame: usize) -> Result<Bytes> {
    let mut b = FrameBuilder::start(RES_OK, chan, max_frame);
    b.append_u64(snapshot.xmin.0)?;
    b.append_u64(snapshot.xmax.0)?;
    b.append_u32(snapshot.xip.len() as u32)?;
    for gxid in &snapshot.xip {
        b.append_u64(gxid.0)?;
    }
    Ok(b.finish())
}

/// Decode a reply frame body. Used by test clients and by anything that
/// needs to read its own wire format back.
pub fn decode_reply(code: u8, payload: &[u8], expect: u8) -> Result<Reply> {
    let mut buf = payload;
    match code {
        RES_ERROR => {
            let kind = read_u8(&mut buf)?;
            expect_empty(buf)?;
            Ok(Reply::Error(kind))
        }
        RES_OK => match expect {
            REQ_START => {
                let gxid = Gxid(read_u64(&mut buf)?);
                expect_empty(buf)?;
                Ok(Reply::Started { gxid })
            }
            REQ_SNAPSHOT => {
                let xmin = Gxid(read_u64(&mut buf)?);
                let xmax = Gxid(read_u64(&mut buf)?);
                let n = read_u32(&mut buf)? as usize;
                let mut xip = Vec::with_capacity(n);
                for _ in 0..n {
                    xip.push(Gxid(read_u64(&mut buf)?));
                }
                expect_empty(buf)?;
                Ok(Reply::Snapshot(Snapshot { xmin, xmax, xip }))
            }
            REQ_SETSTATUS | REQ_GETSTATUS => {
                let status = match read_u8(&mut buf)? {
                    STATUS_IN_PROGRESS => TxnStatus::InProgress,
                    STATUS_COMMITTED => TxnStatus::Committed,
                    STATUS_ABORTED => TxnStatus::Aborted,
                    other => {
                        return Err(ProtocolError::InvalidValue {
                            field: "status",
                            value: other as u64,
                        })
                    }
                };
                expect_empty(buf)?;
                Ok(Reply::Status(status))
            }
            other => Err(ProtocolError::UnknownMessageType(other)),
        },
        other => Err(ProtocolError::UnknownMessageType(other)),
    }
}
