//! Wire-level message types and reserved codes.
//!
//! Every message is framed as `[size: u32 LE][code: u8][chan: u32 LE]`
//! followed by `size` payload bytes; `size` counts the payload only. All
//! multi-byte integers on the wire are little-endian, and frames that do
//! not parse are rejected.

use kestrel_common::error::CoordinatorError;
use kestrel_common::types::{Gxid, NodeId, Participant, Snapshot, TxnStatus, Vote};

/// Frame header length: `u32 size + u8 code + u32 chan`.
pub const HEADER_LEN: usize = 9;

// ── Message codes ────────────────────────────────────────────────────────

/// Begin a global transaction.
/// Payload: `u32 n`, then `n × {u32 node, u64 local_xid}`.
pub const REQ_START: u8 = 0x01;
/// Request a snapshot. Payload: `u64 gxid` (the requester).
pub const REQ_SNAPSHOT: u8 = 0x02;
/// Cast a vote. Payload: `u64 gxid, u32 node, u8 vote`.
/// The reply is withheld until the transaction is terminal.
pub const REQ_SETSTATUS: u8 = 0x03;
/// Poll the current status without parking. Payload: `u64 gxid`.
pub const REQ_GETSTATUS: u8 = 0x04;
/// Close the channel. No payload, no reply.
pub const MSG_DISCONNECT: u8 = 0x05;

/// Successful reply.
pub const RES_OK: u8 = 0x10;
/// Error reply. Payload: `u8 errorKind`.
pub const RES_ERROR: u8 = 0xFF;

// ── Vote bytes (REQ_SETSTATUS payload) ───────────────────────────────────

pub const VOTE_COMMIT: u8 = 1;
pub const VOTE_ABORT: u8 = 2;

// ── Status bytes (REQ_GETSTATUS / terminal REQ_SETSTATUS replies) ────────

pub const STATUS_IN_PROGRESS: u8 = 0;
pub const STATUS_COMMITTED: u8 = 1;
pub const STATUS_ABORTED: u8 = 2;

// ── Error kind bytes (RES_ERROR payload) ─────────────────────────────────

pub const ERR_MALFORMED_REQUEST: u8 = 1;
pub const ERR_UNKNOWN_XID: u8 = 2;
pub const ERR_DUPLICATE_VOTE: u8 = 3;
pub const ERR_CAPACITY_EXHAUSTED: u8 = 4;
pub const ERR_INTERNAL: u8 = 5;

/// One whole message peeled off a connection's input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u8,
    pub chan: u32,
    pub payload: bytes::Bytes,
}

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Start { participants: Vec<Participant> },
    Snapshot { gxid: Gxid },
    SetStatus { gxid: Gxid, node: NodeId, vote: Vote },
    GetStatus { gxid: Gxid },
    Disconnect,
}

/// A reply on its way out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Started { gxid: Gxid },
    Snapshot(Snapshot),
    Status(TxnStatus),
    Error(u8),
}

/// Wire byte for a transaction status.
pub fn status_byte(status: TxnStatus) -> u8 {
    match status {
        TxnStatus::InProgress => STATUS_IN_PROGRESS,
        TxnStatus::Committed => STATUS_COMMITTED,
        TxnStatus::Aborted => STATUS_ABORTED,
    }
}

/// Wire error kind for a coordinator error.
pub fn error_kind_byte(err: &CoordinatorError) -> u8 {
    match err {
        CoordinatorError::MalformedRequest(_) => ERR_MALFORMED_REQUEST,
        CoordinatorError::UnknownXid(_) => ERR_UNKNOWN_XID,
        CoordinatorError::DuplicateVote { .. } => ERR_DUPLICATE_VOTE,
        CoordinatorError::CapacityExhausted(_) => ERR_CAPACITY_EXHAUSTED,
        CoordinatorError::Internal(_) => ERR_INTERNAL,
    }
}
