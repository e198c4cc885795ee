use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a participant database node. Assigned by the operator,
/// opaque to the daemon; used only as a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// A node's own transaction identifier. Minted by the node, never by the
/// daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalXid(pub u64);

/// Coordinator-assigned identifier of a global transaction. Strictly
/// monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gxid(pub u64);

impl Gxid {
    pub fn next(self) -> Gxid {
        Gxid(self.0 + 1)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

impl fmt::Display for LocalXid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xid:{}", self.0)
    }
}

impl fmt::Display for Gxid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gxid:{}", self.0)
    }
}

/// One `(node, local xid)` binding inside a global transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    pub node: NodeId,
    pub local_xid: LocalXid,
}

/// Status of a global transaction. `Committed` and `Aborted` are terminal:
/// once reached, the status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    InProgress,
    Committed,
    Aborted,
}

impl TxnStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TxnStatus::InProgress)
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnStatus::InProgress => write!(f, "in-progress"),
            TxnStatus::Committed => write!(f, "committed"),
            TxnStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// A participant's vote on the outcome of a global transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Commit,
    Abort,
}

/// A cross-node snapshot as seen by one requester.
///
/// `xip` holds the transactions that were in progress at the instant of
/// issue, minus the requester itself; `xmax` is the next gxid the
/// coordinator will assign; `xmin = min(xip ∪ {xmax})`. Immutable once
/// emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub xmin: Gxid,
    pub xmax: Gxid,
    pub xip: Vec<Gxid>,
}

/// Identifier of one accepted TCP connection, unique for the lifetime of
/// the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

/// Identifier of a logical channel multiplexed on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u32);

/// Address of one client session: a channel on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub conn: ConnId,
    pub chan: ChannelId,
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}/chan:{}", self.conn.0, self.chan.0)
    }
}
