//! The coordinator state machine: global-transaction table, gxid
//! generator, snapshot issue, vote tally, and parked commit waiters.
//!
//! Every operation runs inside one exclusive critical section over the
//! whole coordinator state. That single lock is what the contract rests
//! on: gxids are assigned in the same section that makes the transaction
//! visible to snapshots, snapshots are totally ordered, and a parked
//! waiter is released exactly once, synchronously from the critical
//! section of the vote that terminalizes its transaction.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use kestrel_common::error::CoordinatorError;
use kestrel_common::types::{
    ChannelKey, Gxid, NodeId, Participant, Snapshot, TxnStatus, Vote,
};

/// Coordinator sizing limits.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Max concurrently in-progress global transactions.
    pub max_transactions: usize,
    /// How many terminal transactions stay queryable before pruning.
    pub retained_terminal: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_transactions: 4096,
            retained_terminal: 4096,
        }
    }
}

/// A channel whose `SetStatus` reply is deferred until the transaction it
/// voted on reaches a terminal status.
struct ParkedWaiter {
    key: ChannelKey,
    tx: oneshot::Sender<TxnStatus>,
}

/// One entry in the global-transaction table.
struct GlobalTxn {
    participants: Vec<Participant>,
    status: TxnStatus,
    /// Nodes that have voted. Distinguishes duplicate votes; its size is
    /// the received-vote count.
    voted: HashSet<NodeId>,
    waiters: Vec<ParkedWaiter>,
}

impl GlobalTxn {
    fn is_participant(&self, node: NodeId) -> bool {
        self.participants.iter().any(|p| p.node == node)
    }
}

/// Everything behind the coordinator's single critical section.
struct CoordState {
    next_gxid: Gxid,
    txns: HashMap<Gxid, GlobalTxn>,
    in_progress: BTreeSet<Gxid>,
    /// Terminal transactions in terminalization order, for bounded
    /// retention.
    terminal_order: VecDeque<Gxid>,
    /// Reverse side of the parked-waiter relation, reconciled on channel
    /// disconnect.
    parked_by_channel: HashMap<ChannelKey, HashSet<Gxid>>,
}

impl CoordState {
    fn new() -> Self {
        Self {
            next_gxid: Gxid(1),
            txns: HashMap::new(),
            in_progress: BTreeSet::new(),
            terminal_order: VecDeque::new(),
            parked_by_channel: HashMap::new(),
        }
    }

    /// Flip a transaction to a terminal status and release every parked
    /// waiter with it. Returns the number of waiters released.
    fn terminalize(&mut self, gxid: Gxid, status: TxnStatus, retained: usize) -> usize {
        let waiters = match self.txns.get_mut(&gxid) {
            Some(txn) => {
                txn.status = status;
                std::mem::take(&mut txn.waiters)
            }
            None => return 0,
        };

        let released = waiters.len();
        for waiter in waiters {
            if let Some(parked) = self.parked_by_channel.get_mut(&waiter.key) {
                parked.remove(&gxid);
                if parked.is_empty() {
                    self.parked_by_channel.remove(&waiter.key);
                }
            }
            // A waiter whose channel already died simply never hears back.
            let _ = waiter.tx.send(status);
        }

        self.in_progress.remove(&gxid);
        self.terminal_order.push_back(gxid);
        while self.terminal_order.len() > retained {
            if let Some(old) = self.terminal_order.pop_front() {
                self.txns.remove(&old);
            }
        }

        released
    }
}

/// Outcome of a `SetStatus` call.
#[derive(Debug)]
pub enum SetStatusOutcome {
    /// The transaction is terminal; reply now.
    Decided(TxnStatus),
    /// The vote was tallied but the decision is still open. The receiver
    /// fires exactly once, with the terminal status, when the last vote
    /// arrives.
    Parked(oneshot::Receiver<TxnStatus>),
}

/// Aggregate coordinator statistics for observability.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    pub started: u64,
    pub committed: u64,
    pub aborted: u64,
    pub snapshots: u64,
    pub duplicate_votes: u64,
    pub in_progress: usize,
    pub parked_waiters: usize,
}

struct StatsCollector {
    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    snapshots: AtomicU64,
    duplicate_votes: AtomicU64,
}

impl StatsCollector {
    fn new() -> Self {
        Self {
            started: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            snapshots: AtomicU64::new(0),
            duplicate_votes: AtomicU64::new(0),
        }
    }
}

/// The coordinator. Shared across connection tasks; all mutation is
/// serialized by the internal mutex.
pub struct Coordinator {
    config: CoordinatorConfig,
    state: Mutex<CoordState>,
    stats: StatsCollector,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CoordState::new()),
            stats: StatsCollector::new(),
        }
    }

    /// Begin a global transaction binding the given participants.
    /// Assigns and returns a fresh monotonic gxid.
    pub fn start_transaction(
        &self,
        participants: Vec<Participant>,
    ) -> Result<Gxid, CoordinatorError> {
        if participants.is_empty() {
            return Err(CoordinatorError::MalformedRequest(
                "empty participant list".into(),
            ));
        }
        let mut seen = HashSet::with_capacity(participants.len());
        for p in &participants {
            if !seen.insert(p.node) {
                return Err(CoordinatorError::MalformedRequest(format!(
                    "duplicate participant {}",
                    p.node
                )));
            }
        }

        let st = &mut *self.state.lock();
        if st.in_progress.len() >= self.config.max_transactions {
            return Err(CoordinatorError::CapacityExhausted("transaction table"));
        }

        // Assignment and insertion happen in the same critical section, so
        // no snapshot can observe a gap in the live set.
        let gxid = st.next_gxid;
        st.next_gxid = gxid.next();
        st.txns.insert(
            gxid,
            GlobalTxn {
                participants,
                status: TxnStatus::InProgress,
                voted: HashSet::new(),
                waiters: Vec::new(),
            },
        );
        st.in_progress.insert(gxid);

        self.stats.started.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("GTX begin: {}", gxid);
        Ok(gxid)
    }

    /// Issue a snapshot from the requester's perspective.
    ///
    /// `xip` is the in-progress set minus the requester; `xmin` is the
    /// oldest still-running transaction (the requester included), or
    /// `xmax` when nothing is running.
    pub fn snapshot(&self, requester: Gxid) -> Result<Snapshot, CoordinatorError> {
        let st = &mut *self.state.lock();
        if !st.txns.contains_key(&requester) {
            return Err(CoordinatorError::UnknownXid(requester));
        }

        let xmax = st.next_gxid;
        let xip: Vec<Gxid> = st
            .in_progress
            .iter()
            .copied()
            .filter(|g| *g != requester)
            .collect();
        let xmin = st.in_progress.iter().next().copied().unwrap_or(xmax);

        self.stats.snapshots.fetch_add(1, Ordering::Relaxed);
        Ok(Snapshot { xmin, xmax, xip })
    }

    /// Tally a vote. The reply is withheld until the transaction is
    /// terminal: the final vote (or any abort) decides immediately and
    /// releases every parked waiter; a non-final commit vote parks the
    /// calling channel.
    pub fn set_status(
        &self,
        key: ChannelKey,
        gxid: Gxid,
        node: NodeId,
        vote: Vote,
    ) -> Result<SetStatusOutcome, CoordinatorError> {
        let st = &mut *self.state.lock();
        let txn = st
            .txns
            .get_mut(&gxid)
            .ok_or(CoordinatorError::UnknownXid(gxid))?;

        // A vote on a decided transaction just learns the decision.
        if txn.status.is_terminal() {
            return Ok(SetStatusOutcome::Decided(txn.status));
        }
        if !txn.is_participant(node) {
            return Err(CoordinatorError::MalformedRequest(format!(
                "{node} is not a participant of {gxid}"
            )));
        }
        if !txn.voted.insert(node) {
            self.stats.duplicate_votes.fetch_add(1, Ordering::Relaxed);
            return Err(CoordinatorError::DuplicateVote { gxid, node });
        }
        let all_voted = txn.voted.len() == txn.participants.len();

        match vote {
            Vote::Abort => {
                let released = st.terminalize(gxid, TxnStatus::Aborted, self.config.retained_terminal);
                self.stats.aborted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("GTX abort: {} by {} (released {} waiter(s))", gxid, node, released);
                Ok(SetStatusOutcome::Decided(TxnStatus::Aborted))
            }
            Vote::Commit if all_voted => {
                let released = st.terminalize(gxid, TxnStatus::Committed, self.config.retained_terminal);
                self.stats.committed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("GTX commit: {} (released {} waiter(s))", gxid, released);
                Ok(SetStatusOutcome::Decided(TxnStatus::Committed))
            }
            Vote::Commit => {
                let (tx, rx) = oneshot::channel();
                if let Some(txn) = st.txns.get_mut(&gxid) {
                    txn.waiters.push(ParkedWaiter { key, tx });
                }
                st.parked_by_channel.entry(key).or_default().insert(gxid);
                tracing::debug!("GTX vote: {} commit by {}, parked {}", gxid, node, key);
                Ok(SetStatusOutcome::Parked(rx))
            }
        }
    }

    /// Current status without parking.
    pub fn get_status(&self, gxid: Gxid) -> Result<TxnStatus, CoordinatorError> {
        let st = self.state.lock();
        st.txns
            .get(&gxid)
            .map(|txn| txn.status)
            .ok_or(CoordinatorError::UnknownXid(gxid))
    }

    /// Release everything the given channel holds. Its park slots are
    /// removed; vote tallies are untouched, and other waiters on the same
    /// transactions are unaffected.
    pub fn channel_closed(&self, key: ChannelKey) {
        let st = &mut *self.state.lock();
        let Some(parked) = st.parked_by_channel.remove(&key) else {
            return;
        };
        if !parked.is_empty() {
            tracing::warn!(
                "channel {} disconnected with {} unresolved park slot(s)",
                key,
                parked.len()
            );
        }
        for gxid in parked {
            if let Some(txn) = st.txns.get_mut(&gxid) {
                txn.waiters.retain(|w| w.key != key);
            }
        }
    }

    /// Statistics snapshot for metrics export.
    pub fn stats(&self) -> CoordinatorStats {
        let st = self.state.lock();
        let parked_waiters = st.txns.values().map(|t| t.waiters.len()).sum();
        CoordinatorStats {
            started: self.stats.started.load(Ordering::Relaxed),
            committed: self.stats.committed.load(Ordering::Relaxed),
            aborted: self.stats.aborted.load(Ordering::Relaxed),
            snapshots: self.stats.snapshots.load(Ordering::Relaxed),
            duplicate_votes: self.stats.duplicate_votes.load(Ordering::Relaxed),
            in_progress: st.in_progress.len(),
            parked_waiters,
        }
    }
}
