//! Command dispatcher: parses frames into typed requests, invokes the
//! coordinator, and decides whether the reply goes out now or waits.

use std::sync::Arc;

use tokio::sync::oneshot;

use kestrel_common::error::CoordinatorError;
use kestrel_common::types::{ChannelKey, TxnStatus};
use kestrel_coordinator::{Coordinator, SetStatusOutcome};
use kestrel_proto::{
    decode_request, error_kind_byte, Reply, Request, ERR_MALFORMED_REQUEST,
};

/// What the transport should do with a handled message.
pub enum DispatchOutcome {
    /// Send this reply on the same channel now.
    Reply(Reply),
    /// The channel is parked; produce the reply when the receiver fires.
    Parked(oneshot::Receiver<TxnStatus>),
    /// Nothing to send.
    NoReply,
}

/// The upper layer as seen from the transport: channel lifecycle plus
/// message handling. The transport calls `connected` the first time a
/// channel id is seen on a connection and `disconnected` when the channel
/// (or its whole connection) goes away.
pub trait ChannelHandler: Send + Sync + 'static {
    fn connected(&self, key: ChannelKey);
    fn disconnected(&self, key: ChannelKey);
    fn message(&self, key: ChannelKey, code: u8, payload: &[u8]) -> DispatchOutcome;
}

/// The production handler: wires the wire protocol to the coordinator.
pub struct Dispatcher {
    coordinator: Arc<Coordinator>,
    /// Requests with payloads beyond this are rejected as malformed,
    /// matching the transport's buffer capacity.
    max_payload: usize,
}

impl Dispatcher {
    pub fn new(coordinator: Arc<Coordinator>, max_payload: usize) -> Self {
        Self {
            coordinator,
            max_payload,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    fn error_reply(err: &CoordinatorError) -> DispatchOutcome {
        DispatchOutcome::Reply(Reply::Error(error_kind_byte(err)))
    }
}

impl ChannelHandler for Dispatcher {
    fn connected(&self, key: ChannelKey) {
        tracing::debug!("channel up: {}", key);
    }

    fn disconnected(&self, key: ChannelKey) {
        tracing::debug!("channel down: {}", key);
        self.coordinator.channel_closed(key);
    }

    fn message(&self, key: ChannelKey, code: u8, payload: &[u8]) -> DispatchOutcome {
        if payload.len() > self.max_payload {
            tracing::warn!(
                "oversize request on {}: {} bytes (max {})",
                key,
                payload.len(),
                self.max_payload
            );
            return DispatchOutcome::Reply(Reply::Error(ERR_MALFORMED_REQUEST));
        }

        let request = match decode_request(code, payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("unparsable request on {}: {}", key, e);
                return DispatchOutcome::Reply(Reply::Error(ERR_MALFORMED_REQUEST));
            }
        };

        match request {
            Request::Start { participants } => {
                match self.coordinator.start_transaction(participants) {
                    Ok(gxid) => {
                        kestrel_observability::record_txn_decision("started");
                        DispatchOutcome::Reply(Reply::Started { gxid })
                    }
                    Err(e) => Self::error_reply(&e),
                }
            }
            Request::Snapshot { gxid } => match self.coordinator.snapshot(gxid) {
                Ok(snapshot) => {
                    kestrel_observability::record_snapshot_issued();
                    DispatchOutcome::Reply(Reply::Snapshot(snapshot))
                }
                Err(e) => Self::error_reply(&e),
            },
            Request::SetStatus { gxid, node, vote } => {
                match self.coordinator.set_status(key, gxid, node, vote) {
                    Ok(SetStatusOutcome::Decided(status)) => {
                        DispatchOutcome::Reply(Reply::Status(status))
                    }
                    Ok(SetStatusOutcome::Parked(rx)) => DispatchOutcome::Parked(rx),
                    Err(e) => Self::error_reply(&e),
                }
            }
            Request::GetStatus { gxid } => match self.coordinator.get_status(gxid) {
                Ok(status) => DispatchOutcome::Reply(Reply::Status(status)),
                Err(e) => Self::error_reply(&e),
            },
            // The transport intercepts disconnects before dispatch; seeing
            // one here means a caller fed us a raw frame directly.
            Request::Disconnect => DispatchOutcome::NoReply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::types::{ChannelId, ConnId, Gxid};
    use kestrel_coordinator::CoordinatorConfig;
    use kestrel_proto::{
        ERR_UNKNOWN_XID, REQ_GETSTATUS, REQ_SETSTATUS, REQ_START, VOTE_COMMIT,
    };

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(Coordinator::new(CoordinatorConfig::default())),
            1024,
        )
    }

    fn key(conn: u64) -> ChannelKey {
        ChannelKey {
            conn: ConnId(conn),
            chan: ChannelId(1),
        }
    }

    fn start_payload(pairs: &[(u32, u64)]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(pairs.len() as u32).to_le_bytes());
        for (node, xid) in pairs {
            payload.extend_from_slice(&node.to_le_bytes());
            payload.extend_from_slice(&xid.to_le_bytes());
        }
        payload
    }

    fn setstatus_payload(gxid: u64, node: u32, vote: u8) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&gxid.to_le_bytes());
        payload.extend_from_slice(&node.to_le_bytes());
        payload.push(vote);
        payload
    }

    #[test]
    fn test_start_then_getstatus() {
        let d = dispatcher();
        let outcome = d.message(key(1), REQ_START, &start_payload(&[(0, 100)]));
        match outcome {
            DispatchOutcome::Reply(Reply::Started { gxid }) => assert_eq!(gxid, Gxid(1)),
            _ => panic!("expected Started reply"),
        }

        let outcome = d.message(key(1), REQ_GETSTATUS, &1u64.to_le_bytes());
        assert!(matches!(
            outcome,
            DispatchOutcome::Reply(Reply::Status(TxnStatus::InProgress))
        ));
    }

    #[test]
    fn test_unknown_xid_maps_to_error_envelope() {
        let d = dispatcher();
        let outcome = d.message(key(1), REQ_GETSTATUS, &99999u64.to_le_bytes());
        assert!(matches!(
            outcome,
            DispatchOutcome::Reply(Reply::Error(ERR_UNKNOWN_XID))
        ));
    }

    #[test]
    fn test_garbage_payload_is_malformed() {
        let d = dispatcher();
        let outcome = d.message(key(1), REQ_GETSTATUS, &[1, 2, 3]);
        assert!(matches!(
            outcome,
            DispatchOutcome::Reply(Reply::Error(ERR_MALFORMED_REQUEST))
        ));
    }

    #[test]
    fn test_oversize_payload_is_malformed() {
        let d = Dispatcher::new(
            Arc::new(Coordinator::new(CoordinatorConfig::default())),
            8,
        );
        let outcome = d.message(key(1), REQ_START, &[0u8; 16]);
        assert!(matches!(
            outcome,
            DispatchOutcome::Reply(Reply::Error(ERR_MALFORMED_REQUEST))
        ));
    }

    #[test]
    fn test_nonfinal_vote_parks() {
        let d = dispatcher();
        d.message(key(1), REQ_START, &start_payload(&[(0, 100), (1, 200)]));

        let outcome = d.message(key(1), REQ_SETSTATUS, &setstatus_payload(1, 0, VOTE_COMMIT));
        let mut rx = match outcome {
            DispatchOutcome::Parked(rx) => rx,
            _ => panic!("expected parked channel"),
        };
        assert!(rx.try_recv().is_err());

        let outcome = d.message(key(2), REQ_SETSTATUS, &setstatus_payload(1, 1, VOTE_COMMIT));
        assert!(matches!(
            outcome,
            DispatchOutcome::Reply(Reply::Status(TxnStatus::Committed))
        ));
        assert_eq!(rx.try_recv().unwrap(), TxnStatus::Committed);
    }

    #[test]
    fn test_disconnect_callback_releases_parked_channel() {
        let d = dispatcher();
        d.message(key(1), REQ_START, &start_payload(&[(0, 100), (1, 200)]));
        let outcome = d.message(key(1), REQ_SETSTATUS, &setstatus_payload(1, 0, VOTE_COMMIT));
        assert!(matches!(outcome, DispatchOutcome::Parked(_)));

        d.disconnected(key(1));

        // The tally is untouched: node 1 still completes the quorum.
        let outcome = d.message(key(2), REQ_SETSTATUS, &setstatus_payload(1, 1, VOTE_COMMIT));
        assert!(matches!(
            outcome,
            DispatchOutcome::Reply(Reply::Status(TxnStatus::Committed))
        ));
    }
}
