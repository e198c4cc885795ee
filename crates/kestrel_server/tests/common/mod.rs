//! Shared harness for integration tests: a daemon bound to an ephemeral
//! port and a minimal client speaking the wire format byte by byte.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use kestrel_coordinator::{Coordinator, CoordinatorConfig};
use kestrel_server::{Dispatcher, KestrelServer, ServerConfig};

// Wire constants, spelled out independently of the production codec so
// these tests pin the byte-exact format.
pub const REQ_START: u8 = 0x01;
pub const REQ_SNAPSHOT: u8 = 0x02;
pub const REQ_SETSTATUS: u8 = 0x03;
pub const REQ_GETSTATUS: u8 = 0x04;
pub const MSG_DISCONNECT: u8 = 0x05;
pub const RES_OK: u8 = 0x10;
pub const RES_ERROR: u8 = 0xFF;

pub const VOTE_COMMIT: u8 = 1;
pub const VOTE_ABORT: u8 = 2;

pub const STATUS_IN_PROGRESS: u8 = 0;
pub const STATUS_COMMITTED: u8 = 1;
pub const STATUS_ABORTED: u8 = 2;

pub const ERR_MALFORMED_REQUEST: u8 = 1;
pub const ERR_UNKNOWN_XID: u8 = 2;
pub const ERR_DUPLICATE_VOTE: u8 = 3;

/// Start a daemon on an ephemeral port and return its address.
pub async fn spawn_daemon() -> SocketAddr {
    spawn_daemon_with(CoordinatorConfig::default(), test_server_config()).await
}

pub fn test_server_config() -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".into(),
        max_connections: 32,
        buffer_size: 4096,
        max_channels: 64,
        listen_backlog: 16,
    }
}

pub async fn spawn_daemon_with(
    coord_config: CoordinatorConfig,
    server_config: ServerConfig,
) -> SocketAddr {
    let coordinator = Arc::new(Coordinator::new(coord_config));
    let max_payload = server_config.buffer_size - 9;
    let dispatcher = Arc::new(Dispatcher::new(coordinator, max_payload));
    let server = KestrelServer::bind(server_config, dispatcher)
        .await
        .expect("bind test daemon");
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = server.serve().await;
    });
    addr
}

/// A test client on one TCP connection, multiplexing channels by hand.
pub struct TestClient {
    stream: TcpStream,
}

/// A reply frame as raw parts.
#[derive(Debug)]
pub struct RawReply {
    pub code: u8,
    pub chan: u32,
    pub payload: Vec<u8>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        stream.set_nodelay(true).expect("nodelay");
        Self { stream }
    }

    pub async fn send_frame(&mut self, code: u8, chan: u32, payload: &[u8]) {
        let mut buf = Vec::with_capacity(9 + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.push(code);
        buf.extend_from_slice(&chan.to_le_bytes());
        buf.extend_from_slice(payload);
        self.stream.write_all(&buf).await.expect("send frame");
    }

    /// Send raw bytes, bypassing framing. For protocol-violation tests.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("send raw");
    }

    pub async fn read_reply(&mut self) -> RawReply {
        let mut header = [0u8; 9];
        self.stream
            .read_exact(&mut header)
            .await
            .expect("read reply header");
        let size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let code = header[4];
        let chan = u32::from_le_bytes([header[5], header[6], header[7], header[8]]);
        let mut payload = vec![0u8; size];
        self.stream
            .read_exact(&mut payload)
            .await
            .expect("read reply payload");
        RawReply {
            code,
            chan,
            payload,
        }
    }

    /// True when the server closed this connection (clean FIN or reset).
    pub async fn server_closed(&mut self) -> bool {
        let mut probe = [0u8; 1];
        matches!(self.stream.read(&mut probe).await, Ok(0) | Err(_))
    }

    // ── Request helpers ──────────────────────────────────────────────────

    pub async fn send_start(&mut self, chan: u32, participants: &[(u32, u64)]) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(participants.len() as u32).to_le_bytes());
        for (node, xid) in participants {
            payload.extend_from_slice(&node.to_le_bytes());
            payload.extend_from_slice(&xid.to_le_bytes());
        }
        self.send_frame(REQ_START, chan, &payload).await;
    }

    /// `REQ_START` round trip; returns the assigned gxid.
    pub async fn start(&mut self, chan: u32, participants: &[(u32, u64)]) -> u64 {
        self.send_start(chan, participants).await;
        let reply = self.read_reply().await;
        assert_eq!(reply.code, RES_OK, "start failed: {:?}", reply);
        assert_eq!(reply.chan, chan);
        u64::from_le_bytes(reply.payload.as_slice().try_into().expect("gxid payload"))
    }

    pub async fn send_set_status(&mut self, chan: u32, gxid: u64, node: u32, vote: u8) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&gxid.to_le_bytes());
        payload.extend_from_slice(&node.to_le_bytes());
        payload.push(vote);
        self.send_frame(REQ_SETSTATUS, chan, &payload).await;
    }

    /// `REQ_SETSTATUS` round trip; returns the terminal status byte.
    pub async fn set_status(&mut self, chan: u32, gxid: u64, node: u32, vote: u8) -> u8 {
        self.send_set_status(chan, gxid, node, vote).await;
        self.read_status_reply(chan).await
    }

    /// Read a one-byte status reply on the given channel.
    pub async fn read_status_reply(&mut self, chan: u32) -> u8 {
        let reply = self.read_reply().await;
        assert_eq!(reply.code, RES_OK, "status request failed: {:?}", reply);
        assert_eq!(reply.chan, chan);
        assert_eq!(reply.payload.len(), 1);
        reply.payload[0]
    }

    /// `REQ_GETSTATUS` round trip; returns the status byte or the error
    /// kind.
    pub async fn get_status(&mut self, chan: u32, gxid: u64) -> Result<u8, u8> {
        self.send_frame(REQ_GETSTATUS, chan, &gxid.to_le_bytes())
            .await;
        let reply = self.read_reply().await;
        assert_eq!(reply.chan, chan);
        assert_eq!(reply.payload.len(), 1);
        match reply.code {
            RES_OK => Ok(reply.payload[0]),
            RES_ERROR => Err(reply.payload[0]),
            other => panic!("unexpected reply code 0x{other:02x}"),
        }
    }

    /// `REQ_SNAPSHOT` round trip; returns `(xmin, xmax, xip)`.
    pub async fn snapshot(&mut self, chan: u32, gxid: u64) -> (u64, u64, Vec<u64>) {
        self.send_frame(REQ_SNAPSHOT, chan, &gxid.to_le_bytes())
            .await;
        let reply = self.read_reply().await;
        assert_eq!(reply.code, RES_OK, "snapshot failed: {:?}", reply);
        assert_eq!(reply.chan, chan);

        let buf = reply.payload.as_slice();
        let xmin = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let xmax = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let n = u32::from_le_bytes(buf[16..20].try_into().unwrap()) as usize;
        assert_eq!(buf.len(), 20 + n * 8);
        let xip = (0..n)
            .map(|i| u64::from_le_bytes(buf[20 + i * 8..28 + i * 8].try_into().unwrap()))
            .collect();
        (xmin, xmax, xip)
    }

    pub async fn disconnect_channel(&mut self, chan: u32) {
        self.send_frame(MSG_DISCONNECT, chan, &[]).await;
    }
}
