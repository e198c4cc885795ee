//! Per-connection framed transport.
//!
//! Each connection is served by one reader task (decoding frames and
//! dispatching them in arrival order) and one writer task (draining the
//! outbound frame queue). Parked replies are delivered through the same
//! queue when the coordinator releases the waiter, so a connection's
//! frames always leave through a single ordered path.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::mpsc;

use kestrel_common::types::{ChannelId, ChannelKey, ConnId};
use kestrel_proto::{decode_frame, encode_reply, Reply, MSG_DISCONNECT};

use crate::config::ServerConfig;
use crate::dispatch::{ChannelHandler, DispatchOutcome};
use crate::registry::ChannelTable;

/// Outbound frames queued per connection before the writer drains them.
/// A full queue exerts backpressure on the producer, the moral equivalent
/// of blocking until the output buffer flushes.
const OUTBOUND_QUEUE_FRAMES: usize = 64;

/// Serve one connection until EOF, an I/O error, or a framing violation.
/// Every occupied channel receives its `disconnected` callback on every
/// exit path.
pub async fn handle_connection<S, H>(
    stream: S,
    conn_id: ConnId,
    handler: Arc<H>,
    config: &ServerConfig,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    H: ChannelHandler,
{
    let buffer_size = config.buffer_size;
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE_FRAMES);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = write_half.write_all(&frame).await {
                tracing::debug!("write failed: {}", e);
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut channels = ChannelTable::new(config.max_channels);
    let result = serve_frames(
        &mut read_half,
        &mut channels,
        conn_id,
        &handler,
        &out_tx,
        buffer_size,
    )
    .await;

    // Teardown: the disconnect callback fires for every occupied channel
    // regardless of how the connection ended. This drops any park slots
    // the coordinator still holds for them.
    for chan in channels.drain() {
        handler.disconnected(ChannelKey {
            conn: conn_id,
            chan: ChannelId(chan),
        });
    }

    // Closing our sender lets the writer drain what is already queued and
    // exit. Parked tasks hold clones, but their oneshot senders were just
    // dropped by the disconnect callbacks above, so they exit too.
    drop(out_tx);
    let _ = writer.await;

    result
}

async fn serve_frames<S, H>(
    read_half: &mut ReadHalf<S>,
    channels: &mut ChannelTable,
    conn_id: ConnId,
    handler: &Arc<H>,
    out_tx: &mpsc::Sender<Bytes>,
    buffer_size: usize,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    H: ChannelHandler,
{
    let mut input = BytesMut::with_capacity(buffer_size);

    loop {
        // A complete frame never exceeds buffer_size, so the leftover tail
        // is always smaller than that; cap the buffer there.
        input.reserve((buffer_size.saturating_sub(input.len())).max(1));
        let n = read_half.read_buf(&mut input).await?;
        if n == 0 {
            tracing::debug!("eof on conn {}", conn_id.0);
            return Ok(());
        }

        loop {
            let frame = match decode_frame(&mut input, buffer_size) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("framing violation on conn {}: {}", conn_id.0, e);
                    kestrel_observability::record_protocol_violation();
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
                }
            };

            let first_seen = match channels.admit(frame.chan) {
                Ok(first_seen) => first_seen,
                Err(e) => {
                    tracing::warn!("framing violation on conn {}: {}", conn_id.0, e);
                    kestrel_observability::record_protocol_violation();
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
                }
            };

            let key = ChannelKey {
                conn: conn_id,
                chan: ChannelId(frame.chan),
            };
            if first_seen {
                handler.connected(key);
            }

            if frame.code == MSG_DISCONNECT {
                handler.disconnected(key);
                channels.release(frame.chan);
                continue;
            }

            match handler.message(key, frame.code, &frame.payload) {
                DispatchOutcome::Reply(reply) => {
                    send_reply(out_tx, frame.chan, &reply, buffer_size).await?;
                }
                DispatchOutcome::Parked(rx) => {
                    let out = out_tx.clone();
                    let chan = frame.chan;
                    tokio::spawn(async move {
                        // The sender fires exactly once, from the vote that
                        // terminalizes the transaction. A dropped sender
                        // means this channel disconnected before the
                        // decision, and nothing is sent.
                        if let Ok(status) = rx.await {
                            let _ =
                                send_reply(&out, chan, &Reply::Status(status), buffer_size).await;
                        }
                    });
                }
                DispatchOutcome::NoReply => {}
            }
        }
    }
}

async fn send_reply(
    out: &mpsc::Sender<Bytes>,
    chan: u32,
    reply: &Reply,
    max_frame: usize,
) -> io::Result<()> {
    let frame = encode_reply(chan, reply, max_frame)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    out.send(frame)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer gone"))
}
