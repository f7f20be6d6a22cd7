// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-connection reader and writer tasks.
//!
//! The reader frames and parses incoming commands and hands them to the
//! dispatcher tagged with the frame's request id. The writer drains the
//! connection's bounded outbound queue, serializing each response or event
//! as a wire frame. The two share only that queue and a small atomic state
//! used for the batched-result protocol rule.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::{DispatcherHandle, RequestItem};
use crate::shutdown::StopCoordinator;
use pubsub_engine::{OutboundMessage, Response, ResponseSender};
use pubsub_parser::parse;
use pubsub_wire::{Frame, FrameCodec};

/// Batched-result bookkeeping shared by the reader and writer.
///
/// Client request ids start at 1, so 0 means "none" in both fields.
#[derive(Default)]
struct StreamState {
    /// Request id of a multi-frame result whose final batch has not been
    /// written yet.
    streaming: AtomicU32,
    /// Request id whose remaining batches are discarded instead of written.
    abandoned: AtomicU32,
}

/// Runs one accepted connection to completion.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: DispatcherHandle,
    config: Arc<ServerConfig>,
    stop: Arc<StopCoordinator>,
) {
    let (read_half, write_half) = stream.into_split();
    let codec = FrameCodec::new(config.max_message_size);
    let (out_tx, out_rx) = mpsc::channel::<OutboundMessage>(config.channel_buffer_size);
    let state = Arc::new(StreamState::default());
    let (close_tx, close_rx) = watch::channel(false);

    let writer = tokio::spawn(run_writer(
        write_half,
        out_rx,
        codec.clone(),
        Arc::clone(&state),
        close_rx,
        Arc::clone(&stop),
        addr,
    ));

    run_reader(read_half, out_tx, codec, state, dispatcher, stop, addr).await;

    // Wake the writer even if nothing else closes its queue; subscriptions
    // held by tables still clone the queue sender and are pruned lazily.
    let _ = close_tx.send(true);
    let _ = writer.await;
    info!(%addr, "client disconnected");
}

async fn run_reader(
    mut read_half: OwnedReadHalf,
    out_tx: mpsc::Sender<OutboundMessage>,
    codec: FrameCodec,
    state: Arc<StreamState>,
    dispatcher: DispatcherHandle,
    stop: Arc<StopCoordinator>,
    addr: SocketAddr,
) {
    stop.worker_started();
    let mut stop_rx = stop.subscribe();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            frame = codec.read_frame(&mut read_half) => {
                match frame {
                    Ok(Some(frame)) => {
                        if !on_frame(frame, &out_tx, &state, &dispatcher, &stop).await {
                            break;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%addr, "dropping connection: {}", e);
                        break;
                    },
                }
            }
        }
    }

    stop.worker_finished();
}

/// Handles one inbound frame; returns false when the connection should end.
async fn on_frame(
    frame: Frame,
    out_tx: &mpsc::Sender<OutboundMessage>,
    state: &StreamState,
    dispatcher: &DispatcherHandle,
    stop: &StopCoordinator,
) -> bool {
    let payload = String::from_utf8_lossy(&frame.payload);
    let command = payload.trim();

    if command.eq_ignore_ascii_case("close") {
        return false;
    }

    let sender = ResponseSender::new(frame.request_id, out_tx.clone());

    // A client must consume a batched result to completion before issuing
    // another command; the remaining batches of the old result are
    // discarded and the new command is rejected.
    let streaming = state.streaming.load(Ordering::SeqCst);
    if streaming != 0 {
        state.abandoned.store(streaming, Ordering::SeqCst);
        state.streaming.store(0, Ordering::SeqCst);
        sender
            .send(Response::error("previous result was not fully read"))
            .await;
        return true;
    }

    match parse(command) {
        Ok(request) => {
            debug!(request_id = frame.request_id, %request, "dispatching");
            dispatcher
                .accept(RequestItem { request, sender }, stop)
                .await;
        },
        Err(e) => {
            sender.send(Response::error(e.to_string())).await;
        },
    }
    true
}

async fn run_writer(
    mut write_half: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<OutboundMessage>,
    codec: FrameCodec,
    state: Arc<StreamState>,
    mut close_rx: watch::Receiver<bool>,
    stop: Arc<StopCoordinator>,
    addr: SocketAddr,
) {
    stop.worker_started();
    let mut stop_rx = stop.subscribe();

    loop {
        let message = tokio::select! {
            _ = stop_rx.changed() => break,
            _ = close_rx.changed() => break,
            message = out_rx.recv() => match message {
                Some(message) => message,
                None => break,
            }
        };

        if message.request_id != 0
            && message.request_id == state.abandoned.load(Ordering::SeqCst)
        {
            continue;
        }

        if let Response::Select { rows, torow, .. } = &message.response {
            if torow < rows {
                state.streaming.store(message.request_id, Ordering::SeqCst);
            } else {
                state.streaming.store(0, Ordering::SeqCst);
            }
        }

        let payload = match serde_json::to_vec(&message.response.to_json()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(%addr, "failed to serialize response: {}", e);
                continue;
            },
        };

        let frame = Frame::new(message.request_id, payload);
        if let Err(e) = codec.write_frame(&mut write_half, &frame).await {
            debug!(%addr, "write failed, closing connection: {}", e);
            break;
        }
    }

    stop.worker_finished();
}
