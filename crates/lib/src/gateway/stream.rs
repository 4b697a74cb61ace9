//! Streaming adapter: one ingest per inbound frame, accepted frames echoed back.
//!
//! A rejected frame closes the connection unless `stream.onReject` is "continue".
//! A failed frame (undecodable payload or store fault) always closes it.

use super::protocol::StreamNotice;
use super::server::{GatewayState, SHUTDOWN_EVENT_JSON};
use crate::config::RejectPolicy;
use crate::message::Channel;
use crate::pipeline::{IngestError, Outcome};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use std::borrow::Cow;
use tokio::sync::broadcast;

/// What the loop does after handling one frame.
enum Next {
    Continue,
    Close { code: u16, reason: String },
}

pub(crate) async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let mut event_rx = state.event_tx.subscribe();
    let policy = state.config.stream.clone();
    let mut accepted = 0usize;

    loop {
        tokio::select! {
            biased;

            event = event_rx.recv() => {
                match event {
                    Ok(text) => {
                        let is_shutdown = text == SHUTDOWN_EVENT_JSON;
                        let _ = socket.send(Message::Text(text)).await;
                        if is_shutdown {
                            close(&mut socket, close_code::AWAY, "server shutting down").await;
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("stream client lagged {} broadcast messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            frame = socket.recv() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        log::debug!("stream read error: {}", e);
                        break;
                    }
                    None => break,
                };
                let payload: Vec<u8> = match &frame {
                    Message::Text(text) => text.as_bytes().to_vec(),
                    Message::Binary(bytes) => bytes.clone(),
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                let next = match state.pipeline.ingest(&payload, Channel::Stream).await {
                    Outcome::Accepted(_) => {
                        accepted += 1;
                        if let Err(e) = socket.send(frame).await {
                            log::debug!("stream write error: {}", e);
                            break;
                        }
                        Next::Continue
                    }
                    Outcome::Rejected(reason) => match policy.on_reject {
                        RejectPolicy::Close => Next::Close {
                            code: close_code::POLICY,
                            reason: reason.to_string(),
                        },
                        RejectPolicy::Continue => {
                            if policy.notices {
                                let notice = StreamNotice::rejected(reason.to_string());
                                if socket.send(Message::Text(notice.to_json())).await.is_err() {
                                    break;
                                }
                            }
                            Next::Continue
                        }
                    },
                    Outcome::Failed(e) => {
                        let code = match &e {
                            IngestError::Decode(_) => close_code::INVALID,
                            _ => close_code::ERROR,
                        };
                        Next::Close { code, reason: e.to_string() }
                    }
                };

                if let Next::Close { code, reason } = next {
                    if policy.notices {
                        let notice = StreamNotice::closed(reason.clone());
                        let _ = socket.send(Message::Text(notice.to_json())).await;
                    }
                    close(&mut socket, code, &reason).await;
                    break;
                }
            }
        }
    }

    log::debug!("stream disconnected after {} accepted message(s)", accepted);
}

/// Send a close frame; the reason is cut to the protocol's 123-byte limit.
async fn close(socket: &mut WebSocket, code: u16, reason: &str) {
    let mut end = reason.len().min(123);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    let frame = CloseFrame {
        code,
        reason: Cow::Owned(reason[..end].to_string()),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
