//! Viewer WebSocket: live bus traffic out, submissions in.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::bridge::registry::{ChannelSink, ViewerId};
use crate::bridge::Bridge;
use crate::protocol::{Envelope, Submission};

/// `GET /ws`
pub async fn viewer_socket(ws: WebSocketUpgrade, State(bridge): State<Bridge>) -> Response {
    ws.on_upgrade(move |socket| handle_viewer(socket, bridge))
}

async fn handle_viewer(socket: WebSocket, bridge: Bridge) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel::<Arc<str>>(bridge.viewer_buffer());
    let id = bridge.viewers().register(Arc::new(ChannelSink::new(tx))).await;

    let send_timeout = bridge.viewers().push_timeout();
    let mut writer = tokio::spawn(forward_frames(rx, sink, send_timeout, id));

    let inbound = bridge.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    submit_frame(&inbound, id, &text).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
    bridge.viewers().unregister(id).await;
}

/// Drain one viewer's queue into its socket.
///
/// Ends once the registry drops the queue or the socket breaks. A send
/// stalled past `send_timeout` ends it too.
async fn forward_frames<S>(
    mut rx: mpsc::Receiver<Arc<str>>,
    mut sink: S,
    send_timeout: Duration,
    viewer_id: ViewerId,
) where
    S: Sink<Message> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        match tokio::time::timeout(send_timeout, sink.send(Message::Text(frame.to_string()))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(_) => {
                tracing::warn!(
                    component = "bridge",
                    viewer_id,
                    timeout_ms = send_timeout.as_millis() as u64,
                    "Viewer socket stalled, dropping it"
                );
                break;
            }
        }
    }
    let _ = tokio::time::timeout(send_timeout, sink.close()).await;
}

/// Publish one inbound viewer frame as a broadcast.
pub(crate) async fn submit_frame(bridge: &Bridge, viewer_id: ViewerId, text: &str) -> Option<Envelope> {
    let submission: Submission = match serde_json::from_str(text) {
        Ok(submission) => submission,
        Err(e) => {
            tracing::warn!(component = "bridge", viewer_id, error = %e, "Ignoring malformed viewer frame");
            return None;
        }
    };
    if submission.is_blank() {
        tracing::debug!(component = "bridge", viewer_id, "Ignoring empty viewer message");
        return None;
    }

    match bridge.submit(submission.into_broadcast()).await {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::error!(component = "bridge", viewer_id, "Viewer message not published: {}", e);
            None
        }
    }
}
