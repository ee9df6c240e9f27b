// ABOUTME: WebSocket terminal bridge between a client and a TTY exec in a sandbox
// ABOUTME: Two copy loops with correlated teardown; either side closing ends both

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::Docker;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::AppState;

/// One downstream binary frame carries at most this many bytes.
const FRAME_BYTES: usize = 1024;

/// `GET /terminal/{sandbox_id}`: refuse unknown sandboxes before upgrading,
/// then hand the socket to the bridge. The registry is consulted exactly
/// once; the bridge talks to the runtime client directly from then on.
pub async fn terminal_handler(
    ws: WebSocketUpgrade,
    Path(sandbox_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let container_id = match state.provider.get_handle(&sandbox_id).await {
        Ok(handle) => handle,
        Err(_) => return (StatusCode::NOT_FOUND, "sandbox not found").into_response(),
    };

    let docker = state.provider.raw_client().clone();
    ws.on_upgrade(move |socket| bridge(socket, docker, sandbox_id, container_id))
}

async fn bridge(socket: WebSocket, docker: Docker, sandbox_id: String, container_id: String) {
    let options = CreateExecOptions {
        cmd: Some(vec!["/bin/sh".to_string()]),
        tty: Some(true),
        attach_stdin: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        ..Default::default()
    };

    let exec = match docker.create_exec(&container_id, options).await {
        Ok(exec) => exec,
        Err(e) => return close_with_error(socket, format!("Error: {e}")).await,
    };

    let start_options = StartExecOptions {
        tty: true,
        ..Default::default()
    };
    let (output, mut input) = match docker.start_exec(&exec.id, Some(start_options)).await {
        Ok(StartExecResults::Attached { output, input }) => (output, input),
        Ok(StartExecResults::Detached) => {
            return close_with_error(socket, "Error: exec was detached".to_string()).await
        }
        Err(e) => return close_with_error(socket, format!("Error: {e}")).await,
    };

    debug!("terminal attached to sandbox {}", sandbox_id);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // container -> client
    let mut downstream = tokio::spawn(async move {
        let mut output = output;
        while let Some(chunk) = output.next().await {
            let message = match chunk {
                Ok(out) => out.into_bytes(),
                Err(e) => {
                    debug!("terminal read from container failed: {}", e);
                    return;
                }
            };
            for frame in message.chunks(FRAME_BYTES) {
                if ws_tx
                    .send(Message::Binary(Bytes::copy_from_slice(frame)))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    });

    // client -> container stdin; text and binary frames alike. Pings are
    // answered by the websocket layer itself; resize is not supported in v1,
    // the TTY keeps the runtime's default dimensions.
    let mut upstream = tokio::spawn(async move {
        while let Some(message) = ws_rx.next().await {
            let message = match message {
                Ok(m) => m,
                Err(_) => return,
            };
            let payload: Bytes = match message {
                Message::Binary(b) => b,
                Message::Text(t) => Bytes::copy_from_slice(t.as_bytes()),
                Message::Close(_) => return,
                _ => continue,
            };
            if input.write_all(&payload).await.is_err() {
                return;
            }
        }
    });

    // Either loop ending tears the other down. Aborting drops that side's
    // stream half, which closes the underlying connection and unblocks its
    // pending read.
    tokio::select! {
        _ = &mut downstream => upstream.abort(),
        _ = &mut upstream => downstream.abort(),
    }

    debug!("terminal for sandbox {} closed", sandbox_id);
}

/// Setup failures surface as a single diagnostic frame before the close.
async fn close_with_error(mut socket: WebSocket, message: String) {
    warn!("terminal setup failed: {}", message);
    let _ = socket.send(Message::Text(message.into())).await;
    let _ = socket.send(Message::Close(None)).await;
}
