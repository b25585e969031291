//! WebSocket session lifecycle: a single authenticated client from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocket;
use futures::StreamExt;
use huddle_core::UserId;
use huddle_hub::Hub;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::pumps::{ReadEnd, WriteEnd, read_pump, write_pump};
use crate::config::PumpConfig;
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Run a WebSocket session for an authenticated user.
///
/// 1. Registers a connection with the hub
/// 2. Spawns the write pump on the sink half
/// 3. Runs the read pump until the client leaves, idles out, is evicted or
///    the server shuts down
/// 4. Unregisters from the hub, which closes the outbound buffer and lets
///    the write pump send its close frame
#[instrument(skip_all, fields(user_id = %user))]
pub async fn serve_socket(
    socket: WebSocket,
    hub: Hub,
    user: UserId,
    pumps: PumpConfig,
    shutdown: CancellationToken,
) {
    let (conn, outbound) = match hub.connect(user) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "connection refused by hub");
            return;
        }
    };
    let started = Instant::now();
    info!(conn_id = %conn.id(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    let (sink, stream) = socket.split();

    let writer_conn = Arc::clone(&conn);
    let mut writer = tokio::spawn(async move {
        let end = write_pump(sink, outbound, pumps.ping_period, pumps.write_wait).await;
        // A dead writer must also stop the reader
        let _ = writer_conn.close();
        end
    });

    let end = read_pump(stream, &hub, &conn, pumps.pong_wait, &shutdown).await;
    let _ = hub.disconnect(conn.id());
    let _ = conn.close();

    match tokio::time::timeout(pumps.write_wait, &mut writer).await {
        Ok(Ok(WriteEnd::Drained)) => {}
        Ok(Ok(write_end)) => debug!(conn_id = %conn.id(), ?write_end, "write pump ended early"),
        Ok(Err(e)) => warn!(conn_id = %conn.id(), error = %e, "write pump task failed"),
        Err(_) => {
            debug!(conn_id = %conn.id(), "write pump did not drain in time");
            writer.abort();
        }
    }

    match &end {
        ReadEnd::Transport(reason) => {
            info!(conn_id = %conn.id(), reason, "client disconnected after transport error");
        }
        _ => info!(conn_id = %conn.id(), reason = end.as_str(), "client disconnected"),
    }
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => end.as_str()).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}
