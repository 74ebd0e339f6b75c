use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinSet,
};
use tracing::{debug, info, warn};
use utilities::shutdown::Shutdown;

use crate::models::TelemetrySnapshot;

/// Latest-value channel between the state monitor and telemetry subscribers.
/// Slow subscribers skip intermediate snapshots.
pub type TelemetryReceiver = watch::Receiver<Option<TelemetrySnapshot>>;
pub type TelemetrySender = watch::Sender<Option<TelemetrySnapshot>>;

pub fn telemetry_channel() -> (TelemetrySender, TelemetryReceiver) {
    watch::channel(None)
}

pub fn encode(snapshot: &TelemetrySnapshot) -> Result<String> {
    let mut line = serde_json::to_string(snapshot).context("Failed to encode telemetry")?;
    line.push('\n');
    Ok(line)
}

/// Accepts telemetry subscribers until shutdown and streams every published
/// snapshot to each of them.
pub async fn run_telemetry_server(
    listener: TcpListener,
    snapshots: TelemetryReceiver,
    write_timeout: Duration,
    shutdown: Shutdown,
) -> Result<()> {
    info!(
        "Telemetry server listening on {}",
        listener
            .local_addr()
            .context("Telemetry listener has no address")?
    );
    let mut subscribers = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!("Telemetry subscriber connected: {}", peer);
                    subscribers.spawn(stream_to(
                        socket,
                        snapshots.clone(),
                        write_timeout,
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!("Failed to accept telemetry subscriber: {}", e),
            },
            Some(_) = subscribers.join_next(), if !subscribers.is_empty() => {}
        }
    }

    while subscribers.join_next().await.is_some() {}
    info!("Telemetry server stopped");
    Ok(())
}

async fn stream_to(
    mut socket: TcpStream,
    mut snapshots: TelemetryReceiver,
    write_timeout: Duration,
    shutdown: Shutdown,
) {
    let peer = socket.peer_addr().ok();
    // A new subscriber gets the current snapshot right away.
    snapshots.mark_changed();

    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let Some(snapshot) = *snapshots.borrow_and_update() else {
            continue;
        };

        let line = match encode(&snapshot) {
            Ok(line) => line,
            Err(e) => {
                warn!("{:#}", e);
                continue;
            }
        };

        match tokio::time::timeout(write_timeout, socket.write_all(line.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Telemetry subscriber {:?} gone: {}", peer, e);
                break;
            }
            Err(_) => {
                warn!("Telemetry subscriber {:?} too slow, dropping", peer);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GimbalLinkState;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn subscribers_receive_current_and_new_snapshots() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = telemetry_channel();
        let shutdown = Shutdown::new();

        tx.send_replace(Some(TelemetrySnapshot {
            axis1_degrees: 1.0,
            ..Default::default()
        }));

        let server = tokio::spawn(run_telemetry_server(
            listener,
            rx,
            Duration::from_millis(500),
            shutdown.clone(),
        ));

        let socket = TcpStream::connect(addr).await.unwrap();
        let mut lines = BufReader::new(socket).lines();

        let first: TelemetrySnapshot =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.axis1_degrees, 1.0);

        tx.send_replace(Some(TelemetrySnapshot {
            link_state: GimbalLinkState::Ready,
            ..Default::default()
        }));
        let second: TelemetrySnapshot =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second.link_state, GimbalLinkState::Ready);

        shutdown.trigger();
        server.await.unwrap().unwrap();
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
