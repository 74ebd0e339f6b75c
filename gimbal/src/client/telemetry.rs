use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines},
    net::{TcpStream, tcp::OwnedReadHalf},
};
use tracing::{debug, info, warn};
use utilities::shutdown::Shutdown;

use crate::{
    context::LinkStateCell,
    models::{GimbalLinkState, LinkEvent, TelemetrySnapshot},
};

/// Client-side copy of the most recent telemetry and the link state derived
/// from it.
pub struct TelemetryMirror {
    latest: Mutex<Option<TelemetrySnapshot>>,
    link: LinkStateCell,
}

impl Default for TelemetryMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryMirror {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            link: LinkStateCell::new(GimbalLinkState::Unknown),
        }
    }

    pub fn latest(&self) -> Option<TelemetrySnapshot> {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn link_state(&self) -> GimbalLinkState {
        self.link.get()
    }

    fn store(&self, snapshot: TelemetrySnapshot) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }
}

/// Declares the link lost after a silence longer than `threshold`, and puts
/// the pre-loss state back as soon as telemetry resumes.
pub struct LinkWatchdog {
    threshold: Duration,
    last_heard: Instant,
    stashed: Option<GimbalLinkState>,
    received_any: bool,
}

impl LinkWatchdog {
    /// The clock starts now, so a gimbal that never answers is declared
    /// lost after one threshold.
    pub fn new(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            last_heard: now,
            stashed: None,
            received_any: false,
        }
    }

    pub fn on_telemetry(
        &mut self,
        snapshot: TelemetrySnapshot,
        now: Instant,
        mirror: &TelemetryMirror,
    ) {
        self.last_heard = now;
        mirror.store(snapshot);

        if let Some(stashed) = self.stashed.take() {
            mirror.link.apply(LinkEvent::TelemetryRestored(stashed));
        }

        let event = if self.received_any {
            LinkEvent::TelemetryReported(snapshot.link_state)
        } else {
            self.received_any = true;
            LinkEvent::FirstTelemetry(snapshot.link_state)
        };
        mirror.link.apply(event);
    }

    /// Called whenever a poll window passes without telemetry.
    pub fn on_silence(&mut self, now: Instant, mirror: &TelemetryMirror) {
        if now.saturating_duration_since(self.last_heard) <= self.threshold {
            return;
        }

        let current = mirror.link_state();
        if current != GimbalLinkState::NotFound {
            warn!(
                "No telemetry for {:?}, gimbal link lost",
                now.saturating_duration_since(self.last_heard)
            );
            self.stashed = Some(current);
            mirror.link.apply(LinkEvent::TelemetryLost);
        }
    }
}

/// Keeps a telemetry subscription open, reconnecting as needed, and feeds the
/// watchdog until shutdown.
pub async fn run_telemetry_listener(
    addr: String,
    mirror: Arc<TelemetryMirror>,
    threshold: Duration,
    poll: Duration,
    shutdown: Shutdown,
) {
    let mut watchdog = LinkWatchdog::new(threshold, Instant::now());
    let mut lines: Option<Lines<BufReader<OwnedReadHalf>>> = None;

    while !shutdown.is_triggered() {
        if lines.is_none() {
            lines = connect(&addr, poll).await;
        }
        let Some(reader) = lines.as_mut() else {
            watchdog.on_silence(Instant::now(), &mirror);
            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = tokio::time::sleep(poll) => {}
            }
            continue;
        };

        let next = tokio::select! {
            _ = shutdown.triggered() => break,
            next = tokio::time::timeout(poll, reader.next_line()) => next,
        };

        match next {
            Ok(Ok(Some(line))) => match serde_json::from_str::<TelemetrySnapshot>(&line) {
                Ok(snapshot) => watchdog.on_telemetry(snapshot, Instant::now(), &mirror),
                Err(e) => {
                    debug!("Ignoring undecodable telemetry {:?}: {}", line, e);
                    watchdog.on_silence(Instant::now(), &mirror);
                }
            },
            Ok(Ok(None)) => {
                info!("Telemetry stream closed by {}", addr);
                lines = None;
            }
            Ok(Err(e)) => {
                warn!("Telemetry read from {} failed: {}", addr, e);
                lines = None;
            }
            Err(_) => watchdog.on_silence(Instant::now(), &mirror),
        }
    }

    debug!("Telemetry listener stopped");
}

async fn connect(addr: &str, timeout: Duration) -> Option<Lines<BufReader<OwnedReadHalf>>> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            info!("Subscribed to telemetry at {}", addr);
            let (reader, _writer) = stream.into_split();
            Some(BufReader::new(reader).lines())
        }
        Ok(Err(e)) => {
            debug!("Telemetry connect to {} failed: {}", addr, e);
            None
        }
        Err(_) => {
            debug!("Telemetry connect to {} timed out", addr);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use GimbalLinkState::*;

    fn snapshot(link_state: GimbalLinkState) -> TelemetrySnapshot {
        TelemetrySnapshot {
            link_state,
            ..Default::default()
        }
    }

    #[test]
    fn never_heard_gimbal_is_not_found() {
        let start = Instant::now();
        let mirror = TelemetryMirror::new();
        let mut watchdog = LinkWatchdog::new(Duration::from_secs(1), start);

        watchdog.on_silence(start + Duration::from_millis(900), &mirror);
        assert_eq!(mirror.link_state(), Unknown);

        watchdog.on_silence(start + Duration::from_millis(1100), &mirror);
        assert_eq!(mirror.link_state(), NotFound);
    }

    #[test]
    fn loss_stashes_and_recovery_restores_exact_state() {
        let start = Instant::now();
        let mirror = TelemetryMirror::new();
        let mut watchdog = LinkWatchdog::new(Duration::from_secs(1), start);

        watchdog.on_telemetry(snapshot(Homing), start, &mirror);
        assert_eq!(mirror.link_state(), Homing);

        watchdog.on_silence(start + Duration::from_millis(1500), &mirror);
        assert_eq!(mirror.link_state(), NotFound);
        watchdog.on_silence(start + Duration::from_millis(2500), &mirror);
        assert_eq!(mirror.link_state(), NotFound);

        watchdog.on_telemetry(snapshot(Unknown), start + Duration::from_secs(3), &mirror);
        assert_eq!(mirror.link_state(), Homing);

        watchdog.on_telemetry(snapshot(Ready), start + Duration::from_secs(3), &mirror);
        assert_eq!(mirror.link_state(), Ready);
    }

    #[test]
    fn first_message_is_trusted() {
        let start = Instant::now();
        let mirror = TelemetryMirror::new();
        let mut watchdog = LinkWatchdog::new(Duration::from_secs(1), start);

        watchdog.on_telemetry(snapshot(HomingError), start, &mirror);
        assert_eq!(mirror.link_state(), HomingError);
        assert_eq!(mirror.latest(), Some(snapshot(HomingError)));

        watchdog.on_telemetry(snapshot(Unknown), start, &mirror);
        assert_eq!(mirror.link_state(), HomingError);
    }

    #[tokio::test]
    async fn listener_without_server_reports_not_found() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mirror = Arc::new(TelemetryMirror::new());
        let shutdown = Shutdown::new();
        let task = tokio::spawn(run_telemetry_listener(
            addr,
            mirror.clone(),
            Duration::from_millis(200),
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(mirror.link_state(), NotFound);

        shutdown.trigger();
        task.await.unwrap();
    }
}
