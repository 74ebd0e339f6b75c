use std::{sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tracing::{debug, info, instrument, warn};
use utilities::shutdown::Shutdown;

use crate::{
    command_executor::accessory::command_sender::AccessoryCommandSender,
    communication::commands::{GimbalCommand, Reply, parse_command},
    context::SharedContext,
    models::GimbalLinkState,
};

/// Executes parsed commands against the shared context.
pub struct CommandService {
    context: Arc<SharedContext>,
    accessories: AccessoryCommandSender,
    max_spray: Duration,
}

impl CommandService {
    pub fn new(
        context: Arc<SharedContext>,
        accessories: AccessoryCommandSender,
        max_spray: Duration,
    ) -> Self {
        Self {
            context,
            accessories,
            max_spray,
        }
    }

    pub async fn handle_line(&self, line: &str) -> Reply {
        match parse_command(line) {
            Ok(command) => self.execute(command).await,
            Err(e) => {
                debug!("Rejected request {:?}: {}", line.trim(), e);
                Reply::error(e.to_string())
            }
        }
    }

    pub async fn execute(&self, command: GimbalCommand) -> Reply {
        let link_state = self.context.link_state();

        match command {
            GimbalCommand::Move {
                axis,
                position_degrees,
            } => {
                if !link_state.is_ready() {
                    return Reply::error(format!("not ready ({})", link_state));
                }
                let handle = self.context.axis(axis);
                match handle.scale().checked_steps(position_degrees) {
                    Some(target) => {
                        handle.request_move(target);
                        Reply::ok()
                    }
                    None => Reply::error("position_degrees out of range"),
                }
            }
            GimbalCommand::Stop { axis } => {
                self.context.axis(axis).request_stop();
                Reply::ok()
            }
            GimbalCommand::Enable { axis, on } => {
                if !link_state.is_ready() {
                    return Reply::error(format!("not ready ({})", link_state));
                }
                self.context.axis(axis).request_outputs(on);
                Reply::ok()
            }
            GimbalCommand::Laser { on } => match self.accessories.set_laser(on).await {
                Ok(()) => Reply::ok(),
                Err(e) => Reply::error(format!("laser: {}", e)),
            },
            GimbalCommand::Spray { duration_seconds } => {
                if !(duration_seconds.is_finite() && duration_seconds > 0.0) {
                    return Reply::error("duration_seconds must be positive");
                }
                let seconds = duration_seconds.min(self.max_spray.as_secs_f64());
                let duration = Duration::from_secs_f64(seconds);
                match self.accessories.spray(duration).await {
                    Ok(_) => Reply::ok(),
                    Err(e) => Reply::error(format!("spray: {}", e)),
                }
            }
            GimbalCommand::Status => Reply::Status(self.context.status_report()),
            GimbalCommand::Home => {
                if link_state == GimbalLinkState::Homing {
                    return Reply::error("already homing");
                }
                self.context.request_rehome();
                Reply::ok()
            }
        }
    }
}

/// Accepts command connections until shutdown. Each connection is served by
/// its own task; all of them are joined before returning.
pub async fn run_command_server(
    listener: TcpListener,
    service: Arc<CommandService>,
    timeout: Duration,
    shutdown: Shutdown,
) -> Result<()> {
    info!(
        "Command server listening on {}",
        listener.local_addr().context("Command listener has no address")?
    );
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!("Command client connected: {}", peer);
                    connections.spawn(handle_connection(
                        socket,
                        service.clone(),
                        timeout,
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!("Failed to accept command connection: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    while connections.join_next().await.is_some() {}
    info!("Command server stopped");
    Ok(())
}

#[instrument(skip_all, fields(peer = ?socket.peer_addr().ok()))]
async fn handle_connection(
    socket: TcpStream,
    service: Arc<CommandService>,
    timeout: Duration,
    shutdown: Shutdown,
) {
    let peer = socket.peer_addr().ok();
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.triggered() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read from {:?}: {}", peer, e);
                break;
            }
        };

        let reply = tokio::time::timeout(timeout, service.handle_line(&line))
            .await
            .unwrap_or_else(|_| Reply::timeout());

        let line = reply.to_line();
        let written = tokio::time::timeout(timeout, writer.write_all(line.as_bytes())).await;
        if !matches!(written, Ok(Ok(()))) {
            warn!("Failed to reply to {:?}, dropping connection", peer);
            break;
        }
    }

    debug!("Command client {:?} disconnected", peer);
}
