use std::{
    io,
    sync::mpsc::{Receiver, RecvTimeoutError, Sender},
    time::Duration,
};

use tokio::sync::oneshot;
use tracing::{debug, warn};

const DEFAULT_IDLE_PERIOD: Duration = Duration::from_millis(10);

pub trait Command: Send {
    type Response: Send;
    type Handler: DeviceHandler<Command = Self>;

    fn execute(self, handler: &mut Self::Handler) -> io::Result<Self::Response>;
}

pub trait DeviceHandler {
    type Command: Command<Handler = Self>;

    /// Called between commands, at least once per idle period.
    fn on_idle(&mut self) {}
}

pub struct GenericCommand<C: Command> {
    command: C,
    response_ch: oneshot::Sender<io::Result<C::Response>>,
}

impl<C: Command> GenericCommand<C> {
    pub fn new(command: C, response_ch: oneshot::Sender<io::Result<C::Response>>) -> Self {
        Self {
            command,
            response_ch,
        }
    }

    pub fn execute(self, handler: &mut C::Handler) -> io::Result<()> {
        let result = self.command.execute(handler);

        self.response_ch
            .send(result)
            .map_err(|_| io::Error::other("Failed to send response"))?;

        Ok(())
    }
}

/// Owns a device handler and serializes every command sent to it on a single
/// blocking thread.
///
/// The executor stops once every [`CommandSender`] has been dropped.
pub struct CommandExecutor<H: DeviceHandler + Send + 'static> {
    handler: H,
    commands_ch: Receiver<GenericCommand<H::Command>>,
    sender: Option<Sender<GenericCommand<H::Command>>>,
    idle_period: Duration,
}

impl<H: DeviceHandler + Send> CommandExecutor<H> {
    pub fn new(handler: H) -> Self {
        let (sender, commands_ch) = std::sync::mpsc::channel();

        Self {
            handler,
            commands_ch,
            sender: Some(sender),
            idle_period: DEFAULT_IDLE_PERIOD,
        }
    }

    pub fn with_idle_period(mut self, idle_period: Duration) -> Self {
        self.idle_period = idle_period;
        self
    }

    pub fn sender(&self) -> CommandSender<H::Command> {
        let sender = self
            .sender
            .clone()
            .unwrap_or_else(|| std::sync::mpsc::channel().0);
        CommandSender::new(sender)
    }

    pub fn run(&mut self) -> io::Result<()> {
        // Only external senders may keep the executor alive.
        self.sender.take();

        loop {
            match self.commands_ch.recv_timeout(self.idle_period) {
                Ok(command) => {
                    if let Err(e) = command.execute(&mut self.handler) {
                        debug!("Command result was not delivered: {}", e);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            self.handler.on_idle();
        }

        debug!("All command senders dropped, executor stopped");
        Ok(())
    }

    pub fn spawn(mut self) -> tokio::task::JoinHandle<io::Result<()>> {
        tokio::task::spawn_blocking(move || self.run())
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

#[derive(Clone)]
pub struct CommandSender<T: Command> {
    commands_ch: Sender<GenericCommand<T>>,
}

impl<C: Command> CommandSender<C> {
    pub fn new(commands_ch: Sender<GenericCommand<C>>) -> Self {
        Self { commands_ch }
    }

    pub async fn send_command(&self, command: C) -> io::Result<C::Response> {
        let (response_ch, response_rx) = oneshot::channel();
        let command = GenericCommand::new(command, response_ch);

        self.commands_ch
            .send(command)
            .map_err(|_| io::Error::other("Failed to send command"))?;

        response_rx
            .await
            .map_err(|_| io::Error::other("Failed to receive response"))?
    }

    pub async fn send_command_timeout(
        &self,
        command: C,
        timeout: Duration,
    ) -> io::Result<C::Response> {
        match tokio::time::timeout(timeout, self.send_command(command)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Command timed out after {:?}", timeout);
                Err(io::Error::new(io::ErrorKind::TimedOut, "Command timed out"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        value: i64,
        idle_ticks: u32,
    }

    enum CounterCommand {
        Add(i64),
        Fail,
        Sleep(Duration),
    }

    impl DeviceHandler for Counter {
        type Command = CounterCommand;

        fn on_idle(&mut self) {
            self.idle_ticks += 1;
        }
    }

    impl Command for CounterCommand {
        type Response = i64;
        type Handler = Counter;

        fn execute(self, handler: &mut Counter) -> io::Result<i64> {
            match self {
                CounterCommand::Add(n) => {
                    handler.value += n;
                    Ok(handler.value)
                }
                CounterCommand::Fail => Err(io::Error::other("boom")),
                CounterCommand::Sleep(duration) => {
                    std::thread::sleep(duration);
                    Ok(handler.value)
                }
            }
        }
    }

    #[tokio::test]
    async fn commands_run_in_order_and_executor_stops_with_senders() {
        let executor = CommandExecutor::new(Counter {
            value: 0,
            idle_ticks: 0,
        })
        .with_idle_period(Duration::from_millis(1));
        let sender = executor.sender();
        let handle = executor.spawn();

        assert_eq!(sender.send_command(CounterCommand::Add(2)).await.unwrap(), 2);
        assert_eq!(sender.send_command(CounterCommand::Add(3)).await.unwrap(), 5);
        assert!(sender.send_command(CounterCommand::Fail).await.is_err());

        drop(sender);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let executor = CommandExecutor::new(Counter {
            value: 0,
            idle_ticks: 0,
        });
        let sender = executor.sender();
        let _handle = executor.spawn();

        let err = sender
            .send_command_timeout(
                CounterCommand::Sleep(Duration::from_millis(200)),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn idle_hook_runs_without_commands() {
        let mut executor = CommandExecutor::new(Counter {
            value: 0,
            idle_ticks: 0,
        })
        .with_idle_period(Duration::from_millis(1));
        let sender = executor.sender();

        let worker = std::thread::spawn(move || {
            executor.run().unwrap();
            executor.into_handler()
        });
        std::thread::sleep(Duration::from_millis(20));
        drop(sender);

        let handler = worker.join().unwrap();
        assert!(handler.idle_ticks > 0);
    }
}
