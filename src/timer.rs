use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};

use crate::server::Command;

/// A scheduled task. Dropping the handle cancels the task, so replacing a
/// stored handle cancels whatever it held before.
#[derive(Debug)]
pub struct TimerHandle(JoinHandle<()>);

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Posts commands back to the hub after a delay.
#[derive(Debug, Clone)]
pub struct Scheduler {
    commands: mpsc::UnboundedSender<Command>,
}

impl Scheduler {
    pub fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Scheduler { commands }
    }

    pub fn after(&self, delay: Duration, command: Command) -> TimerHandle {
        let commands = self.commands.clone();
        TimerHandle(tokio::spawn(async move {
            sleep(delay).await;
            let _ = commands.send(command);
        }))
    }

    /// Sends a fresh command every `period`, starting one period from now.
    pub fn every<F>(&self, period: Duration, make: F) -> TimerHandle
    where
        F: Fn() -> Command + Send + 'static,
    {
        let commands = self.commands.clone();
        TimerHandle(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                if commands.send(make()).is_err() {
                    break;
                }
            }
        }))
    }
}
