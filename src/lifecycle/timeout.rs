// ABOUTME: Per-node deadline scheduling for deploying nodes.
// ABOUTME: A driver task owns every deadline and posts expiries as messages.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::types::DeployingNodeUrl;

/// A deadline that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub url: DeployingNodeUrl,
    /// Ticket the deadline was armed with.
    pub ticket: u64,
}

#[derive(Debug)]
enum Command {
    Arm {
        url: DeployingNodeUrl,
        ticket: u64,
        deadline: Instant,
    },
    Cancel {
        url: DeployingNodeUrl,
    },
    Shutdown,
}

/// Schedules one deadline per deploying node on a single timer task.
///
/// Expiries are not acted on here: they are sent to the owner, which applies
/// them through its own write path.
pub struct TimeoutSupervisor {
    commands: mpsc::UnboundedSender<Command>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TimeoutSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutSupervisor")
            .field("running", &self.is_running())
            .finish()
    }
}

impl TimeoutSupervisor {
    /// Start the timer task. Must be called within a tokio runtime.
    pub fn start(expired: mpsc::UnboundedSender<Expired>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(receiver, expired));
        Self {
            commands,
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Arm (or re-arm) the deadline of `url`, `after` from now.
    pub fn arm(&self, url: DeployingNodeUrl, ticket: u64, after: Duration) {
        let deadline = Instant::now() + after;
        if self
            .commands
            .send(Command::Arm {
                url,
                ticket,
                deadline,
            })
            .is_err()
        {
            tracing::debug!("Timeout supervisor stopped, deadline not armed");
        }
    }

    /// Drop the deadline of `url` if one is armed.
    pub fn cancel(&self, url: &DeployingNodeUrl) {
        let _ = self.commands.send(Command::Cancel { url: url.clone() });
    }

    pub fn is_running(&self) -> bool {
        self.driver
            .lock()
            .as_ref()
            .is_some_and(|driver| !driver.is_finished())
    }

    /// Cancel every outstanding deadline and stop the timer task.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let driver = self.driver.lock().take();
        if let Some(driver) = driver
            && let Err(e) = driver.await
        {
            tracing::warn!("Timeout supervisor ended abnormally: {}", e);
        }
    }
}

async fn drive(
    mut commands: mpsc::UnboundedReceiver<Command>,
    expired: mpsc::UnboundedSender<Expired>,
) {
    let mut queue: BTreeSet<(Instant, u64, DeployingNodeUrl)> = BTreeSet::new();
    let mut armed: HashMap<DeployingNodeUrl, (Instant, u64)> = HashMap::new();

    loop {
        let next = queue.first().map(|(deadline, _, _)| *deadline);

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Arm { url, ticket, deadline }) => {
                    if let Some((previous, old_ticket)) =
                        armed.insert(url.clone(), (deadline, ticket))
                    {
                        queue.remove(&(previous, old_ticket, url.clone()));
                    }
                    queue.insert((deadline, ticket, url));
                }
                Some(Command::Cancel { url }) => {
                    if let Some((deadline, ticket)) = armed.remove(&url) {
                        queue.remove(&(deadline, ticket, url));
                    }
                }
                Some(Command::Shutdown) | None => {
                    if !queue.is_empty() {
                        tracing::debug!("Cancelled {} outstanding deadlines", queue.len());
                    }
                    break;
                }
            },
            _ = tokio::time::sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                let now = Instant::now();
                while queue.first().is_some_and(|(deadline, _, _)| *deadline <= now) {
                    let Some((_, ticket, url)) = queue.pop_first() else {
                        break;
                    };
                    armed.remove(&url);
                    if expired.send(Expired { url, ticket }).is_err() {
                        return;
                    }
                }
            }
        }
    }
}
