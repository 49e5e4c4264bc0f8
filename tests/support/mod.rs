// ABOUTME: Test support utilities.
// ABOUTME: Tracing setup and a scripted command runner standing in for hosts and schedulers.

use async_trait::async_trait;
use kahua::exec::{self, CommandOutput, CommandRunner, ExecError, RunningCommand};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("kahua=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// What a scripted command does once spawned.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum Script {
    /// Runs until killed.
    Hang,
    /// Exits `after` the spawn with `output`.
    Exit {
        after: Duration,
        output: CommandOutput,
    },
    /// Every check of the command fails.
    Faulty,
    /// The command cannot even be started.
    Unlaunchable,
}

#[allow(dead_code)]
impl Script {
    pub fn exit(after: Duration, exit_code: i32, stdout: &str) -> Self {
        Script::Exit {
            after,
            output: CommandOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        }
    }

    pub fn fail_now(exit_code: i32, stderr: &str) -> Self {
        Script::Exit {
            after: Duration::ZERO,
            output: CommandOutput {
                exit_code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        }
    }
}

/// Command runner whose commands follow scripts chosen by substring.
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, Script)>>,
    fallback: Script,
    spawned: Mutex<Vec<String>>,
    killed: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ScriptedRunner {
    pub fn new(fallback: Script) -> Arc<Self> {
        Arc::new(Self {
            rules: Mutex::new(Vec::new()),
            fallback,
            spawned: Mutex::new(Vec::new()),
            killed: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Commands containing `pattern` follow `script`. Earlier rules win.
    pub fn on(&self, pattern: &str, script: Script) {
        self.rules.lock().push((pattern.to_string(), script));
    }

    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().clone()
    }

    pub fn spawned_matching(&self, pattern: &str) -> usize {
        self.spawned
            .lock()
            .iter()
            .filter(|command| command.contains(pattern))
            .count()
    }

    pub fn killed(&self) -> usize {
        self.killed.load(Ordering::SeqCst)
    }

    fn script_for(&self, command: &str) -> Script {
        self.rules
            .lock()
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn location(&self) -> &str {
        "scripted"
    }

    async fn spawn(&self, command: &str) -> exec::Result<Box<dyn RunningCommand>> {
        self.spawned.lock().push(command.to_string());
        let script = self.script_for(command);
        if let Script::Unlaunchable = script {
            return Err(ExecError::Spawn {
                command: command.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such command"),
            });
        }
        Ok(Box::new(ScriptedProcess {
            command: command.to_string(),
            script,
            started: Instant::now(),
            killed: false,
            kill_counter: Arc::clone(&self.killed),
        }))
    }
}

struct ScriptedProcess {
    command: String,
    script: Script,
    started: Instant,
    killed: bool,
    kill_counter: Arc<AtomicUsize>,
}

impl ScriptedProcess {
    fn fault(&self) -> ExecError {
        ExecError::Aborted {
            command: self.command.clone(),
            reason: "scripted fault".to_string(),
        }
    }
}

#[async_trait]
impl RunningCommand for ScriptedProcess {
    async fn try_exit(&mut self) -> exec::Result<Option<CommandOutput>> {
        match &self.script {
            Script::Hang | Script::Unlaunchable => Ok(None),
            Script::Exit { after, output } => {
                Ok((self.started.elapsed() >= *after).then(|| output.clone()))
            }
            Script::Faulty => Err(self.fault()),
        }
    }

    async fn wait(&mut self) -> exec::Result<CommandOutput> {
        match &self.script {
            Script::Hang | Script::Unlaunchable => std::future::pending().await,
            Script::Exit { after, output } => {
                tokio::time::sleep_until(self.started + *after).await;
                Ok(output.clone())
            }
            Script::Faulty => Err(self.fault()),
        }
    }

    async fn kill(&mut self) {
        if !self.killed {
            self.killed = true;
            self.kill_counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Let spawned tasks run until they block on the (paused) clock.
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
