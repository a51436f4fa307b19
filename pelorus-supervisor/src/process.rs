//! Agent process launcher and message channel
//!
//! Each agent runs as a child process with piped stdio. Structured control
//! messages travel as JSON Lines over stdin/stdout; stderr is a free-form
//! log stream captured line by line and forwarded to the coordinator's
//! logging sink. Three background tasks serve each process: a writer
//! draining the outbound queue into stdin, a stdout reader dispatching
//! inbound messages, and an exit observer that publishes the exit status.
//!
//! Health-check replies are matched against a pending-request table keyed
//! by correlation id, so a late reply to an old check can never satisfy a
//! newer one.

use crate::error::{Result, SupervisorError};
use crate::monitor::HealthOutcome;
use chrono::{DateTime, Utc};
use pelorus_core::config::AgentConfig;
use pelorus_core::protocol::{AgentMessage, AgentMetrics};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// How often the exit observer polls a child that has not exited yet
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exit status of an agent process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// OS exit code; `None` when the process was killed by a signal
    pub code: Option<i32>,
}

impl ExitInfo {
    /// Whether this was a voluntary exit with code 0
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }
}

/// Event surfaced by a process's background tasks
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// Inbound control message other than a health-check reply
    Message(AgentMessage),
    /// The process exited
    Exited(ExitInfo),
}

/// A process event tagged with its origin
///
/// The generation counter identifies which launch of the agent produced
/// the event; the supervisor discards signals from superseded launches.
#[derive(Debug, Clone)]
pub struct ProcessSignal {
    pub agent_id: String,
    pub generation: u64,
    pub event: ProcessEvent,
}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<AgentMetrics>>>>;

/// Handle to one running agent process
///
/// Cheap to clone; all clones refer to the same child.
#[derive(Debug, Clone)]
pub struct AgentProcess {
    agent_id: String,
    generation: u64,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    outbound: mpsc::Sender<AgentMessage>,
    pending: PendingReplies,
    next_request_id: Arc<AtomicU64>,
    child: Arc<Mutex<Child>>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

impl AgentProcess {
    /// Launch the configured command with piped stdio and start the
    /// channel tasks. Process events are delivered to `signal_tx`.
    pub fn spawn(
        config: &AgentConfig,
        generation: u64,
        signal_tx: mpsc::Sender<ProcessSignal>,
    ) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| SupervisorError::Launch {
            agent: config.id.clone(),
            source: e,
        })?;

        let pid = child.id();
        let stdin = child.stdin.take().ok_or_else(|| {
            SupervisorError::Supervisor(format!("failed to capture stdin of agent {}", config.id))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            SupervisorError::Supervisor(format!("failed to capture stdout of agent {}", config.id))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            SupervisorError::Supervisor(format!("failed to capture stderr of agent {}", config.id))
        })?;

        let (outbound_tx, outbound_rx) = mpsc::channel::<AgentMessage>(64);
        let (exit_tx, exit_rx) = watch::channel(None);
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let child = Arc::new(Mutex::new(child));

        let process = Self {
            agent_id: config.id.clone(),
            generation,
            pid,
            started_at: Utc::now(),
            outbound: outbound_tx,
            pending: pending.clone(),
            next_request_id: Arc::new(AtomicU64::new(0)),
            child: child.clone(),
            exit_rx,
        };

        spawn_writer(config.id.clone(), stdin, outbound_rx);
        spawn_stdout_reader(
            config.id.clone(),
            generation,
            stdout,
            pending,
            signal_tx.clone(),
        );
        spawn_stderr_reader(config.id.clone(), stderr);
        spawn_exit_observer(config.id.clone(), generation, child, exit_tx, signal_tx);

        debug!(agent = %config.id, pid = ?pid, generation, "agent process spawned");
        Ok(process)
    }

    /// Id of the agent this process runs
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// OS process id, if the process had not already exited at spawn time
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Launch timestamp
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Launch generation this handle belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a control message for delivery over stdin
    pub async fn send(&self, message: AgentMessage) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| SupervisorError::ChannelClosed(self.agent_id.clone()))
    }

    /// Perform one health-check round trip with a hard deadline
    ///
    /// Sends `health-check` with a fresh correlation id and waits for the
    /// matching `health-response`. No reply within `deadline`, or a closed
    /// channel, counts as failure.
    pub async fn health_check(&self, deadline: Duration) -> HealthOutcome {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, reply_tx);

        let started = Instant::now();
        if self.send(AgentMessage::HealthCheck { id }).await.is_err() {
            self.pending.lock().await.remove(&id);
            return HealthOutcome::Unhealthy {
                error: "message channel closed".to_string(),
            };
        }

        match timeout(deadline, reply_rx).await {
            Ok(Ok(metrics)) => HealthOutcome::Healthy {
                metrics,
                rtt: started.elapsed(),
            },
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                HealthOutcome::Unhealthy {
                    error: "channel dropped before reply".to_string(),
                }
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                HealthOutcome::Timeout
            }
        }
    }

    /// Whether the process has exited
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Wait up to `grace` for the process to exit on its own
    pub async fn wait_exited(&self, grace: Duration) -> Option<ExitInfo> {
        let mut rx = self.exit_rx.clone();
        if let Some(info) = *rx.borrow_and_update() {
            return Some(info);
        }
        match timeout(grace, rx.wait_for(|v| v.is_some())).await {
            Ok(Ok(guard)) => *guard,
            _ => None,
        }
    }

    /// Force-terminate the process. Best effort; the exit observer reports
    /// the resulting exit.
    pub async fn kill(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.start_kill() {
            debug!(agent = %self.agent_id, "kill failed (process likely already exited): {}", e);
        }
    }
}

/// Drain the outbound queue into the child's stdin, one JSON line per
/// message
fn spawn_writer(
    agent_id: String,
    mut stdin: tokio::process::ChildStdin,
    mut outbound_rx: mpsc::Receiver<AgentMessage>,
) {
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let line = match message.to_line() {
                Ok(line) => line,
                Err(e) => {
                    warn!(agent = %agent_id, "failed to encode outbound message: {}", e);
                    continue;
                }
            };
            if stdin.write_all(line.as_bytes()).await.is_err()
                || stdin.write_all(b"\n").await.is_err()
                || stdin.flush().await.is_err()
            {
                debug!(agent = %agent_id, "stdin closed, stopping writer");
                break;
            }
        }
    });
}

/// Parse stdout JSON lines: health replies complete their pending request,
/// everything else is forwarded as a process signal. Unparsable lines are
/// surfaced at debug level and never stop the reader.
fn spawn_stdout_reader(
    agent_id: String,
    generation: u64,
    stdout: tokio::process::ChildStdout,
    pending: PendingReplies,
    signal_tx: mpsc::Sender<ProcessSignal>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match AgentMessage::from_line(&line) {
                Ok(AgentMessage::HealthResponse { id, metrics }) => {
                    match pending.lock().await.remove(&id) {
                        Some(reply_tx) => {
                            let _ = reply_tx.send(metrics);
                        }
                        None => {
                            debug!(agent = %agent_id, id, "late health reply, dropping");
                        }
                    }
                }
                Ok(message) => {
                    let signal = ProcessSignal {
                        agent_id: agent_id.clone(),
                        generation,
                        event: ProcessEvent::Message(message),
                    };
                    if signal_tx.send(signal).await.is_err() {
                        break;
                    }
                }
                Err(_) => {
                    debug!(agent = %agent_id, raw = %line, "non-protocol stdout line");
                }
            }
        }
    });
}

/// Forward the child's stderr lines to the coordinator's logging sink
fn spawn_stderr_reader(agent_id: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(agent = %agent_id, "agent stderr: {}", line);
        }
    });
}

/// Poll the child for exit without holding the lock across waits, then
/// publish the exit both on the watch channel and as a process signal
fn spawn_exit_observer(
    agent_id: String,
    generation: u64,
    child: Arc<Mutex<Child>>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    signal_tx: mpsc::Sender<ProcessSignal>,
) {
    tokio::spawn(async move {
        let info = loop {
            let polled = child.lock().await.try_wait();
            match polled {
                Ok(Some(status)) => {
                    break ExitInfo {
                        code: status.code(),
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(agent = %agent_id, "failed to poll process status: {}", e);
                    break ExitInfo { code: None };
                }
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        };

        debug!(agent = %agent_id, code = ?info.code, "agent process exited");
        let _ = exit_tx.send(Some(info));
        let _ = signal_tx
            .send(ProcessSignal {
                agent_id,
                generation,
                event: ProcessEvent::Exited(info),
            })
            .await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_agent(id: &str, script: &str) -> AgentConfig {
        let mut config = AgentConfig::new(id, "/bin/sh");
        config.args = vec!["-c".to_string(), script.to_string()];
        config
    }

    #[tokio::test]
    async fn forwards_inbound_messages() {
        let (signal_tx, mut signal_rx) = mpsc::channel(8);
        let config = shell_agent(
            "weather",
            r#"printf '{"type":"capability-update","capabilities":["wind"]}\n'; sleep 5"#,
        );
        let process = AgentProcess::spawn(&config, 1, signal_tx).unwrap();

        let signal = timeout(Duration::from_secs(5), signal_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(signal.agent_id, "weather");
        assert_eq!(signal.generation, 1);
        match signal.event {
            ProcessEvent::Message(AgentMessage::CapabilityUpdate { capabilities }) => {
                assert_eq!(capabilities, vec!["wind".to_string()]);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        process.kill().await;
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let (signal_tx, mut signal_rx) = mpsc::channel(8);
        let config = shell_agent("tidal", "exit 3");
        let process = AgentProcess::spawn(&config, 1, signal_tx).unwrap();

        let info = process
            .wait_exited(Duration::from_secs(5))
            .await
            .expect("no exit observed");
        assert_eq!(info.code, Some(3));
        assert!(!info.is_clean());
        assert!(process.has_exited());

        let signal = timeout(Duration::from_secs(5), signal_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert!(matches!(
            signal.event,
            ProcessEvent::Exited(ExitInfo { code: Some(3) })
        ));
    }

    #[tokio::test]
    async fn health_check_times_out_against_silent_agent() {
        let (signal_tx, _signal_rx) = mpsc::channel(8);
        let config = shell_agent("routing", "sleep 10");
        let process = AgentProcess::spawn(&config, 1, signal_tx).unwrap();

        let outcome = process.health_check(Duration::from_millis(200)).await;
        assert!(matches!(outcome, HealthOutcome::Timeout));

        process.kill().await;
        assert!(process.wait_exited(Duration::from_secs(5)).await.is_some());
    }

    #[tokio::test]
    async fn health_check_round_trip() {
        let (signal_tx, _signal_rx) = mpsc::channel(8);
        // Replies to each line with a health-response carrying the next
        // correlation id (ids are issued 1, 2, 3, ... per process).
        let script = r#"i=0; while read line; do i=$((i+1)); printf '{"type":"health-response","id":%d,"metrics":{"cpu":0.1,"memory":64.0,"requestsProcessed":7,"averageResponseTime":2.5}}\n' "$i"; done"#;
        let config = shell_agent("safety", script);
        let process = AgentProcess::spawn(&config, 1, signal_tx).unwrap();

        match process.health_check(Duration::from_secs(5)).await {
            HealthOutcome::Healthy { metrics, .. } => {
                assert_eq!(metrics.requests_processed, 7);
            }
            other => panic!("expected healthy, got {:?}", other),
        }
        // A second round trip must match the new correlation id, not the
        // old one.
        match process.health_check(Duration::from_secs(5)).await {
            HealthOutcome::Healthy { .. } => {}
            other => panic!("expected healthy, got {:?}", other),
        }

        process.kill().await;
    }
}
