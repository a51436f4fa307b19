//! Fleet coordinator
//!
//! Owns the runtime state of every supervised agent and drives the whole
//! lifecycle: launch at boot, periodic health checks, scheduled relaunch
//! after failures, maintenance parking once the restart budget is spent,
//! and graceful shutdown.
//!
//! All state transitions funnel through one signal loop consuming health
//! results and process events, so each agent's state is only ever mutated
//! from one place at a time. Relaunch timers and startup watchdogs are
//! fire-and-forget tasks that re-check runtime state when they wake,
//! making a stale timer a no-op instead of a hazard.

use crate::error::{Result, SupervisorError};
use crate::monitor::{spawn_monitor, HealthCheckResult, HealthOutcome};
use crate::process::{AgentProcess, ExitInfo, ProcessEvent, ProcessSignal};
use crate::restart::{decide, BackoffPolicy, FixedDelay, RestartDecision};
use chrono::{DateTime, Utc};
use pelorus_core::config::{AgentConfig, FleetConfig, SupervisorSettings};
use pelorus_core::events::{EventBus, SupervisorEvent};
use pelorus_core::fleet::{AgentHealthRecord, AgentStatus, AgentStatusReport, FleetHealthSummary};
use pelorus_core::metrics::{
    agent_metrics_key, MetricsStore, AGENT_METRICS_TTL, FLEET_HEALTH_KEY, FLEET_HEALTH_TTL,
};
use pelorus_core::protocol::{AgentMessage, LogLevel};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How often the startup waiter re-reads an agent's status
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Mutable runtime state of one supervised agent
#[derive(Debug, Default)]
struct AgentRuntime {
    status: AgentStatus,
    process: Option<AgentProcess>,
    monitor: Option<JoinHandle<()>>,
    /// Bumped on every launch; signals from older launches are discarded
    generation: u64,
    restart_count: u32,
    started_at: Option<DateTime<Utc>>,
    last_healthy: Option<DateTime<Utc>>,
    last_check: Option<DateTime<Utc>>,
    latest_metrics: Option<pelorus_core::protocol::AgentMetrics>,
}

impl AgentRuntime {
    fn uptime_seconds(&self) -> Option<i64> {
        if self.process.is_none() {
            return None;
        }
        self.started_at.map(|t| (Utc::now() - t).num_seconds())
    }
}

struct Inner {
    settings: SupervisorSettings,
    configs: HashMap<String, AgentConfig>,
    /// Agent ids in configuration order; launches and reports follow it
    order: Vec<String>,
    agents: RwLock<HashMap<String, AgentRuntime>>,
    events: EventBus,
    store: Arc<dyn MetricsStore>,
    backoff: Box<dyn BackoffPolicy>,
    health_tx: mpsc::Sender<HealthCheckResult>,
    signal_tx: mpsc::Sender<ProcessSignal>,
    shutting_down: AtomicBool,
}

type Receivers = (
    mpsc::Receiver<HealthCheckResult>,
    mpsc::Receiver<ProcessSignal>,
);

/// The fleet supervisor
pub struct AgentSupervisor {
    inner: Arc<Inner>,
    receivers: Mutex<Option<Receivers>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AgentSupervisor {
    /// Create a supervisor with the default fixed-delay restart policy
    pub fn new(config: FleetConfig, store: Arc<dyn MetricsStore>) -> Self {
        Self::with_backoff(config, store, Box::new(FixedDelay))
    }

    /// Create a supervisor with a custom backoff policy
    pub fn with_backoff(
        config: FleetConfig,
        store: Arc<dyn MetricsStore>,
        backoff: Box<dyn BackoffPolicy>,
    ) -> Self {
        let (health_tx, health_rx) = mpsc::channel(64);
        let (signal_tx, signal_rx) = mpsc::channel(64);
        let order: Vec<String> = config.agents.iter().map(|a| a.id.clone()).collect();
        let configs = config
            .agents
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();

        Self {
            inner: Arc::new(Inner {
                events: EventBus::new(config.supervisor.event_buffer_size),
                settings: config.supervisor,
                configs,
                order,
                agents: RwLock::new(HashMap::new()),
                store,
                backoff,
                health_tx,
                signal_tx,
                shutting_down: AtomicBool::new(false),
            }),
            receivers: Mutex::new(Some((health_rx, signal_rx))),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.inner.events.subscribe()
    }

    /// Ids of all configured agents, in configuration order
    pub fn agent_ids(&self) -> &[String] {
        &self.inner.order
    }

    /// Launch every configured agent and wait for each to report healthy
    ///
    /// Agents launch sequentially in configuration order. If any agent
    /// fails to come up within the startup window the whole fleet is shut
    /// down again and the error names the offending agent.
    pub async fn initialize(&self) -> Result<()> {
        let (health_rx, signal_rx) = self
            .receivers
            .lock()
            .await
            .take()
            .ok_or_else(|| SupervisorError::Supervisor("already initialized".to_string()))?;

        let loop_handle = tokio::spawn(run_signal_loop(self.inner.clone(), health_rx, signal_rx));
        self.tasks.lock().await.push(loop_handle);

        {
            let mut agents = self.inner.agents.write().await;
            for id in &self.inner.order {
                agents.insert(id.clone(), AgentRuntime::default());
            }
        }

        for id in &self.inner.order {
            let Some(cfg) = self.inner.configs.get(id) else {
                continue;
            };
            info!(agent = %id, command = %cfg.command, "launching agent");
            if let Err(e) = self.start_and_await(cfg).await {
                error!(agent = %id, "startup failed: {}", e);
                let _ = self.shutdown().await;
                return Err(e);
            }
        }

        let agg_handle = tokio::spawn(run_aggregation_loop(self.inner.clone()));
        self.tasks.lock().await.push(agg_handle);

        info!(agents = self.inner.order.len(), "fleet initialized");
        Ok(())
    }

    async fn start_and_await(&self, cfg: &AgentConfig) -> Result<()> {
        launch_process(&self.inner, cfg).await?;
        let deadline = tokio::time::Instant::now() + self.inner.settings.startup_timeout;
        loop {
            let status = {
                let agents = self.inner.agents.read().await;
                agents.get(&cfg.id).map(|rt| rt.status)
            };
            match status {
                Some(AgentStatus::Active) => {
                    self.inner.events.emit(SupervisorEvent::AgentStarted {
                        id: cfg.id.clone(),
                    });
                    info!(agent = %cfg.id, "agent healthy");
                    return Ok(());
                }
                Some(AgentStatus::Starting) => {}
                Some(other) => {
                    return Err(SupervisorError::Supervisor(format!(
                        "agent {} entered {} during startup",
                        cfg.id, other
                    )));
                }
                None => return Err(SupervisorError::AgentNotFound(cfg.id.clone())),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SupervisorError::StartupTimeout(cfg.id.clone()));
            }
            tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
        }
    }

    /// Current fleet health snapshot
    pub async fn health_summary(&self) -> FleetHealthSummary {
        let agents = self.inner.agents.read().await;
        summarize(&self.inner.order, &agents)
    }

    /// Detailed status of one agent
    pub async fn agent_status(&self, agent_id: &str) -> Result<AgentStatusReport> {
        let agents = self.inner.agents.read().await;
        let rt = agents
            .get(agent_id)
            .ok_or_else(|| SupervisorError::AgentNotFound(agent_id.to_string()))?;
        let name = self
            .inner
            .configs
            .get(agent_id)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        Ok(AgentStatusReport {
            id: agent_id.to_string(),
            name,
            status: rt.status,
            restart_count: rt.restart_count,
            started_at: rt.started_at,
            last_healthy: rt.last_healthy,
            last_check: rt.last_check,
            metrics: rt.latest_metrics.clone(),
        })
    }

    /// Operator-initiated restart
    ///
    /// Valid from any state, including maintenance. Resets the restart
    /// counter to zero and relaunches immediately.
    pub async fn restart_agent(&self, agent_id: &str) -> Result<()> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(SupervisorError::ShuttingDown);
        }
        let cfg = self
            .inner
            .configs
            .get(agent_id)
            .ok_or_else(|| SupervisorError::AgentNotFound(agent_id.to_string()))?;
        {
            let mut agents = self.inner.agents.write().await;
            let rt = agents
                .get_mut(agent_id)
                .ok_or_else(|| SupervisorError::AgentNotFound(agent_id.to_string()))?;
            if let Some(handle) = rt.monitor.take() {
                handle.abort();
            }
            if let Some(process) = rt.process.take() {
                let _ = process.send(AgentMessage::Shutdown).await;
                process.kill().await;
            }
            rt.restart_count = 0;
        }
        info!(agent = %agent_id, "manual restart requested");
        launch_process(&self.inner, cfg).await
    }

    /// Stop the fleet: ask every agent to shut down, give the fleet one
    /// shared grace period, then kill stragglers. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("shutting down fleet");

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        let processes: Vec<AgentProcess> = {
            let mut agents = self.inner.agents.write().await;
            agents
                .values_mut()
                .filter_map(|rt| {
                    if let Some(handle) = rt.monitor.take() {
                        handle.abort();
                    }
                    rt.process.take()
                })
                .collect()
        };

        for process in &processes {
            let _ = process.send(AgentMessage::Shutdown).await;
        }

        let deadline = tokio::time::Instant::now() + self.inner.settings.shutdown_grace;
        for process in &processes {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if process.wait_exited(remaining).await.is_none() {
                warn!(agent = %process.agent_id(), "no exit within grace period, killing");
                process.kill().await;
            }
        }

        info!("fleet shutdown complete");
        Ok(())
    }
}

/// Launch (or relaunch) the agent's process and attach a fresh monitor
///
/// Any previous process and monitor for the agent are torn down first.
async fn launch_process(inner: &Arc<Inner>, cfg: &AgentConfig) -> Result<()> {
    let generation = {
        let mut agents = inner.agents.write().await;
        let rt = agents
            .get_mut(&cfg.id)
            .ok_or_else(|| SupervisorError::AgentNotFound(cfg.id.clone()))?;
        if let Some(handle) = rt.monitor.take() {
            handle.abort();
        }
        if let Some(old) = rt.process.take() {
            old.kill().await;
        }
        rt.generation += 1;
        let process = AgentProcess::spawn(cfg, rt.generation, inner.signal_tx.clone())?;
        rt.status = AgentStatus::Starting;
        rt.started_at = Some(process.started_at());
        rt.monitor = Some(spawn_monitor(
            process.clone(),
            cfg.health_check_interval,
            cfg.health_check_timeout,
            inner.health_tx.clone(),
        ));
        rt.process = Some(process);
        rt.generation
    };

    // Startup watchdog: an agent that never turns healthy must not sit in
    // `starting` forever.
    let watchdog_inner = inner.clone();
    let agent_id = cfg.id.clone();
    let window = inner.settings.startup_timeout;
    tokio::spawn(async move {
        tokio::time::sleep(window).await;
        startup_deadline_passed(&watchdog_inner, &agent_id, generation).await;
    });

    Ok(())
}

async fn startup_deadline_passed(inner: &Arc<Inner>, agent_id: &str, generation: u64) {
    if inner.shutting_down.load(Ordering::SeqCst) {
        return;
    }
    let mut agents = inner.agents.write().await;
    let Some(rt) = agents.get_mut(agent_id) else {
        return;
    };
    if rt.generation != generation || rt.status != AgentStatus::Starting {
        return;
    }
    warn!(agent = %agent_id, "agent never reported healthy within the startup window");
    fail_agent(inner, agent_id, rt, false).await;
}

/// Consume health results and process events until both channels close
async fn run_signal_loop(
    inner: Arc<Inner>,
    mut health_rx: mpsc::Receiver<HealthCheckResult>,
    mut signal_rx: mpsc::Receiver<ProcessSignal>,
) {
    loop {
        tokio::select! {
            Some(result) = health_rx.recv() => handle_health_result(&inner, result).await,
            Some(signal) = signal_rx.recv() => handle_process_signal(&inner, signal).await,
            else => break,
        }
    }
}

async fn handle_health_result(inner: &Arc<Inner>, result: HealthCheckResult) {
    let mut agents = inner.agents.write().await;
    let Some(rt) = agents.get_mut(&result.agent_id) else {
        return;
    };
    if result.generation != rt.generation {
        // Check completed against a superseded launch; its monitor is
        // torn down but a queued result can still arrive after the swap
        return;
    }
    if matches!(rt.status, AgentStatus::Maintenance | AgentStatus::Stopped) {
        // Stale result from a monitor torn down during parking
        return;
    }
    rt.last_check = Some(result.checked_at);

    match result.outcome {
        HealthOutcome::Healthy { metrics, rtt } => {
            rt.last_healthy = Some(result.checked_at);
            rt.latest_metrics = Some(metrics);
            debug!(agent = %result.agent_id, rtt_ms = rtt.as_millis() as u64, "health check ok");
            let event = match rt.status {
                AgentStatus::Starting => {
                    rt.status = AgentStatus::Active;
                    if rt.generation <= 1 && rt.restart_count == 0 {
                        // First launch; `initialize` announces it once the
                        // status flips.
                        None
                    } else {
                        Some(SupervisorEvent::AgentRestarted {
                            id: result.agent_id.clone(),
                        })
                    }
                }
                AgentStatus::Error => {
                    rt.status = AgentStatus::Active;
                    info!(agent = %result.agent_id, "agent recovered without relaunch");
                    Some(SupervisorEvent::AgentRecovered {
                        id: result.agent_id.clone(),
                    })
                }
                _ => None,
            };
            drop(agents);
            if let Some(event) = event {
                inner.events.emit(event);
            }
            publish_agent_metrics(inner, &result.agent_id).await;
        }
        failure => {
            if inner.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            match rt.status {
                AgentStatus::Active => {
                    let reason = failure
                        .failure_reason()
                        .unwrap_or_else(|| "unknown".to_string());
                    warn!(agent = %result.agent_id, "health check failed: {}", reason);
                    fail_agent(inner, &result.agent_id, rt, false).await;
                }
                AgentStatus::Starting => {
                    // The startup watchdog owns the deadline; early failed
                    // probes against a booting agent are expected.
                    debug!(agent = %result.agent_id, "health check failed during startup");
                }
                _ => {}
            }
        }
    }
}

async fn handle_process_signal(inner: &Arc<Inner>, signal: ProcessSignal) {
    match signal.event {
        ProcessEvent::Exited(info) => {
            handle_exit(inner, &signal.agent_id, signal.generation, info).await;
        }
        ProcessEvent::Message(message) => {
            handle_agent_message(inner, &signal.agent_id, message).await;
        }
    }
}

async fn handle_exit(inner: &Arc<Inner>, agent_id: &str, generation: u64, info: ExitInfo) {
    if inner.shutting_down.load(Ordering::SeqCst) {
        return;
    }
    let mut agents = inner.agents.write().await;
    let Some(rt) = agents.get_mut(agent_id) else {
        return;
    };
    if rt.generation != generation {
        // Exit of a superseded launch
        return;
    }
    match rt.status {
        AgentStatus::Starting | AgentStatus::Active => {}
        // Error already has a relaunch scheduled; parked agents stay parked
        _ => return,
    }

    let restart_on_clean_exit = inner
        .configs
        .get(agent_id)
        .map(|c| c.restart_on_clean_exit)
        .unwrap_or(true);
    if info.is_clean() && !restart_on_clean_exit {
        if let Some(handle) = rt.monitor.take() {
            handle.abort();
        }
        rt.process = None;
        rt.status = AgentStatus::Stopped;
        info!(agent = %agent_id, "agent exited cleanly, leaving stopped");
        return;
    }

    warn!(agent = %agent_id, code = ?info.code, "agent exited unexpectedly");
    fail_agent(inner, agent_id, rt, true).await;
}

async fn handle_agent_message(inner: &Arc<Inner>, agent_id: &str, message: AgentMessage) {
    match message {
        AgentMessage::CapabilityUpdate { capabilities } => {
            info!(agent = %agent_id, ?capabilities, "capability update");
            inner.events.emit(SupervisorEvent::CapabilityUpdate {
                id: agent_id.to_string(),
                capabilities,
            });
        }
        AgentMessage::Metrics { metrics } => {
            {
                let mut agents = inner.agents.write().await;
                if let Some(rt) = agents.get_mut(agent_id) {
                    rt.latest_metrics = Some(metrics.clone());
                }
            }
            inner.events.emit(SupervisorEvent::AgentMetrics {
                id: agent_id.to_string(),
                metrics,
            });
            publish_agent_metrics(inner, agent_id).await;
        }
        AgentMessage::Log { level, message } => match level {
            LogLevel::Trace => tracing::trace!(agent = %agent_id, "{}", message),
            LogLevel::Debug => debug!(agent = %agent_id, "{}", message),
            LogLevel::Info => info!(agent = %agent_id, "{}", message),
            LogLevel::Warn => warn!(agent = %agent_id, "{}", message),
            LogLevel::Error => error!(agent = %agent_id, "{}", message),
        },
        other => {
            debug!(agent = %agent_id, ?other, "unexpected message from agent");
        }
    }
}

/// Route a failed agent through the restart policy
///
/// Called with the agents write lock held via `rt`. On a health failure
/// the process is left running and its monitor keeps probing, so the
/// agent can still recover before the scheduled relaunch fires; a fired
/// relaunch replaces the process either way. On a process exit the dead
/// handle and its monitor are dropped immediately.
fn fail_agent<'a>(
    inner: &'a Arc<Inner>,
    agent_id: &'a str,
    rt: &'a mut AgentRuntime,
    exited: bool,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
    let Some(cfg) = inner.configs.get(agent_id) else {
        return;
    };
    if exited {
        if let Some(handle) = rt.monitor.take() {
            handle.abort();
        }
        rt.process = None;
    }
    rt.status = AgentStatus::Error;

    match decide(
        rt.restart_count,
        cfg.max_restarts,
        cfg.restart_delay,
        inner.backoff.as_ref(),
    ) {
        RestartDecision::RetryAfter(delay) => {
            rt.restart_count += 1;
            info!(
                agent = %agent_id,
                restart_count = rt.restart_count,
                delay_ms = delay.as_millis() as u64,
                "relaunch scheduled"
            );
            let timer_inner = inner.clone();
            let id = agent_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                relaunch(&timer_inner, &id).await;
            });
        }
        RestartDecision::GiveUp => {
            if let Some(handle) = rt.monitor.take() {
                handle.abort();
            }
            if let Some(process) = rt.process.take() {
                process.kill().await;
            }
            rt.status = AgentStatus::Maintenance;
            error!(agent = %agent_id, "restart budget exhausted, parked in maintenance");
            inner.events.emit(SupervisorEvent::AgentFailed {
                id: agent_id.to_string(),
            });
        }
    }
    })
}

/// Fired by a relaunch timer; a no-op unless the agent still needs it
async fn relaunch(inner: &Arc<Inner>, agent_id: &str) {
    if inner.shutting_down.load(Ordering::SeqCst) {
        return;
    }
    {
        let agents = inner.agents.read().await;
        match agents.get(agent_id) {
            Some(rt) if rt.status == AgentStatus::Error => {}
            // Recovered, manually restarted, or removed in the meantime
            _ => return,
        }
    }
    let Some(cfg) = inner.configs.get(agent_id) else {
        return;
    };
    info!(agent = %agent_id, "relaunching agent");
    if let Err(e) = launch_process(inner, cfg).await {
        error!(agent = %agent_id, "relaunch failed: {}", e);
        let mut agents = inner.agents.write().await;
        if let Some(rt) = agents.get_mut(agent_id) {
            fail_agent(inner, agent_id, rt, true).await;
        }
    }
}

async fn publish_agent_metrics(inner: &Arc<Inner>, agent_id: &str) {
    let payload = {
        let agents = inner.agents.read().await;
        let Some(rt) = agents.get(agent_id) else {
            return;
        };
        json!({
            "id": agent_id,
            "status": rt.status,
            "uptimeSeconds": rt.uptime_seconds(),
            "restartCount": rt.restart_count,
            "lastCheck": rt.last_check,
            "metrics": rt.latest_metrics,
        })
    };
    let key = agent_metrics_key(agent_id);
    if let Err(e) = inner.store.put_json(&key, payload, AGENT_METRICS_TTL).await {
        // A lost snapshot must not destabilize the fleet
        warn!(agent = %agent_id, "failed to publish agent metrics: {}", e);
    }
}

/// Recompute and publish the fleet summary on a fixed cadence
async fn run_aggregation_loop(inner: Arc<Inner>) {
    let mut ticker = interval(inner.settings.aggregation_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let summary = {
            let agents = inner.agents.read().await;
            summarize(&inner.order, &agents)
        };
        match serde_json::to_value(&summary) {
            Ok(value) => {
                if let Err(e) = inner
                    .store
                    .put_json(FLEET_HEALTH_KEY, value, FLEET_HEALTH_TTL)
                    .await
                {
                    warn!("failed to publish fleet health: {}", e);
                }
            }
            Err(e) => warn!("failed to encode fleet health: {}", e),
        }
        inner.events.emit(SupervisorEvent::FleetHealth { summary });
    }
}

fn summarize(order: &[String], agents: &HashMap<String, AgentRuntime>) -> FleetHealthSummary {
    let mut records = Vec::with_capacity(order.len());
    for id in order {
        if let Some(rt) = agents.get(id) {
            records.push(AgentHealthRecord {
                id: id.clone(),
                status: rt.status,
                uptime_seconds: rt.uptime_seconds(),
                restart_count: rt.restart_count,
                last_check: rt.last_check,
            });
        }
    }
    let count =
        |status: AgentStatus| records.iter().filter(|r| r.status == status).count();
    FleetHealthSummary {
        timestamp: Utc::now(),
        total: records.len(),
        healthy: count(AgentStatus::Active),
        unhealthy: count(AgentStatus::Error),
        starting: count(AgentStatus::Starting),
        maintenance: count(AgentStatus::Maintenance),
        stopped: count(AgentStatus::Stopped),
        agents: records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pelorus_core::metrics::InMemoryMetricsStore;

    fn fleet_of(agents: Vec<AgentConfig>) -> FleetConfig {
        FleetConfig {
            supervisor: SupervisorSettings::default(),
            agents,
        }
    }

    fn supervisor_of(agents: Vec<AgentConfig>) -> AgentSupervisor {
        AgentSupervisor::new(fleet_of(agents), Arc::new(InMemoryMetricsStore::new()))
    }

    #[test]
    fn summarize_counts_by_status() {
        let order: Vec<String> = ["weather", "tidal", "routing"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut agents = HashMap::new();
        agents.insert(
            "weather".to_string(),
            AgentRuntime {
                status: AgentStatus::Active,
                ..Default::default()
            },
        );
        agents.insert(
            "tidal".to_string(),
            AgentRuntime {
                status: AgentStatus::Maintenance,
                restart_count: 3,
                ..Default::default()
            },
        );
        agents.insert(
            "routing".to_string(),
            AgentRuntime {
                status: AgentStatus::Error,
                restart_count: 1,
                ..Default::default()
            },
        );

        let summary = summarize(&order, &agents);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.unhealthy, 1);
        assert_eq!(summary.maintenance, 1);
        assert_eq!(summary.stopped, 0);
        // Rows follow configuration order
        assert_eq!(summary.agents[0].id, "weather");
        assert_eq!(summary.agents[1].id, "tidal");
        assert_eq!(summary.agents[1].restart_count, 3);
    }

    #[tokio::test]
    async fn failure_budget_parks_agent_in_maintenance() {
        let mut cfg = AgentConfig::new("weather", "weather-agent");
        cfg.max_restarts = 2;
        // Keep scheduled relaunches from firing during the test
        cfg.restart_delay = Duration::from_secs(3600);
        let sup = supervisor_of(vec![cfg]);
        let mut events = sup.subscribe();
        sup.inner
            .agents
            .write()
            .await
            .insert("weather".to_string(), AgentRuntime::default());

        for expected_count in [1u32, 2] {
            let mut agents = sup.inner.agents.write().await;
            let rt = agents.get_mut("weather").unwrap();
            rt.status = AgentStatus::Active;
            fail_agent(&sup.inner, "weather", rt, true).await;
            assert_eq!(rt.status, AgentStatus::Error);
            assert_eq!(rt.restart_count, expected_count);
        }

        {
            let mut agents = sup.inner.agents.write().await;
            let rt = agents.get_mut("weather").unwrap();
            rt.status = AgentStatus::Active;
            fail_agent(&sup.inner, "weather", rt, true).await;
            assert_eq!(rt.status, AgentStatus::Maintenance);
            assert_eq!(rt.restart_count, 2);
        }

        match events.try_recv().unwrap() {
            SupervisorEvent::AgentFailed { id } => assert_eq!(id, "weather"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn stale_health_result_from_superseded_launch_is_ignored() {
        use pelorus_core::protocol::AgentMetrics;

        let sup = supervisor_of(vec![AgentConfig::new("weather", "weather-agent")]);
        sup.inner.agents.write().await.insert(
            "weather".to_string(),
            AgentRuntime {
                status: AgentStatus::Starting,
                generation: 2,
                restart_count: 1,
                ..Default::default()
            },
        );

        let healthy_result = |generation: u64| HealthCheckResult {
            agent_id: "weather".to_string(),
            generation,
            outcome: HealthOutcome::Healthy {
                metrics: AgentMetrics::default(),
                rtt: Duration::from_millis(5),
            },
            checked_at: Utc::now(),
        };

        // A reply from the replaced process must not activate the new
        // launch
        handle_health_result(&sup.inner, healthy_result(1)).await;
        {
            let agents = sup.inner.agents.read().await;
            let rt = agents.get("weather").unwrap();
            assert_eq!(rt.status, AgentStatus::Starting);
            assert!(rt.latest_metrics.is_none());
            assert!(rt.last_check.is_none());
        }

        // The current launch's reply does
        handle_health_result(&sup.inner, healthy_result(2)).await;
        let agents = sup.inner.agents.read().await;
        let rt = agents.get("weather").unwrap();
        assert_eq!(rt.status, AgentStatus::Active);
        assert!(rt.last_healthy.is_some());
    }

    #[tokio::test]
    async fn unknown_agent_is_rejected() {
        let sup = supervisor_of(vec![]);
        match sup.restart_agent("ghost").await {
            Err(SupervisorError::AgentNotFound(id)) => assert_eq!(id, "ghost"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert!(sup.agent_status("ghost").await.is_err());
    }

    #[tokio::test]
    async fn empty_fleet_initializes_and_shuts_down_idempotently() {
        let sup = supervisor_of(vec![]);
        sup.initialize().await.unwrap();
        let summary = sup.health_summary().await;
        assert_eq!(summary.total, 0);
        sup.shutdown().await.unwrap();
        sup.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn second_initialize_is_rejected() {
        let sup = supervisor_of(vec![]);
        sup.initialize().await.unwrap();
        assert!(sup.initialize().await.is_err());
        sup.shutdown().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn manual_restart_resets_counter_and_relaunches() {
        let mut cfg = AgentConfig::new("weather", "/bin/sh");
        cfg.args = vec!["-c".to_string(), "sleep 10".to_string()];
        let sup = supervisor_of(vec![cfg]);
        sup.inner.agents.write().await.insert(
            "weather".to_string(),
            AgentRuntime {
                status: AgentStatus::Maintenance,
                restart_count: 3,
                ..Default::default()
            },
        );

        sup.restart_agent("weather").await.unwrap();

        let report = sup.agent_status("weather").await.unwrap();
        assert_eq!(report.status, AgentStatus::Starting);
        assert_eq!(report.restart_count, 0);
        assert!(report.started_at.is_some());

        sup.shutdown().await.unwrap();
    }
}
