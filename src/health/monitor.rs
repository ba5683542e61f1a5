//! Pump and gauge safety monitor
//!
//! One [`SafetyMonitor`] owns at most one monitoring session. A session polls
//! the pump's quick status and the gauge pressure, immediately on start and
//! then once per period, and ends itself (failed) on the first unhealthy
//! reading or device fault. There are no retries.
//!
//! Each session gets a generation number. Stopping bumps the generation
//! before anything else, signals the task and waits for it to exit, so a tick
//! scheduled before `stop` can neither run nor report once `stop` returns.

use super::policy::{HealthPolicy, FAULT_ERROR_MASK, FAULT_PRESSURE, FAULT_SPEED_HZ};
use crate::error::{RoughError, RoughResult};
use crate::instrument::status_word::error_summary;
use crate::instrument::{GaugeDriver, PumpDriver, QuickStatus};
use crate::observation::{Event, ObservationSink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shortest period a session will poll at.
pub const MIN_PERIOD: Duration = Duration::from_millis(100);

/// Clamp a requested period in seconds to at least [`MIN_PERIOD`].
pub fn clamp_period(secs: f64) -> Duration {
    let secs = secs.max(MIN_PERIOD.as_secs_f64());
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stopped on request.
    Clean,
    /// Stopped itself on an unhealthy reading or a fault.
    Failed,
}

/// Lifecycle of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// No session has run yet.
    Idle,
    /// A session is active.
    Running {
        /// Effective polling period.
        period: Duration,
    },
    /// The last session has ended.
    Stopped(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Healthy,
    Unhealthy,
    Fault,
    /// The session was stopped while the tick was reading.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Failed,
}

/// Everything a tick needs, owned by the session task.
struct TickContext {
    source: String,
    pump: PumpDriver,
    gauge: GaugeDriver,
    sink: ObservationSink,
    policy: HealthPolicy,
    generation: Arc<AtomicU64>,
    session_id: u64,
}

impl TickContext {
    fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.session_id
    }

    async fn read_devices(&self) -> RoughResult<(QuickStatus, f64)> {
        let status = self.pump.quick_status().await?;
        let pressure = self.gauge.pressure().await?;
        Ok((status, pressure))
    }

    async fn tick(&self) -> TickOutcome {
        let reading = self.read_devices().await;
        if !self.is_current() {
            return TickOutcome::Superseded;
        }

        match reading {
            Err(e) => {
                self.sink.fail(
                    &self.source,
                    Event::MonitorTick {
                        pressure: FAULT_PRESSURE,
                        speed: FAULT_SPEED_HZ,
                        error_mask: FAULT_ERROR_MASK,
                        error_summary: error_summary(FAULT_ERROR_MASK),
                        fault: Some(e.to_string()),
                    },
                );
                TickOutcome::Fault
            }
            Ok((status, pressure)) => {
                let healthy = self.policy.is_healthy(&status, pressure);
                let event = Event::MonitorTick {
                    pressure,
                    speed: status.speed_hz,
                    error_mask: status.error_mask,
                    error_summary: status.error_summary,
                    fault: None,
                };
                if healthy {
                    self.sink.inform(&self.source, event);
                    TickOutcome::Healthy
                } else {
                    self.sink.warn(&self.source, event);
                    TickOutcome::Unhealthy
                }
            }
        }
    }

    fn report_failed_stop(&self) {
        error!(session = self.session_id, "monitor loop stopped on failure");
        self.sink.fail(&self.source, Event::LoopStopped);
    }
}

async fn run_session(
    ctx: TickContext,
    period: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> SessionEnd {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => return SessionEnd::Cancelled,
            _ = tokio::time::sleep(period) => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = &mut shutdown_rx => return SessionEnd::Cancelled,
            outcome = ctx.tick() => outcome,
        };

        match outcome {
            TickOutcome::Healthy => {}
            TickOutcome::Superseded => return SessionEnd::Cancelled,
            TickOutcome::Unhealthy | TickOutcome::Fault => {
                ctx.report_failed_stop();
                return SessionEnd::Failed;
            }
        }
    }
}

/// The active session. Only [`SafetyMonitor::start`] creates one.
struct MonitorSession {
    id: u64,
    period: Duration,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<SessionEnd>,
}

/// Supervises the pump and gauge with a single cancellable polling loop
///
/// Must be used from within a tokio runtime.
///
/// # Example
///
/// ```no_run
/// # use roughd::health::SafetyMonitor;
/// # async fn demo(mut monitor: SafetyMonitor) -> roughd::error::RoughResult<()> {
/// monitor.start(5.0).await?;   // first reading happens before this returns
/// // ...
/// monitor.stop().await;        // no tick runs after this returns
/// # Ok(())
/// # }
/// ```
pub struct SafetyMonitor {
    name: String,
    pump: PumpDriver,
    gauge: GaugeDriver,
    sink: ObservationSink,
    policy: HealthPolicy,
    generation: Arc<AtomicU64>,
    session: Option<MonitorSession>,
    last_stop: Option<StopReason>,
}

impl SafetyMonitor {
    /// Create an idle monitor over `pump` and `gauge`.
    pub fn new(
        pump: PumpDriver,
        gauge: GaugeDriver,
        sink: ObservationSink,
        policy: HealthPolicy,
    ) -> Self {
        Self {
            name: "monitor".to_string(),
            pump,
            gauge,
            sink,
            policy,
            generation: Arc::new(AtomicU64::new(0)),
            session: None,
            last_stop: None,
        }
    }

    /// Health predicate in use.
    pub fn policy(&self) -> HealthPolicy {
        self.policy
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MonitorState {
        match &self.session {
            Some(session) if !session.task.is_finished() => MonitorState::Running {
                period: session.period,
            },
            Some(_) => MonitorState::Stopped(StopReason::Failed),
            None => self.last_stop.map_or(MonitorState::Idle, MonitorState::Stopped),
        }
    }

    /// Effective period of the running session.
    pub fn period(&self) -> Option<Duration> {
        match self.state() {
            MonitorState::Running { period } => Some(period),
            _ => None,
        }
    }

    /// Forget a session whose task has already ended on its own.
    fn reap(&mut self) {
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.task.is_finished())
        {
            self.session = None;
            self.last_stop = Some(StopReason::Failed);
        }
    }

    /// Start a session polling every `period_secs` (at least [`MIN_PERIOD`]).
    ///
    /// The first tick runs before this returns. If it is unhealthy the
    /// session never gets scheduled and the returned state is
    /// `Stopped(Failed)`.
    ///
    /// # Errors
    ///
    /// `RoughError::AlreadyRunning` if a session is active; that session is
    /// left untouched.
    pub async fn start(&mut self, period_secs: f64) -> RoughResult<MonitorState> {
        self.reap();
        if let Some(session) = &self.session {
            return Err(RoughError::AlreadyRunning {
                interval: session.period,
            });
        }

        let period = clamp_period(period_secs);
        let session_id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ctx = TickContext {
            source: self.name.clone(),
            pump: self.pump.clone(),
            gauge: self.gauge.clone(),
            sink: self.sink.clone(),
            policy: self.policy,
            generation: Arc::clone(&self.generation),
            session_id,
        };

        info!(session = session_id, ?period, "starting monitor loop");
        self.sink
            .inform(&self.name, Event::MonitorStarted { period });

        match ctx.tick().await {
            TickOutcome::Healthy => {}
            TickOutcome::Unhealthy | TickOutcome::Fault | TickOutcome::Superseded => {
                ctx.report_failed_stop();
                self.last_stop = Some(StopReason::Failed);
                return Ok(MonitorState::Stopped(StopReason::Failed));
            }
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(ctx, period, shutdown_rx));
        self.session = Some(MonitorSession {
            id: session_id,
            period,
            shutdown_tx,
            task,
        });
        self.last_stop = None;
        Ok(MonitorState::Running { period })
    }

    /// Stop the active session.
    ///
    /// Without an active session this only emits a "no loop to stop" warning.
    pub async fn stop(&mut self) -> MonitorState {
        self.reap();
        let Some(session) = self.session.take() else {
            self.sink.warn(&self.name, Event::NoLoopToStop);
            return self.state();
        };

        // Invalidate first: a tick finishing its reads from here on reports nothing.
        self.generation.fetch_add(1, Ordering::SeqCst);
        let _ = session.shutdown_tx.send(());

        let end = match session.task.await {
            Ok(end) => end,
            Err(e) => {
                error!(session = session.id, "monitor task ended abnormally: {e}");
                self.sink.fail(&self.name, Event::LoopStopped);
                self.last_stop = Some(StopReason::Failed);
                return MonitorState::Stopped(StopReason::Failed);
            }
        };

        let reason = match end {
            SessionEnd::Cancelled => {
                info!(session = session.id, "monitor loop stopped");
                self.sink.inform(&self.name, Event::LoopStopped);
                StopReason::Clean
            }
            // The task reported its own failure before exiting.
            SessionEnd::Failed => StopReason::Failed,
        };
        self.last_stop = Some(reason);
        MonitorState::Stopped(reason)
    }

    /// Monitor control surface: a positive period starts, anything else stops.
    pub async fn set_period(&mut self, period_secs: f64) -> RoughResult<MonitorState> {
        if period_secs > 0.0 {
            self.start(period_secs).await
        } else {
            Ok(self.stop().await)
        }
    }

    /// Wait until the active session ends on its own.
    ///
    /// Returns immediately when no session is running.
    pub async fn wait(&mut self) -> MonitorState {
        if let Some(session) = self.session.as_mut() {
            let end = (&mut session.task).await;
            self.session = None;
            self.last_stop = Some(match end {
                Ok(SessionEnd::Cancelled) => StopReason::Clean,
                Ok(SessionEnd::Failed) | Err(_) => StopReason::Failed,
            });
        }
        self.state()
    }
}

impl Drop for SafetyMonitor {
    fn drop(&mut self) {
        // Dropping the session's shutdown sender ends its task.
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
