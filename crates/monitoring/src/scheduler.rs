//! Pull-mode capture scheduling
//!
//! Each active session owns one capture device and one recurring task. The
//! task ticks on a fixed interval; every tick reads a frame, analyzes it and
//! dispatches the verdict. Ticks of one session never overlap, ticks of
//! different sessions run concurrently up to `max_concurrent_ticks`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use camera_capture::{CameraConfig, CameraError, CaptureDevice, CaptureOpener};
use dashmap::DashSet;
use face_analysis::{ActivityVerdict, FrameAnalysisPipeline};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::registry::{Session, SessionRegistry};
use crate::sink::VerdictRecorder;
use crate::MonitorError;

/// Upper bound on the default worker pool
const MAX_DEFAULT_POOL: usize = 100;

fn default_pool_size() -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    (cpus * 2).min(MAX_DEFAULT_POOL)
}

/// Configuration for the capture scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval between captures of one session in milliseconds
    pub interval_ms: u64,
    /// Ticks allowed to run at the same time across all sessions
    pub max_concurrent_ticks: usize,
    /// Device settings used for every session
    pub camera: CameraConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            max_concurrent_ticks: default_pool_size(),
            camera: CameraConfig::default(),
        }
    }
}

type SharedDevice = Arc<Mutex<Box<dyn CaptureDevice>>>;

/// Cancellation handle of a session's recurring task.
///
/// Cancelling stops the task before its next tick; a tick already running
/// is left to finish.
struct ScheduleHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Marks a session id as being started until dropped
struct StartClaim<'a> {
    starting: &'a DashSet<String>,
    session_id: String,
}

impl Drop for StartClaim<'_> {
    fn drop(&mut self) {
        self.starting.remove(&self.session_id);
    }
}

/// Resources owned by a pull-mode session
struct PullHandles {
    device: SharedDevice,
    schedule: ScheduleHandle,
}

/// Everything a tick needs, captured once when the session starts
#[derive(Clone)]
struct TickContext {
    session_id: String,
    exam_id: String,
    device: SharedDevice,
    pipeline: Arc<FrameAnalysisPipeline>,
    recorder: VerdictRecorder,
}

impl TickContext {
    /// One capture + analysis pass. Blocking.
    fn run(&self) -> Result<ActivityVerdict, MonitorError> {
        let frame = {
            let mut device = self
                .device
                .lock()
                .map_err(|_| MonitorError::Task("capture device lock poisoned".into()))?;
            device.read_frame()?
        };

        let analysis = self.pipeline.analyze(&frame)?;
        self.recorder
            .report(&self.session_id, &self.exam_id, &frame, &analysis.verdict);
        Ok(analysis.verdict)
    }
}

/// Periodic capture for sessions that pull frames from a device
pub struct CaptureScheduler {
    config: SchedulerConfig,
    registry: Arc<SessionRegistry<PullHandles>>,
    opener: Arc<dyn CaptureOpener>,
    pipeline: Arc<FrameAnalysisPipeline>,
    recorder: VerdictRecorder,
    permits: Arc<Semaphore>,
    starting: DashSet<String>,
}

impl CaptureScheduler {
    pub fn new(
        config: SchedulerConfig,
        opener: Arc<dyn CaptureOpener>,
        pipeline: Arc<FrameAnalysisPipeline>,
        recorder: VerdictRecorder,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_ticks.max(1)));
        info!(
            "Capture scheduler: interval {} ms, {} concurrent ticks",
            config.interval_ms, config.max_concurrent_ticks
        );
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            opener,
            pipeline,
            recorder,
            permits,
            starting: DashSet::new(),
        }
    }

    /// Start monitoring a session.
    ///
    /// A no-op when the session is already monitored or being started by
    /// another call; only one device is ever opened per session. Fails,
    /// registering nothing, when the capture device cannot be opened.
    pub async fn start_monitoring(&self, session_id: &str, exam_id: &str) -> Result<(), MonitorError> {
        if self.registry.contains(session_id) {
            debug!(session_id, "Session already monitored");
            return Ok(());
        }
        if !self.starting.insert(session_id.to_string()) {
            debug!(session_id, "Session start already in progress");
            return Ok(());
        }
        let _claim = StartClaim {
            starting: &self.starting,
            session_id: session_id.to_string(),
        };
        // a concurrent start may have finished between the check and the claim
        if self.registry.contains(session_id) {
            return Ok(());
        }

        let opener = Arc::clone(&self.opener);
        let camera = self.config.camera.clone();
        let device = tokio::task::spawn_blocking(move || opener.open(&camera))
            .await
            .map_err(|e| MonitorError::Task(e.to_string()))?
            .map_err(|source| {
                error!(session_id, "Failed to open capture device: {}", source);
                MonitorError::DeviceOpen {
                    session_id: session_id.to_string(),
                    source,
                }
            })?;
        let device: SharedDevice = Arc::new(Mutex::new(device));

        let inserted = self.registry.insert_if_absent(session_id, || {
            let context = TickContext {
                session_id: session_id.to_string(),
                exam_id: exam_id.to_string(),
                device: Arc::clone(&device),
                pipeline: Arc::clone(&self.pipeline),
                recorder: self.recorder.clone(),
            };
            let schedule = self.spawn_schedule(context);
            Session::active(session_id, exam_id, PullHandles { device: Arc::clone(&device), schedule })
        });
        if !inserted {
            warn!(session_id, "Session registered while its start was claimed");
            release_device(device).await?;
            return Ok(());
        }

        info!(session_id, exam_id, "Started monitoring");
        Ok(())
    }

    /// Stop monitoring a session. Returns false for unknown sessions.
    ///
    /// Returns without waiting for a running tick. The device is released
    /// in the background once the session's task has finished; failures
    /// are logged.
    pub fn stop_monitoring(&self, session_id: &str) -> bool {
        self.stop_session(session_id).is_some()
    }

    pub fn is_monitoring(&self, session_id: &str) -> bool {
        self.registry.contains(session_id)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.registry.session_ids()
    }

    /// Stop every session and wait until all devices are released
    pub async fn shutdown(&self) {
        let sessions = self.registry.session_ids();
        info!("Shutting down {} monitoring sessions", sessions.len());

        let releases: Vec<_> = sessions
            .iter()
            .filter_map(|session_id| self.stop_session(session_id))
            .collect();
        for release in releases {
            if let Err(e) = release.await {
                error!("Device release task failed: {}", e);
            }
        }
    }

    fn stop_session(&self, session_id: &str) -> Option<JoinHandle<()>> {
        let Some(session) = self.registry.remove(session_id) else {
            debug!(session_id, "No active session to stop");
            return None;
        };

        let PullHandles { device, schedule } = session.handles;
        schedule.cancel();
        info!(session_id, exam_id = %session.exam_id, "Stopped monitoring");

        let session_id = session.session_id;
        Some(tokio::spawn(async move {
            if let Err(e) = schedule.task.await {
                error!(session_id = %session_id, "Monitoring task panicked: {}", e);
            }
            match release_device(device).await {
                Ok(()) => debug!(session_id = %session_id, "Capture device released"),
                Err(e) => warn!(session_id = %session_id, "Failed to release capture device: {}", e),
            }
        }))
    }

    fn spawn_schedule(&self, context: TickContext) -> ScheduleHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let period = Duration::from_millis(self.config.interval_ms.max(1));
        let permits = Arc::clone(&self.permits);
        let task = tokio::spawn(run_schedule(context, period, permits, cancel_rx));
        ScheduleHandle {
            cancel: cancel_tx,
            task,
        }
    }
}

async fn run_schedule(
    context: TickContext,
    period: Duration,
    permits: Arc<Semaphore>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.changed() => break,
            _ = ticker.tick() => {}
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.changed() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        if *cancel.borrow() {
            break;
        }

        let tick = context.clone();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            tick.run()
        })
        .await;

        match result {
            Ok(Ok(verdict)) => debug!(
                session_id = %context.session_id,
                category = %verdict.category,
                "Tick complete"
            ),
            Ok(Err(e)) => warn!(session_id = %context.session_id, "Monitoring tick failed: {}", e),
            Err(e) => error!(session_id = %context.session_id, "Monitoring tick panicked: {}", e),
        }
    }

    debug!(session_id = %context.session_id, "Schedule finished");
}

/// Release a device on a blocking thread
async fn release_device(device: SharedDevice) -> Result<(), MonitorError> {
    tokio::task::spawn_blocking(move || -> Result<(), CameraError> {
        let mut device = device.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        device.release()
    })
    .await
    .map_err(|e| MonitorError::Task(e.to_string()))?
    .map_err(MonitorError::from)
}
