//! Dedicated worker thread per pipeline stage.
//!
//! A [`Stage`] is driven by one OS thread. The worker applies its RT
//! configuration, calls `init`, then loops on `tick` until the shared stop
//! flag is raised or the stage halts itself. Every iteration checks the stop
//! flag first; nothing inside the loop blocks on another stage.
//!
//! Panics inside the stage are caught and reported as
//! [`WorkerExit::Panicked`] instead of tearing down the process.

use crate::core::RtConfig;
use crate::error::{SightlineError, SightlineResult};
use crossbeam::channel::{bounded, Receiver};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What a stage did in one iteration.
#[derive(Debug)]
pub enum TickOutcome {
    /// Did work; loop again immediately.
    Busy,
    /// Nothing to do; the worker sleeps for its idle interval.
    Idle,
    /// Sleep for the given duration before the next iteration.
    Sleep(Duration),
    /// Leave the loop. The error is reported as the worker's exit reason.
    Halt(SightlineError),
}

/// One long-running pipeline stage.
pub trait Stage: Send {
    /// Stage name, used for the thread name and in reports.
    fn name(&self) -> &str;

    /// Called once on the worker thread before the first tick.
    fn init(&mut self) -> SightlineResult<()> {
        Ok(())
    }

    /// One loop iteration.
    fn tick(&mut self) -> TickOutcome;

    /// Called once on the worker thread after the loop exits.
    fn shutdown(&mut self) -> SightlineResult<()> {
        Ok(())
    }
}

/// Relative scheduling priority of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPriority {
    /// nice +10
    Background,
    /// Inherit the process default
    #[default]
    Normal,
    /// nice -5
    High,
    /// SCHED_FIFO
    Realtime,
}

/// RT priority used for [`WorkerPriority::Realtime`].
pub const REALTIME_FIFO_PRIORITY: i32 = 80;

/// Placement and priority of one worker thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSpec {
    pub priority: WorkerPriority,
    /// Pin the worker to this core.
    pub core: Option<usize>,
    /// Lock process memory when this worker starts.
    pub memory_locked: bool,
}

impl WorkerSpec {
    pub fn new(priority: WorkerPriority) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    pub fn pinned(mut self, core: usize) -> Self {
        self.core = Some(core);
        self
    }

    /// Translate into the thread-level configuration applied at startup.
    pub fn rt_config(&self) -> RtConfig {
        let mut builder = RtConfig::new().memory_locked(self.memory_locked);
        builder = match self.priority {
            WorkerPriority::Background => builder.nice(10),
            WorkerPriority::Normal => builder,
            WorkerPriority::High => builder.nice(-5),
            WorkerPriority::Realtime => builder
                .scheduler(crate::core::RtScheduler::Fifo)
                .priority(REALTIME_FIFO_PRIORITY),
        };
        if let Some(core) = self.core {
            builder = builder.cpu_affinity(&[core]);
        }
        builder.build()
    }
}

/// Why a worker loop ended.
#[derive(Debug)]
pub enum WorkerExit {
    /// The stop flag was raised.
    Stopped,
    /// The stage returned [`TickOutcome::Halt`].
    Halted(SightlineError),
    /// `init` failed; the loop never ran.
    InitFailed(SightlineError),
    /// The stage panicked.
    Panicked(String),
}

impl WorkerExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, WorkerExit::Stopped)
    }
}

/// Live counters of one worker, readable from any thread.
#[derive(Debug, Default)]
pub struct WorkerStats {
    cycles: AtomicU64,
    idle_cycles: AtomicU64,
    running: AtomicBool,
}

impl WorkerStats {
    /// Loop iterations executed.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Iterations that found nothing to do.
    pub fn idle_cycles(&self) -> u64 {
        self.idle_cycles.load(Ordering::Relaxed)
    }

    /// True while the loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Shared stop flag polled by every worker.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Owner-side handle of a spawned worker.
pub(crate) struct WorkerHandle {
    pub(crate) name: String,
    pub(crate) stats: Arc<WorkerStats>,
    pub(crate) handle: Option<JoinHandle<WorkerExit>>,
    pub(crate) done_rx: Receiver<()>,
}

pub(crate) fn spawn_worker(
    mut stage: Box<dyn Stage>,
    spec: &WorkerSpec,
    stop: StopSignal,
    idle_sleep: Duration,
) -> SightlineResult<WorkerHandle> {
    let name = stage.name().to_string();
    let stats = Arc::new(WorkerStats::default());
    let (done_tx, done_rx) = bounded::<()>(1);
    let rt_config = spec.rt_config();

    let thread_stats = Arc::clone(&stats);
    let thread_name = name.clone();
    let handle = thread::Builder::new()
        .name(format!("sightline-{}", name))
        .spawn(move || {
            if let Err(e) = rt_config.apply() {
                log::warn!("[{}] RT configuration rejected: {}", thread_name, e);
            }

            thread_stats.running.store(true, Ordering::Release);
            let exit = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                run_loop(stage.as_mut(), &stop, &thread_stats, idle_sleep)
            }))
            .unwrap_or_else(|payload| {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                log::error!("[{}] worker panicked: {}", thread_name, msg);
                WorkerExit::Panicked(msg)
            });
            thread_stats.running.store(false, Ordering::Release);

            log::info!(
                "[{}] worker exited after {} cycles: {:?}",
                thread_name,
                thread_stats.cycles(),
                exit
            );
            let _ = done_tx.send(());
            exit
        })
        .map_err(|e| {
            SightlineError::Scheduling(format!("Failed to spawn worker '{}': {}", name, e))
        })?;

    log::info!("[{}] worker spawned ({:?})", name, spec.priority);
    Ok(WorkerHandle {
        name,
        stats,
        handle: Some(handle),
        done_rx,
    })
}

fn run_loop(
    stage: &mut dyn Stage,
    stop: &StopSignal,
    stats: &WorkerStats,
    idle_sleep: Duration,
) -> WorkerExit {
    if let Err(e) = stage.init() {
        log::error!("[{}] init failed: {}", stage.name(), e);
        return WorkerExit::InitFailed(e);
    }

    let mut exit = WorkerExit::Stopped;
    while !stop.is_stop_requested() {
        stats.cycles.fetch_add(1, Ordering::Relaxed);
        match stage.tick() {
            TickOutcome::Busy => {}
            TickOutcome::Idle => {
                stats.idle_cycles.fetch_add(1, Ordering::Relaxed);
                thread::sleep(idle_sleep);
            }
            TickOutcome::Sleep(d) => thread::sleep(d),
            TickOutcome::Halt(err) => {
                exit = WorkerExit::Halted(err);
                break;
            }
        }
    }

    if let Err(e) = stage.shutdown() {
        log::warn!("[{}] shutdown failed: {}", stage.name(), e);
    }
    exit
}
