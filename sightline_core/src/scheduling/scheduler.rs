//! Owner of the pipeline's worker threads.
//!
//! Stages are spawned one per thread, share a single [`StopSignal`] and are
//! joined with a bounded wait on shutdown. A worker that does not finish in
//! time is reported as [`SightlineError::JoinTimeout`] and left detached; a
//! worker that panicked is reported as [`SightlineError::WorkerPanicked`].

use super::worker::{spawn_worker, Stage, StopSignal, WorkerExit, WorkerHandle, WorkerSpec};
use crate::error::{SightlineError, SightlineResult};
use crossbeam::channel::RecvTimeoutError;
use std::time::{Duration, Instant};

/// Default sleep of a worker whose stage reported no work.
pub const DEFAULT_IDLE_SLEEP: Duration = Duration::from_micros(200);

/// Default bound on the whole shutdown sequence.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Point-in-time view of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub name: String,
    pub cycles: u64,
    pub idle_cycles: u64,
    pub running: bool,
}

/// How one worker ended.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// The thread was joined.
    Exited(WorkerExit),
    /// The thread was still running when the timeout elapsed.
    TimedOut,
}

/// Result of [`PipelineScheduler::shutdown`].
#[derive(Debug)]
pub struct ShutdownReport {
    pub outcomes: Vec<(String, WorkerOutcome)>,
    pub timeout: Duration,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// True when every worker stopped on the stop signal.
    pub fn is_clean(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, o)| matches!(o, WorkerOutcome::Exited(exit) if exit.is_clean()))
    }

    /// Errors for every worker that did not stop cleanly, in spawn order.
    pub fn errors(self) -> Vec<SightlineError> {
        let timeout = self.timeout;
        self.outcomes
            .into_iter()
            .filter_map(|(worker, outcome)| match outcome {
                WorkerOutcome::TimedOut => Some(SightlineError::JoinTimeout { worker, timeout }),
                WorkerOutcome::Exited(WorkerExit::Panicked(message)) => {
                    Some(SightlineError::WorkerPanicked { worker, message })
                }
                WorkerOutcome::Exited(WorkerExit::Halted(e))
                | WorkerOutcome::Exited(WorkerExit::InitFailed(e)) => Some(e),
                WorkerOutcome::Exited(WorkerExit::Stopped) => None,
            })
            .collect()
    }

    /// `Ok` on a clean shutdown, otherwise the first error, preferring
    /// invariant violations.
    pub fn into_result(self) -> SightlineResult<()> {
        let mut errors = self.errors();
        match errors.iter().position(|e| e.is_invariant_violation()) {
            Some(i) => Err(errors.swap_remove(i)),
            None if errors.is_empty() => Ok(()),
            None => Err(errors.swap_remove(0)),
        }
    }
}

/// Spawns and joins the pipeline's stage workers.
pub struct PipelineScheduler {
    stop: StopSignal,
    workers: Vec<WorkerHandle>,
    idle_sleep: Duration,
}

impl PipelineScheduler {
    pub fn new() -> Self {
        Self {
            stop: StopSignal::new(),
            workers: Vec::new(),
            idle_sleep: DEFAULT_IDLE_SLEEP,
        }
    }

    /// Set the sleep applied when a stage reports no work.
    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    /// Spawn `stage` on its own thread. Stage names must be unique.
    pub fn spawn(&mut self, stage: Box<dyn Stage>, spec: &WorkerSpec) -> SightlineResult<()> {
        if self.stop.is_stop_requested() {
            return Err(SightlineError::Scheduling(format!(
                "Cannot spawn '{}' after stop was requested",
                stage.name()
            )));
        }
        if self.workers.iter().any(|w| w.name == stage.name()) {
            return Err(SightlineError::Scheduling(format!(
                "Duplicate stage name '{}'",
                stage.name()
            )));
        }
        let handle = spawn_worker(stage, spec, self.stop.clone(), self.idle_sleep)?;
        self.workers.push(handle);
        Ok(())
    }

    /// Clone of the shared stop flag.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Raise the stop flag without waiting.
    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_stop_requested()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Names of workers whose loop has ended on its own.
    pub fn exited_workers(&self) -> Vec<String> {
        self.workers
            .iter()
            .filter(|w| w.handle.as_ref().is_some_and(|h| h.is_finished()))
            .map(|w| w.name.clone())
            .collect()
    }

    pub fn worker_stats(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .iter()
            .map(|w| WorkerSnapshot {
                name: w.name.clone(),
                cycles: w.stats.cycles(),
                idle_cycles: w.stats.idle_cycles(),
                running: w.stats.is_running(),
            })
            .collect()
    }

    /// Raise the stop flag and join every worker within `timeout` overall.
    pub fn shutdown(mut self, timeout: Duration) -> ShutdownReport {
        self.shutdown_inner(timeout)
    }

    fn shutdown_inner(&mut self, timeout: Duration) -> ShutdownReport {
        self.stop.request_stop();
        let start = Instant::now();
        let deadline = start + timeout;

        let mut outcomes = Vec::with_capacity(self.workers.len());
        for mut worker in self.workers.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let finished = match worker.done_rx.recv_timeout(remaining) {
                Ok(()) => true,
                // Sender dropped without a signal: the thread is gone.
                Err(RecvTimeoutError::Disconnected) => true,
                Err(RecvTimeoutError::Timeout) => false,
            };

            let outcome = match (finished, worker.handle.take()) {
                (true, Some(handle)) => match handle.join() {
                    Ok(exit) => WorkerOutcome::Exited(exit),
                    Err(_) => WorkerOutcome::Exited(WorkerExit::Panicked(
                        "worker thread unwound outside the stage loop".to_string(),
                    )),
                },
                (true, None) => WorkerOutcome::Exited(WorkerExit::Stopped),
                (false, _) => {
                    log::error!(
                        "[{}] did not stop within {:?}; detaching",
                        worker.name,
                        timeout
                    );
                    WorkerOutcome::TimedOut
                }
            };
            outcomes.push((worker.name, outcome));
        }

        let report = ShutdownReport {
            outcomes,
            timeout,
            elapsed: start.elapsed(),
        };
        log::info!(
            "Scheduler shut down in {:?} (clean: {})",
            report.elapsed,
            report.is_clean()
        );
        report
    }
}

impl Default for PipelineScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PipelineScheduler {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            let report = self.shutdown_inner(DEFAULT_SHUTDOWN_TIMEOUT);
            if let Err(e) = report.into_result() {
                log::warn!("Scheduler dropped without clean shutdown: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::worker::TickOutcome;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct Counter {
        name: &'static str,
        ticks: Arc<AtomicU64>,
    }

    impl Stage for Counter {
        fn name(&self) -> &str {
            self.name
        }

        fn tick(&mut self) -> TickOutcome {
            self.ticks.fetch_add(1, Ordering::Relaxed);
            TickOutcome::Sleep(Duration::from_micros(100))
        }
    }

    struct Stuck;

    impl Stage for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        fn tick(&mut self) -> TickOutcome {
            std::thread::sleep(Duration::from_millis(500));
            TickOutcome::Busy
        }
    }

    struct Panics;

    impl Stage for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn tick(&mut self) -> TickOutcome {
            panic!("stage blew up");
        }
    }

    /// Reports the cores its worker thread runs on.
    struct AffinityProbe {
        cores: crossbeam::channel::Sender<Vec<usize>>,
    }

    impl Stage for AffinityProbe {
        fn name(&self) -> &str {
            "affinity"
        }

        fn init(&mut self) -> SightlineResult<()> {
            let cores = crate::core::rt_config::current_affinity()?;
            let _ = self.cores.send(cores);
            Ok(())
        }

        fn tick(&mut self) -> TickOutcome {
            TickOutcome::Sleep(Duration::from_millis(1))
        }
    }

    fn wait_for(ticks: &AtomicU64, at_least: u64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while ticks.load(Ordering::Relaxed) < at_least && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_clean_shutdown() {
        let ticks = Arc::new(AtomicU64::new(0));
        let mut scheduler = PipelineScheduler::new();
        scheduler
            .spawn(
                Box::new(Counter {
                    name: "counter",
                    ticks: Arc::clone(&ticks),
                }),
                &WorkerSpec::default(),
            )
            .unwrap();
        wait_for(&ticks, 5);

        let report = scheduler.shutdown(Duration::from_secs(1));
        assert!(report.is_clean());
        assert!(report.into_result().is_ok());
        assert!(ticks.load(Ordering::Relaxed) >= 5);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let ticks = Arc::new(AtomicU64::new(0));
        let mut scheduler = PipelineScheduler::new();
        let make = || {
            Box::new(Counter {
                name: "dup",
                ticks: Arc::clone(&ticks),
            })
        };
        scheduler.spawn(make(), &WorkerSpec::default()).unwrap();
        let err = scheduler.spawn(make(), &WorkerSpec::default()).unwrap_err();
        assert!(matches!(err, SightlineError::Scheduling(_)));
        assert_eq!(scheduler.worker_count(), 1);
    }

    #[test]
    fn test_join_timeout_reported() {
        let mut scheduler = PipelineScheduler::new();
        scheduler
            .spawn(Box::new(Stuck), &WorkerSpec::default())
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let report = scheduler.shutdown(Duration::from_millis(10));
        assert!(!report.is_clean());
        match report.into_result() {
            Err(SightlineError::JoinTimeout { worker, .. }) => assert_eq!(worker, "stuck"),
            other => panic!("expected JoinTimeout, got {:?}", other),
        }
    }

    #[test]
    fn test_panic_reported() {
        let mut scheduler = PipelineScheduler::new();
        scheduler
            .spawn(Box::new(Panics), &WorkerSpec::default())
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while scheduler.exited_workers().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(scheduler.exited_workers(), vec!["panics".to_string()]);

        match scheduler.shutdown(Duration::from_secs(1)).into_result() {
            Err(SightlineError::WorkerPanicked { worker, message }) => {
                assert_eq!(worker, "panics");
                assert!(message.contains("stage blew up"));
            }
            other => panic!("expected WorkerPanicked, got {:?}", other),
        }
    }

    #[test]
    fn test_spawn_after_stop_rejected() {
        let mut scheduler = PipelineScheduler::new();
        scheduler.request_stop();
        let ticks = Arc::new(AtomicU64::new(0));
        let result = scheduler.spawn(
            Box::new(Counter {
                name: "late",
                ticks,
            }),
            &WorkerSpec::default(),
        );
        assert!(result.is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_worker_pinned_to_core() {
        // Use a core this process is allowed on.
        let core = crate::core::rt_config::current_affinity().unwrap()[0];
        let (tx, rx) = crossbeam::channel::bounded(1);
        let mut scheduler = PipelineScheduler::new();
        scheduler
            .spawn(
                Box::new(AffinityProbe { cores: tx }),
                &WorkerSpec::default().pinned(core),
            )
            .unwrap();

        let cores = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(cores, vec![core]);
        assert!(scheduler.shutdown(Duration::from_secs(1)).is_clean());
    }
}
