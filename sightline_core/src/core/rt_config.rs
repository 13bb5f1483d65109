//! Per-thread real-time configuration for pipeline workers.
//!
//! A worker applies its [`RtConfig`] to itself right after spawning:
//! scheduler policy and priority, niceness for threads that stay on the
//! normal scheduler, an optional CPU pin and optional `mlockall`. Missing
//! permissions are not fatal unless asked for; each feature that could not
//! be applied is reported as an [`RtDegradation`].
//!
//! # Example
//!
//! ```rust,no_run
//! use sightline_core::core::{RtConfig, RtScheduler};
//!
//! let config = RtConfig::new()
//!     .scheduler(RtScheduler::Fifo)
//!     .priority(80)
//!     .cpu_affinity(&[2])
//!     .build();
//!
//! match config.apply() {
//!     Ok(result) => println!("{:?}", result),
//!     Err(e) => eprintln!("rejected: {}", e),
//! }
//! ```

use std::io;

/// Scheduler policy of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RtScheduler {
    /// SCHED_OTHER
    #[default]
    Normal,
    /// SCHED_FIFO
    Fifo,
    /// SCHED_RR
    RoundRobin,
}

/// Outcome of [`RtConfig::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtApplyResult {
    FullSuccess,
    /// Applied, minus the listed features.
    Degraded(Vec<RtDegradation>),
}

/// A requested feature the thread did not get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtDegradation {
    MemoryLockUnavailable(String),
    /// The RT priority was outside the range the kernel accepts
    PriorityClamped { requested: i32, actual: i32 },
    /// The thread stayed on the normal scheduler
    SchedulerDegraded(String),
    NiceUnavailable(String),
    AffinityUnavailable(String),
}

/// Host limits relevant to worker placement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtLimits {
    /// Kernel built with PREEMPT_RT
    pub preempt_rt: bool,
    pub min_rt_priority: i32,
    pub max_rt_priority: i32,
    pub cpu_count: usize,
}

impl RtLimits {
    pub fn detect() -> Self {
        let (min_rt_priority, max_rt_priority) = sys::fifo_priority_range();
        Self {
            preempt_rt: sys::preempt_rt(),
            min_rt_priority,
            max_rt_priority,
            cpu_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Builder for [`RtConfig`].
#[derive(Debug, Clone, Default)]
pub struct RtConfigBuilder {
    config: RtConfig,
}

impl RtConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock current and future pages (`mlockall`). Process-wide.
    pub fn memory_locked(mut self, locked: bool) -> Self {
        self.config.memory_locked = locked;
        self
    }

    /// RT priority, clamped to the kernel's range when applied.
    pub fn priority(mut self, priority: i32) -> Self {
        self.config.priority = Some(priority);
        self
    }

    /// Niceness (-20..=19) for a thread on the normal scheduler.
    pub fn nice(mut self, nice: i32) -> Self {
        self.config.nice = Some(nice.clamp(-20, 19));
        self
    }

    pub fn scheduler(mut self, scheduler: RtScheduler) -> Self {
        self.config.scheduler = scheduler;
        self
    }

    /// Restrict the thread to `cpus`.
    pub fn cpu_affinity(mut self, cpus: &[usize]) -> Self {
        self.config.cpu_affinity = Some(cpus.to_vec());
        self
    }

    /// Turn any degradation into an error.
    pub fn fail_on_degradation(mut self, fail: bool) -> Self {
        self.config.fail_on_degradation = fail;
        self
    }

    pub fn build(self) -> RtConfig {
        self.config
    }
}

/// Real-time settings for one worker thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtConfig {
    memory_locked: bool,
    priority: Option<i32>,
    nice: Option<i32>,
    scheduler: RtScheduler,
    cpu_affinity: Option<Vec<usize>>,
    fail_on_degradation: bool,
}

impl RtConfig {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> RtConfigBuilder {
        RtConfigBuilder::new()
    }

    /// SCHED_FIFO at `priority`, optionally pinned to `core`.
    pub fn fifo(priority: i32, core: Option<usize>) -> Self {
        let builder = Self::new().scheduler(RtScheduler::Fifo).priority(priority);
        match core {
            Some(core) => builder.cpu_affinity(&[core]).build(),
            None => builder.build(),
        }
    }

    pub fn scheduler_policy(&self) -> RtScheduler {
        self.scheduler
    }

    pub fn requested_priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn requested_nice(&self) -> Option<i32> {
        self.nice
    }

    pub fn cpus(&self) -> Option<&[usize]> {
        self.cpu_affinity.as_deref()
    }

    /// True when applying would change nothing.
    pub fn is_noop(&self) -> bool {
        *self
            == Self {
                fail_on_degradation: self.fail_on_degradation,
                ..Self::default()
            }
    }

    /// Apply to the calling thread.
    pub fn apply(&self) -> io::Result<RtApplyResult> {
        if self.is_noop() {
            return Ok(RtApplyResult::FullSuccess);
        }

        let limits = RtLimits::detect();
        let mut degraded = Vec::new();

        if self.memory_locked {
            if let Err(e) = sys::lock_memory() {
                degraded.push(RtDegradation::MemoryLockUnavailable(e.to_string()));
            }
        }

        if self.scheduler != RtScheduler::Normal {
            let requested = self.priority.unwrap_or(limits.min_rt_priority);
            let actual = requested.clamp(limits.min_rt_priority, limits.max_rt_priority);
            match sys::set_scheduler(self.scheduler, actual) {
                Ok(()) if actual != requested => {
                    degraded.push(RtDegradation::PriorityClamped { requested, actual })
                }
                Ok(()) => {}
                Err(e) => degraded.push(RtDegradation::SchedulerDegraded(format!(
                    "{:?} at {}: {}",
                    self.scheduler, actual, e
                ))),
            }
        }

        if let Some(nice) = self.nice {
            if let Err(e) = sys::set_nice(nice) {
                degraded.push(RtDegradation::NiceUnavailable(format!("nice {}: {}", nice, e)));
            }
        }

        if let Some(cpus) = &self.cpu_affinity {
            let result = match cpus.iter().find(|&&cpu| cpu >= limits.cpu_count) {
                _ if cpus.is_empty() => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "empty CPU list",
                )),
                Some(cpu) => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("core {} out of range (host has {})", cpu, limits.cpu_count),
                )),
                None => sys::set_affinity(cpus),
            };
            if let Err(e) = result {
                degraded.push(RtDegradation::AffinityUnavailable(e.to_string()));
            }
        }

        if degraded.is_empty() {
            return Ok(RtApplyResult::FullSuccess);
        }
        for d in &degraded {
            log::warn!("RT setting not applied: {:?}", d);
        }
        if self.fail_on_degradation {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} RT setting(s) not applied: {:?}", degraded.len(), degraded),
            ));
        }
        Ok(RtApplyResult::Degraded(degraded))
    }
}

/// Cores the calling thread may run on.
pub fn current_affinity() -> io::Result<Vec<usize>> {
    sys::affinity()
}

#[cfg(target_os = "linux")]
mod sys {
    use super::RtScheduler;
    use std::io;
    use std::mem;

    fn check(result: libc::c_int) -> io::Result<()> {
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub(super) fn preempt_rt() -> bool {
        std::fs::read_to_string("/proc/version")
            .map(|v| v.contains("PREEMPT_RT") || v.contains("PREEMPT RT"))
            .unwrap_or(false)
            || std::path::Path::new("/sys/kernel/realtime").exists()
    }

    pub(super) fn fifo_priority_range() -> (i32, i32) {
        // SAFETY: pure queries
        unsafe {
            (
                libc::sched_get_priority_min(libc::SCHED_FIFO).max(1),
                libc::sched_get_priority_max(libc::SCHED_FIFO).max(1),
            )
        }
    }

    pub(super) fn lock_memory() -> io::Result<()> {
        // SAFETY: flags only
        check(unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) })
    }

    pub(super) fn set_scheduler(scheduler: RtScheduler, priority: i32) -> io::Result<()> {
        let (policy, priority) = match scheduler {
            RtScheduler::Normal => (libc::SCHED_OTHER, 0),
            RtScheduler::Fifo => (libc::SCHED_FIFO, priority),
            RtScheduler::RoundRobin => (libc::SCHED_RR, priority),
        };
        let param = libc::sched_param {
            sched_priority: priority,
        };
        // SAFETY: pid 0 is the calling thread
        check(unsafe { libc::sched_setscheduler(0, policy, &param) })
    }

    pub(super) fn set_nice(nice: i32) -> io::Result<()> {
        // SAFETY: on Linux setpriority with a tid targets only that thread
        check(unsafe {
            let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
            libc::setpriority(libc::PRIO_PROCESS, tid, nice)
        })
    }

    pub(super) fn set_affinity(cpus: &[usize]) -> io::Result<()> {
        // SAFETY: the set is zeroed and only indexed with in-range cores
        unsafe {
            let mut set: libc::cpu_set_t = mem::zeroed();
            for &cpu in cpus {
                libc::CPU_SET(cpu, &mut set);
            }
            check(libc::sched_setaffinity(
                0,
                mem::size_of::<libc::cpu_set_t>(),
                &set,
            ))
        }
    }

    pub(super) fn affinity() -> io::Result<Vec<usize>> {
        // SAFETY: the kernel fills the zeroed set
        unsafe {
            let mut set: libc::cpu_set_t = mem::zeroed();
            check(libc::sched_getaffinity(
                0,
                mem::size_of::<libc::cpu_set_t>(),
                &mut set,
            ))?;
            let bits = 8 * mem::size_of::<libc::cpu_set_t>();
            Ok((0..bits).filter(|&cpu| libc::CPU_ISSET(cpu, &set)).collect())
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use super::RtScheduler;
    use std::io;

    fn unsupported<T>() -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "thread RT settings are only implemented on Linux",
        ))
    }

    pub(super) fn preempt_rt() -> bool {
        false
    }

    pub(super) fn fifo_priority_range() -> (i32, i32) {
        (0, 0)
    }

    pub(super) fn lock_memory() -> io::Result<()> {
        unsupported()
    }

    pub(super) fn set_scheduler(_scheduler: RtScheduler, _priority: i32) -> io::Result<()> {
        unsupported()
    }

    pub(super) fn set_nice(_nice: i32) -> io::Result<()> {
        unsupported()
    }

    pub(super) fn set_affinity(_cpus: &[usize]) -> io::Result<()> {
        unsupported()
    }

    pub(super) fn affinity() -> io::Result<Vec<usize>> {
        let n = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Ok((0..n).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_noop() {
        let config = RtConfig::new().build();
        assert!(config.is_noop());
        assert!(RtConfig::new().fail_on_degradation(true).build().is_noop());
        assert_eq!(config.apply().unwrap(), RtApplyResult::FullSuccess);
    }

    #[test]
    fn test_builder_records_request() {
        let config = RtConfig::new()
            .memory_locked(true)
            .priority(80)
            .scheduler(RtScheduler::Fifo)
            .cpu_affinity(&[0, 1])
            .build();
        assert!(!config.is_noop());
        assert_eq!(config.requested_priority(), Some(80));
        assert_eq!(config.scheduler_policy(), RtScheduler::Fifo);
        assert_eq!(config.cpus(), Some(&[0, 1][..]));
    }

    #[test]
    fn test_nice_is_clamped() {
        assert_eq!(RtConfig::new().nice(40).build().requested_nice(), Some(19));
        assert_eq!(RtConfig::new().nice(-99).build().requested_nice(), Some(-20));
    }

    #[test]
    fn test_fifo_preset() {
        let config = RtConfig::fifo(70, Some(1));
        assert_eq!(config.scheduler_policy(), RtScheduler::Fifo);
        assert_eq!(config.requested_priority(), Some(70));
        assert_eq!(config.cpus(), Some(&[1][..]));
        assert_eq!(RtConfig::fifo(70, None).cpus(), None);
    }

    #[test]
    fn test_missing_core_degrades() {
        let config = RtConfig::new().cpu_affinity(&[usize::MAX / 2]).build();
        match config.apply().unwrap() {
            RtApplyResult::Degraded(d) => {
                assert!(matches!(d.as_slice(), [RtDegradation::AffinityUnavailable(_)]))
            }
            RtApplyResult::FullSuccess => panic!("nonexistent core cannot be pinned"),
        }
    }

    #[test]
    fn test_fail_on_degradation() {
        let config = RtConfig::new()
            .cpu_affinity(&[usize::MAX / 2])
            .fail_on_degradation(true)
            .build();
        assert!(config.apply().is_err());
    }

    #[test]
    fn test_host_limits() {
        assert!(RtLimits::detect().cpu_count > 0);
        assert!(!current_affinity().unwrap().is_empty());
    }
}
