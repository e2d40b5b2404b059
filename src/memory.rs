// MemoryGuard - rate-limited memory sampling with pressure response
//
// Over the threshold the guard asks the interface-owned caches to shrink.
// Job data in the queue is never touched here.

use crate::config::SettingsHandle;
use crate::metrics::Metrics;
use std::sync::Arc;
use std::time::Instant;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Fraction of the threshold that must still be exceeded after a collection
/// before off-screen state is evicted.
pub const EVICT_RATIO: f64 = 0.8;

/// Source of the current process memory usage in bytes.
#[cfg_attr(test, mockall::automock)]
pub trait MemorySampler: Send {
    /// `None` when the figure cannot be read on this platform.
    fn sample(&mut self) -> Option<u64>;
}

/// Resident memory of this process via `sysinfo`.
pub struct SysinfoSampler {
    system: System,
    pid: Option<Pid>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .inspect_err(|e| tracing::warn!("Cannot determine own pid, memory checks disabled: {}", e))
            .ok();
        Self {
            system: System::new(),
            pid,
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        self.system.process(pid).map(|process| process.memory())
    }
}

/// Cached state that can be shrunk under memory pressure.
pub trait Reclaim {
    /// Drop cached state that can be rebuilt cheaply. Returns items dropped.
    fn collect(&mut self) -> usize;

    /// Drop cached state for everything outside the visible window.
    fn evict_offscreen(&mut self) -> usize;

    /// Drop all cached state at shutdown.
    fn release(&mut self) {
        self.collect();
        self.evict_offscreen();
    }
}

/// Outcome of one [`MemoryGuard::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCheck {
    Disabled,
    /// Called again before the check interval elapsed
    Skipped,
    Unavailable,
    Normal { usage: u64 },
    Collected { before: u64, after: u64 },
    Evicted { before: u64, after: u64, evicted: usize },
}

pub struct MemoryGuard<S> {
    sampler: S,
    settings: SettingsHandle,
    metrics: Arc<Metrics>,
    last_check: Option<Instant>,
}

impl<S: MemorySampler> MemoryGuard<S> {
    pub fn new(sampler: S, settings: SettingsHandle, metrics: Arc<Metrics>) -> Self {
        Self {
            sampler,
            settings,
            metrics,
            last_check: None,
        }
    }

    /// Sample memory if the check interval has elapsed and react to pressure.
    pub fn check(&mut self, target: &mut dyn Reclaim) -> MemoryCheck {
        self.check_at(Instant::now(), target)
    }

    pub fn check_at(&mut self, now: Instant, target: &mut dyn Reclaim) -> MemoryCheck {
        let (enabled, interval, threshold) = self.settings.read(|s| {
            (
                s.memory_monitor_enabled,
                s.memory_check_interval(),
                s.memory_threshold_bytes,
            )
        });

        if !enabled {
            return MemoryCheck::Disabled;
        }
        if let Some(last) = self.last_check {
            if now.saturating_duration_since(last) < interval {
                return MemoryCheck::Skipped;
            }
        }
        self.last_check = Some(now);

        let Some(before) = self.sampler.sample() else {
            return MemoryCheck::Unavailable;
        };
        if before <= threshold {
            tracing::trace!("Memory usage {} MiB", mib(before));
            return MemoryCheck::Normal { usage: before };
        }

        tracing::warn!(
            "Memory usage {} MiB exceeds threshold {} MiB, collecting",
            mib(before),
            mib(threshold)
        );
        let collected = target.collect();
        self.metrics.record_memory_collection();
        let after = self.sampler.sample().unwrap_or(before);
        tracing::info!(
            "Memory after collection: {} MiB -> {} MiB ({} cached rows dropped)",
            mib(before),
            mib(after),
            collected
        );

        if after as f64 > threshold as f64 * EVICT_RATIO {
            let evicted = target.evict_offscreen();
            tracing::warn!(
                "Memory still high ({} MiB), evicted {} off-screen rows",
                mib(after),
                evicted
            );
            return MemoryCheck::Evicted {
                before,
                after,
                evicted,
            };
        }

        MemoryCheck::Collected { before, after }
    }
}

fn mib(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}
