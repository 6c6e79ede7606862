//! Periodic CPU/memory/swap sampling producing a pressure level and a recommended
//! ingest concurrency, built on `sysinfo`.

use sysinfo::System;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    Nominal,
    Warning,
    Critical,
}

const SWAP_CRITICAL_RATIO: f64 = 0.75;
const MEM_CRITICAL_RATIO: f64 = 0.95;
const SWAP_WARNING_RATIO: f64 = 0.50;
const MEM_WARNING_RATIO: f64 = 0.85;

const SPAWN_MAX_CPU_LOAD: f64 = 70.0;
const SPAWN_MIN_AVAIL_RATIO: f64 = 0.15;
const SPAWN_MAX_SWAP_RATIO: f64 = 0.40;

struct Sample {
    cpu_load: f64,
    mem_ratio: f64,
    avail_ratio: f64,
    swap_ratio: f64,
}

/// Refreshed on each sample call rather than held resident, so a reading is never stale.
pub struct CapacityMonitor;

impl Default for CapacityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl CapacityMonitor {
    pub fn new() -> Self {
        Self
    }

    fn sample(&self) -> Option<Sample> {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_usage();

        let total_mem = system.total_memory();
        if total_mem == 0 {
            return None;
        }
        let mem_ratio = system.used_memory() as f64 / total_mem as f64;
        let avail_ratio = system.available_memory() as f64 / total_mem as f64;

        let total_swap = system.total_swap();
        let swap_ratio = if total_swap == 0 {
            0.0
        } else {
            system.used_swap() as f64 / total_swap as f64
        };

        let cpu_load = f64::from(system.global_cpu_usage());

        Some(Sample {
            cpu_load,
            mem_ratio,
            avail_ratio,
            swap_ratio,
        })
    }

    /// Sampling failure fails open: treated as `Nominal` and logged.
    pub fn pressure_level(&self) -> PressureLevel {
        let Some(sample) = self.sample() else {
            warn!("capacity sampling failed; assuming nominal pressure");
            return PressureLevel::Nominal;
        };

        if sample.swap_ratio > SWAP_CRITICAL_RATIO || sample.mem_ratio > MEM_CRITICAL_RATIO {
            PressureLevel::Critical
        } else if sample.swap_ratio > SWAP_WARNING_RATIO || sample.mem_ratio > MEM_WARNING_RATIO {
            PressureLevel::Warning
        } else {
            PressureLevel::Nominal
        }
    }

    /// Fails open (`true`) when sampling can't be performed.
    pub fn can_spawn_worker(&self) -> bool {
        let Some(sample) = self.sample() else {
            warn!("capacity sampling failed; assuming worker can spawn");
            return true;
        };

        sample.cpu_load < SPAWN_MAX_CPU_LOAD
            && sample.avail_ratio > SPAWN_MIN_AVAIL_RATIO
            && sample.swap_ratio < SPAWN_MAX_SWAP_RATIO
            && self.pressure_level() != PressureLevel::Critical
    }

    /// `static_limit` shrunk under `Warning`, collapsed to `min` under `Critical`, capped
    /// at `max` under `Nominal`, per the distilled spec's `getRecommendedConcurrency`.
    pub fn recommended_concurrency(&self, static_limit: usize, min: usize, max: usize) -> usize {
        let min = min.max(1);
        let max = max.max(min);
        match self.pressure_level() {
            PressureLevel::Critical => min,
            PressureLevel::Warning => min.max((static_limit as f64 * 0.5).floor() as usize),
            PressureLevel::Nominal => static_limit.min(max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommended_concurrency_respects_bounds() {
        let monitor = CapacityMonitor::new();
        let recommendation = monitor.recommended_concurrency(10, 2, 8);
        assert!((2..=8).contains(&recommendation));
    }

    #[test]
    fn can_spawn_worker_fails_open_under_real_sampling() {
        let monitor = CapacityMonitor::new();
        // A dev machine running tests is never expected to be at critical pressure.
        assert!(monitor.can_spawn_worker());
    }
}
