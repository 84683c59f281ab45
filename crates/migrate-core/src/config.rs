//! Tunable runtime configuration. Library-level defaults match the
//! design's published values; a CLI or HTTP transport layer is expected
//! to layer file/env configuration on top of this struct (the CLI
//! binary in this workspace does so with `figment`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::early_validator::SizePolicy;
use crate::executor::{CircuitConfig, ExecutorConfig, RetryConfig, Strategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub max_concurrent_sheets: usize,
    pub max_rows: u64,
    pub max_cells: u64,
    pub max_retry_attempts: u32,
    pub retry_initial_delay_secs: u64,
    pub retry_multiplier: f64,
    pub circuit_window_size: usize,
    pub circuit_failure_rate_threshold: f64,
    pub circuit_open_duration_secs: u64,
    pub timeout_per_phase_secs: u64,
    pub max_starts_per_minute: u32,
    pub shutdown_grace_period_secs: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            max_concurrent_batches: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            max_concurrent_sheets: 3,
            max_rows: 1_000_000,
            max_cells: 5_000_000,
            max_retry_attempts: 3,
            retry_initial_delay_secs: 5,
            retry_multiplier: 2.0,
            circuit_window_size: 10,
            circuit_failure_rate_threshold: 0.5,
            circuit_open_duration_secs: 30,
            timeout_per_phase_secs: 30 * 60,
            max_starts_per_minute: 10,
            shutdown_grace_period_secs: 5 * 60,
        }
    }
}

impl MigrationConfig {
    pub fn size_policy(&self) -> SizePolicy {
        SizePolicy { max_rows: self.max_rows, max_cells: self.max_cells }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            batch_size: self.batch_size,
            max_concurrent_batches: self.max_concurrent_batches,
            retry: RetryConfig {
                max_attempts: self.max_retry_attempts,
                initial_delay: Duration::from_secs(self.retry_initial_delay_secs),
                multiplier: self.retry_multiplier,
                max_delay: Duration::from_secs(self.timeout_per_phase_secs),
            },
            circuit: CircuitConfig {
                window_size: self.circuit_window_size,
                failure_rate_threshold: self.circuit_failure_rate_threshold,
                open_duration: Duration::from_secs(self.circuit_open_duration_secs),
            },
            strategy: Strategy::BoundedParallel,
            shutdown_grace_period: Duration::from_secs(self.shutdown_grace_period_secs),
        }
    }
}
