//! Batch Executor: drives rows through a sink in batches, with retry,
//! a sliding-window circuit breaker, bounded concurrency, and
//! cooperative cancellation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::batch::{chunk, Batch};

/// What a sink call reported about one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    Success,
    /// Worth retrying (e.g. a deadlock, a connection blip).
    Transient,
    /// Not worth retrying; counts toward `failed` immediately.
    Permanent,
}

/// The user-supplied persistence callback.
#[async_trait]
pub trait BatchSink<T>: Send + Sync
where
    T: Send + Sync,
{
    async fn execute(&self, batch: &Batch<T>) -> SinkOutcome;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// `initialDelay * multiplier^(attempt-1)`, capped at `max_delay`.
    /// `attempt` is 1-based.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi((attempt.saturating_sub(1)) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    pub window_size: usize,
    pub failure_rate_threshold: f64,
    pub open_duration: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            failure_rate_threshold: 0.5,
            open_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Sequential,
    BoundedParallel,
    Reactive,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub retry: RetryConfig,
    pub circuit: CircuitConfig,
    pub strategy: Strategy,
    /// How long cancellation waits for in-flight batches before abandoning
    /// them and logging the count left running.
    pub shutdown_grace_period: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            max_concurrent_batches: num_cpus_fallback(),
            retry: RetryConfig::default(),
            circuit: CircuitConfig::default(),
            strategy: Strategy::BoundedParallel,
            shutdown_grace_period: Duration::from_secs(300),
        }
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    pub processed: u64,
    pub failed: u64,
    pub duration: Duration,
}

enum BreakerState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

/// A sliding window of the last `window_size` batch outcomes, tripping
/// open once the failure rate within the window meets the threshold.
struct CircuitBreaker {
    cfg: CircuitConfig,
    window: VecDeque<bool>,
    state: BreakerState,
}

impl CircuitBreaker {
    fn new(cfg: CircuitConfig) -> Self {
        Self {
            cfg,
            window: VecDeque::with_capacity(cfg.window_size),
            state: BreakerState::Closed,
        }
    }

    /// Returns `true` if a batch may proceed (closed, or a half-open
    /// trial), `false` if it should fast-fail with `CIRCUIT_OPEN`.
    fn admit(&mut self) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open { until } => {
                if Instant::now() >= until {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record(&mut self, success: bool) {
        match self.state {
            BreakerState::HalfOpen => {
                self.state = if success { BreakerState::Closed } else { self.open() };
                self.window.clear();
                return;
            }
            _ => {}
        }

        if self.window.len() == self.cfg.window_size {
            self.window.pop_front();
        }
        self.window.push_back(success);

        if self.window.len() == self.cfg.window_size {
            let failures = self.window.iter().filter(|ok| !**ok).count();
            let rate = failures as f64 / self.window.len() as f64;
            if rate >= self.cfg.failure_rate_threshold {
                self.state = self.open();
            }
        }
    }

    fn open(&self) -> BreakerState {
        BreakerState::Open { until: Instant::now() + self.cfg.open_duration }
    }

    fn is_open(&self) -> bool {
        matches!(self.state, BreakerState::Open { .. })
    }
}

/// Runs `rows` through `sink` in batches per `cfg`, honoring
/// `cancel` for graceful shutdown.
pub async fn run<T, S>(
    rows: Vec<T>,
    sink: Arc<S>,
    cfg: ExecutorConfig,
    cancel: CancellationToken,
) -> ExecutionSummary
where
    T: Send + Sync + 'static,
    S: BatchSink<T> + 'static,
{
    let started = Instant::now();
    let batches = chunk(rows, cfg.batch_size.max(1));
    let breaker = Arc::new(Mutex::new(CircuitBreaker::new(cfg.circuit)));

    let summary = match cfg.strategy {
        Strategy::Sequential => run_sequential(batches, sink, cfg.retry, breaker, cancel).await,
        Strategy::BoundedParallel | Strategy::Reactive => {
            run_bounded_parallel(
                batches,
                sink,
                cfg.retry,
                cfg.max_concurrent_batches,
                breaker,
                cancel,
                cfg.shutdown_grace_period,
            )
            .await
        }
    };

    ExecutionSummary { duration: started.elapsed(), ..summary }
}

async fn run_sequential<T, S>(
    batches: Vec<Batch<T>>,
    sink: Arc<S>,
    retry: RetryConfig,
    breaker: Arc<Mutex<CircuitBreaker>>,
    cancel: CancellationToken,
) -> ExecutionSummary
where
    T: Send + Sync + 'static,
    S: BatchSink<T> + 'static,
{
    let mut processed = 0u64;
    let mut failed = 0u64;

    for batch in &batches {
        if cancel.is_cancelled() {
            break;
        }
        let rows_in_batch = batch.len() as u64;
        match execute_with_retry(sink.as_ref(), batch, retry, &breaker).await {
            SinkOutcome::Success => processed += rows_in_batch,
            _ => failed += rows_in_batch,
        }
    }

    ExecutionSummary { processed, failed, duration: Duration::ZERO }
}

async fn run_bounded_parallel<T, S>(
    batches: Vec<Batch<T>>,
    sink: Arc<S>,
    retry: RetryConfig,
    max_concurrent: usize,
    breaker: Arc<Mutex<CircuitBreaker>>,
    cancel: CancellationToken,
    shutdown_grace_period: Duration,
) -> ExecutionSummary
where
    T: Send + Sync + 'static,
    S: BatchSink<T> + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut set = tokio::task::JoinSet::new();

    for batch in batches {
        if cancel.is_cancelled() {
            break;
        }
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        let sink = sink.clone();
        let breaker = breaker.clone();
        let rows_in_batch = batch.len() as u64;
        set.spawn(async move {
            let _permit = permit;
            let outcome = execute_with_retry(sink.as_ref(), &batch, retry, &breaker).await;
            (outcome, rows_in_batch)
        });
    }

    let mut processed = 0u64;
    let mut failed = 0u64;
    let deadline = Instant::now() + shutdown_grace_period;

    loop {
        if set.is_empty() {
            break;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, set.join_next()).await {
            Ok(Some(result)) => match result {
                Ok((SinkOutcome::Success, n)) => processed += n,
                Ok((_, n)) => failed += n,
                Err(_) => failed += 1,
            },
            Ok(None) => break,
            Err(_) => {
                let abandoned = set.len();
                tracing::warn!(abandoned, "shutdown grace period elapsed, abandoning in-flight batches");
                set.abort_all();
                break;
            }
        }
    }

    ExecutionSummary { processed, failed, duration: Duration::ZERO }
}

async fn execute_with_retry<T, S>(
    sink: &S,
    batch: &Batch<T>,
    retry: RetryConfig,
    breaker: &Arc<Mutex<CircuitBreaker>>,
) -> SinkOutcome
where
    T: Send + Sync,
    S: BatchSink<T>,
{
    for attempt in 1..=retry.max_attempts {
        {
            let mut b = breaker.lock().await;
            if !b.admit() {
                return SinkOutcome::Permanent;
            }
        }

        let outcome = sink.execute(batch).await;
        {
            let mut b = breaker.lock().await;
            b.record(outcome == SinkOutcome::Success);
        }

        match outcome {
            SinkOutcome::Success | SinkOutcome::Permanent => return outcome,
            SinkOutcome::Transient if attempt < retry.max_attempts => {
                tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
            }
            SinkOutcome::Transient => return SinkOutcome::Permanent,
        }
    }
    SinkOutcome::Permanent
}
