// =============================================================================
// Broker Adapter Interface — contract only, §4.7
// =============================================================================
//
// `submitOrder`/`cancelOrder` plus the circuit-breaker/retry/timeout wrapper
// every call goes through. Grounded in the teacher's
// `binance/rate_limit.rs` + `binance/client.rs` retry/backoff idiom: rather
// than three copy-pasted breakers, one small state machine is parameterized
// per broker class by the timeout/retry/cooldown table below. Implementing a
// real broker connection is out of scope here — this module is the contract
// boundary a concrete adapter (Binance, a FIX gateway, a research API) would
// be built against.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::risk::positions::OpenPosition;

/// The three call classes §4.7 gives distinct breaker tunings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerClass {
    Broker,
    MarketData,
    Research,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerTuning {
    pub timeout: Duration,
    pub max_retries: u32,
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl BrokerClass {
    pub fn tuning(self) -> BreakerTuning {
        match self {
            BrokerClass::Broker => {
                BreakerTuning { timeout: Duration::from_secs(10), max_retries: 2, failure_threshold: 3, cooldown: Duration::from_secs(30) }
            }
            BrokerClass::MarketData => {
                BreakerTuning { timeout: Duration::from_secs(30), max_retries: 3, failure_threshold: 5, cooldown: Duration::from_secs(60) }
            }
            BrokerClass::Research => {
                BreakerTuning { timeout: Duration::from_secs(60), max_retries: 2, failure_threshold: 5, cooldown: Duration::from_secs(30) }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unavailable,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("circuit breaker open, retry after cooldown")]
    CircuitOpen,
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("broker call failed: {0}")]
    CallFailed(String),
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub order_id: String,
    pub accepted: bool,
    pub message: Option<String>,
}

/// One breaker instance, shared behind an `Arc` by whichever adapter wraps
/// its calls with `call_with_breaker`.
enum BreakerState {
    Closed,
    Open { until: std::time::Instant },
    HalfOpen,
}

pub struct CircuitBreaker {
    class: BrokerClass,
    state: Mutex<BreakerState>,
    consecutive_failures: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(class: BrokerClass) -> Self {
        Self { class, state: Mutex::new(BreakerState::Closed), consecutive_failures: AtomicU32::new(0) }
    }

    fn allow_call(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open { until } => {
                if std::time::Instant::now() >= until {
                    *state = BreakerState::HalfOpen;
                    info!(class = ?self.class, "circuit breaker entering half-open probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.state.lock();
        if !matches!(*state, BreakerState::Closed) {
            info!(class = ?self.class, "circuit breaker closed after successful probe");
        }
        *state = BreakerState::Closed;
    }

    fn record_failure(&self) {
        let tuning = self.class.tuning();
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= tuning.failure_threshold {
            let mut state = self.state.lock();
            *state = BreakerState::Open { until: std::time::Instant::now() + tuning.cooldown };
            warn!(class = ?self.class, failures, cooldown = ?tuning.cooldown, "circuit breaker opened");
        }
    }

    /// Run `f`, retrying up to `max_retries` times on failure, each attempt
    /// bounded by the class timeout. Opens the breaker once consecutive
    /// failures reach the class threshold.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, BrokerError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, BrokerError>>,
    {
        if !self.allow_call() {
            return Err(BrokerError::CircuitOpen);
        }

        let tuning = self.class.tuning();
        let mut last_err = BrokerError::CallFailed("no attempt made".to_string());

        for attempt in 0..=tuning.max_retries {
            match tokio::time::timeout(tuning.timeout, f()).await {
                Ok(Ok(value)) => {
                    self.record_success();
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    last_err = e;
                }
                Err(_) => {
                    last_err = BrokerError::Timeout(tuning.timeout);
                }
            }
            if attempt < tuning.max_retries {
                warn!(class = ?self.class, attempt, "broker call failed, retrying");
            }
        }

        self.record_failure();
        error!(class = ?self.class, error = %last_err, "broker call exhausted retries");
        Err(last_err)
    }
}

/// Heartbeat monitor: counts consecutive missed pings and maps them to
/// health states per §4.7 (1 missed = WARNING-equivalent `Degraded`, 3 =
/// `Degraded`, 5 = `Unavailable`). A `Degraded`/`Unavailable` broker gates
/// the autonomy loop per §4.4.
pub struct HeartbeatMonitor {
    consecutive_missed: AtomicU32,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self { consecutive_missed: AtomicU32::new(0) }
    }

    pub fn record_success(&self) {
        self.consecutive_missed.store(0, Ordering::Relaxed);
    }

    pub fn record_missed(&self) -> HealthState {
        let missed = self.consecutive_missed.fetch_add(1, Ordering::Relaxed) + 1;
        let state = self.health();
        if missed == 1 {
            warn!("heartbeat missed once");
        } else if missed == 3 {
            warn!("heartbeat degraded: 3 consecutive misses");
        } else if missed >= 5 {
            error!("heartbeat unavailable: {missed} consecutive misses");
        }
        state
    }

    pub fn health(&self) -> HealthState {
        match self.consecutive_missed.load(Ordering::Relaxed) {
            0..=2 => HealthState::Healthy,
            3..=4 => HealthState::Degraded,
            _ => HealthState::Unavailable,
        }
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the autonomy loop (new position opens, promotions) may proceed
/// given the current broker health. Gates on anything short of `Healthy`.
pub fn gates_autonomy_loop(health: HealthState) -> bool {
    !matches!(health, HealthState::Healthy)
}

/// Contract a concrete broker integration implements. `submit_exit_order` is
/// the §4.4.2 EMERGENCY dispatch path; a real adapter would likely implement
/// it as a `submit_order` call with a reduce-only/exit-intent flag.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn submit_order(&self, bot_id: uuid::Uuid, symbol: &str, side: crate::types::Side, quantity: u32) -> Result<ExecutionReport, BrokerError>;

    async fn submit_exit_order(&self, position: &OpenPosition) -> Result<ExecutionReport, BrokerError>;

    async fn cancel_order(&self, order_id: &str) -> Result<ExecutionReport, BrokerError>;

    fn health(&self) -> HealthState;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as Counter;
    use std::sync::Arc;

    #[tokio::test]
    async fn breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(BrokerClass::Broker);
        for _ in 0..3 {
            let _: Result<(), BrokerError> = breaker.call(|| async { Err(BrokerError::CallFailed("x".to_string())) }).await;
        }
        let result: Result<(), BrokerError> = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(BrokerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn successful_call_resets_failure_count() {
        let breaker = CircuitBreaker::new(BrokerClass::Broker);
        let calls = Arc::new(Counter::new(0));
        let calls_clone = calls.clone();
        let _: Result<(), BrokerError> = breaker
            .call(move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn heartbeat_escalates_with_consecutive_misses() {
        let monitor = HeartbeatMonitor::new();
        assert_eq!(monitor.health(), HealthState::Healthy);
        for _ in 0..3 {
            monitor.record_missed();
        }
        assert_eq!(monitor.health(), HealthState::Degraded);
        for _ in 0..2 {
            monitor.record_missed();
        }
        assert_eq!(monitor.health(), HealthState::Unavailable);
    }

    #[test]
    fn degraded_or_unavailable_gates_autonomy_loop() {
        assert!(!gates_autonomy_loop(HealthState::Healthy));
        assert!(gates_autonomy_loop(HealthState::Degraded));
        assert!(gates_autonomy_loop(HealthState::Unavailable));
    }
}
