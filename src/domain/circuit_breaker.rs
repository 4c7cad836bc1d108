//! Circuit Breaker
//!
//! Process-wide failure breaker that pauses new deployments when any single
//! operation key fails `failure_threshold` times within a rolling window.
//!
//! Failures are stored as timestamped events and counted on read, so each
//! event ages out of its key's count once the window has elapsed. A trip is
//! persisted through the `BreakerStateStore`; there is no automatic
//! recovery, only an explicit `reset`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::ports::persistence::{BreakerStateStore, StoreError};

/// Default failures per key before tripping
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default rolling window (10 minutes)
pub const DEFAULT_WINDOW_SECS: u64 = 600;

#[derive(Error, Debug, Clone)]
pub enum BreakerError {
    #[error("Failed to persist breaker status: {0}")]
    PersistFailed(#[from] StoreError),
}

/// Two-state breaker view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// Operations proceed
    Closed,
    /// New deployments blocked until manual reset
    Open,
}

impl BreakerState {
    pub fn allows_deployments(&self) -> bool {
        matches!(self, BreakerState::Closed)
    }

    pub fn description(&self) -> &'static str {
        match self {
            BreakerState::Closed => "Breaker closed - operations proceeding",
            BreakerState::Open => "Breaker OPEN - new deployments paused until manual reset",
        }
    }
}

/// Persisted breaker record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub is_paused: bool,
    pub reason: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
    /// Free-form context supplied with the trip
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub last_reset_by: Option<String>,
    #[serde(default)]
    pub last_reset_at: Option<DateTime<Utc>>,
}

impl BreakerStatus {
    pub fn state(&self) -> BreakerState {
        if self.is_paused {
            BreakerState::Open
        } else {
            BreakerState::Closed
        }
    }
}

/// Class of request being gated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Anything that deploys new capital
    Deployment,
    /// Users exiting positions
    Withdrawal,
}

/// Gate verdict for a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseDecision {
    Allowed,
    Blocked { reason: String },
}

impl PauseDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, PauseDecision::Blocked { .. })
    }
}

/// Breaker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub window: Duration,
    /// Let withdrawals through while paused
    pub allow_withdrawals: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            allow_withdrawals: true,
        }
    }
}

/// Failure-triggered global pause
pub struct CircuitBreaker {
    config: BreakerConfig,
    store: Arc<dyn BreakerStateStore>,
    failures: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    /// Serialises load-modify-save of the persisted status
    status_lock: Mutex<()>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, store: Arc<dyn BreakerStateStore>) -> Self {
        Self {
            config,
            store,
            failures: Mutex::new(HashMap::new()),
            status_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current status; reports paused if the status cannot be read
    pub async fn is_tripped(&self) -> BreakerStatus {
        match self.store.load().await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("Breaker status unreadable, failing safe to paused: {}", e);
                BreakerStatus {
                    is_paused: true,
                    reason: Some(format!("Breaker status unavailable: {}", e)),
                    ..BreakerStatus::default()
                }
            }
        }
    }

    /// Record a failure for `key`; returns true if this failure tripped the breaker
    pub async fn record_failure(
        &self,
        key: &str,
        context: Option<serde_json::Value>,
    ) -> Result<bool, BreakerError> {
        self.record_failure_at(key, context, Utc::now()).await
    }

    pub async fn record_failure_at(
        &self,
        key: &str,
        context: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, BreakerError> {
        let count = {
            let mut failures = self.failures.lock().await;
            prune_all(&mut failures, self.config.window, now);
            let events = failures.entry(key.to_string()).or_default();
            events.push_back(now);
            events.len() as u32
        };

        tracing::warn!(
            "Failure recorded for '{}' ({}/{} within {}s)",
            key,
            count,
            self.config.failure_threshold,
            self.config.window.as_secs()
        );

        if count >= self.config.failure_threshold {
            let reason = format!(
                "{} failures for '{}' within {}s",
                count,
                key,
                self.config.window.as_secs()
            );
            self.trip_at(&reason, context, now).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Failures for `key` still inside the window
    pub async fn failure_count(&self, key: &str) -> u32 {
        self.failure_count_at(key, Utc::now()).await
    }

    pub async fn failure_count_at(&self, key: &str, now: DateTime<Utc>) -> u32 {
        let mut failures = self.failures.lock().await;
        prune_all(&mut failures, self.config.window, now);
        failures.get(key).map_or(0, |events| events.len() as u32)
    }

    /// Failures across all keys still inside the window
    pub async fn total_failures_at(&self, now: DateTime<Utc>) -> u32 {
        let failures = self.failures.lock().await;
        failures
            .values()
            .flat_map(|events| events.iter())
            .filter(|ts| within_window(**ts, self.config.window, now))
            .count() as u32
    }

    /// Pause the system. Tripping while paused only replaces the reason.
    pub async fn trip(
        &self,
        reason: &str,
        context: Option<serde_json::Value>,
    ) -> Result<(), BreakerError> {
        self.trip_at(reason, context, Utc::now()).await
    }

    pub async fn trip_at(
        &self,
        reason: &str,
        context: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<(), BreakerError> {
        {
            let _guard = self.status_lock.lock().await;
            let previous = self.store.load().await.unwrap_or_default();

            let status = BreakerStatus {
                is_paused: true,
                reason: Some(reason.to_string()),
                paused_at: if previous.is_paused {
                    previous.paused_at.or(Some(now))
                } else {
                    Some(now)
                },
                context,
                last_reset_by: previous.last_reset_by,
                last_reset_at: previous.last_reset_at,
            };
            self.store.save(&status).await?;
        }

        self.failures.lock().await.clear();
        tracing::error!("CIRCUIT BREAKER TRIPPED: {}", reason);
        Ok(())
    }

    /// Manually close the breaker and clear all counters
    pub async fn reset(&self, reset_by: &str) -> Result<(), BreakerError> {
        self.reset_at(reset_by, Utc::now()).await
    }

    pub async fn reset_at(&self, reset_by: &str, now: DateTime<Utc>) -> Result<(), BreakerError> {
        {
            let _guard = self.status_lock.lock().await;
            let status = BreakerStatus {
                is_paused: false,
                reason: None,
                paused_at: None,
                context: None,
                last_reset_by: Some(reset_by.to_string()),
                last_reset_at: Some(now),
            };
            self.store.save(&status).await?;
        }

        self.failures.lock().await.clear();
        tracing::info!("Circuit breaker reset by {}", reset_by);
        Ok(())
    }

    /// Gate a request class against the current pause state
    pub async fn check_emergency_pause(
        &self,
        request: RequestKind,
        allow_withdrawals: bool,
    ) -> PauseDecision {
        let status = self.is_tripped().await;
        if !status.is_paused {
            return PauseDecision::Allowed;
        }

        if request == RequestKind::Withdrawal && allow_withdrawals {
            tracing::info!("Withdrawal allowed through paused breaker");
            return PauseDecision::Allowed;
        }

        PauseDecision::Blocked {
            reason: status
                .reason
                .unwrap_or_else(|| "Emergency pause active".to_string()),
        }
    }

    /// Drop in-memory counters; the persisted status is left as is
    pub async fn close(&self) {
        self.failures.lock().await.clear();
        tracing::debug!("Circuit breaker closed");
    }
}

fn within_window(ts: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> bool {
    match now.signed_duration_since(ts).to_std() {
        Ok(age) => age < window,
        // Event stamped in the future still counts
        Err(_) => true,
    }
}

fn prune(events: &mut VecDeque<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) {
    while events
        .front()
        .map_or(false, |ts| !within_window(*ts, window, now))
    {
        events.pop_front();
    }
}

/// Prune every key and forget the ones left without events
fn prune_all(
    failures: &mut HashMap<String, VecDeque<DateTime<Utc>>>,
    window: Duration,
    now: DateTime<Utc>,
) {
    failures.retain(|_, events| {
        prune(events, window, now);
        !events.is_empty()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBreakerStore;
    use crate::ports::mocks::MockBreakerStore;
    use chrono::Duration as ChronoDuration;

    fn create_test_breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            BreakerConfig::default(),
            Arc::new(InMemoryBreakerStore::new()),
        )
    }

    #[tokio::test]
    async fn test_new_breaker_is_closed() {
        let breaker = create_test_breaker();
        let status = breaker.is_tripped().await;
        assert!(!status.is_paused);
        assert_eq!(status.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count("scan:ethereum").await, 0);
    }

    #[tokio::test]
    async fn test_threshold_failures_trip() {
        let breaker = create_test_breaker();
        let t0 = Utc::now();

        assert!(!breaker.record_failure_at("scan:ethereum", None, t0).await.unwrap());
        assert!(!breaker
            .record_failure_at("scan:ethereum", None, t0 + ChronoDuration::seconds(10))
            .await
            .unwrap());
        assert!(breaker
            .record_failure_at("scan:ethereum", None, t0 + ChronoDuration::seconds(20))
            .await
            .unwrap());

        let status = breaker.is_tripped().await;
        assert!(status.is_paused);
        assert!(status.reason.unwrap().contains("scan:ethereum"));
        // Trip clears counters
        assert_eq!(breaker.total_failures_at(t0).await, 0);
    }

    #[tokio::test]
    async fn test_failures_on_different_keys_do_not_combine() {
        let breaker = create_test_breaker();
        let t0 = Utc::now();
        breaker.record_failure_at("scan:ethereum", None, t0).await.unwrap();
        breaker.record_failure_at("scan:arbitrum", None, t0).await.unwrap();
        breaker.record_failure_at("scan:base", None, t0).await.unwrap();

        assert!(!breaker.is_tripped().await.is_paused);
        assert_eq!(breaker.total_failures_at(t0).await, 3);
    }

    #[tokio::test]
    async fn test_failures_decay_after_window() {
        let breaker = create_test_breaker();
        let t0 = Utc::now();
        breaker.record_failure_at("execute:aave", None, t0).await.unwrap();
        breaker
            .record_failure_at("execute:aave", None, t0 + ChronoDuration::seconds(300))
            .await
            .unwrap();

        // First event has aged out
        let later = t0 + ChronoDuration::seconds(601);
        assert_eq!(breaker.failure_count_at("execute:aave", later).await, 1);

        // Sustained low-frequency failures never accumulate to a trip
        breaker.record_failure_at("execute:aave", None, later).await.unwrap();
        assert!(!breaker.is_tripped().await.is_paused);
    }

    #[tokio::test]
    async fn test_expired_keys_are_forgotten() {
        let breaker = create_test_breaker();
        let t0 = Utc::now();
        for chain in ["ethereum", "base", "arbitrum"] {
            breaker
                .record_failure_at(&format!("scan:{}", chain), None, t0)
                .await
                .unwrap();
        }
        assert_eq!(breaker.failures.lock().await.len(), 3);

        let later = t0 + ChronoDuration::seconds(601);
        breaker.record_failure_at("scan:optimism", None, later).await.unwrap();

        let failures = breaker.failures.lock().await;
        assert_eq!(failures.len(), 1);
        assert!(failures.contains_key("scan:optimism"));
    }

    #[tokio::test]
    async fn test_count_query_drops_expired_keys() {
        let breaker = create_test_breaker();
        let t0 = Utc::now();
        breaker.record_failure_at("route:curve", None, t0).await.unwrap();

        let later = t0 + ChronoDuration::seconds(601);
        assert_eq!(breaker.failure_count_at("route:curve", later).await, 0);
        assert!(breaker.failures.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_pause_and_counters() {
        let breaker = create_test_breaker();
        let t0 = Utc::now();
        breaker.record_failure_at("k", None, t0).await.unwrap();
        breaker.trip("manual halt", None).await.unwrap();
        breaker.record_failure_at("k", None, t0).await.unwrap();

        breaker.reset("ops@team").await.unwrap();

        let status = breaker.is_tripped().await;
        assert!(!status.is_paused);
        assert!(status.reason.is_none());
        assert_eq!(status.last_reset_by.as_deref(), Some("ops@team"));
        assert_eq!(breaker.failure_count_at("k", t0).await, 0);
    }

    #[tokio::test]
    async fn test_trip_while_paused_overwrites_reason_only() {
        let breaker = create_test_breaker();
        let t0 = Utc::now();
        breaker.trip_at("first", None, t0).await.unwrap();
        breaker
            .trip_at("second", None, t0 + ChronoDuration::minutes(5))
            .await
            .unwrap();

        let status = breaker.is_tripped().await;
        assert!(status.is_paused);
        assert_eq!(status.reason.as_deref(), Some("second"));
        assert_eq!(status.paused_at, Some(t0));
    }

    #[tokio::test]
    async fn test_no_automatic_recovery() {
        let breaker = create_test_breaker();
        breaker.trip("halt", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(breaker.is_tripped().await.is_paused);
    }

    #[tokio::test]
    async fn test_emergency_pause_gating() {
        let breaker = create_test_breaker();
        assert_eq!(
            breaker
                .check_emergency_pause(RequestKind::Deployment, false)
                .await,
            PauseDecision::Allowed
        );

        for _ in 0..3 {
            breaker.record_failure("scan:ethereum", None).await.unwrap();
        }

        let blocked = breaker
            .check_emergency_pause(RequestKind::Deployment, false)
            .await;
        assert!(blocked.is_blocked());

        let withdrawal = breaker
            .check_emergency_pause(RequestKind::Withdrawal, true)
            .await;
        assert_eq!(withdrawal, PauseDecision::Allowed);

        let withdrawal_disallowed = breaker
            .check_emergency_pause(RequestKind::Withdrawal, false)
            .await;
        assert!(withdrawal_disallowed.is_blocked());
    }

    #[tokio::test]
    async fn test_unreadable_status_fails_safe() {
        let mut store = MockBreakerStore::new();
        store
            .expect_load()
            .returning(|| Err(StoreError::Unavailable("connection refused".to_string())));

        let breaker = CircuitBreaker::new(BreakerConfig::default(), Arc::new(store));
        let status = breaker.is_tripped().await;
        assert!(status.is_paused);
        assert!(status.reason.unwrap().contains("unavailable"));

        let decision = breaker
            .check_emergency_pause(RequestKind::Deployment, true)
            .await;
        assert!(decision.is_blocked());
    }

    #[tokio::test]
    async fn test_trip_surfaces_save_failure() {
        let mut store = MockBreakerStore::new();
        store.expect_load().returning(|| Ok(BreakerStatus::default()));
        store
            .expect_save()
            .returning(|_| Err(StoreError::Unavailable("read-only".to_string())));

        let breaker = CircuitBreaker::new(BreakerConfig::default(), Arc::new(store));
        let result = breaker.trip("halt", None).await;
        assert!(matches!(result, Err(BreakerError::PersistFailed(_))));
    }

    #[tokio::test]
    async fn test_close_drops_counters() {
        let breaker = create_test_breaker();
        let t0 = Utc::now();
        breaker.record_failure_at("k", None, t0).await.unwrap();
        breaker.close().await;
        assert_eq!(breaker.failure_count_at("k", t0).await, 0);
    }

    #[test]
    fn test_state_description() {
        assert!(BreakerState::Closed.allows_deployments());
        assert!(!BreakerState::Open.allows_deployments());
        assert!(BreakerState::Open.description().contains("OPEN"));
    }

    #[test]
    fn test_custom_config() {
        let config = BreakerConfig {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            allow_withdrawals: false,
        };
        let breaker = CircuitBreaker::new(config, Arc::new(InMemoryBreakerStore::new()));
        assert_eq!(breaker.config().failure_threshold, 5);
        assert_eq!(breaker.config().window, Duration::from_secs(60));
        assert!(!breaker.config().allow_withdrawals);
    }
}
