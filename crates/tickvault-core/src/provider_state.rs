//! Per-provider rate budgets and health counters.
//!
//! This is the only mutable state shared across concurrent acquisitions.
//! Each provider owns its own limiter and atomics; the registry map itself is
//! only written when a provider is registered.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::middleware::StateInformationMiddleware;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde::Serialize;

use crate::config::DEFAULT_UNHEALTHY_AFTER;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, StateInformationMiddleware>;

const NO_RESPONSE: u64 = u64::MAX;

/// Token bucket of `requests_per_minute` calls, refilled continuously.
pub struct RateBudget {
    limiter: DirectRateLimiter,
    requests_per_minute: u32,
    last_check: Mutex<Option<(Instant, u32)>>,
}

impl RateBudget {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let limit = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(limit))
                .with_middleware::<StateInformationMiddleware>(),
            requests_per_minute: limit.get(),
            last_check: Mutex::new(None),
        }
    }

    /// Take one request from the budget. `false` when exhausted.
    pub fn try_acquire(&self) -> bool {
        let remaining = match self.limiter.check() {
            Ok(snapshot) => Some(snapshot.remaining_burst_capacity()),
            Err(_) => None,
        };
        let mut last = self.last_check.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("rate budget lock poisoned, recovering");
            poisoned.into_inner()
        });
        *last = Some((Instant::now(), remaining.unwrap_or(0)));
        remaining.is_some()
    }

    /// Requests available now, estimated from the last decision and the
    /// refill rate. Does not consume budget.
    pub fn remaining(&self) -> u32 {
        let last = *self.last_check.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some((checked_at, remaining)) = last else {
            return self.requests_per_minute;
        };
        let per_request = Duration::from_secs(60) / self.requests_per_minute;
        let refilled = checked_at.elapsed().as_nanos() / per_request.as_nanos().max(1);
        let refilled = u32::try_from(refilled).unwrap_or(u32::MAX);
        remaining.saturating_add(refilled).min(self.requests_per_minute)
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }
}

/// Consecutive failures and last response time of one provider.
pub struct ProviderHealth {
    consecutive_failures: AtomicU32,
    last_response_ms: AtomicU64,
    unhealthy_after: u32,
}

impl ProviderHealth {
    pub fn new(unhealthy_after: u32) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            last_response_ms: AtomicU64::new(NO_RESPONSE),
            unhealthy_after: unhealthy_after.max(1),
        }
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.store_latency(elapsed);
    }

    pub fn record_failure(&self, elapsed: Duration) {
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel);
        self.store_latency(elapsed);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures() < self.unhealthy_after
    }

    pub fn last_response_ms(&self) -> Option<u64> {
        match self.last_response_ms.load(Ordering::Acquire) {
            NO_RESPONSE => None,
            value => Some(value),
        }
    }

    fn store_latency(&self, elapsed: Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(NO_RESPONSE - 1);
        self.last_response_ms
            .store(millis.min(NO_RESPONSE - 1), Ordering::Release);
    }
}

/// Budget and health of one provider.
pub struct ProviderState {
    pub budget: RateBudget,
    pub health: ProviderHealth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub requests_remaining: u32,
    pub requests_per_minute: u32,
}

/// One row of `provider-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub name: String,
    pub priority: u32,
    pub available: bool,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub response_time_ms: Option<u64>,
    pub rate_limit: RateLimitStatus,
}

/// Shared state keyed by provider name. Cloned handles share counters.
pub struct ProviderStateRegistry {
    states: RwLock<HashMap<String, Arc<ProviderState>>>,
    unhealthy_after: u32,
}

impl Default for ProviderStateRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_UNHEALTHY_AFTER)
    }
}

impl ProviderStateRegistry {
    pub fn new(unhealthy_after: u32) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            unhealthy_after,
        }
    }

    /// State for `name`, created on first use. Later registrations under the
    /// same name reuse the existing budget.
    pub fn register(&self, name: &str, requests_per_minute: u32) -> Arc<ProviderState> {
        if let Some(state) = self.get(name) {
            return state;
        }
        let mut states = self.states.write().unwrap_or_else(|poisoned| {
            tracing::warn!("provider registry lock poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(states.entry(name.to_string()).or_insert_with(|| {
            Arc::new(ProviderState {
                budget: RateBudget::per_minute(requests_per_minute),
                health: ProviderHealth::new(self.unhealthy_after),
            })
        }))
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProviderState>> {
        self.states
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }
}
