//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::counter::Limit;
use super::key::{RateLimitKey, RequestAttributes};
use super::policy::WindowPolicy;
use super::store::KeyedCounterStore;
use super::strategy::{KeyStrategy, KeyStrategyKind};
use crate::error::Result;

/// Outcome of a single rate limit check.
///
/// A denial is a normal result, not an error. Built fresh for every check
/// and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests still admissible in the current window (0 when denied)
    pub remaining: u64,
    /// The configured maximum per window
    pub limit: u64,
    /// When the current window ends
    pub reset_at: Instant,
    /// When the check ran, per the limiter's clock
    pub checked_at: Instant,
    /// The key the request was charged to
    pub key: RateLimitKey,
}

impl Decision {
    /// Time left in the window as of the check.
    pub fn retry_after(&self) -> Duration {
        self.reset_at.saturating_duration_since(self.checked_at)
    }
}

/// A fixed-window rate limiter.
///
/// Combines a [`Limit`], a [`KeyStrategy`] and its own
/// [`KeyedCounterStore`]. Instances never share a store unless told to,
/// so a global limiter and a per-user limiter consume separate budgets.
/// This struct is thread-safe and can be shared across tasks.
#[derive(Debug)]
pub struct RateLimiter {
    /// Name used in logs and rejection messages
    name: String,
    limit: Limit,
    strategy: Arc<dyn KeyStrategy>,
    store: Arc<KeyedCounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter with a fresh store and the system clock.
    pub fn new(name: impl Into<String>, limit: Limit, strategy: Arc<dyn KeyStrategy>) -> Self {
        Self::with_store(name, limit, strategy, Arc::new(KeyedCounterStore::new()))
    }

    /// Create a limiter over an explicitly constructed store.
    pub fn with_store(
        name: impl Into<String>,
        limit: Limit,
        strategy: Arc<dyn KeyStrategy>,
        store: Arc<KeyedCounterStore>,
    ) -> Self {
        Self {
            name: name.into(),
            limit,
            strategy,
            store,
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Build a limiter from raw settings and a built-in strategy.
    ///
    /// Fails with a configuration error when `max` or `window` is zero.
    pub fn from_settings(
        name: impl Into<String>,
        max: u64,
        window: Duration,
        kind: KeyStrategyKind,
    ) -> Result<Self> {
        let limit = Limit::new(max, window)?;
        Ok(Self::new(name, limit, kind.build()))
    }

    /// Replace the clock, typically with a manual one in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Check and count one request.
    ///
    /// Never blocks on I/O and never fails.
    pub fn check(&self, request: &RequestAttributes) -> Decision {
        let key = self.strategy.derive_key(request);
        self.check_key(key)
    }

    /// Check and count one request already attributed to `key`.
    pub fn check_key(&self, key: RateLimitKey) -> Decision {
        let now = self.clock.now();

        let (verdict, reset_at, count) = self.store.hit_with(&key, &self.limit, now, |record| {
            (
                WindowPolicy::evaluate(record, &self.limit),
                record.reset_at(),
                record.count(),
            )
        });

        trace!(
            limiter = %self.name,
            key = %key,
            count,
            remaining = verdict.remaining,
            "Checked rate limit"
        );

        if !verdict.allowed {
            debug!(
                limiter = %self.name,
                key = %key,
                count,
                limit = self.limit.max(),
                "Rate limit exceeded"
            );
        }

        Decision {
            allowed: verdict.allowed,
            remaining: verdict.remaining,
            limit: self.limit.max(),
            reset_at,
            checked_at: now,
            key,
        }
    }

    /// Get the limiter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configured limit.
    pub fn limit(&self) -> Limit {
        self.limit
    }

    /// Get the backing store.
    pub fn store(&self) -> &Arc<KeyedCounterStore> {
        &self.store
    }

    /// Get the clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Result of running a request through a [`LimiterChain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Every limiter admitted the request; decisions in chain order.
    Admitted(Vec<Decision>),
    /// A limiter denied the request. Later limiters were not consulted.
    Rejected {
        /// Name of the denying limiter
        limiter: String,
        /// The denying decision
        decision: Decision,
    },
}

impl ChainOutcome {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, ChainOutcome::Admitted(_))
    }

    /// The decision to report to the client: the denial, or the admitted
    /// decision with the least remaining quota.
    pub fn effective(&self) -> Option<&Decision> {
        match self {
            ChainOutcome::Admitted(decisions) => decisions.iter().min_by_key(|d| d.remaining),
            ChainOutcome::Rejected { decision, .. } => Some(decision),
        }
    }
}

/// Ordered sequence of independent limiters on one request path.
///
/// Each limiter is checked in turn; the first denial short-circuits so
/// limiters after it spend none of their budget.
#[derive(Debug, Clone, Default)]
pub struct LimiterChain {
    limiters: Vec<Arc<RateLimiter>>,
}

impl LimiterChain {
    /// Create an empty chain, which admits everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a limiter.
    pub fn then(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiters.push(limiter);
        self
    }

    /// Check `request` against every limiter in order.
    pub fn check(&self, request: &RequestAttributes) -> ChainOutcome {
        let mut decisions = Vec::with_capacity(self.limiters.len());
        for limiter in &self.limiters {
            let decision = limiter.check(request);
            if !decision.allowed {
                return ChainOutcome::Rejected {
                    limiter: limiter.name().to_string(),
                    decision,
                };
            }
            decisions.push(decision);
        }
        ChainOutcome::Admitted(decisions)
    }

    /// Get the limiters in chain order.
    pub fn limiters(&self) -> &[Arc<RateLimiter>] {
        &self.limiters
    }
}
