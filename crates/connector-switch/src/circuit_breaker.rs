//! # Circuit Breaker
//!
//! Fails fast on links whose transport keeps failing.
//!
//! ## States
//!
//! - `Closed`: calls pass. Outcomes go into a count-based sliding window of
//!   the last `sliding_window_size` calls. Once at least
//!   `minimum_number_of_calls` are recorded and the failure percentage
//!   reaches `failure_rate_threshold`, the breaker opens.
//! - `Open`: calls fail immediately with [`LinkError::CircuitOpen`] until
//!   `wait_duration_in_open_state` has passed.
//! - `HalfOpen`: up to `permitted_calls_in_half_open_state` trial calls pass.
//!   A success closes the breaker, a failure opens it again.
//!
//! Only `Err(LinkError)` counts as a failure. A Reject is an answer from the
//! peer and counts as a success.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use connector_core::{
    AccountId, AccountSettings, CircuitBreakerConfig, IlpResponse, Link, LinkError, LinkManager,
    PreparePacket,
};
use dashmap::DashMap;
use parking_lot::Mutex;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls pass and are recorded.
    Closed,
    /// Calls are refused.
    Open,
    /// A limited number of trial calls pass.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// `true` for a failed call.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_calls: usize,
}

/// A breaker for one link.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// A closed breaker identified by `name` in logs.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                half_open_calls: 0,
            }),
        }
    }

    /// Current state. An open breaker whose wait has elapsed still reports
    /// `Open` until the next call attempt.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Ask to make a call. `false` means fail fast.
    pub fn try_acquire(&self) -> bool {
        let mut s = self.state.lock();
        if s.state == CircuitState::Open {
            let waited = s
                .opened_at
                .map_or(true, |at| at.elapsed() >= self.config.wait_duration_in_open_state());
            if !waited {
                return false;
            }
            self.transition(&mut s, CircuitState::HalfOpen);
        }
        match s.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen if s.half_open_calls < self.config.permitted_calls_in_half_open_state => {
                s.half_open_calls += 1;
                true
            }
            CircuitState::HalfOpen | CircuitState::Open => false,
        }
    }

    /// Record a call that got an answer.
    pub fn record_success(&self) {
        let mut s = self.state.lock();
        match s.state {
            CircuitState::HalfOpen => self.transition(&mut s, CircuitState::Closed),
            CircuitState::Closed => self.record(&mut s, false),
            CircuitState::Open => {}
        }
    }

    /// Record a transport failure.
    pub fn record_failure(&self) {
        let mut s = self.state.lock();
        match s.state {
            CircuitState::HalfOpen => self.transition(&mut s, CircuitState::Open),
            CircuitState::Closed => self.record(&mut s, true),
            CircuitState::Open => {}
        }
    }

    fn record(&self, s: &mut BreakerState, failed: bool) {
        s.window.push_back(failed);
        while s.window.len() > self.config.sliding_window_size.max(1) {
            s.window.pop_front();
        }
        let calls = s.window.len();
        if calls < self.config.minimum_number_of_calls.max(1) {
            return;
        }
        let failures = s.window.iter().filter(|f| **f).count();
        let rate = failures as f64 * 100.0 / calls as f64;
        if rate >= self.config.failure_rate_threshold {
            tracing::warn!(
                link = %self.name,
                failure_rate = rate,
                calls,
                "failure rate above threshold"
            );
            self.transition(s, CircuitState::Open);
        }
    }

    fn transition(&self, s: &mut BreakerState, to: CircuitState) {
        let from = s.state;
        s.state = to;
        s.half_open_calls = 0;
        s.window.clear();
        s.opened_at = (to == CircuitState::Open).then(Instant::now);
        tracing::info!(link = %self.name, %from, %to, "circuit breaker state changed");
    }
}

/// A [`Link`] guarded by a [`CircuitBreaker`].
pub struct CircuitBreakingLink {
    inner: Arc<dyn Link>,
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakingLink {
    /// Guard `inner` with `breaker`.
    pub fn new(inner: Arc<dyn Link>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

impl Link for CircuitBreakingLink {
    fn account_id(&self) -> &AccountId {
        self.inner.account_id()
    }

    fn send_packet(&self, prepare: PreparePacket) -> Result<IlpResponse, LinkError> {
        if !self.breaker.try_acquire() {
            return Err(LinkError::CircuitOpen(self.account_id().to_string()));
        }
        let result = self.inner.send_packet(prepare);
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }
}

/// Wraps every link from an inner [`LinkManager`] in a per-account breaker.
pub struct CircuitBreakingLinkManager {
    inner: Arc<dyn LinkManager>,
    config: CircuitBreakerConfig,
    breakers: DashMap<AccountId, Arc<CircuitBreaker>>,
}

impl CircuitBreakingLinkManager {
    /// Decorate `inner`. With `config.enabled == false` links pass through unwrapped.
    pub fn new(inner: Arc<dyn LinkManager>, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            config,
            breakers: DashMap::new(),
        }
    }

    /// State of the breaker for `account_id`, if one was created.
    pub fn breaker_state(&self, account_id: &AccountId) -> Option<CircuitState> {
        self.breakers.get(account_id).map(|b| b.state())
    }

    fn breaker(&self, account_id: &AccountId) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(account_id.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(account_id.as_str(), self.config.clone())))
            .clone()
    }
}

impl LinkManager for CircuitBreakingLinkManager {
    fn get_or_create_link(&self, account: &AccountSettings) -> Result<Arc<dyn Link>, LinkError> {
        let link = self.inner.get_or_create_link(account)?;
        if !self.config.enabled {
            return Ok(link);
        }
        Ok(Arc::new(CircuitBreakingLink::new(
            link,
            self.breaker(&account.account_id),
        )))
    }
}
