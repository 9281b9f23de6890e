// =============================================================================
// Circuit Breakers — per-pair failure isolation with cooldown
// =============================================================================
//
// One breaker per pair for per-pair analysis, plus a single named shared
// breaker guarding the aggregated multi-pair screening path.
//
// State machine: a breaker is OPEN iff failure_count >= threshold AND
// now < open_until, where open_until = last_failure + cooldown. A success
// resets the breaker entirely; once the cooldown elapses the next call is
// admitted (half-open probe) and decides the breaker's fate.
//
// Validation failures must never be recorded here — the error taxonomy's
// `trips_breaker()` gate is enforced by the analyzer before calling in.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

/// Name under which the aggregated screening breaker is registered.
pub const SHARED_SCREENER_BREAKER: &str = "__screener_shared__";

/// Raw state of one breaker.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BreakerState {
    pub failure_count: u32,
    pub last_failure: i64,
    pub open_until: i64,
}

/// Serializable snapshot of one breaker for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerInfo {
    pub scope: String,
    pub failure_count: u32,
    pub open: bool,
    /// Milliseconds until the cooldown lapses; 0 when closed.
    pub remaining_ms: i64,
}

/// Registry of per-scope circuit breakers.
pub struct CircuitBreakerRegistry {
    states: RwLock<HashMap<String, BreakerState>>,
    threshold: u32,
    cooldown_ms: i64,
}

impl CircuitBreakerRegistry {
    pub fn new(threshold: u32, cooldown_ms: i64) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            threshold: threshold.max(1),
            cooldown_ms,
        }
    }

    /// Whether the breaker for `scope` rejects calls at `now`.
    pub fn is_open(&self, scope: &str, now: i64) -> bool {
        let states = self.states.read();
        match states.get(scope) {
            Some(s) => s.failure_count >= self.threshold && now < s.open_until,
            None => false,
        }
    }

    /// Record a breaker-relevant failure for `scope`.
    pub fn record_failure(&self, scope: &str, now: i64) {
        let mut states = self.states.write();
        let state = states.entry(scope.to_string()).or_default();
        state.failure_count += 1;
        state.last_failure = now;
        state.open_until = now + self.cooldown_ms;

        if state.failure_count >= self.threshold {
            warn!(
                scope,
                failures = state.failure_count,
                open_until = state.open_until,
                "circuit breaker open"
            );
        } else {
            debug!(scope, failures = state.failure_count, "breaker failure recorded");
        }
    }

    /// Record a success: the breaker for `scope` resets completely.
    pub fn record_success(&self, scope: &str) {
        let mut states = self.states.write();
        if let Some(state) = states.get_mut(scope) {
            if state.failure_count > 0 {
                debug!(scope, "circuit breaker reset after success");
            }
            *state = BreakerState::default();
        }
    }

    /// Raw state for one scope (default when never touched).
    pub fn state(&self, scope: &str) -> BreakerState {
        self.states.read().get(scope).copied().unwrap_or_default()
    }

    /// Snapshot of every tracked breaker, sorted by scope name.
    pub fn snapshot(&self, now: i64) -> Vec<BreakerInfo> {
        let states = self.states.read();
        let mut all: Vec<BreakerInfo> = states
            .iter()
            .map(|(scope, s)| {
                let open = s.failure_count >= self.threshold && now < s.open_until;
                BreakerInfo {
                    scope: scope.clone(),
                    failure_count: s.failure_count,
                    open,
                    remaining_ms: if open { s.open_until - now } else { 0 },
                }
            })
            .collect();
        all.sort_by(|a, b| a.scope.cmp(&b.scope));
        all
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("threshold", &self.threshold)
            .field("cooldown_ms", &self.cooldown_ms)
            .field("tracked", &self.states.read().len())
            .finish()
    }
}
