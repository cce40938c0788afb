//! Per-client fixed-window request counting.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use axum::http::request::Parts;
use serde::Serialize;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, TensoError};

/// Window state for a single client id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientRateState {
    pub id: String,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: u64,
    pub window_seconds: u64,
}

/// Outcome of one `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: u64,
    pub window_seconds: u64,
}

/// Receives the request and the client's current state; returning `Some`
/// replaces the stored state before the window is evaluated.
pub type RateOverride =
    Arc<dyn Fn(&Parts, &ClientRateState) -> Option<ClientRateState> + Send + Sync>;

#[derive(Clone)]
pub struct RateLimiter {
    limit: u64,
    window_seconds: u64,
    clients: Arc<Mutex<HashMap<String, ClientRateState>>>,
    clock: Arc<dyn Clock>,
    override_fn: Option<RateOverride>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.limit)
            .field("window_seconds", &self.window_seconds)
            .field("clock", &self.clock)
            .field("override", &self.override_fn.is_some())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(limit: u64, window_seconds: u64) -> Result<Self> {
        Self::with_clock(limit, window_seconds, Arc::new(SystemClock))
    }

    pub fn with_clock(limit: u64, window_seconds: u64, clock: Arc<dyn Clock>) -> Result<Self> {
        if limit == 0 {
            return Err(TensoError::Configuration(
                "Rate limit must be greater than 0".to_string(),
            ));
        }
        if window_seconds == 0 {
            return Err(TensoError::Configuration(
                "Rate limit window must be greater than 0".to_string(),
            ));
        }

        Ok(RateLimiter {
            limit,
            window_seconds,
            clients: Arc::new(Mutex::new(HashMap::new())),
            clock,
            override_fn: None,
        })
    }

    /// Install the per-request customization hook.
    pub fn with_override(mut self, override_fn: RateOverride) -> Self {
        self.override_fn = Some(override_fn);
        self
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Count one request against `client_id`'s window.
    ///
    /// The whole read-modify-write happens under the map lock, so two
    /// requests racing on the last remaining slot cannot both be admitted.
    pub fn check(&self, client_id: &str, request: &Parts) -> Result<RateDecision> {
        let now = self.clock.now_secs();

        let mut clients = self.clients.lock().map_err(|_| {
            TensoError::Internal("Failed to acquire lock on rate limit state".to_string())
        })?;

        let state = clients
            .entry(client_id.to_string())
            .or_insert_with(|| ClientRateState {
                id: client_id.to_string(),
                limit: self.limit,
                remaining: self.limit,
                reset_at: now + self.window_seconds,
                window_seconds: self.window_seconds,
            });

        if let Some(override_fn) = &self.override_fn {
            if let Some(replacement) = override_fn(request, state) {
                *state = replacement;
            }
        }

        let allowed = if now >= state.reset_at {
            state.reset_at = now + state.window_seconds;
            state.remaining = state.limit.saturating_sub(1);
            true
        } else if state.remaining > 0 {
            state.remaining -= 1;
            true
        } else {
            false
        };

        debug!(
            client_id = %client_id,
            allowed,
            remaining = state.remaining,
            reset_at = state.reset_at,
            "rate limit checked"
        );

        Ok(RateDecision {
            allowed,
            limit: state.limit,
            remaining: state.remaining,
            reset_at: state.reset_at,
            window_seconds: state.window_seconds,
        })
    }

    /// Snapshot of a client's window, if it has been seen.
    pub fn state(&self, client_id: &str) -> Result<Option<ClientRateState>> {
        let clients = self.clients.lock().map_err(|_| {
            TensoError::Internal("Failed to acquire lock on rate limit state".to_string())
        })?;

        Ok(clients.get(client_id).cloned())
    }

    /// Forget a client; its next request opens a fresh window.
    pub fn reset(&self, client_id: &str) -> Result<()> {
        let mut clients = self.clients.lock().map_err(|_| {
            TensoError::Internal("Failed to acquire lock on rate limit state".to_string())
        })?;
        clients.remove(client_id);

        Ok(())
    }

    pub fn client_count(&self) -> Result<usize> {
        let clients = self.clients.lock().map_err(|_| {
            TensoError::Internal("Failed to acquire lock on rate limit state".to_string())
        })?;

        Ok(clients.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use axum::http::Request;

    fn parts(path: &str) -> Parts {
        Request::builder().uri(path).body(()).unwrap().into_parts().0
    }

    fn limiter(limit: u64, window: u64) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(1_000);
        let limiter = RateLimiter::with_clock(limit, window, Arc::new(clock.clone())).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_rejects_zero_configuration() {
        assert!(RateLimiter::new(0, 60).is_err());
        assert!(RateLimiter::new(10, 0).is_err());
    }

    #[test]
    fn test_window_drains_then_denies() {
        let (limiter, _clock) = limiter(3, 60);
        let req = parts("/");

        let mut previous = u64::MAX;
        for _ in 0..3 {
            let decision = limiter.check("client", &req).unwrap();
            assert!(decision.allowed);
            assert!(decision.remaining < previous);
            previous = decision.remaining;
        }
        assert_eq!(previous, 0);

        let denied = limiter.check("client", &req).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, 1_060);
    }

    #[test]
    fn test_window_resets_after_reset_at() {
        let (limiter, clock) = limiter(2, 30);
        let req = parts("/");

        limiter.check("client", &req).unwrap();
        limiter.check("client", &req).unwrap();
        assert!(!limiter.check("client", &req).unwrap().allowed);

        clock.advance(30);
        let decision = limiter.check("client", &req).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert_eq!(decision.reset_at, 1_060);
    }

    #[test]
    fn test_clients_are_isolated() {
        let (limiter, _clock) = limiter(1, 60);
        let req = parts("/");

        assert!(limiter.check("a", &req).unwrap().allowed);
        assert!(!limiter.check("a", &req).unwrap().allowed);
        assert!(limiter.check("b", &req).unwrap().allowed);
        assert_eq!(limiter.client_count().unwrap(), 2);
    }

    #[test]
    fn test_override_replaces_state() {
        let (limiter, _clock) = limiter(100, 60);
        let limiter = limiter.with_override(Arc::new(|request: &Parts, state: &ClientRateState| {
            if request.uri.path().starts_with("/search") && state.limit != 1 {
                Some(ClientRateState {
                    limit: 1,
                    remaining: 1,
                    ..state.clone()
                })
            } else {
                None
            }
        }));

        let search = parts("/search?q=rust");
        assert!(limiter.check("client", &search).unwrap().allowed);
        let denied = limiter.check("client", &search).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 1);
    }

    #[test]
    fn test_reset_forgets_client() {
        let (limiter, _clock) = limiter(1, 60);
        let req = parts("/");

        limiter.check("client", &req).unwrap();
        assert_eq!(limiter.state("client").unwrap().unwrap().remaining, 0);

        limiter.reset("client").unwrap();
        assert!(limiter.state("client").unwrap().is_none());
        assert!(limiter.check("client", &req).unwrap().allowed);
    }

    #[test]
    fn test_concurrent_checks_serialize_last_slot() {
        let (limiter, _clock) = limiter(1, 60);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.check("shared", &parts("/")).unwrap().allowed)
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(admitted, 1);
    }
}
