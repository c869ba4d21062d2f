// Platform Health Monitor - per-platform circuit breaker + throttle tracking
//
// State machine:
// - closed -> open: threshold consecutive failures within the window
// - open -> half_open: cool-down elapsed (cool-down doubles per consecutive
//   trip, capped)
// - half_open -> closed: successful probe (resets counters and trip count)
// - half_open -> open: failed probe (cool-down doubled again)
//
// Rate-limit responses set throttle_until and never touch the failure
// counter; auth failures are routed to the token lifecycle manager and never
// reach this component. Issues no network calls itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::domain::{CircuitState, Platform, PlatformHealth};
use crate::port::TimeProvider;

/// Circuit breaker / throttle tuning
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures that trip the circuit
    pub failure_threshold: u32,
    /// Window for counting consecutive failures (ms)
    pub failure_window_ms: i64,
    /// Cool-down after the first trip (ms); doubles per consecutive trip
    pub base_open_ms: i64,
    /// Cool-down cap (ms)
    pub max_open_ms: i64,
    /// Throttle window when the platform sends no retry-after (ms)
    pub default_throttle_ms: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            base_open_ms: 30_000,
            max_open_ms: 10 * 60 * 1_000,
            default_throttle_ms: 30_000,
        }
    }
}

/// Classification fed into `record_failure`.
///
/// Auth failures have no variant here on purpose; they belong to the token
/// lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network / 5xx / timeout; counts toward the circuit
    Transient,
    /// 429; sets the throttle window only
    RateLimited { retry_after_ms: Option<i64> },
}

/// Per-platform circuit breaker and throttle tracker.
///
/// All state lives under one mutex, so every update is an atomic
/// read-modify-write; records are created lazily on first observed
/// interaction.
pub struct PlatformHealthMonitor {
    config: HealthConfig,
    time_provider: Arc<dyn TimeProvider>,
    state: Mutex<HashMap<Platform, PlatformHealth>>,
}

impl PlatformHealthMonitor {
    pub fn new(config: HealthConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            config,
            time_provider,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a request to `platform` would currently be allowed.
    ///
    /// Pure query: does not consume the half-open probe. Callers about to
    /// send must go through `acquire_send_permit`.
    pub fn can_make_request(&self, platform: Platform) -> bool {
        let now = self.time_provider.now_millis();
        let state = self.state.lock().unwrap();
        match state.get(&platform) {
            None => true,
            Some(health) => match health.circuit {
                CircuitState::Closed => true,
                CircuitState::Open => health.open_until.is_some_and(|until| now >= until),
                CircuitState::HalfOpen => !health.probe_in_flight,
            },
        }
    }

    /// Whether the platform's rate-limit window is active
    pub fn is_throttled(&self, platform: Platform) -> bool {
        let now = self.time_provider.now_millis();
        let state = self.state.lock().unwrap();
        state
            .get(&platform)
            .map(|health| health.is_throttled(now))
            .unwrap_or(false)
    }

    /// Take the permit for one send attempt.
    ///
    /// Closed circuits always grant; an open circuit whose cool-down elapsed
    /// transitions to half-open and grants the single probe; a half-open
    /// circuit grants only while no probe is in flight. The probe is released
    /// by the next `record_success` / `record_failure`.
    pub fn acquire_send_permit(&self, platform: Platform) -> bool {
        let now = self.time_provider.now_millis();
        let mut state = self.state.lock().unwrap();
        let health = state
            .entry(platform)
            .or_insert_with(|| PlatformHealth::new(platform));

        match health.circuit {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if health.open_until.is_some_and(|until| now >= until) {
                    health.circuit = CircuitState::HalfOpen;
                    health.probe_in_flight = true;
                    debug!(platform = %platform, "circuit half-open, probe permitted");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if health.probe_in_flight {
                    false
                } else {
                    health.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful interaction
    pub fn record_success(&self, platform: Platform) {
        let now = self.time_provider.now_millis();
        let mut state = self.state.lock().unwrap();
        let health = state
            .entry(platform)
            .or_insert_with(|| PlatformHealth::new(platform));

        health.last_success_at = Some(now);
        match health.circuit {
            CircuitState::Closed => {
                health.consecutive_failures = 0;
                health.window_start = None;
            }
            CircuitState::HalfOpen => {
                health.circuit = CircuitState::Closed;
                health.consecutive_failures = 0;
                health.window_start = None;
                health.open_until = None;
                health.trip_count = 0;
                health.probe_in_flight = false;
                info!(platform = %platform, "circuit closed after successful probe");
            }
            CircuitState::Open => {
                debug!(platform = %platform, "unexpected success while circuit open");
            }
        }
    }

    /// Record a failed interaction.
    ///
    /// Rate-limit failures only move the throttle window; transient failures
    /// count toward the circuit.
    pub fn record_failure(&self, platform: Platform, kind: FailureKind) {
        let now = self.time_provider.now_millis();
        let mut state = self.state.lock().unwrap();
        let health = state
            .entry(platform)
            .or_insert_with(|| PlatformHealth::new(platform));

        if let FailureKind::RateLimited { retry_after_ms } = kind {
            let window = retry_after_ms.unwrap_or(self.config.default_throttle_ms);
            health.throttle_until = Some(now + window);
            debug!(
                platform = %platform,
                throttle_ms = window,
                "platform throttled"
            );
            return;
        }

        health.last_failure_at = Some(now);
        match health.circuit {
            CircuitState::Closed => {
                // Start or continue the failure window
                match health.window_start {
                    Some(start) if now - start <= self.config.failure_window_ms => {
                        health.consecutive_failures += 1;
                    }
                    _ => {
                        health.window_start = Some(now);
                        health.consecutive_failures = 1;
                    }
                }

                if health.consecutive_failures >= self.config.failure_threshold {
                    health.trip_count += 1;
                    let cooldown = self.cooldown_ms(health.trip_count);
                    health.circuit = CircuitState::Open;
                    health.open_until = Some(now + cooldown);
                    health.probe_in_flight = false;
                    warn!(
                        platform = %platform,
                        failures = health.consecutive_failures,
                        cooldown_ms = cooldown,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Probe failed: back to open with the cool-down doubled again
                health.trip_count += 1;
                let cooldown = self.cooldown_ms(health.trip_count);
                health.circuit = CircuitState::Open;
                health.open_until = Some(now + cooldown);
                health.probe_in_flight = false;
                warn!(
                    platform = %platform,
                    cooldown_ms = cooldown,
                    "probe failed, circuit re-opened"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Health snapshot for one platform (None until first interaction)
    pub fn platform_health(&self, platform: Platform) -> Option<PlatformHealth> {
        self.state.lock().unwrap().get(&platform).cloned()
    }

    /// Health snapshots for every tracked platform
    pub fn all_platform_health(&self) -> Vec<PlatformHealth> {
        let state = self.state.lock().unwrap();
        let mut all: Vec<PlatformHealth> = state.values().cloned().collect();
        all.sort_by_key(|h| h.platform.as_str());
        all
    }

    /// Cool-down for the nth consecutive trip: base * 2^(n-1), capped
    fn cooldown_ms(&self, trip_count: u32) -> i64 {
        let doublings = trip_count.saturating_sub(1).min(30);
        (self.config.base_open_ms << doublings).min(self.config.max_open_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::mocks::MockTimeProvider;

    fn monitor() -> (Arc<MockTimeProvider>, PlatformHealthMonitor) {
        let clock = Arc::new(MockTimeProvider::new(1_000_000));
        let config = HealthConfig {
            failure_threshold: 3,
            failure_window_ms: 60_000,
            base_open_ms: 10_000,
            max_open_ms: 80_000,
            default_throttle_ms: 5_000,
        };
        let monitor = PlatformHealthMonitor::new(config, clock.clone());
        (clock, monitor)
    }

    fn trip(monitor: &PlatformHealthMonitor, platform: Platform) {
        for _ in 0..3 {
            monitor.record_failure(platform, FailureKind::Transient);
        }
    }

    #[test]
    fn test_unknown_platform_allows_requests() {
        let (_, monitor) = monitor();
        assert!(monitor.can_make_request(Platform::Twitch));
        assert!(!monitor.is_throttled(Platform::Twitch));
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let (_, monitor) = monitor();
        monitor.record_failure(Platform::Twitch, FailureKind::Transient);
        monitor.record_failure(Platform::Twitch, FailureKind::Transient);
        assert!(monitor.can_make_request(Platform::Twitch));
        monitor.record_failure(Platform::Twitch, FailureKind::Transient);

        assert!(!monitor.can_make_request(Platform::Twitch));
        assert!(!monitor.acquire_send_permit(Platform::Twitch));
        let health = monitor.platform_health(Platform::Twitch).unwrap();
        assert_eq!(health.circuit, CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failure_window() {
        let (_, monitor) = monitor();
        monitor.record_failure(Platform::Twitch, FailureKind::Transient);
        monitor.record_failure(Platform::Twitch, FailureKind::Transient);
        monitor.record_success(Platform::Twitch);
        monitor.record_failure(Platform::Twitch, FailureKind::Transient);
        monitor.record_failure(Platform::Twitch, FailureKind::Transient);

        // Only 2 consecutive failures since the success: still closed
        assert!(monitor.can_make_request(Platform::Twitch));
    }

    #[test]
    fn test_failure_window_expiry_restarts_count() {
        let (clock, monitor) = monitor();
        monitor.record_failure(Platform::Kick, FailureKind::Transient);
        monitor.record_failure(Platform::Kick, FailureKind::Transient);

        clock.advance(61_000);
        monitor.record_failure(Platform::Kick, FailureKind::Transient);

        let health = monitor.platform_health(Platform::Kick).unwrap();
        assert_eq!(health.circuit, CircuitState::Closed);
        assert_eq!(health.consecutive_failures, 1);
    }

    #[test]
    fn test_half_open_single_probe() {
        let (clock, monitor) = monitor();
        trip(&monitor, Platform::Twitch);

        clock.advance(10_000);
        assert!(monitor.can_make_request(Platform::Twitch));
        // First permit wins the probe, second is rejected
        assert!(monitor.acquire_send_permit(Platform::Twitch));
        assert!(!monitor.acquire_send_permit(Platform::Twitch));
        assert!(!monitor.can_make_request(Platform::Twitch));
    }

    #[test]
    fn test_probe_success_closes_and_resets() {
        let (clock, monitor) = monitor();
        trip(&monitor, Platform::Twitch);
        clock.advance(10_000);
        assert!(monitor.acquire_send_permit(Platform::Twitch));

        monitor.record_success(Platform::Twitch);
        let health = monitor.platform_health(Platform::Twitch).unwrap();
        assert_eq!(health.circuit, CircuitState::Closed);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.trip_count, 0);
        assert!(monitor.can_make_request(Platform::Twitch));
    }

    #[test]
    fn test_probe_failure_doubles_cooldown() {
        let (clock, monitor) = monitor();
        trip(&monitor, Platform::Twitch); // trip 1: open for 10s

        clock.advance(10_000);
        assert!(monitor.acquire_send_permit(Platform::Twitch));
        monitor.record_failure(Platform::Twitch, FailureKind::Transient); // trip 2: 20s

        let health = monitor.platform_health(Platform::Twitch).unwrap();
        assert_eq!(health.circuit, CircuitState::Open);
        assert_eq!(
            health.open_until.unwrap(),
            clock.now_millis() + 20_000
        );

        // Not yet elapsed
        clock.advance(19_999);
        assert!(!monitor.acquire_send_permit(Platform::Twitch));
        clock.advance(1);
        assert!(monitor.acquire_send_permit(Platform::Twitch));
    }

    #[test]
    fn test_cooldown_capped() {
        let (clock, monitor) = monitor();
        // Trip repeatedly; cool-down would be 10s,20s,40s,80s,160s... capped at 80s
        for _ in 0..5 {
            trip(&monitor, Platform::Youtube);
            let health = monitor.platform_health(Platform::Youtube).unwrap();
            let open_until = health.open_until.unwrap();
            assert!(open_until - clock.now_millis() <= 80_000);
            clock.set(open_until);
            assert!(monitor.acquire_send_permit(Platform::Youtube));
            // Fail the probe to trip again (re-enter closed not needed)
            monitor.record_failure(Platform::Youtube, FailureKind::Transient);
        }
    }

    #[test]
    fn test_rate_limit_sets_throttle_not_circuit() {
        let (clock, monitor) = monitor();
        for _ in 0..10 {
            monitor.record_failure(
                Platform::Spotify,
                FailureKind::RateLimited {
                    retry_after_ms: Some(2_000),
                },
            );
        }

        // Throttled but circuit untouched: the two axes are independent
        assert!(monitor.is_throttled(Platform::Spotify));
        assert!(monitor.can_make_request(Platform::Spotify));
        let health = monitor.platform_health(Platform::Spotify).unwrap();
        assert_eq!(health.circuit, CircuitState::Closed);
        assert_eq!(health.consecutive_failures, 0);

        clock.advance(2_000);
        assert!(!monitor.is_throttled(Platform::Spotify));
    }

    #[test]
    fn test_rate_limit_default_window() {
        let (clock, monitor) = monitor();
        monitor.record_failure(
            Platform::Discord,
            FailureKind::RateLimited { retry_after_ms: None },
        );
        clock.advance(4_999);
        assert!(monitor.is_throttled(Platform::Discord));
        clock.advance(1);
        assert!(!monitor.is_throttled(Platform::Discord));
    }

    #[test]
    fn test_throttled_while_open_are_independent() {
        let (_, monitor) = monitor();
        trip(&monitor, Platform::Twitch);
        monitor.record_failure(
            Platform::Twitch,
            FailureKind::RateLimited { retry_after_ms: Some(60_000) },
        );
        let health = monitor.platform_health(Platform::Twitch).unwrap();
        assert_eq!(health.circuit, CircuitState::Open);
        assert!(monitor.is_throttled(Platform::Twitch));
    }

    #[test]
    fn test_all_platform_health_lazily_created() {
        let (_, monitor) = monitor();
        assert!(monitor.all_platform_health().is_empty());
        monitor.record_success(Platform::Twitch);
        monitor.record_failure(Platform::Spotify, FailureKind::Transient);
        assert_eq!(monitor.all_platform_health().len(), 2);
    }
}
