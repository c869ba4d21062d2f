// Platform Domain Model
//
// A `Platform` is one third-party API the stream bot talks to. `PlatformHealth`
// is the circuit/throttle record tracked per platform by the health monitor;
// rows are created lazily on first observed interaction and live for the
// process lifetime.

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

/// Third-party platforms the bot delivers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Twitch,
    Youtube,
    Kick,
    Discord,
    Spotify,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitch => "twitch",
            Platform::Youtube => "youtube",
            Platform::Kick => "kick",
            Platform::Discord => "discord",
            Platform::Spotify => "spotify",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "twitch" => Ok(Platform::Twitch),
            "youtube" => Ok(Platform::Youtube),
            "kick" => Ok(Platform::Kick),
            "discord" => Ok(Platform::Discord),
            "spotify" => Ok(Platform::Spotify),
            other => Err(DomainError::UnknownPlatform(other.to_string())),
        }
    }
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Failing fast, requests rejected pre-flight
    Open,
    /// Testing recovery, single probe request allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Per-platform health record.
///
/// The circuit state and the throttle window are independent axes: a platform
/// can be throttled while circuit-closed, or circuit-open without ever having
/// been rate limited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformHealth {
    pub platform: Platform,
    pub circuit: CircuitState,
    /// Consecutive circuit-relevant failures in the current window
    pub consecutive_failures: u32,
    /// Start of the current failure counting window (epoch ms)
    pub window_start: Option<i64>,
    /// Cool-down expiry while open (epoch ms)
    pub open_until: Option<i64>,
    /// Rate-limit cooldown, independent of circuit state (epoch ms)
    pub throttle_until: Option<i64>,
    /// Consecutive circuit trips; drives exponential cool-down doubling,
    /// reset only when a probe closes the circuit
    pub trip_count: u32,
    /// Half-open single-probe guard
    pub probe_in_flight: bool,
    pub last_success_at: Option<i64>,
    pub last_failure_at: Option<i64>,
}

impl PlatformHealth {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            circuit: CircuitState::Closed,
            consecutive_failures: 0,
            window_start: None,
            open_until: None,
            throttle_until: None,
            trip_count: 0,
            probe_in_flight: false,
            last_success_at: None,
            last_failure_at: None,
        }
    }

    /// Whether the throttle window is active at `now`
    pub fn is_throttled(&self, now: i64) -> bool {
        self.throttle_until.is_some_and(|until| now < until)
    }
}
