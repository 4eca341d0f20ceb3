//! Heartbeat-based liveness for the development broker

use std::time::Duration;

/// Liveness policy configuration
#[derive(Clone, Debug)]
pub struct LivenessConfig {
    /// Interval assumed for instances that have not announced or shown one
    pub heartbeat_interval: Duration,
    /// Number of consecutive heartbeats that may be missed before eviction
    pub missed_heartbeats: u32,
    /// Interval between eviction sweeps
    pub sweep_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(1000),
            missed_heartbeats: 3,
            sweep_interval: Duration::from_millis(1000),
        }
    }
}

impl LivenessConfig {
    /// Expect heartbeats every `interval`, sweeping at the same pace
    pub fn with_heartbeat_interval(interval: Duration) -> Self {
        Self {
            heartbeat_interval: interval,
            sweep_interval: interval,
            ..Self::default()
        }
    }

    /// Longest silence tolerated from a service heartbeating every `interval`
    pub fn max_silence_for(&self, interval: Option<Duration>) -> Duration {
        interval.unwrap_or(self.heartbeat_interval) * self.missed_heartbeats.max(1)
    }

    /// Longest silence tolerated from a service of unknown interval
    pub fn max_silence(&self) -> Duration {
        self.max_silence_for(None)
    }
}
