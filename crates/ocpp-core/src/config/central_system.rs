//! Central system connection configuration.

use serde::{Deserialize, Serialize};

/// Connection settings for the remote central system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentralSystemConfig {
    /// WebSocket endpoint of the central system (without the charge point id).
    pub url: String,
    /// Identity of this charge point, appended to `url`.
    pub charge_point_id: String,
    /// Interval between Heartbeat.req messages in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Delay between reconnect attempts in seconds.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_seconds: u64,
    /// Delay before the message queue resumes after a reconnect, in seconds.
    #[serde(default)]
    pub reconnect_resume_delay_seconds: u64,
}

impl CentralSystemConfig {
    /// Full endpoint URL for this charge point.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            self.charge_point_id
        )
    }
}

fn default_heartbeat_interval() -> u64 {
    300
}

fn default_reconnect_interval() -> u64 {
    10
}
