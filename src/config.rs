use crate::error::{CoreError, CoreResult};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

/// STOMP version offered in the CONNECT frame.
pub const ACCEPT_VERSION: &str = "1.2";

/// Heart-beat header value. The embedding shell owns liveness probing; the
/// core negotiates no heart-beats of its own.
pub const HEART_BEAT: &str = "0,0";

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// WebSocket endpoint of the message bus.
    pub ws_endpoint: String,
    /// Prefix for location-scoped topics; the subscribe destination is
    /// `<topic_prefix>/<spatial cell>`.
    pub topic_prefix: String,
    /// Offset from UTC to the display timezone, used only when rendering
    /// expiry instants for the UI. Scheduling stays in UTC. +9 in the
    /// current deployment.
    pub display_tz_offset_hours: i64,
    /// Interval of the registry's defensive expiry sweep.
    pub sweep_interval_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            ws_endpoint: "ws://localhost:8080/ws".to_string(),
            topic_prefix: "/topic/geo".to_string(),
            display_tz_offset_hours: 9,
            sweep_interval_secs: 60,
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> CoreResult<Self> {
        dotenv().ok();

        let defaults = Self::default();
        Ok(Self {
            ws_endpoint: env::var("REALTIME_WS_ENDPOINT").unwrap_or(defaults.ws_endpoint),
            topic_prefix: env::var("REALTIME_TOPIC_PREFIX").unwrap_or(defaults.topic_prefix),
            display_tz_offset_hours: parse_env(
                "REALTIME_DISPLAY_TZ_OFFSET_HOURS",
                defaults.display_tz_offset_hours,
            )?,
            sweep_interval_secs: parse_env(
                "REALTIME_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            )?,
        })
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> CoreResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| CoreError::Config(format!("invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}
