use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub order_queue_size: usize,
    pub event_buffer_size: usize,
    pub assignment_retry: Duration,
    pub tracking_poll_interval: Duration,
    pub location_sync_interval: Duration,
    pub external_call_timeout: Duration,
    pub route_recompute_threshold_m: f64,
    pub average_speed_kmh: f64,
    pub routing_url: Option<String>,
    pub otp_verify_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            order_queue_size: parse_or_default("ORDER_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            assignment_retry: Duration::from_millis(parse_or_default("ASSIGNMENT_RETRY_MS", 250)?),
            tracking_poll_interval: Duration::from_secs(parse_or_default(
                "TRACKING_POLL_INTERVAL_SECS",
                30,
            )?),
            location_sync_interval: Duration::from_secs(parse_or_default(
                "LOCATION_SYNC_INTERVAL_SECS",
                10,
            )?),
            external_call_timeout: Duration::from_secs(parse_or_default(
                "EXTERNAL_CALL_TIMEOUT_SECS",
                10,
            )?),
            route_recompute_threshold_m: parse_or_default("ROUTE_RECOMPUTE_THRESHOLD_M", 50.0)?,
            average_speed_kmh: parse_or_default("AVERAGE_SPEED_KMH", 25.0)?,
            routing_url: optional("ROUTING_URL"),
            otp_verify_url: optional("OTP_VERIFY_URL"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.order_queue_size == 0 {
            return Err(invalid("ORDER_QUEUE_SIZE", "must be > 0"));
        }
        if self.event_buffer_size == 0 {
            return Err(invalid("EVENT_BUFFER_SIZE", "must be > 0"));
        }
        if self.tracking_poll_interval.is_zero() {
            return Err(invalid("TRACKING_POLL_INTERVAL_SECS", "must be > 0"));
        }
        if self.location_sync_interval.is_zero() {
            return Err(invalid("LOCATION_SYNC_INTERVAL_SECS", "must be > 0"));
        }
        if self.external_call_timeout.is_zero() {
            return Err(invalid("EXTERNAL_CALL_TIMEOUT_SECS", "must be > 0"));
        }
        if !(self.route_recompute_threshold_m.is_finite() && self.route_recompute_threshold_m >= 0.0) {
            return Err(invalid("ROUTE_RECOMPUTE_THRESHOLD_M", "must be >= 0"));
        }
        if !(self.average_speed_kmh.is_finite() && self.average_speed_kmh > 0.0) {
            return Err(invalid("AVERAGE_SPEED_KMH", "must be > 0"));
        }
        Ok(())
    }
}

fn invalid(key: &str, rule: &str) -> AppError {
    AppError::Internal(format!("invalid {key}: {rule}"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            order_queue_size: 1024,
            event_buffer_size: 1024,
            assignment_retry: Duration::from_millis(250),
            tracking_poll_interval: Duration::from_secs(30),
            location_sync_interval: Duration::from_secs(10),
            external_call_timeout: Duration::from_secs(10),
            route_recompute_threshold_m: 50.0,
            average_speed_kmh: 25.0,
            routing_url: None,
            otp_verify_url: None,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Config;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_intervals_and_buffers_are_rejected() {
        let cases = [
            Config { tracking_poll_interval: Duration::ZERO, ..Config::default() },
            Config { location_sync_interval: Duration::ZERO, ..Config::default() },
            Config { external_call_timeout: Duration::ZERO, ..Config::default() },
            Config { order_queue_size: 0, ..Config::default() },
            Config { event_buffer_size: 0, ..Config::default() },
        ];

        for config in cases {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
    }

    #[test]
    fn threshold_must_be_a_non_negative_number() {
        for threshold in [-1.0, f64::NAN, f64::INFINITY] {
            let config = Config { route_recompute_threshold_m: threshold, ..Config::default() };
            assert!(config.validate().is_err());
        }

        let zero = Config { route_recompute_threshold_m: 0.0, ..Config::default() };
        assert!(zero.validate().is_ok());
    }

    #[test]
    fn error_names_the_offending_variable() {
        let config = Config { tracking_poll_interval: Duration::ZERO, ..Config::default() };

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("TRACKING_POLL_INTERVAL_SECS"));
    }
}
