//! Default values for the [`crate::config::Config`] surface.
//!
//! Centralized here so `serde`'s `#[serde(default = ...)]` attributes can
//! reference a named function instead of a literal.

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_environment() -> String {
    "dev".to_string()
}

pub fn default_http_port() -> u16 {
    8080
}

pub fn default_rate_limiter_enabled() -> bool {
    true
}

pub fn default_rate_limiter_limit() -> u32 {
    100
}

pub fn default_rate_limiter_burst() -> u32 {
    20
}

pub fn default_postgres_port() -> u16 {
    5432
}

pub fn default_influxdb_port() -> u16 {
    8086
}

pub fn default_redis_port() -> u16 {
    6379
}

pub fn default_cache_ttl_seconds() -> u64 {
    300
}

pub fn default_smtp_port() -> u16 {
    587
}

pub fn default_smtp_enabled() -> bool {
    false
}

pub fn default_chatbot_enabled() -> bool {
    false
}

pub fn default_scheduler_tick_seconds() -> u64 {
    1
}

pub fn default_worker_pool_size() -> usize {
    16
}

pub fn default_session_sweep_interval_seconds() -> u64 {
    300
}

pub fn default_graceful_shutdown_timeout_seconds() -> u64 {
    30
}
