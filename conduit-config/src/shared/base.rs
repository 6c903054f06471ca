use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// The periodic flush cannot run with a zero period.
    #[error("`flush_period_ms` must be greater than zero")]
    FlushPeriodZero,
    /// Shutdown must leave some time for an in-flight flush to finish.
    #[error("`shutdown_timeout_ms` must be greater than zero")]
    ShutdownTimeoutZero,
    #[error("`max_attempts` must be at least one")]
    RetryMaxAttemptsZero,
    #[error("`initial_delay_ms` ({initial}) cannot exceed `max_delay_ms` ({max})")]
    RetryDelayOutOfRange { initial: u64, max: u64 },
    #[error("`backoff_factor` must be at least 1.0, got {0}")]
    RetryBackoffFactorTooSmall(f32),
    #[error("`default_poll_quantity` must be greater than zero")]
    PollQuantityZero,
}
