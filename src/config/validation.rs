//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (TTL > 0, limits > 0)
//! - Validate addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RuntimeConfig → Result<(), Vec<ValidationError>>
//! - Transport kind is checked against the known tags here; the registry
//!   re-checks at startup against what was actually registered

use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::schema::{RuntimeConfig, MAX_DURATION_SECS};
use crate::observability::logging::LogFormat;
use crate::transport::{KNOWN_TRANSPORTS, TRANSPORT_HTTP};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("{field} must be at most {max}")]
    TooLarge { field: &'static str, max: u64 },

    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("unknown transport kind '{0}'")]
    UnknownTransport(String),

    #[error("unknown log format '{0}' (expected pretty or json)")]
    UnknownLogFormat(String),

    #[error("transport.http.api_key must not be empty when set")]
    EmptyApiKey,
}

/// Check every semantic constraint, collecting all failures.
pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.session.ttl_secs == 0 {
        errors.push(ValidationError::NotPositive { field: "session.ttl_secs" });
    }
    let durations = [
        ("session.ttl_secs", config.session.ttl_secs),
        ("session.cleanup_interval_secs", config.session.cleanup_interval_secs),
        ("transport.http.request_timeout_secs", config.transport.http.request_timeout_secs),
        ("lifecycle.shutdown_timeout_secs", config.lifecycle.shutdown_timeout_secs),
        ("reload.poll_interval_secs", config.reload.poll_interval_secs),
    ];
    for (field, secs) in durations {
        if secs > MAX_DURATION_SECS {
            errors.push(ValidationError::TooLarge {
                field,
                max: MAX_DURATION_SECS,
            });
        }
    }
    if config.session.max_sessions == 0 {
        errors.push(ValidationError::NotPositive { field: "session.max_sessions" });
    }
    if config.session.cleanup_interval_secs == 0 {
        errors.push(ValidationError::NotPositive {
            field: "session.cleanup_interval_secs",
        });
    }

    if !KNOWN_TRANSPORTS.contains(&config.transport.kind.as_str()) {
        errors.push(ValidationError::UnknownTransport(config.transport.kind.clone()));
    }
    if config.transport.stdio.max_line_bytes == 0 {
        errors.push(ValidationError::NotPositive {
            field: "transport.stdio.max_line_bytes",
        });
    }

    let http = &config.transport.http;
    if config.transport.kind == TRANSPORT_HTTP && http.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "transport.http.bind_address",
            value: http.bind_address.clone(),
        });
    }
    if http.request_timeout_secs == 0 {
        errors.push(ValidationError::NotPositive {
            field: "transport.http.request_timeout_secs",
        });
    }
    if http.max_body_size == 0 {
        errors.push(ValidationError::NotPositive { field: "transport.http.max_body_size" });
    }
    if http.max_concurrent_requests == 0 {
        errors.push(ValidationError::NotPositive {
            field: "transport.http.max_concurrent_requests",
        });
    }
    if http.max_concurrent_requests > Semaphore::MAX_PERMITS {
        errors.push(ValidationError::TooLarge {
            field: "transport.http.max_concurrent_requests",
            max: Semaphore::MAX_PERMITS as u64,
        });
    }
    if matches!(http.api_key.as_deref(), Some(key) if key.trim().is_empty()) {
        errors.push(ValidationError::EmptyApiKey);
    }
    if http.rate_limit.enabled {
        if http.rate_limit.requests_per_second == 0 {
            errors.push(ValidationError::NotPositive {
                field: "transport.http.rate_limit.requests_per_second",
            });
        }
        if http.rate_limit.burst_size == 0 {
            errors.push(ValidationError::NotPositive {
                field: "transport.http.rate_limit.burst_size",
            });
        }
    }

    if config.lifecycle.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::NotPositive {
            field: "lifecycle.shutdown_timeout_secs",
        });
    }

    let observability = &config.observability;
    if LogFormat::parse(&observability.log_format).is_none() {
        errors.push(ValidationError::UnknownLogFormat(observability.log_format.clone()));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }

    if config.reload.enabled && config.reload.poll_interval_secs == 0 {
        errors.push(ValidationError::NotPositive { field: "reload.poll_interval_secs" });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
