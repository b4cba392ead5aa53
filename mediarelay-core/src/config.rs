//! Centralized configuration for the media relay.
//!
//! All tunable parameters live here, grouped by subsystem, with environment
//! variable overrides applied on top of the defaults.

use std::net::SocketAddr;
use std::time::Duration;

use crate::RelayError;
use crate::session::RetryPolicy;
use crate::transport::DataCenterId;

/// Largest chunk the backend serves in a single fetch.
pub const MAX_CHUNK_SIZE: u32 = 1024 * 1024;

/// Fetch offsets and limits must be multiples of this.
pub const CHUNK_ALIGNMENT: u32 = 4096;

/// Central configuration for all relay components.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub streaming: StreamingConfig,
    pub session: SessionConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    pub simulation: SimulationConfig,
}

/// Chunked fetch configuration.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Upstream fetch granularity in bytes
    pub chunk_size: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_SIZE, // 1 MiB
        }
    }
}

/// Media session establishment configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Authorization import attempts for a foreign data center
    pub max_auth_attempts: u32,
    /// Pause before retrying after a connection error
    pub auth_retry_backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_auth_attempts: 6,
            auth_retry_backoff: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_auth_attempts,
            backoff: self.auth_retry_backoff,
        }
    }
}

/// File descriptor cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Period of the full cache clear
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30 * 60), // 30 minutes
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    /// `max-age` advertised in Cache-Control
    pub cache_max_age: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            cache_max_age: Duration::from_secs(3600), // 1 hour
        }
    }
}

/// Simulated backend configuration for development and testing.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Deterministic seed for reproducible content
    pub deterministic_seed: Option<u64>,
    /// Number of generated files
    pub file_count: usize,
    /// Size of each generated file in bytes
    pub file_size: usize,
    /// Data center every simulated account is registered in
    pub home_dc: DataCenterId,
    /// Delay applied to every simulated fetch
    pub fetch_latency: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            file_count: 8,
            file_size: 8 * 1024 * 1024, // 8 MiB
            home_dc: DataCenterId(2),
            fetch_latency: Duration::from_millis(20),
        }
    }
}

impl SimulationConfig {
    /// Creates a configuration for deterministic testing.
    pub fn deterministic_testing() -> Self {
        Self {
            deterministic_seed: Some(42),
            file_count: 4,
            file_size: 64 * 1024,
            fetch_latency: Duration::ZERO,
            ..Default::default()
        }
    }
}

impl RelayConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and leave the default in place.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(chunk_size) = std::env::var("MEDIARELAY_CHUNK_SIZE") {
            if let Ok(bytes) = chunk_size.parse::<u32>() {
                config.streaming.chunk_size = bytes;
            }
        }

        if let Ok(attempts) = std::env::var("MEDIARELAY_AUTH_ATTEMPTS") {
            if let Ok(count) = attempts.parse::<u32>() {
                config.session.max_auth_attempts = count;
            }
        }

        if let Ok(backoff) = std::env::var("MEDIARELAY_AUTH_BACKOFF_MS") {
            if let Ok(millis) = backoff.parse::<u64>() {
                config.session.auth_retry_backoff = Duration::from_millis(millis);
            }
        }

        if let Ok(sweep) = std::env::var("MEDIARELAY_CACHE_SWEEP_SECS") {
            if let Ok(seconds) = sweep.parse::<u64>() {
                config.cache.sweep_interval = Duration::from_secs(seconds);
            }
        }

        if let Ok(address) = std::env::var("MEDIARELAY_BIND_ADDRESS") {
            if let Ok(address) = address.parse::<SocketAddr>() {
                config.server.bind_address = address;
            }
        }

        if let Ok(seed) = std::env::var("MEDIARELAY_SIMULATION_SEED") {
            if let Ok(seed_value) = seed.parse::<u64>() {
                config.simulation.deterministic_seed = Some(seed_value);
            }
        }

        config
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            streaming: StreamingConfig {
                chunk_size: 16 * CHUNK_ALIGNMENT, // 64 KiB
            },
            session: SessionConfig {
                auth_retry_backoff: Duration::ZERO,
                ..Default::default()
            },
            simulation: SimulationConfig::deterministic_testing(),
            ..Default::default()
        }
    }

    /// Checks values that would break the streaming pipeline.
    ///
    /// # Errors
    ///
    /// - `RelayError::Configuration` - Chunk size, retry bound or sweep period is invalid
    pub fn validate(&self) -> Result<(), RelayError> {
        let chunk_size = self.streaming.chunk_size;
        if chunk_size == 0 || chunk_size % CHUNK_ALIGNMENT != 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(RelayError::Configuration {
                reason: format!(
                    "chunk size {chunk_size} must be a positive multiple of {CHUNK_ALIGNMENT} \
                     no larger than {MAX_CHUNK_SIZE}"
                ),
            });
        }

        if self.session.max_auth_attempts == 0 {
            return Err(RelayError::Configuration {
                reason: "at least one authorization attempt is required".to_string(),
            });
        }

        if self.cache.sweep_interval.is_zero() {
            return Err(RelayError::Configuration {
                reason: "cache sweep interval must be positive".to_string(),
            });
        }

        Ok(())
    }
}
