//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::MAX_WINDOW;

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address to bind.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    3000
}

/// Rate limiting configuration.
///
/// Every limiter shares the same window length; each has its own maximum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests per window per client IP, applied to every route
    #[serde(default = "default_global_rate_limit")]
    pub global_rate_limit: u64,

    /// Requests per window per user on user routes
    #[serde(default = "default_user_rate_limit")]
    pub user_rate_limit: u64,

    /// Requests per window per API key on admin routes
    #[serde(default = "default_admin_rate_limit")]
    pub admin_rate_limit: u64,

    /// Window length in seconds
    #[serde(default = "default_expiration")]
    pub rate_limit_expiration_secs: u64,

    /// How often the reaper sweeps idle counters, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long a counter stays after its window ends, in seconds
    #[serde(default)]
    pub idle_threshold_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            global_rate_limit: default_global_rate_limit(),
            user_rate_limit: default_user_rate_limit(),
            admin_rate_limit: default_admin_rate_limit(),
            rate_limit_expiration_secs: default_expiration(),
            sweep_interval_secs: default_sweep_interval(),
            idle_threshold_secs: 0,
        }
    }
}

impl RateLimitingConfig {
    /// Get the window length.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_expiration_secs)
    }

    /// Get the reaper interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Get the idle threshold.
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }
}

fn default_global_rate_limit() -> u64 {
    100
}

fn default_user_rate_limit() -> u64 {
    50
}

fn default_admin_rate_limit() -> u64 {
    200
}

fn default_expiration() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    30
}

/// Flat view of the environment variables the service understands.
#[derive(Debug, Deserialize)]
struct EnvConfig {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_global_rate_limit")]
    global_rate_limit: u64,
    #[serde(default = "default_user_rate_limit")]
    user_rate_limit: u64,
    #[serde(default = "default_admin_rate_limit")]
    admin_rate_limit: u64,
    #[serde(default = "default_expiration")]
    rate_limit_expiration: u64,
    #[serde(default = "default_sweep_interval")]
    sweep_interval: u64,
    #[serde(default)]
    idle_threshold: u64,
}

impl From<EnvConfig> for TurnstileConfig {
    fn from(env: EnvConfig) -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: env.port,
            },
            rate_limiting: RateLimitingConfig {
                global_rate_limit: env.global_rate_limit,
                user_rate_limit: env.user_rate_limit,
                admin_rate_limit: env.admin_rate_limit,
                rate_limit_expiration_secs: env.rate_limit_expiration,
                sweep_interval_secs: env.sweep_interval,
                idle_threshold_secs: env.idle_threshold,
            },
        }
    }
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig =
            serde_yaml::from_str(yaml).map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the process environment.
    ///
    /// Reads `PORT`, `GLOBAL_RATE_LIMIT`, `USER_RATE_LIMIT`,
    /// `ADMIN_RATE_LIMIT`, `RATE_LIMIT_EXPIRATION`, `SWEEP_INTERVAL` and
    /// `IDLE_THRESHOLD`. Unset variables take their defaults.
    pub fn from_env() -> Result<Self> {
        Self::load_env(None)
    }

    /// Load configuration from an explicit set of environment variables.
    pub fn from_env_vars(vars: HashMap<String, String>) -> Result<Self> {
        Self::load_env(Some(vars))
    }

    fn load_env(source: Option<HashMap<String, String>>) -> Result<Self> {
        let env: EnvConfig = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true).source(source))
            .build()?
            .try_deserialize()?;
        let config = TurnstileConfig::from(env);
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that could never build a working limiter.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        for (name, value) in [
            ("global_rate_limit", rl.global_rate_limit),
            ("user_rate_limit", rl.user_rate_limit),
            ("admin_rate_limit", rl.admin_rate_limit),
            ("rate_limit_expiration_secs", rl.rate_limit_expiration_secs),
            ("sweep_interval_secs", rl.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(TurnstileError::Config(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        for (name, value) in [
            ("rate_limit_expiration_secs", rl.rate_limit_expiration_secs),
            ("idle_threshold_secs", rl.idle_threshold_secs),
        ] {
            if value > MAX_WINDOW.as_secs() {
                return Err(TurnstileError::Config(format!(
                    "{} must be at most {}, got {}",
                    name,
                    MAX_WINDOW.as_secs(),
                    value
                )));
            }
        }
        Ok(())
    }
}
