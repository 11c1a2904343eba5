use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Host the master binds to
    pub host: String,
    /// Port the master listens on
    pub port: u16,
    /// A worker whose last heartbeat is at least this old is unhealthy.
    pub health_timeout: Duration,
    /// Period of the background health sweep.
    pub sweep_interval: Duration,
    /// Bound on the reachability probe made during registration.
    pub probe_timeout: Duration,
    /// Bound on forwarded tool calls. Unbounded when unset.
    pub forward_timeout: Option<Duration>,
    /// Tools whose routes exist before any worker registers.
    pub tools: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            health_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(10),
            forward_timeout: None,
            tools: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars()
    }

    /// Read the process environment without consulting `.env`.
    pub fn from_vars() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let forward_timeout = match std::env::var("MASTER_FORWARD_TIMEOUT_SECS") {
            Ok(raw) if !raw.trim().is_empty() => Some(Duration::from_secs(
                raw.trim().parse::<u64>().map_err(|e| {
                    anyhow::anyhow!("Failed to parse env var MASTER_FORWARD_TIMEOUT_SECS={raw}: {e}")
                })?,
            )),
            _ => None,
        };

        let config = Self {
            host: env_str("MASTER_HOST", &defaults.host),
            port: env_parse("MASTER_PORT", defaults.port)?,
            health_timeout: Duration::from_secs(env_parse("MASTER_HEALTH_TIMEOUT_SECS", 60)?),
            sweep_interval: Duration::from_secs(env_parse("MASTER_SWEEP_INTERVAL_SECS", 5)?),
            probe_timeout: Duration::from_secs(env_parse("MASTER_PROBE_TIMEOUT_SECS", 10)?),
            forward_timeout,
            tools: env_csv("MASTER_TOOLS"),
        };

        if config.health_timeout.is_zero() {
            anyhow::bail!("MASTER_HEALTH_TIMEOUT_SECS must be greater than zero");
        }
        if config.sweep_interval.is_zero() {
            anyhow::bail!("MASTER_SWEEP_INTERVAL_SECS must be greater than zero");
        }
        Ok(config)
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}
