use std::{path::PathBuf, time::Duration};

/// Worker settings, read from the process environment.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Interface the listener binds to
    pub host: String,
    /// Preferred port; `0` lets the OS choose.
    pub port: u16,
    /// Host put into `worker_url`. Detected when unset.
    pub advertise_host: Option<String>,
    /// Master base URL. Registration is skipped when unset.
    pub master_url: Option<String>,
    /// Explicit tools file; otherwise `tools.toml` is searched upward.
    pub tools_config: Option<PathBuf>,
    pub heartbeat_interval: Duration,
    /// Grace period between serving and the first registration attempt.
    pub register_delay: Duration,
    pub register_backoff: Duration,
    /// `0` retries forever.
    pub register_max_attempts: u32,
    pub bind_max_attempts: u32,
    pub bind_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            host: "0.0.0.0".to_string(),
            port: 8001,
            advertise_host: None,
            master_url: None,
            tools_config: None,
            heartbeat_interval: Duration::from_secs(30),
            register_delay: Duration::from_millis(2000),
            register_backoff: Duration::from_millis(1000),
            register_max_attempts: 0,
            bind_max_attempts: 20,
            bind_backoff: Duration::from_millis(1000),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            worker_id: env_opt("WORKER_ID").unwrap_or(defaults.worker_id),
            host: env_opt("WORKER_HOST").unwrap_or(defaults.host),
            port: env_parse("WORKER_PORT", defaults.port)?,
            advertise_host: env_opt("WORKER_ADVERTISE_HOST"),
            master_url: env_opt("WORKER_MASTER_URL").map(|url| url.trim_end_matches('/').to_string()),
            tools_config: env_opt("WORKER_TOOLS_CONFIG").map(PathBuf::from),
            heartbeat_interval: Duration::from_secs(env_parse("WORKER_HEARTBEAT_INTERVAL_SECS", 30)?),
            register_delay: Duration::from_millis(env_parse("WORKER_REGISTER_DELAY_MS", 2000)?),
            register_backoff: Duration::from_millis(env_parse("WORKER_REGISTER_BACKOFF_MS", 1000)?),
            register_max_attempts: env_parse("WORKER_REGISTER_MAX_ATTEMPTS", 0)?,
            bind_max_attempts: env_parse("WORKER_BIND_MAX_ATTEMPTS", 20)?,
            bind_backoff: Duration::from_millis(env_parse("WORKER_BIND_BACKOFF_MS", 1000)?),
        };

        if config.heartbeat_interval.is_zero() {
            anyhow::bail!("WORKER_HEARTBEAT_INTERVAL_SECS must be greater than zero");
        }
        if config.bind_max_attempts == 0 {
            anyhow::bail!("WORKER_BIND_MAX_ATTEMPTS must be greater than zero");
        }
        Ok(config)
    }
}

/// Unset and blank both count as absent.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 12] = [
        "WORKER_ID",
        "WORKER_HOST",
        "WORKER_PORT",
        "WORKER_ADVERTISE_HOST",
        "WORKER_MASTER_URL",
        "WORKER_TOOLS_CONFIG",
        "WORKER_HEARTBEAT_INTERVAL_SECS",
        "WORKER_REGISTER_DELAY_MS",
        "WORKER_REGISTER_BACKOFF_MS",
        "WORKER_REGISTER_MAX_ATTEMPTS",
        "WORKER_BIND_MAX_ATTEMPTS",
        "WORKER_BIND_BACKOFF_MS",
    ];

    fn set_env(vars: &[(&str, &str)]) -> Vec<(&'static str, Option<String>)> {
        let saved = KEYS
            .iter()
            .map(|key| {
                let previous = std::env::var(key).ok();
                std::env::remove_var(key);
                (*key, previous)
            })
            .collect();
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        saved
    }

    fn restore_env(saved: Vec<(&'static str, Option<String>)>) {
        for (key, value) in saved {
            match value {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_MUTEX.lock().expect("env mutex poisoned");
        let saved = set_env(&[]);

        let config = WorkerConfig::from_env().unwrap();
        assert!(config.worker_id.starts_with("worker-"));
        assert_eq!(config.worker_id.len(), "worker-".len() + 8);
        assert_eq!(config.port, 8001);
        assert!(config.master_url.is_none());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.register_delay, Duration::from_millis(2000));
        assert_eq!(config.register_max_attempts, 0);
        assert_eq!(config.bind_max_attempts, 20);

        restore_env(saved);
    }

    #[test]
    fn test_overrides() {
        let _lock = ENV_MUTEX.lock().expect("env mutex poisoned");
        let saved = set_env(&[
            ("WORKER_ID", "w-7"),
            ("WORKER_PORT", "0"),
            ("WORKER_MASTER_URL", "http://master:8000/"),
            ("WORKER_ADVERTISE_HOST", "10.0.0.7"),
            ("WORKER_REGISTER_MAX_ATTEMPTS", "1"),
            ("WORKER_TOOLS_CONFIG", "/etc/tools.toml"),
        ]);

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.worker_id, "w-7");
        assert_eq!(config.port, 0);
        assert_eq!(config.master_url.as_deref(), Some("http://master:8000"));
        assert_eq!(config.advertise_host.as_deref(), Some("10.0.0.7"));
        assert_eq!(config.register_max_attempts, 1);
        assert_eq!(config.tools_config, Some(PathBuf::from("/etc/tools.toml")));

        restore_env(saved);
    }

    #[test]
    fn test_invalid_values() {
        let _lock = ENV_MUTEX.lock().expect("env mutex poisoned");
        let saved = set_env(&[("WORKER_PORT", "70000")]);
        let err = WorkerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("WORKER_PORT"));
        restore_env(saved);

        let saved = set_env(&[("WORKER_BIND_MAX_ATTEMPTS", "0")]);
        assert!(WorkerConfig::from_env().is_err());
        restore_env(saved);
    }
}
