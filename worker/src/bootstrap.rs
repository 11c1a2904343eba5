//! Listener binding and address discovery at worker start-up.

use std::{
    net::{IpAddr, Ipv4Addr, UdpSocket},
    time::Duration,
};

use rand::Rng;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::backoff::backoff_delay;

const DERIVED_PORT_SPAN: u64 = 1000;
const INITIAL_WINDOW: u32 = 100;
const MAX_WINDOW: u32 = 10_000;
const MAX_BIND_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("no free port after {attempts} attempts (last tried {host}:{last_port}): {source}")]
    PortsExhausted {
        attempts: u32,
        host: String,
        last_port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read bound address: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Addressable
// ============================================================================

/// Something that knows the host other machines should use to reach us.
pub trait Addressable: Send + Sync {
    fn advertised_host(&self) -> String;

    fn worker_url(&self, port: u16) -> String {
        format!("http://{}:{port}", self.advertised_host())
    }

    /// Diagnostics sent along with the registration.
    fn host_info(&self, port: u16) -> Value {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        json!({
            "hostname": hostname,
            "ip": self.advertised_host(),
            "port": port,
        })
    }
}

/// Operator-supplied host (`WORKER_ADVERTISE_HOST`).
#[derive(Debug, Clone)]
pub struct FixedAddress(pub String);

impl Addressable for FixedAddress {
    fn advertised_host(&self) -> String {
        self.0.clone()
    }
}

/// IP of the interface carrying the default route, detected once.
#[derive(Debug, Clone)]
pub struct DetectedAddress {
    ip: IpAddr,
}

impl DetectedAddress {
    pub fn detect() -> Self {
        let ip = outbound_ip().unwrap_or_else(|e| {
            warn!(error = %e, "Could not detect outbound address; advertising loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });
        Self { ip }
    }
}

impl Addressable for DetectedAddress {
    fn advertised_host(&self) -> String {
        self.ip.to_string()
    }
}

/// Connecting a UDP socket selects a route without sending anything.
fn outbound_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    let ip = socket.local_addr()?.ip();
    if ip.is_unspecified() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "no outbound interface",
        ));
    }
    Ok(ip)
}

pub fn address_from(advertise_host: Option<&str>) -> Box<dyn Addressable> {
    match advertise_host {
        Some(host) => Box::new(FixedAddress(host.to_string())),
        None => Box::new(DetectedAddress::detect()),
    }
}

// ============================================================================
// Port binding
// ============================================================================

#[derive(Debug, Clone)]
pub struct BindPolicy {
    pub host: String,
    pub preferred_port: u16,
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// Stable per-worker fallback port: `preferred + sha256(worker_id) % 1000`.
pub fn derived_port(worker_id: &str, preferred: u16) -> u16 {
    let digest = Sha256::digest(worker_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let offset = u64::from_be_bytes(head) % DERIVED_PORT_SPAN;
    u16::try_from(u64::from(preferred) + offset).unwrap_or(u16::MAX)
}

/// Port to try on the given (zero-based) attempt.
pub fn candidate_port<R: Rng + ?Sized>(
    policy: &BindPolicy,
    worker_id: &str,
    attempt: u32,
    rng: &mut R,
) -> u16 {
    if policy.preferred_port == 0 {
        return 0;
    }
    let derived = derived_port(worker_id, policy.preferred_port);
    match attempt {
        0 => policy.preferred_port,
        1 => derived,
        n => {
            let window = INITIAL_WINDOW
                .saturating_mul(2u32.saturating_pow(n - 2))
                .min(MAX_WINDOW);
            let offset = rng.random_range(1..=window);
            u16::try_from(u32::from(derived) + offset).unwrap_or_else(|_| {
                // Past the top of the range: wrap back above the preferred port.
                let span = u32::from(u16::MAX - policy.preferred_port).max(1);
                policy.preferred_port.saturating_add((offset % span) as u16)
            })
        }
    }
}

/// Bind the worker listener, walking preferred, derived, then random ports
/// with backoff in between.
pub async fn bind_listener(policy: &BindPolicy, worker_id: &str) -> Result<TcpListener, BootstrapError> {
    let mut last_error = None;
    let mut last_port = policy.preferred_port;

    for attempt in 0..policy.max_attempts {
        let port = candidate_port(policy, worker_id, attempt, &mut rand::rng());
        last_port = port;
        match TcpListener::bind((policy.host.as_str(), port)).await {
            Ok(listener) => {
                let bound = listener.local_addr()?;
                if attempt > 0 {
                    info!(attempt, port = bound.port(), "bound fallback port");
                }
                return Ok(listener);
            }
            Err(e) => {
                warn!(attempt, port, error = %e, "port unavailable");
                last_error = Some(e);
            }
        }

        if attempt + 1 < policy.max_attempts {
            let delay = backoff_delay(policy.backoff, attempt, MAX_BIND_DELAY, &mut rand::rng());
            tokio::time::sleep(delay).await;
        }
    }

    Err(BootstrapError::PortsExhausted {
        attempts: policy.max_attempts,
        host: policy.host.clone(),
        last_port,
        source: last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "no attempts made")
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn policy(preferred_port: u16) -> BindPolicy {
        BindPolicy {
            host: "127.0.0.1".to_string(),
            preferred_port,
            max_attempts: 5,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_derived_port_is_stable() {
        let a = derived_port("worker-a", 8001);
        assert_eq!(a, derived_port("worker-a", 8001));
        assert!((8001..9001).contains(&a));
        assert_eq!(derived_port("worker-a", u16::MAX), u16::MAX);
    }

    #[test]
    fn test_candidate_sequence() {
        let mut rng = StdRng::seed_from_u64(3);
        let p = policy(8001);
        let derived = derived_port("w", 8001);

        assert_eq!(candidate_port(&p, "w", 0, &mut rng), 8001);
        assert_eq!(candidate_port(&p, "w", 1, &mut rng), derived);
        for attempt in 2..8 {
            let port = candidate_port(&p, "w", attempt, &mut rng);
            assert!(port > derived, "attempt {attempt} gave {port}");
        }
        assert_eq!(candidate_port(&policy(0), "w", 4, &mut rng), 0);
    }

    #[tokio::test]
    async fn test_falls_back_when_preferred_is_taken() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = occupied.local_addr().unwrap().port();

        let listener = bind_listener(&policy(taken), "fallback-worker").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert_ne!(port, taken);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = occupied.local_addr().unwrap().port();
        let mut p = policy(taken);
        p.max_attempts = 1;

        let err = bind_listener(&p, "w").await.unwrap_err();
        assert!(matches!(err, BootstrapError::PortsExhausted { attempts: 1, .. }));
    }

    #[test]
    fn test_fixed_address_url() {
        let address = FixedAddress("10.1.2.3".to_string());
        assert_eq!(address.worker_url(8001), "http://10.1.2.3:8001");
        let info = address.host_info(8001);
        assert_eq!(info["ip"], "10.1.2.3");
        assert_eq!(info["port"], 8001);
        assert!(info["hostname"].is_string());
    }
}
