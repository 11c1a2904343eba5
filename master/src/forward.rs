use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::MasterError;

/// HTTP client the master uses to talk to workers.
#[derive(Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    probe_timeout: Duration,
    /// `None` leaves tool calls unbounded; tools may legitimately run long.
    forward_timeout: Option<Duration>,
}

impl WorkerClient {
    pub fn new(probe_timeout: Duration, forward_timeout: Option<Duration>) -> reqwest::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            probe_timeout,
            forward_timeout,
        })
    }

    /// `GET {worker_url}/health`, bounded by the probe timeout.
    pub async fn probe(&self, worker_url: &str) -> Result<(), MasterError> {
        let url = join(worker_url, "/health");
        match self.http.get(&url).timeout(self.probe_timeout).send().await {
            Ok(res) if res.status().is_success() => Ok(()),
            Ok(res) => Err(MasterError::Registration(format!(
                "Worker health check failed: {}",
                res.status()
            ))),
            Err(e) => Err(MasterError::Registration(format!("Cannot reach worker: {e}"))),
        }
    }

    /// POST `body` verbatim to `{worker_url}{path}` and return the JSON the
    /// worker answered with.
    pub async fn forward(
        &self,
        worker_url: &str,
        path: &str,
        body: &Value,
    ) -> Result<Value, MasterError> {
        let url = join(worker_url, path);
        debug!(%url, "forwarding to worker");

        let mut request = self.http.post(&url).json(body);
        if let Some(timeout) = self.forward_timeout {
            request = request.timeout(timeout);
        }

        let res = request.send().await.map_err(|e| {
            warn!(%url, error = %e, "worker request failed");
            MasterError::Forwarding(e.to_string())
        })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%url, %status, "worker answered with an error status");
            return Err(MasterError::Upstream { status, body });
        }

        res.json::<Value>()
            .await
            .map_err(|e| MasterError::Forwarding(format!("invalid worker response: {e}")))
    }
}

fn join(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::join;

    #[test]
    fn test_join_tolerates_trailing_slash() {
        assert_eq!(join("http://w:1/", "/Foo/create"), "http://w:1/Foo/create");
        assert_eq!(join("http://w:1", "/health"), "http://w:1/health");
    }
}
