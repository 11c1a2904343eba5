use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use shared_types::{ApiReply, Heartbeat, Unregistration, WorkerRegistration};
use thiserror::Error;

/// The master probes us before answering a registration, so that call gets
/// more room than the heartbeat.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum MasterClientError {
    #[error("master unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("master rejected request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("unexpected master response ({status}): {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
}

impl MasterClientError {
    /// The master no longer knows this worker and it must register again:
    /// a 404, or a 2xx that still says `success: false`.
    pub fn is_not_registered(&self) -> bool {
        matches!(
            self,
            Self::Rejected { status, .. }
                if *status == StatusCode::NOT_FOUND || status.is_success()
        )
    }
}

/// Control-plane calls from a worker to its master.
#[derive(Clone)]
pub struct MasterClient {
    http: reqwest::Client,
    base_url: String,
}

impl MasterClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, MasterClientError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn register(&self, registration: &WorkerRegistration) -> Result<ApiReply, MasterClientError> {
        self.post("register_worker", registration, REGISTER_TIMEOUT).await
    }

    pub async fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<ApiReply, MasterClientError> {
        self.post("worker_heartbeat", heartbeat, HEARTBEAT_TIMEOUT).await
    }

    pub async fn unregister(&self, worker_id: &str) -> Result<ApiReply, MasterClientError> {
        let body = Unregistration {
            worker_id: worker_id.to_string(),
        };
        self.post("unregister_worker", &body, HEARTBEAT_TIMEOUT).await
    }

    /// A call succeeds only on 2xx with `success: true`. Platform errors
    /// carry `{success: false, error}` and become `Rejected`.
    async fn post<T: Serialize>(
        &self,
        endpoint: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<ApiReply, MasterClientError> {
        let response = self
            .http
            .post(format!("{}/{endpoint}", self.base_url))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        match serde_json::from_str::<ApiReply>(&text) {
            Ok(reply) if status.is_success() && reply.success => Ok(reply),
            Ok(reply) => Err(MasterClientError::Rejected {
                status,
                message: reply
                    .error
                    .or(reply.message)
                    .unwrap_or_else(|| "no reason given".to_string()),
            }),
            Err(_) => Err(MasterClientError::UnexpectedStatus { status, body: text }),
        }
    }
}
