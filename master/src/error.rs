use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared_types::ApiReply;

/// Everything a master route can answer with besides success.
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    #[error("{0}")]
    BadRequest(String),

    /// The worker failed its reachability probe during registration.
    #[error("{0}")]
    Registration(String),

    #[error("Worker {0} not registered")]
    UnknownWorker(String),

    #[error("No worker found for instance_id: {0}")]
    UnknownInstance(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unknown tool operation: {0}")]
    UnknownOperation(String),

    #[error("instance_id {instance_id} is already bound to worker {worker_id}")]
    InstanceAlreadyBound {
        instance_id: String,
        worker_id: String,
    },

    #[error("No healthy workers available for tool {0}")]
    NoHealthyWorker(String),

    #[error("Worker {0} is not healthy")]
    WorkerUnavailable(String),

    /// Network failure or timeout talking to a worker.
    #[error("Request failed: {0}")]
    Forwarding(String),

    /// The worker answered with a non-success status.
    #[error("Worker returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MasterError {
    pub fn status(&self) -> StatusCode {
        match self {
            MasterError::BadRequest(_) => StatusCode::BAD_REQUEST,
            MasterError::UnknownWorker(_)
            | MasterError::UnknownInstance(_)
            | MasterError::UnknownTool(_)
            | MasterError::UnknownOperation(_) => StatusCode::NOT_FOUND,
            MasterError::InstanceAlreadyBound { .. } => StatusCode::CONFLICT,
            MasterError::Registration(_) | MasterError::Forwarding(_) => StatusCode::BAD_GATEWAY,
            MasterError::NoHealthyWorker(_) | MasterError::WorkerUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            MasterError::Upstream { status, .. } => *status,
            MasterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MasterError {
    fn into_response(self) -> Response {
        (self.status(), Json(ApiReply::failure(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            MasterError::UnknownInstance("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            MasterError::NoHealthyWorker("Foo".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            MasterError::Upstream {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "boom".into()
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_messages_name_the_subject() {
        assert_eq!(
            MasterError::NoHealthyWorker("Foo".into()).to_string(),
            "No healthy workers available for tool Foo"
        );
        assert_eq!(
            MasterError::UnknownWorker("w1".into()).to_string(),
            "Worker w1 not registered"
        );
    }
}
