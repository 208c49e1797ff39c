use crate::session::SessionConfig;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Arguments of the backend `forward` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequest {
    pub local_ip: String,
    pub local_port: u16,
    pub remote_ip: String,
    pub remote_port: u16,
    pub user: String,
    pub password: String,
}

impl From<&SessionConfig> for ForwardRequest {
    fn from(config: &SessionConfig) -> Self {
        ForwardRequest {
            local_ip: config.local_address.clone(),
            local_port: config.local_port,
            remote_ip: config.remote_address.clone(),
            remote_port: config.remote_port,
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend refused the command; the text is shown to the operator as is.
    #[error("{0}")]
    Rejected(String),
    #[error("backend connection closed")]
    Disconnected,
    #[error("backend I/O error: {0}")]
    Io(String),
    #[error("invalid backend message: {0}")]
    Protocol(String),
}

/// Backend side of the command surface.
pub trait ForwardBackend: Send + Sync + 'static {
    fn forward(
        &self,
        request: ForwardRequest,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn stop(&self) -> impl Future<Output = Result<(), BackendError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    Rejected(String),
}

/// Issues the two console commands. No retries.
pub struct CommandGateway<B> {
    backend: Arc<B>,
}

impl<B> Clone for CommandGateway<B> {
    fn clone(&self) -> Self {
        CommandGateway {
            backend: self.backend.clone(),
        }
    }
}

impl<B: ForwardBackend> CommandGateway<B> {
    pub fn new(backend: Arc<B>) -> Self {
        CommandGateway { backend }
    }

    pub async fn start_forward(&self, config: &SessionConfig) -> StartOutcome {
        info!("Start forward {}", config.describe());
        match self.backend.forward(ForwardRequest::from(config)).await {
            Ok(()) => {
                info!("Forward started");
                StartOutcome::Started
            }
            Err(err) => {
                warn!("Forward rejected: {}", err);
                StartOutcome::Rejected(err.to_string())
            }
        }
    }

    /// Stop is idempotent from the console's point of view: a backend error
    /// is logged and otherwise ignored.
    pub async fn stop_forward(&self) {
        info!("Stop forward");
        if let Err(err) = self.backend.stop().await {
            warn!("Stop reported an error, ignoring: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        requests: Mutex<Vec<ForwardRequest>>,
        reject_with: Option<String>,
        stop_fails: bool,
    }

    impl ForwardBackend for RecordingBackend {
        async fn forward(&self, request: ForwardRequest) -> Result<(), BackendError> {
            self.requests.lock().unwrap().push(request);
            match &self.reject_with {
                Some(reason) => Err(BackendError::Rejected(reason.clone())),
                None => Ok(()),
            }
        }

        async fn stop(&self) -> Result<(), BackendError> {
            if self.stop_fails {
                Err(BackendError::Rejected("nothing to stop".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            local_address: "127.0.0.1".to_string(),
            local_port: 5678,
            remote_address: "10.0.0.5".to_string(),
            remote_port: 22,
            user: "root".to_string(),
            password: "x".to_string(),
        }
    }

    #[test]
    fn request_serializes_with_camel_case_args() {
        let value = serde_json::to_value(ForwardRequest::from(&config())).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "localIp": "127.0.0.1",
                "localPort": 5678,
                "remoteIp": "10.0.0.5",
                "remotePort": 22,
                "user": "root",
                "password": "x",
            })
        );
    }

    #[tokio::test]
    async fn start_forward_passes_snapshot_to_backend() {
        let backend = Arc::new(RecordingBackend::default());
        let gateway = CommandGateway::new(backend.clone());
        assert_eq!(gateway.start_forward(&config()).await, StartOutcome::Started);
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].remote_ip, "10.0.0.5");
    }

    #[tokio::test]
    async fn rejection_reason_is_verbatim() {
        let backend = Arc::new(RecordingBackend {
            reject_with: Some("Connect Error timed out".to_string()),
            ..Default::default()
        });
        let gateway = CommandGateway::new(backend);
        assert_eq!(
            gateway.start_forward(&config()).await,
            StartOutcome::Rejected("Connect Error timed out".to_string())
        );
    }

    #[tokio::test]
    async fn stop_swallows_backend_errors() {
        let backend = Arc::new(RecordingBackend {
            stop_fails: true,
            ..Default::default()
        });
        CommandGateway::new(backend).stop_forward().await;
    }
}
