//! Node agent: hands the spec to a server-side transfer service and polls it.
//!
//! The HTTP client lives outside this crate; it is injected as a [`NodeApi`].
//! A node job always has exactly one session, whatever `multi_session` says:
//! the service does its own fan-out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::agent::listener::{ListenerSet, ProgressEvent};
use crate::agent::{AgentKind, StartOptions, TransferAgent};
use crate::error::{FaspError, Result, SYNTHETIC_CODE};
use crate::spec::TransferSpec;
use crate::transfer::{JobId, JobRegistry, SessionHandle, SessionOutcome};

#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Submit a transfer, returning the service's transfer id.
    async fn create_transfer(&self, spec: &TransferSpec) -> Result<String>;

    async fn transfer_status(&self, transfer_id: &str) -> Result<NodeTransferStatus>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTransferStatus {
    pub status: NodeStatus,
    #[serde(default)]
    pub bytes_expected: Option<u64>,
    #[serde(default)]
    pub bytes_written: u64,
    #[serde(default)]
    pub error_code: Option<u32>,
    #[serde(default)]
    pub error_desc: Option<String>,
}

impl NodeTransferStatus {
    fn failure(&self) -> FaspError {
        let message = self.error_desc.clone().unwrap_or_else(|| match self.status {
            NodeStatus::Cancelled => "transfer cancelled".to_string(),
            _ => "transfer failed".to_string(),
        });
        FaspError::new(self.error_code.unwrap_or(SYNTHETIC_CODE), message)
    }
}

pub struct NodeAgent {
    api: Arc<dyn NodeApi>,
    registry: Arc<JobRegistry>,
    poll_interval: Duration,
    listeners: ListenerSet,
}

impl NodeAgent {
    pub fn new(api: Arc<dyn NodeApi>, poll_interval: Duration, listeners: ListenerSet) -> Self {
        Self {
            api,
            registry: JobRegistry::new(),
            poll_interval,
            listeners,
        }
    }
}

#[async_trait]
impl TransferAgent for NodeAgent {
    async fn start_transfer(&self, spec: &TransferSpec, options: StartOptions) -> Result<JobId> {
        let job_id = options.job_id.unwrap_or_else(JobId::generate);
        let mut handles = self.registry.register_job(&job_id, 1)?;
        let handle = handles.remove(0);
        self.listeners.progress(handle.id(), ProgressEvent::PreStart);

        let poller = Poller {
            api: Arc::clone(&self.api),
            listeners: self.listeners.clone(),
            poll_interval: self.poll_interval,
            handle,
        };
        tokio::spawn(poller.run(spec.clone()));
        Ok(job_id)
    }

    async fn wait_for_completion(&self) -> Vec<SessionOutcome> {
        self.registry.wait_for_completion().await
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Node
    }
}

struct Poller {
    api: Arc<dyn NodeApi>,
    listeners: ListenerSet,
    poll_interval: Duration,
    handle: SessionHandle,
}

impl Poller {
    async fn run(self, spec: TransferSpec) {
        let _guard = self.handle.finish_guard();
        let id = self.handle.id().clone();
        let result = self.poll(&spec).await;
        match &result {
            Ok(()) => info!(session = %id, "node transfer succeeded"),
            Err(e) => error!(session = %id, "node transfer failed: {e}"),
        }
        self.listeners.progress(&id, ProgressEvent::End);
        self.handle.finish(result);
    }

    async fn poll(&self, spec: &TransferSpec) -> Result<()> {
        let id = self.handle.id();
        let transfer_id = self.api.create_transfer(spec).await?;
        info!(session = %id, transfer_id = %transfer_id, "node transfer created");
        self.handle.mark_started(Some(transfer_id.clone()));
        self.listeners.progress(id, ProgressEvent::SessionStart);

        let mut size_reported = false;
        let mut last_written = None;
        loop {
            let status = self.api.transfer_status(&transfer_id).await?;
            debug!(session = %id, status = ?status.status, written = status.bytes_written, "node transfer status");

            if let Some(expected) = status.bytes_expected.filter(|_| !size_reported) {
                self.listeners.progress(id, ProgressEvent::SessionSize(expected));
                size_reported = true;
            }
            if last_written != Some(status.bytes_written) {
                self.listeners
                    .progress(id, ProgressEvent::Transfer(status.bytes_written));
                last_written = Some(status.bytes_written);
            }

            match status.status {
                NodeStatus::Completed => return Ok(()),
                NodeStatus::Failed | NodeStatus::Cancelled => return Err(status.failure().into()),
                NodeStatus::Queued | NodeStatus::Running => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::TransferListener;
    use crate::error::TransferError;
    use crate::transfer::SessionId;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedApi {
        statuses: Mutex<VecDeque<NodeTransferStatus>>,
        submitted: Mutex<Vec<TransferSpec>>,
    }

    impl ScriptedApi {
        fn new(statuses: Vec<NodeTransferStatus>) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses.into()),
                submitted: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NodeApi for ScriptedApi {
        async fn create_transfer(&self, spec: &TransferSpec) -> Result<String> {
            self.submitted.lock().unwrap().push(spec.clone());
            Ok("xfer-1".to_string())
        }

        async fn transfer_status(&self, _transfer_id: &str) -> Result<NodeTransferStatus> {
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| TransferError::Agent("no more statuses".into()))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl TransferListener for Recorder {
        fn on_progress(&self, _session: &SessionId, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn status(status: NodeStatus, written: u64) -> NodeTransferStatus {
        NodeTransferStatus {
            status,
            bytes_expected: Some(300),
            bytes_written: written,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_completed() {
        let api = ScriptedApi::new(vec![
            status(NodeStatus::Queued, 0),
            status(NodeStatus::Running, 100),
            status(NodeStatus::Running, 100),
            status(NodeStatus::Completed, 300),
        ]);
        let recorder = Arc::new(Recorder::default());
        let mut listeners = ListenerSet::new();
        listeners.add(recorder.clone());
        let agent = NodeAgent::new(api.clone(), Duration::from_secs(1), listeners);

        let spec = TransferSpec::new().with("direction", "send");
        agent.start_transfer(&spec, StartOptions::default()).await.unwrap();
        let outcomes = agent.wait_for_completion().await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[0].remote_id.as_deref(), Some("xfer-1"));
        assert_eq!(api.submitted.lock().unwrap().len(), 1);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            [
                ProgressEvent::PreStart,
                ProgressEvent::SessionStart,
                ProgressEvent::SessionSize(300),
                ProgressEvent::Transfer(0),
                ProgressEvent::Transfer(100),
                ProgressEvent::Transfer(300),
                ProgressEvent::End,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_carries_code() {
        let api = ScriptedApi::new(vec![NodeTransferStatus {
            status: NodeStatus::Failed,
            error_code: Some(19),
            error_desc: Some("Authentication failure".into()),
            ..Default::default()
        }]);
        let agent = NodeAgent::new(api, Duration::from_secs(1), ListenerSet::new());
        agent
            .start_transfer(&TransferSpec::new(), StartOptions::default())
            .await
            .unwrap();

        let outcomes = agent.wait_for_completion().await;
        let err = outcomes[0].result.as_ref().unwrap_err();
        assert_eq!(err.fasp().unwrap().code, 19);
    }

    #[tokio::test]
    async fn test_send_command_unsupported() {
        let agent = NodeAgent::new(ScriptedApi::new(vec![]), Duration::from_secs(1), ListenerSet::new());
        let result = agent
            .send_command(&"j".into(), 0, &crate::protocol::Frame::with_type("STOP"))
            .await;
        assert!(matches!(result, Err(TransferError::Unsupported(_))));
    }
}
