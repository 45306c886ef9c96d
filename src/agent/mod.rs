//! Transfer agents: one start/wait contract over several backends.
//!
//! - [`direct::DirectAgent`]: runs the transfer executable locally
//! - [`node::NodeAgent`]: delegates to a transfer service through [`node::NodeApi`]
//!
//! [`create_agent`] picks the backend from [`AgentConfig::agent`].

pub mod direct;
pub mod listener;
pub mod node;

pub use direct::{DirectAgent, DirectAgentBuilder};
pub use listener::{ListenerSet, LogListener, ProgressEvent, TransferListener};
pub use node::{NodeAgent, NodeApi, NodeStatus, NodeTransferStatus};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::error::{Result, TransferError};
use crate::protocol::Frame;
use crate::spec::TransferSpec;
use crate::transfer::{Installation, JobId, SessionOutcome, TokenRegenerator};

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Job to start; a fresh UUID when unset
    pub job_id: Option<JobId>,
}

#[async_trait]
pub trait TransferAgent: Send + Sync {
    /// Start a transfer; returns once all of its sessions are registered.
    async fn start_transfer(&self, spec: &TransferSpec, options: StartOptions) -> Result<JobId>;

    /// Wait for every session started since the last call.
    async fn wait_for_completion(&self) -> Vec<SessionOutcome>;

    /// Send a command frame to a running session.
    async fn send_command(&self, _job_id: &JobId, _session_index: usize, _frame: &Frame) -> Result<()> {
        Err(TransferError::Unsupported("send_command"))
    }

    fn kind(&self) -> AgentKind;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    #[default]
    Direct,
    Node,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Node => "node",
        })
    }
}

/// Collaborators injected into agents.
#[derive(Clone, Default)]
pub struct AgentDeps {
    pub listeners: ListenerSet,
    /// Overrides the installation built from the config
    pub installation: Option<Installation>,
    pub regenerator: Option<Arc<dyn TokenRegenerator>>,
    pub node_api: Option<Arc<dyn NodeApi>>,
}

pub fn create_agent(config: &AgentConfig, deps: AgentDeps) -> Result<Box<dyn TransferAgent>> {
    config.validate()?;
    tracing::debug!(agent = %config.agent, "creating transfer agent");
    match config.agent {
        AgentKind::Direct => {
            let mut builder = DirectAgent::builder()
                .config(config)
                .listeners(deps.listeners);
            if let Some(installation) = deps.installation {
                builder = builder.installation(installation);
            }
            if let Some(regenerator) = deps.regenerator {
                builder = builder.regenerator(regenerator);
            }
            Ok(Box::new(builder.build()))
        }
        AgentKind::Node => {
            let api = deps.node_api.ok_or_else(|| {
                TransferError::Config("node agent requires a node API client".to_string())
            })?;
            Ok(Box::new(NodeAgent::new(api, config.node.poll_interval(), deps.listeners)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_backend() {
        let agent = create_agent(&AgentConfig::default(), AgentDeps::default()).unwrap();
        assert_eq!(agent.kind(), AgentKind::Direct);

        let config = AgentConfig {
            agent: AgentKind::Node,
            ..Default::default()
        };
        assert!(matches!(
            create_agent(&config, AgentDeps::default()),
            Err(TransferError::Config(_))
        ));
    }

    #[test]
    fn test_kind_serde() {
        assert_eq!(serde_json::to_string(&AgentKind::Node).unwrap(), "\"node\"");
        let kind: AgentKind = serde_json::from_str("\"direct\"").unwrap();
        assert_eq!(kind, AgentKind::Direct);
    }
}
