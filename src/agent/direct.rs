//! Direct agent: runs the transfer executable on this host.
//!
//! Each session gets its own tokio task. The task waits for its launch slot,
//! runs supervised attempts under the resume policy, then reports `End` and
//! records the outcome in the registry.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::agent::listener::{ListenerSet, ProgressEvent, TransferListener};
use crate::agent::{AgentKind, StartOptions, TransferAgent};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::protocol::{write_command, Frame};
use crate::spec::{compile, CompileOptions, Invocation, ParamSchema, TransferSpec};
use crate::transfer::{
    fan_out, Installation, JobId, JobRegistry, ResumePolicy, SessionHandle, SessionOutcome,
    Supervisor, TokenRegenerator,
};

pub struct DirectAgent {
    registry: Arc<JobRegistry>,
    supervisor: Supervisor,
    policy: Arc<ResumePolicy>,
    schema: Arc<ParamSchema>,
    compile_options: CompileOptions,
    listeners: ListenerSet,
    spawn_delay: Duration,
    multi_incr_udp: bool,
}

impl DirectAgent {
    pub fn builder() -> DirectAgentBuilder {
        DirectAgentBuilder::default()
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }
}

#[async_trait]
impl TransferAgent for DirectAgent {
    async fn start_transfer(&self, spec: &TransferSpec, options: StartOptions) -> Result<JobId> {
        let job_id = options.job_id.unwrap_or_else(JobId::generate);
        let compilation = compile(spec, &self.schema, &self.compile_options)?;
        let invocations = fan_out(
            &compilation.invocation,
            compilation.multi_session,
            self.multi_incr_udp,
        )?;
        let file_list = compilation.file_list.map(|path| Arc::new(FileListGuard(path)));

        let handles = self.registry.register_job(&job_id, invocations.len())?;
        info!(job = %job_id, sessions = handles.len(), "starting transfer");
        if let Some(first) = handles.first() {
            self.listeners.progress(first.id(), ProgressEvent::PreStart);
        }

        for (i, (handle, invocation)) in handles.into_iter().zip(invocations).enumerate() {
            let task = SessionTask {
                supervisor: self.supervisor.clone(),
                policy: Arc::clone(&self.policy),
                listeners: self.listeners.clone(),
                delay: self.spawn_delay.saturating_mul(i as u32),
                handle,
                invocation,
                _file_list: file_list.clone(),
            };
            tokio::spawn(task.run());
        }

        Ok(job_id)
    }

    async fn wait_for_completion(&self) -> Vec<SessionOutcome> {
        self.registry.wait_for_completion().await
    }

    async fn send_command(&self, job_id: &JobId, session_index: usize, frame: &Frame) -> Result<()> {
        let writer = self.registry.channel(job_id, session_index)?;
        debug!(job = %job_id, session_index, "sending management command");
        let mut writer = writer.lock().await;
        write_command(&mut **writer, frame).await
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Direct
    }
}

impl std::fmt::Debug for DirectAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectAgent")
            .field("supervisor", &self.supervisor)
            .field("policy", &self.policy)
            .field("spawn_delay", &self.spawn_delay)
            .field("multi_incr_udp", &self.multi_incr_udp)
            .finish()
    }
}

// =============================================================================
// Session task
// =============================================================================

/// Removes a job's file list once its last session is done with it.
struct FileListGuard(PathBuf);

impl Drop for FileListGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            debug!(path = %self.0.display(), "could not remove file list: {e}");
        }
    }
}

struct SessionTask {
    supervisor: Supervisor,
    policy: Arc<ResumePolicy>,
    listeners: ListenerSet,
    delay: Duration,
    handle: SessionHandle,
    invocation: Invocation,
    _file_list: Option<Arc<FileListGuard>>,
}

impl SessionTask {
    async fn run(self) {
        let _guard = self.handle.finish_guard();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let id = self.handle.id().clone();

        // Attempts share the invocation so a regenerated token carries over.
        let invocation = Arc::new(Mutex::new(self.invocation));
        let result = self
            .policy
            .execute_with_resume(|attempt| {
                let supervisor = self.supervisor.clone();
                let handle = self.handle.clone();
                let invocation = Arc::clone(&invocation);
                async move {
                    if attempt > 1 {
                        info!(session = %handle.id(), attempt, "resuming session");
                    }
                    let mut current = invocation
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    let result = supervisor.run(&mut current, &handle).await;
                    *invocation.lock().unwrap_or_else(PoisonError::into_inner) = current;
                    result
                }
            })
            .await;

        match &result {
            Ok(()) => info!(session = %id, "session succeeded"),
            Err(e) => error!(session = %id, "session failed: {e}"),
        }
        self.listeners.progress(&id, ProgressEvent::End);
        self.handle.finish(result);
    }
}

// =============================================================================
// Builder
// =============================================================================

#[derive(Default)]
pub struct DirectAgentBuilder {
    config: AgentConfig,
    installation: Option<Installation>,
    schema: Option<ParamSchema>,
    listeners: ListenerSet,
    regenerator: Option<Arc<dyn TokenRegenerator>>,
}

impl DirectAgentBuilder {
    /// Resume, direct and installation settings.
    pub fn config(mut self, config: &AgentConfig) -> Self {
        self.config = config.clone();
        self
    }

    pub fn installation(mut self, installation: Installation) -> Self {
        self.installation = Some(installation);
        self
    }

    pub fn schema(mut self, schema: ParamSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn TransferListener>) -> Self {
        self.listeners.add(listener);
        self
    }

    pub fn listeners(mut self, listeners: ListenerSet) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn regenerator(mut self, regenerator: Arc<dyn TokenRegenerator>) -> Self {
        self.regenerator = Some(regenerator);
        self
    }

    pub fn build(self) -> DirectAgent {
        let installation = self
            .installation
            .unwrap_or_else(|| Installation::from_config(&self.config.installation));
        let compile_options = installation.compile_options();
        let direct = &self.config.direct;

        let supervisor = Supervisor::new(Arc::new(installation), self.listeners.clone())
            .with_regenerator(self.regenerator)
            .with_accept_timeout(direct.accept_timeout())
            .with_idle_timeout(direct.idle_timeout());

        DirectAgent {
            registry: JobRegistry::new(),
            supervisor,
            policy: Arc::new(ResumePolicy::from_config(&self.config.resume)),
            schema: Arc::new(
                self.schema
                    .unwrap_or_else(|| ParamSchema::builtin().clone()),
            ),
            compile_options,
            listeners: self.listeners,
            spawn_delay: direct.spawn_delay(),
            multi_incr_udp: direct.multi_incr_udp,
        }
    }
}
