//! Job/session table shared by session tasks and agent callers.
//!
//! One `std::sync::Mutex` guards the table and is never held across an
//! await. Every session transition signals a `Notify`, which
//! `wait_for_completion` waits on instead of polling.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncWrite;
use tokio::sync::Notify;

use crate::error::{Result, TransferError};
use crate::protocol::Frame;
use crate::spec::{Invocation, MultiSession};
use crate::transfer::session::{JobId, SessionId, SessionOutcome, SessionState};

/// Write half of a session's management socket.
pub type CommandWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

// =============================================================================
// Table
// =============================================================================

struct SessionEntry {
    state: SessionState,
    remote_id: Option<String>,
    last_status: Option<Frame>,
    writer: Option<CommandWriter>,
    outcome: Option<SessionOutcome>,
}

struct Job {
    id: JobId,
    sessions: Vec<SessionEntry>,
}

impl Job {
    fn is_complete(&self) -> bool {
        self.sessions.iter().all(|s| s.outcome.is_some())
    }
}

/// Jobs in registration order.
#[derive(Default)]
struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    fn job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == *id)
    }

    fn session_mut(&mut self, id: &SessionId) -> Option<&mut SessionEntry> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == id.job)
            .and_then(|j| j.sessions.get_mut(id.index))
    }
}

#[derive(Default)]
pub struct JobRegistry {
    table: Mutex<JobTable>,
    changed: Notify,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `sessions` sessions under `job_id` and return their handles.
    pub fn register_job(self: &Arc<Self>, job_id: &JobId, sessions: usize) -> Result<Vec<SessionHandle>> {
        let mut table = self.lock();
        if table.job(job_id).is_some() {
            return Err(TransferError::Agent(format!("job {job_id} is already running")));
        }
        table.jobs.push(Job {
            id: job_id.clone(),
            sessions: (0..sessions)
                .map(|_| SessionEntry {
                    state: SessionState::Initial,
                    remote_id: None,
                    last_status: None,
                    writer: None,
                    outcome: None,
                })
                .collect(),
        });
        drop(table);

        tracing::debug!(job = %job_id, sessions, "registered job");
        Ok((0..sessions)
            .map(|index| SessionHandle {
                id: SessionId::new(job_id.clone(), index),
                registry: Arc::clone(self),
            })
            .collect())
    }

    fn update<R>(&self, id: &SessionId, f: impl FnOnce(&mut SessionEntry) -> R) -> Option<R> {
        let result = self.lock().session_mut(id).map(f);
        self.changed.notify_waiters();
        result
    }

    pub fn session_state(&self, id: &SessionId) -> Option<SessionState> {
        self.lock().session_mut(id).map(|s| s.state)
    }

    pub fn remote_id(&self, id: &SessionId) -> Option<String> {
        self.lock().session_mut(id).and_then(|s| s.remote_id.clone())
    }

    fn has_outcome(&self, id: &SessionId) -> bool {
        self.lock()
            .session_mut(id)
            .map_or(true, |s| s.outcome.is_some())
    }

    pub fn last_status(&self, id: &SessionId) -> Option<Frame> {
        self.lock().session_mut(id).and_then(|s| s.last_status.clone())
    }

    /// Management writer of an open channel.
    pub fn channel(&self, job_id: &JobId, index: usize) -> Result<CommandWriter> {
        let mut table = self.lock();
        if table.job(job_id).is_none() {
            return Err(TransferError::UnknownJob(job_id.to_string()));
        }
        let id = SessionId::new(job_id.clone(), index);
        let session = table.session_mut(&id).ok_or_else(|| TransferError::UnknownSession {
            job: job_id.to_string(),
            index,
        })?;
        session.writer.clone().ok_or_else(|| TransferError::ChannelClosed {
            job: job_id.to_string(),
            index,
        })
    }

    /// Number of sessions not yet terminal.
    pub fn pending(&self) -> usize {
        self.lock()
            .jobs
            .iter()
            .flat_map(|j| &j.sessions)
            .filter(|s| s.outcome.is_none())
            .count()
    }

    /// Wait until every registered session is terminal, then hand back all
    /// outcomes (jobs in registration order, sessions by index) and clear the
    /// table.
    pub async fn wait_for_completion(&self) -> Vec<SessionOutcome> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut table = self.lock();
                if table.jobs.iter().all(Job::is_complete) {
                    return std::mem::take(&mut table.jobs)
                        .into_iter()
                        .flat_map(|job| job.sessions)
                        .filter_map(|s| s.outcome)
                        .collect();
                }
            }

            notified.await;
        }
    }
}

// =============================================================================
// Session handle
// =============================================================================

/// A session task's view of its registry entry.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    registry: Arc<JobRegistry>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.registry
            .session_state(&self.id)
            .unwrap_or(SessionState::Failed)
    }

    pub fn mark_started(&self, remote_id: Option<String>) {
        self.registry.update(&self.id, |s| {
            s.state = s.state.advance(SessionState::Started);
            if remote_id.is_some() {
                s.remote_id = remote_id;
            }
        });
    }

    pub fn set_last_status(&self, frame: Frame) {
        self.registry.update(&self.id, |s| s.last_status = Some(frame));
    }

    pub fn attach_channel(&self, writer: CommandWriter) {
        self.registry.update(&self.id, |s| s.writer = Some(writer));
    }

    pub fn detach_channel(&self) {
        self.registry.update(&self.id, |s| s.writer = None);
    }

    /// Record the final result. Later calls are ignored.
    pub fn finish(&self, result: Result<()>) {
        let job_id = self.id.job.clone();
        let index = self.id.index;
        self.registry.update(&self.id, move |s| {
            if s.outcome.is_some() {
                return;
            }
            let next = if result.is_ok() {
                SessionState::Success
            } else {
                SessionState::Failed
            };
            s.state = s.state.advance(next);
            s.writer = None;
            s.outcome = Some(SessionOutcome {
                job_id,
                session_index: index,
                remote_id: s.remote_id.clone(),
                result,
            });
        });
    }
}

/// Records a failed outcome when dropped before the session finished, so a
/// panicking session task still ends its session.
#[must_use = "the guard fails the session when dropped"]
pub struct FinishGuard(SessionHandle);

impl SessionHandle {
    pub fn finish_guard(&self) -> FinishGuard {
        FinishGuard(self.clone())
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if self.0.registry.has_outcome(&self.0.id) {
            return;
        }
        tracing::error!(session = %self.0.id, "session task ended without an outcome");
        self.0
            .finish(Err(TransferError::Agent("session task aborted".to_string())));
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

// =============================================================================
// Multi-session fan-out
// =============================================================================

/// One invocation per session.
///
/// Session `i` (1-based) of `N` gets `-C i:N` and, with `incr_udp`, the UDP
/// port `udp_base + i - 1` in place of any compiled `-O`.
pub fn fan_out(
    invocation: &Invocation,
    plan: Option<MultiSession>,
    incr_udp: bool,
) -> Result<Vec<Invocation>> {
    let Some(plan) = plan else {
        return Ok(vec![invocation.clone()]);
    };

    (1..=plan.count)
        .map(|i| {
            let mut session = invocation.clone();
            if incr_udp {
                let port = u16::try_from(u32::from(plan.udp_base) + i - 1).map_err(|_| {
                    TransferError::InvalidSpec(format!(
                        "{} sessions from UDP port {} exceed the port range",
                        plan.count, plan.udp_base
                    ))
                })?;
                session.set_udp_port(port);
            }
            session.prepend(["-C".to_string(), format!("{i}:{}", plan.count)]);
            Ok(session)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(name: &str) -> JobId {
        JobId::from(name)
    }

    #[tokio::test]
    async fn test_wait_collects_all_sessions() {
        let registry = JobRegistry::new();
        let a = registry.register_job(&job("a"), 2).unwrap();
        let b = registry.register_job(&job("b"), 1).unwrap();

        let finisher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            b[0].finish(Ok(()));
            a[1].finish(Err(TransferError::Protocol("bad".into())));
            tokio::time::sleep(Duration::from_millis(20)).await;
            a[0].finish(Ok(()));
        });

        let outcomes = registry.wait_for_completion().await;
        finisher.await.unwrap();

        let keys: Vec<(String, usize, bool)> = outcomes
            .iter()
            .map(|o| (o.job_id.to_string(), o.session_index, o.is_success()))
            .collect();
        assert_eq!(
            keys,
            [
                ("a".to_string(), 0, true),
                ("a".to_string(), 1, false),
                ("b".to_string(), 0, true)
            ]
        );

        // table cleared
        assert!(registry.wait_for_completion().await.is_empty());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let registry = JobRegistry::new();
        let handles = registry.register_job(&job("j"), 1).unwrap();
        let session = &handles[0];

        assert_eq!(session.state(), SessionState::Initial);
        session.mark_started(Some("remote-1".into()));
        assert_eq!(session.state(), SessionState::Started);
        session.finish(Ok(()));
        session.finish(Err(TransferError::Protocol("late".into())));
        assert_eq!(session.state(), SessionState::Success);

        let outcomes = registry.wait_for_completion().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[0].remote_id.as_deref(), Some("remote-1"));
    }

    #[tokio::test]
    async fn test_finish_guard() {
        let registry = JobRegistry::new();
        let handles = registry.register_job(&job("j"), 2).unwrap();

        let finished = handles[0].finish_guard();
        handles[0].finish(Ok(()));
        drop(finished);

        let panicked = handles[1].clone();
        let task = tokio::spawn(async move {
            let _guard = panicked.finish_guard();
            panic!("session task failure");
        });
        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(handles[1].state(), SessionState::Failed);

        let outcomes = registry.wait_for_completion().await;
        assert!(outcomes[0].is_success());
        assert!(matches!(outcomes[1].result, Err(TransferError::Agent(_))));
    }

    #[test]
    fn test_duplicate_job_rejected() {
        let registry = JobRegistry::new();
        registry.register_job(&job("j"), 1).unwrap();
        assert!(matches!(
            registry.register_job(&job("j"), 1),
            Err(TransferError::Agent(_))
        ));
    }

    #[tokio::test]
    async fn test_channel_lookup_errors() {
        let registry = JobRegistry::new();
        let handles = registry.register_job(&job("j"), 1).unwrap();

        assert!(matches!(
            registry.channel(&job("nope"), 0),
            Err(TransferError::UnknownJob(_))
        ));
        assert!(matches!(
            registry.channel(&job("j"), 5),
            Err(TransferError::UnknownSession { index: 5, .. })
        ));
        assert!(matches!(
            registry.channel(&job("j"), 0),
            Err(TransferError::ChannelClosed { .. })
        ));

        let sink: Box<dyn AsyncWrite + Send + Unpin> = Box::new(tokio::io::sink());
        handles[0].attach_channel(Arc::new(tokio::sync::Mutex::new(sink)));
        assert!(registry.channel(&job("j"), 0).is_ok());
        handles[0].detach_channel();
        assert!(registry.channel(&job("j"), 0).is_err());
    }

    #[test]
    fn test_fan_out_ports_and_markers() {
        let invocation = Invocation {
            args: vec!["-O".into(), "33001".into(), "--mode".into(), "send".into()],
            ..Default::default()
        };
        let plan = MultiSession {
            count: 3,
            udp_base: 40000,
        };
        let sessions = fan_out(&invocation, Some(plan), true).unwrap();
        assert_eq!(sessions.len(), 3);
        for (i, session) in sessions.iter().enumerate() {
            assert_eq!(&session.args[..2], ["-C".to_string(), format!("{}:3", i + 1)]);
            assert_eq!(session.switch_value("-O"), Some((40000 + i).to_string().as_str()));
            assert_eq!(session.args.iter().filter(|a| *a == "-O").count(), 1);
        }

        let fixed = fan_out(&invocation, Some(plan), false).unwrap();
        assert!(fixed.iter().all(|s| s.switch_value("-O") == Some("33001")));

        let single = fan_out(&invocation, None, true).unwrap();
        assert_eq!(single, vec![invocation]);
    }

    #[test]
    fn test_fan_out_port_overflow() {
        let plan = MultiSession {
            count: 3,
            udp_base: u16::MAX,
        };
        assert!(fan_out(&Invocation::default(), Some(plan), true).is_err());
    }
}
