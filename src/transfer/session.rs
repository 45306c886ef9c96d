//! Job and session identity, lifecycle and outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, TransferError};

/// Identifier shared by all sessions of one transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One session of a job, by 0-based index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub job: JobId,
    pub index: usize,
}

impl SessionId {
    pub fn new(job: JobId, index: usize) -> Self {
        Self { job, index }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.job, self.index)
    }
}

/// `Initial -> Started -> Success | Failed`, never backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Initial,
    Started,
    Success,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Initial => 0,
            Self::Started => 1,
            Self::Success | Self::Failed => 2,
        }
    }

    /// Move to `next` unless that would regress or leave a terminal state.
    pub fn advance(self, next: Self) -> Self {
        if self.is_terminal() || next.rank() < self.rank() {
            self
        } else {
            next
        }
    }
}

/// Final result of one session, returned by `wait_for_completion`.
#[derive(Debug)]
pub struct SessionOutcome {
    pub job_id: JobId,
    pub session_index: usize,
    /// Session id assigned by the remote end, when one was announced
    pub remote_id: Option<String>,
    pub result: Result<()>,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// First failed outcome, for callers that report a single status.
pub fn first_failure(outcomes: &[SessionOutcome]) -> Option<&TransferError> {
    outcomes.iter().find_map(|o| o.result.as_ref().err())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaspError;

    #[test]
    fn test_state_monotonic() {
        let state = SessionState::Initial.advance(SessionState::Started);
        assert_eq!(state, SessionState::Started);
        assert_eq!(state.advance(SessionState::Initial), SessionState::Started);

        let done = state.advance(SessionState::Success);
        assert_eq!(done.advance(SessionState::Failed), SessionState::Success);
        assert_eq!(done.advance(SessionState::Started), SessionState::Success);

        // failing before start is allowed
        assert_eq!(
            SessionState::Initial.advance(SessionState::Failed),
            SessionState::Failed
        );
    }

    #[test]
    fn test_first_failure() {
        let job = JobId::from("job-1");
        let outcomes = vec![
            SessionOutcome {
                job_id: job.clone(),
                session_index: 0,
                remote_id: None,
                result: Ok(()),
            },
            SessionOutcome {
                job_id: job.clone(),
                session_index: 1,
                remote_id: None,
                result: Err(FaspError::new(16, "Connection lost").into()),
            },
            SessionOutcome {
                job_id: job,
                session_index: 2,
                remote_id: None,
                result: Err(FaspError::new(19, "Authentication failure").into()),
            },
        ];
        let failure = first_failure(&outcomes).unwrap();
        assert_eq!(failure.fasp().unwrap().code, 16);
        assert!(first_failure(&outcomes[..1]).is_none());
    }

    #[test]
    fn test_job_id_display() {
        let id = JobId::generate();
        assert_eq!(id.as_str().len(), 36);
        assert_eq!(SessionId::new(JobId::from("j"), 2).to_string(), "j#2");
    }
}
