//! Transfer execution: executable lookup, process supervision, retry and
//! per-job session bookkeeping.

pub mod codes;
pub mod installation;
pub mod registry;
pub mod resume;
pub mod session;
pub mod supervisor;

pub use installation::Installation;
pub use registry::{fan_out, CommandWriter, FinishGuard, JobRegistry, SessionHandle};
pub use resume::{ResumePolicy, ResumeState};
pub use session::{first_failure, JobId, SessionId, SessionOutcome, SessionState};
pub use supervisor::{Supervisor, TokenRegenerator};
