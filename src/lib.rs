//! Transfer-execution core for `ascp`-style high-speed file transfers.
//!
//! - [`spec`]: compile a JSON transfer spec into executable arguments and
//!   environment
//! - [`protocol`]: the executable's line-based management channel
//! - [`transfer`]: process supervision, resume policy and the job registry
//! - [`agent`]: the start/wait contract and its direct and node backends
//!
//! ```no_run
//! use fasprun::{create_agent, AgentConfig, AgentDeps, StartOptions, TransferSpec};
//!
//! # async fn demo() -> fasprun::Result<()> {
//! let agent = create_agent(&AgentConfig::load(None)?, AgentDeps::default())?;
//! let spec = TransferSpec::from_json_str(
//!     r#"{"direction":"send","remote_host":"h","remote_user":"u","paths":[{"source":"f"}]}"#,
//! )?;
//! agent.start_transfer(&spec, StartOptions::default()).await?;
//! for outcome in agent.wait_for_completion().await {
//!     println!("{} #{}: {:?}", outcome.job_id, outcome.session_index, outcome.result);
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod progress;
pub mod protocol;
pub mod spec;
pub mod transfer;

pub use agent::{create_agent, AgentDeps, AgentKind, StartOptions, TransferAgent};
pub use config::AgentConfig;
pub use error::{FaspError, Result, TransferError};
pub use spec::{compile, CompileOptions, Invocation, TransferSpec};
