//! Agent configuration: TOML file with per-concern sections.
//!
//! ```toml
//! agent = "direct"
//!
//! [installation]
//! ascp_path = "/opt/aspera/bin/ascp"
//! bypass_keys = ["/opt/aspera/etc/aspera_bypass_rsa.pem"]
//! file_list_dir = "/tmp/fasprun"
//!
//! [resume]
//! iter_max = 7
//!
//! [direct]
//! spawn_delay_ms = 2000
//! ```
//!
//! Every field has a default, so a missing file or section is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::AgentKind;
use crate::error::{Result, TransferError};

const CONFIG_DIR: &str = "fasprun";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub agent: AgentKind,
    pub installation: InstallationConfig,
    pub resume: ResumeConfig,
    pub direct: DirectConfig,
    pub node: NodeConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallationConfig {
    /// Explicit `ascp` path; searched on `PATH` when unset
    pub ascp_path: Option<PathBuf>,
    pub ascp4_path: Option<PathBuf>,
    /// SSH keys used for token authentication
    pub bypass_keys: Vec<PathBuf>,
    /// Scratch directory for file lists; paths go inline when unset
    pub file_list_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResumeConfig {
    pub iter_max: u32,
    pub sleep_initial_secs: f64,
    pub sleep_factor: f64,
    pub sleep_max_secs: f64,
    /// Retry a non-retryable error once if it happens on the first attempt
    pub forgive_first_failure: bool,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            iter_max: 7,
            sleep_initial_secs: 2.0,
            sleep_factor: 2.0,
            sleep_max_secs: 60.0,
            forgive_first_failure: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectConfig {
    /// Delay between consecutive session launches of one job
    pub spawn_delay_ms: u64,
    /// Give each session of a job its own UDP port
    pub multi_incr_udp: bool,
    pub accept_timeout_secs: u64,
    /// Kill a session whose management channel stays silent this long
    pub idle_timeout_secs: Option<u64>,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            spawn_delay_ms: 2000,
            multi_incr_udp: true,
            accept_timeout_secs: 10,
            idle_timeout_secs: None,
        }
    }
}

impl DirectConfig {
    pub fn spawn_delay(&self) -> Duration {
        Duration::from_millis(self.spawn_delay_ms)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub poll_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

impl NodeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AgentConfig {
    /// `<config dir>/fasprun/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(TransferError::Config(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };

        let config = Self::from_toml(&text).map_err(|e| match e {
            TransferError::Config(msg) => {
                TransferError::Config(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| TransferError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let resume = &self.resume;
        if !(resume.sleep_initial_secs.is_finite() && resume.sleep_initial_secs >= 0.0) {
            return Err(TransferError::Config(
                "resume.sleep_initial_secs must be a non-negative number".to_string(),
            ));
        }
        if !(resume.sleep_factor.is_finite() && resume.sleep_factor >= 1.0) {
            return Err(TransferError::Config(
                "resume.sleep_factor must be at least 1".to_string(),
            ));
        }
        if !(resume.sleep_max_secs.is_finite() && resume.sleep_max_secs >= resume.sleep_initial_secs)
        {
            return Err(TransferError::Config(
                "resume.sleep_max_secs must not be below sleep_initial_secs".to_string(),
            ));
        }
        if self.direct.accept_timeout_secs == 0 {
            return Err(TransferError::Config(
                "direct.accept_timeout_secs must be positive".to_string(),
            ));
        }
        if self.direct.idle_timeout_secs == Some(0) {
            return Err(TransferError::Config(
                "direct.idle_timeout_secs must be positive when set".to_string(),
            ));
        }
        if self.node.poll_interval_ms == 0 {
            return Err(TransferError::Config(
                "node.poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.agent, AgentKind::Direct);
        assert_eq!(config.resume.iter_max, 7);
        assert!(!config.resume.forgive_first_failure);
        assert_eq!(config.direct.accept_timeout(), Duration::from_secs(10));
        assert_eq!(config.direct.idle_timeout(), None);
        assert!(config.direct.multi_incr_udp);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let config = AgentConfig::from_toml(
            r#"
            agent = "node"

            [installation]
            ascp_path = "/opt/aspera/bin/ascp"
            bypass_keys = ["/k/rsa", "/k/dsa"]

            [direct]
            spawn_delay_ms = 0
            idle_timeout_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.agent, AgentKind::Node);
        assert_eq!(
            config.installation.ascp_path.as_deref(),
            Some(Path::new("/opt/aspera/bin/ascp"))
        );
        assert_eq!(config.installation.bypass_keys.len(), 2);
        assert_eq!(config.direct.spawn_delay(), Duration::ZERO);
        assert_eq!(config.direct.idle_timeout(), Some(Duration::from_secs(30)));
        // untouched sections keep defaults
        assert_eq!(config.resume, ResumeConfig::default());
        assert_eq!(config.direct.accept_timeout_secs, 10);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = AgentConfig::from_toml("[resume]\niter_maxx = 3\n").unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
    }

    #[test]
    fn test_validation() {
        let mut config = AgentConfig::default();
        config.resume.sleep_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.resume.sleep_max_secs = 1.0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.direct.accept_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_missing_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(AgentConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[resume]\niter_max = 2\nforgive_first_failure = true\n").unwrap();
        let config = AgentConfig::load(Some(&path)).unwrap();
        assert_eq!(config.resume.iter_max, 2);
        assert!(config.resume.forgive_first_failure);
    }
}
