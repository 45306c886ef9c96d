//! Locating the transfer executables.

use std::path::{Path, PathBuf};

use crate::config::InstallationConfig;
use crate::error::{Result, TransferError};
use crate::spec::{CompileOptions, Variant};

/// Paths the direct agent needs from a local installation.
#[derive(Debug, Clone, Default)]
pub struct Installation {
    ascp: Option<PathBuf>,
    ascp4: Option<PathBuf>,
    bypass_keys: Vec<PathBuf>,
    file_list_dir: Option<PathBuf>,
}

impl Installation {
    pub fn from_config(config: &InstallationConfig) -> Self {
        Self {
            ascp: config.ascp_path.clone(),
            ascp4: config.ascp4_path.clone(),
            bypass_keys: config.bypass_keys.clone(),
            file_list_dir: config.file_list_dir.clone(),
        }
    }

    pub fn with_executable(mut self, variant: Variant, path: impl Into<PathBuf>) -> Self {
        match variant {
            Variant::Ascp => self.ascp = Some(path.into()),
            Variant::Ascp4 => self.ascp4 = Some(path.into()),
        }
        self
    }

    pub fn with_bypass_keys(mut self, keys: Vec<PathBuf>) -> Self {
        self.bypass_keys = keys;
        self
    }

    pub fn with_file_list_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.file_list_dir = Some(dir.into());
        self
    }

    /// Configured path for `variant`, else the first match on `PATH`.
    pub fn executable(&self, variant: Variant) -> Result<PathBuf> {
        let configured = match variant {
            Variant::Ascp => self.ascp.as_ref(),
            Variant::Ascp4 => self.ascp4.as_ref(),
        };
        if let Some(path) = configured {
            return Ok(path.clone());
        }
        let name = variant.executable_name();
        search_path(name).ok_or_else(|| {
            TransferError::Config(format!(
                "{name} not found: set installation.{name}_path or add it to PATH"
            ))
        })
    }

    pub fn bypass_keys(&self) -> &[PathBuf] {
        &self.bypass_keys
    }

    pub fn file_list_dir(&self) -> Option<&Path> {
        self.file_list_dir.as_deref()
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            file_list_dir: self.file_list_dir.clone(),
            bypass_keys: self.bypass_keys.clone(),
        }
    }
}

fn search_path(name: &str) -> Option<PathBuf> {
    let file_name = if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    };
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}
