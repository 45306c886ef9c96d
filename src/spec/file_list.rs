// File list scratch files
//
// Large path lists go to a newline-delimited file passed with --file-list
// (sources only) or --file-pair-list (alternating source and destination
// lines). The directory belongs to the caller, who also removes the files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Result, TransferError};
use crate::spec::TransferPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Sources,
    Pairs,
}

impl ListKind {
    /// Pairs as soon as one entry names a destination.
    pub fn for_paths(paths: &[TransferPath]) -> Self {
        if paths.iter().any(|p| p.destination.is_some()) {
            Self::Pairs
        } else {
            Self::Sources
        }
    }

    pub fn option(self) -> &'static str {
        match self {
            Self::Sources => "--file-list",
            Self::Pairs => "--file-pair-list",
        }
    }

    /// `--file-list=<path>` style argument.
    pub fn argument(self, path: &Path) -> String {
        format!("{}={}", self.option(), path.display())
    }
}

/// Lines written for `paths`; a pair without destination repeats its source.
pub fn list_lines(paths: &[TransferPath], kind: ListKind) -> Vec<&str> {
    match kind {
        ListKind::Sources => paths.iter().map(|p| p.source.as_str()).collect(),
        ListKind::Pairs => paths
            .iter()
            .flat_map(|p| [p.source.as_str(), p.destination.as_deref().unwrap_or(&p.source)])
            .collect(),
    }
}

/// Write the list into `dir` and return its path (atomic write).
///
/// Entries containing a line break are rejected before anything is written.
pub fn write_list(dir: &Path, paths: &[TransferPath], kind: ListKind) -> Result<PathBuf> {
    let lines = list_lines(paths, kind);
    if let Some(bad) = lines.iter().find(|l| l.contains(['\n', '\r'])) {
        return Err(TransferError::InvalidSpec(format!(
            "path contains a line break: {bad:?}"
        )));
    }

    fs::create_dir_all(dir)?;
    let name = format!("filelist-{}.txt", Uuid::new_v4());
    let list_file = dir.join(&name);
    let temp_file = dir.join(format!(".{name}.tmp"));

    {
        let mut file = fs::File::create(&temp_file)?;
        for line in lines {
            writeln!(file, "{}", line)?;
        }
        file.sync_all()?;
    }

    fs::rename(&temp_file, &list_file)?;
    tracing::debug!(path = %list_file.display(), entries = paths.len(), "wrote file list");
    Ok(list_file)
}
