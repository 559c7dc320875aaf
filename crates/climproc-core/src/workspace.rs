//! Per-run workspaces.
//!
//! Layout under `<workspace_root>/workspace-<run id>/`:
//!
//! ```text
//! input-data/        links to the retrieved files
//! namelist.xml       rendered run configuration
//! log.txt            tool output
//! work/namelist.txt  references/acknowledgements written by the tool
//! plots/             diagnostic output
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use esgf_client::FileReference;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::WorkspaceError;

/// Unique identifier of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A staged workspace. Owned by exactly one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub const INPUT_DIR: &'static str = "input-data";
    pub const NAMELIST_FILE: &'static str = "namelist.xml";
    pub const LOG_FILE: &'static str = "log.txt";
    pub const PLOTS_DIR: &'static str = "plots";

    /// Wrap an existing directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join(Self::INPUT_DIR)
    }

    pub fn namelist_path(&self) -> PathBuf {
        self.root.join(Self::NAMELIST_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(Self::LOG_FILE)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work")
    }

    /// Not checked for existence; the tool may or may not write it.
    pub fn acknowledgements_path(&self) -> PathBuf {
        self.work_dir().join("namelist.txt")
    }

    pub fn plots_dir(&self) -> PathBuf {
        self.root.join(Self::PLOTS_DIR)
    }

    /// Basenames currently linked into `input-data`.
    pub fn staged_inputs(&self) -> Result<BTreeSet<String>, WorkspaceError> {
        let dir = self.input_dir();
        let entries = fs::read_dir(&dir).map_err(|e| WorkspaceError::io(&dir, e))?;
        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| WorkspaceError::io(&dir, e))?;
            names.insert(entry.file_name().to_string_lossy().to_string());
        }
        Ok(names)
    }
}

/// Creates fresh workspaces under a common root.
#[derive(Debug, Clone)]
pub struct WorkspaceStager {
    base_dir: PathBuf,
}

impl WorkspaceStager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Workspace root for a run; distinct run ids give distinct roots.
    pub fn workspace_root(&self, run_id: &RunId) -> PathBuf {
        self.base_dir.join(format!("workspace-{run_id}"))
    }

    /// Create the workspace for `run_id` and link every existing file into
    /// `input-data` under its base name.
    ///
    /// References that do not resolve to an existing local file are skipped
    /// without an error. When two references share a base name the first
    /// one is kept.
    pub fn stage(&self, run_id: &RunId, files: &[FileReference]) -> Result<Workspace, WorkspaceError> {
        fs::create_dir_all(&self.base_dir).map_err(|e| WorkspaceError::io(&self.base_dir, e))?;

        let root = self.workspace_root(run_id);
        match fs::create_dir(&root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(WorkspaceError::Collision { path: root });
            }
            Err(e) => return Err(WorkspaceError::io(&root, e)),
        }
        let root = fs::canonicalize(&root).map_err(|e| WorkspaceError::io(&root, e))?;
        let workspace = Workspace::at(root);
        info!(workspace = %workspace.root().display(), "prepare workspace ...");

        let input_dir = workspace.input_dir();
        fs::create_dir(&input_dir).map_err(|e| WorkspaceError::io(&input_dir, e))?;

        for reference in files {
            let Some(path) = reference.local_path() else {
                debug!(reference = %reference, "not a local file, skipped");
                continue;
            };
            let Ok(source) = fs::canonicalize(&path) else {
                debug!(path = %path.display(), "missing input file, skipped");
                continue;
            };
            let Some(name) = source.file_name() else {
                continue;
            };

            let link = input_dir.join(name);
            if link.symlink_metadata().is_ok() {
                debug!(name = %name.to_string_lossy(), "duplicate input name, skipped");
                continue;
            }
            debug!(link = %link.display(), target = %source.display(), "staging input");
            link_file(&source, &link).map_err(|e| WorkspaceError::io(&link, e))?;
        }

        Ok(workspace)
    }
}

#[cfg(unix)]
fn link_file(source: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, link)
}

#[cfg(not(unix))]
fn link_file(source: &Path, link: &Path) -> std::io::Result<()> {
    fs::copy(source, link).map(|_| ())
}
