//! Error taxonomy for climproc pipelines.
//!
//! Every fatal error a pipeline can return carries the [`Stage`] it came
//! from, so callers can tell "no data / index down" apart from "tool crashed"
//! and from "misconfiguration".

use std::path::PathBuf;

use esgf_client::EsgfError;

use crate::runner::ToolFailure;
use crate::state::Stage;

/// Errors produced while resolving datasets.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("invalid time range: start year {start_year} is after end year {end_year}")]
    InvalidTimeRange { start_year: i32, end_year: i32 },

    #[error("dataset search failed: {0}")]
    Search(#[source] EsgfError),

    #[error("dataset download failed: {0}")]
    Download(#[source] EsgfError),
}

/// Errors produced while staging a workspace.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace already exists: {}", .path.display())]
    Collision { path: PathBuf },

    #[error("workspace io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WorkspaceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Misconfiguration: unknown names, missing or invalid settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("unknown diagnostic: {name}")]
    UnknownDiagnostic { name: String },

    #[error("missing configuration value [{section}] {key}")]
    MissingValue { section: String, key: String },

    #[error("invalid configuration value [{section}] {key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        reason: String,
    },

    #[error("diagnostic {diagnostic} requires a variable constraint")]
    MissingVariable { diagnostic: String },

    #[error("variable {variable} not supported by {diagnostic} (allowed: {})", .allowed.join(", "))]
    VariableNotAllowed {
        diagnostic: String,
        variable: String,
        allowed: Vec<String>,
    },

    #[error("cannot load configuration from {}: {reason}", .path.display())]
    Load { path: PathBuf, reason: String },
}

/// Fatal pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("no namelist template registered for diagnostic {diagnostic}")]
    TemplateNotFound { diagnostic: String },

    #[error("failed to render namelist for {diagnostic}: {reason}")]
    Render { diagnostic: String, reason: String },

    #[error("failed to write namelist {}: {source}", .path.display())]
    NamelistWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error during {stage}: {source}")]
    Configuration {
        stage: Stage,
        #[source]
        source: ConfigurationError,
    },

    #[error("tool execution failed: {0}")]
    ToolExecution(ToolFailure),
}

impl PipelineError {
    pub fn configuration(stage: Stage, source: ConfigurationError) -> Self {
        PipelineError::Configuration { stage, source }
    }

    /// Stage the error was raised in.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Resolution(_) => Stage::Resolving,
            PipelineError::Workspace(_) => Stage::Staging,
            PipelineError::TemplateNotFound { .. }
            | PipelineError::Render { .. }
            | PipelineError::NamelistWrite { .. } => Stage::Configuring,
            PipelineError::Configuration { stage, .. } => *stage,
            PipelineError::ToolExecution(_) => Stage::Running,
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
