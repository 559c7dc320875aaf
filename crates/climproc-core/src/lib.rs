//! climproc core library
//!
//! Runs climate-model diagnostics end to end: search the federated archive,
//! retrieve the matching files, stage them into a per-run workspace, render
//! the analysis tool's namelist, run the tool and report where its output
//! lands. Also wraps the CDO and DKRZ QA command-line tools.

pub mod config;
pub mod constraints;
pub mod diagnostic;
pub mod error;
pub mod locator;
pub mod monitor;
pub mod namelist;
pub mod obs;
pub mod pipeline;
pub mod processes;
pub mod resolver;
pub mod runner;
pub mod state;
pub mod telemetry;
pub mod time_range;
pub mod workspace;

pub use config::{ConfigStore, DiagnosticSettings};
pub use constraints::{build_constraints, ConstraintSet, Facet};
pub use diagnostic::Diagnostic;
pub use error::{ConfigurationError, PipelineError, ResolutionError, Result, WorkspaceError};
pub use locator::locate;
pub use monitor::{Monitor, NullMonitor, ProgressTracker, RecordingMonitor};
pub use namelist::{NamelistGenerator, TemplateCatalog};
pub use pipeline::{DiagnosticPipeline, DiagnosticRequest, FailurePolicy, RunResult};
pub use processes::{
    catalogue, Cdo, CdoOperator, ProcessError, QaProject, QaTools, QualityReport, VerticalOperator,
};
pub use resolver::{DatasetResolver, SearchOptions};
pub use runner::{ToolFailure, ToolOutcome, ToolRunner, ToolStatus};
pub use state::{Stage, StageTracker};
pub use time_range::TimeRange;
pub use workspace::{RunId, Workspace, WorkspaceStager};

pub use esgf_client::{Credentials, FileReference};
