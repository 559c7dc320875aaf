//! Diagnostic pipeline orchestration.
//!
//! One run walks `init -> resolving -> staging -> configuring -> running ->
//! locating -> done`, each stage once. Every stage error except a tool
//! failure ends the run; a tool failure ends it only under
//! [`FailurePolicy::Strict`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use esgf_client::{Credentials, EsgSearchClient, HttpDownloader};
use serde::{Deserialize, Serialize};
use tracing::{debug, Instrument};

use crate::config::{DiagnosticSettings, DEFAULT_SECTION};
use crate::constraints::ConstraintSet;
use crate::diagnostic::Diagnostic;
use crate::error::{ConfigurationError, PipelineError, Result};
use crate::locator::locate_diagnostic;
use crate::monitor::{Monitor, ProgressTracker};
use crate::namelist::{NamelistGenerator, TemplateCatalog};
use crate::obs::{self, RunSpan};
use crate::resolver::{DatasetResolver, SearchOptions};
use crate::runner::ToolRunner;
use crate::state::{Stage, StageTracker};
use crate::time_range::TimeRange;
use crate::workspace::{RunId, WorkspaceStager};

/// Checkpoint percentages reported by the orchestrator itself. The
/// resolver reports its own (5 and 15) in between.
pub const STARTING_PERCENT: u8 = 0;
pub const STAGING_PERCENT: u8 = 30;
pub const CONFIGURING_PERCENT: u8 = 40;
pub const RUNNING_PERCENT: u8 = 50;
pub const TOOL_DONE_PERCENT: u8 = 90;
pub const LOCATING_PERCENT: u8 = 95;
pub const DONE_PERCENT: u8 = 100;

/// What to do when the analysis tool does not succeed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log the failure and return the run result; callers inspect the log.
    #[default]
    Tolerate,
    /// Fail the run with [`PipelineError::ToolExecution`].
    Strict,
}

/// Parameters of one diagnostic run.
#[derive(Debug, Clone)]
pub struct DiagnosticRequest {
    pub diagnostic: String,
    pub constraints: ConstraintSet,
    pub time_range: TimeRange,
    pub output_format: String,
    pub credentials: Credentials,
    pub run_id: Option<RunId>,
}

impl DiagnosticRequest {
    pub fn new(diagnostic: impl Into<String>, constraints: ConstraintSet, time_range: TimeRange) -> Self {
        Self {
            diagnostic: diagnostic.into(),
            constraints,
            time_range,
            output_format: "ps".to_string(),
            credentials: Credentials::Anonymous,
            run_id: None,
        }
    }

    pub fn with_output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = format.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Fix the run id instead of generating one.
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

/// Paths produced by a run. Carries no success flag: whether the tool
/// actually produced `output` is recorded in `log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub workspace: PathBuf,
    /// Expected plot or report; may not exist if the tool failed
    pub output: PathBuf,
    pub namelist: PathBuf,
    pub log: PathBuf,
    /// Conventional location, never checked for existence
    pub acknowledgements: PathBuf,
}

/// Runs diagnostics end to end.
pub struct DiagnosticPipeline {
    resolver: DatasetResolver,
    stager: WorkspaceStager,
    generator: NamelistGenerator,
    runner: ToolRunner,
    search: SearchOptions,
    policy: FailurePolicy,
}

impl DiagnosticPipeline {
    pub fn new(
        resolver: DatasetResolver,
        stager: WorkspaceStager,
        generator: NamelistGenerator,
        runner: ToolRunner,
    ) -> Self {
        Self {
            resolver,
            stager,
            generator,
            runner,
            search: SearchOptions::default(),
            policy: FailurePolicy::default(),
        }
    }

    /// Pipeline backed by the real search index, downloader and tool.
    pub fn from_settings(settings: &DiagnosticSettings, catalog: TemplateCatalog) -> Result<Self> {
        let invalid = |key: &str, reason: String| {
            PipelineError::configuration(
                Stage::Init,
                ConfigurationError::InvalidValue {
                    section: DEFAULT_SECTION.to_string(),
                    key: key.to_string(),
                    reason,
                },
            )
        };

        let search = EsgSearchClient::new(&settings.esgsearch_url)
            .map_err(|e| invalid("esgsearch_url", e.to_string()))?;
        let mut downloader =
            HttpDownloader::new(&settings.cache_dir).map_err(|e| invalid("cache_dir", e.to_string()))?;
        if let Some(archive_root) = &settings.archive_root {
            downloader = downloader.with_archive_root(archive_root);
        }

        let pipeline = Self::new(
            DatasetResolver::new(Arc::new(search), Arc::new(downloader)),
            WorkspaceStager::new(&settings.workspace_root),
            NamelistGenerator::new(catalog, &settings.esmval_root, &settings.obs_root),
            ToolRunner::esmvaltool(settings),
        )
        .with_search_options(settings.search)
        .with_policy(if settings.strict_tool_failures {
            FailurePolicy::Strict
        } else {
            FailurePolicy::Tolerate
        });
        Ok(pipeline)
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_search_options(mut self, search: SearchOptions) -> Self {
        self.search = search;
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Execute one run. Progress goes to `monitor`, starting at 0 and
    /// ending at 100 on success, never decreasing.
    pub async fn run(&self, request: &DiagnosticRequest, monitor: &dyn Monitor) -> Result<RunResult> {
        let run_id = request.run_id.unwrap_or_default();
        let run_label = run_id.to_string();
        let span = RunSpan::new(&run_label, &request.diagnostic).span();
        let started = Instant::now();

        let result = self
            .execute(run_id, request, monitor)
            .instrument(span)
            .await;

        match &result {
            Ok(done) => obs::emit_run_finished(
                &run_label,
                started.elapsed().as_millis() as u64,
                &done.output.display().to_string(),
            ),
            Err(e) => obs::emit_run_failed(&run_label, e.stage(), e),
        }
        result
    }

    async fn execute(
        &self,
        run_id: RunId,
        request: &DiagnosticRequest,
        monitor: &dyn Monitor,
    ) -> Result<RunResult> {
        let run_label = run_id.to_string();
        let mut tracker = StageTracker::new();
        let progress = ProgressTracker::new(monitor);
        obs::emit_run_started(&run_label, &request.diagnostic);
        progress.report("starting", STARTING_PERCENT);

        // Fail on misconfiguration before touching the network.
        let diagnostic: Diagnostic = request
            .diagnostic
            .parse()
            .map_err(|e| PipelineError::configuration(Stage::Init, e))?;
        diagnostic
            .variable(&request.constraints)
            .map_err(|e| PipelineError::configuration(Stage::Init, e))?;
        let constraints = diagnostic.normalize(&request.constraints);
        debug!(constraints = ?constraints.to_query_pairs(), time_range = ?request.time_range, "run request");

        let stage = tracker.advance();
        obs::emit_stage_entered(&run_label, stage);
        let files = self
            .resolver
            .resolve(
                &constraints,
                &request.time_range,
                &request.credentials,
                &self.search,
                &progress,
            )
            .await?;

        let stage = tracker.advance();
        obs::emit_stage_entered(&run_label, stage);
        progress.report("staging workspace", STAGING_PERCENT);
        let workspace = self.stager.stage(&run_id, &files)?;

        let stage = tracker.advance();
        obs::emit_stage_entered(&run_label, stage);
        progress.report("generating namelist", CONFIGURING_PERCENT);
        let namelist = self.generator.generate(
            diagnostic.name(),
            &workspace,
            &constraints,
            &request.time_range,
            &request.output_format,
        )?;

        let stage = tracker.advance();
        obs::emit_stage_entered(&run_label, stage);
        progress.report(&format!("{diagnostic} ..."), RUNNING_PERCENT);
        let outcome = self.runner.run(&namelist, &workspace).await;
        obs::emit_tool_finished(&run_label, &outcome.status, outcome.duration_ms);
        progress.report(&format!("{diagnostic} done"), TOOL_DONE_PERCENT);
        if let (FailurePolicy::Strict, Some(failure)) = (self.policy, outcome.failure()) {
            return Err(PipelineError::ToolExecution(failure));
        }

        let stage = tracker.advance();
        obs::emit_stage_entered(&run_label, stage);
        progress.report("locating output", LOCATING_PERCENT);
        let output = locate_diagnostic(diagnostic, &workspace, &constraints, &request.output_format)
            .map_err(|e| PipelineError::configuration(Stage::Locating, e))?;

        tracker.advance();
        progress.report("done", DONE_PERCENT);

        Ok(RunResult {
            run_id,
            workspace: workspace.root().to_path_buf(),
            output,
            namelist,
            log: outcome.log_path,
            acknowledgements: outcome.acknowledgements_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::build_constraints;
    use crate::monitor::RecordingMonitor;
    use esgf_client::fakes::{LocalDownloader, StaticSearch};

    fn pipeline(base: &std::path::Path, search: StaticSearch) -> DiagnosticPipeline {
        DiagnosticPipeline::new(
            DatasetResolver::new(Arc::new(search), Arc::new(LocalDownloader::new())),
            WorkspaceStager::new(base.join("workspaces")),
            NamelistGenerator::new(TemplateCatalog::builtin(), "/opt/esmvaltool", "/data/obs"),
            ToolRunner::new(base.join("missing-esmval.sh")),
        )
    }

    #[test]
    fn test_request_defaults() {
        let req = DiagnosticRequest::new("mydiag", ConstraintSet::new(), TimeRange::new(2000, 2001));
        assert_eq!(req.output_format, "ps");
        assert!(req.run_id.is_none());
        assert!(matches!(req.credentials, Credentials::Anonymous));
    }

    #[tokio::test]
    async fn test_unknown_diagnostic_fails_at_init_without_search() {
        let dir = tempfile::tempdir().unwrap();
        let search = StaticSearch::empty();
        let p = pipeline(dir.path(), search);
        let req = DiagnosticRequest::new("cvdp", ConstraintSet::new(), TimeRange::new(2000, 2001));

        let err = p.run(&req, &RecordingMonitor::new()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Init);
        assert!(!dir.path().join("workspaces").exists());
    }

    #[tokio::test]
    async fn test_missing_variable_fails_at_init() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), StaticSearch::empty());
        let c = build_constraints(Some("CMIP5"), &["m"], None, None, None, None);
        let req = DiagnosticRequest::new("perfmetrics", c, TimeRange::new(2000, 2001));

        let err = p.run(&req, &RecordingMonitor::new()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Configuration {
                stage: Stage::Init,
                source: ConfigurationError::MissingVariable { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_search_down_fails_in_resolving() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), StaticSearch::unreachable());
        let req = DiagnosticRequest::new("mydiag", ConstraintSet::new(), TimeRange::new(2000, 2001));

        let err = p.run(&req, &RecordingMonitor::new()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Resolving);
        assert!(!dir.path().join("workspaces").exists());
    }

    #[tokio::test]
    async fn test_strict_policy_promotes_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), StaticSearch::empty()).with_policy(FailurePolicy::Strict);
        let req = DiagnosticRequest::new("mydiag", ConstraintSet::new(), TimeRange::new(2000, 2001));

        let err = p.run(&req, &RecordingMonitor::new()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Running);
        assert!(matches!(err, PipelineError::ToolExecution(_)));
    }

    #[tokio::test]
    async fn test_tolerant_policy_returns_paths() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), StaticSearch::empty());
        let run_id = RunId::new();
        let req = DiagnosticRequest::new("mydiag", ConstraintSet::new(), TimeRange::new(2000, 2001))
            .with_output_format("png")
            .with_run_id(run_id);
        let monitor = RecordingMonitor::new();

        let result = p.run(&req, &monitor).await.unwrap();

        assert_eq!(result.run_id, run_id);
        assert!(result.output.ends_with("plots/MyDiag/MyDiag_MyVar.png"));
        assert!(result.namelist.is_file());
        assert!(result.log.is_file());
        assert_eq!(
            monitor.percents(),
            vec![0, 5, 15, 30, 40, 50, 90, 95, 100]
        );
    }
}
