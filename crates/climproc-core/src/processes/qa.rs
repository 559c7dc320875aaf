//! DKRZ quality-assurance tools: the CF checker, the task-file project
//! checker and the per-dataset quality checker.
//!
//! The CF and project checkers report findings on stdout and exit non-zero
//! when they find problems, so their output is returned either way; only a
//! failure to launch them is an error. The quality checker leaves its
//! findings under `QA_Results/check_logs` and fails on a non-zero exit.

use std::ffi::{OsStr, OsString};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{run_command, step_percent, ProcessError};
use crate::monitor::Monitor;

/// Name of the task file written for the project checker.
pub const QA_TASK_FILE: &str = "qa.task";

/// Results directory the quality checker writes below its working directory.
pub const QA_RESULTS_DIR: &str = "QA_Results/check_logs";

/// Archive of the quality checker results.
pub const QA_ARCHIVE_FILE: &str = "output.tar.gz";

/// Outputs of [`QaTools::quality_check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    /// `output.tar.gz` holding the whole `check_logs` tree
    pub archive: PathBuf,
    /// Summary log, linked under a `.txt` name
    pub logfile: PathBuf,
}

/// Projects the project checker has rule sets for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QaProject {
    #[default]
    Cordex,
    Cmip5,
}

impl QaProject {
    pub fn name(&self) -> &'static str {
        match self {
            QaProject::Cordex => "CORDEX",
            QaProject::Cmip5 => "CMIP5",
        }
    }
}

impl FromStr for QaProject {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CORDEX" => Ok(QaProject::Cordex),
            "CMIP5" => Ok(QaProject::Cmip5),
            _ => Err(ProcessError::UnknownProject {
                name: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for QaProject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Task description consumed by `qa-dkrz -f`.
pub fn qa_task(project: QaProject, archive_path: &Path) -> String {
    format!(
        "\nPROJECT_DATA={archive}/{project}\nQC_RESULTS=results\nPROJECT={project}\nQC_CONF={project}_qc.conf\n",
        archive = archive_path.display(),
        project = project.name(),
    )
}

/// Handles on the checker executables.
#[derive(Debug, Clone)]
pub struct QaTools {
    cf_checker: PathBuf,
    qa_dkrz: PathBuf,
}

impl Default for QaTools {
    fn default() -> Self {
        Self::new("dkrz-cf-checker", "qa-dkrz")
    }
}

impl QaTools {
    pub fn new(cf_checker: impl Into<PathBuf>, qa_dkrz: impl Into<PathBuf>) -> Self {
        Self {
            cf_checker: cf_checker.into(),
            qa_dkrz: qa_dkrz.into(),
        }
    }

    /// Check one file against the CF conventions.
    ///
    /// The checker only accepts `.nc` files, so a file without that suffix
    /// is renamed first.
    pub async fn cf_check(&self, file: &Path) -> Result<String, ProcessError> {
        debug!(file = %file.display(), "start cf check");
        let file = ensure_nc_suffix(file)?;

        let out = run_command(&self.cf_checker, &[file.as_os_str().to_os_string()], None).await?;
        if !out.success {
            warn!(file = %file.display(), exit_code = ?out.exit_code, "cf checker reported failures");
        }
        Ok(out.stdout)
    }

    /// Append the CF report of every file to `report`.
    pub async fn cf_check_report(
        &self,
        files: &[PathBuf],
        report: &Path,
        monitor: &dyn Monitor,
    ) -> Result<PathBuf, ProcessError> {
        if files.is_empty() {
            return Err(ProcessError::NoInputs);
        }
        monitor.report("starting cfchecker ...", 0);

        for (idx, file) in files.iter().enumerate() {
            let text = self.cf_check(file).await?;
            append(report, &text)?;
            monitor.report(
                &format!("cfchecker: {}/{}", idx + 1, files.len()),
                step_percent(idx + 1, files.len()),
            );
        }

        monitor.report("cfchecker: done", 100);
        Ok(report.to_path_buf())
    }

    /// Run the project checker over `archive_path/<PROJECT>` with
    /// `work_dir` as its working directory. Returns stdout and stderr.
    pub async fn project_check(
        &self,
        project: QaProject,
        archive_path: &Path,
        work_dir: &Path,
    ) -> Result<String, ProcessError> {
        let task = work_dir.join(QA_TASK_FILE);
        std::fs::write(&task, qa_task(project, archive_path))
            .map_err(|e| ProcessError::io(&task, e))?;
        info!(project = %project, archive = %archive_path.display(), "qa checker");

        let args: Vec<OsString> = ["-m", "-f", QA_TASK_FILE].iter().map(OsString::from).collect();
        let out = run_command(&self.qa_dkrz, &args, Some(work_dir)).await?;
        if !out.success {
            warn!(project = %project, exit_code = ?out.exit_code, "project check failed");
        }
        Ok(out.merged())
    }

    /// [`project_check`](Self::project_check) with the output appended to
    /// `report`.
    pub async fn project_check_report(
        &self,
        project: QaProject,
        archive_path: &Path,
        work_dir: &Path,
        report: &Path,
        monitor: &dyn Monitor,
    ) -> Result<PathBuf, ProcessError> {
        monitor.report("starting qa checker ...", 0);
        let text = self.project_check(project, archive_path, work_dir).await?;
        append(report, &text)?;
        monitor.report("qa checker: done", 100);
        Ok(report.to_path_buf())
    }
}

impl QaTools {
    /// Run `qa-dkrz -P <PROJECT> <dataset>` for every dataset in `work_dir`,
    /// then pack the results and pick the summary log.
    ///
    /// Unlike the other checkers a non-zero exit is an error here.
    pub async fn quality_check(
        &self,
        datasets: &[PathBuf],
        project: QaProject,
        work_dir: &Path,
        monitor: &dyn Monitor,
    ) -> Result<QualityReport, ProcessError> {
        if datasets.is_empty() {
            return Err(ProcessError::NoInputs);
        }
        monitor.report("starting qa checker ...", 0);

        for (idx, dataset) in datasets.iter().enumerate() {
            monitor.report(
                &format!("checking {}", dataset.display()),
                step_percent(idx, datasets.len()),
            );
            let args = vec![
                OsString::from("-P"),
                OsString::from(project.name()),
                dataset.as_os_str().to_os_string(),
            ];
            run_command(&self.qa_dkrz, &args, Some(work_dir))
                .await?
                .check(&self.qa_dkrz)?;
        }

        let results = work_dir.join(QA_RESULTS_DIR);
        if !results.is_dir() {
            return Err(ProcessError::MissingResults { path: results });
        }

        let archive = work_dir.join(QA_ARCHIVE_FILE);
        pack_results(&results, &archive)?;
        let logfile = summary_log(&results)?;
        info!(archive = %archive.display(), logfile = %logfile.display(), "qa checker done");

        monitor.report("qa checker: done", 100);
        Ok(QualityReport { archive, logfile })
    }
}

/// Write `results` into a gzipped tarball, stored under its
/// `QA_Results/check_logs` name.
fn pack_results(results: &Path, archive: &Path) -> Result<(), ProcessError> {
    let file = File::create(archive).map_err(|e| ProcessError::io(archive, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder
        .append_dir_all(QA_RESULTS_DIR, results)
        .map_err(|e| ProcessError::io(results, e))?;
    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(|e| ProcessError::io(archive, e))?;
    Ok(())
}

/// First `*.log` in `results` (hidden `.*.log` files only when there is
/// no other), exposed under a `.txt` name next to it.
fn summary_log(results: &Path) -> Result<PathBuf, ProcessError> {
    let entries = std::fs::read_dir(results).map_err(|e| ProcessError::io(results, e))?;
    let mut visible = Vec::new();
    let mut hidden = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ProcessError::io(results, e))?.path();
        if !path.is_file() || path.extension() != Some(OsStr::new("log")) {
            continue;
        }
        let is_hidden = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.'));
        if is_hidden {
            hidden.push(path);
        } else {
            visible.push(path);
        }
    }
    visible.sort();
    hidden.sort();

    let log = visible
        .into_iter()
        .chain(hidden)
        .next()
        .ok_or_else(|| ProcessError::MissingLog {
            path: results.to_path_buf(),
        })?;

    let txt = log.with_extension("txt");
    if !txt.exists() {
        if let Err(e) = std::fs::hard_link(&log, &txt) {
            debug!(error = %e, "hard link failed, copying summary log");
            std::fs::copy(&log, &txt).map_err(|e| ProcessError::io(&txt, e))?;
        }
    }
    Ok(txt)
}

fn ensure_nc_suffix(file: &Path) -> Result<PathBuf, ProcessError> {
    if file.extension().is_some_and(|ext| ext == "nc") {
        return Ok(file.to_path_buf());
    }
    let mut renamed = file.as_os_str().to_os_string();
    renamed.push(".nc");
    let renamed = PathBuf::from(renamed);
    std::fs::rename(file, &renamed).map_err(|e| ProcessError::io(file, e))?;
    debug!(from = %file.display(), to = %renamed.display(), "renamed for cf checker");
    Ok(renamed)
}

fn append(report: &Path, text: &str) -> Result<(), ProcessError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(report)
        .map_err(|e| ProcessError::io(report, e))?;
    file.write_all(text.as_bytes())
        .map_err(|e| ProcessError::io(report, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qa_task_contents() {
        let task = qa_task(QaProject::Cordex, Path::new("/data/archive"));
        assert_eq!(
            task,
            "\nPROJECT_DATA=/data/archive/CORDEX\nQC_RESULTS=results\nPROJECT=CORDEX\nQC_CONF=CORDEX_qc.conf\n"
        );
    }

    #[test]
    fn test_project_names() {
        assert_eq!("cmip5".parse::<QaProject>().unwrap(), QaProject::Cmip5);
        assert_eq!("CORDEX".parse::<QaProject>().unwrap(), QaProject::Cordex);
        assert!("CMIP6".parse::<QaProject>().is_err());
    }

    #[test]
    fn test_ensure_nc_suffix_renames() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("tas_day");
        std::fs::write(&plain, b"x").unwrap();

        let renamed = ensure_nc_suffix(&plain).unwrap();
        assert_eq!(renamed, dir.path().join("tas_day.nc"));
        assert!(renamed.exists());
        assert!(!plain.exists());

        assert_eq!(ensure_nc_suffix(&renamed).unwrap(), renamed);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::monitor::RecordingMonitor;
        use crate::processes::testutil::fake_tool;

        #[tokio::test]
        async fn test_cf_check_returns_output_on_failure() {
            let dir = tempfile::tempdir().unwrap();
            let checker = fake_tool(dir.path(), "cf", "echo \"ERROR: bad units in $1\"\nexit 1");
            let tools = QaTools::new(checker, "/nonexistent/qa-dkrz");
            let file = dir.path().join("pr.nc");
            std::fs::write(&file, b"x").unwrap();

            let out = tools.cf_check(&file).await.unwrap();
            assert!(out.contains("bad units"));
            assert!(out.contains("pr.nc"));
        }

        #[tokio::test]
        async fn test_cf_check_report_progress() {
            let dir = tempfile::tempdir().unwrap();
            let checker = fake_tool(dir.path(), "cf", "echo \"checked $1\"");
            let tools = QaTools::new(checker, "/nonexistent/qa-dkrz");
            let files: Vec<PathBuf> = ["a.nc", "b.nc"]
                .iter()
                .map(|n| {
                    let p = dir.path().join(n);
                    std::fs::write(&p, b"x").unwrap();
                    p
                })
                .collect();
            let report = dir.path().join("report.txt");
            let monitor = RecordingMonitor::new();

            tools.cf_check_report(&files, &report, &monitor).await.unwrap();

            let text = std::fs::read_to_string(&report).unwrap();
            assert_eq!(text.lines().count(), 2);
            let updates = monitor.updates();
            assert_eq!(updates[1], ("cfchecker: 1/2".to_string(), 50));
            assert_eq!(updates[2], ("cfchecker: 2/2".to_string(), 100));
        }

        #[tokio::test]
        async fn test_project_check_writes_task_and_runs_in_work_dir() {
            let dir = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let qa = fake_tool(dir.path(), "qa-dkrz", "echo \"args: $*\"\ncat qa.task\necho warn >&2\nexit 3");
            let tools = QaTools::new("/nonexistent/cf", qa);

            let out = tools
                .project_check(QaProject::Cmip5, Path::new("/archive"), work.path())
                .await
                .unwrap();

            assert!(out.contains("args: -m -f qa.task"));
            assert!(out.contains("PROJECT_DATA=/archive/CMIP5"));
            assert!(out.contains("warn"));
            assert!(work.path().join(QA_TASK_FILE).is_file());
        }

        const QA_WRITES_RESULTS: &str = r#"echo "$*" >> calls.txt
mkdir -p QA_Results/check_logs
echo "summary" > QA_Results/check_logs/CORDEX.log
echo "details" > QA_Results/check_logs/tas_day.log.1"#;

        fn datasets(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
            names
                .iter()
                .map(|n| {
                    let p = dir.join(n);
                    std::fs::write(&p, b"x").unwrap();
                    p
                })
                .collect()
        }

        #[tokio::test]
        async fn test_quality_check_packs_results_and_picks_log() {
            let dir = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let qa = fake_tool(dir.path(), "qa-dkrz", QA_WRITES_RESULTS);
            let files = datasets(dir.path(), &["tas_1.nc", "tas_2.nc"]);
            let monitor = RecordingMonitor::new();

            let report = QaTools::new("/nonexistent/cf", qa)
                .quality_check(&files, QaProject::Cordex, work.path(), &monitor)
                .await
                .unwrap();

            let calls = std::fs::read_to_string(work.path().join("calls.txt")).unwrap();
            let calls: Vec<_> = calls.lines().collect();
            assert_eq!(calls.len(), 2);
            assert!(calls[0].starts_with("-P CORDEX "));
            assert!(calls[1].ends_with("tas_2.nc"));

            assert_eq!(report.archive, work.path().join(QA_ARCHIVE_FILE));
            assert_eq!(
                report.logfile,
                work.path().join(QA_RESULTS_DIR).join("CORDEX.txt")
            );
            assert_eq!(std::fs::read_to_string(&report.logfile).unwrap(), "summary\n");

            let archive = std::fs::File::open(&report.archive).unwrap();
            let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(archive));
            let names: Vec<String> = tar
                .entries()
                .unwrap()
                .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
                .collect();
            assert!(names.iter().any(|n| n.ends_with("check_logs/CORDEX.log")));

            let percents = monitor.percents();
            assert_eq!(percents, vec![0, 0, 50, 100]);
        }

        #[tokio::test]
        async fn test_quality_check_hidden_log_fallback() {
            let dir = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let qa = fake_tool(
                dir.path(),
                "qa-dkrz",
                "mkdir -p QA_Results/check_logs\necho hidden > QA_Results/check_logs/.qa.log",
            );
            let files = datasets(dir.path(), &["pr.nc"]);

            let report = QaTools::new("/nonexistent/cf", qa)
                .quality_check(&files, QaProject::Cmip5, work.path(), &RecordingMonitor::new())
                .await
                .unwrap();
            assert_eq!(
                report.logfile,
                work.path().join(QA_RESULTS_DIR).join(".qa.txt")
            );
        }

        #[tokio::test]
        async fn test_quality_check_fails_on_nonzero_exit() {
            let dir = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let qa = fake_tool(dir.path(), "qa-dkrz", "echo 'no rules for project' >&2\nexit 2");
            let files = datasets(dir.path(), &["pr.nc"]);

            let err = QaTools::new("/nonexistent/cf", qa)
                .quality_check(&files, QaProject::Cordex, work.path(), &RecordingMonitor::new())
                .await
                .unwrap_err();
            match err {
                ProcessError::Failed { exit_code, output, .. } => {
                    assert_eq!(exit_code, Some(2));
                    assert!(output.contains("no rules for project"));
                }
                other => panic!("expected Failed, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_quality_check_without_results_dir() {
            let dir = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let qa = fake_tool(dir.path(), "qa-dkrz", "exit 0");
            let files = datasets(dir.path(), &["pr.nc"]);

            let err = QaTools::new("/nonexistent/cf", qa)
                .quality_check(&files, QaProject::Cordex, work.path(), &RecordingMonitor::new())
                .await
                .unwrap_err();
            assert!(matches!(err, ProcessError::MissingResults { .. }));
            assert!(err.to_string().starts_with("QA results are missing"));
            assert!(!work.path().join(QA_ARCHIVE_FILE).exists());
        }

        #[tokio::test]
        async fn test_quality_check_without_log() {
            let dir = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let qa = fake_tool(dir.path(), "qa-dkrz", "mkdir -p QA_Results/check_logs");
            let files = datasets(dir.path(), &["pr.nc"]);

            let err = QaTools::new("/nonexistent/cf", qa)
                .quality_check(&files, QaProject::Cordex, work.path(), &RecordingMonitor::new())
                .await
                .unwrap_err();
            assert!(matches!(err, ProcessError::MissingLog { .. }));
        }

        #[tokio::test]
        async fn test_quality_check_needs_datasets() {
            let work = tempfile::tempdir().unwrap();
            let err = QaTools::default()
                .quality_check(&[], QaProject::Cordex, work.path(), &RecordingMonitor::new())
                .await
                .unwrap_err();
            assert!(matches!(err, ProcessError::NoInputs));
        }

        #[tokio::test]
        async fn test_missing_checker_is_launch_error() {
            let work = tempfile::tempdir().unwrap();
            let err = QaTools::new("/nonexistent/cf", "/nonexistent/qa")
                .project_check(QaProject::Cordex, Path::new("/archive"), work.path())
                .await
                .unwrap_err();
            assert!(matches!(err, ProcessError::Launch { .. }));
        }
    }
}
