//! External analysis tool execution.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::DiagnosticSettings;
use crate::workspace::Workspace;

/// Script the analysis tool is started through, relative to its root.
pub const TOOL_SCRIPT: &str = "esmval.sh";

/// How a tool invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolStatus {
    Succeeded,
    /// `exit_code` is `None` when the process was killed by a signal.
    Failed { exit_code: Option<i32> },
    LaunchFailed { reason: String },
    TimedOut { limit_ms: u64 },
}

impl ToolStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolStatus::Succeeded)
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolStatus::Succeeded => write!(f, "succeeded"),
            ToolStatus::Failed {
                exit_code: Some(code),
            } => write!(f, "exited with code {code}"),
            ToolStatus::Failed { exit_code: None } => write!(f, "terminated by signal"),
            ToolStatus::LaunchFailed { reason } => write!(f, "failed to launch: {reason}"),
            ToolStatus::TimedOut { limit_ms } if limit_ms % 1000 == 0 => {
                write!(f, "timed out after {}s", limit_ms / 1000)
            }
            ToolStatus::TimedOut { limit_ms } => write!(f, "timed out after {limit_ms}ms"),
        }
    }
}

/// Result of one tool invocation. The paths are returned whatever the
/// status; the acknowledgement document may not exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub status: ToolStatus,
    pub log_path: PathBuf,
    pub acknowledgements_path: PathBuf,
    pub duration_ms: u64,
}

impl ToolOutcome {
    pub fn succeeded(&self) -> bool {
        self.status.is_success()
    }

    /// Failure details, if the tool did not succeed.
    pub fn failure(&self) -> Option<ToolFailure> {
        if self.succeeded() {
            None
        } else {
            Some(ToolFailure {
                status: self.status.clone(),
                log_path: self.log_path.clone(),
            })
        }
    }
}

/// Non-successful tool invocation, fatal only under the strict policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub status: ToolStatus,
    pub log_path: PathBuf,
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (log: {})", self.status, self.log_path.display())
    }
}

/// Launches the analysis tool with a per-invocation environment.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    script: PathBuf,
    env: BTreeMap<String, OsString>,
    timeout: Option<Duration>,
}

impl ToolRunner {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Runner for `<esmval_root>/esmval.sh` with NCL on the search path.
    pub fn esmvaltool(settings: &DiagnosticSettings) -> Self {
        Self::new(settings.esmval_root.join(TOOL_SCRIPT))
            .with_env("NCARG_ROOT", settings.ncarg_root.as_os_str())
            .with_env("PATH", prepend_path(&settings.ncarg_root.join("bin")))
            .with_timeout(settings.tool_timeout)
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Environment overrides applied to the child only.
    pub fn env(&self) -> &BTreeMap<String, OsString> {
        &self.env
    }

    /// Run `script config_path log_path` inside the workspace.
    ///
    /// Stdout and stderr of the tool are appended to the workspace log.
    /// Never fails: launch errors and timeouts are written to the log and
    /// reported through [`ToolOutcome::status`].
    pub async fn run(&self, config_path: &Path, workspace: &Workspace) -> ToolOutcome {
        let start = Instant::now();
        let log_path = workspace.log_path();
        info!(script = %self.script.display(), "run esmvaltool");
        debug!(namelist = %config_path.display(), env = ?self.env, "tool invocation");

        let status = match self.execute(config_path, &log_path).await {
            Ok(status) => status,
            Err(e) => ToolStatus::LaunchFailed {
                reason: e.to_string(),
            },
        };

        if !status.is_success() {
            warn!(status = %status, log = %log_path.display(), "esmvaltool failed");
            if let Err(e) = append_line(&log_path, &format!("climproc: tool {status}")) {
                warn!(error = %e, "could not record tool failure in log");
            }
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            match std::fs::read_to_string(&log_path) {
                Ok(log) => debug!(log = %log, "tool log"),
                Err(e) => debug!(error = %e, "tool log not readable"),
            }
        }

        ToolOutcome {
            status,
            log_path,
            acknowledgements_path: workspace.acknowledgements_path(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn execute(&self, config_path: &Path, log_path: &Path) -> std::io::Result<ToolStatus> {
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        let stderr = stdout.try_clone()?;

        let mut cmd = Command::new(&self.script);
        cmd.arg(config_path)
            .arg(log_path)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        if let Some(dir) = log_path.parent() {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;

        let exit = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(exit) => exit?,
                Err(_) => {
                    child.kill().await.ok();
                    return Ok(ToolStatus::TimedOut {
                        limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            },
            None => child.wait().await?,
        };

        if exit.success() {
            Ok(ToolStatus::Succeeded)
        } else {
            Ok(ToolStatus::Failed {
                exit_code: exit.code(),
            })
        }
    }
}

/// `dir` followed by the current `PATH`, without touching the process
/// environment.
fn prepend_path(dir: &Path) -> OsString {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(current) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&current));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ToolStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(
            ToolStatus::Failed { exit_code: Some(3) }.to_string(),
            "exited with code 3"
        );
        assert_eq!(
            ToolStatus::TimedOut { limit_ms: 5000 }.to_string(),
            "timed out after 5s"
        );
        assert_eq!(
            ToolStatus::TimedOut { limit_ms: 200 }.to_string(),
            "timed out after 200ms"
        );
    }

    #[test]
    fn test_prepend_path_puts_dir_first() {
        let joined = prepend_path(Path::new("/opt/ncl/bin"));
        let first = std::env::split_paths(&joined).next().unwrap();
        assert_eq!(first, PathBuf::from("/opt/ncl/bin"));
    }

    #[tokio::test]
    async fn test_missing_script_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::at(dir.path());
        let runner = ToolRunner::new(dir.path().join("no-such-tool.sh"));

        let outcome = runner.run(&ws.namelist_path(), &ws).await;

        assert!(matches!(outcome.status, ToolStatus::LaunchFailed { .. }));
        assert_eq!(outcome.acknowledgements_path, ws.acknowledgements_path());
        let log = std::fs::read_to_string(&outcome.log_path).unwrap();
        assert!(log.contains("failed to launch"));
        assert!(outcome.failure().is_some());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("tool.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_env_reaches_child_only() {
            let dir = tempfile::tempdir().unwrap();
            let ws = Workspace::at(dir.path());
            let runner = ToolRunner::new(script(dir.path(), "echo \"ncl=$NCARG_ROOT args=$#\""))
                .with_env("NCARG_ROOT", "/opt/ncl-test");

            let outcome = runner.run(&ws.namelist_path(), &ws).await;

            assert!(outcome.succeeded());
            let log = std::fs::read_to_string(ws.log_path()).unwrap();
            assert!(log.contains("ncl=/opt/ncl-test args=2"));
            assert_ne!(
                std::env::var_os("NCARG_ROOT").as_deref(),
                Some(std::ffi::OsStr::new("/opt/ncl-test"))
            );
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_captured() {
            let dir = tempfile::tempdir().unwrap();
            let ws = Workspace::at(dir.path());
            let runner = ToolRunner::new(script(dir.path(), "echo 'ncl: fatal error' >&2\nexit 7"));

            let outcome = runner.run(&ws.namelist_path(), &ws).await;

            assert_eq!(outcome.status, ToolStatus::Failed { exit_code: Some(7) });
            let log = std::fs::read_to_string(ws.log_path()).unwrap();
            assert!(log.contains("ncl: fatal error"));
            assert!(log.contains("exited with code 7"));
        }

        #[tokio::test]
        async fn test_timeout_kills_tool() {
            let dir = tempfile::tempdir().unwrap();
            let ws = Workspace::at(dir.path());
            let runner = ToolRunner::new(script(dir.path(), "sleep 30"))
                .with_timeout(Some(Duration::from_millis(200)));

            let outcome = runner.run(&ws.namelist_path(), &ws).await;

            assert_eq!(outcome.status, ToolStatus::TimedOut { limit_ms: 200 });
            assert!(outcome.duration_ms < 10_000);
            let log = std::fs::read_to_string(ws.log_path()).unwrap();
            assert!(log.contains("timed out after 200ms"));
        }
    }
}
