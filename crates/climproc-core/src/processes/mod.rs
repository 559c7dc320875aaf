//! Thin wrappers around command-line data tools.
//!
//! Each process shells out to one external program, reports progress
//! through a [`Monitor`](crate::monitor::Monitor) and returns a typed
//! [`ProcessError`] on failure.

pub mod cdo;
pub mod qa;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

pub use cdo::{Cdo, CdoOperator, VerticalOperator};
pub use qa::{QaProject, QaTools, QualityReport};

/// Errors from the process wrappers.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("unknown cdo operator: {name}")]
    UnknownOperator { name: String },

    #[error("unknown vertical operator: {name} (expected ml2pl or ml2hl)")]
    UnknownVerticalOperator { name: String },

    #[error("unknown qa project: {name} (expected CORDEX or CMIP5)")]
    UnknownProject { name: String },

    #[error("no input files given")]
    NoInputs,

    #[error("vertical interpolation needs at least one level")]
    EmptyLevels,

    #[error("failed to launch {}: {source}", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} exited with {}: {output}", .program.display(), exit_description(.exit_code))]
    Failed {
        program: PathBuf,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("QA results are missing: {}", .path.display())]
    MissingResults { path: PathBuf },

    #[error("could not find a log file in {}", .path.display())]
    MissingLog { path: PathBuf },

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

impl ProcessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProcessError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Catalogue entry for one offered process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessDescriptor {
    pub identifier: &'static str,
    pub title: &'static str,
    #[serde(rename = "abstract")]
    pub summary: &'static str,
    pub version: &'static str,
}

const CATALOGUE: &[ProcessDescriptor] = &[
    ProcessDescriptor {
        identifier: "cdo_operation",
        title: "CDO Operation",
        summary: "Apply a CDO operator like monmax to NetCDF files.",
        version: "0.1",
    },
    ProcessDescriptor {
        identifier: "cdo_sinfo",
        title: "CDO sinfo",
        summary: "Apply CDO sinfo to NetCDF files.",
        version: "0.1",
    },
    ProcessDescriptor {
        identifier: "cdo_intvert",
        title: "CDO INTVERT - Vertical interpolation",
        summary: "Interpolate 3D variables on hybrid model levels to pressure or height levels.",
        version: "1.0",
    },
    ProcessDescriptor {
        identifier: "qa_cfchecker",
        title: "QA DKRZ CF Checker",
        summary: "Check NetCDF files for compliance with the CF conventions.",
        version: "0.5-1",
    },
    ProcessDescriptor {
        identifier: "qa_checker",
        title: "QA DKRZ Checker",
        summary: "Project specific quality checks for CORDEX and CMIP5.",
        version: "0.5-1",
    },
    ProcessDescriptor {
        identifier: "qa_quality_checker",
        title: "Quality Assurance Checker by DKRZ",
        summary: "Project specific quality checks for CORDEX, CMIP5, ... per dataset, with the results packed as a tar archive.",
        version: "0.5.13",
    },
    ProcessDescriptor {
        identifier: "perfmetrics",
        title: "ESMValTool Perfmetrics",
        summary: "Plot the performance metrics for CMIP5 models.",
        version: "0.1",
    },
    ProcessDescriptor {
        identifier: "surfconplot",
        title: "ESMValTool: surface contour plot for precipitation",
        summary: "Tutorial contour plot of precipitation.",
        version: "0.1",
    },
];

/// Processes this service offers.
pub fn catalogue() -> &'static [ProcessDescriptor] {
    CATALOGUE
}

/// Captured result of one external command.
#[derive(Debug, Clone)]
pub(crate) struct CommandOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout followed by stderr.
    pub fn merged(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }

    /// Error unless the command exited with status 0.
    pub fn check(self, program: &Path) -> Result<Self, ProcessError> {
        if self.success {
            Ok(self)
        } else {
            Err(ProcessError::Failed {
                program: program.to_path_buf(),
                exit_code: self.exit_code,
                output: self.merged(),
            })
        }
    }
}

/// Run `program args...` to completion and capture its output.
pub(crate) async fn run_command(
    program: &Path,
    args: &[OsString],
    current_dir: Option<&Path>,
) -> Result<CommandOutput, ProcessError> {
    debug!(program = %program.display(), args = ?args, "exec");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }

    let output = cmd.output().await.map_err(|source| ProcessError::Launch {
        program: program.to_path_buf(),
        source,
    })?;

    Ok(CommandOutput {
        exit_code: output.status.code(),
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Progress of item `done` out of `total`, in percent.
pub(crate) fn step_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}

#[cfg(all(test, unix))]
pub(crate) mod testutil {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Write an executable shell script standing in for an external tool.
    pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}
