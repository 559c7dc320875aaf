//! Climate Data Operators (`cdo`) wrappers.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{run_command, step_percent, ProcessError};
use crate::monitor::Monitor;

macro_rules! cdo_operators {
    ($($(#[$attr:meta])* $variant:ident => $name:literal),+ $(,)?) => {
        /// CDO operators offered by [`Cdo::operation`].
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum CdoOperator {
            $($(#[$attr])* $variant),+
        }

        impl CdoOperator {
            pub const ALL: &'static [CdoOperator] = &[$(CdoOperator::$variant),+];

            pub fn name(&self) -> &'static str {
                match self {
                    $(CdoOperator::$variant => $name),+
                }
            }
        }
    };
}

cdo_operators! {
    Merge => "merge",
    Dayavg => "dayavg",
    Daymax => "daymax",
    Daymean => "daymean",
    Daymin => "daymin",
    Daysum => "daysum",
    Dayvar => "dayvar",
    Daystd => "daystd",
    #[default]
    Monmax => "monmax",
    Monmin => "monmin",
    Monmean => "monmean",
    Monavg => "monavg",
    Monsum => "monsum",
    Monvar => "monvar",
    Monstd => "monstd",
    Ymonmin => "ymonmin",
    Ymonmax => "ymonmax",
    Ymonsum => "ymonsum",
    Ymonmean => "ymonmean",
    Ymonavg => "ymonavg",
    Ymonvar => "ymonvar",
    Ymonstd => "ymonstd",
    Yearavg => "yearavg",
    Yearmax => "yearmax",
    Yearmean => "yearmean",
    Yearmin => "yearmin",
    Yearsum => "yearsum",
    Yearvar => "yearvar",
    Yearstd => "yearstd",
    Yseasvar => "yseasvar",
}

impl FromStr for CdoOperator {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CdoOperator::ALL
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| ProcessError::UnknownOperator {
                name: s.to_string(),
            })
    }
}

impl std::fmt::Display for CdoOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Vertical interpolation from hybrid model levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerticalOperator {
    /// To pressure levels (Pa)
    Ml2pl,
    /// To height levels (m)
    Ml2hl,
}

impl VerticalOperator {
    pub fn name(&self) -> &'static str {
        match self {
            VerticalOperator::Ml2pl => "ml2pl",
            VerticalOperator::Ml2hl => "ml2hl",
        }
    }
}

impl FromStr for VerticalOperator {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ml2pl" => Ok(VerticalOperator::Ml2pl),
            "ml2hl" => Ok(VerticalOperator::Ml2hl),
            other => Err(ProcessError::UnknownVerticalOperator {
                name: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for VerticalOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle on a `cdo` executable.
#[derive(Debug, Clone)]
pub struct Cdo {
    program: PathBuf,
}

impl Default for Cdo {
    fn default() -> Self {
        Self::new("cdo")
    }
}

impl Cdo {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// `cdo <op> <inputs...> <output>`.
    pub async fn operation(
        &self,
        operator: CdoOperator,
        inputs: &[PathBuf],
        output: &Path,
        monitor: &dyn Monitor,
    ) -> Result<PathBuf, ProcessError> {
        if inputs.is_empty() {
            return Err(ProcessError::NoInputs);
        }
        monitor.report("starting cdo operator", 10);
        info!(operator = %operator, inputs = inputs.len(), "cdo operation");

        let mut args: Vec<OsString> = vec![operator.name().into()];
        args.extend(inputs.iter().map(|p| p.as_os_str().to_os_string()));
        args.push(output.as_os_str().to_os_string());
        run_command(&self.program, &args, None)
            .await?
            .check(&self.program)?;

        monitor.report("cdo operator done", 90);
        Ok(output.to_path_buf())
    }

    /// `cdo sinfo <input>`, returning the printed summary.
    pub async fn sinfo(&self, input: &Path) -> Result<String, ProcessError> {
        let args = [OsString::from("sinfo"), input.as_os_str().to_os_string()];
        let out = run_command(&self.program, &args, None)
            .await?
            .check(&self.program)?;
        Ok(out.stdout)
    }

    /// Write the `sinfo` summary of every input into `report`, each followed
    /// by two blank lines.
    pub async fn sinfo_report(
        &self,
        inputs: &[PathBuf],
        report: &Path,
        monitor: &dyn Monitor,
    ) -> Result<PathBuf, ProcessError> {
        if inputs.is_empty() {
            return Err(ProcessError::NoInputs);
        }
        monitor.report("starting cdo sinfo", 0);

        let mut file = std::fs::File::create(report).map_err(|e| ProcessError::io(report, e))?;
        for (idx, input) in inputs.iter().enumerate() {
            let summary = self.sinfo(input).await?;
            for line in summary.lines() {
                writeln!(file, "{line}").map_err(|e| ProcessError::io(report, e))?;
            }
            file.write_all(b"\n\n")
                .map_err(|e| ProcessError::io(report, e))?;
            monitor.report(
                &format!("cdo sinfo: {}/{}", idx + 1, inputs.len()),
                step_percent(idx + 1, inputs.len()).min(90),
            );
        }

        monitor.report("cdo sinfo done", 90);
        Ok(report.to_path_buf())
    }

    /// `cdo <op>,<l1>,<l2>... <input> <output>`.
    pub async fn intvert(
        &self,
        operator: VerticalOperator,
        levels: &[f64],
        input: &Path,
        output: &Path,
        monitor: &dyn Monitor,
    ) -> Result<PathBuf, ProcessError> {
        if levels.is_empty() {
            return Err(ProcessError::EmptyLevels);
        }
        monitor.report("starting cdo operation", 10);

        let args = [
            OsString::from(intvert_operator_arg(operator, levels)),
            input.as_os_str().to_os_string(),
            output.as_os_str().to_os_string(),
        ];
        run_command(&self.program, &args, None)
            .await?
            .check(&self.program)?;

        monitor.report("cdo operation done", 90);
        Ok(output.to_path_buf())
    }
}

fn intvert_operator_arg(operator: VerticalOperator, levels: &[f64]) -> String {
    let mut arg = operator.name().to_string();
    for level in levels {
        arg.push(',');
        arg.push_str(&level.to_string());
    }
    arg
}
