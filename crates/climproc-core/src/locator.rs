//! Output artifact paths.
//!
//! Pure path computation; nothing here touches the filesystem, so the
//! returned path may not exist if the tool failed.

use std::path::PathBuf;

use crate::constraints::ConstraintSet;
use crate::diagnostic::Diagnostic;
use crate::error::ConfigurationError;
use crate::workspace::Workspace;

/// Expected plot/report path for a run of `diagnostic` (by name).
pub fn locate(
    diagnostic: &str,
    workspace: &Workspace,
    constraints: &ConstraintSet,
    output_format: &str,
) -> Result<PathBuf, ConfigurationError> {
    let diagnostic: Diagnostic = diagnostic.parse()?;
    locate_diagnostic(diagnostic, workspace, constraints, output_format)
}

/// Typed variant of [`locate`].
pub fn locate_diagnostic(
    diagnostic: Diagnostic,
    workspace: &Workspace,
    constraints: &ConstraintSet,
    output_format: &str,
) -> Result<PathBuf, ConfigurationError> {
    let variable = diagnostic.variable(constraints)?;
    let plots = workspace.plots_dir();

    let path = match (diagnostic, variable) {
        (Diagnostic::Perfmetrics, Some(var)) => plots.join("perfmetrics_grading").join(format!(
            "namelist_{var}-850_Globta-200_Glob_RMSD_grading.{output_format}"
        )),
        (Diagnostic::Surfconplot, Some(var)) => plots
            .join("surfconplot_simple")
            .join(format!("surfconplot_simple_{var}_T2Ms_ANN.{output_format}")),
        (Diagnostic::MyDiag, _) => plots
            .join("MyDiag")
            .join(format!("MyDiag_MyVar.{output_format}")),
        (d, None) => {
            return Err(ConfigurationError::MissingVariable {
                diagnostic: d.name().to_string(),
            })
        }
    };
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::build_constraints;

    fn workspace() -> Workspace {
        Workspace::at("/runs/workspace-1")
    }

    #[test]
    fn test_surfconplot_path() {
        let c = build_constraints(Some("CMIP5"), &["modelA"], None, None, Some("historical"), None);
        let path = locate("surfconplot", &workspace(), &c, "ps").unwrap();
        assert_eq!(
            path,
            PathBuf::from(
                "/runs/workspace-1/plots/surfconplot_simple/surfconplot_simple_pr_T2Ms_ANN.ps"
            )
        );
    }

    #[test]
    fn test_perfmetrics_path_uses_variable() {
        let c = build_constraints(Some("CMIP5"), &["modelA"], Some("ta"), None, None, None);
        let path = locate("perfmetrics", &workspace(), &c, "png").unwrap();
        assert_eq!(
            path,
            PathBuf::from(
                "/runs/workspace-1/plots/perfmetrics_grading/namelist_ta-850_Globta-200_Glob_RMSD_grading.png"
            )
        );
    }

    #[test]
    fn test_mydiag_path() {
        let path = locate("mydiag", &workspace(), &ConstraintSet::new(), "pdf").unwrap();
        assert!(path.ends_with("plots/MyDiag/MyDiag_MyVar.pdf"));
    }

    #[test]
    fn test_locate_is_pure() {
        let c = build_constraints(None, &["m"], Some("va"), None, None, None);
        let a = locate("perfmetrics", &workspace(), &c, "ps").unwrap();
        let b = locate("perfmetrics", &workspace(), &c, "ps").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_diagnostic_fails() {
        for name in ["", "surfconplot2", "PERFMETRICS", "cvdp"] {
            let err = locate(name, &workspace(), &ConstraintSet::new(), "ps").unwrap_err();
            assert!(matches!(err, ConfigurationError::UnknownDiagnostic { .. }));
        }
    }
}
