//! Diagnostics the analysis tool can run.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constraints::{ConstraintSet, Facet};
use crate::error::ConfigurationError;

/// Known diagnostics, one namelist template and one artifact naming rule each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Diagnostic {
    /// Performance-metrics grading of CMIP5 models
    Perfmetrics,
    /// Surface contour plot of precipitation
    Surfconplot,
    /// Minimal example diagnostic
    MyDiag,
}

impl Diagnostic {
    pub const ALL: [Diagnostic; 3] = [
        Diagnostic::Perfmetrics,
        Diagnostic::Surfconplot,
        Diagnostic::MyDiag,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Diagnostic::Perfmetrics => "perfmetrics",
            Diagnostic::Surfconplot => "surfconplot",
            Diagnostic::MyDiag => "mydiag",
        }
    }

    /// Variable the diagnostic always runs on, whatever was requested.
    pub fn fixed_variable(&self) -> Option<&'static str> {
        match self {
            Diagnostic::Surfconplot => Some("pr"),
            _ => None,
        }
    }

    /// Variables the diagnostic accepts; empty means unrestricted.
    pub fn allowed_variables(&self) -> &'static [&'static str] {
        match self {
            Diagnostic::Perfmetrics => &["ta", "ua", "va"],
            Diagnostic::Surfconplot => &["pr"],
            Diagnostic::MyDiag => &[],
        }
    }

    fn allows(&self, variable: &str) -> bool {
        let allowed = self.allowed_variables();
        allowed.is_empty() || allowed.iter().any(|a| *a == variable)
    }

    /// Whether the artifact name embeds the variable.
    pub fn needs_variable(&self) -> bool {
        matches!(self, Diagnostic::Perfmetrics | Diagnostic::Surfconplot)
    }

    /// Constraints as the diagnostic will run them: a fixed variable
    /// replaces whatever variable was requested.
    pub fn normalize(&self, constraints: &ConstraintSet) -> ConstraintSet {
        match self.fixed_variable() {
            Some(variable) => constraints.with_replaced(Facet::Variable, variable),
            None => constraints.clone(),
        }
    }

    /// Variable the run uses, checked against the allowed set.
    pub fn variable<'a>(
        &self,
        constraints: &'a ConstraintSet,
    ) -> Result<Option<&'a str>, ConfigurationError> {
        let variable = match self.fixed_variable() {
            Some(fixed) => Some(fixed),
            None => constraints.get(Facet::Variable),
        };

        match variable {
            None if self.needs_variable() => Err(ConfigurationError::MissingVariable {
                diagnostic: self.name().to_string(),
            }),
            Some(v) if !self.allows(v) => {
                Err(ConfigurationError::VariableNotAllowed {
                    diagnostic: self.name().to_string(),
                    variable: v.to_string(),
                    allowed: self.allowed_variables().iter().map(|s| s.to_string()).collect(),
                })
            }
            other => Ok(other),
        }
    }
}

impl FromStr for Diagnostic {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Diagnostic::ALL
            .into_iter()
            .find(|d| d.name() == s)
            .ok_or_else(|| ConfigurationError::UnknownDiagnostic {
                name: s.to_string(),
            })
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
