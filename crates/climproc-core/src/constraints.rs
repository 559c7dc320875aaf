//! Dataset selection constraints.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Facets a search may be constrained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    Project,
    Model,
    Variable,
    CmorTable,
    Experiment,
    Ensemble,
}

impl Facet {
    pub const ALL: [Facet; 6] = [
        Facet::Project,
        Facet::Model,
        Facet::Variable,
        Facet::CmorTable,
        Facet::Experiment,
        Facet::Ensemble,
    ];

    /// Facet name as understood by the search index.
    pub fn name(&self) -> &'static str {
        match self {
            Facet::Project => "project",
            Facet::Model => "model",
            Facet::Variable => "variable",
            Facet::CmorTable => "cmor_table",
            Facet::Experiment => "experiment",
            Facet::Ensemble => "ensemble",
        }
    }
}

impl std::fmt::Display for Facet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Ordered multi-valued constraints. A facet may appear more than once
/// (several models); insertion order is search precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintSet {
    entries: Vec<(Facet, String)>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value; empty values are ignored.
    pub fn add(&mut self, facet: Facet, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.entries.push((facet, value));
        }
    }

    /// Copy with every value of `facet` replaced by `value`, placed where the
    /// first old value was (or appended).
    pub fn with_replaced(&self, facet: Facet, value: &str) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        let mut placed = false;
        for (f, v) in &self.entries {
            if *f == facet {
                if !placed {
                    entries.push((facet, value.to_string()));
                    placed = true;
                }
            } else {
                entries.push((*f, v.clone()));
            }
        }
        if !placed {
            entries.push((facet, value.to_string()));
        }
        ConstraintSet { entries }
    }

    /// First value of a facet.
    pub fn get(&self, facet: Facet) -> Option<&str> {
        self.entries
            .iter()
            .find(|(f, _)| *f == facet)
            .map(|(_, v)| v.as_str())
    }

    /// All values of a facet in insertion order.
    pub fn get_all(&self, facet: Facet) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(f, _)| *f == facet)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Facet, &str)> {
        self.entries.iter().map(|(f, v)| (*f, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(name, value)` pairs for the search index.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(f, v)| (f.name().to_string(), v.clone()))
            .collect()
    }
}

/// Build constraints from optional facet values. Each present, non-empty
/// scalar adds one entry; `models` adds one `model` entry per element.
pub fn build_constraints<S: AsRef<str>>(
    project: Option<&str>,
    models: &[S],
    variable: Option<&str>,
    cmor_table: Option<&str>,
    experiment: Option<&str>,
    ensemble: Option<&str>,
) -> ConstraintSet {
    let mut constraints = ConstraintSet::new();
    if let Some(project) = project {
        constraints.add(Facet::Project, project);
    }
    for model in models {
        constraints.add(Facet::Model, model.as_ref());
    }
    if let Some(variable) = variable {
        constraints.add(Facet::Variable, variable);
    }
    if let Some(cmor_table) = cmor_table {
        constraints.add(Facet::CmorTable, cmor_table);
    }
    if let Some(experiment) = experiment {
        constraints.add(Facet::Experiment, experiment);
    }
    if let Some(ensemble) = ensemble {
        constraints.add(Facet::Ensemble, ensemble);
    }

    debug!(constraints = ?constraints.to_query_pairs(), "constraints");
    constraints
}
