//! Namelist templates and the configuration generator.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use tracing::{debug, info};

use crate::constraints::{ConstraintSet, Facet};
use crate::error::{ConfigurationError, PipelineError, Result};
use crate::time_range::TimeRange;
use crate::workspace::Workspace;

const PERFMETRICS: &str = include_str!("../templates/namelist_perfmetrics.xml");
const SURFCONPLOT: &str = include_str!("../templates/namelist_surfconplot.xml");
const MYDIAG: &str = include_str!("../templates/namelist_mydiag.xml");

/// Namelist templates keyed by diagnostic name.
///
/// Rendering is strict: a template referring to a name that is not in the
/// context fails instead of rendering an empty string.
#[derive(Debug)]
pub struct TemplateCatalog {
    env: Environment<'static>,
    templates: BTreeMap<String, String>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::empty()
    }
}

impl TemplateCatalog {
    pub fn empty() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self {
            env,
            templates: BTreeMap::new(),
        }
    }

    /// Catalog with the namelists shipped in this crate.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for (name, source) in [
            ("perfmetrics", PERFMETRICS),
            ("surfconplot", SURFCONPLOT),
            ("mydiag", MYDIAG),
        ] {
            catalog.templates.insert(name.to_string(), source.to_string());
        }
        catalog
    }

    /// Builtin templates plus every `namelist_<diag>.xml` in `dir`; files in
    /// `dir` replace builtins of the same name.
    pub fn from_dir(dir: &Path) -> std::result::Result<Self, ConfigurationError> {
        let load_err = |reason: String| ConfigurationError::Load {
            path: dir.to_path_buf(),
            reason,
        };

        let mut catalog = Self::builtin();
        let entries = fs::read_dir(dir).map_err(|e| load_err(e.to_string()))?;
        for entry in entries {
            let path = entry.map_err(|e| load_err(e.to_string()))?.path();
            let Some(name) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("namelist_"))
                .and_then(|n| n.strip_suffix(".xml"))
            else {
                continue;
            };
            let source = fs::read_to_string(&path).map_err(|e| ConfigurationError::Load {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            debug!(diagnostic = name, path = %path.display(), "loaded namelist template");
            catalog
                .register(name, source)
                .map_err(|e| load_err(e.to_string()))?;
        }
        Ok(catalog)
    }

    /// Add or replace a template. The source is syntax-checked here.
    pub fn register(&mut self, name: &str, source: impl Into<String>) -> Result<()> {
        let source = source.into();
        Environment::new()
            .template_from_str(&source)
            .map(|_| ())
            .map_err(|e| PipelineError::Render {
                diagnostic: name.to_string(),
                reason: e.to_string(),
            })?;
        self.templates.insert(name.to_string(), source);
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Render the template for `name`.
    pub fn render<S: Serialize>(&self, name: &str, context: S) -> Result<String> {
        let source = self
            .templates
            .get(name)
            .ok_or_else(|| PipelineError::TemplateNotFound {
                diagnostic: name.to_string(),
            })?;
        self.env
            .render_str(source, context)
            .map_err(|e| PipelineError::Render {
                diagnostic: name.to_string(),
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Serialize)]
struct NamelistContext<'a> {
    diag: &'a str,
    prefix: String,
    workspace: String,
    obs_root: String,
    constraints: BTreeMap<&'static str, Vec<&'a str>>,
    project: Option<&'a str>,
    models: Vec<&'a str>,
    variable: Option<&'a str>,
    cmor_table: Option<&'a str>,
    experiment: Option<&'a str>,
    ensemble: Option<&'a str>,
    start_year: i32,
    end_year: i32,
    output_format: &'a str,
}

/// Renders a diagnostic's namelist into the workspace.
#[derive(Debug)]
pub struct NamelistGenerator {
    catalog: TemplateCatalog,
    prefix: PathBuf,
    obs_root: PathBuf,
}

impl NamelistGenerator {
    /// `prefix` is the analysis tool installation root.
    pub fn new(catalog: TemplateCatalog, prefix: impl Into<PathBuf>, obs_root: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            prefix: prefix.into(),
            obs_root: obs_root.into(),
        }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Render and write `namelist.xml`, replacing any previous content.
    /// Returns the path of the written file.
    pub fn generate(
        &self,
        diagnostic: &str,
        workspace: &Workspace,
        constraints: &ConstraintSet,
        time_range: &TimeRange,
        output_format: &str,
    ) -> Result<PathBuf> {
        info!(diag = diagnostic, "generate namelist");

        let mut by_facet: BTreeMap<&'static str, Vec<&str>> = BTreeMap::new();
        for (facet, value) in constraints.iter() {
            by_facet.entry(facet.name()).or_default().push(value);
        }

        let context = NamelistContext {
            diag: diagnostic,
            prefix: self.prefix.display().to_string(),
            workspace: workspace.root().display().to_string(),
            obs_root: self.obs_root.display().to_string(),
            constraints: by_facet,
            project: constraints.get(Facet::Project),
            models: constraints.get_all(Facet::Model),
            variable: constraints.get(Facet::Variable),
            cmor_table: constraints.get(Facet::CmorTable),
            experiment: constraints.get(Facet::Experiment),
            ensemble: constraints.get(Facet::Ensemble),
            start_year: time_range.start_year,
            end_year: time_range.end_year,
            output_format,
        };

        let rendered = self.catalog.render(diagnostic, &context)?;
        debug!(namelist = %rendered, "rendered namelist");

        let path = workspace.namelist_path();
        fs::write(&path, rendered).map_err(|source| PipelineError::NamelistWrite {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}
