//! climproc - climate diagnostics and data processing CLI
//!
//! ## Commands
//!
//! - `diag`: run a diagnostic on data found in the ESGF archive
//! - `processes`: list the offered processes
//! - `cdo`: run CDO operators, sinfo and vertical interpolation
//! - `qa`: run the DKRZ CF checker, project checker or quality checker

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use climproc_core::{
    build_constraints, catalogue, Cdo, CdoOperator, ConfigStore, DiagnosticPipeline,
    DiagnosticRequest, DiagnosticSettings, FailurePolicy, Monitor, QaProject, QaTools,
    TemplateCatalog, TimeRange, VerticalOperator,
};
use esgf_client::Credentials;

#[derive(Parser)]
#[command(name = "climproc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Climate model diagnostics and data processing", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file
    #[arg(long, global = true, env = "CLIMPROC_CONFIG", default_value = "climproc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a diagnostic (perfmetrics, surfconplot, mydiag)
    Diag(DiagArgs),

    /// List the offered processes
    Processes,

    /// Climate Data Operators
    Cdo {
        /// cdo executable
        #[arg(long, env = "CLIMPROC_CDO", default_value = "cdo")]
        cdo: PathBuf,

        #[command(subcommand)]
        action: CdoAction,
    },

    /// DKRZ quality assurance checks
    Qa {
        #[command(subcommand)]
        action: QaAction,
    },
}

#[derive(clap::Args)]
struct DiagArgs {
    /// Diagnostic name
    name: String,

    #[arg(long)]
    project: Option<String>,

    /// Model name, repeatable
    #[arg(long = "model")]
    models: Vec<String>,

    #[arg(long)]
    variable: Option<String>,

    #[arg(long)]
    cmor_table: Option<String>,

    #[arg(long)]
    experiment: Option<String>,

    #[arg(long)]
    ensemble: Option<String>,

    #[arg(long)]
    start_year: i32,

    #[arg(long)]
    end_year: i32,

    /// Plot format (ps, pdf, png)
    #[arg(long = "format", default_value = "ps")]
    output_format: String,

    /// Bearer token for ESGF data nodes
    #[arg(long, env = "CLIMPROC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Directory with namelist_<diag>.xml templates overriding the builtins
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Fail when the analysis tool fails
    #[arg(long)]
    strict: bool,
}

#[derive(Subcommand)]
enum CdoAction {
    /// Apply an operator like monmax to NetCDF files
    Op {
        #[arg(value_parser = str::parse::<CdoOperator>)]
        operator: CdoOperator,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write `cdo sinfo` of each file to a report
    Sinfo {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Interpolate model levels to pressure (ml2pl) or height (ml2hl) levels
    Intvert {
        #[arg(value_parser = str::parse::<VerticalOperator>)]
        operator: VerticalOperator,

        input: PathBuf,

        /// Target level (Pa or m), repeatable
        #[arg(long = "level", required = true)]
        levels: Vec<f64>,

        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum QaAction {
    /// CF conventions check
    Cf {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, env = "CLIMPROC_CF_CHECKER", default_value = "dkrz-cf-checker")]
        checker: PathBuf,
    },

    /// Project specific checks (CORDEX, CMIP5)
    Project {
        #[arg(long, default_value = "CORDEX", value_parser = str::parse::<QaProject>)]
        project: QaProject,

        /// Archive holding <PROJECT>/...
        #[arg(long)]
        archive_path: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Working directory for qa.task and the checker results
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,

        #[arg(long, env = "CLIMPROC_QA_DKRZ", default_value = "qa-dkrz")]
        qa_dkrz: PathBuf,
    },

    /// Per-dataset quality checks; packs QA_Results/check_logs
    Check {
        #[arg(required = true)]
        datasets: Vec<PathBuf>,

        #[arg(long, default_value = "CORDEX", value_parser = str::parse::<QaProject>)]
        project: QaProject,

        /// Working directory for QA_Results and output.tar.gz
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,

        #[arg(long, env = "CLIMPROC_QA_DKRZ", default_value = "qa-dkrz")]
        qa_dkrz: PathBuf,
    },
}

/// Progress lines on stderr.
fn stderr_monitor(message: &str, percent: u8) {
    eprintln!("[{percent:>3}%] {message}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    climproc_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Diag(args) => cmd_diag(&cli.config, args).await,
        Commands::Processes => cmd_processes(),
        Commands::Cdo { cdo, action } => cmd_cdo(Cdo::new(cdo), action).await,
        Commands::Qa { action } => cmd_qa(action).await,
    }
}

fn load_config(path: &Path) -> Result<ConfigStore> {
    if path.exists() {
        ConfigStore::load(path).with_context(|| format!("Failed to load {}", path.display()))
    } else {
        warn!(path = %path.display(), "configuration file not found, using environment only");
        Ok(ConfigStore::new())
    }
}

async fn cmd_diag(config: &Path, args: DiagArgs) -> Result<()> {
    let store = load_config(config)?;
    let settings = DiagnosticSettings::from_store(&store).context("Invalid configuration")?;

    let catalog = match &args.templates {
        Some(dir) => TemplateCatalog::from_dir(dir)
            .with_context(|| format!("Failed to load templates from {}", dir.display()))?,
        None => TemplateCatalog::builtin(),
    };

    let mut pipeline = DiagnosticPipeline::from_settings(&settings, catalog)?;
    if args.strict {
        pipeline = pipeline.with_policy(FailurePolicy::Strict);
    }

    let constraints = build_constraints(
        args.project.as_deref(),
        &args.models,
        args.variable.as_deref(),
        args.cmor_table.as_deref(),
        args.experiment.as_deref(),
        args.ensemble.as_deref(),
    );
    let credentials = match args.token {
        Some(token) => Credentials::Bearer { token },
        None => Credentials::Anonymous,
    };
    let request = DiagnosticRequest::new(
        &args.name,
        constraints,
        TimeRange::new(args.start_year, args.end_year),
    )
    .with_output_format(&args.output_format)
    .with_credentials(credentials);

    let monitor = stderr_monitor;
    let result = pipeline
        .run(&request, &monitor)
        .await
        .with_context(|| format!("Diagnostic {} failed", args.name))?;

    info!(output = %result.output.display(), "diagnostic finished");
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_processes() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(catalogue())?);
    Ok(())
}

async fn cmd_cdo(cdo: Cdo, action: CdoAction) -> Result<()> {
    let monitor: &dyn Monitor = &stderr_monitor;
    let output = match action {
        CdoAction::Op {
            operator,
            inputs,
            output,
        } => cdo
            .operation(operator, &inputs, &output, monitor)
            .await
            .with_context(|| format!("cdo {operator} failed"))?,
        CdoAction::Sinfo { inputs, output } => cdo
            .sinfo_report(&inputs, &output, monitor)
            .await
            .context("cdo sinfo failed")?,
        CdoAction::Intvert {
            operator,
            input,
            levels,
            output,
        } => cdo
            .intvert(operator, &levels, &input, &output, monitor)
            .await
            .with_context(|| format!("cdo {operator} failed"))?,
    };
    println!("{}", output.display());
    Ok(())
}

async fn cmd_qa(action: QaAction) -> Result<()> {
    let monitor: &dyn Monitor = &stderr_monitor;
    let output = match action {
        QaAction::Cf {
            files,
            output,
            checker,
        } => QaTools::new(checker, "qa-dkrz")
            .cf_check_report(&files, &output, monitor)
            .await
            .context("CF check failed")?,
        QaAction::Project {
            project,
            archive_path,
            output,
            work_dir,
            qa_dkrz,
        } => QaTools::new("dkrz-cf-checker", qa_dkrz)
            .project_check_report(project, &archive_path, &work_dir, &output, monitor)
            .await
            .with_context(|| format!("{project} check failed"))?,
        QaAction::Check {
            datasets,
            project,
            work_dir,
            qa_dkrz,
        } => {
            let report = QaTools::new("dkrz-cf-checker", qa_dkrz)
                .quality_check(&datasets, project, &work_dir, monitor)
                .await
                .with_context(|| format!("{project} quality check failed"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
    };
    println!("{}", output.display());
    Ok(())
}
