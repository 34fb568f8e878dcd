#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use emerge::config::{SheetSelector, StudyConfig};
use emerge::model::SpecOutcome;
use emerge::pipeline::{StudyError, inspect, run_study};

#[derive(Args)]
pub struct StudyArgs {
    /// Optional TOML configuration file; flags below override its values
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Input spreadsheet (.xlsx/.xlsm/.xls/.ods) or delimited file (.csv/.tsv)
    #[arg(long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Worksheet to read, by zero-based index or by name
    #[arg(long, value_name = "SHEET")]
    pub sheet: Option<SheetSelector>,

    /// Directory for all output artifacts (created if absent)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Winsorization quantile for the financial ratios
    #[arg(long)]
    pub cap_quantile: Option<f64>,

    /// Maximum number of Fisher scoring iterations per model
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Relative deviance change below which a fit is considered converged
    #[arg(long)]
    pub convergence_tolerance: Option<f64>,
}

#[derive(Parser)]
#[command(
    name = "emerge",
    about = "Nested logistic regressions of bankruptcy reorganization outcomes",
    long_about = "Builds a cleaned modeling sample from a spreadsheet of bankruptcy-filing \
                 features, fits four nested logistic regressions on one shared sample and \
                 writes coefficient tables, odds ratios and likelihood-ratio tests."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare the sample, fit all nested models and write every artifact
    Run(StudyArgs),
    /// Prepare the sample only and write the missing-value report
    Inspect(StudyArgs),
    /// Print version information
    Version,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("No input file given. Use --input or set `input` in the configuration file.")]
    MissingInput,
    #[error("No output directory given. Use --output-dir or set `output_dir` in the configuration file.")]
    MissingOutputDir,
    #[error(transparent)]
    Study(#[from] StudyError),
}

fn resolve_config(args: StudyArgs) -> Result<StudyConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => Some(StudyConfig::from_toml_file(path).map_err(StudyError::from)?),
        None => None,
    };
    if let Some(input) = args.input {
        match config.as_mut() {
            Some(c) => c.input = input,
            None => {
                let output_dir = args
                    .output_dir
                    .clone()
                    .ok_or(CliError::MissingOutputDir)?;
                config = Some(StudyConfig::new(input, output_dir));
            }
        }
    }
    let mut config = config.ok_or(CliError::MissingInput)?;
    if let Some(output_dir) = args.output_dir {
        config.output_dir = output_dir;
    }
    if let Some(sheet) = args.sheet {
        config.sheet = sheet;
    }
    if let Some(q) = args.cap_quantile {
        config.cap_quantile = q;
    }
    if let Some(n) = args.max_iterations {
        config.max_iterations = n;
    }
    if let Some(tol) = args.convergence_tolerance {
        config.convergence_tolerance = tol;
    }
    config.validate().map_err(StudyError::from)?;
    Ok(config)
}

fn run(args: StudyArgs) -> Result<(), CliError> {
    let config = resolve_config(args)?;
    let (results, written) = run_study(&config)?;
    for outcome in &results.outcomes {
        match outcome {
            SpecOutcome::Fitted(model) => println!(
                "{:<28} n = {:<6} AIC = {:>10.3}{}",
                model.name,
                model.fit.nobs,
                model.fit.aic,
                if model.fit.converged { "" } else { "  (not converged)" }
            ),
            SpecOutcome::Skipped { name, absent } => {
                println!("{name:<28} skipped (absent: {})", absent.join(", "))
            }
        }
    }
    println!(
        "{} artifact(s) written to {}",
        written.paths.len(),
        config.output_dir.display()
    );
    Ok(())
}

fn run_inspect(args: StudyArgs) -> Result<(), CliError> {
    let config = resolve_config(args)?;
    let (sample, path) = inspect(&config)?;
    println!(
        "Analysis sample: {} rows; predictors kept: {}",
        sample.frame.nrows(),
        sample.frame.names().join(", ")
    );
    if !sample.dropped.is_empty() {
        println!("Degenerate predictors dropped: {}", sample.dropped.join(", "));
    }
    for entry in sample.na_report.iter().filter(|e| e.na_count > 0) {
        println!("  {:<24} {} missing", entry.var, entry.na_count);
    }
    println!("Missing-value report written to {}", path.display());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Run(args)) => run(args),
        Some(Commands::Inspect(args)) => run_inspect(args),
        Some(Commands::Version) => {
            println!("emerge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => {
            let _ = Cli::command().print_help();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
