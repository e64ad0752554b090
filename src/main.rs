//! staticpack CLI
//!
//! Builds one statically linked executable from `staticpack.toml`, or from
//! the built-in OCR service manifest when no manifest is present.

use clap::Parser;
use console::style;
use staticpack::{
    BuildProgress, Manifest, PackConfig, PackError, PackResult, Pipeline, PipelineReport,
    MANIFEST_FILE,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Package a Python service into one statically linked executable
#[derive(Parser, Debug)]
#[command(name = "staticpack", version, about)]
struct Cli {
    /// Manifest file (default: ./staticpack.toml, else the built-in manifest)
    #[arg(short, long, env = "STATICPACK_CONFIG")]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format: text (default) or json
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Print the resolved manifest as TOML and exit
    #[arg(long)]
    print_manifest: bool,

    /// Keep the per-run installation directory
    #[arg(long)]
    keep_environment: bool,
}

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "staticpack=info",
        1 => "staticpack=debug",
        _ => "staticpack=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

/// Manifest plus the directory its relative paths resolve against
fn load_manifest(cli: &Cli) -> PackResult<(Manifest, PathBuf)> {
    let cwd = std::env::current_dir()?;

    let path = match cli.config {
        Some(ref path) => Some(path.clone()),
        None => Manifest::find_in_dir(&cwd),
    };

    match path {
        Some(path) => {
            tracing::info!("Using manifest {}", path.display());
            let manifest = Manifest::from_file(&path)?;
            let base_dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cwd.clone());
            Ok((manifest, base_dir))
        }
        None => {
            tracing::info!("No {} found, using the built-in manifest", MANIFEST_FILE);
            Ok((Manifest::builtin(), cwd))
        }
    }
}

fn print_summary(report: &PipelineReport) {
    eprintln!();
    eprintln!(
        "{} {} ({:.1} MB)",
        style("✓ Built").green().bold(),
        style(report.output.path.display()).cyan(),
        report.output.size as f64 / (1024.0 * 1024.0)
    );
    eprintln!(
        "  {} packages, {} native binaries patched and restored",
        report.installed.len(),
        report.restore.restored
    );
    if let Some(ref env) = report.environment {
        eprintln!("  installation directory: {}", env.display());
    }
    if !report.warnings.is_empty() {
        eprintln!(
            "  {}",
            style(format!("{} warnings", report.warnings.len())).yellow()
        );
        for warning in &report.warnings {
            eprintln!("    - {}", warning);
        }
    }
}

fn run(cli: &Cli) -> PackResult<()> {
    let (manifest, base_dir) = load_manifest(cli)?;

    if cli.print_manifest {
        manifest.validate()?;
        print!("{}", manifest.to_toml_string()?);
        return Ok(());
    }

    let config = PackConfig::from_manifest(&manifest, &base_dir)?
        .with_keep_environment(cli.keep_environment);

    let progress = if cli.log_format == LogFormat::Text {
        BuildProgress::new()
    } else {
        BuildProgress::hidden()
    };

    let report = Pipeline::new(config).with_progress(progress).run()?;
    print_summary(&report);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", style("✗ Error:").red().bold(), err);
            exit_code(&err)
        }
    }
}

fn exit_code(err: &PackError) -> ExitCode {
    let code = err.exit_code();
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
