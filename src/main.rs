mod config;
mod error;
mod preflight;
mod process;
mod runner;
mod shutdown;
mod signals;

use clap::Parser;
use config::{LauncherConfig, Overrides};
use error::LaunchError;
use process::OsLauncher;
use runner::{ChildState, LaunchPlan, Runner};
use signals::SignalHandler;
use std::path::{Path, PathBuf};

/// Launch a companion script under a runtime (node by default): validate
/// config, check the runtime and script exist, stream the child's output,
/// and stop it gracefully on Ctrl-C.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,

    /// API endpoint passed to the companion script (overrides config)
    #[arg(long)]
    endpoint: Option<String>,

    /// Target group name passed to the companion script (overrides config)
    #[arg(long)]
    group: Option<String>,

    /// Companion script path (overrides config)
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Runtime executable (overrides config)
    #[arg(long)]
    runtime: Option<String>,

    /// Seconds to wait after SIGTERM before killing the child (overrides config)
    #[arg(long, value_name = "SECS")]
    grace_period: Option<u64>,

    /// Don't ask for confirmation when the example endpoint is configured
    #[arg(short, long)]
    yes: bool,

    /// Write a template config file and exit
    #[arg(long)]
    init: bool,

    /// Validate config and run preflight checks, don't launch
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (probe output, signal handling)
    #[arg(short, long)]
    verbose: bool,

    /// Suppress the banner and info logs, only errors and warnings
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    tracing::debug!(?cli, "parsed CLI arguments");

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "launcher failed");
            eprintln!("Error: {e}");
            if let Some(hint) = e.remediation() {
                eprintln!("{hint}");
            }
            e.exit_code()
        }
    };
    std::process::exit(code);
}

/// Logs go to stderr; stdout belongs to the child.
fn init_logging(verbose: bool, quiet: bool) {
    let default_filter = if verbose {
        "warden=debug"
    } else if quiet {
        "warden=warn"
    } else {
        "warden=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<i32, LaunchError> {
    if cli.init {
        return init(&cli.config);
    }

    let mut launcher_config = LauncherConfig::load(&cli.config)?;
    launcher_config.apply_overrides(Overrides {
        endpoint: cli.endpoint,
        group: cli.group,
        script: cli.script,
        runtime: cli.runtime,
        grace_period_secs: cli.grace_period,
    });
    let configuration = launcher_config.validate()?;

    if configuration.uses_example_endpoint() && !cli.yes && !cli.dry_run {
        config::confirm_example_endpoint(&configuration, &mut std::io::stdin().lock())?;
    }

    let base_dir = config_dir(&cli.config);
    let plan = LaunchPlan {
        runtime: launcher_config.runtime.clone(),
        script: launcher_config.script_path(&base_dir),
        configuration,
        working_dir: base_dir,
    };
    let mut runner = Runner::new(OsLauncher, launcher_config.grace_period());

    if cli.dry_run {
        let spec = runner.preflight(&plan).await?;
        println!("Dry run: preflight passed, not launching.");
        println!("Command: {} {}", spec.program, shell_words(&spec.args));
        println!("Working directory: {}", spec.working_dir.display());
        println!("Grace period: {}s", launcher_config.shutdown.grace_period_secs);
        return Ok(0);
    }

    // Installed before preflight so a Ctrl-C during the probe stops the run
    // without launching anything.
    let (_signals, mut cancel) =
        SignalHandler::install().map_err(|e| LaunchError::SignalSetup { source: e })?;

    if !cli.quiet {
        print_banner(&plan);
    }

    let outcome = runner.run(&plan, &mut cancel).await?;
    if let ChildState::Exited(report) = runner.state() {
        tracing::debug!(pid = ?outcome.pid, status = %report, "child released");
    }
    match (outcome.cancelled, outcome.pid) {
        (Some(_), None) => println!("Stopped before launching the companion process."),
        (Some(_), Some(_)) => println!("Companion process stopped."),
        (None, _) => {}
    }
    Ok(outcome.exit_code())
}

fn init(path: &Path) -> Result<i32, LaunchError> {
    match config::init_config(path) {
        Ok(true) => println!("Wrote {}. Edit [target] before launching.", path.display()),
        Ok(false) => println!("{} already exists, leaving it untouched.", path.display()),
        Err(e) => {
            return Err(LaunchError::ConfigurationInvalid {
                reason: format!("failed to write {}: {e}", path.display()),
            })
        }
    }
    Ok(0)
}

/// Directory relative script paths are resolved against.
fn config_dir(config_path: &Path) -> PathBuf {
    let dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}

fn print_banner(plan: &LaunchPlan) {
    let rule = "-".repeat(30);
    println!("Launching {} ({})", plan.script.display(), plan.runtime.command);
    println!("API endpoint: {}", plan.configuration.endpoint);
    println!("Target group: {}", plan.configuration.target_name);
    println!("{rule}");
    println!("Watch for the login code below and scan it when it appears.");
    println!("Press Ctrl+C to stop.");
    println!("{rule}");
}

fn shell_words(args: &[String]) -> String {
    args.iter()
        .map(|a| {
            if a.is_empty() || a.contains(char::is_whitespace) {
                format!("'{}'", a.replace('\'', "'\\''"))
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
