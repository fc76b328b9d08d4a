mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cellar_lib::formula::{RegistryError, ValidationError};
use cellar_lib::platform::PlatformParseError;
use cellar_lib::resolve::{CycleError, ResolveError};

use crate::output::{OutputFormat, print_error};

/// Exit code for descriptor, resolution and usage errors.
const EXIT_INVALID: u8 = 2;

#[derive(Parser)]
#[command(name = "cellar")]
#[command(about = "Build, test and track formula-described software")]
#[command(version)]
struct Cli {
  /// Directory of formula descriptors
  #[arg(long, global = true, env = "CELLAR_FORMULA_DIR", default_value = "Formula")]
  formula_dir: PathBuf,

  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build formulas and their dependencies, then run their tests
  Build {
    /// Formulas to build
    #[arg(required = true)]
    formulas: Vec<String>,

    /// Target platform such as x86_64-linux or arm64_sonoma (defaults to the host)
    #[arg(long)]
    platform: Option<String>,

    /// Maximum number of concurrent builds
    #[arg(short, long, env = "CELLAR_JOBS")]
    jobs: Option<usize>,

    /// Upper bound for every install and test step (e.g. "10m")
    #[arg(long, env = "CELLAR_STEP_TIMEOUT")]
    step_timeout: Option<humantime::Duration>,

    /// Skip test steps
    #[arg(long)]
    no_test: bool,

    /// Ignore bottles and always build from source
    #[arg(long)]
    build_from_source: bool,

    /// Base URL bottles are fetched from
    #[arg(long, env = "CELLAR_BOTTLE_MIRROR")]
    bottle_mirror: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Check upstream for newer versions
  Livecheck {
    /// Formulas to check
    #[arg(required_unless_present = "all")]
    formulas: Vec<String>,

    /// Check every formula in the formula directory
    #[arg(long, conflicts_with = "formulas")]
    all: bool,

    /// Maximum number of concurrent checks
    #[arg(short, long, env = "CELLAR_JOBS")]
    jobs: Option<usize>,

    /// Per-formula deadline (e.g. "30s")
    #[arg(long)]
    timeout: Option<humantime::Duration>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Show a formula as resolved for a platform, with its build order
  Info {
    /// Formula to show
    formula: String,

    /// Target platform (defaults to the host)
    #[arg(long)]
    platform: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Remove superseded build records and unreferenced artifacts
  Gc {
    /// Show what would be removed without removing it
    #[arg(long)]
    dry_run: bool,

    /// Superseded records younger than this many days are kept
    #[arg(long, default_value_t = 30)]
    keep_days: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .with_target(false)
    .init();

  let result = match cli.command {
    Commands::Build {
      formulas,
      platform,
      jobs,
      step_timeout,
      no_test,
      build_from_source,
      bottle_mirror,
      output,
    } => cmd::cmd_build(
      &cli.formula_dir,
      &formulas,
      cmd::BuildArgs {
        platform,
        jobs,
        step_timeout: step_timeout.map(Into::into),
        no_test,
        build_from_source,
        bottle_mirror,
      },
      output,
    ),
    Commands::Livecheck {
      formulas,
      all,
      jobs,
      timeout,
      output,
    } => cmd::cmd_livecheck(&cli.formula_dir, &formulas, all, jobs, timeout.map(Into::into), output),
    Commands::Info {
      formula,
      platform,
      output,
    } => cmd::cmd_info(&cli.formula_dir, &formula, platform.as_deref(), output).map(|()| 0),
    Commands::Gc {
      dry_run,
      keep_days,
      output,
    } => cmd::cmd_gc(dry_run, keep_days, output).map(|()| 0),
  };

  match result {
    Ok(code) => ExitCode::from(code),
    Err(err) => {
      print_error(&format!("Error: {err:#}"));
      ExitCode::from(exit_code_for(&err))
    }
  }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
  let invalid = err.chain().any(|e| {
    e.is::<ResolveError>()
      || e.is::<RegistryError>()
      || e.is::<ValidationError>()
      || e.is::<CycleError>()
      || e.is::<PlatformParseError>()
  });
  if invalid { EXIT_INVALID } else { 1 }
}
