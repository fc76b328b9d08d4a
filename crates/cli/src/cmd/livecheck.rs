use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use cellar_lib::formula::Formula;
use cellar_lib::livecheck::{LivecheckConfig, LivecheckResult, LivecheckService, LivecheckStatus};
use cellar_lib::platform::paths::CellarPaths;
use cellar_lib::resolve::ResolveError;

use crate::output::{OutputFormat, format_duration, print_json, print_stat, symbols};

pub fn cmd_livecheck(
  formula_dir: &Path,
  names: &[String],
  all: bool,
  jobs: Option<usize>,
  timeout: Option<Duration>,
  output: OutputFormat,
) -> Result<u8> {
  let start = Instant::now();
  let paths = CellarPaths::from_env();
  let registry = super::load_registry(formula_dir, &paths)?;

  let formulas: Vec<Formula> = if all {
    registry.formulas().to_vec()
  } else {
    names
      .iter()
      .map(|name| {
        registry
          .get(name)
          .cloned()
          .ok_or_else(|| ResolveError::UnknownFormula(name.clone()))
      })
      .collect::<Result<_, _>>()?
  };

  let mut config = LivecheckConfig::default();
  if let Some(jobs) = jobs {
    config.jobs = jobs.max(1);
  }
  if let Some(timeout) = timeout {
    config.timeout = timeout;
  }
  let service = LivecheckService::new(config).context("Failed to create livecheck client")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let results = rt.block_on(service.check_all(&formulas));

  if output.is_json() {
    print_json(&results)?;
  } else {
    for result in &results {
      print_result(result);
    }
    println!();
    let outdated = results.iter().filter(|r| r.status == LivecheckStatus::Outdated).count();
    print_stat("Checked", &results.len().to_string());
    print_stat("Outdated", &outdated.to_string());
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(0)
}

fn print_result(result: &LivecheckResult) {
  let latest = result.latest.as_deref().unwrap_or("?");
  let line = format!("{} : {} {} {}", result.formula, result.declared, symbols::ARROW, latest);
  match result.status {
    LivecheckStatus::UpToDate => {
      println!("{}", line.if_supports_color(Stream::Stdout, |s| s.green()));
    }
    LivecheckStatus::Outdated => {
      println!("{}", line.if_supports_color(Stream::Stdout, |s| s.yellow()));
    }
    LivecheckStatus::NewerThanUpstream => {
      println!("{} ({})", line.if_supports_color(Stream::Stdout, |s| s.cyan()), result.status);
    }
    LivecheckStatus::NoCandidates | LivecheckStatus::Unreachable | LivecheckStatus::Skipped => {
      let detail = match &result.message {
        Some(message) => format!("{}: {message}", result.status),
        None => result.status.to_string(),
      };
      println!(
        "{} : {}",
        result.formula,
        detail.if_supports_color(Stream::Stdout, |s| s.dimmed())
      );
    }
  }
}
