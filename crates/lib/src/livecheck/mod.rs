//! Upstream version discovery.
//!
//! Each formula is probed with one strategy: a page scraped with a regex, the
//! tags of a git remote, or a JSON/XML payload reduced by a declarative
//! [`pipeline`]. The greatest candidate under [`Version`] ordering is compared
//! with the declared version. Probing never writes anything, and a failing
//! formula only affects its own result.

pub mod pipeline;
mod version;
mod xml;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::consts::APP_NAME;
use crate::formula::{Formula, Livecheck, LivecheckSource, LivecheckStrategy, SourceRef};
use pipeline::Op;
pub use version::Version;

/// Tag pattern used when a git source is probed without an explicit regex.
pub const DEFAULT_TAG_REGEX: &str = r"^v?(\d+(?:\.\d+)+)$";

#[derive(Debug, Error)]
pub enum LivecheckError {
  #[error("failed to create HTTP client: {0}")]
  Client(String),

  #[error("failed to fetch {url}: {message}")]
  Fetch { url: String, message: String },

  #[error("failed to parse response from {url}: {message}")]
  Parse { url: String, message: String },

  #[error("git ls-remote {url} failed: {message}")]
  Git { url: String, message: String },

  #[error("invalid regex '{pattern}': {message}")]
  Regex { pattern: String, message: String },
}

#[derive(Debug, Clone)]
pub struct LivecheckConfig {
  /// Formulas probed at once.
  pub jobs: usize,
  /// Budget for one formula, all requests included.
  pub timeout: Duration,
  pub user_agent: String,
}

impl Default for LivecheckConfig {
  fn default() -> Self {
    Self {
      jobs: 8,
      timeout: Duration::from_secs(30),
      user_agent: format!("{APP_NAME}/{}", env!("CARGO_PKG_VERSION")),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LivecheckStatus {
  UpToDate,
  Outdated,
  NewerThanUpstream,
  NoCandidates,
  Unreachable,
  Skipped,
}

impl fmt::Display for LivecheckStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::UpToDate => "up to date",
      Self::Outdated => "outdated",
      Self::NewerThanUpstream => "newer than upstream",
      Self::NoCandidates => "no candidates",
      Self::Unreachable => "unreachable",
      Self::Skipped => "skipped",
    })
  }
}

/// What a probe found for one formula.
#[derive(Debug, Clone, Serialize)]
pub struct LivecheckResult {
  pub formula: String,
  pub declared: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub latest: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub candidates: Vec<String>,
  pub status: LivecheckStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub strategy: Option<LivecheckStrategy>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  /// Skip reason or failure detail.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

impl LivecheckResult {
  fn new(formula: &Formula, status: LivecheckStatus) -> Self {
    Self {
      formula: formula.name.clone(),
      declared: formula.version.clone(),
      latest: None,
      candidates: Vec::new(),
      status,
      strategy: None,
      url: None,
      message: None,
    }
  }

  fn with_message(mut self, message: impl Into<String>) -> Self {
    self.message = Some(message.into());
    self
  }
}

/// A fully resolved probe.
#[derive(Debug)]
struct Probe<'a> {
  strategy: LivecheckStrategy,
  url: &'a str,
  regex: Option<&'a str>,
  pipeline: &'a [Op],
}

enum Target<'a> {
  Probe(Probe<'a>),
  Skip(String),
}

/// Work out what to probe for `formula`. Without a livecheck block, git and
/// head sources are probed for tags; anything else is skipped.
fn target(formula: &Formula) -> Target<'_> {
  match &formula.livecheck {
    Some(Livecheck::Skip(reason)) => Target::Skip(reason.clone()),
    Some(Livecheck::Check(spec)) => {
      let url = match &spec.source {
        LivecheckSource::Stable => formula.source.location(),
        LivecheckSource::Head => match &formula.head {
          Some(head) => head.repository.as_str(),
          None => return Target::Skip("no head source declared".to_string()),
        },
        LivecheckSource::Url(url) => url.as_str(),
      };
      Target::Probe(Probe {
        strategy: spec.strategy,
        url,
        regex: spec.regex.as_deref(),
        pipeline: &spec.pipeline,
      })
    }
    None => match &formula.source {
      SourceRef::Git { repository, .. } | SourceRef::Head { repository, .. } => Target::Probe(Probe {
        strategy: LivecheckStrategy::Git,
        url: repository,
        regex: None,
        pipeline: &[],
      }),
      SourceRef::Url { .. } => Target::Skip("no livecheck block and no git source to infer one from".to_string()),
    },
  }
}

/// Probes upstream sources. Cheap to clone; clones share the HTTP client.
#[derive(Debug, Clone)]
pub struct LivecheckService {
  client: reqwest::Client,
  config: LivecheckConfig,
}

impl LivecheckService {
  pub fn new(config: LivecheckConfig) -> Result<Self, LivecheckError> {
    let client = reqwest::Client::builder()
      .user_agent(config.user_agent.clone())
      .timeout(config.timeout)
      .build()
      .map_err(|e| LivecheckError::Client(e.to_string()))?;
    Ok(Self { client, config })
  }

  pub fn config(&self) -> &LivecheckConfig {
    &self.config
  }

  /// Probe one formula. Failures are reported in the result, never raised.
  pub async fn check(&self, formula: &Formula) -> LivecheckResult {
    let probe = match target(formula) {
      Target::Probe(probe) => probe,
      Target::Skip(reason) => {
        debug!(formula = %formula.name, %reason, "livecheck skipped");
        return LivecheckResult::new(formula, LivecheckStatus::Skipped).with_message(reason);
      }
    };

    let mut result = LivecheckResult::new(formula, LivecheckStatus::NoCandidates);
    result.strategy = Some(probe.strategy);
    result.url = Some(probe.url.to_string());

    let candidates = match tokio::time::timeout(self.config.timeout, self.candidates(&probe)).await {
      Ok(Ok(candidates)) => candidates,
      Ok(Err(e)) => {
        warn!(formula = %formula.name, error = %e, "upstream unreachable");
        result.status = LivecheckStatus::Unreachable;
        return result.with_message(e.to_string());
      }
      Err(_) => {
        warn!(formula = %formula.name, timeout = ?self.config.timeout, "livecheck timed out");
        result.status = LivecheckStatus::Unreachable;
        return result.with_message(format!("timed out after {:?}", self.config.timeout));
      }
    };

    let (status, latest) = classify(&formula.version, &candidates);
    info!(formula = %formula.name, %status, latest = latest.as_deref().unwrap_or("-"), "livecheck");
    result.status = status;
    result.latest = latest;
    result.candidates = candidates;
    result
  }

  /// Probe every formula with at most `jobs` in flight. Results come back in
  /// input order.
  pub async fn check_all(&self, formulas: &[Formula]) -> Vec<LivecheckResult> {
    let semaphore = Arc::new(Semaphore::new(self.config.jobs.max(1)));
    let mut set = JoinSet::new();
    for (index, formula) in formulas.iter().cloned().enumerate() {
      let service = self.clone();
      let semaphore = Arc::clone(&semaphore);
      set.spawn(async move {
        let _permit = semaphore.acquire_owned().await;
        (index, service.check(&formula).await)
      });
    }

    let mut results: Vec<Option<LivecheckResult>> = formulas.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
      match joined {
        Ok((index, result)) => results[index] = Some(result),
        Err(e) => warn!(error = %e, "livecheck task failed"),
      }
    }

    results
      .into_iter()
      .zip(formulas)
      .map(|(result, formula)| {
        result.unwrap_or_else(|| {
          LivecheckResult::new(formula, LivecheckStatus::Unreachable).with_message("livecheck task panicked")
        })
      })
      .collect()
  }

  async fn candidates(&self, probe: &Probe<'_>) -> Result<Vec<String>, LivecheckError> {
    let regex = probe.regex.map(compile).transpose()?;
    let found = match probe.strategy {
      LivecheckStrategy::Regex => {
        let page = self.fetch_text(probe.url).await?;
        match &regex {
          Some(re) => captures(re, &page),
          None => Vec::new(),
        }
      }
      LivecheckStrategy::Git => {
        let tags = ls_remote_tags(probe.url).await?;
        let re = match regex {
          Some(re) => re,
          None => compile(DEFAULT_TAG_REGEX)?,
        };
        tags.iter().flat_map(|tag| captures(&re, tag)).collect()
      }
      LivecheckStrategy::Json | LivecheckStrategy::Xml => {
        let text = self.fetch_text(probe.url).await?;
        let parse_err = |message: String| LivecheckError::Parse {
          url: probe.url.to_string(),
          message,
        };
        let value = if probe.strategy == LivecheckStrategy::Json {
          serde_json::from_str(&text).map_err(|e| parse_err(e.to_string()))?
        } else {
          xml::to_value(&text).map_err(|e| parse_err(e.to_string()))?
        };
        let strings = pipeline::strings(&pipeline::apply(probe.pipeline, value));
        match &regex {
          Some(re) => strings.iter().flat_map(|s| captures(re, s)).collect(),
          None => strings,
        }
      }
    };
    Ok(dedup(found))
  }

  async fn fetch_text(&self, url: &str) -> Result<String, LivecheckError> {
    let fetch_err = |message: String| LivecheckError::Fetch {
      url: url.to_string(),
      message,
    };

    if let Some(path) = url.strip_prefix("file://") {
      return tokio::fs::read_to_string(path)
        .await
        .map_err(|e| fetch_err(e.to_string()));
    }

    debug!(%url, "fetching");
    let response = self.client.get(url).send().await.map_err(|e| fetch_err(e.to_string()))?;
    if !response.status().is_success() {
      return Err(fetch_err(format!("HTTP {}", response.status())));
    }
    response.text().await.map_err(|e| fetch_err(e.to_string()))
  }
}

fn compile(pattern: &str) -> Result<Regex, LivecheckError> {
  Regex::new(pattern).map_err(|e| LivecheckError::Regex {
    pattern: pattern.to_string(),
    message: e.to_string(),
  })
}

/// First capture group of every match, or the whole match when the pattern
/// has no groups.
fn captures(re: &Regex, text: &str) -> Vec<String> {
  re.captures_iter(text)
    .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
    .map(|m| m.as_str().to_string())
    .filter(|s| !s.is_empty())
    .collect()
}

fn dedup(candidates: Vec<String>) -> Vec<String> {
  let mut seen = HashSet::new();
  candidates.into_iter().filter(|c| seen.insert(c.clone())).collect()
}

/// Compare `declared` with the greatest candidate.
fn classify(declared: &str, candidates: &[String]) -> (LivecheckStatus, Option<String>) {
  let Some(latest) = version::latest(candidates.iter().map(String::as_str)) else {
    return (LivecheckStatus::NoCandidates, None);
  };
  let status = match Version::parse(declared) {
    Some(current) => match current.cmp(&latest) {
      std::cmp::Ordering::Less => LivecheckStatus::Outdated,
      std::cmp::Ordering::Equal => LivecheckStatus::UpToDate,
      std::cmp::Ordering::Greater => LivecheckStatus::NewerThanUpstream,
    },
    // HEAD-only formulas have nothing to compare against.
    None => LivecheckStatus::Outdated,
  };
  (status, Some(latest.to_string()))
}

async fn ls_remote_tags(url: &str) -> Result<Vec<String>, LivecheckError> {
  debug!(%url, "listing remote tags");
  let output = Command::new("git")
    .args(["ls-remote", "--tags", url])
    .env("GIT_TERMINAL_PROMPT", "0")
    .stdin(std::process::Stdio::null())
    .kill_on_drop(true)
    .output()
    .await
    .map_err(|e| LivecheckError::Git {
      url: url.to_string(),
      message: e.to_string(),
    })?;
  if !output.status.success() {
    return Err(LivecheckError::Git {
      url: url.to_string(),
      message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    });
  }
  Ok(parse_ls_remote(&String::from_utf8_lossy(&output.stdout)))
}

/// Tag names from `git ls-remote --tags` output, peeled `^{}` entries folded
/// into their tag.
fn parse_ls_remote(output: &str) -> Vec<String> {
  let tags = output
    .lines()
    .filter_map(|line| line.split_once('\t'))
    .filter_map(|(_, reference)| reference.strip_prefix("refs/tags/"))
    .map(|tag| tag.trim_end_matches("^{}").to_string())
    .collect();
  dedup(tags)
}
