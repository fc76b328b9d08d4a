//! Verification steps run against an installed artifact.
//!
//! Every run gets a fresh `testpath` under the store's tmp directory, removed
//! afterwards. The artifact itself is never written to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::execute::cmd::{self, RunError};
use crate::execute::context::StepContext;
use crate::execute::{ExecuteConfig, ExecuteError};
use crate::formula::{Assertion, FormulaView, TestStepKind};

/// Runs the test steps of platform views.
pub struct TestRunner<'a> {
  config: &'a ExecuteConfig,
  tmp_root: PathBuf,
}

impl<'a> TestRunner<'a> {
  pub fn new(config: &'a ExecuteConfig, tmp_root: impl Into<PathBuf>) -> Self {
    Self {
      config,
      tmp_root: tmp_root.into(),
    }
  }

  /// Run every test step of `view` against the artifact at `artifact`.
  ///
  /// # Arguments
  ///
  /// * `view` - The formula whose steps to run
  /// * `artifact` - The installed prefix under test
  /// * `deps` - Artifact paths of build, runtime and test dependencies
  ///
  /// # Returns
  ///
  /// The number of steps run. The first failing step aborts the run.
  pub async fn run(
    &self,
    view: &FormulaView,
    artifact: &Path,
    deps: &BTreeMap<String, PathBuf>,
  ) -> Result<usize, ExecuteError> {
    tokio::fs::create_dir_all(&self.tmp_root).await?;
    let testpath = tempfile::Builder::new()
      .prefix(&format!("{}-test-", view.name))
      .tempdir_in(&self.tmp_root)?;
    let ctx = StepContext::for_test(view, artifact, deps, testpath.path(), self.config);
    info!(formula = %view.name, steps = view.tests.len(), "running tests");

    for (index, step) in view.tests.iter().enumerate() {
      match step {
        TestStepKind::Write {
          path,
          content,
          executable,
        } => write_file(&ctx, testpath.path(), path, content, *executable).await?,
        TestStepKind::Run {
          command,
          args,
          env,
          assertion,
        } => {
          let invocation = ctx.render(command, args, env)?;
          let output = match cmd::run(&ctx, &invocation).await {
            Ok(output) => output,
            Err(RunError::Timeout(timeout)) => {
              return Err(ExecuteError::StepTimeout {
                index,
                command: invocation.display(),
                timeout,
              });
            }
            Err(e) => {
              return Err(ExecuteError::TestAssertionFailure {
                index,
                expected: describe(assertion),
                actual: e.to_string(),
              });
            }
          };
          check(index, assertion, output.code, &output.stdout)?;
          debug!(formula = %view.name, step = index, "test step passed");
        }
      }
    }

    info!(formula = %view.name, "tests passed");
    Ok(view.tests.len())
  }
}

async fn write_file(
  ctx: &StepContext,
  testpath: &Path,
  path: &str,
  content: &str,
  executable: bool,
) -> Result<(), ExecuteError> {
  let target = testpath.join(ctx.expand(path)?);
  if let Some(parent) = target.parent() {
    tokio::fs::create_dir_all(parent).await?;
  }
  tokio::fs::write(&target, ctx.expand(content)?).await?;

  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    if executable {
      tokio::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755)).await?;
    }
  }
  #[cfg(not(unix))]
  let _ = executable;

  Ok(())
}

fn describe(assertion: &Assertion) -> String {
  match assertion {
    Assertion::Exact(expected) => expected.clone(),
    Assertion::Contains(expected) => format!("output containing {expected:?}"),
    Assertion::ExitCode(code) => format!("exit code {code}"),
  }
}

/// Check one step's result against its assertion.
///
/// Output assertions also require the command to exit 0.
pub fn check(index: usize, assertion: &Assertion, code: Option<i32>, stdout: &str) -> Result<(), ExecuteError> {
  let failure = |actual: String| ExecuteError::TestAssertionFailure {
    index,
    expected: describe(assertion),
    actual,
  };

  if matches!(assertion, Assertion::Exact(_) | Assertion::Contains(_)) && code != Some(0) {
    let status = match code {
      Some(code) => format!("exit code {code}"),
      None => "terminated by signal".to_string(),
    };
    return Err(failure(format!("{status}: {}", stdout.trim())));
  }

  match assertion {
    Assertion::Exact(expected) => {
      let actual = stdout.trim();
      if actual == expected.trim() {
        Ok(())
      } else {
        Err(failure(actual.to_string()))
      }
    }
    Assertion::Contains(expected) => {
      if stdout.contains(expected.as_str()) {
        Ok(())
      } else {
        Err(failure(stdout.trim().to_string()))
      }
    }
    Assertion::ExitCode(expected) => match code {
      Some(actual) if actual == *expected => Ok(()),
      Some(actual) => Err(failure(format!("exit code {actual}"))),
      None => Err(failure("terminated by signal".to_string())),
    },
  }
}
