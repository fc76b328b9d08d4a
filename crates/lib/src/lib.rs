//! cellar-lib: formula build orchestration.
//!
//! The pieces, in the order a build flows through them:
//! - `formula`: descriptors parsed and validated into a `FormulaRegistry`,
//!   resolved per platform into a `FormulaView`
//! - `resolve`: the dependency graph and its topological build plan
//! - `execute`: the `BuildExecutor` that fetches, builds or pours each node
//! - `cache`: the content-addressed `ArtifactCache` of finished artifacts
//! - `test_runner`: verification steps run against a finished artifact
//! - `livecheck`: independent discovery of newer upstream versions

pub mod cache;
pub mod consts;
pub mod execute;
pub mod formula;
pub mod gc;
pub mod livecheck;
pub mod placeholder;
pub mod platform;
pub mod resolve;
pub mod store_lock;
pub mod test_runner;
pub mod util;
