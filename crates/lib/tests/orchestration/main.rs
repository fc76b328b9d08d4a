//! End-to-end tests: descriptors in, artifacts and reports out.

mod build_tests;
mod common;
mod livecheck_tests;
mod resolve_tests;
