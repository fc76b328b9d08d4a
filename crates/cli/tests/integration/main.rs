mod build_tests;
mod common;
mod gc_tests;
mod info_tests;
mod livecheck_tests;
