//! Formula descriptors: parsing, validation, platform predicates and the
//! registry that holds them.

mod descriptor;
mod error;
mod ledger;
mod predicate;
mod registry;
mod types;
mod view;

pub use descriptor::{Descriptor, parse_descriptor};
pub use error::{RegistryError, ValidationError};
pub use ledger::ChecksumLedger;
pub use predicate::Predicate;
pub use registry::FormulaRegistry;
pub use types::*;
pub use view::{FormulaView, ViewBottle, ViewDependency, ViewResource, ViewStep, resolve_platform_view};
