pub use context::{EncapsulateBuilder, EncapsulateOption, IsolationPolicy, IsolationStep, Policy};
pub use error::{
  EncapsulateError, EncapsulateExit, EXIT_CANNOT_EXECUTE, EXIT_NOT_FOUND, EXIT_SETUP_FAILURE,
};
pub use namespace::NamespaceSet;
pub use paths::parse_writable_spec;
pub use supervisor::{run, spawn_isolated, ChildExit, Supervisor};
pub use utils::default_format;

mod context;
mod error;
mod mount;
mod namespace;
mod paths;
mod privilege;
mod supervisor;
mod utils;
