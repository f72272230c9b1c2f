//! CLI argument models and validation for the Gatekeeper binary.

pub mod cli_args;
pub mod cli_types;
pub mod validation;

pub use cli_args::Cli;
pub use cli_types::*;
pub use validation::*;
