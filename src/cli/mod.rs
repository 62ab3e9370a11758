//! CLI Module
//!
//! Exit codes and results shared by the binary and the session loop.

pub mod exit_codes;

pub use exit_codes::{exit_code_description, CliResult, ExitCodes};
