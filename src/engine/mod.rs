//! Execution engine for converge
//!
//! The library runs the transaction; this module drives it from the
//! command line:
//! 1. Executing - run a resource graph under the process's privilege context
//! 2. Displaying - print changes as they happen, then a summary or JSON report

pub mod differ;
pub mod executor;

pub use differ::render_state;
pub use executor::{ExecuteOptions, Runtime, execute};
