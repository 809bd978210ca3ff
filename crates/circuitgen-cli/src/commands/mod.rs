//! CLI command implementations

pub mod assemble;
pub mod run;
