//! Concrete collaborators used by the command-line tool.

pub mod openrouter;
pub mod process;

pub use openrouter::OpenRouterClient;
pub use process::{ProcessAssembler, ProcessChecker};
