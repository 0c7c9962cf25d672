pub mod config;
pub mod engine;
pub mod errors;
pub mod guidelines;
pub mod model;
pub mod parse;
pub mod prompt;
pub mod providers;
pub mod report;
pub mod retrieve;
pub mod scenario;
pub mod validate;

pub use errors::{CaseFailure, CompletionError, Diagnostic, FailureKind, LoadError};
