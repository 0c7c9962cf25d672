use clap::{Parser, Subcommand};

pub mod common;
pub mod run;
pub use common::*;
pub use run::*;

#[derive(Parser)]
#[command(
    name = "tenet",
    version,
    about = "Guideline-grounded decision validation for LLM policy agents"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run scenarios against a completion service and score every decision
    Run(RunArgs),
    /// Load and cross-check guidelines, routing, scenarios and ground truth
    Validate(ValidateArgs),
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub inputs: InputArgs,
}
