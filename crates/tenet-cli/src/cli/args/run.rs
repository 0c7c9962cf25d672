//! Run command arguments.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tenet_core::engine::retry::DEFAULT_MAX_ATTEMPTS;
use tenet_core::engine::runner::DEFAULT_PARALLEL;

use super::InputArgs;

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions over HTTP
    #[default]
    Openai,
    /// Recorded responses from `--responses`, no network
    Replay,
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub inputs: InputArgs,

    /// Report directory, or a `.json` file when a single scenario is selected
    #[arg(long, default_value = "reports")]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t = ProviderKind::Openai)]
    pub provider: ProviderKind,

    /// Recorded responses `{scenario_id: {case_id: response}}` for `--provider replay`
    #[arg(long)]
    pub responses: Option<PathBuf>,

    /// Base URL of the completion service
    #[arg(long, env = "TENET_BASE_URL")]
    pub base_url: Option<String>,

    /// Model identifier sent to the completion service
    #[arg(long, env = "TENET_MODEL")]
    pub model: Option<String>,

    /// API credential for the completion service
    #[arg(long, env = "TENET_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Concurrent completion calls per scenario
    #[arg(long, default_value_t = DEFAULT_PARALLEL)]
    pub parallel: usize,

    /// Attempts per case, first call included
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Per-call timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
}
