//! Input arguments shared by `run` and `validate`.

use std::path::PathBuf;

#[derive(clap::Args, Debug, Clone)]
pub struct InputArgs {
    /// Scenario selection: `S021`, a range `S021-S025`, or a comma list
    #[arg(long)]
    pub scenario: String,

    /// Directory holding `<ID>.jsonc`, `<ID>.json` or `<ID>_*.jsonc` scenario files
    #[arg(long, default_value = "scenarios")]
    pub scenarios_dir: PathBuf,

    /// Ground truth file (single scenario) or directory of per-scenario files
    #[arg(long)]
    pub ground_truth: PathBuf,

    /// Guideline records, one JSON object per line
    #[arg(long)]
    pub guidelines: PathBuf,

    /// Routing config (YAML). Built-in defaults when absent.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the configured retrieval depth for every scenario
    #[arg(long)]
    pub top_k: Option<usize>,
}
