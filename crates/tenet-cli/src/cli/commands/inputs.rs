//! Load-time setup shared by `run` and `validate`. Every failure here is a
//! configuration error rendered as a [`Diagnostic`].

use std::sync::Arc;

use serde_json::json;
use tenet_core::config::RoutingTable;
use tenet_core::errors::diagnostic::codes;
use tenet_core::guidelines::GuidelineStore;
use tenet_core::scenario::{locate_ground_truth, Suite};
use tenet_core::Diagnostic;

use super::selection;
use crate::cli::args::InputArgs;

pub(crate) struct Inputs {
    pub store: Arc<GuidelineStore>,
    pub routing: RoutingTable,
    pub suites: Vec<Suite>,
}

pub(crate) fn load(args: &InputArgs) -> Result<Inputs, Diagnostic> {
    if args.top_k == Some(0) {
        let diag = Diagnostic::new(codes::E_INVALID_ARGS, "--top-k must be at least 1");
        return Err(diag.with_source("cli"));
    }

    let store = Arc::new(GuidelineStore::load(&args.guidelines)?);
    let routing = match &args.config {
        Some(path) => RoutingTable::load(path)?,
        None => RoutingTable::default(),
    }
    .with_top_k_override(args.top_k);
    routing.validate_against(&store)?;

    let selected = selection::parse_selection(&args.scenario)?;
    let scenario_files = selection::resolve(&selected, &args.scenarios_dir)?;

    let mut suites = Vec::with_capacity(scenario_files.len());
    for (scenario_id, scenario_path) in scenario_files {
        let truth_path = locate_ground_truth(&args.ground_truth, &scenario_id).ok_or_else(|| {
            let origin = args.ground_truth.display().to_string();
            Diagnostic::new(
                codes::E_PATH_NOT_FOUND,
                format!("no ground truth file for {}", scenario_id),
            )
            .with_context(json!({ "ground_truth": origin }))
            .with_source(origin)
            .with_fix_step(
                "Pass a ground truth file, or a directory with <ID>_ground_truth.json or <ID>.json",
            )
        })?;
        let suite = Suite::load(&scenario_path, &truth_path, &routing)?;
        tracing::debug!(
            scenario_id = %suite.scenario_id(),
            cases = suite.cases.len(),
            family = suite.route.family.as_str(),
            "scenario ready"
        );
        suites.push(suite);
    }

    Ok(Inputs {
        store,
        routing,
        suites,
    })
}
