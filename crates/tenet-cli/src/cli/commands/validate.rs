use super::inputs;
use crate::cli::args::ValidateArgs;
use crate::exit_codes;

/// Load every input the run would load, then stop before any completion call.
pub async fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let inputs = match inputs::load(&args.inputs) {
        Ok(inputs) => inputs,
        Err(diag) => {
            eprint!("{}", diag.format_terminal());
            eprintln!("✖ Validation failed");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let routing = match inputs.routing.origin() {
        "" => "built-in defaults",
        origin => origin,
    };
    eprintln!("guidelines: {}", inputs.store.len());
    eprintln!("routing:    {}", routing);
    for suite in &inputs.suites {
        eprintln!(
            "  {:<8} {:<12} {:>3} cases  labels: {}",
            suite.scenario_id(),
            suite.route.family.as_str(),
            suite.cases.len(),
            suite.route.labels.iter().collect::<Vec<_>>().join(", ")
        );
    }
    eprintln!("✔ Validation OK ({} scenarios)", inputs.suites.len());
    Ok(exit_codes::SUCCESS)
}
