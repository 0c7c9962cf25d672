use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tenet_core::engine::{RetryPolicy, RunPolicy, Runner};
use tenet_core::errors::diagnostic::codes;
use tenet_core::providers::llm::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use tenet_core::providers::llm::{
    CompletionClient, FakeClient, OpenAiClient, OpenAiConfig, TracingClient,
};
use tenet_core::report::console::{default_progress_sink, print_corpus_summary, print_summary};
use tenet_core::report::json::{report_file_name, write_report, write_summary};
use tenet_core::report::{CorpusSummary, RunInfo, ValidationReport};
use tenet_core::retrieve::Retriever;
use tenet_core::Diagnostic;
use tokio_util::sync::CancellationToken;

use super::inputs;
use crate::cli::args::{ProviderKind, RunArgs};
use crate::exit_codes;

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let setup = inputs::load(&args.inputs).and_then(|inputs| {
        let output = OutputTarget::resolve(&args.output, inputs.suites.len())?;
        let client = build_client(&args)?;
        let policy = run_policy(&args)?;
        Ok((inputs, output, client, policy))
    });
    let (inputs, output, client, policy) = match setup {
        Ok(s) => s,
        Err(diag) => {
            eprint!("{}", diag.format_terminal());
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted: finishing in-flight cases, skipping the rest.");
                cancel.cancel();
            }
        }
    });

    let info = RunInfo::new(client.provider_name(), client.model());
    let runner = Runner::new(Retriever::new(Arc::clone(&inputs.store)), client, policy)
        .with_cancellation(cancel.clone());
    tracing::info!(
        run_id = %info.run_id,
        provider = %info.provider,
        model = %info.model,
        scenarios = inputs.suites.len(),
        "starting run"
    );

    let mut runs = Vec::with_capacity(inputs.suites.len());
    for suite in &inputs.suites {
        let progress = default_progress_sink(suite.scenario_id(), suite.cases.len());
        let run = runner.run_suite(suite, progress).await;
        print_summary(&run);

        let out = output.report_path(&run.scenario_id);
        write_report(&ValidationReport::new(&run, &info), &out)?;
        eprintln!("Report written to {}", out.display());
        runs.push(run);
    }

    if runs.len() > 1 {
        let summary = CorpusSummary::new(&runs, &info);
        print_corpus_summary(&summary);
        if let OutputTarget::Dir(dir) = &output {
            let path = write_summary(&summary, dir)?;
            eprintln!("Summary written to {}", path.display());
        }
    }

    if cancel.is_cancelled() {
        tracing::warn!(
            run_id = %info.run_id,
            "run cancelled; unstarted cases were recorded as cancelled"
        );
    }
    Ok(exit_codes::SUCCESS)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OutputTarget {
    File(PathBuf),
    Dir(PathBuf),
}

impl OutputTarget {
    fn resolve(path: &Path, scenarios: usize) -> Result<Self, Diagnostic> {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        match (is_json, scenarios) {
            (true, 1) => Ok(Self::File(path.to_path_buf())),
            (true, n) => {
                let message = format!(
                    "--output {} is a file but {} scenarios were selected",
                    path.display(),
                    n
                );
                let diag = Diagnostic::new(codes::E_INVALID_ARGS, message)
                    .with_source("cli")
                    .with_fix_step("Pass a directory to --output when running several scenarios");
                Err(diag)
            }
            (false, _) => Ok(Self::Dir(path.to_path_buf())),
        }
    }

    fn report_path(&self, scenario_id: &str) -> PathBuf {
        match self {
            Self::File(path) => path.clone(),
            Self::Dir(dir) => dir.join(report_file_name(scenario_id)),
        }
    }
}

fn run_policy(args: &RunArgs) -> Result<RunPolicy, Diagnostic> {
    let invalid = |msg: &str| Diagnostic::new(codes::E_INVALID_ARGS, msg).with_source("cli");
    if args.parallel == 0 {
        return Err(invalid("--parallel must be at least 1"));
    }
    if args.max_attempts == 0 {
        return Err(invalid("--max-attempts must be at least 1"));
    }
    if args.timeout_secs == 0 {
        return Err(invalid("--timeout-secs must be at least 1"));
    }
    Ok(RunPolicy {
        parallel: args.parallel,
        retry: RetryPolicy {
            max_attempts: args.max_attempts,
            ..RetryPolicy::default()
        },
        call_timeout: Duration::from_secs(args.timeout_secs),
    })
}

fn build_client(args: &RunArgs) -> Result<Arc<dyn CompletionClient>, Diagnostic> {
    let inner: Arc<dyn CompletionClient> = match args.provider {
        ProviderKind::Openai => {
            let api_key = args
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    Diagnostic::new(
                        codes::E_MISSING_API_KEY,
                        "no API key for the openai provider",
                    )
                    .with_source("cli")
                    .with_fix_step("Set TENET_API_KEY or pass --api-key")
                    .with_fix_step(
                        "Use --provider replay --responses <file> to run without a service",
                    )
                })?;
            let config = OpenAiConfig {
                base_url: args
                    .base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                model: args
                    .model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                // the engine enforces the per-call timeout; keep the transport limit just above it
                timeout: Duration::from_secs(args.timeout_secs.saturating_add(5)),
                ..OpenAiConfig::default()
            };
            let client = OpenAiClient::new(api_key, config).map_err(|e| {
                Diagnostic::new(codes::E_CFG_PARSE, e.to_string()).with_source("cli")
            })?;
            Arc::new(client)
        }
        ProviderKind::Replay => {
            let path = args.responses.as_ref().ok_or_else(|| {
                Diagnostic::new(
                    codes::E_INVALID_ARGS,
                    "--provider replay needs --responses <file>",
                )
                .with_source("cli")
            })?;
            let model = args.model.clone().unwrap_or_else(|| "recorded".to_string());
            Arc::new(FakeClient::from_replay_file(path, model)?)
        }
    };
    Ok(Arc::new(TracingClient::new(inner)))
}
