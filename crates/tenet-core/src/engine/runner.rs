use super::retry::RetryPolicy;
use crate::config::ScenarioRoute;
use crate::errors::{CaseFailure, CompletionError};
use crate::guidelines::assertion::check_guidelines;
use crate::model::{GroundTruthRecord, ParseStatus, ScenarioTestCase};
use crate::parse::{ClassifiedResponse, ResponseParser};
use crate::prompt::PromptAssembler;
use crate::providers::llm::CompletionClient;
use crate::report::progress::{ProgressEvent, ProgressSink};
use crate::report::{AttemptRow, AttemptStatus, CaseResult, ScenarioRun};
use crate::retrieve::{build_query, Retriever};
use crate::scenario::Suite;
use crate::validate::{AccuracyReport, ValidationOutcome};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

pub const DEFAULT_PARALLEL: usize = 4;

#[derive(Debug, Clone)]
pub struct RunPolicy {
    /// Concurrent completion calls per scenario.
    pub parallel: usize,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            parallel: DEFAULT_PARALLEL,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// Per-scenario state shared read-only by every case task.
struct ScenarioContext {
    route: ScenarioRoute,
    parser: ResponseParser,
    description: String,
}

#[derive(Clone)]
pub struct Runner {
    retriever: Retriever,
    assembler: PromptAssembler,
    client: Arc<dyn CompletionClient>,
    policy: RunPolicy,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(retriever: Retriever, client: Arc<dyn CompletionClient>, policy: RunPolicy) -> Self {
        Self {
            retriever,
            assembler: PromptAssembler::new(),
            client,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn client(&self) -> &Arc<dyn CompletionClient> {
        &self.client
    }

    /// Run every case of the suite. Rows come back in scenario order.
    ///
    /// After cancellation no new completion call is issued: cases that have
    /// not started, or were waiting to retry, are recorded as cancelled.
    /// In-flight calls finish and are scored.
    pub async fn run_suite(&self, suite: &Suite, progress: Option<ProgressSink>) -> ScenarioRun {
        let span = info_span!(
            "scenario",
            scenario_id = suite.scenario_id(),
            family = suite.route.family.as_str(),
            cases = suite.cases.len()
        );
        self.run_suite_inner(suite, progress).instrument(span).await
    }

    async fn run_suite_inner(&self, suite: &Suite, progress: Option<ProgressSink>) -> ScenarioRun {
        let ctx = Arc::new(ScenarioContext {
            route: suite.route.clone(),
            parser: ResponseParser::new(suite.route.labels.clone()),
            description: suite.scenario.description.clone(),
        });
        let parallel = self.policy.parallel.max(1);
        let sem = Arc::new(Semaphore::new(parallel));
        let mut join_set = JoinSet::new();
        let total = suite.cases.len();
        let mut rows: Vec<(usize, CaseResult)> = Vec::with_capacity(total);

        let report_progress = |done: usize| {
            if let Some(sink) = &progress {
                sink(ProgressEvent { done, total });
            }
        };

        for (index, (case, truth)) in suite.cases.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = sem.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                rows.push((index, cancelled_row(truth)));
                report_progress(rows.len());
                continue;
            };
            let this = self.clone();
            let ctx = Arc::clone(&ctx);
            let case = case.clone();
            let truth = truth.clone();
            join_set.spawn(async move {
                let _permit = permit;
                (index, this.run_case(&ctx, &case, &truth).await)
            });
        }

        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(row) => rows.push(row),
                Err(e) => tracing::error!(error = %e, "case task failed"),
            }
            report_progress(rows.len());
        }

        let finished: BTreeSet<usize> = rows.iter().map(|(i, _)| *i).collect();
        for (index, (_, truth)) in suite.cases.iter().enumerate() {
            if !finished.contains(&index) {
                let failure = CaseFailure::CompletionFailure {
                    message: "worker task failed".to_string(),
                };
                let outcome = ValidationOutcome::from_failure(truth, failure);
                rows.push((index, CaseResult::without_attempts(outcome)));
            }
        }

        rows.sort_by_key(|(i, _)| *i);
        let results: Vec<CaseResult> = rows.into_iter().map(|(_, r)| r).collect();
        let accuracy = AccuracyReport::score(results.iter().map(|r| &r.outcome));
        let cancelled = results
            .iter()
            .any(|r| matches!(r.outcome.failure, Some(CaseFailure::Cancelled)));

        tracing::info!(
            correct = accuracy.correct,
            total = accuracy.total,
            cancelled,
            "scenario finished"
        );

        ScenarioRun {
            scenario_id: suite.scenario_id().to_string(),
            family: suite.route.family,
            results,
            accuracy,
            cancelled,
        }
    }

    async fn run_case(
        &self,
        ctx: &ScenarioContext,
        case: &ScenarioTestCase,
        truth: &GroundTruthRecord,
    ) -> CaseResult {
        if self.cancel.is_cancelled() {
            return cancelled_row(truth);
        }
        let started = Instant::now();

        let query = build_query(&ctx.description, &case.description, &case.scenario_id);
        let retrieved = self
            .retriever
            .retrieve(&query, &case.scenario_id, &ctx.route.policy);
        let payload = self.assembler.assemble(
            ctx.route.family,
            case,
            &retrieved,
            &ctx.route.base_rules,
            &ctx.route.labels,
        );

        let max_attempts = self.policy.retry.max_attempts.max(1);
        let mut attempts = Vec::new();
        let mut last: Option<Result<ClassifiedResponse, CompletionError>> = None;
        let mut cut_short = false;

        for attempt_no in 1..=max_attempts {
            let attempt_started = Instant::now();
            let call = timeout(self.policy.call_timeout, self.client.complete(&payload));
            let result = match call.await {
                Ok(Ok(completion)) => Ok(ctx.parser.parse(&completion.text)),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(CompletionError::Timeout(self.policy.call_timeout)),
            };
            let duration_ms = attempt_started.elapsed().as_millis() as u64;

            let (row, retry, hint) = match &result {
                Ok(c) => {
                    let (status, message) = attempt_status(c);
                    let retry = matches!(
                        c.parse_status,
                        ParseStatus::Malformed | ParseStatus::Empty
                    );
                    let row = AttemptRow {
                        attempt_no,
                        status,
                        message,
                        duration_ms,
                    };
                    (row, retry, None)
                }
                Err(e) => (
                    AttemptRow {
                        attempt_no,
                        status: AttemptStatus::Failed,
                        message: Some(e.to_string()),
                        duration_ms,
                    },
                    e.is_retryable(),
                    e.retry_after(),
                ),
            };
            let reason = row.message.clone().unwrap_or_default();
            attempts.push(row);
            last = Some(result);

            if !retry || attempt_no == max_attempts {
                break;
            }
            let backoff = self.policy.retry.backoff(attempt_no, hint);
            tracing::warn!(
                scenario_id = %case.scenario_id,
                case_id = %case.case_id,
                attempt = attempt_no,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %reason,
                "retrying completion"
            );
            let keep_going = tokio::select! {
                _ = self.cancel.cancelled() => false,
                _ = tokio::time::sleep(backoff) => !self.cancel.is_cancelled(),
            };
            if !keep_going {
                tracing::debug!(case_id = %case.case_id, "cancelled during backoff");
                cut_short = true;
                break;
            }
        }

        let assertion_checks = check_guidelines(&retrieved.matched_guidelines, &case.mission_facts);
        let mut row = CaseResult::without_attempts(ValidationOutcome::from_failure(
            truth,
            CaseFailure::CompletionFailure {
                message: "no attempt made".to_string(),
            },
        ));
        match last {
            Some(Ok(classified)) => {
                row.outcome = ValidationOutcome::from_classified(truth, &classified);
                row.parse_status = Some(classified.parse_status);
                row.raw_decision = classified.raw_decision;
                row.raw_response = Some(classified.raw_text);
                row.reasoning_steps = classified.reasoning_steps;
                row.violated_policies = classified.violated_policies;
                row.citations = classified.citations;
                row.evidence_used = classified.evidence_used;
            }
            Some(Err(e)) => {
                row.outcome = ValidationOutcome::from_failure(
                    truth,
                    CaseFailure::CompletionFailure {
                        message: e.to_string(),
                    },
                );
            }
            None => {}
        }
        // A retry chain cut by cancellation is not the model's answer.
        if cut_short {
            row.outcome = ValidationOutcome::from_failure(truth, CaseFailure::Cancelled);
        }
        row.retrieved_guidelines = payload.guideline_ids;
        row.match_scores = retrieved.match_scores;
        row.used_fallback = retrieved.used_fallback;
        row.fingerprint = Some(payload.fingerprint);
        row.assertion_checks = assertion_checks;
        row.attempts = attempts;
        row.duration_ms = started.elapsed().as_millis() as u64;

        tracing::debug!(
            case_id = %case.case_id,
            observed = %row.outcome.observed,
            is_match = row.outcome.is_match,
            attempts = row.attempts.len(),
            "case finished"
        );
        row
    }
}

fn attempt_status(c: &ClassifiedResponse) -> (AttemptStatus, Option<String>) {
    match (c.parse_status, &c.decision) {
        (ParseStatus::Ok, Some(_)) => (AttemptStatus::Ok, None),
        (ParseStatus::Ok, None) => {
            let message = c
                .raw_decision
                .as_ref()
                .map(|d| format!("unregistered label '{}'", d));
            (AttemptStatus::UnknownLabel, message)
        }
        (ParseStatus::Malformed, _) => (AttemptStatus::Malformed, c.malformed_reason.clone()),
        (ParseStatus::Empty, _) => (AttemptStatus::Empty, None),
    }
}

fn cancelled_row(truth: &GroundTruthRecord) -> CaseResult {
    let outcome = ValidationOutcome::from_failure(truth, CaseFailure::Cancelled);
    CaseResult::without_attempts(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoutingTable;
    use crate::errors::FailureKind;
    use crate::guidelines::GuidelineStore;
    use crate::prompt::Payload;
    use crate::providers::llm::{Completion, FakeClient};
    use crate::scenario::{GroundTruth, Scenario};
    use crate::validate::Observed;
    use async_trait::async_trait;

    const SCENARIO: &str = r#"{
        "id": "S021",
        "description": "Battery reserve dilemma for a medical delivery",
        "test_cases": [
            {"id": "TC1", "description": "reserve at 18 percent", "battery": {"reserve_pct": 18}},
            {"id": "TC2", "description": "reserve at 35 percent", "battery": {"reserve_pct": 35}},
            {"id": "TC3", "description": "conflicting sources"}
        ]
    }"#;

    fn suite(truth: &str) -> Suite {
        let scenario = Scenario::from_str(SCENARIO, "S021.jsonc").unwrap();
        let truth = GroundTruth::from_str(truth, "gt.json", "S021").unwrap();
        Suite::assemble(scenario, truth, &RoutingTable::default()).unwrap()
    }

    fn retriever() -> Retriever {
        let store = GuidelineStore::from_reader(
            r#"{"id":"R1","text":"Keep a 20% battery reserve.","keywords":["battery","reserve"],"scope":"safety","structured_assertions":[{"parameter":"battery.reserve_pct","operator":">=","threshold":20}]}"#
                .as_bytes(),
            "mem",
        )
        .unwrap();
        Retriever::new(Arc::new(store))
    }

    fn policy(max_attempts: u32) -> RunPolicy {
        RunPolicy {
            parallel: 2,
            retry: RetryPolicy::immediate(max_attempts),
            call_timeout: Duration::from_secs(5),
        }
    }

    const TRUTH: &str = r#"{"TC1": "REJECT", "TC2": "APPROVE", "TC3": "UNCERTAIN"}"#;

    #[tokio::test]
    async fn scores_every_case_and_keeps_scenario_order() {
        let client = FakeClient::new("m")
            .with_recording(
                "S021",
                "TC1",
                r#"{"decision": "REJECT", "reasoning_steps": ["below reserve"]}"#,
            )
            .with_recording("S021", "TC2", r#"{"decision": "APPROVE"}"#)
            .with_recording("S021", "TC3", r#"{"decision": "REJECT"}"#);
        let runner = Runner::new(retriever(), Arc::new(client), policy(3));

        let run = runner.run_suite(&suite(TRUTH), None).await;
        let ids: Vec<_> = run.results.iter().map(|r| r.case_id()).collect();
        assert_eq!(ids, vec!["TC1", "TC2", "TC3"]);
        assert_eq!((run.accuracy.correct, run.accuracy.total), (2, 3));
        assert!(!run.cancelled);

        let tc1 = &run.results[0];
        assert_eq!(tc1.retrieved_guidelines, vec!["R1"]);
        assert_eq!(tc1.reasoning_steps, vec!["below reserve"]);
        assert_eq!(tc1.attempts.len(), 1);
        assert_eq!(tc1.fingerprint.as_ref().map(String::len), Some(64));
        assert_eq!(
            tc1.assertion_checks[0].status,
            crate::guidelines::assertion::CheckStatus::Violated
        );

        let tc3 = &run.results[2];
        assert!(!tc3.outcome.is_match);
        let tag = tc3.outcome.error_class.as_ref().unwrap();
        assert_eq!(tag.to_string(), "UNCERTAIN->REJECT");
    }

    #[tokio::test]
    async fn malformed_output_is_retried_and_every_attempt_recorded() {
        let client = Arc::new(
            FakeClient::new("m")
                .with_script(
                    "TC1",
                    vec![
                        Ok("not json".into()),
                        Ok(r#"{"decision": "REJECT"}"#.into()),
                    ],
                )
                .with_script("TC2", vec![Ok(String::new())])
                .with_script("TC3", vec![Ok(r#"{"decision": "MAYBE"}"#.into())]),
        );
        let runner = Runner::new(retriever(), client.clone(), policy(3));
        let run = runner.run_suite(&suite(TRUTH), None).await;

        let tc1 = &run.results[0];
        assert!(tc1.outcome.is_match);
        let statuses: Vec<_> = tc1.attempts.iter().map(|a| a.status).collect();
        assert_eq!(statuses, vec![AttemptStatus::Malformed, AttemptStatus::Ok]);

        let tc2 = &run.results[1];
        assert_eq!(tc2.attempts.len(), 3);
        assert_eq!(tc2.outcome.observed, Observed::Error);
        assert_eq!(tc2.parse_status, Some(ParseStatus::Empty));

        // unknown labels are an answer, not a transport problem
        assert_eq!(client.calls("TC3"), 1);
        let failure = run.results[2].outcome.failure.as_ref();
        assert_eq!(
            failure.map(CaseFailure::kind),
            Some(FailureKind::UnknownDecisionLabel)
        );
        assert_eq!(run.accuracy.correct, 1);
    }

    #[tokio::test]
    async fn transport_errors_retry_only_when_retryable() {
        let client = Arc::new(
            FakeClient::new("m")
                .with_script(
                    "TC1",
                    vec![
                        Err(CompletionError::RateLimited { retry_after: None }),
                        Ok(r#"{"decision": "REJECT"}"#.into()),
                    ],
                )
                .with_script(
                    "TC2",
                    vec![Err(CompletionError::Unauthorized {
                        message: "bad key".into(),
                    })],
                )
                .with_script(
                    "TC3",
                    vec![Err(CompletionError::Server {
                        status: 502,
                        message: "bad gateway".into(),
                    })],
                ),
        );
        let runner = Runner::new(retriever(), client.clone(), policy(3));
        let run = runner.run_suite(&suite(TRUTH), None).await;

        assert!(run.results[0].outcome.is_match);
        assert_eq!(client.calls("TC2"), 1);
        assert_eq!(client.calls("TC3"), 3);
        let breakdown = &run.accuracy.failure_breakdown;
        assert_eq!(breakdown.get(&FailureKind::CompletionFailure), Some(&2));
        assert_eq!(run.accuracy.total, 3);
    }

    struct SlowClient;

    #[async_trait]
    impl CompletionClient for SlowClient {
        async fn complete(&self, _payload: &Payload) -> Result<Completion, CompletionError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Completion {
                text: r#"{"decision": "REJECT"}"#.into(),
                provider: "slow".into(),
                model: "m".into(),
                meta: serde_json::json!({}),
            })
        }

        fn provider_name(&self) -> &'static str {
            "slow"
        }

        fn model(&self) -> &str {
            "m"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn call_timeout_is_a_retryable_failure() {
        let runner = Runner::new(
            retriever(),
            Arc::new(SlowClient),
            RunPolicy {
                parallel: 1,
                retry: RetryPolicy::immediate(2),
                call_timeout: Duration::from_secs(1),
            },
        );
        let run = runner.run_suite(&suite(TRUTH), None).await;
        for r in &run.results {
            assert_eq!(r.attempts.len(), 2);
            assert!(matches!(
                r.outcome.failure,
                Some(CaseFailure::CompletionFailure { .. })
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_lets_in_flight_cases_finish() {
        let runner = Runner::new(
            retriever(),
            Arc::new(SlowClient),
            RunPolicy {
                parallel: 1,
                retry: RetryPolicy::immediate(1),
                call_timeout: Duration::from_secs(60),
            },
        );
        let token = runner.cancellation_token();
        let suite = suite(TRUTH);
        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run_suite(&suite, None).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        let run = handle.await.unwrap();

        assert!(run.cancelled);
        assert_eq!(run.results[0].outcome.observed.to_string(), "REJECT");
        for r in &run.results[1..] {
            assert!(matches!(r.outcome.failure, Some(CaseFailure::Cancelled)));
        }
        assert_eq!((run.accuracy.correct, run.accuracy.total), (1, 1));
        let breakdown = &run.accuracy.failure_breakdown;
        assert_eq!(breakdown.get(&FailureKind::Cancelled), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_is_not_scored() {
        let client = FakeClient::new("m").with_script(
            "TC1",
            vec![
                Ok("not json".into()),
                Ok(r#"{"decision": "REJECT"}"#.into()),
            ],
        );
        let runner = Runner::new(
            retriever(),
            Arc::new(client),
            RunPolicy {
                parallel: 1,
                retry: RetryPolicy {
                    max_attempts: 2,
                    base_delay: Duration::from_secs(10),
                    max_delay: Duration::from_secs(10),
                    jitter: false,
                },
                call_timeout: Duration::from_secs(5),
            },
        );
        let token = runner.cancellation_token();
        let suite = suite(TRUTH);
        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run_suite(&suite, None).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        let run = handle.await.unwrap();

        let tc1 = &run.results[0];
        assert!(matches!(tc1.outcome.failure, Some(CaseFailure::Cancelled)));
        assert_eq!(tc1.attempts.len(), 1);
        assert_eq!(tc1.attempts[0].status, AttemptStatus::Malformed);
        assert!(run.cancelled);
        assert_eq!((run.accuracy.correct, run.accuracy.total), (0, 0));
        let breakdown = &run.accuracy.failure_breakdown;
        assert_eq!(breakdown.get(&FailureKind::Cancelled), Some(&3));
        assert_eq!(breakdown.get(&FailureKind::ParseFailure), None);
    }

    #[tokio::test(start_paused = true)]
    async fn late_cancellation_does_not_flag_a_complete_scenario() {
        let runner = Runner::new(
            retriever(),
            Arc::new(SlowClient),
            RunPolicy {
                parallel: 3,
                retry: RetryPolicy::immediate(1),
                call_timeout: Duration::from_secs(60),
            },
        );
        let token = runner.cancellation_token();
        let suite = suite(TRUTH);
        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run_suite(&suite, None).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        let run = handle.await.unwrap();

        assert!(!run.cancelled);
        assert_eq!(run.accuracy.total, 3);
        assert!(run.results.iter().all(|r| r.outcome.failure.is_none()));
    }

    #[tokio::test]
    async fn progress_sink_sees_every_case() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink: ProgressSink = {
            let seen = Arc::clone(&seen);
            Arc::new(move |ev: ProgressEvent| seen.lock().unwrap().push((ev.done, ev.total)))
        };
        let client = FakeClient::new("m").with_response(r#"{"decision": "REJECT"}"#);
        let runner = Runner::new(retriever(), Arc::new(client), policy(1));
        runner.run_suite(&suite(TRUTH), Some(sink)).await;
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }
}
