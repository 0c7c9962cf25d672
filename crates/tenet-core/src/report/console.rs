use super::progress::{ProgressEvent, ProgressSink};
use super::{CorpusSummary, ScenarioRun};
use crate::errors::CaseFailure;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const PROGRESS_MIN_INTERVAL_MS: u64 = 200;

#[must_use]
pub fn format_progress_line(scenario_id: &str, done: usize, total: usize) -> String {
    format!("[{}] case {}/{}...", scenario_id, done, total)
}

/// Emit at most every tenth of the suite on large scenarios.
pub(crate) fn progress_step(total: usize) -> usize {
    if total <= 10 {
        1
    } else {
        std::cmp::max(1, total / 10)
    }
}

/// Throttled stderr progress. `None` for single-case scenarios.
pub fn default_progress_sink(scenario_id: &str, total: usize) -> Option<ProgressSink> {
    if total <= 1 {
        return None;
    }
    let scenario_id = scenario_id.to_string();
    let step = progress_step(total);
    let last_emit: Mutex<Option<Instant>> = Mutex::new(None);
    Some(Arc::new(move |ev: ProgressEvent| {
        if ev.total == 0 {
            return;
        }
        let now = Instant::now();
        let should_emit = {
            let mut last = last_emit.lock().unwrap_or_else(|e| e.into_inner());
            let interval_ok = last.is_none_or(|t| {
                now.saturating_duration_since(t) >= Duration::from_millis(PROGRESS_MIN_INTERVAL_MS)
            });
            let on_step = ev.done.is_multiple_of(step) || ev.done == 1;
            let ok = ev.done == ev.total || (on_step && interval_ok);
            if ok {
                *last = Some(now);
            }
            ok
        };
        if should_emit {
            eprintln!("{}", format_progress_line(&scenario_id, ev.done, ev.total));
        }
    }))
}

pub fn print_summary(run: &ScenarioRun) {
    eprintln!();
    for r in &run.results {
        let o = &r.outcome;
        let duration = format!("({:.1}s)", r.duration_ms as f64 / 1000.0);
        let retries = match r.attempts.len() {
            0 | 1 => String::new(),
            n => format!(" [{} attempts]", n),
        };
        match &o.failure {
            Some(CaseFailure::Cancelled) => {
                eprintln!("⏹️  {:<20} CANCELLED", o.case_id);
            }
            Some(failure) => {
                eprintln!(
                    "💥 {:<20} expected {} -> ERROR  {}{}",
                    o.case_id, o.ground_truth, duration, retries
                );
                eprintln!("    {}", failure);
            }
            None if o.is_match => {
                eprintln!(
                    "✅ {:<20} {}  {}{}",
                    o.case_id, o.observed, duration, retries
                );
            }
            None => {
                eprintln!(
                    "❌ {:<20} expected {} got {}  {}{}",
                    o.case_id, o.ground_truth, o.observed, duration, retries
                );
            }
        }
    }

    let acc = &run.accuracy;
    eprintln!();
    eprintln!(
        "{}: {}/{} correct ({:.1}%){}",
        run.scenario_id,
        acc.correct,
        acc.total,
        acc.percent(),
        if run.cancelled { " [cancelled]" } else { "" }
    );
    if !acc.error_breakdown.is_empty() {
        let parts: Vec<String> = acc
            .error_breakdown
            .iter()
            .map(|(tag, n)| format!("{} x{}", tag, n))
            .collect();
        eprintln!("  errors: {}", parts.join(", "));
    }
}

pub fn print_corpus_summary(summary: &CorpusSummary) {
    eprintln!();
    eprintln!("Corpus summary ({} scenarios)", summary.scenarios.len());
    for s in &summary.scenarios {
        eprintln!(
            "  {:<8} {:<12} {:>3}/{:<3} {:>6.2}%",
            s.scenario_id,
            s.family.as_str(),
            s.accuracy.correct,
            s.accuracy.total,
            s.accuracy.pct
        );
    }
    eprintln!(
        "Overall: {}/{} correct ({:.2}%)",
        summary.accuracy.correct, summary.accuracy.total, summary.accuracy.pct
    );
}
