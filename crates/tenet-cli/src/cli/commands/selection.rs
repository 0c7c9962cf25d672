//! `--scenario` parsing and scenario file resolution.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde_json::json;
use tenet_core::errors::diagnostic::codes;
use tenet_core::scenario::locate_scenario;
use tenet_core::Diagnostic;

/// Upper bound on ids expanded from a single range.
const MAX_RANGE_LEN: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Selected {
    pub id: String,
    /// Ids expanded from a range may be absent on disk.
    pub from_range: bool,
}

/// `S021`, `S021-S025`, or a comma list of either. Order is kept,
/// duplicates are dropped.
pub(crate) fn parse_selection(raw: &str) -> Result<Vec<Selected>, Diagnostic> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let expanded: Vec<Selected> = match part.split_once('-') {
            Some((start, end)) => expand_range(start.trim(), end.trim())
                .map_err(|message| invalid(part, message))?
                .into_iter()
                .map(|id| Selected {
                    id,
                    from_range: true,
                })
                .collect(),
            None => vec![Selected {
                id: part.to_string(),
                from_range: false,
            }],
        };
        for sel in expanded {
            if seen.insert(sel.id.clone()) {
                out.push(sel);
            }
        }
    }
    if out.is_empty() {
        return Err(invalid(raw, "no scenario ids given".to_string()));
    }
    Ok(out)
}

/// Split `S021` into `("S", "021")`.
fn split_id(id: &str) -> Option<(&str, &str)> {
    let digits_at = id
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    Some(id.split_at(digits_at))
}

fn expand_range(start: &str, end: &str) -> Result<Vec<String>, String> {
    let (Some((prefix, lo)), Some((end_prefix, hi))) = (split_id(start), split_id(end)) else {
        return Err("range bounds must end in a number".to_string());
    };
    if prefix != end_prefix {
        return Err(format!(
            "prefixes differ ('{}' vs '{}')",
            prefix, end_prefix
        ));
    }
    let width = lo.len();
    let (lo, hi): (u64, u64) = match (lo.parse(), hi.parse()) {
        (Ok(lo), Ok(hi)) => (lo, hi),
        _ => return Err("range bounds are too large".to_string()),
    };
    if lo > hi {
        return Err(format!("start {} is after end {}", start, end));
    }
    if hi - lo >= MAX_RANGE_LEN {
        return Err(format!("range spans more than {} ids", MAX_RANGE_LEN));
    }
    Ok((lo..=hi)
        .map(|n| format!("{}{:0width$}", prefix, n, width = width))
        .collect())
}

fn invalid(raw: &str, message: String) -> Diagnostic {
    Diagnostic::new(
        codes::E_INVALID_ARGS,
        format!("invalid --scenario '{}': {}", raw, message),
    )
    .with_source("cli")
    .with_fix_step("Use an id (S021), a range (S021-S025) or a comma list (S021,S024)")
}

/// Scenario files for the selection. Range members without a file are
/// skipped; an explicit id without a file is an error.
pub(crate) fn resolve(
    selected: &[Selected],
    dir: &Path,
) -> Result<Vec<(String, PathBuf)>, Diagnostic> {
    let mut out = Vec::new();
    for sel in selected {
        match locate_scenario(dir, &sel.id) {
            Some(path) => out.push((sel.id.clone(), path)),
            None if sel.from_range => {
                tracing::warn!(
                    scenario_id = %sel.id,
                    dir = %dir.display(),
                    "no scenario file, skipping"
                );
            }
            None => return Err(not_found(dir, &sel.id)),
        }
    }
    if out.is_empty() {
        let ids: Vec<&str> = selected.iter().map(|s| s.id.as_str()).collect();
        return Err(not_found(dir, &ids.join(",")));
    }
    Ok(out)
}

fn not_found(dir: &Path, what: &str) -> Diagnostic {
    Diagnostic::new(
        codes::E_PATH_NOT_FOUND,
        format!("no scenario file for {}", what),
    )
    .with_source(dir.display().to_string())
    .with_context(json!({ "scenarios_dir": dir.display().to_string() }))
    .with_fix_step("Expected <ID>.jsonc, <ID>.json or <ID>_*.jsonc in --scenarios-dir")
}
