//! Immutable guideline index loaded from a JSON-lines record file.
//!
//! One JSON object per line. Blank lines are skipped, unknown fields are
//! ignored, keywords are lower-cased on load.

pub mod assertion;

use crate::errors::LoadError;
use crate::model::{Guideline, Threshold};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[error("guideline not found: {0}")]
pub struct NotFound(pub String);

/// Read-only after load; share behind an `Arc` across workers.
#[derive(Debug, Default)]
pub struct GuidelineStore {
    guidelines: Vec<Arc<Guideline>>,
    by_id: HashMap<String, usize>,
}

impl GuidelineStore {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let origin = path.display().to_string();
        let file = std::fs::File::open(path).map_err(|e| LoadError::io(&origin, e))?;
        Self::from_reader(std::io::BufReader::new(file), &origin)
    }

    pub fn from_reader<R: BufRead>(reader: R, origin: &str) -> Result<Self, LoadError> {
        let mut guidelines: Vec<Arc<Guideline>> = Vec::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();
        let mut first_line: HashMap<String, usize> = HashMap::new();

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|e| LoadError::io(origin, e))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let mut guideline: Guideline =
                serde_json::from_str(trimmed).map_err(|e| LoadError::InvalidRecord {
                    origin: origin.to_string(),
                    line: line_no,
                    message: e.to_string(),
                })?;

            check_required(&guideline, origin, line_no)?;
            check_assertions(&guideline, origin, line_no)?;

            if let Some(&first) = first_line.get(&guideline.id) {
                return Err(LoadError::DuplicateId {
                    origin: origin.to_string(),
                    line: line_no,
                    id: guideline.id,
                    first_line: first,
                });
            }

            guideline.keywords = guideline
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();

            first_line.insert(guideline.id.clone(), line_no);
            by_id.insert(guideline.id.clone(), guidelines.len());
            guidelines.push(Arc::new(guideline));
        }

        tracing::debug!(origin, count = guidelines.len(), "loaded guidelines");
        Ok(Self { guidelines, by_id })
    }

    pub fn get_by_id(&self, id: &str) -> Result<&Arc<Guideline>, NotFound> {
        self.by_id
            .get(id)
            .map(|&i| &self.guidelines[i])
            .ok_or_else(|| NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Guidelines in file order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Guideline>> {
        self.guidelines.iter()
    }

    pub fn len(&self) -> usize {
        self.guidelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guidelines.is_empty()
    }
}

fn check_required(g: &Guideline, origin: &str, line: usize) -> Result<(), LoadError> {
    let missing = if g.id.trim().is_empty() {
        Some("id")
    } else if g.text.trim().is_empty() {
        Some("text")
    } else {
        None
    };
    match missing {
        Some(field) => Err(LoadError::InvalidRecord {
            origin: origin.to_string(),
            line,
            message: format!("field `{}` must not be empty", field),
        }),
        None => Ok(()),
    }
}

fn check_assertions(g: &Guideline, origin: &str, line: usize) -> Result<(), LoadError> {
    for (index, a) in g.structured_assertions.iter().enumerate() {
        let reason = if a.parameter.trim().is_empty() {
            Some("parameter must not be empty".to_string())
        } else {
            match a.threshold {
                Threshold::Number(n) if !n.is_finite() => {
                    Some("threshold must be a finite number".to_string())
                }
                Threshold::Bool(_) if a.operator.is_ordering() => Some(format!(
                    "operator '{}' cannot compare a boolean threshold",
                    a.operator.symbol()
                )),
                _ => a
                    .unit
                    .as_deref()
                    .filter(|u| u.trim().is_empty())
                    .map(|_| "unit must not be empty when present".to_string()),
            }
        };
        if let Some(reason) = reason {
            return Err(LoadError::MalformedAssertion {
                origin: origin.to_string(),
                line,
                id: g.id.clone(),
                index,
                reason,
            });
        }
    }
    Ok(())
}
