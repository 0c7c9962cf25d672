//! Routing table: scenario -> family, baseline rules, label registry and
//! retrieval policy. Loaded once, then shared read-only.

use crate::errors::LoadError;
use crate::guidelines::GuidelineStore;
use crate::model::{LabelRegistry, DEFAULT_LABELS};
use crate::prompt::ScenarioFamily;
use crate::validate::ERROR_LABEL;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const CONFIG_VERSION: u32 = 1;
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub families: BTreeMap<ScenarioFamily, FamilyConfig>,
    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioConfig>,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            defaults: Defaults::default(),
            families: BTreeMap::new(),
            scenarios: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub fallback: Vec<String>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            fallback: Vec::new(),
            labels: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FamilyConfig {
    #[serde(default)]
    pub base_rules: Option<String>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub family: Option<ScenarioFamily>,
    #[serde(default)]
    pub base_rules: Option<String>,
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,
    #[serde(default)]
    pub allowlist_only: bool,
    #[serde(default)]
    pub denylist: Vec<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub fallback: Option<Vec<String>>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
}

/// Retrieval knobs for one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalPolicy {
    pub top_k: usize,
    /// Candidate set restriction. `None` means every guideline is a candidate.
    pub allowlist: Option<Vec<String>>,
    /// Return the allowlist as a pinned set without keyword scoring.
    pub allowlist_only: bool,
    pub denylist: BTreeSet<String>,
    pub fallback: Vec<String>,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            allowlist: None,
            allowlist_only: false,
            denylist: BTreeSet::new(),
            fallback: Vec::new(),
        }
    }
}

/// Everything resolved for one scenario. Built once per scenario.
#[derive(Debug, Clone)]
pub struct ScenarioRoute {
    pub scenario_id: String,
    pub family: ScenarioFamily,
    pub base_rules: String,
    pub labels: LabelRegistry,
    pub policy: RetrievalPolicy,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    config: RoutingConfig,
    origin: String,
    top_k_override: Option<usize>,
}

impl RoutingTable {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let origin = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| LoadError::io(&origin, e))?;
        Self::from_yaml_str(&text, &origin)
    }

    pub fn from_yaml_str(text: &str, origin: &str) -> Result<Self, LoadError> {
        let config: RoutingConfig = serde_yaml::from_str(text).map_err(|e| LoadError::Routing {
            origin: origin.to_string(),
            message: format!("failed to parse yaml: {}", e),
        })?;
        Self::from_config(config, origin)
    }

    pub fn from_config(config: RoutingConfig, origin: &str) -> Result<Self, LoadError> {
        let routing_err = |message: String| LoadError::Routing {
            origin: origin.to_string(),
            message,
        };

        if config.version != CONFIG_VERSION {
            return Err(routing_err(format!(
                "unsupported version {} (expected {})",
                config.version, CONFIG_VERSION
            )));
        }
        if config.defaults.top_k == 0 {
            return Err(routing_err("defaults.top_k must be at least 1".into()));
        }
        for (id, sc) in &config.scenarios {
            if sc.top_k == Some(0) {
                return Err(routing_err(format!(
                    "scenarios.{}.top_k must be at least 1",
                    id
                )));
            }
            if sc.allowlist_only && sc.allowlist.as_ref().is_none_or(Vec::is_empty) {
                return Err(routing_err(format!(
                    "scenarios.{}: allowlist_only requires a non-empty allowlist",
                    id
                )));
            }
            if let Some(allow) = &sc.allowlist {
                if let Some(both) = allow.iter().find(|g| sc.denylist.contains(g)) {
                    return Err(routing_err(format!(
                        "scenarios.{}: guideline '{}' is both allowlisted and denylisted",
                        id, both
                    )));
                }
            }
        }
        let families = config
            .families
            .iter()
            .map(|(f, c)| (format!("families.{}", f), &c.labels));
        let scenarios = config
            .scenarios
            .iter()
            .map(|(id, c)| (format!("scenarios.{}", id), &c.labels));
        let label_sets = std::iter::once(("defaults".to_string(), &config.defaults.labels))
            .chain(families)
            .chain(scenarios);
        for (path, labels) in label_sets {
            if let Some(labels) = labels {
                if labels.iter().any(|l| l.trim().is_empty() || l.trim() != l) {
                    return Err(routing_err(format!(
                        "{}.labels: labels must be non-empty and carry no surrounding whitespace",
                        path
                    )));
                }
                if labels.is_empty() {
                    return Err(routing_err(format!("{}.labels must not be empty", path)));
                }
                if labels.iter().any(|l| l == ERROR_LABEL) {
                    return Err(routing_err(format!(
                        "{}.labels: '{}' is reserved for failed cases",
                        path, ERROR_LABEL
                    )));
                }
            }
        }

        Ok(Self {
            config,
            origin: origin.to_string(),
            top_k_override: None,
        })
    }

    /// Replace every configured `top_k` (CLI `--top-k`).
    pub fn with_top_k_override(mut self, top_k: Option<usize>) -> Self {
        self.top_k_override = top_k.filter(|k| *k > 0);
        self
    }

    /// Every guideline id named by the table must exist in `store`.
    pub fn validate_against(&self, store: &GuidelineStore) -> Result<(), LoadError> {
        let defaults = self
            .config
            .defaults
            .fallback
            .iter()
            .map(|id| (id, "defaults.fallback".to_string()));
        let scenarios = self.config.scenarios.iter().flat_map(|(sid, sc)| {
            let allow = sc
                .allowlist
                .iter()
                .flatten()
                .map(move |id| (id, format!("scenarios.{}.allowlist", sid)));
            let deny = sc
                .denylist
                .iter()
                .map(move |id| (id, format!("scenarios.{}.denylist", sid)));
            let fallback = sc
                .fallback
                .iter()
                .flatten()
                .map(move |id| (id, format!("scenarios.{}.fallback", sid)));
            allow.chain(deny).chain(fallback)
        });

        for (id, context) in defaults.chain(scenarios) {
            if !store.contains(id) {
                return Err(LoadError::UnknownGuideline {
                    origin: self.origin.clone(),
                    id: id.clone(),
                    context,
                });
            }
        }
        Ok(())
    }

    pub fn route(&self, scenario_id: &str) -> ScenarioRoute {
        let sc = self
            .config
            .scenarios
            .get(scenario_id)
            .cloned()
            .unwrap_or_default();
        let family = sc
            .family
            .unwrap_or_else(|| ScenarioFamily::classify(scenario_id));
        let family_cfg = self.config.families.get(&family);

        let base_rules = sc
            .base_rules
            .clone()
            .or_else(|| family_cfg.and_then(|f| f.base_rules.clone()))
            .unwrap_or_else(|| family.default_base_rules().to_string());

        let labels = sc
            .labels
            .as_ref()
            .or_else(|| family_cfg.and_then(|f| f.labels.as_ref()))
            .or(self.config.defaults.labels.as_ref())
            .map(|l| LabelRegistry::new(l.iter().cloned()))
            .unwrap_or_else(|| LabelRegistry::new(DEFAULT_LABELS.iter().copied()));

        let top_k = self
            .top_k_override
            .or(sc.top_k)
            .unwrap_or(self.config.defaults.top_k);

        ScenarioRoute {
            scenario_id: scenario_id.to_string(),
            family,
            base_rules,
            labels,
            policy: RetrievalPolicy {
                top_k,
                allowlist: sc.allowlist,
                allowlist_only: sc.allowlist_only,
                denylist: sc.denylist.into_iter().collect(),
                fallback: sc
                    .fallback
                    .unwrap_or_else(|| self.config.defaults.fallback.clone()),
            },
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
version: 1
defaults:
  top_k: 4
  fallback: [G-BASE]
families:
  battery:
    base_rules: "Land with 20% reserve."
    labels: [APPROVE, REJECT, REJECT_WITH_ALTERNATIVE]
scenarios:
  S021:
    allowlist: [R-RESERVE, R-EMERGENCY]
    allowlist_only: true
    denylist: [R-GENERIC]
  S028:
    family: priority
    top_k: 2
    fallback: [R-PRIORITY]
    labels: [CHOOSE_A, CHOOSE_B, UNCERTAIN]
"#;

    fn store() -> GuidelineStore {
        let lines = "G-BASE R-RESERVE R-EMERGENCY R-GENERIC R-PRIORITY"
            .split(' ')
            .map(|id| format!(r#"{{"id":"{id}","text":"t","keywords":[],"scope":"operational"}}"#))
            .collect::<Vec<_>>()
            .join("\n");
        GuidelineStore::from_reader(lines.as_bytes(), "mem").unwrap()
    }

    #[test]
    fn routes_resolve_family_rules_labels_and_policy() {
        let table = RoutingTable::from_yaml_str(YAML, "tenet.yaml").unwrap();
        table.validate_against(&store()).unwrap();

        let r = table.route("S021");
        assert_eq!(r.family, ScenarioFamily::Battery);
        assert_eq!(r.base_rules, "Land with 20% reserve.");
        assert!(r.labels.contains("REJECT_WITH_ALTERNATIVE"));
        assert!(!r.labels.contains("UNCERTAIN"));
        assert!(r.policy.allowlist_only);
        assert_eq!(r.policy.top_k, 4);
        assert_eq!(r.policy.fallback, vec!["G-BASE"]);
        assert!(r.policy.denylist.contains("R-GENERIC"));

        let r = table.route("S028");
        assert_eq!(r.family, ScenarioFamily::Priority);
        assert_eq!(r.policy.top_k, 2);
        assert_eq!(r.policy.fallback, vec!["R-PRIORITY"]);
        assert_eq!(r.labels.len(), 3);
    }

    #[test]
    fn unconfigured_scenario_gets_defaults() {
        let table = RoutingTable::default();
        let r = table.route("S047");
        assert_eq!(r.family, ScenarioFamily::Fairness);
        assert_eq!(r.labels, LabelRegistry::default());
        assert_eq!(r.policy, RetrievalPolicy::default());
        assert!(!r.base_rules.is_empty());
    }

    #[test]
    fn top_k_override_wins() {
        let table = RoutingTable::from_yaml_str(YAML, "tenet.yaml")
            .unwrap()
            .with_top_k_override(Some(9));
        assert_eq!(table.route("S028").policy.top_k, 9);
        assert_eq!(table.route("S001").policy.top_k, 9);
    }

    #[test]
    fn rejects_unknown_guideline_reference() {
        let yaml = "version: 1\nscenarios:\n  S021:\n    denylist: [NOPE]\n";
        let table = RoutingTable::from_yaml_str(yaml, "tenet.yaml").unwrap();
        let err = table.validate_against(&store()).unwrap_err();
        match err {
            LoadError::UnknownGuideline { id, context, .. } => {
                assert_eq!(id, "NOPE");
                assert_eq!(context, "scenarios.S021.denylist");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reserved_error_label_cannot_be_registered() {
        for yaml in [
            "defaults:\n  labels: [APPROVE, ERROR]\n",
            "families:\n  battery:\n    labels: [ERROR, REJECT]\n",
            "scenarios:\n  S021:\n    labels: [REJECT, ERROR]\n",
        ] {
            match RoutingTable::from_yaml_str(yaml, "tenet.yaml").unwrap_err() {
                LoadError::Routing { message, .. } => {
                    assert!(message.contains("reserved"), "{message}")
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        // only the exact sentinel is reserved
        let yaml = "defaults:\n  labels: [ERROR_STATE, REJECT]\n";
        RoutingTable::from_yaml_str(yaml, "tenet.yaml").unwrap();
    }

    #[test]
    fn rejects_invalid_tables() {
        let cases = [
            "version: 2\n",
            "defaults:\n  top_k: 0\n",
            "scenarios:\n  S021:\n    allowlist_only: true\n",
            "scenarios:\n  S021:\n    allowlist: [A]\n    denylist: [A]\n",
            "defaults:\n  labels: [' REJECT']\n",
            "families:\n  battery:\n    labels: []\n",
            "scenarios: [not, a, map]\n",
        ];
        for yaml in cases {
            let err = RoutingTable::from_yaml_str(yaml, "tenet.yaml").unwrap_err();
            assert!(matches!(err, LoadError::Routing { .. }), "{yaml}");
        }
    }
}
