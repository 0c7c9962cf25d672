use super::{Completion, CompletionClient};
use crate::errors::{CompletionError, LoadError};
use crate::prompt::Payload;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

type Scripted = Result<String, CompletionError>;

/// Offline client: scripted per-case sequences, recorded responses, or a
/// fixed fallback text.
///
/// A scripted sequence is consumed one entry per call; its last entry repeats.
#[derive(Debug, Default)]
pub struct FakeClient {
    model: String,
    scripts: HashMap<String, Vec<Scripted>>,
    recordings: HashMap<String, HashMap<String, String>>,
    fixed_response: Option<String>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.fixed_response = Some(response.into());
        self
    }

    pub fn with_script(mut self, case_id: impl Into<String>, script: Vec<Scripted>) -> Self {
        self.scripts.insert(case_id.into(), script);
        self
    }

    pub fn with_recording(
        mut self,
        scenario_id: impl Into<String>,
        case_id: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        self.recordings
            .entry(scenario_id.into())
            .or_default()
            .insert(case_id.into(), response.into());
        self
    }

    /// Load `{scenario_id: {case_id: response}}`. A response that is not a
    /// string is replayed as its JSON text.
    pub fn from_replay_file(path: &Path, model: impl Into<String>) -> Result<Self, LoadError> {
        let origin = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| LoadError::io(&origin, e))?;
        let doc: Value =
            serde_json::from_str(&text).map_err(|e| LoadError::document(&origin, e.to_string()))?;
        let scenarios = doc
            .as_object()
            .ok_or_else(|| LoadError::document(&origin, "replay file must be an object"))?;

        let mut client = Self::new(model);
        for (scenario_id, cases) in scenarios {
            let cases = cases.as_object().ok_or_else(|| {
                LoadError::document(
                    &origin,
                    format!("'{}' must map case ids to responses", scenario_id),
                )
            })?;
            for (case_id, response) in cases {
                let text = match response {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                client = client.with_recording(scenario_id.clone(), case_id.clone(), text);
            }
        }
        tracing::debug!(origin = %origin, scenarios = scenarios.len(), "loaded replay responses");
        Ok(client)
    }

    /// Number of `complete` calls seen for `case_id`.
    pub fn calls(&self, case_id: &str) -> usize {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.get(case_id).copied().unwrap_or(0)
    }

    fn next_call(&self, case_id: &str) -> usize {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        let n = calls.entry(case_id.to_string()).or_insert(0);
        *n += 1;
        *n - 1
    }
}

#[async_trait]
impl CompletionClient for FakeClient {
    async fn complete(&self, payload: &Payload) -> Result<Completion, CompletionError> {
        let index = self.next_call(&payload.case_id);

        let text = if let Some(script) = self.scripts.get(&payload.case_id) {
            match script.get(index).or_else(|| script.last()) {
                Some(step) => step.clone()?,
                None => String::new(),
            }
        } else if let Some(recorded) = self
            .recordings
            .get(&payload.scenario_id)
            .and_then(|cases| cases.get(&payload.case_id))
        {
            recorded.clone()
        } else if let Some(fixed) = &self.fixed_response {
            fixed.clone()
        } else {
            return Err(CompletionError::NotRecorded {
                scenario_id: payload.scenario_id.clone(),
                case_id: payload.case_id.clone(),
            });
        };

        Ok(Completion {
            text,
            provider: self.provider_name().to_string(),
            model: self.model.clone(),
            meta: serde_json::json!({}),
        })
    }

    fn provider_name(&self) -> &'static str {
        "replay"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScenarioFamily;

    fn payload(scenario_id: &str, case_id: &str) -> Payload {
        Payload {
            scenario_id: scenario_id.into(),
            case_id: case_id.into(),
            family: ScenarioFamily::Generic,
            system: "sys".into(),
            prompt: "prompt".into(),
            guideline_ids: vec![],
            used_fallback: false,
            fingerprint: "0".repeat(64),
        }
    }

    #[tokio::test]
    async fn scripted_sequence_then_sticky_last() {
        let client = FakeClient::new("m").with_script(
            "TC1",
            vec![
                Err(CompletionError::Server {
                    status: 503,
                    message: "busy".into(),
                }),
                Ok("second".into()),
            ],
        );
        let p = payload("S021", "TC1");
        assert!(client.complete(&p).await.is_err());
        assert_eq!(client.complete(&p).await.unwrap().text, "second");
        assert_eq!(client.complete(&p).await.unwrap().text, "second");
        assert_eq!(client.calls("TC1"), 3);
    }

    #[tokio::test]
    async fn missing_recording_is_an_error() {
        let client = FakeClient::new("m").with_recording("S021", "TC1", "{}");
        let err = client.complete(&payload("S021", "TC2")).await.unwrap_err();
        assert_eq!(
            err,
            CompletionError::NotRecorded {
                scenario_id: "S021".into(),
                case_id: "TC2".into()
            }
        );
        assert!(!err.is_retryable());

        let client = client.with_response("fixed");
        let unrecorded = client.complete(&payload("S021", "TC2")).await.unwrap();
        assert_eq!(unrecorded.text, "fixed");
        let recorded = client.complete(&payload("S021", "TC1")).await.unwrap();
        assert_eq!(recorded.text, "{}");
    }

    #[tokio::test]
    async fn replay_file_accepts_text_and_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.json");
        std::fs::write(
            &path,
            r#"{"S021": {"TC1": "```json\n{\"decision\": \"REJECT\"}\n```", "TC2": {"decision": "APPROVE"}}}"#,
        )
        .unwrap();

        let client = FakeClient::from_replay_file(&path, "recorded").unwrap();
        let tc1 = client.complete(&payload("S021", "TC1")).await.unwrap();
        assert!(tc1.text.starts_with("```json"));
        let tc2 = client.complete(&payload("S021", "TC2")).await.unwrap();
        assert_eq!(tc2.text, r#"{"decision":"APPROVE"}"#);
        assert_eq!(tc2.provider, "replay");
    }

    #[test]
    fn replay_file_must_be_nested_by_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.json");
        std::fs::write(&path, r#"{"S021": "REJECT"}"#).unwrap();
        let err = FakeClient::from_replay_file(&path, "m").unwrap_err();
        assert!(matches!(err, LoadError::InvalidDocument { .. }));
    }
}
