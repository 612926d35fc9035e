//! Client for a Type4Py-style type prediction service.

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use typehint_core::{Candidate, Slot, SlotPrediction};

/// Parameters that never get a prediction layer.
const SKIPPED_PARAMETERS: &[&str] = &["self", "args", "kwargs"];

/// Marker the service puts in qualified names of nested functions.
const LOCALS_MARKER: &str = "<locals>";

#[derive(Debug, Error)]
pub enum PredictionError {
    /// The service answered with an explicit error, e.g. unparsable source.
    #[error("prediction service error: {0}")]
    Service(String),
    #[error("prediction request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed prediction response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Produces ranked candidates per slot for a source file.
pub trait PredictionService {
    fn predict(&self, source: &str) -> Result<Vec<SlotPrediction>, PredictionError>;
}

/// HTTP client for the Type4Py prediction endpoint.
#[derive(Debug, Clone)]
pub struct Type4PyClient {
    endpoint: String,
    http: Client,
}

impl Type4PyClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, PredictionError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl PredictionService for Type4PyClient {
    fn predict(&self, source: &str) -> Result<Vec<SlotPrediction>, PredictionError> {
        let started = std::time::Instant::now();
        let body = self
            .http
            .post(&self.endpoint)
            .body(source.to_string())
            .send()?
            .text()?;
        log::debug!("Predictions received in {:.2?}", started.elapsed());
        predictions_from_json(&body)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    response: Option<ModulePredictions>,
}

#[derive(Debug, Default, Deserialize)]
struct ModulePredictions {
    #[serde(default)]
    classes: Vec<ClassPredictions>,
    #[serde(default)]
    funcs: Vec<FunctionPredictions>,
}

#[derive(Debug, Deserialize)]
struct ClassPredictions {
    #[serde(default)]
    funcs: Vec<FunctionPredictions>,
}

#[derive(Debug, Deserialize)]
struct FunctionPredictions {
    q_name: String,
    #[serde(default)]
    params_p: Map<String, Value>,
    #[serde(default)]
    ret_type_p: Option<Vec<(String, f64)>>,
    /// `[[start_line, start_col], [end_line, end_col]]`
    #[serde(default)]
    fn_lc: Option<((u32, u32), (u32, u32))>,
}

impl FunctionPredictions {
    fn line(&self) -> u32 {
        self.fn_lc.map(|((line, _), _)| line).unwrap_or(u32::MAX)
    }

    fn path(&self) -> Vec<String> {
        self.q_name
            .split('.')
            .filter(|part| *part != LOCALS_MARKER)
            .map(str::to_string)
            .collect()
    }
}

/// Converts a service response into per-slot predictions, functions in
/// source order, parameters before the return slot.
pub fn predictions_from_json(body: &str) -> Result<Vec<SlotPrediction>, PredictionError> {
    let response: ApiResponse = serde_json::from_str(body)?;
    if let Some(error) = response.error {
        return Err(PredictionError::Service(error));
    }
    let module = response.response.unwrap_or_default();

    // One function per start line; later entries replace earlier ones.
    let mut by_line: BTreeMap<u32, FunctionPredictions> = BTreeMap::new();
    let class_funcs = module.classes.into_iter().flat_map(|class| class.funcs);
    for func in class_funcs.chain(module.funcs) {
        by_line.insert(func.line(), func);
    }

    let mut predictions = Vec::new();
    for func in by_line.into_values() {
        let path = func.path();
        for (name, ranked) in &func.params_p {
            if SKIPPED_PARAMETERS.contains(&name.as_str()) {
                continue;
            }
            let ranked: Vec<(String, f64)> = serde_json::from_value(ranked.clone())?;
            predictions.push(SlotPrediction::new(
                Slot::parameter(path.iter().cloned(), name.clone()),
                candidates(ranked),
            ));
        }
        let returns = func
            .ret_type_p
            .unwrap_or_else(|| vec![("None".to_string(), 1.0)]);
        predictions.push(SlotPrediction::new(
            Slot::returns(path.iter().cloned()),
            candidates(returns),
        ));
    }
    Ok(predictions)
}

fn candidates(ranked: Vec<(String, f64)>) -> Vec<Candidate> {
    ranked
        .into_iter()
        .map(|(annotation, score)| Candidate::new(annotation, score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "error": null,
        "response": {
            "classes": [{
                "name": "Store",
                "funcs": [{
                    "name": "put",
                    "q_name": "Store.put",
                    "params_p": {
                        "self": [["Store", 0.9]],
                        "value": [["bytes", 0.7], ["str", 0.2]],
                        "key": [["str", 0.9]]
                    },
                    "ret_type_p": [["bool", 0.6]],
                    "fn_lc": [[12, 4], [14, 20]]
                }]
            }],
            "funcs": [{
                "name": "helper",
                "q_name": "main.<locals>.helper",
                "params_p": {"args": [["int", 0.5]], "x": [["int", 0.8]]},
                "fn_lc": [[3, 4], [4, 16]]
            }]
        }
    }"#;

    #[test]
    fn test_predictions_are_ordered_by_line() {
        let predictions = predictions_from_json(RESPONSE).unwrap();
        let slots: Vec<String> = predictions.iter().map(|p| p.slot.to_string()).collect();
        assert_eq!(
            slots,
            vec![
                "main.helper.x",
                "main.helper.return",
                "Store.put.value",
                "Store.put.key",
                "Store.put.return"
            ]
        );
    }

    #[test]
    fn test_missing_return_defaults_to_none() {
        let predictions = predictions_from_json(RESPONSE).unwrap();
        assert_eq!(predictions[1].candidates, vec![Candidate::new("None", 1.0)]);
        assert_eq!(
            predictions[2].candidates,
            vec![Candidate::new("bytes", 0.7), Candidate::new("str", 0.2)]
        );
    }

    #[test]
    fn test_service_error() {
        let err = predictions_from_json(r#"{"error": "cannot parse", "response": null}"#)
            .unwrap_err();
        assert!(matches!(err, PredictionError::Service(ref m) if m == "cannot parse"));
    }

    #[test]
    fn test_malformed_body() {
        assert!(matches!(
            predictions_from_json("<html>"),
            Err(PredictionError::Decode(_))
        ));
        assert!(matches!(
            predictions_from_json(
                r#"{"error": null, "response": {"funcs": [{"q_name": "f", "params_p": {"x": "int"}}]}}"#
            ),
            Err(PredictionError::Decode(_))
        ));
    }

    #[test]
    fn test_empty_response() {
        assert!(predictions_from_json(r#"{"error": null}"#).unwrap().is_empty());
    }
}
