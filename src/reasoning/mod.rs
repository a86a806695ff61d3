//! Hand-off to the language-model reasoning collaborator.
//!
//! The collaborator turns a `{action, confidence}` record into structured
//! context (intent, next step, scene). The core only ever sees the
//! [`ReasoningAgent`] trait; [`OpenAiReasoner`] talks to a chat-completions
//! endpoint and [`StaticReasoner`] answers offline.

mod openai;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::Result,
    types::{Label, Prediction, PredictionRecord},
};

pub use openai::OpenAiReasoner;

pub trait ReasoningAgent: Send + Sync {
    fn reason(&self, prediction: &PredictionRecord) -> Result<ReasoningResult>;

    fn reason_over_sequence(&self, history: &[Label]) -> Result<TemporalReasoning>;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub scene_type: String,
    pub key_objects: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResult {
    pub intent: String,
    pub next_step: String,
    pub explanation: String,
    pub environment: Environment,
    pub agent_state: String,
    pub affordances: Vec<String>,
    pub constraints: Vec<String>,
    pub task_goal: String,
    pub current_step: String,
    pub future_steps: Vec<String>,
    pub target_objects: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalReasoning {
    pub overall_task: String,
    pub step_roles: Vec<String>,
    pub possible_goal: String,
    pub future_plan: Vec<String>,
    pub uncertainty_notes: Vec<String>,
}

/// Final output shape for one clip.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnnotatedPrediction {
    pub action: Label,
    pub confidence: f64,
    pub reasoning: ReasoningResult,
}

pub fn annotate(
    agent: &dyn ReasoningAgent,
    prediction: &Prediction,
) -> Result<AnnotatedPrediction> {
    let record = prediction.record();
    let reasoning = agent.reason(&record)?;
    Ok(AnnotatedPrediction {
        action: record.action,
        confidence: record.confidence,
        reasoning,
    })
}

/// Removes a surrounding markdown code fence (optionally tagged `json`).
pub fn strip_code_fences(text: &str) -> &str {
    let t = text.trim();
    if !t.starts_with("```") {
        return t;
    }
    let t = t.trim_matches('`').trim();
    match t.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => t[4..].trim(),
        _ => t,
    }
}

fn string_field(obj: &Value, key: &str) -> String {
    match obj.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn list_field(obj: &Value, key: &str) -> Vec<String> {
    match obj.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Lenient decode of a single-action reply. Missing or mistyped fields
/// become empty; a reply that is not JSON lands in `explanation`.
pub fn parse_reasoning(content: &str) -> ReasoningResult {
    let body = strip_code_fences(content);
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        log::warn!("reasoning reply is not JSON, keeping raw text");
        return ReasoningResult {
            explanation: body.to_string(),
            ..ReasoningResult::default()
        };
    };

    let env = value.get("environment").filter(|e| e.is_object());
    ReasoningResult {
        intent: string_field(&value, "intent"),
        next_step: string_field(&value, "next_step"),
        explanation: string_field(&value, "explanation"),
        environment: Environment {
            scene_type: env.map(|e| string_field(e, "scene_type")).unwrap_or_default(),
            key_objects: env.map(|e| list_field(e, "key_objects")).unwrap_or_default(),
        },
        agent_state: string_field(&value, "agent_state"),
        affordances: list_field(&value, "affordances"),
        constraints: list_field(&value, "constraints"),
        task_goal: string_field(&value, "task_goal"),
        current_step: string_field(&value, "current_step"),
        future_steps: list_field(&value, "future_steps"),
        target_objects: list_field(&value, "target_objects"),
    }
}

/// Lenient decode of a sequence reply; non-JSON text goes to
/// `uncertainty_notes`.
pub fn parse_temporal(content: &str) -> TemporalReasoning {
    let body = strip_code_fences(content);
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        log::warn!("temporal reasoning reply is not JSON, keeping raw text");
        return TemporalReasoning {
            uncertainty_notes: vec![body.to_string()],
            ..TemporalReasoning::default()
        };
    };

    TemporalReasoning {
        overall_task: string_field(&value, "overall_task"),
        step_roles: list_field(&value, "step_roles"),
        possible_goal: string_field(&value, "possible_goal"),
        future_plan: list_field(&value, "future_plan"),
        uncertainty_notes: list_field(&value, "uncertainty_notes"),
    }
}

/// Deterministic offline agent with one canned answer per label.
#[derive(Clone, Debug, Default)]
pub struct StaticReasoner;

impl StaticReasoner {
    fn canned(label: Label) -> (&'static str, &'static str, &'static str, &'static [&'static str]) {
        match label {
            Label::OpenDoor => (
                "enter or leave the room",
                "walk through the doorway",
                "corridor",
                &["door", "door handle"],
            ),
            Label::PickBook => (
                "read or carry the book",
                "open the book or carry it to a desk",
                "library",
                &["book", "shelf"],
            ),
            Label::PourWater => (
                "prepare a drink",
                "put the kettle down and drink",
                "kitchen",
                &["kettle", "cup"],
            ),
            Label::WalkStop => (
                "reach a destination",
                "look around or start a new task",
                "indoor space",
                &["floor", "destination"],
            ),
        }
    }
}

impl ReasoningAgent for StaticReasoner {
    fn reason(&self, prediction: &PredictionRecord) -> Result<ReasoningResult> {
        let (intent, next_step, scene, objects) = Self::canned(prediction.action);
        let objects: Vec<String> = objects.iter().map(|s| s.to_string()).collect();
        Ok(ReasoningResult {
            intent: intent.to_string(),
            next_step: next_step.to_string(),
            explanation: format!(
                "Predicted '{}' ({:.0}% confidence): {}.",
                prediction.action,
                prediction.confidence * 100.0,
                prediction.action.description()
            ),
            environment: Environment {
                scene_type: scene.to_string(),
                key_objects: objects.clone(),
            },
            current_step: prediction.action.as_str().to_string(),
            target_objects: objects,
            ..ReasoningResult::default()
        })
    }

    fn reason_over_sequence(&self, history: &[Label]) -> Result<TemporalReasoning> {
        let Some(&last) = history.last() else {
            return Ok(TemporalReasoning::default());
        };
        let steps: Vec<&str> = history.iter().map(|l| l.as_str()).collect();
        let (goal, next_step, _, _) = Self::canned(last);
        Ok(TemporalReasoning {
            overall_task: steps.join(" -> "),
            step_roles: history
                .iter()
                .map(|l| Self::canned(*l).0.to_string())
                .collect(),
            possible_goal: goal.to_string(),
            future_plan: vec![next_step.to_string()],
            uncertainty_notes: vec!["generated offline without a language model".to_string()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn strips_fences_with_and_without_tag() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn parse_fills_missing_and_mistyped_fields() {
        let reply = r#"```json
        {"intent": "make tea",
         "environment": {"scene_type": "kitchen", "key_objects": ["kettle", null, 3]},
         "affordances": "not a list", "future_steps": ["drink"], "agent_state": 7}
        ```"#;
        let parsed = parse_reasoning(reply);
        assert_eq!(parsed.intent, "make tea");
        assert_eq!(parsed.next_step, "");
        assert_eq!(parsed.environment.scene_type, "kitchen");
        assert_eq!(parsed.environment.key_objects, vec!["kettle", "3"]);
        assert!(parsed.affordances.is_empty());
        assert_eq!(parsed.future_steps, vec!["drink"]);
        assert_eq!(parsed.agent_state, "7");
    }

    #[test]
    fn non_json_reply_is_kept_as_explanation() {
        let parsed = parse_reasoning("Sorry, I cannot help with that.");
        assert_eq!(parsed.explanation, "Sorry, I cannot help with that.");
        assert!(parsed.intent.is_empty());

        let temporal = parse_temporal("no json here");
        assert_eq!(temporal.uncertainty_notes, vec!["no json here"]);
    }

    #[test]
    fn parse_temporal_reads_fields() {
        let parsed = parse_temporal(
            r#"{"overall_task": "morning routine",
                "step_roles": ["enter", "drink"],
                "future_plan": ["leave"]}"#,
        );
        assert_eq!(parsed.overall_task, "morning routine");
        assert_eq!(parsed.step_roles.len(), 2);
        assert!(parsed.uncertainty_notes.is_empty());
    }

    #[test]
    fn annotate_wraps_prediction_with_reasoning() {
        let prediction = Prediction {
            action: Label::PourWater,
            confidence: 0.82,
            votes: BTreeMap::from([(Label::PourWater, 5)]),
            windows: Vec::new(),
        };
        let annotated = annotate(&StaticReasoner, &prediction).unwrap();
        assert_eq!(annotated.action, Label::PourWater);
        assert_eq!(annotated.reasoning.environment.scene_type, "kitchen");

        let json = serde_json::to_value(&annotated).unwrap();
        assert_eq!(json["action"], "pour_water");
        assert!(json["reasoning"]["environment"]["key_objects"].is_array());
        assert!(json["reasoning"]["intent"].is_string());
        assert!(json["reasoning"]["next_step"].is_string());
    }

    #[test]
    fn static_sequence_reasoning() {
        let out = StaticReasoner
            .reason_over_sequence(&[Label::OpenDoor, Label::PourWater])
            .unwrap();
        assert_eq!(out.overall_task, "open_door -> pour_water");
        assert_eq!(out.step_roles.len(), 2);
        assert_eq!(out.possible_goal, "prepare a drink");
        assert_eq!(out.future_plan, vec!["put the kettle down and drink"]);
        assert_eq!(
            StaticReasoner.reason_over_sequence(&[]).unwrap(),
            TemporalReasoning::default()
        );
    }
}
