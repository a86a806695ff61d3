use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{ReasoningAgent, ReasoningResult, TemporalReasoning, parse_reasoning, parse_temporal};
use crate::{
    config::ReasoningConfig,
    error::{ActionError, Result},
    types::{Label, PredictionRecord},
};

const SYSTEM_PROMPT: &str = "You are a careful embodied AI researcher. Output valid JSON only.";

const ACTION_PROMPT: &str = r#"You are an embodied AI research assistant.

You are given a high-level human action label. Based on common sense,
infer the underlying intent, environment context, and task-level information.

Action categories:
{categories}

Current action label: "{label}" (classifier confidence {confidence})

Additional context:
{hint}

Return ONLY a valid JSON object with the following keys (ALL must appear):

1. intent (string)
2. next_step (string)
3. explanation (string; 1-3 sentences)
4. environment (object):
   - scene_type (string)
   - key_objects (list of strings)
5. agent_state (string)
6. affordances (list of strings; 3-5 items)
7. constraints (list of strings; 2-4 items)
8. task_goal (string)
9. current_step (string)
10. future_steps (list of strings; 2-4 items)
11. target_objects (list of strings; 2-4 items)

Output JSON only, without markdown code fences or extra text."#;

const SEQUENCE_PROMPT: &str = r#"
You are an embodied AI researcher analyzing a sequence of human actions.

Given the following action sequence (in order):
{history}

Analyze the sequence as a single task episode and return a strict JSON object
with the following keys (ALL must appear):

- overall_task (string)
- step_roles (list of strings; one per action in the same order)
- possible_goal (string)
- future_plan (list of 2-4 strings)
- uncertainty_notes (list of 1-3 strings)

Return JSON only. Do not include any extra text."#;

fn scene_hint(label: Label) -> &'static str {
    match label {
        Label::OpenDoor => {
            concat!(
                "Usually involves approaching a door and opening it. ",
                "Common scenes include rooms, corridors, offices, or classrooms."
            )
        }
        Label::PickBook => {
            concat!(
                "Usually involves picking up a book from a shelf or table. ",
                "Common scenes include libraries, study rooms, or offices."
            )
        }
        Label::PourWater => {
            concat!(
                "Usually involves pouring liquid from a container into a cup. ",
                "Common scenes include kitchens, pantries, or office break rooms."
            )
        }
        Label::WalkStop => {
            concat!(
                "Usually involves walking and then stopping briefly. ",
                "Common scenes include corridors, indoor spaces, sidewalks, or open areas."
            )
        }
    }
}

fn action_prompt(prediction: &PredictionRecord) -> String {
    let categories = Label::ALL
        .iter()
        .map(|l| format!("- {}: {}.", l.as_str(), l.description()))
        .collect::<Vec<_>>()
        .join("\n");
    ACTION_PROMPT
        .replace("{categories}", &categories)
        .replace("{label}", prediction.action.as_str())
        .replace("{confidence}", &format!("{:.2}", prediction.confidence))
        .replace("{hint}", scene_hint(prediction.action))
}

fn sequence_prompt(history: &[Label]) -> String {
    let steps: Vec<&str> = history.iter().map(|l| l.as_str()).collect();
    SEQUENCE_PROMPT.replace("{history}", &steps.join(" -> "))
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Reasoning agent backed by an OpenAI-compatible chat-completions API.
pub struct OpenAiReasoner {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: String,
}

impl OpenAiReasoner {
    /// Reads the API key from the environment variable named in `cfg`.
    pub fn from_config(cfg: &ReasoningConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
            ActionError::Reasoning(format!(
                "environment variable {} is not set; export an API key or use --offline",
                cfg.api_key_env
            ))
        })?;
        Self::with_api_key(cfg, api_key)
    }

    pub fn with_api_key(cfg: &ReasoningConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|err| ActionError::Reasoning(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", cfg.api_base.trim_end_matches('/')),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            api_key: api_key.into(),
        })
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
        };

        log::debug!("requesting completion from {} ({})", self.endpoint, self.model);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|err| ActionError::Reasoning(format!("request failed: {err}")))?
            .error_for_status()
            .map_err(|err| ActionError::Reasoning(format!("completion endpoint error: {err}")))?;

        let body: ChatResponse = response
            .json()
            .map_err(|err| ActionError::Reasoning(format!("unreadable completion: {err}")))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(content)
    }
}

impl ReasoningAgent for OpenAiReasoner {
    fn reason(&self, prediction: &PredictionRecord) -> Result<ReasoningResult> {
        let content = self.complete(&action_prompt(prediction))?;
        Ok(parse_reasoning(&content))
    }

    fn reason_over_sequence(&self, history: &[Label]) -> Result<TemporalReasoning> {
        if history.is_empty() {
            return Ok(TemporalReasoning::default());
        }
        let content = self.complete(&sequence_prompt(history))?;
        Ok(parse_temporal(&content))
    }
}
