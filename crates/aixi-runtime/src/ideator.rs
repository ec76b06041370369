//! [`Ideator`] – chooses the next action from the constitution, the tool
//! documentation and the entire history.
//!
//! # Response contract
//!
//! The model may answer with a JSON object matching [`ActionProposal`]
//! (its schema is sent as `response_format`), or with the text form:
//!
//! ```text
//! REASONING:
//! <why this action serves the constitution>
//!
//! ACTION:
//! subenvironment: file_system
//! input_body: {"action": "list_files", "path": "."}
//! ```
//!
//! Anything else is [`IdeatorError::Malformed`].  The `input_body` is passed
//! through untouched; only the chosen sub-environment interprets it.

use std::sync::Arc;

use aixi_memory::History;
use aixi_types::{
    Action, ActionProposal, ChatMessage, Constitution, InferenceBackend, InferenceError,
    InferenceRequest,
};
use schemars::schema_for;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 4096;

const PREAMBLE: &str = "You are an autonomous AI agent operating under the LLM-AIXI framework.\n\
You must choose your next action based on your constitution, history, and available tools.";

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdeatorError {
    /// The reply could not be turned into an action.  Recoverable by
    /// re-prompting.
    #[error("malformed ideator output: {0}")]
    Malformed(String),
    /// The backend failed in a way re-prompting cannot fix.
    #[error(transparent)]
    Backend(InferenceError),
}

impl From<InferenceError> for IdeatorError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::BadResponse(msg) => IdeatorError::Malformed(msg),
            other => IdeatorError::Backend(other),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ideator
// ─────────────────────────────────────────────────────────────────────────────

pub struct Ideator {
    backend: Arc<dyn InferenceBackend>,
    constitution: Constitution,
    temperature: f32,
    structured_output: bool,
}

impl Ideator {
    pub fn new(backend: Arc<dyn InferenceBackend>, constitution: Constitution) -> Self {
        Self {
            backend,
            constitution,
            temperature: DEFAULT_TEMPERATURE,
            structured_output: true,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Whether to send the [`ActionProposal`] schema as `response_format`.
    /// Some local servers reject the field; the text form works everywhere.
    pub fn with_structured_output(mut self, enabled: bool) -> Self {
        self.structured_output = enabled;
        self
    }

    /// Build the user prompt for one proposal attempt.
    pub fn build_prompt(&self, history: &History, tool_docs: &str, clarification: Option<&str>) -> String {
        let mut parts = vec![
            "=== YOUR CONSTITUTION ===".to_string(),
            self.constitution.text().to_string(),
            String::new(),
            "=== AVAILABLE SUBENVIRONMENTS (TOOLS) ===".to_string(),
            tool_docs.to_string(),
            String::new(),
            "=== YOUR HISTORY ===".to_string(),
            history.render(),
            String::new(),
        ];

        if let Some(feedback) = history.last_evaluation() {
            parts.extend([
                "=== JUDGE'S FEEDBACK ON YOUR LAST ACTION ===".to_string(),
                format!("Your last action was evaluated thusly: {}", feedback.text),
                "Use this feedback to improve your next action.".to_string(),
                String::new(),
            ]);
        }

        if let Some(problem) = clarification {
            parts.extend([
                "=== YOUR PREVIOUS RESPONSE COULD NOT BE USED ===".to_string(),
                problem.to_string(),
                "Answer again, following the required format exactly.".to_string(),
                String::new(),
            ]);
        }

        parts.extend(
            [
                "=== INSTRUCTIONS ===",
                "Based on your constitution, history, and any judge feedback, choose your next action.",
                "",
                "You must respond with EXACTLY this format:",
                "",
                "REASONING:",
                "[Explain your reasoning for this action, connecting it to your constitution and goals]",
                "",
                "ACTION:",
                "subenvironment: [name of subenvironment]",
                "input_body: [JSON input for the subenvironment]",
                "",
            ]
            .map(String::from),
        );
        if self.structured_output {
            parts.push(
                "Alternatively, reply with a single JSON object with the fields \
                 \"reasoning\", \"subenvironment\" and \"input_body\"."
                    .to_string(),
            );
            parts.push(String::new());
        }
        parts.extend(
            [
                "IMPORTANT:",
                "- Follow your constitution strictly",
                "- Learn from judge feedback",
                "- Choose actions that advance your primary objective",
                "- Ensure input_body is valid JSON for the chosen subenvironment",
                "- Be strategic and avoid redundant actions",
                "",
                "Choose your action now:",
            ]
            .map(String::from),
        );
        parts.join("\n")
    }

    /// Ask the backend for the next action.
    ///
    /// `clarification` describes why the previous attempt in this cycle was
    /// unusable; it is `None` on the first attempt.
    ///
    /// # Errors
    ///
    /// - [`IdeatorError::Malformed`] – the reply did not follow the contract
    ///   (an empty completion counts).
    /// - [`IdeatorError::Backend`] – unavailable backend, context overflow or
    ///   timeout.
    pub async fn propose(
        &self,
        history: &History,
        tool_docs: &str,
        clarification: Option<&str>,
    ) -> Result<Action, IdeatorError> {
        let prompt = self.build_prompt(history, tool_docs, clarification);
        debug!(prompt_chars = prompt.len(), cycles = history.len(), "ideator prompt built");
        let mut request = InferenceRequest::new(vec![
            ChatMessage::system(PREAMBLE),
            ChatMessage::user(prompt),
        ])
        .temperature(self.temperature)
        .max_tokens(MAX_TOKENS);
        if self.structured_output {
            if let Ok(schema) = serde_json::to_value(schema_for!(ActionProposal)) {
                request = request.response_schema(schema);
            }
        }
        let completion = self.backend.complete(request).await?;
        parse_response(&completion.text).map_err(IdeatorError::Malformed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Remove a surrounding Markdown code fence, if present.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Turn a model reply into an [`Action`], or say why it cannot be.
pub fn parse_response(text: &str) -> Result<Action, String> {
    let text = strip_fence(text);
    if text.is_empty() {
        return Err("Empty response".to_string());
    }

    if text.starts_with('{') {
        match serde_json::from_str::<ActionProposal>(text) {
            Ok(proposal) => {
                let action = proposal.into_action();
                if action.subenvironment.is_empty() {
                    return Err("No subenvironment specified in action".to_string());
                }
                return Ok(action);
            }
            Err(e) if !text.contains("ACTION:") => {
                return Err(format!("Invalid JSON action object: {e}"));
            }
            Err(_) => {}
        }
    }

    parse_text_form(text)
}

fn parse_text_form(text: &str) -> Result<Action, String> {
    let reasoning = text
        .find("REASONING:")
        .map(|start| {
            let rest = &text[start + "REASONING:".len()..];
            let end = rest.find("ACTION:").unwrap_or(rest.len());
            rest[..end].trim()
        })
        .unwrap_or_default();

    let action_start = text
        .find("ACTION:")
        .ok_or_else(|| "No ACTION section found in response".to_string())?;
    let action_text = text[action_start + "ACTION:".len()..].trim();

    let subenvironment = action_text
        .find("subenvironment:")
        .map(|start| {
            let rest = &action_text[start + "subenvironment:".len()..];
            rest.lines().next().unwrap_or_default().trim()
        })
        .filter(|id| !id.is_empty())
        .ok_or_else(|| "No subenvironment specified in action".to_string())?;

    let input_body = action_text
        .find("input_body:")
        .map(|start| strip_fence(&action_text[start + "input_body:".len()..]))
        .ok_or_else(|| "No input_body specified in action".to_string())?;

    Ok(Action::new(subenvironment, input_body).with_reasoning(reasoning))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use aixi_types::{Cycle, CycleOutcome, Evaluation, Observation, TokenUsage};

    fn ideator(backend: &ScriptedBackend) -> Ideator {
        Ideator::new(backend.shared(), Constitution::new("Explore the working directory."))
    }

    fn history_with_feedback(feedback: &str) -> History {
        let mut history = History::new();
        history
            .append(
                Cycle::new(
                    0,
                    Action::new("file_system", r#"{"action":"list_files","path":"."}"#),
                    Observation::success("SUCCESS: 0 entries"),
                    Evaluation {
                        cycle_index: 0,
                        text: feedback.into(),
                    },
                    CycleOutcome::Executed,
                    TokenUsage::default(),
                    TokenUsage::default(),
                )
                .unwrap(),
            )
            .unwrap();
        history
    }

    #[test]
    fn parses_text_form() {
        let reply = "REASONING:\nI should look around first.\n\nACTION:\nsubenvironment: file_system\ninput_body: {\"action\": \"list_files\", \"path\": \".\"}";
        let action = parse_response(reply).unwrap();
        assert_eq!(action.subenvironment, "file_system");
        assert_eq!(action.input_body, r#"{"action": "list_files", "path": "."}"#);
        assert_eq!(action.reasoning, "I should look around first.");
    }

    #[test]
    fn multiline_input_body_is_kept_whole() {
        let reply = "ACTION:\nsubenvironment: code_executor\ninput_body: {\n  \"code\": \"print(1)\"\n}";
        let action = parse_response(reply).unwrap();
        assert!(action.input_body.starts_with('{'));
        assert!(action.input_body.ends_with('}'));
        assert_eq!(action.reasoning, "");
    }

    #[test]
    fn fenced_input_body_is_unwrapped() {
        let reply = "ACTION:\nsubenvironment: web_search\ninput_body: ```json\n{\"query\": \"aixi\"}\n```";
        let action = parse_response(reply).unwrap();
        assert_eq!(action.input_body, r#"{"query": "aixi"}"#);
    }

    #[test]
    fn non_json_input_body_is_not_rejected_here() {
        let reply = "ACTION:\nsubenvironment: shell\ninput_body: rm -rf /";
        let action = parse_response(reply).unwrap();
        assert_eq!(action.subenvironment, "shell");
        assert_eq!(action.input_body, "rm -rf /");
    }

    #[test]
    fn parses_json_form_inside_fence() {
        let reply = "```json\n{\"reasoning\":\"search\",\"subenvironment\":\"web_search\",\"input_body\":{\"query\":\"aixi\"}}\n```";
        let action = parse_response(reply).unwrap();
        assert_eq!(action.subenvironment, "web_search");
        assert_eq!(action.reasoning, "search");
        let body: serde_json::Value = serde_json::from_str(&action.input_body).unwrap();
        assert_eq!(body["query"], "aixi");
    }

    #[test]
    fn missing_sections_are_reported() {
        assert_eq!(
            parse_response("I think I will read a file.").unwrap_err(),
            "No ACTION section found in response"
        );
        assert_eq!(
            parse_response("ACTION:\ninput_body: {}").unwrap_err(),
            "No subenvironment specified in action"
        );
        assert_eq!(
            parse_response("ACTION:\nsubenvironment:   \ninput_body: {}").unwrap_err(),
            "No subenvironment specified in action"
        );
        assert_eq!(
            parse_response("ACTION:\nsubenvironment: file_system").unwrap_err(),
            "No input_body specified in action"
        );
        assert!(parse_response("{\"reasoning\": 1").unwrap_err().starts_with("Invalid JSON"));
    }

    #[test]
    fn prompt_contains_constitution_docs_and_full_history() {
        let backend = ScriptedBackend::new();
        let history = history_with_feedback("Good start, now read README.");
        let prompt = ideator(&backend).build_prompt(&history, "TOOL DOCS HERE", None);
        assert!(prompt.contains("=== YOUR CONSTITUTION ===\nExplore the working directory."));
        assert!(prompt.contains("TOOL DOCS HERE"));
        assert!(prompt.contains("--- CYCLE 0 ACTION ---"));
        assert!(prompt.contains(
            "Your last action was evaluated thusly: Good start, now read README."
        ));
        assert!(!prompt.contains("COULD NOT BE USED"));
    }

    #[test]
    fn empty_history_prompt_has_no_feedback_section() {
        let backend = ScriptedBackend::new();
        let prompt = ideator(&backend).build_prompt(&History::new(), "docs", Some("No ACTION section found in response"));
        assert!(prompt.contains("No actions taken yet."));
        assert!(!prompt.contains("JUDGE'S FEEDBACK"));
        assert!(prompt.contains("No ACTION section found in response"));
    }

    #[tokio::test]
    async fn propose_sends_schema_and_temperature() {
        let backend = ScriptedBackend::new()
            .then_text("ACTION:\nsubenvironment: consultant\ninput_body: {\"action\":\"consult\",\"question\":\"?\"}");
        let action = ideator(&backend)
            .propose(&History::new(), "docs", None)
            .await
            .unwrap();
        assert_eq!(action.subenvironment, "consultant");
        let request = &backend.requests()[0];
        assert_eq!(request.temperature, Some(DEFAULT_TEMPERATURE));
        assert_eq!(request.max_tokens, Some(MAX_TOKENS));
        let schema = request.response_schema.as_ref().unwrap().to_string();
        assert!(schema.contains("subenvironment"));
        assert!(schema.contains("input_body"));
    }

    #[tokio::test]
    async fn text_only_mode_omits_schema() {
        let backend = ScriptedBackend::new().then_text("ACTION:\nsubenvironment: x\ninput_body: {}");
        ideator(&backend)
            .with_structured_output(false)
            .propose(&History::new(), "docs", None)
            .await
            .unwrap();
        assert!(backend.requests()[0].response_schema.is_none());
    }

    #[tokio::test]
    async fn bad_response_counts_as_malformed() {
        let backend = ScriptedBackend::new()
            .then_error(InferenceError::BadResponse("empty completion".into()));
        let err = ideator(&backend)
            .propose(&History::new(), "docs", None)
            .await
            .unwrap_err();
        assert_eq!(err, IdeatorError::Malformed("empty completion".into()));
    }

    #[tokio::test]
    async fn unavailable_and_overflow_are_backend_errors() {
        let backend = ScriptedBackend::new()
            .then_error(InferenceError::Unavailable("refused".into()))
            .then_error(InferenceError::ContextOverflow("too long".into()));
        let ideator = ideator(&backend);
        let first = ideator.propose(&History::new(), "docs", None).await.unwrap_err();
        assert!(matches!(first, IdeatorError::Backend(InferenceError::Unavailable(_))));
        let second = ideator.propose(&History::new(), "docs", None).await.unwrap_err();
        assert!(matches!(second, IdeatorError::Backend(InferenceError::ContextOverflow(_))));
    }
}
