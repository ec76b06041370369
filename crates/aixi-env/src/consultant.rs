//! `consultant` – a second opinion from the inference backend.
//!
//! The consultant sees only the question it is asked, never the run's
//! history, so its answers cannot contaminate the Ideator's reasoning.

use std::sync::Arc;

use async_trait::async_trait;
use aixi_types::{ChatMessage, InferenceBackend, InferenceRequest, SubEnvKind};
use serde::Deserialize;
use tracing::debug;

use crate::subenv::{SubEnvError, SubEnvironment, parse_input};

pub const DEFAULT_TEMPERATURE: f32 = 0.8;
const MAX_TOKENS: u32 = 2048;

const DOCS: &str = r#"
CONSULTANT SUBENVIRONMENT

This subenvironment provides access to a separate LLM for consultation and brainstorming.
It is useful for getting second opinions without polluting the main reasoning history.

INPUT FORMAT (JSON):
{
    "action": "consult" | "brainstorm" | "analyze",

    // For "consult" action:
    "question": "What should I do about X?",
    "context": "optional background information",

    // For "brainstorm" action:
    "topic": "topic to brainstorm about",
    "num_ideas": 5,  // optional, 1-20, default 5

    // For "analyze" action:
    "data": "information to analyze",
    "analysis_type": "general"  // optional: general, pros_cons, summary, critique
}

EXAMPLES:
{"action": "consult", "question": "How should I approach this problem?", "context": "I'm working on..."}
{"action": "brainstorm", "topic": "ways to improve code efficiency", "num_ideas": 7}
{"action": "analyze", "data": "Here's my plan...", "analysis_type": "pros_cons"}

NOTES:
- Responses are independent of main agent history
"#;

#[derive(Debug, Deserialize)]
struct ConsultRequest {
    #[serde(default)]
    action: String,
    #[serde(default)]
    question: String,
    #[serde(default)]
    context: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    num_ideas: Option<i64>,
    #[serde(default)]
    data: String,
    #[serde(default)]
    analysis_type: Option<String>,
}

fn analysis_instruction(analysis_type: &str) -> Option<&'static str> {
    match analysis_type {
        "general" => Some("Please provide a general analysis of the following information:"),
        "pros_cons" => Some("Please analyze the pros and cons of the following:"),
        "summary" => Some("Please provide a concise summary of the following:"),
        "critique" => Some("Please provide a constructive critique of the following:"),
        _ => None,
    }
}

fn title_case(s: &str) -> String {
    s.split('_')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// Consultation, brainstorming and analysis through an inference backend.
pub struct ConsultantEnv {
    backend: Arc<dyn InferenceBackend>,
    temperature: f32,
}

impl ConsultantEnv {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            backend,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    async fn ask(&self, system: &str, prompt: String) -> Result<String, SubEnvError> {
        let request = InferenceRequest::new(vec![
            ChatMessage::system(system),
            ChatMessage::user(prompt),
        ])
        .temperature(self.temperature)
        .max_tokens(MAX_TOKENS);
        let completion = self
            .backend
            .complete(request)
            .await
            .map_err(|e| SubEnvError::Failed(format!("Consultant call failed: {e}")))?;
        let text = completion.text.trim();
        if text.is_empty() {
            return Err(SubEnvError::Failed("No response received from consultant".into()));
        }
        Ok(text.to_string())
    }

    async fn consult(&self, question: &str, context: &str) -> Result<String, SubEnvError> {
        if question.trim().is_empty() {
            return Err(SubEnvError::InvalidInput("Question cannot be empty".into()));
        }
        let mut prompt = String::new();
        if !context.trim().is_empty() {
            prompt.push_str(&format!("CONTEXT:\n{}\n\n", context.trim()));
        }
        prompt.push_str(&format!(
            "QUESTION:\n{}\n\nPlease provide a clear, helpful response:",
            question.trim()
        ));
        let reply = self
            .ask(
                "You are a helpful AI consultant. You are being asked for advice or a second opinion. \
                 Please provide thoughtful, accurate, and helpful guidance.",
                prompt,
            )
            .await?;
        Ok(format!("SUCCESS: Consultation completed.\n\nRESPONSE:\n{reply}"))
    }

    async fn brainstorm(&self, topic: &str, num_ideas: i64) -> Result<String, SubEnvError> {
        if topic.trim().is_empty() {
            return Err(SubEnvError::InvalidInput("Topic cannot be empty".into()));
        }
        if !(1..=20).contains(&num_ideas) {
            return Err(SubEnvError::InvalidInput(
                "Number of ideas must be between 1 and 20".into(),
            ));
        }
        let prompt = format!(
            "Please generate {num_ideas} creative and practical ideas related to the following topic:\n\n\
             TOPIC: {}\n\n\
             Please provide {num_ideas} distinct ideas, each with a brief explanation. \
             Format your response as a numbered list.",
            topic.trim()
        );
        let reply = self
            .ask("You are a creative brainstorming assistant.", prompt)
            .await?;
        Ok(format!(
            "SUCCESS: Brainstorming completed for '{}'.\n\nIDEAS:\n{reply}",
            topic.trim()
        ))
    }

    async fn analyze(&self, data: &str, analysis_type: &str) -> Result<String, SubEnvError> {
        if data.trim().is_empty() {
            return Err(SubEnvError::InvalidInput("Data to analyze cannot be empty".into()));
        }
        let instruction = analysis_instruction(analysis_type).ok_or_else(|| {
            SubEnvError::InvalidInput(format!(
                "Unknown analysis type '{analysis_type}'. Available: general, pros_cons, summary, critique"
            ))
        })?;
        let prompt = format!(
            "{instruction}\n\nDATA TO ANALYZE:\n{}\n\nPlease provide a thorough and insightful analysis:",
            data.trim()
        );
        let reply = self
            .ask("You are a careful, impartial analyst.", prompt)
            .await?;
        Ok(format!(
            "SUCCESS: {} analysis completed.\n\nANALYSIS:\n{reply}",
            title_case(analysis_type)
        ))
    }
}

#[async_trait]
impl SubEnvironment for ConsultantEnv {
    fn kind(&self) -> SubEnvKind {
        SubEnvKind::Consultant
    }

    fn description(&self) -> &str {
        "LLM consultation for second opinions and brainstorming"
    }

    fn docs(&self) -> &str {
        DOCS
    }

    async fn execute(&self, input: &str) -> Result<String, SubEnvError> {
        let req: ConsultRequest = parse_input(input)?;
        debug!(action = %req.action, "consultant request");
        match req.action.as_str() {
            "consult" => self.consult(&req.question, &req.context).await,
            "brainstorm" => self.brainstorm(&req.topic, req.num_ideas.unwrap_or(5)).await,
            "analyze" => {
                let kind = req.analysis_type.as_deref().unwrap_or("general");
                self.analyze(&req.data, kind).await
            }
            other => Err(SubEnvError::InvalidInput(format!(
                "Unknown action '{other}'. Available: consult, brainstorm, analyze"
            ))),
        }
    }
}
