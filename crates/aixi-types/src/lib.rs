//! `aixi-types` – shared vocabulary of the action–perception loop.
//!
//! Every other crate in the workspace speaks in these types: the
//! [`Action`] proposed by the Ideator, the [`Observation`] returned by a
//! sub-environment, the Judge's [`Evaluation`], and the immutable [`Cycle`]
//! record that ties them together with its [`TokenUsage`].
//!
//! The inference-backend seam lives in [`inference`].

pub mod inference;

use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use inference::{
    ChatMessage, Completion, InferenceBackend, InferenceError, InferenceRequest, Role,
};

/// Prefix carried by every rejection observation.
pub const ACCESS_DENIED_MARKER: &str = "access denied:";

// ─────────────────────────────────────────────────────────────────────────────
// Constitution
// ─────────────────────────────────────────────────────────────────────────────

/// The fixed governing document.  Cheap to clone; all clones share one
/// immutable buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constitution(Arc<str>);

impl Constitution {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    /// `true` when the text is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sub-environment identifiers and capabilities
// ─────────────────────────────────────────────────────────────────────────────

/// The closed set of sub-environment variants the loop knows how to host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubEnvKind {
    FileSystem,
    WebSearch,
    CodeExecutor,
    Consultant,
}

impl SubEnvKind {
    pub const ALL: [SubEnvKind; 4] = [
        SubEnvKind::FileSystem,
        SubEnvKind::WebSearch,
        SubEnvKind::CodeExecutor,
        SubEnvKind::Consultant,
    ];

    /// Canonical identifier used in prompts, actions and config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubEnvKind::FileSystem => "file_system",
            SubEnvKind::WebSearch => "web_search",
            SubEnvKind::CodeExecutor => "code_executor",
            SubEnvKind::Consultant => "consultant",
        }
    }

    fn known_ids() -> String {
        Self::ALL
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for SubEnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubEnvKind {
    type Err = AixiError;

    /// Case-insensitive; surrounding whitespace and backticks are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().trim_matches('`').trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == id)
            .ok_or_else(|| AixiError::UnknownSubEnvironment {
                id: s.trim().to_string(),
                available: Self::known_ids(),
            })
    }
}

/// Capability-based security model: what an agent identity may do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Permission to dispatch actions to a sub-environment.
    SubEnvInvoke(SubEnvKind),
}

// ─────────────────────────────────────────────────────────────────────────────
// Action
// ─────────────────────────────────────────────────────────────────────────────

/// An action chosen by the Ideator: a sub-environment plus free-text input.
///
/// `subenvironment` is kept as the raw text the Ideator produced so that
/// unknown identifiers survive until the access gate rejects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub subenvironment: String,
    pub input_body: String,
    #[serde(default)]
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl Action {
    pub fn new(subenvironment: impl Into<String>, input_body: impl Into<String>) -> Self {
        Self {
            subenvironment: subenvironment.into(),
            input_body: input_body.into(),
            reasoning: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// Placeholder action for a cycle whose Ideator output never parsed.
    pub fn none() -> Self {
        Self::new("", "")
    }

    pub fn is_none(&self) -> bool {
        self.subenvironment.is_empty() && self.input_body.is_empty()
    }

    /// Stable key used to spot an agent repeating itself.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}\u{1f}{}",
            self.subenvironment.trim().to_ascii_lowercase(),
            self.input_body.trim()
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("(no action)");
        }
        write!(f, "Subenvironment: {}\nInput Body: {}", self.subenvironment, self.input_body)?;
        if !self.reasoning.is_empty() {
            write!(f, "\nAgent's Reasoning: {}", self.reasoning)?;
        }
        Ok(())
    }
}

/// Wire shape the Ideator is asked to produce.
///
/// `input_body` accepts any JSON value: models frequently emit the
/// sub-environment input as an object instead of a string.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ActionProposal {
    /// Why this action advances the constitution's objective.
    #[serde(default)]
    pub reasoning: String,
    /// Identifier of the sub-environment to use.
    pub subenvironment: String,
    /// Input for the sub-environment, usually a JSON object.
    pub input_body: serde_json::Value,
}

impl ActionProposal {
    pub fn into_action(self) -> Action {
        let input = match self.input_body {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Action::new(self.subenvironment.trim(), input.trim()).with_reasoning(self.reasoning.trim())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observation / Evaluation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    Success,
    ToolError,
    AccessDenied,
    Timeout,
    Malformed,
}

/// Free-text result of executing an [`Action`], or a description of why it
/// could not be executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub kind: ObservationKind,
    pub text: String,
}

impl Observation {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: ObservationKind::Success,
            text: text.into(),
        }
    }

    pub fn tool_error(subenvironment: &str, details: impl fmt::Display) -> Self {
        Self {
            kind: ObservationKind::ToolError,
            text: format!("ERROR: sub-environment '{subenvironment}' failed: {details}"),
        }
    }

    pub fn access_denied(reason: impl fmt::Display) -> Self {
        Self {
            kind: ObservationKind::AccessDenied,
            text: format!("{ACCESS_DENIED_MARKER} {reason}"),
        }
    }

    pub fn timeout(subenvironment: &str, limit_ms: u64) -> Self {
        Self {
            kind: ObservationKind::Timeout,
            text: format!("ERROR: sub-environment '{subenvironment}' timed out after {limit_ms} ms"),
        }
    }

    pub fn malformed(attempts: u32, last_error: impl fmt::Display) -> Self {
        Self {
            kind: ObservationKind::Malformed,
            text: format!(
                "ERROR: no valid action could be parsed after {attempts} attempt(s): {last_error}"
            ),
        }
    }

    pub fn is_rejection(&self) -> bool {
        self.kind == ObservationKind::AccessDenied
    }
}

/// The Judge's report for exactly one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub cycle_index: u64,
    pub text: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Token accounting
// ─────────────────────────────────────────────────────────────────────────────

/// Which component issued an inference call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Ideator,
    Judge,
    Consultant,
    RunReview,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallKind::Ideator => "ideator",
            CallKind::Judge => "judge",
            CallKind::Consultant => "consultant",
            CallKind::RunReview => "run_review",
        })
    }
}

/// Additive usage counters; used both for per-cycle deltas and cumulative
/// totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Usage accrued since `earlier`.  Counters never go negative.
    pub fn since(&self, earlier: &TokenUsage) -> TokenUsage {
        TokenUsage {
            calls: self.calls.saturating_sub(earlier.calls),
            prompt_tokens: self.prompt_tokens.saturating_sub(earlier.prompt_tokens),
            completion_tokens: self.completion_tokens.saturating_sub(earlier.completion_tokens),
            estimated_cost_usd: (self.estimated_cost_usd - earlier.estimated_cost_usd).max(0.0),
        }
    }

    /// `true` when no counter of `self` is below the matching counter of
    /// `other`.
    pub fn covers(&self, other: &TokenUsage) -> bool {
        self.calls >= other.calls
            && self.prompt_tokens >= other.prompt_tokens
            && self.completion_tokens >= other.completion_tokens
            && self.estimated_cost_usd >= other.estimated_cost_usd
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(mut self, rhs: TokenUsage) -> TokenUsage {
        self += rhs;
        self
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        self.calls += rhs.calls;
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.estimated_cost_usd += rhs.estimated_cost_usd;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cycle
// ─────────────────────────────────────────────────────────────────────────────

/// How a cycle's action was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Executed,
    ToolFailed,
    TimedOut,
    Rejected,
    Malformed { attempts: u32 },
}

/// One complete action–perception unit.  Fields are read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    index: u64,
    action: Action,
    observation: Observation,
    evaluation: Evaluation,
    outcome: CycleOutcome,
    usage_delta: TokenUsage,
    totals_after: TokenUsage,
    timestamp: DateTime<Utc>,
}

impl Cycle {
    /// Assemble a cycle record.
    ///
    /// # Errors
    ///
    /// [`AixiError::EvaluationMismatch`] when `evaluation` was produced for a
    /// different cycle index.
    pub fn new(
        index: u64,
        action: Action,
        observation: Observation,
        evaluation: Evaluation,
        outcome: CycleOutcome,
        usage_delta: TokenUsage,
        totals_after: TokenUsage,
    ) -> Result<Self, AixiError> {
        if evaluation.cycle_index != index {
            return Err(AixiError::EvaluationMismatch {
                cycle: index,
                evaluation: evaluation.cycle_index,
            });
        }
        Ok(Self {
            index,
            action,
            observation,
            evaluation,
            outcome,
            usage_delta,
            totals_after,
            timestamp: Utc::now(),
        })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    pub fn evaluation(&self) -> &Evaluation {
        &self.evaluation
    }

    pub fn outcome(&self) -> &CycleOutcome {
        &self.outcome
    }

    pub fn usage_delta(&self) -> &TokenUsage {
        &self.usage_delta
    }

    pub fn totals_after(&self) -> &TokenUsage {
        &self.totals_after
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AixiError {
    #[error("Capability Denied: {0:?}")]
    Unauthorized(Capability),

    #[error("unknown sub-environment '{id}'; available: {available}")]
    UnknownSubEnvironment { id: String, available: String },

    #[error("sub-environment '{0}' is not registered")]
    NotRegistered(SubEnvKind),

    #[error("policy '{rule}' violated: {details}")]
    PolicyViolation { rule: String, details: String },

    #[error("history order violated: expected cycle {expected}, got {got}")]
    HistoryOrder { expected: u64, got: u64 },

    #[error("evaluation for cycle {evaluation} attached to cycle {cycle}")]
    EvaluationMismatch { cycle: u64, evaluation: u64 },

    #[error("storage error: {0}")]
    Storage(String),
}
