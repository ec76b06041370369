//! `aixi-runtime` – The action–perception loop.
//!
//! Everything that talks to the language model lives here, together with the
//! orchestrator that sequences ideation, gatekeeping, execution and judgement.
//!
//! # Modules
//!
//! - [`orchestrator`] – [`Orchestrator`][orchestrator::Orchestrator]: runs
//!   cycles until the lifespan is used up, the backend fails fatally or the
//!   run is cancelled, and returns a [`RunReport`][orchestrator::RunReport].
//!   Completed cycles are also published on a `tokio::sync::broadcast` feed.
//! - [`ideator`] – [`Ideator`][ideator::Ideator]: builds the full-history
//!   prompt and parses the reply into an [`Action`][aixi_types::Action].
//!   Malformed replies surface as
//!   [`IdeatorError::Malformed`][ideator::IdeatorError::Malformed] so the
//!   orchestrator can re-prompt.
//! - [`judge`] – [`Judge`][judge::Judge]: grades a single (action,
//!   observation) pair without any history, and reviews a finished run.
//! - [`llm_driver`] – [`LlmDriver`][llm_driver::LlmDriver]: an
//!   OpenAI-compatible async HTTP client for local or hosted models.  The
//!   [`ActionProposal`][aixi_types::ActionProposal] JSON Schema is sent via
//!   `response_format` when structured output is enabled.
//! - [`metered`] – [`MeteredBackend`][metered::MeteredBackend]: wraps any
//!   backend and records each successful call in a
//!   [`TokenTracker`][usage::TokenTracker].
//! - [`usage`] – token and cost accounting per [`CallKind`][aixi_types::CallKind].
//! - [`loop_guard`] – [`LoopGuard`][loop_guard::LoopGuard]: notices when the
//!   Ideator keeps proposing the same action.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.
//!   Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod ideator;
pub mod judge;
pub mod llm_driver;
pub mod loop_guard;
pub mod metered;
pub mod orchestrator;
pub mod telemetry;
pub mod usage;

#[cfg(test)]
mod testing;

pub use ideator::{Ideator, IdeatorError};
pub use judge::Judge;
pub use llm_driver::LlmDriver;
pub use loop_guard::LoopGuard;
pub use metered::MeteredBackend;
pub use orchestrator::{
    CancelFlag, FatalKind, Halt, IDEATOR_AGENT_ID, Orchestrator, OrchestratorConfig, RunReport,
};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use usage::{Pricing, TokenTracker, UsageRecord};
