//! [`MeteredBackend`] – records every successful completion in a
//! [`TokenTracker`] under a fixed [`CallKind`].

use std::sync::Arc;

use async_trait::async_trait;
use aixi_types::{CallKind, Completion, InferenceBackend, InferenceError, InferenceRequest};
use tracing::debug;

use crate::usage::{TokenTracker, estimate_tokens};

pub struct MeteredBackend {
    inner: Arc<dyn InferenceBackend>,
    tracker: TokenTracker,
    kind: CallKind,
}

impl MeteredBackend {
    pub fn new(inner: Arc<dyn InferenceBackend>, tracker: TokenTracker, kind: CallKind) -> Self {
        Self {
            inner,
            tracker,
            kind,
        }
    }

    /// Convenience for wiring: the metered backend as a shareable trait
    /// object.
    pub fn shared(
        inner: Arc<dyn InferenceBackend>,
        tracker: TokenTracker,
        kind: CallKind,
    ) -> Arc<dyn InferenceBackend> {
        Arc::new(Self::new(inner, tracker, kind))
    }
}

#[async_trait]
impl InferenceBackend for MeteredBackend {
    async fn complete(&self, request: InferenceRequest) -> Result<Completion, InferenceError> {
        let prompt_estimate = estimate_tokens(&request.prompt_text());
        let completion = self.inner.complete(request).await?;
        let prompt_tokens = completion.prompt_tokens.unwrap_or(prompt_estimate);
        let completion_tokens = completion
            .completion_tokens
            .unwrap_or_else(|| estimate_tokens(&completion.text));
        let record = self.tracker.record(self.kind, prompt_tokens, completion_tokens);
        debug!(
            kind = %self.kind,
            prompt_tokens,
            completion_tokens,
            cost = record.estimated_cost_usd,
            "inference call metered"
        );
        Ok(completion)
    }
}
