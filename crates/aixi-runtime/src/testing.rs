//! Scripted inference backend shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aixi_types::{Completion, InferenceBackend, InferenceError, InferenceRequest};

#[derive(Default)]
struct Script {
    queue: VecDeque<Result<Completion, InferenceError>>,
    fallback: Option<String>,
    requests: Vec<InferenceRequest>,
}

/// Replays queued completions in order, then the fallback reply (if any),
/// then `BadResponse("script exhausted")`.  Clones share one script.
#[derive(Clone, Default)]
pub(crate) struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn then_completion(self, completion: Completion) -> Self {
        self.script.lock().unwrap().queue.push_back(Ok(completion));
        self
    }

    pub(crate) fn then_text(self, text: impl Into<String>) -> Self {
        self.then_completion(Completion::text(text))
    }

    pub(crate) fn then_error(self, error: InferenceError) -> Self {
        self.script.lock().unwrap().queue.push_back(Err(error));
        self
    }

    pub(crate) fn otherwise(self, text: impl Into<String>) -> Self {
        self.script.lock().unwrap().fallback = Some(text.into());
        self
    }

    pub(crate) fn shared(&self) -> Arc<dyn InferenceBackend> {
        Arc::new(self.clone())
    }

    pub(crate) fn requests(&self) -> Vec<InferenceRequest> {
        self.script.lock().unwrap().requests.clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.script.lock().unwrap().requests.len()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn complete(&self, request: InferenceRequest) -> Result<Completion, InferenceError> {
        let mut script = self.script.lock().unwrap();
        script.requests.push(request);
        if let Some(next) = script.queue.pop_front() {
            return next;
        }
        match &script.fallback {
            Some(text) => Ok(Completion::text(text.clone())),
            None => Err(InferenceError::BadResponse("script exhausted".into())),
        }
    }
}
