//! [`SimSubEnvironment`] – in-process scripted sub-environment.
//!
//! Stands in for any [`SubEnvKind`] without touching the file system, the
//! network or an interpreter, so the whole loop can run in a unit test or a
//! dry run.
//!
//! # Stub behaviour
//!
//! | Setting | Behaviour |
//! |---|---|
//! | queued replies | returned in order, one per `execute` |
//! | default reply  | returned once the queue is empty |
//! | `failing`      | every call returns [`SubEnvError::Failed`] |
//! | `hanging`      | every call sleeps before answering |
//!
//! Calls are counted and their inputs recorded even when failing.
//!
//! # Example
//!
//! ```rust
//! # tokio_test_block(async {
//! use aixi_env::{SimSubEnvironment, SubEnvironment};
//! use aixi_types::SubEnvKind;
//!
//! let sim = SimSubEnvironment::new(SubEnvKind::FileSystem).with_reply("SUCCESS: ok");
//! assert_eq!(sim.execute("{}").await.unwrap(), "SUCCESS: ok");
//! assert_eq!(sim.call_count(), 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use aixi_types::SubEnvKind;

use crate::subenv::{SubEnvError, SubEnvironment};

/// Scripted sub-environment for tests and dry runs.
pub struct SimSubEnvironment {
    kind: SubEnvKind,
    queued: Mutex<VecDeque<Result<String, SubEnvError>>>,
    default_reply: String,
    failure: Option<String>,
    hang: Option<Duration>,
    calls: Arc<AtomicUsize>,
    inputs: Arc<Mutex<Vec<String>>>,
}

impl SimSubEnvironment {
    pub fn new(kind: SubEnvKind) -> Self {
        Self {
            kind,
            queued: Mutex::new(VecDeque::new()),
            default_reply: format!("SUCCESS: simulated {kind} call"),
            failure: None,
            hang: None,
            calls: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reply returned whenever no queued response is left.
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Queue a one-off response.
    pub fn then(self, response: Result<String, SubEnvError>) -> Self {
        if let Ok(mut q) = self.queued.lock() {
            q.push_back(response);
        }
        self
    }

    /// Fail every call with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Sleep for `delay` before every answer.
    pub fn hanging(mut self, delay: Duration) -> Self {
        self.hang = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared call counter that stays readable after the sim is moved into a
    /// registry.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Shared log of every input received.
    pub fn input_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.inputs)
    }
}

#[async_trait]
impl SubEnvironment for SimSubEnvironment {
    fn kind(&self) -> SubEnvKind {
        self.kind
    }

    fn description(&self) -> &str {
        "Simulated sub-environment"
    }

    fn docs(&self) -> &str {
        "SIMULATED SUBENVIRONMENT\n\nAccepts any input body and returns a canned reply."
    }

    async fn execute(&self, input: &str) -> Result<String, SubEnvError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.inputs.lock() {
            log.push(input.to_string());
        }
        if let Some(delay) = self.hang {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(SubEnvError::Failed(message.clone()));
        }
        let queued = self.queued.lock().ok().and_then(|mut q| q.pop_front());
        queued.unwrap_or_else(|| Ok(self.default_reply.clone()))
    }
}
