//! [`Orchestrator`] – the action–perception loop.
//!
//! Each cycle runs strictly in order:
//!
//! 1. **Ideate** – ask the [`Ideator`] for an action, re-prompting with a
//!    clarification up to `max_parse_retries` times when the reply is
//!    malformed.  If every attempt fails, a synthetic cycle with
//!    [`Action::none`] is recorded so no index is ever skipped.
//! 2. **Gatekeep** – the [`AccessGate`] resolves the sub-environment id and
//!    checks capability, registration and action rules.  A rejection becomes
//!    an `access denied:` observation and no sub-environment is touched.
//! 3. **Act** – the permitted action runs under `tool_timeout`.  Tool errors
//!    and timeouts become error observations; they never stop the run.
//! 4. **Judge** – the [`Judge`] grades (action, observation) against the
//!    constitution.
//! 5. **Record** – the immutable [`Cycle`] is appended to the [`History`] and
//!    published on the cycle feed.
//!
//! Only an unavailable backend, a context overflow or cancellation stop the
//! run early; the report then names the last completed cycle.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn demo(orchestrator: aixi_runtime::Orchestrator) {
//! let mut feed = orchestrator.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(cycle) = feed.recv().await {
//!         println!("cycle {} -> {:?}", cycle.index(), cycle.outcome());
//!     }
//! });
//! let report = orchestrator.run(20).await;
//! println!("{} cycles, {} tokens", report.history.len(), report.totals.total_tokens());
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use aixi_env::SubEnvRegistry;
use aixi_kernel::AccessGate;
use aixi_memory::History;
use aixi_types::{
    Action, AixiError, Cycle, CycleOutcome, InferenceError, Observation, TokenUsage,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use crate::ideator::{Ideator, IdeatorError};
use crate::judge::Judge;
use crate::loop_guard::LoopGuard;
use crate::usage::TokenTracker;

/// Identity the Ideator's capabilities are granted to.
pub const IDEATOR_AGENT_ID: &str = "ideator";

/// Buffered cycles per feed subscriber before the oldest are dropped.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Extra Ideator attempts per cycle after a malformed reply.
    pub max_parse_retries: u32,
    /// Bound on a single sub-environment execution.
    pub tool_timeout: Duration,
    /// Bound on a single Ideator or Judge call.
    pub inference_timeout: Duration,
    /// Identical consecutive actions before a warning is logged; 0 disables.
    pub loop_guard_threshold: usize,
    pub agent_id: String,
    pub feed_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parse_retries: 2,
            tool_timeout: Duration::from_secs(120),
            inference_timeout: Duration::from_secs(300),
            loop_guard_threshold: 3,
            agent_id: IDEATOR_AGENT_ID.to_string(),
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation
// ─────────────────────────────────────────────────────────────────────────────

/// Shared stop request, checked before every cycle.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Run report
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalKind {
    /// The inference backend could not be reached, refused the call or
    /// timed out.
    BackendUnavailable,
    /// The prompt no longer fits the model's context window.
    ContextOverflow,
    /// The [`CancelFlag`] was raised.
    Cancelled,
    /// A history invariant was violated.  Not expected in practice.
    Internal,
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FatalKind::BackendUnavailable => "backend unavailable",
            FatalKind::ContextOverflow => "context overflow",
            FatalKind::Cancelled => "cancelled",
            FatalKind::Internal => "internal error",
        })
    }
}

/// Why a run stopped before its lifespan was used up.
#[derive(Debug, Clone, PartialEq)]
pub struct Halt {
    pub kind: FatalKind,
    pub message: String,
    /// Index of the last cycle in the history, `None` if there is none.
    pub last_completed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub history: History,
    pub totals: TokenUsage,
    pub halt: Option<Halt>,
}

impl RunReport {
    /// `true` when every requested cycle ran.
    pub fn completed(&self) -> bool {
        self.halt.is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal control flow
// ─────────────────────────────────────────────────────────────────────────────

struct Fatal {
    kind: FatalKind,
    message: String,
}

impl From<InferenceError> for Fatal {
    fn from(e: InferenceError) -> Self {
        let kind = match e {
            InferenceError::ContextOverflow(_) => FatalKind::ContextOverflow,
            InferenceError::Unavailable(_)
            | InferenceError::Timeout(_)
            | InferenceError::BadResponse(_) => FatalKind::BackendUnavailable,
        };
        Fatal {
            kind,
            message: e.to_string(),
        }
    }
}

impl From<AixiError> for Fatal {
    fn from(e: AixiError) -> Self {
        Fatal {
            kind: FatalKind::Internal,
            message: e.to_string(),
        }
    }
}

enum Proposal {
    Ready(Action),
    Malformed { attempts: u32, last_error: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Drives the Ideator, the sub-environments and the Judge for a fixed
/// number of cycles.  Owns the [`History`]; nothing else can append to it.
pub struct Orchestrator {
    ideator: Ideator,
    judge: Judge,
    registry: SubEnvRegistry,
    gate: AccessGate,
    tracker: TokenTracker,
    config: OrchestratorConfig,
    loop_guard: LoopGuard,
    history: History,
    feed: broadcast::Sender<Cycle>,
    cancel: CancelFlag,
    tool_docs: String,
}

impl Orchestrator {
    /// `tracker` must be the tracker the Ideator's and Judge's backends are
    /// metered into; per-cycle usage deltas are read from it.
    pub fn new(
        ideator: Ideator,
        judge: Judge,
        registry: SubEnvRegistry,
        gate: AccessGate,
        tracker: TokenTracker,
        config: OrchestratorConfig,
    ) -> Self {
        let tool_docs = registry.tool_docs_for(&gate.available_to(&config.agent_id));
        let (feed, _) = broadcast::channel(config.feed_capacity.max(1));
        Self {
            ideator,
            judge,
            registry,
            gate,
            tracker,
            loop_guard: LoopGuard::new(config.loop_guard_threshold),
            config,
            history: History::new(),
            feed,
            cancel: CancelFlag::new(),
            tool_docs,
        }
    }

    /// Share an externally owned cancel flag (e.g. one set by a signal
    /// handler).
    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Receive every completed cycle.  A lagging subscriber misses cycles
    /// instead of slowing the loop.
    pub fn subscribe(&self) -> broadcast::Receiver<Cycle> {
        self.feed.subscribe()
    }

    /// Tool documentation the Ideator is shown: only the sub-environments
    /// it may actually use.
    pub fn tool_docs(&self) -> &str {
        &self.tool_docs
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Run up to `max_cycles` cycles and report.
    pub async fn run(mut self, max_cycles: u64) -> RunReport {
        info!(
            max_cycles,
            tools = ?self.gate.available_to(&self.config.agent_id),
            "run starting"
        );
        let mut halt = None;
        for index in 0..max_cycles {
            if self.cancel.is_cancelled() {
                halt = Some(self.halt(Fatal {
                    kind: FatalKind::Cancelled,
                    message: "run cancelled".to_string(),
                }));
                break;
            }
            if let Err(fatal) = self.run_cycle(index).await {
                halt = Some(self.halt(fatal));
                break;
            }
        }
        let totals = self.tracker.totals();
        info!(
            cycles = self.history.len(),
            total_tokens = totals.total_tokens(),
            cost_usd = totals.estimated_cost_usd,
            halted = halt.is_some(),
            "run finished"
        );
        RunReport {
            history: self.history,
            totals,
            halt,
        }
    }

    fn halt(&self, fatal: Fatal) -> Halt {
        let last_completed = self.history.last().map(|c| c.index());
        if fatal.kind == FatalKind::Cancelled {
            warn!(?last_completed, "run cancelled");
        } else {
            error!(kind = %fatal.kind, message = %fatal.message, ?last_completed, "run halted");
        }
        Halt {
            kind: fatal.kind,
            message: fatal.message,
            last_completed,
        }
    }

    #[instrument(skip_all, fields(cycle = index))]
    async fn run_cycle(&mut self, index: u64) -> Result<(), Fatal> {
        let before = self.tracker.totals();

        let (action, observation, outcome) = match self.ideate().await? {
            Proposal::Ready(action) => {
                let (observation, outcome) = self.act(&action).await;
                (action, observation, outcome)
            }
            Proposal::Malformed {
                attempts,
                last_error,
            } => {
                warn!(attempts, error = %last_error, "no usable action; recording empty cycle");
                (
                    Action::none(),
                    Observation::malformed(attempts, &last_error),
                    CycleOutcome::Malformed { attempts },
                )
            }
        };

        let evaluation = match tokio::time::timeout(
            self.config.inference_timeout,
            self.judge.evaluate(index, &action, &observation),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(self.inference_timed_out().into()),
        };

        let totals_after = self.tracker.totals();
        let cycle = Cycle::new(
            index,
            action,
            observation,
            evaluation,
            outcome,
            totals_after.since(&before),
            totals_after,
        )?;
        self.history.append(cycle.clone())?;
        info!(
            outcome = ?cycle.outcome(),
            tokens = cycle.usage_delta().total_tokens(),
            "cycle complete"
        );
        // No subscribers is fine.
        let _ = self.feed.send(cycle);
        Ok(())
    }

    fn inference_timed_out(&self) -> InferenceError {
        InferenceError::Timeout(self.config.inference_timeout.as_millis() as u64)
    }

    async fn ideate(&self) -> Result<Proposal, Fatal> {
        let attempts = 1 + self.config.max_parse_retries;
        let mut clarification: Option<String> = None;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            let proposed = tokio::time::timeout(
                self.config.inference_timeout,
                self.ideator
                    .propose(&self.history, &self.tool_docs, clarification.as_deref()),
            )
            .await;
            match proposed {
                Err(_) => return Err(self.inference_timed_out().into()),
                Ok(Ok(action)) => return Ok(Proposal::Ready(action)),
                Ok(Err(IdeatorError::Backend(e))) => return Err(e.into()),
                Ok(Err(IdeatorError::Malformed(msg))) => {
                    warn!(attempt, attempts, error = %msg, "malformed ideator output");
                    clarification = Some(format!(
                        "Your previous response could not be parsed: {msg}"
                    ));
                    last_error = msg;
                }
            }
        }
        Ok(Proposal::Malformed {
            attempts,
            last_error,
        })
    }

    async fn act(&mut self, action: &Action) -> (Observation, CycleOutcome) {
        if self.loop_guard.record(&action.fingerprint()) {
            warn!(
                subenvironment = %action.subenvironment,
                repeats = self.loop_guard.threshold(),
                "ideator is repeating the same action"
            );
        }

        let kind = match self.gate.authorize(&self.config.agent_id, action) {
            Ok(kind) => kind,
            Err(e) => {
                warn!(subenvironment = %action.subenvironment, error = %e, "action rejected");
                return (Observation::access_denied(e), CycleOutcome::Rejected);
            }
        };
        let Some(env) = self.registry.get(kind) else {
            let e = AixiError::NotRegistered(kind);
            warn!(error = %e, "action rejected");
            return (Observation::access_denied(e), CycleOutcome::Rejected);
        };

        info!(subenvironment = %kind, input_bytes = action.input_body.len(), "executing action");
        match tokio::time::timeout(self.config.tool_timeout, env.execute(&action.input_body)).await
        {
            Ok(Ok(text)) => (Observation::success(text), CycleOutcome::Executed),
            Ok(Err(e)) => {
                warn!(subenvironment = %kind, error = %e, "sub-environment failed");
                (Observation::tool_error(kind.as_str(), e), CycleOutcome::ToolFailed)
            }
            Err(_) => {
                let limit_ms = self.config.tool_timeout.as_millis() as u64;
                warn!(subenvironment = %kind, limit_ms, "sub-environment timed out");
                (Observation::timeout(kind.as_str(), limit_ms), CycleOutcome::TimedOut)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metered::MeteredBackend;
    use crate::testing::ScriptedBackend;
    use aixi_env::{FileSystemEnv, SimSubEnvironment, SubEnvError, SubEnvironment};
    use aixi_kernel::{ActionVerifier, CapabilityManager};
    use aixi_types::{
        ACCESS_DENIED_MARKER, CallKind, Completion, Constitution, InferenceBackend,
        InferenceRequest, ObservationKind, SubEnvKind,
    };
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    const READ_NOTES: &str = r#"{"action":"read_file","path":"notes.txt"}"#;

    fn reply(subenvironment: &str, input_body: &str) -> String {
        format!(
            "REASONING:\nThis advances the objective.\n\nACTION:\nsubenvironment: {subenvironment}\ninput_body: {input_body}"
        )
    }

    fn judge_backend() -> ScriptedBackend {
        ScriptedBackend::new().otherwise("Reasonable step; keep going.")
    }

    fn build(
        ideator: &ScriptedBackend,
        judge: &ScriptedBackend,
        envs: Vec<Arc<dyn SubEnvironment>>,
        granted: &[SubEnvKind],
        config: OrchestratorConfig,
    ) -> (Orchestrator, TokenTracker) {
        let tracker = TokenTracker::new();
        let constitution = Constitution::new("Understand the working directory. Never waste tokens.");
        let ideator = Ideator::new(
            MeteredBackend::shared(ideator.shared(), tracker.clone(), CallKind::Ideator),
            constitution.clone(),
        );
        let judge = Judge::new(
            MeteredBackend::shared(judge.shared(), tracker.clone(), CallKind::Judge),
            constitution,
        );
        let mut registry = SubEnvRegistry::new();
        for env in envs {
            registry.register(env);
        }
        let mut caps = CapabilityManager::new();
        caps.grant_subenvironments(&config.agent_id, granted.iter().copied());
        let gate = AccessGate::new(caps, ActionVerifier::with_defaults(8 * 1024))
            .with_registered(registry.kinds());
        let orchestrator = Orchestrator::new(ideator, judge, registry, gate, tracker.clone(), config);
        (orchestrator, tracker)
    }

    fn sim(kind: SubEnvKind) -> (Arc<dyn SubEnvironment>, Arc<AtomicUsize>) {
        let sim = SimSubEnvironment::new(kind);
        let calls = sim.call_counter();
        (Arc::new(sim), calls)
    }

    /// Never answers; only a timeout gets past it.
    struct StalledBackend;

    #[async_trait]
    impl InferenceBackend for StalledBackend {
        async fn complete(&self, _request: InferenceRequest) -> Result<Completion, InferenceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(InferenceError::Unavailable("unreachable".into()))
        }
    }

    /// Raises a cancel flag the first time it runs.
    struct CancelOnExecute(CancelFlag);

    #[async_trait]
    impl SubEnvironment for CancelOnExecute {
        fn kind(&self) -> SubEnvKind {
            SubEnvKind::Consultant
        }
        fn description(&self) -> &str {
            "cancels the run"
        }
        fn docs(&self) -> &str {
            ""
        }
        async fn execute(&self, _input: &str) -> Result<String, SubEnvError> {
            self.0.cancel();
            Ok("SUCCESS: noted".into())
        }
    }

    #[tokio::test]
    async fn n_cycles_yield_contiguous_indices() {
        let ideator = ScriptedBackend::new().otherwise(reply("file_system", "{}"));
        let judge = judge_backend();
        let (fs, _) = sim(SubEnvKind::FileSystem);
        let (orch, _) = build(&ideator, &judge, vec![fs], &[SubEnvKind::FileSystem], OrchestratorConfig::default());
        let report = orch.run(5).await;
        assert!(report.completed());
        assert_eq!(report.history.len(), 5);
        let indices: Vec<u64> = report.history.all().iter().map(|c| c.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        for cycle in report.history.all() {
            assert_eq!(cycle.evaluation().cycle_index, cycle.index());
        }
    }

    #[tokio::test]
    async fn zero_lifespan_runs_nothing() {
        let ideator = ScriptedBackend::new().otherwise(reply("file_system", "{}"));
        let judge = judge_backend();
        let (orch, _) = build(&ideator, &judge, vec![], &[], OrchestratorConfig::default());
        let report = orch.run(0).await;
        assert!(report.history.is_empty());
        assert!(report.completed());
        assert_eq!(ideator.calls(), 0);
    }

    #[tokio::test]
    async fn cumulative_totals_never_decrease() {
        let ideator = ScriptedBackend::new()
            .then_text(reply("file_system", "{}"))
            .then_text("garbage")
            .then_text("garbage")
            .then_text("garbage")
            .otherwise(reply("shell", "ls"));
        let judge = judge_backend();
        let (fs, _) = sim(SubEnvKind::FileSystem);
        let (orch, tracker) = build(&ideator, &judge, vec![fs], &[SubEnvKind::FileSystem], OrchestratorConfig::default());
        let report = orch.run(4).await;
        let cycles = report.history.all();
        assert_eq!(cycles.len(), 4);
        let mut previous = TokenUsage::default();
        for cycle in cycles {
            assert!(cycle.totals_after().covers(&previous));
            assert_eq!(*cycle.usage_delta(), cycle.totals_after().since(&previous));
            previous = *cycle.totals_after();
        }
        assert_eq!(report.totals, tracker.totals());
    }

    #[tokio::test]
    async fn disallowed_ids_never_reach_a_sub_environment() {
        // unknown id, known but not granted, granted but not registered
        let ideator = ScriptedBackend::new()
            .then_text(reply("shell", r#"{"cmd":"ls"}"#))
            .then_text(reply("code_executor", r#"{"code":"print(1)"}"#))
            .then_text(reply("web_search", r#"{"query":"x"}"#));
        let judge = judge_backend();
        let (fs, fs_calls) = sim(SubEnvKind::FileSystem);
        let (code, code_calls) = sim(SubEnvKind::CodeExecutor);
        let (orch, _) = build(
            &ideator,
            &judge,
            vec![fs, code],
            &[SubEnvKind::FileSystem, SubEnvKind::WebSearch],
            OrchestratorConfig::default(),
        );
        let report = orch.run(3).await;
        assert_eq!(report.history.len(), 3);
        for cycle in report.history.all() {
            assert_eq!(cycle.outcome(), &CycleOutcome::Rejected);
            assert!(cycle.observation().text.starts_with(ACCESS_DENIED_MARKER));
        }
        assert!(report.history.all()[0].observation().text.contains("shell"));
        assert_eq!(fs_calls.load(Ordering::SeqCst), 0);
        assert_eq!(code_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rule_violation_is_rejected() {
        let ideator = ScriptedBackend::new().then_text(reply("file_system", ""));
        let judge = judge_backend();
        let (fs, fs_calls) = sim(SubEnvKind::FileSystem);
        let (orch, _) = build(&ideator, &judge, vec![fs], &[SubEnvKind::FileSystem], OrchestratorConfig::default());
        let report = orch.run(1).await;
        let cycle = &report.history.all()[0];
        assert_eq!(cycle.observation().kind, ObservationKind::AccessDenied);
        assert!(cycle.observation().text.contains("non_empty_input"));
        assert_eq!(fs_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_failure_and_timeout_do_not_stop_the_run() {
        let ideator = ScriptedBackend::new()
            .then_text(reply("code_executor", r#"{"code":"1/0"}"#))
            .then_text(reply("web_search", r#"{"query":"slow"}"#))
            .otherwise(reply("file_system", "{}"));
        let judge = judge_backend();
        let failing: Arc<dyn SubEnvironment> =
            Arc::new(SimSubEnvironment::new(SubEnvKind::CodeExecutor).failing("ZeroDivisionError"));
        let hanging: Arc<dyn SubEnvironment> = Arc::new(
            SimSubEnvironment::new(SubEnvKind::WebSearch).hanging(Duration::from_secs(600)),
        );
        let (fs, _) = sim(SubEnvKind::FileSystem);
        let config = OrchestratorConfig {
            tool_timeout: Duration::from_secs(5),
            ..OrchestratorConfig::default()
        };
        let (orch, _) = build(&ideator, &judge, vec![failing, hanging, fs], &SubEnvKind::ALL, config);
        let report = orch.run(3).await;
        assert!(report.completed());
        let cycles = report.history.all();
        assert_eq!(cycles[0].outcome(), &CycleOutcome::ToolFailed);
        assert_eq!(cycles[0].observation().kind, ObservationKind::ToolError);
        assert!(cycles[0].observation().text.contains("ZeroDivisionError"));
        assert_eq!(cycles[1].outcome(), &CycleOutcome::TimedOut);
        assert!(cycles[1].observation().text.contains("timed out after 5000 ms"));
        assert_eq!(cycles[2].outcome(), &CycleOutcome::Executed);
    }

    #[tokio::test]
    async fn judge_only_sees_the_current_cycle() {
        let ideator = ScriptedBackend::new()
            .then_text(reply("file_system", r#"{"marker":"FIRST-BODY"}"#))
            .then_text(reply("file_system", r#"{"marker":"SECOND-BODY"}"#));
        let judge = judge_backend();
        let fs: Arc<dyn SubEnvironment> = Arc::new(
            SimSubEnvironment::new(SubEnvKind::FileSystem)
                .then(Ok("SUCCESS: FIRST-RESULT".into()))
                .then(Ok("SUCCESS: SECOND-RESULT".into())),
        );
        let (orch, _) = build(&ideator, &judge, vec![fs], &[SubEnvKind::FileSystem], OrchestratorConfig::default());
        let report = orch.run(2).await;
        assert_eq!(report.history.len(), 2);

        let prompts: Vec<String> = judge.requests().iter().map(|r| r.prompt_text()).collect();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("FIRST-BODY") && prompts[0].contains("FIRST-RESULT"));
        assert!(prompts[1].contains("SECOND-BODY") && prompts[1].contains("SECOND-RESULT"));
        assert!(!prompts[1].contains("FIRST-BODY"));
        assert!(!prompts[1].contains("FIRST-RESULT"));
        assert!(!prompts[1].contains("Reasonable step"));
        for cycle in report.history.all() {
            assert_eq!(cycle.evaluation().cycle_index, cycle.index());
        }
    }

    #[tokio::test]
    async fn three_benign_reads_complete_without_rejection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "the objective is curiosity").unwrap();
        let fs: Arc<dyn SubEnvironment> = Arc::new(FileSystemEnv::new(dir.path()).unwrap());
        let ideator = ScriptedBackend::new().otherwise(reply("file_system", READ_NOTES));
        let judge = judge_backend();
        let (orch, _) = build(&ideator, &judge, vec![fs], &[SubEnvKind::FileSystem], OrchestratorConfig::default());
        let report = orch.run(3).await;

        let cycles = report.history.all();
        assert_eq!(cycles.len(), 3);
        for cycle in cycles {
            assert_eq!(cycle.outcome(), &CycleOutcome::Executed);
            assert!(cycle.observation().text.contains("the objective is curiosity"));
        }
        assert!(cycles[1].totals_after().total_tokens() > cycles[0].totals_after().total_tokens());
        assert!(cycles[2].totals_after().total_tokens() > cycles[1].totals_after().total_tokens());
        assert_eq!(cycles[2].totals_after().calls, 6);
    }

    #[tokio::test]
    async fn shell_is_rejected_then_the_run_continues() {
        let ideator = ScriptedBackend::new()
            .then_text(reply("shell", "rm -rf /"))
            .then_text(reply("file_system", r#"{"action":"list_files","path":"."}"#));
        let judge = judge_backend();
        let (fs, fs_calls) = sim(SubEnvKind::FileSystem);
        let (orch, _) = build(&ideator, &judge, vec![fs], &[SubEnvKind::FileSystem], OrchestratorConfig::default());
        let report = orch.run(2).await;

        let cycles = report.history.all();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].outcome(), &CycleOutcome::Rejected);
        assert!(cycles[0].observation().text.starts_with("access denied:"));
        assert_eq!(cycles[1].outcome(), &CycleOutcome::Executed);
        assert_eq!(fs_calls.load(Ordering::SeqCst), 1);
        assert_eq!(judge.calls(), 2);
    }

    #[tokio::test]
    async fn malformed_replies_within_bound_are_retried() {
        let ideator = ScriptedBackend::new()
            .then_text("I would like to read a file please.")
            .then_text("ACTION:\ninput_body: {}")
            .then_text(reply("file_system", READ_NOTES));
        let judge = judge_backend();
        let sim = SimSubEnvironment::new(SubEnvKind::FileSystem);
        let inputs = sim.input_log();
        let config = OrchestratorConfig {
            max_parse_retries: 2,
            ..OrchestratorConfig::default()
        };
        let (orch, _) = build(&ideator, &judge, vec![Arc::new(sim) as Arc<dyn SubEnvironment>], &[SubEnvKind::FileSystem], config);
        let report = orch.run(1).await;

        let cycles = report.history.all();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].outcome(), &CycleOutcome::Executed);
        assert_eq!(cycles[0].action().input_body, READ_NOTES);
        assert_eq!(inputs.lock().unwrap().as_slice(), [READ_NOTES]);
        assert_eq!(ideator.calls(), 3);

        let retry_prompt = ideator.requests()[1].prompt_text();
        assert!(retry_prompt.contains("No ACTION section found in response"));
        let final_prompt = ideator.requests()[2].prompt_text();
        assert!(final_prompt.contains("No subenvironment specified in action"));
    }

    #[tokio::test]
    async fn malformed_past_bound_records_an_empty_cycle() {
        let ideator = ScriptedBackend::new().otherwise("no idea");
        let judge = judge_backend();
        let (fs, fs_calls) = sim(SubEnvKind::FileSystem);
        let config = OrchestratorConfig {
            max_parse_retries: 1,
            ..OrchestratorConfig::default()
        };
        let (orch, _) = build(&ideator, &judge, vec![fs], &[SubEnvKind::FileSystem], config);
        let report = orch.run(2).await;

        assert!(report.completed());
        let cycles = report.history.all();
        assert_eq!(cycles.len(), 2);
        for cycle in cycles {
            assert!(cycle.action().is_none());
            assert_eq!(cycle.outcome(), &CycleOutcome::Malformed { attempts: 2 });
            assert_eq!(cycle.observation().kind, ObservationKind::Malformed);
            assert!(cycle.observation().text.contains("No ACTION section found"));
        }
        assert_eq!(ideator.calls(), 4);
        assert_eq!(judge.calls(), 2);
        assert_eq!(fs_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unavailable_backend_halts_with_partial_history() {
        let ideator = ScriptedBackend::new()
            .then_text(reply("file_system", "{}"))
            .then_error(InferenceError::Unavailable("connection refused".into()));
        let judge = judge_backend();
        let (fs, _) = sim(SubEnvKind::FileSystem);
        let (orch, _) = build(&ideator, &judge, vec![fs], &[SubEnvKind::FileSystem], OrchestratorConfig::default());
        let report = orch.run(5).await;

        assert_eq!(report.history.len(), 1);
        let halt = report.halt.expect("run should halt");
        assert_eq!(halt.kind, FatalKind::BackendUnavailable);
        assert_eq!(halt.last_completed, Some(0));
        assert!(halt.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn misconfigured_model_halts_instead_of_retrying() {
        let not_found = || {
            crate::llm_driver::classify_status(
                reqwest::StatusCode::NOT_FOUND,
                r#"{"error":"model 'llama3' not found, try pulling it first"}"#,
            )
        };
        let ideator = ScriptedBackend::new().then_error(not_found());
        let judge = ScriptedBackend::new().then_error(not_found());
        let (fs, fs_calls) = sim(SubEnvKind::FileSystem);
        let (orch, _) = build(&ideator, &judge, vec![fs], &[SubEnvKind::FileSystem], OrchestratorConfig::default());
        let report = orch.run(3).await;

        assert!(report.history.is_empty());
        let halt = report.halt.expect("run should halt");
        assert_eq!(halt.kind, FatalKind::BackendUnavailable);
        assert_eq!(halt.last_completed, None);
        assert!(halt.message.contains("404"));
        assert_eq!(ideator.calls(), 1);
        assert_eq!(judge.calls(), 0);
        assert_eq!(fs_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn judge_outage_is_fatal_too() {
        let ideator = ScriptedBackend::new().otherwise(reply("file_system", "{}"));
        let judge = ScriptedBackend::new()
            .then_text("Good.")
            .then_error(InferenceError::Unavailable("503".into()));
        let (fs, _) = sim(SubEnvKind::FileSystem);
        let (orch, _) = build(&ideator, &judge, vec![fs], &[SubEnvKind::FileSystem], OrchestratorConfig::default());
        let report = orch.run(3).await;
        assert_eq!(report.history.len(), 1);
        assert_eq!(report.halt.unwrap().kind, FatalKind::BackendUnavailable);
    }

    #[tokio::test]
    async fn context_overflow_halts_before_any_cycle() {
        let ideator = ScriptedBackend::new()
            .then_error(InferenceError::ContextOverflow("prompt exceeds 8192 tokens".into()));
        let judge = judge_backend();
        let (orch, _) = build(&ideator, &judge, vec![], &[], OrchestratorConfig::default());
        let report = orch.run(3).await;

        assert!(report.history.is_empty());
        let halt = report.halt.unwrap();
        assert_eq!(halt.kind, FatalKind::ContextOverflow);
        assert_eq!(halt.last_completed, None);
        assert_eq!(judge.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_inference_is_bounded() {
        let tracker = TokenTracker::new();
        let constitution = Constitution::new("c");
        let judge = judge_backend();
        let config = OrchestratorConfig {
            inference_timeout: Duration::from_secs(10),
            ..OrchestratorConfig::default()
        };
        let orch = Orchestrator::new(
            Ideator::new(Arc::new(StalledBackend), constitution.clone()),
            Judge::new(judge.shared(), constitution),
            SubEnvRegistry::new(),
            AccessGate::new(CapabilityManager::new(), ActionVerifier::new()),
            tracker,
            config,
        );
        let report = orch.run(2).await;
        let halt = report.halt.unwrap();
        assert_eq!(halt.kind, FatalKind::BackendUnavailable);
        assert!(halt.message.contains("10000 ms"));
    }

    #[tokio::test]
    async fn cancellation_keeps_only_complete_cycles() {
        let ideator = ScriptedBackend::new()
            .then_text(reply("file_system", "{}"))
            .otherwise(reply("consultant", r#"{"action":"consult","question":"?"}"#));
        let judge = judge_backend();
        let cancel = CancelFlag::new();
        let (fs, _) = sim(SubEnvKind::FileSystem);
        let stopper: Arc<dyn SubEnvironment> = Arc::new(CancelOnExecute(cancel.clone()));
        let (orch, _) = build(
            &ideator,
            &judge,
            vec![fs, stopper],
            &[SubEnvKind::FileSystem, SubEnvKind::Consultant],
            OrchestratorConfig::default(),
        );
        let orch = orch.with_cancel_flag(cancel);
        let report = orch.run(10).await;

        assert_eq!(report.history.len(), 2);
        let halt = report.halt.unwrap();
        assert_eq!(halt.kind, FatalKind::Cancelled);
        assert_eq!(halt.last_completed, Some(1));
    }

    #[tokio::test]
    async fn every_cycle_is_published_in_order() {
        let ideator = ScriptedBackend::new().otherwise(reply("file_system", "{}"));
        let judge = judge_backend();
        let (fs, _) = sim(SubEnvKind::FileSystem);
        let (orch, _) = build(&ideator, &judge, vec![fs], &[SubEnvKind::FileSystem], OrchestratorConfig::default());
        let mut feed = orch.subscribe();
        let report = orch.run(3).await;
        for expected in 0..3 {
            let cycle = feed.recv().await.unwrap();
            assert_eq!(cycle.index(), expected);
            assert_eq!(&cycle, &report.history.all()[expected as usize]);
        }
        assert!(feed.recv().await.is_err());
    }

    #[tokio::test]
    async fn repeated_actions_only_warn() {
        let ideator = ScriptedBackend::new().otherwise(reply("file_system", READ_NOTES));
        let judge = judge_backend();
        let (fs, fs_calls) = sim(SubEnvKind::FileSystem);
        let config = OrchestratorConfig {
            loop_guard_threshold: 2,
            ..OrchestratorConfig::default()
        };
        let (orch, _) = build(&ideator, &judge, vec![fs], &[SubEnvKind::FileSystem], config);
        let report = orch.run(4).await;
        assert!(report.completed());
        assert!(report
            .history
            .all()
            .iter()
            .all(|c| c.outcome() == &CycleOutcome::Executed));
        assert_eq!(fs_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn ideator_sees_only_usable_tools_and_prior_feedback() {
        let ideator = ScriptedBackend::new().otherwise(reply("file_system", "{}"));
        let judge = ScriptedBackend::new().otherwise("Try reading README next.");
        let (fs, _) = sim(SubEnvKind::FileSystem);
        let (web, _) = sim(SubEnvKind::WebSearch);
        let (orch, _) = build(&ideator, &judge, vec![fs, web], &[SubEnvKind::FileSystem], OrchestratorConfig::default());
        assert!(orch.tool_docs().contains("Identifier: file_system"));
        assert!(!orch.tool_docs().contains("Identifier: web_search"));
        orch.run(2).await;

        let second = ideator.requests()[1].prompt_text();
        assert!(second.contains("Your last action was evaluated thusly: Try reading README next."));
        assert!(second.contains("--- CYCLE 0 ACTION ---"));
    }
}
