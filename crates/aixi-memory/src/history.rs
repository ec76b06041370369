//! Append-only cycle history.
//!
//! The Ideator reads the whole history every cycle; nothing is ever
//! summarised, truncated, reordered or removed.

use std::fmt::Write as _;

use aixi_types::{AixiError, Cycle, Evaluation};

/// Text the Ideator sees before the first cycle completes.
pub const EMPTY_HISTORY: &str = "No actions taken yet.";

const CYCLE_RULE: &str =
    "============================================================";

/// Ordered log of completed cycles.  Index `i` always holds cycle `i`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    cycles: Vec<Cycle>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next cycle.
    ///
    /// # Errors
    ///
    /// [`AixiError::HistoryOrder`] when `cycle.index()` is not exactly
    /// [`History::len`]; the history is left unchanged.
    pub fn append(&mut self, cycle: Cycle) -> Result<(), AixiError> {
        let expected = self.cycles.len() as u64;
        if cycle.index() != expected {
            return Err(AixiError::HistoryOrder {
                expected,
                got: cycle.index(),
            });
        }
        self.cycles.push(cycle);
        Ok(())
    }

    pub fn all(&self) -> &[Cycle] {
        &self.cycles
    }

    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    pub fn last(&self) -> Option<&Cycle> {
        self.cycles.last()
    }

    /// The Judge's report on the most recent cycle, if any.
    pub fn last_evaluation(&self) -> Option<&Evaluation> {
        self.cycles.last().map(|c| c.evaluation())
    }

    /// Render every cycle as prompt text, oldest first.
    pub fn render(&self) -> String {
        if self.cycles.is_empty() {
            return EMPTY_HISTORY.to_string();
        }
        let mut out = format!("AGENT HISTORY (Cycles completed: {}):\n", self.cycles.len());
        for cycle in &self.cycles {
            render_cycle(&mut out, cycle);
        }
        out
    }
}

fn render_cycle(out: &mut String, cycle: &Cycle) {
    let action = cycle.action();
    let i = cycle.index();
    // Writing into a String is infallible.
    let _ = writeln!(out, "\n--- CYCLE {i} ACTION ---");
    let _ = writeln!(out, "Timestamp: {}", action.timestamp.to_rfc3339());
    if action.is_none() {
        let _ = writeln!(out, "Subenvironment: (none)");
    } else {
        let _ = writeln!(out, "Subenvironment: {}", action.subenvironment);
        let _ = writeln!(out, "Input: {}", action.input_body);
    }
    if !action.reasoning.is_empty() {
        let _ = writeln!(out, "Reasoning: {}", action.reasoning);
    }
    let _ = writeln!(out, "\n--- CYCLE {i} PERCEPT ---");
    let _ = writeln!(out, "Timestamp: {}", cycle.timestamp().to_rfc3339());
    let _ = writeln!(out, "Tool Result: {}", cycle.observation().text);
    let _ = writeln!(out, "\nJudge's Evaluation: {}", cycle.evaluation().text);
    let _ = writeln!(out, "\n{CYCLE_RULE}");
}
