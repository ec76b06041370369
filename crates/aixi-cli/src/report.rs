//! Run artifacts: the history file, the token report and the per-cycle
//! console summary.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use aixi_runtime::{RunReport, TokenTracker};
use aixi_types::Cycle;
use chrono::{DateTime, Local};

const RULE: &str = "============================================================";
const REPORT_RULE: &str = "==================================================";

/// Shorten `text` to `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// `1234567` → `1,234,567`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `Histories/aixi_run_20250101_120000.txt`
pub fn history_path(dir: &Path, started: DateTime<Local>) -> PathBuf {
    dir.join(format!("aixi_run_{}.txt", started.format("%Y%m%d_%H%M%S")))
}

/// `…/aixi_run_<ts>.txt` → `…/aixi_run_<ts>_tokens.txt`
pub fn token_report_path(history_path: &Path) -> PathBuf {
    let stem = history_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    history_path.with_file_name(format!("{stem}_tokens.txt"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Console
// ─────────────────────────────────────────────────────────────────────────────

/// Summary printed as each cycle arrives on the feed.
pub fn cycle_summary(cycle: &Cycle, max_cycles: u64) -> String {
    let n = cycle.index() + 1;
    let action = cycle.action();
    let mut out = format!("\n{RULE}\nCYCLE {n}/{max_cycles}\n{RULE}\n");
    let _ = writeln!(out, "\n[CYCLE {n}] ACTION CHOSEN:");
    if action.is_none() {
        let _ = writeln!(out, "  Subenvironment: (none)");
    } else {
        let _ = writeln!(out, "  Subenvironment: {}", action.subenvironment);
        let _ = writeln!(out, "  Input: {}", truncate(&action.input_body, 100));
    }
    if !action.reasoning.is_empty() {
        let _ = writeln!(out, "  Reasoning: {}", truncate(&action.reasoning, 150));
    }
    let _ = writeln!(out, "\n[CYCLE {n}] PERCEPT RECEIVED:");
    let _ = writeln!(out, "  Tool Result: {}", truncate(&cycle.observation().text, 100));
    let _ = writeln!(out, "  Judge Feedback: {}", truncate(&cycle.evaluation().text, 150));
    let usage = cycle.usage_delta();
    let _ = write!(
        out,
        "  Tokens: {} this cycle, {} total",
        group_thousands(usage.total_tokens()),
        group_thousands(cycle.totals_after().total_tokens())
    );
    out
}

fn write_usage_sections(out: &mut String, tracker: &TokenTracker) {
    let totals = tracker.totals();
    let _ = writeln!(out, "TOTAL USAGE:");
    let _ = writeln!(out, "  Total API Calls: {}", totals.calls);
    let _ = writeln!(out, "  Total Prompt Tokens: {}", group_thousands(totals.prompt_tokens));
    let _ = writeln!(
        out,
        "  Total Completion Tokens: {}",
        group_thousands(totals.completion_tokens)
    );
    let _ = writeln!(out, "  Total Tokens: {}", group_thousands(totals.total_tokens()));
    let _ = writeln!(out, "  Estimated Total Cost: ${:.4}", totals.estimated_cost_usd);

    let by_kind = tracker.by_kind();
    if !by_kind.is_empty() {
        let _ = writeln!(out, "\nUSAGE BY CALL TYPE:");
        for (kind, usage) in &by_kind {
            let _ = writeln!(out, "  {}:", kind.to_string().to_uppercase());
            let _ = writeln!(out, "    Calls: {}", usage.calls);
            let _ = writeln!(out, "    Tokens: {}", group_thousands(usage.total_tokens()));
            let _ = writeln!(out, "    Cost: ${:.4}", usage.estimated_cost_usd);
        }
    }
}

/// End-of-run usage block for the terminal.
pub fn usage_summary(tracker: &TokenTracker) -> String {
    let mut out = format!("\n{RULE}\nLLM-AIXI TOKEN USAGE REPORT\n{RULE}\n\n");
    write_usage_sections(&mut out, tracker);
    let _ = write!(out, "\n{RULE}");
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Files
// ─────────────────────────────────────────────────────────────────────────────

/// Contents of `<history>_tokens.txt`.
pub fn render_usage_report(tracker: &TokenTracker, generated: DateTime<Local>) -> String {
    let mut out = format!(
        "LLM-AIXI Token Usage Report\n{REPORT_RULE}\nGenerated: {}\n\n",
        generated.to_rfc3339()
    );
    write_usage_sections(&mut out, tracker);
    let _ = writeln!(out, "\nDETAILED HISTORY:");
    for record in tracker.records() {
        let _ = writeln!(
            out,
            "  {} | {} | Tokens: {} | Cost: ${:.4}",
            record.timestamp.with_timezone(&Local).to_rfc3339(),
            record.kind,
            record.total_tokens(),
            record.estimated_cost_usd
        );
    }
    out
}

/// Contents of `aixi_run_<ts>.txt`: every cycle, the overall evaluation and
/// an execution summary.
pub fn render_history(
    report: &RunReport,
    overall: &str,
    started: DateTime<Local>,
    finished: DateTime<Local>,
) -> String {
    let history = &report.history;
    let mut out = format!(
        "LLM-AIXI Execution History\nGenerated: {}\n{RULE}\n\n",
        finished.to_rfc3339()
    );
    out.push_str(&history.render());

    let _ = write!(out, "\n\n{RULE}\nOVERALL PERFORMANCE EVALUATION\n{RULE}\n{overall}");

    let duration = (finished - started).num_milliseconds() as f64 / 1000.0;
    let total_actions = history.all().iter().filter(|c| !c.action().is_none()).count();
    let _ = writeln!(out, "\n\n{RULE}\nEXECUTION SUMMARY\n{RULE}");
    let _ = writeln!(out, "Start Time: {}", started.to_rfc3339());
    let _ = writeln!(out, "End Time: {}", finished.to_rfc3339());
    let _ = writeln!(out, "Duration: {duration:.2} seconds");
    let _ = writeln!(out, "Cycles Completed: {}", history.len());
    let _ = writeln!(out, "Total Actions: {total_actions}");
    if let Some(halt) = &report.halt {
        let last = halt
            .last_completed
            .map_or_else(|| "none".to_string(), |i| i.to_string());
        let _ = writeln!(out, "Halted: {} ({})", halt.kind, halt.message);
        let _ = writeln!(out, "Last Completed Cycle: {last}");
    }

    let totals = report.totals;
    let _ = writeln!(out, "\nToken Usage:");
    let _ = writeln!(out, "  Total Calls: {}", totals.calls);
    let _ = writeln!(out, "  Total Tokens: {}", group_thousands(totals.total_tokens()));
    let _ = writeln!(out, "  Estimated Cost: ${:.4}", totals.estimated_cost_usd);
    out
}
