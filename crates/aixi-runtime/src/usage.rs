//! Token and cost accounting for every inference call.
//!
//! [`TokenTracker`] is cheap to clone; every clone shares the same ledger,
//! so the Ideator, the Judge, the consultant and the orchestrator all see
//! one set of totals.  Recording never fails: a poisoned lock is recovered
//! rather than propagated.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use aixi_types::{CallKind, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// USD per 1,000 prompt tokens.
pub const DEFAULT_INPUT_COST_PER_1K: f64 = 0.000075;
/// USD per 1,000 completion tokens.
pub const DEFAULT_OUTPUT_COST_PER_1K: f64 = 0.00030;

/// Rough token count for backends that do not report usage: four
/// characters per token, never less than one.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 / 4).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_1k: DEFAULT_INPUT_COST_PER_1K,
            output_per_1k: DEFAULT_OUTPUT_COST_PER_1K,
        }
    }
}

impl Pricing {
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.input_per_1k
            + (completion_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

/// One metered inference call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: CallKind,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl UsageRecord {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    fn as_usage(&self) -> TokenUsage {
        TokenUsage {
            calls: 1,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            estimated_cost_usd: self.estimated_cost_usd,
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    records: Vec<UsageRecord>,
    totals: TokenUsage,
}

/// Shared usage ledger.
#[derive(Debug, Clone, Default)]
pub struct TokenTracker {
    ledger: Arc<Mutex<Ledger>>,
    pricing: Pricing,
}

impl TokenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pricing(pricing: Pricing) -> Self {
        Self {
            ledger: Arc::default(),
            pricing,
        }
    }

    pub fn pricing(&self) -> Pricing {
        self.pricing
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one call and return the stored entry.
    pub fn record(&self, kind: CallKind, prompt_tokens: u64, completion_tokens: u64) -> UsageRecord {
        let record = UsageRecord {
            timestamp: Utc::now(),
            kind,
            prompt_tokens,
            completion_tokens,
            estimated_cost_usd: self.pricing.cost(prompt_tokens, completion_tokens),
        };
        let mut ledger = self.ledger();
        ledger.totals += record.as_usage();
        ledger.records.push(record.clone());
        record
    }

    /// Cumulative usage across every call recorded so far.
    pub fn totals(&self) -> TokenUsage {
        self.ledger().totals
    }

    pub fn by_kind(&self) -> BTreeMap<CallKind, TokenUsage> {
        let ledger = self.ledger();
        let mut out: BTreeMap<CallKind, TokenUsage> = BTreeMap::new();
        for record in &ledger.records {
            *out.entry(record.kind).or_default() += record.as_usage();
        }
        out
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.ledger().records.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_quarter_of_chars_with_floor() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn default_pricing_cost() {
        let cost = Pricing::default().cost(1000, 1000);
        assert!((cost - (0.000075 + 0.00030)).abs() < 1e-12);
    }

    #[test]
    fn totals_accumulate_across_clones() {
        let tracker = TokenTracker::new();
        let other = tracker.clone();
        tracker.record(CallKind::Ideator, 100, 20);
        other.record(CallKind::Judge, 50, 10);
        let totals = tracker.totals();
        assert_eq!(totals.calls, 2);
        assert_eq!(totals.prompt_tokens, 150);
        assert_eq!(totals.completion_tokens, 30);
        assert!(totals.estimated_cost_usd > 0.0);
    }

    #[test]
    fn by_kind_breaks_down_calls() {
        let tracker = TokenTracker::new();
        tracker.record(CallKind::Ideator, 10, 1);
        tracker.record(CallKind::Ideator, 10, 1);
        tracker.record(CallKind::Consultant, 5, 5);
        let by_kind = tracker.by_kind();
        assert_eq!(by_kind[&CallKind::Ideator].calls, 2);
        assert_eq!(by_kind[&CallKind::Consultant].total_tokens(), 10);
        assert!(!by_kind.contains_key(&CallKind::Judge));
    }

    #[test]
    fn records_keep_call_order() {
        let tracker = TokenTracker::with_pricing(Pricing {
            input_per_1k: 1.0,
            output_per_1k: 2.0,
        });
        let first = tracker.record(CallKind::Judge, 1000, 0);
        tracker.record(CallKind::RunReview, 0, 1000);
        assert_eq!(first.estimated_cost_usd, 1.0);
        let kinds: Vec<CallKind> = tracker.records().iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![CallKind::Judge, CallKind::RunReview]);
        assert_eq!(tracker.records()[1].estimated_cost_usd, 2.0);
    }
}
