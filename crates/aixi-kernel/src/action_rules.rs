//! [`ActionVerifier`] – shape rules an action must satisfy before dispatch.
//!
//! Every registered [`Rule`] is evaluated in order; the first violation
//! returns [`AixiError::PolicyViolation`] and the action is **not** executed.
//!
//! Two built-in rules are provided:
//! - [`NonEmptyInputRule`] – rejects actions with a blank `input_body`.
//! - [`MaxInputLengthRule`] – rejects oversized `input_body` payloads.

use aixi_types::{Action, AixiError};

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single invariant that an action must satisfy.
pub trait Rule: Send + Sync {
    /// Human-readable name used in violation messages.
    fn name(&self) -> &str;

    /// Return `Ok(())` when the action satisfies the invariant, or
    /// [`AixiError::PolicyViolation`] when it is violated.
    fn check(&self, action: &Action) -> Result<(), AixiError>;
}

// ────────────────────────────────────────────────────────────────────────────
// ActionVerifier
// ────────────────────────────────────────────────────────────────────────────

/// Rule engine that validates an [`Action`] against all registered
/// [`Rule`]s.
///
/// # Example
///
/// ```
/// use aixi_kernel::action_rules::{ActionVerifier, MaxInputLengthRule};
/// use aixi_types::Action;
///
/// let mut verifier = ActionVerifier::new();
/// verifier.add_rule(Box::new(MaxInputLengthRule { max_bytes: 16 }));
///
/// assert!(verifier.verify(&Action::new("file_system", "{}")).is_ok());
/// assert!(verifier.verify(&Action::new("file_system", "x".repeat(64))).is_err());
/// ```
#[derive(Default)]
pub struct ActionVerifier {
    rules: Vec<Box<dyn Rule>>,
}

impl ActionVerifier {
    /// Create an empty verifier with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default rule set: non-empty input capped at `max_input_bytes`.
    pub fn with_defaults(max_input_bytes: usize) -> Self {
        let mut v = Self::new();
        v.add_rule(Box::new(NonEmptyInputRule));
        v.add_rule(Box::new(MaxInputLengthRule {
            max_bytes: max_input_bytes,
        }));
        v
    }

    /// Register a new [`Rule`].  Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Validate `action` against every registered rule.
    pub fn verify(&self, action: &Action) -> Result<(), AixiError> {
        for rule in &self.rules {
            rule.check(action)?;
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Rejects actions whose `input_body` is empty or whitespace.
pub struct NonEmptyInputRule;

impl Rule for NonEmptyInputRule {
    fn name(&self) -> &str {
        "non_empty_input"
    }

    fn check(&self, action: &Action) -> Result<(), AixiError> {
        if action.input_body.trim().is_empty() {
            return Err(AixiError::PolicyViolation {
                rule: self.name().to_string(),
                details: format!("input_body for '{}' is empty", action.subenvironment),
            });
        }
        Ok(())
    }
}

/// Rejects actions whose `input_body` exceeds `max_bytes`.
pub struct MaxInputLengthRule {
    pub max_bytes: usize,
}

impl Rule for MaxInputLengthRule {
    fn name(&self) -> &str {
        "max_input_length"
    }

    fn check(&self, action: &Action) -> Result<(), AixiError> {
        let len = action.input_body.len();
        if len > self.max_bytes {
            return Err(AixiError::PolicyViolation {
                rule: self.name().to_string(),
                details: format!("input_body is {len} bytes, limit is {}", self.max_bytes),
            });
        }
        Ok(())
    }
}
