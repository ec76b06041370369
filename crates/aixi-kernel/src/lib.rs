//! `aixi-kernel` – Access enforcement
//!
//! The loop's brainstem. It does not think; it decides whether an action the
//! Ideator proposed may reach a sub-environment at all.
//!
//! # Modules
//!
//! - [`capability_manager`] – [`CapabilityManager`][capability_manager::CapabilityManager]:
//!   least-privilege grants per agent identity.  An Ideator may only use the
//!   sub-environments it was explicitly granted.
//! - [`action_rules`] – [`ActionVerifier`][action_rules::ActionVerifier]:
//!   a rule engine that validates the shape of every
//!   [`Action`][aixi_types::Action] (non-empty input, size caps, …).
//! - [`access_gate`] – [`AccessGate`][access_gate::AccessGate]:
//!   the single interception point the orchestrator passes through before
//!   dispatching an action.  Combines identifier resolution, capability
//!   checking, registration and rule validation in one call.

pub mod access_gate;
pub mod action_rules;
pub mod capability_manager;

pub use access_gate::AccessGate;
pub use action_rules::{ActionVerifier, MaxInputLengthRule, NonEmptyInputRule, Rule};
pub use capability_manager::CapabilityManager;
