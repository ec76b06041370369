//! [`AccessGate`] – single interception point between the Ideator and the
//! sub-environments.
//!
//! Before an [`Action`] reaches a sub-environment it must pass through
//! [`AccessGate::authorize`], which applies **four checks** in order:
//!
//! 1. **Identifier resolution**: the `subenvironment` text must name a known
//!    [`SubEnvKind`]; otherwise [`AixiError::UnknownSubEnvironment`].
//! 2. **Capability check** ([`CapabilityManager`]): the agent must hold
//!    [`Capability::SubEnvInvoke`] for that kind; otherwise
//!    [`AixiError::Unauthorized`].
//! 3. **Registration**: a sub-environment of that kind must be hosted;
//!    otherwise [`AixiError::NotRegistered`].
//! 4. **Action rules** ([`ActionVerifier`]): the first violated rule returns
//!    [`AixiError::PolicyViolation`].
//!
//! Only when every check passes may the caller dispatch the action.
//!
//! # Example
//!
//! ```
//! use aixi_kernel::{AccessGate, ActionVerifier, CapabilityManager};
//! use aixi_types::{Action, SubEnvKind};
//!
//! let mut caps = CapabilityManager::new();
//! caps.grant_subenvironments("ideator", [SubEnvKind::FileSystem]);
//!
//! let gate = AccessGate::new(caps, ActionVerifier::with_defaults(4096))
//!     .with_registered([SubEnvKind::FileSystem]);
//!
//! let ok = Action::new("file_system", r#"{"action":"list_files","path":"."}"#);
//! assert_eq!(gate.authorize("ideator", &ok).unwrap(), SubEnvKind::FileSystem);
//!
//! let shell = Action::new("shell", "rm -rf /");
//! assert!(gate.authorize("ideator", &shell).is_err());
//! ```

use std::collections::BTreeSet;

use aixi_types::{Action, AixiError, Capability, SubEnvKind};
use tracing::debug;

use crate::action_rules::ActionVerifier;
use crate::capability_manager::CapabilityManager;

/// The gateway the orchestrator must use before dispatching any [`Action`].
pub struct AccessGate {
    capability_manager: CapabilityManager,
    action_verifier: ActionVerifier,
    registered: BTreeSet<SubEnvKind>,
}

impl AccessGate {
    /// Construct a gate from an already-configured [`CapabilityManager`] and
    /// [`ActionVerifier`].  No sub-environment is registered yet.
    pub fn new(capability_manager: CapabilityManager, action_verifier: ActionVerifier) -> Self {
        Self {
            capability_manager,
            action_verifier,
            registered: BTreeSet::new(),
        }
    }

    /// Record which sub-environments are actually hosted.
    pub fn with_registered(mut self, kinds: impl IntoIterator<Item = SubEnvKind>) -> Self {
        self.registered.extend(kinds);
        self
    }

    /// Kinds `agent_id` may invoke that are also hosted.
    pub fn available_to(&self, agent_id: &str) -> Vec<SubEnvKind> {
        self.capability_manager
            .granted_subenvironments(agent_id)
            .into_iter()
            .filter(|k| self.registered.contains(k))
            .collect()
    }

    /// Authorize `agent_id` to dispatch `action`, returning the resolved
    /// sub-environment kind.
    ///
    /// # Errors
    ///
    /// - [`AixiError::UnknownSubEnvironment`] – the id names no known variant.
    /// - [`AixiError::Unauthorized`] – the agent lacks the capability.
    /// - [`AixiError::NotRegistered`] – the variant is not hosted.
    /// - [`AixiError::PolicyViolation`] – an action rule was violated.
    pub fn authorize(&self, agent_id: &str, action: &Action) -> Result<SubEnvKind, AixiError> {
        let kind = action
            .subenvironment
            .parse::<SubEnvKind>()
            .map_err(|_| AixiError::UnknownSubEnvironment {
                id: action.subenvironment.trim().to_string(),
                available: self.describe_available(agent_id),
            })?;
        self.capability_manager
            .check(agent_id, &Capability::SubEnvInvoke(kind))?;
        if !self.registered.contains(&kind) {
            return Err(AixiError::NotRegistered(kind));
        }
        self.action_verifier.verify(action)?;
        debug!(agent = agent_id, subenvironment = %kind, "action authorized");
        Ok(kind)
    }

    fn describe_available(&self, agent_id: &str) -> String {
        let kinds = self.available_to(agent_id);
        if kinds.is_empty() {
            return "none".to_string();
        }
        kinds
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(granted: &[SubEnvKind], registered: &[SubEnvKind]) -> AccessGate {
        let mut caps = CapabilityManager::new();
        caps.grant_subenvironments("ideator", granted.iter().copied());
        AccessGate::new(caps, ActionVerifier::with_defaults(64))
            .with_registered(registered.iter().copied())
    }

    #[test]
    fn granted_and_registered_passes() {
        let g = gate(&[SubEnvKind::FileSystem], &[SubEnvKind::FileSystem]);
        let kind = g
            .authorize("ideator", &Action::new("File_System", "{}"))
            .unwrap();
        assert_eq!(kind, SubEnvKind::FileSystem);
    }

    #[test]
    fn unknown_id_is_rejected_with_available_list() {
        let g = gate(
            &[SubEnvKind::FileSystem, SubEnvKind::WebSearch],
            &[SubEnvKind::FileSystem, SubEnvKind::WebSearch],
        );
        let err = g.authorize("ideator", &Action::new("shell", "ls")).unwrap_err();
        match err {
            AixiError::UnknownSubEnvironment { id, available } => {
                assert_eq!(id, "shell");
                assert_eq!(available, "file_system, web_search");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ungranted_kind_is_unauthorized() {
        let g = gate(&[SubEnvKind::FileSystem], &SubEnvKind::ALL);
        let err = g
            .authorize("ideator", &Action::new("code_executor", "{}"))
            .unwrap_err();
        assert!(matches!(
            err,
            AixiError::Unauthorized(Capability::SubEnvInvoke(SubEnvKind::CodeExecutor))
        ));
    }

    #[test]
    fn granted_but_unregistered_is_rejected() {
        let g = gate(&[SubEnvKind::WebSearch], &[]);
        let err = g
            .authorize("ideator", &Action::new("web_search", "{}"))
            .unwrap_err();
        assert_eq!(err, AixiError::NotRegistered(SubEnvKind::WebSearch));
    }

    #[test]
    fn capability_checked_before_rules() {
        let g = gate(&[], &SubEnvKind::ALL);
        let err = g.authorize("ideator", &Action::new("consultant", "")).unwrap_err();
        assert!(matches!(err, AixiError::Unauthorized(_)));
    }

    #[test]
    fn rule_violation_is_rejected_last() {
        let g = gate(&[SubEnvKind::Consultant], &[SubEnvKind::Consultant]);
        let err = g
            .authorize("ideator", &Action::new("consultant", "y".repeat(65)))
            .unwrap_err();
        assert!(matches!(err, AixiError::PolicyViolation { .. }));
    }

    #[test]
    fn available_to_intersects_grants_and_registration() {
        let g = gate(
            &[SubEnvKind::FileSystem, SubEnvKind::CodeExecutor],
            &[SubEnvKind::FileSystem, SubEnvKind::WebSearch],
        );
        assert_eq!(g.available_to("ideator"), vec![SubEnvKind::FileSystem]);
        assert!(g.available_to("judge").is_empty());
    }
}
