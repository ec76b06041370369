//! [`CapabilityManager`] – enforces the principle of least privilege.
//!
//! Before a sub-environment is invoked on behalf of an agent, call
//! [`CapabilityManager::check`] to verify the agent holds the matching
//! [`Capability`].  A failed check yields [`AixiError::Unauthorized`] and the
//! action must not be executed.

use std::collections::{HashMap, HashSet};

use aixi_types::{AixiError, Capability, SubEnvKind};

/// Manages the set of [`Capability`] grants for each agent identity.
///
/// # Example
///
/// ```
/// use aixi_kernel::capability_manager::CapabilityManager;
/// use aixi_types::{Capability, SubEnvKind};
///
/// let mut mgr = CapabilityManager::new();
/// mgr.grant("ideator", Capability::SubEnvInvoke(SubEnvKind::FileSystem));
///
/// assert!(mgr.check("ideator", &Capability::SubEnvInvoke(SubEnvKind::FileSystem)).is_ok());
/// assert!(mgr.check("ideator", &Capability::SubEnvInvoke(SubEnvKind::CodeExecutor)).is_err());
/// ```
#[derive(Debug, Default, Clone)]
pub struct CapabilityManager {
    grants: HashMap<String, HashSet<Capability>>,
}

impl CapabilityManager {
    /// Create an empty manager with no grants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `cap` to `agent_id`.  Duplicate grants are silently ignored.
    pub fn grant(&mut self, agent_id: &str, cap: Capability) {
        self.grants
            .entry(agent_id.to_string())
            .or_default()
            .insert(cap);
    }

    /// Grant invocation rights on every kind in `kinds`.
    pub fn grant_subenvironments(
        &mut self,
        agent_id: &str,
        kinds: impl IntoIterator<Item = SubEnvKind>,
    ) {
        for kind in kinds {
            self.grant(agent_id, Capability::SubEnvInvoke(kind));
        }
    }

    /// Revoke `cap` from `agent_id`.  No-ops if the agent or capability is not
    /// present.
    pub fn revoke(&mut self, agent_id: &str, cap: &Capability) {
        if let Some(set) = self.grants.get_mut(agent_id) {
            set.remove(cap);
        }
    }

    /// Return `Ok(())` when `agent_id` holds `cap`, or
    /// [`AixiError::Unauthorized`] otherwise.
    pub fn check(&self, agent_id: &str, cap: &Capability) -> Result<(), AixiError> {
        let has = self
            .grants
            .get(agent_id)
            .map(|s| s.contains(cap))
            .unwrap_or(false);
        if has {
            Ok(())
        } else {
            Err(AixiError::Unauthorized(cap.clone()))
        }
    }

    /// Sub-environments `agent_id` may invoke, in canonical order.
    pub fn granted_subenvironments(&self, agent_id: &str) -> Vec<SubEnvKind> {
        SubEnvKind::ALL
            .into_iter()
            .filter(|k| {
                self.check(agent_id, &Capability::SubEnvInvoke(*k))
                    .is_ok()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoke(kind: SubEnvKind) -> Capability {
        Capability::SubEnvInvoke(kind)
    }

    #[test]
    fn grant_and_check_passes() {
        let mut mgr = CapabilityManager::new();
        mgr.grant("ideator", invoke(SubEnvKind::WebSearch));
        assert!(mgr.check("ideator", &invoke(SubEnvKind::WebSearch)).is_ok());
    }

    #[test]
    fn ungranted_capability_is_denied() {
        let mgr = CapabilityManager::new();
        let result = mgr.check("ideator", &invoke(SubEnvKind::Consultant));
        assert!(matches!(result, Err(AixiError::Unauthorized(_))));
    }

    #[test]
    fn unknown_agent_is_denied() {
        let mut mgr = CapabilityManager::new();
        mgr.grant("ideator", invoke(SubEnvKind::FileSystem));
        let result = mgr.check("judge", &invoke(SubEnvKind::FileSystem));
        assert!(matches!(result, Err(AixiError::Unauthorized(_))));
    }

    #[test]
    fn revoke_removes_capability() {
        let mut mgr = CapabilityManager::new();
        mgr.grant("ideator", invoke(SubEnvKind::CodeExecutor));
        mgr.revoke("ideator", &invoke(SubEnvKind::CodeExecutor));
        assert!(mgr.check("ideator", &invoke(SubEnvKind::CodeExecutor)).is_err());
    }

    #[test]
    fn revoke_nonexistent_is_noop() {
        let mut mgr = CapabilityManager::new();
        mgr.revoke("ghost", &invoke(SubEnvKind::FileSystem));
    }

    #[test]
    fn subenv_capabilities_distinguished_by_kind() {
        let mut mgr = CapabilityManager::new();
        mgr.grant_subenvironments("ideator", [SubEnvKind::FileSystem, SubEnvKind::Consultant]);
        assert_eq!(
            mgr.granted_subenvironments("ideator"),
            vec![SubEnvKind::FileSystem, SubEnvKind::Consultant]
        );
        assert!(mgr.check("ideator", &invoke(SubEnvKind::WebSearch)).is_err());
    }

    #[test]
    fn duplicate_grant_is_idempotent() {
        let mut mgr = CapabilityManager::new();
        mgr.grant("ideator", invoke(SubEnvKind::WebSearch));
        mgr.grant("ideator", invoke(SubEnvKind::WebSearch));
        mgr.revoke("ideator", &invoke(SubEnvKind::WebSearch));
        assert!(mgr.check("ideator", &invoke(SubEnvKind::WebSearch)).is_err());
    }
}
