//! [`SubEnvRegistry`] – central sub-environment registry and dispatcher.
//!
//! The registry stores one trait object per [`SubEnvKind`].  The
//! orchestrator resolves the target by kind and awaits its `execute`.

use std::collections::BTreeMap;
use std::sync::Arc;

use aixi_types::SubEnvKind;

use crate::subenv::{SubEnvError, SubEnvironment};

const DOC_RULE: &str = "==================================================";

/// Central sub-environment registry.
///
/// Construct with [`SubEnvRegistry::new`], register variants, then call
/// [`SubEnvRegistry::dispatch`] to run an input against one of them.
#[derive(Default, Clone)]
pub struct SubEnvRegistry {
    envs: BTreeMap<SubEnvKind, Arc<dyn SubEnvironment>>,
}

impl SubEnvRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sub-environment.  Any previously registered variant of the
    /// same kind is replaced.
    pub fn register(&mut self, env: Arc<dyn SubEnvironment>) {
        self.envs.insert(env.kind(), env);
    }

    pub fn get(&self, kind: SubEnvKind) -> Option<Arc<dyn SubEnvironment>> {
        self.envs.get(&kind).cloned()
    }

    pub fn contains(&self, kind: SubEnvKind) -> bool {
        self.envs.contains_key(&kind)
    }

    /// Registered kinds in canonical order.
    pub fn kinds(&self) -> Vec<SubEnvKind> {
        self.envs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.envs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }

    /// Run `input` against the sub-environment registered for `kind`.
    ///
    /// # Errors
    ///
    /// [`SubEnvError::Failed`] when nothing is registered for `kind`, or
    /// whatever the sub-environment itself returns.
    pub async fn dispatch(&self, kind: SubEnvKind, input: &str) -> Result<String, SubEnvError> {
        match self.envs.get(&kind) {
            Some(env) => env.execute(input).await,
            None => Err(SubEnvError::Failed(format!(
                "sub-environment '{kind}' is not registered"
            ))),
        }
    }

    /// Combined documentation for every registered sub-environment.
    pub fn tool_docs(&self) -> String {
        self.tool_docs_for(&self.kinds())
    }

    /// Combined documentation restricted to `kinds` (unregistered kinds are
    /// skipped).
    pub fn tool_docs_for(&self, kinds: &[SubEnvKind]) -> String {
        let mut docs = vec![
            "AVAILABLE SUBENVIRONMENTS".to_string(),
            DOC_RULE.to_string(),
            String::new(),
        ];
        for kind in kinds {
            let Some(env) = self.envs.get(kind) else {
                continue;
            };
            docs.push(format!("SUBENVIRONMENT: {}", kind.as_str().to_uppercase()));
            docs.push(format!("Identifier: {kind}"));
            docs.push(format!("Description: {}", env.description()));
            docs.push(String::new());
            docs.push(env.docs().trim().to_string());
            docs.push(format!("\n{DOC_RULE}\n"));
        }
        docs.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimSubEnvironment;

    #[tokio::test]
    async fn dispatch_reaches_registered_env() {
        let mut reg = SubEnvRegistry::new();
        reg.register(Arc::new(
            SimSubEnvironment::new(SubEnvKind::WebSearch).with_reply("3 results"),
        ));
        let out = reg.dispatch(SubEnvKind::WebSearch, "{}").await.unwrap();
        assert_eq!(out, "3 results");
    }

    #[tokio::test]
    async fn dispatch_unregistered_fails() {
        let reg = SubEnvRegistry::new();
        let err = reg.dispatch(SubEnvKind::Consultant, "{}").await.unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn register_replaces_same_kind() {
        let mut reg = SubEnvRegistry::new();
        reg.register(Arc::new(SimSubEnvironment::new(SubEnvKind::FileSystem)));
        reg.register(Arc::new(SimSubEnvironment::new(SubEnvKind::FileSystem)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn kinds_are_canonically_ordered() {
        let mut reg = SubEnvRegistry::new();
        reg.register(Arc::new(SimSubEnvironment::new(SubEnvKind::Consultant)));
        reg.register(Arc::new(SimSubEnvironment::new(SubEnvKind::FileSystem)));
        assert_eq!(reg.kinds(), vec![SubEnvKind::FileSystem, SubEnvKind::Consultant]);
    }

    #[test]
    fn tool_docs_lists_only_requested_kinds() {
        let mut reg = SubEnvRegistry::new();
        reg.register(Arc::new(SimSubEnvironment::new(SubEnvKind::FileSystem)));
        reg.register(Arc::new(SimSubEnvironment::new(SubEnvKind::WebSearch)));

        let all = reg.tool_docs();
        assert!(all.contains("SUBENVIRONMENT: FILE_SYSTEM"));
        assert!(all.contains("SUBENVIRONMENT: WEB_SEARCH"));

        let some = reg.tool_docs_for(&[SubEnvKind::WebSearch, SubEnvKind::CodeExecutor]);
        assert!(!some.contains("FILE_SYSTEM"));
        assert!(some.contains("Identifier: web_search"));
        assert!(!some.contains("CODE_EXECUTOR"));
    }
}
