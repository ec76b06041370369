//! The uniform sub-environment contract.

use async_trait::async_trait;
use aixi_types::SubEnvKind;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Why a sub-environment could not produce a normal observation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubEnvError {
    /// The input body was not understood (bad JSON, missing field, …).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The input asked for something the variant's policy forbids.
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    /// The operation was attempted and failed.
    #[error("{0}")]
    Failed(String),
}

/// Every sub-environment variant implements this trait.
///
/// # Contract
///
/// * `execute` receives the action's `input_body` verbatim and returns the
///   observation text.  It must never panic on arbitrary input and must
///   enforce its own access policy before touching anything external.
/// * `docs` is shown to the Ideator verbatim and should describe the input
///   format with examples.
#[async_trait]
pub trait SubEnvironment: Send + Sync {
    fn kind(&self) -> SubEnvKind;

    /// One-line summary.
    fn description(&self) -> &str;

    /// Full input documentation.
    fn docs(&self) -> &str;

    async fn execute(&self, input: &str) -> Result<String, SubEnvError>;
}

/// Decode a JSON input body, mapping parse failures to
/// [`SubEnvError::InvalidInput`].
pub(crate) fn parse_input<T: DeserializeOwned>(input: &str) -> Result<T, SubEnvError> {
    serde_json::from_str(input.trim())
        .map_err(|e| SubEnvError::InvalidInput(format!("Invalid JSON input: {e}")))
}
