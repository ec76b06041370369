//! `aixi-env` – The sub-environments the Ideator acts through.
//!
//! Each sub-environment turns a free-text (usually JSON) input body into a
//! free-text observation under its own restricted-access policy.  The
//! orchestrator never touches the outside world except through these.
//!
//! # Modules
//!
//! - [`subenv`] – the [`SubEnvironment`] trait and [`SubEnvError`].
//! - [`registry`] – [`SubEnvRegistry`]: trait-object registry keyed by
//!   [`SubEnvKind`][aixi_types::SubEnvKind] and the combined tool documentation.
//! - [`file_system`] – file operations confined to the working directory.
//! - [`web_search`] – read-only DuckDuckGo Instant Answer queries.
//! - [`code_executor`] – screened, time-limited Python in a child process.
//! - [`consultant`] – a second, history-free opinion from the inference backend.
//! - [`sim`] – [`SimSubEnvironment`]: scripted in-process stand-in for tests
//!   and dry runs.

pub mod code_executor;
pub mod consultant;
pub mod file_system;
pub mod registry;
pub mod sim;
pub mod subenv;
pub mod web_search;

pub use code_executor::CodeExecutorEnv;
pub use consultant::ConsultantEnv;
pub use file_system::FileSystemEnv;
pub use registry::SubEnvRegistry;
pub use sim::SimSubEnvironment;
pub use subenv::{SubEnvError, SubEnvironment};
pub use web_search::WebSearchEnv;
