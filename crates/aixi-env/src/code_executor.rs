//! `code_executor` – screened, time-limited Python in a child process.
//!
//! Code is first screened against a list of dangerous patterns.  Code that
//! passes runs as `python -I -c <code>` with a cleared environment, the
//! working directory as cwd, piped output and `kill_on_drop`, so an
//! abandoned or timed-out run never outlives its future.
//!
//! At most `max_output_bytes + 1` bytes are read from each stream.  A child
//! that writes past the cap is killed instead of being drained.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use aixi_types::SubEnvKind;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::subenv::{SubEnvError, SubEnvironment, parse_input};

pub const DEFAULT_PYTHON: &str = "python3";
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024;
const MIN_TIMEOUT_SECS: f64 = 1.0;
const DEFAULT_TIMEOUT_SECS: f64 = 10.0;
const MAX_TIMEOUT_SECS: f64 = 60.0;

/// Substrings (matched case-insensitively) that refuse a snippet outright.
pub const DANGEROUS_PATTERNS: &[&str] = &[
    "import os",
    "import sys",
    "import subprocess",
    "import shutil",
    "from os",
    "from sys",
    "from subprocess",
    "from shutil",
    "__import__",
    "eval(",
    "exec(",
    "compile(",
    "open(",
    "file(",
    "input(",
    "raw_input(",
    "globals()",
    "locals()",
    "vars()",
    "dir()",
    "getattr(",
    "setattr(",
    "delattr(",
    "hasattr(",
];

const DOCS: &str = r#"
CODE EXECUTOR SUBENVIRONMENT

This subenvironment runs Python code with security restrictions.

INPUT FORMAT (JSON):
{
    "code": "Python code to execute",
    "method": "safe",  // optional: "safe" (default) or "subprocess"
    "timeout": 10      // optional: timeout in seconds (1-60, default 10)
}

SECURITY RESTRICTIONS:
- No file system access (os, open, file)
- No system calls (subprocess, sys)
- No dynamic imports (__import__, importlib)
- No eval/exec functions
- Execution timeout to prevent infinite loops

Both methods run the code in a separate, isolated interpreter process.

EXAMPLES:
{"code": "print('Hello, world!')"}
{"code": "import math\nprint(math.sqrt(16))", "timeout": 5}
{"code": "x = [1, 2, 3]\nprint(sum(x))", "method": "subprocess"}

NOTES:
- Code is executed in the Working Directory
- Both stdout and stderr are captured
- Dangerous operations are blocked for security
"#;

#[derive(Debug, Deserialize)]
struct ExecRequest {
    #[serde(default)]
    code: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    timeout: Option<f64>,
}

/// Return the first dangerous pattern found in `code`, if any.
pub fn screen(code: &str) -> Option<&'static str> {
    let lower = code.to_lowercase();
    DANGEROUS_PATTERNS
        .iter()
        .copied()
        .find(|pattern| lower.contains(pattern))
}

fn truncate(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[output truncated at {max_bytes} bytes]", &text[..cut])
}

/// Read `pipe` until EOF or until `limit` bytes have arrived; hitting the
/// limit wakes `overflow`.
async fn read_capped<R: AsyncRead + Unpin>(
    pipe: Option<R>,
    limit: u64,
    overflow: &Notify,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        pipe.take(limit).read_to_end(&mut buf).await?;
        if buf.len() as u64 >= limit {
            overflow.notify_one();
        }
    }
    Ok(buf)
}

/// Python execution sandboxed to a child process.
pub struct CodeExecutorEnv {
    working_dir: PathBuf,
    python: String,
    max_output_bytes: usize,
}

impl CodeExecutorEnv {
    pub fn new(working_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        std::fs::create_dir_all(working_dir.as_ref())?;
        Ok(Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            python: DEFAULT_PYTHON.to_string(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        })
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    async fn run(&self, code: &str, timeout: Duration) -> Result<String, SubEnvError> {
        let mut child = Command::new(&self.python)
            .arg("-I")
            .arg("-c")
            .arg(code)
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SubEnvError::Failed(format!(
                    "Failed to start interpreter '{}': {e}",
                    self.python
                ))
            })?;

        let limit = self.max_output_bytes as u64 + 1;
        let overflow = Notify::new();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let execution = async {
            let readers = async {
                tokio::try_join!(
                    read_capped(stdout_pipe, limit, &overflow),
                    read_capped(stderr_pipe, limit, &overflow),
                )
            };
            let exit = async {
                tokio::select! {
                    status = child.wait() => status.map(|s| (s, false)),
                    _ = overflow.notified() => {
                        warn!(limit_bytes = limit - 1, "output limit exceeded; killing interpreter");
                        match child.start_kill() {
                            Ok(()) => child.wait().await.map(|s| (s, true)),
                            Err(e) => Err(e),
                        }
                    }
                }
            };
            let ((stdout, stderr), (status, capped)) = tokio::try_join!(readers, exit)?;
            Ok::<_, std::io::Error>((stdout, stderr, status, capped))
        };

        let (stdout, stderr, status, capped) = match tokio::time::timeout(timeout, execution).await
        {
            Ok(result) => result.map_err(|e| {
                SubEnvError::Failed(format!("Failed to execute code in subprocess: {e}"))
            })?,
            Err(_) => {
                let secs = timeout.as_secs_f64();
                warn!(secs, "code execution timed out");
                return Err(SubEnvError::Failed(format!(
                    "Code execution timed out after {secs} seconds"
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr);
        let mut parts = Vec::new();
        if !stdout.is_empty() {
            parts.push(format!("STDOUT:\n{}", truncate(&stdout, self.max_output_bytes)));
        }
        if !stderr.is_empty() {
            parts.push(format!("STDERR:\n{}", truncate(&stderr, self.max_output_bytes)));
        }
        if capped {
            parts.push(format!(
                "OUTPUT LIMIT: interpreter stopped after writing more than {} bytes",
                self.max_output_bytes
            ));
        } else if !status.success() {
            match status.code() {
                Some(code) => parts.push(format!("EXIT CODE: {code}")),
                None => parts.push("EXIT CODE: terminated by signal".to_string()),
            }
        }
        if parts.is_empty() {
            parts.push("Code executed successfully with no output.".to_string());
        }
        Ok(format!("SUCCESS: {}", parts.join("\n\n")))
    }
}

#[async_trait]
impl SubEnvironment for CodeExecutorEnv {
    fn kind(&self) -> SubEnvKind {
        SubEnvKind::CodeExecutor
    }

    fn description(&self) -> &str {
        "Safe Python code execution with security restrictions"
    }

    fn docs(&self) -> &str {
        DOCS
    }

    async fn execute(&self, input: &str) -> Result<String, SubEnvError> {
        let req: ExecRequest = parse_input(input)?;
        let code = req.code.trim();
        if code.is_empty() {
            return Err(SubEnvError::InvalidInput(
                "'code' field is required and cannot be empty".into(),
            ));
        }
        let timeout = req.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout) {
            return Err(SubEnvError::InvalidInput(
                "'timeout' must be a number between 1 and 60 seconds".into(),
            ));
        }
        // Both methods run out of process; the field is accepted for
        // compatibility with existing prompts.
        match req.method.as_deref().unwrap_or("safe") {
            "safe" | "subprocess" => {}
            other => {
                return Err(SubEnvError::InvalidInput(format!(
                    "Unknown execution method '{other}'. Use 'safe' or 'subprocess'"
                )));
            }
        }
        if let Some(pattern) = screen(code) {
            return Err(SubEnvError::PolicyViolation(format!(
                "Potentially dangerous code pattern detected: '{pattern}'"
            )));
        }
        debug!(bytes = code.len(), secs = timeout, "code_executor request");
        self.run(code, Duration::from_secs_f64(timeout)).await
    }
}
