//! `file_system` – file operations confined to the working directory.
//!
//! Every requested path is interpreted relative to the working directory.
//! Absolute paths, `..` components that climb above the root and symlinks
//! that resolve outside it are refused with
//! [`SubEnvError::PolicyViolation`] before any I/O happens.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use aixi_types::SubEnvKind;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::subenv::{SubEnvError, SubEnvironment, parse_input};

/// Default cap on bytes returned by `read_file`.
pub const DEFAULT_MAX_READ_BYTES: u64 = 64 * 1024;

const DOCS: &str = r#"
FILE SYSTEM SUBENVIRONMENT

This subenvironment provides safe file operations within the Working Directory.

INPUT FORMAT (JSON):
{
    "action": "read_file" | "write_file" | "list_files" | "file_exists" | "delete_file",
    "path": "relative/path/to/file",
    "content": "content for write_file (optional)"
}

ACTIONS:
- read_file: Read contents of a file
- write_file: Write content to a file (creates directories as needed)
- list_files: List contents of a directory
- file_exists: Check if a file or directory exists
- delete_file: Delete a file

EXAMPLES:
{"action": "list_files", "path": "."}
{"action": "read_file", "path": "example.txt"}
{"action": "write_file", "path": "output.txt", "content": "Hello, world!"}
{"action": "file_exists", "path": "data.json"}
{"action": "delete_file", "path": "temp.txt"}

All paths are relative to the Working Directory. Absolute paths and paths
leaving the Working Directory are refused.
"#;

#[derive(Debug, Deserialize)]
struct FsRequest {
    #[serde(default)]
    action: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    content: Option<String>,
}

/// File operations rooted at a single directory.
pub struct FileSystemEnv {
    root: PathBuf,
    max_read_bytes: u64,
}

impl FileSystemEnv {
    /// Root the sub-environment at `working_directory`, creating it if
    /// needed.
    pub fn new(working_directory: impl AsRef<Path>) -> std::io::Result<Self> {
        std::fs::create_dir_all(working_directory.as_ref())?;
        let root = std::fs::canonicalize(working_directory.as_ref())?;
        Ok(Self {
            root,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        })
    }

    pub fn with_max_read_bytes(mut self, max_read_bytes: u64) -> Self {
        self.max_read_bytes = max_read_bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a requested relative path to an absolute path inside the root.
    async fn resolve(&self, requested: &str) -> Result<PathBuf, SubEnvError> {
        let requested = requested.trim();
        let requested = if requested.is_empty() { "." } else { requested };

        let mut parts: Vec<OsString> = Vec::new();
        for component in Path::new(requested).components() {
            match component {
                Component::Normal(part) => parts.push(part.to_os_string()),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(outside(requested));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SubEnvError::PolicyViolation(format!(
                        "Absolute path '{requested}' is not allowed; use a path relative to the working directory"
                    )));
                }
            }
        }
        let lexical = parts.iter().fold(self.root.clone(), |acc, p| acc.join(p));

        // The deepest existing ancestor must still canonicalise inside the
        // root, otherwise a symlink is pointing out.
        let mut ancestor = lexical.clone();
        loop {
            if tokio::fs::symlink_metadata(&ancestor).await.is_ok() {
                let real = tokio::fs::canonicalize(&ancestor)
                    .await
                    .map_err(|_| outside(requested))?;
                if !real.starts_with(&self.root) {
                    return Err(outside(requested));
                }
                break;
            }
            if !ancestor.pop() || !ancestor.starts_with(&self.root) {
                break;
            }
        }
        Ok(lexical)
    }

    fn display_relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    async fn read_file(&self, path: &str) -> Result<String, SubEnvError> {
        let target = self.resolve(path).await?;
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|_| SubEnvError::Failed(format!("File '{path}' does not exist")))?;
        if !meta.is_file() {
            return Err(SubEnvError::Failed(format!("'{path}' is not a file")));
        }
        let file = tokio::fs::File::open(&target)
            .await
            .map_err(|e| SubEnvError::Failed(format!("Failed to read file '{path}': {e}")))?;
        let mut buf = Vec::new();
        file.take(self.max_read_bytes)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| SubEnvError::Failed(format!("Failed to read file '{path}': {e}")))?;
        let mut out = format!(
            "SUCCESS: Read file '{path}'\n\nContent:\n{}",
            String::from_utf8_lossy(&buf)
        );
        if meta.len() > self.max_read_bytes {
            out.push_str(&format!(
                "\n\n[truncated: showing {} of {} bytes]",
                self.max_read_bytes,
                meta.len()
            ));
        }
        Ok(out)
    }

    async fn write_file(&self, path: &str, content: Option<&str>) -> Result<String, SubEnvError> {
        let content = content.filter(|c| !c.is_empty()).ok_or_else(|| {
            SubEnvError::InvalidInput("'content' field is required for write_file action".into())
        })?;
        let target = self.resolve(path).await?;
        if target == self.root {
            return Err(SubEnvError::InvalidInput("'path' must name a file".into()));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SubEnvError::Failed(format!("Failed to write file '{path}': {e}")))?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| SubEnvError::Failed(format!("Failed to write file '{path}': {e}")))?;
        Ok(format!(
            "SUCCESS: Wrote {} characters to file '{path}'",
            content.chars().count()
        ))
    }

    async fn list_files(&self, path: &str) -> Result<String, SubEnvError> {
        let target = self.resolve(path).await?;
        let shown = if path.trim().is_empty() { "." } else { path };
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|_| SubEnvError::Failed(format!("Directory '{shown}' does not exist")))?;
        if !meta.is_dir() {
            return Err(SubEnvError::Failed(format!("'{shown}' is not a directory")));
        }
        let mut reader = tokio::fs::read_dir(&target)
            .await
            .map_err(|e| SubEnvError::Failed(format!("Failed to list directory '{shown}': {e}")))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| SubEnvError::Failed(format!("Failed to list directory '{shown}': {e}")))?
        {
            entries.push(entry);
        }
        entries.sort_by_key(|e| e.file_name());

        if entries.is_empty() {
            return Ok(format!("SUCCESS: Directory '{shown}' is empty"));
        }
        let mut lines = vec![format!("SUCCESS: Contents of directory '{shown}':")];
        for entry in entries {
            let rel = self.display_relative(&entry.path());
            match entry.metadata().await {
                Ok(m) if m.is_dir() => lines.push(format!("[DIR]  {rel}/")),
                Ok(m) => lines.push(format!("[FILE] {rel} ({} bytes)", m.len())),
                Err(_) => lines.push(format!("[????] {rel}")),
            }
        }
        Ok(lines.join("\n"))
    }

    async fn file_exists(&self, path: &str) -> Result<String, SubEnvError> {
        let target = self.resolve(path).await?;
        Ok(match tokio::fs::metadata(&target).await {
            Ok(m) if m.is_file() => format!("SUCCESS: File '{path}' exists ({} bytes)", m.len()),
            Ok(m) if m.is_dir() => format!("SUCCESS: Directory '{path}' exists"),
            Ok(_) => format!("SUCCESS: Path '{path}' exists but is neither file nor directory"),
            Err(_) => format!("SUCCESS: Path '{path}' does not exist"),
        })
    }

    async fn delete_file(&self, path: &str) -> Result<String, SubEnvError> {
        let target = self.resolve(path).await?;
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|_| SubEnvError::Failed(format!("File '{path}' does not exist")))?;
        if !meta.is_file() {
            return Err(SubEnvError::Failed(format!("'{path}' is not a file")));
        }
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| SubEnvError::Failed(format!("Failed to delete file '{path}': {e}")))?;
        Ok(format!("SUCCESS: Deleted file '{path}'"))
    }
}

fn outside(requested: &str) -> SubEnvError {
    SubEnvError::PolicyViolation(format!("Path '{requested}' is outside working directory"))
}

#[async_trait]
impl SubEnvironment for FileSystemEnv {
    fn kind(&self) -> SubEnvKind {
        SubEnvKind::FileSystem
    }

    fn description(&self) -> &str {
        "Safe file operations within Working Directory"
    }

    fn docs(&self) -> &str {
        DOCS
    }

    async fn execute(&self, input: &str) -> Result<String, SubEnvError> {
        let req: FsRequest = parse_input(input)?;
        debug!(action = %req.action, path = %req.path, "file_system request");
        match req.action.as_str() {
            "read_file" => self.read_file(&req.path).await,
            "write_file" => self.write_file(&req.path, req.content.as_deref()).await,
            "list_files" => self.list_files(&req.path).await,
            "file_exists" => self.file_exists(&req.path).await,
            "delete_file" => self.delete_file(&req.path).await,
            other => Err(SubEnvError::InvalidInput(format!(
                "Unknown action '{other}'. Available actions: read_file, write_file, list_files, file_exists, delete_file"
            ))),
        }
    }
}
