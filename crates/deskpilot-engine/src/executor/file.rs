use super::Executor;
use async_trait::async_trait;
use deskpilot_common::{Action, ActionKind, ExecutionError};
use serde_json::{Value, json};
use std::path::Path;
use tokio::io::AsyncWriteExt;

const DEFAULT_MAX_READ_BYTES: u64 = 1024 * 1024;

/// File operations on absolute paths. Path policy (sandbox roots) is the
/// gate's concern; this executor only reports what the OS says.
#[derive(Debug, Clone)]
pub struct FileExecutor {
    max_read_bytes: u64,
}

impl Default for FileExecutor {
    fn default() -> Self {
        Self {
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }
}

impl FileExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_read_bytes(mut self, limit: u64) -> Self {
        self.max_read_bytes = limit;
        self
    }

    fn required<'a>(action: &'a Action, name: &str) -> Result<&'a Path, ExecutionError> {
        action
            .path(name)
            .ok_or_else(|| ExecutionError::Unsupported(format!("missing path '{}'", name)))
    }

    async fn create(&self, path: &Path, content: &str) -> Result<Value, ExecutionError> {
        let target = path.display().to_string();
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    ExecutionError::Io(format!("{} already exists", target))
                }
                _ => ExecutionError::from_io(e, &target),
            })?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| ExecutionError::from_io(e, &target))?;
        file.flush()
            .await
            .map_err(|e| ExecutionError::from_io(e, &target))?;
        Ok(json!({ "path": target, "bytes": content.len() }))
    }

    async fn read(&self, path: &Path) -> Result<Value, ExecutionError> {
        let target = path.display().to_string();
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| ExecutionError::from_io(e, &target))?;
        if meta.is_dir() {
            return Err(ExecutionError::Unsupported(format!(
                "{} is a directory",
                target
            )));
        }
        if meta.len() > self.max_read_bytes {
            return Err(ExecutionError::Unsupported(format!(
                "{} is {} bytes, over the {} byte read limit",
                target,
                meta.len(),
                self.max_read_bytes
            )));
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ExecutionError::from_io(e, &target))?;
        Ok(json!({ "path": target, "content": content }))
    }

    async fn write(&self, path: &Path, content: &str, append: bool) -> Result<Value, ExecutionError> {
        let target = path.display().to_string();
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }

        let mut file = options
            .open(path)
            .await
            .map_err(|e| ExecutionError::from_io(e, &target))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| ExecutionError::from_io(e, &target))?;
        file.flush()
            .await
            .map_err(|e| ExecutionError::from_io(e, &target))?;
        Ok(json!({ "path": target, "bytes": content.len(), "append": append }))
    }

    async fn delete(&self, path: &Path) -> Result<Value, ExecutionError> {
        let target = path.display().to_string();
        let meta = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| ExecutionError::from_io(e, &target))?;
        if meta.is_dir() {
            return Err(ExecutionError::Unsupported(format!(
                "{} is a directory",
                target
            )));
        }
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| ExecutionError::from_io(e, &target))?;
        Ok(json!({ "path": target }))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<Value, ExecutionError> {
        let source = from.display().to_string();
        let dest = to.display().to_string();

        // rename(2) silently replaces an existing destination.
        if tokio::fs::try_exists(to)
            .await
            .map_err(|e| ExecutionError::from_io(e, &dest))?
        {
            return Err(ExecutionError::Io(format!("{} already exists", dest)));
        }
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| ExecutionError::from_io(e, &source))?;
        Ok(json!({ "from": source, "to": dest }))
    }

    async fn list(&self, path: &Path, pattern: Option<&str>) -> Result<Value, ExecutionError> {
        let target = path.display().to_string();
        let pattern = pattern
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| ExecutionError::Unsupported(format!("pattern: {}", e)))?;

        let mut dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| ExecutionError::from_io(e, &target))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ExecutionError::from_io(e, &target))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(p) = &pattern
                && !p.matches(&name)
            {
                continue;
            }
            let kind = match entry.file_type().await {
                Ok(t) if t.is_dir() => "directory",
                Ok(t) if t.is_symlink() => "symlink",
                Ok(_) => "file",
                Err(_) => "unknown",
            };
            entries.push((name, kind));
        }
        entries.sort();

        let entries: Vec<Value> = entries
            .into_iter()
            .map(|(name, kind)| json!({ "name": name, "kind": kind }))
            .collect();
        Ok(json!({ "path": target, "entries": entries }))
    }
}

#[async_trait]
impl Executor for FileExecutor {
    fn name(&self) -> &'static str {
        "file"
    }

    fn supported_kinds(&self) -> &'static [ActionKind] {
        &[
            ActionKind::CreateFile,
            ActionKind::ReadFile,
            ActionKind::WriteFile,
            ActionKind::DeleteFile,
            ActionKind::MoveFile,
            ActionKind::ListDirectory,
        ]
    }

    async fn perform(&self, action: &Action) -> Result<Option<Value>, ExecutionError> {
        let output = match action.kind() {
            ActionKind::CreateFile => {
                let path = Self::required(action, "path")?;
                self.create(path, action.text("content").unwrap_or_default())
                    .await?
            }
            ActionKind::ReadFile => self.read(Self::required(action, "path")?).await?,
            ActionKind::WriteFile => {
                let path = Self::required(action, "path")?;
                self.write(
                    path,
                    action.text("content").unwrap_or_default(),
                    action.flag("append"),
                )
                .await?
            }
            ActionKind::DeleteFile => self.delete(Self::required(action, "path")?).await?,
            ActionKind::MoveFile => {
                let from = Self::required(action, "from")?;
                let to = Self::required(action, "to")?;
                self.rename(from, to).await?
            }
            ActionKind::ListDirectory => {
                self.list(Self::required(action, "path")?, action.text("pattern"))
                    .await?
            }
            other => {
                return Err(ExecutionError::Unsupported(format!(
                    "{} is not a file action",
                    other
                )));
            }
        };
        tracing::info!(kind = %action.kind(), "file action done");
        Ok(Some(output))
    }
}
