use anyhow::{Context, Result};
use async_trait::async_trait;
use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tdx_links_core::{splice_replacements, Replacement};

/// What happened when edits were handed to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// This many replacements were written.
    Applied(usize),
    /// Nothing to change; the document was not written.
    Unchanged,
    /// The document no longer holds the text the edits were planned against.
    Stale,
}

/// A text document the rewriter can read and update.
#[async_trait]
pub trait Document: Send + Sync {
    /// Stable identifier used for debouncing and logs.
    fn key(&self) -> &str;

    async fn text(&self) -> Result<String>;

    /// Overwrite the whole document.
    async fn replace_text(&self, new_text: &str) -> Result<()>;

    /// Apply range edits planned against `base`.
    ///
    /// Re-reads the document first and refuses to write if it changed since
    /// `base` was read, so a concurrent edit is never clobbered.
    async fn apply_edits(&self, base: &str, edits: &[Replacement]) -> Result<EditOutcome> {
        let current = self.text().await?;
        if current != base {
            return Ok(EditOutcome::Stale);
        }
        match splice_replacements(&current, edits) {
            (Cow::Owned(new_text), applied) if applied > 0 => {
                self.replace_text(&new_text).await?;
                Ok(EditOutcome::Applied(applied))
            }
            _ => Ok(EditOutcome::Unchanged),
        }
    }
}

/// A markdown file on disk.
///
/// Writes go to a temporary sibling that is renamed over the original, so a
/// failed write leaves the old contents in place.
pub struct FileDocument {
    path: PathBuf,
    key: String,
}

impl FileDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key = path.display().to_string();
        Self { path, key }
    }

}

#[async_trait]
impl Document for FileDocument {
    fn key(&self) -> &str {
        &self.key
    }

    async fn text(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))
    }

    async fn replace_text(&self, new_text: &str) -> Result<()> {
        let path = self.path.clone();
        let contents = new_text.to_string();
        tokio::task::spawn_blocking(move || write_atomically(&path, &contents))
            .await
            .context("Write task panicked")?
    }
}

fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents.as_bytes())
        .with_context(|| format!("Failed to write temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// An in-memory document.
pub struct MemoryDocument {
    key: String,
    text: Mutex<String>,
}

impl MemoryDocument {
    pub fn new(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            text: Mutex::new(text.into()),
        }
    }

    pub fn snapshot(&self) -> String {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Document for MemoryDocument {
    fn key(&self) -> &str {
        &self.key
    }

    async fn text(&self) -> Result<String> {
        Ok(self.snapshot())
    }

    async fn replace_text(&self, new_text: &str) -> Result<()> {
        *self.text.lock().unwrap_or_else(|e| e.into_inner()) = new_text.to_string();
        Ok(())
    }
}
