use crate::auto_rewrite::AutoRewriter;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::{Duration, MissedTickBehavior};

/// Default polling period for watched files.
pub const POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Detects changes to one file by comparing modification time and length.
pub struct FileWatch {
    path: PathBuf,
    last: Option<(SystemTime, u64)>,
}

impl FileWatch {
    /// The first [`check`](Self::check) reports a change, matching a
    /// file-open event.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: None,
        }
    }

    /// `true` if the file differs from the previous check.
    pub fn check(&mut self) -> Result<bool> {
        let meta = std::fs::metadata(&self.path)
            .with_context(|| format!("Failed to stat {}", self.path.display()))?;
        let modified = meta
            .modified()
            .with_context(|| format!("No modification time for {}", self.path.display()))?;
        let current = (modified, meta.len());
        let changed = self.last != Some(current);
        self.last = Some(current);
        Ok(changed)
    }
}

/// Poll `watch` every `interval` and report changes to `rewriter` under `key`.
///
/// Runs until the task is dropped. Our own writes show up as changes too;
/// the follow-up pass finds nothing to link and leaves the file alone.
pub async fn poll_for_changes(
    mut watch: FileWatch,
    key: String,
    rewriter: Arc<AutoRewriter>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match watch.check() {
            Ok(true) => rewriter.on_document_change(&key).await,
            Ok(false) => {}
            Err(e) => tracing::warn!("{:#}", e),
        }
    }
}
