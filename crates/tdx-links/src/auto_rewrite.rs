use crate::commands::rewrite_document;
use crate::document::{Document, EditOutcome};
use crate::session::RewriteSession;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Duration, Instant};

/// Quiet period after the last change before a document is rewritten.
pub const DEBOUNCE_DURATION: Duration = Duration::from_millis(1500);

const CHANNEL_CAPACITY: usize = 1000;

/// Open documents by key.
pub type DocumentRegistry = DashMap<String, Arc<dyn Document>>;

/// Trailing-edge debounced rewriting of changed documents.
///
/// Change notifications only record a timestamp; the first one for a
/// document also queues it for the worker. The worker waits until the
/// document has been quiet for the debounce period, then rewrites it unless
/// the session has automatic rewriting disabled.
pub struct AutoRewriter {
    pending: Arc<DashMap<String, Instant>>,
    rewrite_tx: mpsc::Sender<String>,
    debounce: Duration,
}

impl AutoRewriter {
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        Self::with_debounce(DEBOUNCE_DURATION)
    }

    pub fn with_debounce(debounce: Duration) -> (Self, mpsc::Receiver<String>) {
        Self::with_capacity(debounce, CHANNEL_CAPACITY)
    }

    fn with_capacity(debounce: Duration, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (rewrite_tx, rewrite_rx) = mpsc::channel(capacity);
        (
            Self {
                pending: Arc::new(DashMap::new()),
                rewrite_tx,
                debounce,
            },
            rewrite_rx,
        )
    }

    pub async fn on_document_change(&self, key: &str) {
        use dashmap::mapref::entry::Entry;
        // Check-and-insert in one step so two concurrent calls cannot both
        // see "not pending" and queue twice.
        let is_new = match self.pending.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                e.insert(Instant::now());
                false
            }
            Entry::Vacant(e) => {
                e.insert(Instant::now());
                true
            }
        };
        if is_new {
            self.enqueue(key).await;
        }
    }

    async fn enqueue(&self, key: &str) {
        if let Err(e) = self.rewrite_tx.send(key.to_string()).await {
            tracing::error!(
                "Auto-rewrite channel send failed (receiver dropped, worker dead?): {}",
                e
            );
        }
    }

    /// Queue `key` again from inside the worker.
    ///
    /// The worker is the channel's only reader, so it must never wait for
    /// room. If the queue is full the pending entry is dropped and the next
    /// change queues the document afresh.
    fn requeue(&self, key: &str) {
        match self.rewrite_tx.try_send(key.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Auto-rewrite queue full, dropping requeue of {}", key);
                self.pending.remove(key);
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!("Auto-rewrite channel closed, cannot requeue {}", key);
                self.pending.remove(key);
            }
        }
    }

    fn last_change(&self, key: &str) -> Option<Instant> {
        self.pending.get(key).map(|entry| *entry)
    }

    fn is_ready(&self, key: &str) -> bool {
        self.last_change(key)
            .is_some_and(|changed| changed.elapsed() >= self.debounce)
    }

    /// Finish a pass that started after the change seen at `seen`. A change
    /// that arrived during the pass keeps the entry and queues the document
    /// again.
    fn finish(&self, key: &str, seen: Instant) {
        let removed = self.pending.remove_if(key, |_, changed| *changed == seen);
        if removed.is_none() && self.pending.contains_key(key) {
            self.requeue(key);
        }
    }

    /// Drop every pending entry.
    pub fn clear_pending(&self) {
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Process the rewrite queue until every sender is dropped.
    pub async fn run_worker(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<String>,
        docs: Arc<DocumentRegistry>,
        session: Arc<RewriteSession>,
    ) {
        tracing::info!("Auto-rewrite worker started");
        while let Some(key) = rx.recv().await {
            // Sleep until nothing has changed for a full debounce period.
            // on_document_change keeps pushing the timestamp forward.
            loop {
                tokio::time::sleep(self.debounce).await;
                if self.is_ready(&key) || !self.pending.contains_key(&key) {
                    break;
                }
            }

            let Some(seen) = self.last_change(&key) else {
                continue; // cleared while waiting
            };

            if !session.is_auto_enabled() {
                tracing::debug!(
                    "Not rewriting {}: automatic rewriting is disabled for this session",
                    key
                );
                self.pending.remove(&key);
                continue;
            }

            let Some(doc) = docs.get(&key).map(|entry| Arc::clone(entry.value())) else {
                tracing::warn!("Document {} is not open, skipping", key);
                self.pending.remove(&key);
                continue;
            };

            let config = session.configuration();
            match rewrite_document(&config, doc.as_ref()).await {
                Ok(EditOutcome::Applied(count)) => {
                    tracing::info!("Linked {} item ID(s) in {}", count, key);
                }
                Ok(EditOutcome::Unchanged) => {
                    tracing::debug!("Nothing to link in {}", key);
                }
                Ok(EditOutcome::Stale) => {
                    tracing::debug!("{} changed during rewrite, requeueing", key);
                    self.pending.insert(key.clone(), Instant::now());
                    self.requeue(&key);
                    continue;
                }
                Err(e) => {
                    session.trip(&e);
                }
            }

            self.finish(&key, seen);
        }
        tracing::info!("Auto-rewrite worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocument;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tdx_links_core::{Configuration, KeywordRule, PathTemplate};

    fn ticket_config() -> Configuration {
        Configuration {
            base_url: "https://tdx.example.com".into(),
            auto_replace_enabled: true,
            skip_code: false,
            rules: vec![KeywordRule::new("Ticket #", "Ticket")],
            templates: vec![PathTemplate::new("Ticket", "/TicketDet?TicketID=")],
        }
    }

    /// Readable, but every write fails.
    struct ReadOnlyDocument {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl Document for ReadOnlyDocument {
        fn key(&self) -> &str {
            "read-only"
        }

        async fn text(&self) -> Result<String> {
            Ok("Ticket #1".to_string())
        }

        async fn replace_text(&self, _new_text: &str) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("permission denied")
        }
    }

    struct Harness {
        rewriter: Arc<AutoRewriter>,
        docs: Arc<DocumentRegistry>,
        session: Arc<RewriteSession>,
    }

    fn spawn_worker(config: Configuration) -> Harness {
        let (rewriter, rx) = AutoRewriter::new();
        let rewriter = Arc::new(rewriter);
        let docs: Arc<DocumentRegistry> = Arc::new(DashMap::new());
        let session = Arc::new(RewriteSession::new(config));
        tokio::spawn(Arc::clone(&rewriter).run_worker(rx, Arc::clone(&docs), Arc::clone(&session)));
        Harness {
            rewriter,
            docs,
            session,
        }
    }

    async fn settle() {
        tokio::time::sleep(DEBOUNCE_DURATION * 2 + Duration::from_millis(100)).await;
    }

    // === Debounce pipeline tests ===

    #[tokio::test]
    async fn rapid_changes_send_single_channel_message() {
        let (rewriter, mut rx) = AutoRewriter::new();

        rewriter.on_document_change("note").await;
        rewriter.on_document_change("note").await;
        rewriter.on_document_change("note").await;

        assert!(rx.try_recv().is_ok(), "should have one message");
        assert!(rx.try_recv().is_err(), "should not have more messages");
        assert_eq!(rewriter.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_only_after_changes_settle() {
        let (rewriter, _rx) = AutoRewriter::new();

        rewriter.on_document_change("note").await;
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(300)).await;
            rewriter.on_document_change("note").await;
        }
        assert!(!rewriter.is_ready("note"), "should not be ready while typing");

        tokio::time::sleep(DEBOUNCE_DURATION + Duration::from_millis(100)).await;
        assert!(rewriter.is_ready("note"), "should be ready after the quiet period");
    }

    #[tokio::test]
    async fn finished_document_requeues_on_next_change() {
        let (rewriter, mut rx) = AutoRewriter::new();

        rewriter.on_document_change("note").await;
        assert!(rx.try_recv().is_ok());

        let seen = rewriter.last_change("note").unwrap();
        rewriter.finish("note", seen);
        assert_eq!(rewriter.pending_count(), 0);

        rewriter.on_document_change("note").await;
        assert!(rx.try_recv().is_ok(), "should queue again after finishing");
    }

    #[tokio::test(start_paused = true)]
    async fn change_during_pass_requeues() {
        let (rewriter, mut rx) = AutoRewriter::new();

        rewriter.on_document_change("note").await;
        assert!(rx.try_recv().is_ok());
        let seen = rewriter.last_change("note").unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        rewriter.on_document_change("note").await;
        rewriter.finish("note", seen);

        assert_eq!(rewriter.pending_count(), 1);
        assert!(rx.try_recv().is_ok(), "newer change should be queued again");
    }

    #[tokio::test]
    async fn requeue_on_full_queue_does_not_block() {
        let (rewriter, mut rx) = AutoRewriter::with_capacity(DEBOUNCE_DURATION, 1);

        rewriter.on_document_change("a").await;
        rewriter.pending.insert("b".into(), Instant::now());
        rewriter.requeue("b");

        assert!(!rewriter.pending.contains_key("b"), "dropped requeue should clear the entry");
        assert_eq!(rx.try_recv().unwrap(), "a");
        assert!(rx.try_recv().is_err());

        rewriter.on_document_change("b").await;
        assert_eq!(rx.try_recv().unwrap(), "b", "next change should queue again");
    }

    #[tokio::test]
    async fn clear_pending_drops_entries() {
        let (rewriter, _rx) = AutoRewriter::new();
        rewriter.on_document_change("a").await;
        rewriter.on_document_change("b").await;
        rewriter.clear_pending();
        assert_eq!(rewriter.pending_count(), 0);
    }

    // === Worker tests ===

    #[tokio::test(start_paused = true)]
    async fn worker_rewrites_after_quiet_period() {
        let h = spawn_worker(ticket_config());
        let doc = Arc::new(MemoryDocument::new("note", "Ticket #123 and Ticket #456."));
        h.docs.insert("note".into(), doc.clone());

        h.rewriter.on_document_change("note").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(doc.snapshot(), "Ticket #123 and Ticket #456.", "rewrote too early");

        settle().await;
        assert_eq!(
            doc.snapshot(),
            "[Ticket #123](https://tdx.example.com/TicketDet?TicketID=123) and [Ticket #456](https://tdx.example.com/TicketDet?TicketID=456)."
        );
        assert_eq!(h.rewriter.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_respects_disabled_setting() {
        let config = Configuration {
            auto_replace_enabled: false,
            ..ticket_config()
        };
        let h = spawn_worker(config);
        let doc = Arc::new(MemoryDocument::new("note", "Ticket #1"));
        h.docs.insert("note".into(), doc.clone());

        h.rewriter.on_document_change("note").await;
        settle().await;

        assert_eq!(doc.snapshot(), "Ticket #1");
        assert_eq!(h.rewriter.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_trips_breaker_and_stops_retries() {
        let h = spawn_worker(ticket_config());
        let doc = Arc::new(ReadOnlyDocument {
            writes: AtomicUsize::new(0),
        });
        h.docs.insert("read-only".into(), doc.clone());

        h.rewriter.on_document_change("read-only").await;
        settle().await;
        assert!(h.session.is_tripped());
        assert_eq!(doc.writes.load(Ordering::SeqCst), 1);

        // further edits are ignored until the breaker is reset
        h.rewriter.on_document_change("read-only").await;
        settle().await;
        assert_eq!(doc.writes.load(Ordering::SeqCst), 1);

        h.session.reload_configuration(ticket_config());
        h.rewriter.on_document_change("read-only").await;
        settle().await;
        assert_eq!(doc.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_document_is_skipped() {
        let h = spawn_worker(ticket_config());
        h.rewriter.on_document_change("closed").await;
        settle().await;
        assert_eq!(h.rewriter.pending_count(), 0);
        assert!(!h.session.is_tripped());
    }
}
