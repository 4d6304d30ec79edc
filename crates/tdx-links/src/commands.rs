use crate::document::{Document, EditOutcome};
use crate::session::RewriteSession;
use anyhow::{bail, Result};
use tdx_links_core::{find_replacements, Configuration};

/// How many times a manual run re-plans when the document keeps changing
/// underneath it.
const MANUAL_ATTEMPTS: usize = 3;

/// One rewrite pass: read, plan, apply as range edits.
pub async fn rewrite_document(config: &Configuration, doc: &dyn Document) -> Result<EditOutcome> {
    let text = doc.text().await?;
    let replacements = find_replacements(&text, config);
    if replacements.is_empty() {
        return Ok(EditOutcome::Unchanged);
    }
    doc.apply_edits(&text, &replacements).await
}

/// The "replace item IDs with links" command.
///
/// Runs regardless of the circuit breaker. On success the breaker is reset,
/// so automatic rewriting resumes. Returns the number of links written.
pub async fn replace_item_ids(session: &RewriteSession, doc: &dyn Document) -> Result<usize> {
    let config = session.configuration();

    for attempt in 1..=MANUAL_ATTEMPTS {
        match rewrite_document(&config, doc).await? {
            EditOutcome::Applied(count) => {
                tracing::info!("Linked {} item ID(s) in {}", count, doc.key());
                session.reset();
                return Ok(count);
            }
            EditOutcome::Unchanged => {
                tracing::debug!("No item IDs to link in {}", doc.key());
                session.reset();
                return Ok(0);
            }
            EditOutcome::Stale => {
                tracing::debug!(
                    "{} changed while planning (attempt {}/{})",
                    doc.key(),
                    attempt,
                    MANUAL_ATTEMPTS
                );
            }
        }
    }

    bail!(
        "{} kept changing during rewrite; gave up after {} attempts",
        doc.key(),
        MANUAL_ATTEMPTS
    )
}
