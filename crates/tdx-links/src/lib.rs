pub mod auto_rewrite;
pub mod commands;
pub mod document;
pub mod session;
pub mod settings_file;
pub mod watch;

pub use auto_rewrite::{AutoRewriter, DocumentRegistry, DEBOUNCE_DURATION};
pub use commands::{replace_item_ids, rewrite_document};
pub use document::{Document, EditOutcome, FileDocument, MemoryDocument};
pub use session::RewriteSession;
pub use settings_file::load_configuration;
pub use watch::{poll_for_changes, FileWatch, POLL_INTERVAL};
