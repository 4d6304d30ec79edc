pub mod error;
pub mod link_rewriter;
pub mod settings;

pub use error::{ConfigIssue, RewriteError};
pub use link_rewriter::{
    apply_replacements, build_match_pattern, find_replacements, group_rules_by_item_type, rewrite,
    scan, splice_replacements, GroupFailure, ItemTypeGroup, KeywordMatch, MatchPattern,
    Replacement, ScanReport,
};
pub use settings::{Configuration, KeywordRule, PathTemplate};
