/// A problem with a keyword configuration.
///
/// Issues are reported by [`crate::Configuration::validate`] when settings are
/// loaded. During a rewrite pass the same conditions are no-ops for the
/// affected rules rather than failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigIssue {
    #[error("keyword rule #{index} has an empty keyword")]
    EmptyKeyword { index: usize },

    #[error("keyword {keyword:?} has an empty item type")]
    EmptyItemType { keyword: String },

    #[error("keyword {keyword:?} maps to item type {item_type:?}, which has no path template")]
    MissingTemplate { keyword: String, item_type: String },

    #[error("keyword {keyword:?} is configured more than once")]
    DuplicateKeyword { keyword: String },

    #[error("no non-empty keywords to build a match pattern from")]
    NoKeywords,
}

#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigIssue),

    #[error("failed to compile match pattern for {keywords} keyword(s)")]
    PatternCompilation {
        keywords: usize,
        #[source]
        source: regex::Error,
    },

    #[error("failed to parse TOML settings: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse JSON settings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}
