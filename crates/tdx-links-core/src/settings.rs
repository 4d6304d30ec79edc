use crate::error::{ConfigIssue, RewriteError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_BASE_URL: &str = "https://solutions.teamdynamix.com";

/// Maps a literal keyword (e.g. `"Incident #"`) to an item type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keyword: String,
    #[serde(alias = "itemType")]
    pub item_type: String,
}

impl KeywordRule {
    pub fn new(keyword: impl Into<String>, item_type: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            item_type: item_type.into(),
        }
    }
}

/// URL path fragment for one item type. The numeric ID is appended verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathTemplate {
    #[serde(alias = "itemType")]
    pub item_type: String,
    pub path: String,
}

impl PathTemplate {
    pub fn new(item_type: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
            path: path.into(),
        }
    }
}

/// Settings snapshot for one rewrite pass.
///
/// Keys written by the Obsidian plugin's `data.json` (`teamdynamixBaseUrl`,
/// `keywordToItemType`, ...) are accepted as aliases, and any missing field
/// falls back to [`Configuration::default`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Origin of the tracker, e.g. `https://tdx.example.com`. Used verbatim.
    #[serde(alias = "teamdynamixBaseUrl")]
    pub base_url: String,
    #[serde(alias = "enableAutomaticReplacement")]
    pub auto_replace_enabled: bool,
    /// Leave occurrences inside fenced code blocks and inline code alone.
    #[serde(alias = "skipCode")]
    pub skip_code: bool,
    #[serde(alias = "keywordToItemType")]
    pub rules: Vec<KeywordRule>,
    #[serde(alias = "typeToPath")]
    pub templates: Vec<PathTemplate>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auto_replace_enabled: true,
            skip_code: false,
            rules: vec![
                KeywordRule::new("Major Incident #", "Ticket"),
                KeywordRule::new("Incident #", "Ticket"),
                KeywordRule::new("Change #", "Ticket"),
                KeywordRule::new("Problem #", "Ticket"),
                KeywordRule::new("Release #", "Ticket"),
                KeywordRule::new("Service Request #", "Ticket"),
                KeywordRule::new("Asset #", "Asset"),
                KeywordRule::new("Configuration Item #", "ConfigurationItem"),
                KeywordRule::new("Issue #", "Issue"),
                KeywordRule::new("Project #", "Project"),
            ],
            templates: vec![
                PathTemplate::new("Ticket", "/TDNext/Apps/Tickets/TicketDet?TicketID="),
                PathTemplate::new("Asset", "/TDNext/Apps/Assets/AssetDet.aspx?AssetID="),
                // Missing leading slash is kept as shipped; paths are never normalized.
                PathTemplate::new("ConfigurationItem", "TDNext/Apps/Assets/CIDet.aspx?ID="),
                PathTemplate::new("Issue", "/TDNext/Apps/Projects/Issues/IssueDet.aspx?IID="),
                PathTemplate::new(
                    "Project",
                    "/TDNext/Apps/Projects/TeamManagement/ProjectDetails.aspx?TID=",
                ),
            ],
        }
    }
}

impl Configuration {
    pub fn from_toml_str(source: &str) -> Result<Self, RewriteError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_json_str(source: &str) -> Result<Self, RewriteError> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn to_toml_string(&self) -> Result<String, RewriteError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// First template registered for `item_type`, if any.
    pub fn template_for(&self, item_type: &str) -> Option<&PathTemplate> {
        self.templates.iter().find(|t| t.item_type == item_type)
    }

    /// Check the rules for problems that would make keywords silently inert.
    ///
    /// Returns every issue found, in rule order. An empty vector means every
    /// rule will take part in a rewrite pass. Duplicate detection is
    /// case-insensitive because matching is.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for (index, rule) in self.rules.iter().enumerate() {
            if rule.keyword.is_empty() {
                issues.push(ConfigIssue::EmptyKeyword { index });
                continue;
            }

            if !seen.insert(rule.keyword.to_lowercase()) {
                issues.push(ConfigIssue::DuplicateKeyword {
                    keyword: rule.keyword.clone(),
                });
            }

            if rule.item_type.is_empty() {
                issues.push(ConfigIssue::EmptyItemType {
                    keyword: rule.keyword.clone(),
                });
            } else if self.template_for(&rule.item_type).is_none() {
                issues.push(ConfigIssue::MissingTemplate {
                    keyword: rule.keyword.clone(),
                    item_type: rule.item_type.clone(),
                });
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // === defaults ===

    #[test]
    fn default_configuration_is_valid() {
        let config = Configuration::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.auto_replace_enabled);
        assert!(!config.skip_code);
        assert_eq!(config.rules.len(), 10);
        assert_eq!(config.templates.len(), 5);
        assert_eq!(config.validate(), Vec::<ConfigIssue>::new());
    }

    #[test]
    fn longer_keyword_precedes_its_suffix_in_defaults() {
        let config = Configuration::default();
        let major = config.rules.iter().position(|r| r.keyword == "Major Incident #");
        let plain = config.rules.iter().position(|r| r.keyword == "Incident #");
        assert!(major < plain);
    }

    #[test]
    fn template_for_returns_first_match() {
        let mut config = Configuration::default();
        config.templates.push(PathTemplate::new("Ticket", "/Other?ID="));
        let template = config.template_for("Ticket").unwrap();
        assert_eq!(template.path, "/TDNext/Apps/Tickets/TicketDet?TicketID=");
        assert!(config.template_for("Nope").is_none());
    }

    // === loading ===

    #[test]
    fn loads_plugin_data_json() {
        let json = r#"{
            "teamdynamixBaseUrl": "https://tdx.example.com",
            "enableAutomaticReplacement": false,
            "keywordToItemType": [{ "keyword": "Ticket #", "itemType": "Ticket" }],
            "typeToPath": [{ "itemType": "Ticket", "path": "/TicketDet?TicketID=" }]
        }"#;
        let config = Configuration::from_json_str(json).unwrap();
        assert_eq!(config.base_url, "https://tdx.example.com");
        assert!(!config.auto_replace_enabled);
        assert_eq!(config.rules, vec![KeywordRule::new("Ticket #", "Ticket")]);
        assert_eq!(
            config.templates,
            vec![PathTemplate::new("Ticket", "/TicketDet?TicketID=")]
        );
    }

    #[test]
    fn loads_toml_with_missing_fields_defaulted() {
        let source = r#"
base_url = "https://tdx.example.com"

[[rules]]
keyword = "Ticket #"
item_type = "Ticket"
"#;
        let config = Configuration::from_toml_str(source).unwrap();
        assert_eq!(config.base_url, "https://tdx.example.com");
        assert!(config.auto_replace_enabled);
        assert_eq!(config.rules.len(), 1);
        // templates were not given, so the defaults remain
        assert_eq!(config.templates, Configuration::default().templates);
    }

    #[test]
    fn toml_round_trips_default_configuration() {
        let config = Configuration::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(Configuration::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = Configuration::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, RewriteError::Json(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = Configuration::from_toml_str("rules = 3").unwrap_err();
        assert!(matches!(err, RewriteError::Toml(_)));
    }

    // === validate ===

    #[test]
    fn reports_empty_keyword() {
        let mut config = Configuration::default();
        config.rules.push(KeywordRule::new("", "Ticket"));
        assert_eq!(config.validate(), vec![ConfigIssue::EmptyKeyword { index: 10 }]);
    }

    #[test]
    fn reports_missing_template() {
        let mut config = Configuration::default();
        config.rules.push(KeywordRule::new("Bug #", "Bug"));
        assert_eq!(
            config.validate(),
            vec![ConfigIssue::MissingTemplate {
                keyword: "Bug #".into(),
                item_type: "Bug".into(),
            }]
        );
    }

    #[test]
    fn reports_empty_item_type() {
        let mut config = Configuration::default();
        config.rules.push(KeywordRule::new("Bug #", ""));
        assert_eq!(
            config.validate(),
            vec![ConfigIssue::EmptyItemType { keyword: "Bug #".into() }]
        );
    }

    #[test]
    fn reports_case_insensitive_duplicates() {
        let mut config = Configuration::default();
        config.rules.push(KeywordRule::new("asset #", "Asset"));
        assert_eq!(
            config.validate(),
            vec![ConfigIssue::DuplicateKeyword { keyword: "asset #".into() }]
        );
    }
}
