use crate::error::{ConfigIssue, RewriteError};
use crate::settings::{Configuration, KeywordRule};
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::ops::Range;
use std::sync::LazyLock;

// Fixed patterns compiled once and reused across passes.
static MARKDOWN_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[^\]\n]*\]\([^)\n]*\)").unwrap()
});

static WIKILINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[[^\]\n]*\]\]").unwrap()
});

static REFERENCE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[^\]\n]*\]\[[^\]\n]*\]").unwrap()
});

static FENCED_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[^\n]*\n.*?```|~~~[^\n]*\n.*?~~~").unwrap()
});

static INLINE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"`[^`\n]*`").unwrap()
});

/// Upper bound on the compiled size of one item type's pattern.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Rules sharing one item type, in configuration order.
#[derive(Debug, PartialEq, Eq)]
pub struct ItemTypeGroup<'c> {
    pub item_type: &'c str,
    pub rules: Vec<&'c KeywordRule>,
}

impl ItemTypeGroup<'_> {
    /// Non-empty keywords of this group, in rule order.
    pub fn keywords(&self) -> Vec<&str> {
        self.rules
            .iter()
            .map(|r| r.keyword.as_str())
            .filter(|k| !k.is_empty())
            .collect()
    }
}

/// Group rules by item type.
///
/// Groups appear in the order their item type is first seen, and each group
/// keeps the relative order of its rules. Returned as a `Vec` so that order is
/// part of the type rather than a property of some map implementation.
pub fn group_rules_by_item_type(rules: &[KeywordRule]) -> Vec<ItemTypeGroup<'_>> {
    let mut groups: Vec<ItemTypeGroup<'_>> = Vec::new();
    for rule in rules {
        match groups.iter_mut().find(|g| g.item_type == rule.item_type) {
            Some(group) => group.rules.push(rule),
            None => groups.push(ItemTypeGroup {
                item_type: &rule.item_type,
                rules: vec![rule],
            }),
        }
    }
    groups
}

/// One keyword+ID occurrence found by a [`MatchPattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordMatch<'t> {
    /// Byte offset of the keyword.
    pub start: usize,
    /// Byte offset just past the last digit.
    pub end: usize,
    /// Keyword as written in the document (casing preserved).
    pub keyword: &'t str,
    pub id: &'t str,
}

/// Compiled keyword alternation for one item type.
///
/// `regex` has no lookaround, so the two context rules are checked on each
/// candidate instead:
/// - the keyword must not directly follow `[`;
/// - the digits must not directly precede `]`.
///
/// A rejected candidate restarts the search one character past its start,
/// so a later candidate overlapping it is still found.
#[derive(Debug, Clone)]
pub struct MatchPattern {
    regex: Regex,
}

impl MatchPattern {
    /// All accepted occurrences, left to right, non-overlapping.
    ///
    /// Candidates starting inside one of the `excluded` byte ranges are
    /// rejected like any other context failure.
    pub fn matches<'t>(&self, text: &'t str, excluded: &[(usize, usize)]) -> Vec<KeywordMatch<'t>> {
        let mut found = Vec::new();
        let mut at = 0;

        while at <= text.len() {
            let Some(caps) = self.regex.captures_at(text, at) else {
                break;
            };
            let (Some(whole), Some(keyword), Some(id)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                break;
            };

            let rejected = text[..whole.start()].ends_with('[')
                || text[whole.end()..].starts_with(']')
                || is_excluded(whole.start(), excluded);

            if rejected {
                at = whole.start()
                    + text[whole.start()..]
                        .chars()
                        .next()
                        .map_or(1, char::len_utf8);
                continue;
            }

            found.push(KeywordMatch {
                start: whole.start(),
                end: whole.end(),
                keyword: keyword.as_str(),
                id: id.as_str(),
            });
            at = whole.end();
        }

        found
    }
}

/// Build the case-insensitive pattern `(kw1|kw2|...)([0-9]+)`.
///
/// Keywords are escaped and matched literally; the alternation keeps the
/// given order, so when one keyword is a prefix of another the earlier one
/// wins at a given offset. Empty keywords are skipped. An input with no
/// usable keyword is rejected because the resulting pattern would match any
/// bare number.
pub fn build_match_pattern<S: AsRef<str>>(keywords: &[S]) -> Result<MatchPattern, RewriteError> {
    let escaped: Vec<String> = keywords
        .iter()
        .map(AsRef::as_ref)
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();

    if escaped.is_empty() {
        return Err(ConfigIssue::NoKeywords.into());
    }

    let pattern = format!("({})([0-9]+)", escaped.join("|"));
    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .multi_line(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .map_err(|source| RewriteError::PatternCompilation {
            keywords: escaped.len(),
            source,
        })?;

    Ok(MatchPattern { regex })
}

/// Replace `start..end` bytes of the original text with `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Replacement {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The same span in UTF-16 code units, for hosts that address text that way.
    pub fn utf16_range(&self, original: &str) -> Range<usize> {
        let start = original[..self.start].encode_utf16().count();
        let len = original[self.start..self.end].encode_utf16().count();
        start..start + len
    }
}

/// An item type whose matching was abandoned during a pass.
#[derive(Debug)]
pub struct GroupFailure {
    pub item_type: String,
    pub error: RewriteError,
}

/// Result of one scan: replacements for every group that could be matched,
/// plus the groups that failed.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Sorted by descending `start`, ready for sequential application.
    pub replacements: Vec<Replacement>,
    pub failures: Vec<GroupFailure>,
}

/// Scan `text` and plan every keyword-to-link replacement.
///
/// Groups without a path template and groups with only empty keywords are
/// skipped silently. A group whose pattern cannot be compiled is reported in
/// [`ScanReport::failures`] and does not stop the other groups.
///
/// If two groups match overlapping spans, the earlier start wins and ties go
/// to the longer match.
pub fn scan(text: &str, config: &Configuration) -> ScanReport {
    let excluded = build_excluded_ranges(text, config.skip_code);
    let mut report = ScanReport::default();

    for group in group_rules_by_item_type(&config.rules) {
        let Some(template) = config.template_for(group.item_type) else {
            tracing::debug!("No path template for item type {:?}, skipping", group.item_type);
            continue;
        };

        let keywords = group.keywords();
        if keywords.is_empty() {
            continue;
        }

        let pattern = match build_match_pattern(&keywords) {
            Ok(pattern) => pattern,
            Err(error) => {
                report.failures.push(GroupFailure {
                    item_type: group.item_type.to_string(),
                    error,
                });
                continue;
            }
        };

        for m in pattern.matches(text, &excluded) {
            report.replacements.push(Replacement {
                start: m.start,
                end: m.end,
                text: format!(
                    "[{}{}]({}{}{})",
                    m.keyword, m.id, config.base_url, template.path, m.id
                ),
            });
        }
    }

    report.replacements = drop_overlapping(report.replacements);
    report
}

/// [`scan`], logging and discarding group failures.
pub fn find_replacements(text: &str, config: &Configuration) -> Vec<Replacement> {
    let report = scan(text, config);
    for failure in &report.failures {
        tracing::warn!(
            "Skipping item type {:?}: {}",
            failure.item_type,
            failure.error
        );
    }
    report.replacements
}

/// Splice `replacements` into `text`, highest offset first.
///
/// Offsets are taken against the untouched `text`. Entries that are out of
/// bounds, split a UTF-8 sequence, or overlap an entry already applied are
/// skipped with a warning. With nothing to apply the input is returned
/// borrowed.
pub fn apply_replacements<'a>(text: &'a str, replacements: &[Replacement]) -> Cow<'a, str> {
    splice_replacements(text, replacements).0
}

/// [`apply_replacements`], also returning how many entries were spliced in.
pub fn splice_replacements<'a>(
    text: &'a str,
    replacements: &[Replacement],
) -> (Cow<'a, str>, usize) {
    if replacements.is_empty() {
        return (Cow::Borrowed(text), 0);
    }

    let mut ordered: Vec<&Replacement> = replacements.iter().collect();
    ordered.sort_by(|a, b| b.start.cmp(&a.start).then(b.end.cmp(&a.end)));

    let mut out = text.to_string();
    let mut floor = text.len();
    let mut applied = 0;

    for r in ordered {
        let valid = r.start <= r.end
            && r.end <= floor
            && text.is_char_boundary(r.start)
            && text.is_char_boundary(r.end);
        if !valid {
            tracing::warn!("Ignoring replacement at {:?}: out of bounds or overlapping", r.range());
            continue;
        }
        out.replace_range(r.range(), &r.text);
        floor = r.start;
        applied += 1;
    }

    if applied == 0 {
        return (Cow::Borrowed(text), 0);
    }
    (Cow::Owned(out), applied)
}

/// One full rewrite pass: `apply_replacements(text, find_replacements(text, config))`.
pub fn rewrite<'a>(text: &'a str, config: &Configuration) -> Cow<'a, str> {
    let replacements = find_replacements(text, config);
    apply_replacements(text, &replacements)
}

/// Keep a non-overlapping subset and return it sorted by descending start.
fn drop_overlapping(mut replacements: Vec<Replacement>) -> Vec<Replacement> {
    replacements.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut kept: Vec<Replacement> = Vec::with_capacity(replacements.len());
    for r in replacements {
        if kept.last().is_some_and(|prev| r.start < prev.end) {
            tracing::debug!("Dropping overlapping replacement at {:?}", r.range());
            continue;
        }
        kept.push(r);
    }

    kept.reverse();
    kept
}

/// Byte ranges where keywords must not be linked: existing inline,
/// reference and wiki links, plus code when `skip_code` is set.
fn build_excluded_ranges(text: &str, skip_code: bool) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    for re in [&*MARKDOWN_LINK_RE, &*REFERENCE_LINK_RE, &*WIKILINK_RE] {
        for m in re.find_iter(text) {
            ranges.push((m.start(), m.end()));
        }
    }
    if skip_code {
        for m in FENCED_CODE_RE.find_iter(text) {
            ranges.push((m.start(), m.end()));
        }
        for m in INLINE_CODE_RE.find_iter(text) {
            ranges.push((m.start(), m.end()));
        }
    }
    ranges
}

fn is_excluded(offset: usize, excluded: &[(usize, usize)]) -> bool {
    excluded.iter().any(|&(start, end)| offset >= start && offset < end)
}
