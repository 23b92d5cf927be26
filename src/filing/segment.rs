//! Section segmentation for annual filings.
//!
//! Scans line-anchored heading patterns in document order. Each recognised
//! section runs from its heading to the next heading of equal or higher
//! level (or document end). Everything else is dropped.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::types::{SectionKind, SectionMap, SectionSpan};

/// Default minimum body length for a heading to count as a real section.
/// Table-of-contents entries fall below it.
pub const DEFAULT_MIN_BODY_CHARS: usize = 200;

/// Lines longer than this are prose, not headings.
const MAX_HEADING_LINE_CHARS: usize = 160;

struct HeadingRule {
    pattern: Regex,
    level: u8,
    kind: Option<SectionKind>,
}

impl HeadingRule {
    fn new(pattern: &str, level: u8, kind: Option<SectionKind>) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("valid heading pattern"),
            level,
            kind,
        }
    }

    fn section(pattern: &str, kind: SectionKind) -> Self {
        Self::new(pattern, kind.level(), Some(kind))
    }

    fn boundary(pattern: &str, level: u8) -> Self {
        Self::new(pattern, level, None)
    }
}

// Order matters: the first rule that matches a line wins, so specific item
// headings come before the generic item boundary.
static RULES: LazyLock<Vec<HeadingRule>> = LazyLock::new(|| {
    const SEP: &str = r"\s*[\.:\-\u{2013}\u{2014}]?\s*";
    vec![
        HeadingRule::section(&format!(r"(?i)^item\s*1{SEP}business\b"), SectionKind::Business),
        HeadingRule::section(
            &format!(r"(?i)^item\s*1a{SEP}risk\s+factors\b"),
            SectionKind::RiskFactors,
        ),
        HeadingRule::section(
            &format!(r"(?i)^item\s*1c{SEP}cybersecurity\b"),
            SectionKind::Cybersecurity,
        ),
        HeadingRule::section(
            &format!(r"(?i)^item\s*7{SEP}management[\u{{2019}}']?s\s+discussion\b"),
            SectionKind::Mdna,
        ),
        HeadingRule::boundary(r"(?i)^item\s*\d{1,2}[a-d]?(\s*[\.:\-\u{2013}\u{2014}]|\s|$)", 1),
        HeadingRule::boundary(r"(?i)^part\s+(i{1,3}|iv)\b", 1),
        HeadingRule::section(r"(?i)^competition[\.:]?$", SectionKind::Competition),
        HeadingRule::boundary(
            r"(?i)^(patents(\s+and\s+proprietary\s+rights)?|intellectual\s+property(\s+rights)?|proprietary\s+rights|human\s+capital(\s+management)?|employees|government\s+regulations?|environmental\s+matters|available\s+information|information\s+about\s+our\s+executive\s+officers|sales\s+and\s+marketing|research\s+and\s+development|manufacturing|seasonality|backlog)[\.:]?$",
            2,
        ),
    ]
});

#[derive(Debug, Clone, Copy)]
struct Heading {
    start: usize,
    body_start: usize,
    level: u8,
    kind: Option<SectionKind>,
}

/// Splits filing text into named sections.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    min_body_chars: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BODY_CHARS)
    }
}

impl Segmenter {
    pub fn new(min_body_chars: usize) -> Self {
        Self { min_body_chars }
    }

    /// Segment a document. Never fails; missing sections are simply absent
    /// from the returned map.
    pub fn segment(&self, text: &str) -> SectionMap {
        let headings = scan_headings(text);
        let mut taken: HashSet<SectionKind> = HashSet::new();
        // End of the last accepted section, per heading level.
        let mut cursor = [0usize; 3];
        let mut spans: Vec<SectionSpan> = Vec::new();

        for (i, heading) in headings.iter().enumerate() {
            let Some(kind) = heading.kind else {
                continue;
            };
            let level = heading.level as usize;
            if taken.contains(&kind) || heading.start < cursor[level] {
                continue;
            }
            if let Some(parent) = kind.parent() {
                let inside = spans
                    .iter()
                    .any(|s| s.kind == parent && s.start <= heading.start && heading.start < s.end);
                if !inside {
                    debug!(
                        section = %kind,
                        parent = %parent,
                        offset = heading.start,
                        "Subsection heading outside its item, ignored"
                    );
                    continue;
                }
            }

            let end = headings[i + 1..]
                .iter()
                .find(|next| next.level <= heading.level)
                .map(|next| next.start)
                .unwrap_or(text.len());

            let body_chars = text[heading.body_start..end].trim().chars().count();
            if body_chars < self.min_body_chars {
                debug!(
                    section = %kind,
                    offset = heading.start,
                    body_chars,
                    "Heading rejected, body too short"
                );
                continue;
            }

            taken.insert(kind);
            cursor[level] = end;
            spans.push(SectionSpan {
                kind,
                start: heading.start,
                end,
                char_len: text[heading.start..end].chars().count(),
            });
        }

        SectionMap::from_spans(spans, text.len())
    }
}

/// Segment with default settings.
pub fn segment(text: &str) -> SectionMap {
    Segmenter::default().segment(text)
}

fn scan_headings(text: &str) -> Vec<Heading> {
    let mut headings = Vec::new();
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();

        let candidate = strip_decoration(line);
        if candidate.is_empty() || candidate.chars().count() > MAX_HEADING_LINE_CHARS {
            continue;
        }
        if let Some(rule) = RULES.iter().find(|r| r.pattern.is_match(candidate)) {
            headings.push(Heading {
                start,
                body_start: offset,
                level: rule.level,
                kind: rule.kind,
            });
        }
    }

    headings
}

/// Drop markdown-ish emphasis that html2text puts around bold headings.
fn strip_decoration(line: &str) -> &str {
    line.trim()
        .trim_start_matches(|c: char| matches!(c, '#' | '*' | '_' | '|' | '>') || c.is_whitespace())
        .trim_end_matches(|c: char| matches!(c, '*' | '_' | '|') || c.is_whitespace())
}
