use std::fmt;

use serde::{Deserialize, Serialize};

/// Content-addressed document ID (blake3 hex hash of the filing text).
pub type DocId = String;

/// Reporting period key used to select one filing among an entity's history.
pub type FiscalYear = i32;

/// Immutable filing text for one entity and fiscal year.
#[derive(Debug, Clone)]
pub struct Document {
    pub entity: String,
    pub fiscal_year: FiscalYear,
    pub id: DocId,
    text: String,
}

impl Document {
    pub fn new(entity: impl Into<String>, fiscal_year: FiscalYear, text: impl Into<String>) -> Self {
        let text = text.into();
        let id = blake3::hash(text.as_bytes()).to_hex().to_string();
        Self {
            entity: entity.into(),
            fiscal_year,
            id,
            text,
        }
    }

    /// Build a document from raw filing HTML.
    pub fn from_html(entity: impl Into<String>, fiscal_year: FiscalYear, html: &str) -> Self {
        Self::new(entity, fiscal_year, super::html_to_text(html))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Recognised disclosure categories within an annual filing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Business,
    RiskFactors,
    Cybersecurity,
    Competition,
    Mdna,
}

impl SectionKind {
    /// Heading level: 1 for `Item` headings, 2 for subsections inside an item.
    pub fn level(self) -> u8 {
        match self {
            SectionKind::Competition => 2,
            _ => 1,
        }
    }

    /// The item a subsection must sit inside.
    pub fn parent(self) -> Option<SectionKind> {
        match self {
            SectionKind::Competition => Some(SectionKind::Business),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKind::Business => "business",
            SectionKind::RiskFactors => "risk_factors",
            SectionKind::Cybersecurity => "cybersecurity",
            SectionKind::Competition => "competition",
            SectionKind::Mdna => "mdna",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A located section: byte offsets into the document text, always on char
/// boundaries, `start < end <= document.len()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SectionSpan {
    pub kind: SectionKind,
    pub start: usize,
    pub end: usize,
    pub char_len: usize,
}

impl SectionSpan {
    pub fn text<'a>(&self, document: &'a str) -> &'a str {
        &document[self.start..self.end]
    }
}

/// A section whose span is short enough that segmentation probably went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentationWarning {
    pub kind: SectionKind,
    pub char_len: usize,
}

/// Zero or one span per section kind, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SectionMap {
    spans: Vec<SectionSpan>,
    document_len: usize,
}

impl SectionMap {
    pub(crate) fn from_spans(mut spans: Vec<SectionSpan>, document_len: usize) -> Self {
        spans.sort_by_key(|s| s.start);
        Self {
            spans,
            document_len,
        }
    }

    pub fn get(&self, kind: SectionKind) -> Option<&SectionSpan> {
        self.spans.iter().find(|s| s.kind == kind)
    }

    pub fn contains(&self, kind: SectionKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectionSpan> {
        self.spans.iter()
    }

    pub fn kinds(&self) -> Vec<SectionKind> {
        self.spans.iter().map(|s| s.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn document_len(&self) -> usize {
        self.document_len
    }

    /// Spans shorter than `min_chars`.
    pub fn suspicious(&self, min_chars: usize) -> Vec<SegmentationWarning> {
        self.spans
            .iter()
            .filter(|s| s.char_len < min_chars)
            .map(|s| SegmentationWarning {
                kind: s.kind,
                char_len: s.char_len,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_is_content_addressed() {
        let a = Document::new("NVDA", 2023, "same text");
        let b = Document::new("AMD", 2021, "same text");
        let c = Document::new("NVDA", 2023, "other text");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 64);
    }

    #[test]
    fn test_section_map_keeps_document_order() {
        let spans = vec![
            SectionSpan {
                kind: SectionKind::RiskFactors,
                start: 50,
                end: 90,
                char_len: 40,
            },
            SectionSpan {
                kind: SectionKind::Business,
                start: 0,
                end: 50,
                char_len: 50,
            },
        ];
        let map = SectionMap::from_spans(spans, 90);
        assert_eq!(
            map.kinds(),
            vec![SectionKind::Business, SectionKind::RiskFactors]
        );
        assert!(map.get(SectionKind::Cybersecurity).is_none());
        assert_eq!(map.suspicious(45).len(), 1);
    }
}
