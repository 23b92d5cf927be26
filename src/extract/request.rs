use tracing::debug;

use super::schema::{SchemaDescriptor, SchemaKind};
use crate::error::SkipReason;
use crate::filing::types::{DocId, Document, FiscalYear, SectionKind, SectionMap};

const SECTION_SEPARATOR: &str = "\n\n";

/// One extraction call's worth of input. Created per call, discarded after.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub descriptor: &'static SchemaDescriptor,
    pub entity: String,
    pub fiscal_year: FiscalYear,
    pub document_id: DocId,
    /// Concatenated section text, never longer than the descriptor's total budget.
    pub text: String,
    /// Sections that contributed text, in concatenation order.
    pub sections: Vec<SectionKind>,
    /// Optional sources that the filing did not have.
    pub missing_sections: Vec<SectionKind>,
}

impl ExtractionRequest {
    pub fn kind(&self) -> SchemaKind {
        self.descriptor.kind
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Compose the request for `kind` from a segmented document.
///
/// Each source section is cut to its budget keeping the prefix, then joined
/// in policy order. The separator is charged to the section it precedes, so
/// the total never exceeds the sum of the budgets.
pub fn build_request(
    kind: SchemaKind,
    document: &Document,
    sections: &SectionMap,
) -> Result<ExtractionRequest, SkipReason> {
    let descriptor = kind.descriptor();
    let text_source = document.text();

    let mut text = String::new();
    let mut used = Vec::new();
    let mut missing = Vec::new();

    for source in descriptor.sources {
        let Some(span) = sections.get(source.section) else {
            missing.push(source.section);
            continue;
        };

        let mut chunk = String::new();
        if !used.is_empty() {
            chunk.push_str(SECTION_SEPARATOR);
        }
        chunk.push_str(span.text(text_source).trim_end());
        text.push_str(truncate_chars(&chunk, source.budget));
        used.push(source.section);
    }

    if used.is_empty() {
        return Err(SkipReason::InsufficientMaterial { sections: missing });
    }
    if let Some(source) = descriptor
        .sources
        .iter()
        .find(|s| s.required && missing.contains(&s.section))
    {
        return Err(SkipReason::SectionUnavailable {
            section: source.section,
        });
    }

    debug!(
        schema = %kind,
        sections = ?used,
        missing = ?missing,
        chars = text.chars().count(),
        budget = descriptor.total_budget(),
        "Extraction request built"
    );

    Ok(ExtractionRequest {
        descriptor,
        entity: document.entity.clone(),
        fiscal_year: document.fiscal_year,
        document_id: document.id.clone(),
        text,
        sections: used,
        missing_sections: missing,
    })
}

/// Longest prefix of `text` with at most `max_chars` chars.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
