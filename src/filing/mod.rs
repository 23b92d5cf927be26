pub mod fetch;
pub mod segment;
pub mod types;

use std::sync::LazyLock;

use regex::Regex;

/// Render width for html2text. Wide enough that headings never wrap.
const RENDER_WIDTH: usize = 400;

static STYLE_OR_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(style|script)[^>]*>.*?</(style|script)>").expect("valid regex")
});
static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:p|div|br|tr|h[1-6])[^>]*>").expect("valid regex")
});
static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#x?[0-9a-fA-F]+;").expect("valid regex"));
static HORIZONTAL_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid regex"));
static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Convert filing HTML into plain text suitable for segmentation.
pub fn html_to_text(html: &str) -> String {
    let cleaned = STYLE_OR_SCRIPT.replace_all(html, "");
    let text = html2text::from_read(cleaned.as_bytes(), RENDER_WIDTH)
        .map(|text| flatten_table_borders(&text))
        .unwrap_or_else(|_| strip_tags(&cleaned));
    normalize_whitespace(&text)
}

/// html2text draws tables with box-drawing characters, and filings lay
/// headings out as adjacent cells (`Item 1A.│Risk Factors`). Turn cell
/// separators into spaces and drop the horizontal rules between rows.
fn flatten_table_borders(text: &str) -> String {
    text.lines()
        .filter(|line| !is_table_rule(line))
        .map(|line| line.replace(is_box_drawing, " "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_box_drawing(c: char) -> bool {
    ('\u{2500}'..='\u{257f}').contains(&c)
}

fn is_table_rule(line: &str) -> bool {
    line.chars().any(is_box_drawing)
        && line.chars().all(|c| is_box_drawing(c) || c.is_whitespace())
}

/// Tag stripper used when html2text cannot make sense of the markup.
fn strip_tags(html: &str) -> String {
    let text = BLOCK_TAG.replace_all(html, "\n");
    let text = ANY_TAG.replace_all(&text, " ");
    let text = text.replace("&nbsp;", " ").replace("&amp;", "&");
    NUMERIC_ENTITY.replace_all(&text, " ").into_owned()
}

/// Collapse horizontal whitespace, trim every line and squeeze blank runs.
pub fn normalize_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let lines: Vec<String> = text
        .lines()
        .map(|line| HORIZONTAL_WS.replace_all(line, " ").trim().to_string())
        .collect();
    BLANK_RUN
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}
