//! Section header and table block detection for SEC filings.

use std::ops::Range;

use lazy_static::lazy_static;
use regex::Regex;

use crate::filing::SectionBoundary;

lazy_static! {
    static ref SECTION_HEADER: Regex = Regex::new(
        r"(?im)^[ \t]*(BUSINESS|RISK FACTORS|MANAGEMENT['’]S DISCUSSION AND ANALYSIS|FINANCIAL STATEMENTS|CLINICAL TRIALS|PRODUCT PIPELINE|INTELLECTUAL PROPERTY|COMPETITION|REGULATORY|ITEM 1A|ITEM 7|PART II|PART I)\b"
    )
    .unwrap();
    static ref COLUMN_GAP: Regex = Regex::new(r"\S {2,}\S.* {2,}\S").unwrap();
    static ref CLINICAL_TERMS: Regex = Regex::new(
        r"(?i)placebo|endpoint|adverse|cohort|\bdose\b|dosing|\barm\b|enrolled|randomi[sz]ed|efficacy|response rate"
    )
    .unwrap();
    static ref FINANCIAL_TERMS: Regex = Regex::new(
        r"(?i)total assets|liabilities|revenue|net loss|net income|cash and cash equivalents|operating expenses|balance sheet|stockholders"
    )
    .unwrap();
}

/// Bytes of text before a table that are searched for a caption.
const CAPTION_WINDOW: usize = 200;

/// A section of filing text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Header name, or `None` for text before the first header.
    pub name: Option<String>,
    pub range: Range<usize>,
}

/// Kind of a protected table block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    ClinicalTrial,
    FinancialStatement,
}

/// A run of tabular lines that should not be split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBlock {
    pub kind: TableKind,
    pub range: Range<usize>,
}

/// Split `text` into sections.
///
/// Caller-supplied boundaries win over header detection. Without either, the
/// whole text is a single `FULL_DOCUMENT` section.
pub fn detect_sections(text: &str, known: Option<&[SectionBoundary]>) -> Vec<Section> {
    if let Some(known) = known.filter(|k| !k.is_empty()) {
        return known_sections(text, known);
    }

    let starts: Vec<(usize, String)> = SECTION_HEADER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().to_uppercase().replace('’', "'");
            Some((whole.start(), name))
        })
        .collect();

    if starts.is_empty() {
        return vec![Section {
            name: Some("FULL_DOCUMENT".to_string()),
            range: 0..text.len(),
        }];
    }

    let mut sections = Vec::with_capacity(starts.len() + 1);
    if starts[0].0 > 0 {
        sections.push(Section {
            name: None,
            range: 0..starts[0].0,
        });
    }
    for (i, (start, name)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map(|(s, _)| *s).unwrap_or(text.len());
        sections.push(Section {
            name: Some(name.clone()),
            range: *start..end,
        });
    }
    sections
}

fn known_sections(text: &str, known: &[SectionBoundary]) -> Vec<Section> {
    let mut sections: Vec<Section> = known
        .iter()
        .filter_map(|b| {
            let start = floor_char_boundary(text, b.start as usize);
            let end = floor_char_boundary(text, b.end as usize);
            (start < end).then(|| Section {
                name: Some(b.name.clone()),
                range: start..end,
            })
        })
        .collect();
    sections.sort_by_key(|s| (s.range.start, s.range.end));

    // Overlapping boundaries are clipped so every byte belongs to one section.
    let mut cursor = 0;
    sections.retain_mut(|s| {
        s.range.start = s.range.start.max(cursor);
        cursor = cursor.max(s.range.end);
        s.range.start < s.range.end
    });
    sections
}

/// Find clinical-trial and financial-statement tables.
///
/// A table is a run of at least `min_rows` consecutive lines that contain a
/// pipe or an inner tab, or three space-separated columns with a digit. Its
/// kind comes from the vocabulary of the table and the caption
/// above it; tables of neither kind are not reported.
pub fn detect_table_blocks(text: &str, min_rows: usize) -> Vec<TableBlock> {
    let mut blocks = Vec::new();
    let mut run_start: Option<usize> = None;
    let mut run_end = 0;
    let mut rows = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        if is_tabular(line) {
            if run_start.is_none() {
                run_start = Some(line_start);
                rows = 0;
            }
            rows += 1;
            run_end = offset;
        } else if let Some(start) = run_start.take() {
            push_block(text, start..run_end, rows, min_rows, &mut blocks);
        }
    }
    if let Some(start) = run_start {
        push_block(text, start..run_end, rows, min_rows, &mut blocks);
    }
    blocks
}

fn push_block(
    text: &str,
    range: Range<usize>,
    rows: usize,
    min_rows: usize,
    blocks: &mut Vec<TableBlock>,
) {
    if rows < min_rows {
        return;
    }
    let caption_start = floor_char_boundary(text, range.start.saturating_sub(CAPTION_WINDOW));
    let context = &text[caption_start..range.end];
    let kind = if CLINICAL_TERMS.is_match(context) {
        TableKind::ClinicalTrial
    } else if FINANCIAL_TERMS.is_match(context) {
        TableKind::FinancialStatement
    } else {
        return;
    };
    blocks.push(TableBlock { kind, range });
}

fn is_tabular(line: &str) -> bool {
    let line = line.trim_end();
    if line.is_empty() {
        return false;
    }
    if line.contains('|') || line.trim_start().contains('\t') {
        return true;
    }
    line.bytes().any(|b| b.is_ascii_digit()) && COLUMN_GAP.is_match(line)
}

/// Largest char boundary not greater than `index`.
pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary not less than `index`.
pub(crate) fn ceil_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_headers_and_preamble() {
        let text = "Cover page\nITEM 1A risk\nRISK FACTORS\nWe may fail.\nPART II\nOther.";
        let sections = detect_sections(text, None);
        let names: Vec<_> = sections.iter().map(|s| s.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                None,
                Some("ITEM 1A".to_string()),
                Some("RISK FACTORS".to_string()),
                Some("PART II".to_string()),
            ]
        );
        assert_eq!(sections[0].range, 0..11);
        assert_eq!(sections.last().unwrap().range.end, text.len());
    }

    #[test]
    fn test_header_matching_is_case_insensitive_and_normalizes_apostrophe() {
        let text = "management’s discussion and analysis\nbody";
        let sections = detect_sections(text, None);
        assert_eq!(
            sections[0].name.as_deref(),
            Some("MANAGEMENT'S DISCUSSION AND ANALYSIS")
        );
    }

    #[test]
    fn test_no_headers_is_full_document() {
        let sections = detect_sections("just some text", None);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].name.as_deref(), Some("FULL_DOCUMENT"));
    }

    #[test]
    fn test_known_boundaries_are_sorted_and_clipped() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let known = vec![
            SectionBoundary {
                name: "B".into(),
                start: 10,
                end: 26,
            },
            SectionBoundary {
                name: "A".into(),
                start: 0,
                end: 12,
            },
        ];
        let sections = detect_sections(text, Some(&known));
        assert_eq!(sections[0].range, 0..12);
        assert_eq!(sections[1].range, 12..26);
    }

    #[test]
    fn test_detects_clinical_table_with_caption() {
        let text = "Table 3. Primary endpoint results\n\
                    Arm       | N   | Response\n\
                    Drug      | 120 | 45%\n\
                    Placebo   | 118 | 12%\n\
                    \n\
                    Narrative follows.\n";
        let blocks = detect_table_blocks(text, 3);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, TableKind::ClinicalTrial);
        assert!(text[blocks[0].range.clone()].starts_with("Arm"));
    }

    #[test]
    fn test_ignores_short_or_unclassified_tables() {
        let text = "a | 1\nb | 2\n\nfoo  1  bar  2\nbaz  3  qux  4\nzap  5  zop  6\n";
        assert!(detect_table_blocks(text, 3).is_empty());
    }

    #[test]
    fn test_char_boundaries() {
        let text = "aé b";
        assert_eq!(floor_char_boundary(text, 2), 1);
        assert_eq!(ceil_char_boundary(text, 2), 3);
        assert_eq!(floor_char_boundary(text, 99), text.len());
    }
}
