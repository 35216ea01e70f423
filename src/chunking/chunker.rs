//! Overlapping, structure-aware chunk iteration.

use std::ops::Range;
use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;

use crate::chunking::ChunkerConfig;
use crate::chunking::sections::{
    Section, ceil_char_boundary, detect_sections, detect_table_blocks, floor_char_boundary,
};
use crate::filing::{Chunk, FilingRecord};

/// Splits filing text into [`Chunk`]s.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a new chunker.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Get the chunker configuration.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Lazily chunk `text`, the decoded contents of `filing`.
    ///
    /// Section and table detection run once up front; chunks are produced on
    /// demand. The iterator is `Clone`, and [`ChunkIter::restart`] rewinds it.
    pub fn chunks<'a>(&self, text: &'a str, filing: &FilingRecord) -> ChunkIter<'a> {
        let sections: Vec<Section> = detect_sections(text, filing.sections.as_deref())
            .into_iter()
            .filter(|s| text[s.range.clone()].trim().len() >= self.config.min_section_chars)
            .collect();

        let budget = self.config.target_chars();
        let protected: Vec<Range<usize>> =
            detect_table_blocks(text, self.config.min_table_rows)
                .into_iter()
                .map(|t| t.range)
                .filter(|r| r.len() <= budget)
                .collect();

        ChunkIter {
            text,
            template: ChunkTemplate {
                company_id: filing.company_id,
                source_path: Arc::from(filing.source_path.as_str()),
                filing_type: Arc::from(filing.filing_type.as_str()),
                filing_date: filing.filing_date,
            },
            section_names: sections
                .iter()
                .map(|s| s.name.as_deref().map(Arc::from))
                .collect(),
            sections,
            protected,
            budget,
            overlap: self.config.overlap_chars(),
            section_idx: 0,
            pos: None,
        }
    }
}

#[derive(Debug, Clone)]
struct ChunkTemplate {
    company_id: u64,
    source_path: Arc<str>,
    filing_type: Arc<str>,
    filing_date: chrono::NaiveDate,
}

/// Lazy, finite, restartable sequence of chunks for one filing.
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    text: &'a str,
    template: ChunkTemplate,
    sections: Vec<Section>,
    section_names: Vec<Option<Arc<str>>>,
    protected: Vec<Range<usize>>,
    budget: usize,
    overlap: usize,
    section_idx: usize,
    pos: Option<usize>,
}

impl<'a> ChunkIter<'a> {
    /// Rewind to the first chunk.
    pub fn restart(&mut self) {
        self.section_idx = 0;
        self.pos = None;
    }

    /// Text of a chunk produced by this iterator.
    pub fn text_of(&self, chunk: &Chunk) -> &'a str {
        &self.text[chunk.start_offset as usize..chunk.end_offset as usize]
    }

    /// Choose where a chunk starting at `pos` ends within a section ending at
    /// `limit`.
    fn split_point(&self, pos: usize, limit: usize) -> usize {
        if limit - pos <= self.budget {
            return limit;
        }
        let hard = floor_char_boundary(self.text, pos + self.budget);
        let soft = ceil_char_boundary(self.text, pos + self.budget / 2).min(hard);
        let window = &self.text[soft..hard];

        let mut end = if let Some(idx) = window.rfind("\n\n") {
            soft + idx + 2
        } else {
            window
                .split_sentence_bound_indices()
                .map(|(idx, _)| idx)
                .filter(|idx| *idx > 0)
                .last()
                .map(|idx| soft + idx)
                .unwrap_or(hard)
        };
        if end <= pos {
            end = hard.max(ceil_char_boundary(self.text, pos + 1));
        }

        if let Some(table) = self
            .protected
            .iter()
            .find(|t| t.start < end && end < t.end)
        {
            end = if table.start > pos {
                table.start
            } else {
                table.end.min(limit)
            };
        }
        end
    }

    /// Where the chunk after `[pos, end)` starts.
    fn next_start(&self, pos: usize, end: usize) -> usize {
        if self.protected.iter().any(|t| t.start == end) {
            return end;
        }
        let mut next = ceil_char_boundary(self.text, end.saturating_sub(self.overlap));
        // Do not re-enter a table that the previous chunk already holds.
        if let Some(table) = self
            .protected
            .iter()
            .find(|t| t.start < next && next < t.end && t.end <= end)
        {
            next = table.end;
        }
        if next <= pos { end } else { next }
    }

    fn make_chunk(&self, range: Range<usize>) -> Option<Chunk> {
        let slice = &self.text[range.clone()];
        let lead = slice.len() - slice.trim_start().len();
        let trail = slice.len() - slice.trim_end().len();
        if lead + trail >= slice.len() {
            return None;
        }
        Some(Chunk {
            company_id: self.template.company_id,
            source_path: Arc::clone(&self.template.source_path),
            start_offset: (range.start + lead) as u64,
            end_offset: (range.end - trail) as u64,
            filing_type: Arc::clone(&self.template.filing_type),
            filing_date: self.template.filing_date,
            section_hint: self.section_names[self.section_idx].clone(),
        })
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        loop {
            let section = self.sections.get(self.section_idx)?;
            let limit = section.range.end;
            let pos = self.pos.unwrap_or(section.range.start);

            if pos >= limit {
                self.section_idx += 1;
                self.pos = None;
                continue;
            }

            let end = self.split_point(pos, limit);
            let chunk = self.make_chunk(pos..end);
            self.pos = Some(if end >= limit {
                limit
            } else {
                self.next_start(pos, end)
            });

            if chunk.is_some() {
                return chunk;
            }
        }
    }
}
