use crate::error::RagError;
use crate::extractor::PageText;
use crate::models::{DocumentChunk, DocumentFingerprint, IngestionOptions};
use regex::Regex;
use uuid::Uuid;

pub const PARAGRAPH_BREAK: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, RagError> {
        if chunk_size == 0 {
            return Err(RagError::InvalidChunkConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::InvalidChunkConfig(format!(
                "chunk overlap {chunk_overlap} must be smaller than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

impl TryFrom<&IngestionOptions> for ChunkingConfig {
    type Error = RagError;

    fn try_from(value: &IngestionOptions) -> Result<Self, Self::Error> {
        Self::new(value.chunk_size, value.chunk_overlap)
    }
}

/// A slice of the joined document text. `start`/`end` are char offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    pub text: String,
    pub page: Option<u32>,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Sentence,
    Word,
}

/// Splits page-tagged text into overlapping segments, preferring paragraph,
/// then sentence, then word boundaries.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    horizontal_space: Regex,
    line_edges: Regex,
    blank_lines: Regex,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, RagError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|error| {
                RagError::Configuration(format!("text normalisation pattern: {error}"))
            })
        };

        Ok(Self {
            config,
            horizontal_space: compile(r"[ \t\x0B\x0C\u{a0}]+")?,
            line_edges: compile(r" ?\n ?")?,
            blank_lines: compile(r"\n{3,}")?,
        })
    }

    /// Collapses horizontal whitespace, unifies line endings and keeps at most one blank line.
    pub fn normalize(&self, text: &str) -> String {
        let unified = text.replace("\r\n", "\n").replace('\r', "\n");
        let collapsed = self.horizontal_space.replace_all(&unified, " ");
        let trimmed_lines = self.line_edges.replace_all(&collapsed, "\n");
        self.blank_lines
            .replace_all(&trimmed_lines, PARAGRAPH_BREAK)
            .trim()
            .to_string()
    }

    pub fn split_pages(&self, pages: &[PageText]) -> Vec<TextSegment> {
        let mut text: Vec<char> = Vec::new();
        let mut page_starts: Vec<(usize, Option<u32>)> = Vec::new();

        for page in pages {
            let normalized = self.normalize(&page.text);
            if normalized.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.extend(PARAGRAPH_BREAK.chars());
            }
            page_starts.push((text.len(), page.number));
            text.extend(normalized.chars());
        }

        split_boundaries(&text, self.config)
            .into_iter()
            .filter_map(|(start, end)| {
                let slice: String = text[start..end].iter().collect();
                if slice.trim().is_empty() {
                    return None;
                }
                Some(TextSegment {
                    text: slice,
                    page: page_at(&page_starts, start),
                    start,
                    end,
                })
            })
            .collect()
    }
}

/// Page of the block a segment starts in.
fn page_at(page_starts: &[(usize, Option<u32>)], offset: usize) -> Option<u32> {
    page_starts
        .iter()
        .rev()
        .find(|(start, _)| *start <= offset)
        .and_then(|(_, page)| *page)
}

/// Computes `[start, end)` char spans. Every span is at most `chunk_size` long and
/// each span starts exactly `chunk_overlap` chars before the previous one ends.
pub fn split_boundaries(text: &[char], config: ChunkingConfig) -> Vec<(usize, usize)> {
    let total = text.len();
    let mut spans = Vec::new();
    if total == 0 {
        return spans;
    }

    let mut start = 0;
    loop {
        if total - start <= config.chunk_size {
            spans.push((start, total));
            break;
        }

        let window_end = start + config.chunk_size;
        // never snap so early that the next span would not advance
        let earliest = start + (config.chunk_size / 2).max(config.chunk_overlap + 1);
        let end = snap_to_boundary(text, earliest, window_end);

        spans.push((start, end));
        start = end - config.chunk_overlap;
    }

    spans
}

fn snap_to_boundary(text: &[char], earliest: usize, window_end: usize) -> usize {
    for level in [Boundary::Paragraph, Boundary::Sentence, Boundary::Word] {
        if let Some(end) = (earliest..=window_end)
            .rev()
            .find(|end| is_boundary(text, *end, level))
        {
            return end;
        }
    }
    window_end
}

fn is_boundary(text: &[char], end: usize, level: Boundary) -> bool {
    let before = text[end - 1];
    let after = text.get(end).copied();
    let is_terminal = |c: char| matches!(c, '.' | '!' | '?');

    match level {
        Boundary::Paragraph => end >= 2 && before == '\n' && text[end - 2] == '\n',
        Boundary::Sentence => {
            (before.is_whitespace() && end >= 2 && is_terminal(text[end - 2]))
                || (is_terminal(before) && after.is_some_and(char::is_whitespace))
        }
        Boundary::Word => before.is_whitespace() || after.is_some_and(char::is_whitespace),
    }
}

/// Stamps segments with fresh chunk ids and the document's metadata.
pub fn build_chunks(document: &DocumentFingerprint, segments: Vec<TextSegment>) -> Vec<DocumentChunk> {
    segments
        .into_iter()
        .enumerate()
        .map(|(index, segment)| DocumentChunk {
            chunk_id: Uuid::new_v4().to_string(),
            document_id: document.document_id.clone(),
            file_name: document.file_name.clone(),
            page: segment.page,
            chunk_index: index as u64,
            text: segment.text,
            uploaded_at: document.ingested_at,
            checksum: document.checksum.clone(),
        })
        .collect()
}
