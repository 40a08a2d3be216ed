#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extraction::PageText;

/// A bounded segment of document text, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Full chunk text, including the overlap prefix
    pub text: String,
    /// Position of this chunk within the document
    pub chunk_index: usize,
    /// Page the chunk body was taken from
    pub page_number: u32,
    /// Number of leading characters of `text` copied from the previous chunk
    pub overlap_len: usize,
}

impl TextChunk {
    /// The part of the chunk that is not repeated from its predecessor
    #[inline]
    pub fn body(&self) -> &str {
        self.text
            .char_indices()
            .nth(self.overlap_len)
            .and_then(|(offset, _)| self.text.get(offset..))
            .unwrap_or("")
    }

    #[inline]
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Configuration for document chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Hard ceiling on chunk length in characters, overlap included
    pub max_chunk_chars: usize,
    /// Characters carried over from the end of the previous chunk
    pub overlap_chars: usize,
    /// Whether to break oversized paragraphs at sentence boundaries first
    pub sentence_boundary_splitting: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_chunk_chars: 1000,
            overlap_chars: 100,
            sentence_boundary_splitting: true,
        }
    }
}

impl ChunkingConfig {
    /// Characters available for new text once room for the overlap prefix is reserved
    #[inline]
    pub fn body_budget(&self) -> usize {
        let reserved = if self.overlap_chars > 0 {
            self.overlap_chars + 1
        } else {
            0
        };
        self.max_chunk_chars.saturating_sub(reserved).max(1)
    }
}

/// How a segment attaches to the text before it when both land in one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Joiner {
    Paragraph,
    Space,
    None,
}

impl Joiner {
    const fn as_str(self) -> &'static str {
        match self {
            Joiner::Paragraph => "\n\n",
            Joiner::Space => " ",
            Joiner::None => "",
        }
    }
}

#[derive(Debug)]
struct Segment {
    text: String,
    joiner: Joiner,
}

/// Chunk extracted pages into embedding-ready pieces
///
/// Chunks never span pages. Every chunk after the first on its page starts
/// with up to `overlap_chars` characters taken from the end of the previous
/// chunk.
#[inline]
pub fn chunk_pages(pages: &[PageText], config: &ChunkingConfig) -> Vec<TextChunk> {
    let budget = config.body_budget();
    let mut bodies: Vec<(u32, String)> = Vec::new();

    for page in pages {
        if page.text.trim().is_empty() {
            continue;
        }
        let segments = segment_page(&page.text, budget, config.sentence_boundary_splitting);
        bodies.extend(
            pack_segments(segments, budget)
                .into_iter()
                .map(|body| (page.page_number, body)),
        );
    }

    let chunks = add_overlap(bodies, config.overlap_chars);

    debug!(
        "Chunked {} pages into {} chunks (avg {} chars)",
        pages.len(),
        chunks.len(),
        chunks.iter().map(TextChunk::char_count).sum::<usize>() / chunks.len().max(1)
    );

    chunks
}

/// Break a page into segments no longer than `budget`, preferring paragraph,
/// then sentence, then word boundaries
fn segment_page(text: &str, budget: usize, sentence_splitting: bool) -> Vec<Segment> {
    let mut segments = Vec::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if char_len(paragraph) <= budget {
            segments.push(Segment {
                text: paragraph.to_string(),
                joiner: Joiner::Paragraph,
            });
            continue;
        }

        let pieces = if sentence_splitting {
            split_sentences(paragraph)
        } else {
            vec![paragraph.to_string()]
        };

        let mut first_in_paragraph = true;
        for piece in pieces {
            let joiner = if first_in_paragraph {
                Joiner::Paragraph
            } else {
                Joiner::Space
            };
            first_in_paragraph = false;

            if char_len(&piece) <= budget {
                segments.push(Segment {
                    text: piece,
                    joiner,
                });
            } else {
                segments.extend(split_words(&piece, budget, joiner));
            }
        }
    }

    segments
}

/// Split text into sentences, keeping terminal punctuation attached
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().is_none_or(|next| next.is_whitespace());
        if at_boundary {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }

    sentences
}

/// Split an oversized sentence at word boundaries, force-splitting words that
/// alone exceed the budget
fn split_words(text: &str, budget: usize, first_joiner: Joiner) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut joiner = first_joiner;

    for word in text.split_whitespace() {
        if char_len(word) <= budget {
            segments.push(Segment {
                text: word.to_string(),
                joiner,
            });
        } else {
            let chars: Vec<char> = word.chars().collect();
            for (i, piece) in chars.chunks(budget).enumerate() {
                segments.push(Segment {
                    text: piece.iter().collect(),
                    joiner: if i == 0 { joiner } else { Joiner::None },
                });
            }
        }
        joiner = Joiner::Space;
    }

    segments
}

/// Greedily pack segments into bodies of at most `budget` characters
fn pack_segments(segments: Vec<Segment>, budget: usize) -> Vec<String> {
    let mut bodies = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for segment in segments {
        let segment_len = char_len(&segment.text);

        if current.is_empty() {
            current = segment.text;
            current_len = segment_len;
            continue;
        }

        let separator = segment.joiner.as_str();
        if current_len + separator.len() + segment_len <= budget {
            current.push_str(separator);
            current.push_str(&segment.text);
            current_len += separator.len() + segment_len;
        } else {
            bodies.push(std::mem::take(&mut current));
            current = segment.text;
            current_len = segment_len;
        }
    }

    if !current.is_empty() {
        bodies.push(current);
    }

    bodies
}

/// Prefix each body with the tail of the previous one on the same page and
/// assign chunk indices
fn add_overlap(bodies: Vec<(u32, String)>, overlap_chars: usize) -> Vec<TextChunk> {
    let mut chunks: Vec<TextChunk> = Vec::with_capacity(bodies.len());
    let mut previous: Option<(u32, String)> = None;

    for (chunk_index, (page_number, body)) in bodies.into_iter().enumerate() {
        let tail = previous
            .as_ref()
            .filter(|(previous_page, _)| *previous_page == page_number)
            .map(|(_, prev)| extract_overlap_text(prev, overlap_chars))
            .unwrap_or_default();

        let chunk = if tail.is_empty() {
            TextChunk {
                text: body.clone(),
                chunk_index,
                page_number,
                overlap_len: 0,
            }
        } else {
            TextChunk {
                text: format!("{} {}", tail, body),
                chunk_index,
                page_number,
                overlap_len: char_len(&tail) + 1,
            }
        };

        chunks.push(chunk);
        previous = Some((page_number, body));
    }

    chunks
}

/// Extract up to `overlap_chars` characters from the end of a chunk, cut at a
/// word boundary when one is available
fn extract_overlap_text(content: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 {
        return String::new();
    }

    let mut words: Vec<&str> = Vec::new();
    let mut taken = 0;
    for word in content.split_whitespace().rev() {
        let cost = char_len(word) + usize::from(!words.is_empty());
        if taken + cost > overlap_chars {
            break;
        }
        taken += cost;
        words.push(word);
    }

    if words.is_empty() {
        let chars: Vec<char> = content.chars().collect();
        let start = chars.len().saturating_sub(overlap_chars);
        return chars.get(start..).unwrap_or_default().iter().collect();
    }

    words.reverse();
    words.join(" ")
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
