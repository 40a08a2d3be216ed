
use crate::database::vector_index::ScoredRecord;

/// Placed between chunks in an assembled context
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Drop hits that repeat a better-scoring one
///
/// `hits` must be in descending score order. A hit is a duplicate when its
/// text matches a kept hit, or when it is the neighbouring chunk of a kept hit
/// from the same document.
#[inline]
pub fn deduplicate(hits: Vec<ScoredRecord>) -> Vec<ScoredRecord> {
    let mut kept: Vec<ScoredRecord> = Vec::with_capacity(hits.len());

    for hit in hits {
        let duplicate = kept.iter().any(|existing| {
            existing.record.text.trim() == hit.record.text.trim()
                || (existing.record.document_id == hit.record.document_id
                    && existing.record.chunk_index.abs_diff(hit.record.chunk_index) == 1)
        });

        if !duplicate {
            kept.push(hit);
        }
    }

    kept
}

/// Join hit texts in order, within `max_chars` characters
///
/// Returns the context and how many hits contributed to it. The last
/// contributing hit may be cut short.
#[inline]
pub fn assemble_context(hits: &[ScoredRecord], max_chars: usize) -> (String, usize) {
    let separator_len = CONTEXT_SEPARATOR.chars().count();
    let mut context = String::new();
    let mut used = 0;
    let mut included = 0;

    for hit in hits {
        let prefix_len = if included == 0 { 0 } else { separator_len };
        let available = max_chars.saturating_sub(used + prefix_len);
        if available == 0 {
            break;
        }

        let text = hit.record.text.as_str();
        let text_len = text.chars().count();

        if included > 0 {
            context.push_str(CONTEXT_SEPARATOR);
        }
        included += 1;

        if text_len <= available {
            context.push_str(text);
            used += prefix_len + text_len;
        } else {
            context.push_str(truncate_chars(text, available));
            break;
        }
    }

    (context, included)
}

/// Longest prefix of `text` with at most `max_chars` characters
#[inline]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .and_then(|(offset, _)| text.get(..offset))
        .unwrap_or(text)
}
