use super::*;

fn page(page_number: u32, text: &str) -> PageText {
    PageText {
        page_number,
        text: text.to_string(),
    }
}

fn create_test_pages() -> Vec<PageText> {
    vec![
        page(
            1,
            "Introduction to the handbook.\n\nThis handbook describes how the support team works. \
             It covers shifts, escalation and tooling.",
        ),
        page(
            2,
            &"Refunds are processed within five business days. Customers receive an email once the refund is issued! "
                .repeat(30),
        ),
        page(3, "Contact us at support@example.com for anything else."),
    ]
}

fn without_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[test]
fn small_text_becomes_single_chunk() {
    let pages = vec![page(1, "Alpha Beta. Gamma Delta.")];
    let chunks = chunk_pages(&pages, &ChunkingConfig::default());

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "Alpha Beta. Gamma Delta.");
    assert_eq!(chunks[0].chunk_index, 0);
    assert_eq!(chunks[0].page_number, 1);
    assert_eq!(chunks[0].overlap_len, 0);
}

#[test]
fn empty_text_yields_no_chunks() {
    let pages = vec![page(1, ""), page(2, "   \n\n  ")];
    assert!(chunk_pages(&pages, &ChunkingConfig::default()).is_empty());
    assert!(chunk_pages(&[], &ChunkingConfig::default()).is_empty());
}

#[test]
fn chunks_respect_max_size() {
    let config = ChunkingConfig {
        max_chunk_chars: 200,
        overlap_chars: 40,
        ..ChunkingConfig::default()
    };
    let chunks = chunk_pages(&create_test_pages(), &config);

    assert!(chunks.len() > 3);
    for chunk in &chunks {
        assert!(
            chunk.char_count() <= config.max_chunk_chars,
            "chunk {} has {} chars",
            chunk.chunk_index,
            chunk.char_count()
        );
    }
}

#[test]
fn chunking_is_deterministic() {
    let config = ChunkingConfig {
        max_chunk_chars: 150,
        overlap_chars: 30,
        ..ChunkingConfig::default()
    };
    let pages = create_test_pages();

    let first = chunk_pages(&pages, &config);
    let second = chunk_pages(&pages, &config);

    assert_eq!(first, second);
}

#[test]
fn bodies_reconstruct_original_text() {
    let config = ChunkingConfig {
        max_chunk_chars: 120,
        overlap_chars: 25,
        ..ChunkingConfig::default()
    };
    let pages = create_test_pages();
    let chunks = chunk_pages(&pages, &config);

    let reconstructed: String = chunks.iter().map(TextChunk::body).collect();
    let original: String = pages.iter().map(|p| p.text.as_str()).collect();

    assert_eq!(without_whitespace(&reconstructed), without_whitespace(&original));
}

#[test]
fn consecutive_chunks_overlap() {
    let config = ChunkingConfig {
        max_chunk_chars: 150,
        overlap_chars: 30,
        ..ChunkingConfig::default()
    };
    let chunks = chunk_pages(&create_test_pages(), &config);

    let same_page: Vec<_> = chunks
        .windows(2)
        .filter(|pair| pair[0].page_number == pair[1].page_number)
        .collect();
    assert!(!same_page.is_empty());

    for pair in same_page {
        let (previous, current) = (&pair[0], &pair[1]);
        assert!(current.overlap_len > 0);
        assert!(current.overlap_len <= config.overlap_chars + 1);

        let overlap: String = current.text.chars().take(current.overlap_len - 1).collect();
        assert!(
            previous.body().ends_with(&overlap),
            "overlap '{}' is not the tail of the previous chunk",
            overlap
        );
    }
}

#[test]
fn zero_overlap_disables_prefix() {
    let config = ChunkingConfig {
        max_chunk_chars: 100,
        overlap_chars: 0,
        ..ChunkingConfig::default()
    };
    let chunks = chunk_pages(&create_test_pages(), &config);

    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.overlap_len == 0 && c.body() == c.text));
}

#[test]
fn chunks_do_not_span_pages() {
    let config = ChunkingConfig {
        max_chunk_chars: 2000,
        overlap_chars: 0,
        ..ChunkingConfig::default()
    };
    let pages = vec![page(1, "First page text."), page(2, "Second page text.")];
    let chunks = chunk_pages(&pages, &config);

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].page_number, 1);
    assert_eq!(chunks[1].page_number, 2);
    assert_eq!(chunks[1].chunk_index, 1);
}

#[test]
fn overlap_restarts_on_each_page() {
    let config = ChunkingConfig {
        max_chunk_chars: 150,
        overlap_chars: 30,
        ..ChunkingConfig::default()
    };
    let pages = create_test_pages();
    let chunks = chunk_pages(&pages, &config);

    for pair in chunks.windows(2) {
        if pair[0].page_number != pair[1].page_number {
            assert_eq!(pair[1].overlap_len, 0);
        }
    }

    let last = chunks.last().expect("should have chunks");
    assert_eq!(last.page_number, 3);
    assert_eq!(last.text, pages[2].text);
}

#[test]
fn paragraph_boundaries_preferred() {
    let config = ChunkingConfig {
        max_chunk_chars: 50,
        overlap_chars: 0,
        ..ChunkingConfig::default()
    };
    let text = "First paragraph is short.\n\nSecond paragraph is also short.\n\nThird one too.";
    let chunks = chunk_pages(&[page(1, text)], &config);

    assert_eq!(chunks[0].text, "First paragraph is short.");
    assert_eq!(
        chunks[1].text,
        "Second paragraph is also short.\n\nThird one too."
    );
}

#[test]
fn oversized_word_is_force_split() {
    let config = ChunkingConfig {
        max_chunk_chars: 10,
        overlap_chars: 0,
        ..ChunkingConfig::default()
    };
    let word = "x".repeat(35);
    let chunks = chunk_pages(&[page(1, &word)], &config);

    assert_eq!(chunks.len(), 4);
    assert!(chunks.iter().all(|c| c.char_count() <= 10));
    let joined: String = chunks.iter().map(TextChunk::body).collect();
    assert_eq!(joined, word);
}

#[test]
fn sentence_splitting_keeps_punctuation() {
    let sentences = split_sentences("Is it ready? Yes! It ships today. Version 1.2 is out");
    assert_eq!(
        sentences,
        vec!["Is it ready?", "Yes!", "It ships today.", "Version 1.2 is out"]
    );
}

#[test]
fn overlap_text_cut_at_word_boundary() {
    assert_eq!(extract_overlap_text("one two three four", 10), "three four");
    assert_eq!(extract_overlap_text("one two", 0), "");
    assert_eq!(extract_overlap_text("abcdefghijkl", 4), "ijkl");
}

#[test]
fn multibyte_text_is_measured_in_chars() {
    let config = ChunkingConfig {
        max_chunk_chars: 30,
        overlap_chars: 5,
        ..ChunkingConfig::default()
    };
    let text = "Привет мир. Это проверка разбиения текста на части. Ещё одно предложение.";
    let chunks = chunk_pages(&[page(1, text)], &config);

    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.char_count() <= 30));
}
