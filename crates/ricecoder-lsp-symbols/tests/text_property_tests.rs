//! Property-based tests for positions, edits and document versions

use proptest::prelude::*;
use ricecoder_lsp_symbols::client::PositionEncoding;
use ricecoder_lsp_symbols::document::Document;
use ricecoder_lsp_symbols::text::{self, Position, Range, TextEdit};

fn arb_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just("a".to_string()),
            Just(" ".to_string()),
            Just("\n".to_string()),
            Just("é".to_string()),
            Just("😀".to_string()),
            "[a-z]{1,5}",
        ],
        0..40,
    )
    .prop_map(|parts| parts.concat())
}

fn arb_encoding() -> impl Strategy<Value = PositionEncoding> {
    prop_oneof![Just(PositionEncoding::Utf16), Just(PositionEncoding::Utf8)]
}

proptest! {
    /// Every char boundary maps to a position that maps back to it.
    #[test]
    fn prop_offset_position_round_trip(text in arb_text(), encoding in arb_encoding()) {
        for (offset, _) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
            let position = text::position_at(&text, offset, encoding);
            prop_assert_eq!(text::offset_at(&text, position, encoding), Some(offset));
        }
    }

    /// Applying a batch equals applying its edits back to front one by one.
    #[test]
    fn prop_batch_edits_match_sequential(
        text in arb_text(),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
        replacement in "[a-z\n]{0,6}",
    ) {
        let encoding = PositionEncoding::Utf16;
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let mut offsets: Vec<usize> = cuts.iter().map(|cut| boundaries[cut.index(boundaries.len())]).collect();
        offsets.sort_unstable();
        offsets.dedup();

        let edits: Vec<TextEdit> = offsets
            .chunks(2)
            .map(|pair| {
                let start = text::position_at(&text, pair[0], encoding);
                let end = text::position_at(&text, *pair.last().unwrap(), encoding);
                TextEdit { range: Range::new(start, end), new_text: replacement.clone() }
            })
            .collect();

        let batch = text::apply_edits(&text, &edits, encoding).unwrap();
        let mut sequential = text.clone();
        for edit in edits.iter().rev() {
            sequential = text::replace_range(&sequential, edit.range, &edit.new_text, encoding).unwrap();
        }
        prop_assert_eq!(batch, sequential);
    }

    /// Each text change bumps the version by exactly one.
    #[test]
    fn prop_document_versions_are_monotonic(texts in prop::collection::vec(arb_text(), 1..10)) {
        let mut document = Document::new(std::path::Path::new("/project/a.toy"), "toy", String::new()).unwrap();
        let mut previous = document.version;
        for text in texts {
            let version = document.set_text(text.clone());
            prop_assert_eq!(version, previous + 1);
            prop_assert_eq!(&document.text, &text);
            previous = version;
        }
    }

    /// Inserting at the start of any existing line keeps every other line.
    #[test]
    fn prop_line_insert_preserves_lines(text in arb_text(), line in 0usize..50, inserted in "[a-z]{1,8}\n") {
        let count = text::line_count(&text);
        let line = line % count;
        let result = text::insert(&text, Position::new(line as u32, 0), &inserted, PositionEncoding::Utf16).unwrap();

        prop_assert_eq!(text::line_count(&result), count + 1);
        prop_assert_eq!(text::line_text(&result, line), Some(inserted.trim_end()));
        prop_assert_eq!(text::line_text(&result, line + 1), text::line_text(&text, line));
    }
}
