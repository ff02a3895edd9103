//! Line/column arithmetic over document text
//!
//! Positions follow LSP: zero-based lines, and a `character` counted in the
//! negotiated [`PositionEncoding`] units. Lines are separated by `\n`; a
//! trailing `\r` belongs to the line terminator.

use serde::{Deserialize, Serialize};

use crate::client::capabilities::PositionEncoding;

/// Zero-based position in a document
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Position {
    /// Line number
    pub line: u32,
    /// Column in encoding units
    pub character: u32,
}

impl Position {
    /// Create a position
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Half-open span between two positions
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Range {
    /// Inclusive start
    pub start: Position,
    /// Exclusive end
    pub end: Position,
}

impl Range {
    /// Create a range
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Whether `position` lies within the range (end inclusive, as LSP
    /// clients treat cursor positions)
    pub fn contains(&self, position: Position) -> bool {
        self.start <= position && position <= self.end
    }

    /// Whether `other` lies entirely within the range
    pub fn contains_range(&self, other: &Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// A replacement of one range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    /// Range being replaced (empty for an insertion)
    pub range: Range,
    /// Replacement text
    pub new_text: String,
}

fn unit_len(ch: char, encoding: PositionEncoding) -> u32 {
    match encoding {
        PositionEncoding::Utf16 => ch.len_utf16() as u32,
        PositionEncoding::Utf8 => ch.len_utf8() as u32,
    }
}

fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// Number of lines; a trailing newline starts an (empty) last line
pub fn line_count(text: &str) -> usize {
    text.matches('\n').count() + 1
}

/// Content of one line without its terminator
pub fn line_text(text: &str, line: usize) -> Option<&str> {
    let starts = line_starts(text);
    let start = *starts.get(line)?;
    let end = starts.get(line + 1).map_or(text.len(), |next| next - 1);
    Some(text[start..end].trim_end_matches('\r'))
}

/// Leading spaces and tabs of a line
pub fn leading_whitespace(line: &str) -> &str {
    let trimmed = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - trimmed.len()]
}

/// Byte offset of a position.
///
/// A `character` beyond the end of its line clamps to the line end. Returns
/// `None` when the line does not exist.
pub fn offset_at(text: &str, position: Position, encoding: PositionEncoding) -> Option<usize> {
    let line = position.line as usize;
    let starts = line_starts(text);
    let start = *starts.get(line)?;
    let end = starts.get(line + 1).map_or(text.len(), |next| next - 1);
    let content = text[start..end].trim_end_matches('\r');

    let mut units = 0;
    for (index, ch) in content.char_indices() {
        if units >= position.character {
            return Some(start + index);
        }
        units += unit_len(ch, encoding);
    }
    Some(start + content.len())
}

/// Position of a byte offset (clamped to the text and to a char boundary)
pub fn position_at(text: &str, offset: usize, encoding: PositionEncoding) -> Position {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }

    let before = &text[..offset];
    let line = before.matches('\n').count() as u32;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let character = text[line_start..offset]
        .chars()
        .map(|ch| unit_len(ch, encoding))
        .sum();

    Position { line, character }
}

/// The text covered by a range
pub fn slice(text: &str, range: Range, encoding: PositionEncoding) -> Option<&str> {
    let start = offset_at(text, range.start, encoding)?;
    let end = offset_at(text, range.end, encoding)?;
    (start <= end).then(|| &text[start..end])
}

/// Replace a range, returning the new text
pub fn replace_range(
    text: &str,
    range: Range,
    new_text: &str,
    encoding: PositionEncoding,
) -> Option<String> {
    let start = offset_at(text, range.start, encoding)?;
    let end = offset_at(text, range.end, encoding)?;
    if start > end {
        return None;
    }

    let mut result = String::with_capacity(text.len() - (end - start) + new_text.len());
    result.push_str(&text[..start]);
    result.push_str(new_text);
    result.push_str(&text[end..]);
    Some(result)
}

/// Delete the text between two positions
pub fn delete_range(text: &str, range: Range, encoding: PositionEncoding) -> Option<String> {
    replace_range(text, range, "", encoding)
}

/// Insert at a position.
///
/// Column 0 of the line just past the last one is accepted; a missing final
/// newline is added before the inserted text.
pub fn insert(
    text: &str,
    position: Position,
    new_text: &str,
    encoding: PositionEncoding,
) -> Option<String> {
    if position.line as usize == line_count(text) && position.character == 0 {
        let mut result = String::with_capacity(text.len() + new_text.len() + 1);
        result.push_str(text);
        if !text.is_empty() && !text.ends_with('\n') {
            result.push('\n');
        }
        result.push_str(new_text);
        return Some(result);
    }

    replace_range(text, Range::new(position, position), new_text, encoding)
}

/// Apply one edit, allowing the past-the-end insertion [`insert`] accepts
pub fn apply_edit(text: &str, edit: &TextEdit, encoding: PositionEncoding) -> Option<String> {
    if edit.range.start == edit.range.end {
        insert(text, edit.range.start, &edit.new_text, encoding)
    } else {
        replace_range(text, edit.range, &edit.new_text, encoding)
    }
}

/// Apply a batch of non-overlapping edits expressed against the same text.
///
/// Edits are applied back to front; insertions at the same position keep
/// their order in `edits`.
pub fn apply_edits(text: &str, edits: &[TextEdit], encoding: PositionEncoding) -> Option<String> {
    let mut spans = Vec::with_capacity(edits.len());
    for (index, edit) in edits.iter().enumerate() {
        let start = offset_at(text, edit.range.start, encoding)?;
        let end = offset_at(text, edit.range.end, encoding)?;
        if start > end {
            return None;
        }
        spans.push((start, end, index));
    }
    spans.sort_by(|a, b| b.0.cmp(&a.0).then(b.2.cmp(&a.2)));

    let mut result = text.to_string();
    let mut limit = text.len();
    for (start, end, index) in spans {
        if end > limit {
            return None;
        }
        result.replace_range(start..end, &edits[index].new_text);
        limit = start;
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UTF16: PositionEncoding = PositionEncoding::Utf16;
    const UTF8: PositionEncoding = PositionEncoding::Utf8;

    fn pos(line: u32, character: u32) -> Position {
        Position::new(line, character)
    }

    #[test]
    fn test_line_helpers() {
        let text = "fn a() {\r\n    b();\n}\n";
        assert_eq!(line_count(text), 4);
        assert_eq!(line_text(text, 0), Some("fn a() {"));
        assert_eq!(line_text(text, 1), Some("    b();"));
        assert_eq!(line_text(text, 3), Some(""));
        assert_eq!(line_text(text, 4), None);
        assert_eq!(leading_whitespace("\t  x = 1"), "\t  ");
    }

    #[test]
    fn test_offset_ascii() {
        let text = "abc\ndef\n";
        assert_eq!(offset_at(text, pos(0, 0), UTF16), Some(0));
        assert_eq!(offset_at(text, pos(1, 2), UTF16), Some(6));
        assert_eq!(offset_at(text, pos(2, 0), UTF16), Some(8));
        assert_eq!(offset_at(text, pos(3, 0), UTF16), None);
    }

    #[test]
    fn test_offset_clamps_to_line_end() {
        let text = "ab\r\ncd";
        assert_eq!(offset_at(text, pos(0, 99), UTF16), Some(2));
        assert_eq!(offset_at(text, pos(1, 99), UTF16), Some(6));
    }

    #[test]
    fn test_offsets_follow_encoding() {
        // 'é' is 2 UTF-8 bytes / 1 UTF-16 unit, '😀' is 4 bytes / 2 units.
        let text = "é😀x";
        assert_eq!(offset_at(text, pos(0, 3), UTF16), Some(6));
        assert_eq!(offset_at(text, pos(0, 6), UTF8), Some(6));
        assert_eq!(position_at(text, 6, UTF16), pos(0, 3));
        assert_eq!(position_at(text, 6, UTF8), pos(0, 6));
    }

    #[test]
    fn test_position_at_clamps_inside_char() {
        let text = "a😀";
        assert_eq!(position_at(text, 3, UTF16), pos(0, 1));
        assert_eq!(position_at(text, 100, UTF16), pos(0, 3));
    }

    #[test]
    fn test_slice_and_delete() {
        let text = "one\ntwo\nthree\n";
        let range = Range::new(pos(1, 0), pos(2, 0));
        assert_eq!(slice(text, range, UTF16), Some("two\n"));
        assert_eq!(delete_range(text, range, UTF16).unwrap(), "one\nthree\n");
        assert_eq!(slice(text, Range::new(pos(2, 0), pos(1, 0)), UTF16), None);
    }

    #[test]
    fn test_insert_past_end_adds_newline() {
        assert_eq!(insert("a\nb", pos(2, 0), "c\n", UTF16).unwrap(), "a\nb\nc\n");
        assert_eq!(insert("a\nb\n", pos(2, 0), "c\n", UTF16).unwrap(), "a\nb\nc\n");
        assert_eq!(insert("", pos(1, 0), "x", UTF16).unwrap(), "x");
        assert!(insert("a", pos(5, 0), "x", UTF16).is_none());
    }

    #[test]
    fn test_apply_edits_back_to_front() {
        let text = "let a = 1;\nlet b = a + a;\n";
        let edits = vec![
            TextEdit {
                range: Range::new(pos(0, 4), pos(0, 5)),
                new_text: "alpha".to_string(),
            },
            TextEdit {
                range: Range::new(pos(1, 12), pos(1, 13)),
                new_text: "alpha".to_string(),
            },
            TextEdit {
                range: Range::new(pos(1, 8), pos(1, 9)),
                new_text: "alpha".to_string(),
            },
        ];

        assert_eq!(
            apply_edits(text, &edits, UTF16).unwrap(),
            "let alpha = 1;\nlet b = alpha + alpha;\n"
        );
    }

    #[test]
    fn test_apply_edits_same_position_keeps_order() {
        let insert_at_zero = |s: &str| TextEdit {
            range: Range::new(pos(0, 0), pos(0, 0)),
            new_text: s.to_string(),
        };
        let edits = vec![insert_at_zero("a"), insert_at_zero("b")];
        assert_eq!(apply_edits("x", &edits, UTF16).unwrap(), "abx");
    }

    #[test]
    fn test_apply_edits_rejects_overlap() {
        let edits = vec![
            TextEdit {
                range: Range::new(pos(0, 0), pos(0, 3)),
                new_text: String::new(),
            },
            TextEdit {
                range: Range::new(pos(0, 2), pos(0, 4)),
                new_text: String::new(),
            },
        ];
        assert!(apply_edits("abcdef", &edits, UTF16).is_none());
    }

    #[test]
    fn test_range_containment() {
        let outer = Range::new(pos(1, 0), pos(5, 1));
        assert!(outer.contains(pos(3, 7)));
        assert!(outer.contains(pos(5, 1)));
        assert!(!outer.contains(pos(5, 2)));
        assert!(outer.contains_range(&Range::new(pos(2, 0), pos(4, 0))));
        assert!(!outer.contains_range(&Range::new(pos(0, 0), pos(4, 0))));
    }
}
