//
// utf16.rs
//
// Column conversions between byte offsets and LSP UTF-16 code units
//

/// Convert a UTF-16 column offset (from LSP Position.character) to a byte
/// offset within the given line.
pub fn utf16_column_to_byte_offset(line: &str, utf16_col: u32) -> usize {
    let mut utf16_count = 0;
    for (byte_idx, ch) in line.char_indices() {
        if utf16_count == utf16_col as usize {
            return byte_idx;
        }
        utf16_count += ch.len_utf16();
    }
    line.len()
}

/// Convert a byte offset within a line to a UTF-16 column. Offsets past the
/// end of the line clamp to the line's UTF-16 length.
pub fn byte_offset_to_utf16_column(line: &str, byte_offset: usize) -> u32 {
    let end = byte_offset.min(line.len());
    line[..floor_char_boundary(line, end)]
        .chars()
        .map(|ch| ch.len_utf16() as u32)
        .sum()
}

/// UTF-16 length of a whole line.
pub fn utf16_len(text: &str) -> u32 {
    text.chars().map(|ch| ch.len_utf16() as u32).sum()
}

fn floor_char_boundary(line: &str, mut idx: usize) -> usize {
    while idx > 0 && !line.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
