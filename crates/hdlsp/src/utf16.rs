//
// utf16.rs
//
// Byte offset to LSP position conversion
//

use tower_lsp::lsp_types::Position;

/// Line start table for one source text. LSP positions count UTF-16 code
/// units, the lexer counts bytes.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// 0-based line containing `offset`
    pub fn line_of(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        }
    }

    /// Convert a byte offset into `text` to an LSP position. Offsets past the
    /// end clamp to the end of the text; offsets inside a multi-byte char
    /// clamp to its start.
    pub fn position(&self, text: &str, offset: usize) -> Position {
        let offset = offset.min(text.len());
        let line = self.line_of(offset);
        let start = self.line_starts[line];
        let mut character = 0u32;
        for (idx, ch) in text[start..].char_indices() {
            if start + idx >= offset || ch == '\n' {
                break;
            }
            character += ch.len_utf16() as u32;
        }
        Position::new(line as u32, character)
    }

    /// Convert an LSP position back to a byte offset into `text`. Positions
    /// past the end of a line clamp to the line end.
    pub fn offset(&self, text: &str, position: Position) -> usize {
        let Some(&start) = self.line_starts.get(position.line as usize) else {
            return text.len();
        };
        let mut units = 0u32;
        for (idx, ch) in text[start..].char_indices() {
            if units >= position.character || ch == '\n' {
                return start + idx;
            }
            units += ch.len_utf16() as u32;
        }
        text.len()
    }
}
