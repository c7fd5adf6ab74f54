//! Source positions.

/// A resolved source span: document index plus line/column bounds.
///
/// Lines and columns are 1-based; a zeroed span means "no position" and is
/// skipped by debug-info emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub doc: u32,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    pub fn new(doc: u32, start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self { doc, start_line, start_col, end_line, end_col }
    }

    /// True for the zeroed "no position" span.
    pub fn is_none(&self) -> bool {
        self.start_line == 0
    }
}
