//! Source files and locations.
//!
//! The lexer tracks only a byte offset; line and column numbers are derived
//! on demand through a per-file table of line start offsets.

use indexmap::IndexMap;
use std::fmt;

/// A resolved position in a source file, with the length in bytes of the
/// token it points at (1 when unknown).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub file: String,
    /// 1-based line number
    pub line: usize,
    /// 1-based column number
    pub column: usize,
    /// Byte offset of the start
    pub offset: usize,
    /// Token length in bytes
    pub length: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize, column: usize, offset: usize, length: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            offset,
            length,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A loaded source file with its line start table.
pub struct SourceFile {
    pub name: String,
    pub content: String,
    lines: Vec<usize>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let lines = compute_line_starts(&content);
        Self {
            name: name.into(),
            content,
            lines,
        }
    }

    /// Map a byte offset to a (line, column) pair, both 1-based.
    pub fn offset_to_line_col(&self, offset: usize) -> (usize, usize) {
        let line = self.lines.partition_point(|&start| start <= offset);
        let line_start = if line > 0 { self.lines[line - 1] } else { 0 };
        let col = offset - line_start + 1;
        (line, col)
    }

    /// Resolve an offset/length pair into a full location.
    pub fn location(&self, offset: usize, length: usize) -> SourceLocation {
        let (line, column) = self.offset_to_line_col(offset);
        SourceLocation::new(self.name.clone(), line, column, offset, length)
    }

    /// The text of a 1-based line, without its terminator.
    pub fn line_text(&self, line: usize) -> Option<&str> {
        if line == 0 || line > self.lines.len() {
            return None;
        }
        let start = self.lines[line - 1];
        let end = self
            .lines
            .get(line)
            .map(|&next| next)
            .unwrap_or(self.content.len());
        Some(self.content[start..end].trim_end_matches(['\n', '\r']))
    }
}

fn compute_line_starts(content: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, c) in content.char_indices() {
        if c == '\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// All files read during a compilation, keyed by display name.
#[derive(Default)]
pub struct SourceMap {
    files: IndexMap<String, SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file: SourceFile) {
        self.files.insert(file.name.clone(), file);
    }

    pub fn get(&self, name: &str) -> Option<&SourceFile> {
        self.files.get(name)
    }
}
