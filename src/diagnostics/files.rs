use std::path::{Path, PathBuf};

/// Index of a source file in a [`FileCache`]. The same-file rule for
/// `@differentiating` compares these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileId(pub usize);

impl FileId {
    pub const UNKNOWN: Self = FileId(usize::MAX);

    #[must_use]
    pub fn is_known(self) -> bool {
        self != FileId::UNKNOWN
    }
}

impl Default for FileId {
    fn default() -> Self {
        FileId::UNKNOWN
    }
}

/// 1-based position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineCol {
    pub line: usize,
    pub column: usize,
}

/// Byte offsets at which each line begins.
#[derive(Clone, Debug)]
struct LineIndex(Vec<usize>);

impl LineIndex {
    fn of(text: &str) -> Self {
        let breaks = text.match_indices('\n').map(|(offset, _)| offset + 1);
        LineIndex(std::iter::once(0).chain(breaks).collect())
    }

    fn locate(&self, offset: usize) -> LineCol {
        let line = self.0.partition_point(|start| *start <= offset).max(1);
        LineCol {
            line,
            column: offset - self.0[line - 1] + 1,
        }
    }

    fn range(&self, line: usize, len: usize) -> Option<(usize, usize)> {
        let start = *self.0.get(line.checked_sub(1)?)?;
        let end = self.0.get(line).copied().unwrap_or(len);
        Some((start, end))
    }
}

/// A source file that declarations and diagnostics point into.
#[derive(Clone, Debug)]
pub struct SourceFile {
    pub id: FileId,
    pub path: PathBuf,
    pub source: String,
    lines: LineIndex,
}

impl SourceFile {
    #[must_use]
    pub fn new(id: FileId, path: PathBuf, source: String) -> Self {
        let lines = LineIndex::of(&source);
        Self {
            id,
            path,
            source,
            lines,
        }
    }

    #[must_use]
    pub fn line_col(&self, offset: usize) -> Option<LineCol> {
        (offset <= self.source.len()).then(|| self.lines.locate(offset))
    }

    /// Text of `line`, including its newline.
    #[must_use]
    pub fn line(&self, line: usize) -> Option<&str> {
        let (start, end) = self.lines.range(line, self.source.len())?;
        self.source.get(start..end)
    }

    /// Span of the first occurrence of `needle`.
    #[must_use]
    pub fn find(&self, needle: &str) -> Option<super::Span> {
        self.source
            .find(needle)
            .map(|start| super::Span::in_file(self.id, start, start + needle.len()))
    }
}

#[derive(Clone, Debug, Default)]
pub struct FileCache {
    files: Vec<SourceFile>,
}

impl FileCache {
    pub fn add_file(&mut self, path: impl Into<PathBuf>, source: impl Into<String>) -> FileId {
        let id = FileId(self.files.len());
        self.files.push(SourceFile::new(id, path.into(), source.into()));
        id
    }

    #[must_use]
    pub fn get(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(id.0)
    }

    #[must_use]
    pub fn path(&self, id: FileId) -> Option<&Path> {
        self.get(id).map(|file| file.path.as_path())
    }

    #[must_use]
    pub fn line_col(&self, id: FileId, offset: usize) -> Option<LineCol> {
        self.get(id)?.line_col(offset)
    }

    #[must_use]
    pub fn find_id_by_path(&self, path: &Path) -> Option<FileId> {
        self.files.iter().find(|file| file.path == path).map(|file| file.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_is_one_based() {
        let mut files = FileCache::default();
        let id = files.add_file("model.swift", "func f() {}\nfunc g() {}\n");
        let second = files.get(id).and_then(|file| file.find("g()")).expect("span");
        let loc = files.line_col(id, second.start).expect("line/col");
        assert_eq!(loc, LineCol { line: 2, column: 6 });
        assert_eq!(files.line_col(id, 0), Some(LineCol { line: 1, column: 1 }));
        assert_eq!(files.line_col(id, 100), None);
        assert_eq!(files.find_id_by_path(Path::new("model.swift")), Some(id));
        assert_eq!(files.get(id).and_then(|file| file.line(1)), Some("func f() {}\n"));
        assert_eq!(files.get(id).and_then(|file| file.line(0)), None);
        assert!(id.is_known());
        assert!(!FileId::default().is_known());
    }
}
