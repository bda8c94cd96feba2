//! Whole-file text documents.
//!
//! A [`Document`] is an immutable snapshot of a file's content. Equality
//! between two documents ignores line-ending style; the raw content is what
//! gets written back out.

use std::path::Path;

use tracing::debug;

use crate::errors::SyncError;

/// An immutable text blob read from one side of a document pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    content: String,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Read a document from disk. A missing file yields `Ok(None)`.
    pub fn read(path: &Path) -> Result<Option<Self>, SyncError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "document not present");
                return Ok(None);
            }
            Err(e) => return Err(SyncError::io(path, e)),
        };
        let content = String::from_utf8(bytes).map_err(|_| SyncError::NotUtf8 {
            path: path.to_path_buf(),
        })?;
        Ok(Some(Self { content }))
    }

    /// Replace the file at `path` with this document, creating parent
    /// directories as needed.
    pub fn write(&self, path: &Path) -> Result<(), SyncError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
            }
        }
        std::fs::write(path, &self.content).map_err(|e| SyncError::io(path, e))?;
        debug!(path = %path.display(), bytes = self.content.len(), "document written");
        Ok(())
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Content with CRLF line endings folded to LF. Used for comparison and
    /// as merge input.
    pub fn normalized(&self) -> String {
        normalize_line_endings(&self.content)
    }

    /// `true` if any line ends in CRLF.
    pub fn uses_crlf(&self) -> bool {
        self.content.contains("\r\n")
    }

    /// LF-only `text` rewritten in this document's line-ending style.
    pub fn restyle(&self, text: &str) -> String {
        let text = normalize_line_endings(text);
        if self.uses_crlf() {
            text.replace('\n', "\r\n")
        } else {
            text
        }
    }

    /// `true` if the two documents differ only in line-ending style (or not at all).
    pub fn same_text(&self, other: &Document) -> bool {
        self.normalized() == other.normalized()
    }

    /// `true` for empty or whitespace-only content.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Fold CRLF line endings to LF.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
}

impl From<&str> for Document {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Document {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
