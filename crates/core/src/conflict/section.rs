//! Structural merge over level-2 markdown sections.
//!
//! Documents are split at `## ` header lines and merged section by section.
//! Coarser than a line merge, but it needs no common ancestor and always
//! produces a result. Sections are compared in LF form and the output takes
//! the workspace copy's line-ending style.

use tracing::{debug, info};

use super::merger::{MergeResult, CANONICAL_LABEL, WORKSPACE_LABEL};
use crate::document::Document;

const HEADER_PREFIX: &str = "## ";

/// Identifies a section within a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SectionKey {
    /// Content before the first level-2 header.
    Preamble,
    /// A level-2 header line, trailing whitespace removed.
    Header(String),
}

impl std::fmt::Display for SectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preamble => write!(f, "(preamble)"),
            Self::Header(h) => write!(f, "{}", h),
        }
    }
}

/// A contiguous span of a document, header line included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub key: SectionKey,
    pub text: String,
}

/// Split `content` into sections in document order.
///
/// A header that appears twice extends the earlier section rather than
/// replacing it.
pub fn parse_sections(content: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current = Section {
        key: SectionKey::Preamble,
        text: String::new(),
    };

    for line in content.split_inclusive('\n') {
        if line.starts_with(HEADER_PREFIX) {
            push_section(&mut sections, current);
            current = Section {
                key: SectionKey::Header(line.trim_end().to_string()),
                text: String::new(),
            };
        }
        current.text.push_str(line);
    }
    push_section(&mut sections, current);

    sections
}

fn push_section(sections: &mut Vec<Section>, section: Section) {
    if section.key == SectionKey::Preamble && section.text.is_empty() {
        return;
    }
    match sections.iter_mut().find(|s| s.key == section.key) {
        Some(existing) => {
            ensure_newline(&mut existing.text);
            existing.text.push_str(&section.text);
        }
        None => sections.push(section),
    }
}

fn ensure_newline(text: &mut String) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
}

fn find<'a>(sections: &'a [Section], key: &SectionKey) -> Option<&'a str> {
    sections
        .iter()
        .find(|s| &s.key == key)
        .map(|s| s.text.as_str())
}

/// Section-level merger of last resort.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionMerger;

impl SectionMerger {
    /// Merge two documents section by section. Never fails.
    pub fn section_merge(canonical: &Document, workspace: &Document) -> MergeResult {
        let canonical_sections = parse_sections(&canonical.normalized());
        let workspace_sections = parse_sections(&workspace.normalized());

        let mut keys: Vec<&SectionKey> = canonical_sections.iter().map(|s| &s.key).collect();
        for section in &workspace_sections {
            if !keys.contains(&&section.key) {
                keys.push(&section.key);
            }
        }

        info!(
            canonical = canonical_sections.len(),
            workspace = workspace_sections.len(),
            union = keys.len(),
            "performing section merge"
        );

        let mut merged = String::new();
        let mut conflicts = 0usize;

        for key in keys {
            let ours = find(&canonical_sections, key);
            let theirs = find(&workspace_sections, key);

            let part = match (ours, theirs) {
                (Some(c), Some(w)) if c.trim_end() == w.trim_end() => w.to_string(),
                (Some(c), Some(w)) if c.trim().is_empty() => w.to_string(),
                (Some(c), Some(w)) if w.trim().is_empty() => c.to_string(),
                (Some(c), Some(w)) => {
                    debug!(section = %key, "section changed on both sides");
                    conflicts += 1;
                    conflict_block(c, w)
                }
                (Some(only), None) | (None, Some(only)) => only.to_string(),
                (None, None) => continue,
            };

            ensure_newline(&mut merged);
            merged.push_str(&part);
        }

        let merged = workspace.restyle(&merged);
        if conflicts > 0 {
            debug!(conflicts, "section merge left conflicts");
            MergeResult::conflicted(merged)
        } else {
            MergeResult::clean(merged)
        }
    }
}

fn conflict_block(canonical: &str, workspace: &str) -> String {
    let mut block = format!("<<<<<<< {}\n", CANONICAL_LABEL);
    block.push_str(canonical);
    ensure_newline(&mut block);
    block.push_str("=======\n");
    block.push_str(workspace);
    ensure_newline(&mut block);
    block.push_str(&format!(">>>>>>> {}\n", WORKSPACE_LABEL));
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(canonical: &str, workspace: &str) -> MergeResult {
        SectionMerger::section_merge(&canonical.into(), &workspace.into())
    }

    #[test]
    fn test_parse_sections() {
        let sections = parse_sections("# Title\nintro\n\n## One\na\n### Sub\nb\n## Two\nc");
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].key, SectionKey::Preamble);
        assert_eq!(sections[0].text, "# Title\nintro\n\n");
        assert_eq!(sections[1].key, SectionKey::Header("## One".into()));
        assert_eq!(sections[1].text, "## One\na\n### Sub\nb\n");
        assert_eq!(sections[2].text, "## Two\nc");
    }

    #[test]
    fn test_parse_without_preamble() {
        let sections = parse_sections("## Only\nbody\n");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].key, SectionKey::Header("## Only".into()));
    }

    #[test]
    fn test_duplicate_header_is_appended() {
        let sections = parse_sections("## A\none\n## B\nx\n## A\ntwo\n");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].text, "## A\none\n## A\ntwo\n");
    }

    #[test]
    fn test_disjoint_sections_are_unioned() {
        let result = merge("## Old Section\nOld content\n", "## New Section\nNew content\n");
        assert!(!result.has_conflicts);
        assert_eq!(
            result.merged_content,
            "## Old Section\nOld content\n## New Section\nNew content\n"
        );
    }

    #[test]
    fn test_same_key_divergent_content_conflicts() {
        let result = merge("## A\nX\n", "## A\nY\n");
        assert!(result.has_conflicts);
        assert_eq!(
            result.merged_content,
            "<<<<<<< canonical\n## A\nX\n=======\n## A\nY\n>>>>>>> workspace\n"
        );
        assert_eq!(result.conflict_markers.len(), 1);
    }

    #[test]
    fn test_equal_sections_prefer_workspace_formatting() {
        let result = merge("## A\nsame\n", "## A\nsame\n\n\n");
        assert!(!result.has_conflicts);
        assert_eq!(result.merged_content, "## A\nsame\n\n\n");
    }

    #[test]
    fn test_union_order_canonical_first() {
        let result = merge("## B\nb\n## C\nc\n", "## A\na\n## B\nb\n");
        assert_eq!(result.merged_content, "## B\nb\n## C\nc\n## A\na\n");
    }

    #[test]
    fn test_blank_preamble_on_one_side_is_not_a_conflict() {
        let result = merge("\n\n## A\nx\n", "# Title\n## A\nx\n");
        assert!(!result.has_conflicts);
        assert!(result.merged_content.starts_with("# Title\n"));
    }

    #[test]
    fn test_missing_trailing_newline_does_not_glue_sections() {
        let result = merge("## A\nx", "## B\ny\n");
        assert_eq!(result.merged_content, "## A\nx\n## B\ny\n");
    }

    #[test]
    fn test_line_endings_do_not_make_sections_differ() {
        let result = merge("## A\nx\n", "## A\r\nx\r\n## B\r\ny\r\n");
        assert!(!result.has_conflicts);
        assert_eq!(result.merged_content, "## A\r\nx\r\n## B\r\ny\r\n");
    }

    #[test]
    fn test_crlf_conflict_block_uses_workspace_endings() {
        let result = merge("## A\nX\n", "## A\r\nY\r\n");
        assert!(result.has_conflicts);
        assert_eq!(
            result.merged_content,
            "<<<<<<< canonical\r\n## A\r\nX\r\n=======\r\n## A\r\nY\r\n>>>>>>> workspace\r\n"
        );
        assert_eq!(result.conflict_markers.len(), 1);
    }

    #[test]
    fn test_every_section_survives() {
        let canonical = "intro\n## One\n1\n## Two\n2\n";
        let workspace = "intro\n## Two\n2\n## Three\n3\n";
        let result = merge(canonical, workspace);
        assert!(!result.has_conflicts);
        for needle in ["intro", "## One", "## Two", "## Three"] {
            assert!(result.merged_content.contains(needle), "missing {needle}");
        }
    }
}
