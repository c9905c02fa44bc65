use serde::{Deserialize, Serialize};
use std::fmt;

/// Language tag assigned to a span of source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentKind {
    HostLanguage,
    HostScriptExtension,
    #[serde(rename = "CSS")]
    Css,
    JavaScript,
    Unknown,
}

impl FragmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentKind::HostLanguage => "HostLanguage",
            FragmentKind::HostScriptExtension => "HostScriptExtension",
            FragmentKind::Css => "CSS",
            FragmentKind::JavaScript => "JavaScript",
            FragmentKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified, position-tagged span of source text.
///
/// Positions are 1-based and counted in characters. `end_line`/`end_column`
/// point just past the last character of `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub kind: FragmentKind,
    pub content: String,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub source_path: String,
}

impl Fragment {
    /// New fragment at the same position with rewritten text.
    pub fn replace_content(&self, content: String) -> Fragment {
        Fragment {
            content,
            ..self.clone()
        }
    }

    /// Line and column of a byte offset inside `content`.
    pub fn position_of(&self, byte_offset: usize) -> (u32, u32) {
        let mut line = self.start_line;
        let mut column = self.start_column;
        for (i, ch) in self.content.char_indices() {
            if i >= byte_offset {
                break;
            }
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        (line, column)
    }
}

/// Concatenate fragment contents in order.
pub fn reconstruct(fragments: &[Fragment]) -> String {
    fragments.iter().map(|f| f.content.as_str()).collect()
}
