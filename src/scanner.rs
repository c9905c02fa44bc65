//! Scanner Module for the CHTL Compiler
//!
//! Partitions raw source text into typed, position-tagged fragments without
//! full grammar knowledge of any embedded language.
//!
//! ## Invariants
//!
//! 1. **Lossless coverage**: concatenating the emitted fragments reproduces the
//!    input byte for byte. Whitespace-only input is emitted as a single
//!    `Unknown` fragment; only empty input produces no fragment at all.
//! 2. **Suppressed literals**: nothing inside a string or comment takes part in
//!    classification or brace tracking.
//! 3. **Deferred classification**: the whole buffer is classified once, at the
//!    end of the scan, by the ordered heuristics in [`classify`].
//! 4. **Non-negative depth**: a `}` with no open block is reported as a
//!    structural error and leaves the depth at zero.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;

use crate::error::{
    CompilerError, E_UNBALANCED_CLOSE, E_UNCLOSED_BLOCK, E_UNTERMINATED_COMMENT,
    E_UNTERMINATED_STRING,
};
use crate::fragment::{Fragment, FragmentKind};

// ═══════════════════════════════════════════════════════════════════════════════
// CLASSIFICATION TABLES
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    /// Tag names that introduce an element body (`div { ... }`).
    pub static ref HTML_ELEMENTS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        for tag in [
            "html", "head", "body", "title", "meta", "link", "base", "style", "script",
            "noscript", "template", "div", "span", "p", "a", "img", "br", "hr", "h1", "h2",
            "h3", "h4", "h5", "h6", "ul", "ol", "li", "dl", "dt", "dd", "table", "thead",
            "tbody", "tfoot", "tr", "td", "th", "caption", "colgroup", "col", "form",
            "input", "button", "select", "option", "optgroup", "textarea", "label",
            "fieldset", "legend", "header", "footer", "nav", "main", "section", "article",
            "aside", "figure", "figcaption", "blockquote", "pre", "code", "em", "strong",
            "small", "sub", "sup", "b", "i", "u", "s", "mark", "abbr", "cite", "q", "time",
            "video", "audio", "source", "track", "canvas", "svg", "iframe", "embed",
            "object", "picture", "details", "summary", "dialog", "menu", "progress",
            "meter", "output", "datalist", "address", "kbd", "samp", "var", "wbr", "area",
            "map",
        ] {
            s.insert(tag);
        }
        s
    };

    /// Step (a): syntax only the script extension uses.
    static ref EXTENSION_MARKER_RE: Regex = Regex::new(
        r"\{\{|->|\b(?:listen|delegate|animate|vir|iNeverAway|util|module)(?:\s|\{)"
    )
    .unwrap();

    /// Step (b): declarations and directives only the host language uses.
    static ref HOST_MARKER_RE: Regex = Regex::new(
        r"\[(?:Template|Custom|Origin|Import|Namespace|Configuration|Info|Export)\]|@(?:Style|Element|Var)\b|\btext\s*\{|\buse\s+(?:html5|@Config)\b"
    )
    .unwrap();

    /// Step (c): a bare element name opening a body.
    static ref ELEMENT_BLOCK_RE: Regex = Regex::new(r"^([A-Za-z][A-Za-z0-9]*)\s*\{").unwrap();

    /// Step (d): a class, id, bare, attribute, pseudo or at-rule selector opening a block.
    static ref CSS_RULE_RE: Regex = Regex::new(
        r"^(?:[.#][A-Za-z_\-][\w\-]*|[A-Za-z][\w\-]*|\*|@[\w\-]+|::?[\w\-]+|\[[^\]]*\])[^{};]*\{"
    )
    .unwrap();

    /// Statement keywords that can never start a CSS selector.
    static ref JS_STATEMENT_RE: Regex = Regex::new(
        r"^(?:function|var|let|const|class|if|for|while|do|return|import|export|async|switch|try|new)\b"
    )
    .unwrap();

    /// Step (e): JavaScript-only syntax.
    static ref JS_MARKER_RE: Regex = Regex::new(r"\bfunction\b|\bvar\s|\blet\s|\bconst\s|=>").unwrap();
}

/// Classify one buffer of code whose literals and comments are already blanked.
///
/// Precedence, first match wins:
/// a. script-extension marker → `HostScriptExtension`
/// b. host-language marker → `HostLanguage`
/// c. known element name followed by `{` → `HostLanguage`
/// d. selector + `{` with both `:` and `;` present → `Css`
/// e. JavaScript marker → `JavaScript`
/// f. otherwise `HostLanguage`
///
/// Known imprecision: text from one language that happens to contain another
/// language's trigger is classified by whichever step fires first (a
/// stylesheet with a `body { ... }` rule is host language by step c).
pub fn classify(code: &str) -> FragmentKind {
    classify_views(code, code)
}

fn classify_views(code: &str, extension_view: &str) -> FragmentKind {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return FragmentKind::Unknown;
    }

    if EXTENSION_MARKER_RE.is_match(extension_view) {
        return FragmentKind::HostScriptExtension;
    }

    if HOST_MARKER_RE.is_match(trimmed) {
        return FragmentKind::HostLanguage;
    }

    if let Some(caps) = ELEMENT_BLOCK_RE.captures(trimmed) {
        if HTML_ELEMENTS.contains(caps[1].to_lowercase().as_str()) {
            return FragmentKind::HostLanguage;
        }
    }

    if CSS_RULE_RE.is_match(trimmed)
        && !JS_STATEMENT_RE.is_match(trimmed)
        && trimmed.contains(':')
        && trimmed.contains(';')
    {
        return FragmentKind::Css;
    }

    if JS_MARKER_RE.is_match(trimmed) {
        return FragmentKind::JavaScript;
    }

    FragmentKind::HostLanguage
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCAN CURSOR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `// ...` to end of line
    Line,
    /// `/* ... */`
    Block,
    /// `-- ...` to end of line. The dashes must be followed by whitespace,
    /// which keeps `i--;` and `--custom-prop` out of it.
    Generator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexMode {
    Normal,
    InString(char),
    InComment(CommentStyle),
}

/// Transient state of one left-to-right pass.
#[derive(Debug)]
pub struct ScanCursor {
    pub offset: usize,
    pub line: u32,
    pub column: u32,
    pub brace_depth: usize,
    pub mode: LexMode,
    /// Verbatim text of the fragment under construction.
    pub buffer: String,
    /// `buffer` with string interiors and comments replaced by spaces.
    /// Byte offsets line up with `buffer`.
    code_view: String,
    escaped: bool,
    literal_start: (u32, u32),
    open_braces: Vec<(u32, u32)>,
    /// Depth at which a local `script { ... }` body opened, and where.
    script_block: Option<(usize, usize)>,
    script_bodies: Vec<Range<usize>>,
}

impl ScanCursor {
    pub fn new() -> Self {
        Self {
            offset: 0,
            line: 1,
            column: 1,
            brace_depth: 0,
            mode: LexMode::Normal,
            buffer: String::new(),
            code_view: String::new(),
            escaped: false,
            literal_start: (1, 1),
            open_braces: Vec::new(),
            script_block: None,
            script_bodies: Vec::new(),
        }
    }

    pub fn position(&self) -> (u32, u32) {
        (self.line, self.column)
    }

    fn push(&mut self, ch: char, visible: bool) {
        self.buffer.push(ch);
        if visible || ch == '\n' {
            self.code_view.push(ch);
        } else {
            for _ in 0..ch.len_utf8() {
                self.code_view.push(' ');
            }
        }
        self.offset += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }

    /// Consume one character (two for a block-comment opener).
    pub fn advance(&mut self, source: &str, file: &str, diagnostics: &mut Vec<CompilerError>) {
        let mut rest = source[self.offset..].chars();
        let ch = match rest.next() {
            Some(c) => c,
            None => return,
        };
        let next = rest.next();
        let after_next = rest.next();

        match self.mode {
            LexMode::InString(delim) => {
                let closes = !self.escaped && ch == delim;
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                }
                self.push(ch, closes);
                if closes {
                    self.mode = LexMode::Normal;
                }
            }
            LexMode::InComment(CommentStyle::Line) | LexMode::InComment(CommentStyle::Generator) => {
                if ch == '\n' {
                    self.mode = LexMode::Normal;
                }
                self.push(ch, false);
            }
            LexMode::InComment(CommentStyle::Block) => {
                if ch == '*' && next == Some('/') {
                    self.push(ch, false);
                    self.push('/', false);
                    self.mode = LexMode::Normal;
                } else {
                    self.push(ch, false);
                }
            }
            LexMode::Normal => match (ch, next) {
                ('/', Some('/')) => {
                    self.literal_start = self.position();
                    self.mode = LexMode::InComment(CommentStyle::Line);
                    self.push(ch, false);
                }
                ('/', Some('*')) => {
                    self.literal_start = self.position();
                    self.mode = LexMode::InComment(CommentStyle::Block);
                    self.push(ch, false);
                    self.push('*', false);
                }
                ('-', Some('-')) if after_next.map_or(true, char::is_whitespace) => {
                    self.literal_start = self.position();
                    self.mode = LexMode::InComment(CommentStyle::Generator);
                    self.push(ch, false);
                }
                ('"', _) | ('\'', _) | ('`', _) => {
                    self.literal_start = self.position();
                    self.escaped = false;
                    self.mode = LexMode::InString(ch);
                    self.push(ch, true);
                }
                ('{', _) => {
                    if self.script_block.is_none() && self.precedes_script_keyword() {
                        self.script_block = Some((self.brace_depth, self.buffer.len() + 1));
                    }
                    self.open_braces.push(self.position());
                    self.brace_depth += 1;
                    self.push(ch, true);
                }
                ('}', _) => {
                    if self.brace_depth == 0 {
                        let (line, column) = self.position();
                        diagnostics.push(CompilerError::new(
                            E_UNBALANCED_CLOSE,
                            "Unbalanced '}' with no open block",
                            file,
                            line,
                            column,
                        ));
                    } else {
                        self.brace_depth -= 1;
                        self.open_braces.pop();
                        if let Some((depth, start)) = self.script_block {
                            if self.brace_depth == depth {
                                self.script_bodies.push(start..self.buffer.len());
                                self.script_block = None;
                            }
                        }
                    }
                    self.push(ch, true);
                }
                _ => self.push(ch, true),
            },
        }
    }

    fn precedes_script_keyword(&self) -> bool {
        let code = self.code_view.trim_end();
        match code.strip_suffix("script") {
            Some(head) => !head.ends_with(|c: char| c.is_alphanumeric() || c == '_' || c == '-'),
            None => false,
        }
    }

    /// Code view with local `script { ... }` bodies blanked out. Extension
    /// syntax inside those bodies belongs to the enclosing host construct.
    fn extension_view(&self) -> String {
        let mut view = self.code_view.clone().into_bytes();
        let mut ranges = self.script_bodies.clone();
        if let Some((_, start)) = self.script_block {
            ranges.push(start..view.len());
        }
        for range in ranges {
            for byte in &mut view[range] {
                if *byte != b'\n' {
                    *byte = b' ';
                }
            }
        }
        // Ranges start and end next to braces, so whole characters are blanked.
        String::from_utf8_lossy(&view).into_owned()
    }

    /// Report structural problems left open at end of input.
    fn finish(&self, file: &str, diagnostics: &mut Vec<CompilerError>) {
        match self.mode {
            LexMode::InString(delim) => {
                let (line, column) = self.literal_start;
                diagnostics.push(CompilerError::new(
                    E_UNTERMINATED_STRING,
                    &format!("Unterminated string literal opened with {}", delim),
                    file,
                    line,
                    column,
                ));
            }
            LexMode::InComment(CommentStyle::Block) => {
                let (line, column) = self.literal_start;
                diagnostics.push(CompilerError::new(
                    E_UNTERMINATED_COMMENT,
                    "Unterminated block comment",
                    file,
                    line,
                    column,
                ));
            }
            _ => {}
        }
        if let Some(&(line, column)) = self.open_braces.last() {
            diagnostics.push(CompilerError::new(
                E_UNCLOSED_BLOCK,
                &format!("{} block(s) left open at end of input", self.brace_depth),
                file,
                line,
                column,
            ));
        }
    }
}

impl Default for ScanCursor {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCANNER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ScanOutput {
    pub fragments: Vec<Fragment>,
    /// Structural problems found while scanning. Scanning always completes.
    pub diagnostics: Vec<CompilerError>,
    pub final_brace_depth: usize,
}

impl ScanOutput {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Fragments, or the first structural error.
    pub fn into_result(self) -> Result<Vec<Fragment>, CompilerError> {
        match self.diagnostics.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.fragments),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scanner {
    source_path: String,
    debug: bool,
}

impl Scanner {
    pub fn new(source_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn scan(&self, source: &str) -> ScanOutput {
        let mut cursor = ScanCursor::new();
        let mut diagnostics = Vec::new();

        while cursor.offset < source.len() {
            cursor.advance(source, &self.source_path, &mut diagnostics);
        }
        cursor.finish(&self.source_path, &mut diagnostics);

        let mut fragments = Vec::new();
        if !cursor.buffer.is_empty() {
            let extension_view = cursor.extension_view();
            let kind = classify_views(&cursor.code_view, &extension_view);
            fragments.push(Fragment {
                kind,
                content: std::mem::take(&mut cursor.buffer),
                start_line: 1,
                start_column: 1,
                end_line: cursor.line,
                end_column: cursor.column,
                source_path: self.source_path.clone(),
            });
        }

        if self.debug {
            for (index, fragment) in fragments.iter().enumerate() {
                tracing::debug!(
                    file = %self.source_path,
                    index,
                    kind = %fragment.kind,
                    start_line = fragment.start_line,
                    end_line = fragment.end_line,
                    len = fragment.content.len(),
                    "classified fragment"
                );
            }
            for diagnostic in &diagnostics {
                tracing::debug!(code = %diagnostic.code, line = diagnostic.line, "scan diagnostic");
            }
        }

        ScanOutput {
            fragments,
            diagnostics,
            final_brace_depth: cursor.brace_depth,
        }
    }
}

/// Scan without a source path or debug tracing.
pub fn scan(source: &str) -> Vec<Fragment> {
    Scanner::default().scan(source).fragments
}

/// Blank out comments and string interiors, keeping byte offsets and newlines.
/// String delimiters stay visible so quoted spans can still be located.
pub fn mask_literals(source: &str) -> String {
    let mut cursor = ScanCursor::new();
    let mut sink = Vec::new();
    while cursor.offset < source.len() {
        cursor.advance(source, "", &mut sink);
    }
    cursor.code_view
}

/// Find the end of a balanced brace block starting at `start` (which must be
/// a `{`), skipping strings and comments. Returns the index just past the
/// matching `}`.
pub fn find_balanced_brace_end(text: &str, start: usize) -> Option<usize> {
    let masked = mask_literals(&text[start..]);
    let mut depth = 0usize;
    for (i, byte) in masked.bytes().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
