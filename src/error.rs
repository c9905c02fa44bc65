#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const E_UNTERMINATED_STRING: &str = "CHTL-LEX-001";
pub const E_UNTERMINATED_COMMENT: &str = "CHTL-LEX-002";
pub const E_UNEXPECTED_CHAR: &str = "CHTL-LEX-003";

pub const E_UNBALANCED_CLOSE: &str = "CHTL-SYN-001";
pub const E_UNCLOSED_BLOCK: &str = "CHTL-SYN-002";
pub const E_EXPECTED_TOKEN: &str = "CHTL-SYN-003";
pub const E_CSS_SYNTAX: &str = "CHTL-SYN-010";
pub const E_JS_SYNTAX: &str = "CHTL-SYN-011";

pub const E_UNSUPPORTED_DECLARATION: &str = "CHTL-SEM-001";
pub const E_UNSUPPORTED_EXTENSION: &str = "CHTL-SEM-002";
pub const E_MISSING_TARGET: &str = "CHTL-SEM-003";
pub const E_UNRESOLVED_REFERENCE: &str = "CHTL-SEM-004";

pub const E_IMPORT_NOT_FOUND: &str = "CHTL-IMP-001";
pub const E_IMPORT_CYCLE: &str = "CHTL-IMP-002";
pub const E_IMPORT_READ: &str = "CHTL-IMP-003";
pub const E_IMPORT_CONFLICT: &str = "CHTL-IMP-004";
pub const E_IMPORT_UNSUPPORTED: &str = "CHTL-IMP-005";

pub const E_STATE_UNDERFLOW: &str = "CHTL-RT-001";
pub const E_SCOPE_UNDERFLOW: &str = "CHTL-RT-002";
pub const E_NAMESPACE_UNDERFLOW: &str = "CHTL-RT-003";
pub const E_IO: &str = "CHTL-RT-004";
pub const E_CONFIG: &str = "CHTL-RT-005";

/// Broad error category. Derived from the code prefix, never stored separately
/// from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Lexical,
    Syntax,
    Semantic,
    Import,
    Runtime,
}

impl ErrorKind {
    pub fn from_code(code: &str) -> Self {
        match code.split('-').nth(1) {
            Some("LEX") => ErrorKind::Lexical,
            Some("SYN") => ErrorKind::Syntax,
            Some("SEM") => ErrorKind::Semantic,
            Some("IMP") => ErrorKind::Import,
            _ => ErrorKind::Runtime,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Lexical => "LexicalError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Semantic => "SemanticError",
            ErrorKind::Import => "ImportError",
            ErrorKind::Runtime => "RuntimeError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HINTS
// ═══════════════════════════════════════════════════════════════════════════════

fn get_hint(code: &str) -> &'static str {
    match code {
        E_UNTERMINATED_STRING => "Every string literal must be closed with its opening quote.",
        E_UNTERMINATED_COMMENT => "Block comments must be closed with `*/`.",
        E_UNEXPECTED_CHAR => "Only elements, attributes and blocks may appear here.",
        E_UNBALANCED_CLOSE => "A `}` appeared with no matching `{`.",
        E_UNCLOSED_BLOCK => "Every `{` must be closed before the end of the file.",
        E_EXPECTED_TOKEN => "The construct is incomplete.",
        E_CSS_SYNTAX => "Stylesheet text must be a sequence of balanced rule blocks.",
        E_JS_SYNTAX => "Script text must parse as JavaScript after lowering.",
        E_UNSUPPORTED_DECLARATION => {
            "Template, custom and configuration declarations are expanded by their own engines."
        }
        E_UNSUPPORTED_EXTENSION => "This script-extension construct has no built-in lowering.",
        E_MISSING_TARGET => "Event helpers need a selector or identifier to bind to.",
        E_UNRESOLVED_REFERENCE => "`&` needs the enclosing element to carry a class or id.",
        E_IMPORT_NOT_FOUND => "Import paths resolve against the importing file, then module directories.",
        E_IMPORT_CYCLE => "A file may not import itself, directly or transitively.",
        E_IMPORT_READ => "Imported files must be readable UTF-8 text.",
        E_IMPORT_CONFLICT => "A file may only be imported under one kind.",
        E_IMPORT_UNSUPPORTED => "Module archives are loaded by the module manager.",
        E_STATE_UNDERFLOW => "The top-level parse state can never be exited.",
        E_SCOPE_UNDERFLOW => "The global scope can never be popped.",
        E_NAMESPACE_UNDERFLOW => "Namespace exits must pair with namespace entries.",
        E_IO => "The source file must be readable UTF-8 text.",
        E_CONFIG => "Compile options must be a JSON object.",
        _ => "",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
#[error("{error_type} [{code}]: {message} ({file}:{line}:{column})")]
pub struct CompilerError {
    pub code: String,
    pub error_type: String,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub context: Option<String>,
    pub hints: Vec<String>,
}

impl CompilerError {
    pub fn new(code: &str, message: &str, file: &str, line: u32, column: u32) -> Self {
        Self::with_details(code, message, file, line, column, None, vec![])
    }

    pub fn with_details(
        code: &str,
        message: &str,
        file: &str,
        line: u32,
        column: u32,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        let mut all_hints = hints;
        let hint = get_hint(code);
        if !hint.is_empty() {
            all_hints.push(hint.to_string());
        }
        CompilerError {
            code: code.to_string(),
            error_type: ErrorKind::from_code(code).as_str().to_string(),
            message: message.to_string(),
            file: file.to_string(),
            line,
            column,
            context,
            hints: all_hints,
        }
    }

    /// Error with no location yet; the dispatcher fills it in.
    pub fn unlocated(code: &str, message: &str) -> Self {
        Self::new(code, message, "", 0, 0)
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(&self.code)
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Re-base a location reported relative to an embedded text onto the
    /// enclosing file. Line 0 means "unknown" and picks up the origin itself.
    pub fn located_at(mut self, file: &str, line: u32, column: u32) -> Self {
        if self.file.is_empty() {
            self.file = file.to_string();
        }
        if self.line == 0 {
            self.line = line;
            self.column = column;
        } else {
            if self.line == 1 {
                self.column += column.saturating_sub(1);
            }
            self.line += line.saturating_sub(1);
        }
        self
    }
}

pub type CompileResult<T> = Result<T, CompilerError>;
