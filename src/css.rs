//! Built-in stylesheet compiler.
//!
//! Checks block structure (balanced braces, closed strings and comments,
//! a selector in front of every top-level block) and optionally minifies.
//! Property values are passed through untouched.

use crate::backend::SourceCompiler;
use crate::config::CompileOptions;
use crate::error::{CompileResult, CompilerError, E_CSS_SYNTAX};

#[derive(Debug, Clone, Copy, Default)]
pub struct CssCompiler;

impl CssCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl SourceCompiler for CssCompiler {
    fn name(&self) -> &'static str {
        "css"
    }

    fn compile(&self, text: &str, options: &CompileOptions) -> CompileResult<String> {
        validate_css(text)?;
        if options.minify {
            Ok(minify_css(text))
        } else {
            Ok(text.trim().to_string())
        }
    }
}

/// Structural check of a stylesheet. Positions are relative to `text`.
pub fn validate_css(text: &str) -> CompileResult<()> {
    let masked = mask_css(text)?;
    // Line and column of every open `{`, innermost last.
    let mut open: Vec<(u32, u32)> = Vec::new();
    let mut segment_has_text = false;
    let (mut line, mut column) = (1u32, 1u32);
    for ch in masked.chars() {
        match ch {
            '{' => {
                if open.is_empty() && !segment_has_text {
                    return Err(css_error("Rule block has no selector", line, column));
                }
                open.push((line, column));
                segment_has_text = false;
            }
            '}' => {
                if open.pop().is_none() {
                    return Err(css_error("Unexpected '}' with no open block", line, column));
                }
                segment_has_text = false;
            }
            ';' if open.is_empty() => segment_has_text = false,
            c if !c.is_whitespace() => segment_has_text = true,
            _ => {}
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    if let Some(&(line, column)) = open.last() {
        return Err(css_error(
            &format!("{} block(s) left open at end of input", open.len()),
            line,
            column,
        ));
    }
    Ok(())
}

fn css_error(message: &str, line: u32, column: u32) -> CompilerError {
    CompilerError::new(E_CSS_SYNTAX, message, "", line, column)
}

/// Blank out `/* */` comments and quoted string interiors, keeping byte
/// offsets and newlines. Stylesheets have no line comments, so `//` inside an
/// unquoted `url(...)` is ordinary text.
fn mask_css(text: &str) -> CompileResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let (mut line, mut column) = (1u32, 1u32);

    while let Some(ch) = chars.next() {
        let (start_line, start_column) = (line, column);
        advance(&mut line, &mut column, ch);
        match ch {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                advance(&mut line, &mut column, '*');
                out.push_str("  ");
                let mut prev = '\0';
                let mut closed = false;
                for c in chars.by_ref() {
                    advance(&mut line, &mut column, c);
                    blank(&mut out, c);
                    if prev == '*' && c == '/' {
                        closed = true;
                        break;
                    }
                    prev = c;
                }
                if !closed {
                    return Err(css_error("Unterminated comment", start_line, start_column));
                }
            }
            '"' | '\'' => {
                out.push(ch);
                let mut escaped = false;
                let mut closed = false;
                for c in chars.by_ref() {
                    advance(&mut line, &mut column, c);
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == ch {
                        out.push(c);
                        closed = true;
                        break;
                    }
                    blank(&mut out, c);
                }
                if !closed {
                    return Err(css_error("Unterminated string", start_line, start_column));
                }
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn advance(line: &mut u32, column: &mut u32, ch: char) {
    if ch == '\n' {
        *line += 1;
        *column = 1;
    } else {
        *column += 1;
    }
}

fn blank(out: &mut String, c: char) {
    if c == '\n' {
        out.push('\n');
    } else {
        out.extend(std::iter::repeat(' ').take(c.len_utf8()));
    }
}

/// Drop comments and collapse whitespace. String contents are kept verbatim.
pub fn minify_css(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut pending_space = false;

    while let Some(ch) = chars.next() {
        match ch {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                pending_space = true;
            }
            '"' | '\'' => {
                flush_space(&mut out, &mut pending_space, ch);
                out.push(ch);
                let mut escaped = false;
                for c in chars.by_ref() {
                    out.push(c);
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == ch {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => pending_space = true,
            '}' => {
                pending_space = false;
                if out.ends_with(';') {
                    out.pop();
                }
                out.push('}');
            }
            c => {
                flush_space(&mut out, &mut pending_space, c);
                out.push(c);
            }
        }
    }

    out.trim().to_string()
}

fn flush_space(out: &mut String, pending: &mut bool, next: char) {
    if *pending {
        let tight_before = matches!(next, '{' | '}' | ';' | ',' | '>' | ':');
        let tight_after = out.is_empty()
            || out.ends_with(|c: char| matches!(c, '{' | '}' | ';' | ',' | '>' | ':'));
        if !tight_before && !tight_after {
            out.push(' ');
        } else if next == ':' && !out.ends_with(|c: char| matches!(c, '{' | ';')) {
            // `a :hover` differs from `a:hover` inside selectors.
            let in_block = out.rfind('{').map_or(false, |open| {
                out.rfind('}').map_or(true, |close| open > close)
            });
            if !in_block && !out.is_empty() {
                out.push(' ');
            }
        }
    }
    *pending = false;
}
