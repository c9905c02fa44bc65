//! # Document Assembly
//!
//! Turns the three accumulated output streams into one HTML document.
//!
//! ## Key Invariants
//!
//! 1. **Single Document**: exactly one `<html>` root in the result. A body that
//!    already has one is completed in place, otherwise it is wrapped.
//! 2. **Stream Order**: styles land in `<head>`, scripts at the end of `<body>`,
//!    runtime helpers ahead of user script.
//! 3. **Doctype**: `<!DOCTYPE html>` is emitted iff HTML5 output is on and the
//!    body does not already carry one.

use lazy_static::lazy_static;
use regex::Regex;

use crate::backend::UnitOutput;
use crate::config::CompileOptions;

lazy_static! {
    static ref HTML_OPEN_RE: Regex = Regex::new(r"(?i)<html[\s>]").unwrap();
    static ref HEAD_CLOSE_RE: Regex = Regex::new(r"(?i)</head\s*>").unwrap();
    static ref BODY_OPEN_RE: Regex = Regex::new(r"(?i)<body[\s>]").unwrap();
    static ref BODY_CLOSE_RE: Regex = Regex::new(r"(?i)</body\s*>").unwrap();
    static ref HTML_CLOSE_RE: Regex = Regex::new(r"(?i)</html\s*>").unwrap();
    static ref DOCTYPE_RE: Regex = Regex::new(r"(?i)^\s*<!doctype").unwrap();
}

fn style_block(output: &UnitOutput) -> String {
    if output.css.trim().is_empty() {
        return String::new();
    }
    format!("<style>\n{}\n</style>\n", output.css.trim_end())
}

fn script_block(output: &UnitOutput) -> String {
    let mut script = String::new();
    for helper in &output.helpers {
        script.push_str(helper);
        script.push('\n');
    }
    script.push_str(output.js.trim_end());
    if script.trim().is_empty() {
        return String::new();
    }
    format!("<script>\n{}\n</script>\n", script.trim_end())
}

/// Assemble the final document from compiled output.
pub fn assemble(output: &UnitOutput, options: &CompileOptions) -> String {
    let body = output.body.trim();
    let style = style_block(output);
    let script = script_block(output);
    let mut doc = String::new();

    if options.use_html5 && !DOCTYPE_RE.is_match(body) {
        doc.push_str("<!DOCTYPE html>\n");
    }

    if !HTML_OPEN_RE.is_match(body) {
        doc.push_str("<html>\n<head>\n<meta charset=\"UTF-8\">\n");
        if !output.head.trim().is_empty() {
            doc.push_str(output.head.trim());
            doc.push('\n');
        }
        doc.push_str(&style);
        doc.push_str("</head>\n<body>\n");
        if !body.is_empty() {
            doc.push_str(body);
            doc.push('\n');
        }
        doc.push_str(&script);
        doc.push_str("</body>\n</html>\n");
        return doc;
    }

    let mut html = body.to_string();

    let head_content = format!("{}{}", output.head.trim(), style);
    if !head_content.trim().is_empty() {
        html = if let Some(m) = HEAD_CLOSE_RE.find(&html) {
            insert_at(&html, m.start(), &head_content)
        } else if let Some(m) = BODY_OPEN_RE.find(&html) {
            insert_at(&html, m.start(), &format!("<head>\n{}</head>\n", head_content))
        } else {
            // Only `<html>` is present: open a head right after it.
            let after = HTML_OPEN_RE
                .find(&html)
                .and_then(|m| html[m.start()..].find('>').map(|i| m.start() + i + 1))
                .unwrap_or(0);
            insert_at(&html, after, &format!("\n<head>\n{}</head>\n", head_content))
        };
    }

    if !script.is_empty() {
        html = if let Some(m) = BODY_CLOSE_RE.find(&html) {
            insert_at(&html, m.start(), &script)
        } else if let Some(m) = HTML_CLOSE_RE.find(&html) {
            insert_at(&html, m.start(), &script)
        } else {
            format!("{}\n{}", html, script)
        };
    }

    doc.push_str(&html);
    if !doc.ends_with('\n') {
        doc.push('\n');
    }
    doc
}

fn insert_at(text: &str, at: usize, insert: &str) -> String {
    let mut out = String::with_capacity(text.len() + insert.len());
    out.push_str(&text[..at]);
    out.push_str(insert);
    out.push_str(&text[at..]);
    out
}
