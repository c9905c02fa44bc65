//! Host Language Lowering
//!
//! A recursive-descent compiler for the core of the host language. It turns
//! element trees into HTML, pulls local `style` and `script` blocks out into
//! the stylesheet and script streams, and drives the compile context's scope
//! and parse-state stacks while doing so.
//!
//! Supported:
//! - `tag { ... }` elements, `name: value;` / `name = value;` attributes
//! - `text { "..." }` blocks and `text: "...";`
//! - local `style { }` (inline properties, `.class` / `#id` / `&` rules,
//!   automatic class and id) and local `script { }`
//! - `use html5;`, `use @Config name;`
//! - `[Namespace]`, `[Origin]` (anonymous, named, and named references)
//! - `--` generator comments, emitted as HTML comments
//!
//! `[Import]` statements are skipped here; the dispatcher resolves them.
//! Templates, customs and configuration blocks are reported as unsupported.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

use crate::backend::{HostCompiler, UnitOutput};
use crate::context::CompileContext;
use crate::error::{
    CompileResult, CompilerError, E_EXPECTED_TOKEN, E_UNBALANCED_CLOSE, E_UNCLOSED_BLOCK,
    E_UNEXPECTED_CHAR, E_UNRESOLVED_REFERENCE, E_UNSUPPORTED_DECLARATION,
    E_UNTERMINATED_COMMENT, E_UNTERMINATED_STRING,
};
use crate::fragment::Fragment;
use crate::javascript::line_column;
use crate::scanner::{find_balanced_brace_end, mask_literals};
use crate::script_ext::lower_checked;
use crate::state::ParseState;

// ═══════════════════════════════════════════════════════════════════════════════
// TABLES
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref VOID_ELEMENTS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        for tag in [
            "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta",
            "source", "track", "wbr",
        ] {
            s.insert(tag);
        }
        s
    };

    static ref SCRIPT_CLASS_RE: Regex = Regex::new(r"\{\{\s*\.([A-Za-z_][\w\-]*)").unwrap();
    static ref SCRIPT_ID_RE: Regex = Regex::new(r"\{\{\s*#([A-Za-z_][\w\-]*)").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default)]
pub struct HostLanguageCompiler;

impl HostLanguageCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl HostCompiler for HostLanguageCompiler {
    fn compile(&self, fragment: &Fragment, ctx: &mut CompileContext) -> CompileResult<UnitOutput> {
        let mut parser = HostParser::new(&fragment.content);
        let mut out = UnitOutput::default();
        let mut parts = ElementParts::default();

        parser.parse_items(ctx, &mut parts, &mut out, None)?;
        if !parser.at_end() {
            return Err(parser.error(E_UNBALANCED_CLOSE, "Unexpected '}' at top level"));
        }

        out.body = parts.children;
        Ok(out)
    }
}

/// What an element body collected before the element itself is emitted.
#[derive(Debug, Default)]
struct ElementParts {
    attributes: Vec<(String, String)>,
    children: String,
    /// Raw local style blocks with the byte offset of their contents.
    styles: Vec<(usize, String)>,
    scripts: Vec<(usize, String)>,
}

#[derive(Debug)]
struct StyleRule {
    selector: String,
    body: String,
    offset: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════════

struct HostParser<'a> {
    src: &'a str,
    pos: usize,
    /// Open element and namespace braces at the cursor.
    depth: usize,
}

impl<'a> HostParser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, depth: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn error_at(&self, offset: usize, code: &str, message: &str) -> CompilerError {
        let (line, column) = line_column(self.src, offset);
        CompilerError::new(code, message, "", line, column)
    }

    fn error(&self, code: &str, message: &str) -> CompilerError {
        self.error_at(self.pos, code, message)
    }

    /// Move an error reported relative to an embedded block at `offset`.
    fn rebase(&self, err: CompilerError, offset: usize) -> CompilerError {
        let (line, column) = line_column(self.src, offset);
        err.located_at("", line, column)
    }

    fn skip_trivia(&mut self) -> CompileResult<()> {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();

            if trimmed.starts_with("//") {
                self.pos += trimmed.find('\n').unwrap_or(trimmed.len());
            } else if trimmed.starts_with("/*") {
                match trimmed[2..].find("*/") {
                    Some(end) => self.pos += end + 4,
                    None => {
                        return Err(self.error(E_UNTERMINATED_COMMENT, "Unterminated block comment"))
                    }
                }
            } else {
                return Ok(());
            }
        }
    }

    fn at_generator_comment(&self) -> bool {
        let rest = self.rest();
        rest.starts_with("--") && rest[2..].chars().next().map_or(true, char::is_whitespace)
    }

    fn read_generator_comment(&mut self) -> &'a str {
        let rest = &self.rest()[2..];
        let len = rest.find('\n').unwrap_or(rest.len());
        self.pos += 2 + len;
        rest[..len].trim()
    }

    fn read_ident(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if c.is_alphabetic() || c == '_' => {}
            _ => return None,
        }
        let len = chars
            .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '-'))
            .map_or(rest.len(), |(i, _)| i);
        self.pos += len;
        Some(&rest[..len])
    }

    fn expect(&mut self, ch: char) -> CompileResult<()> {
        self.skip_trivia()?;
        if self.eat(ch) {
            Ok(())
        } else {
            Err(self.error(E_EXPECTED_TOKEN, &format!("Expected '{}'", ch)))
        }
    }

    fn read_string(&mut self) -> CompileResult<String> {
        let start = self.pos;
        let delim = match self.bump() {
            Some(c) => c,
            None => return Err(self.error(E_EXPECTED_TOKEN, "Expected string literal")),
        };
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c) => value.push(c),
                    None => break,
                },
                Some(c) if c == delim => return Ok(value),
                Some(c) => value.push(c),
                None => break,
            }
        }
        Err(self.error_at(start, E_UNTERMINATED_STRING, "Unterminated string literal"))
    }

    /// A quoted string, or unquoted text up to `;`, `}` or end of line.
    fn read_value(&mut self) -> CompileResult<String> {
        self.skip_trivia()?;
        if matches!(self.peek(), Some('"') | Some('\'')) {
            return self.read_string();
        }
        let rest = self.rest();
        let len = rest.find([';', '}', '\n']).unwrap_or(rest.len());
        self.pos += len;
        let value = rest[..len].trim();
        if value.is_empty() {
            return Err(self.error(E_EXPECTED_TOKEN, "Expected a value"));
        }
        Ok(value.to_string())
    }

    /// The brace block at the cursor. Returns the contents and their offset.
    fn raw_block(&mut self) -> CompileResult<(usize, &'a str)> {
        let open = self.pos;
        if self.peek() != Some('{') {
            return Err(self.error(E_EXPECTED_TOKEN, "Expected '{'"));
        }
        let end = find_balanced_brace_end(self.src, open)
            .ok_or_else(|| self.error_at(open, E_UNCLOSED_BLOCK, "Block is never closed"))?;
        self.pos = end;
        Ok((open + 1, &self.src[open + 1..end - 1]))
    }

    fn skip_statement(&mut self) {
        let rest = self.rest();
        self.pos += match rest.find([';', '\n']) {
            Some(i) if rest.as_bytes()[i] == b';' => i + 1,
            Some(i) => i,
            None => rest.len(),
        };
    }

    // ─── Items ─────────────────────────────────────────────────────────────

    fn parse_items(
        &mut self,
        ctx: &mut CompileContext,
        parts: &mut ElementParts,
        out: &mut UnitOutput,
        element: Option<&str>,
    ) -> CompileResult<()> {
        loop {
            self.skip_trivia()?;
            if self.at_end() || self.peek() == Some('}') {
                return Ok(());
            }

            if self.at_generator_comment() {
                let text = self.read_generator_comment();
                parts.children.push_str(&format!("<!-- {} -->", text.replace("--", "- -")));
                continue;
            }

            match self.peek() {
                Some('[') => self.parse_declaration(ctx, parts, out, element)?,
                Some('@') => {
                    return Err(self.error(
                        E_UNSUPPORTED_DECLARATION,
                        "Template and custom usages are not supported by the built-in compiler",
                    ))
                }
                Some(';') => {
                    self.bump();
                }
                Some(c) if c.is_alphabetic() || c == '_' => {
                    self.parse_named_item(ctx, parts, out, element)?
                }
                Some(c) => {
                    return Err(self.error(E_UNEXPECTED_CHAR, &format!("Unexpected character '{}'", c)))
                }
                None => return Ok(()),
            }
        }
    }

    fn parse_named_item(
        &mut self,
        ctx: &mut CompileContext,
        parts: &mut ElementParts,
        out: &mut UnitOutput,
        element: Option<&str>,
    ) -> CompileResult<()> {
        let start = self.pos;
        let name = match self.read_ident() {
            Some(name) => name,
            None => return Err(self.error(E_EXPECTED_TOKEN, "Expected a name")),
        };
        self.skip_trivia()?;

        match (name, self.peek()) {
            ("use", _) => self.parse_use(ctx),
            ("text", Some('{')) => {
                let text = ctx.in_state(ParseState::InText, "text", |_| self.text_block())?;
                parts.children.push_str(&escape_text(&text));
                Ok(())
            }
            ("style", Some('{')) => {
                let (offset, raw) = self.raw_block()?;
                if element.is_some() {
                    parts.styles.push((offset, raw.to_string()));
                } else {
                    out.push_css(raw);
                }
                Ok(())
            }
            ("script", Some('{')) => {
                let (offset, raw) = self.raw_block()?;
                if element.is_some() {
                    parts.scripts.push((offset, raw.to_string()));
                } else {
                    let lowered = ctx
                        .in_state(ParseState::InLocalScript, "script", |ctx| lower_checked(raw, ctx))
                        .map_err(|e| self.rebase(e, offset))?;
                    out.push_js(&lowered.code);
                    out.helpers.extend(lowered.helpers);
                }
                Ok(())
            }
            (_, Some('{')) => {
                let markup = self.parse_element(name, start, ctx, out)?;
                parts.children.push_str(&markup);
                Ok(())
            }
            (_, Some(':')) | (_, Some('=')) => {
                if element.is_none() {
                    return Err(self.error_at(
                        start,
                        E_UNEXPECTED_CHAR,
                        &format!("Attribute '{}' outside of an element", name),
                    ));
                }
                self.bump();
                let value = ctx.in_state(ParseState::InAttribute, name, |_| self.read_value())?;
                self.skip_trivia()?;
                self.eat(';');
                if name == "text" {
                    parts.children.push_str(&escape_text(&value));
                } else {
                    parts.attributes.push((name.to_string(), value));
                }
                Ok(())
            }
            _ => Err(self.error(
                E_EXPECTED_TOKEN,
                &format!("Expected '{{', ':' or '=' after '{}'", name),
            )),
        }
    }

    fn parse_use(&mut self, ctx: &mut CompileContext) -> CompileResult<()> {
        if self.rest().starts_with("html5") {
            self.pos += "html5".len();
            ctx.options.use_html5 = true;
        } else if self.rest().starts_with("@Config") {
            self.skip_statement();
            return Ok(());
        } else {
            return Err(self.error(E_EXPECTED_TOKEN, "Expected 'html5' or '@Config' after 'use'"));
        }
        self.skip_trivia()?;
        self.eat(';');
        Ok(())
    }

    fn text_block(&mut self) -> CompileResult<String> {
        let (offset, raw) = self.raw_block()?;
        read_text_content(raw).map_err(|e| self.rebase(e, offset))
    }

    fn parse_declaration(
        &mut self,
        ctx: &mut CompileContext,
        parts: &mut ElementParts,
        out: &mut UnitOutput,
        element: Option<&str>,
    ) -> CompileResult<()> {
        let start = self.pos;
        let close = match self.rest().find(']') {
            Some(close) => close,
            None => return Err(self.error(E_EXPECTED_TOKEN, "Expected ']'")),
        };
        let keyword = &self.rest()[1..close];
        self.pos += close + 1;

        match keyword {
            "Import" => {
                ctx.in_state(ParseState::InImport, "import", |_| {
                    self.skip_statement();
                    Ok(())
                })
            }
            "Namespace" => self.parse_namespace(ctx, parts, out, element),
            "Origin" => self.parse_origin(start, ctx, parts, out),
            "Template" | "Custom" | "Configuration" | "Info" | "Export" => Err(self.error_at(
                start,
                E_UNSUPPORTED_DECLARATION,
                &format!("[{}] is not supported by the built-in compiler", keyword),
            )),
            other => Err(self.error_at(
                start,
                E_UNEXPECTED_CHAR,
                &format!("Unknown declaration [{}]", other),
            )),
        }
    }

    fn parse_namespace(
        &mut self,
        ctx: &mut CompileContext,
        parts: &mut ElementParts,
        out: &mut UnitOutput,
        element: Option<&str>,
    ) -> CompileResult<()> {
        self.skip_trivia()?;
        let name = match self.read_ident() {
            Some(name) => name,
            None => return Err(self.error(E_EXPECTED_TOKEN, "Expected namespace name")),
        };
        self.skip_trivia()?;

        ctx.enter_namespace(name);
        let result = ctx.in_state(ParseState::InNamespace, name, |ctx| {
            if self.eat('{') {
                self.depth += 1;
                let body = self.parse_items(ctx, parts, out, element);
                self.depth -= 1;
                body?;
                self.expect('}')
            } else {
                // Without a body the namespace runs to the end of the enclosing block.
                self.eat(';');
                self.parse_items(ctx, parts, out, element)
            }
        });
        let exited = ctx.exit_namespace();
        result?;
        exited.map(|_| ())
    }

    fn parse_origin(
        &mut self,
        start: usize,
        ctx: &mut CompileContext,
        parts: &mut ElementParts,
        out: &mut UnitOutput,
    ) -> CompileResult<()> {
        self.skip_trivia()?;
        if !self.eat('@') {
            return Err(self.error(E_EXPECTED_TOKEN, "Expected origin type such as @Html"));
        }
        let origin_type = match self.read_ident() {
            Some(t) => format!("@{}", t),
            None => return Err(self.error(E_EXPECTED_TOKEN, "Expected origin type such as @Html")),
        };
        self.skip_trivia()?;
        let name = self.read_ident();
        self.skip_trivia()?;

        let content = if self.peek() == Some('{') {
            let (_, raw) =
                ctx.in_state(ParseState::InOrigin, &origin_type, |_| self.raw_block())?;
            if let Some(name) = name {
                ctx.define_origin(&origin_type, name, raw);
            }
            raw.to_string()
        } else {
            self.eat(';');
            let name = match name {
                Some(name) => name,
                None => return Err(self.error(E_EXPECTED_TOKEN, "Expected origin body or name")),
            };
            match ctx.origin(&origin_type, name) {
                Some(raw) => raw.to_string(),
                None => {
                    return Err(self.error_at(
                        start,
                        E_UNRESOLVED_REFERENCE,
                        &format!("Undefined origin {} {}", origin_type, name),
                    ))
                }
            }
        };

        match origin_type.as_str() {
            "@Html" => parts.children.push_str(&content),
            "@Style" => out.push_css(&content),
            "@JavaScript" => out.push_js(&content),
            other => {
                return Err(self.error_at(
                    start,
                    E_UNSUPPORTED_DECLARATION,
                    &format!("Origin type {} has no output stream", other),
                ))
            }
        }
        Ok(())
    }

    // ─── Elements ──────────────────────────────────────────────────────────

    fn parse_element(
        &mut self,
        tag: &str,
        start: usize,
        ctx: &mut CompileContext,
        out: &mut UnitOutput,
    ) -> CompileResult<String> {
        let (line, column) = line_column(self.src, start);
        self.bump();

        self.depth += 1;
        let depth = self.depth;
        let markup = ctx.scoped(|ctx| {
            ctx.enter_state_at(ParseState::InElement, tag, line, column, depth);
            let result = self.parse_element_body(tag, start, ctx, out);
            let exited = ctx.exit_state();
            let markup = result?;
            exited?;
            Ok(markup)
        });
        self.depth -= 1;
        markup
    }

    fn parse_element_body(
        &mut self,
        tag: &str,
        start: usize,
        ctx: &mut CompileContext,
        out: &mut UnitOutput,
    ) -> CompileResult<String> {
        ctx.set_current_element(tag);
        let mut parts = ElementParts::default();
        self.parse_items(ctx, &mut parts, out, Some(tag))?;
        if !self.eat('}') {
            return Err(self.error_at(
                start,
                E_UNCLOSED_BLOCK,
                &format!("Element '{}' is never closed", tag),
            ));
        }
        self.finish_element(tag, parts, ctx, out)
    }

    fn finish_element(
        &self,
        tag: &str,
        parts: ElementParts,
        ctx: &mut CompileContext,
        out: &mut UnitOutput,
    ) -> CompileResult<String> {
        let mut attributes = parts.attributes;
        let mut declarations = Vec::new();
        let mut rules = Vec::new();

        for (offset, raw) in &parts.styles {
            let (decls, block_rules) = ctx.in_state(ParseState::InLocalStyle, "style", |_| {
                self.parse_style_block(*offset, raw)
            })?;
            declarations.extend(decls);
            rules.extend(block_rules);
        }

        // Automatic class and id
        if attribute(&attributes, "class").is_none() {
            let from_style = if ctx.options.disable_style_auto_add_class {
                None
            } else {
                rules.iter().find_map(|r| leading_name(&r.selector, '.'))
            };
            let from_script = if ctx.options.disable_script_auto_add_class {
                None
            } else {
                parts
                    .scripts
                    .iter()
                    .find_map(|(_, s)| SCRIPT_CLASS_RE.captures(s).map(|c| c[1].to_string()))
            };
            if let Some(class) = from_style.or(from_script) {
                attributes.push(("class".to_string(), class));
            }
        }
        if attribute(&attributes, "id").is_none() {
            let from_style = if ctx.options.disable_style_auto_add_id {
                None
            } else {
                rules.iter().find_map(|r| leading_name(&r.selector, '#'))
            };
            let from_script = if ctx.options.disable_script_auto_add_id {
                None
            } else {
                parts
                    .scripts
                    .iter()
                    .find_map(|(_, s)| SCRIPT_ID_RE.captures(s).map(|c| c[1].to_string()))
            };
            if let Some(id) = from_style.or(from_script) {
                attributes.push(("id".to_string(), id));
            }
        }

        let class = attribute(&attributes, "class")
            .and_then(|c| c.split_whitespace().next())
            .map(str::to_string);
        let id = attribute(&attributes, "id").map(str::to_string);
        if let Some(class) = &class {
            ctx.set_current_class(class);
        }
        if let Some(id) = &id {
            ctx.set_current_id(id);
        }
        let reference = class
            .as_ref()
            .map(|c| format!(".{}", c))
            .or_else(|| id.as_ref().map(|i| format!("#{}", i)));

        for rule in &rules {
            let selector = if rule.selector.contains('&') {
                match &reference {
                    Some(r) => rule.selector.replace('&', r),
                    None => {
                        return Err(self.error_at(
                            rule.offset,
                            E_UNRESOLVED_REFERENCE,
                            &format!("'&' in <{}> style needs a class or id on the element", tag),
                        ))
                    }
                }
            } else {
                rule.selector.clone()
            };
            out.push_css(&format!("{} {{ {} }}", selector, rule.body.trim()));
        }

        if !declarations.is_empty() {
            let mut inline: Vec<String> = Vec::new();
            for (property, value) in &declarations {
                ctx.set_style(property, value);
                inline.push(format!("{}: {};", property, value));
            }
            let inline = inline.join(" ");
            match attributes.iter_mut().find(|(k, _)| k == "style") {
                Some((_, existing)) => {
                    let trimmed = existing.trim_end().trim_end_matches(';').to_string();
                    *existing = format!("{}; {}", trimmed, inline);
                }
                None => attributes.push(("style".to_string(), inline)),
            }
        }

        for (offset, raw) in &parts.scripts {
            let lowered = ctx
                .in_state(ParseState::InLocalScript, "script", |ctx| lower_checked(raw, ctx))
                .map_err(|e| self.rebase(e, *offset))?;
            out.push_js(&lowered.code);
            out.helpers.extend(lowered.helpers);
        }

        let mut markup = format!("<{}", tag);
        for (key, value) in &attributes {
            markup.push_str(&format!(" {}=\"{}\"", key, escape_attr(value)));
        }
        markup.push('>');
        markup.push_str(&parts.children);
        if !VOID_ELEMENTS.contains(tag.to_ascii_lowercase().as_str()) {
            markup.push_str(&format!("</{}>", tag));
        }
        Ok(markup)
    }

    /// Split a local style block into inline declarations and nested rules.
    /// `offset` is where `raw` starts in the fragment.
    fn parse_style_block(
        &self,
        offset: usize,
        raw: &str,
    ) -> CompileResult<(Vec<(String, String)>, Vec<StyleRule>)> {
        let text = strip_comments(raw);
        let masked = mask_literals(&text);
        let mut declarations = Vec::new();
        let mut rules = Vec::new();
        let mut i = 0;

        while i < text.len() {
            let segment = &masked[i..];
            match segment.find([';', '{']) {
                Some(rel) if segment.as_bytes()[rel] == b'{' => {
                    let open = i + rel;
                    let selector = text[i..open].trim();
                    let lead = text[i..open].len() - text[i..open].trim_start().len();
                    let end = find_balanced_brace_end(&text, open).ok_or_else(|| {
                        self.error_at(offset + open, E_UNCLOSED_BLOCK, "Style rule is never closed")
                    })?;
                    if selector.is_empty() {
                        return Err(self.error_at(
                            offset + open,
                            E_EXPECTED_TOKEN,
                            "Style rule has no selector",
                        ));
                    }
                    rules.push(StyleRule {
                        selector: selector.to_string(),
                        body: text[open + 1..end - 1].to_string(),
                        offset: offset + i + lead,
                    });
                    i = end;
                }
                found => {
                    let stop = found.map_or(text.len(), |rel| i + rel);
                    let item = &text[i..stop];
                    let lead = item.len() - item.trim_start().len();
                    if !item.trim().is_empty() {
                        declarations.push(self.style_declaration(item.trim(), offset + i + lead)?);
                    }
                    i = stop + 1;
                }
            }
        }

        Ok((declarations, rules))
    }

    fn style_declaration(&self, item: &str, at: usize) -> CompileResult<(String, String)> {
        if item.starts_with('@') {
            return Err(self.error_at(
                at,
                E_UNSUPPORTED_DECLARATION,
                "Style template usages are not supported by the built-in compiler",
            ));
        }
        let split = item.find([':', '=']).ok_or_else(|| {
            self.error_at(at, E_EXPECTED_TOKEN, "Expected 'property: value'")
        })?;
        let property = item[..split].trim();
        let value = unquote(item[split + 1..].trim());
        if property.is_empty() || value.is_empty() {
            return Err(self.error_at(at, E_EXPECTED_TOKEN, "Expected 'property: value'"));
        }
        Ok((property.to_string(), value.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Concatenated content of a `text { }` block: string literals unescaped,
/// unquoted runs trimmed.
fn read_text_content(raw: &str) -> CompileResult<String> {
    let mut inner = HostParser::new(raw);
    let mut text = String::new();
    loop {
        inner.skip_trivia()?;
        match inner.peek() {
            None => break,
            Some('"') | Some('\'') => text.push_str(&inner.read_string()?),
            Some(_) => {
                let rest = inner.rest();
                let stop = rest.find(['"', '\'']).unwrap_or(rest.len());
                text.push_str(rest[..stop].trim_end());
                inner.pos += stop;
            }
        }
    }
    Ok(text)
}

fn attribute<'v>(attributes: &'v [(String, String)], key: &str) -> Option<&'v str> {
    attributes
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// `box` for a selector such as `.box:hover` when `prefix` is `.`.
fn leading_name(selector: &str, prefix: char) -> Option<String> {
    let rest = selector.trim().strip_prefix(prefix)?;
    let len = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(rest.len());
    if len == 0 {
        None
    } else {
        Some(rest[..len].to_string())
    }
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 && (bytes[0] == b'"' || bytes[0] == b'\'') && bytes[bytes.len() - 1] == bytes[0] {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Replace comments with spaces, keeping byte offsets. Strings are kept.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match (ch, chars.peek().copied()) {
            ('"', _) | ('\'', _) => {
                quote = Some(ch);
                out.push(ch);
            }
            ('/', Some('/')) => {
                out.push(' ');
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                    blank(&mut out, c);
                }
            }
            ('/', Some('*')) => {
                chars.next();
                out.push_str("  ");
                let mut prev = '\0';
                for c in chars.by_ref() {
                    blank(&mut out, c);
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

fn blank(out: &mut String, c: char) {
    if c == '\n' {
        out.push('\n');
    } else {
        for _ in 0..c.len_utf8() {
            out.push(' ');
        }
    }
}

pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attr(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use crate::error::{ErrorKind, E_JS_SYNTAX};
    use crate::fragment::FragmentKind;

    fn fragment(content: &str) -> Fragment {
        Fragment {
            kind: FragmentKind::HostLanguage,
            content: content.to_string(),
            start_line: 1,
            start_column: 1,
            end_line: 1,
            end_column: 1,
            source_path: "page.chtl".to_string(),
        }
    }

    fn compile_with(source: &str, ctx: &mut CompileContext) -> CompileResult<UnitOutput> {
        HostLanguageCompiler::new().compile(&fragment(source), ctx)
    }

    fn compile(source: &str) -> UnitOutput {
        compile_with(source, &mut CompileContext::default()).unwrap()
    }

    #[test]
    fn test_elements_attributes_and_text() {
        let out = compile("div { id: main; class = \"a b\"; text { \"hi\" } span { text: 'x < y'; } }");
        assert_eq!(
            out.body,
            "<div id=\"main\" class=\"a b\">hi<span>x &lt; y</span></div>"
        );
    }

    #[test]
    fn test_local_style_splits_inline_and_rules() {
        let out = compile("div { style { color: red; .box { margin: 0; } &:hover { color: blue; } } }");
        assert_eq!(out.body, "<div class=\"box\" style=\"color: red;\"></div>");
        assert_eq!(out.css, ".box { margin: 0; }\n.box:hover { color: blue; }\n");
    }

    #[test]
    fn test_auto_class_can_be_disabled() {
        let mut ctx = CompileContext::new(CompileOptions {
            disable_style_auto_add_class: true,
            ..CompileOptions::default()
        });
        let out = compile_with("div { id: x; style { .box { margin: 0; } &:hover { color: blue; } } }", &mut ctx)
            .unwrap();
        assert_eq!(out.body, "<div id=\"x\"></div>");
        assert!(out.css.contains("#x:hover"));
    }

    #[test]
    fn test_ampersand_without_class_or_id_is_error() {
        let mut ctx = CompileContext::new(CompileOptions {
            disable_style_auto_add_class: true,
            disable_style_auto_add_id: true,
            ..CompileOptions::default()
        });
        let err = compile_with("p {\n  style { &:hover { color: red; } }\n}", &mut ctx).unwrap_err();
        assert_eq!(err.code, E_UNRESOLVED_REFERENCE);
        assert_eq!((err.line, err.column), (2, 11));
    }

    #[test]
    fn test_script_auto_id_is_opt_in() {
        let out = compile("button { script { {{#go}}->listen { click: run }; } }");
        assert_eq!(out.body, "<button></button>");

        let mut ctx = CompileContext::new(CompileOptions {
            disable_script_auto_add_id: false,
            ..CompileOptions::default()
        });
        let out = compile_with("button { script { {{#go}}->listen { click: run }; } }", &mut ctx).unwrap();
        assert_eq!(out.body, "<button id=\"go\"></button>");
        assert!(out.js.contains("__chtlListen(document.querySelector('#go'), { click: run });"));
        assert_eq!(out.helpers.len(), 1);
    }

    #[test]
    fn test_void_elements_have_no_closing_tag() {
        let out = compile("img { src: \"a.png\"; } br {}");
        assert_eq!(out.body, "<img src=\"a.png\"><br>");
    }

    #[test]
    fn test_generator_comments_become_html_comments() {
        let out = compile("-- page header\ndiv {}\n// dropped\n/* dropped */");
        assert_eq!(out.body, "<!-- page header --><div></div>");
    }

    #[test]
    fn test_use_html5_sets_option() {
        let mut ctx = CompileContext::default();
        compile_with("use html5;\nhtml { }", &mut ctx).unwrap();
        assert!(ctx.options.use_html5);
    }

    #[test]
    fn test_origin_blocks_route_to_streams() {
        let out = compile(
            "[Origin] @Html banner { <b>raw</b> }\n[Origin] @Style { .x { color: red; } }\n[Origin] @JavaScript { go(); }\n[Origin] @Html banner;",
        );
        assert_eq!(out.body, " <b>raw</b>  <b>raw</b> ");
        assert_eq!(out.css, ".x { color: red; }\n");
        assert_eq!(out.js, "go();\n");
    }

    #[test]
    fn test_undefined_origin_reference_fails() {
        let err = compile_with("[Origin] @Html nope;", &mut CompileContext::default()).unwrap_err();
        assert_eq!(err.code, E_UNRESOLVED_REFERENCE);
    }

    #[test]
    fn test_namespace_is_entered_and_left() {
        let mut ctx = CompileContext::default();
        let out = compile_with("[Namespace] ui { div { } }", &mut ctx).unwrap();
        assert_eq!(out.body, "<div></div>");
        assert_eq!(ctx.namespace_depth(), 0);
    }

    #[test]
    fn test_imports_are_skipped() {
        let out = compile("[Import] @Chtl from \"header\";\ndiv {}");
        assert_eq!(out.body, "<div></div>");
    }

    #[test]
    fn test_templates_are_unsupported() {
        let err = compile_with("[Template] @Style Base { color: red; }", &mut CompileContext::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Semantic);
        assert_eq!((err.line, err.column), (1, 1));
    }

    #[test]
    fn test_state_and_scope_return_to_top_level() {
        let mut ctx = CompileContext::default();
        compile_with("div { span { style { color: red; } } }", &mut ctx).unwrap();
        assert_eq!(ctx.scope_depth(), 1);
        assert_eq!(ctx.states().depth(), 1);

        let _ = compile_with("div { span { [Custom] @Element X {} } }", &mut ctx);
        assert_eq!(ctx.scope_depth(), 1);
        assert_eq!(ctx.current_state(), ParseState::TopLevel);
    }

    #[test]
    fn test_error_positions_are_relative_to_fragment() {
        let err = compile_with("div {\n  span { ! }\n}", &mut CompileContext::default()).unwrap_err();
        assert_eq!(err.code, E_UNEXPECTED_CHAR);
        assert_eq!((err.line, err.column), (2, 10));
    }

    #[test]
    fn test_attribute_at_top_level_is_error() {
        let err = compile_with("id: x;", &mut CompileContext::default()).unwrap_err();
        assert_eq!(err.code, E_UNEXPECTED_CHAR);
    }

    #[test]
    fn test_top_level_style_and_script_blocks() {
        let out = compile("style { body { margin: 0; } }\nscript { let a = 1; }");
        assert_eq!(out.css, "body { margin: 0; }\n");
        assert_eq!(out.js, "let a = 1;\n");
    }

    #[test]
    fn test_script_syntax_error_after_listen_points_at_statement() {
        let src = "div {\n  script {\n    {{.a}}->listen { click: go };\n    const = 1;\n  }\n}";
        let err = compile_with(src, &mut CompileContext::default()).unwrap_err();
        assert_eq!(err.code, E_JS_SYNTAX);
        assert_eq!(err.line, 4);
        assert!((5..=12).contains(&err.column), "column {}", err.column);
    }

    #[test]
    fn test_top_level_script_is_checked_after_lowering() {
        let src = "script {\n  {{.a}} &-> click {\n    go(;\n  }\n}";
        let err = compile_with(src, &mut CompileContext::default()).unwrap_err();
        assert_eq!(err.code, E_JS_SYNTAX);
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_strip_comments_keeps_offsets() {
        let text = "a /* b */ c // d\n\"// e\"";
        let stripped = strip_comments(text);
        assert_eq!(stripped.len(), text.len());
        assert_eq!(stripped, "a         c     \n\"// e\"");
    }
}
