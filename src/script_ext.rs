//! Script Extension Lowering
//!
//! Rewrites the script dialect into plain JavaScript:
//!
//! - `{{.box}}`, `{{#id}}`, `{{div span}}` → `document.querySelector(...)`
//! - `{{li[2]}}` → `document.querySelectorAll('li')[2]`
//! - `{{box}}` → element by id, falling back to class (tag if `box` is an HTML tag)
//! - `{{&}}` → the enclosing element, or `this` outside one
//! - `T->listen {...}` / `T->delegate {...}` → runtime helper calls
//! - `animate {...}` → `__chtlAnimate({...})`
//! - `T &-> click { ... }` → `T.addEventListener('click', function (event) { ... })`
//! - `vir name = ...` → `const name = ...`
//! - any other `->` → `.`
//!
//! Rewriting only looks at code outside strings and comments. `iNeverAway`,
//! `util ... -> change` and `module { }` have no built-in lowering.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::ops::Range;

use crate::backend::{HostCompiler, UnitOutput};
use crate::context::CompileContext;
use crate::error::{
    CompileResult, CompilerError, E_MISSING_TARGET, E_UNCLOSED_BLOCK, E_UNSUPPORTED_EXTENSION,
};
use crate::fragment::Fragment;
use crate::javascript::{check_syntax, line_column};
use crate::scanner::{find_balanced_brace_end, mask_literals, HTML_ELEMENTS};
use crate::state::ParseState;

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

pub const LISTEN_HELPER: &str = "function __chtlListen(target, handlers) {\n  if (!target) return target;\n  for (const type in handlers) {\n    target.addEventListener(type, handlers[type]);\n  }\n  return target;\n}";

pub const DELEGATE_HELPER: &str = "function __chtlDelegate(parent, options) {\n  if (!parent) return parent;\n  const targets = [].concat(options.target || []);\n  for (const type in options) {\n    if (type === 'target') continue;\n    const handler = options[type];\n    parent.addEventListener(type, function (event) {\n      for (const t of targets) {\n        const hit = typeof t === 'string' ? event.target.closest(t) : (t && t.contains(event.target) ? t : null);\n        if (hit && parent.contains(hit)) {\n          handler.call(hit, event);\n          return;\n        }\n      }\n    });\n  }\n  return parent;\n}";

pub const ANIMATE_HELPER: &str = "function __chtlAnimate(options) {\n  const targets = [].concat(options.target || []).filter(Boolean);\n  const frames = [];\n  if (options.begin) frames.push(Object.assign({ offset: 0 }, options.begin));\n  (options.when || []).forEach(function (step) {\n    const frame = Object.assign({}, step);\n    frame.offset = step.at;\n    delete frame.at;\n    frames.push(frame);\n  });\n  if (options.end) frames.push(Object.assign({ offset: 1 }, options.end));\n  const timing = {\n    duration: options.duration || 0,\n    easing: options.easing || 'linear',\n    iterations: options.loop === -1 ? Infinity : (options.loop || 1),\n    direction: options.direction || 'normal',\n    delay: options.delay || 0\n  };\n  const animations = targets.map(function (el) { return el.animate(frames, timing); });\n  if (options.callback) {\n    Promise.all(animations.map(function (a) { return a.finished; })).then(options.callback);\n  }\n  return animations;\n}";

// ═══════════════════════════════════════════════════════════════════════════════
// PATTERNS
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref UNSUPPORTED_RE: Regex =
        Regex::new(r"\b(iNeverAway|module)\s*\{|\b(util)\s+[^;{}]*->\s*(?:change|then)\b").unwrap();

    /// `[target] &-> event[, event] {`
    static ref EVENT_BIND_RE: Regex = Regex::new(
        r"(\{\{[^{}]*\}\}|[A-Za-z_$][\w$.]*)?\s*&->\s*([A-Za-z][\w\-]*(?:\s*,\s*[A-Za-z][\w\-]*)*)\s*\{"
    )
    .unwrap();

    /// `target -> listen {` / `target -> delegate(`
    static ref HELPER_CALL_RE: Regex = Regex::new(
        r"(\{\{[^{}]*\}\}|[A-Za-z_$][\w$.]*)\s*->\s*(listen|delegate)\s*([\{(])"
    )
    .unwrap();

    static ref ANIMATE_RE: Regex = Regex::new(r"\banimate\s*([\{(])").unwrap();

    static ref VIR_RE: Regex = Regex::new(r"\bvir\s+([A-Za-z_$][\w$]*)\s*=").unwrap();

    static ref SELECTOR_RE: Regex = Regex::new(r"\{\{([^{}]*)\}\}").unwrap();

    static ref ARROW_RE: Regex = Regex::new(r"\s*->\s*").unwrap();

    static ref INDEXED_RE: Regex = Regex::new(r"^(.+?)\s*\[(\d+)\]$").unwrap();

    static ref BARE_NAME_RE: Regex = Regex::new(r"^[A-Za-z_][\w\-]*$").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOWERING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoweredScript {
    pub code: String,
    pub helpers: BTreeSet<String>,
}

/// Lower script-extension syntax in `text` to JavaScript. Error positions are
/// relative to `text`.
pub fn lower_script(text: &str, ctx: &mut CompileContext) -> CompileResult<LoweredScript> {
    let mut helpers = BTreeSet::new();

    let masked = mask_literals(text);
    if let Some(caps) = UNSUPPORTED_RE.captures(&masked) {
        let whole = caps.get(0).map_or(0, |m| m.start());
        let keyword = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str());
        let (line, column) = line_column(text, whole);
        return Err(CompilerError::new(
            E_UNSUPPORTED_EXTENSION,
            &format!("'{}' has no built-in lowering", keyword),
            "",
            line,
            column,
        ));
    }

    let code = rewrite(text, &EVENT_BIND_RE, |src, caps, end| {
        let target = match caps.get(1) {
            Some(m) => lower_target(&src[m.range()], ctx),
            None => match element_selector(ctx) {
                Some(selector) => selector,
                None => {
                    let (line, column) = line_column(src, caps.get(0).map_or(0, |m| m.start()));
                    return Err(CompilerError::new(
                        E_MISSING_TARGET,
                        "'&->' needs a target expression or an enclosing element with a class or id",
                        "",
                        line,
                        column,
                    ));
                }
            },
        };
        let body = block_at(src, end - 1)?;
        let handler = lower_nested(src, body.start + 1..body.end - 1, ctx, &mut helpers)?;
        let events: Vec<&str> = caps
            .get(2)
            .map_or("", |m| &src[m.range()])
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .collect();

        let mut lowered = String::new();
        for (i, event) in events.iter().enumerate() {
            if i > 0 {
                lowered.push(' ');
            }
            lowered.push_str(&format!(
                "{}.addEventListener('{}', function (event) {{{}}});",
                target, event, handler
            ));
        }
        let resume = skip_semicolon(src, body.end);
        Ok((lowered, resume))
    })?;

    let code = rewrite(&code, &HELPER_CALL_RE, |src, caps, end| {
        let target = caps.get(1).map_or("", |m| &src[m.range()]);
        let target = lower_target(target, ctx);
        let (helper, name) = match caps.get(2).map(|m| m.as_str()) {
            Some("delegate") => (DELEGATE_HELPER, "__chtlDelegate"),
            _ => (LISTEN_HELPER, "__chtlListen"),
        };
        helpers.insert(helper.to_string());
        if caps.get(3).map(|m| m.as_str()) == Some("{") {
            let body = block_at(src, end - 1)?;
            let inner = lower_nested(src, body.start + 1..body.end - 1, ctx, &mut helpers)?;
            Ok((format!("{}({}, {{{}}})", name, target, inner), body.end))
        } else {
            Ok((format!("{}({}, ", name, target), end))
        }
    })?;

    let code = rewrite(&code, &ANIMATE_RE, |src, caps, end| {
        helpers.insert(ANIMATE_HELPER.to_string());
        if caps.get(1).map(|m| m.as_str()) == Some("{") {
            let body = block_at(src, end - 1)?;
            let inner = lower_nested(src, body.start + 1..body.end - 1, ctx, &mut helpers)?;
            Ok((format!("__chtlAnimate({{{}}})", inner), body.end))
        } else {
            Ok(("__chtlAnimate(".to_string(), end))
        }
    })?;

    let code = rewrite(&code, &VIR_RE, |src, caps, end| {
        let name = caps.get(1).map_or("", |m| &src[m.range()]);
        ctx.set_variable(name, "vir");
        Ok((format!("const {} =", name), end))
    })?;

    let code = rewrite(&code, &SELECTOR_RE, |src, caps, end| {
        let selector = caps.get(1).map_or("", |m| &src[m.range()]);
        Ok((lower_selector(selector, ctx), end))
    })?;

    let code = rewrite(&code, &ARROW_RE, |_, _, end| Ok((".".to_string(), end)))?;

    Ok(LoweredScript { code, helpers })
}

/// Lower `text` and parse the result. Syntax errors in the lowered code are
/// mapped back onto `text`.
pub fn lower_checked(text: &str, ctx: &mut CompileContext) -> CompileResult<LoweredScript> {
    let lowered = lower_script(text, ctx)?;
    check_lowered(text, &lowered.code)?;
    Ok(lowered)
}

/// Parse lowered `code` and report errors against `source`. Lines line up
/// when lowering kept the line count; a rewritten line points at its first
/// token. Otherwise the error lands on the start of the block.
pub fn check_lowered(source: &str, code: &str) -> CompileResult<()> {
    let Err(mut err) = check_syntax(code) else {
        return Ok(());
    };
    let source_lines: Vec<&str> = source.split('\n').collect();
    let code_lines: Vec<&str> = code.split('\n').collect();
    let index = (err.line.max(1) - 1) as usize;
    match (source_lines.get(index), code_lines.get(index)) {
        (Some(src_line), Some(code_line)) if source_lines.len() == code_lines.len() => {
            if src_line != code_line {
                let indent = src_line.len() - src_line.trim_start().len();
                err.column = src_line[..indent].chars().count() as u32 + 1;
            }
        }
        _ => {
            err.line = 1;
            err.column = 1;
        }
    }
    Err(err)
}

/// Replace every match of `re` found outside strings and comments. The
/// callback gets the current text, the captures (whose ranges index into that
/// text) and the match end, and returns the replacement plus the offset to
/// resume copying from.
fn rewrite<F>(text: &str, re: &Regex, mut replace: F) -> CompileResult<String>
where
    F: FnMut(&str, &Captures, usize) -> CompileResult<(String, usize)>,
{
    let masked = mask_literals(text);
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut at = 0;

    while at <= masked.len() {
        let Some(caps) = re.captures_at(&masked, at) else {
            break;
        };
        let Some(whole) = caps.get(0) else {
            break;
        };
        let (replacement, resume) = replace(text, &caps, whole.end())?;
        out.push_str(&text[copied..whole.start()]);
        out.push_str(&replacement);
        copied = resume.max(whole.end());
        at = if copied > whole.start() { copied } else { whole.end() + 1 };
    }

    out.push_str(&text[copied.min(text.len())..]);
    Ok(out)
}

/// Lower the block body at `range` of `src` on its own, so bindings nested
/// inside a handler are rewritten too. Errors are moved onto `src`.
fn lower_nested(
    src: &str,
    range: Range<usize>,
    ctx: &mut CompileContext,
    helpers: &mut BTreeSet<String>,
) -> CompileResult<String> {
    let (line, column) = line_column(src, range.start);
    let inner = lower_script(&src[range], ctx).map_err(|e| e.located_at("", line, column))?;
    helpers.extend(inner.helpers);
    Ok(inner.code)
}

/// Range of the brace block opening at `open`, braces included.
fn block_at(text: &str, open: usize) -> CompileResult<Range<usize>> {
    match find_balanced_brace_end(text, open) {
        Some(end) => Ok(open..end),
        None => {
            let (line, column) = line_column(text, open);
            Err(CompilerError::new(E_UNCLOSED_BLOCK, "Unclosed block in script", "", line, column))
        }
    }
}

fn skip_semicolon(text: &str, from: usize) -> usize {
    let rest = &text[from..];
    let trimmed = rest.trim_start();
    if trimmed.starts_with(';') {
        from + (rest.len() - trimmed.len()) + 1
    } else {
        from
    }
}

fn lower_target(target: &str, ctx: &CompileContext) -> String {
    match target.strip_prefix("{{").and_then(|t| t.strip_suffix("}}")) {
        Some(selector) => lower_selector(selector, ctx),
        None => target.to_string(),
    }
}

/// Selector for the element currently being compiled: its class, else its id.
fn element_selector(ctx: &CompileContext) -> Option<String> {
    if let Some(class) = ctx.current_class() {
        return Some(format!("document.querySelector('.{}')", quote(class)));
    }
    ctx.current_id()
        .map(|id| format!("document.getElementById('{}')", quote(id)))
}

/// JavaScript expression for the contents of one `{{ }}` selector.
pub fn lower_selector(selector: &str, ctx: &CompileContext) -> String {
    let selector = selector.trim();

    if selector == "&" {
        return element_selector(ctx).unwrap_or_else(|| "this".to_string());
    }

    if let Some(caps) = INDEXED_RE.captures(selector) {
        return format!(
            "document.querySelectorAll('{}')[{}]",
            quote(caps[1].trim()),
            &caps[2]
        );
    }

    if BARE_NAME_RE.is_match(selector) && !HTML_ELEMENTS.contains(selector) {
        return format!(
            "(document.getElementById('{0}') || document.querySelector('.{0}'))",
            quote(selector)
        );
    }

    format!("document.querySelector('{}')", quote(selector))
}

fn quote(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "\\'")
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

/// Compiles a whole script-extension fragment into the script stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptExtensionCompiler;

impl ScriptExtensionCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl HostCompiler for ScriptExtensionCompiler {
    fn compile(&self, fragment: &Fragment, ctx: &mut CompileContext) -> CompileResult<UnitOutput> {
        let lowered = ctx.in_state(ParseState::InLocalScript, "script", |ctx| {
            lower_checked(&fragment.content, ctx)
        })?;
        let mut out = UnitOutput::default();
        out.push_js(&lowered.code);
        out.helpers.extend(lowered.helpers);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn lower(text: &str) -> LoweredScript {
        lower_script(text, &mut CompileContext::default()).unwrap()
    }

    #[test]
    fn test_selectors_lower_to_dom_queries() {
        let ctx = CompileContext::default();
        assert_eq!(lower_selector(".box", &ctx), "document.querySelector('.box')");
        assert_eq!(lower_selector("#main", &ctx), "document.querySelector('#main')");
        assert_eq!(lower_selector("div span", &ctx), "document.querySelector('div span')");
        assert_eq!(lower_selector("li[2]", &ctx), "document.querySelectorAll('li')[2]");
        assert_eq!(lower_selector("button", &ctx), "document.querySelector('button')");
        assert_eq!(
            lower_selector("card", &ctx),
            "(document.getElementById('card') || document.querySelector('.card'))"
        );
        assert_eq!(lower_selector("&", &ctx), "this");
    }

    #[test]
    fn test_ampersand_selector_uses_enclosing_element() {
        let mut ctx = CompileContext::default();
        ctx.set_current_class("box");
        assert_eq!(lower_selector("&", &ctx), "document.querySelector('.box')");
    }

    #[test]
    fn test_listen_becomes_helper_call() {
        let out = lower("{{.button}} -> listen({ click: foo });");
        assert_eq!(
            out.code,
            "__chtlListen(document.querySelector('.button'), { click: foo });"
        );
        assert!(out.helpers.contains(LISTEN_HELPER));
    }

    #[test]
    fn test_listen_block_form() {
        let out = lower("{{#go}}->listen { click: () => run() };");
        assert_eq!(
            out.code,
            "__chtlListen(document.querySelector('#go'), { click: () => run() });"
        );
    }

    #[test]
    fn test_delegate_uses_its_own_helper() {
        let out = lower("{{ul}}->delegate { target: {{li}}, click: pick };");
        assert_eq!(
            out.code,
            "__chtlDelegate(document.querySelector('ul'), { target: document.querySelector('li'), click: pick });"
        );
        assert!(out.helpers.contains(DELEGATE_HELPER));
        assert!(!out.helpers.contains(LISTEN_HELPER));
    }

    #[test]
    fn test_event_bind_operator() {
        let out = lower("{{.box}} &-> click { console.log(1); }");
        assert_eq!(
            out.code,
            "document.querySelector('.box').addEventListener('click', function (event) { console.log(1); });"
        );
    }

    #[test]
    fn test_event_bind_without_target_needs_element() {
        let err = lower_script("&-> click { go(); }", &mut CompileContext::default()).unwrap_err();
        assert_eq!(err.code, E_MISSING_TARGET);

        let mut ctx = CompileContext::default();
        ctx.set_current_id("panel");
        let out = lower_script("&-> click { go(); }", &mut ctx).unwrap();
        assert!(out.code.starts_with("document.getElementById('panel').addEventListener('click'"));
    }

    #[test]
    fn test_animate_and_vir() {
        let mut ctx = CompileContext::default();
        let out = lower_script("vir fade = animate { target: {{.box}}, duration: 300 };", &mut ctx).unwrap();
        assert_eq!(
            out.code,
            "const fade = __chtlAnimate({ target: document.querySelector('.box'), duration: 300 });"
        );
        assert!(out.helpers.contains(ANIMATE_HELPER));
        assert!(ctx.has_variable("fade"));
    }

    #[test]
    fn test_plain_arrow_is_member_access() {
        assert_eq!(lower("{{.a}}->textContent = 'x';").code, "document.querySelector('.a').textContent = 'x';");
    }

    #[test]
    fn test_strings_and_comments_are_untouched() {
        let src = "const s = \"{{.a}} -> listen\"; // a -> b\n";
        assert_eq!(lower(src).code, src);
    }

    #[test]
    fn test_plain_javascript_passes_through() {
        let src = "function f() { return a => a + 1; }";
        let out = lower(src);
        assert_eq!(out.code, src);
        assert!(out.helpers.is_empty());
    }

    #[test]
    fn test_unsupported_constructs_fail_with_position() {
        let err = lower_script("let a = 1;\niNeverAway { }", &mut CompileContext::default()).unwrap_err();
        assert_eq!(err.code, E_UNSUPPORTED_EXTENSION);
        assert_eq!(err.kind(), ErrorKind::Semantic);
        assert_eq!((err.line, err.column), (2, 1));
        assert!(lower_script("util a > 1 -> change { }", &mut CompileContext::default()).is_err());
        assert!(lower_script("module { load: x }", &mut CompileContext::default()).is_err());
    }

    #[test]
    fn test_bindings_nested_in_handlers_are_lowered() {
        let out = lower("{{.a}}->listen { click: () => { {{.b}}->listen { click: go }; } };");
        assert_eq!(
            out.code,
            "__chtlListen(document.querySelector('.a'), { click: () => { __chtlListen(document.querySelector('.b'), { click: go }); } });"
        );

        let out = lower("{{.a}} &-> click { {{.b}} &-> hover { go(); } }");
        assert!(out.code.contains("document.querySelector('.b').addEventListener('hover'"));
        assert!(!out.code.contains("&-> "));
        assert!(!out.code.contains("{{"));
    }

    #[test]
    fn test_nested_errors_point_into_the_outer_text() {
        let err = lower_script("{{.a}} &-> click {\n  iNeverAway { }\n}", &mut CompileContext::default())
            .unwrap_err();
        assert_eq!(err.code, E_UNSUPPORTED_EXTENSION);
        assert_eq!((err.line, err.column), (2, 3));
    }

    #[test]
    fn test_lowered_syntax_errors_map_back_to_source_lines() {
        let mut ctx = CompileContext::default();
        let err = lower_checked("{{.a}}->listen { click: go };\nconst = 1;", &mut ctx).unwrap_err();
        assert_eq!(err.code, crate::error::E_JS_SYNTAX);
        assert_eq!(err.line, 2);

        let err = lower_checked("let x = 1;\n  {{.a}}->listen { click: go } +;", &mut ctx).unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));

        assert!(lower_checked("{{.a}}->listen { click: go };", &mut ctx).is_ok());
    }

    #[test]
    fn test_fragment_compiler_fills_script_stream() {
        let fragment = Fragment {
            kind: crate::fragment::FragmentKind::HostScriptExtension,
            content: "{{.button}} -> listen({ click: foo });".to_string(),
            start_line: 1,
            start_column: 1,
            end_line: 1,
            end_column: 39,
            source_path: "page.chtl".to_string(),
        };
        let mut ctx = CompileContext::default();
        let out = ScriptExtensionCompiler::new().compile(&fragment, &mut ctx).unwrap();
        assert!(out.body.is_empty());
        assert!(out.js.starts_with("__chtlListen("));
        assert_eq!(out.helpers.len(), 1);
        assert_eq!(ctx.current_state(), ParseState::TopLevel);
    }
}
