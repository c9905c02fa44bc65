//! Fragment dispatch.
//!
//! Routes every fragment of a file to the compiler for its kind, resolves
//! `[Import]` directives depth-first before the fragment that contains them,
//! and accumulates the body, stylesheet and script streams in source order.
//! The first error anywhere aborts the whole unit; nothing partial is returned.

use std::borrow::Cow;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::backend::{
    HostCompiler, ImportResolver, SourceCompiler, SyntaxExtension, UnitOutput,
};
use crate::context::CompileContext;
use crate::css::CssCompiler;
use crate::document;
use crate::error::{CompileResult, CompilerError, E_IMPORT_READ, E_IMPORT_UNSUPPORTED, E_IO};
use crate::fragment::{Fragment, FragmentKind};
use crate::host::HostLanguageCompiler;
use crate::imports::{default_namespace, parse_imports, FileSystemResolver, ImportDirective, ImportKind};
use crate::javascript::JsCompiler;
use crate::scanner::Scanner;
use crate::script_ext::ScriptExtensionCompiler;

pub struct Dispatcher {
    host: Box<dyn HostCompiler>,
    script_extension: Box<dyn HostCompiler>,
    css: Box<dyn SourceCompiler>,
    javascript: Box<dyn SourceCompiler>,
    resolver: Box<dyn ImportResolver>,
    extensions: Vec<Box<dyn SyntaxExtension>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Dispatcher wired to the built-in compilers and the file-system resolver.
    pub fn new() -> Self {
        Self {
            host: Box::new(HostLanguageCompiler::new()),
            script_extension: Box::new(ScriptExtensionCompiler::new()),
            css: Box::new(CssCompiler::new()),
            javascript: Box::new(JsCompiler::new()),
            resolver: Box::new(FileSystemResolver::new()),
            extensions: Vec::new(),
        }
    }

    pub fn with_host_compiler(mut self, host: Box<dyn HostCompiler>) -> Self {
        self.host = host;
        self
    }

    pub fn with_script_extension_compiler(mut self, compiler: Box<dyn HostCompiler>) -> Self {
        self.script_extension = compiler;
        self
    }

    pub fn with_css_compiler(mut self, css: Box<dyn SourceCompiler>) -> Self {
        self.css = css;
        self
    }

    pub fn with_js_compiler(mut self, javascript: Box<dyn SourceCompiler>) -> Self {
        self.javascript = javascript;
        self
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ImportResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn register_extension(&mut self, extension: Box<dyn SyntaxExtension>) {
        self.extensions.push(extension);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ENTRY POINTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Compile one file's fragments. `root` is marked as in progress for the
    /// duration, so an import chain leading back to it is reported as a cycle.
    pub fn compile(
        &self,
        fragments: &[Fragment],
        root: &Path,
        ctx: &mut CompileContext,
    ) -> CompileResult<UnitOutput> {
        ctx.begin_import(root)?;
        let previous_file = std::mem::replace(&mut ctx.current_file, root.display().to_string());
        let result = self.compile_fragments(fragments, root, ctx);
        ctx.current_file = previous_file;
        ctx.end_import(root);
        result
    }

    /// Scan and compile source text that lives at `path`.
    pub fn compile_source(
        &self,
        source: &str,
        path: &Path,
        ctx: &mut CompileContext,
    ) -> CompileResult<UnitOutput> {
        // Imports resolve to canonical paths; the root must match them.
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let path = path.as_path();
        let fragments = Scanner::new(path.display().to_string())
            .with_debug(ctx.options.debug_mode)
            .scan(source)
            .into_result()?;
        self.compile(&fragments, path, ctx)
    }

    pub fn compile_file(&self, path: &Path, ctx: &mut CompileContext) -> CompileResult<UnitOutput> {
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let source = fs::read_to_string(&path).map_err(|e| {
            CompilerError::new(
                E_IO,
                &format!("Failed to read file: {}", e),
                &path.display().to_string(),
                0,
                0,
            )
        })?;
        info!(file = %path.display(), "compiling");
        self.compile_source(&source, &path, ctx)
    }

    /// Compile `path` and its import closure into one HTML document.
    pub fn compile_to_document(&self, path: &Path, ctx: &mut CompileContext) -> CompileResult<String> {
        let output = self.compile_file(path, ctx)?;
        Ok(document::assemble(&output, &ctx.options))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FRAGMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn compile_fragments(
        &self,
        fragments: &[Fragment],
        root: &Path,
        ctx: &mut CompileContext,
    ) -> CompileResult<UnitOutput> {
        let mut output = UnitOutput::default();

        for (index, original) in fragments.iter().enumerate() {
            if original.kind == FragmentKind::Unknown {
                debug!(index, line = original.start_line, "skipping unknown fragment");
                continue;
            }

            let fragment = self.apply_extensions(original)?;
            debug!(
                index,
                kind = %fragment.kind,
                line = fragment.start_line,
                "dispatching fragment"
            );

            match fragment.kind {
                FragmentKind::HostLanguage | FragmentKind::HostScriptExtension => {
                    if fragment.kind == FragmentKind::HostLanguage {
                        self.process_imports(&fragment, root, ctx, &mut output)?;
                    }
                    let compiler = if fragment.kind == FragmentKind::HostLanguage {
                        &self.host
                    } else {
                        &self.script_extension
                    };
                    let unit = compiler
                        .compile(&fragment, ctx)
                        .map_err(|e| locate(e, &fragment))?;
                    let unit = self.compile_streams(unit, &fragment, ctx)?;
                    output.append(unit);
                }
                FragmentKind::Css => {
                    let css = self
                        .css
                        .compile(&fragment.content, &ctx.options)
                        .map_err(|e| locate(e, &fragment))?;
                    output.push_css(&css);
                }
                FragmentKind::JavaScript => {
                    let js = self
                        .javascript
                        .compile(&fragment.content, &ctx.options)
                        .map_err(|e| locate(e, &fragment))?;
                    output.push_js(&js);
                }
                FragmentKind::Unknown => {}
            }
        }

        Ok(output)
    }

    /// Offer the fragment to every registered extension in order.
    fn apply_extensions<'f>(&self, fragment: &'f Fragment) -> CompileResult<Cow<'f, Fragment>> {
        let mut current: Cow<'f, Fragment> = Cow::Borrowed(fragment);
        for extension in &self.extensions {
            if !extension.requires_processing(&current.content) {
                continue;
            }
            let rewritten = extension
                .process(&current.content)
                .map_err(|e| locate(e, fragment))?;
            if rewritten != current.content {
                debug!(extension = extension.name(), line = fragment.start_line, "fragment rewritten");
                current = Cow::Owned(current.replace_content(rewritten));
            }
        }
        Ok(current)
    }

    /// Run extracted stylesheet and script text through the sub-compilers.
    fn compile_streams(
        &self,
        mut unit: UnitOutput,
        fragment: &Fragment,
        ctx: &CompileContext,
    ) -> CompileResult<UnitOutput> {
        if !unit.css.trim().is_empty() {
            let css = self
                .css
                .compile(&unit.css, &ctx.options)
                .map_err(|e| locate(e, fragment))?;
            unit.css = String::new();
            unit.push_css(&css);
        }
        if !unit.js.trim().is_empty() {
            let js = self
                .javascript
                .compile(&unit.js, &ctx.options)
                .map_err(|e| locate(e, fragment))?;
            unit.js = String::new();
            unit.push_js(&js);
        }
        Ok(unit)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // IMPORTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn process_imports(
        &self,
        fragment: &Fragment,
        from: &Path,
        ctx: &mut CompileContext,
        output: &mut UnitOutput,
    ) -> CompileResult<()> {
        for directive in parse_imports(&fragment.content) {
            let (line, column) = fragment.position_of(directive.offset);
            let text = fragment
                .content
                .get(directive.offset..directive.offset + directive.len)
                .unwrap_or_default();
            let at_directive = |e: CompilerError| {
                if e.file.is_empty() {
                    let e = if e.context.is_none() { e.with_context(text.trim()) } else { e };
                    e.located_at(&fragment.source_path, line, column)
                } else {
                    e
                }
            };

            let paths = self
                .resolver
                .resolve(&directive.target, directive.kind, from, &ctx.options)
                .map_err(at_directive)?;

            for path in paths {
                if ctx.imports().is_in_progress(&path) {
                    // Reports the cycle with its chain.
                    ctx.begin_import(&path).map_err(at_directive)?;
                }
                if ctx.is_imported(&path) {
                    ctx.mark_imported(&path, directive.kind).map_err(at_directive)?;
                    debug!(file = %path.display(), "already imported, skipping");
                    continue;
                }

                let unit = self.import_file(&directive, &path, ctx).map_err(at_directive)?;
                ctx.mark_imported(&path, directive.kind).map_err(at_directive)?;
                output.append(unit);
            }
        }
        Ok(())
    }

    fn import_file(
        &self,
        directive: &ImportDirective,
        path: &Path,
        ctx: &mut CompileContext,
    ) -> CompileResult<UnitOutput> {
        let source = fs::read_to_string(path).map_err(|e| {
            CompilerError::unlocated(
                E_IMPORT_READ,
                &format!("Failed to read import '{}': {}", path.display(), e),
            )
        })?;
        info!(file = %path.display(), kind = %directive.kind, "importing");

        let file = path.display().to_string();
        let in_file = |e: CompilerError| {
            if e.file.is_empty() {
                e.located_at(&file, 1, 1)
            } else {
                e
            }
        };

        let mut unit = UnitOutput::default();
        match directive.kind {
            ImportKind::Chtl => {
                let namespace = if ctx.options.disable_default_namespace {
                    None
                } else {
                    Some(default_namespace(directive, path))
                };
                unit = ctx.with_fresh_frames(|ctx| {
                    if let Some(ns) = &namespace {
                        ctx.enter_namespace(ns);
                    }
                    let result = self.compile_source(&source, path, ctx);
                    if namespace.is_some() {
                        ctx.exit_namespace()?;
                    }
                    result
                })?;
            }
            ImportKind::Style => {
                let css = self.css.compile(&source, &ctx.options).map_err(in_file)?;
                unit.push_css(&css);
            }
            ImportKind::JavaScript => {
                let js = self.javascript.compile(&source, &ctx.options).map_err(in_file)?;
                unit.push_js(&js);
            }
            ImportKind::Html => {
                unit.body.push_str(source.trim());
            }
            ImportKind::CJmod => {
                return Err(CompilerError::unlocated(
                    E_IMPORT_UNSUPPORTED,
                    &format!("Cannot import '{}': {} modules are not supported", file, directive.kind),
                ));
            }
        }
        Ok(unit)
    }
}

/// Move a fragment-relative error onto the fragment's file. Errors that
/// already name a file (from imported files) are left alone.
fn locate(err: CompilerError, fragment: &Fragment) -> CompilerError {
    if err.file.is_empty() {
        err.located_at(&fragment.source_path, fragment.start_line, fragment.start_column)
    } else {
        err
    }
}
