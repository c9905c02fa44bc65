//! # CHTL Compiler
//!
//! Compiles CHTL sources (an HTML-structured host language with embedded
//! stylesheet and script blocks) into a single HTML document.
//!
//! ## Pipeline
//!
//! 1. **Scan**: the scanner splits a file into fragments and tags each with a
//!    language (`HostLanguage`, `HostScriptExtension`, `CSS`, `JavaScript`).
//!    Concatenating the fragments reproduces the input exactly.
//! 2. **Dispatch**: each fragment goes to the compiler for its kind. Imports
//!    are resolved depth-first before the fragment that names them.
//! 3. **Assemble**: body, stylesheet and script streams become one document.
//!
//! ## Key Invariants
//!
//! 1. Scope, state and namespace stacks are balanced after every compilation,
//!    successful or not.
//! 2. A file is compiled at most once per root, however often it is imported.
//! 3. The first error aborts the compilation; partial output is never returned.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod backend;
mod cache;
mod config;
mod context;
mod css;
mod discovery;
mod dispatch;
mod document;
mod error;
mod fragment;
mod host;
mod imports;
mod javascript;
mod scanner;
mod script_ext;
mod state;

#[cfg(test)]
mod pipeline_tests;

use std::path::Path;

pub use backend::{HostCompiler, ImportResolver, RegexExtension, SourceCompiler, SyntaxExtension, UnitOutput};
pub use cache::IncrementalCache;
pub use config::CompileOptions;
pub use context::{CompileContext, ImportTracker, Scope};
pub use css::{minify_css, validate_css, CssCompiler};
pub use discovery::{compile_directory, compile_files, find_source_files, FileOutcome};
pub use dispatch::Dispatcher;
pub use document::assemble;
pub use error::*;
pub use fragment::{reconstruct, Fragment, FragmentKind};
pub use host::HostLanguageCompiler;
pub use imports::{parse_imports, FileSystemResolver, ImportDirective, ImportKind};
pub use javascript::JsCompiler;
pub use scanner::{find_balanced_brace_end, mask_literals, scan, ScanOutput, Scanner};
pub use script_ext::{lower_script, lower_selector, LoweredScript, ScriptExtensionCompiler};
pub use state::{ParseState, StateContext, StateMachine};

/// Compile source text into a document. `path` is used for error locations
/// and as the base for relative imports.
pub fn compile_source(source: &str, path: &Path, options: &CompileOptions) -> CompileResult<String> {
    let mut ctx = CompileContext::new(options.clone());
    let output = Dispatcher::new().compile_source(source, path, &mut ctx)?;
    Ok(assemble(&output, &ctx.options))
}

pub fn compile_file(path: &Path, options: &CompileOptions) -> CompileResult<String> {
    let mut ctx = CompileContext::new(options.clone());
    Dispatcher::new().compile_to_document(path, &mut ctx)
}

/// Like [`compile_file`], but served from `options.cache_dir` while neither
/// the file, anything it imports, nor `options` has changed.
pub fn compile_file_cached(path: &Path, options: &CompileOptions) -> CompileResult<String> {
    let Some(cache_dir) = &options.cache_dir else {
        return compile_file(path, options);
    };
    let cache = IncrementalCache::new(cache_dir)?;
    let root = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if let Some(document) = cache.get(&root, options) {
        return Ok(document);
    }

    let mut ctx = CompileContext::new(options.clone());
    let document = Dispatcher::new().compile_to_document(&root, &mut ctx)?;
    cache.set(&root, options, &ctx, &document);
    Ok(document)
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI BINDINGS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
fn native_options(options_json: Option<String>) -> napi::Result<CompileOptions> {
    match options_json {
        Some(json) => CompileOptions::from_json_str(&json).map_err(|e| napi::Error::from_reason(e.to_string())),
        None => Ok(CompileOptions::default()),
    }
}

#[cfg(feature = "napi")]
#[napi]
pub fn compile_file_native(path: String, options_json: Option<String>) -> napi::Result<String> {
    let options = native_options(options_json)?;
    compile_file_cached(Path::new(&path), &options).map_err(|e| napi::Error::from_reason(e.to_string()))
}

#[cfg(feature = "napi")]
#[napi]
pub fn compile_source_native(
    source: String,
    path: String,
    options_json: Option<String>,
) -> napi::Result<String> {
    let options = native_options(options_json)?;
    compile_source(&source, Path::new(&path), &options).map_err(|e| napi::Error::from_reason(e.to_string()))
}

#[cfg(feature = "napi")]
#[napi]
pub fn scan_native(source: String, path: String) -> napi::Result<serde_json::Value> {
    let output = Scanner::new(path).scan(&source);
    serde_json::to_value(&output.fragments).map_err(|e| napi::Error::from_reason(e.to_string()))
}

#[cfg(feature = "napi")]
#[napi]
pub fn compile_directory_native(dir: String, options_json: Option<String>) -> napi::Result<serde_json::Value> {
    let options = native_options(options_json)?;
    let outcomes = compile_directory(Path::new(&dir), &options);
    serde_json::to_value(outcomes).map_err(|e| napi::Error::from_reason(e.to_string()))
}
