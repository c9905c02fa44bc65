//! Seams between the dispatcher and the compilers it routes fragments to.
//!
//! The dispatcher owns no language knowledge of its own. Host-language and
//! script-extension fragments go to a [`HostCompiler`], CSS and JavaScript
//! fragments to a [`SourceCompiler`], and any fragment may first be rewritten
//! by registered [`SyntaxExtension`]s. Built-in implementations live in
//! `host`, `script_ext`, `css` and `javascript`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::CompileOptions;
use crate::context::CompileContext;
use crate::error::CompileResult;
use crate::fragment::Fragment;
use crate::imports::ImportKind;

/// Output streams produced by compiling one or more fragments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitOutput {
    pub body: String,
    pub head: String,
    pub css: String,
    pub js: String,
    /// Runtime helper definitions, each emitted once ahead of the script.
    pub helpers: BTreeSet<String>,
}

impl UnitOutput {
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
            && self.head.is_empty()
            && self.css.is_empty()
            && self.js.is_empty()
            && self.helpers.is_empty()
    }

    /// Append `other` after everything already collected.
    pub fn append(&mut self, other: UnitOutput) {
        self.body.push_str(&other.body);
        self.head.push_str(&other.head);
        push_block(&mut self.css, &other.css);
        push_block(&mut self.js, &other.js);
        self.helpers.extend(other.helpers);
    }

    pub fn push_css(&mut self, css: &str) {
        push_block(&mut self.css, css);
    }

    pub fn push_js(&mut self, js: &str) {
        push_block(&mut self.js, js);
    }
}

fn push_block(stream: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !stream.is_empty() && !stream.ends_with('\n') {
        stream.push('\n');
    }
    stream.push_str(text);
    stream.push('\n');
}

/// Compiles host-language (and script-extension) fragments.
pub trait HostCompiler: Send + Sync {
    fn compile(&self, fragment: &Fragment, ctx: &mut CompileContext) -> CompileResult<UnitOutput>;
}

/// Compiles plain stylesheet or script text.
pub trait SourceCompiler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Errors carry positions relative to `text`.
    fn compile(&self, text: &str, options: &CompileOptions) -> CompileResult<String>;
}

/// Rewrites fragment text before normal compilation.
pub trait SyntaxExtension: Send + Sync {
    fn name(&self) -> &str;
    fn requires_processing(&self, text: &str) -> bool;
    fn process(&self, text: &str) -> CompileResult<String>;
}

/// Maps an import target to the files it names.
pub trait ImportResolver: Send + Sync {
    fn resolve(
        &self,
        target: &str,
        kind: ImportKind,
        from_file: &Path,
        options: &CompileOptions,
    ) -> CompileResult<Vec<PathBuf>>;
}

/// A [`SyntaxExtension`] that applies one regex replacement wherever its
/// pattern matches. Replacement text may use `$1`-style group references.
#[derive(Debug, Clone)]
pub struct RegexExtension {
    name: String,
    pattern: Regex,
    replacement: String,
}

impl RegexExtension {
    pub fn new(name: &str, pattern: Regex, replacement: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern,
            replacement: replacement.to_string(),
        }
    }
}

impl SyntaxExtension for RegexExtension {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires_processing(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    fn process(&self, text: &str) -> CompileResult<String> {
        Ok(self
            .pattern
            .replace_all(text, self.replacement.as_str())
            .into_owned())
    }
}
