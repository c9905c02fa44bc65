//! Source discovery and batch compilation.
//!
//! Recursively finds `.chtl` files under a directory and compiles them in
//! parallel. Every file gets its own `CompileContext`, so no state is shared
//! between roots; results come back in path order.

use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::CompileOptions;
use crate::context::CompileContext;
use crate::dispatch::Dispatcher;
use crate::error::{CompileResult, CompilerError};

pub const SOURCE_EXTENSION: &str = "chtl";

/// Outcome of compiling one root file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutcome {
    pub path: PathBuf,
    pub document: Option<String>,
    pub error: Option<CompilerError>,
}

impl FileOutcome {
    fn from_result(path: PathBuf, result: CompileResult<String>) -> Self {
        match result {
            Ok(document) => Self {
                path,
                document: Some(document),
                error: None,
            },
            Err(error) => Self {
                path,
                document: None,
                error: Some(error),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Recursively find all `.chtl` files under `dir`, sorted.
pub fn find_source_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map_or(false, |ext| ext == SOURCE_EXTENSION)
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Compile each path into a document, in parallel.
pub fn compile_files(paths: &[PathBuf], options: &CompileOptions) -> Vec<FileOutcome> {
    let dispatcher = Dispatcher::new();
    paths
        .par_iter()
        .map(|path| {
            let mut ctx = CompileContext::new(options.clone());
            let result = dispatcher.compile_to_document(path, &mut ctx);
            if let Err(e) = &result {
                warn!(file = %path.display(), code = %e.code, "compilation failed");
            }
            FileOutcome::from_result(path.clone(), result)
        })
        .collect()
}

pub fn compile_directory(dir: &Path, options: &CompileOptions) -> Vec<FileOutcome> {
    let files = find_source_files(dir);
    info!(dir = %dir.display(), count = files.len(), "compiling directory");
    compile_files(&files, options)
}
