use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CompilerError, E_CONFIG};

/// Compile-time options. Every recognized option is a named field; JSON keys
/// are camelCase and missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    pub debug_mode: bool,
    /// Emit `<!DOCTYPE html>`. Also switched on by `use html5;`.
    pub use_html5: bool,
    pub disable_style_auto_add_class: bool,
    pub disable_style_auto_add_id: bool,
    pub disable_script_auto_add_class: bool,
    pub disable_script_auto_add_id: bool,
    /// Compile imported files at the top namespace instead of one named
    /// after the file.
    pub disable_default_namespace: bool,
    pub minify: bool,
    /// Extra directories searched by imports, after the importing file's own.
    pub module_dirs: Vec<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            debug_mode: false,
            use_html5: false,
            disable_style_auto_add_class: false,
            disable_style_auto_add_id: false,
            disable_script_auto_add_class: true,
            disable_script_auto_add_id: true,
            disable_default_namespace: false,
            minify: false,
            module_dirs: Vec::new(),
            cache_dir: None,
        }
    }
}

impl CompileOptions {
    pub fn from_json_str(json: &str) -> Result<Self, CompilerError> {
        serde_json::from_str(json).map_err(|e| {
            CompilerError::new(
                E_CONFIG,
                &format!("Invalid compile options: {}", e),
                "",
                e.line() as u32,
                e.column() as u32,
            )
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, CompilerError> {
        let file = path.to_string_lossy();
        let data = fs::read_to_string(path).map_err(|e| {
            CompilerError::new(
                E_CONFIG,
                &format!("Failed to read options: {}", e),
                &file,
                0,
                0,
            )
        })?;
        Self::from_json_str(&data).map_err(|mut e| {
            e.file = file.to_string();
            e
        })
    }
}
