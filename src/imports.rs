//! Import directives and the file-system resolver behind them.
//!
//! Directives have the form
//! `[Import] @Chtl|@Html|@Style|@JavaScript|@CJmod from <path> [as name];`
//! and are only recognized outside strings and comments.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::backend::ImportResolver;
use crate::config::CompileOptions;
use crate::error::{CompileResult, CompilerError, E_IMPORT_NOT_FOUND, E_IMPORT_UNSUPPORTED};
use crate::scanner::mask_literals;

// ═══════════════════════════════════════════════════════════════════════════════
// IMPORT KIND
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImportKind {
    Chtl,
    Html,
    Style,
    JavaScript,
    CJmod,
}

impl ImportKind {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "Chtl" => Some(ImportKind::Chtl),
            "Html" => Some(ImportKind::Html),
            "Style" => Some(ImportKind::Style),
            "JavaScript" => Some(ImportKind::JavaScript),
            "CJmod" => Some(ImportKind::CJmod),
            _ => None,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            ImportKind::Chtl => "@Chtl",
            ImportKind::Html => "@Html",
            ImportKind::Style => "@Style",
            ImportKind::JavaScript => "@JavaScript",
            ImportKind::CJmod => "@CJmod",
        }
    }

    /// Extensions tried, in order, when the import path has none.
    pub fn default_extensions(&self) -> &'static [&'static str] {
        match self {
            ImportKind::Chtl => &["chtl"],
            ImportKind::Html => &["html", "htm"],
            ImportKind::Style => &["css"],
            ImportKind::JavaScript => &["js"],
            ImportKind::CJmod => &["cjmod"],
        }
    }
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIRECTIVES
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref IMPORT_RE: Regex = Regex::new(
        r#"\[Import\]\s*@(Chtl|Html|Style|JavaScript|CJmod)\s+from\s+("[^"\n]*"|'[^'\n]*'|[^\s;]+)(?:\s+as\s+([A-Za-z_][A-Za-z0-9_]*))?\s*;?"#
    )
    .unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDirective {
    pub kind: ImportKind,
    pub target: String,
    pub alias: Option<String>,
    /// Byte offset of `[Import]` in the scanned text.
    pub offset: usize,
    pub len: usize,
}

/// Every import directive in `source`, in order.
pub fn parse_imports(source: &str) -> Vec<ImportDirective> {
    let masked = mask_literals(source);
    let mut directives = Vec::new();

    for m in IMPORT_RE.find_iter(&masked) {
        // Masking keeps byte offsets, so the same range holds the real text.
        let raw = &source[m.range()];
        let Some(caps) = IMPORT_RE.captures(raw) else {
            continue;
        };
        let Some(kind) = ImportKind::from_keyword(&caps[1]) else {
            continue;
        };
        directives.push(ImportDirective {
            kind,
            target: unquote(&caps[2]).to_string(),
            alias: caps.get(3).map(|a| a.as_str().to_string()),
            offset: m.start(),
            len: m.len(),
        });
    }

    directives
}

fn unquote(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 && (bytes[0] == b'"' || bytes[0] == b'\'') && bytes[bytes.len() - 1] == bytes[0]
    {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

/// Namespace an imported `@Chtl` file is compiled under: the alias if given,
/// else the file stem.
pub fn default_namespace(directive: &ImportDirective, path: &Path) -> String {
    directive.alias.clone().unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILE-SYSTEM RESOLVER
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolves import paths against the importing file's directory, then each of
/// the configured module directories. `*` in the last path segment expands to
/// every matching file in that directory, sorted by path.
#[derive(Debug, Clone, Default)]
pub struct FileSystemResolver;

impl FileSystemResolver {
    pub fn new() -> Self {
        Self
    }

    fn search_dirs(from_file: &Path, options: &CompileOptions) -> Vec<PathBuf> {
        let base = from_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut dirs = vec![base.clone()];
        for dir in &options.module_dirs {
            if dir.is_absolute() {
                dirs.push(dir.clone());
            } else {
                dirs.push(base.join(dir));
            }
        }
        dirs
    }

    fn resolve_single(target: &str, kind: ImportKind, dir: &Path) -> Option<PathBuf> {
        let candidate = dir.join(target);
        if candidate.extension().is_some() && candidate.is_file() {
            return Some(canonical(&candidate));
        }
        for ext in kind.default_extensions() {
            let with_ext = dir.join(format!("{}.{}", target, ext));
            if with_ext.is_file() {
                return Some(canonical(&with_ext));
            }
        }
        None
    }

    fn resolve_wildcard(target: &str, kind: ImportKind, dir: &Path) -> Vec<PathBuf> {
        let target_path = Path::new(target);
        let pattern = target_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let search_root = match target_path.parent() {
            Some(parent) => dir.join(parent),
            None => dir.to_path_buf(),
        };
        let Some(matcher) = wildcard_regex(&pattern) else {
            return Vec::new();
        };
        let explicit_ext = Path::new(&pattern).extension().is_some();

        let mut files: Vec<PathBuf> = WalkDir::new(&search_root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if !matcher.is_match(&name) {
                    return false;
                }
                explicit_ext
                    || path
                        .extension()
                        .map(|e| kind.default_extensions().iter().any(|d| e == *d))
                        .unwrap_or(false)
            })
            .map(|path| canonical(&path))
            .collect();
        files.sort();
        files
    }
}

impl ImportResolver for FileSystemResolver {
    fn resolve(
        &self,
        target: &str,
        kind: ImportKind,
        from_file: &Path,
        options: &CompileOptions,
    ) -> CompileResult<Vec<PathBuf>> {
        if kind == ImportKind::CJmod {
            return Err(CompilerError::unlocated(
                E_IMPORT_UNSUPPORTED,
                &format!("Cannot import '{}': {} modules are not supported", target, kind),
            ));
        }

        let dirs = Self::search_dirs(from_file, options);
        let wildcard = target.contains('*');

        for dir in &dirs {
            if wildcard {
                let files = Self::resolve_wildcard(target, kind, dir);
                if !files.is_empty() {
                    return Ok(files);
                }
            } else if let Some(file) = Self::resolve_single(target, kind, dir) {
                return Ok(vec![file]);
            }
        }

        let searched: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
        Err(CompilerError::unlocated(
            E_IMPORT_NOT_FOUND,
            &format!(
                "Cannot resolve {} import '{}' (searched: {})",
                kind,
                target,
                searched.join(", ")
            ),
        ))
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn wildcard_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{}$", escaped)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_imports_reads_kind_target_alias() {
        let src = "[Import] @Chtl from \"parts/header\" as Header;\ndiv {}\n[Import] @Style from theme.css;";
        let imports = parse_imports(src);
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].kind, ImportKind::Chtl);
        assert_eq!(imports[0].target, "parts/header");
        assert_eq!(imports[0].alias.as_deref(), Some("Header"));
        assert_eq!(imports[0].offset, 0);
        assert_eq!(imports[1].kind, ImportKind::Style);
        assert_eq!(imports[1].target, "theme.css");
        assert_eq!(imports[1].alias, None);
        assert_eq!(&src[imports[1].offset..imports[1].offset + imports[1].len], "[Import] @Style from theme.css;");
    }

    #[test]
    fn test_imports_inside_strings_and_comments_are_ignored() {
        let src = "// [Import] @Chtl from a;\ntext { \"[Import] @Chtl from b;\" }\n/* [Import] @Chtl from c; */";
        assert!(parse_imports(src).is_empty());
    }

    #[test]
    fn test_default_namespace_prefers_alias() {
        let mut directive = parse_imports("[Import] @Chtl from widgets;").remove(0);
        assert_eq!(default_namespace(&directive, Path::new("/x/widgets.chtl")), "widgets");
        directive.alias = Some("W".to_string());
        assert_eq!(default_namespace(&directive, Path::new("/x/widgets.chtl")), "W");
    }

    #[test]
    fn test_resolver_adds_default_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("header.chtl"), "div {}").unwrap();
        let root = dir.path().join("main.chtl");
        let files = FileSystemResolver::new()
            .resolve("header", ImportKind::Chtl, &root, &CompileOptions::default())
            .unwrap();
        assert_eq!(files, vec![fs::canonicalize(dir.path().join("header.chtl")).unwrap()]);
    }

    #[test]
    fn test_resolver_falls_back_to_module_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("modules")).unwrap();
        fs::write(dir.path().join("modules").join("base.css"), "p { margin: 0; }").unwrap();
        let options = CompileOptions {
            module_dirs: vec![PathBuf::from("modules")],
            ..CompileOptions::default()
        };
        let files = FileSystemResolver::new()
            .resolve("base", ImportKind::Style, &dir.path().join("main.chtl"), &options)
            .unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("modules/base.css"));
    }

    #[test]
    fn test_resolver_expands_wildcards_sorted() {
        let dir = TempDir::new().unwrap();
        let parts = dir.path().join("parts");
        fs::create_dir(&parts).unwrap();
        fs::write(parts.join("b.chtl"), "").unwrap();
        fs::write(parts.join("a.chtl"), "").unwrap();
        fs::write(parts.join("notes.txt"), "").unwrap();
        let files = FileSystemResolver::new()
            .resolve("parts/*", ImportKind::Chtl, &dir.path().join("main.chtl"), &CompileOptions::default())
            .unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.chtl", "b.chtl"]);
    }

    #[test]
    fn test_missing_and_unsupported_imports_fail() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("main.chtl");
        let err = FileSystemResolver::new()
            .resolve("nope", ImportKind::Chtl, &root, &CompileOptions::default())
            .unwrap_err();
        assert_eq!(err.code, E_IMPORT_NOT_FOUND);
        let err = FileSystemResolver::new()
            .resolve("ext", ImportKind::CJmod, &root, &CompileOptions::default())
            .unwrap_err();
        assert_eq!(err.code, E_IMPORT_UNSUPPORTED);
    }
}
