//! End-to-end tests: scan, dispatch, import resolution and assembly together.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::backend::{HostCompiler, UnitOutput};
use crate::config::CompileOptions;
use crate::context::CompileContext;
use crate::dispatch::Dispatcher;
use crate::error::{
    CompileResult, ErrorKind, E_IMPORT_CONFLICT, E_IMPORT_CYCLE, E_STATE_UNDERFLOW,
    E_UNSUPPORTED_DECLARATION,
};
use crate::fragment::{Fragment, FragmentKind};
use crate::host::HostLanguageCompiler;
use crate::state::ParseState;
use crate::{compile_file, compile_file_cached, compile_source};

/// Host compiler that records which file it compiled, under which namespace.
#[derive(Default, Clone)]
struct RecordingHost {
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingHost {
    fn calls_for(&self, file_name: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(file, _)| file.ends_with(file_name))
            .map(|(_, ns)| ns.clone())
            .collect()
    }
}

impl HostCompiler for RecordingHost {
    fn compile(&self, fragment: &Fragment, ctx: &mut CompileContext) -> CompileResult<UnitOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((fragment.source_path.clone(), ctx.namespace_path()));
        HostLanguageCompiler::new().compile(fragment, ctx)
    }
}

fn project(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    let root = fs::canonicalize(dir.path()).unwrap();
    (dir, root)
}

#[test]
fn test_host_document_end_to_end() {
    let doc = compile_source(
        "div { style { color: red; } text { \"hi\" } }",
        Path::new("page.chtl"),
        &CompileOptions::default(),
    )
    .unwrap();
    assert!(doc.starts_with("<html>\n<head>\n<meta charset=\"UTF-8\">\n"));
    assert!(doc.contains("<body>\n<div style=\"color: red;\">hi</div>\n</body>"));
    assert!(!doc.contains("<style>"));
}

#[test]
fn test_state_exit_at_top_level_is_runtime_error() {
    let mut ctx = CompileContext::default();
    let err = ctx.exit_state().unwrap_err();
    assert_eq!(err.code, E_STATE_UNDERFLOW);
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert_eq!(ctx.states().depth(), 1);
    assert_eq!(ctx.current_state(), ParseState::TopLevel);
}

#[test]
fn test_transitive_import_cycle_is_reported() {
    let (_dir, root) = project(&[
        ("a.chtl", "[Import] @Chtl from b;\ndiv {}"),
        ("b.chtl", "[Import] @Chtl from a;\nspan {}"),
    ]);
    let err = compile_file(&root.join("a.chtl"), &CompileOptions::default()).unwrap_err();
    assert_eq!(err.code, E_IMPORT_CYCLE);
    assert_eq!(err.kind(), ErrorKind::Import);
    assert!(err.message.contains("a.chtl -> "));
    assert!(err.message.contains("b.chtl -> "));
    assert!(err.file.ends_with("b.chtl"));
    assert_eq!((err.line, err.column), (1, 1));
}

#[test]
fn test_self_import_is_a_cycle() {
    let (_dir, root) = project(&[("a.chtl", "div {}\n[Import] @Chtl from a;")]);
    let err = compile_file(&root.join("a.chtl"), &CompileOptions::default()).unwrap_err();
    assert_eq!(err.code, E_IMPORT_CYCLE);
    assert_eq!(err.line, 2);
    assert!(err.context.as_deref().unwrap_or_default().starts_with("[Import] @Chtl from a"));
}

#[test]
fn test_shared_import_compiles_once() {
    let (_dir, root) = project(&[
        ("main.chtl", "[Import] @Chtl from b;\n[Import] @Chtl from c;\nmain {}"),
        ("b.chtl", "p { text { \"shared\" } }"),
        ("c.chtl", "[Import] @Chtl from b;\nsection {}"),
    ]);
    let host = RecordingHost::default();
    let dispatcher = Dispatcher::new().with_host_compiler(Box::new(host.clone()));
    let mut ctx = CompileContext::default();
    let out = dispatcher.compile_file(&root.join("main.chtl"), &mut ctx).unwrap();

    assert_eq!(host.calls_for("b.chtl").len(), 1);
    assert_eq!(out.body, "<p>shared</p><section></section><main></main>");
    assert_eq!(ctx.imports().imported().len(), 2);
    assert!(ctx.imports().in_progress().is_empty());
}

#[test]
fn test_imported_files_compile_in_their_namespace() {
    let (_dir, root) = project(&[
        ("main.chtl", "[Import] @Chtl from widgets;\n[Import] @Chtl from header as Top;\ndiv {}"),
        ("widgets.chtl", "span {}"),
        ("header.chtl", "h1 {}"),
    ]);
    let host = RecordingHost::default();
    let dispatcher = Dispatcher::new().with_host_compiler(Box::new(host.clone()));
    let mut ctx = CompileContext::default();
    dispatcher.compile_file(&root.join("main.chtl"), &mut ctx).unwrap();

    assert_eq!(host.calls_for("widgets.chtl"), vec!["widgets".to_string()]);
    assert_eq!(host.calls_for("header.chtl"), vec!["Top".to_string()]);
    assert_eq!(host.calls_for("main.chtl"), vec![String::new()]);
    assert_eq!(ctx.namespace_depth(), 0);
}

#[test]
fn test_default_namespace_can_be_disabled() {
    let (_dir, root) = project(&[
        ("main.chtl", "[Import] @Chtl from widgets;\ndiv {}"),
        ("widgets.chtl", "span {}"),
    ]);
    let host = RecordingHost::default();
    let dispatcher = Dispatcher::new().with_host_compiler(Box::new(host.clone()));
    let mut ctx = CompileContext::new(CompileOptions {
        disable_default_namespace: true,
        ..CompileOptions::default()
    });
    dispatcher.compile_file(&root.join("main.chtl"), &mut ctx).unwrap();
    assert_eq!(host.calls_for("widgets.chtl"), vec![String::new()]);
}

#[test]
fn test_stylesheet_and_script_imports_are_inlined() {
    let (_dir, root) = project(&[
        ("main.chtl", "[Import] @Style from \"theme.css\";\n[Import] @JavaScript from app;\ndiv {}"),
        ("theme.css", ".a { color: red; }"),
        ("app.js", "let started = true;"),
    ]);
    let doc = compile_file(&root.join("main.chtl"), &CompileOptions::default()).unwrap();
    assert!(doc.contains("<style>\n.a { color: red; }\n</style>"));
    assert!(doc.contains("let started = true;"));
    assert!(doc.find("<div></div>").unwrap() < doc.find("<script>").unwrap());
}

#[test]
fn test_same_file_under_two_kinds_conflicts() {
    let (_dir, root) = project(&[
        ("main.chtl", "[Import] @Style from \"shared.txt\";\n[Import] @Html from \"shared.txt\";\ndiv {}"),
        ("shared.txt", "p { margin: 0; }"),
    ]);
    let err = compile_file(&root.join("main.chtl"), &CompileOptions::default()).unwrap_err();
    assert_eq!(err.code, E_IMPORT_CONFLICT);
    assert_eq!(err.line, 2);
}

#[test]
fn test_wildcard_import_keeps_path_order() {
    let (_dir, root) = project(&[
        ("main.chtl", "[Import] @Chtl from \"parts/*\";\ndiv {}"),
        ("parts/b.chtl", "p { text { \"b\" } }"),
        ("parts/a.chtl", "p { text { \"a\" } }"),
    ]);
    let mut ctx = CompileContext::default();
    let out = Dispatcher::new().compile_file(&root.join("main.chtl"), &mut ctx).unwrap();
    assert_eq!(out.body, "<p>a</p><p>b</p><div></div>");
}

#[test]
fn test_errors_point_into_the_failing_file() {
    let (_dir, root) = project(&[
        ("main.chtl", "[Import] @Chtl from part;\ndiv {}"),
        ("part.chtl", "span {}\n[Template] @Style A {}"),
    ]);
    let err = compile_file(&root.join("main.chtl"), &CompileOptions::default()).unwrap_err();
    assert_eq!(err.code, E_UNSUPPORTED_DECLARATION);
    assert!(err.file.ends_with("part.chtl"));
    assert_eq!((err.line, err.column), (2, 1));
}

#[test]
fn test_failed_compilation_leaves_context_balanced() {
    let (_dir, root) = project(&[
        ("main.chtl", "[Import] @Chtl from part as P;\ndiv {}"),
        ("part.chtl", "section { div { [Custom] @Element X {} } }"),
    ]);
    let mut ctx = CompileContext::default();
    assert!(Dispatcher::new().compile_file(&root.join("main.chtl"), &mut ctx).is_err());
    assert_eq!(ctx.scope_depth(), 1);
    assert_eq!(ctx.states().depth(), 1);
    assert_eq!(ctx.namespace_depth(), 0);
    assert!(ctx.imports().in_progress().is_empty());
}

#[test]
fn test_every_fragment_kind_reaches_a_compiler() {
    let cases = [
        ("div { text { \"x\" } }", FragmentKind::HostLanguage),
        (".box { color: blue; margin: 0; }", FragmentKind::Css),
        ("{{.button}} -> listen({ click: foo });", FragmentKind::HostScriptExtension),
        ("function f() { return 1; }", FragmentKind::JavaScript),
    ];
    for (source, kind) in cases {
        assert_eq!(crate::scanner::scan(source)[0].kind, kind);
        let mut ctx = CompileContext::default();
        let out = Dispatcher::new()
            .compile_source(source, Path::new("page.chtl"), &mut ctx)
            .unwrap();
        assert!(!out.is_empty(), "no output for {:?}", source);
    }
}

#[test]
fn test_cached_compile_tracks_imported_files() {
    let (_dir, root) = project(&[
        ("main.chtl", "[Import] @Style from \"theme.css\";\ndiv {}"),
        ("theme.css", ".a { color: red; }"),
    ]);
    let options = CompileOptions {
        cache_dir: Some(root.join(".cache")),
        ..CompileOptions::default()
    };
    let main = root.join("main.chtl");
    let first = compile_file_cached(&main, &options).unwrap();
    assert_eq!(compile_file_cached(&main, &options).unwrap(), first);
    assert_eq!(fs::read_dir(root.join(".cache")).unwrap().count(), 1);

    fs::write(root.join("theme.css"), ".a { color: blue; }").unwrap();
    let second = compile_file_cached(&main, &options).unwrap();
    assert!(second.contains("color: blue"));

    let html5 = CompileOptions {
        use_html5: true,
        ..options.clone()
    };
    let third = compile_file_cached(&main, &html5).unwrap();
    assert!(third.starts_with("<!DOCTYPE html>"));
    assert!(!compile_file_cached(&main, &options).unwrap().starts_with("<!DOCTYPE"));
}

#[test]
fn test_stylesheet_with_urls_imports_cleanly() {
    let (_dir, root) = project(&[
        ("main.chtl", "[Import] @Style from \"theme.css\";\ndiv {}"),
        (
            "theme.css",
            ".hero { background: url(https://cdn.example.com/a.png); }\n.icon { mask: url(\"http://x.test/i.svg\"); }",
        ),
    ]);
    let doc = compile_file(&root.join("main.chtl"), &CompileOptions::default()).unwrap();
    assert!(doc.contains("url(https://cdn.example.com/a.png)"));
    assert!(doc.contains("<div></div>"));
}

#[test]
fn test_nested_bindings_in_element_script_compile() {
    let doc = compile_source(
        "div { class: a; script { {{.a}}->listen { click: () => { {{.b}}->listen { click: go }; } }; } }",
        Path::new("page.chtl"),
        &CompileOptions::default(),
    )
    .unwrap();
    assert!(doc.contains("__chtlListen(document.querySelector('.b')"));
    assert!(!doc.contains(".listen"));
}

#[test]
fn test_script_error_points_at_source_statement() {
    let err = compile_source(
        "div {\n  script {\n    {{.a}}->listen { click: go };\n    const = 1;\n  }\n}",
        Path::new("page.chtl"),
        &CompileOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    assert_eq!(err.line, 4);
    assert!(err.column <= 12);
}

#[test]
fn test_root_path_is_canonicalized_before_cycle_detection() {
    let (_dir, root) = project(&[
        ("a.chtl", "[Import] @Chtl from b;\ndiv {}"),
        ("b.chtl", "[Import] @Chtl from a;\nspan {}"),
    ]);
    let source = fs::read_to_string(root.join("a.chtl")).unwrap();
    let err = compile_source(&source, &root.join(".").join("a.chtl"), &CompileOptions::default())
        .unwrap_err();
    assert_eq!(err.code, E_IMPORT_CYCLE);
    let a = root.join("a.chtl").display().to_string();
    let b = root.join("b.chtl").display().to_string();
    assert_eq!(err.message, format!("Import cycle detected: {} -> {} -> {}", a, b, a));
}
