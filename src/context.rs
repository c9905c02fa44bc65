//! Compile context shared by every fragment of one compilation unit.
//!
//! A context owns the lexical scope stack, the parse-state stack, the import
//! bookkeeping used for cycle detection and de-duplication, the namespace
//! path and the compile options. One context serves a root file and its whole
//! import closure; imported files get fresh scope and state frames layered
//! over the shared import and namespace state (see
//! [`CompileContext::with_fresh_frames`]).
//!
//! Every push has a paired pop. The closure forms ([`CompileContext::scoped`],
//! [`CompileContext::in_state`]) and the guards ([`ScopeGuard`],
//! [`StateGuard`]) release on every exit path, errors included.

use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use crate::config::CompileOptions;
use crate::error::{
    CompilerError, E_IMPORT_CONFLICT, E_IMPORT_CYCLE, E_NAMESPACE_UNDERFLOW, E_SCOPE_UNDERFLOW,
};
use crate::imports::ImportKind;
use crate::state::{ParseState, StateContext, StateMachine};

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPE
// ═══════════════════════════════════════════════════════════════════════════════

/// One level of lexical scope: local variables, local style entries and the
/// element currently being compiled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    pub variables: HashMap<String, String>,
    pub styles: HashMap<String, String>,
    pub current_element: Option<String>,
    pub current_class: Option<String>,
    pub current_id: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// IMPORT TRACKING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct ImportTracker {
    /// Files whose compilation has started and not finished, outermost first.
    in_progress: Vec<PathBuf>,
    /// Files fully compiled (or inlined), with the kind they were imported as.
    imported: BTreeMap<PathBuf, ImportKind>,
}

impl ImportTracker {
    pub fn is_in_progress(&self, path: &Path) -> bool {
        self.in_progress.iter().any(|p| p == path)
    }

    pub fn in_progress(&self) -> &[PathBuf] {
        &self.in_progress
    }

    pub fn is_imported(&self, path: &Path) -> bool {
        self.imported.contains_key(path)
    }

    pub fn imported(&self) -> &BTreeMap<PathBuf, ImportKind> {
        &self.imported
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILE CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct CompileContext {
    scopes: Vec<Scope>,
    states: StateMachine,
    imports: ImportTracker,
    namespaces: Vec<String>,
    /// Named `[Origin]` blocks, keyed by `(type, name)`.
    origins: BTreeMap<(String, String), String>,
    pub options: CompileOptions,
    /// File whose fragments are currently being compiled.
    pub current_file: String,
}

impl CompileContext {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            scopes: vec![Scope::default()],
            states: StateMachine::new(),
            imports: ImportTracker::default(),
            namespaces: Vec::new(),
            origins: BTreeMap::new(),
            options,
            current_file: String::new(),
        }
    }

    /// Back to a freshly constructed context with default options.
    pub fn reset(&mut self) {
        self.scopes.clear();
        self.scopes.push(Scope::default());
        self.states.reset();
        self.imports = ImportTracker::default();
        self.namespaces.clear();
        self.origins.clear();
        self.options = CompileOptions::default();
        self.current_file.clear();
    }

    // ─── Scopes ────────────────────────────────────────────────────────────

    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pop the innermost scope. The global scope is never popped.
    pub fn exit_scope(&mut self) -> Result<Scope, CompilerError> {
        if self.scopes.len() <= 1 {
            return Err(CompilerError::unlocated(
                E_SCOPE_UNDERFLOW,
                "Scope stack underflow: cannot pop the global scope",
            ));
        }
        self.scopes
            .pop()
            .ok_or_else(|| CompilerError::unlocated(E_SCOPE_UNDERFLOW, "Scope stack is empty"))
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn current_scope(&self) -> &Scope {
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn current_scope_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Run `f` inside a new scope, popping it afterwards whatever `f` returns.
    pub fn scoped<T>(
        &mut self,
        f: impl FnOnce(&mut CompileContext) -> Result<T, CompilerError>,
    ) -> Result<T, CompilerError> {
        self.enter_scope();
        let result = f(self);
        let popped = self.exit_scope();
        let value = result?;
        popped?;
        Ok(value)
    }

    pub fn scope_guard(&mut self) -> ScopeGuard<'_> {
        self.enter_scope();
        ScopeGuard {
            ctx: self,
            released: false,
        }
    }

    pub fn set_variable(&mut self, name: &str, value: &str) {
        self.current_scope_mut()
            .variables
            .insert(name.to_string(), value.to_string());
    }

    /// Innermost binding of `name`, or `None` when no scope defines it.
    pub fn get_variable(&self, name: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.variables.get(name))
            .map(String::as_str)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.variables.contains_key(name))
    }

    pub fn set_style(&mut self, property: &str, value: &str) {
        self.current_scope_mut()
            .styles
            .insert(property.to_string(), value.to_string());
    }

    pub fn get_style(&self, property: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.styles.get(property))
            .map(String::as_str)
    }

    pub fn set_current_element(&mut self, name: &str) {
        self.current_scope_mut().current_element = Some(name.to_string());
    }

    pub fn set_current_class(&mut self, class: &str) {
        self.current_scope_mut().current_class = Some(class.to_string());
    }

    pub fn set_current_id(&mut self, id: &str) {
        self.current_scope_mut().current_id = Some(id.to_string());
    }

    /// Nearest enclosing element name.
    pub fn current_element(&self) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.current_element.as_deref())
    }

    pub fn current_class(&self) -> Option<&str> {
        self.current_scope().current_class.as_deref()
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_scope().current_id.as_deref()
    }

    // ─── Parse states ──────────────────────────────────────────────────────

    pub fn enter_state(&mut self, state: ParseState, label: &str) {
        self.states.enter(state, label);
    }

    /// Push `state` opened at `line:column`, with `brace_depth` open braces
    /// counted after its own `{`.
    pub fn enter_state_at(
        &mut self,
        state: ParseState,
        label: &str,
        line: u32,
        column: u32,
        brace_depth: usize,
    ) {
        self.states.enter_at(state, label, line, column, brace_depth);
    }

    pub fn exit_state(&mut self) -> Result<StateContext, CompilerError> {
        self.states.exit()
    }

    pub fn current_state(&self) -> ParseState {
        self.states.current()
    }

    pub fn states(&self) -> &StateMachine {
        &self.states
    }

    /// Run `f` with `state` pushed, popping it afterwards whatever `f` returns.
    pub fn in_state<T>(
        &mut self,
        state: ParseState,
        label: &str,
        f: impl FnOnce(&mut CompileContext) -> Result<T, CompilerError>,
    ) -> Result<T, CompilerError> {
        self.enter_state(state, label);
        let result = f(self);
        let popped = self.exit_state();
        let value = result?;
        popped?;
        Ok(value)
    }

    pub fn state_guard(&mut self, state: ParseState, label: &str) -> StateGuard<'_> {
        self.enter_state(state, label);
        StateGuard {
            ctx: self,
            released: false,
        }
    }

    /// Run `f` on a new global scope and `TopLevel` state, sharing import and
    /// namespace tracking. The caller's frames are restored afterwards.
    pub fn with_fresh_frames<T>(
        &mut self,
        f: impl FnOnce(&mut CompileContext) -> Result<T, CompilerError>,
    ) -> Result<T, CompilerError> {
        let saved_scopes = std::mem::replace(&mut self.scopes, vec![Scope::default()]);
        let saved_states = std::mem::take(&mut self.states);
        let saved_file = self.current_file.clone();
        let result = f(self);
        self.scopes = saved_scopes;
        self.states = saved_states;
        self.current_file = saved_file;
        result
    }

    // ─── Imports ───────────────────────────────────────────────────────────

    /// Mark `path` as being compiled. Fails when it already is, with the
    /// import chain that leads back to it.
    pub fn begin_import(&mut self, path: &Path) -> Result<(), CompilerError> {
        if self.imports.is_in_progress(path) {
            let mut chain: Vec<String> = self
                .imports
                .in_progress
                .iter()
                .skip_while(|p| p.as_path() != path)
                .map(|p| p.display().to_string())
                .collect();
            chain.push(path.display().to_string());
            return Err(CompilerError::unlocated(
                E_IMPORT_CYCLE,
                &format!("Import cycle detected: {}", chain.join(" -> ")),
            ));
        }
        self.imports.in_progress.push(path.to_path_buf());
        Ok(())
    }

    pub fn end_import(&mut self, path: &Path) {
        if let Some(pos) = self.imports.in_progress.iter().rposition(|p| p == path) {
            self.imports.in_progress.remove(pos);
        }
    }

    /// Record `path` as imported. Returns `false` when it was already recorded
    /// with the same kind, and a conflict error when the kinds differ.
    pub fn mark_imported(&mut self, path: &Path, kind: ImportKind) -> Result<bool, CompilerError> {
        match self.imports.imported.get(path) {
            Some(existing) if *existing == kind => Ok(false),
            Some(existing) => Err(CompilerError::unlocated(
                E_IMPORT_CONFLICT,
                &format!(
                    "'{}' already imported as {}, cannot import it again as {}",
                    path.display(),
                    existing,
                    kind
                ),
            )),
            None => {
                self.imports.imported.insert(path.to_path_buf(), kind);
                Ok(true)
            }
        }
    }

    pub fn is_imported(&self, path: &Path) -> bool {
        self.imports.is_imported(path)
    }

    pub fn imports(&self) -> &ImportTracker {
        &self.imports
    }

    // ─── Namespaces ────────────────────────────────────────────────────────

    pub fn enter_namespace(&mut self, name: &str) {
        self.namespaces.push(name.to_string());
    }

    pub fn exit_namespace(&mut self) -> Result<String, CompilerError> {
        self.namespaces.pop().ok_or_else(|| {
            CompilerError::unlocated(
                E_NAMESPACE_UNDERFLOW,
                "Namespace stack underflow: no namespace to exit",
            )
        })
    }

    pub fn current_namespace(&self) -> Option<&str> {
        self.namespaces.last().map(String::as_str)
    }

    /// Dotted path of every open namespace, outermost first.
    pub fn namespace_path(&self) -> String {
        self.namespaces.join(".")
    }

    pub fn namespace_depth(&self) -> usize {
        self.namespaces.len()
    }

    // ─── Named origins ─────────────────────────────────────────────────────

    pub fn define_origin(&mut self, origin_type: &str, name: &str, content: &str) {
        self.origins
            .insert((origin_type.to_string(), name.to_string()), content.to_string());
    }

    pub fn origin(&self, origin_type: &str, name: &str) -> Option<&str> {
        self.origins
            .get(&(origin_type.to_string(), name.to_string()))
            .map(String::as_str)
    }
}

impl Default for CompileContext {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GUARDS
// ═══════════════════════════════════════════════════════════════════════════════

/// A scope pushed by [`CompileContext::scope_guard`]. Popped by
/// [`ScopeGuard::finish`], or on drop if never finished.
pub struct ScopeGuard<'a> {
    ctx: &'a mut CompileContext,
    released: bool,
}

impl ScopeGuard<'_> {
    pub fn finish(mut self) -> Result<Scope, CompilerError> {
        self.released = true;
        self.ctx.exit_scope()
    }
}

impl Deref for ScopeGuard<'_> {
    type Target = CompileContext;

    fn deref(&self) -> &CompileContext {
        self.ctx
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut CompileContext {
        self.ctx
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            // Depth is at least 2 here: the guard pushed one scope.
            let _ = self.ctx.exit_scope();
        }
    }
}

/// A parse state pushed by [`CompileContext::state_guard`].
pub struct StateGuard<'a> {
    ctx: &'a mut CompileContext,
    released: bool,
}

impl StateGuard<'_> {
    pub fn finish(mut self) -> Result<StateContext, CompilerError> {
        self.released = true;
        self.ctx.exit_state()
    }
}

impl Deref for StateGuard<'_> {
    type Target = CompileContext;

    fn deref(&self) -> &CompileContext {
        self.ctx
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut CompileContext {
        self.ctx
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.ctx.exit_state();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, E_UNSUPPORTED_DECLARATION};

    #[test]
    fn test_inner_scope_shadows_outer() {
        let mut ctx = CompileContext::default();
        ctx.set_variable("color", "red");
        ctx.enter_scope();
        ctx.set_variable("color", "blue");
        assert_eq!(ctx.get_variable("color"), Some("blue"));
        ctx.exit_scope().unwrap();
        assert_eq!(ctx.get_variable("color"), Some("red"));
    }

    #[test]
    fn test_missing_variable_is_none_not_empty() {
        let mut ctx = CompileContext::default();
        ctx.set_variable("empty", "");
        assert_eq!(ctx.get_variable("empty"), Some(""));
        assert!(ctx.has_variable("empty"));
        assert_eq!(ctx.get_variable("absent"), None);
        assert!(!ctx.has_variable("absent"));
    }

    #[test]
    fn test_variable_disappears_with_its_scope() {
        let mut ctx = CompileContext::default();
        ctx.enter_scope();
        ctx.set_variable("inner", "1");
        ctx.exit_scope().unwrap();
        assert!(!ctx.has_variable("inner"));
    }

    #[test]
    fn test_global_scope_cannot_be_popped() {
        let mut ctx = CompileContext::default();
        let err = ctx.exit_scope().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert_eq!(ctx.scope_depth(), 1);
    }

    #[test]
    fn test_state_exit_at_top_level_leaves_stack_unchanged() {
        let mut ctx = CompileContext::default();
        let err = ctx.exit_state().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert_eq!(ctx.states().depth(), 1);
        assert_eq!(ctx.current_state(), ParseState::TopLevel);
    }

    #[test]
    fn test_scoped_pops_even_on_error() {
        let mut ctx = CompileContext::default();
        let result: Result<(), CompilerError> = ctx.scoped(|inner| {
            inner.set_variable("x", "1");
            Err(CompilerError::unlocated(E_UNSUPPORTED_DECLARATION, "nope"))
        });
        assert!(result.is_err());
        assert_eq!(ctx.scope_depth(), 1);
        assert!(!ctx.has_variable("x"));
    }

    #[test]
    fn test_in_state_pops_even_on_error() {
        let mut ctx = CompileContext::default();
        let result: Result<(), CompilerError> = ctx.in_state(ParseState::InElement, "div", |inner| {
            assert_eq!(inner.current_state(), ParseState::InElement);
            Err(CompilerError::unlocated(E_UNSUPPORTED_DECLARATION, "nope"))
        });
        assert!(result.is_err());
        assert_eq!(ctx.current_state(), ParseState::TopLevel);
    }

    #[test]
    fn test_state_records_brace_depth_not_stack_depth() {
        let mut ctx = CompileContext::default();
        ctx.enter_state(ParseState::InNamespace, "ui");
        ctx.enter_state_at(ParseState::InElement, "div", 3, 5, 4);
        let entry = ctx.states().current_context();
        assert_eq!((entry.line, entry.column, entry.brace_depth), (3, 5, 4));
        assert_eq!(ctx.states().depth(), 3);
    }

    #[test]
    fn test_guards_release_on_drop() {
        let mut ctx = CompileContext::default();
        {
            let mut guard = ctx.scope_guard();
            guard.set_variable("y", "2");
            let mut state = guard.state_guard(ParseState::InLocalScript, "script");
            assert_eq!(state.current_state(), ParseState::InLocalScript);
            state.set_current_element("div");
        }
        assert_eq!(ctx.scope_depth(), 1);
        assert_eq!(ctx.states().depth(), 1);
        assert!(!ctx.has_variable("y"));
    }

    #[test]
    fn test_guard_finish_releases_once() {
        let mut ctx = CompileContext::default();
        let guard = ctx.scope_guard();
        let scope = guard.finish().unwrap();
        assert!(scope.variables.is_empty());
        assert_eq!(ctx.scope_depth(), 1);
    }

    #[test]
    fn test_current_element_walks_outward() {
        let mut ctx = CompileContext::default();
        ctx.enter_scope();
        ctx.set_current_element("div");
        ctx.enter_scope();
        assert_eq!(ctx.current_element(), Some("div"));
        assert_eq!(ctx.current_class(), None);
    }

    #[test]
    fn test_begin_import_reports_cycle_chain() {
        let mut ctx = CompileContext::default();
        let a = PathBuf::from("/p/a.chtl");
        let b = PathBuf::from("/p/b.chtl");
        ctx.begin_import(&a).unwrap();
        ctx.begin_import(&b).unwrap();
        let err = ctx.begin_import(&a).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Import);
        assert!(err.message.contains("a.chtl -> /p/b.chtl -> /p/a.chtl"));
        ctx.end_import(&b);
        ctx.end_import(&a);
        assert!(ctx.imports().in_progress().is_empty());
    }

    #[test]
    fn test_mark_imported_detects_duplicates_and_conflicts() {
        let mut ctx = CompileContext::default();
        let path = PathBuf::from("/p/theme.css");
        assert!(ctx.mark_imported(&path, ImportKind::Style).unwrap());
        assert!(!ctx.mark_imported(&path, ImportKind::Style).unwrap());
        let err = ctx.mark_imported(&path, ImportKind::JavaScript).unwrap_err();
        assert_eq!(err.code, E_IMPORT_CONFLICT);
        assert!(ctx.is_imported(&path));
    }

    #[test]
    fn test_namespace_path_and_underflow() {
        let mut ctx = CompileContext::default();
        ctx.enter_namespace("ui");
        ctx.enter_namespace("forms");
        assert_eq!(ctx.namespace_path(), "ui.forms");
        assert_eq!(ctx.current_namespace(), Some("forms"));
        ctx.exit_namespace().unwrap();
        ctx.exit_namespace().unwrap();
        let err = ctx.exit_namespace().unwrap_err();
        assert_eq!(err.code, E_NAMESPACE_UNDERFLOW);
    }

    #[test]
    fn test_fresh_frames_share_import_state() {
        let mut ctx = CompileContext::default();
        ctx.set_variable("outer", "1");
        ctx.enter_state(ParseState::InElement, "body");
        ctx.with_fresh_frames(|inner| {
            assert!(!inner.has_variable("outer"));
            assert_eq!(inner.current_state(), ParseState::TopLevel);
            inner.mark_imported(Path::new("/p/b.chtl"), ImportKind::Chtl)?;
            Ok(())
        })
        .unwrap();
        assert!(ctx.has_variable("outer"));
        assert_eq!(ctx.current_state(), ParseState::InElement);
        assert!(ctx.is_imported(Path::new("/p/b.chtl")));
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut options = CompileOptions::default();
        options.use_html5 = true;
        let mut ctx = CompileContext::new(options);
        ctx.enter_scope();
        ctx.enter_state(ParseState::InTemplate, "T");
        ctx.enter_namespace("ns");
        ctx.begin_import(Path::new("/p/a.chtl")).unwrap();
        ctx.define_origin("@Html", "banner", "<b>hi</b>");
        ctx.reset();
        assert_eq!(ctx.origin("@Html", "banner"), None);
        assert_eq!(ctx.scope_depth(), 1);
        assert_eq!(ctx.states().depth(), 1);
        assert_eq!(ctx.namespace_depth(), 0);
        assert!(ctx.imports().in_progress().is_empty());
        assert!(!ctx.options.use_html5);
    }
}
