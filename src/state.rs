use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CompilerError, E_STATE_UNDERFLOW};

/// What nested construct is currently being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParseState {
    TopLevel,

    // Declarations
    InTemplate,
    InCustom,
    InOrigin,
    InImport,
    InNamespace,
    InConfiguration,

    // Elements
    InElement,
    InText,
    InAttribute,
    InLocalStyle,
    InLocalScript,

    // Styles
    InStyleRule,
    InStyleSelector,
    InStyleProperty,

    // Specialization
    InSpecialization,
    InDelete,
    InInsert,

    // Expressions
    InExpression,
    InFunctionCall,

    // Literals
    InString,
    InComment,
}

impl ParseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseState::TopLevel => "TopLevel",
            ParseState::InTemplate => "InTemplate",
            ParseState::InCustom => "InCustom",
            ParseState::InOrigin => "InOrigin",
            ParseState::InImport => "InImport",
            ParseState::InNamespace => "InNamespace",
            ParseState::InConfiguration => "InConfiguration",
            ParseState::InElement => "InElement",
            ParseState::InText => "InText",
            ParseState::InAttribute => "InAttribute",
            ParseState::InLocalStyle => "InLocalStyle",
            ParseState::InLocalScript => "InLocalScript",
            ParseState::InStyleRule => "InStyleRule",
            ParseState::InStyleSelector => "InStyleSelector",
            ParseState::InStyleProperty => "InStyleProperty",
            ParseState::InSpecialization => "InSpecialization",
            ParseState::InDelete => "InDelete",
            ParseState::InInsert => "InInsert",
            ParseState::InExpression => "InExpression",
            ParseState::InFunctionCall => "InFunctionCall",
            ParseState::InString => "InString",
            ParseState::InComment => "InComment",
        }
    }
}

impl fmt::Display for ParseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateContext {
    pub state: ParseState,
    /// Element, template or namespace name, when there is one.
    pub label: String,
    pub line: u32,
    pub column: u32,
    pub brace_depth: usize,
}

/// Stack of parse states. The current state is always the top entry; the
/// bottom entry is a `TopLevel` that can never be exited.
#[derive(Debug, Clone)]
pub struct StateMachine {
    stack: Vec<StateContext>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            stack: vec![Self::top_level()],
        }
    }

    fn top_level() -> StateContext {
        StateContext {
            state: ParseState::TopLevel,
            label: "TopLevel".to_string(),
            line: 0,
            column: 0,
            brace_depth: 0,
        }
    }

    pub fn enter(&mut self, state: ParseState, label: &str) {
        self.enter_at(state, label, 0, 0, 0);
    }

    pub fn enter_at(&mut self, state: ParseState, label: &str, line: u32, column: u32, brace_depth: usize) {
        self.stack.push(StateContext {
            state,
            label: label.to_string(),
            line,
            column,
            brace_depth,
        });
    }

    /// Pop the current state. Refused, with the stack untouched, when only
    /// the `TopLevel` entry remains.
    pub fn exit(&mut self) -> Result<StateContext, CompilerError> {
        if self.stack.len() <= 1 {
            return Err(CompilerError::unlocated(
                E_STATE_UNDERFLOW,
                "State stack underflow: cannot exit the top-level state",
            ));
        }
        self.stack.pop().ok_or_else(|| {
            CompilerError::unlocated(E_STATE_UNDERFLOW, "State stack is empty")
        })
    }

    pub fn current(&self) -> ParseState {
        self.current_context().state
    }

    pub fn current_context(&self) -> &StateContext {
        // The bottom entry is never popped.
        &self.stack[self.stack.len() - 1]
    }

    pub fn is_in(&self, state: ParseState) -> bool {
        self.current() == state
    }

    pub fn is_in_any(&self, states: &[ParseState]) -> bool {
        states.contains(&self.current())
    }

    /// Whether `state` appears anywhere on the stack.
    pub fn is_within(&self, state: ParseState) -> bool {
        self.stack.iter().any(|ctx| ctx.state == state)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn entries(&self) -> &[StateContext] {
        &self.stack
    }

    pub fn reset(&mut self) {
        self.stack.clear();
        self.stack.push(Self::top_level());
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
