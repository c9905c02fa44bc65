use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;

use crate::backend::SourceCompiler;
use crate::config::CompileOptions;
use crate::error::{CompileResult, CompilerError, E_JS_SYNTAX};

/// Parses script text with oxc and re-emits it, minified on request.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsCompiler;

impl JsCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl SourceCompiler for JsCompiler {
    fn name(&self) -> &'static str {
        "javascript"
    }

    fn compile(&self, text: &str, options: &CompileOptions) -> CompileResult<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, text, SourceType::default()).parse();
        if let Some(err) = ret.errors.first() {
            let offset = err.labels.as_ref().and_then(|l| l.first()).map(|l| l.offset());
            return Err(syntax_error(text, offset.unwrap_or(0), &err.message));
        }

        let codegen_options = CodegenOptions {
            minify: options.minify,
            ..CodegenOptions::default()
        };
        let code = Codegen::new()
            .with_options(codegen_options)
            .build(&ret.program)
            .code;
        Ok(code.trim_end().to_string())
    }
}

/// Parse `text` without re-emitting it. Positions are relative to `text`.
pub fn check_syntax(text: &str) -> CompileResult<()> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, text, SourceType::default()).parse();
    match ret.errors.first() {
        Some(err) => {
            let offset = err.labels.as_ref().and_then(|l| l.first()).map(|l| l.offset());
            Err(syntax_error(text, offset.unwrap_or(0), &err.message))
        }
        None => Ok(()),
    }
}

fn syntax_error(text: &str, offset: usize, message: &str) -> CompilerError {
    let (line, column) = line_column(text, offset);
    CompilerError::new(
        E_JS_SYNTAX,
        &format!("JavaScript parse error: {}", message),
        "",
        line,
        column,
    )
}

/// 1-based line and column of a byte offset.
pub fn line_column(text: &str, offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut column = 1u32;
    for (i, ch) in text.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}
