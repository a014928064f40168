// compiler.rs - Compile pipeline: preprocess → lex → parse → codegen → resolve

use crate::bytecode::{Program, SymbolicLine};
use crate::codegen::{CodeGen, CodegenError};
use crate::diagnostic::{Diagnostic, DiagnosticRenderer};
use crate::lexer::{Lexer, LexerError};
use crate::parser::{ParseError, Parser};
use crate::preprocessor::preprocess;
use crate::resolver::{resolve, ResolveError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("{} lexical error(s)", .0.len())]
    Lex(Vec<LexerError>),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    /// Codegen produced inconsistent labels
    #[error("internal compiler error: {0}")]
    Internal(#[from] ResolveError),
}

impl From<Vec<LexerError>> for CompileError {
    fn from(errors: Vec<LexerError>) -> Self {
        CompileError::Lex(errors)
    }
}

impl CompileError {
    /// One diagnostic per reportable problem, located in the preprocessed text.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            CompileError::Lex(errors) => errors
                .iter()
                .map(|e| Diagnostic::at(e.to_string(), e.offset(), e.len()))
                .collect(),
            CompileError::Parse(e) => vec![Diagnostic::at(e.to_string(), e.offset(), e.len())],
            CompileError::Codegen(e) => vec![Diagnostic::at(e.to_string(), e.offset(), e.len())],
            CompileError::Internal(_) => vec![Diagnostic::unlocated(self.to_string())],
        }
    }

    /// Render every diagnostic against `source` (the original script text).
    pub fn render(&self, path: &str, source: &str) -> String {
        let text = preprocess(source);
        let renderer = DiagnosticRenderer::new(path, &text);
        self.diagnostics()
            .iter()
            .map(|d| renderer.render_to_string(d))
            .collect()
    }
}

/// Everything produced by a successful compile.
#[derive(Debug, Clone, PartialEq)]
pub struct Compilation {
    /// Codegen output, labels still in place
    pub symbolic: Vec<SymbolicLine>,
    /// Label-free program ready for serialization
    pub program: Program,
}

/// Compile script source. Any error fails the whole compilation.
pub fn compile(source: &str) -> Result<Compilation, CompileError> {
    let text = preprocess(source);

    let tokens = Lexer::new(&text).tokenize()?;
    debug!(tokens = tokens.len(), "lexed");

    let ast = Parser::new(tokens).parse()?;
    debug!(items = ast.items.len(), "parsed");

    let symbolic = CodeGen::new().generate(&ast)?;
    let program = resolve(symbolic.clone())?;

    Ok(Compilation { symbolic, program })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BinaryOp, Instruction};

    #[test]
    fn test_pipeline() {
        let compiled = compile("VAR $x = 2 + 3\n").unwrap();
        assert_eq!(
            compiled.program,
            vec![
                Instruction::PushI(2),
                Instruction::PushI(3),
                Instruction::BinOp(BinaryOp::Add),
                Instruction::Assignment("$x".to_string()),
            ]
        );
    }

    #[test]
    fn test_define_applied_before_lexing() {
        let compiled = compile("DEFINE #MS 250\nDELAY #MS\n").unwrap();
        assert_eq!(
            compiled.program,
            vec![Instruction::PushI(250), Instruction::Delay]
        );
    }

    #[test]
    fn test_all_lex_errors_collected() {
        let err = compile("STRING ok\nDELAY 1 @\nDELAY 2 ~\n").unwrap_err();
        assert!(matches!(err, CompileError::Lex(ref errors) if errors.len() == 2));
        assert_eq!(err.diagnostics().len(), 2);
    }

    #[test]
    fn test_render_points_at_line() {
        let source = "DEFINE #X 1\nDELAY #X\nIF THEN\n";
        let err = compile(source).unwrap_err();
        let rendered = err.render("payload.txt", source);
        assert!(rendered.contains("payload.txt:3:4"), "{}", rendered);
        assert!(rendered.contains("unexpected THEN, expected expression"));
    }
}
