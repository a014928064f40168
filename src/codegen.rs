// codegen.rs - Code Generator (AST → symbolic instruction lines)

use crate::bytecode::{Instruction, SymbolicLine};
use crate::parser::{Expression, IfBranch, Item, Program, Statement};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodegenError {
    #[error("call to undefined function '{name}'")]
    UndefinedFunction { name: String, offset: usize },

    #[error("function '{name}' is already defined")]
    DuplicateFunction { name: String, offset: usize },
}

impl CodegenError {
    pub fn offset(&self) -> usize {
        match self {
            CodegenError::UndefinedFunction { offset, .. }
            | CodegenError::DuplicateFunction { offset, .. } => *offset,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CodegenError::UndefinedFunction { name, .. } => name.len(),
            // Points at the FUNCTION keyword
            CodegenError::DuplicateFunction { .. } => "FUNCTION".len(),
        }
    }
}

// ============================================================================
// CODE GENERATOR
// ============================================================================

pub struct CodeGen {
    /// Emitted lines, labels included
    lines: Vec<SymbolicLine>,

    /// Next generated label number; shared by every construct in the unit
    next_label: usize,

    /// Declared functions, collected before any code is emitted
    functions: HashMap<String, usize>,
}

impl Default for CodeGen {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGen {
    pub fn new() -> Self {
        CodeGen {
            lines: Vec::new(),
            next_label: 0,
            functions: HashMap::new(),
        }
    }

    /// Lower a whole program. Functions may be called before their definition.
    pub fn generate(mut self, program: &Program) -> Result<Vec<SymbolicLine>, CodegenError> {
        self.declare_functions(program)?;

        for item in &program.items {
            self.lower_item(item)?;
        }

        debug!(
            lines = self.lines.len(),
            labels = self.next_label,
            functions = self.functions.len(),
            "codegen done"
        );
        Ok(self.lines)
    }

    fn declare_functions(&mut self, program: &Program) -> Result<(), CodegenError> {
        for item in &program.items {
            if let Item::Function { name, offset, .. } = item {
                if self.functions.insert(name.clone(), *offset).is_some() {
                    return Err(CodegenError::DuplicateFunction {
                        name: name.clone(),
                        offset: *offset,
                    });
                }
            }
        }
        Ok(())
    }

    fn lower_item(&mut self, item: &Item) -> Result<(), CodegenError> {
        match item {
            Item::Statement(statement) => self.lower_statement(statement),

            Item::Function { name, body, .. } => {
                // Out of line: skip the body when control reaches the definition
                let after = self.fresh_label();
                self.emit(Instruction::Jump(after.clone()));
                self.label(name.clone());
                self.lower_block(body)?;

                // Falling off the end returns 0
                self.emit(Instruction::PushI(0));
                self.emit(Instruction::Ret);
                self.label(after);
                Ok(())
            }

            Item::ButtonDef { body } => {
                warn!(statements = body.len(), "BUTTON_DEF body is not compiled");
                Ok(())
            }
        }
    }

    fn lower_block(&mut self, body: &[Statement]) -> Result<(), CodegenError> {
        for statement in body {
            self.lower_statement(statement)?;
        }
        Ok(())
    }

    fn lower_statement(&mut self, statement: &Statement) -> Result<(), CodegenError> {
        match statement {
            Statement::Rem => self.emit(Instruction::Noop),

            Statement::Expression(expr) => {
                self.lower_expression(expr)?;
                self.emit(Instruction::Pop);
            }

            Statement::Assign { name, value } => {
                self.lower_expression(value)?;
                self.emit(Instruction::Assignment(name.clone()));
            }

            Statement::Return(expr) => {
                self.lower_expression(expr)?;
                self.emit(Instruction::Ret);
            }

            Statement::String(text) => self.emit(Instruction::String(text.clone())),

            Statement::Delay(expr) => {
                self.lower_expression(expr)?;
                self.emit(Instruction::Delay);
            }

            Statement::Exfil(expr) => {
                self.lower_expression(expr)?;
                self.emit(Instruction::Exfil);
            }

            Statement::If { branches, otherwise } => {
                self.lower_if(branches, otherwise.as_deref())?;
            }

            Statement::While { condition, body } => {
                let top = self.fresh_label();
                let end = self.fresh_label();

                self.label(top.clone());
                self.lower_expression(condition)?;
                self.emit(Instruction::Jz(end.clone()));
                self.lower_block(body)?;
                self.emit(Instruction::Jump(top));
                self.label(end);
            }

            Statement::Hold(key) => self.emit(Instruction::Hold(*key)),
            Statement::Release(key) => self.emit(Instruction::Release(*key)),
            Statement::Keys(keys) => self.emit(Instruction::Keys(keys.clone())),
            Statement::Directive(directive) => self.emit(Instruction::Directive(*directive)),

            // USB presentation is decided by the host, not the payload program
            Statement::AttackMode(mode) => debug!(?mode, "ATTACKMODE has no runtime effect"),
            Statement::SaveAttackMode | Statement::RestoreAttackMode => {}
        }
        Ok(())
    }

    /// cond, JZ else, then, JUMP end, else:, rest of the chain, end:
    fn lower_if(
        &mut self,
        branches: &[IfBranch],
        otherwise: Option<&[Statement]>,
    ) -> Result<(), CodegenError> {
        let Some((first, rest)) = branches.split_first() else {
            if let Some(body) = otherwise {
                self.lower_block(body)?;
            }
            return Ok(());
        };

        let else_label = self.fresh_label();
        let end_label = self.fresh_label();

        self.lower_expression(&first.condition)?;
        self.emit(Instruction::Jz(else_label.clone()));
        self.lower_block(&first.body)?;
        self.emit(Instruction::Jump(end_label.clone()));

        self.label(else_label);
        self.lower_if(rest, otherwise)?;
        self.label(end_label);
        Ok(())
    }

    /// Leaves exactly one value on the stack.
    fn lower_expression(&mut self, expr: &Expression) -> Result<(), CodegenError> {
        match expr {
            Expression::Number(n) => self.emit(Instruction::PushI(*n as u16)),

            Expression::Bool(b) => self.emit(Instruction::PushI(u16::from(*b))),

            Expression::Variable(name) => self.emit(Instruction::Push(name.clone())),

            Expression::Call { name, offset } => {
                if !self.functions.contains_key(name) {
                    return Err(CodegenError::UndefinedFunction {
                        name: name.clone(),
                        offset: *offset,
                    });
                }
                self.emit(Instruction::Call(name.clone()));
            }

            Expression::Binary { op, left, right } => {
                self.lower_expression(left)?;
                self.lower_expression(right)?;
                self.emit(Instruction::BinOp(*op));
            }
        }
        Ok(())
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Generated labels start with '.', which no function name can.
    fn fresh_label(&mut self) -> String {
        let label = format!(".L{}", self.next_label);
        self.next_label += 1;
        label
    }

    fn emit(&mut self, instruction: Instruction<String>) {
        self.lines.push(SymbolicLine::Op(instruction));
    }

    fn label(&mut self, name: String) {
        self.lines.push(SymbolicLine::Label(name));
    }
}
