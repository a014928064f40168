// resolver.rs - Label resolution (symbolic lines → indexed program)

use crate::bytecode::{Instruction, Program, SymbolicLine};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("reference to undefined label '{0}'")]
    UndefinedLabel(String),

    #[error("label '{0}' defined twice")]
    DuplicateLabel(String),
}

/// Strip labels and rewrite every JUMP / JZ / CALL operand to the index of
/// the instruction following its label.
///
/// A label may sit at the very end of the program (the end of a trailing
/// IF or WHILE). In that case one NOOP is appended so the target is a real
/// instruction.
pub fn resolve(lines: Vec<SymbolicLine>) -> Result<Program, ResolveError> {
    let mut labels: HashMap<String, usize> = HashMap::new();
    let mut symbolic: Vec<Instruction<String>> = Vec::with_capacity(lines.len());

    for line in lines {
        match line {
            SymbolicLine::Label(name) => {
                if labels.contains_key(&name) {
                    return Err(ResolveError::DuplicateLabel(name));
                }
                labels.insert(name, symbolic.len());
            }
            SymbolicLine::Op(instruction) => symbolic.push(instruction),
        }
    }

    let needs_anchor = labels.values().any(|&index| index == symbolic.len());
    if needs_anchor {
        symbolic.push(Instruction::Noop);
    }

    let program = symbolic
        .into_iter()
        .map(|instruction| {
            instruction.map_target(|name| {
                labels
                    .get(&name)
                    .copied()
                    .ok_or(ResolveError::UndefinedLabel(name))
            })
        })
        .collect::<Result<Program, _>>()?;

    debug!(instructions = program.len(), labels = labels.len(), "labels resolved");
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(instruction: Instruction<String>) -> SymbolicLine {
        SymbolicLine::Op(instruction)
    }

    fn label(name: &str) -> SymbolicLine {
        SymbolicLine::Label(name.to_string())
    }

    #[test]
    fn test_forward_and_backward() {
        let lines = vec![
            label("top"),
            op(Instruction::PushI(1)),
            op(Instruction::Jz("end".to_string())),
            op(Instruction::Jump("top".to_string())),
            label("end"),
            op(Instruction::Noop),
        ];
        assert_eq!(
            resolve(lines).unwrap(),
            vec![
                Instruction::PushI(1),
                Instruction::Jz(3),
                Instruction::Jump(0),
                Instruction::Noop,
            ]
        );
    }

    #[test]
    fn test_stacked_labels_share_index() {
        let lines = vec![
            op(Instruction::Jump("a".to_string())),
            op(Instruction::Jump("b".to_string())),
            label("a"),
            label("b"),
            op(Instruction::Pop),
        ];
        assert_eq!(
            resolve(lines).unwrap(),
            vec![Instruction::Jump(2), Instruction::Jump(2), Instruction::Pop]
        );
    }

    #[test]
    fn test_label_at_end_gets_anchor() {
        let lines = vec![op(Instruction::Jump("end".to_string())), label("end")];
        assert_eq!(
            resolve(lines).unwrap(),
            vec![Instruction::Jump(1), Instruction::Noop]
        );
    }

    #[test]
    fn test_no_anchor_without_trailing_label() {
        let lines = vec![op(Instruction::PushI(2)), op(Instruction::Pop)];
        assert_eq!(resolve(lines).unwrap().len(), 2);
    }

    #[test]
    fn test_errors() {
        let undefined = vec![op(Instruction::Call("f".to_string()))];
        assert_eq!(
            resolve(undefined),
            Err(ResolveError::UndefinedLabel("f".to_string()))
        );

        let duplicate = vec![label("x"), op(Instruction::Noop), label("x")];
        assert_eq!(
            resolve(duplicate),
            Err(ResolveError::DuplicateLabel("x".to_string()))
        );
    }
}
