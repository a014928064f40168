// artifact.rs - Textual wire format and zlib framing of compiled payloads
//
// One instruction per line, `OPCODE` or `OPCODE operand`, every line
// terminated by '\n'. STRING payloads are base64 so any text fits on one
// line. The whole text is zlib-compressed to form the deployable artifact.

use crate::bytecode::{BinaryOp, Directive, Instruction, Program, SymbolicLine};
use crate::keys::Key;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::fmt::{self, Display, Write as _};
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Default artifact file name written by the compiler.
pub const DEFAULT_ARTIFACT: &str = "inject.bin";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("artifact is not valid zlib data: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("artifact text is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("line {line}: unknown instruction '{text}'")]
    UnknownInstruction { line: usize, text: String },

    #[error("line {line}: {opcode} requires an operand")]
    MissingOperand { line: usize, opcode: String },

    #[error("line {line}: invalid operand '{operand}' for {opcode}")]
    InvalidOperand {
        line: usize,
        opcode: String,
        operand: String,
    },

    #[error("line {line}: STRING payload is not valid base64: {source}")]
    Base64 {
        line: usize,
        source: base64::DecodeError,
    },

    #[error("line {line}: branch target {target} is outside the program ({len} instructions)")]
    JumpOutOfRange { line: usize, target: usize, len: usize },
}

// ============================================================================
// ENCODING
// ============================================================================

/// Wire form of one instruction. Works for symbolic and resolved targets.
pub struct Encoded<'a, T>(pub &'a Instruction<T>);

impl<T: Display> Display for Encoded<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let instruction = self.0;
        let opcode = instruction.opcode();

        match instruction {
            Instruction::PushI(n) => write!(f, "{} {}", opcode, n),
            Instruction::Push(name) | Instruction::Assignment(name) => {
                write!(f, "{} {}", opcode, name)
            }
            Instruction::BinOp(op) => write!(f, "{} {}", opcode, op.symbol()),
            Instruction::Jump(t) | Instruction::Jz(t) | Instruction::Call(t) => {
                write!(f, "{} {}", opcode, t)
            }
            Instruction::String(text) => write!(f, "{} {}", opcode, BASE64.encode(text)),
            Instruction::Keys(keys) => {
                write!(f, "{}", opcode)?;
                for key in keys {
                    write!(f, " {}", key)?;
                }
                Ok(())
            }
            Instruction::Hold(key) | Instruction::Release(key) => write!(f, "{} {}", opcode, key),
            Instruction::Noop
            | Instruction::Pop
            | Instruction::Ret
            | Instruction::Delay
            | Instruction::Exfil
            | Instruction::Directive(_) => write!(f, "{}", opcode),
        }
    }
}

/// The uncompressed artifact text: each instruction followed by '\n'.
pub fn to_text(program: &[Instruction]) -> String {
    let mut text = String::new();
    for instruction in program {
        // Writing into a String cannot fail
        let _ = writeln!(text, "{}", Encoded(instruction));
    }
    text
}

/// Symbolic listing with `label:` lines, for inspecting codegen output.
pub fn symbolic_text(lines: &[SymbolicLine]) -> String {
    let mut text = String::new();
    for line in lines {
        let _ = match line {
            SymbolicLine::Label(name) => writeln!(text, "{}:", name),
            SymbolicLine::Op(instruction) => writeln!(text, "    {}", Encoded(instruction)),
        };
    }
    text
}

/// Index-numbered listing of a resolved program.
pub fn disassemble(program: &[Instruction]) -> String {
    let width = program.len().saturating_sub(1).to_string().len();
    let mut text = String::new();
    for (index, instruction) in program.iter().enumerate() {
        let _ = match instruction {
            Instruction::String(s) => writeln!(text, "{:>width$}  STRING {:?}", index, s),
            _ => writeln!(text, "{:>width$}  {}", index, Encoded(instruction)),
        };
    }
    text
}

/// Compress a resolved program into artifact bytes.
pub fn serialize(program: &[Instruction]) -> Result<Vec<u8>, ArtifactError> {
    let text = to_text(program);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes())?;
    let bytes = encoder.finish()?;

    debug!(
        instructions = program.len(),
        text_bytes = text.len(),
        artifact_bytes = bytes.len(),
        "serialized"
    );
    Ok(bytes)
}

pub fn write_file(path: &Path, program: &[Instruction]) -> Result<(), ArtifactError> {
    let bytes = serialize(program)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

// ============================================================================
// DECODING
// ============================================================================

/// Decompress and decode artifact bytes. Nothing is executed until the whole
/// program has decoded and every branch target is known to be in range.
pub fn load(bytes: &[u8]) -> Result<Program, ArtifactError> {
    let mut raw = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut raw)
        .map_err(ArtifactError::Decompress)?;
    let text = String::from_utf8(raw)?;
    from_text(&text)
}

pub fn read_file(path: &Path) -> Result<Program, ArtifactError> {
    let bytes = std::fs::read(path)?;
    load(&bytes)
}

/// Decode uncompressed artifact text.
pub fn from_text(text: &str) -> Result<Program, ArtifactError> {
    let program = text
        .lines()
        .enumerate()
        .map(|(index, line)| decode_line(line, index + 1))
        .collect::<Result<Program, _>>()?;

    for (index, instruction) in program.iter().enumerate() {
        if let Some(&target) = instruction.target() {
            if target >= program.len() {
                return Err(ArtifactError::JumpOutOfRange {
                    line: index + 1,
                    target,
                    len: program.len(),
                });
            }
        }
    }

    debug!(instructions = program.len(), "artifact decoded");
    Ok(program)
}

/// Decode one line; `line` is 1-based and only used for error messages.
pub fn decode_line(text: &str, line: usize) -> Result<Instruction, ArtifactError> {
    let text = text.trim_end_matches('\r');
    if text.trim().is_empty() {
        return Ok(Instruction::Noop);
    }

    let (opcode, operand) = match text.split_once(' ') {
        Some((opcode, operand)) => (opcode, Some(operand)),
        None => (text, None),
    };

    let required = || {
        operand
            .filter(|o| !o.is_empty())
            .ok_or_else(|| ArtifactError::MissingOperand {
                line,
                opcode: opcode.to_string(),
            })
    };
    let invalid = |operand: &str| ArtifactError::InvalidOperand {
        line,
        opcode: opcode.to_string(),
        operand: operand.to_string(),
    };
    let key = |operand: &str| Key::parse(operand).ok_or_else(|| invalid(operand));
    let target = |operand: &str| operand.parse::<usize>().map_err(|_| invalid(operand));
    let variable = |operand: &str| {
        if operand.len() > 1 && operand.starts_with('$') && !operand.contains(char::is_whitespace)
        {
            Ok(operand.to_string())
        } else {
            Err(invalid(operand))
        }
    };

    let instruction = match opcode {
        "NOOP" => Instruction::Noop,
        "POP" => Instruction::Pop,
        "RET" => Instruction::Ret,
        "DELAY" => Instruction::Delay,
        "EXFIL" => Instruction::Exfil,

        "PUSHI" => {
            let operand = required()?;
            let n = operand.parse::<u64>().map_err(|_| invalid(operand))?;
            Instruction::PushI(n as u16)
        }
        "PUSH" => Instruction::Push(variable(required()?)?),
        "ASSIGNMENT" => Instruction::Assignment(variable(required()?)?),
        "BINOP" => {
            let operand = required()?;
            Instruction::BinOp(BinaryOp::from_symbol(operand).ok_or_else(|| invalid(operand))?)
        }

        "JUMP" => Instruction::Jump(target(required()?)?),
        "JZ" => Instruction::Jz(target(required()?)?),
        "CALL" => Instruction::Call(target(required()?)?),

        "STRING" => {
            let encoded = operand.unwrap_or("");
            let bytes = BASE64
                .decode(encoded)
                .map_err(|source| ArtifactError::Base64 { line, source })?;
            let text = String::from_utf8(bytes).map_err(|_| invalid(encoded))?;
            Instruction::String(text)
        }

        "KEYS" => {
            let keys = required()?
                .split_whitespace()
                .map(key)
                .collect::<Result<Vec<_>, _>>()?;
            if keys.is_empty() {
                return Err(ArtifactError::MissingOperand {
                    line,
                    opcode: opcode.to_string(),
                });
            }
            Instruction::Keys(keys)
        }
        "HOLD" => Instruction::Hold(key(required()?)?),
        "RELEASE" => Instruction::Release(key(required()?)?),

        _ => match Directive::from_name(opcode) {
            Some(directive) if operand.is_none() => Instruction::Directive(directive),
            _ => {
                return Err(ArtifactError::UnknownInstruction {
                    line,
                    text: text.to_string(),
                })
            }
        },
    };

    Ok(instruction)
}
