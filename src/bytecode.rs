// bytecode.rs - Payload instruction set shared by the compiler and the VM

use crate::keys::Key;

// ============================================================================
// BINARY OPERATORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Or,     // ||
    And,    // &&
    Eq,     // ==
    Ne,     // !=
    Le,     // <=
    Ge,     // >=
    Lt,     // <
    Gt,     // >
    BitAnd, // &
    BitOr,  // |
    Shl,    // <<
    Shr,    // >>
    Add,    // +
    Sub,    // -
    Mul,    // *
    Div,    // /
    Mod,    // %
    Pow,    // ^
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<BinaryOp> {
        Self::all().iter().copied().find(|op| op.symbol() == symbol)
    }

    /// Binding strength, lowest first. All operators are left-associative.
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or | BinaryOp::And => 1,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Le
            | BinaryOp::Ge
            | BinaryOp::Lt
            | BinaryOp::Gt => 2,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::Shl | BinaryOp::Shr => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 5,
            BinaryOp::Pow => 6,
        }
    }

    pub fn all() -> &'static [BinaryOp] {
        &[
            BinaryOp::Or,
            BinaryOp::And,
            BinaryOp::Eq,
            BinaryOp::Ne,
            BinaryOp::Le,
            BinaryOp::Ge,
            BinaryOp::Lt,
            BinaryOp::Gt,
            BinaryOp::BitAnd,
            BinaryOp::BitOr,
            BinaryOp::Shl,
            BinaryOp::Shr,
            BinaryOp::Add,
            BinaryOp::Sub,
            BinaryOp::Mul,
            BinaryOp::Div,
            BinaryOp::Mod,
            BinaryOp::Pow,
        ]
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

// ============================================================================
// DIRECTIVES - zero-operand commands that compile 1:1 to an opcode
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    // Payload lifecycle
    RestartPayload,
    StopPayload,
    Reset,
    HidePayload,
    RestorePayload,

    // Lock keys
    WaitForCapsOn,
    WaitForCapsOff,
    WaitForCapsChange,
    WaitForNumOn,
    WaitForNumOff,
    WaitForNumChange,
    WaitForScrollOn,
    WaitForScrollOff,
    WaitForScrollChange,
    SaveHostKeyboardLockState,
    RestoreHostKeyboardLockState,

    // Random characters
    RandomLowercaseLetter,
    RandomUppercaseLetter,
    RandomLetter,
    RandomNumber,
    RandomSpecial,
    RandomChar,

    // LED
    LedOff,
    LedR,
    LedG,

    // Button
    WaitForButtonPress,
    DisableButton,
    EnableButton,
}

impl Directive {
    pub fn name(&self) -> &'static str {
        match self {
            Directive::RestartPayload => "RESTART_PAYLOAD",
            Directive::StopPayload => "STOP_PAYLOAD",
            Directive::Reset => "RESET",
            Directive::HidePayload => "HIDE_PAYLOAD",
            Directive::RestorePayload => "RESTORE_PAYLOAD",
            Directive::WaitForCapsOn => "WAIT_FOR_CAPS_ON",
            Directive::WaitForCapsOff => "WAIT_FOR_CAPS_OFF",
            Directive::WaitForCapsChange => "WAIT_FOR_CAPS_CHANGE",
            Directive::WaitForNumOn => "WAIT_FOR_NUM_ON",
            Directive::WaitForNumOff => "WAIT_FOR_NUM_OFF",
            Directive::WaitForNumChange => "WAIT_FOR_NUM_CHANGE",
            Directive::WaitForScrollOn => "WAIT_FOR_SCROLL_ON",
            Directive::WaitForScrollOff => "WAIT_FOR_SCROLL_OFF",
            Directive::WaitForScrollChange => "WAIT_FOR_SCROLL_CHANGE",
            Directive::SaveHostKeyboardLockState => "SAVE_HOST_KEYBOARD_LOCK_STATE",
            Directive::RestoreHostKeyboardLockState => "RESTORE_HOST_KEYBOARD_LOCK_STATE",
            Directive::RandomLowercaseLetter => "RANDOM_LOWERCASE_LETTER",
            Directive::RandomUppercaseLetter => "RANDOM_UPPERCASE_LETTER",
            Directive::RandomLetter => "RANDOM_LETTER",
            Directive::RandomNumber => "RANDOM_NUMBER",
            Directive::RandomSpecial => "RANDOM_SPECIAL",
            Directive::RandomChar => "RANDOM_CHAR",
            Directive::LedOff => "LED_OFF",
            Directive::LedR => "LED_R",
            Directive::LedG => "LED_G",
            Directive::WaitForButtonPress => "WAIT_FOR_BUTTON_PRESS",
            Directive::DisableButton => "DISABLE_BUTTON",
            Directive::EnableButton => "ENABLE_BUTTON",
        }
    }

    pub fn from_name(name: &str) -> Option<Directive> {
        Self::all().iter().copied().find(|d| d.name() == name)
    }

    pub fn all() -> &'static [Directive] {
        &[
            Directive::RestartPayload,
            Directive::StopPayload,
            Directive::Reset,
            Directive::HidePayload,
            Directive::RestorePayload,
            Directive::WaitForCapsOn,
            Directive::WaitForCapsOff,
            Directive::WaitForCapsChange,
            Directive::WaitForNumOn,
            Directive::WaitForNumOff,
            Directive::WaitForNumChange,
            Directive::WaitForScrollOn,
            Directive::WaitForScrollOff,
            Directive::WaitForScrollChange,
            Directive::SaveHostKeyboardLockState,
            Directive::RestoreHostKeyboardLockState,
            Directive::RandomLowercaseLetter,
            Directive::RandomUppercaseLetter,
            Directive::RandomLetter,
            Directive::RandomNumber,
            Directive::RandomSpecial,
            Directive::RandomChar,
            Directive::LedOff,
            Directive::LedR,
            Directive::LedG,
            Directive::WaitForButtonPress,
            Directive::DisableButton,
            Directive::EnableButton,
        ]
    }
}

// ============================================================================
// INSTRUCTIONS
// ============================================================================

/// One payload instruction. `T` is the branch target: a label name while the
/// program is symbolic, an absolute instruction index once it is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction<T = usize> {
    /// No effect
    Noop,

    /// Discard the top of the value stack
    Pop,

    /// Push an immediate value
    PushI(u16),

    /// Push a variable (or system pseudo-variable)
    Push(String),

    /// Pop into a variable
    Assignment(String),

    /// Pop right, pop left, push `left op right`
    BinOp(BinaryOp),

    /// Unconditional jump
    Jump(T),

    /// Pop; jump if the value is zero
    Jz(T),

    /// Push return address and jump
    Call(T),

    /// Pop return address and jump to it
    Ret,

    /// Type literal text
    String(String),

    /// Press a chord, hold briefly, release everything
    Keys(Vec<Key>),

    /// Press one key without releasing others
    Hold(Key),

    /// Release one key
    Release(Key),

    /// Pop milliseconds and block
    Delay,

    /// Pop a value and hand it to the exfil log
    Exfil,

    /// Zero-operand command
    Directive(Directive),
}

impl<T> Instruction<T> {
    /// Wire spelling of the opcode.
    pub fn opcode(&self) -> &'static str {
        match self {
            Instruction::Noop => "NOOP",
            Instruction::Pop => "POP",
            Instruction::PushI(_) => "PUSHI",
            Instruction::Push(_) => "PUSH",
            Instruction::Assignment(_) => "ASSIGNMENT",
            Instruction::BinOp(_) => "BINOP",
            Instruction::Jump(_) => "JUMP",
            Instruction::Jz(_) => "JZ",
            Instruction::Call(_) => "CALL",
            Instruction::Ret => "RET",
            Instruction::String(_) => "STRING",
            Instruction::Keys(_) => "KEYS",
            Instruction::Hold(_) => "HOLD",
            Instruction::Release(_) => "RELEASE",
            Instruction::Delay => "DELAY",
            Instruction::Exfil => "EXFIL",
            Instruction::Directive(d) => d.name(),
        }
    }

    /// Branch target, if this is a jump, conditional jump or call.
    pub fn target(&self) -> Option<&T> {
        match self {
            Instruction::Jump(t) | Instruction::Jz(t) | Instruction::Call(t) => Some(t),
            _ => None,
        }
    }

    /// Rewrite the branch target, leaving every other instruction untouched.
    pub fn map_target<U, E>(
        self,
        mut f: impl FnMut(T) -> Result<U, E>,
    ) -> Result<Instruction<U>, E> {
        Ok(match self {
            Instruction::Jump(t) => Instruction::Jump(f(t)?),
            Instruction::Jz(t) => Instruction::Jz(f(t)?),
            Instruction::Call(t) => Instruction::Call(f(t)?),
            Instruction::Noop => Instruction::Noop,
            Instruction::Pop => Instruction::Pop,
            Instruction::PushI(v) => Instruction::PushI(v),
            Instruction::Push(v) => Instruction::Push(v),
            Instruction::Assignment(v) => Instruction::Assignment(v),
            Instruction::BinOp(op) => Instruction::BinOp(op),
            Instruction::Ret => Instruction::Ret,
            Instruction::String(s) => Instruction::String(s),
            Instruction::Keys(keys) => Instruction::Keys(keys),
            Instruction::Hold(k) => Instruction::Hold(k),
            Instruction::Release(k) => Instruction::Release(k),
            Instruction::Delay => Instruction::Delay,
            Instruction::Exfil => Instruction::Exfil,
            Instruction::Directive(d) => Instruction::Directive(d),
        })
    }
}

/// A resolved program: branch targets are indices into the same vector.
pub type Program = Vec<Instruction>;

/// Output of code generation, before label resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolicLine {
    /// Zero-width marker naming the next instruction
    Label(String),
    Op(Instruction<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols_round_trip() {
        for op in BinaryOp::all() {
            assert_eq!(BinaryOp::from_symbol(op.symbol()), Some(*op));
        }
        assert_eq!(BinaryOp::from_symbol("**"), None);
    }

    #[test]
    fn test_precedence_order() {
        assert!(BinaryOp::Or.precedence() < BinaryOp::Eq.precedence());
        assert!(BinaryOp::Eq.precedence() < BinaryOp::Shl.precedence());
        assert!(BinaryOp::Shl.precedence() < BinaryOp::Add.precedence());
        assert!(BinaryOp::Add.precedence() < BinaryOp::Mul.precedence());
        assert!(BinaryOp::Mul.precedence() < BinaryOp::Pow.precedence());
    }

    #[test]
    fn test_directive_names() {
        assert_eq!(Directive::from_name("STOP_PAYLOAD"), Some(Directive::StopPayload));
        assert_eq!(Directive::from_name("LED_G").map(|d| d.name()), Some("LED_G"));
        assert_eq!(Directive::from_name("NOT_A_DIRECTIVE"), None);
    }

    #[test]
    fn test_map_target() {
        let jump: Instruction<String> = Instruction::Jz("end".to_string());
        let resolved: Result<Instruction, ()> = jump.map_target(|_| Ok(7));
        assert_eq!(resolved, Ok(Instruction::Jz(7)));

        let push: Instruction<String> = Instruction::PushI(3);
        let untouched: Result<Instruction, ()> = push.map_target(|_| Err(()));
        assert_eq!(untouched, Ok(Instruction::PushI(3)));
    }
}
