// vm.rs - Payload virtual machine: fetch, dispatch, advance

use crate::bytecode::{BinaryOp, Directive, Instruction, Program};
use crate::config::VmConfig;
use crate::hardware::{Devices, LockKey};
use crate::rng::RngStream;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

// ============================================================================
// CHARACTER CLASSES - RANDOM_* directives and $_RANDOM_*_KEYCODE
// ============================================================================

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*()";
const ALL_CHARS: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()";

/// System variables present at start and after every restart.
const SYSTEM_VARIABLES: &[(&str, u16)] = &[
    ("$_RANDOM_MIN", 1),
    ("$_RANDOM_MAX", 9),
    ("$_JITTER_MAX", 20),
    ("$_JITTER_ENABLED", 0),
    ("$_LED_SHOW_CAPS", 0),
    ("$_LED_SHOW_NUM", 0),
    ("$_LED_SHOW_SCROLL", 0),
];

// ============================================================================
// STACK
// ============================================================================

#[derive(Debug, Clone)]
pub struct Stack {
    data: Vec<u16>,
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

impl Stack {
    pub fn new() -> Self {
        Stack {
            data: Vec::with_capacity(64),
        }
    }

    pub fn push(&mut self, value: u16) {
        self.data.push(value);
    }

    pub fn pop(&mut self) -> Result<u16, VmError> {
        self.data.pop().ok_or(VmError::StackUnderflow)
    }

    pub fn peek(&self) -> Option<u16> {
        self.data.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Values from bottom to top
    pub fn as_slice(&self) -> &[u16] {
        &self.data
    }
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error("value stack underflow")]
    StackUnderflow,

    #[error("RET with an empty call stack")]
    CallStackUnderflow,

    #[error("call depth limit of {depth} exceeded")]
    CallStackOverflow { depth: usize },

    #[error("undefined variable {0}")]
    UndefinedVariable(String),

    #[error("division by zero ({op})")]
    DivisionByZero { op: BinaryOp },

    #[error("branch target {target} is outside the program")]
    JumpOutOfRange { target: usize },
}

/// Outcome of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Halted,
}

// ============================================================================
// VM
// ============================================================================

pub struct Vm {
    program: Program,
    config: VmConfig,
    rng: RngStream,

    /// Instruction pointer
    ip: usize,
    stack: Stack,
    /// Return addresses pushed by CALL
    call_stack: Vec<usize>,
    variables: HashMap<String, u16>,

    /// Caps, Num, Scroll as captured by SAVE_HOST_KEYBOARD_LOCK_STATE
    saved_locks: [bool; 3],
    button_enabled: bool,
    halted: bool,

    /// Values handed to EXFIL, kept across restarts
    exfil_log: Vec<u16>,
}

impl Vm {
    pub fn new(program: Program, config: VmConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => RngStream::new(seed),
            None => RngStream::from_time(),
        };

        let mut vm = Vm {
            program,
            config,
            rng,
            ip: 0,
            stack: Stack::new(),
            call_stack: Vec::new(),
            variables: HashMap::new(),
            saved_locks: [false; 3],
            button_enabled: true,
            halted: false,
            exfil_log: Vec::new(),
        };
        vm.reset();
        vm
    }

    /// Back to the power-on state: system variables only, empty stacks,
    /// saved lock state cleared, IP 0.
    pub fn reset(&mut self) {
        self.variables = SYSTEM_VARIABLES
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect();
        self.ip = 0;
        self.stack.clear();
        self.call_stack.clear();
        self.saved_locks = [false; 3];
        self.button_enabled = true;
        self.halted = false;
    }

    /// Swap in a new program and start it from IP 0, keeping variables.
    pub fn load(&mut self, program: Program) {
        self.program = program;
        self.ip = 0;
        self.stack.clear();
        self.call_stack.clear();
        self.halted = false;
    }

    /// Execute until STOP_PAYLOAD or the IP runs past the last instruction.
    pub fn run(&mut self, devices: &mut Devices<'_>) -> Result<(), VmError> {
        debug!(instructions = self.program.len(), "payload started");

        while self.step(devices)? == Step::Continue {}

        debug!(
            ip = self.ip,
            stack = self.stack.depth(),
            "payload finished"
        );
        Ok(())
    }

    /// Execute one instruction.
    pub fn step(&mut self, devices: &mut Devices<'_>) -> Result<Step, VmError> {
        if self.halted {
            return Ok(Step::Halted);
        }
        let Some(instruction) = self.program.get(self.ip).cloned() else {
            self.halted = true;
            return Ok(Step::Halted);
        };

        trace!(
            ip = self.ip,
            stack = self.stack.depth(),
            calls = self.call_stack.len(),
            op = instruction.opcode(),
            "step"
        );

        match instruction {
            Instruction::Noop => {}

            Instruction::Pop => {
                self.stack.pop()?;
            }

            Instruction::PushI(value) => self.stack.push(value),

            Instruction::Push(name) => {
                let value = self.read_variable(&name, devices)?;
                self.stack.push(value);
            }

            Instruction::Assignment(name) => {
                let value = self.stack.pop()?;
                self.variables.insert(name, value);
            }

            Instruction::BinOp(op) => {
                let right = self.stack.pop()?;
                let left = self.stack.pop()?;
                self.stack.push(apply(op, left, right)?);
            }

            Instruction::Jump(target) => {
                self.ip = self.check_target(target)?;
                return Ok(Step::Continue);
            }

            Instruction::Jz(target) => {
                let value = self.stack.pop()?;
                if value == 0 {
                    self.ip = self.check_target(target)?;
                    return Ok(Step::Continue);
                }
            }

            Instruction::Call(target) => {
                if self.call_stack.len() >= self.config.max_call_depth {
                    return Err(VmError::CallStackOverflow {
                        depth: self.config.max_call_depth,
                    });
                }
                let target = self.check_target(target)?;
                self.call_stack.push(self.ip + 1);
                self.ip = target;
                return Ok(Step::Continue);
            }

            Instruction::Ret => {
                self.ip = self.call_stack.pop().ok_or(VmError::CallStackUnderflow)?;
                return Ok(Step::Continue);
            }

            Instruction::String(text) => self.write_text(&text, devices),

            Instruction::Keys(keys) => {
                devices.keyboard.press(&keys);
                devices.clock.sleep(self.config.key_hold());
                devices.keyboard.release_all();
                self.mirror_locks(devices);
            }

            Instruction::Hold(key) => {
                devices.keyboard.press(&[key]);
                if LockKey::from_key(key).is_some() {
                    self.mirror_locks(devices);
                }
            }

            Instruction::Release(key) => {
                devices.keyboard.release(&[key]);
                if LockKey::from_key(key).is_some() {
                    self.mirror_locks(devices);
                }
            }

            Instruction::Delay => {
                let ms = self.stack.pop()?;
                devices.clock.sleep(Duration::from_millis(u64::from(ms)));
            }

            Instruction::Exfil => {
                let value = self.stack.pop()?;
                info!(value, "exfil");
                self.exfil_log.push(value);
            }

            Instruction::Directive(directive) => return self.directive(directive, devices),
        }

        self.ip += 1;
        Ok(Step::Continue)
    }

    fn directive(&mut self, directive: Directive, devices: &mut Devices<'_>) -> Result<Step, VmError> {
        match directive {
            Directive::RestartPayload => {
                debug!("payload restarted");
                self.reset();
                return Ok(Step::Continue);
            }

            Directive::StopPayload => {
                debug!(ip = self.ip, "payload stopped");
                self.halted = true;
                return Ok(Step::Halted);
            }

            Directive::Reset => devices.keyboard.release_all(),

            Directive::HidePayload | Directive::RestorePayload => {
                warn!(directive = directive.name(), "storage visibility is not controlled by this host");
            }

            Directive::WaitForCapsOn => self.wait_for_lock(LockKey::Caps, Some(true), devices),
            Directive::WaitForCapsOff => self.wait_for_lock(LockKey::Caps, Some(false), devices),
            Directive::WaitForCapsChange => self.wait_for_lock(LockKey::Caps, None, devices),
            Directive::WaitForNumOn => self.wait_for_lock(LockKey::Num, Some(true), devices),
            Directive::WaitForNumOff => self.wait_for_lock(LockKey::Num, Some(false), devices),
            Directive::WaitForNumChange => self.wait_for_lock(LockKey::Num, None, devices),
            Directive::WaitForScrollOn => self.wait_for_lock(LockKey::Scroll, Some(true), devices),
            Directive::WaitForScrollOff => self.wait_for_lock(LockKey::Scroll, Some(false), devices),
            Directive::WaitForScrollChange => self.wait_for_lock(LockKey::Scroll, None, devices),

            Directive::SaveHostKeyboardLockState => {
                for (index, lock) in LockKey::ALL.into_iter().enumerate() {
                    self.saved_locks[index] = self.observe_lock(lock, devices);
                }
            }

            Directive::RestoreHostKeyboardLockState => {
                for (index, lock) in LockKey::ALL.into_iter().enumerate() {
                    if self.observe_lock(lock, devices) != self.saved_locks[index] {
                        let key = lock.key();
                        devices.keyboard.press(&[key]);
                        devices.clock.sleep(self.config.key_hold());
                        devices.keyboard.release(&[key]);
                    }
                }
                self.mirror_locks(devices);
            }

            Directive::RandomLowercaseLetter => self.type_random(LOWER, devices),
            Directive::RandomUppercaseLetter => self.type_random(UPPER, devices),
            Directive::RandomLetter => self.type_random(LETTERS, devices),
            Directive::RandomNumber => self.type_random(DIGITS, devices),
            Directive::RandomSpecial => self.type_random(SPECIAL, devices),
            Directive::RandomChar => self.type_random(ALL_CHARS, devices),

            Directive::LedOff => devices.led.set(false),
            Directive::LedR | Directive::LedG => devices.led.set(true),

            Directive::WaitForButtonPress => {
                let mut polls = 0;
                while !devices.button.is_pressed() {
                    if self.wait_exhausted(polls, "WAIT_FOR_BUTTON_PRESS") {
                        break;
                    }
                    devices.clock.sleep(self.config.poll_interval());
                    polls += 1;
                }
            }

            Directive::DisableButton => self.button_enabled = false,
            Directive::EnableButton => self.button_enabled = true,
        }

        self.ip += 1;
        Ok(Step::Continue)
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn check_target(&self, target: usize) -> Result<usize, VmError> {
        if target < self.program.len() {
            Ok(target)
        } else {
            Err(VmError::JumpOutOfRange { target })
        }
    }

    /// Stored variable, or a value computed on read for the system
    /// pseudo-variables.
    fn read_variable(&mut self, name: &str, devices: &mut Devices<'_>) -> Result<u16, VmError> {
        let value = match name {
            "$_RANDOM_INT" => {
                let lo = self.stored("$_RANDOM_MIN");
                let hi = self.stored("$_RANDOM_MAX");
                self.rng.range_inclusive(lo, hi)
            }
            "$_RANDOM_LOWER_LETTER_KEYCODE" => u16::from(self.rng.choose(LOWER)),
            "$_RANDOM_UPPER_LETTER_KEYCODE" => u16::from(self.rng.choose(UPPER)),
            "$_RANDOM_LETTER_KEYCODE" => u16::from(self.rng.choose(LETTERS)),
            "$_RANDOM_NUMBER_KEYCODE" => u16::from(self.rng.choose(DIGITS)),
            "$_RANDOM_SPECIAL_KEYCODE" => u16::from(self.rng.choose(SPECIAL)),
            "$_RANDOM_CHAR_KEYCODE" => u16::from(self.rng.choose(ALL_CHARS)),

            "$_CAPSLOCK_ON" => u16::from(self.observe_lock(LockKey::Caps, devices)),
            "$_NUMLOCK_ON" => u16::from(self.observe_lock(LockKey::Num, devices)),
            "$_SCROLLLOCK_ON" | "$_SCROLL_ON" => {
                u16::from(self.observe_lock(LockKey::Scroll, devices))
            }

            "$_SAVED_CAPSLOCK_ON" => u16::from(self.saved_locks[0]),
            "$_SAVED_NUMLOCK_ON" => u16::from(self.saved_locks[1]),
            "$_SAVED_SCROLLLOCK_ON" => u16::from(self.saved_locks[2]),

            "$_BUTTON_ENABLED" => u16::from(self.button_enabled),

            _ => *self
                .variables
                .get(name)
                .ok_or_else(|| VmError::UndefinedVariable(name.to_string()))?,
        };
        Ok(value)
    }

    /// Stored value, 0 when absent.
    fn stored(&self, name: &str) -> u16 {
        self.variables.get(name).copied().unwrap_or(0)
    }

    fn write_text(&mut self, text: &str, devices: &mut Devices<'_>) {
        if self.stored("$_JITTER_ENABLED") == 0 {
            devices.keyboard.write(text);
            return;
        }

        let max = self.stored("$_JITTER_MAX");
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            devices.keyboard.write(ch.encode_utf8(&mut buf));
            let ms = self.rng.range_inclusive(0, max);
            devices.clock.sleep(Duration::from_millis(u64::from(ms)));
        }
    }

    fn type_random(&mut self, set: &[u8], devices: &mut Devices<'_>) {
        let ch = char::from(self.rng.choose(set));
        let mut buf = [0u8; 4];
        devices.keyboard.write(ch.encode_utf8(&mut buf));
    }

    /// Read one lock light, mirroring it on the LED when asked to.
    fn observe_lock(&mut self, lock: LockKey, devices: &mut Devices<'_>) -> bool {
        let on = devices.keyboard.lock_on(lock);
        if self.stored(led_show_variable(lock)) != 0 {
            devices.led.set(on);
        }
        on
    }

    /// After a chord, refresh the LED for any mirrored lock.
    fn mirror_locks(&mut self, devices: &mut Devices<'_>) {
        for lock in LockKey::ALL {
            if self.stored(led_show_variable(lock)) != 0 {
                self.observe_lock(lock, devices);
            }
        }
    }

    /// Poll until the light is `want`, or until it differs from its first
    /// reading when `want` is `None`.
    fn wait_for_lock(&mut self, lock: LockKey, want: Option<bool>, devices: &mut Devices<'_>) {
        let initial = self.observe_lock(lock, devices);
        let reached = |on: bool| match want {
            Some(want) => on == want,
            None => on != initial,
        };

        if want.is_some() && reached(initial) {
            return;
        }
        let mut polls = 0;
        loop {
            if self.wait_exhausted(polls, "lock wait") {
                return;
            }
            devices.clock.sleep(self.config.poll_interval());
            polls += 1;
            if reached(self.observe_lock(lock, devices)) {
                return;
            }
        }
    }

    /// True once `polls` has hit `max_wait_polls`.
    fn wait_exhausted(&self, polls: u64, what: &str) -> bool {
        match self.config.max_wait_polls {
            Some(max) if polls >= max => {
                warn!(ip = self.ip, polls, "{} gave up", what);
                true
            }
            _ => false,
        }
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    pub fn variable(&self, name: &str) -> Option<u16> {
        self.variables.get(name).copied()
    }

    pub fn variables(&self) -> &HashMap<String, u16> {
        &self.variables
    }

    pub fn stack(&self) -> &[u16] {
        self.stack.as_slice()
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn exfil_log(&self) -> &[u16] {
        &self.exfil_log
    }

    pub fn program(&self) -> &[Instruction] {
        &self.program
    }
}

fn led_show_variable(lock: LockKey) -> &'static str {
    match lock {
        LockKey::Caps => "$_LED_SHOW_CAPS",
        LockKey::Num => "$_LED_SHOW_NUM",
        LockKey::Scroll => "$_LED_SHOW_SCROLL",
    }
}

/// Arithmetic and bitwise results wrap mod 65536; comparisons and logical
/// operators yield 0 or 1.
pub fn apply(op: BinaryOp, left: u16, right: u16) -> Result<u16, VmError> {
    let value = match op {
        BinaryOp::Add => left.wrapping_add(right),
        BinaryOp::Sub => left.wrapping_sub(right),
        BinaryOp::Mul => left.wrapping_mul(right),
        BinaryOp::Div => left
            .checked_div(right)
            .ok_or(VmError::DivisionByZero { op })?,
        BinaryOp::Mod => left
            .checked_rem(right)
            .ok_or(VmError::DivisionByZero { op })?,
        BinaryOp::Pow => left.wrapping_pow(u32::from(right)),

        BinaryOp::BitAnd => left & right,
        BinaryOp::BitOr => left | right,
        BinaryOp::Shl => left.checked_shl(u32::from(right)).unwrap_or(0),
        BinaryOp::Shr => left.checked_shr(u32::from(right)).unwrap_or(0),

        BinaryOp::Eq => u16::from(left == right),
        BinaryOp::Ne => u16::from(left != right),
        BinaryOp::Lt => u16::from(left < right),
        BinaryOp::Gt => u16::from(left > right),
        BinaryOp::Le => u16::from(left <= right),
        BinaryOp::Ge => u16::from(left >= right),

        BinaryOp::And => u16::from(left != 0 && right != 0),
        BinaryOp::Or => u16::from(left != 0 || right != 0),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapping_arithmetic() {
        assert_eq!(apply(BinaryOp::Add, 65535, 1), Ok(0));
        assert_eq!(apply(BinaryOp::Sub, 2, 3), Ok(65535));
        assert_eq!(apply(BinaryOp::Mul, 256, 256), Ok(0));
        assert_eq!(apply(BinaryOp::Pow, 2, 16), Ok(0));
        assert_eq!(apply(BinaryOp::Pow, 3, 3), Ok(27));
        assert_eq!(apply(BinaryOp::Shl, 1, 15), Ok(32768));
        assert_eq!(apply(BinaryOp::Shl, 1, 16), Ok(0));
        assert_eq!(apply(BinaryOp::Shr, 0x8000, 20), Ok(0));
    }

    #[test]
    fn test_division_truncates_and_checks_zero() {
        assert_eq!(apply(BinaryOp::Div, 7, 2), Ok(3));
        assert_eq!(apply(BinaryOp::Mod, 7, 2), Ok(1));
        assert_eq!(
            apply(BinaryOp::Div, 1, 0),
            Err(VmError::DivisionByZero { op: BinaryOp::Div })
        );
        assert_eq!(
            VmError::DivisionByZero { op: BinaryOp::Mod }.to_string(),
            "division by zero (%)"
        );
    }

    #[test]
    fn test_logical_coerces_to_bool() {
        assert_eq!(apply(BinaryOp::And, 5, 9), Ok(1));
        assert_eq!(apply(BinaryOp::And, 5, 0), Ok(0));
        assert_eq!(apply(BinaryOp::Or, 0, 300), Ok(1));
        assert_eq!(apply(BinaryOp::Or, 0, 0), Ok(0));
        assert_eq!(apply(BinaryOp::Ge, 4, 4), Ok(1));
    }

    #[test]
    fn test_stack_underflow() {
        let mut stack = Stack::new();
        assert_eq!(stack.pop(), Err(VmError::StackUnderflow));
        stack.push(3);
        assert_eq!(stack.peek(), Some(3));
        assert_eq!(stack.pop(), Ok(3));
        assert!(stack.is_empty());
    }
}
