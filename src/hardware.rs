// hardware.rs - Device capabilities the VM drives
//
// The VM never owns a device. A host binds real (or simulated) devices to
// these traits and lends them to `Vm::run` for the duration of a payload.

use crate::keys::{Key, NamedKey};
use std::time::Duration;

/// The three host lock lights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    Caps,
    Num,
    Scroll,
}

impl LockKey {
    pub const ALL: [LockKey; 3] = [LockKey::Caps, LockKey::Num, LockKey::Scroll];

    /// The key that toggles this lock.
    pub fn key(&self) -> Key {
        Key::Named(match self {
            LockKey::Caps => NamedKey::CapsLock,
            LockKey::Num => NamedKey::NumLock,
            LockKey::Scroll => NamedKey::ScrollLock,
        })
    }

    pub fn from_key(key: Key) -> Option<LockKey> {
        match key {
            Key::Named(NamedKey::CapsLock) => Some(LockKey::Caps),
            Key::Named(NamedKey::NumLock) => Some(LockKey::Num),
            Key::Named(NamedKey::ScrollLock) => Some(LockKey::Scroll),
            _ => None,
        }
    }
}

/// USB HID keyboard as seen from the payload.
pub trait Keyboard {
    /// Type text, one character after another.
    fn write(&mut self, text: &str);

    /// Press keys and keep them down.
    fn press(&mut self, keys: &[Key]);

    fn release(&mut self, keys: &[Key]);

    fn release_all(&mut self);

    /// Current lock light state as reported by the host.
    fn lock_on(&mut self, lock: LockKey) -> bool;
}

/// Single status LED.
pub trait Led {
    fn set(&mut self, on: bool);
}

/// Push-button input.
pub trait Button {
    fn is_pressed(&mut self) -> bool;
}

/// Blocking delays. Tests substitute a clock that only records time.
pub trait Clock {
    fn sleep(&mut self, duration: Duration);
}

/// The set of devices lent to one VM run.
pub struct Devices<'a> {
    pub keyboard: &'a mut dyn Keyboard,
    pub led: &'a mut dyn Led,
    pub button: &'a mut dyn Button,
    pub clock: &'a mut dyn Clock,
}
