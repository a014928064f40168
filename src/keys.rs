// keys.rs - Key names understood by KEYS / HOLD / RELEASE

use std::fmt;

// ============================================================================
// NAMED KEYS
// ============================================================================

/// Non-character keys. Each variant has one canonical spelling that is used
/// on the wire; the lexer also accepts the aliases listed in `from_name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    // Navigation
    Up,
    Down,
    Left,
    Right,
    PageUp,
    PageDown,
    Home,
    End,
    Insert,
    Delete,
    Backspace,
    Tab,
    Space,
    Enter,
    Escape,
    Pause,
    PrintScreen,
    Menu,

    // Function keys
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,

    // Modifiers
    Shift,
    Alt,
    Control,
    Gui,

    // Lock keys
    CapsLock,
    NumLock,
    ScrollLock,
}

impl NamedKey {
    pub fn name(&self) -> &'static str {
        match self {
            NamedKey::Up => "UP",
            NamedKey::Down => "DOWN",
            NamedKey::Left => "LEFT",
            NamedKey::Right => "RIGHT",
            NamedKey::PageUp => "PAGEUP",
            NamedKey::PageDown => "PAGEDOWN",
            NamedKey::Home => "HOME",
            NamedKey::End => "END",
            NamedKey::Insert => "INSERT",
            NamedKey::Delete => "DELETE",
            NamedKey::Backspace => "BACKSPACE",
            NamedKey::Tab => "TAB",
            NamedKey::Space => "SPACE",
            NamedKey::Enter => "ENTER",
            NamedKey::Escape => "ESCAPE",
            NamedKey::Pause => "PAUSE",
            NamedKey::PrintScreen => "PRINTSCREEN",
            NamedKey::Menu => "MENU",
            NamedKey::F1 => "F1",
            NamedKey::F2 => "F2",
            NamedKey::F3 => "F3",
            NamedKey::F4 => "F4",
            NamedKey::F5 => "F5",
            NamedKey::F6 => "F6",
            NamedKey::F7 => "F7",
            NamedKey::F8 => "F8",
            NamedKey::F9 => "F9",
            NamedKey::F10 => "F10",
            NamedKey::F11 => "F11",
            NamedKey::F12 => "F12",
            NamedKey::Shift => "SHIFT",
            NamedKey::Alt => "ALT",
            NamedKey::Control => "CONTROL",
            NamedKey::Gui => "GUI",
            NamedKey::CapsLock => "CAPSLOCK",
            NamedKey::NumLock => "NUMLOCK",
            NamedKey::ScrollLock => "SCROLLLOCK",
        }
    }

    /// Look up a reserved key word, including aliases (`CTRL`, `WINDOWS`, ...).
    pub fn from_name(name: &str) -> Option<NamedKey> {
        let key = match name {
            "UP" | "UPARROW" => NamedKey::Up,
            "DOWN" | "DOWNARROW" => NamedKey::Down,
            "LEFT" | "LEFTARROW" => NamedKey::Left,
            "RIGHT" | "RIGHTARROW" => NamedKey::Right,
            "PAGEUP" => NamedKey::PageUp,
            "PAGEDOWN" => NamedKey::PageDown,
            "HOME" => NamedKey::Home,
            "END" => NamedKey::End,
            "INSERT" => NamedKey::Insert,
            "DELETE" | "DEL" => NamedKey::Delete,
            "BACKSPACE" => NamedKey::Backspace,
            "TAB" => NamedKey::Tab,
            "SPACE" => NamedKey::Space,
            "ENTER" => NamedKey::Enter,
            "ESCAPE" => NamedKey::Escape,
            "PAUSE" | "BREAK" => NamedKey::Pause,
            "PRINTSCREEN" => NamedKey::PrintScreen,
            "MENU" | "APP" => NamedKey::Menu,
            "F1" => NamedKey::F1,
            "F2" => NamedKey::F2,
            "F3" => NamedKey::F3,
            "F4" => NamedKey::F4,
            "F5" => NamedKey::F5,
            "F6" => NamedKey::F6,
            "F7" => NamedKey::F7,
            "F8" => NamedKey::F8,
            "F9" => NamedKey::F9,
            "F10" => NamedKey::F10,
            "F11" => NamedKey::F11,
            "F12" => NamedKey::F12,
            "SHIFT" => NamedKey::Shift,
            "ALT" => NamedKey::Alt,
            "CONTROL" | "CTRL" => NamedKey::Control,
            "GUI" | "WINDOWS" | "COMMAND" => NamedKey::Gui,
            "CAPSLOCK" => NamedKey::CapsLock,
            "NUMLOCK" => NamedKey::NumLock,
            "SCROLLLOCK" => NamedKey::ScrollLock,
            _ => return None,
        };
        Some(key)
    }
}

// ============================================================================
// KEY
// ============================================================================

/// A key as it appears in a chord: either a named key or a single character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Named(NamedKey),
    Char(char),
}

impl Key {
    /// Parse a wire-format key name. Single characters are character keys.
    pub fn parse(text: &str) -> Option<Key> {
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphanumeric() => Some(Key::Char(c)),
            _ => NamedKey::from_name(text).map(Key::Named),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Key::Named(named) => write!(f, "{}", named.name()),
            Key::Char(c) => write!(f, "{}", c),
        }
    }
}
