// sim.rs - Simulated devices for the host binary and for tests

use crate::hardware::{Button, Clock, Keyboard, Led, LockKey};
use crate::keys::Key;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, trace};

// ============================================================================
// KEYBOARD
// ============================================================================

/// What the simulated host received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    Write(String),
    Press(Vec<Key>),
    Release(Vec<Key>),
    ReleaseAll,
}

/// Records everything sent to the host. Pressing a lock key toggles its
/// light the way a real host would; `toggle_after` simulates the user
/// toggling a lock while the payload is polling.
#[derive(Debug, Default)]
pub struct SimKeyboard {
    events: Vec<KeyEvent>,
    typed: String,
    held: HashSet<Key>,
    caps: bool,
    num: bool,
    scroll: bool,
    polls: usize,
    scheduled: Vec<(usize, LockKey)>,
    echo: bool,
}

impl SimKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print typed text and key events to stdout as they happen.
    pub fn echoing() -> Self {
        SimKeyboard {
            echo: true,
            ..Self::default()
        }
    }

    pub fn with_locks(mut self, caps: bool, num: bool, scroll: bool) -> Self {
        self.caps = caps;
        self.num = num;
        self.scroll = scroll;
        self
    }

    /// Toggle `lock` once `polls` more lock-state queries have been made.
    pub fn toggle_after(&mut self, lock: LockKey, polls: usize) {
        self.scheduled.push((self.polls + polls, lock));
    }

    pub fn events(&self) -> &[KeyEvent] {
        &self.events
    }

    /// All text written so far, concatenated.
    pub fn typed(&self) -> &str {
        &self.typed
    }

    pub fn held(&self) -> &HashSet<Key> {
        &self.held
    }

    pub fn polls(&self) -> usize {
        self.polls
    }

    pub fn lock_state(&self, lock: LockKey) -> bool {
        match lock {
            LockKey::Caps => self.caps,
            LockKey::Num => self.num,
            LockKey::Scroll => self.scroll,
        }
    }

    fn toggle(&mut self, lock: LockKey) {
        let light = match lock {
            LockKey::Caps => &mut self.caps,
            LockKey::Num => &mut self.num,
            LockKey::Scroll => &mut self.scroll,
        };
        *light = !*light;
        trace!(?lock, on = *light, "lock toggled");
    }
}

impl Keyboard for SimKeyboard {
    fn write(&mut self, text: &str) {
        if self.echo {
            print!("{}", text);
        }
        self.typed.push_str(text);

        // Coalesce per-character writes into one event
        if let Some(KeyEvent::Write(last)) = self.events.last_mut() {
            last.push_str(text);
        } else {
            self.events.push(KeyEvent::Write(text.to_string()));
        }
    }

    fn press(&mut self, keys: &[Key]) {
        if self.echo {
            let names: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
            println!("[press {}]", names.join(" "));
        }
        for key in keys {
            if self.held.insert(*key) {
                if let Some(lock) = LockKey::from_key(*key) {
                    self.toggle(lock);
                }
            }
        }
        self.events.push(KeyEvent::Press(keys.to_vec()));
    }

    fn release(&mut self, keys: &[Key]) {
        for key in keys {
            self.held.remove(key);
        }
        self.events.push(KeyEvent::Release(keys.to_vec()));
    }

    fn release_all(&mut self) {
        self.held.clear();
        self.events.push(KeyEvent::ReleaseAll);
    }

    fn lock_on(&mut self, lock: LockKey) -> bool {
        self.polls += 1;
        let polls = self.polls;

        let due: Vec<LockKey> = self
            .scheduled
            .iter()
            .filter(|(at, _)| *at <= polls)
            .map(|(_, lock)| *lock)
            .collect();
        self.scheduled.retain(|(at, _)| *at > polls);
        for scheduled in due {
            self.toggle(scheduled);
        }

        self.lock_state(lock)
    }
}

// ============================================================================
// LED / BUTTON / CLOCK
// ============================================================================

#[derive(Debug, Default)]
pub struct SimLed {
    on: bool,
    changes: Vec<bool>,
}

impl SimLed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Every value written, in order.
    pub fn changes(&self) -> &[bool] {
        &self.changes
    }
}

impl Led for SimLed {
    fn set(&mut self, on: bool) {
        debug!(on, "led");
        self.on = on;
        self.changes.push(on);
    }
}

/// Button that reads as pressed once, after a number of polls.
#[derive(Debug, Default)]
pub struct SimButton {
    press_at: Option<usize>,
    polls: usize,
}

impl SimButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press_after(polls: usize) -> Self {
        SimButton {
            press_at: Some(polls),
            polls: 0,
        }
    }

    pub fn polls(&self) -> usize {
        self.polls
    }
}

impl Button for SimButton {
    fn is_pressed(&mut self) -> bool {
        self.polls += 1;
        match self.press_at {
            Some(at) if self.polls >= at => {
                self.press_at = None;
                true
            }
            _ => false,
        }
    }
}

/// Advances virtual time without blocking.
#[derive(Debug, Default)]
pub struct SimClock {
    elapsed: Duration,
    sleeps: usize,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn sleeps(&self) -> usize {
        self.sleeps
    }
}

impl Clock for SimClock {
    fn sleep(&mut self, duration: Duration) {
        self.elapsed += duration;
        self.sleeps += 1;
    }
}

/// Really blocks the calling thread.
#[derive(Debug, Default)]
pub struct ThreadClock;

impl Clock for ThreadClock {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::NamedKey;

    #[test]
    fn test_lock_key_press_toggles_light() {
        let mut kb = SimKeyboard::new();
        assert!(!kb.lock_on(LockKey::Caps));
        kb.press(&[Key::Named(NamedKey::CapsLock)]);
        kb.release_all();
        assert!(kb.lock_on(LockKey::Caps));
    }

    #[test]
    fn test_scheduled_toggle() {
        let mut kb = SimKeyboard::new().with_locks(false, true, false);
        kb.toggle_after(LockKey::Num, 3);
        assert!(kb.lock_on(LockKey::Num));
        assert!(kb.lock_on(LockKey::Num));
        assert!(!kb.lock_on(LockKey::Num));
    }

    #[test]
    fn test_writes_coalesce() {
        let mut kb = SimKeyboard::new();
        kb.write("a");
        kb.write("b");
        kb.press(&[Key::Char('x')]);
        kb.write("c");
        assert_eq!(kb.typed(), "abc");
        assert_eq!(kb.events().len(), 3);
    }

    #[test]
    fn test_button_presses_once() {
        let mut button = SimButton::press_after(2);
        assert!(!button.is_pressed());
        assert!(button.is_pressed());
        assert!(!button.is_pressed());
    }
}
