use ducky::bytecode::{BinaryOp, Instruction};
use ducky::compiler::compile;
use ducky::config::VmConfig;
use ducky::hardware::{Devices, LockKey};
use ducky::keys::{Key, NamedKey};
use ducky::sim::{KeyEvent, SimButton, SimClock, SimKeyboard, SimLed};
use ducky::vm::{Vm, VmError};
use std::time::Duration;

struct Rig {
    keyboard: SimKeyboard,
    led: SimLed,
    button: SimButton,
    clock: SimClock,
}

impl Rig {
    fn new() -> Self {
        Rig {
            keyboard: SimKeyboard::new(),
            led: SimLed::new(),
            button: SimButton::new(),
            clock: SimClock::new(),
        }
    }

    fn devices(&mut self) -> Devices<'_> {
        Devices {
            keyboard: &mut self.keyboard,
            led: &mut self.led,
            button: &mut self.button,
            clock: &mut self.clock,
        }
    }
}

fn config() -> VmConfig {
    VmConfig {
        seed: Some(42),
        ..VmConfig::default()
    }
}

fn run_with(source: &str, mut rig: Rig, config: VmConfig) -> (Result<(), VmError>, Vm, Rig) {
    let program = compile(source).unwrap().program;
    let mut vm = Vm::new(program, config);
    let result = vm.run(&mut rig.devices());
    (result, vm, rig)
}

fn run(source: &str) -> (Vm, Rig) {
    let (result, vm, rig) = run_with(source, Rig::new(), config());
    result.unwrap();
    (vm, rig)
}

fn run_err(source: &str) -> VmError {
    let (result, _, _) = run_with(source, Rig::new(), config());
    result.unwrap_err()
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

// ============================================================================
// ARITHMETIC AND VARIABLES
// ============================================================================

#[test]
fn test_arithmetic_wraps() {
    let (vm, _) = run(
        "VAR $a = 65535 + 2\nVAR $b = 3 - 5\nVAR $c = 2 ^ 10\nVAR $d = 17 % 5\nVAR $e = 7 / 2\nVAR $f = 1 << 3 | 1\n",
    );
    assert_eq!(vm.variable("$a"), Some(1));
    assert_eq!(vm.variable("$b"), Some(65534));
    assert_eq!(vm.variable("$c"), Some(1024));
    assert_eq!(vm.variable("$d"), Some(2));
    assert_eq!(vm.variable("$e"), Some(3));
    assert_eq!(vm.variable("$f"), Some(9));
    assert!(vm.stack().is_empty());
}

#[test]
fn test_comparisons_and_logic() {
    let (vm, _) = run("$t = (3 > 2) && (1 != 1)\n$u = 0 || 40\n$v = TRUE == 1\n");
    assert_eq!(vm.variable("$t"), Some(0));
    assert_eq!(vm.variable("$u"), Some(1));
    assert_eq!(vm.variable("$v"), Some(1));
}

#[test]
fn test_system_variables_preset() {
    let (vm, _) = run("");
    assert_eq!(vm.variable("$_RANDOM_MIN"), Some(1));
    assert_eq!(vm.variable("$_RANDOM_MAX"), Some(9));
    assert_eq!(vm.variable("$_JITTER_MAX"), Some(20));
    assert_eq!(vm.variable("$_JITTER_ENABLED"), Some(0));
    assert_eq!(vm.variable("$_LED_SHOW_CAPS"), Some(0));
}

#[test]
fn test_division_by_zero() {
    assert_eq!(
        run_err("VAR $z = 0\nVAR $q = 5 / $z\n"),
        VmError::DivisionByZero { op: BinaryOp::Div }
    );
    assert_eq!(
        run_err("VAR $q = 5 % 0\n"),
        VmError::DivisionByZero { op: BinaryOp::Mod }
    );
}

#[test]
fn test_undefined_variable() {
    assert_eq!(
        run_err("VAR $a = $nope\n"),
        VmError::UndefinedVariable("$nope".to_string())
    );
}

// ============================================================================
// CONTROL FLOW
// ============================================================================

#[test]
fn test_return_outside_function() {
    assert_eq!(run_err("RETURN 1\n"), VmError::CallStackUnderflow);
}

#[test]
fn test_unbounded_recursion_overflows() {
    let config = VmConfig {
        max_call_depth: 8,
        ..config()
    };
    let (result, vm, _) = run_with(
        "FUNCTION f()\nRETURN f()\nEND_FUNCTION\nf()\n",
        Rig::new(),
        config,
    );
    assert_eq!(result, Err(VmError::CallStackOverflow { depth: 8 }));
    assert_eq!(vm.call_depth(), 8);
}

#[test]
fn test_recursion_within_limit() {
    let source = "\
VAR $n = 5
VAR $acc = 1
FUNCTION fact()
    IF $n <= 1 THEN
        RETURN $acc
    END_IF
    $acc = $acc * $n
    $n = $n - 1
    RETURN fact()
END_FUNCTION
VAR $r = fact()
";
    let (vm, _) = run(source);
    assert_eq!(vm.variable("$r"), Some(120));
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn test_stop_payload() {
    let (vm, rig) = run("STRING a\nSTOP_PAYLOAD\nSTRING b\n");
    assert_eq!(rig.keyboard.typed(), "a");
    assert!(vm.is_halted());
}

#[test]
fn test_restart_payload_resets_state() {
    let program = compile("VAR $x = 4\nVAR $_RANDOM_MAX = 3\nRESTART_PAYLOAD\n")
        .unwrap()
        .program;
    let mut rig = Rig::new();
    let mut vm = Vm::new(program, config());

    for _ in 0..5 {
        vm.step(&mut rig.devices()).unwrap();
    }
    assert_eq!(vm.variable("$x"), None);
    assert_eq!(vm.variable("$_RANDOM_MAX"), Some(9));
    assert_eq!(vm.ip(), 0);
    assert!(!vm.is_halted());
}

#[test]
fn test_jump_outside_program() {
    let mut rig = Rig::new();
    let mut vm = Vm::new(vec![Instruction::Jump(9)], config());
    assert_eq!(
        vm.run(&mut rig.devices()),
        Err(VmError::JumpOutOfRange { target: 9 })
    );
}

#[test]
fn test_pop_on_empty_stack() {
    let mut rig = Rig::new();
    let mut vm = Vm::new(vec![Instruction::Pop], config());
    assert_eq!(vm.run(&mut rig.devices()), Err(VmError::StackUnderflow));
}

#[test]
fn test_payload_visibility_directives_continue() {
    let (vm, rig) = run("HIDE_PAYLOAD\nRESTORE_PAYLOAD\nSTRING ok\n");
    assert_eq!(rig.keyboard.typed(), "ok");
    assert!(rig.keyboard.events().iter().all(|e| matches!(e, KeyEvent::Write(_))));
    assert_eq!(vm.ip(), 3);
}

#[test]
fn test_elided_constructs_run_nothing() {
    let (_, rig) = run("ATTACKMODE HID\nBUTTON_DEF\nSTRING no\nEND_BUTTON\nSAVE_ATTACKMODE\nSTRING yes\n");
    assert_eq!(rig.keyboard.typed(), "yes");
}

// ============================================================================
// KEYBOARD
// ============================================================================

#[test]
fn test_chord_press_hold_release() {
    let (_, rig) = run("GUI r\n");
    assert_eq!(
        rig.keyboard.events(),
        &[
            KeyEvent::Press(vec![Key::Named(NamedKey::Gui), Key::Char('r')]),
            KeyEvent::ReleaseAll,
        ]
    );
    assert_eq!(rig.clock.elapsed(), ms(50));
}

#[test]
fn test_hold_and_release_single_key() {
    let (_, rig) = run("HOLD SHIFT\nSTRING a\nRELEASE SHIFT\n");
    assert_eq!(
        rig.keyboard.events(),
        &[
            KeyEvent::Press(vec![Key::Named(NamedKey::Shift)]),
            KeyEvent::Write("a".to_string()),
            KeyEvent::Release(vec![Key::Named(NamedKey::Shift)]),
        ]
    );
    assert!(rig.keyboard.held().is_empty());
}

#[test]
fn test_reset_releases_everything() {
    let (_, rig) = run("HOLD ALT\nHOLD TAB\nRESET\n");
    assert!(rig.keyboard.held().is_empty());
    assert_eq!(rig.keyboard.events().last(), Some(&KeyEvent::ReleaseAll));
}

#[test]
fn test_delay_uses_clock() {
    let (_, rig) = run("DELAY 250\nDELAY 10 * 5\n");
    assert_eq!(rig.clock.elapsed(), ms(300));
}

#[test]
fn test_jitter_types_per_character() {
    let (_, rig) = run("VAR $_JITTER_ENABLED = 1\nVAR $_JITTER_MAX = 0\nSTRING abc\n");
    assert_eq!(rig.keyboard.typed(), "abc");
    assert_eq!(rig.clock.sleeps(), 3);
    assert_eq!(rig.clock.elapsed(), ms(0));
}

#[test]
fn test_jitter_bounded() {
    let (_, rig) = run("VAR $_JITTER_ENABLED = 1\nVAR $_JITTER_MAX = 5\nSTRING abcdefgh\n");
    assert_eq!(rig.clock.sleeps(), 8);
    assert!(rig.clock.elapsed() <= ms(40));
}

// ============================================================================
// RANDOMNESS
// ============================================================================

#[test]
fn test_random_int_in_range() {
    let source = "\
VAR $_RANDOM_MIN = 10
VAR $_RANDOM_MAX = 12
VAR $i = 0
WHILE $i < 50
    VAR $r = $_RANDOM_INT
    IF ($r < 10) || ($r > 12) THEN
        EXFIL $r
    END_IF
    $i = $i + 1
END_WHILE
";
    let (vm, _) = run(source);
    assert!(vm.exfil_log().is_empty(), "{:?}", vm.exfil_log());
}

#[test]
fn test_random_int_degenerate_and_swapped_range() {
    let (vm, _) = run("VAR $_RANDOM_MIN = 4\nVAR $_RANDOM_MAX = 4\nEXFIL $_RANDOM_INT\n");
    assert_eq!(vm.exfil_log(), &[4]);

    let (vm, _) = run("VAR $_RANDOM_MIN = 6\nVAR $_RANDOM_MAX = 5\nEXFIL $_RANDOM_INT\nEXFIL $_RANDOM_INT\n");
    assert!(vm.exfil_log().iter().all(|v| (5..=6).contains(v)));
}

#[test]
fn test_random_character_classes() {
    let (_, rig) = run("RANDOM_NUMBER\nRANDOM_LOWERCASE_LETTER\nRANDOM_UPPERCASE_LETTER\nRANDOM_SPECIAL\n");
    let typed: Vec<char> = rig.keyboard.typed().chars().collect();
    assert_eq!(typed.len(), 4);
    assert!(typed[0].is_ascii_digit());
    assert!(typed[1].is_ascii_lowercase());
    assert!(typed[2].is_ascii_uppercase());
    assert!("!@#$%^&*()".contains(typed[3]));
}

#[test]
fn test_random_keycode_variables() {
    let (vm, _) = run("EXFIL $_RANDOM_NUMBER_KEYCODE\nEXFIL $_RANDOM_UPPER_LETTER_KEYCODE\n");
    let log = vm.exfil_log();
    assert!((u16::from(b'0')..=u16::from(b'9')).contains(&log[0]));
    assert!((u16::from(b'A')..=u16::from(b'Z')).contains(&log[1]));
}

#[test]
fn test_same_seed_same_payload() {
    let source = "RANDOM_CHAR\nRANDOM_CHAR\nRANDOM_CHAR\nRANDOM_LETTER\n";
    let (_, first) = run(source);
    let (_, second) = run(source);
    assert_eq!(first.keyboard.typed(), second.keyboard.typed());
}

// ============================================================================
// LOCK KEYS, LED, BUTTON
// ============================================================================

#[test]
fn test_wait_for_caps_on_polls() {
    let mut rig = Rig::new();
    rig.keyboard.toggle_after(LockKey::Caps, 3);
    let (result, _, rig) = run_with("WAIT_FOR_CAPS_ON\nSTRING go\n", rig, config());
    result.unwrap();
    assert_eq!(rig.clock.elapsed(), ms(200));
    assert_eq!(rig.keyboard.typed(), "go");
}

#[test]
fn test_wait_for_state_already_reached() {
    let mut rig = Rig::new();
    rig.keyboard = SimKeyboard::new().with_locks(true, false, false);
    let (result, _, rig) = run_with("WAIT_FOR_CAPS_ON\nWAIT_FOR_NUM_OFF\n", rig, config());
    result.unwrap();
    assert_eq!(rig.clock.elapsed(), ms(0));
}

#[test]
fn test_wait_for_change() {
    let mut rig = Rig::new();
    rig.keyboard = SimKeyboard::new().with_locks(false, true, false);
    rig.keyboard.toggle_after(LockKey::Num, 2);
    let (result, _, rig) = run_with("WAIT_FOR_NUM_CHANGE\n", rig, config());
    result.unwrap();
    assert_eq!(rig.clock.elapsed(), ms(100));
    assert!(!rig.keyboard.lock_state(LockKey::Num));
}

#[test]
fn test_poll_interval_from_config() {
    let mut rig = Rig::new();
    rig.keyboard.toggle_after(LockKey::Scroll, 5);
    let config = VmConfig {
        poll_interval_ms: 10,
        ..config()
    };
    let (result, _, rig) = run_with("WAIT_FOR_SCROLL_ON\n", rig, config);
    result.unwrap();
    assert_eq!(rig.clock.elapsed(), ms(40));
}

#[test]
fn test_save_and_restore_lock_state() {
    let mut rig = Rig::new();
    rig.keyboard = SimKeyboard::new().with_locks(true, false, false);
    let source = "SAVE_HOST_KEYBOARD_LOCK_STATE\nCAPSLOCK\nEXFIL $_CAPSLOCK_ON\nRESTORE_HOST_KEYBOARD_LOCK_STATE\nEXFIL $_CAPSLOCK_ON\nEXFIL $_SAVED_CAPSLOCK_ON\n";
    let (result, vm, rig) = run_with(source, rig, config());
    result.unwrap();
    assert_eq!(vm.exfil_log(), &[0, 1, 1]);
    assert!(rig.keyboard.lock_state(LockKey::Caps));
    assert!(!rig.keyboard.lock_state(LockKey::Num));
}

#[test]
fn test_led_mirrors_caps_lock() {
    let (_, rig) = run("VAR $_LED_SHOW_CAPS = 1\nCAPSLOCK\n");
    assert!(rig.led.is_on());

    let (_, rig) = run("CAPSLOCK\n");
    assert!(rig.led.changes().is_empty());
}

#[test]
fn test_led_follows_restored_lock_state() {
    let mut rig = Rig::new();
    rig.keyboard = SimKeyboard::new().with_locks(true, false, false);
    let source = "VAR $_LED_SHOW_CAPS = 1\nSAVE_HOST_KEYBOARD_LOCK_STATE\nCAPSLOCK\nRESTORE_HOST_KEYBOARD_LOCK_STATE\n";
    let (result, _, rig) = run_with(source, rig, config());
    result.unwrap();
    assert!(rig.keyboard.lock_state(LockKey::Caps));
    assert_eq!(rig.led.is_on(), rig.keyboard.lock_state(LockKey::Caps));
}

#[test]
fn test_led_follows_held_lock_key() {
    let (_, rig) = run("VAR $_LED_SHOW_CAPS = 1\nHOLD CAPSLOCK\n");
    assert!(rig.keyboard.lock_state(LockKey::Caps));
    assert!(rig.led.is_on());

    let (_, rig) = run("VAR $_LED_SHOW_CAPS = 1\nHOLD CAPSLOCK\nRELEASE CAPSLOCK\nCAPSLOCK\n");
    assert!(!rig.keyboard.lock_state(LockKey::Caps));
    assert!(!rig.led.is_on());
}

#[test]
fn test_led_directives() {
    let (_, rig) = run("LED_G\nLED_OFF\nLED_R\n");
    assert_eq!(rig.led.changes(), &[true, false, true]);
}

#[test]
fn test_wait_for_button() {
    let mut rig = Rig::new();
    rig.button = SimButton::press_after(3);
    let (result, _, rig) = run_with("WAIT_FOR_BUTTON_PRESS\nSTRING pressed\n", rig, config());
    result.unwrap();
    assert_eq!(rig.clock.elapsed(), ms(200));
    assert_eq!(rig.button.polls(), 3);
    assert_eq!(rig.keyboard.typed(), "pressed");
}

#[test]
fn test_waits_give_up_after_limit() {
    let config = VmConfig {
        max_wait_polls: Some(3),
        ..config()
    };
    let (result, _, rig) = run_with("WAIT_FOR_CAPS_ON\nSTRING a\n", Rig::new(), config.clone());
    result.unwrap();
    assert_eq!(rig.clock.elapsed(), ms(300));
    assert_eq!(rig.keyboard.typed(), "a");

    let (result, _, rig) = run_with("WAIT_FOR_BUTTON_PRESS\nSTRING b\n", Rig::new(), config);
    result.unwrap();
    assert_eq!(rig.clock.elapsed(), ms(300));
    assert_eq!(rig.button.polls(), 4);
    assert_eq!(rig.keyboard.typed(), "b");
}

#[test]
fn test_wait_limit_not_reached() {
    let mut rig = Rig::new();
    rig.button = SimButton::press_after(2);
    let config = VmConfig {
        max_wait_polls: Some(5),
        ..config()
    };
    let (result, _, rig) = run_with("WAIT_FOR_BUTTON_PRESS\n", rig, config);
    result.unwrap();
    assert_eq!(rig.clock.elapsed(), ms(100));
}

#[test]
fn test_button_enable_flag() {
    let (vm, _) = run("EXFIL $_BUTTON_ENABLED\nDISABLE_BUTTON\nEXFIL $_BUTTON_ENABLED\nENABLE_BUTTON\nEXFIL $_BUTTON_ENABLED\n");
    assert_eq!(vm.exfil_log(), &[1, 0, 1]);
}

#[test]
fn test_exfil_log() {
    let (vm, _) = run("EXFIL 1 + 1\nEXFIL $_SCROLL_ON\n");
    assert_eq!(vm.exfil_log(), &[2, 0]);
    assert!(vm.stack().is_empty());
}
