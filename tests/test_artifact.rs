use ducky::artifact::{self, ArtifactError};
use ducky::bytecode::Instruction;
use ducky::compiler::compile;
use ducky::config::VmConfig;
use ducky::hardware::Devices;
use ducky::sim::{SimButton, SimClock, SimKeyboard, SimLed};
use ducky::vm::Vm;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use tempfile::TempDir;

fn zlib(text: &str) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn test_file_round_trip_then_run() {
    let source = "\
VAR $i = 0
WHILE $i < 2
    GUI r
    STRINGLN notepad
    $i = $i + 1
END_WHILE
EXFIL $i
";
    let compiled = compile(source).unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join(artifact::DEFAULT_ARTIFACT);
    artifact::write_file(&path, &compiled.program).unwrap();

    let loaded = artifact::read_file(&path).unwrap();
    assert_eq!(loaded, compiled.program);

    let mut keyboard = SimKeyboard::new();
    let mut led = SimLed::new();
    let mut button = SimButton::new();
    let mut clock = SimClock::new();
    let mut devices = Devices {
        keyboard: &mut keyboard,
        led: &mut led,
        button: &mut button,
        clock: &mut clock,
    };
    let mut vm = Vm::new(loaded, VmConfig::default());
    vm.run(&mut devices).unwrap();

    assert_eq!(keyboard.typed(), "notepad\nnotepad\n");
    assert_eq!(vm.exfil_log(), &[2]);
}

#[test]
fn test_awkward_text_survives() {
    let program = vec![
        Instruction::String("line one\nline two\ttab \u{e9}\u{1F986}".to_string()),
        Instruction::String(" leading and trailing ".to_string()),
    ];
    let bytes = artifact::serialize(&program).unwrap();
    assert_eq!(artifact::load(&bytes).unwrap(), program);
}

#[test]
fn test_not_zlib() {
    let err = artifact::load(b"definitely not compressed").unwrap_err();
    assert!(matches!(err, ArtifactError::Decompress(_)));
}

#[test]
fn test_unknown_instruction_inside_valid_zlib() {
    let err = artifact::load(&zlib("PUSHI 1\nFROB 3\n")).unwrap_err();
    match err {
        ArtifactError::UnknownInstruction { line, text } => {
            assert_eq!(line, 2);
            assert_eq!(text, "FROB 3");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_branch_target_checked_at_load() {
    let err = artifact::load(&zlib("PUSHI 0\nJZ 5\n")).unwrap_err();
    assert!(matches!(
        err,
        ArtifactError::JumpOutOfRange { line: 2, target: 5, len: 2 }
    ));
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = artifact::read_file(&dir.path().join("absent.bin")).unwrap_err();
    assert!(matches!(err, ArtifactError::Io(_)));
}

#[test]
fn test_disassembly_listing() {
    let program = compile("STRING hi\nDELAY 5\n").unwrap().program;
    let listing = artifact::disassemble(&program);
    assert_eq!(listing, "0  STRING \"hi\"\n1  PUSHI 5\n2  DELAY\n");
}
