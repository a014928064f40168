// main.rs - ducky command line: compile, run, disasm, repl

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use ducky::artifact::{self, DEFAULT_ARTIFACT};
use ducky::compiler::compile;
use ducky::config::VmConfig;
use ducky::hardware::{Clock, Devices};
use ducky::sim::{SimButton, SimClock, SimKeyboard, SimLed, ThreadClock};
use ducky::vm::Vm;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ducky", version)]
#[command(about = "Compile and run DuckyScript keystroke payloads")]
struct Cli {
    /// More logging: -v for debug, -vv for trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a script into a payload artifact
    Compile {
        script: PathBuf,

        /// Artifact to write
        #[arg(short, long, default_value = DEFAULT_ARTIFACT)]
        output: PathBuf,

        /// Print the program as text instead of writing the artifact
        #[arg(long, value_enum)]
        emit: Option<Emit>,
    },

    /// Run an artifact against simulated devices
    Run {
        artifact: PathBuf,

        /// TOML file with VM settings
        #[arg(long)]
        config: Option<PathBuf>,

        /// Random seed (overrides the config file)
        #[arg(long)]
        seed: Option<u64>,

        /// Really sleep for DELAY and key holds
        #[arg(long)]
        realtime: bool,
    },

    /// List the instructions of an artifact
    Disasm { artifact: PathBuf },

    /// Interactive session
    Repl,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Emit {
    /// Label-free program, as stored in the artifact
    Resolved,
    /// Code generator output with labels
    Symbolic,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "ducky=warn",
        1 => "ducky=debug",
        _ => "ducky=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Command::Compile {
            script,
            output,
            emit,
        } => compile_script(&script, &output, emit),
        Command::Run {
            artifact,
            config,
            seed,
            realtime,
        } => run_artifact(&artifact, config.as_deref(), seed, realtime),
        Command::Disasm { artifact } => disasm(&artifact),
        Command::Repl => repl(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message.trim_end());
            ExitCode::FAILURE
        }
    }
}

fn compile_script(script: &Path, output: &Path, emit: Option<Emit>) -> Result<(), String> {
    let source = fs::read_to_string(script)
        .map_err(|e| format!("Failed to read {}: {}", script.display(), e))?;

    let compiled = compile(&source)
        .map_err(|e| e.render(&script.display().to_string(), &source))?;

    match emit {
        Some(Emit::Resolved) => print!("{}", artifact::to_text(&compiled.program)),
        Some(Emit::Symbolic) => print!("{}", artifact::symbolic_text(&compiled.symbolic)),
        None => {
            artifact::write_file(output, &compiled.program)
                .map_err(|e| format!("Failed to write {}: {}", output.display(), e))?;
            debug!(
                path = %output.display(),
                instructions = compiled.program.len(),
                "artifact written"
            );
        }
    }
    Ok(())
}

fn run_artifact(
    path: &Path,
    config: Option<&Path>,
    seed: Option<u64>,
    realtime: bool,
) -> Result<(), String> {
    let mut config = match config {
        Some(file) => VmConfig::from_file(file)
            .map_err(|e| format!("{}: {}", file.display(), e))?,
        None => VmConfig::default(),
    };
    if seed.is_some() {
        config.seed = seed;
    }
    limit_simulated_waits(&mut config);

    let program = artifact::read_file(path).map_err(|e| format!("{}: {}", path.display(), e))?;

    let mut keyboard = SimKeyboard::echoing();
    let mut led = SimLed::new();
    let mut button = SimButton::new();
    let mut sim_clock = SimClock::new();
    let mut thread_clock = ThreadClock;
    let clock: &mut dyn Clock = if realtime {
        &mut thread_clock
    } else {
        &mut sim_clock
    };
    let mut devices = Devices {
        keyboard: &mut keyboard,
        led: &mut led,
        button: &mut button,
        clock,
    };

    let mut vm = Vm::new(program, config);
    let result = vm.run(&mut devices);

    for value in vm.exfil_log() {
        println!("EXFIL {}", value);
    }

    result.map_err(|e| {
        error!(ip = vm.ip(), "payload aborted: {}", e);
        format!("runtime error at instruction {}: {}", vm.ip(), e)
    })
}

/// Polls before a lock or button wait gives up on the simulated host.
const SIM_WAIT_POLLS: u64 = 50;

/// Nobody toggles a simulated lock light or presses a simulated button, so
/// waits would never end.
fn limit_simulated_waits(config: &mut VmConfig) {
    if config.max_wait_polls.is_none() {
        debug!(polls = SIM_WAIT_POLLS, "simulated devices: lock and button waits are capped");
        config.max_wait_polls = Some(SIM_WAIT_POLLS);
    }
}

fn disasm(path: &Path) -> Result<(), String> {
    let program = artifact::read_file(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    print!("{}", artifact::disassemble(&program));
    Ok(())
}

// ============================================================================
// REPL
// ============================================================================

fn repl() -> Result<(), String> {
    println!("ducky v{} (payload REPL)", env!("CARGO_PKG_VERSION"));
    println!("Type .help for help, .quit to exit");
    println!();

    let mut rl = DefaultEditor::new().map_err(|e| e.to_string())?;
    let history_file = dirs::home_dir().map(|mut p| {
        p.push(".ducky_history");
        p
    });
    if let Some(ref path) = history_file {
        let _ = rl.load_history(path);
    }

    let mut keyboard = SimKeyboard::echoing();
    let mut led = SimLed::new();
    let mut button = SimButton::new();
    let mut clock = SimClock::new();
    let mut config = VmConfig::default();
    limit_simulated_waits(&mut config);
    let mut vm = Vm::new(Vec::new(), config);

    let mut show_bytecode = false;
    let mut pending = String::new();
    let mut blocks = BlockTracker::default();

    loop {
        let prompt = if pending.is_empty() { "> " } else { "... " };

        match rl.readline(prompt) {
            Ok(line) => {
                let input = line.trim();

                if pending.is_empty() {
                    if input.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(input);

                    if input.starts_with('.') {
                        match input.to_lowercase().as_str() {
                            ".quit" | ".exit" | ".q" => break,
                            ".help" | ".h" => print_help(),
                            ".bytecode" | ".b" => {
                                show_bytecode = !show_bytecode;
                                println!("bytecode listing {}", if show_bytecode { "on" } else { "off" });
                            }
                            ".vars" | ".v" => print_variables(&vm),
                            ".reset" => {
                                vm.reset();
                                println!("ok");
                            }
                            _ => {
                                println!("Unknown command: {}", input);
                                println!("Type .help for help");
                            }
                        }
                        continue;
                    }
                } else {
                    let _ = rl.add_history_entry(input);
                }

                pending.push_str(&line);
                pending.push('\n');
                blocks.feed(&line);
                if !blocks.is_closed() {
                    continue;
                }

                let source = std::mem::take(&mut pending);
                blocks = BlockTracker::default();

                let compiled = match compile(&source) {
                    Ok(compiled) => compiled,
                    Err(e) => {
                        print!("{}", e.render("<repl>", &source));
                        continue;
                    }
                };
                if show_bytecode {
                    print!("{}", artifact::symbolic_text(&compiled.symbolic));
                }

                vm.load(compiled.program);
                let mut devices = Devices {
                    keyboard: &mut keyboard,
                    led: &mut led,
                    button: &mut button,
                    clock: &mut clock,
                };
                match vm.run(&mut devices) {
                    Ok(()) => println!(" ok"),
                    Err(e) => println!(" error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                pending.clear();
                blocks = BlockTracker::default();
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Some(ref path) = history_file {
        let _ = rl.save_history(path);
    }
    Ok(())
}

/// Decides when a multi-line entry is complete: every IF / WHILE /
/// FUNCTION / BUTTON_DEF closed and no STRING or REM block open.
#[derive(Default)]
struct BlockTracker {
    depth: usize,
    text_block: Option<&'static str>,
}

impl BlockTracker {
    fn feed(&mut self, line: &str) {
        let trimmed = line.trim();

        if let Some(end) = self.text_block {
            if trimmed == end {
                self.text_block = None;
            }
            return;
        }

        let first = trimmed.split_whitespace().next().unwrap_or("");
        match first {
            "STRING" if trimmed == "STRING" => self.text_block = Some("END_STRING"),
            "STRINGLN" if trimmed == "STRINGLN" => self.text_block = Some("END_STRINGLN"),
            "REM_BLOCK" => self.text_block = Some("END_REM"),
            "IF" | "WHILE" | "FUNCTION" | "BUTTON_DEF" => self.depth += 1,
            "END_IF" | "END_WHILE" | "END_FUNCTION" | "END_BUTTON" => {
                self.depth = self.depth.saturating_sub(1)
            }
            _ => {}
        }
    }

    fn is_closed(&self) -> bool {
        self.depth == 0 && self.text_block.is_none()
    }
}

fn print_help() {
    println!("ducky REPL commands:");
    println!("  .help, .h      Show this help");
    println!("  .bytecode, .b  Toggle listing of generated code");
    println!("  .vars, .v      List variables");
    println!("  .reset         Reset the VM to its power-on state");
    println!("  .quit, .q      Exit");
    println!();
    println!("Each entry is compiled and run on its own; variables persist");
    println!("between entries, functions do not. Blocks (IF, WHILE, FUNCTION,");
    println!("STRING ... END_STRING) continue until they are closed.");
    println!();
    println!("Examples:");
    println!("  VAR $x = 2 + 3");
    println!("  STRINGLN hello");
    println!("  IF $x == 5 THEN");
    println!("  ... EXFIL $x");
    println!("  ... END_IF");
}

fn print_variables(vm: &Vm) {
    let mut names: Vec<_> = vm.variables().iter().collect();
    names.sort();

    println!("Variables ({}):", names.len());
    for (name, value) in names {
        println!("  {:20} {}", name, value);
    }
}
