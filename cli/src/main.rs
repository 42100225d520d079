use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Once;

use clap::{Parser, ValueEnum};

use luma_core::val::{tostring, LuaTable, Value};
use luma_core::vm::TraceMode;
use luma_core::{compile, RunOptions, Vm};

mod repl;


static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "luma_core=info,luma_stdlib=info,luma_cli=info";

const EXIT_OK: i32 = 0;
const EXIT_RUNTIME: i32 = 1;
const EXIT_COMPILE: i32 = 2;
const EXIT_USAGE: i32 = 3;

#[derive(Debug, Parser)]
#[command(name = "luma", about = "Run Lua-subset scripts on the Luma VM", long_about = None)]
struct CliArgs {
    /// Path to a script; remaining arguments become the chunk's vararg.
    #[arg(value_name = "SCRIPT")]
    script: Option<PathBuf>,

    /// Script arguments, exposed as `...` and the global `arg` table.
    #[arg(value_name = "ARGS", trailing_var_arg = true)]
    script_args: Vec<String>,

    /// Execute a code string instead of a script file.
    #[arg(short = 'e', long = "execute", value_name = "CODE")]
    execute: Option<String>,

    /// Start an interactive REPL session.
    #[arg(long)]
    repl: bool,

    /// Echo the VM output buffer to stdout (default when running a script).
    #[arg(long)]
    print_output: bool,

    /// Record execution events and export them as newline-delimited JSON.
    #[arg(long, value_enum, default_value_t = TraceArg::None)]
    trace: TraceArg,

    /// Write the event trace to a file instead of stderr.
    #[arg(long, value_name = "FILE")]
    trace_out: Option<PathBuf>,

    /// Dump a VM snapshot to stderr after execution.
    #[arg(long)]
    stack: bool,

    /// Pause for confirmation when an uncaught error occurs.
    #[arg(long)]
    break_on_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TraceArg {
    None,
    Instructions,
    Coroutine,
    All,
}

impl From<TraceArg> for TraceMode {
    fn from(value: TraceArg) -> Self {
        match value {
            TraceArg::None => TraceMode::None,
            TraceArg::Instructions => TraceMode::Instructions,
            TraceArg::Coroutine => TraceMode::Coroutine,
            TraceArg::All => TraceMode::All,
        }
    }
}

fn maybe_init_tracing() {
    let raw = match std::env::var("LUMA_TRACE") {
        Ok(value) => value,
        Err(_) => return,
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("off") {
        return;
    }
    TRACE_INIT.call_once(|| {
        use tracing_subscriber::fmt;
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_new(trimmed)
            .or_else(|_| EnvFilter::try_new(DEFAULT_TRACE_FILTER))
            .expect("default trace filter is valid");
        let _ = fmt().with_writer(std::io::stderr).with_env_filter(filter).try_init();
    });
}

fn main() {
    maybe_init_tracing();
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Help/version requests are not usage errors.
            if err.use_stderr() {
                eprintln!("{}", err);
                std::process::exit(EXIT_USAGE);
            }
            print!("{}", err);
            std::process::exit(EXIT_OK);
        }
    };
    std::process::exit(run_cli(args));
}

fn run_cli(args: CliArgs) -> i32 {
    if args.execute.is_some() && args.script.is_some() {
        eprintln!("luma: cannot use a script path and --execute together");
        return EXIT_USAGE;
    }
    if args.repl && (args.execute.is_some() || args.script.is_some()) {
        eprintln!("luma: --repl cannot be combined with a script or --execute");
        return EXIT_USAGE;
    }
    if args.repl || (args.execute.is_none() && args.script.is_none()) {
        return match repl::run() {
            Ok(()) => EXIT_OK,
            Err(err) => {
                eprintln!("luma: {}", err);
                EXIT_RUNTIME
            }
        };
    }

    let (source, source_name) = if let Some(code) = &args.execute {
        (code.clone(), "<inline>".to_string())
    } else {
        let path = args.script.as_ref().expect("script path checked above");
        match std::fs::read_to_string(path) {
            Ok(source) => (source, path.to_string_lossy().into_owned()),
            Err(err) => {
                eprintln!("luma: cannot open {}: {}", path.display(), err);
                return EXIT_RUNTIME;
            }
        }
    };

    let program = match compile(&source, &source_name) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("luma: {}", err);
            return EXIT_COMPILE;
        }
    };

    let mut vm = Vm::new(program);
    luma_stdlib::install_stdlib(&mut vm);
    vm.set_trace_mode(args.trace.into());
    install_arg_table(&mut vm, &args);

    let script_args: Vec<Value> = args.script_args.iter().map(Value::str).collect();
    let result = vm.run(RunOptions {
        args: script_args,
        env: None,
    });

    if args.trace != TraceArg::None {
        export_trace(&mut vm, args.trace_out.as_deref());
    }
    if args.stack {
        dump_snapshot(&vm);
    }

    match result {
        Ok(output) => {
            if args.print_output || args.script.is_some() {
                for value in &output.output {
                    println!("{}", tostring(value));
                }
            }
            EXIT_OK
        }
        Err(err) => {
            eprintln!("luma: {}", err.format_with_traceback());
            if args.break_on_error {
                eprintln!("Execution paused due to error. Press Enter to exit...");
                let mut line = String::new();
                let _ = std::io::stdin().read_line(&mut line);
            }
            EXIT_RUNTIME
        }
    }
}

/// Lua-style `arg` table: script name at 0, arguments at 1..n.
fn install_arg_table(vm: &mut Vm, args: &CliArgs) {
    let mut table = LuaTable::new();
    let name = args
        .script
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "luma".to_string());
    table.raw_set_unchecked(Value::Int(0), Value::str(name));
    for (index, value) in args.script_args.iter().enumerate() {
        table.raw_set_unchecked(Value::Int(index as i64 + 1), Value::str(value));
    }
    vm.set_global("arg", Value::table(table));
}

/// One JSON object per line with stable keys, ready for external tooling.
fn export_trace(vm: &mut Vm, path: Option<&std::path::Path>) {
    let events = vm.drain_events();
    let mut lines = String::new();
    for event in &events {
        match serde_json::to_string(event) {
            Ok(line) => {
                lines.push_str(&line);
                lines.push('\n');
            }
            Err(err) => {
                eprintln!("luma: failed to serialize event: {}", err);
                return;
            }
        }
    }
    match path {
        Some(path) => {
            if let Err(err) = std::fs::write(path, &lines) {
                eprintln!("luma: failed to write trace to {}: {}", path.display(), err);
            }
        }
        None => {
            let _ = std::io::stderr().write_all(lines.as_bytes());
        }
    }
}

fn dump_snapshot(vm: &Vm) {
    match serde_json::to_string_pretty(&vm.snapshot()) {
        Ok(text) => eprintln!("{}", text),
        Err(err) => eprintln!("luma: failed to serialize snapshot: {}", err),
    }
}
