//! Interactive session: multi-line input, expression echoing, persistent
//! globals.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use luma_core::val::{tostring, Value};
use luma_core::{compile, RunOptions, Vm};

fn print_repl_help() {
    eprintln!("Luma REPL — :quit to exit, :help for this message");
}

/// A chunk is incomplete when the parser ran out of input; those errors
/// point at `<eof>` and the REPL keeps reading lines.
fn is_incomplete(message: &str) -> bool {
    message.contains("<eof>")
}

pub fn run() -> anyhow::Result<()> {
    let empty = compile("", "<repl>").expect("empty chunk compiles");
    let mut vm = Vm::new(empty);
    luma_stdlib::install_stdlib(&mut vm);
    vm.run(RunOptions::default())
        .map_err(|e| anyhow::anyhow!(e.message()))?;

    let mut editor = DefaultEditor::new()?;
    print_repl_help();

    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() { "> " } else { "... " };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                continue;
            }
            Err(ReadlineError::Eof) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        if buffer.is_empty() {
            match line.trim() {
                ":quit" | ":exit" | ":q" => return Ok(()),
                ":help" => {
                    print_repl_help();
                    continue;
                }
                _ => {}
            }
        }

        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(&line);
        let chunk = buffer.clone();
        if chunk.trim().is_empty() {
            buffer.clear();
            continue;
        }

        // Bare expressions compile wrapped in `return` so their value
        // prints; statements compile as-is.
        let program = match compile(&format!("return {}", chunk), "<repl>") {
            Ok(program) => program,
            Err(_) => match compile(&chunk, "<repl>") {
                Ok(program) => program,
                Err(err) => {
                    if is_incomplete(&err.to_string()) {
                        continue;
                    }
                    eprintln!("luma: {}", err);
                    buffer.clear();
                    continue;
                }
            },
        };
        buffer.clear();
        let _ = editor.add_history_entry(chunk.trim());

        let closure = match vm.load_program(program, None) {
            Ok(closure) => closure,
            Err(err) => {
                eprintln!("luma: {}", err.message());
                continue;
            }
        };
        match vm.call_function(&Value::Closure(closure), Vec::new()) {
            Ok(values) => {
                for value in vm.take_output() {
                    println!("{}", tostring(&value));
                }
                if !values.is_empty() {
                    let rendered: Vec<String> = values.iter().map(tostring).collect();
                    println!("{}", rendered.join("\t"));
                }
            }
            Err(err) => {
                for value in vm.take_output() {
                    println!("{}", tostring(&value));
                }
                eprintln!("luma: {}", err.format_with_traceback());
            }
        }
    }
}
