//! LineScript interactive shell
//!
//! A line-oriented REPL over the full compiler pipeline: every entry is
//! appended to a synthetic source buffer which is recompiled and re-run,
//! so each line observes the cumulative session state. Declarations
//! persist; failed snippets are dropped.

use clap::Parser as ClapParser;
use lscc::{CompileOptions, ReplSession, run_pipeline};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser, Debug)]
#[command(name = "lscr")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "LineScript interactive shell", long_about = None)]
struct Cli {
    /// C compiler command
    #[arg(long, default_value = "clang")]
    cc: String,

    /// Optimizer pass budget per snippet
    #[arg(long)]
    passes: Option<u32>,

    /// Do not load or save line history
    #[arg(long)]
    no_history: bool,
}

fn history_path() -> Option<PathBuf> {
    home::home_dir().map(|dir| dir.join(".linescript_history"))
}

fn main() {
    let cli = Cli::parse();

    let mut options = CompileOptions::default().with_cc(cli.cc);
    if let Some(passes) = cli.passes {
        options.passes = passes;
    }
    options.no_cache = true;

    let tmp = std::env::temp_dir().join(format!("lsc-repl-{}", process::id()));
    if let Err(e) = std::fs::create_dir_all(&tmp) {
        eprintln!("LineScript failure (repl): {}", e);
        process::exit(1);
    }
    options.output = Some(tmp.join("session"));

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("LineScript failure (repl): {}", e);
            process::exit(1);
        }
    };
    let history = history_path();
    if !cli.no_history {
        if let Some(path) = &history {
            let _ = editor.load_history(path);
        }
    }

    println!("LineScript shell - :help for commands, :quit to exit");
    let mut session = ReplSession::new();

    loop {
        match editor.readline("lsc> ") {
            Ok(line) => {
                let snippet = line.trim();
                if snippet.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(snippet);
                match snippet {
                    ":quit" | ":q" | ":exit" => break,
                    ":reset" => {
                        session.reset();
                        println!("session cleared");
                        continue;
                    }
                    ":list" => {
                        print!("{}", session.listing());
                        continue;
                    }
                    ":help" => {
                        println!(":quit  exit the shell");
                        println!(":reset clear the accumulated session");
                        println!(":list  show the accumulated source");
                        continue;
                    }
                    _ => {}
                }

                let source = session.compose(Some(snippet));
                let source_path = tmp.join("session.lsc");
                if let Err(e) = std::fs::write(&source_path, &source) {
                    eprintln!("LineScript failure (repl): {}", e);
                    continue;
                }
                match run_pipeline(std::slice::from_ref(&source_path), &options) {
                    Ok(_) => session.accept(snippet),
                    Err(e) => eprintln!("{}", e),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("LineScript failure (repl): {}", e);
                break;
            }
        }
    }

    if !cli.no_history {
        if let Some(path) = &history {
            let _ = editor.save_history(path);
        }
    }
    let _ = std::fs::remove_dir_all(&tmp);
}
