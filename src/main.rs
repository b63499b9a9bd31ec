//! Command-line entry point (§6.3): `izi <PATH> [-- <ARGS>...]`, with
//! `--dump-tokens`/`--dump-ast` diagnostic modes and `--no-optimize` to
//! bypass the optimizer. `<PATH>` of `-` reads the program from stdin.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use izi::{lexer, parser, Interpreter};

#[derive(Parser, Debug)]
#[command(name = "izi", about = "A tree-walking interpreter for the language")]
struct Cli {
    /// Path to the program to run, or `-` to read it from stdin.
    path: String,

    /// Print the token stream and exit without evaluating the program.
    #[arg(long)]
    dump_tokens: bool,

    /// Print the parsed (pre-optimization) syntax tree and exit.
    #[arg(long)]
    dump_ast: bool,

    /// Skip the constant-folding/dead-code optimizer pass.
    #[arg(long)]
    no_optimize: bool,

    /// Arguments forwarded to the program as `process.args()`.
    #[arg(last = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let source = if cli.path == "-" {
        let mut buf = String::new();
        if let Err(e) = io::stdin().read_to_string(&mut buf) {
            eprintln!("izi: failed to read stdin: {e}");
            return ExitCode::FAILURE;
        }
        buf
    } else {
        match fs::read_to_string(&cli.path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("izi: failed to read '{}': {e}", cli.path);
                return ExitCode::FAILURE;
            }
        }
    };

    if cli.dump_tokens {
        let (tokens, errors) = lexer::tokenize(&source);
        for token in &tokens {
            println!("{token}");
        }
        for error in &errors {
            eprintln!("izi: {error}");
        }
        return if errors.is_empty() { ExitCode::SUCCESS } else { ExitCode::FAILURE };
    }

    if cli.dump_ast {
        let (tokens, lex_errors) = lexer::tokenize(&source);
        if !lex_errors.is_empty() {
            for e in &lex_errors {
                eprintln!("izi: {e}");
            }
            return ExitCode::FAILURE;
        }
        let (program, parse_errors) = parser::parse(&tokens);
        println!("{program:#?}");
        for e in &parse_errors {
            eprintln!("izi: {e}");
        }
        return if parse_errors.is_empty() { ExitCode::SUCCESS } else { ExitCode::FAILURE };
    }

    let entry_path = if cli.path == "-" { PathBuf::new() } else { PathBuf::from(&cli.path) };
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let interpreter = Interpreter::new().with_optimizer(!cli.no_optimize);
    match interpreter.run(&source, &entry_path, &cwd, cli.args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("izi: {e}");
            match e {
                izi::RuntimeError::Exit(code) => exit_code_from(code),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn exit_code_from(code: i32) -> ExitCode {
    ExitCode::from(code.rem_euclid(256) as u8)
}
