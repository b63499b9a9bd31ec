//! A tree-walking interpreter: lexer, recursive-descent parser, optional
//! constant-folding optimizer, static analyzer, and an evaluator with
//! lexically-scoped arena-managed environments, closures, classes with
//! inheritance, pattern matching, exceptions, modules, and cooperative
//! async tasks.

pub mod analyzer;
pub mod ast;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod module;
pub mod natives;
pub mod optimizer;
pub mod parser;
pub mod token;
pub mod value;

use std::cell::RefCell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub use error::RuntimeError;
use evaluator::{DebugHook, Evaluator};

/// Front door for embedding the interpreter (§4.5, §6.3): lexes, parses,
/// optionally optimizes, and evaluates `source` as the program located
/// at `entry_path`, resolving relative imports against `cwd`.
pub struct Interpreter {
    optimize: bool,
    debug_hook: Option<DebugHook>,
    output: Option<Rc<RefCell<dyn Write>>>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self {
            optimize: true,
            debug_hook: None,
            output: None,
        }
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_optimizer(mut self, enabled: bool) -> Self {
        self.optimize = enabled;
        self
    }

    pub fn with_debug_hook(mut self, hook: DebugHook) -> Self {
        self.debug_hook = Some(hook);
        self
    }

    /// Redirects the program's `print()` output, e.g. to a buffer under
    /// test instead of the process's real stdout.
    pub fn with_output(mut self, sink: Rc<RefCell<dyn Write>>) -> Self {
        self.output = Some(sink);
        self
    }

    pub fn run(
        &self,
        source: &str,
        entry_path: &Path,
        cwd: &Path,
        args: Vec<String>,
    ) -> Result<(), RuntimeError> {
        let (tokens, lex_errors) = lexer::tokenize(source);
        if !lex_errors.is_empty() {
            return Err(RuntimeError::Lex(lex_errors));
        }

        let (program, parse_errors) = parser::parse(&tokens);
        if !parse_errors.is_empty() {
            return Err(RuntimeError::Parse(parse_errors));
        }

        let program = if self.optimize {
            optimizer::optimize(program)
        } else {
            program
        };

        // Relative imports resolve against the entry script's own
        // directory; `cwd` only matters when the entry itself has no
        // directory component (e.g. a script read from stdin).
        let base_dir = entry_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| if cwd.as_os_str().is_empty() { PathBuf::from(".") } else { cwd.to_path_buf() });
        let mut evaluator = Evaluator::new(base_dir, args);
        if let Some(hook) = self.debug_hook.clone() {
            evaluator.set_debug_hook(hook);
        }
        if let Some(sink) = self.output.clone() {
            evaluator.set_output(sink);
        }
        evaluator.run_program(&program)
    }
}
