//! Module loading (§3.6, §4.8): canonicalized-path caching, an
//! import-stack for circular-import detection, and isolated per-module
//! export scopes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::Program;
use crate::error::LoadError;
use crate::value::Value;

#[derive(Debug)]
pub struct Module {
    pub path: PathBuf,
    pub program: Rc<Program>,
    /// Populated once the module has finished evaluating; `None` while
    /// it is still on the import stack (i.e. mid-evaluation), which is
    /// what makes a cyclic `import` observable as "not yet exported"
    /// rather than silently returning an empty map.
    pub exports: RefCell<Option<IndexMap<String, Value>>>,
}

/// Caches parsed modules by canonical path and tracks the chain of
/// in-progress imports so a cycle can be reported with the full path
/// that produced it (§4.8).
#[derive(Default)]
pub struct ModuleLoader {
    cache: RefCell<HashMap<PathBuf, Rc<Module>>>,
    stack: RefCell<Vec<PathBuf>>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `spec` relative to `from_dir`, loads and parses it if
    /// not already cached, pushes it onto the import stack, and returns
    /// the cached module handle. The caller is responsible for calling
    /// [`ModuleLoader::finish`] once the module has been evaluated.
    pub fn begin_import(&self, spec: &str, from_dir: &Path) -> Result<Rc<Module>, LoadError> {
        let resolved = resolve_path(spec, from_dir)?;

        if let Some(pos) = self.stack.borrow().iter().position(|p| p == &resolved) {
            let mut cycle: Vec<PathBuf> = self.stack.borrow()[pos..].to_vec();
            cycle.push(resolved.clone());
            return Err(LoadError::CircularImport { stack: cycle });
        }

        if let Some(existing) = self.cache.borrow().get(&resolved) {
            return Ok(existing.clone());
        }

        let source = fs::read_to_string(&resolved).map_err(|source| LoadError::Io {
            path: resolved.clone(),
            source,
        })?;

        let (tokens, lex_errors) = crate::lexer::tokenize(&source);
        if !lex_errors.is_empty() {
            return Err(LoadError::Io {
                path: resolved.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("{} lex error(s) in {}", lex_errors.len(), resolved.display()),
                ),
            });
        }
        let (program, parse_errors) = crate::parser::parse(&tokens);
        if !parse_errors.is_empty() {
            return Err(LoadError::Io {
                path: resolved.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("{} parse error(s) in {}", parse_errors.len(), resolved.display()),
                ),
            });
        }

        let module = Rc::new(Module {
            path: resolved.clone(),
            program: Rc::new(program),
            exports: RefCell::new(None),
        });

        self.cache.borrow_mut().insert(resolved.clone(), module.clone());
        self.stack.borrow_mut().push(resolved);
        Ok(module)
    }

    pub fn finish(&self, module: &Module, exports: IndexMap<String, Value>) {
        *module.exports.borrow_mut() = Some(exports);
        self.stack.borrow_mut().pop();
    }

    pub fn current_dir_for(&self, module: &Module) -> PathBuf {
        module
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn resolve_path(spec: &str, from_dir: &Path) -> Result<PathBuf, LoadError> {
    let candidate = from_dir.join(spec);
    let candidate = if candidate.extension().is_none() {
        candidate.with_extension("izi")
    } else {
        candidate
    };
    candidate
        .canonicalize()
        .map_err(|_| LoadError::ModuleNotFound { path: candidate })
}
