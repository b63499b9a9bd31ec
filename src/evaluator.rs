//! The tree-walking evaluator (§4.5, §4.6, §4.7): expression and
//! statement evaluation, function calls, classes and inheritance,
//! pattern matching, exceptions, modules, and cooperative tasks.

use std::cell::RefCell;
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{
    BinaryOp, ClassDecl, Expr, ExprKind, FieldDecl, FunctionDecl, ImportStmt, Literal, LogicalOp,
    MapEntry, MatchArm, Pattern, Program, Stmt, StmtKind, UnaryOp,
};
use crate::environment::{EnvId, EnvironmentArena};
use crate::error::{ErrorKind, RuntimeError};
use crate::module::{Module, ModuleLoader};
use crate::value::{
    display_value, Arity, BoundMethod, Callable, ClassDescriptor, ErrorObject, Instance,
    NativeFunction, Task, TaskState, UserFunction, Value,
};

/// Non-local control transfer (§4.5 design note: an explicit signal
/// rather than Rust panics/unwinding, so a thrown language error can be
/// caught by a language-level `try`/`catch` without ever touching
/// Rust's own panic machinery). Every eval/exec step returns either a
/// `Value` or one of these, so `Exit` unwinds through `finally` blocks
/// exactly like a `Throw` does.
#[derive(Clone)]
pub enum Signal {
    Return(Value),
    Break,
    Continue,
    Throw(Value),
    /// `process.exit(code)` (§4.9): never catchable by `catch`.
    Exit(i32),
}

pub type EvalResult = Result<Value, Signal>;
pub type ExecResult = Result<(), Signal>;

const MAX_CALL_DEPTH: usize = 256;

pub type DebugHook = Rc<dyn Fn(&Stmt, EnvId)>;

pub struct Evaluator {
    pub arena: EnvironmentArena,
    pub globals: EnvId,
    current_env: EnvId,
    call_depth: usize,
    this_stack: Vec<Rc<Instance>>,
    /// The declaring class of the method currently executing, used to
    /// resolve `super.method` to the *declaring* class's parent rather
    /// than the runtime type's parent (§4.5).
    class_context: Vec<Rc<ClassDescriptor>>,
    loader: ModuleLoader,
    module_stack: Vec<Rc<Module>>,
    cwd: PathBuf,
    pub args: Vec<String>,
    debug_hook: Option<DebugHook>,
    output: Rc<RefCell<dyn Write>>,
}

impl Evaluator {
    pub fn new(cwd: PathBuf, args: Vec<String>) -> Self {
        let arena = EnvironmentArena::new();
        let globals = arena.create_root();
        let mut evaluator = Self {
            arena,
            globals,
            current_env: globals,
            call_depth: 0,
            this_stack: Vec::new(),
            class_context: Vec::new(),
            loader: ModuleLoader::new(),
            module_stack: Vec::new(),
            cwd,
            args,
            debug_hook: None,
            output: Rc::new(RefCell::new(io::stdout())),
        };
        evaluator.register_globals();
        evaluator
    }

    /// Binds the bare global builtins the language surface assumes
    /// without an explicit `import` (§4.1's interpolation desugaring
    /// calls `str(expr)`; §4.6 registers `spawn(f)` in the global
    /// environment).
    fn register_globals(&mut self) {
        let str_fn = Value::Callable(Rc::new(Callable::Native(NativeFunction {
            name: "str".to_string(),
            arity: Arity::Fixed(1),
            func: Rc::new(|_, args| Ok(Value::string(display_value(&args[0])))),
        })));
        self.arena.define(self.globals, "str", str_fn);

        let spawn_fn = Value::Callable(Rc::new(Callable::Native(NativeFunction {
            name: "spawn".to_string(),
            arity: Arity::Fixed(1),
            func: Rc::new(|evaluator: &mut Evaluator, args| evaluator.native_spawn(args)),
        })));
        self.arena.define(self.globals, "spawn", spawn_fn);
    }

    /// `spawn(f)` (§4.6): builds a `Pending` Task around `f` without
    /// running it; the task only runs once awaited.
    fn native_spawn(&mut self, mut args: Vec<Value>) -> EvalResult {
        let arg = args.remove(0);
        let (body, receiver) = match &arg {
            Value::Callable(c) => match c.as_ref() {
                Callable::User(f) => (Rc::new(f.clone()), None),
                Callable::Bound(b) => (b.method.clone(), Some(b.instance.clone())),
                _ => return Err(self.throw(ErrorKind::Type, "spawn requires a user-defined function")),
            },
            other => {
                return Err(self.throw(
                    ErrorKind::Type,
                    format!("spawn requires a callable, got {}", other.type_name()),
                ))
            }
        };
        Ok(self.spawn_task(body, receiver, Vec::new()))
    }

    pub fn set_debug_hook(&mut self, hook: DebugHook) {
        self.debug_hook = Some(hook);
    }

    /// Redirects `print()` output away from stdout, e.g. to capture a
    /// program's stdout sequence in a test.
    pub fn set_output(&mut self, sink: Rc<RefCell<dyn Write>>) {
        self.output = sink;
    }

    fn current_dir(&self) -> PathBuf {
        self.module_stack
            .last()
            .map(|m| self.loader.current_dir_for(m))
            .unwrap_or_else(|| self.cwd.clone())
    }

    /// Runs a top-level program's statements in the global environment,
    /// translating an uncaught `Throw` into [`RuntimeError::Uncaught`]
    /// and a `process.exit` signal into [`RuntimeError::Exit`] (§6.3).
    pub fn run_program(&mut self, program: &Program) -> Result<(), RuntimeError> {
        match self.exec_block(&program.statements, self.globals) {
            Ok(()) => Ok(()),
            Err(Signal::Throw(v)) => Err(RuntimeError::Uncaught(display_value(&v))),
            Err(Signal::Exit(code)) => Err(RuntimeError::Exit(code)),
            Err(_) => Ok(()),
        }
    }

    fn throw(&self, kind: ErrorKind, message: impl Into<String>) -> Signal {
        Signal::Throw(Value::Error(Rc::new(ErrorObject::new(kind.to_string(), message.into()))))
    }

    // ---- Statements --------------------------------------------------

    fn exec_block(&mut self, stmts: &[Stmt], env: EnvId) -> ExecResult {
        let saved = self.current_env;
        self.current_env = env;
        let result = (|| {
            for stmt in stmts {
                self.exec_stmt(stmt)?;
            }
            Ok(())
        })();
        self.current_env = saved;
        result
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> ExecResult {
        if let Some(hook) = &self.debug_hook {
            hook(stmt, self.current_env);
        }
        match &stmt.kind {
            StmtKind::VarDecl { pattern, init, .. } => {
                let value = match init {
                    Some(e) => self.eval(e)?,
                    None => Value::Nil,
                };
                self.bind_pattern_or_throw(pattern, value)?;
                Ok(())
            }
            StmtKind::Expr(e) => {
                self.eval(e)?;
                Ok(())
            }
            StmtKind::Block(stmts) => {
                let child = self.arena.create_child(self.current_env);
                self.exec_block(stmts, child)
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond_val = self.eval(cond)?;
                if cond_val.is_truthy() {
                    self.exec_stmt(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_stmt(else_branch)
                } else {
                    Ok(())
                }
            }
            StmtKind::While { cond, body } => {
                loop {
                    let cond_val = self.eval(cond)?;
                    if !cond_val.is_truthy() {
                        break;
                    }
                    match self.exec_stmt(body) {
                        Ok(()) => {}
                        Err(Signal::Break) => break,
                        Err(Signal::Continue) => continue,
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(e) => self.eval(e)?,
                    None => Value::Nil,
                };
                Err(Signal::Return(value))
            }
            StmtKind::Break => Err(Signal::Break),
            StmtKind::Continue => Err(Signal::Continue),
            StmtKind::FuncDecl(decl) => {
                let func = self.make_user_function(decl, self.current_env);
                self.arena.define(
                    self.current_env,
                    &decl.name,
                    Value::Callable(Rc::new(Callable::User(func))),
                );
                Ok(())
            }
            StmtKind::ClassDecl(decl) => self.exec_class_decl(decl),
            StmtKind::Import(import) => self.exec_import(import, None),
            StmtKind::Export(inner) => {
                self.exec_stmt(inner)?;
                let name = match &inner.kind {
                    StmtKind::VarDecl {
                        pattern: Pattern::Variable(name),
                        ..
                    } => Some(name.clone()),
                    StmtKind::FuncDecl(d) => Some(d.name.clone()),
                    StmtKind::ClassDecl(d) => Some(d.name.clone()),
                    _ => None,
                };
                if let Some(name) = name {
                    self.add_current_export(&name);
                }
                Ok(())
            }
            StmtKind::ReExport { specifiers, path } => self.exec_import(
                &ImportStmt::Named {
                    specifiers: specifiers.clone(),
                    path: path.clone(),
                },
                Some(specifiers),
            ),
            StmtKind::Try {
                body,
                catch,
                finally,
            } => self.exec_try(body, catch, finally),
            StmtKind::Throw(expr) => {
                let value = self.eval(expr)?;
                Err(Signal::Throw(value))
            }
        }
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        catch: &Option<(Option<String>, Vec<Stmt>)>,
        finally: &Option<Vec<Stmt>>,
    ) -> ExecResult {
        let child = self.arena.create_child(self.current_env);
        let body_result = self.exec_block(body, child);

        let after_catch = match body_result {
            Err(Signal::Throw(thrown)) => {
                if let Some((binding, catch_body)) = catch {
                    let catch_env = self.arena.create_child(self.current_env);
                    if let Some(name) = binding {
                        self.arena.define(catch_env, name, thrown);
                    }
                    self.exec_block(catch_body, catch_env)
                } else {
                    Err(Signal::Throw(thrown))
                }
            }
            other => other,
        };

        if let Some(finally_body) = finally {
            let finally_env = self.arena.create_child(self.current_env);
            match self.exec_block(finally_body, finally_env) {
                Ok(()) => after_catch,
                // A signal raised in `finally` supersedes whatever the
                // try/catch produced (§4.5: finally always wins).
                escaping => escaping,
            }
        } else {
            after_catch
        }
    }

    fn exec_class_decl(&mut self, decl: &ClassDecl) -> ExecResult {
        let superclass = match &decl.superclass {
            Some(name) => {
                let value = self
                    .arena
                    .get(self.current_env, name)
                    .map_err(|e| Signal::Throw(Value::Error(Rc::new(e))))?;
                match value {
                    Value::Callable(c) => match c.as_ref() {
                        Callable::Class(desc) => Some(desc.clone()),
                        _ => return Err(self.throw(ErrorKind::Type, format!("{name} is not a class"))),
                    },
                    _ => return Err(self.throw(ErrorKind::Type, format!("{name} is not a class"))),
                }
            }
            None => None,
        };

        let class_env = self.arena.create_child(self.current_env);
        let mut methods = IndexMap::new();
        for method in &decl.methods {
            let func = self.make_user_function(method, class_env);
            methods.insert(method.name.clone(), Rc::new(func));
        }

        let descriptor = Rc::new(ClassDescriptor {
            name: decl.name.clone(),
            superclass,
            fields: decl.fields.clone(),
            methods,
        });

        self.arena.define(
            self.current_env,
            &decl.name,
            Value::Callable(Rc::new(Callable::Class(descriptor))),
        );
        Ok(())
    }

    fn make_user_function(&self, decl: &FunctionDecl, closure: EnvId) -> UserFunction {
        UserFunction {
            name: Some(decl.name.clone()),
            params: decl.params.clone(),
            body: Rc::new(decl.body.clone()),
            closure,
            is_async: decl.is_async,
        }
    }

    // ---- Imports & exports --------------------------------------------

    fn exec_import(
        &mut self,
        import: &ImportStmt,
        re_export_of: Option<&[(String, Option<String>)]>,
    ) -> ExecResult {
        let path = match import {
            ImportStmt::SideEffect { path } => path.clone(),
            ImportStmt::Named { path, .. } => path.clone(),
            ImportStmt::Star { path, .. } => path.clone(),
        };

        if let Some(native) = crate::natives::resolve_native(&path) {
            return self.bind_import_target(import, native, re_export_of);
        }

        let exports = self.load_module_exports(&path).map_err(|e| {
            Signal::Throw(Value::Error(Rc::new(ErrorObject::new(
                ErrorKind::Import.to_string(),
                e.to_string(),
            ))))
        })?;
        let module_map = Value::map(exports);
        self.bind_import_target(import, module_map, re_export_of)
    }

    fn bind_import_target(
        &mut self,
        import: &ImportStmt,
        module_value: Value,
        re_export_of: Option<&[(String, Option<String>)]>,
    ) -> ExecResult {
        let exports = match &module_value {
            Value::Map(m) => m.borrow().clone(),
            _ => IndexMap::new(),
        };
        match import {
            ImportStmt::SideEffect { .. } => {}
            ImportStmt::Star { alias, .. } => {
                self.arena.define(self.current_env, alias, module_value);
            }
            ImportStmt::Named { specifiers, .. } => {
                for (name, alias) in specifiers {
                    let value = exports
                        .get(name)
                        .cloned()
                        .ok_or_else(|| self.throw(ErrorKind::Import, format!("no export named '{name}'")))?;
                    let binding = alias.as_deref().unwrap_or(name);
                    if let Some(re_export) = re_export_of {
                        if re_export.iter().any(|(n, _)| n == name) {
                            self.arena.define(self.current_env, binding, value.clone());
                            self.add_current_export(binding);
                            continue;
                        }
                    }
                    self.arena.define(self.current_env, binding, value);
                }
            }
        }
        Ok(())
    }

    fn load_module_exports(&mut self, spec: &str) -> Result<IndexMap<String, Value>, crate::error::LoadError> {
        let dir = self.current_dir();
        let module = self.loader.begin_import(spec, &dir)?;

        if let Some(exports) = module.exports.borrow().clone() {
            return Ok(exports);
        }

        let module_env = self.arena.create_child(self.globals);
        let saved_env = self.current_env;
        self.current_env = module_env;
        self.module_stack.push(module.clone());

        let program = module.program.clone();
        // Module bodies may `return` early or signal exit; either way
        // exports are collected from whatever was bound before control
        // left the module's top level.
        let _ = self.exec_block(&program.statements, module_env);

        self.module_stack.pop();
        self.current_env = saved_env;

        let exports = self.take_module_exports(module_env);
        self.loader.finish(&module, exports.clone());
        Ok(exports)
    }

    fn add_current_export(&mut self, name: &str) {
        let env = self.current_env;
        let marker = format!("__export__{name}");
        self.arena.define(env, &marker, Value::Boolean(true));
    }

    fn take_module_exports(&self, module_env: EnvId) -> IndexMap<String, Value> {
        let mut exports = IndexMap::new();
        let marker_prefix = "__export__";
        for name in self.exported_names(module_env, marker_prefix) {
            if let Ok(value) = self.arena.get(module_env, &name) {
                exports.insert(name, value);
            }
        }
        exports
    }

    fn exported_names(&self, module_env: EnvId, prefix: &str) -> Vec<String> {
        self.arena
            .scope_keys(module_env)
            .into_iter()
            .filter_map(|k| k.strip_prefix(prefix).map(str::to_string))
            .collect()
    }

    // ---- Expressions ---------------------------------------------------

    pub fn eval(&mut self, expr: &Expr) -> EvalResult {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(literal_value(lit)),
            ExprKind::Identifier(name) => self
                .arena
                .get(self.current_env, name)
                .map_err(|e| Signal::Throw(Value::Error(Rc::new(e)))),
            ExprKind::This => match self.this_stack.last() {
                Some(inst) => Ok(Value::Instance(inst.clone())),
                None => Err(self.throw(ErrorKind::Type, "'this' used outside a method")),
            },
            ExprKind::Super { method } => self.eval_super(method),
            ExprKind::Assign { target, value } => self.eval_assign(target, value),
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(cond)?.is_truthy() {
                    self.eval(then_branch)
                } else {
                    self.eval(else_branch)
                }
            }
            ExprKind::Nullish { left, right } => {
                let l = self.eval(left)?;
                if matches!(l, Value::Nil) {
                    self.eval(right)
                } else {
                    Ok(l)
                }
            }
            ExprKind::Logical { op, left, right } => {
                let l = self.eval(left)?;
                match op {
                    LogicalOp::And => {
                        if !l.is_truthy() {
                            Ok(l)
                        } else {
                            self.eval(right)
                        }
                    }
                    LogicalOp::Or => {
                        if l.is_truthy() {
                            Ok(l)
                        } else {
                            self.eval(right)
                        }
                    }
                }
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                self.eval_binary(*op, l, r)
            }
            ExprKind::Unary { op, operand } => self.eval_unary(*op, operand),
            ExprKind::Call { callee, args } => self.eval_call(callee, args),
            ExprKind::Spread(inner) => self.eval(inner),
            ExprKind::Index { object, index } => self.eval_index(object, index),
            ExprKind::Property { object, name } => self.eval_property(object, name),
            ExprKind::ArrayLiteral(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    if let ExprKind::Spread(inner) = &item.kind {
                        let v = self.eval(inner)?;
                        if let Value::Array(arr) = v {
                            values.extend(arr.borrow().iter().cloned());
                        } else {
                            return Err(self.throw(ErrorKind::Type, "cannot spread non-array value"));
                        }
                    } else {
                        values.push(self.eval(item)?);
                    }
                }
                Ok(Value::array(values))
            }
            ExprKind::MapLiteral(entries) => {
                let mut map = IndexMap::new();
                for entry in entries {
                    match entry {
                        MapEntry::Pair(key, value_expr) => {
                            map.insert(key.clone(), self.eval(value_expr)?);
                        }
                        MapEntry::Spread(inner) => {
                            let v = self.eval(inner)?;
                            if let Value::Map(m) = v {
                                for (k, v) in m.borrow().iter() {
                                    map.insert(k.clone(), v.clone());
                                }
                            } else {
                                return Err(self.throw(ErrorKind::Type, "cannot spread non-map value"));
                            }
                        }
                    }
                }
                Ok(Value::map(map))
            }
            ExprKind::SetLiteral(items) => {
                let mut set = indexmap::IndexSet::new();
                for item in items {
                    let v = self.eval(item)?;
                    match v.canonical_key() {
                        Some(key) => {
                            set.insert(key);
                        }
                        None => {
                            return Err(self.throw(ErrorKind::Type, "only primitive values may be set members"))
                        }
                    }
                }
                Ok(Value::Set(Rc::new(RefCell::new(set))))
            }
            ExprKind::Function(lit) => {
                let func = UserFunction {
                    name: lit.name.clone(),
                    params: lit.params.clone(),
                    body: Rc::new(lit.body.clone()),
                    closure: self.current_env,
                    is_async: lit.is_async,
                };
                Ok(Value::Callable(Rc::new(Callable::User(func))))
            }
            ExprKind::Match(m) => self.eval_match(m),
            ExprKind::Print(args) => {
                let mut parts = Vec::with_capacity(args.len());
                for a in args {
                    parts.push(display_value(&self.eval(a)?));
                }
                writeln!(self.output.borrow_mut(), "{}", parts.join(" "))
                    .expect("write to print sink");
                Ok(Value::Nil)
            }
        }
    }

    fn eval_super(&mut self, method: &str) -> EvalResult {
        let class = self
            .class_context
            .last()
            .cloned()
            .ok_or_else(|| self.throw(ErrorKind::Syntax, "'super' used outside a method"))?;
        let superclass = class
            .superclass
            .clone()
            .ok_or_else(|| self.throw(ErrorKind::Name, "class has no superclass"))?;
        let found = superclass
            .find_method(method)
            .cloned()
            .ok_or_else(|| self.throw(ErrorKind::Name, format!("no such method '{method}'")))?;
        let instance = self
            .this_stack
            .last()
            .cloned()
            .ok_or_else(|| self.throw(ErrorKind::Syntax, "'super' used outside a method"))?;
        Ok(Value::Callable(Rc::new(Callable::Bound(BoundMethod {
            method: found,
            instance,
        }))))
    }

    fn eval_assign(&mut self, target: &Expr, value_expr: &Expr) -> EvalResult {
        let value = self.eval(value_expr)?;
        match &target.kind {
            ExprKind::Identifier(name) => {
                self.arena
                    .assign(self.current_env, name, value.clone())
                    .map_err(|e| Signal::Throw(Value::Error(Rc::new(e))))?;
                Ok(value)
            }
            ExprKind::Index { object, index } => {
                let obj = self.eval(object)?;
                let idx = self.eval(index)?;
                self.assign_index(obj, idx, value.clone())?;
                Ok(value)
            }
            ExprKind::Property { object, name } => {
                let obj = self.eval(object)?;
                match obj {
                    Value::Instance(inst) => {
                        inst.fields.borrow_mut().insert(name.clone(), value.clone());
                        Ok(value)
                    }
                    Value::Map(m) => {
                        m.borrow_mut().insert(name.clone(), value.clone());
                        Ok(value)
                    }
                    _ => Err(self.throw(ErrorKind::Type, "cannot set property on this value")),
                }
            }
            _ => Err(self.throw(ErrorKind::Syntax, "invalid assignment target")),
        }
    }

    fn assign_index(&mut self, obj: Value, idx: Value, value: Value) -> ExecResult {
        match (obj, idx) {
            (Value::Array(arr), Value::Number(n)) => {
                let i = n as i64;
                let mut arr = arr.borrow_mut();
                if i < 0 || i as usize >= arr.len() {
                    return Err(self.throw(ErrorKind::Value, "array index out of range"));
                }
                arr[i as usize] = value;
                Ok(())
            }
            (Value::Map(m), Value::String(s)) => {
                m.borrow_mut().insert(s.to_string(), value);
                Ok(())
            }
            _ => Err(self.throw(ErrorKind::Type, "value is not indexable for assignment")),
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, l: Value, r: Value) -> EvalResult {
        use BinaryOp::*;
        match op {
            Add => match (&l, &r) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::String(_), _) | (_, Value::String(_)) => {
                    Ok(Value::string(format!("{}{}", display_value(&l), display_value(&r))))
                }
                (Value::Array(a), Value::Array(b)) => {
                    let mut out = a.borrow().clone();
                    out.extend(b.borrow().iter().cloned());
                    Ok(Value::array(out))
                }
                _ => Err(self.throw(ErrorKind::Type, "unsupported operand types for +")),
            },
            Subtract => self.numeric_binop(l, r, "-", |a, b| a - b),
            Multiply => self.numeric_binop(l, r, "*", |a, b| a * b),
            Modulo => self.numeric_binop(l, r, "%", |a, b| a % b),
            Divide => match (&l, &r) {
                (Value::Number(_), Value::Number(b)) if *b == 0.0 => {
                    Err(self.throw(ErrorKind::Value, "division by zero"))
                }
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a / b)),
                _ => Err(self.throw(ErrorKind::Type, "unsupported operand types for /")),
            },
            Equal => Ok(Value::Boolean(l.equals(&r))),
            NotEqual => Ok(Value::Boolean(!l.equals(&r))),
            Less => self.compare(l, r, |o| o.is_lt()),
            LessEqual => self.compare(l, r, |o| o.is_le()),
            Greater => self.compare(l, r, |o| o.is_gt()),
            GreaterEqual => self.compare(l, r, |o| o.is_ge()),
        }
    }

    fn numeric_binop(&mut self, l: Value, r: Value, symbol: &str, f: impl Fn(f64, f64) -> f64) -> EvalResult {
        match (l, r) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(f(a, b))),
            _ => Err(self.throw(ErrorKind::Type, format!("unsupported operand types for {symbol}"))),
        }
    }

    fn compare(&mut self, l: Value, r: Value, pred: impl Fn(std::cmp::Ordering) -> bool) -> EvalResult {
        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => match a.partial_cmp(b) {
                Some(ord) => Ok(Value::Boolean(pred(ord))),
                None => Ok(Value::Boolean(false)),
            },
            (Value::String(a), Value::String(b)) => Ok(Value::Boolean(pred(a.cmp(b)))),
            _ => Err(self.throw(ErrorKind::Type, "values are not comparable")),
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr) -> EvalResult {
        match op {
            UnaryOp::Not => Ok(Value::Boolean(!self.eval(operand)?.is_truthy())),
            UnaryOp::Negate => match self.eval(operand)? {
                Value::Number(n) => Ok(Value::Number(-n)),
                _ => Err(self.throw(ErrorKind::Type, "unary '-' requires a number")),
            },
            UnaryOp::Await => {
                let v = self.eval(operand)?;
                self.eval_await(v)
            }
        }
    }

    // ---- Calls, properties, indexing -----------------------------------

    fn eval_call(&mut self, callee: &Expr, arg_exprs: &[Expr]) -> EvalResult {
        let (receiver, callable) = self.eval_callee(callee)?;
        let mut args = Vec::with_capacity(arg_exprs.len());
        for a in arg_exprs {
            if let ExprKind::Spread(inner) = &a.kind {
                let v = self.eval(inner)?;
                if let Value::Array(arr) = v {
                    args.extend(arr.borrow().iter().cloned());
                    continue;
                }
                return Err(self.throw(ErrorKind::Type, "cannot spread non-array value as arguments"));
            }
            args.push(self.eval(a)?);
        }
        self.call_callable(callable, receiver, args)
    }

    /// Evaluates the call target, returning the instance to bind `this`
    /// to (if it's a bound method call) alongside the callable itself.
    fn eval_callee(&mut self, callee: &Expr) -> Result<(Option<Rc<Instance>>, Rc<Callable>), Signal> {
        if let ExprKind::Property { object, name } = &callee.kind {
            let obj = self.eval(object)?;
            if let Value::Instance(inst) = &obj {
                if let Some(method) = inst.class.find_method(name) {
                    return Ok((Some(inst.clone()), Rc::new(Callable::User((**method).clone()))));
                }
            }
            let value = self.eval_property_of(obj, name)?;
            return self.as_callable(value);
        }
        let value = self.eval(callee)?;
        self.as_callable(value)
    }

    fn as_callable(&self, value: Value) -> Result<(Option<Rc<Instance>>, Rc<Callable>), Signal> {
        match value {
            Value::Callable(c) => Ok((None, c)),
            _ => Err(self.throw(ErrorKind::Type, format!("{} is not callable", value.type_name()))),
        }
    }

    /// Shared entry point for invoking any [`Callable`], re-entered both
    /// from `Expr::Call` and from native higher-order functions such as
    /// `array.map`/`filter`/`reduce` (§4.9.1).
    pub fn call_callable(
        &mut self,
        callable: Rc<Callable>,
        receiver: Option<Rc<Instance>>,
        args: Vec<Value>,
    ) -> EvalResult {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(self.throw(ErrorKind::StackOverflow, "maximum call depth exceeded"));
        }

        match callable.as_ref() {
            Callable::Native(native) => {
                if !native.arity.accepts(args.len()) {
                    return Err(self.throw(
                        ErrorKind::Arity,
                        format!("{} expects a different number of arguments", native.name),
                    ));
                }
                self.call_depth += 1;
                let result = (native.func)(self, args);
                self.call_depth -= 1;
                result
            }
            Callable::User(func) => self.invoke_user_function(func, receiver, args),
            Callable::Bound(bound) => {
                self.invoke_user_function(&bound.method, Some(bound.instance.clone()), args)
            }
            Callable::Class(class) => self.instantiate(class.clone(), args),
        }
    }

    fn invoke_user_function(
        &mut self,
        func: &UserFunction,
        receiver: Option<Rc<Instance>>,
        args: Vec<Value>,
    ) -> EvalResult {
        if !Arity::Fixed(func.params.len()).accepts(args.len()) {
            return Err(self.throw(
                ErrorKind::Arity,
                format!("expected {} argument(s), got {}", func.params.len(), args.len()),
            ));
        }

        if func.is_async {
            return Ok(self.spawn_task(Rc::new(func.clone()), receiver, args));
        }

        self.run_function_body(func, receiver, args)
    }

    fn run_function_body(
        &mut self,
        func: &UserFunction,
        receiver: Option<Rc<Instance>>,
        args: Vec<Value>,
    ) -> EvalResult {
        let call_env = self.arena.create_child(func.closure);
        for (param, arg) in func.params.iter().zip(args) {
            self.arena.define(call_env, &param.name, arg);
        }

        if let Some(instance) = &receiver {
            self.this_stack.push(instance.clone());
            self.class_context.push(instance.class.clone());
        }

        self.call_depth += 1;
        let saved_env = self.current_env;
        let result = self.exec_block(&func.body, call_env);
        self.current_env = saved_env;
        self.call_depth -= 1;

        if receiver.is_some() {
            self.this_stack.pop();
            self.class_context.pop();
        }

        match result {
            Ok(()) => Ok(Value::Nil),
            Err(Signal::Return(v)) => Ok(v),
            Err(Signal::Throw(v)) => Err(Signal::Throw(v)),
            Err(Signal::Exit(code)) => Err(Signal::Exit(code)),
            Err(Signal::Break) | Err(Signal::Continue) => {
                Err(self.throw(ErrorKind::Syntax, "break/continue outside a loop"))
            }
        }
    }

    fn instantiate(&mut self, class: Rc<ClassDescriptor>, args: Vec<Value>) -> EvalResult {
        let instance = Rc::new(Instance {
            class: class.clone(),
            fields: RefCell::new(IndexMap::new()),
        });

        self.init_fields(&class, &instance)?;

        if let Some(ctor) = class.constructor() {
            self.run_function_body(ctor, Some(instance.clone()), args)?;
        }

        Ok(Value::Instance(instance))
    }

    /// Initializes fields from the root ancestor down, so a subclass's
    /// field initializers can see (and override) values a superclass
    /// initializer already set (§4.5).
    fn init_fields(&mut self, class: &Rc<ClassDescriptor>, instance: &Rc<Instance>) -> ExecResult {
        if let Some(parent) = &class.superclass {
            self.init_fields(parent, instance)?;
        }
        for FieldDecl { name, init } in &class.fields {
            let value = match init {
                Some(e) => {
                    self.this_stack.push(instance.clone());
                    let v = self.eval(e);
                    self.this_stack.pop();
                    v?
                }
                None => Value::Nil,
            };
            instance.fields.borrow_mut().insert(name.clone(), value);
        }
        Ok(())
    }

    fn eval_index(&mut self, object: &Expr, index: &Expr) -> EvalResult {
        let obj = self.eval(object)?;
        let idx = self.eval(index)?;
        match (&obj, &idx) {
            (Value::Array(arr), Value::Number(n)) => {
                let arr = arr.borrow();
                let i = *n as i64;
                if i < 0 {
                    return Err(self.throw(ErrorKind::Value, "array index out of range"));
                }
                arr.get(i as usize)
                    .cloned()
                    .ok_or_else(|| self.throw(ErrorKind::Value, "array index out of range"))
            }
            (Value::Map(m), Value::String(s)) => Ok(m.borrow().get(s.as_ref()).cloned().unwrap_or(Value::Nil)),
            (Value::String(s), Value::Number(n)) => {
                let i = *n as i64;
                if i < 0 {
                    return Err(self.throw(ErrorKind::Value, "string index out of range"));
                }
                s.chars()
                    .nth(i as usize)
                    .map(|c| Value::string(c.to_string()))
                    .ok_or_else(|| self.throw(ErrorKind::Value, "string index out of range"))
            }
            _ => Err(self.throw(ErrorKind::Type, "value is not indexable")),
        }
    }

    fn eval_property(&mut self, object: &Expr, name: &str) -> EvalResult {
        let obj = self.eval(object)?;
        self.eval_property_of(obj, name)
    }

    fn eval_property_of(&mut self, obj: Value, name: &str) -> EvalResult {
        match &obj {
            Value::Instance(inst) => {
                if let Some(v) = inst.fields.borrow().get(name) {
                    return Ok(v.clone());
                }
                if let Some(method) = inst.class.find_method(name) {
                    return Ok(Value::Callable(Rc::new(Callable::Bound(BoundMethod {
                        method: method.clone(),
                        instance: inst.clone(),
                    }))));
                }
                Err(self.throw(ErrorKind::Name, format!("no such property '{name}'")))
            }
            Value::Map(m) => Ok(m.borrow().get(name).cloned().unwrap_or(Value::Nil)),
            Value::Error(err) => match name {
                "message" => Ok(Value::string(err.message.clone())),
                "kind" => Ok(Value::string(err.kind.clone())),
                _ => Ok(Value::Nil),
            },
            Value::Array(arr) => match name {
                "length" => Ok(Value::Number(arr.borrow().len() as f64)),
                _ => crate::natives::array_method(self, arr.clone(), name),
            },
            Value::String(s) => match name {
                "length" => Ok(Value::Number(s.chars().count() as f64)),
                _ => crate::natives::string_method(s.clone(), name),
            },
            _ => Err(self.throw(ErrorKind::Name, format!("no such property '{name}'"))),
        }
    }

    // ---- Pattern matching (§4.7) ----------------------------------------

    fn eval_match(&mut self, m: &crate::ast::MatchExpr) -> EvalResult {
        let scrutinee = self.eval(&m.scrutinee)?;
        for arm in &m.arms {
            let child = self.arena.create_child(self.current_env);
            if self.try_match(&arm.pattern, &scrutinee, child) {
                let saved = self.current_env;
                self.current_env = child;
                let outcome = self.eval_match_arm(arm);
                self.current_env = saved;
                match outcome {
                    MatchArmOutcome::NoGuardMatch => continue,
                    MatchArmOutcome::Result(r) => return r,
                }
            }
        }
        Err(self.throw(ErrorKind::Value, "no match arm matched the value"))
    }

    fn eval_match_arm(&mut self, arm: &MatchArm) -> MatchArmOutcome {
        if let Some(guard) = &arm.guard {
            match self.eval(guard) {
                Ok(v) if !v.is_truthy() => return MatchArmOutcome::NoGuardMatch,
                Ok(_) => {}
                Err(e) => return MatchArmOutcome::Result(Err(e)),
            }
        }
        MatchArmOutcome::Result(self.eval(&arm.body))
    }

    fn try_match(&mut self, pattern: &Pattern, value: &Value, env: EnvId) -> bool {
        match pattern {
            Pattern::Wildcard => true,
            Pattern::Literal(lit) => literal_value(lit).equals(value),
            Pattern::Variable(name) => {
                self.arena.define(env, name, value.clone());
                true
            }
            Pattern::Array(patterns) => {
                if let Value::Array(arr) = value {
                    let arr = arr.borrow();
                    if arr.len() != patterns.len() {
                        return false;
                    }
                    patterns
                        .iter()
                        .zip(arr.iter())
                        .all(|(p, v)| self.try_match(p, v, env))
                } else {
                    false
                }
            }
            Pattern::Map(keys) => {
                if let Value::Map(m) = value {
                    let m = m.borrow();
                    for key in keys {
                        match m.get(key) {
                            Some(v) => self.arena.define(env, key, v.clone()),
                            None => return false,
                        }
                    }
                    true
                } else {
                    false
                }
            }
        }
    }

    fn bind_pattern_or_throw(&mut self, pattern: &Pattern, value: Value) -> ExecResult {
        let env = self.current_env;
        if self.try_match(pattern, &value, env) {
            Ok(())
        } else {
            Err(self.throw(ErrorKind::Value, "value does not match declaration pattern"))
        }
    }

    // ---- Tasks (§3.5, §4.6) ---------------------------------------------

    /// `async fn` invocation produces a pending [`Task`] immediately
    /// rather than running the body; the body only executes once
    /// `await`ed, which keeps the language's concurrency model
    /// cooperative and single-threaded (§5). The call's own receiver and
    /// arguments are captured into the deferred closure.
    fn spawn_task(&mut self, func: Rc<UserFunction>, receiver: Option<Rc<Instance>>, args: Vec<Value>) -> Value {
        let call_env = self.arena.create_child(func.closure);
        for (param, arg) in func.params.iter().zip(args) {
            self.arena.define(call_env, &param.name, arg);
        }
        let deferred = UserFunction {
            name: func.name.clone(),
            params: Vec::new(),
            body: func.body.clone(),
            closure: call_env,
            is_async: false,
        };
        let mut task = Task::new(Rc::new(deferred));
        task.receiver = receiver;
        Value::Task(Rc::new(RefCell::new(task)))
    }

    fn eval_await(&mut self, value: Value) -> EvalResult {
        let task = match value {
            Value::Task(t) => t,
            other => return Ok(other),
        };

        let state = task.borrow().state;
        match state {
            TaskState::Resolved | TaskState::Rejected => {
                return task.borrow().result.clone().unwrap().map_err(Signal::Throw)
            }
            TaskState::Running => return Err(self.throw(ErrorKind::Value, "task is already running")),
            TaskState::Pending => {}
        }

        task.borrow_mut().state = TaskState::Running;
        let body = task.borrow().body.clone();
        let receiver = task.borrow().receiver.clone();
        let outcome = self.run_function_body(&body, receiver, Vec::new());

        let outcome_value = match &outcome {
            Ok(v) => Ok(v.clone()),
            Err(Signal::Throw(v)) => Err(v.clone()),
            Err(other) => return Err(other.clone()),
        };

        let mut t = task.borrow_mut();
        t.state = match &outcome_value {
            Ok(_) => TaskState::Resolved,
            Err(_) => TaskState::Rejected,
        };
        t.result = Some(outcome_value);
        drop(t);
        outcome
    }
}

enum MatchArmOutcome {
    NoGuardMatch,
    Result(EvalResult),
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Nil => Value::Nil,
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Number(n) => Value::Number(*n),
        Literal::String(s) => Value::string(s.clone()),
    }
}
