//! The runtime tagged union (§3.2), class descriptors (§3.4), and tasks
//! (§3.5). Array/Map/Set/Instance/Task/Callable/Error are reference
//! semantic via `Rc<RefCell<_>>`; the evaluator never runs more than one
//! statement at a time (§5), so `Rc` rather than `Arc` is the correct,
//! idiomatic choice here — there is no cross-thread sharing to support.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::ast::{FunctionDecl, Param};
use crate::environment::EnvId;

pub type SharedArray = Rc<RefCell<Vec<Value>>>;
pub type SharedMap = Rc<RefCell<IndexMap<String, Value>>>;
/// Keyed by the canonical string form of a primitive value (§3.2, §9).
pub type SharedSet = Rc<RefCell<IndexSet<String>>>;

#[derive(Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Number(f64),
    String(Rc<str>),
    Array(SharedArray),
    Map(SharedMap),
    Set(SharedSet),
    Callable(Rc<Callable>),
    Instance(Rc<Instance>),
    Task(Rc<RefCell<Task>>),
    Error(Rc<ErrorObject>),
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(values)))
    }

    pub fn map(entries: IndexMap<String, Value>) -> Self {
        Value::Map(Rc::new(RefCell::new(entries)))
    }

    /// Truthiness (§3.2, P8): exactly `Nil` and `Boolean(false)` are
    /// falsy; everything else, including `0` and empty collections, is
    /// truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "Nil",
            Value::Boolean(_) => "Boolean",
            Value::Number(_) => "Number",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Map(_) => "Map",
            Value::Set(_) => "Set",
            Value::Callable(_) => "Callable",
            Value::Instance(_) => "Instance",
            Value::Task(_) => "Task",
            Value::Error(_) => "Error",
        }
    }

    /// Value equality under the rules `==` uses (§4.5, §4.7 literal
    /// patterns). Reference types compare by identity except for the
    /// primitive content inside them not being compared structurally —
    /// containers are equal only to themselves.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Callable(a), Value::Callable(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Task(a), Value::Task(b)) => Rc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Canonical string form used to key `Set` members (§3.2, §9): only
    /// primitive values (String/Number/Boolean/Nil) are admissible.
    pub fn canonical_key(&self) -> Option<String> {
        match self {
            Value::Nil => Some("nil".to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Number(n) => Some(format_number(*n)),
            Value::String(s) => Some(format!("s:{s}")),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", display_value(self))
    }
}

/// Stringification (§7): integers print without a decimal point, other
/// numbers print with at least one fractional digit, booleans as
/// `true`/`false`, `nil` as `nil`, collections with their literal syntax.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => s.to_string(),
        Value::Array(items) => {
            let parts: Vec<String> = items.borrow().iter().map(display_value_repr).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Map(entries) => {
            let parts: Vec<String> = entries
                .borrow()
                .iter()
                .map(|(k, v)| format!("{k}: {}", display_value_repr(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        Value::Set(items) => {
            let parts: Vec<String> = items.borrow().iter().map(|k| canonical_key_display(k)).collect();
            format!("{{{}}}", parts.join(", "))
        }
        Value::Callable(c) => format!("<{}>", c.describe()),
        Value::Instance(inst) => format!("<{} instance>", inst.class.name),
        Value::Task(task) => format!("<task {:?}>", task.borrow().state),
        Value::Error(err) => err.full_message(),
    }
}

/// Reconstructs a Set member's printable literal syntax from its
/// `canonical_key()` form (§7: collections print with their canonical
/// literal syntax, not their internal key encoding) — strings get their
/// `"s:"` tag stripped and are re-quoted; every other key already reads
/// as its own literal (`nil`, `true`/`false`, a number).
fn canonical_key_display(key: &str) -> String {
    match key.strip_prefix("s:") {
        Some(s) => format!("{s:?}"),
        None => key.to_string(),
    }
}

fn display_value_repr(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s.as_ref()),
        other => display_value(other),
    }
}

/// Fixed-precision decimal formatting, used both for `str(Number)` and
/// for Set-member canonicalization (§9: the spec allows either this or
/// bit-pattern hashing — this crate picks the simpler, deterministic
/// decimal form, favoring cross-platform reproducibility over
/// collision-resistance at pathological magnitudes).
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ---- Callables ------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variadic,
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Fixed(k) => *k == n,
            Arity::Variadic => true,
        }
    }
}

pub type NativeFn = Rc<dyn Fn(&mut crate::evaluator::Evaluator, Vec<Value>) -> crate::evaluator::EvalResult>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    pub arity: Arity,
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction").field("name", &self.name).finish()
    }
}

#[derive(Clone, Debug)]
pub struct UserFunction {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: Rc<Vec<crate::ast::Stmt>>,
    pub closure: EnvId,
    pub is_async: bool,
}

#[derive(Clone, Debug)]
pub struct BoundMethod {
    pub method: Rc<UserFunction>,
    pub instance: Rc<Instance>,
}

#[derive(Debug)]
pub enum Callable {
    Native(NativeFunction),
    User(UserFunction),
    Bound(BoundMethod),
    Class(Rc<ClassDescriptor>),
}

impl Callable {
    pub fn describe(&self) -> String {
        match self {
            Callable::Native(n) => format!("native fn {}", n.name),
            Callable::User(f) => format!("fn {}", f.name.as_deref().unwrap_or("<anonymous>")),
            Callable::Bound(b) => format!(
                "bound method {}",
                b.method.name.as_deref().unwrap_or("<anonymous>")
            ),
            Callable::Class(c) => format!("class {}", c.name),
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Callable::Native(n) => n.arity,
            Callable::User(f) => Arity::Fixed(f.params.len()),
            Callable::Bound(b) => Arity::Fixed(b.method.params.len()),
            Callable::Class(c) => Arity::Fixed(
                c.constructor()
                    .map(|ctor| ctor.params.len())
                    .unwrap_or(0),
            ),
        }
    }
}

// ---- Classes & instances ----------------------------------------------------

#[derive(Debug)]
pub struct ClassDescriptor {
    pub name: String,
    pub superclass: Option<Rc<ClassDescriptor>>,
    pub fields: Vec<crate::ast::FieldDecl>,
    pub methods: IndexMap<String, Rc<UserFunction>>,
}

impl ClassDescriptor {
    pub fn constructor(&self) -> Option<&Rc<UserFunction>> {
        self.find_method("constructor")
    }

    /// Walks the superclass chain looking up a method by name (§9: deep
    /// inheritance is resolved iteratively, not recursively, to keep
    /// `super.method` calling its *declaring* class's parent rather than
    /// the runtime type's parent).
    pub fn find_method(&self, name: &str) -> Option<&Rc<UserFunction>> {
        let mut class = self;
        loop {
            if let Some(method) = class.methods.get(name) {
                return Some(method);
            }
            class = class.superclass.as_deref()?;
        }
    }

    pub fn declares(&self, decl: &FunctionDecl) -> bool {
        self.methods.contains_key(&decl.name)
    }
}

#[derive(Debug)]
pub struct Instance {
    pub class: Rc<ClassDescriptor>,
    pub fields: RefCell<IndexMap<String, Value>>,
}

// ---- Tasks ------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Resolved,
    Rejected,
}

#[derive(Debug)]
pub struct Task {
    pub state: TaskState,
    pub body: Rc<UserFunction>,
    /// The bound `this` an async method captured at spawn time, if any.
    pub receiver: Option<Rc<Instance>>,
    /// Written exactly once, when the task reaches a terminal state
    /// (§3.5, §4.6). `Ok` for Resolved, `Err` for Rejected.
    pub result: Option<Result<Value, Value>>,
}

impl Task {
    pub fn new(body: Rc<UserFunction>) -> Self {
        Self {
            state: TaskState::Pending,
            body,
            receiver: None,
            result: None,
        }
    }
}

// ---- Errors -------------------------------------------------------------------

#[derive(Debug)]
pub struct ErrorObject {
    pub message: String,
    pub kind: String,
    pub cause: Option<Rc<ErrorObject>>,
    pub stack_trace: Vec<StackFrame>,
}

#[derive(Clone, Debug)]
pub struct StackFrame {
    pub function: String,
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl ErrorObject {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: kind.into(),
            cause: None,
            stack_trace: Vec::new(),
        }
    }

    pub fn with_cause(mut self, cause: Rc<ErrorObject>) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Formats the entire cause chain (§7): `"<Kind>: <message>"`
    /// followed by `"Caused by: ..."` lines.
    pub fn full_message(&self) -> String {
        let mut out = format!("{}: {}", self.kind, self.message);
        let mut cause = self.cause.as_ref();
        while let Some(c) = cause {
            out.push_str(&format!("\nCaused by: {}: {}", c.kind, c.message));
            cause = c.cause.as_ref();
        }
        out
    }
}
