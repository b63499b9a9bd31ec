//! Static analysis (§4.3): a best-effort pass over the parsed AST that
//! reports likely mistakes before the program ever runs. Unlike the
//! evaluator, the analyzer never executes code, so "undefined name" here
//! means "no enclosing lexical scope declares it syntactically" — it
//! cannot see values, only declarations.

use std::collections::HashSet;

use crate::ast::{
    ClassDecl, Expr, ExprKind, FunctionDecl, ImportStmt, Pattern, Program, Stmt, StmtKind,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl Diagnostic {
    fn new(severity: Severity, message: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            severity,
            message: message.into(),
            line,
            col,
        }
    }
}

#[derive(Default)]
struct Scope {
    declared: HashSet<String>,
    used: HashSet<String>,
}

struct Context {
    in_loop: bool,
    in_function: bool,
    in_method: bool,
    has_superclass: bool,
    class_name: Option<String>,
}

pub struct Analyzer {
    scopes: Vec<Scope>,
    diagnostics: Vec<Diagnostic>,
    context: Vec<Context>,
}

/// A fixed set of names every program can assume are in scope without a
/// declaration: the native module names (§4.9) and `this`/`super`,
/// which are handled separately via context flags.
const BUILTIN_NAMES: &[&str] = &[
    "math", "string", "array", "assert", "process", "io", "log", "env", "path", "fs", "time",
    "json", "regex", "http", "ui", "audio", "image", "ipc", "net",
];

impl Analyzer {
    pub fn analyze(program: &Program) -> Vec<Diagnostic> {
        let mut analyzer = Analyzer {
            scopes: vec![Scope::default()],
            diagnostics: Vec::new(),
            context: vec![Context {
                in_loop: false,
                in_function: false,
                in_method: false,
                has_superclass: false,
                class_name: None,
            }],
        };
        analyzer.walk_block(&program.statements);
        analyzer.check_unused(0);
        analyzer.diagnostics
    }

    fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    fn pop_scope(&mut self) {
        let idx = self.scopes.len() - 1;
        self.check_unused(idx);
        self.scopes.pop();
    }

    fn check_unused(&mut self, idx: usize) {
        let scope = &self.scopes[idx];
        for name in &scope.declared {
            if !scope.used.contains(name) && !name.starts_with('_') {
                self.diagnostics.push(Diagnostic::new(
                    Severity::Info,
                    format!("local '{name}' is never used"),
                    0,
                    0,
                ));
            }
        }
    }

    fn declare(&mut self, name: &str, line: u32, col: u32) {
        let scope = self.scopes.last_mut().unwrap();
        if scope.declared.contains(name) {
            self.diagnostics.push(Diagnostic::new(
                Severity::Warning,
                format!("'{name}' shadows an existing declaration in the same scope"),
                line,
                col,
            ));
        }
        scope.declared.insert(name.to_string());
    }

    fn use_name(&mut self, name: &str, line: u32, col: u32) {
        for scope in self.scopes.iter_mut().rev() {
            if scope.declared.contains(name) {
                scope.used.insert(name.to_string());
                return;
            }
        }
        if BUILTIN_NAMES.contains(&name) {
            return;
        }
        self.diagnostics.push(Diagnostic::new(
            Severity::Warning,
            format!("'{name}' is not declared in any enclosing scope"),
            line,
            col,
        ));
    }

    fn ctx(&self) -> &Context {
        self.context.last().unwrap()
    }

    fn walk_block(&mut self, stmts: &[Stmt]) {
        let mut terminated_at = None;
        for (i, stmt) in stmts.iter().enumerate() {
            if terminated_at.is_none() && matches!(stmt.kind, StmtKind::Return(_) | StmtKind::Break | StmtKind::Continue | StmtKind::Throw(_))
            {
                terminated_at = Some(i);
            }
            self.walk_stmt(stmt);
        }
        if let Some(i) = terminated_at {
            if i + 1 < stmts.len() {
                let next = &stmts[i + 1];
                self.diagnostics.push(Diagnostic::new(
                    Severity::Warning,
                    "unreachable code after return/break/continue/throw",
                    next.line,
                    next.col,
                ));
            }
        }
    }

    fn walk_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::VarDecl { pattern, init, .. } => {
                if let Some(e) = init {
                    self.walk_expr(e);
                }
                self.declare_pattern(pattern, stmt.line, stmt.col);
            }
            StmtKind::Expr(e) => self.walk_expr(e),
            StmtKind::Block(stmts) => {
                self.push_scope();
                self.walk_block(stmts);
                self.pop_scope();
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.walk_expr(cond);
                self.walk_stmt(then_branch);
                if let Some(e) = else_branch {
                    self.walk_stmt(e);
                }
            }
            StmtKind::While { cond, body } => {
                self.walk_expr(cond);
                self.context.last_mut().unwrap().in_loop = true;
                self.walk_stmt(body);
                self.context.last_mut().unwrap().in_loop = false;
            }
            StmtKind::Return(expr) => {
                if !self.ctx().in_function {
                    self.diagnostics.push(Diagnostic::new(
                        Severity::Error,
                        "'return' used outside a function",
                        stmt.line,
                        stmt.col,
                    ));
                }
                if let Some(e) = expr {
                    self.walk_expr(e);
                }
            }
            StmtKind::Break => {
                if !self.ctx().in_loop {
                    self.diagnostics.push(Diagnostic::new(
                        Severity::Error,
                        "'break' used outside a loop",
                        stmt.line,
                        stmt.col,
                    ));
                }
            }
            StmtKind::Continue => {
                if !self.ctx().in_loop {
                    self.diagnostics.push(Diagnostic::new(
                        Severity::Error,
                        "'continue' used outside a loop",
                        stmt.line,
                        stmt.col,
                    ));
                }
            }
            StmtKind::FuncDecl(decl) => {
                self.declare(&decl.name, stmt.line, stmt.col);
                self.walk_function(decl, false);
            }
            StmtKind::ClassDecl(decl) => {
                self.declare(&decl.name, stmt.line, stmt.col);
                self.walk_class(decl, stmt.line, stmt.col);
            }
            StmtKind::Import(import) => self.walk_import(import),
            StmtKind::Export(inner) => self.walk_stmt(inner),
            StmtKind::ReExport { .. } => {}
            StmtKind::Try {
                body,
                catch,
                finally,
            } => {
                self.push_scope();
                self.walk_block(body);
                self.pop_scope();
                if let Some((binding, catch_body)) = catch {
                    self.push_scope();
                    if let Some(name) = binding {
                        self.declare(name, stmt.line, stmt.col);
                    }
                    self.walk_block(catch_body);
                    self.pop_scope();
                }
                if let Some(finally_body) = finally {
                    self.push_scope();
                    self.walk_block(finally_body);
                    self.pop_scope();
                }
            }
            StmtKind::Throw(e) => self.walk_expr(e),
        }
    }

    fn declare_pattern(&mut self, pattern: &Pattern, line: u32, col: u32) {
        match pattern {
            Pattern::Wildcard | Pattern::Literal(_) => {}
            Pattern::Variable(name) => self.declare(name, line, col),
            Pattern::Array(patterns) => {
                for p in patterns {
                    self.declare_pattern(p, line, col);
                }
            }
            Pattern::Map(keys) => {
                for key in keys {
                    self.declare(key, line, col);
                }
            }
        }
    }

    fn walk_import(&mut self, import: &ImportStmt) {
        match import {
            ImportStmt::SideEffect { .. } => {}
            ImportStmt::Star { alias, .. } => self.declare(alias, 0, 0),
            ImportStmt::Named { specifiers, .. } => {
                for (name, alias) in specifiers {
                    self.declare(alias.as_deref().unwrap_or(name), 0, 0);
                }
            }
        }
    }

    fn walk_function(&mut self, decl: &FunctionDecl, is_method: bool) {
        self.push_scope();
        self.context.push(Context {
            in_loop: false,
            in_function: true,
            in_method: is_method,
            has_superclass: self.ctx().has_superclass,
            class_name: self.ctx().class_name.clone(),
        });
        for param in &decl.params {
            self.declare(&param.name, 0, 0);
        }
        self.walk_block(&decl.body);
        self.context.pop();
        self.pop_scope();
    }

    fn walk_class(&mut self, decl: &ClassDecl, line: u32, col: u32) {
        let mut seen_methods = HashSet::new();
        for method in &decl.methods {
            if !seen_methods.insert(method.name.clone()) {
                self.diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    format!("class '{}' declares method '{}' more than once", decl.name, method.name),
                    line,
                    col,
                ));
            }
            if method.name == decl.name {
                self.diagnostics.push(Diagnostic::new(
                    Severity::Warning,
                    format!(
                        "method '{}' has the same name as its class; did you mean 'constructor'?",
                        method.name
                    ),
                    line,
                    col,
                ));
            }
        }

        let mut seen_fields = HashSet::new();
        for field in &decl.fields {
            if !seen_fields.insert(field.name.clone()) {
                self.diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    format!("class '{}' declares field '{}' more than once", decl.name, field.name),
                    line,
                    col,
                ));
            }
        }

        self.push_scope();
        self.context.push(Context {
            in_loop: false,
            in_function: false,
            in_method: false,
            has_superclass: decl.superclass.is_some(),
            class_name: Some(decl.name.clone()),
        });
        for field in &decl.fields {
            if let Some(init) = &field.init {
                self.walk_expr(init);
            }
        }
        for method in &decl.methods {
            self.walk_function(method, true);
        }
        self.context.pop();
        self.pop_scope();
    }

    fn walk_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Literal(_) => {}
            ExprKind::Identifier(name) => self.use_name(name, expr.line, expr.col),
            ExprKind::This => {
                if !self.ctx().in_method {
                    self.diagnostics.push(Diagnostic::new(
                        Severity::Error,
                        "'this' used outside a method",
                        expr.line,
                        expr.col,
                    ));
                }
            }
            ExprKind::Super { .. } => {
                if !self.ctx().in_method || !self.ctx().has_superclass {
                    self.diagnostics.push(Diagnostic::new(
                        Severity::Error,
                        "'super' used outside a subclass method",
                        expr.line,
                        expr.col,
                    ));
                }
            }
            ExprKind::Assign { target, value } => {
                self.walk_expr(value);
                self.walk_expr(target);
            }
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                self.walk_expr(cond);
                self.walk_expr(then_branch);
                self.walk_expr(else_branch);
            }
            ExprKind::Nullish { left, right } | ExprKind::Logical { left, right, .. } => {
                self.walk_expr(left);
                self.walk_expr(right);
            }
            ExprKind::Binary { left, right, .. } => {
                self.walk_expr(left);
                self.walk_expr(right);
            }
            ExprKind::Unary { operand, .. } => self.walk_expr(operand),
            ExprKind::Call { callee, args } => {
                self.walk_expr(callee);
                for a in args {
                    self.walk_expr(a);
                }
            }
            ExprKind::Spread(inner) => self.walk_expr(inner),
            ExprKind::Index { object, index } => {
                self.walk_expr(object);
                self.walk_expr(index);
            }
            ExprKind::Property { object, .. } => self.walk_expr(object),
            ExprKind::ArrayLiteral(items) | ExprKind::SetLiteral(items) => {
                for i in items {
                    self.walk_expr(i);
                }
            }
            ExprKind::MapLiteral(entries) => {
                for entry in entries {
                    match entry {
                        crate::ast::MapEntry::Pair(_, v) => self.walk_expr(v),
                        crate::ast::MapEntry::Spread(v) => self.walk_expr(v),
                    }
                }
            }
            ExprKind::Function(lit) => {
                let decl = FunctionDecl {
                    name: lit.name.clone().unwrap_or_default(),
                    params: lit.params.clone(),
                    body: lit.body.clone(),
                    is_async: lit.is_async,
                };
                self.walk_function(&decl, self.ctx().in_method);
            }
            ExprKind::Match(m) => {
                self.walk_expr(&m.scrutinee);
                for arm in &m.arms {
                    self.push_scope();
                    self.declare_pattern(&arm.pattern, expr.line, expr.col);
                    if let Some(guard) = &arm.guard {
                        self.walk_expr(guard);
                    }
                    self.walk_expr(&arm.body);
                    self.pop_scope();
                }
            }
            ExprKind::Print(args) => {
                for a in args {
                    self.walk_expr(a);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn diagnostics_for(source: &str) -> Vec<Diagnostic> {
        let (tokens, _) = tokenize(source);
        let (program, _) = parse(&tokens);
        Analyzer::analyze(&program)
    }

    #[test]
    fn flags_undeclared_identifier() {
        let diags = diagnostics_for("print(undeclared);");
        assert!(diags.iter().any(|d| d.message.contains("undeclared")));
    }

    #[test]
    fn flags_break_outside_loop() {
        let diags = diagnostics_for("break;");
        assert!(diags
            .iter()
            .any(|d| d.severity == Severity::Error && d.message.contains("'break'")));
    }

    #[test]
    fn flags_this_outside_method() {
        let diags = diagnostics_for("print(this);");
        assert!(diags.iter().any(|d| d.message.contains("'this'")));
    }

    #[test]
    fn accepts_well_formed_program() {
        let diags = diagnostics_for("fn add(a, b) { return a + b; } print(add(1, 2));");
        assert!(!diags.iter().any(|d| d.severity == Severity::Error));
    }

    #[test]
    fn flags_duplicate_method() {
        let diags = diagnostics_for("class C { fn m() {} fn m() {} }");
        assert!(diags.iter().any(|d| d.message.contains("more than once")));
    }
}
