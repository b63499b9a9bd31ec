//! Constant folding and dead-code elimination (§4.4). Optional: callers
//! choose whether to run this before evaluating (§6.3 `--no-optimize`).
//! Every transformation here must be semantics-preserving — see the P2
//! testable property (`tests/properties.rs`) exercising this guarantee.

use crate::ast::{
    BinaryOp, ClassDecl, Expr, ExprKind, FunctionDecl, Literal, Program, Stmt, StmtKind, UnaryOp,
};

pub fn optimize(program: Program) -> Program {
    Program {
        statements: optimize_block(program.statements),
    }
}

fn optimize_block(stmts: Vec<Stmt>) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        let folded = optimize_stmt(stmt);
        out.push(folded);
        // Dead-code-after-return removal (§4.4): statements textually
        // after an unconditional return/break/continue/throw at this
        // nesting level can never execute.
        if matches!(
            out.last().unwrap().kind,
            StmtKind::Return(_) | StmtKind::Break | StmtKind::Continue | StmtKind::Throw(_)
        ) {
            break;
        }
    }
    out
}

fn optimize_stmt(stmt: Stmt) -> Stmt {
    let Stmt { line, col, kind } = stmt;
    let kind = match kind {
        StmtKind::VarDecl {
            pattern,
            type_annotation,
            init,
        } => StmtKind::VarDecl {
            pattern,
            type_annotation,
            init: init.map(optimize_expr),
        },
        StmtKind::Expr(e) => StmtKind::Expr(optimize_expr(e)),
        StmtKind::Block(stmts) => StmtKind::Block(optimize_block(stmts)),
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let cond = optimize_expr(cond);
            // Branch elimination on a literal condition (§4.4): replace
            // `if (true) A else B` with `A`, `if (false) A else B` with
            // `B` (or nothing, if there's no else branch).
            match constant_bool(&cond) {
                Some(true) => return optimize_stmt(*then_branch),
                Some(false) => {
                    return match else_branch {
                        Some(e) => optimize_stmt(*e),
                        None => Stmt::new(line, col, StmtKind::Block(Vec::new())),
                    }
                }
                None => StmtKind::If {
                    cond,
                    then_branch: Box::new(optimize_stmt(*then_branch)),
                    else_branch: else_branch.map(|e| Box::new(optimize_stmt(*e))),
                },
            }
        }
        StmtKind::While { cond, body } => {
            let cond = optimize_expr(cond);
            // `while (false) { ... }` never runs (§4.4); drop it
            // entirely rather than leaving a dead loop in the tree.
            if constant_bool(&cond) == Some(false) {
                return Stmt::new(line, col, StmtKind::Block(Vec::new()));
            }
            StmtKind::While {
                cond,
                body: Box::new(optimize_stmt(*body)),
            }
        }
        StmtKind::Return(e) => StmtKind::Return(e.map(optimize_expr)),
        StmtKind::Break => StmtKind::Break,
        StmtKind::Continue => StmtKind::Continue,
        StmtKind::FuncDecl(decl) => StmtKind::FuncDecl(optimize_function(decl)),
        StmtKind::ClassDecl(decl) => StmtKind::ClassDecl(optimize_class(decl)),
        StmtKind::Import(import) => StmtKind::Import(import),
        StmtKind::Export(inner) => StmtKind::Export(Box::new(optimize_stmt(*inner))),
        StmtKind::ReExport { specifiers, path } => StmtKind::ReExport { specifiers, path },
        StmtKind::Try {
            body,
            catch,
            finally,
        } => StmtKind::Try {
            body: optimize_block(body),
            catch: catch.map(|(name, body)| (name, optimize_block(body))),
            finally: finally.map(optimize_block),
        },
        StmtKind::Throw(e) => StmtKind::Throw(optimize_expr(e)),
    };
    Stmt::new(line, col, kind)
}

fn optimize_function(decl: FunctionDecl) -> FunctionDecl {
    FunctionDecl {
        body: optimize_block(decl.body),
        ..decl
    }
}

fn optimize_class(decl: ClassDecl) -> ClassDecl {
    ClassDecl {
        fields: decl
            .fields
            .into_iter()
            .map(|f| crate::ast::FieldDecl {
                init: f.init.map(optimize_expr),
                ..f
            })
            .collect(),
        methods: decl.methods.into_iter().map(optimize_function).collect(),
        ..decl
    }
}

fn optimize_expr(expr: Expr) -> Expr {
    let Expr { line, col, kind } = expr;
    let kind = match kind {
        ExprKind::Binary { op, left, right } => {
            let left = optimize_expr(*left);
            let right = optimize_expr(*right);
            if let Some(folded) = fold_binary(op, &left, &right) {
                return Expr::new(line, col, folded);
            }
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        ExprKind::Unary { op, operand } => {
            let operand = optimize_expr(*operand);
            if let Some(folded) = fold_unary(op, &operand) {
                return Expr::new(line, col, folded);
            }
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            }
        }
        ExprKind::Logical { op, left, right } => ExprKind::Logical {
            op,
            left: Box::new(optimize_expr(*left)),
            right: Box::new(optimize_expr(*right)),
        },
        ExprKind::Nullish { left, right } => ExprKind::Nullish {
            left: Box::new(optimize_expr(*left)),
            right: Box::new(optimize_expr(*right)),
        },
        ExprKind::Conditional {
            cond,
            then_branch,
            else_branch,
        } => {
            let cond = optimize_expr(*cond);
            match constant_bool(&cond) {
                Some(true) => return optimize_expr(*then_branch),
                Some(false) => return optimize_expr(*else_branch),
                None => ExprKind::Conditional {
                    cond: Box::new(cond),
                    then_branch: Box::new(optimize_expr(*then_branch)),
                    else_branch: Box::new(optimize_expr(*else_branch)),
                },
            }
        }
        ExprKind::Assign { target, value } => ExprKind::Assign {
            target: Box::new(optimize_expr(*target)),
            value: Box::new(optimize_expr(*value)),
        },
        ExprKind::Call { callee, args } => ExprKind::Call {
            callee: Box::new(optimize_expr(*callee)),
            args: args.into_iter().map(optimize_expr).collect(),
        },
        ExprKind::Spread(inner) => ExprKind::Spread(Box::new(optimize_expr(*inner))),
        ExprKind::Index { object, index } => ExprKind::Index {
            object: Box::new(optimize_expr(*object)),
            index: Box::new(optimize_expr(*index)),
        },
        ExprKind::Property { object, name } => ExprKind::Property {
            object: Box::new(optimize_expr(*object)),
            name,
        },
        ExprKind::ArrayLiteral(items) => ExprKind::ArrayLiteral(items.into_iter().map(optimize_expr).collect()),
        ExprKind::SetLiteral(items) => ExprKind::SetLiteral(items.into_iter().map(optimize_expr).collect()),
        ExprKind::MapLiteral(entries) => ExprKind::MapLiteral(
            entries
                .into_iter()
                .map(|entry| match entry {
                    crate::ast::MapEntry::Pair(k, v) => crate::ast::MapEntry::Pair(k, optimize_expr(v)),
                    crate::ast::MapEntry::Spread(v) => crate::ast::MapEntry::Spread(optimize_expr(v)),
                })
                .collect(),
        ),
        ExprKind::Function(lit) => ExprKind::Function(crate::ast::FunctionLiteral {
            body: optimize_block(lit.body),
            ..lit
        }),
        ExprKind::Match(m) => ExprKind::Match(crate::ast::MatchExpr {
            scrutinee: Box::new(optimize_expr(*m.scrutinee)),
            arms: m
                .arms
                .into_iter()
                .map(|arm| crate::ast::MatchArm {
                    guard: arm.guard.map(optimize_expr),
                    body: optimize_expr(arm.body),
                    ..arm
                })
                .collect(),
        }),
        ExprKind::Print(args) => ExprKind::Print(args.into_iter().map(optimize_expr).collect()),
        other @ (ExprKind::Literal(_) | ExprKind::Identifier(_) | ExprKind::This | ExprKind::Super { .. }) => other,
    };
    Expr::new(line, col, kind)
}

fn constant_bool(expr: &Expr) -> Option<bool> {
    match &expr.kind {
        ExprKind::Literal(Literal::Boolean(b)) => Some(*b),
        ExprKind::Literal(Literal::Nil) => Some(false),
        _ => None,
    }
}

fn constant_number(expr: &Expr) -> Option<f64> {
    match &expr.kind {
        ExprKind::Literal(Literal::Number(n)) => Some(*n),
        _ => None,
    }
}

fn constant_string(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Literal(Literal::String(s)) => Some(s),
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, left: &Expr, right: &Expr) -> Option<ExprKind> {
    use BinaryOp::*;
    if let (Some(a), Some(b)) = (constant_number(left), constant_number(right)) {
        let folded = match op {
            Add => Some(a + b),
            Subtract => Some(a - b),
            Multiply => Some(a * b),
            Modulo if b != 0.0 => Some(a % b),
            // Division by a literal zero is left unfolded so the
            // runtime's own `ValueError` still fires (§4.4, §7) instead
            // of the optimizer silently producing `inf`/`nan`.
            Divide if b != 0.0 => Some(a / b),
            Equal => return Some(ExprKind::Literal(Literal::Boolean(a == b))),
            NotEqual => return Some(ExprKind::Literal(Literal::Boolean(a != b))),
            Less => return Some(ExprKind::Literal(Literal::Boolean(a < b))),
            LessEqual => return Some(ExprKind::Literal(Literal::Boolean(a <= b))),
            Greater => return Some(ExprKind::Literal(Literal::Boolean(a > b))),
            GreaterEqual => return Some(ExprKind::Literal(Literal::Boolean(a >= b))),
            _ => None,
        };
        return folded.map(|n| ExprKind::Literal(Literal::Number(n)));
    }
    if op == Add {
        if let (Some(a), Some(b)) = (constant_string(left), constant_string(right)) {
            return Some(ExprKind::Literal(Literal::String(format!("{a}{b}"))));
        }
    }
    None
}

fn fold_unary(op: UnaryOp, operand: &Expr) -> Option<ExprKind> {
    match op {
        UnaryOp::Negate => constant_number(operand).map(|n| ExprKind::Literal(Literal::Number(-n))),
        UnaryOp::Not => constant_bool(operand).map(|b| ExprKind::Literal(Literal::Boolean(!b))),
        UnaryOp::Await => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn optimized(source: &str) -> Program {
        let (tokens, _) = tokenize(source);
        let (program, errors) = parse(&tokens);
        assert!(errors.is_empty(), "{errors:?}");
        optimize(program)
    }

    #[test]
    fn folds_constant_arithmetic() {
        let program = optimized("var x = 1 + 2 * 3;");
        let StmtKind::VarDecl { init: Some(e), .. } = &program.statements[0].kind else {
            panic!("expected var decl")
        };
        assert!(matches!(e.kind, ExprKind::Literal(Literal::Number(n)) if n == 7.0));
    }

    #[test]
    fn eliminates_dead_while_false() {
        let program = optimized("while (false) { print(1); }");
        assert!(matches!(program.statements[0].kind, StmtKind::Block(ref b) if b.is_empty()));
    }

    #[test]
    fn drops_code_after_return() {
        let program = optimized("fn f() { return 1; print(2); }");
        let StmtKind::FuncDecl(decl) = &program.statements[0].kind else {
            panic!("expected fn decl")
        };
        assert_eq!(decl.body.len(), 1);
    }

    #[test]
    fn leaves_division_by_literal_zero_unfolded() {
        let program = optimized("var x = 1 / 0;");
        let StmtKind::VarDecl { init: Some(e), .. } = &program.statements[0].kind else {
            panic!("expected var decl")
        };
        assert!(matches!(e.kind, ExprKind::Binary { op: BinaryOp::Divide, .. }));
    }
}
