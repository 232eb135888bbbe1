//! Syntax tree for compiled rules

use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Var(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Method(Box<Expr>, String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Dotted field paths rooted at a variable (`spec.engine.type`), for
    /// static checks against a match context. Index segments with string
    /// literal keys are included; other indexing ends the path.
    pub(crate) fn field_paths(&self, out: &mut Vec<String>) {
        if let Some(path) = self.as_path() {
            out.push(path);
            return;
        }
        match self {
            Expr::Literal(_) | Expr::Var(_) => {}
            Expr::List(items) => items.iter().for_each(|e| e.field_paths(out)),
            Expr::Member(base, _) => base.field_paths(out),
            Expr::Index(base, idx) => {
                base.field_paths(out);
                idx.field_paths(out);
            }
            // has() exists precisely to probe optional fields
            Expr::Call(name, _) if name == "has" => {}
            Expr::Call(_, args) => args.iter().for_each(|e| e.field_paths(out)),
            Expr::Method(target, _, args) => {
                target.field_paths(out);
                args.iter().for_each(|e| e.field_paths(out));
            }
            Expr::Unary(_, e) => e.field_paths(out),
            Expr::Binary(_, l, r) => {
                l.field_paths(out);
                r.field_paths(out);
            }
            Expr::Ternary(c, a, b) => {
                c.field_paths(out);
                a.field_paths(out);
                b.field_paths(out);
            }
        }
    }

    fn as_path(&self) -> Option<String> {
        match self {
            Expr::Member(base, field) => match base.as_ref() {
                Expr::Var(root) => Some(format!("{root}.{field}")),
                other => other.as_path().map(|p| format!("{p}.{field}")),
            },
            Expr::Index(base, idx) => match idx.as_ref() {
                Expr::Literal(Value::String(key)) => {
                    base.as_path().map(|p| format!("{p}.{key}"))
                }
                _ => None,
            },
            _ => None,
        }
    }
}
