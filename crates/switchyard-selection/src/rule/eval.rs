//! Bounded, side-effect-free evaluator
//!
//! Values are `serde_json::Value`. Paths into the match context are
//! evaluated by reference, so naming `spec` never copies it. Every visited
//! node costs one step, and operations that walk or copy a value pay for its
//! size, so a rule cannot spend more than the budget regardless of its shape
//! or the size of the deployment it reads.

use std::borrow::Cow;

use serde_json::{Number, Value};
use switchyard_common::MatchContext;

use super::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::EvalError;

pub(crate) struct Evaluator<'a> {
    ctx: &'a MatchContext,
    steps: u32,
    limit: u32,
}

type EvalResult<'e> = Result<Cow<'e, Value>, EvalError>;

/// Weight of one string byte relative to a node
const STRING_BYTES_PER_STEP: usize = 64;

impl<'a> Evaluator<'a> {
    pub(crate) fn new(ctx: &'a MatchContext, limit: u32) -> Self {
        Self {
            ctx,
            steps: 0,
            limit,
        }
    }

    fn charge(&mut self, cost: usize) -> Result<(), EvalError> {
        let cost = u32::try_from(cost).unwrap_or(u32::MAX);
        self.steps = self.steps.saturating_add(cost);
        if self.steps > self.limit {
            return Err(EvalError::BudgetExceeded { limit: self.limit });
        }
        Ok(())
    }

    /// Charge for walking all of `v`. Counting stops as soon as the
    /// remaining budget is spent.
    fn charge_walk(&mut self, v: &Value) -> Result<(), EvalError> {
        let remaining = self.limit.saturating_sub(self.steps) as usize;
        let cost = weight(v, remaining.saturating_add(1));
        self.charge(cost)
    }

    /// Take ownership of a result, paying for the copy when it is borrowed
    fn own(&mut self, v: Cow<'_, Value>) -> Result<Value, EvalError> {
        match v {
            Cow::Owned(v) => Ok(v),
            Cow::Borrowed(v) => {
                self.charge_walk(v)?;
                Ok(v.clone())
            }
        }
    }

    pub(crate) fn eval<'e>(&mut self, expr: &'e Expr) -> EvalResult<'e>
    where
        'a: 'e,
    {
        self.charge(1)?;
        match expr {
            Expr::Literal(v) => Ok(Cow::Borrowed(v)),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let v = self.eval(item)?;
                    values.push(self.own(v)?);
                }
                Ok(Cow::Owned(Value::Array(values)))
            }
            Expr::Var(name) => self
                .ctx
                .variable(name)
                .map(Cow::Borrowed)
                .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
            Expr::Member(base, field) => {
                let base = self.eval(base)?;
                member(base, field)
            }
            Expr::Index(base, idx) => {
                let base = self.eval(base)?;
                let idx = self.eval(idx)?;
                index(base, &idx)
            }
            Expr::Call(name, args) => self.call(name, args),
            Expr::Method(target, name, args) => self.method(target, name, args),
            Expr::Unary(op, operand) => {
                let v = self.eval(operand)?;
                unary(*op, &v).map(Cow::Owned)
            }
            Expr::Binary(BinaryOp::And, l, r) => {
                if !self.eval_bool(l, "&&")? {
                    return Ok(Cow::Owned(Value::Bool(false)));
                }
                Ok(Cow::Owned(Value::Bool(self.eval_bool(r, "&&")?)))
            }
            Expr::Binary(BinaryOp::Or, l, r) => {
                if self.eval_bool(l, "||")? {
                    return Ok(Cow::Owned(Value::Bool(true)));
                }
                Ok(Cow::Owned(Value::Bool(self.eval_bool(r, "||")?)))
            }
            Expr::Binary(op, l, r) => {
                let l = self.eval(l)?;
                let r = self.eval(r)?;
                self.binary(*op, &l, &r).map(Cow::Owned)
            }
            Expr::Ternary(cond, then, otherwise) => {
                if self.eval_bool(cond, "?:")? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn eval_bool(&mut self, expr: &Expr, op: &str) -> Result<bool, EvalError> {
        match self.eval(expr)?.as_ref() {
            Value::Bool(b) => Ok(*b),
            other => Err(EvalError::Type(format!(
                "operand of '{op}' must be bool, got {}",
                type_name(other)
            ))),
        }
    }

    fn call<'e>(&mut self, name: &str, args: &'e [Expr]) -> EvalResult<'e>
    where
        'a: 'e,
    {
        match (name, args) {
            ("has", [arg]) => self.has(arg).map(|b| Cow::Owned(Value::Bool(b))),
            ("size", [arg]) => {
                let v = self.eval(arg)?;
                size(&v).map(|n| Cow::Owned(Value::from(n)))
            }
            ("has" | "size", _) => Err(EvalError::Call(format!(
                "{name}() takes exactly 1 argument, got {}",
                args.len()
            ))),
            _ => Err(EvalError::Call(format!("unknown function '{name}'"))),
        }
    }

    /// `has(path)` is true when every segment of `path` resolves.
    ///
    /// Only missing keys yield `false`; a path that is not a field selection
    /// is a call error.
    fn has(&mut self, arg: &Expr) -> Result<bool, EvalError> {
        let (base, key) = match arg {
            Expr::Member(base, field) => (base.as_ref(), Value::String(field.clone())),
            Expr::Index(base, idx) => {
                let idx = self.eval(idx)?;
                (base.as_ref(), idx.into_owned())
            }
            _ => {
                return Err(EvalError::Call(
                    "has() requires a field selection such as has(spec.provider.name)".to_string(),
                ))
            }
        };
        if matches!(base, Expr::Member(..) | Expr::Index(..)) && !self.has(base)? {
            return Ok(false);
        }
        let parent = self.eval(base)?;
        Ok(match (parent.as_ref(), &key) {
            (Value::Object(map), Value::String(k)) => map.get(k).is_some_and(|v| !v.is_null()),
            (Value::Array(items), Value::Number(n)) => n
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .is_some_and(|i| i < items.len()),
            _ => false,
        })
    }

    fn method<'e>(&mut self, target: &'e Expr, name: &str, args: &'e [Expr]) -> EvalResult<'e>
    where
        'a: 'e,
    {
        let recv = self.eval(target)?;
        let args = args
            .iter()
            .map(|a| self.eval(a))
            .collect::<Result<Vec<_>, _>>()?;
        let args: Vec<&Value> = args.iter().map(|a| &**a).collect();

        let result = match (name, recv.as_ref(), args.as_slice()) {
            ("lower", Value::String(s), []) => {
                self.charge(s.len() / STRING_BYTES_PER_STEP)?;
                Value::String(s.to_lowercase())
            }
            ("contains", Value::String(s), [Value::String(needle)]) => {
                self.charge(s.len() / STRING_BYTES_PER_STEP)?;
                Value::Bool(s.contains(needle.as_str()))
            }
            ("contains", Value::Array(items), [needle]) => {
                self.charge(items.len())?;
                if is_compound(needle) {
                    self.charge_walk(recv.as_ref())?;
                }
                Value::Bool(items.iter().any(|v| values_equal(v, needle)))
            }
            ("startsWith", Value::String(s), [Value::String(prefix)]) => {
                self.charge(prefix.len() / STRING_BYTES_PER_STEP)?;
                Value::Bool(s.starts_with(prefix.as_str()))
            }
            ("endsWith", Value::String(s), [Value::String(suffix)]) => {
                self.charge(suffix.len() / STRING_BYTES_PER_STEP)?;
                Value::Bool(s.ends_with(suffix.as_str()))
            }
            ("lower" | "contains" | "startsWith" | "endsWith", recv, _) => {
                return Err(EvalError::Type(format!(
                    "cannot call {name}() on {} with {} argument(s)",
                    type_name(recv),
                    args.len()
                )))
            }
            _ => return Err(EvalError::Call(format!("unknown method '{name}'"))),
        };
        Ok(Cow::Owned(result))
    }

    fn binary(&mut self, op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
        match op {
            BinaryOp::Eq | BinaryOp::Ne => {
                self.charge_compare(l, r)?;
                let equal = values_equal(l, r);
                Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                self.charge_compare(l, r)?;
                let ord = compare(l, r)?;
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ord.is_lt(),
                    BinaryOp::Le => ord.is_le(),
                    BinaryOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                }))
            }
            BinaryOp::In => match r {
                Value::Array(items) => {
                    self.charge(items.len())?;
                    if is_compound(l) {
                        self.charge_walk(r)?;
                    }
                    Ok(Value::Bool(items.iter().any(|v| values_equal(v, l))))
                }
                Value::Object(map) => match l {
                    Value::String(k) => Ok(Value::Bool(map.contains_key(k))),
                    other => Err(EvalError::Type(format!(
                        "map keys are strings, got {}",
                        type_name(other)
                    ))),
                },
                other => Err(EvalError::Type(format!(
                    "right side of 'in' must be a list or map, got {}",
                    type_name(other)
                ))),
            },
            BinaryOp::Add => match (l, r) {
                (Value::String(a), Value::String(b)) => {
                    self.charge((a.len() + b.len()) / STRING_BYTES_PER_STEP)?;
                    Ok(Value::String(format!("{a}{b}")))
                }
                (Value::Array(a), Value::Array(b)) => {
                    self.charge_walk(l)?;
                    self.charge_walk(r)?;
                    Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
                }
                _ => arithmetic(op, l, r),
            },
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                arithmetic(op, l, r)
            }
            BinaryOp::And | BinaryOp::Or => Err(EvalError::Type(
                "logical operator evaluated eagerly".to_string(),
            )),
        }
    }

    /// Comparing two lists, maps or strings walks the smaller one
    fn charge_compare(&mut self, l: &Value, r: &Value) -> Result<(), EvalError> {
        match (l, r) {
            (Value::String(a), Value::String(b)) => {
                self.charge(a.len().min(b.len()) / STRING_BYTES_PER_STEP)
            }
            (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
                let remaining = self.limit.saturating_sub(self.steps) as usize;
                let cap = remaining.saturating_add(1);
                self.charge(weight(l, cap).min(weight(r, cap)))
            }
            _ => Ok(()),
        }
    }
}

fn is_compound(v: &Value) -> bool {
    matches!(v, Value::Array(_) | Value::Object(_))
}

/// Nodes in `v`, with long strings counting extra, stopping at `cap`
fn weight(v: &Value, cap: usize) -> usize {
    let mut total = 0usize;
    let mut pending = vec![v];
    while let Some(v) = pending.pop() {
        total += 1;
        match v {
            Value::String(s) => total += s.len() / STRING_BYTES_PER_STEP,
            Value::Array(items) => pending.extend(items.iter()),
            Value::Object(map) => pending.extend(map.values()),
            _ => {}
        }
        if total >= cap {
            return cap;
        }
    }
    total
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

pub(crate) fn describe(v: &Value) -> String {
    type_name(v).to_string()
}

fn member<'e>(base: Cow<'e, Value>, field: &str) -> EvalResult<'e> {
    let missing = || EvalError::NoSuchKey(field.to_string());
    match base {
        Cow::Borrowed(Value::Object(map)) => map.get(field).map(Cow::Borrowed).ok_or_else(missing),
        Cow::Owned(Value::Object(mut map)) => map.remove(field).map(Cow::Owned).ok_or_else(missing),
        other => Err(EvalError::Type(format!(
            "cannot select field '{field}' from {}",
            type_name(&other)
        ))),
    }
}

fn index<'e>(base: Cow<'e, Value>, idx: &Value) -> EvalResult<'e> {
    match idx {
        Value::String(k) if base.is_object() => member(base, k),
        Value::Number(n) if base.is_array() => {
            let i = n
                .as_i64()
                .ok_or_else(|| EvalError::Type("list index must be an integer".to_string()))?;
            let missing = || EvalError::NoSuchKey(format!("[{i}]"));
            let pos = usize::try_from(i).map_err(|_| missing())?;
            match base {
                Cow::Borrowed(Value::Array(items)) => {
                    items.get(pos).map(Cow::Borrowed).ok_or_else(missing)
                }
                Cow::Owned(Value::Array(items)) => items
                    .into_iter()
                    .nth(pos)
                    .map(Cow::Owned)
                    .ok_or_else(missing),
                _ => Err(missing()),
            }
        }
        i => Err(EvalError::Type(format!(
            "cannot index {} with {}",
            type_name(&base),
            type_name(i)
        ))),
    }
}

fn size(v: &Value) -> Result<i64, EvalError> {
    let n = match v {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => {
            return Err(EvalError::Type(format!(
                "size() of {} is undefined",
                type_name(other)
            )))
        }
    };
    i64::try_from(n).map_err(|_| EvalError::Arithmetic("size overflows int".to_string()))
}

fn unary(op: UnaryOp, v: &Value) -> Result<Value, EvalError> {
    match (op, v) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i.checked_neg()
                    .map(Value::from)
                    .ok_or_else(|| EvalError::Arithmetic("integer overflow".to_string()))
            } else {
                float_value(-n.as_f64().unwrap_or(f64::NAN))
            }
        }
        (UnaryOp::Not, other) => Err(EvalError::Type(format!(
            "'!' needs a bool, got {}",
            type_name(other)
        ))),
        (UnaryOp::Neg, other) => Err(EvalError::Type(format!(
            "'-' needs a number, got {}",
            type_name(other)
        ))),
    }
}

/// Equality with numeric comparison across int and double
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, EvalError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return Ok(x.cmp(&y));
            }
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y)
                .ok_or_else(|| EvalError::Arithmetic("comparison with NaN".to_string()))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(EvalError::Type(format!(
            "cannot order {} and {}",
            type_name(a),
            type_name(b)
        ))),
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    let (Value::Number(x), Value::Number(y)) = (l, r) else {
        return Err(EvalError::Type(format!(
            "arithmetic needs numbers, got {} and {}",
            type_name(l),
            type_name(r)
        )));
    };

    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                return Err(EvalError::Arithmetic("division by zero".to_string()))
            }
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Rem => a.checked_rem(b),
            _ => None,
        };
        return result
            .map(Value::from)
            .ok_or_else(|| EvalError::Arithmetic("integer overflow".to_string()));
    }

    let (a, b) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => {
            return Err(EvalError::Arithmetic("division by zero".to_string()))
        }
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => f64::NAN,
    };
    float_value(result)
}

fn float_value(f: f64) -> Result<Value, EvalError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| EvalError::Arithmetic("result is not a finite number".to_string()))
}
