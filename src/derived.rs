//! Derived attributes
//!
//! A derived attribute is defined by an expression over attributes that precede it. The
//! expression is a small tree which is interpreted case by case.
use std::collections::BTreeSet;

use ndarray::ArrayView1;

#[cfg(feature = "serde")]
use serde_crate::{Deserialize, Serialize};

use crate::dataset::{Attribute, Value, FIRST_CODE};

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UnaryOp {
    Neg,
    Sin,
    Cos,
    Tan,
    Log,
    Exp,
    Int,
}

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    fn is_logical(self) -> bool {
        use BinaryOp::*;
        matches!(self, And | Or | Eq | Ne | Gt | Ge | Lt | Le)
    }
}

/// Definition of a derived attribute
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Value of the attribute with this index
    Attribute(usize),
    Number(f64),
    /// Category name, compared against discrete attributes
    Text(String),
    NotApplicable,
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// Intermediate result of an evaluation
#[derive(Clone, Debug, PartialEq)]
enum Operand<'a> {
    Number(f64),
    Truth(bool),
    Text(&'a str),
    NotApplicable,
    Missing,
}

impl<'a> Operand<'a> {
    fn truth(&self) -> Option<bool> {
        match self {
            Operand::Truth(b) => Some(*b),
            Operand::Number(x) => Some(*x != 0.0),
            Operand::Text("t") => Some(true),
            Operand::Text("f") => Some(false),
            _ => None,
        }
    }
}

impl Expr {
    pub fn unary(op: UnaryOp, e: Expr) -> Self {
        Expr::Unary(op, Box::new(e))
    }

    pub fn binary(op: BinaryOp, l: Expr, r: Expr) -> Self {
        Expr::Binary(op, Box::new(l), Box::new(r))
    }

    /// Whether the expression yields true/false rather than a number
    pub fn is_logical(&self) -> bool {
        matches!(self, Expr::Binary(op, _, _) if op.is_logical())
    }

    /// Indices of all attributes the expression refers to
    pub fn attributes_used(&self) -> BTreeSet<usize> {
        let mut used = BTreeSet::new();
        self.collect_attributes(&mut used);
        used
    }

    fn collect_attributes(&self, used: &mut BTreeSet<usize>) {
        match self {
            Expr::Attribute(a) => {
                used.insert(*a);
            }
            Expr::Unary(_, e) => e.collect_attributes(used),
            Expr::Binary(_, l, r) => {
                l.collect_attributes(used);
                r.collect_attributes(used);
            }
            _ => {}
        }
    }

    /// Evaluates the expression for one case
    pub fn evaluate(&self, attributes: &[Attribute], case: ArrayView1<'_, Value>) -> Value {
        match self.operand(attributes, &case) {
            Operand::Number(x) if x.is_finite() => Value::Continuous(x),
            Operand::Number(_) | Operand::Missing => Value::Missing,
            Operand::NotApplicable => Value::NotApplicable,
            other => match other.truth() {
                Some(true) => Value::Discrete(FIRST_CODE),
                Some(false) => Value::Discrete(FIRST_CODE + 1),
                None => Value::Missing,
            },
        }
    }

    fn operand<'a>(&'a self, attributes: &'a [Attribute], case: &ArrayView1<'_, Value>) -> Operand<'a> {
        match self {
            Expr::Attribute(a) => match case[*a] {
                Value::Continuous(x) => Operand::Number(x),
                Value::Discrete(c) => attributes[*a]
                    .value_name(c)
                    .map(Operand::Text)
                    .unwrap_or(Operand::Missing),
                Value::NotApplicable => Operand::NotApplicable,
                Value::Missing => Operand::Missing,
            },
            Expr::Number(x) => Operand::Number(*x),
            Expr::Text(s) => Operand::Text(s),
            Expr::NotApplicable => Operand::NotApplicable,
            Expr::Unary(op, e) => {
                let x = match e.operand(attributes, case) {
                    Operand::Number(x) => x,
                    Operand::NotApplicable => return Operand::NotApplicable,
                    _ => return Operand::Missing,
                };
                match op {
                    UnaryOp::Neg => Operand::Number(-x),
                    UnaryOp::Sin => Operand::Number(x.sin()),
                    UnaryOp::Cos => Operand::Number(x.cos()),
                    UnaryOp::Tan => Operand::Number(x.tan()),
                    UnaryOp::Log if x > 0.0 => Operand::Number(x.ln()),
                    UnaryOp::Log => Operand::Missing,
                    UnaryOp::Exp => Operand::Number(x.exp()),
                    UnaryOp::Int => Operand::Number(x.trunc()),
                }
            }
            Expr::Binary(op, l, r) => {
                let (l, r) = (l.operand(attributes, case), r.operand(attributes, case));
                binary(*op, l, r)
            }
        }
    }
}

fn binary<'a>(op: BinaryOp, l: Operand<'a>, r: Operand<'a>) -> Operand<'a> {
    use BinaryOp::*;

    if l == Operand::NotApplicable || r == Operand::NotApplicable {
        return match op {
            Eq => Operand::Truth(l == r),
            Ne => Operand::Truth(l != r),
            _ => Operand::NotApplicable,
        };
    }
    if l == Operand::Missing || r == Operand::Missing {
        return Operand::Missing;
    }

    match op {
        And | Or => match (l.truth(), r.truth()) {
            (Some(a), Some(b)) => Operand::Truth(if op == And { a && b } else { a || b }),
            _ => Operand::Missing,
        },
        Eq => Operand::Truth(l == r),
        Ne => Operand::Truth(l != r),
        _ => {
            let (x, y) = match (l, r) {
                (Operand::Number(x), Operand::Number(y)) => (x, y),
                _ => return Operand::Missing,
            };
            match op {
                Gt => Operand::Truth(x > y),
                Ge => Operand::Truth(x >= y),
                Lt => Operand::Truth(x < y),
                Le => Operand::Truth(x <= y),
                Add => Operand::Number(x + y),
                Sub => Operand::Number(x - y),
                Mul => Operand::Number(x * y),
                Div | Mod if y == 0.0 => Operand::Missing,
                Div => Operand::Number(x / y),
                Mod => Operand::Number(x % y),
                Pow => Operand::Number(x.powf(y)),
                And | Or | Eq | Ne => unreachable!(),
            }
        }
    }
}
