//! Expression trees over tunable parameters.
//!
//! Expressions are built from parameter references, literals and operators,
//! and evaluated against a [`Config`]. They describe launch geometry,
//! template arguments, preprocessor defines and space restrictions.

use std::fmt;

use serde_json::json;

use crate::config::Config;
use crate::error::SpaceError;
use crate::param::{Param, ValueType};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

impl UnaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// A polymorphic expression over parameters and literals.
#[derive(Debug, Clone)]
pub enum Expr {
    Param(Param),
    Literal(Value),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `cond ? a : b`. All three operands are always evaluated.
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
    Cast(ValueType, Box<Expr>),
}

/// Conversion into an expression node; implemented for expressions,
/// parameter handles and literal value types.
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for &Expr {
    fn into_expr(self) -> Expr {
        self.clone()
    }
}

impl IntoExpr for Param {
    fn into_expr(self) -> Expr {
        Expr::Param(self)
    }
}

impl IntoExpr for &Param {
    fn into_expr(self) -> Expr {
        Expr::Param(self.clone())
    }
}

macro_rules! into_expr_literal {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoExpr for $ty {
                fn into_expr(self) -> Expr {
                    Expr::Literal(Value::from(self))
                }
            }
        )*
    };
}

into_expr_literal!(bool, i8, i16, i32, i64, u8, u16, u32, f32, f64, &str, String);

/// A literal expression node.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

/// `ceil(a / b)` as an expression: `(a / b) + (a % b != 0)`.
pub fn div_ceil(a: impl IntoExpr, b: impl IntoExpr) -> Expr {
    let a = a.into_expr();
    let b = b.into_expr();
    (a.clone() / b.clone()) + (a % b).ne_val(0).cast(ValueType::Int)
}

impl Expr {
    pub fn select(cond: impl IntoExpr, a: impl IntoExpr, b: impl IntoExpr) -> Expr {
        Expr::Select(
            Box::new(cond.into_expr()),
            Box::new(a.into_expr()),
            Box::new(b.into_expr()),
        )
    }

    pub fn cast(self, ty: ValueType) -> Expr {
        Expr::Cast(ty, Box::new(self))
    }

    pub fn lt(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn le(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn gt(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn ge(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Ge, rhs)
    }

    pub fn eq_val(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn ne_val(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn and(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::And, rhs)
    }

    pub fn or(self, rhs: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Or, rhs)
    }

    fn binary(self, op: BinaryOp, rhs: impl IntoExpr) -> Expr {
        Expr::Binary(op, Box::new(self), Box::new(rhs.into_expr()))
    }

    /// Evaluate against a configuration. Evaluation is pure; every operand
    /// is evaluated exactly once.
    pub fn eval(&self, config: &Config) -> Result<Value, SpaceError> {
        match self {
            Expr::Param(param) => config
                .get(param)
                .cloned()
                .ok_or_else(|| SpaceError::MissingParam(param.name().to_owned())),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Unary(op, inner) => eval_unary(*op, inner.eval(config)?),
            Expr::Binary(op, left, right) => {
                eval_binary(*op, left.eval(config)?, right.eval(config)?)
            }
            Expr::Select(cond, a, b) => {
                let cond = cond.eval(config)?;
                let a = a.eval(config)?;
                let b = b.eval(config)?;
                Ok(if cond.to::<bool>()? { a } else { b })
            }
            Expr::Cast(ty, inner) => Ok(inner.eval(config)?.cast_to(*ty)?),
        }
    }

    /// The canonical JSON form used to persist restrictions.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Expr::Param(param) => json!({
                "operator": "param",
                "operands": [param.name()],
            }),
            Expr::Literal(value) => value.to_json(),
            Expr::Unary(op, inner) => json!({
                "operator": op.symbol(),
                "operands": [inner.to_json()],
            }),
            Expr::Binary(op, left, right) => json!({
                "operator": op.symbol(),
                "operands": [left.to_json(), right.to_json()],
            }),
            Expr::Select(cond, a, b) => json!({
                "operator": "if",
                "operands": [cond.to_json(), a.to_json(), b.to_json()],
            }),
            Expr::Cast(ty, inner) => json!({
                "operator": "cast",
                "operands": [ty.name(), inner.to_json()],
            }),
        }
    }
}

enum Num {
    Int(i64),
    Double(f64),
}

fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Double(d) => Some(Num::Double(*d)),
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        _ => None,
    }
}

fn numeric_pair(op: BinaryOp, left: &Value, right: &Value) -> Result<(Num, Num), SpaceError> {
    match (as_num(left), as_num(right)) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(SpaceError::Unsupported(format!(
            "operator `{}` on values `{left}` and `{right}`",
            op.symbol()
        ))),
    }
}

fn eval_unary(op: UnaryOp, value: Value) -> Result<Value, SpaceError> {
    match op {
        UnaryOp::Neg => match value {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(SpaceError::Overflow),
            Value::Double(d) => Ok(Value::Double(-d)),
            other => Err(SpaceError::Unsupported(format!("operator `-` on `{other}`"))),
        },
        UnaryOp::Not => Ok(Value::Bool(!value.to::<bool>()?)),
        UnaryOp::BitNot => match value {
            Value::Int(i) => Ok(Value::Int(!i)),
            other => Err(SpaceError::Unsupported(format!("operator `~` on `{other}`"))),
        },
    }
}

fn eval_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, SpaceError> {
    use BinaryOp::*;

    match op {
        Add | Sub | Mul | Div | Rem => {
            let (l, r) = numeric_pair(op, &left, &right)?;
            match (l, r) {
                (Num::Int(a), Num::Int(b)) => int_arith(op, a, b),
                (l, r) => {
                    let a = num_to_f64(l);
                    let b = num_to_f64(r);
                    let result = match op {
                        Add => a + b,
                        Sub => a - b,
                        Mul => a * b,
                        Div => a / b,
                        Rem => a % b,
                        _ => unreachable!(),
                    };
                    Ok(Value::Double(result))
                }
            }
        }
        BitAnd | BitOr | BitXor => match (&left, &right) {
            (Value::Bool(a), Value::Bool(b)) => {
                let result = match op {
                    BitAnd => a & b,
                    BitOr => a | b,
                    BitXor => a ^ b,
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
            _ => {
                let a = left.to::<i64>()?;
                let b = right.to::<i64>()?;
                let result = match op {
                    BitAnd => a & b,
                    BitOr => a | b,
                    BitXor => a ^ b,
                    _ => unreachable!(),
                };
                Ok(Value::Int(result))
            }
        },
        Eq => Ok(Value::Bool(values_equal(&left, &right))),
        Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        Lt | Gt | Le | Ge => {
            let ordering = compare_values(op, &left, &right)?;
            let result = match op {
                Lt => ordering.is_lt(),
                Gt => ordering.is_gt(),
                Le => ordering.is_le(),
                Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        And => Ok(Value::Bool(left.to::<bool>()? && right.to::<bool>()?)),
        Or => Ok(Value::Bool(left.to::<bool>()? || right.to::<bool>()?)),
    }
}

fn int_arith(op: BinaryOp, a: i64, b: i64) -> Result<Value, SpaceError> {
    use BinaryOp::*;
    let result = match op {
        Add => a.checked_add(b),
        Sub => a.checked_sub(b),
        Mul => a.checked_mul(b),
        Div if b == 0 => return Err(SpaceError::DivideByZero),
        Div => a.checked_div(b),
        Rem if b == 0 => return Err(SpaceError::DivideByZero),
        Rem => a.checked_rem(b),
        _ => unreachable!(),
    };
    result.map(Value::Int).ok_or(SpaceError::Overflow)
}

fn num_to_f64(num: Num) -> f64 {
    match num {
        Num::Int(i) => i as f64,
        Num::Double(d) => d,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    // mixed numeric operands compare numerically
    match (as_num(left), as_num(right)) {
        (Some(l), Some(r)) => num_to_f64(l) == num_to_f64(r),
        _ => left == right,
    }
}

fn compare_values(
    op: BinaryOp,
    left: &Value,
    right: &Value,
) -> Result<std::cmp::Ordering, SpaceError> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        _ => {
            let (l, r) = numeric_pair(op, left, right)?;
            Ok(num_to_f64(l).total_cmp(&num_to_f64(r)))
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Param(param) => write!(f, "${}", param.name()),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Unary(op, inner) => write!(f, "({}{inner})", op.symbol()),
            Expr::Binary(op, left, right) => write!(f, "({left}{}{right})", op.symbol()),
            Expr::Select(cond, a, b) => write!(f, "({cond} ? {a} : {b})"),
            Expr::Cast(_, inner) => write!(f, "{inner}"),
        }
    }
}

macro_rules! expr_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: IntoExpr> std::ops::$trait<R> for Expr {
            type Output = Expr;

            fn $method(self, rhs: R) -> Expr {
                Expr::Binary($op, Box::new(self), Box::new(rhs.into_expr()))
            }
        }

        impl<R: IntoExpr> std::ops::$trait<R> for &Param {
            type Output = Expr;

            fn $method(self, rhs: R) -> Expr {
                Expr::Binary($op, Box::new(self.expr()), Box::new(rhs.into_expr()))
            }
        }
    };
}

expr_binary_op!(Add, add, BinaryOp::Add);
expr_binary_op!(Sub, sub, BinaryOp::Sub);
expr_binary_op!(Mul, mul, BinaryOp::Mul);
expr_binary_op!(Div, div, BinaryOp::Div);
expr_binary_op!(Rem, rem, BinaryOp::Rem);
expr_binary_op!(BitAnd, bitand, BinaryOp::BitAnd);
expr_binary_op!(BitOr, bitor, BinaryOp::BitOr);
expr_binary_op!(BitXor, bitxor, BinaryOp::BitXor);

impl std::ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Unary(UnaryOp::Neg, Box::new(self))
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Unary(UnaryOp::Not, Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::ConfigSpace;

    fn fixture() -> (ConfigSpace, Param, Param, Config) {
        let mut space = ConfigSpace::new();
        let foo = space.tune("foo", vec![1, 2, 3]).unwrap();
        let bar = space.tune("bar", vec![4, 8]).unwrap();
        let config = space.default_config().unwrap();
        (space, foo, bar, config)
    }

    #[test]
    fn arithmetic_and_rendering() {
        let (_space, foo, bar, config) = fixture();

        let expr = foo.expr() + lit(2) * bar.expr();
        assert_eq!(expr.to_string(), "($foo+(2*$bar))");
        assert_eq!(expr.eval(&config).unwrap(), Value::from(9));

        let expr = (&bar / &foo).eq_val(4);
        assert_eq!(expr.eval(&config).unwrap(), Value::from(true));
    }

    #[test]
    fn division_by_zero_errors() {
        let (_space, foo, _bar, config) = fixture();

        let div = foo.expr() / lit(0);
        assert!(matches!(div.eval(&config), Err(SpaceError::DivideByZero)));

        let rem = foo.expr() % lit(0);
        assert!(matches!(rem.eval(&config), Err(SpaceError::DivideByZero)));
    }

    #[test]
    fn mixed_numeric_comparison_promotes() {
        let (_space, foo, _bar, config) = fixture();

        assert_eq!(
            foo.expr().lt(1.5).eval(&config).unwrap(),
            Value::from(true)
        );
        assert_eq!(
            foo.expr().eq_val(1.0).eval(&config).unwrap(),
            Value::from(true)
        );
    }

    #[test]
    fn select_evaluates_all_operands() {
        let (_space, foo, bar, config) = fixture();

        let expr = Expr::select(foo.expr().le(&bar), foo.expr(), bar.expr());
        assert_eq!(expr.eval(&config).unwrap(), Value::from(1));

        // a division by zero in the untaken branch still surfaces
        let expr = Expr::select(lit(true), foo.expr(), lit(1) / lit(0));
        assert!(matches!(expr.eval(&config), Err(SpaceError::DivideByZero)));
    }

    #[test]
    fn missing_parameter_is_reported() {
        let (_space, foo, _bar, _config) = fixture();

        let empty = Config::new();
        assert!(matches!(
            foo.expr().eval(&empty),
            Err(SpaceError::MissingParam(name)) if name == "foo"
        ));
    }

    #[test]
    fn div_ceil_rounds_up() {
        let (_space, _foo, bar, config) = fixture();

        let expr = div_ceil(bar.expr(), lit(3));
        assert_eq!(expr.eval(&config).unwrap(), Value::from(2));

        let expr = div_ceil(lit(8), lit(4));
        assert_eq!(expr.eval(&config).unwrap(), Value::from(2));
    }

    #[test]
    fn json_form() {
        let (_space, foo, bar, _config) = fixture();

        let expr = foo.expr().le(&bar);
        assert_eq!(
            expr.to_json(),
            serde_json::json!({
                "operator": "<=",
                "operands": [
                    {"operator": "param", "operands": ["foo"]},
                    {"operator": "param", "operands": ["bar"]},
                ],
            })
        );
        assert_eq!(lit(4).to_json(), serde_json::json!(4));
    }

    #[test]
    fn casts_delegate_to_safe_narrowing() {
        let (_space, foo, _bar, config) = fixture();

        let as_string = foo.expr().cast(ValueType::Str);
        assert_eq!(as_string.eval(&config).unwrap(), Value::from("1"));

        let as_double = foo.expr().cast(ValueType::Double);
        assert_eq!(as_double.eval(&config).unwrap(), Value::from(1.0));
    }
}
