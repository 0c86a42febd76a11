//! # 表达式模块
//!
//! 内置表达式语言的 AST 与静态求值器。
//!
//! ## 设计原则
//!
//! - 表达式是**无副作用**的纯函数
//! - 求值**永不失败**：类型错误和未定义名称记为诊断，并以占位值继续，
//!   这样同一表达式中的其余问题也能被报告
//! - 两侧操作数都会被求值（不短路），以便收集全部引用

use crate::value::Value;

use super::{EvalContext, ExprDiagnostic, ExprReference};

/// 一元运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// 二元运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// 表达式节点
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// 字面量值
    Literal(Value),
    /// 名称引用
    Identifier(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// 带区间的表达式
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub from: usize,
    pub to: usize,
}

impl Expr {
    pub fn literal(value: Value, from: usize, to: usize) -> Self {
        Self {
            kind: ExprKind::Literal(value),
            from,
            to,
        }
    }

    pub fn unary(op: UnaryOp, from: usize, operand: Expr) -> Self {
        let to = operand.to;
        Self {
            kind: ExprKind::Unary(op, Box::new(operand)),
            from,
            to,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        let (from, to) = (left.from, right.to);
        Self {
            kind: ExprKind::Binary(op, Box::new(left), Box::new(right)),
            from,
            to,
        }
    }
}

/// 对表达式求值
///
/// 诊断与引用追加到调用方提供的列表中。
pub fn evaluate(
    expr: &Expr,
    ctx: &EvalContext,
    diagnostics: &mut Vec<ExprDiagnostic>,
    references: &mut Vec<ExprReference>,
) -> Value {
    match &expr.kind {
        ExprKind::Literal(value) => value.clone(),

        ExprKind::Identifier(name) => {
            references.push(ExprReference {
                name: name.clone(),
                from: expr.from,
                to: expr.to,
            });
            match ctx.get_var(name) {
                Some(value) => value.clone(),
                None => {
                    diagnostics.push(ExprDiagnostic::error(
                        format!("未定义的名称 '{}'", name),
                        expr.from,
                        expr.to,
                    ));
                    Value::Number(0.0)
                }
            }
        }

        ExprKind::Unary(UnaryOp::Not, inner) => {
            let value = evaluate(inner, ctx, diagnostics, references);
            Value::Boolean(!value.is_truthy())
        }

        ExprKind::Unary(UnaryOp::Neg, inner) => {
            match evaluate(inner, ctx, diagnostics, references) {
                Value::Number(n) => Value::Number(-n),
                other => {
                    diagnostics.push(type_mismatch("number", &other, inner));
                    Value::Number(0.0)
                }
            }
        }

        ExprKind::Binary(op, left, right) => {
            let l = evaluate(left, ctx, diagnostics, references);
            let r = evaluate(right, ctx, diagnostics, references);
            binary(*op, l, r, left, right, diagnostics)
        }
    }
}

fn binary(
    op: BinaryOp,
    l: Value,
    r: Value,
    left: &Expr,
    right: &Expr,
    diagnostics: &mut Vec<ExprDiagnostic>,
) -> Value {
    match op {
        BinaryOp::Or => Value::Boolean(l.is_truthy() || r.is_truthy()),
        BinaryOp::And => Value::Boolean(l.is_truthy() && r.is_truthy()),
        BinaryOp::Eq => Value::Boolean(values_equal(&l, &r)),
        BinaryOp::NotEq => Value::Boolean(!values_equal(&l, &r)),

        BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
            let ordering = match (&l, &r) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => {
                    diagnostics.push(ExprDiagnostic::error(
                        format!(
                            "无法比较 {} 与 {}",
                            l.value_type(),
                            r.value_type()
                        ),
                        left.from,
                        right.to,
                    ));
                    None
                }
            };
            let result = ordering.is_some_and(|o| match op {
                BinaryOp::Less => o.is_lt(),
                BinaryOp::LessEq => o.is_le(),
                BinaryOp::Greater => o.is_gt(),
                _ => o.is_ge(),
            });
            Value::Boolean(result)
        }

        BinaryOp::Add => match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            // 任意一侧是字符串时做拼接
            (Value::String(_), _) | (_, Value::String(_)) => Value::String(format!("{}{}", l, r)),
            _ => {
                let culprit = if matches!(l, Value::Number(_)) { right } else { left };
                let actual = if matches!(l, Value::Number(_)) { &r } else { &l };
                diagnostics.push(type_mismatch("number", actual, culprit));
                Value::Number(0.0)
            }
        },

        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let a = expect_number(&l, left, diagnostics);
            let b = expect_number(&r, right, diagnostics);
            match (a, b) {
                (Some(a), Some(b)) => {
                    if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0.0 {
                        diagnostics.push(ExprDiagnostic::warn("除以零", right.from, right.to));
                        return Value::Number(0.0);
                    }
                    Value::Number(match op {
                        BinaryOp::Sub => a - b,
                        BinaryOp::Mul => a * b,
                        BinaryOp::Div => a / b,
                        _ => a % b,
                    })
                }
                _ => Value::Number(0.0),
            }
        }
    }
}

fn expect_number(value: &Value, expr: &Expr, diagnostics: &mut Vec<ExprDiagnostic>) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        other => {
            diagnostics.push(type_mismatch("number", other, expr));
            None
        }
    }
}

fn type_mismatch(expected: &str, actual: &Value, expr: &Expr) -> ExprDiagnostic {
    ExprDiagnostic::error(
        format!("类型不匹配: 期望 {}，实际 {}", expected, actual.value_type()),
        expr.from,
        expr.to,
    )
}

/// 判断两个值是否相等
///
/// 不同类型的值永远不相等
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => (a - b).abs() < f64::EPSILON,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::parse_expression;

    fn eval(text: &str, ctx: &EvalContext) -> (Value, Vec<ExprDiagnostic>, Vec<ExprReference>) {
        let expr = parse_expression(text).unwrap();
        let mut diagnostics = Vec::new();
        let mut references = Vec::new();
        let value = evaluate(&expr, ctx, &mut diagnostics, &mut references);
        (value, diagnostics, references)
    }

    #[test]
    fn test_arithmetic() {
        let ctx = EvalContext::default();
        assert_eq!(eval("1 + 2 * 3", &ctx).0, Value::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3", &ctx).0, Value::Number(9.0));
        assert_eq!(eval("7 % 4", &ctx).0, Value::Number(3.0));
        assert_eq!(eval("-(2)", &ctx).0, Value::Number(-2.0));
    }

    #[test]
    fn test_string_concatenation() {
        let ctx = EvalContext::default().with_var("name", Value::String("Amy".into()));
        assert_eq!(eval("\"hi \" + name", &ctx).0, Value::String("hi Amy".into()));
        assert_eq!(eval("\"n\" + 1", &ctx).0, Value::String("n1".into()));
    }

    #[test]
    fn test_comparison() {
        let ctx = EvalContext::default().with_var("hp", Value::Number(5.0));
        assert_eq!(eval("hp >= 5", &ctx).0, Value::Boolean(true));
        assert_eq!(eval("hp < 5", &ctx).0, Value::Boolean(false));
        assert_eq!(eval("hp == 5 and not false", &ctx).0, Value::Boolean(true));
    }

    #[test]
    fn test_equality_across_types_is_false() {
        let ctx = EvalContext::default();
        assert_eq!(eval("1 == \"1\"", &ctx).0, Value::Boolean(false));
        assert_eq!(eval("1 != \"1\"", &ctx).0, Value::Boolean(true));
    }

    #[test]
    fn test_undefined_name_placeholder() {
        let ctx = EvalContext::default();
        let (value, diagnostics, references) = eval("missing + 1", &ctx);
        assert_eq!(value, Value::Number(1.0));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!((diagnostics[0].from, diagnostics[0].to), (0, 7));
        // 未定义的名称仍然产生引用
        assert_eq!(references.len(), 1);
    }

    #[test]
    fn test_type_mismatch_reported_on_operand() {
        let ctx = EvalContext::default();
        let (_, diagnostics, _) = eval("true - 1", &ctx);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!((diagnostics[0].from, diagnostics[0].to), (0, 4));

        let (_, diagnostics, _) = eval("1 < \"a\"", &ctx);
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_division_by_zero_warns() {
        let ctx = EvalContext::default();
        let (value, diagnostics, _) = eval("4 / 0", &ctx);
        assert_eq!(value, Value::Number(0.0));
        assert_eq!(diagnostics[0].level, crate::diagnostic::DiagnosticLevel::Warn);
    }

    #[test]
    fn test_no_short_circuit_collects_all_references() {
        let ctx = EvalContext::default()
            .with_var("a", Value::Boolean(false))
            .with_var("b", Value::Boolean(true));
        let (value, diagnostics, references) = eval("a and b", &ctx);
        assert_eq!(value, Value::Boolean(false));
        assert!(diagnostics.is_empty());
        assert_eq!(references.len(), 2);
    }
}
