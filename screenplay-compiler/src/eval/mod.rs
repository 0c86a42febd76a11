//! # 语义求值适配层
//!
//! 解析器通过两个注入的能力接口检查嵌入的表达式：
//!
//! - [`ExpressionEvaluator`]：字面量 / 标识符表达式（初始化值、条件、调用实参等）
//! - [`StringFormatter`]：字符串插值与动态跳转目标
//!
//! 两者都同步调用，并返回 `(值, 诊断, 引用)`。诊断与引用的偏移都相对于
//! 传入的表达式文本，由解析器换算为文档绝对偏移。
//!
//! 表达式语言本身由宿主定义；本模块同时提供一套内置实现
//! （[`BuiltinEvaluator`] / [`BuiltinFormatter`]），供默认配置与测试使用。

mod expr;
mod expr_parser;
mod format;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::diagnostic::DiagnosticLevel;
use crate::error::HostError;
use crate::value::Value;

pub use expr::{BinaryOp, Expr, ExprKind, UnaryOp, evaluate};
pub use expr_parser::{ExprSyntaxError, parse_expression};
pub use format::BuiltinFormatter;

/// 表达式求值上下文
///
/// 当前 section 可见的所有变量的名称 → 值投影。
/// 回调只能读取它，不能借此修改解析器状态。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalContext {
    /// 发起求值的 section id
    pub section: String,
    /// 可见变量
    pub values: IndexMap<String, Value>,
}

impl EvalContext {
    pub fn new(section: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            values: IndexMap::new(),
        }
    }

    pub fn with_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// 获取变量值
    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// 表达式内的诊断（偏移相对于表达式文本）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprDiagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub from: usize,
    pub to: usize,
}

impl ExprDiagnostic {
    pub fn error(message: impl Into<String>, from: usize, to: usize) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            message: message.into(),
            from,
            to,
        }
    }

    pub fn warn(message: impl Into<String>, from: usize, to: usize) -> Self {
        Self {
            level: DiagnosticLevel::Warn,
            message: message.into(),
            from,
            to,
        }
    }

    /// 整体平移偏移
    pub fn shifted(mut self, by: usize) -> Self {
        self.from += by;
        self.to += by;
        self
    }
}

/// 表达式内引用的名称（偏移相对于表达式文本）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExprReference {
    pub name: String,
    pub from: usize,
    pub to: usize,
}

impl ExprReference {
    pub fn shifted(mut self, by: usize) -> Self {
        self.from += by;
        self.to += by;
        self
    }
}

/// 一次求值的完整结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// 求值结果（表达式无法解析时为 None）
    pub value: Option<Value>,
    pub diagnostics: Vec<ExprDiagnostic>,
    pub references: Vec<ExprReference>,
}

impl Evaluation {
    pub fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }
}

/// 表达式求值器
pub trait ExpressionEvaluator {
    fn evaluate(&self, expr: &str, context: &EvalContext) -> Result<Evaluation, HostError>;
}

/// 字符串格式化器
pub trait StringFormatter {
    fn format(&self, text: &str, context: &EvalContext) -> Result<Evaluation, HostError>;
}

impl<F> ExpressionEvaluator for F
where
    F: Fn(&str, &EvalContext) -> Result<Evaluation, HostError>,
{
    fn evaluate(&self, expr: &str, context: &EvalContext) -> Result<Evaluation, HostError> {
        self(expr, context)
    }
}

impl<F> StringFormatter for F
where
    F: Fn(&str, &EvalContext) -> Result<Evaluation, HostError>,
{
    fn format(&self, text: &str, context: &EvalContext) -> Result<Evaluation, HostError> {
        self(text, context)
    }
}

/// 内置表达式求值器
///
/// 解析失败时返回单条诊断且 `value` 为 None；
/// 未定义的名称仍然产生引用，并以占位值继续求值。
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEvaluator;

impl ExpressionEvaluator for BuiltinEvaluator {
    fn evaluate(&self, expr: &str, context: &EvalContext) -> Result<Evaluation, HostError> {
        let mut evaluation = Evaluation::default();
        match parse_expression(expr) {
            Ok(parsed) => {
                let value = evaluate(
                    &parsed,
                    context,
                    &mut evaluation.diagnostics,
                    &mut evaluation.references,
                );
                evaluation.value = Some(value);
            }
            Err(e) => {
                evaluation
                    .diagnostics
                    .push(ExprDiagnostic::error(e.message, e.from, e.to));
            }
        }
        Ok(evaluation)
    }
}
