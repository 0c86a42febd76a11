//! # 内置字符串格式化器
//!
//! 处理 `{expr}` 插值：花括号内的文本交给表达式求值器，
//! 结果以显示形式拼回字符串。`\{` 与 `\}` 输出字面量花括号。

use crate::error::HostError;
use crate::value::Value;

use super::{BuiltinEvaluator, EvalContext, Evaluation, ExprDiagnostic, ExpressionEvaluator, StringFormatter};

/// 内置字符串格式化器
pub struct BuiltinFormatter {
    evaluator: Box<dyn ExpressionEvaluator>,
}

impl BuiltinFormatter {
    pub fn new() -> Self {
        Self {
            evaluator: Box::new(BuiltinEvaluator),
        }
    }

    /// 使用自定义求值器计算插值片段
    pub fn with_evaluator(evaluator: impl ExpressionEvaluator + 'static) -> Self {
        Self {
            evaluator: Box::new(evaluator),
        }
    }
}

impl Default for BuiltinFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl StringFormatter for BuiltinFormatter {
    fn format(&self, text: &str, context: &EvalContext) -> Result<Evaluation, HostError> {
        let mut out = String::with_capacity(text.len());
        let mut result = Evaluation::default();
        let mut chars = text.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.peek() {
                    Some(&(_, next @ ('{' | '}'))) => {
                        out.push(next);
                        chars.next();
                    }
                    _ => out.push('\\'),
                },
                '{' => {
                    let Some(close) = find_closing_brace(text, i) else {
                        result.diagnostics.push(ExprDiagnostic::warn(
                            "插值缺少右花括号 '}'",
                            i,
                            text.len(),
                        ));
                        out.push_str(&text[i..]);
                        break;
                    };
                    let inner = &text[i + 1..close];
                    let evaluation = self.evaluator.evaluate(inner, context)?;
                    let shift = i + 1;
                    result.diagnostics.extend(
                        evaluation
                            .diagnostics
                            .into_iter()
                            .map(|d| d.shifted(shift)),
                    );
                    result
                        .references
                        .extend(evaluation.references.into_iter().map(|r| r.shifted(shift)));
                    if let Some(value) = evaluation.value {
                        out.push_str(&value.to_string());
                    }
                    // 跳过插值内容
                    while chars.peek().is_some_and(|&(j, _)| j <= close) {
                        chars.next();
                    }
                }
                _ => out.push(c),
            }
        }

        result.value = Some(Value::String(out));
        Ok(result)
    }
}

/// 查找与 `open` 处 `{` 匹配的 `}`，跳过字符串字面量
fn find_closing_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in text[open..].char_indices() {
        let i = open + i;
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticLevel;

    fn format(text: &str, ctx: &EvalContext) -> Evaluation {
        BuiltinFormatter::new().format(text, ctx).unwrap()
    }

    #[test]
    fn test_plain_text_passes_through() {
        let result = format("Hello there.", &EvalContext::default());
        assert_eq!(result.value, Some(Value::String("Hello there.".into())));
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_interpolation() {
        let ctx = EvalContext::default().with_var("gold", Value::Number(12.0));
        let result = format("You have {gold} coins.", &ctx);
        assert_eq!(
            result.value,
            Some(Value::String("You have 12 coins.".into()))
        );
        // 引用偏移相对于整段文本
        assert_eq!((result.references[0].from, result.references[0].to), (10, 14));
    }

    #[test]
    fn test_escaped_braces() {
        let result = format(r"a \{b\} c", &EvalContext::default());
        assert_eq!(result.value, Some(Value::String("a {b} c".into())));
    }

    #[test]
    fn test_diagnostics_are_shifted() {
        let result = format("x {missing}", &EvalContext::default());
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!((result.diagnostics[0].from, result.diagnostics[0].to), (3, 10));
    }

    #[test]
    fn test_unclosed_interpolation_warns() {
        let result = format("x {oops", &EvalContext::default());
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].level, DiagnosticLevel::Warn);
        assert_eq!(result.value, Some(Value::String("x {oops".into())));
    }
}
