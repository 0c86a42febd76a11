//! # 表达式解析器
//!
//! 递归下降表达式解析器，支持标识符、字面量、算术、比较和逻辑运算。
//! 每个节点都携带相对于输入文本的字节区间。

use super::expr::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::value::Value;

/// 表达式语法错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprSyntaxError {
    pub message: String,
    pub from: usize,
    pub to: usize,
}

/// 解析表达式字符串
///
/// 支持的语法:
/// - 字面量: `"string"`, `'string'`, `12`, `1.5`, `true`, `false`
/// - 标识符: `name`, `stats.hp`
/// - 算术: `+ - * / %`，一元 `-`
/// - 比较: `== != < <= > >=`
/// - 逻辑: `expr and expr`, `expr or expr`, `not expr`
/// - 括号: `(expr)`
pub fn parse_expression(input: &str) -> Result<Expr, ExprSyntaxError> {
    if input.trim().is_empty() {
        return Err(ExprSyntaxError {
            message: "空表达式".to_string(),
            from: 0,
            to: input.len(),
        });
    }

    let mut parser = ExprParser::new(input);
    let expr = parser.parse_or()?;
    parser.skip_whitespace();
    if !parser.remaining().is_empty() {
        return Err(ExprSyntaxError {
            message: format!("表达式末尾存在无法解析的内容: '{}'", parser.remaining()),
            from: parser.pos,
            to: input.len(),
        });
    }
    Ok(expr)
}

/// 表达式解析器
struct ExprParser<'a> {
    input: &'a str,
    pos: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl<'a> ExprParser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &str {
        &self.input[self.pos..]
    }

    fn error(&self, message: impl Into<String>, from: usize, to: usize) -> ExprSyntaxError {
        ExprSyntaxError {
            message: message.into(),
            from,
            to,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn starts_with_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        if remaining.len() >= keyword.len()
            && remaining.is_char_boundary(keyword.len())
            && remaining[..keyword.len()].eq_ignore_ascii_case(keyword)
        {
            // 确保后面不是标识符字符
            !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(is_ident_char)
        } else {
            false
        }
    }

    fn consume_keyword(&mut self, keyword: &str) {
        self.pos += keyword.len();
        self.skip_whitespace();
    }

    /// 尝试消费一个运算符
    fn consume_operator(&mut self, candidates: &[(&str, BinaryOp)]) -> Option<BinaryOp> {
        self.skip_whitespace();
        for (text, op) in candidates {
            if self.remaining().starts_with(text) {
                self.pos += text.len();
                return Some(*op);
            }
        }
        None
    }

    /// 解析 or 表达式（最低优先级）
    fn parse_or(&mut self) -> Result<Expr, ExprSyntaxError> {
        let mut left = self.parse_and()?;

        loop {
            self.skip_whitespace();
            if self.starts_with_keyword("or") {
                self.consume_keyword("or");
                let right = self.parse_and()?;
                left = Expr::binary(BinaryOp::Or, left, right);
            } else {
                break;
            }
        }

        Ok(left)
    }

    /// 解析 and 表达式
    fn parse_and(&mut self) -> Result<Expr, ExprSyntaxError> {
        let mut left = self.parse_not()?;

        loop {
            self.skip_whitespace();
            if self.starts_with_keyword("and") {
                self.consume_keyword("and");
                let right = self.parse_not()?;
                left = Expr::binary(BinaryOp::And, left, right);
            } else {
                break;
            }
        }

        Ok(left)
    }

    /// 解析 not 表达式
    fn parse_not(&mut self) -> Result<Expr, ExprSyntaxError> {
        self.skip_whitespace();
        if self.starts_with_keyword("not") {
            let start = self.pos;
            self.consume_keyword("not");
            let expr = self.parse_not()?;
            Ok(Expr::unary(UnaryOp::Not, start, expr))
        } else {
            self.parse_comparison()
        }
    }

    /// 解析比较表达式
    fn parse_comparison(&mut self) -> Result<Expr, ExprSyntaxError> {
        let left = self.parse_additive()?;

        // 两字符运算符必须排在前面
        let op = self.consume_operator(&[
            ("==", BinaryOp::Eq),
            ("!=", BinaryOp::NotEq),
            ("<=", BinaryOp::LessEq),
            (">=", BinaryOp::GreaterEq),
            ("<", BinaryOp::Less),
            (">", BinaryOp::Greater),
        ]);

        match op {
            Some(op) => {
                let right = self.parse_additive()?;
                Ok(Expr::binary(op, left, right))
            }
            None => Ok(left),
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprSyntaxError> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self.consume_operator(&[("+", BinaryOp::Add), ("-", BinaryOp::Sub)]) {
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprSyntaxError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.consume_operator(&[
            ("*", BinaryOp::Mul),
            ("/", BinaryOp::Div),
            ("%", BinaryOp::Mod),
        ]) {
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprSyntaxError> {
        self.skip_whitespace();
        if self.peek_char() == Some('-') {
            let start = self.pos;
            self.consume_char();
            // 负数字面量直接折叠
            if self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.pos = start;
                return self.parse_number();
            }
            let expr = self.parse_unary()?;
            return Ok(Expr::unary(UnaryOp::Neg, start, expr));
        }
        self.parse_primary()
    }

    /// 解析基本表达式
    fn parse_primary(&mut self) -> Result<Expr, ExprSyntaxError> {
        self.skip_whitespace();

        let start = self.pos;
        let c = self
            .peek_char()
            .ok_or_else(|| self.error("表达式意外结束", start, start))?;

        match c {
            // 括号
            '(' => {
                self.consume_char();
                let inner = self.parse_or()?;
                self.skip_whitespace();
                if self.peek_char() != Some(')') {
                    return Err(self.error("缺少右括号 ')'", start, start + 1));
                }
                self.consume_char();
                Ok(Expr {
                    kind: inner.kind,
                    from: start,
                    to: self.pos,
                })
            }

            // 字符串字面量
            '"' | '\'' => {
                let s = self.parse_string_literal(c)?;
                Ok(Expr::literal(Value::String(s), start, self.pos))
            }

            c if c.is_ascii_digit() => self.parse_number(),

            // 布尔字面量或标识符
            c if is_ident_char(c) => {
                if self.starts_with_keyword("true") {
                    self.pos += 4;
                    return Ok(Expr::literal(Value::Boolean(true), start, self.pos));
                }
                if self.starts_with_keyword("false") {
                    self.pos += 5;
                    return Ok(Expr::literal(Value::Boolean(false), start, self.pos));
                }
                let name = self.parse_identifier()?;
                Ok(Expr {
                    kind: ExprKind::Identifier(name),
                    from: start,
                    to: self.pos,
                })
            }

            _ => Err(self.error(
                format!("无法解析表达式，意外字符: '{}'", c),
                start,
                start + c.len_utf8(),
            )),
        }
    }

    /// 解析标识符（允许以 `.` 连接的路径）
    fn parse_identifier(&mut self) -> Result<String, ExprSyntaxError> {
        let start = self.pos;

        while let Some(c) = self.peek_char() {
            if is_ident_char(c) {
                self.pos += c.len_utf8();
            } else if c == '.'
                && self.remaining()[1..]
                    .chars()
                    .next()
                    .is_some_and(is_ident_char)
            {
                self.pos += 1;
            } else {
                break;
            }
        }

        if self.pos == start {
            return Err(self.error("期望标识符", start, start));
        }

        Ok(self.input[start..self.pos].to_string())
    }

    /// 解析字符串字面量
    fn parse_string_literal(&mut self, quote: char) -> Result<String, ExprSyntaxError> {
        let start = self.pos;
        self.consume_char(); // 消费开始引号
        let content_start = self.pos;

        while let Some(c) = self.peek_char() {
            if c == quote {
                let s = self.input[content_start..self.pos].to_string();
                self.consume_char(); // 消费结束引号
                return Ok(s);
            }
            self.pos += c.len_utf8();
        }

        Err(self.error(
            format!("字符串字面量未闭合，缺少 '{}'", quote),
            start,
            self.input.len(),
        ))
    }

    /// 解析数字
    fn parse_number(&mut self) -> Result<Expr, ExprSyntaxError> {
        let start = self.pos;

        if self.peek_char() == Some('-') {
            self.consume_char();
        }

        let mut seen_dot = false;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                self.pos += 1;
            } else {
                break;
            }
        }

        let num_str = &self.input[start..self.pos];
        num_str
            .parse::<f64>()
            .map(|n| Expr::literal(Value::Number(n), start, self.pos))
            .map_err(|_| self.error(format!("无法解析数字: '{}'", num_str), start, self.pos))
    }
}
