//! # 诊断模块
//!
//! 带源码位置的诊断条目，以及可选的快速修复动作。
//!
//! ## 设计原则
//!
//! - 诊断分级：Error（必须修复）、Warn（建议修复）、Info（信息提示）
//! - 所有位置都是文档绝对字节偏移，外加 0 起始的行号与列范围
//! - 编译永不因文档问题失败，问题全部以诊断形式返回

use serde::{Deserialize, Serialize};

/// 诊断级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    /// 信息提示
    Info,
    /// 警告（建议修复）
    #[serde(rename = "warning")]
    Warn,
    /// 错误（必须修复）
    Error,
}

impl std::fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// 快速修复的具体动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixAction {
    /// 将光标移到另一处位置（例如原始声明）
    Focus { line: usize, from: usize, to: usize },
    /// 用 `insert` 替换 `from..to` 的文本
    Edit {
        from: usize,
        to: usize,
        insert: String,
    },
}

/// 快速修复
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickFix {
    /// 显示给用户的标题
    pub title: String,
    pub action: FixAction,
}

impl QuickFix {
    pub fn focus(title: impl Into<String>, line: usize, from: usize, to: usize) -> Self {
        Self {
            title: title.into(),
            action: FixAction::Focus { line, from, to },
        }
    }

    pub fn edit(title: impl Into<String>, from: usize, to: usize, insert: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            action: FixAction::Edit {
                from,
                to,
                insert: insert.into(),
            },
        }
    }
}

/// 诊断条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// 诊断级别
    pub level: DiagnosticLevel,
    /// 诊断消息
    pub message: String,
    /// 行号（从 0 开始，已加上配置的行号偏移）
    pub line: usize,
    /// 绝对起始偏移
    pub from: usize,
    /// 绝对结束偏移
    pub to: usize,
    /// 行内起始列
    pub column_from: usize,
    /// 行内结束列
    pub column_to: usize,
    /// 快速修复
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<QuickFix>,
}

impl Diagnostic {
    fn with_level(level: DiagnosticLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            line: 0,
            from: 0,
            to: 0,
            column_from: 0,
            column_to: 0,
            actions: Vec::new(),
        }
    }

    /// 创建错误诊断
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_level(DiagnosticLevel::Error, message)
    }

    /// 创建警告诊断
    pub fn warn(message: impl Into<String>) -> Self {
        Self::with_level(DiagnosticLevel::Warn, message)
    }

    /// 创建信息诊断
    pub fn info(message: impl Into<String>) -> Self {
        Self::with_level(DiagnosticLevel::Info, message)
    }

    /// 设置位置
    ///
    /// `line_start` 是该行在文档中的绝对起始偏移，用于计算列。
    pub fn with_span(mut self, line: usize, line_start: usize, from: usize, to: usize) -> Self {
        self.line = line;
        self.from = from;
        self.to = to.max(from);
        self.column_from = from.saturating_sub(line_start);
        self.column_to = self.to.saturating_sub(line_start);
        self
    }

    /// 添加快速修复
    pub fn with_action(mut self, action: QuickFix) -> Self {
        self.actions.push(action);
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}:{}: {}",
            self.level,
            self.line + 1,
            self.column_from + 1,
            self.message
        )
    }
}

/// 诊断结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    /// 诊断条目列表
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticResult {
    /// 创建空结果
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加诊断
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// 合并另一个结果
    pub fn merge(&mut self, other: DiagnosticResult) {
        self.diagnostics.extend(other.diagnostics);
    }

    /// 获取错误数量
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .count()
    }

    /// 获取警告数量
    pub fn warn_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warn)
            .count()
    }

    /// 是否有错误
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// 按级别过滤
    pub fn filter_by_level(&self, min_level: DiagnosticLevel) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level >= min_level)
            .collect()
    }

    /// 指定行上最严重的级别
    pub fn worst_in_lines(&self, first: usize, last: usize) -> Option<DiagnosticLevel> {
        self.diagnostics
            .iter()
            .filter(|d| d.line >= first && d.line <= last)
            .map(|d| d.level)
            .max()
    }
}

impl From<DiagnosticResult> for Vec<Diagnostic> {
    fn from(result: DiagnosticResult) -> Self {
        result.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::error("未定义的跳转目标").with_span(9, 100, 104, 110);

        let display = format!("{}", diag);
        assert!(display.contains("[ERROR]"));
        assert!(display.contains("10:5"));
        assert!(display.contains("未定义的跳转目标"));
    }

    #[test]
    fn test_with_span_computes_columns() {
        let diag = Diagnostic::warn("x").with_span(3, 40, 42, 45);
        assert_eq!(diag.line, 3);
        assert_eq!((diag.column_from, diag.column_to), (2, 5));
    }

    #[test]
    fn test_with_span_never_inverts() {
        let diag = Diagnostic::info("x").with_span(0, 0, 5, 2);
        assert_eq!((diag.from, diag.to), (5, 5));
    }

    #[test]
    fn test_diagnostic_result_filter() {
        let mut result = DiagnosticResult::new();
        result.push(Diagnostic::error("错误1"));
        result.push(Diagnostic::warn("警告1"));
        result.push(Diagnostic::info("信息1"));

        let errors = result.filter_by_level(DiagnosticLevel::Error);
        assert_eq!(errors.len(), 1);

        let warns_and_errors = result.filter_by_level(DiagnosticLevel::Warn);
        assert_eq!(warns_and_errors.len(), 2);

        let all = result.filter_by_level(DiagnosticLevel::Info);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_worst_in_lines() {
        let mut result = DiagnosticResult::new();
        result.push(Diagnostic::info("a").with_span(1, 0, 0, 0));
        result.push(Diagnostic::error("b").with_span(5, 0, 0, 0));
        assert_eq!(result.worst_in_lines(0, 2), Some(DiagnosticLevel::Info));
        assert_eq!(result.worst_in_lines(0, 9), Some(DiagnosticLevel::Error));
        assert_eq!(result.worst_in_lines(6, 9), None);
    }

    #[test]
    fn test_level_serializes_as_warning() {
        let json = serde_json::to_string(&DiagnosticLevel::Warn).unwrap();
        assert_eq!(json, "\"warning\"");
    }
}
