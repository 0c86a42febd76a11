//! # Error 模块
//!
//! 定义 screenplay-compiler 中使用的错误类型。
//!
//! 文档本身的问题（语法错误、重复声明等）永远不会成为 `Err`，
//! 它们以 [`Diagnostic`](crate::diagnostic::Diagnostic) 的形式收集到
//! `Program` 中。只有宿主注入的回调失败才会向上传播。

use thiserror::Error;

/// 宿主回调失败
///
/// 求值器或格式化器遇到资源级故障（而非表达式本身有误）时返回此错误。
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct HostError {
    /// 错误描述
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 编译错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    /// 表达式求值器失败
    #[error("第 {line} 行：表达式求值器失败 - {source}")]
    Evaluator {
        line: usize,
        #[source]
        source: HostError,
    },

    /// 字符串格式化器失败
    #[error("第 {line} 行：字符串格式化器失败 - {source}")]
    Formatter {
        line: usize,
        #[source]
        source: HostError,
    },

    /// 编译选项无法反序列化
    #[error("无效的编译选项: {message}")]
    InvalidOptions { message: String },
}

/// Result 类型别名
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_display_includes_line() {
        let err = CompileError::Evaluator {
            line: 12,
            source: HostError::new("连接断开"),
        };
        let text = err.to_string();
        assert!(text.contains("12"));
        assert!(text.contains("连接断开"));
    }
}
