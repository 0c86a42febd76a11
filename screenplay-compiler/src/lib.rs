//! # Screenplay Compiler
//!
//! 缩进敏感的剧本 / 互动小说语言的编译前端。
//!
//! ## 架构概述
//!
//! `screenplay-compiler` 只做静态分析，不执行剧本。宿主通过
//! [`CompilerConfig`] 注入表达式求值器、字符串格式化器与行扩展，
//! 编译器一次性返回完整的 [`Program`]：
//!
//! ```text
//! Host                               Compiler
//!   │                                   │
//!   │──── text + CompilerConfig ──────►│
//!   │                                   │ parse()
//!   │◄─── Program (tokens / 符号表 / 诊断 / 元数据) ──│
//!   │                                   │
//! ```
//!
//! ## 核心类型
//!
//! - [`Program`]：一次解析的不可变结果
//! - [`Token`]：扁平 token 流中的元素
//! - [`Diagnostic`]：带位置与快速修复的诊断
//! - [`CompilerConfig`]：选项与宿主回调
//!
//! ## 使用示例
//!
//! ```ignore
//! use screenplay_compiler::{CompilerConfig, parse};
//!
//! let program = parse(script_text, &CompilerConfig::default())?;
//! for diagnostic in &program.diagnostics {
//!     println!("{}: {}", diagnostic.line, diagnostic.message);
//! }
//! ```
//!
//! ## 模块结构
//!
//! - [`config`]：编译选项与宿主回调
//! - [`diagnostic`]：诊断与快速修复
//! - [`error`]：错误类型定义
//! - [`eval`]：求值回调接口与内置实现
//! - [`parser`]：模式表与两遍遍历
//! - [`program`]：解析结果、token 与符号表
//! - [`value`]：剧本中的值

pub mod config;
pub mod diagnostic;
pub mod error;
pub mod eval;
pub mod parser;
pub mod program;
pub mod value;

// 重导出核心类型
pub use config::{
    AugmentedStruct, AugmentedVariable, Augmentations, CompilerConfig, CompilerOptions,
    ExtensionLine, ExtensionMatch, LineExtension,
};
pub use diagnostic::{Diagnostic, DiagnosticLevel, DiagnosticResult, FixAction, QuickFix};
pub use error::{CompileError, CompileResult, HostError};
pub use eval::{
    BuiltinEvaluator, BuiltinFormatter, EvalContext, Evaluation, ExprDiagnostic, ExprReference,
    ExpressionEvaluator, StringFormatter,
};
pub use parser::{Parser, parse};
pub use program::{
    CallTarget, DialoguePosition, LineScope, OutlineKind, OutlineNode, Program, Section,
    SectionKind, Struct, Token, TokenKind, TokenTag, Variable, Visibility,
};
pub use value::{Value, ValueType};
