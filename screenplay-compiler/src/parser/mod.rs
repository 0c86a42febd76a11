//! # Parser 模块
//!
//! 缩进敏感的剧本语言编译前端（手写匹配器，无 regex 依赖）。
//!
//! ## 架构
//!
//! ```text
//! 原始文本 → [分行] → Vec<SourceLine>
//!          → [预先注入] → [阶段1: 声明提升] → Hoisted
//!          → [阶段2: 主遍历] → token / 诊断 / 元数据 → Program
//! ```
//!
//! ## 设计原则
//!
//! - 行外形由按优先级排列的模式表识别，第一个匹配的条目决定行类型
//! - 声明先于使用被提升，向前跳转与向前引用的变量都能解析
//! - 容错解析：问题记为诊断，只有宿主回调失败才中止
//!
//! ## 模块结构
//!
//! - `lines`: 分行、缩进与行内注释
//! - `helpers`: 标识符与参数切分等辅助函数
//! - `patterns`: 行模式表
//! - `params`: 标题参数列表
//! - `blocks`: front matter 与结构体字段体
//! - `builder`: 声明、解析、求值与收尾
//! - `phase1`: 声明提升
//! - `phase2`: 主遍历

mod blocks;
mod builder;
mod helpers;
mod lines;
mod params;
mod patterns;
mod phase1;
mod phase2;

#[cfg(test)]
mod tests;

use std::time::Instant;

use tracing::debug;

use crate::config::CompilerConfig;
use crate::error::CompileResult;
use crate::program::Program;

use builder::ProgramBuilder;
use lines::split_lines;
use patterns::LineContext;

// 重新导出行级工具供宿主使用
pub use helpers::{is_reserved, is_valid_identifier, RESERVED_WORDS};
pub use lines::{indent_level, strip_inline_comment};

/// 匹配器所需的相邻行信息
fn line_context(lines: &[lines::SourceLine<'_>], index: usize) -> LineContext {
    LineContext {
        prev_blank: index == 0 || lines[index - 1].is_blank(),
        next_blank: lines
            .get(index + 1)
            .is_none_or(lines::SourceLine::is_blank),
    }
}

/// 用给定配置解析一份文档
///
/// 每次调用都从空白状态开始，相同的输入与配置总是得到相同的结果
/// （`parse_duration` 除外）。只有求值器或格式化器返回错误时才会失败。
pub fn parse(text: &str, config: &CompilerConfig) -> CompileResult<Program> {
    let started = Instant::now();
    let lines = split_lines(text);
    debug!(lines = lines.len(), bytes = text.len(), "开始解析");

    let mut builder = ProgramBuilder::new(config, &lines);
    builder.augment();
    let hoisted = phase1::hoist(&mut builder, &lines);
    phase2::run(&mut builder, &lines, &hoisted)?;

    Ok(builder.finish(started.elapsed()))
}

/// 剧本解析器
///
/// 持有配置，可反复解析多份文档。
#[derive(Default)]
pub struct Parser {
    config: CompilerConfig,
}

impl Parser {
    /// 创建新的解析器
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// 解析时使用的配置
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// 解析脚本文本
    pub fn parse(&self, text: &str) -> CompileResult<Program> {
        parse(text, &self.config)
    }
}
