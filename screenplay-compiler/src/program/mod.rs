//! # Program 模块
//!
//! 一次解析的完整结果：token 流、三张符号表、诊断、front matter 与元数据。
//! 返回后即不可变，不与其他解析调用共享任何状态。

mod outline;
mod paths;
mod symbols;
mod token;

use std::collections::BTreeMap;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::diagnostic::Diagnostic;
use crate::value::Value;

pub use outline::{OutlineKind, OutlineNode};
pub use paths::{PathId, ScopePaths};
pub use symbols::{Field, Location, Section, SectionKind, Struct, Variable, Visibility};
pub use token::{
    ArgumentBinding, CallTarget, ChoiceOperator, ConditionCheck, DialoguePosition, Token,
    TokenKind, TokenTag,
};

pub(crate) use outline::OutlineBuilder;

/// front matter 条目的显示位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontMatterPosition {
    /// 居中（标题页主体）
    Cc,
    /// 左下
    Bl,
    /// 右下
    Br,
    /// 左上
    Tl,
    /// 右上
    Tr,
    /// 不显示
    Hidden,
}

impl FrontMatterPosition {
    /// 根据键名决定显示位置（大小写不敏感）
    pub fn for_key(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().as_str() {
            "title" | "credit" | "author" | "authors" | "source" => Self::Cc,
            "contact" | "address" | "notes" => Self::Bl,
            "draft date" | "date" | "revision" | "copyright" => Self::Br,
            "header" => Self::Tl,
            "footer" => Self::Tr,
            _ => Self::Hidden,
        }
    }
}

/// front matter 条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontMatterEntry {
    pub key: String,
    pub value: String,
    pub line: usize,
}

/// 行所处的块
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineScope {
    #[default]
    Body,
    FrontMatter,
    Struct,
    Dialogue,
    Choice,
}

/// 引用目标的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclarationKind {
    Section,
    Variable,
    Struct,
}

/// 行内的一处名称引用（"跳转到定义"）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    /// 绝对起始偏移
    pub from: usize,
    pub to: usize,
    /// 解析到的声明（未解析为 None）
    pub kind: Option<DeclarationKind>,
    pub id: Option<String>,
    pub location: Option<Location>,
}

/// 每行的索引信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineInfo {
    /// 所属 section id
    pub section: String,
    pub indent: usize,
    pub scope: LineScope,
    /// 行字节长度（不含换行符）
    pub length: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
}

/// 场景登记
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneInfo {
    pub name: String,
    pub number: Option<String>,
    pub line: usize,
    pub section: String,
    /// 场景内出现的角色（首次出现顺序）
    pub characters: Vec<String>,
}

/// 角色登记
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterInfo {
    pub name: String,
    /// 角色提示行
    pub lines: Vec<usize>,
    pub dialogue_count: usize,
}

/// 字符串值中的颜色字面量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorLiteral {
    pub color: String,
    pub line: usize,
    pub from: usize,
    pub to: usize,
}

/// 类型 → 结构体名 → 字段 id → 值
pub type ObjectMap = IndexMap<String, IndexMap<String, IndexMap<String, Value>>>;

/// 元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// 每行一条（下标为文档内行号，不含行号偏移）
    pub lines: Vec<LineInfo>,
    /// 大纲（`structure[0]` 为文档根节点）
    pub structure: Vec<OutlineNode>,
    pub scenes: Vec<SceneInfo>,
    pub characters: IndexMap<String, CharacterInfo>,
    pub colors: Vec<ColorLiteral>,
    pub parse_duration: Duration,
    pub objects: ObjectMap,
}

/// 解析结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub tokens: Vec<Token>,
    pub sections: IndexMap<String, Section>,
    pub variables: IndexMap<String, Variable>,
    pub structs: IndexMap<String, Struct>,
    pub diagnostics: Vec<Diagnostic>,
    pub front_matter: BTreeMap<FrontMatterPosition, Vec<FrontMatterEntry>>,
    pub metadata: Metadata,
    /// 行号偏移（来自编译选项）
    pub line_offset: usize,
}

impl Program {
    /// 是否有错误级诊断
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.level == crate::diagnostic::DiagnosticLevel::Error)
    }

    /// 行所属的 section
    pub fn section_at_line(&self, line: usize) -> Option<&Section> {
        let info = self.line_info(line)?;
        self.sections.get(&info.section)
    }

    /// 包含该行的最内层大纲节点
    pub fn outline_node_at_line(&self, line: usize) -> Option<&OutlineNode> {
        let mut current = self.metadata.structure.first()?;
        if !current.contains(line) {
            return None;
        }
        while let Some(child) = current
            .children
            .iter()
            .map(|&i| &self.metadata.structure[i])
            .find(|c| c.contains(line))
        {
            current = child;
        }
        Some(current)
    }

    /// 位于该行的 token
    pub fn tokens_on_line(&self, line: usize) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(move |t| t.line == line)
    }

    /// 行索引信息（参数为含偏移的行号）
    pub fn line_info(&self, line: usize) -> Option<&LineInfo> {
        let index = line.checked_sub(self.line_offset)?;
        self.metadata.lines.get(index)
    }

    /// 序列化为 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_matter_position() {
        assert_eq!(FrontMatterPosition::for_key("Title"), FrontMatterPosition::Cc);
        assert_eq!(FrontMatterPosition::for_key("Draft date"), FrontMatterPosition::Br);
        assert_eq!(FrontMatterPosition::for_key("contact"), FrontMatterPosition::Bl);
        assert_eq!(FrontMatterPosition::for_key("header"), FrontMatterPosition::Tl);
        assert_eq!(FrontMatterPosition::for_key("footer"), FrontMatterPosition::Tr);
        assert_eq!(FrontMatterPosition::for_key("language"), FrontMatterPosition::Hidden);
    }

    #[test]
    fn test_line_info_respects_offset() {
        let program = Program {
            line_offset: 10,
            metadata: Metadata {
                lines: vec![LineInfo {
                    section: ".a".into(),
                    ..LineInfo::default()
                }],
                ..Metadata::default()
            },
            ..Program::default()
        };
        assert_eq!(program.line_info(10).map(|l| l.section.as_str()), Some(".a"));
        assert!(program.line_info(3).is_none());
        assert!(program.line_info(11).is_none());
    }
}
