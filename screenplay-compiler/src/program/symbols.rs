//! # 符号表条目
//!
//! section、变量、结构体与字段。id 都是点分路径字符串：
//! section 为 `.chapter1.sceneA`（根 section 为空串），
//! 变量为 `<所属 section id>.<name>`，字段为相对结构体的 `.stats.hp` / `.0`。

use std::ops::Range;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueType};

/// 声明位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub from: usize,
    pub to: usize,
}

/// section 子类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// 普通 section（无参数列表）
    #[default]
    Section,
    /// `name(params)`
    Method,
    /// `name(params) -> type`
    Function,
    /// `name[triggers]`
    Detector,
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Section => write!(f, "section"),
            Self::Method => write!(f, "method"),
            Self::Function => write!(f, "function"),
            Self::Detector => write!(f, "detector"),
        }
    }
}

/// Section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub name: String,
    /// 嵌套层级（0 为根）
    pub level: usize,
    pub parent: Option<String>,
    /// 子 section id（声明顺序）
    pub children: Vec<String>,
    pub kind: SectionKind,
    pub return_type: Option<String>,
    /// 名称 → 变量 id
    pub variables: IndexMap<String, String>,
    /// 形参变量 id（声明顺序）
    pub parameters: Vec<String>,
    /// detector 的触发变量名
    pub triggers: Vec<String>,
    /// 自身拥有的 token 区间（不含子 section）
    pub tokens: Range<usize>,
    pub location: Option<Location>,
}

impl Section {
    /// 根 section
    pub fn root() -> Self {
        Self::new("", "", 0, None, SectionKind::Section)
    }

    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        level: usize,
        parent: Option<String>,
        kind: SectionKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            level,
            parent,
            children: Vec::new(),
            kind,
            return_type: None,
            variables: IndexMap::new(),
            parameters: Vec::new(),
            triggers: Vec::new(),
            tokens: 0..0,
            location: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.id.is_empty()
    }
}

/// 变量可见性
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    #[default]
    Protected,
}

/// 变量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    pub name: String,
    /// 所属 section id
    pub section: String,
    /// 声明或推断的类型
    pub ty: Option<ValueType>,
    /// 初始化表达式原文
    pub expression: Option<String>,
    /// 求值后的值
    pub value: Option<Value>,
    pub parameter: bool,
    pub visibility: Visibility,
    pub location: Option<Location>,
}

impl Variable {
    pub fn new(section: &str, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: format!("{}.{}", section, name),
            name,
            section: section.to_string(),
            ty: None,
            expression: None,
            value: None,
            parameter: false,
            visibility: Visibility::Protected,
            location: None,
        }
    }

    /// 求值上下文中使用的值：已求值则为真实值，否则按类型给出占位值
    pub fn context_value(&self) -> Value {
        match (&self.value, self.ty) {
            (Some(v), _) => v.clone(),
            (None, Some(ty)) => Value::placeholder(ty),
            (None, None) => Value::Number(0.0),
        }
    }
}

/// 结构体字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// 相对结构体的路径 id，如 `.stats.hp`、`.0`
    pub id: String,
    /// 行内名称文本
    pub name: String,
    /// 值原文（`- a` 这类数组项的原文即名称）
    pub value_text: String,
    /// 求值后的值（容器字段为 None）
    pub value: Option<Value>,
    /// 是否为 `-` 数组项
    pub array_entry: bool,
    /// 是否带有 `name: value` 形式的显式值
    pub explicit: bool,
    pub location: Option<Location>,
}

/// 结构体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Struct {
    pub name: String,
    /// 类型标签（`@type name` 中的 type）
    pub ty: String,
    pub base: Option<String>,
    pub fields: IndexMap<String, Field>,
    pub location: Option<Location>,
}

impl Struct {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            base: None,
            fields: IndexMap::new(),
            location: None,
        }
    }

    /// 叶子字段的 id → 值
    pub fn leaf_values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .values()
            .filter_map(|f| f.value.as_ref().map(|v| (f.id.as_str(), v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_id() {
        assert_eq!(Variable::new("", "hp").id, ".hp");
        assert_eq!(Variable::new(".a.b", "hp").id, ".a.b.hp");
    }

    #[test]
    fn test_context_value_placeholder() {
        let mut v = Variable::new("", "name");
        assert_eq!(v.context_value(), Value::Number(0.0));
        v.ty = Some(ValueType::String);
        assert_eq!(v.context_value(), Value::String(String::new()));
        v.value = Some(Value::String("x".into()));
        assert_eq!(v.context_value(), Value::String("x".into()));
    }
}
