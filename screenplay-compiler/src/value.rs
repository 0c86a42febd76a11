//! # Value 模块
//!
//! 脚本中可被求值的值类型。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 求值结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// 布尔值
    Boolean(bool),
    /// 数字（整数与浮点统一为 f64）
    Number(f64),
    /// 字符串
    String(String),
}

/// 值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Boolean,
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Number(_) => ValueType::Number,
            Self::Boolean(_) => ValueType::Boolean,
        }
    }

    /// 某类型的占位值
    ///
    /// 变量已被提升但尚未求值时，求值上下文中使用此值。
    pub fn placeholder(ty: ValueType) -> Self {
        match ty {
            ValueType::String => Self::String(String::new()),
            ValueType::Number => Self::Number(0.0),
            ValueType::Boolean => Self::Boolean(false),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// 真值判断：空字符串、0 与 false 为假
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Boolean(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::String(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl ValueType {
    /// 从类型注解解析（`string` / `number` / `boolean`）
    pub fn from_annotation(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => Some(Self::String),
            "number" | "num" | "int" | "float" => Some(Self::Number),
            "boolean" | "bool" => Some(Self::Boolean),
            _ => None,
        }
    }

    /// 根据字面量的外形推断类型（不做求值）
    pub fn infer_from_literal(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if (text.starts_with('"') && text.ends_with('"') && text.len() >= 2)
            || (text.starts_with('\'') && text.ends_with('\'') && text.len() >= 2)
        {
            return Some(Self::String);
        }
        if text == "true" || text == "false" {
            return Some(Self::Boolean);
        }
        if text.parse::<f64>().is_ok() {
            return Some(Self::Number);
        }
        None
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}
