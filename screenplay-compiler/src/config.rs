//! # 编译配置
//!
//! [`CompilerConfig`] 把可序列化的 [`CompilerOptions`] 与宿主注入的能力
//! （表达式求值器、字符串格式化器、行扩展）组合在一起。
//!
//! 每个解析调用只读取配置，因此同一配置可以被多次复用。

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::eval::{BuiltinEvaluator, BuiltinFormatter, ExpressionEvaluator, StringFormatter};
use crate::program::{TokenTag, Visibility};
use crate::value::Value;

/// 预先注入的变量（位于根 section）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentedVariable {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub visibility: Visibility,
}

/// 预先注入的结构体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentedStruct {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub base: Option<String>,
    /// 字段 id（如 `.hp`）→ 值
    #[serde(default)]
    pub fields: IndexMap<String, Value>,
}

/// 宿主预先登记的声明
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Augmentations {
    pub variables: Vec<AugmentedVariable>,
    pub structs: Vec<AugmentedStruct>,
    /// 外部文件素材路径，每个文件登记为一个以文件名命名的结构体
    pub files: Vec<String>,
}

/// 可序列化的编译选项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// 不输出到 token 流的 token 类型
    pub omit: Vec<TokenTag>,
    /// 起始行号偏移
    pub line_offset: usize,
    pub augmentations: Augmentations,
}

impl CompilerOptions {
    /// 从 JSON 文本读取
    pub fn from_json(text: &str) -> CompileResult<Self> {
        serde_json::from_str(text).map_err(|e| CompileError::InvalidOptions {
            message: e.to_string(),
        })
    }
}

/// 交给行扩展检查的一行
#[derive(Debug, Clone, Copy)]
pub struct ExtensionLine<'a> {
    /// 行号（含偏移）
    pub line: usize,
    /// 原始行文本
    pub text: &'a str,
    /// 去掉缩进与行尾注释后的内容
    pub content: &'a str,
    pub indent: usize,
}

/// 行扩展的识别结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionMatch {
    /// 扩展名称，写入 `extension` token
    pub name: String,
    pub content: String,
}

/// 行扩展
///
/// 在默认分类之前逐行调用；返回 `Some` 时该行不再参与默认语法。
pub trait LineExtension {
    fn classify(&self, line: &ExtensionLine<'_>) -> Option<ExtensionMatch>;
}

impl<F> LineExtension for F
where
    F: Fn(&ExtensionLine<'_>) -> Option<ExtensionMatch>,
{
    fn classify(&self, line: &ExtensionLine<'_>) -> Option<ExtensionMatch> {
        self(line)
    }
}

/// 编译配置
pub struct CompilerConfig {
    pub options: CompilerOptions,
    pub evaluator: Box<dyn ExpressionEvaluator>,
    pub formatter: Box<dyn StringFormatter>,
    pub extensions: Vec<Box<dyn LineExtension>>,
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self {
            options: CompilerOptions::default(),
            evaluator: Box::new(BuiltinEvaluator),
            formatter: Box::new(BuiltinFormatter::new()),
            extensions: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_evaluator(mut self, evaluator: impl ExpressionEvaluator + 'static) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    pub fn with_formatter(mut self, formatter: impl StringFormatter + 'static) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    pub fn with_extension(mut self, extension: impl LineExtension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    /// 第一个识别该行的扩展
    pub(crate) fn classify_extension(&self, line: &ExtensionLine<'_>) -> Option<ExtensionMatch> {
        self.extensions.iter().find_map(|ext| ext.classify(line))
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompilerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerConfig")
            .field("options", &self.options)
            .field("extensions", &self.extensions.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_json_defaults() {
        let options = CompilerOptions::from_json("{}").unwrap();
        assert_eq!(options, CompilerOptions::default());
    }

    #[test]
    fn test_options_from_json() {
        let json = r#"{
            "omit": ["separator", "comment"],
            "line_offset": 3,
            "augmentations": {
                "variables": [{ "name": "gold", "value": 10 }],
                "structs": [{ "name": "hero", "type": "character", "fields": { ".hp": 5 } }],
                "files": ["img/bg.png"]
            }
        }"#;
        let options = CompilerOptions::from_json(json).unwrap();
        assert_eq!(options.omit, vec![TokenTag::Separator, TokenTag::Comment]);
        assert_eq!(options.line_offset, 3);
        assert_eq!(options.augmentations.variables[0].value, Value::Number(10.0));
        assert_eq!(options.augmentations.structs[0].ty, "character");
        assert_eq!(options.augmentations.files, vec!["img/bg.png".to_string()]);
    }

    #[test]
    fn test_invalid_options() {
        let err = CompilerOptions::from_json(r#"{ "omit": ["nope"] }"#).unwrap_err();
        assert!(matches!(err, CompileError::InvalidOptions { .. }));
    }

    fn wave(line: &ExtensionLine<'_>) -> Option<ExtensionMatch> {
        line.content.strip_prefix("~~").map(|rest| ExtensionMatch {
            name: "wave".into(),
            content: rest.trim().into(),
        })
    }

    #[test]
    fn test_fn_extension() {
        let config = CompilerConfig::new().with_extension(wave);
        let line = ExtensionLine {
            line: 0,
            text: "~~ hello",
            content: "~~ hello",
            indent: 0,
        };
        assert_eq!(
            config.classify_extension(&line).map(|m| m.content),
            Some("hello".to_string())
        );
    }
}
