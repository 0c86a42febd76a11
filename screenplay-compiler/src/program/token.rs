//! # Token 定义
//!
//! 主遍历输出的扁平 token 流。每个 token 都携带绝对字节区间、
//! 行号与缩进层级，以及各类型特有的字段。

use serde::{Deserialize, Serialize};

use crate::program::symbols::{SectionKind, Visibility};
use crate::value::Value;

/// 对白位置（双人对白时左右并排）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialoguePosition {
    Left,
    Right,
}

/// 条件分支关键字
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionCheck {
    If,
    Elif,
    Else,
}

/// 选项运算符：`+` 可重复选择，`-` 只能选择一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceOperator {
    Sticky,
    Once,
}

/// 调用实参与形参的绑定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentBinding {
    /// 形参变量 id
    pub parameter: String,
    /// 实参原文
    pub expression: String,
    /// 求值结果
    pub value: Option<Value>,
}

/// 跳转 / 调用目标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallTarget {
    /// 原文中的目标名
    pub name: String,
    /// 解析后的 section id（未解析或动态目标为 None）
    pub section: Option<String>,
    /// 是否为 `{expr}` 动态目标
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dynamic: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<ArgumentBinding>,
}

/// Token 类型及其特有字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum TokenKind {
    FrontMatterStart,
    FrontMatter {
        key: String,
        value: String,
    },
    FrontMatterEnd,

    /// `#` 标题 section
    Section {
        /// 注册成功时的 id（重复声明被拒绝时为 None）
        id: Option<String>,
        name: String,
        level: usize,
        section_kind: SectionKind,
    },
    /// `== name` 标签
    Label {
        id: Option<String>,
        name: String,
    },
    Variable {
        id: Option<String>,
        name: String,
        visibility: Visibility,
        value: Option<Value>,
    },
    Struct {
        name: String,
        struct_type: String,
        base: Option<String>,
    },
    StructField {
        /// 所属结构体名
        parent: String,
        /// 字段路径 id（如 `.stats.hp`、`.0`）
        id: String,
        value: Option<Value>,
    },

    Scene {
        text: String,
        /// `#12A#` 场景编号
        number: Option<String>,
    },
    Transition {
        text: String,
    },
    Centered {
        text: String,
    },
    PageBreak,
    Synopsis {
        text: String,
    },

    DialogueStart {
        position: Option<DialoguePosition>,
    },
    DualDialogueStart,
    DialogueCharacter {
        name: String,
        position: Option<DialoguePosition>,
    },
    DialogueParenthetical {
        text: String,
        position: Option<DialoguePosition>,
    },
    Dialogue {
        character: String,
        text: String,
        position: Option<DialoguePosition>,
    },
    DialogueEnd,

    Action {
        text: String,
    },

    ChoiceStart,
    Choice {
        operator: ChoiceOperator,
        content: String,
        target: Option<CallTarget>,
    },
    ChoiceEnd,

    Condition {
        check: ConditionCheck,
        expression: Option<String>,
        value: Option<Value>,
    },
    Jump {
        target: CallTarget,
    },
    Call {
        target: CallTarget,
    },
    Assign {
        /// 解析后的变量 id
        variable: Option<String>,
        name: String,
        operator: String,
        expression: String,
        value: Option<Value>,
    },
    Return {
        expression: Option<String>,
        value: Option<Value>,
    },
    Repeat,

    /// 宿主扩展识别的自定义行
    Extension {
        name: String,
        content: String,
    },

    Comment {
        text: String,
    },
    Separator,
}

/// Token 类型标签（不带字段），用于配置中的省略列表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTag {
    FrontMatterStart,
    FrontMatter,
    FrontMatterEnd,
    Section,
    Label,
    Variable,
    Struct,
    StructField,
    Scene,
    Transition,
    Centered,
    PageBreak,
    Synopsis,
    DialogueStart,
    DualDialogueStart,
    DialogueCharacter,
    DialogueParenthetical,
    Dialogue,
    DialogueEnd,
    Action,
    ChoiceStart,
    Choice,
    ChoiceEnd,
    Condition,
    Jump,
    Call,
    Assign,
    Return,
    Repeat,
    Extension,
    Comment,
    Separator,
}

impl TokenKind {
    pub fn tag(&self) -> TokenTag {
        match self {
            Self::FrontMatterStart => TokenTag::FrontMatterStart,
            Self::FrontMatter { .. } => TokenTag::FrontMatter,
            Self::FrontMatterEnd => TokenTag::FrontMatterEnd,
            Self::Section { .. } => TokenTag::Section,
            Self::Label { .. } => TokenTag::Label,
            Self::Variable { .. } => TokenTag::Variable,
            Self::Struct { .. } => TokenTag::Struct,
            Self::StructField { .. } => TokenTag::StructField,
            Self::Scene { .. } => TokenTag::Scene,
            Self::Transition { .. } => TokenTag::Transition,
            Self::Centered { .. } => TokenTag::Centered,
            Self::PageBreak => TokenTag::PageBreak,
            Self::Synopsis { .. } => TokenTag::Synopsis,
            Self::DialogueStart { .. } => TokenTag::DialogueStart,
            Self::DualDialogueStart => TokenTag::DualDialogueStart,
            Self::DialogueCharacter { .. } => TokenTag::DialogueCharacter,
            Self::DialogueParenthetical { .. } => TokenTag::DialogueParenthetical,
            Self::Dialogue { .. } => TokenTag::Dialogue,
            Self::DialogueEnd => TokenTag::DialogueEnd,
            Self::Action { .. } => TokenTag::Action,
            Self::ChoiceStart => TokenTag::ChoiceStart,
            Self::Choice { .. } => TokenTag::Choice,
            Self::ChoiceEnd => TokenTag::ChoiceEnd,
            Self::Condition { .. } => TokenTag::Condition,
            Self::Jump { .. } => TokenTag::Jump,
            Self::Call { .. } => TokenTag::Call,
            Self::Assign { .. } => TokenTag::Assign,
            Self::Return { .. } => TokenTag::Return,
            Self::Repeat => TokenTag::Repeat,
            Self::Extension { .. } => TokenTag::Extension,
            Self::Comment { .. } => TokenTag::Comment,
            Self::Separator => TokenTag::Separator,
        }
    }

    /// 是否是可显示的文本 token（可被 `&` 续行或相邻合并）
    pub fn is_display(&self) -> bool {
        matches!(
            self,
            Self::Action { .. } | Self::Dialogue { .. } | Self::Centered { .. }
        )
    }

    /// 追加一行显示文本
    pub(crate) fn append_text(&mut self, extra: &str) {
        if let Self::Action { text } | Self::Dialogue { text, .. } | Self::Centered { text } = self {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(extra);
        }
    }

    /// 改写对白位置
    pub(crate) fn set_position(&mut self, new_position: DialoguePosition) {
        match self {
            Self::DialogueStart { position }
            | Self::DialogueCharacter { position, .. }
            | Self::DialogueParenthetical { position, .. }
            | Self::Dialogue { position, .. } => *position = Some(new_position),
            _ => {}
        }
    }
}

impl std::fmt::Display for TokenTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 与 serde 的 snake_case 表示保持一致
        let text = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{}", text)
    }
}

/// Token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    #[serde(flatten)]
    pub kind: TokenKind,
    /// 绝对起始偏移
    pub from: usize,
    /// 绝对结束偏移
    pub to: usize,
    /// 行号（从 0 开始，含偏移）
    pub line: usize,
    /// 缩进层级
    pub indent: usize,
}

impl Token {
    pub fn new(kind: TokenKind, from: usize, to: usize, line: usize, indent: usize) -> Self {
        Self {
            kind,
            from,
            to,
            line,
            indent,
        }
    }

    pub fn tag(&self) -> TokenTag {
        self.kind.tag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_display_matches_serde() {
        assert_eq!(TokenTag::DialogueCharacter.to_string(), "dialogue_character");
        assert_eq!(TokenTag::Separator.to_string(), "separator");
    }

    #[test]
    fn test_token_serializes_flat() {
        let token = Token::new(TokenKind::Action { text: "Rain.".into() }, 0, 5, 0, 0);
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["tag"], "action");
        assert_eq!(json["text"], "Rain.");
        assert_eq!(json["to"], 5);
    }

    #[test]
    fn test_append_text_only_on_display_tokens() {
        let mut kind = TokenKind::Action { text: "a".into() };
        kind.append_text("b");
        assert_eq!(kind, TokenKind::Action { text: "a\nb".into() });

        let mut jump = TokenKind::Repeat;
        jump.append_text("x");
        assert_eq!(jump, TokenKind::Repeat);
    }

    #[test]
    fn test_set_position() {
        let mut kind = TokenKind::Dialogue {
            character: "JOE".into(),
            text: "Hi".into(),
            position: None,
        };
        kind.set_position(DialoguePosition::Left);
        assert!(matches!(
            kind,
            TokenKind::Dialogue {
                position: Some(DialoguePosition::Left),
                ..
            }
        ));
    }
}
