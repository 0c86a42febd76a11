//! # 行模式表
//!
//! 按优先级排列的行外形匹配器。每个物理行的内容依次交给表中的匹配器，
//! 第一个匹配成功的条目决定该行的类型，并给出各语法部件的区间
//! （相对于行内容的字节偏移）。
//!
//! front matter 与结构体字段依赖文档位置，由各遍历阶段在查表之前处理；
//! 内容为空的行（注释 / 分隔）同样不进入模式表。

use tracing::trace;

use crate::program::{ChoiceOperator, ConditionCheck, Visibility};

use super::helpers::{identifier_len, is_all_caps, starts_with_ignore_case};

/// 行内容中的区间
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub from: usize,
    pub to: usize,
}

impl Span {
    pub fn new(from: usize, to: usize) -> Self {
        Self { from, to }
    }

    pub fn text<'a>(&self, s: &'a str) -> &'a str {
        &s[self.from..self.to]
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    /// `part` 必须是 `whole` 的子切片
    fn within(whole: &str, part: &str) -> Self {
        let from = part.as_ptr() as usize - whole.as_ptr() as usize;
        Self::new(from, from + part.len())
    }
}

/// 匹配器可见的相邻行信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineContext {
    /// 上一行为空（或为文档首行）
    pub prev_blank: bool,
    /// 下一行为空（或不存在）
    pub next_blank: bool,
}

/// 参数列表的括号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Brackets {
    pub open: char,
    pub open_at: usize,
    /// 闭合括号及其位置（未闭合为 None）
    pub close: Option<(char, usize)>,
    /// 括号内的内容
    pub inner: Span,
}

impl Brackets {
    pub fn is_mismatched(&self) -> bool {
        matches!(self.close, Some((close, _)) if close != closing_for(self.open))
    }
}

/// 跳转 / 调用目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetShape {
    /// 目标名（动态目标为含花括号的整段）
    pub name: Span,
    pub dynamic: bool,
    /// 实参列表内容（不含括号）
    pub arguments: Option<Span>,
    /// 实参列表（含括号）
    pub argument_list: Option<Span>,
}

/// section 标题
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionShape {
    /// `#` 的数量
    pub level: usize,
    pub marks: Span,
    pub name: Span,
    pub brackets: Option<Brackets>,
    pub return_type: Option<Span>,
}

/// 行匹配结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matched {
    Section(SectionShape),
    Label {
        name: Span,
    },
    Struct {
        ty: Span,
        name: Span,
        base: Option<Span>,
    },
    Variable {
        visibility: Option<Visibility>,
        name: Span,
        ty: Option<Span>,
        value: Option<Span>,
    },
    Scene {
        text: Span,
        number: Option<Span>,
    },
    Transition {
        text: Span,
    },
    Centered {
        text: Span,
    },
    PageBreak,
    Synopsis {
        text: Span,
    },
    Condition {
        check: ConditionCheck,
        keyword: Span,
        expression: Option<Span>,
    },
    Return {
        keyword: Span,
        expression: Option<Span>,
    },
    Repeat,
    Assign {
        name: Span,
        operator: Span,
        expression: Span,
    },
    Call(TargetShape),
    Jump(TargetShape),
    Choice {
        operator: ChoiceOperator,
        text: Span,
        target: Option<TargetShape>,
    },
    DialogueCue {
        name: Span,
        extension: Option<Span>,
        dual: bool,
    },
    Action {
        text: Span,
        forced: bool,
        continuation: bool,
    },
}

impl Matched {
    /// 是否会结束正在进行的对白
    pub fn ends_dialogue(&self) -> bool {
        matches!(
            self,
            Self::Section(_)
                | Self::Label { .. }
                | Self::Struct { .. }
                | Self::Variable { .. }
                | Self::Scene { .. }
                | Self::Condition { .. }
                | Self::Return { .. }
                | Self::Repeat
                | Self::Assign { .. }
                | Self::Call(_)
                | Self::Jump(_)
                | Self::Choice { .. }
        )
    }
}

/// 模式表条目
pub struct Pattern {
    pub name: &'static str,
    pub matcher: fn(&str, &LineContext) -> Option<Matched>,
}

/// 模式表（优先级从高到低）
pub const PATTERNS: &[Pattern] = &[
    Pattern { name: "section", matcher: match_section },
    Pattern { name: "label", matcher: match_label },
    Pattern { name: "struct", matcher: match_struct },
    Pattern { name: "variable", matcher: match_variable },
    Pattern { name: "scene", matcher: match_scene },
    Pattern { name: "transition", matcher: match_transition },
    Pattern { name: "centered", matcher: match_centered },
    Pattern { name: "page_break", matcher: match_page_break },
    Pattern { name: "synopsis", matcher: match_synopsis },
    Pattern { name: "condition", matcher: match_condition },
    Pattern { name: "return", matcher: match_return },
    Pattern { name: "repeat", matcher: match_repeat },
    Pattern { name: "assign", matcher: match_assign },
    Pattern { name: "call", matcher: match_call },
    Pattern { name: "jump", matcher: match_jump },
    Pattern { name: "choice", matcher: match_choice },
    Pattern { name: "dialogue_cue", matcher: match_dialogue_cue },
    Pattern { name: "action", matcher: match_action },
];

/// 对一行内容分类
pub fn classify(content: &str, ctx: &LineContext) -> Option<Matched> {
    if content.is_empty() {
        return None;
    }
    PATTERNS.iter().find_map(|p| {
        let matched = (p.matcher)(content, ctx)?;
        trace!(pattern = p.name, "行已分类");
        Some(matched)
    })
}

// -------------------------------------------------------------------------
// 游标
// -------------------------------------------------------------------------

struct Cursor<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Self { s, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.s[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.s.len()
    }

    fn skip_whitespace(&mut self) -> usize {
        let rest = self.rest();
        let skipped = rest.len() - rest.trim_start().len();
        self.pos += skipped;
        skipped
    }

    fn eat(&mut self, prefix: &str) -> bool {
        if self.rest().starts_with(prefix) {
            self.pos += prefix.len();
            true
        } else {
            false
        }
    }

    /// 关键字：之后必须是空白或行尾
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.rest().strip_prefix(keyword) {
            Some(after) if after.chars().next().is_none_or(char::is_whitespace) => {
                self.pos += keyword.len();
                true
            }
            _ => false,
        }
    }

    fn ident(&mut self) -> Option<Span> {
        let len = identifier_len(self.rest());
        if len == 0 {
            return None;
        }
        let span = Span::new(self.pos, self.pos + len);
        self.pos += len;
        Some(span)
    }

    /// 点分标识符，可带前导 `.`
    fn dotted_ident(&mut self) -> Option<Span> {
        let start = self.pos;
        self.eat(".");
        self.ident().or_else(|| {
            self.pos = start;
            None
        })?;
        loop {
            let before = self.pos;
            if !self.eat(".") {
                break;
            }
            if self.ident().is_none() {
                self.pos = before;
                break;
            }
        }
        Some(Span::new(start, self.pos))
    }

    /// 剩余内容（去掉首尾空白），为空时返回 None
    fn remainder(&self) -> Option<Span> {
        let trimmed = self.rest().trim();
        (!trimmed.is_empty()).then(|| Span::within(self.s, trimmed))
    }
}

fn closing_for(open: char) -> char {
    if open == '[' { ']' } else { ')' }
}

/// 从 `open_at` 处的括号开始查找第一个深度为 0 的闭合括号（任意种类）
fn find_close(s: &str, open_at: usize) -> Option<(char, usize)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in s[open_at + 1..].char_indices() {
        let i = open_at + 1 + i;
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' => depth += 1,
            ')' | ']' if depth == 0 => return Some((c, i)),
            ')' | ']' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// 解析跳转目标：`name`、`a.b`、`name(args)` 或 `{expr}`
pub fn parse_target(s: &str) -> Option<TargetShape> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    let base = Span::within(s, trimmed);

    if trimmed.starts_with('{') && trimmed.ends_with('}') && trimmed.len() >= 2 {
        return Some(TargetShape {
            name: base,
            dynamic: true,
            arguments: None,
            argument_list: None,
        });
    }

    let mut cursor = Cursor::new(trimmed);
    let name = cursor.dotted_ident()?;
    let shift = |span: Span| Span::new(span.from + base.from, span.to + base.from);

    if cursor.at_end() {
        return Some(TargetShape {
            name: shift(name),
            dynamic: false,
            arguments: None,
            argument_list: None,
        });
    }
    if !cursor.rest().starts_with('(') || !trimmed.ends_with(')') {
        return None;
    }
    let open = cursor.pos;
    let close = trimmed.len() - 1;
    Some(TargetShape {
        name: shift(name),
        dynamic: false,
        arguments: Some(shift(Span::new(open + 1, close))),
        argument_list: Some(shift(Span::new(open, close + 1))),
    })
}

// -------------------------------------------------------------------------
// 匹配器
// -------------------------------------------------------------------------

fn match_section(s: &str, _: &LineContext) -> Option<Matched> {
    let level = s.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let mut cursor = Cursor::new(s);
    cursor.pos = level;
    if cursor.skip_whitespace() == 0 {
        return None;
    }

    let body = cursor.rest();
    let name_end = [body.find('('), body.find('['), body.find("->")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(body.len());
    let name_text = body[..name_end].trim();
    if name_text.is_empty() {
        return None;
    }
    let name = Span::within(s, name_text);
    cursor.pos += name_end;

    let brackets = match cursor.rest().chars().next() {
        Some(open @ ('(' | '[')) => {
            let open_at = cursor.pos;
            let close = find_close(s, open_at);
            let inner_end = close.map(|(_, at)| at).unwrap_or(s.len());
            cursor.pos = close.map(|(_, at)| at + 1).unwrap_or(s.len());
            Some(Brackets {
                open,
                open_at,
                close,
                inner: Span::new(open_at + 1, inner_end),
            })
        }
        _ => None,
    };

    cursor.skip_whitespace();
    let return_type = if cursor.eat("->") {
        cursor.remainder()
    } else {
        None
    };

    Some(Matched::Section(SectionShape {
        level,
        marks: Span::new(0, level),
        name,
        brackets,
        return_type,
    }))
}

fn match_label(s: &str, _: &LineContext) -> Option<Matched> {
    let rest = s.strip_prefix("==")?;
    if rest.starts_with('=') {
        return None;
    }
    let rest = rest.trim_end();
    let name = rest.strip_suffix("==").unwrap_or(rest).trim();
    if name.is_empty() {
        return None;
    }
    Some(Matched::Label {
        name: Span::within(s, name),
    })
}

fn match_struct(s: &str, _: &LineContext) -> Option<Matched> {
    let mut cursor = Cursor::new(s);
    if !cursor.eat("@") {
        return None;
    }
    let ty = cursor.ident()?;
    if cursor.skip_whitespace() == 0 {
        return None;
    }
    let name = cursor.ident()?;
    cursor.skip_whitespace();

    let mut base = None;
    if cursor.eat("(") {
        let close = cursor.rest().find(')')? + cursor.pos;
        let inner = s[cursor.pos..close].trim();
        base = (!inner.is_empty()).then(|| Span::within(s, inner));
        cursor.pos = close + 1;
        cursor.skip_whitespace();
    }
    cursor.eat(":");
    cursor.skip_whitespace();
    if !cursor.at_end() {
        return None;
    }
    Some(Matched::Struct { ty, name, base })
}

fn match_variable(s: &str, _: &LineContext) -> Option<Matched> {
    let mut cursor = Cursor::new(s);
    let visibility = if cursor.eat_keyword("public") {
        Some(Visibility::Public)
    } else if cursor.eat_keyword("protected") {
        Some(Visibility::Protected)
    } else {
        None
    };
    cursor.skip_whitespace();
    if !cursor.eat_keyword("var") {
        return None;
    }
    cursor.skip_whitespace();
    let name = cursor.ident()?;
    cursor.skip_whitespace();

    let mut ty = None;
    if cursor.eat(":") {
        let rest = cursor.rest();
        let end = rest.find('=').unwrap_or(rest.len());
        let text = rest[..end].trim();
        ty = (!text.is_empty()).then(|| Span::within(s, text));
        cursor.pos += end;
    }

    let mut value = None;
    if cursor.rest().starts_with('=') && !cursor.rest().starts_with("==") {
        cursor.pos += 1;
        value = cursor.remainder();
        cursor.pos = s.len();
    }
    cursor.skip_whitespace();
    if !cursor.at_end() {
        return None;
    }
    Some(Matched::Variable {
        visibility,
        name,
        ty,
        value,
    })
}

const SCENE_PREFIXES: &[&str] = &["INT./EXT.", "INT./EXT", "INT/EXT", "I/E", "INT.", "EXT.", "EST."];

fn match_scene(s: &str, _: &LineContext) -> Option<Matched> {
    let text = if let Some(forced) = s.strip_prefix('.') {
        if !forced.starts_with(|c: char| c.is_alphanumeric()) {
            return None;
        }
        forced
    } else {
        let prefix = SCENE_PREFIXES
            .iter()
            .find(|p| starts_with_ignore_case(s, p))?;
        let boundary = s[prefix.len()..]
            .chars()
            .next()
            .is_none_or(|c| c.is_whitespace() || c == '.');
        if !boundary {
            return None;
        }
        s
    };

    // 行尾场景编号 `#12A#`
    let mut number = None;
    let mut heading = text;
    if let Some(body) = text.strip_suffix('#')
        && let Some(open) = body.rfind('#')
    {
        let candidate = &body[open + 1..];
        if !candidate.is_empty() && !candidate.contains(char::is_whitespace) {
            number = Some(Span::within(s, candidate));
            heading = body[..open].trim_end();
        }
    }
    if heading.is_empty() {
        return None;
    }
    Some(Matched::Scene {
        text: Span::within(s, heading),
        number,
    })
}

fn match_transition(s: &str, _: &LineContext) -> Option<Matched> {
    if is_all_caps(s) && s.ends_with("TO:") {
        return Some(Matched::Transition {
            text: Span::new(0, s.len()),
        });
    }
    let rest = s.strip_prefix('>')?;
    if s.ends_with('<') {
        return None;
    }
    let text = rest.trim();
    if text.is_empty() || parse_target(text).is_some() {
        return None;
    }
    Some(Matched::Transition {
        text: Span::within(s, text),
    })
}

fn match_centered(s: &str, _: &LineContext) -> Option<Matched> {
    let inner = s.strip_prefix('>')?.strip_suffix('<')?.trim();
    Some(Matched::Centered {
        text: Span::within(s, inner),
    })
}

fn match_page_break(s: &str, _: &LineContext) -> Option<Matched> {
    (s.len() >= 3 && s.chars().all(|c| c == '=')).then_some(Matched::PageBreak)
}

fn match_synopsis(s: &str, _: &LineContext) -> Option<Matched> {
    let rest = s.strip_prefix('=')?;
    if rest.starts_with('=') {
        return None;
    }
    Some(Matched::Synopsis {
        text: Span::within(s, rest.trim()),
    })
}

/// `* ` 指令的游标（已跳过星号与空白）
fn directive(s: &str) -> Option<Cursor<'_>> {
    let mut cursor = Cursor::new(s);
    if !cursor.eat("*") {
        return None;
    }
    cursor.skip_whitespace();
    Some(cursor)
}

fn match_condition(s: &str, _: &LineContext) -> Option<Matched> {
    let mut cursor = directive(s)?;
    let start = cursor.pos;
    let check = if cursor.eat_keyword("if") {
        ConditionCheck::If
    } else if cursor.eat_keyword("elif") {
        ConditionCheck::Elif
    } else if cursor.eat_keyword("else") {
        ConditionCheck::Else
    } else {
        return None;
    };
    let keyword = Span::new(start, cursor.pos);
    let expression = cursor.remainder();
    if check == ConditionCheck::Else && expression.is_some() {
        return None;
    }
    Some(Matched::Condition {
        check,
        keyword,
        expression,
    })
}

fn match_return(s: &str, _: &LineContext) -> Option<Matched> {
    let mut cursor = directive(s)?;
    let start = cursor.pos;
    if !cursor.eat_keyword("return") {
        return None;
    }
    Some(Matched::Return {
        keyword: Span::new(start, cursor.pos),
        expression: cursor.remainder(),
    })
}

fn match_repeat(s: &str, _: &LineContext) -> Option<Matched> {
    let cursor = directive(s)?;
    (cursor.rest() == "repeat").then_some(Matched::Repeat)
}

const ASSIGN_OPERATORS: &[&str] = &["+=", "-=", "*=", "/=", "%=", "="];

fn match_assign(s: &str, _: &LineContext) -> Option<Matched> {
    let mut cursor = directive(s)?;
    let name = cursor.dotted_ident()?;
    cursor.skip_whitespace();
    let op_start = cursor.pos;
    let op = ASSIGN_OPERATORS.iter().find(|op| cursor.rest().starts_with(**op))?;
    cursor.pos += op.len();
    if *op == "=" && cursor.rest().starts_with('=') {
        return None;
    }
    let operator = Span::new(op_start, cursor.pos);
    let expression = cursor.remainder()?;
    Some(Matched::Assign {
        name,
        operator,
        expression,
    })
}

fn match_call(s: &str, _: &LineContext) -> Option<Matched> {
    let cursor = directive(s)?;
    let offset = cursor.pos;
    let target = parse_target(cursor.rest())?;
    if target.dynamic || target.arguments.is_none() {
        return None;
    }
    Some(Matched::Call(shift_target(target, offset)))
}

fn match_jump(s: &str, _: &LineContext) -> Option<Matched> {
    let rest = s.strip_prefix('>')?;
    let target = parse_target(rest)?;
    Some(Matched::Jump(shift_target(target, 1)))
}

fn match_choice(s: &str, _: &LineContext) -> Option<Matched> {
    let operator = match s.chars().next()? {
        '+' => ChoiceOperator::Sticky,
        '-' => ChoiceOperator::Once,
        _ => return None,
    };
    let body = &s[1..];
    if !body.starts_with(char::is_whitespace) {
        return None;
    }

    // 行尾 `> target`
    let mut target = None;
    let mut text_part = body;
    if let Some(gt) = body.rfind('>')
        && gt > 0
        && body[..gt].ends_with(char::is_whitespace)
        && let Some(shape) = parse_target(&body[gt + 1..])
    {
        target = Some(shift_target(shape, 1 + gt + 1));
        text_part = &body[..gt];
    }

    Some(Matched::Choice {
        operator,
        text: Span::within(s, text_part.trim()),
        target,
    })
}

fn match_dialogue_cue(s: &str, ctx: &LineContext) -> Option<Matched> {
    if !ctx.prev_blank || ctx.next_blank {
        return None;
    }
    if !s.starts_with(|c: char| c.is_alphabetic()) || s.contains(':') {
        return None;
    }
    let (body, dual) = match s.strip_suffix('^') {
        Some(body) => (body.trim_end(), true),
        None => (s, false),
    };

    let (name, extension) = match (body.strip_suffix(')'), body.rfind('(')) {
        (Some(_), Some(open)) => {
            let inner = body[open + 1..body.len() - 1].trim();
            (body[..open].trim_end(), Some(Span::within(s, inner)))
        }
        _ => (body, None),
    };
    if name.is_empty() || !is_all_caps(name) {
        return None;
    }
    Some(Matched::DialogueCue {
        name: Span::within(s, name),
        extension,
        dual,
    })
}

fn match_action(s: &str, _: &LineContext) -> Option<Matched> {
    if let Some(rest) = s.strip_prefix('!') {
        return Some(Matched::Action {
            text: Span::within(s, rest),
            forced: true,
            continuation: false,
        });
    }
    if let Some(rest) = s.strip_prefix('&') {
        return Some(Matched::Action {
            text: Span::within(s, rest.trim_start()),
            forced: false,
            continuation: true,
        });
    }
    Some(Matched::Action {
        text: Span::new(0, s.len()),
        forced: false,
        continuation: false,
    })
}

fn shift_target(target: TargetShape, by: usize) -> TargetShape {
    let shift = |span: Span| Span::new(span.from + by, span.to + by);
    TargetShape {
        name: shift(target.name),
        dynamic: target.dynamic,
        arguments: target.arguments.map(shift),
        argument_list: target.argument_list.map(shift),
    }
}
