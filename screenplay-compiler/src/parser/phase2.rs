//! # 阶段 2：主遍历
//!
//! 逐行产生 token：求值初始化表达式与条件、解析跳转目标、绑定实参，
//! 并把相邻行组合成对白块与选项块。大纲、场景与角色登记也在这一遍完成。
//!
//! ## 分组规则
//!
//! - 对白：角色提示行（前一行为空、后一行非空）开启，遇到空行、
//!   会结束对白的结构行或文档末尾时关闭
//! - 双人对白：以 `^` 结尾的提示行与上一段对白并排，共用一个开始 token
//! - 选项：同一缩进的相邻选项组成一组，缩进变浅或出现同缩进的非选项行时关闭

use tracing::debug;

use crate::diagnostic::Diagnostic;
use crate::error::CompileResult;
use crate::program::{
    CharacterInfo, ChoiceOperator, ColorLiteral, ConditionCheck, DeclarationKind,
    DialoguePosition, FrontMatterEntry, FrontMatterPosition, LineScope, OutlineKind, PathId,
    SceneInfo, SectionKind, Token, TokenKind, TokenTag, Visibility,
};
use crate::value::{Value, ValueType};

use super::builder::{Declaration, ProgramBuilder};
use super::helpers::is_color_literal;
use super::line_context;
use super::lines::SourceLine;
use super::patterns::{Matched, SectionShape, Span, TargetShape, classify};
use super::phase1::{Hoisted, LineRole};

#[derive(Debug, Clone)]
struct DialogueRun {
    character: String,
    position: Option<DialoguePosition>,
    indent: usize,
}

#[derive(Debug, Clone, Copy)]
struct ChoiceRun {
    indent: usize,
}

struct MainPass<'p, 'c, 'l> {
    builder: &'p mut ProgramBuilder<'c>,
    lines: &'p [SourceLine<'l>],
    hoisted: &'p Hoisted,
    dialogue: Option<DialogueRun>,
    choices: Vec<ChoiceRun>,
    /// 当前 section / label 的大纲层级
    container_level: usize,
    /// 当前场景在登记表中的下标
    scene: Option<usize>,
    /// 最近一次写入显示文本的行
    last_text_line: Option<usize>,
}

/// 执行主遍历
pub(crate) fn run(
    builder: &mut ProgramBuilder<'_>,
    lines: &[SourceLine<'_>],
    hoisted: &Hoisted,
) -> CompileResult<()> {
    let mut pass = MainPass {
        builder,
        lines,
        hoisted,
        dialogue: None,
        choices: Vec::new(),
        container_level: 0,
        scene: None,
        last_text_line: None,
    };

    pass.front_matter();
    let start = hoisted.front_matter.as_ref().map_or(0, |fm| fm.end);
    for line in &lines[start..] {
        pass.line(line)?;
    }
    pass.close_dialogue();
    pass.close_choices(0, false);

    debug!(
        tokens = pass.builder.tokens.len(),
        scenes = pass.builder.scenes.len(),
        characters = pass.builder.characters.len(),
        "主遍历完成"
    );
    Ok(())
}

/// 两个值类型能否用该运算符赋值
fn assignment_compatible(operator: &str, target: ValueType, value: ValueType) -> bool {
    match operator {
        "=" => target == value,
        "+=" if target == ValueType::String => true,
        _ => target == ValueType::Number && value == ValueType::Number,
    }
}

impl MainPass<'_, '_, '_> {
    fn abs_line(&self, line: &SourceLine<'_>) -> usize {
        self.builder.abs_line(line.index)
    }

    /// 以行内容区间写入 token
    fn push(&mut self, kind: TokenKind, line: &SourceLine<'_>, span: Span) {
        let token = Token::new(
            kind,
            line.abs(span.from),
            line.abs(span.to),
            self.abs_line(line),
            line.indent,
        );
        self.builder.tokens.push(token);
    }

    fn push_line(&mut self, kind: TokenKind, line: &SourceLine<'_>) {
        self.push(kind, line, Span::new(0, line.content().len()));
    }

    fn set_scope(&mut self, line: &SourceLine<'_>, scope: LineScope) {
        if let Some(info) = self.builder.lines.get_mut(line.index) {
            info.scope = scope;
        }
    }

    fn front_matter(&mut self) {
        let lines = self.lines;
        let hoisted = self.hoisted;
        let Some(block) = &hoisted.front_matter else {
            return;
        };
        let Some(first) = lines.first() else {
            return;
        };

        self.push(TokenKind::FrontMatterStart, first, Span::default());
        for item in &block.items {
            let line = &lines[item.line];
            let last = &lines[item.last_line];
            let abs_line = self.abs_line(line);
            self.builder.tokens.push(Token::new(
                TokenKind::FrontMatter {
                    key: item.key.clone(),
                    value: item.value.clone(),
                },
                line.abs(0),
                last.start + last.content_end,
                abs_line,
                line.indent,
            ));
            self.builder
                .front_matter
                .entry(FrontMatterPosition::for_key(&item.key))
                .or_default()
                .push(FrontMatterEntry {
                    key: item.key.clone(),
                    value: item.value.clone(),
                    line: abs_line,
                });
        }
        if let Some(last) = block.end.checked_sub(1).and_then(|i| lines.get(i)) {
            let end = last.content_end - last.content_start;
            self.push(TokenKind::FrontMatterEnd, last, Span::new(end, end));
        }
    }

    fn line(&mut self, line: &SourceLine<'_>) -> CompileResult<()> {
        let hoisted = self.hoisted;
        let index = line.index;
        match hoisted.roles[index] {
            LineRole::FrontMatter | LineRole::StructField => return Ok(()),
            LineRole::Extension => {
                self.close_dialogue();
                self.close_choices(line.indent, false);
                if let Some(matched) = hoisted.extensions.get(&index) {
                    self.push_line(
                        TokenKind::Extension {
                            name: matched.name.clone(),
                            content: matched.content.clone(),
                        },
                        line,
                    );
                }
                return Ok(());
            }
            LineRole::Body => {}
        }

        if line.is_blank() {
            self.close_dialogue();
            self.push(TokenKind::Separator, line, Span::default());
            return Ok(());
        }
        if line.content().is_empty() {
            let text = line.raw.trim().to_string();
            let abs_line = self.abs_line(line);
            self.builder.tokens.push(Token::new(
                TokenKind::Comment { text },
                line.start + line.content_start,
                line.end(),
                abs_line,
                line.indent,
            ));
            return Ok(());
        }

        let Some(matched) = classify(line.content(), &line_context(self.lines, index)) else {
            return Ok(());
        };
        if self
            .dialogue
            .as_ref()
            .is_some_and(|run| matched.ends_dialogue() || line.indent < run.indent)
        {
            self.close_dialogue();
        }
        self.close_choices(line.indent, matches!(matched, Matched::Choice { .. }));
        if !self.choices.is_empty() {
            self.set_scope(line, LineScope::Choice);
        }

        let scope = hoisted.scopes[index];
        if self.dialogue.is_some() {
            return self.dialogue_line(scope, line, matched);
        }
        self.statement(scope, line, matched)
    }

    fn statement(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        matched: Matched,
    ) -> CompileResult<()> {
        let content = line.content();
        match matched {
            Matched::Section(shape) => self.section(line, &shape)?,
            Matched::Label { name } => self.label(line, name),
            Matched::Struct { ty, name, base } => self.structure(scope, line, ty, name, base)?,
            Matched::Variable {
                visibility,
                name,
                ty,
                value,
            } => self.variable(scope, line, visibility, name, ty, value)?,
            Matched::Scene { text, number } => self.scene(scope, line, text, number),
            Matched::Transition { text } => self.push_line(
                TokenKind::Transition {
                    text: text.text(content).to_string(),
                },
                line,
            ),
            Matched::Centered { text } => {
                if !text.is_empty() {
                    self.builder.format(scope, line, text)?;
                }
                self.push_line(
                    TokenKind::Centered {
                        text: text.text(content).to_string(),
                    },
                    line,
                );
                self.last_text_line = None;
            }
            Matched::PageBreak => self.push_line(TokenKind::PageBreak, line),
            Matched::Synopsis { text } => self.push_line(
                TokenKind::Synopsis {
                    text: text.text(content).to_string(),
                },
                line,
            ),
            Matched::Condition {
                check,
                keyword,
                expression,
            } => self.condition(scope, line, check, keyword, expression)?,
            Matched::Return {
                keyword,
                expression,
            } => self.return_statement(scope, line, keyword, expression)?,
            Matched::Repeat => self.push_line(TokenKind::Repeat, line),
            Matched::Assign {
                name,
                operator,
                expression,
            } => self.assign(scope, line, name, operator, expression)?,
            Matched::Call(shape) => {
                let target = self.builder.resolve_target(scope, line, &shape)?;
                self.push_line(TokenKind::Call { target }, line);
            }
            Matched::Jump(shape) => {
                let target = self.builder.resolve_target(scope, line, &shape)?;
                self.push_line(TokenKind::Jump { target }, line);
            }
            Matched::Choice {
                operator,
                text,
                target,
            } => self.choice(scope, line, operator, text, target)?,
            Matched::DialogueCue { name, dual, .. } => self.start_dialogue(line, name, dual),
            Matched::Action {
                text, continuation, ..
            } => self.action(scope, line, text, continuation)?,
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // 声明行
    // ---------------------------------------------------------------------

    fn section(&mut self, line: &SourceLine<'_>, shape: &SectionShape) -> CompileResult<()> {
        let hoisted = self.hoisted;
        let name = shape.name.text(line.content()).to_string();
        let Some(decl) = hoisted.headings.get(&line.index) else {
            return Ok(());
        };
        let id = decl.path.map(|p| self.builder.section_id(p));
        let abs_line = self.abs_line(line);

        self.container_level = decl.level;
        self.scene = None;
        self.builder
            .outline
            .open(OutlineKind::Section, decl.level, &name, id.clone(), abs_line);
        self.push_line(
            TokenKind::Section {
                id: id.clone(),
                name,
                level: decl.level,
                section_kind: decl.params.kind,
            },
            line,
        );

        let (Some(path), Some(section_id)) = (decl.path, id) else {
            return Ok(());
        };
        for spec in &decl.params.params {
            let Some((_, span)) = &spec.default else {
                continue;
            };
            let value = self.builder.evaluate(path, line, *span)?;
            let variable_id = format!("{}.{}", section_id, spec.name);
            self.builder.update_variable(&variable_id, |variable| {
                if !variable.parameter {
                    return;
                }
                if variable.ty.is_none() {
                    variable.ty = value.as_ref().map(Value::value_type);
                }
                variable.value = value;
            });
        }

        for (trigger, span) in &decl.params.triggers {
            let resolved = self
                .builder
                .resolve_name(path, trigger)
                .filter(|d| d.kind == DeclarationKind::Variable);
            if resolved.is_none() {
                self.builder.report(
                    Diagnostic::error(format!("未定义的触发变量 '{}'", trigger)),
                    line,
                    *span,
                );
            }
            self.builder
                .add_reference(line, trigger.clone(), *span, resolved);
        }
        Ok(())
    }

    fn label(&mut self, line: &SourceLine<'_>, name: Span) {
        let hoisted = self.hoisted;
        let name = name.text(line.content()).to_string();
        let Some(decl) = hoisted.headings.get(&line.index) else {
            return;
        };
        let id = decl.path.map(|p| self.builder.section_id(p));
        let abs_line = self.abs_line(line);

        self.container_level = decl.level;
        self.scene = None;
        self.builder
            .outline
            .open(OutlineKind::Label, decl.level, &name, id.clone(), abs_line);
        self.push_line(TokenKind::Label { id, name }, line);
    }

    fn variable(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        visibility: Option<Visibility>,
        name: Span,
        ty: Option<Span>,
        value: Option<Span>,
    ) -> CompileResult<()> {
        let content = line.content();
        let name_text = name.text(content);
        let id = if line.indent == 0 {
            self.hoisted.variables.get(&line.index).cloned().flatten()
        } else {
            self.builder
                .register_variable(scope, line, name, ty, value, visibility)
        };

        let evaluated = match value {
            Some(span) => self.builder.evaluate(scope, line, span)?,
            None => None,
        };

        if let (Some(id), Some(v)) = (&id, &evaluated) {
            let declared = self.builder.variables.get(id).and_then(|var| var.ty);
            if let (Some(expected), Some(span)) = (declared, value)
                && expected != v.value_type()
            {
                self.builder.report(
                    Diagnostic::warn(format!(
                        "变量 '{}' 声明为 {}，但初始值是 {}",
                        name_text,
                        expected,
                        v.value_type()
                    )),
                    line,
                    span,
                );
            }
            self.builder.update_variable(id, |variable| {
                variable.ty.get_or_insert(v.value_type());
                variable.value = Some(v.clone());
            });
        }

        if let (Some(span), Some(v)) = (value, &evaluated) {
            self.record_color(line, span, v);
        }

        self.push_line(
            TokenKind::Variable {
                id,
                name: name_text.to_string(),
                visibility: visibility.unwrap_or_default(),
                value: evaluated,
            },
            line,
        );
        Ok(())
    }

    fn record_color(&mut self, line: &SourceLine<'_>, span: Span, value: &Value) {
        if let Value::String(s) = value
            && is_color_literal(s)
        {
            let abs_line = self.abs_line(line);
            self.builder.colors.push(ColorLiteral {
                color: s.clone(),
                line: abs_line,
                from: line.abs(span.from),
                to: line.abs(span.to),
            });
        }
    }

    fn structure(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        ty: Span,
        name: Span,
        base: Option<Span>,
    ) -> CompileResult<()> {
        let hoisted = self.hoisted;
        let lines = self.lines;
        let content = line.content();
        let name_text = name.text(content).to_string();
        let ty_text = ty.text(content).to_string();
        let base_text = base.map(|b| b.text(content).to_string());
        let decl = hoisted.structs.get(&line.index);
        let registered = decl.is_some_and(|d| d.registered);

        self.push_line(
            TokenKind::Struct {
                name: name_text.clone(),
                struct_type: ty_text.clone(),
                base: base_text.clone(),
            },
            line,
        );
        if registered
            && let (Some(base_name), Some(base_span)) = (&base_text, base)
        {
            self.check_base(line, &name_text, &ty_text, base_name, base_span);
        }

        let Some(decl) = decl else {
            return Ok(());
        };
        for field in &decl.fields {
            let field_line = &lines[field.line];
            self.set_scope(field_line, LineScope::Struct);
            let value = match &field.value {
                Some((text, span)) => self.field_value(scope, field_line, text, *span)?,
                None => None,
            };

            if registered {
                let abs_line = self.abs_line(field_line);
                self.builder
                    .set_field_value(&name_text, &field.id, abs_line, value.clone());
            }
            if let (Some((_, span)), Some(v)) = (&field.value, &value) {
                self.record_color(field_line, *span, v);
            }

            self.push_line(
                TokenKind::StructField {
                    parent: name_text.clone(),
                    id: field.id.clone(),
                    value,
                },
                field_line,
            );
        }
        Ok(())
    }

    /// 字段值：字面量交给求值器，含插值的文本交给格式化器，其余按字符串处理
    fn field_value(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        text: &str,
        span: Span,
    ) -> CompileResult<Option<Value>> {
        if ValueType::infer_from_literal(text).is_some() {
            return self.builder.evaluate(scope, line, span);
        }
        if text.contains('{') {
            return self.builder.format(scope, line, span);
        }
        Ok(Some(Value::String(text.to_string())))
    }

    fn check_base(
        &mut self,
        line: &SourceLine<'_>,
        name: &str,
        ty: &str,
        base: &str,
        span: Span,
    ) {
        let Some((base_ty, location)) = self
            .builder
            .structs
            .get(base)
            .map(|b| (b.ty.clone(), b.location))
        else {
            self.builder.report(
                Diagnostic::error(format!("未定义的基础结构体 '{}'", base)),
                line,
                span,
            );
            self.builder.add_reference(line, base, span, None);
            return;
        };

        if base_ty != ty {
            self.builder.report(
                Diagnostic::warn(format!(
                    "基础结构体 '{}' 的类型是 {}，与 {} 不一致",
                    base, base_ty, ty
                )),
                line,
                span,
            );
        }
        if self.builder.inherits_from(base, name) {
            self.builder.report(
                Diagnostic::warn(format!("结构体 '{}' 的继承链存在循环", name)),
                line,
                span,
            );
        }
        self.builder.add_reference(
            line,
            base,
            span,
            Some(Declaration {
                kind: DeclarationKind::Struct,
                id: base.to_string(),
                location,
            }),
        );
    }

    // ---------------------------------------------------------------------
    // 剧本元素
    // ---------------------------------------------------------------------

    fn scene(&mut self, scope: PathId, line: &SourceLine<'_>, text: Span, number: Option<Span>) {
        let content = line.content();
        let text = text.text(content).to_string();
        let number = number.map(|n| n.text(content).to_string());
        let abs_line = self.abs_line(line);

        self.builder.outline.open(
            OutlineKind::Scene,
            self.container_level + 1,
            &text,
            None,
            abs_line,
        );
        let section = self.builder.section_id(scope);
        self.builder.scenes.push(SceneInfo {
            name: text.clone(),
            number: number.clone(),
            line: abs_line,
            section,
            characters: Vec::new(),
        });
        self.scene = Some(self.builder.scenes.len() - 1);
        self.push_line(TokenKind::Scene { text, number }, line);
    }

    fn start_dialogue(&mut self, line: &SourceLine<'_>, name: Span, dual: bool) {
        let content = line.content();
        let character = name.text(content).to_string();

        let mut position = None;
        if dual {
            if self.pair_with_previous() {
                position = Some(DialoguePosition::Right);
            } else {
                let end = content.len();
                self.builder.report(
                    Diagnostic::warn("'^' 之前没有可以并排的对白"),
                    line,
                    Span::new(end.saturating_sub(1), end),
                );
            }
        }
        if position.is_none() {
            self.push(
                TokenKind::DialogueStart { position: None },
                line,
                Span::default(),
            );
        }
        self.push_line(
            TokenKind::DialogueCharacter {
                name: character.clone(),
                position,
            },
            line,
        );
        self.set_scope(line, LineScope::Dialogue);
        self.register_character(&character, self.abs_line(line));

        self.last_text_line = None;
        self.dialogue = Some(DialogueRun {
            character,
            position,
            indent: line.indent,
        });
    }

    /// 把上一段对白改为左侧，并去掉它的结束 token
    fn pair_with_previous(&mut self) -> bool {
        let tokens = &mut self.builder.tokens;
        let mut end = tokens.len();
        while end > 0 && tokens[end - 1].tag() == TokenTag::Separator {
            end -= 1;
        }
        if end == 0 || tokens[end - 1].tag() != TokenTag::DialogueEnd {
            return false;
        }
        let Some(start) = tokens[..end - 1].iter().rposition(|t| {
            matches!(
                t.tag(),
                TokenTag::DialogueStart | TokenTag::DualDialogueStart
            )
        }) else {
            return false;
        };
        if tokens[start].tag() == TokenTag::DualDialogueStart {
            return false;
        }

        tokens.truncate(end - 1);
        tokens[start].kind = TokenKind::DualDialogueStart;
        for token in &mut tokens[start + 1..] {
            token.kind.set_position(DialoguePosition::Left);
        }
        true
    }

    fn register_character(&mut self, name: &str, line: usize) {
        let info = self
            .builder
            .characters
            .entry(name.to_string())
            .or_insert_with(|| CharacterInfo {
                name: name.to_string(),
                ..CharacterInfo::default()
            });
        info.lines.push(line);

        if let Some(scene) = self.scene.and_then(|i| self.builder.scenes.get_mut(i))
            && !scene.characters.iter().any(|c| c == name)
        {
            scene.characters.push(name.to_string());
        }
    }

    fn dialogue_line(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        matched: Matched,
    ) -> CompileResult<()> {
        let Some(run) = self.dialogue.clone() else {
            return Ok(());
        };
        let content = line.content();
        self.set_scope(line, LineScope::Dialogue);

        if content.starts_with('(') && content.ends_with(')') {
            self.push_line(
                TokenKind::DialogueParenthetical {
                    text: content.to_string(),
                    position: run.position,
                },
                line,
            );
            self.last_text_line = None;
            return Ok(());
        }

        let span = match matched {
            Matched::Action {
                text,
                continuation: true,
                ..
            } => text,
            _ => Span::new(0, content.len()),
        };
        if !span.is_empty() {
            self.builder.format(scope, line, span)?;
        }
        let text = span.text(content);

        match self.mergeable(line, TokenTag::Dialogue) {
            Some(last) => {
                last.kind.append_text(text);
                last.to = line.abs(span.to);
            }
            None => {
                self.push(
                    TokenKind::Dialogue {
                        character: run.character.clone(),
                        text: text.to_string(),
                        position: run.position,
                    },
                    line,
                    span,
                );
                if let Some(info) = self.builder.characters.get_mut(&run.character) {
                    info.dialogue_count += 1;
                }
            }
        }
        self.last_text_line = Some(line.index);
        Ok(())
    }

    /// 上一行写入的同类文本 token（相邻行合并）
    ///
    /// 只合并紧邻的行：一个空行就算段落分隔，两段之间不合并。
    /// 需要跨空行接续时使用 `&` 续行。
    fn mergeable(&mut self, line: &SourceLine<'_>, tag: TokenTag) -> Option<&mut Token> {
        let adjacent = line.index > 0 && self.last_text_line == Some(line.index - 1);
        if !adjacent {
            return None;
        }
        self.builder
            .tokens
            .last_mut()
            .filter(|last| last.tag() == tag)
    }

    fn close_dialogue(&mut self) {
        if self.dialogue.take().is_none() {
            return;
        }
        let (at, line, indent) = self
            .builder
            .tokens
            .last()
            .map(|t| (t.to, t.line, t.indent))
            .unwrap_or_default();
        self.builder
            .tokens
            .push(Token::new(TokenKind::DialogueEnd, at, at, line, indent));
        self.last_text_line = None;
    }

    fn action(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        text: Span,
        continuation: bool,
    ) -> CompileResult<()> {
        let body = text.text(line.content());
        if !text.is_empty() {
            self.builder.format(scope, line, text)?;
        }
        if continuation && self.fold_continuation(line, text) {
            return Ok(());
        }

        match self.mergeable(line, TokenTag::Action) {
            Some(last) => {
                last.kind.append_text(body);
                last.to = line.abs(text.to);
            }
            None => self.push(
                TokenKind::Action {
                    text: body.to_string(),
                },
                line,
                text,
            ),
        }
        self.last_text_line = Some(line.index);
        Ok(())
    }

    /// `&` 续行：并入上一个显示 token，最多跨过一个分隔
    fn fold_continuation(&mut self, line: &SourceLine<'_>, text: Span) -> bool {
        let tokens = &mut self.builder.tokens;
        let mut at = tokens.len();
        if at > 0 && tokens[at - 1].tag() == TokenTag::Separator {
            at -= 1;
        }
        if at == 0 || !tokens[at - 1].kind.is_display() {
            return false;
        }
        tokens.truncate(at);
        let last = &mut tokens[at - 1];
        last.kind.append_text(text.text(line.content()));
        last.to = line.abs(text.to);
        self.last_text_line = Some(line.index);
        true
    }

    // ---------------------------------------------------------------------
    // 控制流
    // ---------------------------------------------------------------------

    fn condition(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        check: ConditionCheck,
        keyword: Span,
        expression: Option<Span>,
    ) -> CompileResult<()> {
        let content = line.content();
        let value = match expression {
            Some(span) => self.builder.evaluate(scope, line, span)?,
            None => {
                if check != ConditionCheck::Else {
                    self.builder.report(
                        Diagnostic::error(format!("'{}' 缺少条件表达式", keyword.text(content))),
                        line,
                        keyword,
                    );
                }
                None
            }
        };
        self.push_line(
            TokenKind::Condition {
                check,
                expression: expression.map(|s| s.text(content).to_string()),
                value,
            },
            line,
        );
        Ok(())
    }

    fn return_statement(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        keyword: Span,
        expression: Option<Span>,
    ) -> CompileResult<()> {
        let content = line.content();
        let value = match expression {
            Some(span) => self.builder.evaluate(scope, line, span)?,
            None => None,
        };

        if let Some(span) = expression {
            let callable = self
                .builder
                .enclosing_callable(scope)
                .map(|s| (s.kind, s.name.clone(), s.return_type.clone()));
            match callable {
                Some((SectionKind::Function, name, return_type)) => {
                    let expected = return_type.as_deref().and_then(ValueType::from_annotation);
                    if let (Some(expected), Some(v)) = (expected, &value)
                        && expected != v.value_type()
                    {
                        self.builder.report(
                            Diagnostic::warn(format!(
                                "function '{}' 声明返回 {}，但返回值是 {}",
                                name,
                                expected,
                                v.value_type()
                            )),
                            line,
                            span,
                        );
                    }
                }
                _ => {
                    self.builder.report(
                        Diagnostic::warn("只有 function 可以返回值"),
                        line,
                        Span::new(keyword.from, span.to),
                    );
                }
            }
        }

        self.push_line(
            TokenKind::Return {
                expression: expression.map(|s| s.text(content).to_string()),
                value,
            },
            line,
        );
        Ok(())
    }

    fn assign(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        name: Span,
        operator: Span,
        expression: Span,
    ) -> CompileResult<()> {
        let content = line.content();
        let name_text = name.text(content);
        let operator_text = operator.text(content);

        let target = self
            .builder
            .resolve_variable(scope, name_text)
            .map(|v| (v.id.clone(), v.ty, v.location));
        let value = self.builder.evaluate(scope, line, expression)?;

        match &target {
            None => {
                self.builder.report(
                    Diagnostic::error(format!("未定义的变量 '{}'", name_text)),
                    line,
                    name,
                );
                self.builder.add_reference(line, name_text, name, None);
            }
            Some((id, ty, location)) => {
                self.builder.add_reference(
                    line,
                    name_text,
                    name,
                    Some(Declaration {
                        kind: DeclarationKind::Variable,
                        id: id.clone(),
                        location: *location,
                    }),
                );
                if let (Some(ty), Some(v)) = (ty, &value)
                    && !assignment_compatible(operator_text, *ty, v.value_type())
                {
                    self.builder.report(
                        Diagnostic::warn(format!(
                            "不能用 '{}' 把 {} 值赋给 {} 类型的变量 '{}'",
                            operator_text,
                            v.value_type(),
                            ty,
                            name_text
                        )),
                        line,
                        Span::new(name.from, expression.to),
                    );
                }
            }
        }

        self.push_line(
            TokenKind::Assign {
                variable: target.map(|(id, ..)| id),
                name: name_text.to_string(),
                operator: operator_text.to_string(),
                expression: expression.text(content).to_string(),
                value,
            },
            line,
        );
        Ok(())
    }

    fn choice(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        operator: ChoiceOperator,
        text: Span,
        target: Option<TargetShape>,
    ) -> CompileResult<()> {
        if self
            .choices
            .last()
            .is_none_or(|run| run.indent < line.indent)
        {
            self.push(TokenKind::ChoiceStart, line, Span::default());
            self.choices.push(ChoiceRun {
                indent: line.indent,
            });
        }
        self.set_scope(line, LineScope::Choice);

        if !text.is_empty() {
            self.builder.format(scope, line, text)?;
        }
        let target = match target {
            Some(shape) => Some(self.builder.resolve_target(scope, line, &shape)?),
            None => None,
        };
        self.push_line(
            TokenKind::Choice {
                operator,
                content: text.text(line.content()).to_string(),
                target,
            },
            line,
        );
        self.last_text_line = None;
        Ok(())
    }

    /// 关闭比 `indent` 更深的选项组；同缩进的组遇到非选项行也关闭
    fn close_choices(&mut self, indent: usize, is_choice: bool) {
        while let Some(run) = self.choices.last() {
            if run.indent > indent || (run.indent == indent && !is_choice) {
                self.choices.pop();
                self.insert_choice_end();
            } else {
                break;
            }
        }
    }

    /// 结束 token 放在组内最后一个 token 之后、尾随的分隔与注释之前
    fn insert_choice_end(&mut self) {
        let tokens = &mut self.builder.tokens;
        let mut at = tokens.len();
        while at > 0
            && matches!(
                tokens[at - 1].tag(),
                TokenTag::Separator | TokenTag::Comment
            )
        {
            at -= 1;
        }
        let (to, line, indent) = at
            .checked_sub(1)
            .and_then(|i| tokens.get(i))
            .map(|t| (t.to, t.line, t.indent))
            .unwrap_or_default();
        tokens.insert(at, Token::new(TokenKind::ChoiceEnd, to, to, line, indent));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_compatibility() {
        use ValueType::*;
        assert!(assignment_compatible("=", Number, Number));
        assert!(!assignment_compatible("=", Number, String));
        assert!(assignment_compatible("+=", String, Number));
        assert!(assignment_compatible("-=", Number, Number));
        assert!(!assignment_compatible("-=", String, String));
        assert!(!assignment_compatible("*=", Boolean, Number));
    }
}
