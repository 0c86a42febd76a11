//! # 阶段 1：声明提升
//!
//! 只登记声明，不产生 token：front matter 区域、行扩展、section 与 label 标题、
//! 顶层变量和结构体。每行所属的作用域也在这一遍确定，
//! 因此阶段 2 中向前引用的跳转与变量都能被解析。
//!
//! 声明相关的诊断只在这一遍产生，阶段 2 不会重复报告。

use std::collections::HashMap;

use tracing::debug;

use crate::config::{ExtensionLine, ExtensionMatch};
use crate::diagnostic::{Diagnostic, QuickFix};
use crate::program::{Field, LineScope, PathId, SectionKind, Struct, Variable};
use crate::value::ValueType;

use super::blocks::{
    FieldLine, FrontMatterBlock, parse_struct_fields, recognize_front_matter, struct_body_end,
};
use super::builder::ProgramBuilder;
use super::line_context;
use super::lines::SourceLine;
use super::params::{ParamList, parse_params};
use super::patterns::{Matched, SectionShape, Span, classify};

/// 行在阶段 1 中被认定的角色
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum LineRole {
    #[default]
    Body,
    FrontMatter,
    /// 结构体声明之后的字段行
    StructField,
    /// 被行扩展接管
    Extension,
}

/// 标题（section / label）的提升结果
#[derive(Debug, Clone)]
pub(crate) struct HeadingDecl {
    /// 注册成功时的路径
    pub path: Option<PathId>,
    /// 修正后的层级
    pub level: usize,
    pub params: ParamList,
}

/// 结构体的提升结果
#[derive(Debug, Clone)]
pub(crate) struct StructDecl {
    pub registered: bool,
    pub fields: Vec<FieldLine>,
}

/// 阶段 1 输出
#[derive(Debug, Default)]
pub(crate) struct Hoisted {
    pub roles: Vec<LineRole>,
    /// 每行所属的作用域
    pub scopes: Vec<PathId>,
    pub front_matter: Option<FrontMatterBlock>,
    pub headings: HashMap<usize, HeadingDecl>,
    /// 顶层 `var` 行 → 注册成功的变量 id
    pub variables: HashMap<usize, Option<String>>,
    pub structs: HashMap<usize, StructDecl>,
    pub extensions: HashMap<usize, ExtensionMatch>,
}

#[derive(Debug, Clone, Copy)]
struct OpenHeading {
    level: usize,
    /// 标题被拒绝时沿用父作用域
    path: PathId,
    kind: SectionKind,
    /// 最近的 function / detector 祖先（含自身）
    callable: Option<SectionKind>,
}

impl OpenHeading {
    const ROOT: Self = Self {
        level: 0,
        path: PathId::ROOT,
        kind: SectionKind::Section,
        callable: None,
    };
}

struct Hoister<'p, 'c, 'l> {
    builder: &'p mut ProgramBuilder<'c>,
    lines: &'p [SourceLine<'l>],
    hoisted: Hoisted,
    headings: Vec<OpenHeading>,
    label: Option<PathId>,
}

/// 执行声明提升
pub(crate) fn hoist(builder: &mut ProgramBuilder<'_>, lines: &[SourceLine<'_>]) -> Hoisted {
    let mut hoister = Hoister {
        builder,
        lines,
        hoisted: Hoisted {
            roles: vec![LineRole::Body; lines.len()],
            scopes: vec![PathId::ROOT; lines.len()],
            ..Hoisted::default()
        },
        headings: Vec::new(),
        label: None,
    };
    hoister.run();

    let Hoister {
        builder, hoisted, ..
    } = hoister;
    for (index, scope) in hoisted.scopes.iter().enumerate() {
        let section = builder.section_id(*scope);
        let info = &mut builder.lines[index];
        info.section = section;
        info.scope = match hoisted.roles[index] {
            LineRole::FrontMatter => LineScope::FrontMatter,
            LineRole::StructField => LineScope::Struct,
            _ => LineScope::Body,
        };
    }

    debug!(
        sections = builder.sections.len(),
        variables = builder.variables.len(),
        structs = builder.structs.len(),
        "声明提升完成"
    );
    hoisted
}

impl Hoister<'_, '_, '_> {
    fn current_scope(&self) -> PathId {
        self.label
            .or_else(|| self.headings.last().map(|h| h.path))
            .unwrap_or(PathId::ROOT)
    }

    fn run(&mut self) {
        let lines = self.lines;
        let mut index = 0;

        if let Some(block) = recognize_front_matter(lines) {
            for role in &mut self.hoisted.roles[..block.end] {
                *role = LineRole::FrontMatter;
            }
            index = block.end;
            self.hoisted.front_matter = Some(block);
        }

        while index < lines.len() {
            let line = &lines[index];
            self.hoisted.scopes[index] = self.current_scope();
            if line.is_blank() {
                index += 1;
                continue;
            }

            let extension = ExtensionLine {
                line: self.builder.abs_line(index),
                text: line.raw,
                content: line.content(),
                indent: line.indent,
            };
            if let Some(matched) = self.builder.config().classify_extension(&extension) {
                self.hoisted.roles[index] = LineRole::Extension;
                self.hoisted.extensions.insert(index, matched);
                index += 1;
                continue;
            }

            match classify(line.content(), &line_context(lines, index)) {
                Some(Matched::Section(shape)) => {
                    self.heading(line, &shape);
                    self.hoisted.scopes[index] = self.current_scope();
                }
                Some(Matched::Label { name }) => {
                    self.label(line, name);
                    self.hoisted.scopes[index] = self.current_scope();
                }
                Some(Matched::Variable {
                    visibility,
                    name,
                    ty,
                    value,
                }) if line.indent == 0 => {
                    let scope = self.current_scope();
                    let id = self
                        .builder
                        .register_variable(scope, line, name, ty, value, visibility);
                    self.hoisted.variables.insert(index, id);
                }
                Some(Matched::Struct { ty, name, base }) => {
                    index = self.structure(line, ty, name, base);
                    continue;
                }
                _ => {}
            }
            index += 1;
        }
    }

    fn heading(&mut self, line: &SourceLine<'_>, shape: &SectionShape) {
        let content = line.content();
        let name = shape.name.text(content);
        let params = parse_params(content, shape);

        self.label = None;
        while self.headings.last().is_some_and(|h| h.level >= shape.level) {
            self.headings.pop();
        }
        let parent = self.headings.last().copied().unwrap_or(OpenHeading::ROOT);

        let mut level = shape.level;
        if level > parent.level + 1 {
            let fixed = parent.level + 1;
            let fix = QuickFix::edit(
                format!("改为 {} 级标题", fixed),
                line.abs(shape.marks.from),
                line.abs(shape.marks.to),
                "#".repeat(fixed),
            );
            self.builder.report(
                Diagnostic::warn(format!("标题层级从 {} 级跳到了 {} 级", parent.level, level))
                    .with_action(fix),
                line,
                shape.marks,
            );
            level = fixed;
        }

        for issue in &params.issues {
            self.builder
                .report(Diagnostic::error(issue.message.clone()), line, issue.span);
        }

        if let Some(callable) = parent.callable
            && params.kind != SectionKind::Function
        {
            self.builder.report(
                Diagnostic::error(format!(
                    "{} 内只能嵌套 function，'{}' 是 {}",
                    callable, name, params.kind
                )),
                line,
                shape.name,
            );
        }

        let path = self
            .builder
            .declare_heading(parent.path, line, shape.name, level, params.kind);
        if let Some(path) = path {
            self.signature(line, shape, &params, path);
        }

        let kind = if path.is_some() {
            params.kind
        } else {
            parent.kind
        };
        self.headings.push(OpenHeading {
            level,
            path: path.unwrap_or(parent.path),
            kind,
            callable: match kind {
                SectionKind::Function | SectionKind::Detector => Some(kind),
                _ => parent.callable,
            },
        });
        self.hoisted
            .headings
            .insert(line.index, HeadingDecl { path, level, params });
    }

    /// 登记返回类型、形参与触发变量
    fn signature(
        &mut self,
        line: &SourceLine<'_>,
        shape: &SectionShape,
        params: &ParamList,
        path: PathId,
    ) {
        let content = line.content();
        let section_id = self.builder.section_id(path);

        if let Some(span) = shape.return_type {
            let text = span.text(content);
            if ValueType::from_annotation(text).is_none() {
                self.builder
                    .report(Diagnostic::warn(format!("未知的返回类型 '{}'", text)), line, span);
            }
            if let Some(section) = self.builder.sections.get_mut(&section_id) {
                section.return_type = Some(text.to_string());
            }
        }

        for spec in &params.params {
            if !self
                .builder
                .check_name(path, &spec.name, line, spec.name_span)
            {
                continue;
            }
            let mut variable = Variable::new(&section_id, &spec.name);
            variable.parameter = true;
            variable.expression = spec.default.as_ref().map(|(text, _)| text.clone());
            variable.ty = spec
                .default
                .as_ref()
                .and_then(|(text, _)| ValueType::infer_from_literal(text));
            variable.location = Some(self.builder.location(line, spec.name_span));
            self.builder.declare_variable(path, variable);
        }

        if let Some(section) = self.builder.sections.get_mut(&section_id) {
            section.triggers = params.triggers.iter().map(|(n, _)| n.clone()).collect();
        }
    }

    fn label(&mut self, line: &SourceLine<'_>, name: Span) {
        self.label = None;
        let (parent_level, parent_path) = self
            .headings
            .last()
            .map(|h| (h.level, h.path))
            .unwrap_or((0, PathId::ROOT));
        let level = parent_level + 1;
        let path = self
            .builder
            .declare_heading(parent_path, line, name, level, SectionKind::Section);
        self.label = path;
        self.hoisted.headings.insert(
            line.index,
            HeadingDecl {
                path,
                level,
                params: ParamList::default(),
            },
        );
    }

    /// 登记结构体，返回字段体之后的行
    fn structure(
        &mut self,
        line: &SourceLine<'_>,
        ty: Span,
        name: Span,
        base: Option<Span>,
    ) -> usize {
        let lines = self.lines;
        let scope = self.current_scope();
        let content = line.content();
        let end = struct_body_end(lines, line.index);
        let fields = parse_struct_fields(lines, line.index, end);

        let name_text = name.text(content);
        let registered = self.builder.check_name(scope, name_text, line, name);
        if registered {
            let mut st = Struct::new(name_text, ty.text(content));
            st.base = base.map(|b| b.text(content).to_string());
            st.location = Some(self.builder.location(line, name));
            for field in &fields {
                let field_line = &lines[field.line];
                let location = self.builder.location(field_line, field.name_span);
                if let Some(existing) = st.fields.get(&field.id).and_then(|f| f.location) {
                    self.builder.report(
                        Diagnostic::error(format!("字段 '{}' 重复", field.id)).with_action(
                            QuickFix::focus("跳转到已有字段", existing.line, existing.from, existing.to),
                        ),
                        field_line,
                        field.name_span,
                    );
                    continue;
                }
                st.fields.insert(
                    field.id.clone(),
                    Field {
                        id: field.id.clone(),
                        name: field.name.clone(),
                        value_text: field
                            .value
                            .as_ref()
                            .map(|(text, _)| text.clone())
                            .unwrap_or_default(),
                        value: None,
                        array_entry: field.array_entry,
                        explicit: field.explicit,
                        location: Some(location),
                    },
                );
            }
            self.builder.declare_struct(st);
        }

        for index in line.index + 1..end {
            self.hoisted.roles[index] = LineRole::StructField;
            self.hoisted.scopes[index] = scope;
        }
        self.hoisted
            .structs
            .insert(line.index, StructDecl { registered, fields });
        end
    }
}
