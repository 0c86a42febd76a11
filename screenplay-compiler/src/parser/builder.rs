//! # 程序构建器
//!
//! 两遍遍历共享的可变状态：作用域路径、声明表、三张符号表、诊断、
//! token 流与元数据登记。遍历阶段负责识别行，声明登记、名称解析、
//! 表达式求值与诊断定位都集中在这里。
//!
//! ## 声明规则
//!
//! - section 在父作用域中声明，变量在所属 section 的作用域中声明，
//!   结构体统一登记在根作用域
//! - 从声明作用域沿祖先链可见的名称不能再次声明：先声明者保留，
//!   后声明者报错并附带跳转到原声明的快速修复
//! - 名称查找由内向外，返回第一个拥有该名称的作用域

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use string_interner::DefaultSymbol;
use tracing::{debug, trace};

use crate::config::CompilerConfig;
use crate::diagnostic::{Diagnostic, DiagnosticLevel, DiagnosticResult, QuickFix};
use crate::error::{CompileError, CompileResult};
use crate::eval::{EvalContext, Evaluation};
use crate::program::{
    ArgumentBinding, CallTarget, CharacterInfo, ColorLiteral, DeclarationKind, Field,
    FrontMatterEntry, FrontMatterPosition, LineInfo, Location, Metadata, ObjectMap,
    OutlineBuilder, PathId, Program, Reference, SceneInfo, ScopePaths, Section, SectionKind,
    Struct, Token, TokenTag, Variable, Visibility,
};
use crate::value::{Value, ValueType};

use super::helpers::{is_reserved, is_valid_identifier, split_args};
use super::lines::SourceLine;
use super::patterns::{Span, TargetShape};

/// 已登记的声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Declaration {
    pub kind: DeclarationKind,
    pub id: String,
    pub location: Option<Location>,
}

fn kind_label(kind: DeclarationKind) -> &'static str {
    match kind {
        DeclarationKind::Section => "section",
        DeclarationKind::Variable => "变量",
        DeclarationKind::Struct => "结构体",
    }
}

/// 随遍历移动的求值上下文
///
/// 只在作用域切换或声明变化时更新受影响的名称，不在每次求值时重建。
#[derive(Debug, Default)]
struct LiveContext {
    /// 尚未建立时为 None
    scope: Option<PathId>,
    context: EvalContext,
    /// 完整重建次数
    rebuilds: usize,
}

/// 程序构建器
pub(crate) struct ProgramBuilder<'c> {
    config: &'c CompilerConfig,
    line_offset: usize,
    pub paths: ScopePaths,
    declared: HashMap<(PathId, DefaultSymbol), Declaration>,
    pub sections: IndexMap<String, Section>,
    pub variables: IndexMap<String, Variable>,
    pub structs: IndexMap<String, Struct>,
    /// 基础结构体 → 直接派生的结构体
    derived: HashMap<String, Vec<String>>,
    live: LiveContext,
    pub diagnostics: DiagnosticResult,
    pub tokens: Vec<Token>,
    pub lines: Vec<LineInfo>,
    pub front_matter: BTreeMap<FrontMatterPosition, Vec<FrontMatterEntry>>,
    pub outline: OutlineBuilder,
    pub scenes: Vec<SceneInfo>,
    pub characters: IndexMap<String, CharacterInfo>,
    pub colors: Vec<ColorLiteral>,
}

impl<'c> ProgramBuilder<'c> {
    pub fn new(config: &'c CompilerConfig, lines: &[SourceLine<'_>]) -> Self {
        let line_offset = config.options.line_offset;
        let mut sections = IndexMap::new();
        sections.insert(String::new(), Section::root());
        Self {
            config,
            line_offset,
            paths: ScopePaths::new(),
            declared: HashMap::new(),
            sections,
            variables: IndexMap::new(),
            structs: IndexMap::new(),
            derived: HashMap::new(),
            live: LiveContext::default(),
            diagnostics: DiagnosticResult::new(),
            tokens: Vec::new(),
            lines: lines
                .iter()
                .map(|l| LineInfo {
                    indent: l.indent,
                    length: l.raw.len(),
                    ..LineInfo::default()
                })
                .collect(),
            front_matter: BTreeMap::new(),
            outline: OutlineBuilder::new(line_offset),
            scenes: Vec::new(),
            characters: IndexMap::new(),
            colors: Vec::new(),
        }
    }

    pub fn config(&self) -> &'c CompilerConfig {
        self.config
    }

    /// 文档内行号 → 输出行号
    pub fn abs_line(&self, index: usize) -> usize {
        index + self.line_offset
    }

    pub fn location(&self, line: &SourceLine<'_>, span: Span) -> Location {
        Location {
            line: self.abs_line(line.index),
            from: line.abs(span.from),
            to: line.abs(span.to),
        }
    }

    /// 以行内容区间定位并记录诊断
    pub fn report(&mut self, diagnostic: Diagnostic, line: &SourceLine<'_>, span: Span) {
        let diagnostic = diagnostic.with_span(
            self.abs_line(line.index),
            line.start,
            line.abs(span.from),
            line.abs(span.to),
        );
        self.diagnostics.push(diagnostic);
    }

    pub fn section_id(&self, path: PathId) -> String {
        self.paths.full_path(path)
    }

    // ---------------------------------------------------------------------
    // 声明
    // ---------------------------------------------------------------------

    fn find_declaration(&self, scope: PathId, name: &str) -> Option<&Declaration> {
        let symbol = self.paths.lookup_symbol(name)?;
        self.paths
            .ancestors(scope)
            .find_map(|p| self.declared.get(&(p, symbol)))
    }

    fn declare(&mut self, scope: PathId, name: &str, declaration: Declaration) {
        let symbol = self.paths.symbol(name);
        self.declared.insert((scope, symbol), declaration);
    }

    /// 检查名称能否在 `scope` 中声明，不能时记录错误
    pub fn check_name(
        &mut self,
        scope: PathId,
        name: &str,
        line: &SourceLine<'_>,
        span: Span,
    ) -> bool {
        if is_reserved(name) {
            self.report(
                Diagnostic::error(format!("'{}' 是保留字，不能用作名称", name)),
                line,
                span,
            );
            return false;
        }
        let Some(existing) = self.find_declaration(scope, name).cloned() else {
            return true;
        };

        trace!(name, existing = %existing.id, "拒绝重复声明");
        let mut diagnostic = Diagnostic::error(format!(
            "名称 '{}' 已被声明为{}",
            name,
            kind_label(existing.kind)
        ));
        if let Some(location) = existing.location {
            diagnostic = diagnostic.with_action(QuickFix::focus(
                "跳转到已有声明",
                location.line,
                location.from,
                location.to,
            ));
        }
        self.report(diagnostic, line, span);
        false
    }

    /// 在 `parent` 下登记 section（调用前须已通过检查）
    pub fn declare_section(
        &mut self,
        parent: PathId,
        name: &str,
        level: usize,
        kind: SectionKind,
        location: Location,
    ) -> PathId {
        let parent_id = self.paths.full_path(parent);
        let path = self.paths.child(parent, name);
        let id = self.paths.full_path(path);

        let mut section = Section::new(id.clone(), name, level, Some(parent_id.clone()), kind);
        section.location = Some(location);
        if let Some(parent) = self.sections.get_mut(&parent_id) {
            parent.children.push(id.clone());
        }
        self.sections.insert(id.clone(), section);
        self.declare(
            parent,
            name,
            Declaration {
                kind: DeclarationKind::Section,
                id,
                location: Some(location),
            },
        );
        path
    }

    /// 检查并登记 section 或 label 标题
    pub fn declare_heading(
        &mut self,
        parent: PathId,
        line: &SourceLine<'_>,
        name: Span,
        level: usize,
        kind: SectionKind,
    ) -> Option<PathId> {
        let text = name.text(line.content());
        if text.contains('.') {
            self.report(
                Diagnostic::error(format!("section 名称 '{}' 不能包含 '.'", text)),
                line,
                name,
            );
            return None;
        }
        if !self.check_name(parent, text, line, name) {
            return None;
        }
        let location = self.location(line, name);
        Some(self.declare_section(parent, text, level, kind, location))
    }

    /// 登记变量（调用前须已通过检查）
    pub fn declare_variable(&mut self, scope: PathId, variable: Variable) -> String {
        let id = variable.id.clone();
        if let Some(section) = self.sections.get_mut(&variable.section) {
            section.variables.insert(variable.name.clone(), id.clone());
            if variable.parameter {
                section.parameters.push(id.clone());
            }
        }
        self.declare(
            scope,
            &variable.name,
            Declaration {
                kind: DeclarationKind::Variable,
                id: id.clone(),
                location: variable.location,
            },
        );
        let name = variable.name.clone();
        self.variables.insert(id.clone(), variable);
        self.refresh_name(&name);
        id
    }

    /// 修改已登记的变量并同步求值上下文
    pub fn update_variable(&mut self, id: &str, update: impl FnOnce(&mut Variable)) {
        let Some(variable) = self.variables.get_mut(id) else {
            return;
        };
        update(variable);
        let name = variable.name.clone();
        self.refresh_name(&name);
    }

    /// 检查并登记 `var` 声明
    pub fn register_variable(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        name: Span,
        ty: Option<Span>,
        value: Option<Span>,
        visibility: Option<Visibility>,
    ) -> Option<String> {
        let content = line.content();
        let name_text = name.text(content);
        if !self.check_name(scope, name_text, line, name) {
            return None;
        }

        let annotated = ty.and_then(|span| {
            let text = span.text(content);
            let parsed = ValueType::from_annotation(text);
            if parsed.is_none() {
                self.report(Diagnostic::warn(format!("未知的类型 '{}'", text)), line, span);
            }
            parsed
        });

        let section = self.paths.full_path(scope);
        let mut variable = Variable::new(&section, name_text);
        variable.ty = annotated
            .or_else(|| value.and_then(|v| ValueType::infer_from_literal(v.text(content))));
        variable.expression = value.map(|v| v.text(content).to_string());
        variable.visibility = visibility.unwrap_or_default();
        variable.location = Some(self.location(line, name));
        Some(self.declare_variable(scope, variable))
    }

    /// 登记结构体（调用前须已通过检查）
    pub fn declare_struct(&mut self, st: Struct) {
        self.declare(
            PathId::ROOT,
            &st.name,
            Declaration {
                kind: DeclarationKind::Struct,
                id: st.name.clone(),
                location: st.location,
            },
        );
        if let Some(base) = &st.base {
            self.derived
                .entry(base.clone())
                .or_default()
                .push(st.name.clone());
        }
        let name = st.name.clone();
        let fields: Vec<String> = st.fields.keys().cloned().collect();
        self.structs.insert(name.clone(), st);
        for field in &fields {
            self.refresh_field(&name, field);
        }
    }

    /// 写入主遍历求得的字段值（只写入 `line` 行声明的那个字段）
    pub fn set_field_value(&mut self, name: &str, field: &str, line: usize, value: Option<Value>) {
        let Some(slot) = self
            .structs
            .get_mut(name)
            .and_then(|st| st.fields.get_mut(field))
        else {
            return;
        };
        if slot.location.is_none_or(|l| l.line != line) {
            return;
        }
        slot.value = value;
        self.refresh_field(name, field);
    }

    // ---------------------------------------------------------------------
    // 宿主注入
    // ---------------------------------------------------------------------

    /// 登记编译选项中预先注入的变量、结构体与文件素材
    pub fn augment(&mut self) {
        let config = self.config;
        let augmentations = &config.options.augmentations;

        for injected in &augmentations.variables {
            if !self.can_inject(&injected.name) {
                trace!(name = %injected.name, "跳过注入变量");
                continue;
            }
            let mut variable = Variable::new("", &injected.name);
            variable.ty = Some(injected.value.value_type());
            variable.value = Some(injected.value.clone());
            variable.visibility = injected.visibility;
            self.declare_variable(PathId::ROOT, variable);
        }

        for injected in &augmentations.structs {
            let mut st = Struct::new(&injected.name, &injected.ty);
            st.base = injected.base.clone();
            for (id, value) in &injected.fields {
                let field = injected_field(id, value.clone());
                st.fields.insert(field.id.clone(), field);
            }
            self.inject_struct(st);
        }

        for file in &augmentations.files {
            let path = Path::new(file);
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                trace!(file = %file, "素材路径没有文件名");
                continue;
            };
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_ascii_lowercase();
            let mut st = Struct::new(file_struct_name(stem), asset_type(&ext));
            for field in [
                injected_field(".src", Value::String(file.clone())),
                injected_field(".ext", Value::String(ext)),
            ] {
                st.fields.insert(field.id.clone(), field);
            }
            self.inject_struct(st);
        }

        debug!(
            variables = self.variables.len(),
            structs = self.structs.len(),
            "预先注入完成"
        );
    }

    fn can_inject(&self, name: &str) -> bool {
        is_valid_identifier(name)
            && !is_reserved(name)
            && self.find_declaration(PathId::ROOT, name).is_none()
    }

    fn inject_struct(&mut self, st: Struct) {
        if !self.can_inject(&st.name) {
            trace!(name = %st.name, "跳过注入结构体");
            return;
        }
        self.declare_struct(st);
    }

    // ---------------------------------------------------------------------
    // 名称解析
    // ---------------------------------------------------------------------

    /// 解析 section 路径：`.a.b` 为绝对路径，否则由内向外查找首段
    pub fn resolve_section(&self, scope: PathId, target: &str) -> Option<PathId> {
        if target.starts_with('.') {
            return self.paths.find_path(target);
        }
        let mut segments = target.split('.');
        let first = segments.next()?;
        let start = self
            .paths
            .ancestors(scope)
            .find_map(|p| self.paths.find_child(p, first))?;
        segments.try_fold(start, |current, segment| self.paths.find_child(current, segment))
    }

    fn variable_in(&self, path: PathId, name: &str) -> Option<&Variable> {
        let section = self.sections.get(&self.paths.full_path(path))?;
        self.variables.get(section.variables.get(name)?)
    }

    /// 解析变量：`name` 由内向外查找；`section.name` 先解析 section
    pub fn resolve_variable(&self, scope: PathId, name: &str) -> Option<&Variable> {
        match name.rsplit_once('.') {
            Some((section, variable)) => {
                let path = if section.is_empty() {
                    PathId::ROOT
                } else {
                    self.resolve_section(scope, section)?
                };
                self.variable_in(path, variable)
            }
            None => self
                .paths
                .ancestors(scope)
                .find_map(|p| self.variable_in(p, name)),
        }
    }

    /// 按 变量 → 结构体（字段）→ section 的顺序解析一个名称
    pub fn resolve_name(&self, scope: PathId, name: &str) -> Option<Declaration> {
        if let Some(variable) = self.resolve_variable(scope, name) {
            return Some(Declaration {
                kind: DeclarationKind::Variable,
                id: variable.id.clone(),
                location: variable.location,
            });
        }

        let (head, field) = match name.find('.') {
            Some(dot) => (&name[..dot], Some(&name[dot..])),
            None => (name, None),
        };
        if let Some(st) = self.structs.get(head) {
            let location = field
                .and_then(|f| st.fields.get(f))
                .and_then(|f| f.location)
                .or(st.location);
            return Some(Declaration {
                kind: DeclarationKind::Struct,
                id: st.name.clone(),
                location,
            });
        }

        self.resolve_section(scope, name).map(|path| {
            let id = self.paths.full_path(path);
            let location = self.sections.get(&id).and_then(|s| s.location);
            Declaration {
                kind: DeclarationKind::Section,
                id,
                location,
            }
        })
    }

    /// 最近的非普通 section（label 视为透明）
    pub fn enclosing_callable(&self, scope: PathId) -> Option<&Section> {
        self.paths
            .ancestors(scope)
            .filter_map(|p| self.sections.get(&self.paths.full_path(p)))
            .find(|s| s.kind != SectionKind::Section)
    }

    /// `from` 沿继承链能否到达 `target`
    pub fn inherits_from(&self, from: &str, target: &str) -> bool {
        let mut visited = HashSet::new();
        let mut current = Some(from);
        while let Some(name) = current {
            if name == target {
                return true;
            }
            if !visited.insert(name) {
                return false;
            }
            current = self.structs.get(name).and_then(|s| s.base.as_deref());
        }
        false
    }

    /// 结构体的叶子值（先继承基础结构体，再由自身覆盖）
    fn merged_fields<'a>(
        &'a self,
        name: &'a str,
        visited: &mut HashSet<&'a str>,
    ) -> IndexMap<String, Value> {
        let Some(st) = self.structs.get(name) else {
            return IndexMap::new();
        };
        if !visited.insert(name) {
            return IndexMap::new();
        }
        let mut values = st
            .base
            .as_deref()
            .map(|base| self.merged_fields(base, visited))
            .unwrap_or_default();
        for (id, value) in st.leaf_values() {
            values.insert(id.to_string(), value.clone());
        }
        values
    }

    /// 沿继承链取单个字段的值，自身优先
    fn inherited_value(&self, name: &str, field: &str) -> Option<Value> {
        let mut visited = HashSet::new();
        let mut current = Some(name);
        while let Some(name) = current {
            if !visited.insert(name) {
                return None;
            }
            let st = self.structs.get(name)?;
            if let Some(value) = st.fields.get(field).and_then(|f| f.value.as_ref()) {
                return Some(value.clone());
            }
            current = st.base.as_deref();
        }
        None
    }

    // ---------------------------------------------------------------------
    // 求值
    // ---------------------------------------------------------------------

    /// 完整构建 `scope` 可见的变量投影
    ///
    /// 结构体字段以 `name.field` 形式出现；内层变量覆盖外层同名变量。
    fn build_context(&self, scope: PathId) -> EvalContext {
        let mut context = EvalContext::new(self.paths.full_path(scope));
        for name in self.structs.keys() {
            let mut visited = HashSet::new();
            for (field, value) in self.merged_fields(name, &mut visited) {
                context.values.insert(format!("{}{}", name, field), value);
            }
        }

        let chain: Vec<PathId> = self.paths.ancestors(scope).collect();
        for path in chain.into_iter().rev() {
            let Some(section) = self.sections.get(&self.paths.full_path(path)) else {
                continue;
            };
            for (name, id) in &section.variables {
                if let Some(variable) = self.variables.get(id) {
                    context.values.insert(name.clone(), variable.context_value());
                }
            }
        }
        context
    }

    /// 把求值上下文移动到 `scope`
    ///
    /// 首次使用时完整构建；之后只重新投影离开与进入的 section 中声明的名称。
    fn enter_context(&mut self, scope: PathId) {
        let Some(current) = self.live.scope else {
            self.live.context = self.build_context(scope);
            self.live.scope = Some(scope);
            self.live.rebuilds += 1;
            return;
        };
        if current == scope {
            return;
        }

        let left: Vec<PathId> = self.paths.ancestors(current).collect();
        let entered: Vec<PathId> = self.paths.ancestors(scope).collect();
        let names: Vec<String> = left
            .iter()
            .filter(|p| !entered.contains(p))
            .chain(entered.iter().filter(|p| !left.contains(p)))
            .filter_map(|&p| self.sections.get(&self.paths.full_path(p)))
            .flat_map(|section| section.variables.keys().cloned())
            .collect();

        self.live.scope = Some(scope);
        self.live.context.section = self.paths.full_path(scope);
        for name in &names {
            self.refresh_name(name);
        }
    }

    /// 按当前上下文作用域重新投影一个变量名
    fn refresh_name(&mut self, name: &str) {
        let Some(scope) = self.live.scope else {
            return;
        };
        match self.resolve_variable(scope, name).map(Variable::context_value) {
            Some(value) => {
                self.live.context.values.insert(name.to_string(), value);
            }
            None => {
                self.live.context.values.swap_remove(name);
            }
        }
    }

    /// 重新投影结构体字段，派生结构体随之更新
    fn refresh_field(&mut self, name: &str, field: &str) {
        if self.live.scope.is_none() {
            return;
        }
        let mut pending = vec![name.to_string()];
        let mut seen = HashSet::new();
        while let Some(current) = pending.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let key = format!("{}{}", current, field);
            match self.inherited_value(&current, field) {
                Some(value) => {
                    self.live.context.values.insert(key, value);
                }
                None => {
                    self.live.context.values.swap_remove(&key);
                }
            }
            if let Some(children) = self.derived.get(&current) {
                pending.extend(children.iter().cloned());
            }
        }
    }

    /// 用表达式求值器检查行内容中的一段表达式
    pub fn evaluate(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        span: Span,
    ) -> CompileResult<Option<Value>> {
        self.enter_context(scope);
        let config = self.config;
        let evaluation = config
            .evaluator
            .evaluate(span.text(line.content()), &self.live.context)
            .map_err(|source| CompileError::Evaluator {
                line: self.abs_line(line.index),
                source,
            })?;
        Ok(self.absorb(scope, line, span.from, evaluation))
    }

    /// 用字符串格式化器检查行内容中的一段文本
    pub fn format(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        span: Span,
    ) -> CompileResult<Option<Value>> {
        self.enter_context(scope);
        let config = self.config;
        let evaluation = config
            .formatter
            .format(span.text(line.content()), &self.live.context)
            .map_err(|source| CompileError::Formatter {
                line: self.abs_line(line.index),
                source,
            })?;
        Ok(self.absorb(scope, line, span.from, evaluation))
    }

    /// 把回调结果中的诊断与引用换算到文档位置
    fn absorb(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        base: usize,
        evaluation: Evaluation,
    ) -> Option<Value> {
        for d in evaluation.diagnostics {
            let d = d.shifted(base);
            let diagnostic = match d.level {
                DiagnosticLevel::Error => Diagnostic::error(d.message),
                DiagnosticLevel::Warn => Diagnostic::warn(d.message),
                DiagnosticLevel::Info => Diagnostic::info(d.message),
            };
            self.report(diagnostic, line, Span::new(d.from, d.to));
        }
        for r in evaluation.references {
            let r = r.shifted(base);
            let resolved = self.resolve_name(scope, &r.name);
            self.add_reference(line, r.name, Span::new(r.from, r.to), resolved);
        }
        evaluation.value
    }

    /// 记录一处名称引用
    pub fn add_reference(
        &mut self,
        line: &SourceLine<'_>,
        name: impl Into<String>,
        span: Span,
        resolved: Option<Declaration>,
    ) {
        let reference = Reference {
            name: name.into(),
            from: line.abs(span.from),
            to: line.abs(span.to),
            kind: resolved.as_ref().map(|d| d.kind),
            id: resolved.as_ref().map(|d| d.id.clone()),
            location: resolved.and_then(|d| d.location),
        };
        if let Some(info) = self.lines.get_mut(line.index) {
            info.references.push(reference);
        }
    }

    /// 解析跳转 / 调用目标并绑定实参
    pub fn resolve_target(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        shape: &TargetShape,
    ) -> CompileResult<CallTarget> {
        let name = shape.name.text(line.content());
        let mut target = CallTarget {
            name: name.to_string(),
            ..CallTarget::default()
        };

        let mut callee = None;
        if shape.dynamic {
            target.dynamic = true;
            self.format(scope, line, shape.name)?;
        } else {
            match self.resolve_section(scope, name) {
                Some(path) => {
                    let id = self.paths.full_path(path);
                    let location = self.sections.get(&id).and_then(|s| s.location);
                    self.add_reference(
                        line,
                        name,
                        shape.name,
                        Some(Declaration {
                            kind: DeclarationKind::Section,
                            id: id.clone(),
                            location,
                        }),
                    );
                    target.section = Some(id.clone());
                    callee = Some(id);
                }
                None => {
                    self.report(
                        Diagnostic::error(format!("未定义的跳转目标 '{}'", name)),
                        line,
                        shape.name,
                    );
                    self.add_reference(line, name, shape.name, None);
                }
            }
        }

        target.arguments = self.bind_arguments(scope, line, shape, callee.as_deref())?;
        Ok(target)
    }

    /// 求值实参并按位置与目标的形参绑定
    fn bind_arguments(
        &mut self,
        scope: PathId,
        line: &SourceLine<'_>,
        shape: &TargetShape,
        callee: Option<&str>,
    ) -> CompileResult<Vec<ArgumentBinding>> {
        let content = line.content();
        let mut values = Vec::new();
        if let Some(inner) = shape.arguments {
            for arg in split_args(inner.text(content)) {
                let span = Span::new(inner.from + arg.from, inner.from + arg.to());
                if arg.text.is_empty() {
                    self.report(Diagnostic::error("实参列表中有空项"), line, span);
                    values.push((String::new(), None));
                    continue;
                }
                let value = self.evaluate(scope, line, span)?;
                values.push((arg.text.to_string(), value));
            }
        }

        let Some(section) = callee.and_then(|id| self.sections.get(id)) else {
            return Ok(Vec::new());
        };
        let section_name = section.name.clone();
        let parameters = section.parameters.clone();
        let required = parameters
            .iter()
            .filter(|id| {
                self.variables
                    .get(*id)
                    .is_some_and(|v| v.expression.is_none())
            })
            .count();

        if values.len() > parameters.len() || values.len() < required {
            let expected = if required == parameters.len() {
                required.to_string()
            } else {
                format!("{}~{}", required, parameters.len())
            };
            self.report(
                Diagnostic::error(format!(
                    "'{}' 需要 {} 个参数，实际为 {} 个",
                    section_name,
                    expected,
                    values.len()
                )),
                line,
                shape.argument_list.unwrap_or(shape.name),
            );
        }

        Ok(parameters
            .into_iter()
            .zip(values)
            .map(|(parameter, (expression, value))| ArgumentBinding {
                parameter,
                expression,
                value,
            })
            .collect())
    }

    // ---------------------------------------------------------------------
    // 收尾
    // ---------------------------------------------------------------------

    /// 每个 section 自身拥有的 token 区间
    fn assign_token_ranges(&mut self) {
        for (index, token) in self.tokens.iter().enumerate() {
            let Some(info) = token
                .line
                .checked_sub(self.line_offset)
                .and_then(|local| self.lines.get(local))
            else {
                continue;
            };
            if let Some(section) = self.sections.get_mut(&info.section) {
                if section.tokens.is_empty() {
                    section.tokens = index..index + 1;
                } else {
                    section.tokens.end = index + 1;
                }
            }
        }
    }

    /// 类型 → 结构体名 → 字段值（已合并继承）
    fn object_map(&self) -> ObjectMap {
        let mut objects = ObjectMap::new();
        for st in self.structs.values() {
            let mut visited = HashSet::new();
            let values = self.merged_fields(&st.name, &mut visited);
            objects
                .entry(st.ty.clone())
                .or_default()
                .insert(st.name.clone(), values);
        }
        objects
    }

    /// 生成最终的 [`Program`]
    pub fn finish(mut self, parse_duration: Duration) -> Program {
        while self
            .tokens
            .last()
            .is_some_and(|t| t.tag() == TokenTag::Separator)
        {
            self.tokens.pop();
        }
        let config = self.config;
        let omit = &config.options.omit;
        if !omit.is_empty() {
            self.tokens.retain(|t| !omit.contains(&t.tag()));
        }

        self.assign_token_ranges();
        let objects = self.object_map();
        let last_line = self.abs_line(self.lines.len().saturating_sub(1));
        let structure = self.outline.finish(last_line, &self.diagnostics);

        debug!(
            tokens = self.tokens.len(),
            sections = self.sections.len(),
            variables = self.variables.len(),
            structs = self.structs.len(),
            context_rebuilds = self.live.rebuilds,
            errors = self.diagnostics.error_count(),
            warnings = self.diagnostics.warn_count(),
            "解析完成"
        );

        Program {
            tokens: self.tokens,
            sections: self.sections,
            variables: self.variables,
            structs: self.structs,
            diagnostics: self.diagnostics.into(),
            front_matter: self.front_matter,
            metadata: Metadata {
                lines: self.lines,
                structure,
                scenes: self.scenes,
                characters: self.characters,
                colors: self.colors,
                parse_duration,
                objects,
            },
            line_offset: self.line_offset,
        }
    }
}

/// 注入字段（id 缺少前导 `.` 时补上）
fn injected_field(id: &str, value: Value) -> Field {
    let id = if id.starts_with('.') {
        id.to_string()
    } else {
        format!(".{}", id)
    };
    let name = id.rsplit('.').next().unwrap_or_default().to_string();
    Field {
        array_entry: name.parse::<usize>().is_ok(),
        value_text: value.to_string(),
        value: Some(value),
        explicit: true,
        location: None,
        id,
        name,
    }
}

/// 文件名 → 结构体名：非标识符字符替换为 `_`
fn file_struct_name(stem: &str) -> String {
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if !name.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        name.insert(0, '_');
    }
    name
}

/// 根据扩展名决定素材类型
fn asset_type(ext: &str) -> &'static str {
    match ext {
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "svg" => "image",
        "mp3" | "wav" | "ogg" | "flac" | "m4a" => "audio",
        "mp4" | "webm" | "mov" | "mkv" => "video",
        "txt" | "md" | "json" => "text",
        _ => "file",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::lines::split_lines;
    use crate::parser::{phase1, phase2};

    /// 走完两遍遍历但保留构建器
    fn run_passes<'c>(config: &'c CompilerConfig, lines: &[SourceLine<'_>]) -> ProgramBuilder<'c> {
        let mut builder = ProgramBuilder::new(config, lines);
        builder.augment();
        let hoisted = phase1::hoist(&mut builder, lines);
        phase2::run(&mut builder, lines, &hoisted).unwrap();
        builder
    }

    #[test]
    fn test_context_is_built_once_and_follows_scope() {
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!("@item it{i}:\n    power: {i}\n    weight: 2\n\n"));
        }
        text.push_str("@item blade(it3):\n    weight: 9\n\n");
        for section in 0..10 {
            text.push_str(&format!("# S{section}\nvar local = {section}\n"));
            for i in 0..10 {
                text.push_str(&format!("var v{section}_{i} = it{i}.power + local\n"));
            }
            text.push('\n');
        }
        text.push_str("# Forge\nvar forged = blade.power * blade.weight");

        let config = CompilerConfig::default();
        let lines = split_lines(&text);
        let builder = run_passes(&config, &lines);

        assert!(builder.diagnostics.is_empty(), "{:?}", builder.diagnostics);
        assert_eq!(builder.live.rebuilds, 1);
        let scope = builder.live.scope.unwrap();
        assert_eq!(builder.section_id(scope), ".Forge");
        assert_eq!(builder.live.context, builder.build_context(scope));

        assert_eq!(builder.variables[".S0.v0_1"].value, Some(Value::Number(1.0)));
        assert_eq!(builder.variables[".S9.v9_1"].value, Some(Value::Number(10.0)));
        assert_eq!(builder.variables[".Forge.forged"].value, Some(Value::Number(27.0)));
    }

    #[test]
    fn test_file_struct_name() {
        assert_eq!(file_struct_name("bg-forest"), "bg_forest");
        assert_eq!(file_struct_name("01 theme"), "_01_theme");
        assert_eq!(asset_type("ogg"), "audio");
        assert_eq!(asset_type("xyz"), "file");
    }

    #[test]
    fn test_declaration_collision_walks_ancestors() {
        let config = CompilerConfig::default();
        let lines = split_lines("# A\n## hp\nvar hp = 1");
        let mut builder = ProgramBuilder::new(&config, &lines);

        let a = builder
            .declare_heading(PathId::ROOT, &lines[0], Span::new(2, 3), 1, SectionKind::Section)
            .unwrap();
        assert_eq!(builder.section_id(a), ".A");

        // 在根作用域声明变量 hp，之后在 .A 中声明同名 section 会冲突
        let hp = builder.register_variable(
            PathId::ROOT,
            &lines[2],
            Span::new(4, 6),
            None,
            Some(Span::new(9, 10)),
            None,
        );
        assert_eq!(hp.as_deref(), Some(".hp"));
        let nested = builder.declare_heading(a, &lines[1], Span::new(3, 5), 2, SectionKind::Section);
        assert!(nested.is_none());
        assert_eq!(builder.diagnostics.error_count(), 1);
        assert_eq!(builder.diagnostics.diagnostics[0].actions.len(), 1);
    }

    #[test]
    fn test_resolution_order() {
        let config = CompilerConfig::default();
        let lines = split_lines("# A\n## B\n# C");
        let mut builder = ProgramBuilder::new(&config, &lines);
        let a = builder
            .declare_heading(PathId::ROOT, &lines[0], Span::new(2, 3), 1, SectionKind::Section)
            .unwrap();
        let b = builder
            .declare_heading(a, &lines[1], Span::new(3, 4), 2, SectionKind::Section)
            .unwrap();
        let c = builder
            .declare_heading(PathId::ROOT, &lines[2], Span::new(2, 3), 1, SectionKind::Section)
            .unwrap();

        assert_eq!(builder.resolve_section(c, "A.B"), Some(b));
        assert_eq!(builder.resolve_section(b, "C"), Some(c));
        assert_eq!(builder.resolve_section(c, ".A.B"), Some(b));
        assert_eq!(builder.resolve_section(c, "B"), None);
    }
}
