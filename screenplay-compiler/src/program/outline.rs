//! # 大纲
//!
//! 文档结构树（section / label / scene），以扁平数组保存，节点之间用下标互相引用。
//! `structure[0]` 是覆盖全部行的文档根节点。
//!
//! 区间在解析过程中只向前推进：新节点出现时，所有层级不浅于它的已打开节点
//! 在新节点前一行结束，因此同级区间连续且互不重叠。

use serde::{Deserialize, Serialize};

use crate::diagnostic::{DiagnosticLevel, DiagnosticResult};

/// 大纲节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlineKind {
    Root,
    Section,
    Label,
    Scene,
}

/// 大纲节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub kind: OutlineKind,
    /// 嵌套层级（根为 0）
    pub level: usize,
    /// 显示文本
    pub text: String,
    /// 对应的 section id（scene 与被拒绝的标题为 None）
    pub section: Option<String>,
    /// 声明所在行
    pub line: usize,
    /// 区间首行（含）
    pub start: usize,
    /// 区间末行（含）
    pub end: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// 区间内最严重的诊断级别
    pub severity: Option<DiagnosticLevel>,
}

impl OutlineNode {
    pub fn contains(&self, line: usize) -> bool {
        self.start <= line && line <= self.end
    }
}

/// 大纲构建器
///
/// 维护一个打开节点栈，栈底始终是根节点。
#[derive(Debug)]
pub(crate) struct OutlineBuilder {
    nodes: Vec<OutlineNode>,
    open: Vec<usize>,
}

impl OutlineBuilder {
    pub fn new(first_line: usize) -> Self {
        let root = OutlineNode {
            kind: OutlineKind::Root,
            level: 0,
            text: String::new(),
            section: Some(String::new()),
            line: first_line,
            start: first_line,
            end: first_line,
            parent: None,
            children: Vec::new(),
            severity: None,
        };
        Self {
            nodes: vec![root],
            open: vec![0],
        }
    }

    /// 在 `line` 行打开一个新节点
    ///
    /// 层级不浅于 `level` 的已打开节点在 `line - 1` 处结束。
    pub fn open(
        &mut self,
        kind: OutlineKind,
        level: usize,
        text: impl Into<String>,
        section: Option<String>,
        line: usize,
    ) -> usize {
        let level = level.max(1);
        while let Some(&top) = self.open.last() {
            if top == 0 || self.nodes[top].level < level {
                break;
            }
            self.nodes[top].end = line.saturating_sub(1).max(self.nodes[top].start);
            self.open.pop();
        }

        let parent = self.open.last().copied().unwrap_or(0);
        let index = self.nodes.len();
        self.nodes.push(OutlineNode {
            kind,
            level,
            text: text.into(),
            section,
            line,
            start: line,
            end: line,
            parent: Some(parent),
            children: Vec::new(),
            severity: None,
        });
        self.nodes[parent].children.push(index);
        self.open.push(index);
        self.extend_to(line);
        index
    }

    /// 将所有打开节点的区间推进到 `line`
    pub fn extend_to(&mut self, line: usize) {
        for &i in &self.open {
            if self.nodes[i].end < line {
                self.nodes[i].end = line;
            }
        }
    }

    /// 关闭所有节点并计算诊断级别汇总
    pub fn finish(mut self, last_line: usize, diagnostics: &DiagnosticResult) -> Vec<OutlineNode> {
        self.extend_to(last_line);
        for node in &mut self.nodes {
            node.severity = diagnostics.worst_in_lines(node.start, node.end);
        }
        self.nodes
    }
}
