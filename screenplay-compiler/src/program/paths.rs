//! # 作用域路径
//!
//! section 的点分路径以"段 + 父指针"的形式驻留，查找祖先链时只需沿父指针
//! 走，不必反复拼接、切分字符串。完整路径字符串仅在需要输出时生成。
//!
//! 与全局驻留器不同，每次解析拥有自己的 [`ScopePaths`]，不存在跨调用共享的状态。

use std::collections::HashMap;

use string_interner::{DefaultStringInterner, DefaultSymbol};

/// 路径句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(u32);

impl PathId {
    /// 根作用域（空路径）
    pub const ROOT: PathId = PathId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct PathNode {
    parent: Option<PathId>,
    segment: Option<DefaultSymbol>,
}

/// 驻留的作用域路径集合
#[derive(Debug)]
pub struct ScopePaths {
    interner: DefaultStringInterner,
    nodes: Vec<PathNode>,
    children: HashMap<(PathId, DefaultSymbol), PathId>,
}

impl Default for ScopePaths {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopePaths {
    pub fn new() -> Self {
        Self {
            interner: DefaultStringInterner::new(),
            nodes: vec![PathNode {
                parent: None,
                segment: None,
            }],
            children: HashMap::new(),
        }
    }

    /// 驻留一个名称
    pub fn symbol(&mut self, name: &str) -> DefaultSymbol {
        self.interner.get_or_intern(name)
    }

    /// 查找已驻留的名称（未驻留说明任何作用域里都不存在该名称）
    pub fn lookup_symbol(&self, name: &str) -> Option<DefaultSymbol> {
        self.interner.get(name)
    }

    pub fn resolve_symbol(&self, symbol: DefaultSymbol) -> &str {
        self.interner.resolve(symbol).unwrap_or_default()
    }

    /// 获取或创建子路径
    pub fn child(&mut self, parent: PathId, name: &str) -> PathId {
        let symbol = self.symbol(name);
        if let Some(&id) = self.children.get(&(parent, symbol)) {
            return id;
        }
        let id = PathId(self.nodes.len() as u32);
        self.nodes.push(PathNode {
            parent: Some(parent),
            segment: Some(symbol),
        });
        self.children.insert((parent, symbol), id);
        id
    }

    /// 查找已存在的子路径
    pub fn find_child(&self, parent: PathId, name: &str) -> Option<PathId> {
        let symbol = self.lookup_symbol(name)?;
        self.children.get(&(parent, symbol)).copied()
    }

    pub fn parent(&self, id: PathId) -> Option<PathId> {
        self.nodes.get(id.index()).and_then(|n| n.parent)
    }

    /// 从自身到根的祖先链（含自身，由内向外）
    pub fn ancestors(&self, id: PathId) -> impl Iterator<Item = PathId> + '_ {
        std::iter::successors(Some(id), move |&current| self.parent(current))
    }

    /// 完整路径字符串，根为空串
    pub fn full_path(&self, id: PathId) -> String {
        let mut segments: Vec<&str> = self
            .ancestors(id)
            .filter_map(|p| self.nodes[p.index()].segment)
            .map(|s| self.resolve_symbol(s))
            .collect();
        segments.reverse();
        segments.iter().map(|s| format!(".{}", s)).collect()
    }

    /// 由完整路径字符串反查句柄
    pub fn find_path(&self, path: &str) -> Option<PathId> {
        path.split('.')
            .filter(|s| !s.is_empty())
            .try_fold(PathId::ROOT, |current, segment| self.find_child(current, segment))
    }

    pub fn name(&self, id: PathId) -> &str {
        self.nodes[id.index()]
            .segment
            .map(|s| self.resolve_symbol(s))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_empty_path() {
        let paths = ScopePaths::new();
        assert_eq!(paths.full_path(PathId::ROOT), "");
        assert_eq!(paths.find_path(""), Some(PathId::ROOT));
    }

    #[test]
    fn test_child_is_interned() {
        let mut paths = ScopePaths::new();
        let a = paths.child(PathId::ROOT, "chapter1");
        let b = paths.child(a, "sceneA");
        assert_eq!(paths.child(PathId::ROOT, "chapter1"), a);
        assert_eq!(paths.full_path(b), ".chapter1.sceneA");
        assert_eq!(paths.find_path(".chapter1.sceneA"), Some(b));
        assert_eq!(paths.name(b), "sceneA");
    }

    #[test]
    fn test_ancestors_innermost_first() {
        let mut paths = ScopePaths::new();
        let a = paths.child(PathId::ROOT, "a");
        let b = paths.child(a, "b");
        let chain: Vec<_> = paths.ancestors(b).collect();
        assert_eq!(chain, vec![b, a, PathId::ROOT]);
    }

    #[test]
    fn test_find_child_unknown_name() {
        let paths = ScopePaths::new();
        assert_eq!(paths.find_child(PathId::ROOT, "nope"), None);
        assert_eq!(paths.find_path(".nope"), None);
    }
}
