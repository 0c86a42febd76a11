//! # 物理行
//!
//! 把文档切成行，并为每行预先计算缩进、去掉行尾注释后的内容及其偏移。
//! 所有偏移都相对于原始行起点，再加上 `start` 即为文档绝对偏移。

/// 一个物理行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLine<'a> {
    /// 文档内行号（从 0 开始，不含偏移）
    pub index: usize,
    /// 行首的绝对偏移
    pub start: usize,
    /// 原始行文本（不含换行符与行尾 `\r`）
    pub raw: &'a str,
    /// 缩进层级
    pub indent: usize,
    /// 内容在原始行中的起点
    pub content_start: usize,
    /// 内容在原始行中的终点（已去掉行尾注释与尾随空白）
    pub content_end: usize,
}

impl<'a> SourceLine<'a> {
    fn new(index: usize, start: usize, raw: &'a str) -> Self {
        let stripped = strip_inline_comment(raw);
        let content_start = raw.len() - raw.trim_start().len();
        let content_end = stripped.trim_end().len().max(content_start);
        Self {
            index,
            start,
            raw,
            indent: indent_level(raw),
            content_start,
            content_end,
        }
    }

    /// 去掉缩进与行尾注释后的内容
    pub fn content(&self) -> &'a str {
        &self.raw[self.content_start..self.content_end]
    }

    /// 原始行是否只有空白
    pub fn is_blank(&self) -> bool {
        self.raw.trim().is_empty()
    }

    /// 内容相对偏移 → 文档绝对偏移
    pub fn abs(&self, content_offset: usize) -> usize {
        self.start + self.content_start + content_offset
    }

    /// 行尾的绝对偏移
    pub fn end(&self) -> usize {
        self.start + self.raw.len()
    }
}

/// 按 `\n` 切分文档
pub fn split_lines(text: &str) -> Vec<SourceLine<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (index, segment) in text.split('\n').enumerate() {
        let raw = segment.strip_suffix('\r').unwrap_or(segment);
        lines.push(SourceLine::new(index, start, raw));
        start += segment.len() + 1;
    }
    lines
}

/// 缩进层级：4 个空格或 1 个制表符为一级
pub fn indent_level(raw: &str) -> usize {
    let mut columns = 0;
    for c in raw.chars() {
        match c {
            ' ' => columns += 1,
            '\t' => columns += 4,
            _ => break,
        }
    }
    columns / 4
}

/// 去掉行尾注释
///
/// `//` 位于行首或前面是空白时才算注释；双引号内的 `//` 不算。
pub fn strip_inline_comment(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_string = !in_string,
            b'/' if !in_string
                && bytes.get(i + 1) == Some(&b'/')
                && (i == 0 || bytes[i - 1].is_ascii_whitespace()) =>
            {
                return &raw[..i];
            }
            _ => {}
        }
        i += 1;
    }
    raw
}
