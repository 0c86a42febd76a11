//! # 多行块识别
//!
//! 依赖文档位置、需要一次看多行的块：文档开头的 front matter，
//! 以及结构体声明之后的字段体。

use super::helpers::{find_unquoted, is_reserved, is_valid_identifier};
use super::lines::SourceLine;
use super::patterns::Span;

/// front matter 中的一个条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatterItem {
    pub key: String,
    /// 值（续行以换行符拼接）
    pub value: String,
    /// 首行
    pub line: usize,
    /// 末行（含续行）
    pub last_line: usize,
}

/// front matter 块
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontMatterBlock {
    pub items: Vec<FrontMatterItem>,
    /// 块之后的第一行
    pub end: usize,
}

/// `key: value` 外形，返回 (key, value)
fn split_key_value(content: &str) -> Option<(&str, &str)> {
    let colon = content.find(':')?;
    let key = content[..colon].trim();
    let first_word = key.split_whitespace().next()?;
    let valid = key.starts_with(|c: char| c.is_alphabetic())
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || c == ' ' || c == '_' || c == '-');
    if !valid || is_reserved(first_word) {
        return None;
    }
    Some((key, content[colon + 1..].trim()))
}

/// 识别文档开头的 front matter
///
/// 首行必须是 `key: value`；缩进的后续行续接上一个值；遇到空行结束。
pub fn recognize_front_matter(lines: &[SourceLine<'_>]) -> Option<FrontMatterBlock> {
    let first = lines.first()?;
    if first.indent > 0 || first.content_start > 0 {
        return None;
    }
    split_key_value(first.content())?;

    let mut block = FrontMatterBlock::default();
    for line in lines {
        if line.is_blank() {
            break;
        }
        let continuation = line.content_start > 0;
        match (continuation, block.items.last_mut()) {
            (true, Some(item)) => {
                if !item.value.is_empty() {
                    item.value.push('\n');
                }
                item.value.push_str(line.content());
                item.last_line = line.index;
            }
            _ => {
                let Some((key, value)) = split_key_value(line.content()) else {
                    break;
                };
                block.items.push(FrontMatterItem {
                    key: key.to_string(),
                    value: value.to_string(),
                    line: line.index,
                    last_line: line.index,
                });
            }
        }
        block.end = line.index + 1;
    }
    Some(block)
}

/// 结构体字段行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLine {
    /// 文档内行号
    pub line: usize,
    /// 相对结构体的路径 id
    pub id: String,
    pub name: String,
    /// 名称区间（相对于行内容）
    pub name_span: Span,
    /// 值原文及其区间（容器字段为 None）
    pub value: Option<(String, Span)>,
    pub array_entry: bool,
    pub explicit: bool,
}

/// 结构体字段体的结束行（不含）
///
/// 字段体是声明之后缩进更深的连续非空行。
pub fn struct_body_end(lines: &[SourceLine<'_>], header: usize) -> usize {
    let indent = lines[header].indent;
    let mut end = header + 1;
    while end < lines.len() && !lines[end].is_blank() && lines[end].indent > indent {
        end += 1;
    }
    end
}

struct Container {
    prefix: String,
    owner_indent: usize,
    next_index: usize,
}

/// `name: value` / `name:` 外形
fn split_field(s: &str) -> Option<(&str, &str)> {
    let colon = find_unquoted(s, ':')?;
    let name = s[..colon].trim();
    is_valid_identifier(name).then(|| (name, s[colon + 1..].trim()))
}

fn span_in(content: &str, part: &str) -> Span {
    let from = part.as_ptr() as usize - content.as_ptr() as usize;
    Span::new(from, from + part.len())
}

/// 解析 `header + 1 .. end` 之间的字段行
pub fn parse_struct_fields(lines: &[SourceLine<'_>], header: usize, end: usize) -> Vec<FieldLine> {
    let mut fields = Vec::new();
    let mut stack = vec![Container {
        prefix: String::new(),
        owner_indent: lines[header].indent,
        next_index: 0,
    }];

    for line in &lines[header + 1..end] {
        while stack.len() > 1 && stack.last().is_some_and(|c| line.indent <= c.owner_indent) {
            stack.pop();
        }
        let content = line.content();
        if content.is_empty() {
            continue;
        }
        let Some(parent) = stack.last_mut() else {
            break;
        };

        let array_item = content
            .strip_prefix('-')
            .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
            .map(str::trim);

        let field = if let Some(item) = array_item {
            let id = format!("{}.{}", parent.prefix, parent.next_index);
            parent.next_index += 1;
            match split_field(item) {
                Some((name, value)) => FieldLine {
                    line: line.index,
                    id,
                    name: name.to_string(),
                    name_span: span_in(content, name),
                    value: Some((value.to_string(), span_in(content, value))),
                    array_entry: true,
                    explicit: true,
                },
                None => FieldLine {
                    line: line.index,
                    id,
                    name: item.to_string(),
                    name_span: span_in(content, item),
                    value: Some((item.to_string(), span_in(content, item))),
                    array_entry: true,
                    explicit: false,
                },
            }
        } else if let Some((name, value)) = split_field(content) {
            let id = format!("{}.{}", parent.prefix, name);
            if value.is_empty() {
                stack.push(Container {
                    prefix: id.clone(),
                    owner_indent: line.indent,
                    next_index: 0,
                });
                FieldLine {
                    line: line.index,
                    id,
                    name: name.to_string(),
                    name_span: span_in(content, name),
                    value: None,
                    array_entry: false,
                    explicit: false,
                }
            } else {
                FieldLine {
                    line: line.index,
                    id,
                    name: name.to_string(),
                    name_span: span_in(content, name),
                    value: Some((value.to_string(), span_in(content, value))),
                    array_entry: false,
                    explicit: true,
                }
            }
        } else {
            FieldLine {
                line: line.index,
                id: format!("{}.{}", parent.prefix, content),
                name: content.to_string(),
                name_span: Span::new(0, content.len()),
                value: Some((content.to_string(), Span::new(0, content.len()))),
                array_entry: false,
                explicit: false,
            }
        };
        fields.push(field);
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::lines::split_lines;

    #[test]
    fn test_front_matter_with_continuation() {
        let lines = split_lines("Title: Rain\nAuthor:\n    Amy\n    Joe\n\nINT. HOUSE");
        let block = recognize_front_matter(&lines).unwrap();
        assert_eq!(block.items.len(), 2);
        assert_eq!(block.items[1].value, "Amy\nJoe");
        assert_eq!(block.items[1].last_line, 3);
        assert_eq!(block.end, 4);
    }

    #[test]
    fn test_no_front_matter() {
        let lines = split_lines("var x: number = 1\n");
        assert!(recognize_front_matter(&lines).is_none());
        let lines = split_lines("# Intro\n");
        assert!(recognize_front_matter(&lines).is_none());
    }

    #[test]
    fn test_array_fields() {
        let lines = split_lines("@list items\n    - a\n    - b\nafter");
        let end = struct_body_end(&lines, 0);
        assert_eq!(end, 3);
        let fields = parse_struct_fields(&lines, 0, end);
        let ids: Vec<_> = fields.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec![".0", ".1"]);
        assert_eq!(fields[0].value.as_ref().map(|v| v.0.as_str()), Some("a"));
        assert!(fields[0].array_entry);
    }

    #[test]
    fn test_nested_fields() {
        let text = "@character hero:\n    name: \"Hero\"\n    stats:\n        hp: 10\n        tags:\n            - brave\n    level: 2";
        let lines = split_lines(text);
        let end = struct_body_end(&lines, 0);
        let fields = parse_struct_fields(&lines, 0, end);
        let ids: Vec<_> = fields.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![".name", ".stats", ".stats.hp", ".stats.tags", ".stats.tags.0", ".level"]
        );
        assert!(fields[1].value.is_none());
        let (value, span) = fields[2].value.clone().unwrap();
        assert_eq!(value, "10");
        assert_eq!(span.text(lines[3].content()), "10");
    }
}
