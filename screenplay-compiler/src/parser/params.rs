//! # 参数列表
//!
//! 解析标题行上的 `(params)` / `[triggers]`，并据此决定 section 子类型。
//! 括号不匹配或未闭合时放弃提取参数，只报告问题，其余内容照常解析。

use crate::program::SectionKind;

use super::helpers::{is_valid_identifier, split_args, split_assignment};
use super::patterns::{SectionShape, Span};

/// 一个形参
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub name_span: Span,
    /// 默认值表达式及其区间
    pub default: Option<(String, Span)>,
}

/// 参数列表中的问题（区间相对于行内容）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamIssue {
    pub message: String,
    pub span: Span,
}

/// 参数列表解析结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamList {
    pub kind: SectionKind,
    pub params: Vec<ParamSpec>,
    /// detector 的触发变量名
    pub triggers: Vec<(String, Span)>,
    pub issues: Vec<ParamIssue>,
}

/// 解析标题行的参数列表
pub fn parse_params(content: &str, shape: &SectionShape) -> ParamList {
    let mut list = ParamList {
        kind: section_kind(shape),
        ..ParamList::default()
    };
    let Some(brackets) = shape.brackets else {
        return list;
    };

    match brackets.close {
        None => {
            list.issues.push(ParamIssue {
                message: format!("参数列表缺少闭合的 '{}'", closing(brackets.open)),
                span: Span::new(brackets.open_at, brackets.open_at + 1),
            });
            return list;
        }
        Some((close, close_at)) if brackets.is_mismatched() => {
            list.issues.push(ParamIssue {
                message: format!("'{}' 与 '{}' 不匹配", brackets.open, close),
                span: Span::new(brackets.open_at, brackets.open_at + 1),
            });
            list.issues.push(ParamIssue {
                message: format!("'{}' 与 '{}' 不匹配", close, brackets.open),
                span: Span::new(close_at, close_at + 1),
            });
            return list;
        }
        Some(_) => {}
    }

    let inner = brackets.inner.text(content);
    for arg in split_args(inner) {
        let at = brackets.inner.from + arg.from;
        let span = Span::new(at, at + arg.text.len());
        if arg.text.is_empty() {
            list.issues.push(ParamIssue {
                message: "参数列表中有空项".to_string(),
                span,
            });
            continue;
        }

        let (name, default) = match split_assignment(arg.text) {
            Some((name, value_at)) => {
                let value = arg.text[value_at..].trim();
                let value_span = Span::new(at + value_at, at + value_at + value.len());
                (name, Some((value.to_string(), value_span)))
            }
            None => (arg.text, None),
        };
        let name_span = Span::new(at, at + name.len());

        if !is_valid_identifier(name) {
            list.issues.push(ParamIssue {
                message: format!("无效的参数名 '{}'", name),
                span: name_span,
            });
            continue;
        }

        if list.kind == SectionKind::Detector {
            if default.is_some() {
                list.issues.push(ParamIssue {
                    message: format!("触发变量 '{}' 不能有默认值", name),
                    span,
                });
            }
            list.triggers.push((name.to_string(), name_span));
            continue;
        }

        match default {
            Some((value, value_span)) if value.is_empty() => {
                list.issues.push(ParamIssue {
                    message: format!("参数 '{}' 缺少默认值", name),
                    span: value_span,
                });
            }
            default => list.params.push(ParamSpec {
                name: name.to_string(),
                name_span,
                default,
            }),
        }
    }
    list
}

/// 由括号与返回类型决定 section 子类型
fn section_kind(shape: &SectionShape) -> SectionKind {
    match (shape.brackets.map(|b| b.open), shape.return_type) {
        (Some('['), _) => SectionKind::Detector,
        (_, Some(_)) => SectionKind::Function,
        (Some(_), None) => SectionKind::Method,
        (None, None) => SectionKind::Section,
    }
}

fn closing(open: char) -> char {
    if open == '[' { ']' } else { ')' }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::patterns::{LineContext, Matched, classify};

    fn params(s: &str) -> ParamList {
        match classify(s, &LineContext::default()) {
            Some(Matched::Section(shape)) => parse_params(s, &shape),
            other => panic!("不是 section: {:?}", other),
        }
    }

    #[test]
    fn test_kinds() {
        assert_eq!(params("# plain").kind, SectionKind::Section);
        assert_eq!(params("# m(a)").kind, SectionKind::Method);
        assert_eq!(params("# f(a) -> number").kind, SectionKind::Function);
        assert_eq!(params("# d[hp]").kind, SectionKind::Detector);
    }

    #[test]
    fn test_params_with_defaults() {
        let s = "# f(a, b = 2)";
        let list = params(s);
        assert!(list.issues.is_empty());
        assert_eq!(list.params.len(), 2);
        assert_eq!(list.params[0].name, "a");
        assert_eq!(list.params[0].name_span.text(s), "a");
        let (value, span) = list.params[1].default.clone().unwrap();
        assert_eq!(value, "2");
        assert_eq!(span.text(s), "2");
    }

    #[test]
    fn test_mismatched_delimiters_yield_two_issues() {
        let s = "# f(a, b]";
        let list = params(s);
        assert!(list.params.is_empty());
        assert_eq!(list.issues.len(), 2);
        assert_eq!(list.issues[0].span.text(s), "(");
        assert_eq!(list.issues[1].span.text(s), "]");
        assert_eq!(list.kind, SectionKind::Method);
    }

    #[test]
    fn test_unclosed_list() {
        let list = params("# f(a, b");
        assert!(list.params.is_empty());
        assert_eq!(list.issues.len(), 1);
    }

    #[test]
    fn test_detector_triggers() {
        let list = params("# watch[hp, gold]");
        let names: Vec<_> = list.triggers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["hp", "gold"]);
        assert!(list.params.is_empty());
    }

    #[test]
    fn test_invalid_param_name() {
        let list = params("# f(1x, ok)");
        assert_eq!(list.issues.len(), 1);
        assert_eq!(list.params.len(), 1);
    }
}
