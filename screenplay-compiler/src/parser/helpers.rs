//! # 辅助解析函数
//!
//! 手写的字符串解析辅助函数，无正则依赖。

/// 保留字
pub const RESERVED_WORDS: &[&str] = &[
    "if", "elif", "else", "return", "repeat", "var", "public", "protected", "true", "false", "and",
    "or", "not",
];

/// 检查字符串是否以指定前缀开头（大小写不敏感）
pub fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.chars()
            .zip(prefix.chars())
            .all(|(a, b)| a.eq_ignore_ascii_case(&b))
}

/// 是否为保留字
pub fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS.contains(&name)
}

/// 是否是合法标识符：字母或下划线开头，其余为字母、数字或下划线
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// 标识符前缀的字节长度
pub fn identifier_len(s: &str) -> usize {
    let mut len = 0;
    for (i, c) in s.char_indices() {
        let ok = if i == 0 {
            c.is_alphabetic() || c == '_'
        } else {
            c.is_alphanumeric() || c == '_'
        };
        if !ok {
            break;
        }
        len = i + c.len_utf8();
    }
    len
}

/// 全大写（至少包含一个字母且没有小写字母）
pub fn is_all_caps(s: &str) -> bool {
    s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase)
}

/// 查找不在引号内的字符
pub fn find_unquoted(s: &str, target: char) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == target => return Some(i),
            None => {}
        }
    }
    None
}

/// 逗号分隔的一个参数片段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpan<'a> {
    pub text: &'a str,
    /// 在输入中的起始偏移（已去掉前导空白）
    pub from: usize,
}

impl ArgSpan<'_> {
    pub fn to(&self) -> usize {
        self.from + self.text.len()
    }
}

/// 分割参数（考虑字符串与括号内的逗号）
///
/// 空输入返回空列表；`a,,b` 中间的空片段保留，由调用方诊断。
pub fn split_args(s: &str) -> Vec<ArgSpan<'_>> {
    if s.trim().is_empty() {
        return Vec::new();
    }

    let mut result = Vec::new();
    let mut segment_start = 0;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    fn segment(s: &str, from: usize, to: usize) -> ArgSpan<'_> {
        let raw = &s[from..to];
        let lead = raw.len() - raw.trim_start().len();
        ArgSpan {
            text: raw.trim(),
            from: from + lead,
        }
    }

    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                result.push(segment(s, segment_start, i));
                segment_start = i + 1;
            }
            _ => {}
        }
    }
    result.push(segment(s, segment_start, s.len()));

    result
}

/// 拆分 `name = value` 形式的片段，返回 `(name, value 在片段中的偏移)`
pub fn split_assignment(s: &str) -> Option<(&str, usize)> {
    let eq = find_unquoted(s, '=')?;
    if s[eq + 1..].starts_with('=') {
        return None;
    }
    let value = &s[eq + 1..];
    let lead = value.len() - value.trim_start().len();
    Some((s[..eq].trim(), eq + 1 + lead))
}

/// 是否是颜色字面量（`#rgb`、`#rrggbb`、`#rrggbbaa`、`rgb(..)`、`rgba(..)`、`hsl(..)`、`hsla(..)`）
pub fn is_color_literal(s: &str) -> bool {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix('#') {
        return matches!(hex.len(), 3 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    ["rgb(", "rgba(", "hsl(", "hsla("]
        .iter()
        .any(|prefix| starts_with_ignore_case(s, prefix) && s.ends_with(')'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("hp"));
        assert!(is_valid_identifier("_x1"));
        assert!(is_valid_identifier("勇者"));
        assert!(!is_valid_identifier("1x"));
        assert!(!is_valid_identifier("a-b"));
        assert_eq!(identifier_len("name(x)"), 4);
    }

    #[test]
    fn test_split_args_offsets() {
        let args = split_args(" a, \"x, y\" ,f(1, 2)");
        let texts: Vec<_> = args.iter().map(|a| a.text).collect();
        assert_eq!(texts, vec!["a", "\"x, y\"", "f(1, 2)"]);
        assert_eq!(args[0].from, 1);
        assert_eq!(args[1].from, 4);
        assert_eq!(args[2].to(), 19);
    }

    #[test]
    fn test_split_args_empty() {
        assert!(split_args("  ").is_empty());
        assert_eq!(split_args("a,,b").len(), 3);
    }

    #[test]
    fn test_split_assignment() {
        assert_eq!(split_assignment("x = 5"), Some(("x", 4)));
        assert_eq!(split_assignment("x == 5"), None);
        assert_eq!(split_assignment("x"), None);
    }

    #[test]
    fn test_is_all_caps() {
        assert!(is_all_caps("JOE"));
        assert!(is_all_caps("MR. SMITH (V.O.)"));
        assert!(!is_all_caps("Joe"));
        assert!(!is_all_caps("123"));
    }

    #[test]
    fn test_color_literal() {
        assert!(is_color_literal("#fff"));
        assert!(is_color_literal("#ff0000aa"));
        assert!(is_color_literal("rgba(0, 0, 0, 0.5)"));
        assert!(!is_color_literal("#ff00"));
        assert!(!is_color_literal("red"));
    }
}
