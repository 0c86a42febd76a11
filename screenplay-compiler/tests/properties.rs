//! 对随机拼接的文档检查解析结果的整体性质

use proptest::prelude::*;
use screenplay_compiler::{CompilerConfig, OutlineKind, Program, parse};

const FRAGMENTS: &[&str] = &[
    "",
    "",
    "Title: Demo",
    "# Intro",
    "## Scene",
    "# f(a, b = 2)",
    "# g(x]",
    "== mark",
    "var hp = 3",
    "var hp: string = 1",
    "* hp += 1",
    "* if hp > 1",
    "* else",
    "* return hp",
    "* greet(1)",
    "> Intro",
    "> nowhere",
    "+ Go > Intro",
    "- Stay",
    "    + Nested",
    "JOE",
    "MARY ^",
    "Hello there.",
    "(softly)",
    "& and more",
    "INT. ROOM - DAY",
    "> THE END <",
    "CUT TO:",
    "===",
    "= synopsis",
    "@item sword:",
    "    power: 5",
    "    - tag",
    "// note",
    "{broken",
];

fn document_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(FRAGMENTS), 0..40).prop_map(|lines| lines.join("\n"))
}

fn without_timing(mut program: Program) -> Program {
    program.metadata.parse_duration = Default::default();
    program
}

proptest! {
    #[test]
    fn parse_is_total_and_deterministic(text in document_strategy()) {
        let config = CompilerConfig::default();
        let first = parse(&text, &config).map(without_timing);
        let second = parse(&text, &config).map(without_timing);
        prop_assert!(first.is_ok());
        prop_assert_eq!(first.ok(), second.ok());
    }

    #[test]
    fn positions_stay_inside_document(text in document_strategy()) {
        let program = parse(&text, &CompilerConfig::default()).unwrap();
        let line_count = text.split('\n').count();

        prop_assert_eq!(program.metadata.lines.len(), line_count);
        for token in &program.tokens {
            prop_assert!(token.from <= token.to);
            prop_assert!(token.to <= text.len());
            prop_assert!(token.line < line_count);
        }
        for pair in program.tokens.windows(2) {
            prop_assert!(pair[0].line <= pair[1].line);
        }
        for diagnostic in &program.diagnostics {
            prop_assert!(diagnostic.line < line_count);
            prop_assert!(diagnostic.to <= text.len());
        }
    }

    #[test]
    fn outline_root_covers_document(text in document_strategy()) {
        let program = parse(&text, &CompilerConfig::default()).unwrap();
        let line_count = text.split('\n').count();
        let root = &program.metadata.structure[0];

        prop_assert_eq!(root.kind, OutlineKind::Root);
        prop_assert_eq!((root.start, root.end), (0, line_count - 1));
        for node in &program.metadata.structure[1..] {
            prop_assert!(node.start <= node.end);
            let parent = &program.metadata.structure[node.parent.unwrap()];
            prop_assert!(parent.start <= node.start && node.end <= parent.end);
        }
    }

    #[test]
    fn outline_siblings_tile_without_gaps(text in document_strategy()) {
        let program = parse(&text, &CompilerConfig::default()).unwrap();
        let nodes = &program.metadata.structure;

        for node in nodes {
            for pair in node.children.windows(2) {
                let (left, right) = (&nodes[pair[0]], &nodes[pair[1]]);
                prop_assert_eq!(left.end + 1, right.start);
            }
        }

        let line_count = text.split('\n').count();
        for line in 0..line_count {
            let innermost = nodes
                .iter()
                .filter(|n| n.contains(line))
                .filter(|n| !n.children.iter().any(|&c| nodes[c].contains(line)))
                .count();
            prop_assert_eq!(innermost, 1, "line {}", line);
        }
    }
}
