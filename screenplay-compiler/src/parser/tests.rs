//! # Parser 测试
//!
//! 以完整文档驱动两遍遍历，检查 token 流、符号表、诊断与元数据。

use super::*;
use crate::config::{AugmentedVariable, CompilerOptions, ExtensionLine, ExtensionMatch};
use crate::diagnostic::{Diagnostic, DiagnosticLevel, FixAction};
use crate::error::{CompileError, HostError};
use crate::eval::{EvalContext, Evaluation};
use crate::program::{
    DialoguePosition, FrontMatterPosition, LineScope, OutlineKind, SectionKind, TokenKind,
    TokenTag,
};
use crate::value::Value;

fn compile(text: &str) -> Program {
    parse(text, &CompilerConfig::default()).unwrap()
}

fn tags(program: &Program) -> Vec<TokenTag> {
    program.tokens.iter().map(|t| t.tag()).collect()
}

fn with_level(program: &Program, level: DiagnosticLevel) -> Vec<&Diagnostic> {
    program
        .diagnostics
        .iter()
        .filter(|d| d.level == level)
        .collect()
}

// -------------------------------------------------------------------------
// 声明与解析
// -------------------------------------------------------------------------

#[test]
fn test_forward_jump_resolves() {
    let program = compile("# Start\n> Finale\n\n# Finale\nThe end.");
    assert!(program.diagnostics.is_empty(), "{:?}", program.diagnostics);
    assert_eq!(
        tags(&program),
        vec![
            TokenTag::Section,
            TokenTag::Jump,
            TokenTag::Separator,
            TokenTag::Section,
            TokenTag::Action,
        ]
    );
    let TokenKind::Jump { target } = &program.tokens[1].kind else {
        panic!("应为跳转 token");
    };
    assert_eq!(target.section.as_deref(), Some(".Finale"));

    let reference = &program.metadata.lines[1].references[0];
    assert_eq!(reference.id.as_deref(), Some(".Finale"));
    assert_eq!(reference.location.map(|l| l.line), Some(3));
}

#[test]
fn test_duplicate_section_rejected_at_second_declaration() {
    let text = "# Intro\n\n# Alpha\nOne.\n\n# Beta\nTwo.\n\nThree.\n# Alpha\nFour.";
    let program = compile(text);

    assert_eq!(program.diagnostics.len(), 1, "{:?}", program.diagnostics);
    let diagnostic = &program.diagnostics[0];
    assert_eq!(diagnostic.level, DiagnosticLevel::Error);
    assert_eq!(diagnostic.line, 9);
    let from = text.rfind("# Alpha").unwrap() + 2;
    assert_eq!((diagnostic.from, diagnostic.to), (from, from + 5));

    // 快速修复跳转到第一次声明
    assert!(matches!(
        diagnostic.actions[0].action,
        FixAction::Focus { line: 2, .. }
    ));
    assert!(program.sections.contains_key(".Alpha"));
    assert_eq!(program.sections[".Alpha"].location.map(|l| l.line), Some(2));
    assert!(matches!(
        program.tokens_on_line(9).next().map(|t| &t.kind),
        Some(TokenKind::Section { id: None, .. })
    ));
}

#[test]
fn test_variable_declared_after_use_is_visible() {
    let text = "# Battle\n* hp -= 3\n* if hp > 0\nStill alive.\n* gold = 1\n\nvar hp: number = 10";
    let program = compile(text);

    let errors = with_level(&program, DiagnosticLevel::Error);
    assert_eq!(errors.len(), 1, "{:?}", program.diagnostics);
    assert_eq!(errors[0].line, 4);
    assert!(with_level(&program, DiagnosticLevel::Warn).is_empty());

    let TokenKind::Assign { variable, .. } = &program.tokens[1].kind else {
        panic!("应为赋值 token");
    };
    assert_eq!(variable.as_deref(), Some(".Battle.hp"));
    assert_eq!(
        program.variables[".Battle.hp"].value,
        Some(Value::Number(10.0))
    );
}

#[test]
fn test_condition_sees_evaluated_value() {
    let program = compile("var hp: number = 10\n\n# Battle\n* if hp > 0\nStill alive.");
    assert!(program.diagnostics.is_empty(), "{:?}", program.diagnostics);
    let condition = program
        .tokens
        .iter()
        .find(|t| t.tag() == TokenTag::Condition)
        .unwrap();
    assert!(matches!(
        &condition.kind,
        TokenKind::Condition {
            value: Some(Value::Boolean(true)),
            ..
        }
    ));
}

#[test]
fn test_initializer_type_mismatch_warns() {
    let program = compile("var name: number = \"Bob\"");
    let warnings = with_level(&program, DiagnosticLevel::Warn);
    assert_eq!(warnings.len(), 1, "{:?}", program.diagnostics);
    assert_eq!(program.variables[".name"].value, Some(Value::String("Bob".into())));
}

#[test]
fn test_mismatched_parameter_brackets() {
    let program = compile("# f(a, b]\nText.");
    assert_eq!(program.diagnostics.len(), 2, "{:?}", program.diagnostics);
    let section = &program.sections[".f"];
    assert!(section.parameters.is_empty());
    assert_eq!(section.kind, SectionKind::Method);
}

#[test]
fn test_call_binds_arguments() {
    let text = "# greet(who, times = 1)\nHello.\n\n# Main\n* greet(\"Ann\")\n* greet(1, 2, 3)";
    let program = compile(text);

    let errors = with_level(&program, DiagnosticLevel::Error);
    assert_eq!(errors.len(), 1, "{:?}", program.diagnostics);
    assert_eq!(errors[0].line, 5);

    let section = &program.sections[".greet"];
    assert_eq!(section.parameters, vec![".greet.who", ".greet.times"]);
    assert_eq!(
        program.variables[".greet.times"].value,
        Some(Value::Number(1.0))
    );

    let TokenKind::Call { target } = &program.tokens_on_line(4).next().unwrap().kind else {
        panic!("应为调用 token");
    };
    assert_eq!(target.section.as_deref(), Some(".greet"));
    assert_eq!(target.arguments.len(), 1);
    assert_eq!(target.arguments[0].parameter, ".greet.who");
    assert_eq!(target.arguments[0].value, Some(Value::String("Ann".into())));
}

#[test]
fn test_return_checks() {
    let program = compile("# helper\n* return 1\n\n# calc -> number\n* return \"x\"");
    let warnings = with_level(&program, DiagnosticLevel::Warn);
    assert_eq!(warnings.len(), 2, "{:?}", program.diagnostics);
    assert_eq!(warnings[0].line, 1);
    assert_eq!(warnings[1].line, 4);
    assert_eq!(program.sections[".calc"].kind, SectionKind::Function);
}

#[test]
fn test_heading_level_skip_offers_fix() {
    let program = compile("# A\n### B\nText.");
    let warnings = with_level(&program, DiagnosticLevel::Warn);
    assert_eq!(warnings.len(), 1);
    assert!(matches!(
        &warnings[0].actions[0].action,
        FixAction::Edit { insert, .. } if insert == "##"
    ));
    assert_eq!(program.sections[".A.B"].level, 2);
}

#[test]
fn test_function_body_only_nests_functions() {
    let program = compile("# f() -> number\n## s\n### t\n#### g() -> number\n* return 1");
    let errors: Vec<_> = with_level(&program, DiagnosticLevel::Error)
        .iter()
        .map(|d| d.line)
        .collect();
    assert_eq!(errors, vec![1, 2], "{:?}", program.diagnostics);
    assert_eq!(program.sections[".f.s.t.g"].kind, SectionKind::Function);
}

#[test]
fn test_detector_triggers() {
    let program = compile("# watch[hp]\nAlarm.");
    assert_eq!(with_level(&program, DiagnosticLevel::Error).len(), 1);

    let program = compile("var hp = 1\n\n# watch[hp]\nAlarm.");
    assert!(program.diagnostics.is_empty(), "{:?}", program.diagnostics);
    let section = &program.sections[".watch"];
    assert_eq!(section.kind, SectionKind::Detector);
    assert_eq!(section.triggers, vec!["hp"]);
}

// -------------------------------------------------------------------------
// 结构体
// -------------------------------------------------------------------------

#[test]
fn test_list_struct_fields() {
    let program = compile("@list items\n    - a\n    - b");
    assert!(program.diagnostics.is_empty(), "{:?}", program.diagnostics);
    let st = &program.structs["items"];
    let ids: Vec<_> = st.fields.keys().map(String::as_str).collect();
    assert_eq!(ids, vec![".0", ".1"]);
    assert_eq!(st.fields[".1"].value, Some(Value::String("b".into())));
    assert_eq!(
        tags(&program),
        vec![TokenTag::Struct, TokenTag::StructField, TokenTag::StructField]
    );
    assert_eq!(
        program.metadata.objects["list"]["items"][".0"],
        Value::String("a".into())
    );
    assert_eq!(program.metadata.lines[1].scope, LineScope::Struct);
}

#[test]
fn test_struct_inheritance() {
    let text = "@character base:\n    hp: 10\n    color: \"#ff0000\"\n\n@character hero(base):\n    name: \"Hero\"\n\n@character ghost(nobody):\n    hp: 1";
    let program = compile(text);

    let errors = with_level(&program, DiagnosticLevel::Error);
    assert_eq!(errors.len(), 1, "{:?}", program.diagnostics);
    assert_eq!(errors[0].line, 7);

    let hero = &program.metadata.objects["character"]["hero"];
    assert_eq!(hero[".hp"], Value::Number(10.0));
    assert_eq!(hero[".name"], Value::String("Hero".into()));
    assert_eq!(program.metadata.colors.len(), 1);
    assert_eq!(program.metadata.colors[0].color, "#ff0000");
}

// -------------------------------------------------------------------------
// 剧本元素
// -------------------------------------------------------------------------

#[test]
fn test_dual_dialogue() {
    let program = compile("BRICK\nScrew retirement.\n\nSTEEL ^\nMe too.");
    assert!(program.diagnostics.is_empty(), "{:?}", program.diagnostics);
    assert_eq!(
        tags(&program),
        vec![
            TokenTag::DualDialogueStart,
            TokenTag::DialogueCharacter,
            TokenTag::Dialogue,
            TokenTag::DialogueCharacter,
            TokenTag::Dialogue,
            TokenTag::DialogueEnd,
        ]
    );
    let positions: Vec<_> = program
        .tokens
        .iter()
        .filter_map(|t| match &t.kind {
            TokenKind::DialogueCharacter { position, .. } => Some(*position),
            _ => None,
        })
        .collect();
    assert_eq!(
        positions,
        vec![Some(DialoguePosition::Left), Some(DialoguePosition::Right)]
    );
    assert_eq!(program.metadata.characters["STEEL"].dialogue_count, 1);
}

#[test]
fn test_dual_marker_without_space() {
    let program = compile("BRICK\nScrew retirement.\n\nAMY^\nMe too.");
    assert!(program.diagnostics.is_empty(), "{:?}", program.diagnostics);
    assert_eq!(tags(&program)[0], TokenTag::DualDialogueStart);
    let TokenKind::DialogueCharacter { name, position, .. } = &program.tokens[3].kind else {
        panic!("应为角色 token");
    };
    assert_eq!(name, "AMY");
    assert_eq!(*position, Some(DialoguePosition::Right));
}

#[test]
fn test_dual_marker_without_previous_dialogue() {
    let program = compile("Rain falls.\n\nSTEEL ^\nHello.");
    assert_eq!(with_level(&program, DiagnosticLevel::Warn).len(), 1);
    assert!(tags(&program).contains(&TokenTag::DialogueStart));
}

#[test]
fn test_dialogue_lines_merge() {
    let program = compile("\nJOE\n(quietly)\nHello.\nIs anyone here?\n\nThe door creaks.");
    let dialogue: Vec<_> = program
        .tokens
        .iter()
        .filter_map(|t| match &t.kind {
            TokenKind::Dialogue { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(dialogue, vec!["Hello.\nIs anyone here?"]);
    assert!(tags(&program).contains(&TokenTag::DialogueParenthetical));
    assert_eq!(program.metadata.lines[3].scope, LineScope::Dialogue);
    assert_eq!(program.metadata.characters["JOE"].lines, vec![1]);
}

#[test]
fn test_action_continuation_folds() {
    let program = compile("He runs.\n\n& And jumps.");
    assert_eq!(program.tokens.len(), 1);
    assert_eq!(
        program.tokens[0].kind,
        TokenKind::Action {
            text: "He runs.\nAnd jumps.".into()
        }
    );
}

#[test]
fn test_choices_group() {
    let program = compile("+ Fight > Battle\n- Flee\n\n# Battle\nBoom.");
    assert!(program.diagnostics.is_empty(), "{:?}", program.diagnostics);
    let tags: Vec<String> = tags(&program).iter().map(ToString::to_string).collect();
    insta::assert_yaml_snapshot!(tags, @r"
    - choice_start
    - choice
    - choice
    - choice_end
    - separator
    - section
    - action
    ");

    let TokenKind::Choice { target, .. } = &program.tokens[1].kind else {
        panic!("应为选项 token");
    };
    assert_eq!(
        target.as_ref().and_then(|t| t.section.as_deref()),
        Some(".Battle")
    );
    assert_eq!(program.metadata.lines[1].scope, LineScope::Choice);
}

#[test]
fn test_front_matter() {
    let program = compile("Title: Rain\nAuthor: Amy\n\nINT. HOUSE - DAY\n");
    assert_eq!(
        &tags(&program)[..5],
        &[
            TokenTag::FrontMatterStart,
            TokenTag::FrontMatter,
            TokenTag::FrontMatter,
            TokenTag::FrontMatterEnd,
            TokenTag::Separator,
        ]
    );
    assert_eq!(program.front_matter[&FrontMatterPosition::Cc].len(), 2);
    assert_eq!(program.metadata.lines[0].scope, LineScope::FrontMatter);
    assert_eq!(program.metadata.scenes[0].name, "INT. HOUSE - DAY");
}

// -------------------------------------------------------------------------
// 大纲
// -------------------------------------------------------------------------

#[test]
fn test_outline_ranges() {
    let program = compile("# A\n## B\nINT. ROOM\n\n# C\nEnd.");
    let structure = &program.metadata.structure;
    let root = &structure[0];
    assert_eq!(root.kind, OutlineKind::Root);
    assert_eq!((root.start, root.end), (0, 5));
    assert_eq!(root.children.len(), 2);

    let a = &structure[root.children[0]];
    let c = &structure[root.children[1]];
    assert_eq!((a.start, a.end), (0, 3));
    assert_eq!((c.start, c.end), (4, 5));
    assert_eq!(c.section.as_deref(), Some(".C"));

    let scene = program.outline_node_at_line(2).unwrap();
    assert_eq!(scene.kind, OutlineKind::Scene);
    assert_eq!(scene.level, 3);
    assert_eq!(program.metadata.scenes[0].section, ".A.B");
}

// -------------------------------------------------------------------------
// 配置
// -------------------------------------------------------------------------

#[test]
fn test_line_offset_and_omit() {
    let options = CompilerOptions {
        omit: vec![TokenTag::Separator],
        line_offset: 10,
        ..CompilerOptions::default()
    };
    let config = CompilerConfig::new().with_options(options);
    let program = parse("# A\n\n> Nowhere", &config).unwrap();

    assert_eq!(tags(&program), vec![TokenTag::Section, TokenTag::Jump]);
    assert_eq!(program.tokens[1].line, 12);
    assert_eq!(program.diagnostics[0].line, 12);
    assert_eq!(program.line_info(12).map(|l| l.section.as_str()), Some(".A"));
    assert_eq!(program.section_at_line(10).map(|s| s.name.as_str()), Some("A"));
}

#[test]
fn test_augmentations() {
    let mut options = CompilerOptions::default();
    options.augmentations.variables.push(AugmentedVariable {
        name: "gold".into(),
        value: Value::Number(5.0),
        visibility: Default::default(),
    });
    options
        .augmentations
        .files
        .push("assets/bg-forest.png".into());
    let config = CompilerConfig::new().with_options(options);

    let program = parse("var total = gold + 1\nvar gold = 2", &config).unwrap();
    assert_eq!(program.variables[".total"].value, Some(Value::Number(6.0)));
    assert_eq!(with_level(&program, DiagnosticLevel::Error).len(), 1);

    let forest = &program.structs["bg_forest"];
    assert_eq!(forest.ty, "image");
    assert_eq!(
        forest.fields[".src"].value,
        Some(Value::String("assets/bg-forest.png".into()))
    );
}

#[test]
fn test_options_from_json() {
    let options = CompilerOptions::from_json(
        r#"{"omit": ["comment"], "augmentations": {"variables": [{"name": "lives", "value": 3}]}}"#,
    )
    .unwrap();
    assert_eq!(options.omit, vec![TokenTag::Comment]);
    assert_eq!(options.augmentations.variables[0].value, Value::Number(3.0));
    assert!(matches!(
        CompilerOptions::from_json("{\"omit\": 3}"),
        Err(CompileError::InvalidOptions { .. })
    ));
}

#[test]
fn test_line_extension() {
    let config = CompilerConfig::new().with_extension(|line: &ExtensionLine<'_>| {
        line.content.strip_prefix('~').map(|rest| ExtensionMatch {
            name: "shake".into(),
            content: rest.trim().into(),
        })
    });
    let program = parse("~ strong 3\nAfter.", &config).unwrap();
    assert_eq!(tags(&program), vec![TokenTag::Extension, TokenTag::Action]);
    assert_eq!(
        program.tokens[0].kind,
        TokenKind::Extension {
            name: "shake".into(),
            content: "strong 3".into()
        }
    );
}

#[test]
fn test_host_error_aborts() {
    let config = CompilerConfig::new().with_evaluator(
        |_: &str, _: &EvalContext| -> Result<Evaluation, HostError> { Err(HostError::new("boom")) },
    );
    let result = parse("# A\n\nvar x = 1", &config);
    assert!(matches!(
        result,
        Err(CompileError::Evaluator { line: 2, .. })
    ));
}

// -------------------------------------------------------------------------
// 整体性质
// -------------------------------------------------------------------------

const SAMPLE: &str = "Title: Demo\n\nvar hp: number = 3\n\n# Intro\nINT. HALL - NIGHT\n\nJOE\nWho's there?\n\n+ Look > Intro.Look\n+ Leave > Outro\n\n## Look\n* hp -= 1\n\n# Outro\n> THE END <";

#[test]
fn test_reparse_is_identical() {
    let parser = Parser::default();
    let mut first = parser.parse(SAMPLE).unwrap();
    let mut second = parser.parse(SAMPLE).unwrap();
    first.metadata.parse_duration = Default::default();
    second.metadata.parse_duration = Default::default();
    assert_eq!(first, second);
    assert!(first.diagnostics.is_empty(), "{:?}", first.diagnostics);
}

#[test]
fn test_every_line_has_info() {
    let program = compile(SAMPLE);
    assert_eq!(program.metadata.lines.len(), SAMPLE.split('\n').count());
    assert_eq!(
        program.line_info(14).map(|l| l.section.as_str()),
        Some(".Intro.Look")
    );
    let json = program.to_json().unwrap();
    assert!(json.contains("\"tag\": \"dialogue_character\""));
}

/// 用每行最宽的 token 区间重新拼出文档
fn reassemble(program: &Program, text: &str) -> String {
    (0..program.metadata.lines.len())
        .map(|line| {
            program
                .tokens_on_line(line)
                .max_by_key(|t| t.to - t.from)
                .filter(|t| t.to > t.from)
                .map(|t| format!("{}{}", "    ".repeat(t.indent), &text[t.from..t.to]))
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn test_reassembled_tokens_keep_declarations() {
    let text = format!("{SAMPLE}\n\n@item sword:\n    power: 5");
    let program = compile(&text);
    let rebuilt = compile(&reassemble(&program, &text));

    assert!(program.sections.keys().eq(rebuilt.sections.keys()));
    assert!(program.variables.keys().eq(rebuilt.variables.keys()));
    assert!(program.structs.keys().eq(rebuilt.structs.keys()));
    assert_eq!(
        rebuilt.metadata.objects["item"]["sword"][".power"],
        Value::Number(5.0)
    );
}
