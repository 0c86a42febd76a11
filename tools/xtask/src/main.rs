//! # xtask - 开发辅助工具
//!
//! 提供本地质量门禁与开发辅助命令。
//!
//! ## 命令
//!
//! - `check-all`: 运行 fmt、clippy、test
//! - `script-check`: 编译剧本文件并输出诊断

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use screenplay_compiler::{CompilerConfig, CompilerOptions, DiagnosticResult, parse};
use tracing::{Level, debug};
use walkdir::WalkDir;
use xshell::{Shell, cmd};

/// 剧本文件扩展名
const SCRIPT_EXTENSION: &str = "script";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "开发辅助工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行 fmt、clippy、test 门禁检查
    CheckAll,

    /// 编译剧本文件并输出诊断
    ///
    /// 不带路径时检查 scripts/ 下所有 .script 文件。
    ScriptCheck {
        /// 文件或目录
        path: Option<PathBuf>,

        /// 编译选项 JSON 文件（省略列表、行号偏移、预先注入）
        #[arg(long)]
        options: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            Level::DEBUG
        } else {
            Level::WARN
        })
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = real_main(cli.command) {
        eprintln!("xtask error: {e:#}");
        return ExitCode::from(1);
    }
    ExitCode::from(0)
}

fn real_main(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::CheckAll => check_all(),
        Commands::ScriptCheck { path, options } => script_check(path.as_deref(), options.as_deref()),
    }
}

fn check_all() -> anyhow::Result<()> {
    let sh = Shell::new()?;

    eprintln!("\n==> cargo fmt --all -- --check");
    cmd!(sh, "cargo fmt --all -- --check").run()?;

    eprintln!("\n==> cargo clippy --workspace --all-targets");
    cmd!(sh, "cargo clippy --workspace --all-targets").run()?;

    eprintln!("\n==> cargo test --workspace");
    cmd!(sh, "cargo test --workspace").run()?;
    Ok(())
}

//=============================================================================
// script-check 命令实现
//=============================================================================

/// 默认剧本目录（相对于 workspace root）
const DEFAULT_SCRIPTS_DIR: &str = "scripts";

/// 剧本检查结果
#[derive(Default)]
struct ScriptCheckResult {
    /// 检查的剧本数量
    scripts_checked: usize,
    /// 无法读取或宿主回调失败的剧本数量
    failures: usize,
    diagnostics: DiagnosticResult,
}

/// 执行剧本检查
fn script_check(path: Option<&Path>, options: Option<&Path>) -> anyhow::Result<()> {
    let options = match options {
        Some(file) => {
            let text = std::fs::read_to_string(file)
                .with_context(|| format!("无法读取编译选项: {}", file.display()))?;
            CompilerOptions::from_json(&text)?
        }
        None => CompilerOptions::default(),
    };
    let config = CompilerConfig::new().with_options(options);

    let files = match path {
        Some(p) if p.is_file() => vec![p.to_path_buf()],
        Some(p) if p.is_dir() => collect_script_files(p),
        Some(p) => anyhow::bail!("路径不存在: {}", p.display()),
        None => {
            let dir = Path::new(DEFAULT_SCRIPTS_DIR);
            if !dir.exists() {
                anyhow::bail!(
                    "默认剧本目录不存在: {}\n请在 workspace 根目录运行，或指定剧本路径",
                    dir.display()
                );
            }
            collect_script_files(dir)
        }
    };

    if files.is_empty() {
        eprintln!("未找到剧本文件（.{}）", SCRIPT_EXTENSION);
        return Ok(());
    }

    eprintln!("==> 检查 {} 个剧本文件...\n", files.len());

    let mut result = ScriptCheckResult::default();
    for file in &files {
        check_script_file(file, &config, &mut result);
    }

    print_check_result(&result);

    if result.failures > 0 || result.diagnostics.has_errors() {
        anyhow::bail!("剧本检查发现错误");
    }
    Ok(())
}

/// 收集目录下的所有剧本文件
fn collect_script_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION))
        .collect();
    files.sort();
    files
}

/// 检查单个剧本文件
fn check_script_file(file: &Path, config: &CompilerConfig, result: &mut ScriptCheckResult) {
    let script_id = file.display().to_string();
    result.scripts_checked += 1;

    let content = match std::fs::read_to_string(file) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[ERROR] {}: 无法读取文件 - {}", script_id, e);
            result.failures += 1;
            return;
        }
    };

    let program = match parse(&content, config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[ERROR] {}: {}", script_id, e);
            result.failures += 1;
            return;
        }
    };

    debug!(
        script = %script_id,
        tokens = program.tokens.len(),
        sections = program.sections.len(),
        elapsed = ?program.metadata.parse_duration,
        "剧本已编译"
    );

    for diagnostic in program.diagnostics {
        eprintln!("{}: {}", script_id, diagnostic);
        result.diagnostics.push(diagnostic);
    }
}

/// 输出检查结果
fn print_check_result(result: &ScriptCheckResult) {
    eprintln!("─────────────────────────────────────────────────────");
    eprintln!("检查完成: {} 个剧本", result.scripts_checked);

    let error_count = result.failures + result.diagnostics.error_count();
    let warn_count = result.diagnostics.warn_count();

    eprintln!();
    if error_count > 0 {
        eprintln!("❌ {} 个错误, {} 个警告", error_count, warn_count);
    } else if warn_count > 0 {
        eprintln!("⚠️  0 个错误, {} 个警告", warn_count);
    } else {
        eprintln!("✅ 检查通过，无错误");
    }
}
