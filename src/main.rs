use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use quire::epub::config::DEFAULT_CONFIG_PATH;
use quire::{
    Book, CancelToken, HeadingSelection, LocalFs, MendPolicy, PromptAnswer, QuireConfig, Result,
    SaveOutcome, TreeStyle, TreeView, UserPrompt,
};

/// 📚 quire - EPUB编辑工具
#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "加载、检查、修复并重新打包EPUB文件")]
#[command(version)]
struct Cli {
    /// EPUB文件路径
    #[arg(help = "要处理的EPUB文件路径")]
    epub_file: PathBuf,

    /// 配置文件路径
    #[arg(short, long, global = true, help = "配置文件路径（默认quire.yaml）")]
    config: Option<PathBuf>,

    /// 详细输出模式
    #[arg(short, long, global = true, help = "显示详细信息")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 显示书籍信息
    Info,
    /// 检查XHTML、NCX、OPF和CSS的格式
    Check,
    /// 修复格式错误并保存
    Mend {
        /// 输出路径，默认覆盖原文件
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 显示或重新生成目录
    Toc {
        /// 根据标题重新生成目录并保存
        #[arg(long)]
        regenerate: bool,
        /// 参与生成的最大标题级别（1-6）
        #[arg(long)]
        max_level: Option<u8>,
        /// 输出路径，默认覆盖原文件
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 读入后按规范重新打包
    Repack {
        /// 输出路径，默认覆盖原文件
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// 在终端上询问用户
struct StdinPrompt;

impl UserPrompt for StdinPrompt {
    fn ask(&self, question: &str) -> PromptAnswer {
        print!("❓ {} [y/n/c]: ", question);
        let _ = io::stdout().flush();
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return PromptAnswer::Cancel;
        }
        match line.trim().to_lowercase().as_str() {
            "y" | "yes" | "是" => PromptAnswer::Yes,
            "n" | "no" | "否" => PromptAnswer::No,
            _ => PromptAnswer::Cancel,
        }
    }
}

fn main() {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    println!("📚 quire - EPUB编辑工具");
    if cli.verbose {
        println!("🔍 详细模式已启用");
    }

    match run(&cli) {
        Ok(()) => println!("🎉 处理完成！"),
        Err(e) => {
            eprintln!("❌ 错误: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => QuireConfig::from_file(path)?,
        None => QuireConfig::load_or_default(DEFAULT_CONFIG_PATH),
    };

    println!("正在打开EPUB文件: {}", cli.epub_file.display());
    let mut book = Book::load(&LocalFs, &cli.epub_file, &config, &CancelToken::new())?;

    match &cli.command {
        Commands::Info => display_info(&book, cli.verbose),
        Commands::Check => check(&mut book),
        Commands::Mend { output } => {
            mend(&mut book)?;
            save(&mut book, output.as_deref().unwrap_or(&cli.epub_file))
        }
        Commands::Toc {
            regenerate,
            max_level,
            output,
        } => {
            if *regenerate {
                let mut selection = HeadingSelection::from(&config.toc);
                if let Some(level) = max_level {
                    selection.max_level = (*level).clamp(1, 6);
                }
                if book.generate_toc_with(&selection) {
                    println!("🔄 目录已重新生成");
                } else {
                    println!("✅ 目录无需修改");
                }
            }
            display_toc(&book, cli.verbose);
            if *regenerate {
                save(&mut book, output.as_deref().unwrap_or(&cli.epub_file))?;
            }
            Ok(())
        }
        Commands::Repack { output } => save(&mut book, output.as_deref().unwrap_or(&cli.epub_file)),
    }
}

/// 显示书籍信息
fn display_info(book: &Book, verbose: bool) -> Result<()> {
    println!("\n📊 书籍信息:");
    println!("  📖 EPUB版本: {}", book.epub_version());
    println!("  📦 OPF路径: {}", book.opf_path());
    if let Some(title) = book.title() {
        println!("  标题: {}", title);
    }
    if let Some(language) = book.metadata().language() {
        println!("  语言: {}", language);
    }
    let creators = book.metadata().creators();
    if !creators.is_empty() {
        println!("  作者: {}", creators.join("、"));
    }
    if let Some(uid) = book.package().unique_identifier_value() {
        println!("  🔖 唯一标识符: {}", uid);
    }
    if let Some(cover) = book.metadata().cover_id() {
        println!("  🖼️  封面: {}", cover);
    }
    if let Some(modified) = book.metadata().modified() {
        println!("  🕐 最后修改: {}", modified);
    }

    if verbose {
        println!("\n  ⚙️  全部元数据:");
        for entry in book.metadata().entries() {
            println!("    {}: {}", entry.name, entry.value);
        }
    }

    let mut kinds: BTreeMap<String, usize> = BTreeMap::new();
    for resource in book.resources() {
        *kinds.entry(resource.kind().to_string()).or_default() += 1;
    }
    println!("\n  📁 文件统计:");
    println!("    清单项目: {} 个", book.manifest().len());
    println!("    脊柱项目: {} 个", book.spine().len());
    for (kind, count) in &kinds {
        println!("    {}: {} 个", kind, count);
    }
    if let Some(nav) = book.authoritative_nav_id() {
        println!("    导航文档: {}", nav);
    }
    println!("    目录条目: {} 个", book.nav_tree().total_count());

    if verbose {
        println!("\n  📜 阅读顺序:");
        for (index, item) in book.spine().items.iter().enumerate() {
            let linear = if item.linear { "" } else { " (非线性)" };
            println!("    {}. {}{}", index + 1, item.idref, linear);
        }
    }
    Ok(())
}

/// 检查全部可检查的资源
fn check(book: &mut Book) -> Result<()> {
    let malformed = book.check_all();
    if malformed.is_empty() {
        println!("\n✅ 所有文件格式良好");
        return Ok(());
    }
    println!("\n⚠️  {} 个文件格式有误:", malformed.len());
    for (id, error) in &malformed {
        let path = book
            .get_resource(id.as_str())
            .map(|resource| resource.relative_path().to_string())
            .unwrap_or_else(|| id.to_string());
        println!("  {}:{}:{}: {}", path, error.line, error.column, error.message);
    }
    Ok(())
}

/// 修复全部资源
fn mend(book: &mut Book) -> Result<()> {
    let before = book.check_all().len();
    let failures = book.mend_all(MendPolicy::Manual);
    println!("\n🔧 已修复 {} 个文件", before.saturating_sub(failures.len()));
    for (id, error) in &failures {
        println!("  ❌ {}: {}", id, error);
    }
    Ok(())
}

fn display_toc(book: &Book, verbose: bool) {
    println!("\n🌳 目录:");
    if book.nav_tree().is_empty() {
        println!("  (空)");
        return;
    }
    let style = if verbose {
        TreeStyle::TreeSymbols
    } else {
        TreeStyle::Indented
    };
    let view = TreeView::new(book.nav_tree())
        .with_title(book.title())
        .with_style(style)
        .with_show_targets(verbose);
    print!("{}", view);

    for warning in book.validate_nav_targets() {
        println!("  ⚠️  {}: {:?}", warning.title, warning.kind);
    }
}

fn save(book: &mut Book, path: &Path) -> Result<()> {
    match book.save_interactive(&LocalFs, path, &StdinPrompt, &CancelToken::new())? {
        SaveOutcome::Saved => println!("💾 已保存: {}", path.display()),
        SaveOutcome::Cancelled => println!("⏹️  已取消保存"),
        SaveOutcome::NeedsConfirmation(malformed) => {
            println!("⚠️  {} 个文件格式有误，未保存", malformed.len());
        }
    }
    Ok(())
}
