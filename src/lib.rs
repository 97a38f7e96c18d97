pub mod epub;

// === 核心API重新导出 ===

/// 书籍与会话（主要接口）
pub use epub::{Book, CancelToken, SaveOutcome, Session, Task};

/// 错误处理
pub use epub::{
    ContainerError, EpubError, FilenameError, ManifestError, MendError, NavError, Result,
    SessionError, SpineError, WellFormedError,
};

/// 配置
pub use epub::{
    MendSettings, NewBookSettings, ObfuscationSetting, QuireConfig, SaveSettings, TocSettings,
};

/// 文件系统与用户确认
pub use epub::{FileSystem, FixedAnswer, LocalFs, MemoryFs, PromptAnswer, UserPrompt};

// === 数据结构 ===

/// 资源
pub use epub::{ObfuscationMethod, Resource, ResourceId, ResourceKind, WellFormedState};

/// OPF组件
pub use epub::{GuideReference, ManifestEntry, Metadata, MetadataEntry, Package, Spine, SpineItem};

/// 导航
pub use epub::{HeadingSelection, NavEntry, NavTarget, NavTree, NavWarning, NavWarningKind, TreeStyle, TreeView};

/// 格式检查与修复
pub use epub::{MendOutcome, MendPolicy, Syntax, WellFormedResult};

// === 库信息 ===

/// quire库的版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// quire库的描述
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

// === 便捷函数 ===

/// 从本地磁盘打开EPUB文件
///
/// # 示例
///
/// ```no_run
/// let book = quire::open("book.epub")?;
/// println!("书名: {:?}", book.title());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Book> {
    Book::load(&LocalFs, path.as_ref(), &QuireConfig::default(), &CancelToken::new())
}
