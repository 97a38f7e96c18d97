pub mod book;
pub mod codec;
pub mod config;
pub mod container;
pub mod encoding;
pub mod error;
pub mod fs;
pub mod nav;
pub mod opf;
pub mod path;
pub mod resource;
pub mod session;
pub mod wellformed;
pub mod xml;

#[cfg(test)]
mod testutil;

// 重新导出错误处理
pub use error::{
    ContainerError, EpubError, FilenameError, ManifestError, MendError, NavError, Result,
    SessionError, SpineError, WellFormedError,
};

// 重新导出书籍和会话
pub use book::{Book, NavWarning, NavWarningKind, SaveOutcome};
pub use session::{CancelToken, Session, Task};

// 重新导出配置
pub use config::{
    MendSettings, NewBookSettings, ObfuscationSetting, QuireConfig, SaveSettings, TocSettings,
};

// 重新导出外部协作接口
pub use fs::{FileSystem, FixedAnswer, LocalFs, MemoryFs, PromptAnswer, UserPrompt};

// 重新导出资源和包文档
pub use codec::ObfuscationMethod;
pub use opf::{GuideReference, ManifestEntry, Metadata, MetadataEntry, Package, Spine, SpineItem};
pub use resource::{Resource, ResourceId, ResourceKind, WellFormedState};

// 重新导出导航
pub use nav::{HeadingSelection, NavEntry, NavTarget, NavTree, TreeStyle, TreeView};

// 重新导出格式检查
pub use wellformed::{MendOutcome, MendPolicy, Syntax, WellFormedResult};
