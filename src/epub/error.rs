use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EpubError>;

/// 文件名校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilenameError {
    #[error("文件名包含非法字符: {0:?}")]
    IllegalCharacter(char),

    #[error("文件名不能为空")]
    Empty,

    #[error("文件名已被占用: {0}")]
    Duplicate(String),
}

/// 容器（ZIP）层错误
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("压缩包已损坏: {0}")]
    CorruptArchive(String),

    #[error("找不到OPF文件: {0}")]
    MissingOpf(String),

    #[error("EPUB受DRM保护，无法打开: {0}")]
    EncryptedContainer(String),

    #[error("IO错误: {0}")]
    Io(#[from] io::Error),

    #[error("操作已取消")]
    Cancelled,
}

impl From<zip::result::ZipError> for ContainerError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => ContainerError::Io(e),
            other => ContainerError::CorruptArchive(other.to_string()),
        }
    }
}

/// 格式良好性错误（带位置）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("第{line}行第{column}列: {message}")]
pub struct WellFormedError {
    /// 行号（从1开始）
    pub line: usize,
    /// 列号（从1开始，按字符计）
    pub column: usize,
    /// 错误描述
    pub message: String,
}

/// 修复错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MendError {
    #[error("修复后仍不是格式良好的文档: {0}")]
    StillMalformed(WellFormedError),

    #[error("该类型的资源不支持修复: {0}")]
    Unsupported(String),
}

/// 清单操作错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("未知资源: {0}")]
    UnknownResource(String),

    #[error("不能删除最后一个内容文档: {0}")]
    LastContentDocument(String),

    #[error("受保护的资源不能删除: {0}")]
    ProtectedResource(String),

    #[error("资源不是图片: {0}")]
    NotAnImage(String),

    #[error("资源不是HTML文档: {0}")]
    NotHtml(String),

    #[error("资源不是字体: {0}")]
    NotAFont(String),

    #[error("资源不是文本资源: {0}")]
    NotText(String),

    #[error("至少需要两个文档才能合并")]
    NothingToMerge,

    #[error("文档中没有拆分标记: {0}")]
    NoSplitMarker(String),

    #[error("资源 {id} 不是格式良好的文档: {error}")]
    Malformed { id: String, error: WellFormedError },
}

/// 脊柱操作错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpineError {
    #[error("新顺序缺少脊柱项: {0}")]
    IncompleteReorder(String),

    #[error("新顺序包含未知或非HTML资源: {0}")]
    UnknownResource(String),

    #[error("新顺序包含重复项: {0}")]
    DuplicateEntry(String),
}

/// 导航操作错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NavError {
    #[error("导航条目指向未知资源: {0}")]
    UnknownTarget(String),
}

/// 会话错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("书籍正在被后台任务使用")]
    Busy,

    #[error("当前没有打开的书籍")]
    NoActiveBook,
}

/// Epub相关的错误类型
#[derive(Error, Debug)]
pub enum EpubError {
    #[error("IO错误: {0}")]
    Io(#[from] io::Error),

    #[error("容器错误: {0}")]
    Container(#[from] ContainerError),

    #[error("XML解析错误: {0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("container.xml解析错误: {0}")]
    ContainerParseError(String),

    #[error("OPF文件解析错误: {0}")]
    OpfParseError(String),

    #[error("文档格式错误: {0}")]
    WellFormed(#[from] WellFormedError),

    #[error("修复失败: {0}")]
    Mend(#[from] MendError),

    #[error("清单错误: {0}")]
    Manifest(#[from] ManifestError),

    #[error("脊柱错误: {0}")]
    Spine(#[from] SpineError),

    #[error("文件名错误: {0}")]
    Filename(#[from] FilenameError),

    #[error("导航错误: {0}")]
    Nav(#[from] NavError),

    #[error("会话错误: {0}")]
    Session(#[from] SessionError),

    #[error("配置文件错误: {0}")]
    ConfigError(String),
}

impl From<zip::result::ZipError> for EpubError {
    fn from(err: zip::result::ZipError) -> Self {
        EpubError::Container(err.into())
    }
}

impl From<quick_xml::events::attributes::AttrError> for EpubError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        EpubError::XmlError(quick_xml::Error::InvalidAttr(err))
    }
}
