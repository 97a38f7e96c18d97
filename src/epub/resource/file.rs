//! 资源对象
//!
//! 一个资源对应容器中的一个逻辑文件。文本资源保存解码后的Unicode文本，
//! 二进制资源保存原始字节。

use std::borrow::{Borrow, Cow};
use std::fmt;

use crate::epub::codec::ObfuscationMethod;
use crate::epub::encoding;
use crate::epub::error::WellFormedError;
use crate::epub::path;
use crate::epub::resource::kind::{self, ResourceKind};

/// 资源ID，在一本书中唯一且在资源生命周期内不变
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// 资源内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// 文本内容（已解码）
    Text(String),
    /// 二进制内容
    Binary(Vec<u8>),
}

/// 格式良好性状态
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WellFormedState {
    /// 尚未检查
    #[default]
    Unchecked,
    /// 格式良好
    WellFormed,
    /// 格式错误
    Malformed(WellFormedError),
    /// 经修复后格式良好
    Mended,
    /// 修复失败
    MendFailed(WellFormedError),
}

impl WellFormedState {
    /// 当前内容是否已确认为格式良好
    pub fn is_ok(&self) -> bool {
        matches!(self, WellFormedState::WellFormed | WellFormedState::Mended)
    }

    /// 已知的错误信息
    pub fn error(&self) -> Option<&WellFormedError> {
        match self {
            WellFormedState::Malformed(e) | WellFormedState::MendFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// 书中的一个资源
#[derive(Debug, Clone)]
pub struct Resource {
    /// 资源ID
    pub(crate) id: ResourceId,
    /// 容器内路径
    pub(crate) relative_path: String,
    /// 媒体类型
    pub(crate) media_type: String,
    /// 资源种类
    pub(crate) kind: ResourceKind,
    /// 内容
    pub(crate) content: Content,
    /// 文本资源加载时的原始字节，内容未修改时原样写回
    pub(crate) original: Option<Vec<u8>>,
    /// 加载后是否修改过
    pub(crate) modified: bool,
    /// 格式良好性状态
    pub(crate) state: WellFormedState,
    /// 保存时使用的字体混淆算法
    pub(crate) obfuscation: Option<ObfuscationMethod>,
}

impl Resource {
    /// 根据原始字节创建资源，按媒体类型决定以文本还是二进制保存
    pub fn from_bytes(
        id: ResourceId,
        relative_path: impl Into<String>,
        media_type: impl Into<String>,
        kind: ResourceKind,
        bytes: Vec<u8>,
    ) -> Self {
        let media_type = media_type.into();
        let (content, original) = if kind.is_xml()
            || kind == ResourceKind::Css
            || kind::is_text_media_type(&media_type)
        {
            (Content::Text(encoding::decode_text(&bytes).text), Some(bytes))
        } else {
            (Content::Binary(bytes), None)
        };

        Self {
            id,
            relative_path: relative_path.into(),
            media_type,
            kind,
            content,
            original,
            modified: false,
            state: WellFormedState::Unchecked,
            obfuscation: None,
        }
    }

    /// 创建新的文本资源（没有原始字节）
    pub fn new_text(
        id: ResourceId,
        relative_path: impl Into<String>,
        media_type: impl Into<String>,
        kind: ResourceKind,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id,
            relative_path: relative_path.into(),
            media_type: media_type.into(),
            kind,
            content: Content::Text(text.into()),
            original: None,
            modified: true,
            state: WellFormedState::Unchecked,
            obfuscation: None,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn file_name(&self) -> &str {
        path::file_name(&self.relative_path)
    }

    /// 资源所在目录
    pub fn folder(&self) -> &str {
        path::parent_dir(&self.relative_path)
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn state(&self) -> &WellFormedState {
        &self.state
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn obfuscation(&self) -> Option<ObfuscationMethod> {
        self.obfuscation
    }

    /// 文本内容，二进制资源返回None
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Content::Text(text) => Some(text),
            Content::Binary(_) => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.content, Content::Text(_))
    }

    /// 是否需要做格式良好性检查
    pub fn is_checkable(&self) -> bool {
        self.is_text()
            && (self.kind.is_xml()
                || self.kind == ResourceKind::Css
                || kind::is_xml_media_type(&self.media_type))
    }

    /// 写入容器的字节（未修改的资源原样返回加载时的字节）
    pub fn bytes(&self) -> Cow<'_, [u8]> {
        if !self.modified {
            if let Some(original) = &self.original {
                return Cow::Borrowed(original);
            }
        }
        match &self.content {
            Content::Text(text) => Cow::Borrowed(text.as_bytes()),
            Content::Binary(bytes) => Cow::Borrowed(bytes),
        }
    }

    /// 替换文本内容
    pub(crate) fn set_text(&mut self, text: String) {
        self.content = Content::Text(text);
        self.modified = true;
        self.state = WellFormedState::Unchecked;
    }

    /// 替换二进制内容
    pub(crate) fn set_binary(&mut self, bytes: Vec<u8>) {
        self.content = Content::Binary(bytes);
        self.modified = true;
    }
}
