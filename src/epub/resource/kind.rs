//! 资源类型
//!
//! 资源类型是一个封闭的枚举，序列化方式、是否需要格式良好性检查等差异
//! 都通过对类型的匹配来实现。

use std::fmt;

use crate::epub::path;

pub const MEDIA_TYPE_XHTML: &str = "application/xhtml+xml";
pub const MEDIA_TYPE_CSS: &str = "text/css";
pub const MEDIA_TYPE_NCX: &str = "application/x-dtbncx+xml";
pub const MEDIA_TYPE_OPF: &str = "application/oebps-package+xml";
pub const MEDIA_TYPE_SVG: &str = "image/svg+xml";

/// 资源种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Html,
    Css,
    Image,
    Font,
    Audio,
    Video,
    Ncx,
    Nav,
    Opf,
    Misc,
}

impl ResourceKind {
    /// 根据媒体类型判断资源种类
    ///
    /// Nav文档的媒体类型与普通XHTML相同，需要结合清单属性区分，
    /// 这里只返回`Html`。
    pub fn from_media_type(media_type: &str) -> Self {
        let media_type = media_type.trim().to_ascii_lowercase();
        match media_type.as_str() {
            MEDIA_TYPE_XHTML | "text/html" | "application/html" => ResourceKind::Html,
            MEDIA_TYPE_CSS => ResourceKind::Css,
            MEDIA_TYPE_NCX => ResourceKind::Ncx,
            MEDIA_TYPE_OPF => ResourceKind::Opf,
            "application/vnd.ms-opentype"
            | "application/font-sfnt"
            | "application/font-woff"
            | "application/x-font-ttf"
            | "application/x-font-truetype"
            | "application/x-font-opentype"
            | "application/x-truetype-font" => ResourceKind::Font,
            other if other.starts_with("image/") => ResourceKind::Image,
            other if other.starts_with("font/") => ResourceKind::Font,
            other if other.starts_with("audio/") => ResourceKind::Audio,
            other if other.starts_with("video/") => ResourceKind::Video,
            _ => ResourceKind::Misc,
        }
    }

    /// 是否为XML类资源，需要做格式良好性检查
    pub fn is_xml(&self) -> bool {
        matches!(
            self,
            ResourceKind::Html | ResourceKind::Nav | ResourceKind::Ncx | ResourceKind::Opf
        )
    }

    /// 是否为HTML内容文档（可进入脊柱）
    pub fn is_content_document(&self) -> bool {
        matches!(self, ResourceKind::Html)
    }

    /// 新增文件时默认放置的目录
    pub fn default_folder(&self) -> &'static str {
        match self {
            ResourceKind::Html | ResourceKind::Nav => "Text",
            ResourceKind::Css => "Styles",
            ResourceKind::Image => "Images",
            ResourceKind::Font => "Fonts",
            ResourceKind::Audio => "Audio",
            ResourceKind::Video => "Video",
            ResourceKind::Ncx | ResourceKind::Opf => "",
            ResourceKind::Misc => "Misc",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Html => "HTML",
            ResourceKind::Css => "CSS",
            ResourceKind::Image => "图片",
            ResourceKind::Font => "字体",
            ResourceKind::Audio => "音频",
            ResourceKind::Video => "视频",
            ResourceKind::Ncx => "NCX",
            ResourceKind::Nav => "Nav",
            ResourceKind::Opf => "OPF",
            ResourceKind::Misc => "其他",
        };
        write!(f, "{}", name)
    }
}

/// 判断媒体类型对应的内容是否按文本保存
pub fn is_text_media_type(media_type: &str) -> bool {
    let media_type = media_type.trim().to_ascii_lowercase();
    media_type.starts_with("text/")
        || media_type.ends_with("+xml")
        || media_type.ends_with("/xml")
        || media_type == "application/javascript"
        || media_type == "application/ecmascript"
        || media_type == "application/json"
}

/// 判断媒体类型是否为XML（需要格式良好性检查）
pub fn is_xml_media_type(media_type: &str) -> bool {
    let media_type = media_type.trim().to_ascii_lowercase();
    media_type.ends_with("+xml") || media_type.ends_with("/xml")
}

/// 根据文件扩展名猜测媒体类型
///
/// EPUB核心媒体类型和字体按出版物的约定给出，其余交给`mime_guess`。
pub fn media_type_for_path(file_path: &str) -> &'static str {
    let (_, extension) = path::split_extension(path::file_name(file_path));
    let extension = extension.unwrap_or_default().to_ascii_lowercase();
    match extension.as_str() {
        "xhtml" | "html" | "htm" | "xht" => MEDIA_TYPE_XHTML,
        "css" => MEDIA_TYPE_CSS,
        "ncx" => MEDIA_TYPE_NCX,
        "opf" => MEDIA_TYPE_OPF,
        "svg" => MEDIA_TYPE_SVG,
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "js" => "application/javascript",
        "smil" => "application/smil+xml",
        "pls" => "application/pls+xml",
        "" => "application/octet-stream",
        other => mime_guess::from_ext(other)
            .first_raw()
            .unwrap_or("application/octet-stream"),
    }
}
