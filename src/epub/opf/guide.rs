//! EPUB2 guide

/// guide中的一条引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuideReference {
    /// 引用类型（cover、toc、text等）
    pub kind: String,
    pub title: Option<String>,
    /// 相对于OPF的href，可以带片段
    pub href: String,
}

impl GuideReference {
    pub fn new(kind: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            title: None,
            href: href.into(),
        }
    }
}
