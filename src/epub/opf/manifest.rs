//! 清单模块
//!
//! 提供EPUB包中文件清单的结构定义。

/// 清单项信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// 项目ID，与资源ID一致
    pub id: String,
    /// 文件路径(相对于OPF文件，经过URL编码)
    pub href: String,
    /// 媒体类型
    pub media_type: String,
    /// 属性(如nav、cover-image等)
    pub properties: Vec<String>,
    /// 回退项ID
    pub fallback: Option<String>,
    /// 媒体覆盖层ID
    pub media_overlay: Option<String>,
}

impl ManifestEntry {
    /// 创建新的清单项
    pub fn new(id: impl Into<String>, href: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            href: href.into(),
            media_type: media_type.into(),
            properties: Vec::new(),
            fallback: None,
            media_overlay: None,
        }
    }

    /// 从空格分隔的属性字符串设置属性
    pub fn with_properties(mut self, properties: &str) -> Self {
        self.properties = properties.split_whitespace().map(str::to_string).collect();
        self
    }

    /// 检查是否包含指定属性
    pub fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }

    /// 添加属性（已存在时不重复添加）
    pub fn add_property(&mut self, property: &str) {
        if !self.has_property(property) {
            self.properties.push(property.to_string());
        }
    }

    /// 移除属性，返回是否存在过
    pub fn remove_property(&mut self, property: &str) -> bool {
        let before = self.properties.len();
        self.properties.retain(|p| p != property);
        before != self.properties.len()
    }

    /// 检查是否为导航文档
    pub fn is_nav(&self) -> bool {
        self.has_property("nav")
    }

    /// 检查是否为封面图片
    pub fn is_cover_image(&self) -> bool {
        self.has_property("cover-image")
    }
}
