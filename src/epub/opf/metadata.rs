//! 元数据处理模块
//!
//! 核心不解释元数据的语义，`<metadata>`下的每个子元素都按
//! (名称, 值, 属性)原样保存并在保存时写回，未知或自定义的元素不会丢失。
//! 这里只提供少量读取和维护封面、修改时间等所需的便捷方法。

/// 一条元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    /// 限定名，如`dc:title`、`meta`
    pub name: String,
    /// 文本内容（已反转义）
    pub value: String,
    /// 属性（保持原始顺序）
    pub attributes: Vec<(String, String)>,
}

impl MetadataEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            attributes: Vec::new(),
        }
    }

    /// 添加属性
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// 去掉命名空间前缀后的本地名
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    /// 按名称查找属性（同时匹配带前缀和不带前缀的写法，如`opf:role`与`role`）
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key || local_name(k) == key)
            .map(|(_, v)| v.as_str())
    }

    /// 设置属性，已存在时覆盖
    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    /// 是否为Dublin Core元素
    pub fn is_dublin_core(&self) -> bool {
        self.name.starts_with("dc:")
    }
}

/// OPF文件中的元数据信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// `<metadata>`元素自身的属性（命名空间声明等）
    pub(crate) attributes: Vec<(String, String)>,
    /// 元数据条目（保持原始顺序）
    entries: Vec<MetadataEntry>,
}

impl Metadata {
    /// 创建新的元数据实例
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部条目
    pub fn entries(&self) -> &[MetadataEntry] {
        &self.entries
    }

    /// 可变访问全部条目
    pub fn entries_mut(&mut self) -> &mut Vec<MetadataEntry> {
        &mut self.entries
    }

    /// 追加一条元数据
    pub fn push(&mut self, entry: MetadataEntry) {
        self.entries.push(entry);
    }

    /// `<metadata>`元素的属性
    pub fn element_attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// 按本地名查找第一条Dublin Core元数据的值
    fn first_dc(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.local_name() == name && e.name != "meta")
            .map(|e| e.value.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    /// 获取标题
    pub fn title(&self) -> Option<String> {
        self.first_dc("title").map(|s| s.trim().to_string())
    }

    /// 获取语言
    pub fn language(&self) -> Option<String> {
        self.first_dc("language").map(|s| s.trim().to_string())
    }

    /// 获取所有创建者姓名
    pub fn creators(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.local_name() == "creator")
            .map(|e| e.value.trim().to_string())
            .collect()
    }

    /// 获取所有标识符
    pub fn identifiers(&self) -> Vec<&MetadataEntry> {
        self.entries
            .iter()
            .filter(|e| e.local_name() == "identifier")
            .collect()
    }

    /// 根据package的unique-identifier属性获取唯一标识符
    ///
    /// 找不到对应ID时退回第一个标识符。
    pub fn unique_identifier(&self, unique_identifier_id: Option<&str>) -> Option<String> {
        let identifiers = self.identifiers();
        unique_identifier_id
            .and_then(|id| identifiers.iter().find(|e| e.attribute("id") == Some(id)))
            .or_else(|| identifiers.first())
            .map(|e| e.value.trim().to_string())
    }

    /// 查找UUID形式的标识符（Adobe字体混淆需要）
    pub fn uuid_identifier(&self) -> Option<String> {
        self.identifiers()
            .into_iter()
            .map(|e| e.value.trim())
            .find(|v| v.to_ascii_lowercase().starts_with("urn:uuid:"))
            .map(|v| v.to_string())
    }

    /// 获取EPUB2风格`<meta name="cover" content="..."/>`指向的ID
    pub fn cover_id(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.local_name() == "meta" && e.attribute("name") == Some("cover"))
            .and_then(|e| e.attribute("content"))
    }

    /// 设置或移除EPUB2风格的封面meta
    pub fn set_cover_id(&mut self, cover_id: Option<&str>) {
        let position = self
            .entries
            .iter()
            .position(|e| e.local_name() == "meta" && e.attribute("name") == Some("cover"));

        match (position, cover_id) {
            (Some(pos), Some(id)) => self.entries[pos].set_attribute("content", id),
            (Some(pos), None) => {
                self.entries.remove(pos);
            }
            (None, Some(id)) => self.entries.push(
                MetadataEntry::new("meta", "")
                    .with_attribute("name", "cover")
                    .with_attribute("content", id),
            ),
            (None, None) => {}
        }
    }

    /// 获取`dcterms:modified`
    pub fn modified(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.local_name() == "meta" && e.attribute("property") == Some("dcterms:modified"))
            .map(|e| e.value.as_str())
    }

    /// 设置`dcterms:modified`
    pub fn set_modified(&mut self, timestamp: impl Into<String>) {
        let timestamp = timestamp.into();
        match self
            .entries
            .iter_mut()
            .find(|e| e.local_name() == "meta" && e.attribute("property") == Some("dcterms:modified"))
        {
            Some(entry) => entry.value = timestamp,
            None => self.entries.push(
                MetadataEntry::new("meta", timestamp).with_attribute("property", "dcterms:modified"),
            ),
        }
    }

    /// 把EPUB2元数据中使用`opf:`前缀的属性保留下来所需的命名空间
    pub fn uses_opf_prefix(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.attributes.iter().any(|(k, _)| k.starts_with("opf:")))
    }
}

/// 去掉限定名中的前缀
pub fn local_name(name: &str) -> &str {
    match name.rfind(':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}
