//! OPF包文档模型

use crate::epub::opf::guide::GuideReference;
use crate::epub::opf::manifest::ManifestEntry;
use crate::epub::opf::metadata::Metadata;
use crate::epub::opf::spine::Spine;

/// 默认的唯一标识符ID
pub const DEFAULT_UNIQUE_IDENTIFIER: &str = "BookId";

/// OPF包文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// version属性（"2.0"或"3.0"）
    pub version: String,
    /// unique-identifier属性
    pub unique_identifier: Option<String>,
    /// package元素的其他属性（prefix、xml:lang、dir等）
    pub(crate) attributes: Vec<(String, String)>,
    /// 元数据
    pub metadata: Metadata,
    /// 清单（保持文档顺序）
    pub manifest: Vec<ManifestEntry>,
    /// 脊柱
    pub spine: Spine,
    /// EPUB2 guide
    pub guide: Vec<GuideReference>,
}

impl Package {
    /// 创建空的包文档
    pub fn new(epub_version: u8) -> Self {
        Self {
            version: if epub_version >= 3 { "3.0" } else { "2.0" }.to_string(),
            unique_identifier: Some(DEFAULT_UNIQUE_IDENTIFIER.to_string()),
            attributes: Vec::new(),
            metadata: Metadata::new(),
            manifest: Vec::new(),
            spine: Spine::new(),
            guide: Vec::new(),
        }
    }

    /// 主版本号，只区分2和3
    pub fn epub_version(&self) -> u8 {
        if self.version.trim().starts_with('3') { 3 } else { 2 }
    }

    pub fn manifest_entry(&self, id: &str) -> Option<&ManifestEntry> {
        self.manifest.iter().find(|entry| entry.id == id)
    }

    pub fn manifest_entry_mut(&mut self, id: &str) -> Option<&mut ManifestEntry> {
        self.manifest.iter_mut().find(|entry| entry.id == id)
    }

    /// 移除清单项，返回被移除的项
    pub fn remove_manifest_entry(&mut self, id: &str) -> Option<ManifestEntry> {
        let index = self.manifest.iter().position(|entry| entry.id == id)?;
        Some(self.manifest.remove(index))
    }

    /// 带nav属性的清单项
    pub fn nav_entry(&self) -> Option<&ManifestEntry> {
        self.manifest.iter().find(|entry| entry.is_nav())
    }

    /// 带cover-image属性的清单项
    pub fn cover_image_entry(&self) -> Option<&ManifestEntry> {
        self.manifest.iter().find(|entry| entry.is_cover_image())
    }

    /// 书籍唯一标识符的值
    pub fn unique_identifier_value(&self) -> Option<String> {
        self.metadata
            .unique_identifier(self.unique_identifier.as_deref())
    }

    /// package元素的其他属性
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::opf::metadata::MetadataEntry;

    #[test]
    fn test_version_and_lookup() {
        let mut package = Package::new(3);
        assert_eq!(package.version, "3.0");
        assert_eq!(package.epub_version(), 3);

        package
            .manifest
            .push(ManifestEntry::new("nav", "nav.xhtml", "application/xhtml+xml").with_properties("nav"));
        package.manifest.push(ManifestEntry::new("c1", "c1.xhtml", "application/xhtml+xml"));
        assert_eq!(package.nav_entry().map(|e| e.id.as_str()), Some("nav"));
        assert!(package.cover_image_entry().is_none());
        assert_eq!(package.remove_manifest_entry("c1").map(|e| e.href), Some("c1.xhtml".to_string()));
        assert!(package.manifest_entry("c1").is_none());
    }

    #[test]
    fn test_unique_identifier_value() {
        let mut package = Package::new(2);
        assert_eq!(package.epub_version(), 2);
        package
            .metadata
            .push(MetadataEntry::new("dc:identifier", "urn:isbn:1").with_attribute("id", "BookId"));
        assert_eq!(package.unique_identifier_value().as_deref(), Some("urn:isbn:1"));
    }
}
