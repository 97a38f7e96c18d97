//! OPF解析器模块
//!
//! 提供OPF（Open Packaging Format）文件的XML解析功能。解析器只负责把XML
//! 转换为`Package`，清单与资源的对应关系由加载流程校验。

use crate::epub::error::{EpubError, Result};
use crate::epub::opf::{
    guide::GuideReference,
    manifest::ManifestEntry,
    metadata::MetadataEntry,
    package::Package,
    spine::SpineItem,
};
use crate::epub::xml;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

/// 当前所在的OPF区段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Metadata,
    Manifest,
    Spine,
    Guide,
}

impl Package {
    /// 解析OPF文件内容
    ///
    /// # 参数
    /// * `xml_content` - OPF文件的XML内容
    ///
    /// # 返回值
    /// * `Result<Package, EpubError>` - 解析后的包文档
    pub fn parse_xml(xml_content: &str) -> Result<Package> {
        let mut reader = Reader::from_str(xml_content);
        reader.config_mut().trim_text(true);
        reader.config_mut().expand_empty_elements = true;

        let mut package = Package::new(2);
        package.version.clear();
        package.unique_identifier = None;
        let mut found_package = false;

        let mut buf = Vec::new();
        let mut section = Section::None;
        // 正在读取的元数据条目和它的嵌套深度
        let mut current_entry: Option<MetadataEntry> = None;
        let mut entry_depth = 0usize;

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(ref e) => {
                    if current_entry.is_some() {
                        // 元数据条目内部的子元素只保留文本
                        entry_depth += 1;
                        buf.clear();
                        continue;
                    }

                    let local_name = e.local_name();
                    match (section, local_name.as_ref()) {
                        (_, b"package") => {
                            found_package = true;
                            Self::parse_package_attributes(e, &mut package)?;
                        }
                        (_, b"metadata") => {
                            section = Section::Metadata;
                            package.metadata.attributes = xml::collect_attributes(e)?;
                        }
                        (_, b"manifest") => section = Section::Manifest,
                        (_, b"spine") => {
                            section = Section::Spine;
                            package.spine.toc = xml::attribute(e, b"toc")?;
                            package.spine.page_progression_direction =
                                xml::attribute(e, b"page-progression-direction")?;
                        }
                        (_, b"guide") => section = Section::Guide,
                        // OEB 1.x 的分组元素，内部的条目照常读取
                        (Section::Metadata, b"dc-metadata" | b"x-metadata") => {}
                        (Section::Metadata, _) => {
                            current_entry = Some(MetadataEntry {
                                name: String::from_utf8_lossy(e.name().as_ref()).to_string(),
                                value: String::new(),
                                attributes: xml::collect_attributes(e)?,
                            });
                            entry_depth = 1;
                        }
                        (Section::Manifest, b"item") => {
                            if let Some(entry) = Self::parse_manifest_item(e)? {
                                package.manifest.push(entry);
                            }
                        }
                        (Section::Spine, b"itemref") => {
                            if let Some(item) = Self::parse_spine_item(e)? {
                                package.spine.items.push(item);
                            }
                        }
                        (Section::Guide, b"reference") => {
                            if let Some(reference) = Self::parse_guide_reference(e)? {
                                package.guide.push(reference);
                            }
                        }
                        _ => {}
                    }
                }
                Event::End(ref e) => {
                    if current_entry.is_some() {
                        entry_depth -= 1;
                        if entry_depth == 0 {
                            if let Some(mut entry) = current_entry.take() {
                                entry.value = entry.value.trim().to_string();
                                package.metadata.push(entry);
                            }
                        }
                        buf.clear();
                        continue;
                    }
                    match e.local_name().as_ref() {
                        b"metadata" | b"manifest" | b"spine" | b"guide" => section = Section::None,
                        _ => {}
                    }
                }
                Event::Text(e) => {
                    if let Some(entry) = current_entry.as_mut() {
                        entry.value.push_str(&e.unescape()?);
                    }
                }
                Event::CData(e) => {
                    if let Some(entry) = current_entry.as_mut() {
                        entry.value.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !found_package {
            return Err(EpubError::OpfParseError("缺少package元素".to_string()));
        }
        if package.version.is_empty() {
            package.version = "2.0".to_string();
        }

        Ok(package)
    }

    /// 解析package元素的属性
    fn parse_package_attributes(e: &BytesStart, package: &mut Package) -> Result<()> {
        for (key, value) in xml::collect_attributes(e)? {
            match key.as_str() {
                "version" => package.version = value.trim().to_string(),
                "unique-identifier" => package.unique_identifier = Some(value),
                "xmlns" => {}
                _ => package.attributes.push((key, value)),
            }
        }
        Ok(())
    }

    /// 解析清单项，缺少id或href时忽略
    fn parse_manifest_item(e: &BytesStart) -> Result<Option<ManifestEntry>> {
        let mut entry = ManifestEntry::new("", "", "");
        for attr in e.attributes() {
            let attr = attr?;
            let value = attr.unescape_value()?.to_string();
            match attr.key.local_name().as_ref() {
                b"id" => entry.id = value.trim().to_string(),
                b"href" => entry.href = value.trim().to_string(),
                b"media-type" => entry.media_type = value.trim().to_string(),
                b"properties" => entry = entry.with_properties(&value),
                b"fallback" => entry.fallback = Some(value),
                b"media-overlay" => entry.media_overlay = Some(value),
                _ => {}
            }
        }
        if entry.href.is_empty() {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// 解析脊柱项
    fn parse_spine_item(e: &BytesStart) -> Result<Option<SpineItem>> {
        let Some(idref) = xml::attribute(e, b"idref")? else {
            return Ok(None);
        };
        let mut item = SpineItem::new(idref.trim());
        if let Some(linear) = xml::attribute(e, b"linear")? {
            item.linear = linear.trim() != "no";
        }
        if let Some(properties) = xml::attribute(e, b"properties")? {
            item.properties = properties.split_whitespace().map(str::to_string).collect();
        }
        Ok(Some(item))
    }

    /// 解析guide引用
    fn parse_guide_reference(e: &BytesStart) -> Result<Option<GuideReference>> {
        let Some(href) = xml::attribute(e, b"href")? else {
            return Ok(None);
        };
        let mut reference = GuideReference::new(xml::attribute(e, b"type")?.unwrap_or_default(), href);
        reference.title = xml::attribute(e, b"title")?;
        Ok(Some(reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="BookId" xml:lang="zh">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:title>测试书籍 &amp; 副标题</dc:title>
    <dc:creator opf:role="aut">测试作者</dc:creator>
    <dc:identifier id="BookId">urn:uuid:12345678-1234-1234-1234-1234567890ab</dc:identifier>
    <dc:language>zh</dc:language>
    <meta name="cover" content="cover-img"/>
    <calibre:custom xmlns:calibre="http://calibre.kovidgoyal.net">自定义</calibre:custom>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="cover" href="Text/cover.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch1" href="Text/chapter%201.xhtml" media-type="application/xhtml+xml" fallback="cover"/>
    <item id="cover-img" href="Images/cover.jpg" media-type="image/jpeg" properties="cover-image"/>
    <item id="broken" media-type="text/css"/>
  </manifest>
  <spine toc="ncx" page-progression-direction="rtl">
    <itemref idref="cover" linear="no"/>
    <itemref idref="ch1" properties="page-spread-left"/>
    <itemref/>
  </spine>
  <guide>
    <reference type="cover" title="封面" href="Text/cover.xhtml"/>
  </guide>
</package>"#;

    #[test]
    fn test_parse_package() {
        let package = Package::parse_xml(OPF).unwrap();
        assert_eq!(package.version, "2.0");
        assert_eq!(package.epub_version(), 2);
        assert_eq!(package.unique_identifier.as_deref(), Some("BookId"));
        assert_eq!(package.attributes(), &[("xml:lang".to_string(), "zh".to_string())]);
    }

    #[test]
    fn test_parse_metadata_is_opaque() {
        let package = Package::parse_xml(OPF).unwrap();
        let metadata = &package.metadata;
        assert_eq!(metadata.title().as_deref(), Some("测试书籍 & 副标题"));
        assert_eq!(metadata.cover_id(), Some("cover-img"));
        assert_eq!(metadata.entries().len(), 6);
        let custom = &metadata.entries()[5];
        assert_eq!(custom.name, "calibre:custom");
        assert_eq!(custom.value, "自定义");
        assert_eq!(custom.attribute("xmlns:calibre"), Some("http://calibre.kovidgoyal.net"));
        assert_eq!(
            package.unique_identifier_value().as_deref(),
            Some("urn:uuid:12345678-1234-1234-1234-1234567890ab")
        );
    }

    #[test]
    fn test_parse_manifest_and_spine() {
        let package = Package::parse_xml(OPF).unwrap();
        assert_eq!(package.manifest.len(), 4);
        let ch1 = package.manifest_entry("ch1").unwrap();
        assert_eq!(ch1.href, "Text/chapter%201.xhtml");
        assert_eq!(ch1.fallback.as_deref(), Some("cover"));
        assert_eq!(package.cover_image_entry().map(|e| e.id.as_str()), Some("cover-img"));

        assert_eq!(package.spine.ids(), vec!["cover", "ch1"]);
        assert!(!package.spine.items[0].linear);
        assert_eq!(package.spine.items[1].properties, vec!["page-spread-left".to_string()]);
        assert_eq!(package.spine.toc.as_deref(), Some("ncx"));
        assert_eq!(package.spine.page_progression_direction.as_deref(), Some("rtl"));

        assert_eq!(package.guide.len(), 1);
        assert_eq!(package.guide[0].title.as_deref(), Some("封面"));
    }

    #[test]
    fn test_parse_missing_package() {
        assert!(matches!(
            Package::parse_xml("<root/>"),
            Err(EpubError::OpfParseError(_))
        ));
    }

    #[test]
    fn test_parse_epub3_meta_with_text() {
        let opf = r##"<package version="3.0" unique-identifier="uid" prefix="rendition: http://www.idpf.org/vocab/rendition/#">
  <metadata>
    <dc:identifier id="uid">id-1</dc:identifier>
    <meta property="dcterms:modified">2024-01-01T00:00:00Z</meta>
    <meta refines="#uid" property="identifier-type">uuid</meta>
  </metadata>
  <manifest/>
  <spine/>
</package>"##;
        let package = Package::parse_xml(opf).unwrap();
        assert_eq!(package.epub_version(), 3);
        assert_eq!(package.metadata.modified(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(package.metadata.entries()[2].attribute("refines"), Some("#uid"));
        assert!(package.attributes().iter().any(|(k, _)| k == "prefix"));
    }
}
