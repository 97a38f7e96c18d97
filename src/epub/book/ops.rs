//! 书籍的编辑操作
//!
//! 所有操作先校验再修改，返回错误时书籍保持原样。

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::epub::book::Book;
use crate::epub::codec::ObfuscationMethod;
use crate::epub::config::QuireConfig;
use crate::epub::error::{ManifestError, NavError, Result};
use crate::epub::nav::NavTree;
use crate::epub::opf::{DEFAULT_UNIQUE_IDENTIFIER, ManifestEntry, MetadataEntry, Package, SpineItem};
use crate::epub::path;
use crate::epub::resource::{
    MEDIA_TYPE_XHTML, Resource, ResourceId, ResourceKind, check_filename_chars, media_type_for_path,
};

/// 新建书籍时OPF的位置
const NEW_BOOK_OPF_PATH: &str = "OEBPS/content.opf";

impl Book {
    /// 新建一本只有一个空白章节的书
    pub fn new_empty(config: &QuireConfig) -> Book {
        let settings = &config.new_book;
        let version = if settings.version >= 3 { 3 } else { 2 };

        let mut package = Package::new(version);
        package.metadata.push(
            MetadataEntry::new("dc:identifier", format!("urn:uuid:{}", Uuid::new_v4()))
                .with_attribute("id", DEFAULT_UNIQUE_IDENTIFIER),
        );
        package
            .metadata
            .push(MetadataEntry::new("dc:title", settings.title.as_str()));
        package
            .metadata
            .push(MetadataEntry::new("dc:language", settings.language.as_str()));
        if version >= 3 {
            package.metadata.set_modified(utc_timestamp());
        }

        let mut book = Book::empty(package, NEW_BOOK_OPF_PATH, config);
        let section = book.add_blank_section();
        book.package
            .spine
            .insert(None, SpineItem::new(section.as_str()));
        book.ensure_navigation_documents();
        book.check_all();
        info!("新建EPUB{}书籍", version);
        book
    }

    /// 在Text目录中添加一个空白章节（不加入脊柱）
    pub(super) fn add_blank_section(&mut self) -> ResourceId {
        let folder = path::join(self.opf_dir(), ResourceKind::Html.default_folder());
        let name = self.registry.unique_filename(&folder, "Section0001.xhtml");
        let id = self.registry.id_for_filename(&name);
        let language = self.package.metadata.language().unwrap_or_default();
        let text = blank_section(self.epub_version(), &language);
        let resource = Resource::new_text(
            id.clone(),
            path::join(&folder, &name),
            MEDIA_TYPE_XHTML,
            ResourceKind::Html,
            text,
        );
        self.insert_resource(resource, &[]);
        id
    }

    /// 添加资源
    ///
    /// HTML文档同时加入脊柱，`spine_position`为None时追加到末尾。
    ///
    /// # 参数
    /// * `relative_path` - 容器内路径
    /// * `media_type` - 媒体类型，为空时按扩展名推断
    pub fn add(
        &mut self,
        relative_path: &str,
        media_type: &str,
        data: Vec<u8>,
        spine_position: Option<usize>,
    ) -> Result<ManifestEntry> {
        let relative_path = path::normalize(relative_path);
        self.registry.validate_filename(
            path::parent_dir(&relative_path),
            path::file_name(&relative_path),
        )?;

        let media_type = if media_type.trim().is_empty() {
            media_type_for_path(&relative_path)
        } else {
            media_type
        };
        let kind = ResourceKind::from_media_type(media_type);
        let id = self.registry.id_for_filename(path::file_name(&relative_path));
        let resource = Resource::from_bytes(id.clone(), relative_path.as_str(), media_type, kind, data);
        let entry = self.insert_resource(resource, &[]);

        if kind == ResourceKind::Html {
            let position = spine_position.map(|p| p.min(self.package.spine.len()));
            self.package
                .spine
                .insert(position, SpineItem::new(id.as_str()));
        }
        self.refresh_state(id.as_str());
        debug!("添加资源 {} ({})", relative_path, id);
        Ok(entry)
    }

    /// 按资源种类放入默认目录，文件名冲突时自动改名
    pub fn add_file(&mut self, file_name: &str, data: Vec<u8>) -> Result<ManifestEntry> {
        check_filename_chars(file_name)?;
        let media_type = media_type_for_path(file_name);
        let kind = ResourceKind::from_media_type(media_type);
        let folder = path::join(self.opf_dir(), kind.default_folder());
        let name = self.registry.unique_filename(&folder, file_name);
        self.add(&path::join(&folder, &name), media_type, data, None)
    }

    /// 批量添加文件，HTML按给出的顺序加入脊柱
    ///
    /// 先检查全部文件名，任何一个不合法时什么也不添加。
    pub fn add_existing_files(&mut self, files: Vec<(String, Vec<u8>)>) -> Result<Vec<ResourceId>> {
        for (name, _) in &files {
            check_filename_chars(name)?;
        }
        let mut ids = Vec::with_capacity(files.len());
        for (name, data) in files {
            let entry = self.add_file(&name, data)?;
            ids.push(ResourceId::new(entry.id));
        }
        info!("批量添加了{}个文件", ids.len());
        Ok(ids)
    }

    /// 删除资源
    ///
    /// 指向它的目录条目只被标记为脱离，需要调用`prune_detached`清理。
    pub fn remove(&mut self, id: &str) -> Result<Resource> {
        let resource = self
            .resources
            .get(id)
            .ok_or_else(|| ManifestError::UnknownResource(id.to_string()))?;

        let is_protected = [self.nav_resource_id(), self.ncx_resource_id()]
            .iter()
            .flatten()
            .any(|protected| protected.as_str() == id);
        if is_protected {
            return Err(ManifestError::ProtectedResource(id.to_string()).into());
        }

        if resource.kind() == ResourceKind::Html && self.package.spine.contains(id) {
            let html_in_spine = self
                .package
                .spine
                .items
                .iter()
                .filter(|item| self.is_html(&item.idref))
                .count();
            if html_in_spine <= 1 {
                return Err(ManifestError::LastContentDocument(id.to_string()).into());
            }
        }

        let Some(resource) = self.detach_resource(id) else {
            return Err(ManifestError::UnknownResource(id.to_string()).into());
        };

        let detached = self.nav_tree.detach_resource(id);
        if detached > 0 {
            self.nav_dirty = true;
            info!("{}个目录条目已脱离", detached);
        }
        if self.package.metadata.cover_id() == Some(id) {
            self.package.metadata.set_cover_id(None);
        }

        let opf_dir = self.opf_dir().to_string();
        let removed_path = resource.relative_path();
        self.package
            .guide
            .retain(|reference| path::resolve_href(&opf_dir, &reference.href) != removed_path);
        for entry in &mut self.package.manifest {
            if entry.fallback.as_deref() == Some(id) {
                entry.fallback = None;
            }
            if entry.media_overlay.as_deref() == Some(id) {
                entry.media_overlay = None;
            }
        }

        info!("删除资源 {}", resource.relative_path());
        Ok(resource)
    }

    /// 在原目录中重命名资源，并改写其他资源中对它的引用
    pub fn rename(&mut self, id: &str, new_name: &str) -> Result<()> {
        let resource = self
            .resources
            .get(id)
            .ok_or_else(|| ManifestError::UnknownResource(id.to_string()))?;
        let old_path = resource.relative_path().to_string();
        let folder = resource.folder().to_string();
        self.registry
            .validate_filename_for(&folder, new_name, Some(&old_path))?;

        let new_path = path::join(&folder, new_name);
        if new_path == old_path {
            return Ok(());
        }

        self.registry.release_path(&old_path);
        self.registry.register_path(&new_path);
        let href = self.manifest_href(&new_path);
        if let Some(resource) = self.resources.get_mut(id) {
            resource.relative_path = new_path.clone();
        }
        if let Some(entry) = self.package.manifest_entry_mut(id) {
            entry.href = href;
        }

        let retarget = |target: &str, fragment: Option<&str>| {
            (target == old_path).then(|| (new_path.clone(), fragment.map(str::to_string)))
        };
        let changed = self.retarget_references(retarget);
        self.retarget_guide(retarget);
        info!("{} 重命名为 {}，更新了{}个文件中的引用", old_path, new_name, changed);
        Ok(())
    }

    /// 整体调整阅读顺序
    pub fn reorder(&mut self, new_order: &[&str]) -> Result<()> {
        let resources = &self.resources;
        self.package.spine.reorder(new_order, |id| {
            resources
                .get(id)
                .is_some_and(|resource| resource.kind() == ResourceKind::Html)
        })?;
        Ok(())
    }

    /// 设置封面图片，同一时间只有一个清单项带cover-image属性
    pub fn set_cover(&mut self, id: &str) -> Result<()> {
        let resource = self
            .resources
            .get(id)
            .ok_or_else(|| ManifestError::UnknownResource(id.to_string()))?;
        if resource.kind() != ResourceKind::Image {
            return Err(ManifestError::NotAnImage(id.to_string()).into());
        }

        for entry in &mut self.package.manifest {
            if entry.id == id {
                entry.add_property("cover-image");
            } else {
                entry.remove_property("cover-image");
            }
        }
        self.package.metadata.set_cover_id(Some(id));
        Ok(())
    }

    pub fn set_linear(&mut self, id: &str, linear: bool) -> Result<()> {
        if !self.package.spine.set_linear(id, linear) {
            return Err(ManifestError::UnknownResource(id.to_string()).into());
        }
        Ok(())
    }

    /// 替换文本资源的内容
    ///
    /// 被替换的是当前导航文档时重新解析导航树。
    pub fn set_text(&mut self, id: &str, text: impl Into<String>) -> Result<()> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or_else(|| ManifestError::UnknownResource(id.to_string()))?;
        if !resource.is_text() {
            return Err(ManifestError::NotText(id.to_string()).into());
        }
        resource.set_text(text.into());
        self.refresh_state(id);

        if self
            .authoritative_nav_id()
            .is_some_and(|nav| nav.as_str() == id)
        {
            self.load_navigation();
            if self.epub_version() >= 3 {
                self.write_ncx();
            }
        }
        Ok(())
    }

    /// 替换整个导航树，保存时重新生成导航文档
    pub fn set_nav_tree(&mut self, mut tree: NavTree) -> Result<()> {
        if let Some(entry) = tree.flatten().into_iter().find(|entry| {
            !entry.detached
                && entry
                    .resource()
                    .is_some_and(|id| !self.resources.contains_key(id))
        }) {
            let target = entry.resource().map(ResourceId::to_string).unwrap_or_default();
            return Err(NavError::UnknownTarget(target).into());
        }
        tree.fix_levels();
        self.nav_tree = tree;
        self.nav_dirty = true;
        Ok(())
    }

    /// 设置字体保存时使用的混淆算法，None表示不混淆
    pub fn set_font_obfuscation(&mut self, id: &str, method: Option<ObfuscationMethod>) -> Result<()> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or_else(|| ManifestError::UnknownResource(id.to_string()))?;
        if resource.kind() != ResourceKind::Font {
            return Err(ManifestError::NotAFont(id.to_string()).into());
        }
        resource.obfuscation = method;
        Ok(())
    }
}

/// 空白章节模板
fn blank_section(version: u8, language: &str) -> String {
    if version >= 3 {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
             <!DOCTYPE html>\n\
             <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{lang}\" xml:lang=\"{lang}\">\n\
             <head>\n  <title></title>\n</head>\n\
             <body>\n  <p>&#160;</p>\n</body>\n</html>\n",
            lang = crate::epub::xml::escape(language)
        )
    } else {
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.1//EN\" \"http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd\">\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\">\n\
         <head>\n  <title></title>\n</head>\n\
         <body>\n  <p>&#160;</p>\n</body>\n</html>\n"
            .to_string()
    }
}

/// 当前UTC时间，格式为`CCYY-MM-DDThh:mm:ssZ`
fn utc_timestamp() -> String {
    format_timestamp(Utc::now())
}

fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::error::{EpubError, FilenameError, SpineError};
    use crate::epub::nav::{NavEntry, NavTarget};
    use crate::epub::testutil::{minimal_epub2, minimal_epub3};
    use std::collections::HashSet;

    fn epub2() -> Book {
        Book::from_bytes(&minimal_epub2().build(), &QuireConfig::default()).unwrap()
    }

    fn epub3() -> Book {
        Book::from_bytes(&minimal_epub3().build(), &QuireConfig::default()).unwrap()
    }

    #[test]
    fn test_new_empty() {
        let book = Book::new_empty(&QuireConfig::default());
        assert_eq!(book.epub_version(), 3);
        assert_eq!(book.spine().len(), 1);
        assert!(book.nav_resource_id().is_some());
        assert!(book.metadata().modified().is_some());
        assert!(
            book.package()
                .unique_identifier_value()
                .is_some_and(|uid| uid.starts_with("urn:uuid:"))
        );
        assert!(book.resources().iter().all(|r| !r.is_checkable() || r.state().is_ok()));

        let mut config = QuireConfig::default();
        config.new_book.version = 2;
        let book = Book::new_empty(&config);
        assert_eq!(book.epub_version(), 2);
        assert!(book.ncx_resource_id().is_some());
        assert!(book.metadata().modified().is_none());
    }

    #[test]
    fn test_format_timestamp() {
        let at = |seconds: i64| DateTime::from_timestamp(seconds, 0).unwrap();
        assert_eq!(format_timestamp(at(0)), "1970-01-01T00:00:00Z");
        assert_eq!(format_timestamp(at(951_782_400)), "2000-02-29T00:00:00Z");
        assert_eq!(format_timestamp(at(1_700_000_000)), "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_add_html_goes_into_spine() {
        let mut book = epub2();
        let entry = book
            .add(
                "OEBPS/Text/chapter2.xhtml",
                "",
                b"<html xmlns=\"http://www.w3.org/1999/xhtml\"><body/></html>".to_vec(),
                Some(1),
            )
            .unwrap();
        assert_eq!(entry.href, "Text/chapter2.xhtml");
        assert_eq!(entry.media_type, MEDIA_TYPE_XHTML);
        assert_eq!(book.spine().ids(), vec!["cover", "chapter2.xhtml", "chapter1"]);
        assert!(book.get_resource(&entry.id).unwrap().state().is_ok());

        let duplicate = book.add("OEBPS/text/CHAPTER2.xhtml", "", Vec::new(), None);
        assert!(matches!(
            duplicate,
            Err(EpubError::Filename(FilenameError::Duplicate(_)))
        ));
    }

    #[test]
    fn test_unique_ids_and_filenames() {
        let mut book = epub2();
        let ids = book
            .add_existing_files(vec![
                ("a.png".to_string(), vec![1]),
                ("a.png".to_string(), vec![2]),
                ("a.png".to_string(), vec![3]),
            ])
            .unwrap();
        let unique: HashSet<&str> = ids.iter().map(ResourceId::as_str).collect();
        assert_eq!(unique.len(), 3);
        assert!(book.resource_by_path("OEBPS/Images/a_1.png").is_some());
        assert!(book.resource_by_path("OEBPS/Images/a_2.png").is_some());

        let manifest_ids: HashSet<&str> = book.manifest().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(manifest_ids.len(), book.manifest().len());
    }

    #[test]
    fn test_batch_add_is_all_or_nothing() {
        let mut book = epub2();
        let before = book.manifest().len();
        let result = book.add_existing_files(vec![
            ("ok.png".to_string(), vec![1]),
            ("bad?.png".to_string(), vec![2]),
        ]);
        assert!(matches!(
            result,
            Err(EpubError::Filename(FilenameError::IllegalCharacter('?')))
        ));
        assert_eq!(book.manifest().len(), before);
    }

    #[test]
    fn test_batch_add_keeps_presentation_order() {
        let mut book = epub2();
        let page = |n: u8| format!("<html xmlns=\"http://www.w3.org/1999/xhtml\"><body><p>{}</p></body></html>", n).into_bytes();
        let ids = book
            .add_existing_files(vec![
                ("b.xhtml".to_string(), page(1)),
                ("a.xhtml".to_string(), page(2)),
            ])
            .unwrap();
        let spine = book.spine().ids();
        assert_eq!(&spine[2..], &[ids[0].as_str(), ids[1].as_str()]);
    }

    #[test]
    fn test_scenario_remove_chapter() {
        // cover和chapter1都是HTML，删除后脊柱只剩cover
        let mut book = epub2();
        book.remove("chapter1").unwrap();
        assert_eq!(book.spine().ids(), vec!["cover"]);
        assert!(book.get_resource("chapter1").is_none());
        assert_eq!(book.detached_entries().len(), 1);
        assert_eq!(book.nav_tree().total_count(), 2);

        // 剩下唯一的内容文档时拒绝删除
        let result = book.remove("cover");
        assert!(matches!(
            result,
            Err(EpubError::Manifest(ManifestError::LastContentDocument(_)))
        ));
        assert_eq!(book.spine().ids(), vec!["cover"]);
    }

    #[test]
    fn test_remove_protected_and_unknown() {
        let mut book = epub2();
        assert!(matches!(
            book.remove("ncx"),
            Err(EpubError::Manifest(ManifestError::ProtectedResource(_)))
        ));
        assert!(matches!(
            book.remove("nope"),
            Err(EpubError::Manifest(ManifestError::UnknownResource(_)))
        ));

        let mut book = epub3();
        assert!(matches!(
            book.remove("nav"),
            Err(EpubError::Manifest(ManifestError::ProtectedResource(_)))
        ));
        book.remove("style").unwrap();
        assert!(book.manifest_entry("style").is_none());
    }

    #[test]
    fn test_scenario_cover_switch() {
        let mut book = epub2();
        let ids = book
            .add_existing_files(vec![
                ("imgA.png".to_string(), vec![0x89, 0x50, 0x4e, 0x47]),
                ("imgB.png".to_string(), vec![0x89, 0x50, 0x4e, 0x47]),
            ])
            .unwrap();
        let (a, b) = (ids[0].as_str(), ids[1].as_str());

        book.set_cover(a).unwrap();
        assert!(book.manifest_entry(a).unwrap().is_cover_image());
        assert_eq!(book.metadata().cover_id(), Some(a));

        book.set_cover(b).unwrap();
        assert!(!book.manifest_entry(a).unwrap().is_cover_image());
        assert!(book.manifest_entry(b).unwrap().is_cover_image());
        let covers = book.manifest().iter().filter(|e| e.is_cover_image()).count();
        assert_eq!(covers, 1);
        assert_eq!(book.metadata().cover_id(), Some(b));

        assert!(matches!(
            book.set_cover("style"),
            Err(EpubError::Manifest(ManifestError::NotAnImage(_)))
        ));
        assert!(book.manifest_entry(b).unwrap().is_cover_image());
    }

    #[test]
    fn test_rename_rewrites_references() {
        let mut book = epub2();
        book.rename("style", "main.css").unwrap();
        assert_eq!(book.manifest_entry("style").unwrap().href, "Styles/main.css");
        assert_eq!(
            book.get_resource("style").unwrap().relative_path(),
            "OEBPS/Styles/main.css"
        );
        let chapter = book.get_resource("chapter1").unwrap().text().unwrap();
        assert!(chapter.contains("../Styles/main.css"));
        assert!(!chapter.contains("style.css"));

        book.rename("chapter1", "第一章.xhtml").unwrap();
        let ncx = book.get_resource("ncx").unwrap().text().unwrap();
        assert!(ncx.contains("Text/%E7%AC%AC%E4%B8%80%E7%AB%A0.xhtml"));

        assert!(matches!(
            book.rename("chapter1", "cover.xhtml"),
            Err(EpubError::Filename(FilenameError::Duplicate(_)))
        ));
        assert!(matches!(
            book.rename("chapter1", "a:b.xhtml"),
            Err(EpubError::Filename(FilenameError::IllegalCharacter(':')))
        ));
    }

    #[test]
    fn test_reorder() {
        let mut book = epub2();
        book.reorder(&["chapter1", "cover"]).unwrap();
        assert_eq!(book.spine().ids(), vec!["chapter1", "cover"]);

        assert!(matches!(
            book.reorder(&["chapter1"]),
            Err(EpubError::Spine(SpineError::IncompleteReorder(_)))
        ));
        assert!(matches!(
            book.reorder(&["chapter1", "cover", "style"]),
            Err(EpubError::Spine(SpineError::UnknownResource(_)))
        ));
        assert_eq!(book.spine().ids(), vec!["chapter1", "cover"]);
    }

    #[test]
    fn test_set_linear_and_text() {
        let mut book = epub2();
        book.set_linear("cover", false).unwrap();
        assert!(!book.spine().get("cover").unwrap().linear);
        assert!(book.set_linear("style", false).is_err());

        book.set_text("style", "p { margin: 0; ").unwrap();
        assert!(book.get_resource("style").unwrap().state().error().is_some());
        assert!(book.get_resource("style").unwrap().is_modified());
    }

    #[test]
    fn test_set_text_on_nav_reparses_tree() {
        let mut book = epub3();
        let nav = book.get_resource("nav").unwrap().text().unwrap().replace("第一章", "序章");
        book.set_text("nav", nav).unwrap();
        assert_eq!(book.nav_tree().entries[0].title, "序章");
    }

    #[test]
    fn test_set_nav_tree() {
        let mut book = epub2();
        let tree = NavTree::from_entries(vec![NavEntry::new(
            "唯一",
            Some(NavTarget::new("chapter1", None)),
        )]);
        book.set_nav_tree(tree).unwrap();
        assert_eq!(book.nav_tree().total_count(), 1);

        let bad = NavTree::from_entries(vec![NavEntry::new(
            "坏",
            Some(NavTarget::new("missing", None)),
        )]);
        assert!(matches!(
            book.set_nav_tree(bad),
            Err(EpubError::Nav(NavError::UnknownTarget(_)))
        ));
        assert_eq!(book.nav_tree().entries[0].title, "唯一");
    }

    #[test]
    fn test_set_font_obfuscation() {
        let mut book = epub2();
        let entry = book.add_file("a.ttf", vec![0; 2048]).unwrap();
        book.set_font_obfuscation(&entry.id, Some(ObfuscationMethod::Idpf))
            .unwrap();
        assert_eq!(
            book.get_resource(&entry.id).unwrap().obfuscation(),
            Some(ObfuscationMethod::Idpf)
        );
        assert!(matches!(
            book.set_font_obfuscation("style", None),
            Err(EpubError::Manifest(ManifestError::NotAFont(_)))
        ));
    }

    #[test]
    fn test_removed_id_is_not_reused() {
        let mut book = epub3();
        let page = |text: &str| {
            format!("<html xmlns=\"http://www.w3.org/1999/xhtml\"><body><p>{}</p></body></html>", text)
                .into_bytes()
        };
        let first = book.add_file("a.xhtml", page("旧")).unwrap();
        let mut tree = book.nav_tree().clone();
        tree.entries
            .push(NavEntry::new("旧章节", Some(NavTarget::new(first.id.as_str(), None))));
        book.set_nav_tree(tree).unwrap();

        book.remove(&first.id).unwrap();
        let second = book.add_file("a.xhtml", page("新")).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.href, first.href);

        let stale = book
            .nav_tree()
            .flatten()
            .into_iter()
            .find(|entry| entry.title == "旧章节")
            .unwrap();
        assert!(stale.detached);
        assert_eq!(stale.resource().map(ResourceId::as_str), Some(first.id.as_str()));
        assert_eq!(book.detached_entries().len(), 1);
    }
}
