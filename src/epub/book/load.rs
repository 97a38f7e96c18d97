//! 从容器加载书籍
//!
//! 加载过程尽量容忍有问题的EPUB：缺失的文件、重复的ID、没有登记在清单中的
//! 文件、指向非HTML资源的脊柱项都会被修正并记录警告。

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{info, warn};

use crate::epub::book::Book;
use crate::epub::codec::{ENCRYPTION_PATH, MIMETYPE_PATH, ObfuscationMethod, RawContainer};
use crate::epub::config::QuireConfig;
use crate::epub::container::CONTAINER_PATH;
use crate::epub::encoding::decode_text;
use crate::epub::error::{ContainerError, EpubError, Result};
use crate::epub::fs::FileSystem;
use crate::epub::nav::{NavTree, Ncx, parse_nav, write_nav_document};
use crate::epub::opf::{Package, SpineItem};
use crate::epub::path;
use crate::epub::resource::{
    MEDIA_TYPE_NCX, MEDIA_TYPE_XHTML, Resource, ResourceId, ResourceKind, media_type_for_path,
};
use crate::epub::session::CancelToken;
use crate::epub::wellformed::MendPolicy;

impl Book {
    /// 通过文件系统加载EPUB
    ///
    /// 取消发生在书籍构建完成之前时返回`ContainerError::Cancelled`。
    pub fn load(
        fs: &dyn FileSystem,
        path: &Path,
        config: &QuireConfig,
        cancel: &CancelToken,
    ) -> Result<Book> {
        info!("打开 {}", path.display());
        let bytes = fs.read(path).map_err(ContainerError::Io)?;
        let raw = RawContainer::from_bytes(&bytes, cancel)?;
        let book = Self::from_container(raw, config)?;
        if cancel.is_cancelled() {
            return Err(ContainerError::Cancelled.into());
        }
        Ok(book)
    }

    /// 从内存中的EPUB数据加载
    pub fn from_bytes(bytes: &[u8], config: &QuireConfig) -> Result<Book> {
        let raw = RawContainer::from_bytes(bytes, &CancelToken::new())?;
        Self::from_container(raw, config)
    }

    /// 从已读入内存的容器构建书籍
    pub fn from_container(mut raw: RawContainer, config: &QuireConfig) -> Result<Book> {
        let opf_path = raw.opf_path().to_string();
        let opf_bytes = raw
            .take(&opf_path)
            .ok_or_else(|| ContainerError::MissingOpf(opf_path.clone()))?;
        let package = Package::parse_xml(&decode_text(&opf_bytes).text).map_err(|e| match e {
            EpubError::XmlError(xml_err) => {
                EpubError::OpfParseError(format!("XML解析错误: {}", xml_err))
            }
            other => other,
        })?;

        let mut book = Book::empty(package, opf_path, config);
        let restored: HashMap<String, _> = raw
            .deobfuscate(|method| book.obfuscation_identifier(method))
            .into_iter()
            .collect();

        book.load_manifest(&mut raw, &restored);
        book.load_unmanifested(raw);
        book.clean_spine();
        book.load_navigation();
        book.ensure_navigation_documents();

        if book.mend_settings.mend_on_open {
            let failures = book.mend_all(MendPolicy::OnOpen);
            if !failures.is_empty() {
                warn!("{}个文件无法自动修复", failures.len());
            }
        } else {
            let malformed = book.check_all();
            if !malformed.is_empty() {
                warn!("{}个文件不是格式良好的文档", malformed.len());
            }
        }

        info!(
            "加载完成: {}个资源，脊柱{}项，目录{}条",
            book.resources.len(),
            book.package.spine.len(),
            book.nav_tree.total_count()
        );
        Ok(book)
    }

    /// 按清单创建资源
    fn load_manifest(
        &mut self,
        raw: &mut RawContainer,
        restored: &HashMap<String, ObfuscationMethod>,
    ) {
        let opf_dir = self.opf_dir().to_string();
        let toc_id = self.package.spine.toc.clone();
        let entries = std::mem::take(&mut self.package.manifest);

        for mut entry in entries {
            if path::is_external(&entry.href) {
                warn!("忽略远程资源: {}", entry.href);
                continue;
            }
            let full_path = path::resolve_href(&opf_dir, &entry.href);
            let Some(actual_path) = raw.actual_path(&full_path).map(str::to_string) else {
                warn!("清单项{}指向的文件不存在: {}", entry.id, full_path);
                continue;
            };
            if self.registry.contains_path(&actual_path) {
                warn!("清单项{}与其他清单项指向同一文件{}，已忽略", entry.id, actual_path);
                continue;
            }
            let Some(data) = raw.take(&actual_path) else {
                continue;
            };
            if actual_path != full_path {
                warn!("清单href大小写与文件不一致: {} → {}", full_path, actual_path);
                entry.href = path::relative_href(&opf_dir, &actual_path);
            }

            if !self.registry.reserve_id(&entry.id) {
                let new_id = self.registry.next_id(&format!("{}_", entry.id));
                warn!("清单ID重复: {}，改为{}", entry.id, new_id);
                entry.id = new_id.to_string();
            }
            if entry.media_type.trim().is_empty() {
                entry.media_type = media_type_for_path(&actual_path).to_string();
            }

            let kind = if entry.is_nav() {
                ResourceKind::Nav
            } else if toc_id.as_deref() == Some(entry.id.as_str()) {
                ResourceKind::Ncx
            } else {
                ResourceKind::from_media_type(&entry.media_type)
            };

            let mut resource = Resource::from_bytes(
                ResourceId::new(entry.id.as_str()),
                actual_path.as_str(),
                entry.media_type.as_str(),
                kind,
                data,
            );
            resource.obfuscation = restored.get(&actual_path).copied();

            self.registry.register_path(&actual_path);
            self.resources.insert(resource.id().clone(), resource);
            self.package.manifest.push(entry);
        }
    }

    /// 容器中没有登记在清单里的文件补进清单，META-INF下的文件原样保留
    fn load_unmanifested(&mut self, raw: RawContainer) {
        for entry in raw.into_entries() {
            match entry.path.as_str() {
                MIMETYPE_PATH | CONTAINER_PATH | ENCRYPTION_PATH => continue,
                other if other.starts_with("META-INF/") => {
                    self.extra_files.push(entry);
                    continue;
                }
                _ => {}
            }
            if self.registry.contains_path(&entry.path) {
                continue;
            }

            let media_type = media_type_for_path(&entry.path);
            let id = self.registry.id_for_filename(path::file_name(&entry.path));
            warn!("文件{}没有登记在清单中，已添加为{}", entry.path, id);
            let resource = Resource::from_bytes(
                id,
                entry.path.as_str(),
                media_type,
                ResourceKind::from_media_type(media_type),
                entry.data,
            );
            self.insert_resource(resource, &[]);
        }
    }

    /// 移除无效的脊柱项，保证脊柱不为空
    fn clean_spine(&mut self) {
        let mut seen = HashSet::new();
        let resources = &self.resources;
        self.package.spine.items.retain(|item| {
            let is_html = resources
                .get(item.idref.as_str())
                .is_some_and(|resource| resource.kind() == ResourceKind::Html);
            if !is_html {
                warn!("脊柱项{}不是HTML文档，已移除", item.idref);
                return false;
            }
            if !seen.insert(item.idref.clone()) {
                warn!("脊柱项{}重复，已移除", item.idref);
                return false;
            }
            true
        });

        if !self.package.spine.is_empty() {
            return;
        }

        let html: Vec<String> = self
            .resources_of_kind(ResourceKind::Html)
            .iter()
            .map(|resource| resource.id().to_string())
            .collect();
        if html.is_empty() {
            warn!("书中没有HTML文档，添加空白章节");
            let id = self.add_blank_section();
            self.package.spine.insert(None, SpineItem::new(id.as_str()));
        } else {
            warn!("脊柱为空，按清单顺序加入{}个HTML文档", html.len());
            for id in html {
                self.package.spine.insert(None, SpineItem::new(id));
            }
        }
    }

    /// 解析权威导航文档，得到导航树
    pub(super) fn load_navigation(&mut self) {
        let index = self.path_index();
        let lookup = |p: &str| index.get(p).cloned();

        let tree = match self.authoritative_nav_id() {
            Some(id) => {
                let Some(resource) = self.resources.get(&id) else {
                    return;
                };
                let text = resource.text().unwrap_or_default();
                let base_dir = resource.folder();
                match resource.kind() {
                    ResourceKind::Ncx => match Ncx::parse_xml(text, base_dir, lookup) {
                        Ok(ncx) => ncx.tree,
                        Err(e) => {
                            warn!("NCX解析失败: {}", e);
                            NavTree::new()
                        }
                    },
                    _ => parse_nav(text, base_dir, lookup),
                }
            }
            None => NavTree::new(),
        };

        let detached = tree.detached_entries().len();
        if detached > 0 {
            warn!("{}个目录条目指向不存在的文件", detached);
        }
        self.nav_tree = tree;
    }

    /// EPUB3必须有Nav文档，EPUB2必须有NCX，缺少时生成
    pub(super) fn ensure_navigation_documents(&mut self) {
        if self.epub_version() >= 3 && self.nav_resource_id().is_none() {
            warn!("EPUB3书籍缺少Nav文档，已生成");
            let folder = path::join(self.opf_dir(), ResourceKind::Nav.default_folder());
            let name = self.registry.unique_filename(&folder, "nav.xhtml");
            let relative_path = path::join(&folder, &name);
            let paths = self.path_map();
            let title = self.title().unwrap_or_default();
            let language = self.package.metadata.language().unwrap_or_default();
            let text = write_nav_document(&self.nav_tree, &title, &language, &folder, |id| {
                paths.get(id).cloned()
            });
            let id = self.registry.id_for_filename(&name);
            let resource = Resource::new_text(id, relative_path, MEDIA_TYPE_XHTML, ResourceKind::Nav, text);
            self.insert_resource(resource, &["nav"]);
        }

        match self.ncx_resource_id() {
            Some(id) => {
                if self.package.spine.toc.is_none() {
                    self.package.spine.toc = Some(id.to_string());
                }
            }
            None if self.epub_version() < 3 => {
                warn!("EPUB2书籍缺少NCX，已生成");
                let name = self.registry.unique_filename(self.opf_dir(), "toc.ncx");
                let relative_path = path::join(self.opf_dir(), &name);
                let id = self.registry.id_for_filename("ncx");
                let paths = self.path_map();
                let ncx = Ncx {
                    uid: self.package.unique_identifier_value(),
                    doc_title: self.title(),
                    tree: self.nav_tree.clone(),
                };
                let text = ncx.to_xml(self.opf_dir(), |id| paths.get(id).cloned());
                let resource =
                    Resource::new_text(id.clone(), relative_path, MEDIA_TYPE_NCX, ResourceKind::Ncx, text);
                self.insert_resource(resource, &[]);
                self.package.spine.toc = Some(id.to_string());
            }
            None => {}
        }
    }
}
