//! 书籍聚合根
//!
//! `Book`拥有全部资源、清单、脊柱和导航树。外部只能通过这里的操作修改书籍，
//! 每个操作先做完全部校验再改动状态，失败时书籍保持原样。

mod load;
mod merge;
mod ops;
mod refs;
mod save;
mod toc;
mod wellformed;

use std::collections::HashMap;

use crate::epub::codec::{ObfuscationMethod, RawEntry};
use crate::epub::config::{MendSettings, QuireConfig, SaveSettings, TocSettings};
use crate::epub::nav::{NavEntry, NavTree};
use crate::epub::opf::{ManifestEntry, Metadata, Package, Spine};
use crate::epub::path;
use crate::epub::resource::{IdRegistry, Resource, ResourceId, ResourceKind};

pub use save::SaveOutcome;
pub use toc::{NavWarning, NavWarningKind};

/// 一本EPUB书
#[derive(Debug, Clone)]
pub struct Book {
    /// OPF包文档：元数据、清单、脊柱、guide
    pub(crate) package: Package,
    /// OPF在容器中的路径
    pub(crate) opf_path: String,
    /// 资源表
    pub(crate) resources: HashMap<ResourceId, Resource>,
    /// ID与文件名注册表
    pub(crate) registry: IdRegistry,
    /// 导航树
    pub(crate) nav_tree: NavTree,
    /// 导航树改动后需要在保存时重新生成NCX和Nav
    pub(crate) nav_dirty: bool,
    /// META-INF下的其他文件，原样写回
    pub(crate) extra_files: Vec<RawEntry>,
    pub(crate) mend_settings: MendSettings,
    pub(crate) toc_settings: TocSettings,
    pub(crate) save_settings: SaveSettings,
}

impl Book {
    /// 没有任何资源的空壳，供加载和新建使用
    pub(crate) fn empty(package: Package, opf_path: impl Into<String>, config: &QuireConfig) -> Self {
        Self {
            package,
            opf_path: opf_path.into(),
            resources: HashMap::new(),
            registry: IdRegistry::new(),
            nav_tree: NavTree::new(),
            nav_dirty: false,
            extra_files: Vec::new(),
            mend_settings: config.wellformed,
            toc_settings: config.toc.clone(),
            save_settings: config.save,
        }
    }

    /// 应用新的配置
    pub fn apply_config(&mut self, config: &QuireConfig) {
        self.mend_settings = config.wellformed;
        self.toc_settings = config.toc.clone();
        self.save_settings = config.save;
    }

    pub fn epub_version(&self) -> u8 {
        self.package.epub_version()
    }

    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    /// OPF所在目录，清单href相对于它
    pub fn opf_dir(&self) -> &str {
        path::parent_dir(&self.opf_path)
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn metadata(&self) -> &Metadata {
        &self.package.metadata
    }

    /// 元数据原样保存，调用方可以自由修改
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.package.metadata
    }

    pub fn title(&self) -> Option<String> {
        self.package.metadata.title()
    }

    pub fn get_resource(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// 按清单顺序返回全部资源
    pub fn resources(&self) -> Vec<&Resource> {
        self.package
            .manifest
            .iter()
            .filter_map(|entry| self.resources.get(entry.id.as_str()))
            .collect()
    }

    /// 按清单顺序返回指定种类的资源
    pub fn resources_of_kind(&self, kind: ResourceKind) -> Vec<&Resource> {
        self.resources()
            .into_iter()
            .filter(|resource| resource.kind() == kind)
            .collect()
    }

    /// 按容器路径查找资源
    pub fn resource_by_path(&self, relative_path: &str) -> Option<&Resource> {
        self.resources
            .values()
            .find(|resource| resource.relative_path() == relative_path)
    }

    pub fn manifest(&self) -> &[ManifestEntry] {
        &self.package.manifest
    }

    pub fn manifest_entry(&self, id: &str) -> Option<&ManifestEntry> {
        self.package.manifest_entry(id)
    }

    pub fn spine(&self) -> &Spine {
        &self.package.spine
    }

    pub fn nav_tree(&self) -> &NavTree {
        &self.nav_tree
    }

    /// 指向已删除资源的导航条目
    pub fn detached_entries(&self) -> Vec<&NavEntry> {
        self.nav_tree.detached_entries()
    }

    /// 删除已脱离的导航条目，其子条目上移
    pub fn prune_detached(&mut self) -> usize {
        let pruned = self.nav_tree.prune_detached();
        if pruned > 0 {
            self.nav_dirty = true;
        }
        pruned
    }

    /// 资源是否为HTML内容文档
    pub fn is_html(&self, id: &str) -> bool {
        self.resources
            .get(id)
            .is_some_and(|resource| resource.kind() == ResourceKind::Html)
    }

    /// EPUB3的Nav文档
    pub fn nav_resource_id(&self) -> Option<ResourceId> {
        self.package
            .nav_entry()
            .map(|entry| ResourceId::new(entry.id.as_str()))
            .filter(|id| self.resources.contains_key(id))
    }

    /// NCX文档：优先使用脊柱toc属性指定的资源
    pub fn ncx_resource_id(&self) -> Option<ResourceId> {
        self.package
            .spine
            .toc
            .as_deref()
            .filter(|id| {
                self.resources
                    .get(*id)
                    .is_some_and(|resource| resource.kind() == ResourceKind::Ncx)
            })
            .map(ResourceId::new)
            .or_else(|| {
                self.resources_of_kind(ResourceKind::Ncx)
                    .first()
                    .map(|resource| resource.id().clone())
            })
    }

    /// 当前起权威作用的导航文档：EPUB3为Nav，EPUB2为NCX
    pub fn authoritative_nav_id(&self) -> Option<ResourceId> {
        if self.epub_version() >= 3 {
            self.nav_resource_id().or_else(|| self.ncx_resource_id())
        } else {
            self.ncx_resource_id()
        }
    }

    /// 容器路径 → 资源ID
    pub(crate) fn path_index(&self) -> HashMap<String, ResourceId> {
        self.resources
            .values()
            .map(|resource| (resource.relative_path().to_string(), resource.id().clone()))
            .collect()
    }

    /// 资源ID → 容器路径
    pub(crate) fn path_map(&self) -> HashMap<ResourceId, String> {
        self.resources
            .values()
            .map(|resource| (resource.id().clone(), resource.relative_path().to_string()))
            .collect()
    }

    /// 计算资源的清单href
    pub(crate) fn manifest_href(&self, relative_path: &str) -> String {
        path::relative_href(self.opf_dir(), relative_path)
    }

    /// 登记资源并追加清单项（ID必须已经在注册表中登记）
    pub(crate) fn insert_resource(&mut self, resource: Resource, properties: &[&str]) -> ManifestEntry {
        let mut entry = ManifestEntry::new(
            resource.id().as_str(),
            self.manifest_href(resource.relative_path()),
            resource.media_type(),
        );
        for property in properties {
            entry.add_property(property);
        }
        self.registry.register_path(resource.relative_path());
        self.resources.insert(resource.id().clone(), resource);
        self.package.manifest.push(entry.clone());
        entry
    }

    /// 移除资源及其清单项和脊柱项，不做任何检查
    ///
    /// 资源ID保持登记状态，之后新增的资源不会拿到同一个ID
    pub(crate) fn detach_resource(&mut self, id: &str) -> Option<Resource> {
        let resource = self.resources.remove(id)?;
        self.package.remove_manifest_entry(id);
        self.package.spine.remove(id);
        if self.package.spine.toc.as_deref() == Some(id) {
            self.package.spine.toc = None;
        }
        self.registry.release_path(resource.relative_path());
        Some(resource)
    }

    /// 字体混淆使用的标识符
    pub(crate) fn obfuscation_identifier(&self, method: ObfuscationMethod) -> Option<String> {
        match method {
            ObfuscationMethod::Idpf => self.package.unique_identifier_value(),
            ObfuscationMethod::Adobe => self
                .package
                .metadata
                .uuid_identifier()
                .or_else(|| self.package.unique_identifier_value()),
        }
    }
}
