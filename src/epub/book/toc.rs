//! 目录生成、重新编号与目标校验

use tracing::{debug, info, warn};

use crate::epub::book::Book;
use crate::epub::book::refs::element_ids;
use crate::epub::config::TocSettings;
use crate::epub::nav::{self, HeadingSelection};
use crate::epub::resource::{ResourceId, ResourceKind};

impl From<&TocSettings> for HeadingSelection {
    fn from(settings: &TocSettings) -> Self {
        Self {
            max_level: settings.max_heading_level.clamp(1, 6),
            exclude_class: settings.exclude_class.clone(),
        }
    }
}

/// 导航条目的问题种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavWarningKind {
    /// 目标资源已被删除
    Detached,
    /// 目标文档中没有该片段
    MissingFragment,
}

/// 导航条目校验警告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavWarning {
    pub title: String,
    pub resource: Option<ResourceId>,
    pub fragment: Option<String>,
    pub kind: NavWarningKind,
}

impl Book {
    /// 按配置的标题范围从脊柱中的HTML生成目录
    ///
    /// 生成结果与当前目录相同时不做修改，返回false。
    pub fn generate_toc(&mut self) -> bool {
        let selection = HeadingSelection::from(&self.toc_settings);
        self.generate_toc_with(&selection)
    }

    pub fn generate_toc_with(&mut self, selection: &HeadingSelection) -> bool {
        self.assign_heading_ids(selection);

        let documents: Vec<(ResourceId, &str)> = self
            .package
            .spine
            .items
            .iter()
            .filter_map(|item| self.resources.get(item.idref.as_str()))
            .filter_map(|resource| resource.text().map(|text| (resource.id().clone(), text)))
            .collect();

        let generated = nav::generate(&documents, selection, &self.nav_tree);
        if generated.is_empty() {
            info!("目录无需修改");
            return false;
        }
        info!("生成了{}条目录", generated.total_count());
        self.nav_tree = generated;
        self.nav_dirty = true;
        true
    }

    /// 给脊柱中缺少id的标题补上id
    fn assign_heading_ids(&mut self, selection: &HeadingSelection) {
        let spine_ids: Vec<String> = self
            .package
            .spine
            .items
            .iter()
            .map(|item| item.idref.clone())
            .collect();
        for id in &spine_ids {
            let Some(resource) = self.resources.get(id.as_str()) else {
                continue;
            };
            if resource.kind() != ResourceKind::Html {
                continue;
            }
            let Some(updated) = resource
                .text()
                .and_then(|text| nav::assign_heading_ids(text, selection, &element_ids(text)))
            else {
                continue;
            };
            if let Some(resource) = self.resources.get_mut(id.as_str()) {
                resource.set_text(updated);
            }
            self.refresh_state(id);
            debug!("为{}中的标题补充了id", id);
        }
    }

    /// 对目录标题重新编号，有改动时返回true
    pub fn renumber_toc(&mut self) -> bool {
        let renumbered = nav::renumber(&self.nav_tree);
        if renumbered == self.nav_tree {
            return false;
        }
        self.nav_tree = renumbered;
        self.nav_dirty = true;
        true
    }

    /// 检查目录条目的目标，问题只作为警告返回
    pub fn validate_nav_targets(&self) -> Vec<NavWarning> {
        let mut warnings = Vec::new();
        for entry in self.nav_tree.flatten() {
            let Some(target) = &entry.target else {
                if entry.detached {
                    warnings.push(NavWarning {
                        title: entry.title.clone(),
                        resource: None,
                        fragment: None,
                        kind: NavWarningKind::Detached,
                    });
                }
                continue;
            };
            let kind = match self.resources.get(&target.resource) {
                None => Some(NavWarningKind::Detached),
                Some(_) if entry.detached => Some(NavWarningKind::Detached),
                Some(resource) => match (&target.fragment, resource.text()) {
                    (Some(fragment), Some(text)) if !element_ids(text).contains(fragment) => {
                        Some(NavWarningKind::MissingFragment)
                    }
                    _ => None,
                },
            };
            if let Some(kind) = kind {
                warn!("目录条目\"{}\"的目标有问题: {:?}", entry.title, kind);
                warnings.push(NavWarning {
                    title: entry.title.clone(),
                    resource: Some(target.resource.clone()),
                    fragment: target.fragment.clone(),
                    kind,
                });
            }
        }
        warnings
    }
}
