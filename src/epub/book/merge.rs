//! HTML文档的合并与拆分

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::epub::book::Book;
use crate::epub::book::refs::{Location, element_ids, rewrite_references};
use crate::epub::error::{ManifestError, Result};
use crate::epub::nav::NavTarget;
use crate::epub::opf::SpineItem;
use crate::epub::path;
use crate::epub::resource::{Resource, ResourceId, ResourceKind};
use crate::epub::wellformed::check_xml;

/// body元素的内容
static BODY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<body\b[^>]*>(.*)</body\s*>").expect("body正则表达式无效"));

/// 拆分标记`<hr class="quire-split-marker"/>`
static SPLIT_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<hr\b[^>]*\bclass\s*=\s*["'][^"']*\bquire-split-marker\b[^"']*["'][^>]*?/?>(?:\s*</hr\s*>)?"#)
        .expect("拆分标记正则表达式无效")
});

impl Book {
    /// 把后面文档的body内容依次追加到第一个文档中
    ///
    /// 所有文档必须是格式良好的HTML。被合并的文档从书中删除，指向它们的
    /// 链接和目录条目改为指向第一个文档。
    pub fn merge(&mut self, ids: &[&str]) -> Result<ResourceId> {
        let mut seen = HashSet::new();
        let ids: Vec<&str> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if ids.len() < 2 {
            return Err(ManifestError::NothingToMerge.into());
        }

        let mut documents: Vec<(&str, &str, &str)> = Vec::with_capacity(ids.len());
        for id in &ids {
            let resource = self
                .resources
                .get(*id)
                .ok_or_else(|| ManifestError::UnknownResource(id.to_string()))?;
            if resource.kind() != ResourceKind::Html {
                return Err(ManifestError::NotHtml(id.to_string()).into());
            }
            let text = resource.text().unwrap_or_default();
            check_xml(text).map_err(|error| ManifestError::Malformed {
                id: id.to_string(),
                error,
            })?;
            documents.push((*id, resource.relative_path(), text));
        }

        let (first_id, first_path, first_text) = documents[0];
        let merged_paths: HashSet<&str> = documents.iter().map(|(_, p, _)| *p).collect();
        let Some(insert_at) = BODY_RE
            .captures(first_text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.end())
        else {
            return Err(ManifestError::NotHtml(first_id.to_string()).into());
        };

        let mut to_first = |target: &str, fragment: Option<&str>| {
            merged_paths
                .contains(target)
                .then(|| (first_path.to_string(), fragment.map(str::to_string)))
        };

        let mut merged = String::with_capacity(documents.iter().map(|(_, _, t)| t.len()).sum());
        merged.push_str(&first_text[..insert_at]);
        for (id, other_path, text) in &documents[1..] {
            let Some(body) = BODY_RE.captures(text).and_then(|caps| caps.get(1)) else {
                return Err(ManifestError::NotHtml(id.to_string()).into());
            };
            let body = body.as_str();
            let rebased = rewrite_references(
                body,
                false,
                Location::of(other_path),
                Location::of(first_path),
                &mut to_first,
            );
            merged.push_str(rebased.as_deref().unwrap_or(body));
        }
        merged.push_str(&first_text[insert_at..]);

        check_xml(&merged).map_err(|error| ManifestError::Malformed {
            id: first_id.to_string(),
            error,
        })?;

        // 校验完成，开始修改
        let first_id = ResourceId::new(first_id);
        let first_path = first_path.to_string();
        let merged_paths: HashSet<String> = merged_paths.into_iter().map(str::to_string).collect();
        let others: Vec<String> = ids[1..].iter().map(|id| id.to_string()).collect();

        if let Some(resource) = self.resources.get_mut(&first_id) {
            resource.set_text(merged);
        }
        for other in &others {
            self.detach_resource(other);
            for entry in &mut self.package.manifest {
                if entry.fallback.as_deref() == Some(other.as_str()) {
                    entry.fallback = None;
                }
            }
        }

        let retargeted = self.nav_tree.retarget(|target| {
            others
                .iter()
                .any(|other| other.as_str() == target.resource.as_str())
                .then(|| NavTarget::new(first_id.clone(), target.fragment.clone()))
        });
        if retargeted > 0 {
            self.nav_dirty = true;
        }

        let retarget = |target: &str, fragment: Option<&str>| {
            (merged_paths.contains(target) && target != first_path)
                .then(|| (first_path.clone(), fragment.map(str::to_string)))
        };
        self.retarget_references(retarget);
        self.retarget_guide(retarget);
        self.refresh_state(first_id.as_str());

        info!("合并了{}个文档到 {}", others.len() + 1, first_path);
        Ok(first_id)
    }

    /// 在拆分标记处把文档拆成多个连续的文档
    ///
    /// 新文档紧跟在原文档之后加入脊柱，返回新文档的ID。指向被移走部分的
    /// 片段链接和目录条目会改为指向新文档。
    pub fn split_at_markers(&mut self, id: &str) -> Result<Vec<ResourceId>> {
        let resource = self
            .resources
            .get(id)
            .ok_or_else(|| ManifestError::UnknownResource(id.to_string()))?;
        if resource.kind() != ResourceKind::Html {
            return Err(ManifestError::NotHtml(id.to_string()).into());
        }
        let text = resource.text().unwrap_or_default();
        check_xml(text).map_err(|error| ManifestError::Malformed {
            id: id.to_string(),
            error,
        })?;

        let Some(body) = BODY_RE.captures(text).and_then(|caps| caps.get(1)) else {
            return Err(ManifestError::NotHtml(id.to_string()).into());
        };
        let parts: Vec<&str> = SPLIT_MARKER_RE.split(body.as_str()).collect();
        if parts.len() < 2 {
            return Err(ManifestError::NoSplitMarker(id.to_string()).into());
        }
        let head = &text[..body.start()];
        let tail = &text[body.end()..];

        let original_path = resource.relative_path().to_string();
        let folder = resource.folder().to_string();
        let media_type = resource.media_type().to_string();
        let file_name = resource.file_name().to_string();

        // 新文件名和ID先在副本上分配，校验全部通过后再替换
        let mut scratch = self.registry.clone();
        let mut paths = vec![original_path.clone()];
        let mut new_ids = Vec::with_capacity(parts.len() - 1);
        for _ in 1..parts.len() {
            let name = scratch.unique_filename(&folder, &file_name);
            let new_path = path::join(&folder, &name);
            scratch.register_path(&new_path);
            new_ids.push(scratch.id_for_filename(&name));
            paths.push(new_path);
        }

        let mut section_of: HashMap<String, usize> = HashMap::new();
        for (index, part) in parts.iter().enumerate() {
            for element_id in element_ids(part) {
                section_of.entry(element_id).or_insert(index);
            }
        }
        let moved = |target: &str, fragment: Option<&str>| {
            let fragment = fragment?;
            if target != original_path {
                return None;
            }
            let index = *section_of.get(fragment)?;
            Some((paths[index].clone(), Some(fragment.to_string())))
        };

        let mut documents = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let mut map = moved;
            let rewritten = rewrite_references(
                part,
                false,
                Location::of(&original_path),
                Location::of(&paths[index]),
                &mut map,
            );
            let document = format!("{}{}{}", head, rewritten.as_deref().unwrap_or(part), tail);
            check_xml(&document).map_err(|error| ManifestError::Malformed {
                id: id.to_string(),
                error,
            })?;
            documents.push(document);
        }

        // 校验完成，开始修改
        self.registry = scratch;
        let mut documents = documents.into_iter();
        if let (Some(first), Some(resource)) = (documents.next(), self.resources.get_mut(id)) {
            resource.set_text(first);
        }

        let linear = self.package.spine.get(id).map(|item| item.linear).unwrap_or(true);
        let mut position = self.package.spine.position(id).map(|p| p + 1);
        for ((new_id, new_path), document) in new_ids.iter().zip(&paths[1..]).zip(documents) {
            let resource = Resource::new_text(
                new_id.clone(),
                new_path.as_str(),
                media_type.as_str(),
                ResourceKind::Html,
                document,
            );
            self.insert_resource(resource, &[]);
            self.package
                .spine
                .insert(position, SpineItem::with_linear(new_id.as_str(), linear));
            position = position.map(|p| p + 1);
        }

        let retargeted = self.nav_tree.retarget(|target| {
            if target.resource.as_str() != id {
                return None;
            }
            let index = *section_of.get(target.fragment.as_deref()?)?;
            (index > 0).then(|| NavTarget::new(new_ids[index - 1].clone(), target.fragment.clone()))
        });
        if retargeted > 0 {
            self.nav_dirty = true;
        }
        self.retarget_references(moved);
        self.retarget_guide(moved);

        self.refresh_state(id);
        for new_id in &new_ids {
            self.refresh_state(new_id.as_str());
        }
        info!("{} 拆分为{}个文档", original_path, new_ids.len() + 1);
        Ok(new_ids)
    }
}
