//! 导航树
//!
//! NCX和Nav文档解析后得到同样的树形结构。条目通过资源ID弱引用目标，
//! 资源被删除时条目只会被标记为脱离，需要显式清理。

use crate::epub::resource::ResourceId;

/// 保存时标记脱离条目的class，重新读入后恢复脱离状态
pub const DETACHED_CLASS: &str = "detached";

/// 导航目标
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NavTarget {
    /// 目标资源
    pub resource: ResourceId,
    /// 片段标识（不含`#`）
    pub fragment: Option<String>,
}

impl NavTarget {
    pub fn new(resource: impl Into<ResourceId>, fragment: Option<String>) -> Self {
        Self {
            resource: resource.into(),
            fragment: fragment.filter(|f| !f.is_empty()),
        }
    }
}

/// 导航条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavEntry {
    /// 标题
    pub title: String,
    /// 目标，没有目标的条目只作为分组标题
    pub target: Option<NavTarget>,
    /// 层级（从1开始）
    pub level: usize,
    /// 子条目
    pub children: Vec<NavEntry>,
    /// 目标资源已被删除或无法解析
    pub detached: bool,
}

impl NavEntry {
    pub fn new(title: impl Into<String>, target: Option<NavTarget>) -> Self {
        Self {
            title: title.into(),
            target,
            level: 1,
            children: Vec::new(),
            detached: false,
        }
    }

    /// 添加子条目
    pub fn add_child(&mut self, child: NavEntry) {
        self.children.push(child);
    }

    /// 条目及其所有子条目的数量
    pub fn total_count(&self) -> usize {
        1 + self.children.iter().map(NavEntry::total_count).sum::<usize>()
    }

    /// 子树的最大深度
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(NavEntry::depth).max().unwrap_or(0)
    }

    /// 目标资源ID
    pub fn resource(&self) -> Option<&ResourceId> {
        self.target.as_ref().map(|t| &t.resource)
    }
}

/// 导航树根
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavTree {
    /// 顶层条目
    pub entries: Vec<NavEntry>,
}

impl NavTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<NavEntry>) -> Self {
        let mut tree = Self { entries };
        tree.fix_levels();
        tree
    }

    /// 空树，生成目录时表示"无需修改"
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 条目总数
    pub fn total_count(&self) -> usize {
        self.entries.iter().map(NavEntry::total_count).sum()
    }

    /// 最大深度
    pub fn depth(&self) -> usize {
        self.entries.iter().map(NavEntry::depth).max().unwrap_or(0)
    }

    /// 按嵌套关系重新计算层级
    pub fn fix_levels(&mut self) {
        fn walk(entries: &mut [NavEntry], level: usize) {
            for entry in entries {
                entry.level = level;
                walk(&mut entry.children, level + 1);
            }
        }
        walk(&mut self.entries, 1);
    }

    /// 深度优先遍历全部条目
    pub fn flatten(&self) -> Vec<&NavEntry> {
        fn walk<'a>(entries: &'a [NavEntry], out: &mut Vec<&'a NavEntry>) {
            for entry in entries {
                out.push(entry);
                walk(&entry.children, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.entries, &mut out);
        out
    }

    /// 对每个条目执行可变操作
    pub fn for_each_mut<F: FnMut(&mut NavEntry)>(&mut self, mut f: F) {
        fn walk<F: FnMut(&mut NavEntry)>(entries: &mut [NavEntry], f: &mut F) {
            for entry in entries {
                f(entry);
                walk(&mut entry.children, f);
            }
        }
        walk(&mut self.entries, &mut f);
    }

    /// 是否有条目指向该资源
    pub fn references(&self, id: &str) -> bool {
        self.flatten()
            .iter()
            .any(|e| e.resource().map(ResourceId::as_str) == Some(id))
    }

    /// 把指向该资源的条目标记为脱离，返回标记数量
    pub fn detach_resource(&mut self, id: &str) -> usize {
        let mut count = 0;
        self.for_each_mut(|entry| {
            if entry.resource().map(ResourceId::as_str) == Some(id) && !entry.detached {
                entry.detached = true;
                count += 1;
            }
        });
        count
    }

    /// 全部脱离的条目
    pub fn detached_entries(&self) -> Vec<&NavEntry> {
        self.flatten().into_iter().filter(|e| e.detached).collect()
    }

    /// 删除脱离的条目，它们的子条目上移到原来的位置。返回删除数量
    pub fn prune_detached(&mut self) -> usize {
        fn prune(entries: Vec<NavEntry>, removed: &mut usize) -> Vec<NavEntry> {
            let mut kept = Vec::new();
            for mut entry in entries {
                let children = prune(std::mem::take(&mut entry.children), removed);
                if entry.detached {
                    *removed += 1;
                    kept.extend(children);
                } else {
                    entry.children = children;
                    kept.push(entry);
                }
            }
            kept
        }
        let mut removed = 0;
        self.entries = prune(std::mem::take(&mut self.entries), &mut removed);
        self.fix_levels();
        removed
    }

    /// 按映射函数改写目标，返回改写数量
    pub fn retarget<F>(&mut self, mut map: F) -> usize
    where
        F: FnMut(&NavTarget) -> Option<NavTarget>,
    {
        let mut count = 0;
        self.for_each_mut(|entry| {
            if let Some(target) = &entry.target {
                if let Some(new_target) = map(target) {
                    entry.target = Some(new_target);
                    count += 1;
                }
            }
        });
        count
    }
}
