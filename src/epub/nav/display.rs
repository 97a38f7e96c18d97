//! 导航树的文本显示

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::epub::nav::navigation::{NavEntry, NavTree};

/// 导航树显示样式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeStyle {
    /// 使用树状符号（├── └──）
    TreeSymbols,
    /// 使用缩进和符号（• ）
    Indented,
}

/// 导航树渲染器
#[derive(Debug, Clone)]
pub struct TreeView<'a> {
    tree: &'a NavTree,
    title: Option<String>,
    style: TreeStyle,
    show_targets: bool,
    max_depth: Option<usize>,
}

impl<'a> TreeView<'a> {
    pub fn new(tree: &'a NavTree) -> Self {
        Self {
            tree,
            title: None,
            style: TreeStyle::TreeSymbols,
            show_targets: false,
            max_depth: None,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn with_style(mut self, style: TreeStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_show_targets(mut self, show_targets: bool) -> Self {
        self.show_targets = show_targets;
        self
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn label(&self, entry: &NavEntry) -> String {
        let mut label = entry.title.clone();
        if self.show_targets {
            if let Some(target) = &entry.target {
                label.push_str(&format!(" → {}", target.resource));
                if let Some(fragment) = &target.fragment {
                    label.push_str(&format!("#{}", fragment));
                }
            }
        }
        if entry.detached {
            label.push_str(" (已脱离)");
        }
        label
    }

    fn render_node(&self, entry: &NavEntry, depth: usize, is_last: bool, prefix: &str, result: &mut String) {
        if self.max_depth.is_some_and(|max| depth >= max) {
            return;
        }

        match self.style {
            TreeStyle::TreeSymbols => {
                let current_prefix = if is_last { "└── " } else { "├── " };
                result.push_str(&format!("{}{}{}\n", prefix, current_prefix, self.label(entry)));

                let child_prefix = format!("{}{}", prefix, if is_last { "    " } else { "│   " });
                for (index, child) in entry.children.iter().enumerate() {
                    let is_child_last = index == entry.children.len() - 1;
                    self.render_node(child, depth + 1, is_child_last, &child_prefix, result);
                }
            }
            TreeStyle::Indented => {
                result.push_str(&format!("{}• {}\n", "  ".repeat(depth), self.label(entry)));
                for child in &entry.children {
                    self.render_node(child, depth + 1, false, prefix, result);
                }
            }
        }
    }
}

impl Display for TreeView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut result = String::new();

        if let Some(ref title) = self.title {
            result.push_str(&format!("📖 {}\n", title));
            result.push_str("═══════════════════════════════════════\n");
        }

        for (index, entry) in self.tree.entries.iter().enumerate() {
            let is_last = index == self.tree.entries.len() - 1;
            self.render_node(entry, 0, is_last, "", &mut result);
        }

        write!(f, "{}", result)
    }
}

impl Display for NavTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", TreeView::new(self))
    }
}
