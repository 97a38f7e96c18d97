//! 从标题生成目录，以及目录标题重新编号

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Selector};

use crate::epub::nav::navigation::{NavEntry, NavTarget, NavTree};
use crate::epub::nav::ncx::collapse_whitespace;
use crate::epub::resource::ResourceId;
use crate::epub::wellformed::parse_html;

static HEADING_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("标题选择器无效"));

/// `前缀<数字>后缀`形式的标题
static NUMBERED_TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\D*?)(\d+)(.*)$").expect("编号正则表达式无效"));

/// 标题开始标签
static HEADING_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<(h([1-6]))((?:\s(?:[^>"']|"[^"]*"|'[^']*')*?)?)(/?)>"#)
        .expect("标题标签正则表达式无效")
});

static ID_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\sid\s*=").expect("id属性正则表达式无效"));

static CLASS_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\sclass\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("class属性正则表达式无效")
});

/// 自动补充的标题id前缀
pub const HEADING_ID_PREFIX: &str = "quire-toc-";

/// 参与生成的标题范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingSelection {
    /// 最大标题级别（1-6）
    pub max_level: u8,
    /// 带有该class的标题不进入目录
    pub exclude_class: String,
}

impl Default for HeadingSelection {
    fn default() -> Self {
        Self {
            max_level: 6,
            exclude_class: "quire-not-in-toc".to_string(),
        }
    }
}

/// 文档中的一个标题
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: u8,
    pub title: String,
    pub id: Option<String>,
}

/// 提取文档中的标题（按文档顺序）
pub fn collect_headings(content: &str, selection: &HeadingSelection) -> Vec<Heading> {
    let document = parse_html(content);
    document
        .select(&HEADING_SELECTOR)
        .filter_map(|element| heading_of(element, selection))
        .collect()
}

fn heading_of(element: ElementRef<'_>, selection: &HeadingSelection) -> Option<Heading> {
    let level = element.value().name()[1..].parse::<u8>().ok()?;
    if level > selection.max_level {
        return None;
    }
    if element
        .value()
        .classes()
        .any(|class| class == selection.exclude_class)
    {
        return None;
    }

    let mut title = collapse_whitespace(&element.text().collect::<String>());
    if title.is_empty() {
        // 纯图片标题使用title属性或alt文本
        title = element
            .value()
            .attr("title")
            .map(str::to_string)
            .or_else(|| {
                element
                    .descendants()
                    .filter_map(ElementRef::wrap)
                    .find_map(|e| e.value().attr("alt").map(str::to_string))
            })
            .map(|t| collapse_whitespace(&t))
            .unwrap_or_default();
    }
    if title.is_empty() {
        return None;
    }

    Some(Heading {
        level,
        title,
        id: element.value().attr("id").map(str::to_string),
    })
}

/// 给范围内缺少id的标题补上id，使目录条目能定位到标题
///
/// 新id不与`existing_ids`冲突。没有改动时返回None。
pub fn assign_heading_ids(
    content: &str,
    selection: &HeadingSelection,
    existing_ids: &HashSet<String>,
) -> Option<String> {
    let mut taken = existing_ids.clone();
    let mut next = 1u32;
    let mut changed = false;

    let result = HEADING_TAG_RE.replace_all(content, |caps: &regex::Captures<'_>| {
        let attributes = &caps[3];
        let level = caps[2].parse::<u8>().unwrap_or(u8::MAX);
        let excluded = CLASS_ATTR_RE.captures(attributes).is_some_and(|class| {
            class
                .get(1)
                .or_else(|| class.get(2))
                .is_some_and(|m| m.as_str().split_whitespace().any(|c| c == selection.exclude_class))
        });
        if level > selection.max_level || excluded || ID_ATTR_RE.is_match(attributes) {
            return caps[0].to_string();
        }

        let id = loop {
            let candidate = format!("{}{}", HEADING_ID_PREFIX, next);
            next += 1;
            if taken.insert(candidate.clone()) {
                break candidate;
            }
        };
        changed = true;
        format!("<{}{} id=\"{}\"{}>", &caps[1], attributes, id, &caps[4])
    });

    changed.then(|| result.into_owned())
}

/// 按脊柱顺序从标题生成目录
///
/// 与`current`完全相同时返回空树，表示无需修改。
///
/// # 参数
/// * `documents` - 按脊柱顺序排列的(资源ID, 文档内容)
/// * `selection` - 标题范围
/// * `current` - 当前目录
pub fn generate(
    documents: &[(ResourceId, &str)],
    selection: &HeadingSelection,
    current: &NavTree,
) -> NavTree {
    let mut roots: Vec<NavEntry> = Vec::new();
    // 当前路径上每一层的标题级别
    let mut path: Vec<u8> = Vec::new();

    for (id, content) in documents {
        for heading in collect_headings(content, selection) {
            let entry = NavEntry::new(
                heading.title,
                Some(NavTarget::new(id.clone(), heading.id)),
            );

            while path.last().is_some_and(|level| *level >= heading.level) {
                path.pop();
            }
            let siblings = children_at(&mut roots, path.len());
            siblings.push(entry);
            path.push(heading.level);
        }
    }

    let generated = NavTree::from_entries(roots);
    if &generated == current {
        NavTree::new()
    } else {
        generated
    }
}

/// 取第`depth`层最后一个条目的子列表
fn children_at(entries: &mut Vec<NavEntry>, depth: usize) -> &mut Vec<NavEntry> {
    if depth == 0 || entries.is_empty() {
        return entries;
    }
    let last = entries.len() - 1;
    children_at(&mut entries[last].children, depth - 1)
}

/// 重新编号
///
/// 同级条目中连续的、前缀相同的`前缀<数字>后缀`标题，从该段第一个数字
/// 开始连续编号。不修改传入的树。
pub fn renumber(tree: &NavTree) -> NavTree {
    let mut renumbered = tree.clone();
    renumber_siblings(&mut renumbered.entries);
    renumbered
}

fn renumber_siblings(entries: &mut [NavEntry]) {
    // 当前连续段的前缀、数字宽度和下一个编号
    let mut run: Option<(String, usize)> = None;
    let mut next_number: u64 = 0;

    for entry in entries.iter_mut() {
        let parsed = NUMBERED_TITLE_RE.captures(&entry.title).and_then(|caps| {
            let prefix = caps.get(1)?.as_str().to_string();
            let digits = caps.get(2)?.as_str();
            let number = digits.parse::<u64>().ok()?;
            let suffix = caps.get(3)?.as_str().to_string();
            Some((prefix, digits.len(), number, suffix))
        });

        match parsed {
            Some((prefix, width, number, suffix)) => {
                let run_width = run
                    .as_ref()
                    .filter(|(run_prefix, _)| *run_prefix == prefix)
                    .map(|(_, run_width)| *run_width);
                match run_width {
                    Some(run_width) => {
                        entry.title =
                            format!("{}{:0width$}{}", prefix, next_number, suffix, width = run_width);
                        next_number += 1;
                    }
                    None => {
                        next_number = number + 1;
                        run = Some((prefix, width));
                    }
                }
            }
            None => run = None,
        }
        renumber_siblings(&mut entry.children);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CH1: &str = r#"<html><body>
<h1 id="c1">第一章</h1>
<h2 id="s1">小节 一</h2>
<h3>细节</h3>
<h2 class="quire-not-in-toc">隐藏</h2>
<h2 id="s2">小节 二</h2>
</body></html>"#;
    const CH2: &str = r#"<html><body><h2>没有上级</h2><h1><img src="a.png" alt="图片标题"/></h1></body></html>"#;

    fn documents() -> Vec<(ResourceId, &'static str)> {
        vec![(ResourceId::new("ch1"), CH1), (ResourceId::new("ch2"), CH2)]
    }

    #[test]
    fn test_collect_headings() {
        let headings = collect_headings(CH1, &HeadingSelection::default());
        let titles: Vec<&str> = headings.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["第一章", "小节 一", "细节", "小节 二"]);
        assert_eq!(headings[2].id, None);

        let limited = HeadingSelection {
            max_level: 1,
            ..HeadingSelection::default()
        };
        assert_eq!(collect_headings(CH1, &limited).len(), 1);
    }

    #[test]
    fn test_generate_nests_by_level() {
        let tree = generate(&documents(), &HeadingSelection::default(), &NavTree::new());
        assert_eq!(tree.entries.len(), 2);

        let first = &tree.entries[0];
        assert_eq!(first.title, "第一章");
        assert_eq!(first.target, Some(NavTarget::new("ch1", Some("c1".to_string()))));
        assert_eq!(first.children.len(), 3);
        assert_eq!(first.children[0].children[0].title, "细节");
        assert_eq!(first.children[0].children[0].target, Some(NavTarget::new("ch1", None)));
        assert_eq!(first.children[0].children[0].level, 3);
        // 下一章的h2挂在上一章的h1下面
        assert_eq!(first.children[2].title, "没有上级");
        assert_eq!(tree.entries[1].title, "图片标题");
    }

    #[test]
    fn test_generate_is_idempotent() {
        let first = generate(&documents(), &HeadingSelection::default(), &NavTree::new());
        assert!(!first.is_empty());
        let second = generate(&documents(), &HeadingSelection::default(), &first);
        assert!(second.is_empty());
    }

    #[test]
    fn test_renumber() {
        let titles = ["第3章 开始", "第7章 经过", "第9章 结束", "附录", "第1节", "第1节", "Part 02", "Part 5"];
        let mut parent = NavEntry::new("卷1", None);
        parent.children = vec![NavEntry::new("Chapter 4", None), NavEntry::new("Chapter 4", None)];
        let mut entries: Vec<NavEntry> = titles.iter().map(|t| NavEntry::new(*t, None)).collect();
        entries.push(parent);
        let tree = NavTree::from_entries(entries);

        let renumbered = renumber(&tree);
        let result: Vec<&str> = renumbered.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(
            result,
            vec!["第3章 开始", "第4章 经过", "第5章 结束", "附录", "第1节", "第2节", "Part 02", "Part 03", "卷1"]
        );
        assert_eq!(renumbered.entries[8].children[1].title, "Chapter 5");
        // 原树不变
        assert_eq!(tree.entries[1].title, "第7章 经过");
    }

    #[test]
    fn test_collect_headings_after_self_closed_title() {
        let content = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title/><script src="a.js"/></head>
<body><h1 id="c1">第一章</h1><p><a id="top"/>正文</p><h2 id="s1">小节</h2></body></html>"#;
        let headings = collect_headings(content, &HeadingSelection::default());
        let titles: Vec<&str> = headings.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["第一章", "小节"]);

        let tree = generate(&[(ResourceId::new("ch1"), content)], &HeadingSelection::default(), &NavTree::new());
        assert_eq!(tree.total_count(), 2);
        assert_eq!(tree.entries[0].children[0].target, Some(NavTarget::new("ch1", Some("s1".to_string()))));
    }

    #[test]
    fn test_assign_heading_ids() {
        let existing: HashSet<String> = ["quire-toc-1".to_string()].into_iter().collect();
        let content = r#"<h1 id="c1">一</h1><H2 class="a">二</H2><h2 class="quire-not-in-toc">隐</h2><h3>三</h3><h6>六</h6>"#;
        let selection = HeadingSelection {
            max_level: 3,
            ..HeadingSelection::default()
        };
        let updated = assign_heading_ids(content, &selection, &existing).unwrap();
        assert_eq!(
            updated,
            r#"<h1 id="c1">一</h1><H2 class="a" id="quire-toc-2">二</H2><h2 class="quire-not-in-toc">隐</h2><h3 id="quire-toc-3">三</h3><h6>六</h6>"#
        );
        assert_eq!(assign_heading_ids(&updated, &selection, &existing), None);
        assert!(assign_heading_ids("<p>无标题</p>", &selection, &existing).is_none());
    }
}
