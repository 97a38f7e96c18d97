//! NCX解析与生成
//!
//! 提供NCX（Navigation Control file for XML）文件与导航树之间的转换。

use crate::epub::error::Result;
use crate::epub::nav::navigation::{DETACHED_CLASS, NavEntry, NavTarget, NavTree};
use crate::epub::path;
use crate::epub::resource::ResourceId;
use crate::epub::xml::{self, escape};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::warn;

/// NCX文件解析结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ncx {
    /// dtb:uid
    pub uid: Option<String>,
    /// 文档标题
    pub doc_title: Option<String>,
    /// 导航树
    pub tree: NavTree,
}

/// 解析中的navPoint
struct PendingPoint {
    entry: NavEntry,
    play_order: Option<u32>,
}

fn has_detached_class(class: Option<&str>) -> bool {
    class.is_some_and(|c| c.split_whitespace().any(|v| v == DETACHED_CLASS))
}

impl Ncx {
    /// 解析NCX文件内容
    ///
    /// # 参数
    /// * `xml_content` - NCX文件的XML内容
    /// * `base_dir` - NCX所在目录，用于解析content的src
    /// * `lookup` - 容器路径到资源ID的查询
    pub fn parse_xml<F>(xml_content: &str, base_dir: &str, lookup: F) -> Result<Ncx>
    where
        F: Fn(&str) -> Option<ResourceId>,
    {
        let mut reader = Reader::from_str(xml_content);
        reader.config_mut().trim_text(true);
        reader.config_mut().expand_empty_elements = true;

        let mut ncx = Ncx::default();
        let mut buf = Vec::new();
        let mut text_content = String::new();
        let mut in_doc_title = false;
        let mut in_nav_map = false;
        let mut in_label = false;

        // 每一层的子条目（带playOrder），栈底是顶层
        let mut stack: Vec<PendingPoint> = Vec::new();
        let mut levels: Vec<Vec<(Option<u32>, NavEntry)>> = vec![Vec::new()];

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(ref e) => {
                    match e.local_name().as_ref() {
                        b"meta" => {
                            if xml::attribute(e, b"name")?.as_deref() == Some("dtb:uid") {
                                ncx.uid = xml::attribute(e, b"content")?;
                            }
                        }
                        b"docTitle" => in_doc_title = true,
                        b"navMap" => in_nav_map = true,
                        b"navPoint" if in_nav_map => {
                            let play_order = xml::attribute(e, b"playOrder")?
                                .and_then(|v| v.trim().parse().ok());
                            let mut entry = NavEntry::new(String::new(), None);
                            entry.detached =
                                has_detached_class(xml::attribute(e, b"class")?.as_deref());
                            stack.push(PendingPoint { entry, play_order });
                            levels.push(Vec::new());
                        }
                        b"navLabel" if in_nav_map => in_label = true,
                        b"content" if in_nav_map => {
                            if let (Some(point), Some(src)) =
                                (stack.last_mut(), xml::attribute(e, b"src")?)
                            {
                                if !point.entry.detached {
                                    Self::resolve_target(&mut point.entry, base_dir, &src, &lookup);
                                }
                            }
                        }
                        _ => {}
                    }
                    text_content.clear();
                }
                Event::End(ref e) => match e.local_name().as_ref() {
                    b"docTitle" => in_doc_title = false,
                    b"navMap" => in_nav_map = false,
                    b"navLabel" => in_label = false,
                    b"text" if in_doc_title => {
                        ncx.doc_title = Some(text_content.trim().to_string());
                    }
                    b"text" if in_label => {
                        if let Some(point) = stack.last_mut() {
                            point.entry.title = collapse_whitespace(&text_content);
                        }
                    }
                    b"navPoint" if in_nav_map => {
                        if let (Some(mut point), Some(children)) = (stack.pop(), levels.pop()) {
                            point.entry.children = sort_by_play_order(children);
                            if let Some(parent) = levels.last_mut() {
                                parent.push((point.play_order, point.entry));
                            }
                        }
                    }
                    _ => {}
                },
                Event::Text(e) => {
                    text_content.push_str(&e.unescape()?);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        let top = levels.into_iter().next().unwrap_or_default();
        ncx.tree = NavTree::from_entries(sort_by_play_order(top));
        Ok(ncx)
    }

    /// 解析content的src，找不到资源时条目标记为脱离
    fn resolve_target<F>(entry: &mut NavEntry, base_dir: &str, src: &str, lookup: &F)
    where
        F: Fn(&str) -> Option<ResourceId>,
    {
        let (_, fragment) = path::split_fragment(src);
        let target_path = path::resolve_href(base_dir, src);
        match lookup(&target_path) {
            Some(id) => entry.target = Some(NavTarget::new(id, fragment.map(path::decode_href))),
            None => {
                warn!("NCX条目指向不存在的文件: {}", src);
                entry.detached = true;
            }
        }
    }

    /// 生成NCX文档
    ///
    /// playOrder按出现顺序从1开始连续编号。无法解析目标的条目不输出，
    /// 其子条目上移一层。脱离的条目带`class="detached"`输出，读入时恢复脱离状态。
    ///
    /// # 参数
    /// * `base_dir` - NCX所在目录
    /// * `href_of` - 资源ID到容器路径的查询
    pub fn to_xml<F>(&self, base_dir: &str, href_of: F) -> String
    where
        F: Fn(&ResourceId) -> Option<String>,
    {
        let mut body = String::new();
        let mut play_order = 0u32;
        let mut max_depth = 0usize;
        for entry in &self.tree.entries {
            write_nav_point(&mut body, entry, base_dir, &href_of, &mut play_order, 1, &mut max_depth);
        }

        let mut ncx = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n\
             <ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n",
        );
        ncx.push_str("  <head>\n");
        ncx.push_str(&format!(
            "    <meta name=\"dtb:uid\" content=\"{}\"/>\n",
            escape(self.uid.as_deref().unwrap_or_default())
        ));
        ncx.push_str(&format!("    <meta name=\"dtb:depth\" content=\"{}\"/>\n", max_depth.max(1)));
        ncx.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\"/>\n");
        ncx.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\"/>\n");
        ncx.push_str("  </head>\n");
        ncx.push_str(&format!(
            "  <docTitle>\n    <text>{}</text>\n  </docTitle>\n",
            escape(self.doc_title.as_deref().unwrap_or_default())
        ));
        ncx.push_str("  <navMap>\n");
        ncx.push_str(&body);
        ncx.push_str("  </navMap>\n</ncx>\n");
        ncx
    }
}

fn write_nav_point<F>(
    ncx: &mut String,
    entry: &NavEntry,
    base_dir: &str,
    href_of: &F,
    play_order: &mut u32,
    depth: usize,
    max_depth: &mut usize,
) where
    F: Fn(&ResourceId) -> Option<String>,
{
    let src = entry.target.as_ref().and_then(|target| {
        href_of(&target.resource).map(|target_path| {
            let mut href = path::relative_href(base_dir, &target_path);
            if let Some(fragment) = &target.fragment {
                href.push('#');
                href.push_str(&path::encode_href(fragment));
            }
            href
        })
    });

    // 分组标题在NCX中借用第一个子条目的目标
    let src = src.or_else(|| first_child_src(entry, base_dir, href_of));
    let src = match src {
        None if entry.detached => Some(String::new()),
        other => other,
    };

    let Some(src) = src else {
        for child in &entry.children {
            write_nav_point(ncx, child, base_dir, href_of, play_order, depth, max_depth);
        }
        return;
    };

    *play_order += 1;
    *max_depth = (*max_depth).max(depth);
    let indent = "  ".repeat(depth + 1);
    let class = if entry.detached {
        format!(" class=\"{}\"", DETACHED_CLASS)
    } else {
        String::new()
    };
    ncx.push_str(&format!(
        "{}<navPoint id=\"navPoint-{}\"{} playOrder=\"{}\">\n",
        indent, play_order, class, play_order
    ));
    ncx.push_str(&format!(
        "{}  <navLabel>\n{}    <text>{}</text>\n{}  </navLabel>\n",
        indent,
        indent,
        escape(&entry.title),
        indent
    ));
    ncx.push_str(&format!("{}  <content src=\"{}\"/>\n", indent, escape(&src)));
    for child in &entry.children {
        write_nav_point(ncx, child, base_dir, href_of, play_order, depth + 1, max_depth);
    }
    ncx.push_str(&format!("{}</navPoint>\n", indent));
}

fn first_child_src<F>(entry: &NavEntry, base_dir: &str, href_of: &F) -> Option<String>
where
    F: Fn(&ResourceId) -> Option<String>,
{
    entry.children.iter().find_map(|child| {
        child
            .target
            .as_ref()
            .and_then(|t| href_of(&t.resource))
            .map(|p| path::relative_href(base_dir, &p))
            .or_else(|| first_child_src(child, base_dir, href_of))
    })
}

/// 按playOrder稳定排序，没有playOrder的条目保持原位置之后
fn sort_by_play_order(mut entries: Vec<(Option<u32>, NavEntry)>) -> Vec<NavEntry> {
    if entries.iter().all(|(order, _)| order.is_some()) {
        entries.sort_by_key(|(order, _)| *order);
    }
    entries.into_iter().map(|(_, entry)| entry).collect()
}

/// 合并连续空白
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const NCX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="urn:uuid:1"/>
    <meta name="dtb:depth" content="2"/>
  </head>
  <docTitle><text>测试书籍</text></docTitle>
  <navMap>
    <navPoint id="n2" playOrder="2">
      <navLabel><text>第二章</text></navLabel>
      <content src="Text/ch2.xhtml#sec%201"/>
    </navPoint>
    <navPoint id="n1" playOrder="1">
      <navLabel><text>第一章
        开始</text></navLabel>
      <content src="Text/ch1.xhtml"/>
      <navPoint id="n3" playOrder="3">
        <navLabel><text>丢失</text></navLabel>
        <content src="Text/missing.xhtml"/>
      </navPoint>
    </navPoint>
  </navMap>
</ncx>"#;

    fn lookup(path: &str) -> Option<ResourceId> {
        match path {
            "OEBPS/Text/ch1.xhtml" => Some(ResourceId::new("ch1")),
            "OEBPS/Text/ch2.xhtml" => Some(ResourceId::new("ch2")),
            _ => None,
        }
    }

    fn href_of(id: &ResourceId) -> Option<String> {
        match id.as_str() {
            "ch1" => Some("OEBPS/Text/ch1.xhtml".to_string()),
            "ch2" => Some("OEBPS/Text/ch2.xhtml".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_parse_ncx() {
        let ncx = Ncx::parse_xml(NCX, "OEBPS", lookup).unwrap();
        assert_eq!(ncx.uid.as_deref(), Some("urn:uuid:1"));
        assert_eq!(ncx.doc_title.as_deref(), Some("测试书籍"));

        let tree = &ncx.tree;
        assert_eq!(tree.entries.len(), 2);
        assert_eq!(tree.entries[0].title, "第一章 开始");
        assert_eq!(tree.entries[1].target, Some(NavTarget::new("ch2", Some("sec 1".to_string()))));

        let lost = &tree.entries[0].children[0];
        assert!(lost.detached);
        assert_eq!(lost.target, None);
        assert_eq!(lost.level, 2);
    }

    #[test]
    fn test_write_sequential_play_order() {
        let mut ncx = Ncx::parse_xml(NCX, "OEBPS", lookup).unwrap();
        ncx.tree.prune_detached();
        let xml = ncx.to_xml("OEBPS", href_of);
        assert!(xml.contains(r#"playOrder="1""#));
        assert!(xml.contains(r#"playOrder="2""#));
        assert!(!xml.contains(r#"playOrder="3""#));
        assert!(xml.contains(r#"<content src="Text/ch2.xhtml#sec%201"/>"#));
        assert!(xml.contains(r#"<meta name="dtb:depth" content="1"/>"#));

        let reparsed = Ncx::parse_xml(&xml, "OEBPS", lookup).unwrap();
        assert_eq!(reparsed.tree, ncx.tree);
        assert_eq!(reparsed.uid, ncx.uid);
    }

    #[test]
    fn test_unresolved_entry_children_are_lifted() {
        let mut group = NavEntry::new("分组", None);
        group.add_child(NavEntry::new("第一章", Some(NavTarget::new("ch1", None))));
        let ncx = Ncx {
            uid: None,
            doc_title: None,
            tree: NavTree::from_entries(vec![
                NavEntry::new("丢失", Some(NavTarget::new("gone", None))),
                group,
            ]),
        };
        let xml = ncx.to_xml("OEBPS", href_of);
        // 分组借用子条目的目标
        assert_eq!(xml.matches("<navPoint ").count(), 2);
        assert!(!xml.contains("丢失"));
    }

    #[test]
    fn test_detached_entries_survive_rewrite() {
        let mut chapter = NavEntry::new("第一章", Some(NavTarget::new("gone", None)));
        chapter.detached = true;
        chapter.add_child(NavEntry::new("第一节", Some(NavTarget::new("ch2", None))));
        let mut lonely = NavEntry::new("附录", Some(NavTarget::new("gone", None)));
        lonely.detached = true;
        let ncx = Ncx {
            uid: None,
            doc_title: None,
            tree: NavTree::from_entries(vec![chapter, lonely]),
        };
        let xml = ncx.to_xml("OEBPS", href_of);
        assert_eq!(xml.matches(r#"class="detached""#).count(), 2);

        let reparsed = Ncx::parse_xml(&xml, "OEBPS", lookup).unwrap();
        let entries = &reparsed.tree.entries;
        assert_eq!(entries.len(), 2);
        assert!(entries[0].detached);
        assert_eq!(entries[0].target, None);
        assert_eq!(entries[0].children[0].target, Some(NavTarget::new("ch2", None)));
        assert!(!entries[0].children[0].detached);
        assert!(entries[1].detached);
        assert_eq!(reparsed.tree.detached_entries().len(), 2);
    }
}
