//! EPUB3 Nav文档的解析与生成

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use scraper::{ElementRef, Selector};
use tracing::warn;

use crate::epub::nav::navigation::{DETACHED_CLASS, NavEntry, NavTarget, NavTree};
use crate::epub::nav::ncx::collapse_whitespace;
use crate::epub::path;
use crate::epub::resource::ResourceId;
use crate::epub::wellformed::parse_html;
use crate::epub::xml::escape;

static NAV_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("nav").expect("nav选择器无效"));

/// 解析Nav文档中`epub:type="toc"`的导航
///
/// 没有带toc类型的nav时使用第一个nav。
///
/// # 参数
/// * `content` - Nav文档内容
/// * `base_dir` - Nav文档所在目录
/// * `lookup` - 容器路径到资源ID的查询
pub fn parse_nav<F>(content: &str, base_dir: &str, lookup: F) -> NavTree
where
    F: Fn(&str) -> Option<ResourceId>,
{
    let document = parse_html(content);
    let mut navs = document.select(&NAV_SELECTOR);
    let toc_nav = document
        .select(&NAV_SELECTOR)
        .find(|nav| has_epub_type(nav, "toc"))
        .or_else(|| navs.next());

    let Some(nav) = toc_nav else {
        warn!("Nav文档中没有nav元素");
        return NavTree::new();
    };

    let entries = child_elements(nav, "ol")
        .next()
        .map(|ol| parse_list(ol, base_dir, &lookup))
        .unwrap_or_default();
    NavTree::from_entries(entries)
}

fn has_epub_type(element: &ElementRef<'_>, kind: &str) -> bool {
    element
        .value()
        .attrs()
        .filter(|(name, _)| *name == "epub:type" || name.ends_with(":type") || *name == "type")
        .any(|(_, value)| value.split_whitespace().any(|v| v == kind))
}

fn child_elements<'a>(element: ElementRef<'a>, name: &'a str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    element
        .children()
        .filter_map(ElementRef::wrap)
        .filter(move |child| child.value().name() == name)
}

fn parse_list<F>(ol: ElementRef<'_>, base_dir: &str, lookup: &F) -> Vec<NavEntry>
where
    F: Fn(&str) -> Option<ResourceId>,
{
    let mut entries = Vec::new();
    for li in child_elements(ol, "li") {
        let label = li
            .children()
            .filter_map(ElementRef::wrap)
            .find(|child| matches!(child.value().name(), "a" | "span"));

        let title = label
            .map(|l| collapse_whitespace(&l.text().collect::<String>()))
            .unwrap_or_default();
        let mut entry = NavEntry::new(title, None);
        entry.detached = label
            .and_then(|l| l.value().attr("class"))
            .is_some_and(|class| class.split_whitespace().any(|v| v == DETACHED_CLASS));

        let href = label
            .filter(|_| !entry.detached)
            .and_then(|l| l.value().attr("href"));
        if let Some(href) = href {
            if path::is_external(href) {
                warn!("Nav条目指向外部链接，已忽略目标: {}", href);
            } else {
                let (_, fragment) = path::split_fragment(href);
                match lookup(&path::resolve_href(base_dir, href)) {
                    Some(id) => {
                        entry.target = Some(NavTarget::new(id, fragment.map(path::decode_href)))
                    }
                    None => {
                        warn!("Nav条目指向不存在的文件: {}", href);
                        entry.detached = true;
                    }
                }
            }
        }

        if let Some(sub) = child_elements(li, "ol").next() {
            entry.children = parse_list(sub, base_dir, lookup);
        }
        entries.push(entry);
    }
    entries
}

/// 生成toc导航元素
pub fn write_toc_nav<F>(tree: &NavTree, title: &str, base_dir: &str, href_of: F) -> String
where
    F: Fn(&ResourceId) -> Option<String>,
{
    let mut nav = String::from("<nav epub:type=\"toc\" id=\"toc\">\n");
    nav.push_str(&format!("      <h1>{}</h1>\n", escape(title)));
    write_list(&mut nav, &tree.entries, base_dir, &href_of, 3);
    nav.push_str("    </nav>");
    nav
}

fn write_list<F>(out: &mut String, entries: &[NavEntry], base_dir: &str, href_of: &F, depth: usize)
where
    F: Fn(&ResourceId) -> Option<String>,
{
    let indent = "  ".repeat(depth);
    out.push_str(&format!("{}<ol>\n", indent));
    for entry in entries {
        let href = entry.target.as_ref().and_then(|target| {
            href_of(&target.resource).map(|target_path| {
                let mut href = path::relative_href(base_dir, &target_path);
                if let Some(fragment) = &target.fragment {
                    href.push('#');
                    href.push_str(&path::encode_href(fragment));
                }
                href
            })
        });

        out.push_str(&format!("{}  <li>", indent));
        match href {
            Some(href) => out.push_str(&format!(
                "<a href=\"{}\">{}</a>",
                escape(&href),
                escape(&entry.title)
            )),
            None if entry.detached => out.push_str(&format!(
                "<span class=\"{}\">{}</span>",
                DETACHED_CLASS,
                escape(&entry.title)
            )),
            None => out.push_str(&format!("<span>{}</span>", escape(&entry.title))),
        }
        if entry.children.is_empty() {
            out.push_str("</li>\n");
        } else {
            out.push('\n');
            write_list(out, &entry.children, base_dir, href_of, depth + 2);
            out.push_str(&format!("{}  </li>\n", indent));
        }
    }
    out.push_str(&format!("{}</ol>\n", indent));
}

/// 生成完整的Nav文档
pub fn write_nav_document<F>(
    tree: &NavTree,
    title: &str,
    language: &str,
    base_dir: &str,
    href_of: F,
) -> String
where
    F: Fn(&ResourceId) -> Option<String>,
{
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{lang}\" xml:lang=\"{lang}\">\n\
         <head>\n  <title>{title}</title>\n</head>\n\
         <body>\n    {nav}\n</body>\n</html>\n",
        lang = escape(language),
        title = escape(title),
        nav = write_toc_nav(tree, title, base_dir, href_of),
    )
}

/// 只替换已有Nav文档中的toc导航，landmarks、page-list等其他nav保持不变
///
/// 文档不是格式良好的XML或找不到toc导航时返回None。
pub fn replace_toc_nav(document: &str, new_nav: &str) -> Option<String> {
    let (start, end) = find_toc_nav_range(document)?;
    let mut out = String::with_capacity(document.len() + new_nav.len());
    out.push_str(&document[..start]);
    out.push_str(new_nav);
    out.push_str(&document[end..]);
    Some(out)
}

/// 定位toc导航元素的字节范围
fn find_toc_nav_range(document: &str) -> Option<(usize, usize)> {
    let mut reader = Reader::from_str(document);
    let mut buf = Vec::new();
    let mut start: Option<usize> = None;
    let mut depth = 0usize;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader.read_event_into(&mut buf).ok()?;
        match event {
            Event::Start(ref e) if e.local_name().as_ref() == b"nav" => {
                if start.is_some() {
                    depth += 1;
                } else if is_toc_element(e) {
                    start = Some(before);
                    depth = 1;
                }
            }
            Event::Empty(ref e) if start.is_none() && e.local_name().as_ref() == b"nav" => {
                if is_toc_element(e) {
                    return Some((before, reader.buffer_position() as usize));
                }
            }
            Event::End(ref e) if start.is_some() && e.local_name().as_ref() == b"nav" => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| (s, reader.buffer_position() as usize));
                }
            }
            Event::Eof => return None,
            _ => {}
        }
        buf.clear();
    }
}

fn is_toc_element(e: &quick_xml::events::BytesStart<'_>) -> bool {
    e.attributes().flatten().any(|attr| {
        attr.key.local_name().as_ref() == b"type"
            && String::from_utf8_lossy(&attr.value)
                .split_whitespace()
                .any(|v| v == "toc")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAV: &str = r##"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>目录</title></head>
<body>
  <nav epub:type="landmarks"><ol><li><a epub:type="cover" href="cover.xhtml">封面</a></li></ol></nav>
  <nav epub:type="toc" id="toc">
    <h1>目录</h1>
    <ol>
      <li><span>第一部</span>
        <ol>
          <li><a href="ch1.xhtml">第一章</a></li>
          <li><a href="ch2.xhtml#s2">第二章</a></li>
        </ol>
      </li>
      <li><a href="gone.xhtml">丢失</a></li>
      <li><a href="https://example.com">外部</a></li>
    </ol>
  </nav>
</body>
</html>"##;

    fn lookup(path: &str) -> Option<ResourceId> {
        match path {
            "OEBPS/Text/ch1.xhtml" => Some(ResourceId::new("ch1")),
            "OEBPS/Text/ch2.xhtml" => Some(ResourceId::new("ch2")),
            "OEBPS/Text/cover.xhtml" => Some(ResourceId::new("cover")),
            _ => None,
        }
    }

    fn href_of(id: &ResourceId) -> Option<String> {
        Some(format!("OEBPS/Text/{}.xhtml", id))
    }

    #[test]
    fn test_parse_toc_nav() {
        let tree = parse_nav(NAV, "OEBPS/Text", lookup);
        assert_eq!(tree.entries.len(), 3);
        let part = &tree.entries[0];
        assert_eq!(part.title, "第一部");
        assert_eq!(part.target, None);
        assert_eq!(part.children.len(), 2);
        assert_eq!(part.children[1].target, Some(NavTarget::new("ch2", Some("s2".to_string()))));
        assert_eq!(part.children[1].level, 2);
        assert!(tree.entries[1].detached);
        assert!(!tree.entries[2].detached);
        assert_eq!(tree.entries[2].target, None);
    }

    #[test]
    fn test_write_and_reparse() {
        let mut tree = parse_nav(NAV, "OEBPS/Text", lookup);
        tree.prune_detached();
        tree.entries.pop();
        let document = write_nav_document(&tree, "目录", "zh", "OEBPS/Text", href_of);
        assert!(document.contains(r#"<a href="ch2.xhtml#s2">第二章</a>"#));
        assert!(document.contains("<span>第一部</span>"));
        assert_eq!(parse_nav(&document, "OEBPS/Text", lookup), tree);
    }

    #[test]
    fn test_replace_only_toc_nav() {
        let tree = NavTree::from_entries(vec![NavEntry::new(
            "新章节",
            Some(NavTarget::new("ch1", None)),
        )]);
        let new_nav = write_toc_nav(&tree, "目录", "OEBPS/Text", href_of);
        let replaced = replace_toc_nav(NAV, &new_nav).unwrap();
        assert!(replaced.contains(r#"epub:type="landmarks""#));
        assert!(replaced.contains("新章节"));
        assert!(!replaced.contains("第一部"));
        assert_eq!(parse_nav(&replaced, "OEBPS/Text", lookup), tree);
    }

    #[test]
    fn test_replace_without_toc_nav() {
        assert!(replace_toc_nav("<html><body/></html>", "<nav/>").is_none());
    }

    #[test]
    fn test_detached_marker_round_trip() {
        let mut lost = NavEntry::new("丢失", Some(NavTarget::new("gone", None)));
        lost.detached = true;
        let tree = NavTree::from_entries(vec![
            lost,
            NavEntry::new("第一章", Some(NavTarget::new("ch1", None))),
        ]);
        let href_of = |id: &ResourceId| (id.as_str() != "gone").then(|| format!("OEBPS/Text/{}.xhtml", id));
        let document = write_nav_document(&tree, "目录", "zh", "OEBPS/Text", href_of);
        assert!(document.contains(r#"<span class="detached">丢失</span>"#));

        let reparsed = parse_nav(&document, "OEBPS/Text", lookup);
        assert!(reparsed.entries[0].detached);
        assert_eq!(reparsed.entries[0].target, None);
        assert!(!reparsed.entries[1].detached);
        assert_eq!(reparsed.detached_entries().len(), 1);
    }
}
