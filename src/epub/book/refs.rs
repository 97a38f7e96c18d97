//! 资源之间引用的改写
//!
//! 重命名、合并、拆分之后，其他文档中指向被移动内容的href/src/url()需要跟着改。

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::epub::book::Book;
use crate::epub::path;
use crate::epub::wellformed::Syntax;

/// 标记语言中带引用的属性
static ATTRIBUTE_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\s(?:href|src|xlink:href|poster|data)\s*=\s*)(?:"([^"]*)"|'([^']*)')"#)
        .expect("引用属性正则表达式无效")
});

/// 样式中的url()
static CSS_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(url\(\s*)(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))(\s*\))"#).expect("url正则表达式无效")
});

/// 样式中不带url()的@import
static CSS_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(@import\s+)(?:"([^"]*)"|'([^']*)')"#).expect("@import正则表达式无效")
});

/// 元素的id属性
static ID_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\sid\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("id正则表达式无效")
});

/// 引用所在文档的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Location<'a> {
    /// 文档所在目录
    pub dir: &'a str,
    /// 文档的容器路径
    pub path: &'a str,
}

impl<'a> Location<'a> {
    pub fn of(path: &'a str) -> Self {
        Self {
            dir: path::parent_dir(path),
            path,
        }
    }
}

/// 文档中出现的全部id
pub(crate) fn element_ids(text: &str) -> HashSet<String> {
    ID_ATTR_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// 改写文本中的引用
///
/// `map`接收引用目标的容器路径和原始片段，返回新的目标；返回None表示目标不变。
/// 文本从`from`移动到`to`时，即使目标不变，相对路径也会按新位置重新计算。
/// 没有任何改动时返回None。
pub(crate) fn rewrite_references<F>(
    text: &str,
    css: bool,
    from: Location<'_>,
    to: Location<'_>,
    map: &mut F,
) -> Option<String>
where
    F: FnMut(&str, Option<&str>) -> Option<(String, Option<String>)>,
{
    let mut changed = false;
    let mut current = text.to_string();

    let mut patterns: Vec<&Regex> = vec![&CSS_URL_RE];
    if css {
        patterns.push(&CSS_IMPORT_RE);
    } else {
        patterns.insert(0, &ATTRIBUTE_REF_RE);
    }

    for pattern in patterns {
        let replaced = pattern.replace_all(&current, |caps: &Captures<'_>| {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let Some((index, value)) = (2..caps.len())
                .find_map(|i| caps.get(i).map(|m| (i, m.as_str())))
                .filter(|(i, _)| *i < 5)
            else {
                return whole.to_string();
            };
            match rewrite_value(value, from, to, &mut *map) {
                Some(href) => {
                    changed = true;
                    let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                    let suffix = caps.get(5).map(|m| m.as_str()).unwrap_or_default();
                    match index {
                        3 => format!("{}'{}'{}", prefix, href, suffix),
                        4 => format!("{}{}{}", prefix, href, suffix),
                        _ => format!("{}\"{}\"{}", prefix, href, suffix),
                    }
                }
                None => whole.to_string(),
            }
        });
        current = replaced.into_owned();
    }

    changed.then_some(current)
}

/// 改写单个引用值
fn rewrite_value<F>(value: &str, from: Location<'_>, to: Location<'_>, map: &mut F) -> Option<String>
where
    F: FnMut(&str, Option<&str>) -> Option<(String, Option<String>)>,
{
    if value.trim().is_empty() || path::is_external(value) {
        return None;
    }
    let (path_part, fragment) = path::split_fragment(value);
    let target = if path_part.is_empty() {
        from.path.to_string()
    } else {
        path::resolve_href(from.dir, path_part)
    };

    let (new_target, new_fragment) = match map(&target, fragment) {
        Some(mapped) => mapped,
        None if from != to => (target, fragment.map(str::to_string)),
        None => return None,
    };

    let href = match new_fragment {
        Some(fragment) if new_target == to.path => format!("#{}", fragment),
        Some(fragment) => format!("{}#{}", path::relative_href(to.dir, &new_target), fragment),
        None => path::relative_href(to.dir, &new_target),
    };
    (href != value).then_some(href)
}

impl Book {
    /// 对所有文本资源中的引用应用映射，返回被修改的资源数
    pub(super) fn retarget_references<F>(&mut self, mut map: F) -> usize
    where
        F: FnMut(&str, Option<&str>) -> Option<(String, Option<String>)>,
    {
        let mut changed = 0;
        for resource in self.resources.values_mut() {
            let Some(syntax) = Syntax::for_resource(resource) else {
                continue;
            };
            let Some(text) = resource.text() else {
                continue;
            };
            let here = Location::of(resource.relative_path());
            let rewritten = rewrite_references(text, syntax == Syntax::Css, here, here, &mut map);
            if let Some(new_text) = rewritten {
                resource.set_text(new_text);
                changed += 1;
            }
        }
        changed
    }

    /// 对guide中的引用应用映射
    pub(super) fn retarget_guide<F>(&mut self, mut map: F)
    where
        F: FnMut(&str, Option<&str>) -> Option<(String, Option<String>)>,
    {
        let opf_dir = self.opf_dir().to_string();
        for reference in &mut self.package.guide {
            let (path_part, fragment) = path::split_fragment(&reference.href);
            let target = path::resolve_href(&opf_dir, path_part);
            if let Some((new_target, new_fragment)) = map(&target, fragment) {
                let mut href = path::relative_href(&opf_dir, &new_target);
                if let Some(fragment) = new_fragment {
                    href.push('#');
                    href.push_str(&fragment);
                }
                reference.href = href;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rename(old: &str, new: &str) -> impl FnMut(&str, Option<&str>) -> Option<(String, Option<String>)> {
        let old = old.to_string();
        let new = new.to_string();
        move |target, fragment| (target == old).then(|| (new.clone(), fragment.map(str::to_string)))
    }

    #[test]
    fn test_rewrite_html_attributes() {
        let text = r##"<a href="ch1.xhtml#s1">1</a> <img src='../Images/a.png'/> <a href="http://x.org/ch1.xhtml">x</a> <a href="#top">t</a>"##;
        let here = Location::of("OEBPS/Text/ch2.xhtml");

        let mut map = rename("OEBPS/Text/ch1.xhtml", "OEBPS/Text/第一章.xhtml");
        let result = rewrite_references(text, false, here, here, &mut map).unwrap();
        assert!(result.contains(r#"href="%E7%AC%AC%E4%B8%80%E7%AB%A0.xhtml#s1""#));
        assert!(result.contains("src='../Images/a.png'"));
        assert!(result.contains(r#"href="http://x.org/ch1.xhtml""#));
        assert!(result.contains(r##"href="#top""##));

        let mut map = rename("OEBPS/Images/a.png", "OEBPS/Images/b.png");
        let result = rewrite_references(text, false, here, here, &mut map).unwrap();
        assert!(result.contains("src='../Images/b.png'"));

        let mut map = rename("OEBPS/Text/none.xhtml", "OEBPS/Text/x.xhtml");
        assert!(rewrite_references(text, false, here, here, &mut map).is_none());
    }

    #[test]
    fn test_rewrite_css() {
        let text = r#"@import "base.css"; @font-face { src: url(../Fonts/a.ttf); } p { background: url("../Images/a.png"); }"#;
        let here = Location::of("OEBPS/Styles/main.css");

        let mut map = rename("OEBPS/Fonts/a.ttf", "OEBPS/Fonts/b.ttf");
        let result = rewrite_references(text, true, here, here, &mut map).unwrap();
        assert!(result.contains("url(../Fonts/b.ttf)"));

        let mut map = rename("OEBPS/Styles/base.css", "OEBPS/Styles/common.css");
        let result = rewrite_references(text, true, here, here, &mut map).unwrap();
        assert!(result.contains(r#"@import "common.css";"#));
    }

    #[test]
    fn test_moved_text_is_rebased() {
        let text = r##"<a href="#n1">1</a><a href="../Images/a.png">i</a>"##;
        let from = Location::of("OEBPS/Text/b.xhtml");
        let to = Location::of("OEBPS/a.xhtml");
        let mut keep = |_: &str, _: Option<&str>| None;
        let result = rewrite_references(text, false, from, to, &mut keep).unwrap();
        assert!(result.contains(r#"href="Text/b.xhtml#n1""#));
        assert!(result.contains(r#"href="Images/a.png""#));
    }

    #[test]
    fn test_element_ids() {
        let ids = element_ids(r#"<h1 id="c1">a</h1><p id='p2'>b</p><div data-id="x">c</div>"#);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("c1") && ids.contains("p2"));
    }
}
