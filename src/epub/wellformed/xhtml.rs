//! 把HTML5解析结果序列化为XHTML

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use scraper::node::Node;
use scraper::{ElementRef, Html};

const XHTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";
const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
const MATHML_NAMESPACE: &str = "http://www.w3.org/1998/Math/MathML";
const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";
const EPUB_NAMESPACE: &str = "http://www.idpf.org/2007/ops";

/// 空元素，序列化为自闭合标签
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// 自闭合标签`<name .../>`
static SELF_CLOSING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"<([A-Za-z][A-Za-z0-9:._-]*)((?:\s+[^\s"'>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'>]+))?)*)\s*/>"#,
    )
    .expect("自闭合标签正则表达式无效")
});

/// 把非空元素的自闭合写法展开成开始和结束标签
///
/// HTML5解析器忽略非空元素上的`/>`，`<title/>`之类会吞掉后面的整个文档。
pub fn expand_self_closing(text: &str) -> Cow<'_, str> {
    SELF_CLOSING_RE.replace_all(text, |caps: &Captures<'_>| {
        let name = &caps[1];
        if VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str()) {
            caps[0].to_string()
        } else {
            format!("<{}{}></{}>", name, &caps[2], name)
        }
    })
}

/// 按HTML5规则解析XHTML或HTML文本
pub fn parse_html(text: &str) -> Html {
    Html::parse_document(&expand_self_closing(text))
}

/// 按HTML5规则解析任意文本并输出格式良好的XHTML
pub fn html_to_xhtml(text: &str) -> String {
    let document = parse_html(text);
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");

    for child in document.tree.root().children() {
        match child.value() {
            Node::Doctype(doctype) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(doctype.name());
                let public_id = doctype.public_id();
                let system_id = doctype.system_id();
                if !public_id.is_empty() {
                    out.push_str(&format!(" PUBLIC \"{}\" \"{}\"", public_id, system_id));
                } else if !system_id.is_empty() {
                    out.push_str(&format!(" SYSTEM \"{}\"", system_id));
                }
                out.push_str(">\n");
            }
            // XML声明被HTML解析器当作注释
            Node::Comment(comment) if !comment.starts_with("?xml") => {
                write_comment(&mut out, comment);
                out.push('\n');
            }
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    write_element(&mut out, element, true);
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
    out
}

fn write_comment(out: &mut String, comment: &str) {
    if comment.starts_with("?xml") {
        return;
    }
    let mut body = comment.to_string();
    while body.contains("--") {
        body = body.replace("--", "- -");
    }
    if body.ends_with('-') {
        body.push(' ');
    }
    out.push_str(&format!("<!--{}-->", body));
}

fn write_element(out: &mut String, element: ElementRef<'_>, is_root: bool) {
    let value = element.value();
    let name = value.name();
    let namespace: &str = &value.name.ns;
    let foreign = namespace == SVG_NAMESPACE || namespace == MATHML_NAMESPACE;

    out.push('<');
    out.push_str(name);

    let mut attributes: Vec<(String, String)> = Vec::new();
    for (attr_name, attr_value) in value.attrs() {
        if !is_valid_name(attr_name) {
            continue;
        }
        let attr_name = match (foreign, attr_name) {
            // 命名空间声明由下面统一补充
            (true, "xmlns" | "xlink") => continue,
            (true, "href") if namespace == SVG_NAMESPACE => "xlink:href",
            _ => attr_name,
        };
        if attributes.iter().any(|(existing, _)| existing == attr_name) {
            continue;
        }
        attributes.push((attr_name.to_string(), attr_value.to_string()));
    }

    if is_root && !attributes.iter().any(|(k, _)| k == "xmlns") {
        attributes.insert(0, ("xmlns".to_string(), XHTML_NAMESPACE.to_string()));
    }
    if is_root
        && uses_epub_prefix(element)
        && !attributes.iter().any(|(k, _)| k == "xmlns:epub")
    {
        attributes.push(("xmlns:epub".to_string(), EPUB_NAMESPACE.to_string()));
    }
    if foreign && is_foreign_root(element) {
        attributes.insert(0, ("xmlns".to_string(), namespace.to_string()));
        if attributes.iter().any(|(k, _)| k.starts_with("xlink:")) || has_xlink_descendant(element) {
            attributes.push(("xmlns:xlink".to_string(), XLINK_NAMESPACE.to_string()));
        }
    }

    for (key, attr_value) in &attributes {
        out.push_str(&format!(" {}=\"{}\"", key, escape_attribute(attr_value)));
    }

    let has_children = element.children().next().is_some();
    if !has_children && (VOID_ELEMENTS.contains(&name) || foreign) {
        out.push_str("/>");
        return;
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        // 空元素不能有内容
        out.push_str(&format!("</{}>", name));
        return;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&escape_text(text)),
            Node::Comment(comment) => write_comment(out, comment),
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    write_element(out, child_element, false);
                }
            }
            _ => {}
        }
    }

    out.push_str(&format!("</{}>", name));
}

/// 父元素不在同一外来命名空间时需要声明命名空间
fn is_foreign_root(element: ElementRef<'_>) -> bool {
    let namespace = &element.value().name.ns;
    match element.parent().and_then(ElementRef::wrap) {
        Some(parent) => parent.value().name.ns != *namespace,
        None => true,
    }
}

fn has_xlink_descendant(element: ElementRef<'_>) -> bool {
    element
        .descendants()
        .filter_map(ElementRef::wrap)
        .any(|e| {
            let namespace: &str = &e.value().name.ns;
            namespace == SVG_NAMESPACE && e.value().attrs().any(|(name, _)| name == "href")
        })
}

fn uses_epub_prefix(element: ElementRef<'_>) -> bool {
    element
        .descendants()
        .filter_map(ElementRef::wrap)
        .any(|e| e.value().attrs().any(|(name, _)| name.starts_with("epub:")))
}

/// 是否为合法的XML名称
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
