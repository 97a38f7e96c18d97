//! 格式良好性检查
//!
//! 检查器是无状态的，只读取文本，返回第一个错误的位置。

use once_cell::sync::Lazy;
use quick_xml::escape::unescape_with;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use regex::Regex;

use crate::epub::error::WellFormedError;
use crate::epub::resource::{Resource, ResourceKind, is_xml_media_type};
use crate::epub::xml::line_column;

/// XML预定义实体
pub(crate) const PREDEFINED_ENTITIES: &[&str] = &["amp", "lt", "gt", "quot", "apos"];

/// DOCTYPE内部子集中的实体声明
static ENTITY_DECL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!ENTITY\s+([A-Za-z_:][A-Za-z0-9_.:-]*)").expect("实体声明正则表达式无效"));

/// 文档语法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    /// HTML/XHTML内容文档（检查时按XML处理，修复时使用HTML解析器）
    Html,
    /// 其他XML文档
    Xml,
    /// 样式表
    Css,
}

impl Syntax {
    /// 根据资源种类判断需要的检查方式，不需要检查的资源返回None
    pub fn for_kind(kind: ResourceKind, media_type: &str) -> Option<Self> {
        match kind {
            ResourceKind::Html | ResourceKind::Nav => Some(Syntax::Html),
            ResourceKind::Ncx | ResourceKind::Opf => Some(Syntax::Xml),
            ResourceKind::Css => Some(Syntax::Css),
            _ if is_xml_media_type(media_type) => Some(Syntax::Xml),
            _ => None,
        }
    }

    /// 资源对应的检查方式
    pub fn for_resource(resource: &Resource) -> Option<Self> {
        if !resource.is_text() {
            return None;
        }
        Self::for_kind(resource.kind(), resource.media_type())
    }
}

/// 检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WellFormedResult {
    pub ok: bool,
    pub error: Option<WellFormedError>,
}

impl WellFormedResult {
    pub fn well_formed() -> Self {
        Self { ok: true, error: None }
    }

    pub fn malformed(error: WellFormedError) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}

impl From<Result<(), WellFormedError>> for WellFormedResult {
    fn from(result: Result<(), WellFormedError>) -> Self {
        match result {
            Ok(()) => Self::well_formed(),
            Err(e) => Self::malformed(e),
        }
    }
}

/// 检查文本
pub fn check(text: &str, syntax: Syntax) -> WellFormedResult {
    match syntax {
        Syntax::Html | Syntax::Xml => check_xml(text).into(),
        Syntax::Css => check_css(text).into(),
    }
}

fn error_at(text: &str, offset: usize, message: impl Into<String>) -> WellFormedError {
    let (line, column) = line_column(text, offset);
    WellFormedError {
        line,
        column,
        message: message.into(),
    }
}

/// 允许使用的命名实体
struct EntityRules {
    declared: Vec<String>,
    /// XHTML DTD声明了HTML命名实体
    html_entities: bool,
}

impl EntityRules {
    fn allows(&self, name: &str) -> bool {
        PREDEFINED_ENTITIES.contains(&name)
            || self.html_entities
            || self.declared.iter().any(|d| d == name)
    }
}

/// 严格的XML检查
pub fn check_xml(text: &str) -> Result<(), WellFormedError> {
    let mut reader = Reader::from_str(text);
    {
        let config = reader.config_mut();
        config.check_end_names = false;
        config.check_comments = true;
        config.allow_unmatched_ends = true;
    }

    let mut rules = EntityRules {
        declared: Vec::new(),
        html_entities: false,
    };
    // 打开的元素：(名称, 起始位置)
    let mut stack: Vec<(String, usize)> = Vec::new();
    let mut root_closed = false;
    let mut buf = Vec::new();

    loop {
        let position = reader.buffer_position() as usize;
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => {
                return Err(error_at(text, reader.error_position() as usize, e.to_string()));
            }
        };

        match event {
            Event::Start(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if stack.is_empty() && root_closed {
                    return Err(error_at(text, position, format!("文档只能有一个根元素，多余的元素<{}>", name)));
                }
                check_attributes(text, position, e, &rules)?;
                stack.push((name, position));
            }
            Event::Empty(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if stack.is_empty() && root_closed {
                    return Err(error_at(text, position, format!("文档只能有一个根元素，多余的元素<{}>", name)));
                }
                check_attributes(text, position, e, &rules)?;
                if stack.is_empty() {
                    root_closed = true;
                }
            }
            Event::End(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match stack.pop() {
                    Some((open, _)) if open == name => {
                        if stack.is_empty() {
                            root_closed = true;
                        }
                    }
                    Some((open, open_position)) => {
                        return Err(error_at(
                            text,
                            open_position,
                            format!("元素<{}>未闭合（遇到</{}>）", open, name),
                        ));
                    }
                    None => {
                        return Err(error_at(text, position, format!("多余的结束标签</{}>", name)));
                    }
                }
            }
            Event::Text(ref e) => {
                let raw = String::from_utf8_lossy(e);
                if stack.is_empty() && !raw.trim().is_empty() {
                    return Err(error_at(text, position, "根元素之外不能有文本"));
                }
                if let Err(err) = unescape_with(&raw, |name| rules.allows(name).then_some("")) {
                    return Err(error_at(text, position, format!("实体引用错误: {}", err)));
                }
            }
            Event::CData(_) => {
                if stack.is_empty() {
                    return Err(error_at(text, position, "根元素之外不能有CDATA"));
                }
            }
            Event::DocType(ref e) => {
                let doctype = String::from_utf8_lossy(e);
                rules.html_entities = doctype.contains("XHTML");
                rules.declared = ENTITY_DECL_RE
                    .captures_iter(&doctype)
                    .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
                    .collect();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some((open, open_position)) = stack.pop() {
        return Err(error_at(text, open_position, format!("元素<{}>未闭合", open)));
    }
    if !root_closed {
        return Err(error_at(text, text.len(), "文档没有根元素"));
    }
    Ok(())
}

/// 检查属性：重复属性、属性值中的实体
fn check_attributes(
    text: &str,
    position: usize,
    element: &BytesStart<'_>,
    rules: &EntityRules,
) -> Result<(), WellFormedError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| error_at(text, position, format!("属性错误: {}", e)))?;
        let raw = String::from_utf8_lossy(&attr.value);
        if raw.contains('<') {
            return Err(error_at(text, position, "属性值中不能包含'<'"));
        }
        unescape_with(&raw, |name| rules.allows(name).then_some(""))
            .map_err(|e| error_at(text, position, format!("实体引用错误: {}", e)))?;
    }
    Ok(())
}

/// 样式表检查：花括号、注释和字符串的配对
pub fn check_css(text: &str) -> Result<(), WellFormedError> {
    let mut braces: Vec<usize> = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            '/' if chars.peek().map(|(_, n)| *n) == Some('*') => {
                chars.next();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    if c == '*' && chars.peek().map(|(_, n)| *n) == Some('/') {
                        chars.next();
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(error_at(text, offset, "注释没有结束"));
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => {
                            chars.next();
                        }
                        '\n' => break,
                        _ if c == quote => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err(error_at(text, offset, "字符串没有结束"));
                }
            }
            '{' => braces.push(offset),
            '}' => {
                if braces.pop().is_none() {
                    return Err(error_at(text, offset, "多余的'}'"));
                }
            }
            _ => {}
        }
    }

    if let Some(offset) = braces.pop() {
        return Err(error_at(text, offset, "'{'没有对应的'}'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xml_error(text: &str) -> WellFormedError {
        check_xml(text).unwrap_err()
    }

    #[test]
    fn test_well_formed_xhtml() {
        let text = r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>t</title></head>
<body><p class="a">A &amp; B&nbsp;&#169;</p><br/></body>
</html>"#;
        assert!(check(text, Syntax::Html).ok);
    }

    #[test]
    fn test_unclosed_tag_points_at_open_tag() {
        let text = "<html><body>\n  <p>Unclosed\n</body></html>";
        let error = xml_error(text);
        assert_eq!((error.line, error.column), (2, 3));
        assert!(error.message.contains("<p>"));

        let error = xml_error("<p>Unclosed");
        assert_eq!((error.line, error.column), (1, 1));
    }

    #[test]
    fn test_unmatched_end_tag() {
        let error = xml_error("<a></a></b>");
        assert_eq!(error.column, 8);
    }

    #[test]
    fn test_entities() {
        assert!(check_xml("<a>&nbsp;</a>").is_err());
        assert!(check_xml("<a>A & B</a>").is_err());
        assert!(check_xml("<a>&#x4e2d;&lt;</a>").is_ok());
        assert!(check_xml("<!DOCTYPE a [<!ENTITY foo \"bar\">]><a>&foo;</a>").is_ok());
        assert!(check_xml(r#"<a href="x&y"/>"#).is_err());
    }

    #[test]
    fn test_structure_errors() {
        assert!(check_xml("<a/><b/>").is_err());
        assert!(check_xml("<a/>text").is_err());
        assert!(check_xml(r#"<a x="1" x="2"/>"#).is_err());
        assert!(check_xml("").is_err());
        assert!(check_xml("<a><!-- a -- b --></a>").is_err());
    }

    #[test]
    fn test_css() {
        assert!(check("p { color: red; } /* } */ a::after { content: \"}\"; }", Syntax::Css).ok);

        let error = check_css("p {\n  color: red;\n").unwrap_err();
        assert_eq!((error.line, error.column), (1, 3));
        assert!(check_css("p { } }").is_err());
        assert!(check_css("/* open").is_err());
        assert!(check_css("a { content: \"x; }").is_err());
    }

    #[test]
    fn test_syntax_for_kind() {
        assert_eq!(Syntax::for_kind(ResourceKind::Nav, "application/xhtml+xml"), Some(Syntax::Html));
        assert_eq!(Syntax::for_kind(ResourceKind::Image, "image/svg+xml"), Some(Syntax::Xml));
        assert_eq!(Syntax::for_kind(ResourceKind::Image, "image/png"), None);
        assert_eq!(Syntax::for_kind(ResourceKind::Css, "text/css"), Some(Syntax::Css));
    }
}
