//! 文档修复
//!
//! 修复只做一遍：编码声明改写、标签配对、实体转义，然后重新检查一次。
//! 仍然不合格就报错，不会反复尝试。

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use regex::Regex;
use tracing::debug;

use crate::epub::encoding::coerce_declaration_to_utf8;
use crate::epub::error::MendError;
use crate::epub::wellformed::checker::{PREDEFINED_ENTITIES, Syntax, check};
use crate::epub::wellformed::xhtml::html_to_xhtml;

/// `&`开头的实体引用
static ENTITY_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^&(?:#[0-9]+|#[xX][0-9a-fA-F]+|([A-Za-z_:][A-Za-z0-9_.:-]*));")
        .expect("实体正则表达式无效")
});

/// 触发修复的时机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MendPolicy {
    /// 打开书籍时
    OnOpen,
    /// 从代码视图切换到其他视图时
    OnViewSwitch,
    /// 保存时
    OnSave,
    /// 用户手动触发
    Manual,
}

/// 修复结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MendOutcome {
    /// 原文已经格式良好，没有改动
    AlreadyWellFormed,
    /// 修复后的文本
    Mended(String),
}

/// 修复文本
pub fn mend(text: &str, syntax: Syntax) -> Result<MendOutcome, MendError> {
    if check(text, syntax).ok {
        return Ok(MendOutcome::AlreadyWellFormed);
    }

    let repaired = match syntax {
        Syntax::Html => html_to_xhtml(text),
        Syntax::Xml => rebalance_xml(&coerce_declaration_to_utf8(text)),
        Syntax::Css => balance_css(text),
    };

    let result = check(&repaired, syntax);
    match result.error {
        None => {
            debug!("修复完成 ({:?})", syntax);
            Ok(MendOutcome::Mended(repaired))
        }
        Some(error) => Err(MendError::StillMalformed(error)),
    }
}

/// 用宽松模式重新读取XML，补全未闭合的标签，丢弃多余的结束标签，
/// 转义无效的实体引用
fn rebalance_xml(text: &str) -> String {
    let mut reader = Reader::from_str(text);
    {
        let config = reader.config_mut();
        config.check_end_names = false;
        config.check_comments = false;
        config.allow_unmatched_ends = true;
    }

    let mut declared: Vec<String> = Vec::new();
    let mut out = String::with_capacity(text.len() + 32);
    let mut stack: Vec<String> = Vec::new();
    let mut root_closed = false;
    let mut buf = Vec::new();

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => {
                debug!("宽松读取在{}处停止: {}", reader.error_position(), e);
                break;
            }
        };
        match event {
            Event::Decl(ref e) => {
                out.push_str(&format!("<?{}?>", String::from_utf8_lossy(e)));
            }
            Event::PI(ref e) => {
                out.push_str(&format!("<?{}?>", String::from_utf8_lossy(e)));
            }
            Event::DocType(ref e) => {
                let doctype = String::from_utf8_lossy(e).to_string();
                declared = doctype
                    .split("<!ENTITY")
                    .skip(1)
                    .filter_map(|decl| decl.split_whitespace().next().map(str::to_string))
                    .collect();
                out.push_str(&format!("<!DOCTYPE {}>", doctype));
            }
            Event::Comment(ref e) => {
                let mut body = String::from_utf8_lossy(e).to_string();
                while body.contains("--") {
                    body = body.replace("--", "- -");
                }
                if body.ends_with('-') {
                    body.push(' ');
                }
                out.push_str(&format!("<!--{}-->", body));
            }
            Event::CData(ref e) => {
                if !stack.is_empty() {
                    out.push_str(&format!("<![CDATA[{}]]>", String::from_utf8_lossy(e)));
                }
            }
            // 第二个根元素丢弃
            Event::Start(_) | Event::Empty(_) if stack.is_empty() && root_closed => {}
            Event::Start(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                out.push_str(&format!("<{}{}>", name, rebuild_attributes(e, &declared)));
                stack.push(name);
            }
            Event::Empty(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                out.push_str(&format!("<{}{}/>", name, rebuild_attributes(e, &declared)));
                if stack.is_empty() {
                    root_closed = true;
                }
            }
            Event::End(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                // 没有对应开始标签的结束标签直接丢弃
                if let Some(index) = stack.iter().rposition(|open| *open == name) {
                    while stack.len() > index {
                        if let Some(open) = stack.pop() {
                            out.push_str(&format!("</{}>", open));
                        }
                    }
                    if stack.is_empty() {
                        root_closed = true;
                    }
                }
            }
            Event::Text(ref e) => {
                let raw = String::from_utf8_lossy(e);
                if stack.is_empty() {
                    // 根元素之外只保留空白
                    if raw.trim().is_empty() {
                        out.push_str(&raw);
                    }
                } else {
                    out.push_str(&fix_entities(&raw, &declared));
                }
            }
            Event::Eof => break,
        }
        buf.clear();
    }

    while let Some(open) = stack.pop() {
        out.push_str(&format!("</{}>", open));
    }
    out
}

/// 重建属性：去掉重复属性，修正属性值中的实体和`<`
fn rebuild_attributes(element: &BytesStart<'_>, declared: &[String]) -> String {
    let mut seen: Vec<String> = Vec::new();
    let mut out = String::new();
    let mut attributes = element.html_attributes();
    attributes.with_checks(false);

    for attr in attributes {
        let Ok(attr) = attr else {
            break;
        };
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        if seen.contains(&key) {
            continue;
        }
        let raw = String::from_utf8_lossy(&attr.value);
        let value = fix_entities(&raw, declared).replace('<', "&lt;").replace('"', "&quot;");
        out.push_str(&format!(" {}=\"{}\"", key, value));
        seen.push(key);
    }
    out
}

/// 把不能识别的`&`转义为`&amp;`，并转义文本中残留的`<`
fn fix_entities(raw: &str, declared: &[String]) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(pos) = rest.find(['&', '<']) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        if rest.starts_with('<') {
            out.push_str("&lt;");
            rest = &rest[1..];
            continue;
        }

        let valid = ENTITY_REF_RE.captures(rest).and_then(|caps| {
            let whole = caps.get(0)?.as_str();
            match caps.get(1) {
                Some(name)
                    if !PREDEFINED_ENTITIES.contains(&name.as_str())
                        && !declared.iter().any(|d| d == name.as_str()) =>
                {
                    None
                }
                _ => Some(whole.len()),
            }
        });
        match valid {
            Some(len) => {
                out.push_str(&rest[..len]);
                rest = &rest[len..];
            }
            None => {
                out.push_str("&amp;");
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// 样式表修复：补全注释和字符串，丢弃多余的`}`，补上缺少的`}`
fn balance_css(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut depth = 0usize;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str("/*");
                let mut closed = false;
                while let Some(c) = chars.next() {
                    out.push(c);
                    if c == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        out.push('/');
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    out.push_str("*/");
                }
            }
            '"' | '\'' => {
                let quote = c;
                out.push(quote);
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            out.push(c);
                            if let Some(next) = chars.next() {
                                out.push(next);
                            }
                        }
                        '\n' => {
                            out.push(quote);
                            out.push('\n');
                            closed = true;
                            break;
                        }
                        _ if c == quote => {
                            out.push(c);
                            closed = true;
                            break;
                        }
                        _ => out.push(c),
                    }
                }
                if !closed {
                    out.push(quote);
                }
            }
            '{' => {
                depth += 1;
                out.push(c);
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    for _ in 0..depth {
        out.push_str("\n}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::wellformed::checker::check_xml;

    fn mended(text: &str, syntax: Syntax) -> String {
        match mend(text, syntax).unwrap() {
            MendOutcome::Mended(text) => text,
            MendOutcome::AlreadyWellFormed => panic!("应当需要修复"),
        }
    }

    #[test]
    fn test_well_formed_is_untouched() {
        let text = "<html xmlns=\"http://www.w3.org/1999/xhtml\"><body><p>ok</p></body></html>";
        assert_eq!(mend(text, Syntax::Html).unwrap(), MendOutcome::AlreadyWellFormed);
        assert_eq!(mend("p { color: red; }", Syntax::Css).unwrap(), MendOutcome::AlreadyWellFormed);
    }

    #[test]
    fn test_mend_unclosed_paragraph() {
        let text = "<html><body>\n  <p>Unclosed\n</body></html>";
        let result = mended(text, Syntax::Html);
        assert!(result.contains("<p>Unclosed\n</p>"));
        assert!(check_xml(&result).is_ok());
        // 修复结果再修复不会有任何改动
        assert_eq!(mend(&result, Syntax::Html).unwrap(), MendOutcome::AlreadyWellFormed);
    }

    #[test]
    fn test_mend_keeps_body_after_self_closed_title() {
        let text = "<html><head><title/></head><body><h1 id=\"c1\">第一章</h1><p>Unclosed</body></html>";
        let result = mended(text, Syntax::Html);
        assert!(result.contains("<title></title>"));
        assert!(result.contains(r#"<body><h1 id="c1">第一章</h1><p>Unclosed</p></body>"#));
        assert!(!result.contains("&lt;"));
    }

    #[test]
    fn test_mend_xml_tags() {
        assert_eq!(mended("<root><a>text</root>", Syntax::Xml), "<root><a>text</a></root>");
        assert_eq!(mended("<a></b>x</a>", Syntax::Xml), "<a>x</a>");
        assert_eq!(mended("<a><b>", Syntax::Xml), "<a><b></b></a>");
    }

    #[test]
    fn test_mend_xml_entities_and_encoding() {
        let text = "<?xml version=\"1.0\" encoding=\"gbk\"?><root x=\"a&b\">A & B &amp; &bogus; &#169;</root>";
        let result = mended(text, Syntax::Xml);
        assert_eq!(
            result,
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><root x=\"a&amp;b\">A &amp; B &amp; &amp;bogus; &#169;</root>"
        );
    }

    #[test]
    fn test_mend_css() {
        assert_eq!(mended("p { color: red;", Syntax::Css), "p { color: red;\n}");
        assert_eq!(mended("p { } }", Syntax::Css), "p { } ");
        assert_eq!(mended("p { } /* open", Syntax::Css), "p { } /* open*/");
    }

    #[test]
    fn test_still_malformed() {
        let result = mend("", Syntax::Xml);
        assert!(matches!(result, Err(MendError::StillMalformed(_))));
    }
}
