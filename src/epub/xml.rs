//! XML读写的共用小工具

use quick_xml::events::BytesStart;

use crate::epub::error::Result;

/// 转义XML文本和属性值
pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// 读取元素的全部属性（限定名, 反转义后的值）
pub fn collect_attributes(element: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut attributes = Vec::new();
    for attr in element.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value()?.to_string();
        attributes.push((key, value));
    }
    Ok(attributes)
}

/// 读取单个属性（按本地名匹配）
pub fn attribute(element: &BytesStart<'_>, local_name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == local_name {
            return Ok(Some(attr.unescape_value()?.to_string()));
        }
    }
    Ok(None)
}

/// 把属性列表写成` key="value"`形式
pub fn write_attributes(attributes: &[(String, String)]) -> String {
    let mut out = String::new();
    for (key, value) in attributes {
        out.push_str(&format!(" {}=\"{}\"", key, escape(value)));
    }
    out
}

/// 将字节偏移换算为(行, 列)，均从1开始，列按字符计
pub fn line_column(text: &str, offset: usize) -> (usize, usize) {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    let before = &text[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|pos| pos + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"a<b & "c">"#), "a&lt;b &amp; &quot;c&quot;&gt;");
    }

    #[test]
    fn test_line_column() {
        let text = "<a>\n  <b>中文</b>\n</a>";
        assert_eq!(line_column(text, 0), (1, 1));
        assert_eq!(line_column(text, 6), (2, 3));
        let pos = text.find("</b>").unwrap();
        assert_eq!(line_column(text, pos), (2, 8));
    }

    #[test]
    fn test_collect_attributes() {
        let mut reader = quick_xml::Reader::from_str(r#"<item id="a" href="x&amp;y.xhtml"/>"#);
        let mut buf = Vec::new();
        match reader.read_event_into(&mut buf).unwrap() {
            quick_xml::events::Event::Empty(e) => {
                let attrs = collect_attributes(&e).unwrap();
                assert_eq!(attrs[1], ("href".to_string(), "x&y.xhtml".to_string()));
                assert_eq!(attribute(&e, b"id").unwrap().as_deref(), Some("a"));
                assert_eq!(write_attributes(&attrs), r#" id="a" href="x&amp;y.xhtml""#);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
