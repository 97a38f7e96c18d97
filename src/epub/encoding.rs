//! 文本资源的编码识别与解码

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use once_cell::sync::Lazy;
use regex::bytes::Regex;

/// XML声明或HTML meta中的编码标签
static CHARSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:encoding|charset)\s*=\s*["']?([A-Za-z0-9._:\-]+)"#)
        .expect("编码正则表达式无效")
});

/// 解码后的文本
#[derive(Debug, Clone)]
pub struct DecodedText {
    /// 解码后的Unicode文本（不含BOM）
    pub text: String,
    /// 原始编码名称
    pub encoding: &'static str,
    /// 解码过程中是否出现替换字符
    pub had_errors: bool,
}

/// 将原始字节解码为文本
///
/// 识别顺序：BOM → 合法UTF-8 → 文件头声明的编码 → windows-1252
pub fn decode_text(bytes: &[u8]) -> DecodedText {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return DecodedText {
            text: text.into_owned(),
            encoding: encoding.name(),
            had_errors,
        };
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return DecodedText {
            text: text.to_string(),
            encoding: UTF_8.name(),
            had_errors: false,
        };
    }

    let encoding = declared_encoding(bytes).unwrap_or(WINDOWS_1252);
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    DecodedText {
        text: text.into_owned(),
        encoding: encoding.name(),
        had_errors,
    }
}

/// 读取文件头部声明的编码
fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(1024)];
    let captures = CHARSET_RE.captures(head)?;
    Encoding::for_label(captures.get(1)?.as_bytes())
}

/// 将XML声明中的编码改写为utf-8
///
/// 文本在内存中总是Unicode，写出时总是UTF-8，声明必须与之一致。
pub fn coerce_declaration_to_utf8(text: &str) -> String {
    let text = text.trim_start_matches('\u{feff}');
    if !text.starts_with("<?xml") {
        return text.to_string();
    }
    let Some(end) = text.find("?>") else {
        return text.to_string();
    };
    let declaration = &text[..end];
    let rewritten = match declaration.find("encoding") {
        Some(pos) => {
            let rest = &declaration[pos..];
            let value_end = rest
                .char_indices()
                .skip_while(|(_, c)| *c != '"' && *c != '\'')
                .skip(1)
                .find(|(_, c)| *c == '"' || *c == '\'')
                .map(|(i, _)| pos + i + 1);
            match value_end {
                Some(value_end) => format!(
                    "{}encoding=\"utf-8\"{}",
                    &declaration[..pos],
                    &declaration[value_end..]
                ),
                None => declaration.to_string(),
            }
        }
        None => declaration.to_string(),
    };
    format!("{}{}", rewritten, &text[end..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_with_bom() {
        let bytes = b"\xEF\xBB\xBF<p>hi</p>";
        let decoded = decode_text(bytes);
        assert_eq!(decoded.text, "<p>hi</p>");
        assert_eq!(decoded.encoding, "UTF-8");
    }

    #[test]
    fn test_decode_declared_latin1() {
        let mut bytes = br#"<?xml version="1.0" encoding="iso-8859-1"?><p>"#.to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"</p>");
        let decoded = decode_text(&bytes);
        assert!(decoded.text.contains("<p>\u{e9}</p>"));
        assert_eq!(decoded.encoding, "windows-1252");
    }

    #[test]
    fn test_coerce_declaration() {
        let text = r#"<?xml version="1.0" encoding="iso-8859-1"?><a/>"#;
        assert_eq!(
            coerce_declaration_to_utf8(text),
            r#"<?xml version="1.0" encoding="utf-8"?><a/>"#
        );
        assert_eq!(coerce_declaration_to_utf8("<a/>"), "<a/>");
    }
}
