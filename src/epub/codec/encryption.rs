//! META-INF/encryption.xml 的解析与生成

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::epub::codec::obfuscation::ObfuscationMethod;
use crate::epub::error::Result;
use crate::epub::path;
use crate::epub::xml::escape;

/// encryption.xml在容器中的路径
pub const ENCRYPTION_PATH: &str = "META-INF/encryption.xml";

/// 一条加密记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEntry {
    /// 算法URI
    pub algorithm: String,
    /// 被加密文件的容器路径（已解码）
    pub path: String,
}

impl EncryptedEntry {
    /// 是否为字体混淆（而非真正的DRM加密）
    pub fn obfuscation(&self) -> Option<ObfuscationMethod> {
        ObfuscationMethod::from_algorithm(&self.algorithm)
    }
}

/// 解析encryption.xml
pub fn parse_encryption(xml_content: &str) -> Result<Vec<EncryptedEntry>> {
    let mut reader = Reader::from_str(xml_content);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut algorithm: Option<String> = None;
    let mut in_encrypted_data = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                b"EncryptedData" => {
                    in_encrypted_data = true;
                    algorithm = None;
                }
                b"EncryptionMethod" if in_encrypted_data => {
                    for attr in e.attributes() {
                        let attr = attr?;
                        if attr.key.local_name().as_ref() == b"Algorithm" {
                            algorithm = Some(attr.unescape_value()?.to_string());
                        }
                    }
                }
                b"CipherReference" if in_encrypted_data => {
                    for attr in e.attributes() {
                        let attr = attr?;
                        if attr.key.local_name().as_ref() == b"URI" {
                            let uri = attr.unescape_value()?;
                            entries.push(EncryptedEntry {
                                algorithm: algorithm.clone().unwrap_or_default(),
                                path: path::resolve_href("", &uri),
                            });
                        }
                    }
                }
                _ => {}
            },
            Event::End(ref e) => {
                if e.local_name().as_ref() == b"EncryptedData" {
                    in_encrypted_data = false;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

/// 生成encryption.xml
pub fn write_encryption(entries: &[(String, ObfuscationMethod)]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <encryption xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\" \
         xmlns:enc=\"http://www.w3.org/2001/04/xmlenc#\">\n",
    );
    for (file_path, method) in entries {
        xml.push_str("  <enc:EncryptedData>\n");
        xml.push_str(&format!(
            "    <enc:EncryptionMethod Algorithm=\"{}\"/>\n",
            method.algorithm()
        ));
        xml.push_str("    <enc:CipherData>\n");
        xml.push_str(&format!(
            "      <enc:CipherReference URI=\"{}\"/>\n",
            escape(&path::encode_href(file_path))
        ));
        xml.push_str("    </enc:CipherData>\n");
        xml.push_str("  </enc:EncryptedData>\n");
    }
    xml.push_str("</encryption>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_encryption() {
        let xml = r#"<?xml version="1.0"?>
<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container" xmlns:enc="http://www.w3.org/2001/04/xmlenc#">
  <enc:EncryptedData>
    <enc:EncryptionMethod Algorithm="http://www.idpf.org/2008/embedding"/>
    <enc:CipherData><enc:CipherReference URI="OEBPS/Fonts/a%20b.ttf"/></enc:CipherData>
  </enc:EncryptedData>
  <enc:EncryptedData>
    <enc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
    <enc:CipherData><enc:CipherReference URI="OEBPS/Text/ch1.xhtml"/></enc:CipherData>
  </enc:EncryptedData>
</encryption>"#;
        let entries = parse_encryption(xml).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "OEBPS/Fonts/a b.ttf");
        assert_eq!(entries[0].obfuscation(), Some(ObfuscationMethod::Idpf));
        assert_eq!(entries[1].obfuscation(), None);
    }

    #[test]
    fn test_write_then_parse() {
        let xml = write_encryption(&[(
            "OEBPS/Fonts/f.otf".to_string(),
            ObfuscationMethod::Adobe,
        )]);
        let entries = parse_encryption(&xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "OEBPS/Fonts/f.otf");
        assert_eq!(entries[0].obfuscation(), Some(ObfuscationMethod::Adobe));
    }
}
