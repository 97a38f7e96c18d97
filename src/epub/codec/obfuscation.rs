//! 字体混淆
//!
//! 两种算法都是对字体文件头部做异或，编码与解码是同一个操作。

use std::fmt;

/// IDPF字体混淆算法URI
pub const IDPF_ALGORITHM: &str = "http://www.idpf.org/2008/embedding";
/// Adobe字体混淆算法URI
pub const ADOBE_ALGORITHM: &str = "http://ns.adobe.com/pdf/enc#RC";

/// IDPF算法处理的字节数
const IDPF_OBFUSCATED_LEN: usize = 1040;
/// Adobe算法处理的字节数
const ADOBE_OBFUSCATED_LEN: usize = 1024;

/// 字体混淆算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObfuscationMethod {
    /// IDPF：SHA-1(去空白的唯一标识符)，前1040字节
    Idpf,
    /// Adobe：UUID的16字节，前1024字节
    Adobe,
}

impl ObfuscationMethod {
    /// 根据encryption.xml中的算法URI识别
    pub fn from_algorithm(uri: &str) -> Option<Self> {
        match uri.trim() {
            IDPF_ALGORITHM => Some(ObfuscationMethod::Idpf),
            ADOBE_ALGORITHM => Some(ObfuscationMethod::Adobe),
            _ => None,
        }
    }

    /// 算法URI
    pub fn algorithm(&self) -> &'static str {
        match self {
            ObfuscationMethod::Idpf => IDPF_ALGORITHM,
            ObfuscationMethod::Adobe => ADOBE_ALGORITHM,
        }
    }

    /// 由书籍标识符推导密钥
    ///
    /// Adobe算法要求标识符是UUID，否则返回None。
    pub fn derive_key(&self, identifier: &str) -> Option<Vec<u8>> {
        match self {
            ObfuscationMethod::Idpf => {
                let stripped: String = identifier.chars().filter(|c| !c.is_whitespace()).collect();
                Some(sha1_smol::Sha1::from(stripped.as_bytes()).digest().bytes().to_vec())
            }
            ObfuscationMethod::Adobe => adobe_key(identifier),
        }
    }

    /// 对字体数据做混淆或解混淆
    pub fn apply(&self, key: &[u8], data: &mut [u8]) {
        if key.is_empty() {
            return;
        }
        let len = match self {
            ObfuscationMethod::Idpf => IDPF_OBFUSCATED_LEN,
            ObfuscationMethod::Adobe => ADOBE_OBFUSCATED_LEN,
        };
        for (i, byte) in data.iter_mut().take(len).enumerate() {
            *byte ^= key[i % key.len()];
        }
    }
}

impl fmt::Display for ObfuscationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObfuscationMethod::Idpf => write!(f, "IDPF"),
            ObfuscationMethod::Adobe => write!(f, "Adobe"),
        }
    }
}

/// 从`urn:uuid:`标识符中取出16字节密钥
fn adobe_key(identifier: &str) -> Option<Vec<u8>> {
    let trimmed = identifier.trim();
    let raw = trimmed
        .strip_prefix("urn:uuid:")
        .or_else(|| trimmed.strip_prefix("URN:UUID:"))
        .unwrap_or(trimmed);
    let uuid = uuid::Uuid::parse_str(raw).ok()?;
    Some(uuid.as_bytes().to_vec())
}
