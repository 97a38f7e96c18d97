//! 容器编解码：ZIP读写、encryption.xml与字体混淆

mod encryption;
mod obfuscation;
mod reader;
mod writer;

pub use encryption::{ENCRYPTION_PATH, EncryptedEntry, parse_encryption, write_encryption};
pub use obfuscation::{ADOBE_ALGORITHM, IDPF_ALGORITHM, ObfuscationMethod};
pub use reader::{EPUB_MIMETYPE, MIMETYPE_PATH, RIGHTS_PATH, RawContainer, RawEntry};
pub use writer::ContainerWriter;
