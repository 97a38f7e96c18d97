//! 写出EPUB容器

use std::io::{Cursor, Seek, Write};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::epub::codec::reader::{EPUB_MIMETYPE, MIMETYPE_PATH};
use crate::epub::error::ContainerError;

/// 按EPUB要求写ZIP：mimetype第一个且不压缩，其余文件deflate压缩
pub struct ContainerWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    deflated: SimpleFileOptions,
    written: Vec<String>,
}

impl<W: Write + Seek> ContainerWriter<W> {
    /// 创建写入器并立即写入mimetype
    pub fn new(writer: W, compression_level: i64) -> Result<Self, ContainerError> {
        let mut zip = ZipWriter::new(writer);

        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(compression_level));

        zip.start_file(MIMETYPE_PATH, stored)?;
        zip.write_all(EPUB_MIMETYPE.as_bytes())?;

        Ok(Self {
            zip,
            deflated,
            written: vec![MIMETYPE_PATH.to_string()],
        })
    }

    /// 写入一个文件，同一路径只写一次
    pub fn add_file(&mut self, path: &str, data: &[u8]) -> Result<(), ContainerError> {
        if self.written.iter().any(|written| written == path) {
            debug!("跳过重复条目: {}", path);
            return Ok(());
        }
        self.zip.start_file(path, self.deflated)?;
        self.zip.write_all(data)?;
        self.written.push(path.to_string());
        Ok(())
    }

    /// 已写入的条目路径（按写入顺序）
    pub fn written(&self) -> &[String] {
        &self.written
    }

    pub fn finish(self) -> Result<W, ContainerError> {
        Ok(self.zip.finish()?)
    }
}

impl ContainerWriter<Cursor<Vec<u8>>> {
    /// 写入内存
    pub fn in_memory(compression_level: i64) -> Result<Self, ContainerError> {
        Self::new(Cursor::new(Vec::new()), compression_level)
    }

    pub fn finish_bytes(self) -> Result<Vec<u8>, ContainerError> {
        Ok(self.finish()?.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn test_mimetype_first_and_stored() {
        let mut writer = ContainerWriter::in_memory(6).unwrap();
        writer.add_file("META-INF/container.xml", b"<container/>").unwrap();
        writer.add_file("OEBPS/a.xhtml", b"<html/>").unwrap();
        writer.add_file("OEBPS/a.xhtml", b"<html>dup</html>").unwrap();
        assert_eq!(writer.written().len(), 3);
        let bytes = writer.finish_bytes().unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);
        {
            let mut first = archive.by_index(0).unwrap();
            assert_eq!(first.name(), "mimetype");
            assert_eq!(first.compression(), CompressionMethod::Stored);
            let mut content = String::new();
            first.read_to_string(&mut content).unwrap();
            assert_eq!(content, "application/epub+zip");
        }
        let second = archive.by_index(1).unwrap();
        assert_eq!(second.compression(), CompressionMethod::Deflated);
    }
}
