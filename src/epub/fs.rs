//! 外部协作接口：文件系统与用户确认
//!
//! 核心代码不直接访问磁盘或弹出对话框，这两件事都通过这里的trait注入。

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::epub::error::ContainerError;
use crate::epub::session::CancelToken;

/// 文件系统
pub trait FileSystem: Send + Sync {
    /// 读取整个文件
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn exists(&self, path: &Path) -> bool;

    /// 先写入临时文件，再改名覆盖目标
    ///
    /// 改名之前取消时目标文件保持不变。
    fn write_atomic(
        &self,
        path: &Path,
        data: &[u8],
        cancel: &CancelToken,
    ) -> Result<(), ContainerError>;
}

/// 本地磁盘
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn write_atomic(
        &self,
        path: &Path,
        data: &[u8],
        cancel: &CancelToken,
    ) -> Result<(), ContainerError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp = NamedTempFile::new_in(&dir)?;
        temp.write_all(data)?;
        temp.flush()?;

        if cancel.is_cancelled() {
            // 临时文件在drop时删除
            return Err(ContainerError::Cancelled);
        }
        temp.persist(path).map_err(|e| ContainerError::Io(e.error))?;
        debug!("已写入 {}", path.display());
        Ok(())
    }
}

/// 内存文件系统
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        self.files.lock().insert(path.into(), data);
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files.lock().get(path.as_ref()).cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.lock().keys().cloned().collect()
    }
}

impl FileSystem for MemoryFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.get(path).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("文件不存在: {}", path.display()))
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    fn write_atomic(
        &self,
        path: &Path,
        data: &[u8],
        cancel: &CancelToken,
    ) -> Result<(), ContainerError> {
        if cancel.is_cancelled() {
            return Err(ContainerError::Cancelled);
        }
        self.insert(path, data.to_vec());
        Ok(())
    }
}

/// 用户对确认问题的回答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Yes,
    No,
    Cancel,
}

/// 向用户提问
pub trait UserPrompt {
    fn ask(&self, question: &str) -> PromptAnswer;
}

/// 总是给出同一个回答，用于非交互场景
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub PromptAnswer);

impl UserPrompt for FixedAnswer {
    fn ask(&self, _question: &str) -> PromptAnswer {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_local_atomic_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("book.epub");
        fs::write(&path, b"old").unwrap();

        let cancel = CancelToken::new();
        LocalFs.write_atomic(&path, b"new", &cancel).unwrap();
        assert_eq!(LocalFs.read(&path).unwrap(), b"new");

        cancel.cancel();
        let result = LocalFs.write_atomic(&path, b"newer", &cancel);
        assert!(matches!(result, Err(ContainerError::Cancelled)));
        assert_eq!(LocalFs.read(&path).unwrap(), b"new");
        // 取消后没有残留的临时文件
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_memory_fs() {
        let memory = MemoryFs::new();
        let path = Path::new("a/b.epub");
        assert!(!memory.exists(path));
        assert!(memory.read(path).is_err());

        memory
            .write_atomic(path, b"data", &CancelToken::new())
            .unwrap();
        assert!(memory.exists(path));
        assert_eq!(memory.read(path).unwrap(), b"data");
        assert_eq!(memory.paths(), vec![PathBuf::from("a/b.epub")]);
    }

    #[test]
    fn test_fixed_answer() {
        assert_eq!(FixedAnswer(PromptAnswer::No).ask("保存吗?"), PromptAnswer::No);
    }
}
