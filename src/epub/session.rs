//! 会话：持有当前打开的书籍，并在后台线程上执行耗时操作
//!
//! 同一时间只有一本活动书籍。后台任务运行期间书籍对其他调用方只读，
//! 修改操作返回`SessionError::Busy`。

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::epub::book::{Book, SaveOutcome};
use crate::epub::config::QuireConfig;
use crate::epub::error::{ContainerError, EpubError, Result, SessionError};
use crate::epub::fs::FileSystem;

/// 取消标志，可以在线程间共享
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 独占标志，drop时释放
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> std::result::Result<Self, SessionError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SessionError::Busy)?;
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 后台任务句柄
pub struct Task<T> {
    handle: JoinHandle<Result<T>>,
    cancel: CancelToken,
}

impl<T> Task<T> {
    /// 请求取消，任务在下一个检查点停止
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 等待任务结束
    pub fn join(self) -> Result<T> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(EpubError::Io(io::Error::other("后台任务异常退出"))))
    }
}

/// 编辑会话
pub struct Session {
    fs: Arc<dyn FileSystem>,
    config: QuireConfig,
    book: Arc<RwLock<Option<Book>>>,
    busy: Arc<AtomicBool>,
}

impl Session {
    pub fn new(fs: Arc<dyn FileSystem>, config: QuireConfig) -> Self {
        Self {
            fs,
            config,
            book: Arc::new(RwLock::new(None)),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &QuireConfig {
        &self.config
    }

    /// 是否有后台任务正在运行
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn has_book(&self) -> bool {
        self.book.read().is_some()
    }

    /// 打开书籍，成功后替换当前书籍；失败时当前书籍不变
    pub fn open(&self, path: &Path, cancel: &CancelToken) -> Result<()> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let book = Book::load(self.fs.as_ref(), path, &self.config, cancel)?;
        *self.book.write() = Some(book);
        Ok(())
    }

    /// 在后台线程中打开书籍
    pub fn open_in_background(&self, path: impl Into<PathBuf>, cancel: CancelToken) -> Result<Task<()>> {
        let guard = BusyGuard::acquire(&self.busy)?;
        let path = path.into();
        let fs = Arc::clone(&self.fs);
        let config = self.config.clone();
        let slot = Arc::clone(&self.book);
        let token = cancel.clone();

        let handle = thread::spawn(move || -> Result<()> {
            let _guard = guard;
            let book = Book::load(fs.as_ref(), &path, &config, &token)?;
            if token.is_cancelled() {
                debug!("打开{}已取消", path.display());
                return Err(ContainerError::Cancelled.into());
            }
            *slot.write() = Some(book);
            info!("后台打开完成: {}", path.display());
            Ok(())
        });
        Ok(Task { handle, cancel })
    }

    /// 新建空白书籍替换当前书籍
    pub fn new_book(&self) -> Result<()> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        *self.book.write() = Some(Book::new_empty(&self.config));
        Ok(())
    }

    /// 保存当前书籍
    pub fn save(&self, path: &Path, cancel: &CancelToken) -> Result<SaveOutcome> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let mut slot = self.book.write();
        let book = slot.as_mut().ok_or(SessionError::NoActiveBook)?;
        book.save(self.fs.as_ref(), path, cancel)
    }

    /// 在后台线程中保存当前书籍
    pub fn save_in_background(&self, path: impl Into<PathBuf>, cancel: CancelToken) -> Result<Task<SaveOutcome>> {
        let path = path.into();
        let fs = Arc::clone(&self.fs);
        self.run_exclusive(cancel, move |book, token| book.save(fs.as_ref(), &path, token))
    }

    /// 在后台线程中独占地操作当前书籍
    pub fn run_exclusive<R, F>(&self, cancel: CancelToken, f: F) -> Result<Task<R>>
    where
        R: Send + 'static,
        F: FnOnce(&mut Book, &CancelToken) -> Result<R> + Send + 'static,
    {
        let guard = BusyGuard::acquire(&self.busy)?;
        if !self.has_book() {
            return Err(SessionError::NoActiveBook.into());
        }
        let slot = Arc::clone(&self.book);
        let token = cancel.clone();

        let handle = thread::spawn(move || -> Result<R> {
            let _guard = guard;
            let mut slot = slot.write();
            let book = slot.as_mut().ok_or(SessionError::NoActiveBook)?;
            f(book, &token)
        });
        Ok(Task { handle, cancel })
    }

    /// 读取当前书籍
    pub fn with_book<R>(&self, f: impl FnOnce(&Book) -> R) -> Result<R> {
        let slot = self.book.read();
        let book = slot.as_ref().ok_or(SessionError::NoActiveBook)?;
        Ok(f(book))
    }

    /// 修改当前书籍，后台任务运行期间返回`Busy`
    pub fn with_book_mut<R>(&self, f: impl FnOnce(&mut Book) -> R) -> Result<R> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let mut slot = self.book.write();
        let book = slot.as_mut().ok_or(SessionError::NoActiveBook)?;
        Ok(f(book))
    }

    /// 关闭当前书籍
    pub fn close(&self) -> Result<Option<Book>> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        Ok(self.book.write().take())
    }
}
