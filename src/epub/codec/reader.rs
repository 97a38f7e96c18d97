//! 读取EPUB容器
//!
//! 把ZIP中的全部条目读入内存，定位OPF，识别DRM与字体混淆。

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};

use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::epub::codec::encryption::{ENCRYPTION_PATH, parse_encryption};
use crate::epub::codec::obfuscation::ObfuscationMethod;
use crate::epub::container::{CONTAINER_PATH, Container};
use crate::epub::error::ContainerError;
use crate::epub::session::CancelToken;

/// mimetype条目路径
pub const MIMETYPE_PATH: &str = "mimetype";
/// EPUB的mimetype内容
pub const EPUB_MIMETYPE: &str = "application/epub+zip";
/// DRM权利文件
pub const RIGHTS_PATH: &str = "META-INF/rights.xml";

/// 按条目头声明的大小预分配时的上限
const MAX_PREALLOCATION: u64 = 64 << 20;

/// 条目头中的大小不可信，预分配不超过上限
fn preallocation(declared_size: u64) -> usize {
    declared_size.min(MAX_PREALLOCATION) as usize
}

/// 容器中的一个条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub path: String,
    pub data: Vec<u8>,
}

/// 读入内存的容器
#[derive(Debug, Clone)]
pub struct RawContainer {
    /// 按压缩包顺序排列的文件条目（不含目录）
    entries: Vec<RawEntry>,
    /// OPF路径
    opf_path: String,
    /// 被混淆的字体：路径 → 算法
    obfuscated: HashMap<String, ObfuscationMethod>,
}

impl RawContainer {
    /// 从内存中的ZIP数据读取
    pub fn from_bytes(bytes: &[u8], cancel: &CancelToken) -> Result<Self, ContainerError> {
        Self::from_reader(Cursor::new(bytes), cancel)
    }

    /// 从任意可定位的读取器读取
    pub fn from_reader<R: Read + Seek>(
        reader: R,
        cancel: &CancelToken,
    ) -> Result<Self, ContainerError> {
        let mut archive = ZipArchive::new(reader)?;
        let mut entries = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            if cancel.is_cancelled() {
                return Err(ContainerError::Cancelled);
            }
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let path = file.name().replace('\\', "/");
            let mut data = Vec::with_capacity(preallocation(file.size()));
            file.read_to_end(&mut data)?;
            entries.push(RawEntry { path, data });
        }
        debug!("读取了{}个条目", entries.len());

        Self::from_entries(entries)
    }

    /// 从已读取的条目构建，做mimetype、DRM和OPF检查
    pub fn from_entries(entries: Vec<RawEntry>) -> Result<Self, ContainerError> {
        let mut container = Self {
            entries,
            opf_path: String::new(),
            obfuscated: HashMap::new(),
        };

        match container.get(MIMETYPE_PATH) {
            None => {
                return Err(ContainerError::CorruptArchive("缺少mimetype文件".to_string()));
            }
            Some(mimetype) => {
                let mimetype = String::from_utf8_lossy(mimetype);
                if mimetype.trim() != EPUB_MIMETYPE {
                    warn!("mimetype内容不正确: {:?}，保存时会改正", mimetype.trim());
                }
            }
        }

        if container.get(RIGHTS_PATH).is_some() {
            return Err(ContainerError::EncryptedContainer(RIGHTS_PATH.to_string()));
        }

        if let Some(xml) = container.get(ENCRYPTION_PATH) {
            let xml = String::from_utf8_lossy(xml).to_string();
            let encrypted = parse_encryption(&xml).map_err(|e| {
                ContainerError::CorruptArchive(format!("{}解析失败: {}", ENCRYPTION_PATH, e))
            })?;
            for entry in encrypted {
                match entry.obfuscation() {
                    Some(method) => {
                        container.obfuscated.insert(entry.path, method);
                    }
                    None => {
                        return Err(ContainerError::EncryptedContainer(format!(
                            "{} ({})",
                            entry.path, entry.algorithm
                        )));
                    }
                }
            }
        }

        container.opf_path = container.locate_opf()?;
        info!("OPF文件: {}", container.opf_path);
        Ok(container)
    }

    /// 通过container.xml定位OPF，失败时扫描.opf文件
    fn locate_opf(&self) -> Result<String, ContainerError> {
        if let Some(xml) = self.get(CONTAINER_PATH) {
            match Container::parse_xml(&String::from_utf8_lossy(xml)) {
                Ok(parsed) => {
                    if let Some(path) = parsed.opf_path() {
                        if self.get(path).is_some() {
                            return Ok(path.to_string());
                        }
                        warn!("container.xml指向的OPF不存在: {}", path);
                    }
                }
                Err(e) => warn!("container.xml无法解析: {}", e),
            }
        } else {
            warn!("缺少{}", CONTAINER_PATH);
        }

        self.entries
            .iter()
            .find(|entry| entry.path.to_lowercase().ends_with(".opf"))
            .map(|entry| {
                warn!("通过扫描找到OPF文件: {}", entry.path);
                entry.path.clone()
            })
            .ok_or_else(|| ContainerError::MissingOpf("容器中没有.opf文件".to_string()))
    }

    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    pub fn entries(&self) -> &[RawEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<RawEntry> {
        self.entries
    }

    /// 按路径查找条目，先精确匹配，再忽略大小写
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.position(path).map(|i| self.entries[i].data.as_slice())
    }

    /// 条目在容器中的实际路径
    pub fn actual_path(&self, path: &str) -> Option<&str> {
        self.position(path).map(|i| self.entries[i].path.as_str())
    }

    fn position(&self, path: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.path == path)
            .or_else(|| {
                let lower = path.to_lowercase();
                self.entries
                    .iter()
                    .position(|entry| entry.path.to_lowercase() == lower)
            })
    }

    /// 取出条目数据
    pub fn take(&mut self, path: &str) -> Option<Vec<u8>> {
        let index = self.position(path)?;
        Some(self.entries.remove(index).data)
    }

    pub fn obfuscation_of(&self, path: &str) -> Option<ObfuscationMethod> {
        self.obfuscated.get(path).copied()
    }

    /// 还原被混淆的字体
    ///
    /// `identifier_for`给出每种算法使用的书籍标识符。返回已还原的路径及其算法，
    /// 无法得到密钥的字体保持原样。
    pub fn deobfuscate<F>(&mut self, identifier_for: F) -> Vec<(String, ObfuscationMethod)>
    where
        F: Fn(ObfuscationMethod) -> Option<String>,
    {
        let mut restored = Vec::new();
        let mut keys: HashMap<ObfuscationMethod, Option<Vec<u8>>> = HashMap::new();

        for entry in &mut self.entries {
            let Some(method) = self.obfuscated.get(&entry.path).copied() else {
                continue;
            };
            let key = keys.entry(method).or_insert_with(|| {
                identifier_for(method).and_then(|identifier| method.derive_key(&identifier))
            });
            match key {
                Some(key) => {
                    method.apply(key, &mut entry.data);
                    restored.push((entry.path.clone(), method));
                }
                None => warn!("无法得到{}密钥，字体{}保持原样", method, entry.path),
            }
        }
        if !restored.is_empty() {
            info!("还原了{}个混淆字体", restored.len());
        }
        restored
    }
}
