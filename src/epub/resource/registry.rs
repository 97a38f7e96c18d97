//! 标识符注册表
//!
//! 负责分配在整本书生命周期内唯一的资源ID和文件名。分配与登记在同一次
//! 调用中完成，同一操作中的连续调用不会得到相同的结果。

use std::collections::{HashMap, HashSet};

use crate::epub::error::FilenameError;
use crate::epub::path;
use crate::epub::resource::file::ResourceId;

/// 文件名中禁止出现的字符
pub const FORBIDDEN_FILENAME_CHARS: &[char] =
    &['<', '>', ':', '"', '/', '\\', '|', '?', '*', '#', '%'];

/// 资源ID与路径注册表
#[derive(Debug, Clone, Default)]
pub struct IdRegistry {
    /// 已占用的ID
    ids: HashSet<String>,
    /// 已占用的路径：小写路径 -> 实际路径
    paths: HashMap<String, String>,
}

impl IdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// ID是否已被占用
    pub fn contains_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// 登记指定ID，已被占用时返回false
    pub fn reserve_id(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    /// 分配`prefix`加最小可用正整数组成的新ID并立即登记
    pub fn next_id(&mut self, prefix: &str) -> ResourceId {
        let mut n: u64 = 1;
        loop {
            let candidate = format!("{}{}", prefix, n);
            if self.ids.insert(candidate.clone()) {
                return ResourceId::new(candidate);
            }
            n += 1;
        }
    }

    /// 根据文件名生成ID，文件名冲突时自动消歧
    pub fn id_for_filename(&mut self, filename: &str) -> ResourceId {
        let candidate = sanitize_id(filename);
        if self.reserve_id(&candidate) {
            return ResourceId::new(candidate);
        }
        self.next_id(&format!("{}_", candidate))
    }

    /// 登记路径
    pub fn register_path(&mut self, relative_path: &str) {
        self.paths
            .insert(relative_path.to_lowercase(), relative_path.to_string());
    }

    /// 释放路径
    pub fn release_path(&mut self, relative_path: &str) {
        self.paths.remove(&relative_path.to_lowercase());
    }

    /// 路径是否已被占用（不区分大小写）
    pub fn contains_path(&self, relative_path: &str) -> bool {
        self.paths.contains_key(&relative_path.to_lowercase())
    }

    /// 校验目录`dir`下的新文件名
    ///
    /// 重复检查不区分大小写，以避免在大小写不敏感的文件系统上解压时冲突。
    pub fn validate_filename(&self, dir: &str, name: &str) -> Result<(), FilenameError> {
        self.validate_filename_for(dir, name, None)
    }

    /// 校验重命名：允许与资源自身的当前路径仅大小写不同
    pub fn validate_filename_for(
        &self,
        dir: &str,
        name: &str,
        current_path: Option<&str>,
    ) -> Result<(), FilenameError> {
        check_filename_chars(name)?;

        let full_path = path::join(dir, name);
        let key = full_path.to_lowercase();
        if let Some(existing) = self.paths.get(&key) {
            if current_path != Some(existing.as_str()) {
                return Err(FilenameError::Duplicate(full_path));
            }
        }
        Ok(())
    }

    /// 返回目录中不冲突的文件名：`stem_N.ext`，N为最小可用正整数
    pub fn unique_filename(&self, dir: &str, name: &str) -> String {
        if !self.contains_path(&path::join(dir, name)) {
            return name.to_string();
        }
        let (stem, extension) = path::split_extension(name);
        let mut n: u64 = 1;
        loop {
            let candidate = match extension {
                Some(ext) => format!("{}_{}.{}", stem, n, ext),
                None => format!("{}_{}", stem, n),
            };
            if !self.contains_path(&path::join(dir, &candidate)) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// 检查文件名是否为空或包含非法字符
pub fn check_filename_chars(name: &str) -> Result<(), FilenameError> {
    if name.trim().is_empty() {
        return Err(FilenameError::Empty);
    }
    if let Some(c) = name
        .chars()
        .find(|c| FORBIDDEN_FILENAME_CHARS.contains(c) || c.is_control())
    {
        return Err(FilenameError::IllegalCharacter(c));
    }
    Ok(())
}

/// 将任意字符串转换为合法的XML NCName
pub fn sanitize_id(name: &str) -> String {
    let mut id: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    match id.chars().next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => id.insert(0, 'x'),
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_id_smallest_free() {
        let mut registry = IdRegistry::new();
        registry.reserve_id("img1");
        registry.reserve_id("img3");
        assert_eq!(registry.next_id("img").as_str(), "img2");
        assert_eq!(registry.next_id("img").as_str(), "img4");
        assert!(registry.contains_id("img2"));
    }

    #[test]
    fn test_id_for_filename_disambiguates() {
        let mut registry = IdRegistry::new();
        let first = registry.id_for_filename("cover.png");
        let second = registry.id_for_filename("cover.png");
        assert_eq!(first.as_str(), "cover.png");
        assert_eq!(second.as_str(), "cover.png_1");
        assert_eq!(registry.id_for_filename("1 intro.xhtml").as_str(), "x1_intro.xhtml");
    }

    #[test]
    fn test_validate_filename() {
        let mut registry = IdRegistry::new();
        registry.register_path("OEBPS/Text/Chapter1.xhtml");

        assert_eq!(registry.validate_filename("OEBPS/Text", "  "), Err(FilenameError::Empty));
        assert_eq!(
            registry.validate_filename("OEBPS/Text", "a:b.xhtml"),
            Err(FilenameError::IllegalCharacter(':'))
        );
        assert_eq!(
            registry.validate_filename("OEBPS/Text", "chapter1.XHTML"),
            Err(FilenameError::Duplicate("OEBPS/Text/chapter1.XHTML".to_string()))
        );
        assert!(registry.validate_filename("OEBPS/Text", "chapter2.xhtml").is_ok());
        assert!(
            registry
                .validate_filename_for("OEBPS/Text", "chapter1.xhtml", Some("OEBPS/Text/Chapter1.xhtml"))
                .is_ok()
        );
    }

    #[test]
    fn test_unique_filename() {
        let mut registry = IdRegistry::new();
        registry.register_path("OEBPS/Images/a.png");
        registry.register_path("OEBPS/Images/a_1.png");
        assert_eq!(registry.unique_filename("OEBPS/Images", "a.png"), "a_2.png");
        assert_eq!(registry.unique_filename("OEBPS/Images", "b.png"), "b.png");
    }
}
