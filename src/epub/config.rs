//! 配置模块
//!
//! 从YAML文件加载格式良好性检查、目录生成、保存和新建书籍的默认设置。

use crate::epub::codec::ObfuscationMethod;
use crate::epub::error::{EpubError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "quire.yaml";

/// 格式良好性检查与修复设置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MendSettings {
    /// 打开书籍时自动修复格式错误的文档
    pub mend_on_open: bool,
    /// 从代码视图切换到预览时自动修复
    pub mend_on_view_switch: bool,
    /// 保存时不询问直接修复
    pub auto_mend_on_save: bool,
}

impl Default for MendSettings {
    fn default() -> Self {
        Self {
            mend_on_open: false,
            mend_on_view_switch: true,
            auto_mend_on_save: false,
        }
    }
}

/// 目录生成设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TocSettings {
    /// 参与生成的最大标题级别（1-6）
    pub max_heading_level: u8,
    /// 带有该class的标题不进入目录
    pub exclude_class: String,
}

impl Default for TocSettings {
    fn default() -> Self {
        Self {
            max_heading_level: 6,
            exclude_class: "quire-not-in-toc".to_string(),
        }
    }
}

/// 配置文件中的字体混淆选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObfuscationSetting {
    /// 保持各字体加载时的设置
    #[default]
    Keep,
    /// 保存时去除所有混淆
    None,
    /// 全部使用IDPF算法
    Idpf,
    /// 全部使用Adobe算法
    Adobe,
}

impl ObfuscationSetting {
    /// 转换为具体算法，`Keep`返回None
    pub fn method(&self) -> Option<Option<ObfuscationMethod>> {
        match self {
            ObfuscationSetting::Keep => None,
            ObfuscationSetting::None => Some(None),
            ObfuscationSetting::Idpf => Some(Some(ObfuscationMethod::Idpf)),
            ObfuscationSetting::Adobe => Some(Some(ObfuscationMethod::Adobe)),
        }
    }
}

/// 保存设置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveSettings {
    /// 字体混淆
    pub obfuscation: ObfuscationSetting,
    /// deflate压缩级别（0-9）
    pub compression_level: i64,
}

impl Default for SaveSettings {
    fn default() -> Self {
        Self {
            obfuscation: ObfuscationSetting::Keep,
            compression_level: 6,
        }
    }
}

/// 新建书籍设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewBookSettings {
    /// EPUB版本（2或3）
    pub version: u8,
    /// 默认语言
    pub language: String,
    /// 默认标题
    pub title: String,
}

impl Default for NewBookSettings {
    fn default() -> Self {
        Self {
            version: 3,
            language: "zh".to_string(),
            title: "未命名".to_string(),
        }
    }
}

/// 完整配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QuireConfig {
    pub wellformed: MendSettings,
    pub toc: TocSettings,
    pub save: SaveSettings,
    pub new_book: NewBookSettings,
}

impl QuireConfig {
    /// 从指定文件加载配置
    ///
    /// # 示例
    ///
    /// ```no_run
    /// use quire::QuireConfig;
    /// let config = QuireConfig::from_file("quire.yaml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| EpubError::ConfigError(format!("无法读取配置文件: {}", e)))?;
        let config: Self = serde_yml::from_str(&content)
            .map_err(|e| EpubError::ConfigError(format!("配置文件格式错误: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 把默认配置写到指定路径
    pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let yaml_content = serde_yml::to_string(&Self::default())
            .map_err(|e| EpubError::ConfigError(format!("序列化配置失败: {}", e)))?;

        // 在YAML内容前添加注释说明
        let content_with_header = format!(
            "# quire 配置文件\n\
             # wellformed: 打开、切换视图和保存时的格式修复策略\n\
             # toc: 目录生成使用的标题级别和排除class\n\
             # save: 字体混淆(keep/none/idpf/adobe)和压缩级别\n\
             # new_book: 新建书籍的默认值\n\n{}",
            yaml_content
        );

        fs::write(path.as_ref(), content_with_header)
            .map_err(|e| EpubError::ConfigError(format!("写入配置文件失败: {}", e)))?;

        Ok(())
    }

    /// 尝试加载配置，文件不存在时先生成默认配置
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            match Self::generate_default_config(path) {
                Ok(()) => info!("已生成默认配置文件: {}", path.display()),
                Err(e) => warn!("无法生成默认配置文件: {}", e),
            }
            return Self::default();
        }
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}，使用默认配置", e);
                Self::default()
            }
        }
    }

    /// 检查取值范围
    pub fn validate(&self) -> Result<()> {
        if !(1..=6).contains(&self.toc.max_heading_level) {
            return Err(EpubError::ConfigError(format!(
                "toc.max_heading_level必须在1到6之间: {}",
                self.toc.max_heading_level
            )));
        }
        if !(0..=9).contains(&self.save.compression_level) {
            return Err(EpubError::ConfigError(format!(
                "save.compression_level必须在0到9之间: {}",
                self.save.compression_level
            )));
        }
        if self.new_book.version != 2 && self.new_book.version != 3 {
            return Err(EpubError::ConfigError(format!(
                "new_book.version只能是2或3: {}",
                self.new_book.version
            )));
        }
        Ok(())
    }
}
