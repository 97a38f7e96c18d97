//! 保存书籍
//!
//! 保存前重新生成改动过的导航文档，检查格式良好性，然后按固定顺序写出容器：
//! mimetype、container.xml、encryption.xml、OPF、导航文档、其余资源。

use std::borrow::Cow;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::epub::book::Book;
use crate::epub::codec::{ContainerWriter, ENCRYPTION_PATH, write_encryption};
use crate::epub::container::{CONTAINER_PATH, Container};
use crate::epub::encoding::coerce_declaration_to_utf8;
use crate::epub::error::{ContainerError, Result, WellFormedError};
use crate::epub::fs::{FileSystem, PromptAnswer, UserPrompt};
use crate::epub::nav::{Ncx, replace_toc_nav, write_nav_document, write_toc_nav};
use crate::epub::resource::{ResourceId, ResourceKind};
use crate::epub::session::CancelToken;
use crate::epub::wellformed::{MendPolicy, Syntax};

/// toc导航的标题
const TOC_HEADING: &str = "目录";

/// 保存结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// 已写入
    Saved,
    /// 有格式错误的文档，需要调用方决定是修复还是直接保存
    NeedsConfirmation(Vec<(ResourceId, WellFormedError)>),
    /// 写入前被取消，目标文件未改动
    Cancelled,
}

impl Book {
    /// 保存到文件
    ///
    /// 有格式错误的文档时：开启了`auto_mend_on_save`则先修复，否则返回
    /// `NeedsConfirmation`，由调用方通过`mend`或`save_unchecked`继续。
    pub fn save(&mut self, fs: &dyn FileSystem, path: &Path, cancel: &CancelToken) -> Result<SaveOutcome> {
        self.prepare_for_save();
        let mut malformed = self.check_all();
        if !malformed.is_empty() && self.mend_settings.auto_mend_on_save {
            let failures = self.mend_all(MendPolicy::OnSave);
            if !failures.is_empty() {
                warn!("{}个文件无法自动修复", failures.len());
            }
            malformed = self.check_all();
        }
        if !malformed.is_empty() {
            info!("{}个文件不是格式良好的文档，需要确认", malformed.len());
            return Ok(SaveOutcome::NeedsConfirmation(malformed));
        }
        self.save_unchecked(fs, path, cancel)
    }

    /// 不做格式良好性检查直接保存
    pub fn save_unchecked(
        &mut self,
        fs: &dyn FileSystem,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<SaveOutcome> {
        self.prepare_for_save();
        let bytes = self.serialize()?;
        if cancel.is_cancelled() {
            return Ok(SaveOutcome::Cancelled);
        }
        match fs.write_atomic(path, &bytes, cancel) {
            Ok(()) => {}
            Err(ContainerError::Cancelled) => return Ok(SaveOutcome::Cancelled),
            Err(e) => return Err(e.into()),
        }
        info!("已保存 {} ({}字节)", path.display(), bytes.len());
        Ok(SaveOutcome::Saved)
    }

    /// 保存，需要确认时询问用户
    ///
    /// 回答"是"时修复后保存，"否"时原样保存，"取消"时不保存。
    pub fn save_interactive(
        &mut self,
        fs: &dyn FileSystem,
        path: &Path,
        prompt: &dyn UserPrompt,
        cancel: &CancelToken,
    ) -> Result<SaveOutcome> {
        let malformed = match self.save(fs, path, cancel)? {
            SaveOutcome::NeedsConfirmation(malformed) => malformed,
            outcome => return Ok(outcome),
        };

        let mut question = format!("{}个文件不是格式良好的文档:\n", malformed.len());
        for (id, error) in &malformed {
            let name = self
                .get_resource(id.as_str())
                .map(|r| r.relative_path())
                .unwrap_or(id.as_str());
            question.push_str(&format!("  {} {}\n", name, error));
        }
        question.push_str("保存前自动修复吗？");

        match prompt.ask(&question) {
            PromptAnswer::Yes => {
                self.mend_all(MendPolicy::OnSave);
                self.save_unchecked(fs, path, cancel)
            }
            PromptAnswer::No => self.save_unchecked(fs, path, cancel),
            PromptAnswer::Cancel => Ok(SaveOutcome::Cancelled),
        }
    }

    /// 序列化为EPUB数据
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        self.prepare_for_save();
        self.serialize()
    }

    /// 导航树改动过时重新生成导航文档
    fn prepare_for_save(&mut self) {
        if !self.nav_dirty {
            return;
        }
        self.write_nav();
        self.write_ncx();
        self.nav_dirty = false;
        debug!("已重新生成导航文档");
    }

    /// 用导航树重写Nav文档中的toc导航
    pub(super) fn write_nav(&mut self) {
        let Some(id) = self.nav_resource_id() else {
            return;
        };
        let paths = self.path_map();
        let href_of = |target: &ResourceId| paths.get(target).cloned();
        let Some(resource) = self.resources.get(&id) else {
            return;
        };
        let base_dir = resource.folder().to_string();

        let toc = write_toc_nav(&self.nav_tree, TOC_HEADING, &base_dir, href_of);
        let text = resource
            .text()
            .and_then(|document| replace_toc_nav(document, &toc))
            .unwrap_or_else(|| {
                warn!("Nav文档中找不到toc导航，重新生成整个文档");
                let title = self.title().unwrap_or_default();
                let language = self.package.metadata.language().unwrap_or_default();
                write_nav_document(&self.nav_tree, &title, &language, &base_dir, href_of)
            });

        if let Some(resource) = self.resources.get_mut(&id) {
            resource.set_text(text);
        }
        self.refresh_state(id.as_str());
    }

    /// 用导航树重新生成NCX
    pub(super) fn write_ncx(&mut self) {
        let Some(id) = self.ncx_resource_id() else {
            return;
        };
        let Some(base_dir) = self.resources.get(&id).map(|r| r.folder().to_string()) else {
            return;
        };
        let paths = self.path_map();
        let ncx = Ncx {
            uid: self.package.unique_identifier_value(),
            doc_title: self.title(),
            tree: self.nav_tree.clone(),
        };
        let text = ncx.to_xml(&base_dir, |target| paths.get(target).cloned());
        if let Some(resource) = self.resources.get_mut(&id) {
            resource.set_text(text);
        }
        self.refresh_state(id.as_str());
    }

    /// 写出容器
    fn serialize(&self) -> Result<Vec<u8>> {
        let mut writer = ContainerWriter::in_memory(self.save_settings.compression_level)?;
        writer.add_file(
            CONTAINER_PATH,
            Container::for_opf(&self.opf_path).to_xml().as_bytes(),
        )?;

        let forced = self.save_settings.obfuscation.method();
        let mut encrypted = Vec::new();
        let mut payloads: Vec<(&str, Cow<'_, [u8]>)> = Vec::with_capacity(self.resources.len());
        for resource in self.resources() {
            let data = match resource.text() {
                Some(text)
                    if resource.is_modified()
                        && matches!(Syntax::for_resource(resource), Some(Syntax::Html | Syntax::Xml)) =>
                {
                    Cow::Owned(coerce_declaration_to_utf8(text).into_bytes())
                }
                _ => resource.bytes(),
            };

            let method = match resource.kind() {
                ResourceKind::Font => forced.unwrap_or(resource.obfuscation()),
                _ => None,
            };
            let key = method.and_then(|method| {
                self.obfuscation_identifier(method)
                    .and_then(|identifier| method.derive_key(&identifier))
                    .map(|key| (method, key))
            });
            let data = match (method, key) {
                (_, Some((method, key))) => {
                    let mut bytes = data.into_owned();
                    method.apply(&key, &mut bytes);
                    encrypted.push((resource.relative_path().to_string(), method));
                    Cow::Owned(bytes)
                }
                (Some(method), None) => {
                    warn!("没有可用的标识符，字体{}不做{}混淆", resource.relative_path(), method);
                    data
                }
                (None, None) => data,
            };
            payloads.push((resource.relative_path(), data));
        }

        if !encrypted.is_empty() {
            writer.add_file(ENCRYPTION_PATH, write_encryption(&encrypted).as_bytes())?;
            debug!("混淆了{}个字体", encrypted.len());
        }
        writer.add_file(&self.opf_path, self.package.to_xml().as_bytes())?;

        let nav_paths: Vec<&str> = [self.nav_resource_id(), self.ncx_resource_id()]
            .into_iter()
            .flatten()
            .filter_map(|id| self.resources.get(&id).map(|r| r.relative_path()))
            .collect();
        for nav_path in nav_paths {
            if let Some((path, data)) = payloads.iter().find(|(path, _)| *path == nav_path) {
                writer.add_file(path, data)?;
            }
        }
        for (path, data) in &payloads {
            writer.add_file(path, data)?;
        }
        for entry in &self.extra_files {
            writer.add_file(&entry.path, &entry.data)?;
        }

        Ok(writer.finish_bytes()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::codec::{EPUB_MIMETYPE, MIMETYPE_PATH, ObfuscationMethod};
    use crate::epub::config::{ObfuscationSetting, QuireConfig};
    use crate::epub::fs::{FixedAnswer, MemoryFs};
    use crate::epub::testutil::{minimal_epub2, minimal_epub3};
    use std::io::{Cursor, Read};
    use std::path::PathBuf;
    use zip::{CompressionMethod, ZipArchive};

    fn load(bytes: &[u8]) -> Book {
        Book::from_bytes(bytes, &QuireConfig::default()).unwrap()
    }

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    fn read_entry(bytes: &[u8], name: &str) -> Vec<u8> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        data
    }

    #[test]
    fn test_round_trip() {
        let original = minimal_epub2().build();
        let mut book = load(&original);
        let saved = book.to_bytes().unwrap();
        let reloaded = load(&saved);

        assert_eq!(reloaded.spine(), book.spine());
        assert_eq!(reloaded.metadata().entries(), book.metadata().entries());
        assert_eq!(reloaded.nav_tree(), book.nav_tree());
        let ids = |b: &Book| b.manifest().iter().map(|e| e.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&reloaded), ids(&book));
        for resource in book.resources() {
            let other = reloaded.get_resource(resource.id().as_str()).unwrap();
            assert_eq!(other.relative_path(), resource.relative_path());
            assert_eq!(other.bytes(), resource.bytes());
        }
        // 未修改的资源原样写回
        assert_eq!(
            read_entry(&saved, "OEBPS/Text/chapter1.xhtml"),
            read_entry(&original, "OEBPS/Text/chapter1.xhtml")
        );
    }

    #[test]
    fn test_container_layout() {
        let mut book = load(&minimal_epub3().build());
        let saved = book.to_bytes().unwrap();

        let mut archive = ZipArchive::new(Cursor::new(saved.as_slice())).unwrap();
        {
            let mimetype = archive.by_index(0).unwrap();
            assert_eq!(mimetype.name(), MIMETYPE_PATH);
            assert_eq!(mimetype.compression(), CompressionMethod::Stored);
        }
        assert_eq!(read_entry(&saved, MIMETYPE_PATH), EPUB_MIMETYPE.as_bytes());

        let names = entry_names(&saved);
        assert_eq!(names[1], CONTAINER_PATH);
        assert_eq!(names[2], "OEBPS/content.opf");
        assert_eq!(names[3], "OEBPS/Text/nav.xhtml");
        assert_eq!(archive.by_name("OEBPS/content.opf").unwrap().compression(), CompressionMethod::Deflated);
    }

    #[test]
    fn test_nav_documents_regenerated() {
        let mut book = load(&minimal_epub2().build());
        book.remove("chapter1").unwrap();
        book.prune_detached();
        let saved = book.to_bytes().unwrap();

        let ncx = String::from_utf8(read_entry(&saved, "OEBPS/toc.ncx")).unwrap();
        assert!(!ncx.contains("chapter1.xhtml"));
        assert!(ncx.contains("Text/cover.xhtml"));
        assert_eq!(load(&saved).nav_tree().total_count(), 1);
    }

    #[test]
    fn test_nav_keeps_landmarks() {
        let mut book = load(&minimal_epub3().build());
        let nav = book.get_resource("nav").unwrap().text().unwrap().replace(
            "</body>",
            "<nav epub:type=\"landmarks\"><ol><li><a epub:type=\"bodymatter\" href=\"chapter1.xhtml\">正文</a></li></ol></nav>\n</body>",
        );
        book.set_text("nav", nav).unwrap();
        book.generate_toc();
        let saved = book.to_bytes().unwrap();

        let nav = String::from_utf8(read_entry(&saved, "OEBPS/Text/nav.xhtml")).unwrap();
        assert!(nav.contains("epub:type=\"landmarks\""));
        assert!(nav.contains(TOC_HEADING));
        assert!(load(&saved).get_resource("nav").unwrap().state().is_ok());
    }

    #[test]
    fn test_font_obfuscation_round_trip() {
        let font: Vec<u8> = (0..3000u32).map(|i| (i * 7 % 256) as u8).collect();
        let mut book = load(&minimal_epub2().build());
        let entry = book.add_file("a.ttf", font.clone()).unwrap();
        book.set_font_obfuscation(&entry.id, Some(ObfuscationMethod::Idpf))
            .unwrap();
        let saved = book.to_bytes().unwrap();

        assert_ne!(read_entry(&saved, "OEBPS/Fonts/a.ttf"), font);
        assert!(entry_names(&saved).contains(&ENCRYPTION_PATH.to_string()));

        let reloaded = load(&saved);
        let restored = reloaded.get_resource(&entry.id).unwrap();
        assert_eq!(restored.bytes().as_ref(), font.as_slice());
        assert_eq!(restored.obfuscation(), Some(ObfuscationMethod::Idpf));

        // 配置强制去除混淆
        let mut config = QuireConfig::default();
        config.save.obfuscation = ObfuscationSetting::None;
        let mut book = reloaded;
        book.apply_config(&config);
        let saved = book.to_bytes().unwrap();
        assert_eq!(read_entry(&saved, "OEBPS/Fonts/a.ttf"), font);
        assert!(!entry_names(&saved).contains(&ENCRYPTION_PATH.to_string()));
    }

    fn broken_book(config: &QuireConfig) -> Book {
        let bytes = minimal_epub2()
            .file("OEBPS/Text/chapter1.xhtml", "<html><body><p>Unclosed</body></html>")
            .build();
        Book::from_bytes(&bytes, config).unwrap()
    }

    #[test]
    fn test_save_needs_confirmation() {
        let fs = MemoryFs::new();
        let path = PathBuf::from("out.epub");
        let mut book = broken_book(&QuireConfig::default());

        let outcome = book.save(&fs, &path, &CancelToken::new()).unwrap();
        let SaveOutcome::NeedsConfirmation(malformed) = outcome else {
            panic!("应当需要确认");
        };
        assert_eq!(malformed[0].0.as_str(), "chapter1");
        assert!(!fs.exists(&path));

        book.mend("chapter1", MendPolicy::OnSave).unwrap();
        assert_eq!(book.save(&fs, &path, &CancelToken::new()).unwrap(), SaveOutcome::Saved);
        assert!(fs.exists(&path));
    }

    #[test]
    fn test_auto_mend_on_save() {
        let mut config = QuireConfig::default();
        config.wellformed.auto_mend_on_save = true;
        let fs = MemoryFs::new();
        let path = PathBuf::from("out.epub");
        let mut book = broken_book(&config);

        assert_eq!(book.save(&fs, &path, &CancelToken::new()).unwrap(), SaveOutcome::Saved);
        let reloaded = load(&fs.get(&path).unwrap());
        assert!(reloaded.get_resource("chapter1").unwrap().state().is_ok());
    }

    #[test]
    fn test_save_interactive() {
        let path = PathBuf::from("out.epub");

        let fs = MemoryFs::new();
        let mut book = broken_book(&QuireConfig::default());
        let outcome = book
            .save_interactive(&fs, &path, &FixedAnswer(PromptAnswer::Cancel), &CancelToken::new())
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Cancelled);
        assert!(!fs.exists(&path));

        let outcome = book
            .save_interactive(&fs, &path, &FixedAnswer(PromptAnswer::No), &CancelToken::new())
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Saved);
        assert!(load(&fs.get(&path).unwrap()).get_resource("chapter1").unwrap().state().error().is_some());

        let outcome = book
            .save_interactive(&fs, &path, &FixedAnswer(PromptAnswer::Yes), &CancelToken::new())
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Saved);
        assert!(load(&fs.get(&path).unwrap()).get_resource("chapter1").unwrap().state().is_ok());
    }

    #[test]
    fn test_cancelled_save_leaves_target() {
        let fs = MemoryFs::new();
        let path = PathBuf::from("out.epub");
        fs.insert(&path, b"old".to_vec());
        let mut book = load(&minimal_epub2().build());

        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(book.save(&fs, &path, &cancel).unwrap(), SaveOutcome::Cancelled);
        assert_eq!(fs.get(&path).unwrap(), b"old");
    }

    #[test]
    fn test_detached_entries_survive_save() {
        for fixture in [minimal_epub2(), minimal_epub3()] {
            let mut book = load(&fixture.build());
            book.remove("chapter1").unwrap();
            assert_eq!(book.detached_entries().len(), 1);

            let reloaded = load(&book.to_bytes().unwrap());
            let detached = reloaded.detached_entries();
            assert_eq!(detached.len(), 1);
            assert_eq!(detached[0].title, "第一章");
            assert_eq!(detached[0].target, None);
            assert!(
                reloaded
                    .validate_nav_targets()
                    .iter()
                    .any(|warning| warning.title == "第一章")
            );
        }
    }
}
