use crate::epub::error::{EpubError, Result};
use crate::epub::resource::MEDIA_TYPE_OPF;
use crate::epub::xml::{self, escape};
use quick_xml::events::Event;
use quick_xml::reader::Reader;

/// container.xml在容器中的路径
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Container.xml中的rootfile信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootFile {
    pub full_path: String,
    pub media_type: String,
}

/// Container.xml的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub rootfiles: Vec<RootFile>,
}

impl Container {
    /// 只包含一个OPF的container
    pub fn for_opf(opf_path: &str) -> Self {
        Self {
            rootfiles: vec![RootFile {
                full_path: opf_path.to_string(),
                media_type: MEDIA_TYPE_OPF.to_string(),
            }],
        }
    }

    /// 解析container.xml内容
    ///
    /// # 参数
    /// * `xml_content` - container.xml的文件内容
    ///
    /// # 返回值
    /// * `Result<Container, EpubError>` - 解析后的Container信息
    pub fn parse_xml(xml_content: &str) -> Result<Container> {
        let mut reader = Reader::from_str(xml_content);
        reader.config_mut().trim_text(true);
        reader.config_mut().expand_empty_elements = true;

        let mut rootfiles = Vec::new();
        let mut buf = Vec::new();
        let mut in_rootfiles = false;

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"rootfiles" => in_rootfiles = true,
                    b"rootfile" if in_rootfiles => {
                        let full_path = xml::attribute(e, b"full-path")?.unwrap_or_default();
                        // 缺少media-type的rootfile按OPF处理
                        let media_type = xml::attribute(e, b"media-type")?
                            .unwrap_or_else(|| MEDIA_TYPE_OPF.to_string());

                        if !full_path.trim().is_empty() {
                            rootfiles.push(RootFile {
                                full_path: full_path.trim().trim_start_matches('/').to_string(),
                                media_type,
                            });
                        }
                    }
                    _ => {}
                },
                Event::End(ref e) => {
                    if e.local_name().as_ref() == b"rootfiles" {
                        in_rootfiles = false;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if rootfiles.is_empty() {
            return Err(EpubError::ContainerParseError(
                "没有找到任何rootfile条目".to_string(),
            ));
        }

        Ok(Container { rootfiles })
    }

    /// 获取主要的OPF文件路径
    ///
    /// # 返回值
    /// * `Option<&str>` - OPF文件的完整路径
    pub fn opf_path(&self) -> Option<&str> {
        self.rootfiles
            .iter()
            .find(|rf| rf.media_type == MEDIA_TYPE_OPF)
            .or_else(|| self.rootfiles.first())
            .map(|rf| rf.full_path.as_str())
    }

    /// 生成container.xml
    pub fn to_xml(&self) -> String {
        let mut out = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n\
             \x20 <rootfiles>\n",
        );
        for rootfile in &self.rootfiles {
            out.push_str(&format!(
                "    <rootfile full-path=\"{}\" media-type=\"{}\"/>\n",
                escape(&rootfile.full_path),
                escape(&rootfile.media_type)
            ));
        }
        out.push_str("  </rootfiles>\n</container>\n");
        out
    }
}
