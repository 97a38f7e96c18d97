//! 单元测试用的EPUB样本

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::epub::codec::{EPUB_MIMETYPE, MIMETYPE_PATH};
use crate::epub::container::CONTAINER_PATH;

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
    <rootfiles>
        <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
    </rootfiles>
</container>
"#;

pub const OPF_EPUB2: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="BookId" version="2.0">
    <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
        <dc:identifier id="BookId" opf:scheme="UUID">urn:uuid:8c2d4c1e-6f3a-4b8e-9d1a-2f5e7a9b3c40</dc:identifier>
        <dc:title>测试书籍</dc:title>
        <dc:language>zh</dc:language>
        <dc:creator opf:role="aut">佚名</dc:creator>
    </metadata>
    <manifest>
        <item id="cover" href="Text/cover.xhtml" media-type="application/xhtml+xml"/>
        <item id="chapter1" href="Text/chapter1.xhtml" media-type="application/xhtml+xml"/>
        <item id="style" href="Styles/style.css" media-type="text/css"/>
        <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    </manifest>
    <spine toc="ncx">
        <itemref idref="cover"/>
        <itemref idref="chapter1"/>
    </spine>
</package>
"#;

pub const OPF_EPUB3: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="BookId" version="3.0">
    <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
        <dc:identifier id="BookId">urn:uuid:3f1b6e2a-9c4d-4e7f-8a2b-5d6c7e8f9a01</dc:identifier>
        <dc:title>测试书籍</dc:title>
        <dc:language>zh</dc:language>
        <meta property="dcterms:modified">2024-01-01T00:00:00Z</meta>
    </metadata>
    <manifest>
        <item id="nav" href="Text/nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
        <item id="cover" href="Text/cover.xhtml" media-type="application/xhtml+xml"/>
        <item id="chapter1" href="Text/chapter1.xhtml" media-type="application/xhtml+xml"/>
        <item id="style" href="Styles/style.css" media-type="text/css"/>
    </manifest>
    <spine>
        <itemref idref="cover"/>
        <itemref idref="chapter1"/>
    </spine>
</package>
"#;

const NCX: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
    <head>
        <meta name="dtb:uid" content="urn:uuid:8c2d4c1e-6f3a-4b8e-9d1a-2f5e7a9b3c40"/>
        <meta name="dtb:depth" content="1"/>
    </head>
    <docTitle><text>测试书籍</text></docTitle>
    <navMap>
        <navPoint id="navPoint-1" playOrder="1">
            <navLabel><text>封面</text></navLabel>
            <content src="Text/cover.xhtml"/>
        </navPoint>
        <navPoint id="navPoint-2" playOrder="2">
            <navLabel><text>第一章</text></navLabel>
            <content src="Text/chapter1.xhtml"/>
        </navPoint>
    </navMap>
</ncx>
"#;

const NAV: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="zh" xml:lang="zh">
<head>
<title>测试书籍</title>
</head>
<body>
<nav epub:type="toc" id="toc">
<h1>目录</h1>
<ol>
<li><a href="chapter1.xhtml">第一章</a></li>
</ol>
</nav>
</body>
</html>
"#;

const COVER: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
<title>封面</title>
</head>
<body>
<p class="cover">测试书籍</p>
</body>
</html>
"#;

const CHAPTER1: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
<title>正文</title>
<link href="../Styles/style.css" rel="stylesheet" type="text/css"/>
</head>
<body>
<h1 id="c1">第一章</h1>
<p>天地玄黄，宇宙洪荒。</p>
<h2 id="c1s1">第一节</h2>
<p>日月盈昃，辰宿列张。</p>
</body>
</html>
"#;

const STYLE: &str = "body { margin: 0; }\np { text-indent: 2em; }\n";

/// 内存中组装ZIP，mimetype总是第一个且不压缩
#[derive(Debug, Clone, Default)]
pub struct ZipFixture {
    entries: Vec<(String, Vec<u8>)>,
}

impl ZipFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(self, path: &str, content: &str) -> Self {
        self.binary(path, content.as_bytes().to_vec())
    }

    /// 同名条目原位替换
    pub fn binary(mut self, path: &str, data: Vec<u8>) -> Self {
        match self.entries.iter_mut().find(|(name, _)| name == path) {
            Some(entry) => entry.1 = data,
            None => self.entries.push((path.to_string(), data)),
        }
        self
    }

    pub fn without(mut self, path: &str) -> Self {
        self.entries.retain(|(name, _)| name != path);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mimetype = self.entries.iter().filter(|(name, _)| name == MIMETYPE_PATH);
        let rest = self.entries.iter().filter(|(name, _)| name != MIMETYPE_PATH);
        for (name, data) in mimetype {
            zip.start_file(name.as_str(), stored).unwrap();
            zip.write_all(data).unwrap();
        }
        for (name, data) in rest {
            zip.start_file(name.as_str(), deflated).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }
}

fn common() -> ZipFixture {
    ZipFixture::new()
        .file(MIMETYPE_PATH, EPUB_MIMETYPE)
        .file(CONTAINER_PATH, CONTAINER_XML)
        .file("OEBPS/Text/cover.xhtml", COVER)
        .file("OEBPS/Text/chapter1.xhtml", CHAPTER1)
        .file("OEBPS/Styles/style.css", STYLE)
}

/// 封面、一章正文、样式表和NCX
pub fn minimal_epub2() -> ZipFixture {
    common()
        .file("OEBPS/content.opf", OPF_EPUB2)
        .file("OEBPS/toc.ncx", NCX)
}

/// 与EPUB2样本内容相同，导航改用Nav文档
pub fn minimal_epub3() -> ZipFixture {
    common()
        .file("OEBPS/content.opf", OPF_EPUB3)
        .file("OEBPS/Text/nav.xhtml", NAV)
}
