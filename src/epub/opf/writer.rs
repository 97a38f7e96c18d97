//! OPF生成

use crate::epub::opf::package::Package;
use crate::epub::xml::{escape, write_attributes};

const OPF_NAMESPACE: &str = "http://www.idpf.org/2007/opf";
const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";

impl Package {
    /// 生成OPF文档
    pub fn to_xml(&self) -> String {
        let mut opf = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

        opf.push_str(&format!("<package xmlns=\"{}\" version=\"{}\"", OPF_NAMESPACE, escape(&self.version)));
        if let Some(uid) = &self.unique_identifier {
            opf.push_str(&format!(" unique-identifier=\"{}\"", escape(uid)));
        }
        opf.push_str(&write_attributes(&self.attributes));
        opf.push_str(">\n");

        self.write_metadata(&mut opf);
        self.write_manifest(&mut opf);
        self.write_spine(&mut opf);
        self.write_guide(&mut opf);

        opf.push_str("</package>\n");
        opf
    }

    fn write_metadata(&self, opf: &mut String) {
        let mut attributes = self.metadata.element_attributes().to_vec();
        if !attributes.iter().any(|(k, _)| k == "xmlns:dc") {
            attributes.push(("xmlns:dc".to_string(), DC_NAMESPACE.to_string()));
        }
        if self.metadata.uses_opf_prefix() && !attributes.iter().any(|(k, _)| k == "xmlns:opf") {
            attributes.push(("xmlns:opf".to_string(), OPF_NAMESPACE.to_string()));
        }

        opf.push_str(&format!("  <metadata{}>\n", write_attributes(&attributes)));
        for entry in self.metadata.entries() {
            if entry.value.is_empty() {
                opf.push_str(&format!(
                    "    <{}{}/>\n",
                    entry.name,
                    write_attributes(&entry.attributes)
                ));
            } else {
                opf.push_str(&format!(
                    "    <{}{}>{}</{}>\n",
                    entry.name,
                    write_attributes(&entry.attributes),
                    escape(&entry.value),
                    entry.name
                ));
            }
        }
        opf.push_str("  </metadata>\n");
    }

    fn write_manifest(&self, opf: &mut String) {
        opf.push_str("  <manifest>\n");
        for entry in &self.manifest {
            opf.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"",
                escape(&entry.id),
                escape(&entry.href),
                escape(&entry.media_type)
            ));
            // EPUB2的item没有properties属性
            if !entry.properties.is_empty() && self.epub_version() >= 3 {
                opf.push_str(&format!(" properties=\"{}\"", escape(&entry.properties.join(" "))));
            }
            if let Some(fallback) = &entry.fallback {
                opf.push_str(&format!(" fallback=\"{}\"", escape(fallback)));
            }
            if let Some(overlay) = &entry.media_overlay {
                opf.push_str(&format!(" media-overlay=\"{}\"", escape(overlay)));
            }
            opf.push_str("/>\n");
        }
        opf.push_str("  </manifest>\n");
    }

    fn write_spine(&self, opf: &mut String) {
        opf.push_str("  <spine");
        if let Some(toc) = &self.spine.toc {
            opf.push_str(&format!(" toc=\"{}\"", escape(toc)));
        }
        if let Some(direction) = &self.spine.page_progression_direction {
            opf.push_str(&format!(" page-progression-direction=\"{}\"", escape(direction)));
        }
        opf.push_str(">\n");
        for item in &self.spine.items {
            opf.push_str(&format!("    <itemref idref=\"{}\"", escape(&item.idref)));
            if !item.linear {
                opf.push_str(" linear=\"no\"");
            }
            if !item.properties.is_empty() {
                opf.push_str(&format!(" properties=\"{}\"", escape(&item.properties.join(" "))));
            }
            opf.push_str("/>\n");
        }
        opf.push_str("  </spine>\n");
    }

    fn write_guide(&self, opf: &mut String) {
        if self.guide.is_empty() {
            return;
        }
        opf.push_str("  <guide>\n");
        for reference in &self.guide {
            opf.push_str(&format!("    <reference type=\"{}\"", escape(&reference.kind)));
            if let Some(title) = &reference.title {
                opf.push_str(&format!(" title=\"{}\"", escape(title)));
            }
            opf.push_str(&format!(" href=\"{}\"/>\n", escape(&reference.href)));
        }
        opf.push_str("  </guide>\n");
    }
}
