//! 资源模块
//!
//! 包含资源对象、资源种类以及资源ID/文件名注册表。

mod file;
mod kind;
mod registry;

pub use file::{Content, Resource, ResourceId, WellFormedState};
pub use kind::{
    MEDIA_TYPE_CSS, MEDIA_TYPE_NCX, MEDIA_TYPE_OPF, MEDIA_TYPE_SVG, MEDIA_TYPE_XHTML,
    ResourceKind, is_text_media_type, is_xml_media_type, media_type_for_path,
};
pub use registry::{FORBIDDEN_FILENAME_CHARS, IdRegistry, check_filename_chars, sanitize_id};
