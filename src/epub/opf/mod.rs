//! OPF（Open Packaging Format）文件处理模块
//!
//! 此模块提供EPUB文件中OPF包文件的解析与生成，包括元数据、清单、脊柱和guide。

mod guide;
mod manifest;
mod metadata;
mod package;
mod parser;
mod spine;
mod writer;

pub use guide::GuideReference;
pub use manifest::ManifestEntry;
pub use metadata::{Metadata, MetadataEntry, local_name};
pub use package::{DEFAULT_UNIQUE_IDENTIFIER, Package};
pub use spine::{Spine, SpineItem};
