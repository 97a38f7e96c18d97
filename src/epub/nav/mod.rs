//! 导航模块
//!
//! NCX与Nav文档的解析、生成，目录生成与重新编号，以及导航树的显示。

mod display;
mod generate;
mod nav_doc;
mod navigation;
mod ncx;

pub use display::{TreeStyle, TreeView};
pub use generate::{
    HEADING_ID_PREFIX, Heading, HeadingSelection, assign_heading_ids, collect_headings, generate,
    renumber,
};
pub use nav_doc::{parse_nav, replace_toc_nav, write_nav_document, write_toc_nav};
pub use navigation::{NavEntry, NavTarget, NavTree};
pub use ncx::Ncx;
