//! 格式良好性检查与修复

mod checker;
mod mender;
mod xhtml;

pub use checker::{Syntax, WellFormedResult, check, check_css, check_xml};
pub use mender::{MendOutcome, MendPolicy, mend};
pub use xhtml::{expand_self_closing, html_to_xhtml, parse_html};
