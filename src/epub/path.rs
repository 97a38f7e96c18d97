//! 容器内路径工具
//!
//! 容器内路径一律使用`/`分隔，不以`/`开头。清单中的href相对于OPF所在目录，
//! 且经过URL编码。

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// href中需要编码的字符
const HREF_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// 获取路径所在目录（不含结尾的`/`）
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[..pos],
        None => "",
    }
}

/// 获取路径中的文件名部分
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// 拆分文件名为(主干, 扩展名)，扩展名不含点
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(pos) => (&name[..pos], Some(&name[pos + 1..])),
    }
}

/// 拼接目录与文件名
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// 拆分href中的片段标识
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.find('#') {
        Some(pos) => (&href[..pos], Some(&href[pos + 1..])),
        None => (href, None),
    }
}

/// 对路径进行URL编码
pub fn encode_href(path: &str) -> String {
    utf8_percent_encode(path, HREF_ENCODE_SET).to_string()
}

/// URL解码
pub fn decode_href(href: &str) -> String {
    percent_decode_str(href).decode_utf8_lossy().into_owned()
}

/// 检查href是否指向外部资源
pub fn is_external(href: &str) -> bool {
    let lower = href.trim_start().to_ascii_lowercase();
    ["http:", "https:", "mailto:", "ftp:", "data:", "javascript:", "tel:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

/// 规范化路径，处理`.`和`..`段
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// 将相对href解析为容器内路径（丢弃片段标识）
///
/// # 参数
/// * `base_dir` - 引用方所在目录
/// * `href` - 原始href（可能经过URL编码）
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    let (path, _) = split_fragment(href);
    let decoded = decode_href(path);
    if let Some(absolute) = decoded.strip_prefix('/') {
        return normalize(absolute);
    }
    normalize(&join(base_dir, &decoded))
}

/// 计算从目录`from_dir`到容器路径`to_path`的相对路径（未编码）
pub fn relative_path(from_dir: &str, to_path: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let to: Vec<&str> = to_path.split('/').filter(|s| !s.is_empty()).collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();
    // 目标文件名本身不能作为公共前缀
    let common = common.min(to.len().saturating_sub(1));

    let mut parts: Vec<&str> = Vec::new();
    for _ in common..from.len() {
        parts.push("..");
    }
    parts.extend_from_slice(&to[common..]);
    parts.join("/")
}

/// 计算相对href（已编码）
pub fn relative_href(from_dir: &str, to_path: &str) -> String {
    encode_href(&relative_path(from_dir, to_path))
}
