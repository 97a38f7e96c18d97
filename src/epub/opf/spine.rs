//! 脊柱模块
//!
//! 提供EPUB包中阅读顺序（脊柱）的结构定义。阅读顺序只能通过`reorder`整体改变。

use std::collections::HashSet;

use crate::epub::error::SpineError;

/// 脊柱项信息(阅读顺序)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    /// 引用的清单项ID
    pub idref: String,
    /// 是否线性阅读
    pub linear: bool,
    /// 属性（如page-spread-left）
    pub properties: Vec<String>,
}

impl SpineItem {
    /// 创建新的脊柱项
    pub fn new(idref: impl Into<String>) -> Self {
        Self {
            idref: idref.into(),
            linear: true,
            properties: Vec::new(),
        }
    }

    /// 创建指定线性属性的脊柱项
    pub fn with_linear(idref: impl Into<String>, linear: bool) -> Self {
        Self {
            linear,
            ..Self::new(idref)
        }
    }
}

/// 脊柱
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Spine {
    /// 脊柱项
    pub items: Vec<SpineItem>,
    /// NCX的清单ID
    pub toc: Option<String>,
    /// 翻页方向
    pub page_progression_direction: Option<String>,
}

impl Spine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 按顺序返回全部idref
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.idref.as_str()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.idref == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.idref == id)
    }

    pub fn get(&self, id: &str) -> Option<&SpineItem> {
        self.items.iter().find(|item| item.idref == id)
    }

    /// 在指定位置插入，位置为None或越界时追加到末尾
    pub fn insert(&mut self, position: Option<usize>, item: SpineItem) {
        match position {
            Some(index) if index <= self.items.len() => self.items.insert(index, item),
            _ => self.items.push(item),
        }
    }

    /// 移除指定ID的所有脊柱项，返回是否有移除
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.idref != id);
        before != self.items.len()
    }

    /// 设置线性属性，返回该ID是否在脊柱中
    pub fn set_linear(&mut self, id: &str, linear: bool) -> bool {
        match self.items.iter_mut().find(|item| item.idref == id) {
            Some(item) => {
                item.linear = linear;
                true
            }
            None => false,
        }
    }

    /// 整体重排
    ///
    /// `is_html`判断ID是否为当前清单中的HTML文档。新顺序可以包含尚不在
    /// 脊柱中的HTML文档，但必须包含当前的全部脊柱项。校验失败时脊柱不变。
    pub fn reorder<F>(&mut self, new_order: &[&str], is_html: F) -> Result<(), SpineError>
    where
        F: Fn(&str) -> bool,
    {
        let mut seen = HashSet::new();
        for id in new_order {
            if !is_html(id) {
                return Err(SpineError::UnknownResource(id.to_string()));
            }
            if !seen.insert(*id) {
                return Err(SpineError::DuplicateEntry(id.to_string()));
            }
        }
        if let Some(missing) = self.items.iter().find(|item| !seen.contains(item.idref.as_str())) {
            return Err(SpineError::IncompleteReorder(missing.idref.clone()));
        }

        let items = new_order
            .iter()
            .map(|id| self.get(id).cloned().unwrap_or_else(|| SpineItem::new(*id)))
            .collect();
        self.items = items;
        Ok(())
    }
}
