//! 包注册表条目

use super::edge::{ExportKey, ImportKey};

/// 一个包名在全局索引中的条目
///
/// `providers` 是当前被选中的提供者，按版本从高到低排列，由
/// [`super::Packages`] 维护排序。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pkg {
    pub name: String,
    /// 所有 bundle 中导出此包的条目
    pub exporters: Vec<ExportKey>,
    /// 所有 bundle 中导入此包的条目
    pub importers: Vec<ImportKey>,
    /// 当前被选中的提供者
    pub providers: Vec<ExportKey>,
}

impl Pkg {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub(crate) fn add_exporter(&mut self, key: ExportKey) {
        if !self.exporters.contains(&key) {
            self.exporters.push(key);
        }
    }

    pub(crate) fn remove_exporter(&mut self, key: ExportKey) {
        self.exporters.retain(|k| *k != key);
        self.providers.retain(|k| *k != key);
    }

    pub(crate) fn add_importer(&mut self, key: ImportKey) {
        if !self.importers.contains(&key) {
            self.importers.push(key);
        }
    }

    pub(crate) fn remove_importer(&mut self, key: ImportKey) {
        self.importers.retain(|k| *k != key);
    }

    pub fn is_provider(&self, key: ExportKey) -> bool {
        self.providers.contains(&key)
    }

    /// 没有任何导出与导入时可以从索引中移除
    pub fn is_empty(&self) -> bool {
        self.exporters.is_empty() && self.importers.is_empty()
    }
}
