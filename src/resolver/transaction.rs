//! 单次解析的临时状态
//!
//! 每次 `resolve` / `register_dynamic_import` 调用创建一个 [`Transaction`]，
//! 解析过程中所有的暂定选择都记录在这里，只有提交时才写回包索引。
//! 失败时直接丢弃事务即可，包索引保持原样。

use std::collections::{BTreeMap, BTreeSet};

use super::edge::{ExportKey, GenerationId, ImportKey, RequireKey};

/// 解析事务
#[derive(Debug, Clone, Default)]
pub(crate) struct Transaction {
    /// 包名 -> 本次解析选中的提供者
    pub provider: BTreeMap<String, ExportKey>,
    /// 因 uses 冲突被排除的导出，回滚嵌套解析时仍然保留
    pub blacklist: BTreeSet<ExportKey>,
    /// 本次解析中被视为已解析的代（按加入顺序）
    pub resolved: Vec<GenerationId>,
    /// 暂定的导入绑定
    pub pinned: BTreeMap<ImportKey, ExportKey>,
    /// 暂定的 bundle 依赖绑定
    pub required: BTreeMap<RequireKey, GenerationId>,
    /// 暂定附加的片段 -> 宿主
    pub attached: BTreeMap<GenerationId, GenerationId>,
    /// 当前嵌套解析深度
    pub depth: usize,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_resolved(&self, generation: GenerationId) -> bool {
        self.resolved.contains(&generation)
    }

    pub fn mark_resolved(&mut self, generation: GenerationId) {
        if !self.resolved.contains(&generation) {
            self.resolved.push(generation);
        }
    }

    /// 导入在本事务中的暂定绑定
    pub fn pinned_provider(&self, import: ImportKey) -> Option<ExportKey> {
        self.pinned.get(&import).copied()
    }

    /// 恢复到快照，但保留快照之后新增的黑名单
    pub fn restore(&mut self, snapshot: Transaction) {
        let blacklist = std::mem::take(&mut self.blacklist);
        *self = snapshot;
        self.blacklist.extend(blacklist);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export(bundle: u64) -> ExportKey {
        ExportKey {
            owner: GenerationId::new(bundle, 0),
            index: 0,
        }
    }

    #[test]
    fn test_restore_keeps_blacklist() {
        let mut tx = Transaction::new();
        tx.provider.insert("pkg.a".into(), export(1));
        let snapshot = tx.clone();

        tx.provider.insert("pkg.b".into(), export(2));
        tx.mark_resolved(GenerationId::new(2, 0));
        tx.blacklist.insert(export(3));

        tx.restore(snapshot);
        assert_eq!(tx.provider.len(), 1);
        assert!(tx.resolved.is_empty());
        assert!(tx.blacklist.contains(&export(3)));
    }

    #[test]
    fn test_mark_resolved_once() {
        let mut tx = Transaction::new();
        let gen = GenerationId::new(1, 0);
        tx.mark_resolved(gen);
        tx.mark_resolved(gen);
        assert_eq!(tx.resolved, vec![gen]);
        assert!(tx.is_resolved(gen));
    }
}
