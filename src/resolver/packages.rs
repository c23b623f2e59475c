//! 包依赖图与解析算法
//!
//! [`Packages`] 维护包名到导出方、导入方与当前提供者的全局索引，并负责把
//! 一个 bundle 的导入与 bundle 依赖解析成一组一致的提供者。
//!
//! # 解析过程
//!
//! 1. 单例检查：同名单例 bundle 已解析（或在本次解析中）时直接失败
//! 2. 先解析 `Require-Bundle`：优先本次解析中的 bundle，其次已解析的 bundle
//!    （校验其导出的 uses 一致性），最后尝试递归解析处于 INSTALLED 的候选
//! 3. 逐个解析导入：复用本次解析中同名包的提供者；否则按版本从高到低扫描导出方，
//!    跳过黑名单与已卸载的僵尸导出，校验版本与属性后做 uses 检查，冲突的导出
//!    被加入黑名单；仍无结果时尝试递归解析提供该包的 INSTALLED bundle
//! 4. 有必需依赖无法满足时整体失败并丢弃事务；否则一次性提交
//!
//! 解析只在 `&self` 上进行，全部暂定状态保存在 [`Transaction`] 中，
//! 只有提交时才修改索引，因此失败的解析不会改变任何状态。

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, info, trace};

use super::bundle_packages::BundlePackages;
use super::edge::{
    BundleId, ExportKey, ExportedPackage, GenerationId, ImportKey, ImportedPackage, RequireEdge,
    RequireKey, SYSTEM_BUNDLE_ID,
};
use super::pkg::Pkg;
use super::transaction::Transaction;
use crate::bundle::version::VersionRange;
use crate::utils::FrameworkError;

/// 默认的嵌套解析深度上限
pub const DEFAULT_MAX_RESOLVE_DEPTH: usize = 32;

const MISSING_PACKAGES: &str = "缺少包或无法全部解析";
const MISSING_BUNDLES: &str = "无法解析依赖的 bundle 或宿主";

/// 解析失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ResolveFailure {
    pub bundle: BundleId,
    pub reason: String,
}

impl From<ResolveFailure> for FrameworkError {
    fn from(failure: ResolveFailure) -> Self {
        FrameworkError::ResolutionFailed {
            bundle: failure.bundle,
            reason: failure.reason,
        }
    }
}

/// 一次成功解析的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// 本次新解析的代（按解析顺序）
    pub resolved: Vec<GenerationId>,
    /// 本次附加的片段 -> 宿主
    pub attached: Vec<(GenerationId, GenerationId)>,
}

impl ResolveReport {
    /// 本次新解析的 bundle
    pub fn bundles(&self) -> Vec<BundleId> {
        let mut bundles = Vec::new();
        for generation in &self.resolved {
            if !bundles.contains(&generation.bundle) {
                bundles.push(generation.bundle);
            }
        }
        bundles
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// 依赖图快照，用于比较解析前后的状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphSnapshot {
    pub packages: BTreeMap<String, Pkg>,
    pub pins: BTreeMap<ImportKey, Option<ExportKey>>,
    pub requires: BTreeMap<RequireKey, Option<GenerationId>>,
    pub resolved: BTreeSet<GenerationId>,
    pub attachments: BTreeMap<GenerationId, GenerationId>,
    pub zombies: BTreeSet<GenerationId>,
}

/// 包依赖图
#[derive(Debug)]
pub struct Packages {
    /// 包名 -> 索引条目
    packages: BTreeMap<String, Pkg>,
    /// 所有已注册的代
    units: BTreeMap<GenerationId, BundlePackages>,
    /// bundle -> 当前代
    current: BTreeMap<BundleId, GenerationId>,
    /// 已卸载的 bundle
    uninstalled: BTreeSet<BundleId>,
    max_depth: usize,
}

impl Default for Packages {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESOLVE_DEPTH)
    }
}

impl Packages {
    pub fn new(max_depth: usize) -> Self {
        Self {
            packages: BTreeMap::new(),
            units: BTreeMap::new(),
            current: BTreeMap::new(),
            uninstalled: BTreeSet::new(),
            max_depth,
        }
    }

    // ==================== 注册 ====================

    /// 注册一代 bundle 的依赖边
    ///
    /// 同一代重复注册返回 `false`，不会产生任何解析副作用。
    pub fn register_unit(&mut self, unit: BundlePackages) -> bool {
        let generation = unit.id;
        if self.units.contains_key(&generation) {
            return false;
        }

        let newer = self
            .current
            .get(&generation.bundle)
            .map(|g| g.generation <= generation.generation)
            .unwrap_or(true);
        if newer {
            self.current.insert(generation.bundle, generation);
        }

        for (index, export) in unit.exports.iter().enumerate() {
            self.packages
                .entry(export.name.clone())
                .or_insert_with(|| Pkg::new(export.name.clone()))
                .add_exporter(ExportKey {
                    owner: generation,
                    index,
                });
        }
        for (index, import) in unit.imports.iter().enumerate() {
            self.packages
                .entry(import.name.clone())
                .or_insert_with(|| Pkg::new(import.name.clone()))
                .add_importer(ImportKey {
                    owner: generation,
                    index,
                });
        }

        debug!(
            generation = %generation,
            exports = unit.exports.len(),
            imports = unit.imports.len(),
            requires = unit.requires.len(),
            "注册依赖集合"
        );
        self.units.insert(generation, unit);
        true
    }

    /// 注销一代 bundle 的依赖边
    ///
    /// 仍被其他 bundle 使用的导出在 `force` 为 `false` 时不会被移除，而是标记为
    /// 僵尸并返回 `false`；此时导入保持不变。只有全部导出都被移除后才移除导入，
    /// 并把这一代从索引中删除。`force` 为 `true` 时同时解除其他 bundle 对它的绑定。
    pub fn unregister_unit(&mut self, generation: GenerationId, force: bool) -> bool {
        let Some(unit) = self.units.get(&generation) else {
            return true;
        };

        let required = !force && self.is_required_by_others(generation);
        let mut in_use = Vec::new();
        let mut removable = Vec::new();
        for (index, export) in unit.exports.iter().enumerate() {
            let key = ExportKey {
                owner: generation,
                index,
            };
            if !force && (required || self.is_export_in_use(key)) {
                in_use.push(index);
            } else {
                removable.push((key, export.name.clone()));
            }
        }

        for (key, name) in &removable {
            if let Some(pkg) = self.packages.get_mut(name) {
                pkg.remove_exporter(*key);
            }
        }

        if !in_use.is_empty() || (required && removable.is_empty()) {
            if let Some(unit) = self.units.get_mut(&generation) {
                unit.zombie = true;
                for index in in_use {
                    unit.exports[index].zombie = true;
                }
            }
            debug!(generation = %generation, "导出仍被使用，保留为僵尸代");
            return false;
        }

        if force {
            self.unpin_consumers_of(generation);
        }

        let Some(unit) = self.units.remove(&generation) else {
            return true;
        };
        for (index, import) in unit.imports.iter().enumerate() {
            if let Some(pkg) = self.packages.get_mut(&import.name) {
                pkg.remove_importer(ImportKey {
                    owner: generation,
                    index,
                });
            }
        }
        if let Some(host) = unit.host {
            if let Some(host) = self.units.get_mut(&host) {
                host.fragments.retain(|f| *f != generation);
            }
        }
        for fragment in &unit.fragments {
            self.reset_unit(*fragment);
        }
        self.packages.retain(|_, pkg| !pkg.is_empty());
        if self.current.get(&generation.bundle) == Some(&generation) {
            self.current.remove(&generation.bundle);
        }
        if !self.has_units(generation.bundle) {
            self.uninstalled.remove(&generation.bundle);
        }

        debug!(generation = %generation, "依赖集合已注销");
        true
    }

    /// 标记 bundle 已卸载，其导出（包括僵尸导出）不再作为候选
    ///
    /// 最后一代被注销后标记随之清除。
    pub fn mark_uninstalled(&mut self, bundle: BundleId) {
        if self.has_units(bundle) {
            self.uninstalled.insert(bundle);
        }
    }

    fn has_units(&self, bundle: BundleId) -> bool {
        self.units
            .range(GenerationId::new(bundle, 0)..=GenerationId::new(bundle, u32::MAX))
            .next()
            .is_some()
    }

    pub fn is_uninstalled(&self, bundle: BundleId) -> bool {
        self.uninstalled.contains(&bundle)
    }

    /// 注销所有不再被使用的僵尸代，返回被移除的代
    pub fn collect_unused_zombies(&mut self) -> Vec<GenerationId> {
        let mut removed = Vec::new();
        loop {
            let zombies: Vec<GenerationId> = self
                .units
                .values()
                .filter(|u| u.zombie)
                .map(|u| u.id)
                .collect();

            let mut progressed = false;
            for generation in zombies {
                if self.unregister_unit(generation, false) {
                    removed.push(generation);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        removed
    }

    // ==================== 查询 ====================

    /// 某个包当前版本最高的提供者
    pub fn provider(&self, package: &str) -> Option<ExportKey> {
        self.packages
            .get(package)
            .and_then(|pkg| pkg.providers.first().copied())
    }

    pub fn package(&self, name: &str) -> Option<&Pkg> {
        self.packages.get(name)
    }

    pub fn unit(&self, generation: GenerationId) -> Option<&BundlePackages> {
        self.units.get(&generation)
    }

    pub fn export(&self, key: ExportKey) -> Option<&ExportedPackage> {
        self.units.get(&key.owner)?.exports.get(key.index)
    }

    pub fn import(&self, key: ImportKey) -> Option<&ImportedPackage> {
        self.units.get(&key.owner)?.imports.get(key.index)
    }

    /// bundle 的当前代
    pub fn current_generation(&self, bundle: BundleId) -> Option<GenerationId> {
        self.current.get(&bundle).copied()
    }

    /// 是否为所属 bundle 的当前代
    pub fn is_current(&self, generation: GenerationId) -> bool {
        self.current.get(&generation.bundle) == Some(&generation)
    }

    pub fn current_unit(&self, bundle: BundleId) -> Option<&BundlePackages> {
        self.current_generation(bundle)
            .and_then(|generation| self.units.get(&generation))
    }

    /// bundle 的当前代是否已解析
    pub fn is_resolved(&self, bundle: BundleId) -> bool {
        self.current_unit(bundle)
            .map(BundlePackages::is_resolved)
            .unwrap_or(false)
    }

    /// 片段使用宿主的类加载器
    pub fn loader_of(&self, generation: GenerationId) -> GenerationId {
        self.units
            .get(&generation)
            .and_then(BundlePackages::host)
            .unwrap_or(generation)
    }

    /// bundle 当前代的导出
    pub fn exported_packages(&self, bundle: BundleId) -> Vec<ExportedPackage> {
        self.current_unit(bundle)
            .map(|u| u.exports.clone())
            .unwrap_or_default()
    }

    /// bundle 当前代的导入及其绑定
    pub fn import_wires(&self, bundle: BundleId) -> Vec<ImportedPackage> {
        self.current_unit(bundle)
            .map(|u| u.imports.clone())
            .unwrap_or_default()
    }

    /// bundle 当前代的 bundle 依赖及其绑定
    pub fn required_bundles(&self, bundle: BundleId) -> Vec<RequireEdge> {
        self.current_unit(bundle)
            .map(|u| u.requires.clone())
            .unwrap_or_default()
    }

    /// 所有僵尸代
    pub fn zombies(&self) -> Vec<GenerationId> {
        self.units.values().filter(|u| u.zombie).map(|u| u.id).collect()
    }

    /// 所有仍有注册代的 bundle 中已卸载的那些
    pub fn pending_uninstalled(&self) -> Vec<BundleId> {
        let mut bundles: Vec<BundleId> = self
            .units
            .keys()
            .map(|g| g.bundle)
            .filter(|b| self.is_uninstalled(*b))
            .collect();
        bundles.dedup();
        bundles
    }

    /// 依赖图快照
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut snapshot = GraphSnapshot {
            packages: self.packages.clone(),
            ..Default::default()
        };
        for unit in self.units.values() {
            for (index, import) in unit.imports.iter().enumerate() {
                snapshot.pins.insert(
                    ImportKey {
                        owner: unit.id,
                        index,
                    },
                    import.provider,
                );
            }
            for (index, require) in unit.requires.iter().enumerate() {
                snapshot.requires.insert(
                    RequireKey {
                        owner: unit.id,
                        index,
                    },
                    require.provider,
                );
            }
            if unit.resolved {
                snapshot.resolved.insert(unit.id);
            }
            if let Some(host) = unit.host {
                snapshot.attachments.insert(unit.id, host);
            }
            if unit.zombie {
                snapshot.zombies.insert(unit.id);
            }
        }
        snapshot
    }

    // ==================== 片段 ====================

    /// 片段的目标宿主
    ///
    /// 在名称与版本区间都匹配的未卸载 bundle 中选择版本最高的；版本相同时选择
    /// 安装最早的。
    pub fn fragment_target(&self, fragment: GenerationId) -> Option<GenerationId> {
        let unit = self.units.get(&fragment)?;
        let host = unit.fragment_host.as_ref()?;
        self.bundle_candidates(&host.symbolic_name, &host.version_range, fragment.bundle)
            .into_iter()
            .next()
    }

    /// 可以附加到宿主的未解析片段
    fn attachable_fragments(&self, host: GenerationId) -> Vec<GenerationId> {
        self.current
            .values()
            .filter_map(|g| self.units.get(g))
            .filter(|u| {
                u.is_fragment()
                    && !u.is_extension()
                    && !u.resolved
                    && !self.is_uninstalled(u.id.bundle)
            })
            .filter(|u| self.fragment_target(u.id) == Some(host))
            .map(|u| u.id)
            .collect()
    }

    /// 把扩展片段附加到系统 bundle 并立即标记为已解析
    pub fn attach_extension(&mut self, fragment: GenerationId) -> Result<GenerationId, ResolveFailure> {
        let failure = |reason: String| ResolveFailure {
            bundle: fragment.bundle,
            reason,
        };

        let unit = self
            .units
            .get(&fragment)
            .ok_or_else(|| failure(format!("代 {} 未注册", fragment)))?;
        if !unit.is_extension() {
            return Err(failure("不是扩展片段".to_string()));
        }
        if unit.resolved {
            return unit
                .host
                .ok_or_else(|| failure("扩展片段未附加".to_string()));
        }
        let host = self
            .fragment_target(fragment)
            .filter(|h| h.bundle == SYSTEM_BUNDLE_ID)
            .ok_or_else(|| failure(format!("{}: system.bundle", MISSING_BUNDLES)))?;

        let mut tx = Transaction::new();
        tx.attached.insert(fragment, host);
        tx.mark_resolved(fragment);
        self.commit(tx);

        info!(fragment = %fragment, "扩展片段已附加到系统 bundle");
        Ok(host)
    }

    // ==================== 解析 ====================

    /// 解析 bundle 的当前代
    ///
    /// 对片段调用时解析其目标宿主（片段随宿主一起附加）。已解析时返回空报告。
    pub fn resolve(&mut self, bundle: BundleId) -> Result<ResolveReport, ResolveFailure> {
        let failure = |reason: String| ResolveFailure { bundle, reason };

        let generation = self
            .current_generation(bundle)
            .ok_or_else(|| failure("bundle 未注册".to_string()))?;
        if self.is_uninstalled(bundle) {
            return Err(failure("bundle 已卸载".to_string()));
        }
        if self.units.get(&generation).map(|u| u.resolved).unwrap_or(false) {
            return Ok(ResolveReport::default());
        }

        let mut tx = Transaction::new();
        match self.resolve_unit(&mut tx, generation) {
            Ok(()) => {
                let report = self.commit(tx);
                debug!(bundle_id = bundle, resolved = report.resolved.len(), "解析成功，已提交");
                Ok(report)
            }
            Err(reason) => {
                debug!(bundle_id = bundle, reason = %reason, "解析失败，已回滚");
                Err(failure(reason))
            }
        }
    }

    fn resolve_unit(&self, tx: &mut Transaction, generation: GenerationId) -> Result<(), String> {
        let unit = self
            .units
            .get(&generation)
            .ok_or_else(|| format!("代 {} 未注册", generation))?;

        if let Some(host_decl) = &unit.fragment_host {
            if unit.is_extension() {
                return Err("扩展片段只能在安装时附加到系统 bundle".to_string());
            }
            let host = self
                .fragment_target(generation)
                .ok_or_else(|| format!("{}: {}", MISSING_BUNDLES, host_decl.symbolic_name))?;
            if self.is_active(tx, host) && !tx.attached.contains_key(&generation) && !tx.is_resolved(host) {
                return Err(format!(
                    "宿主 '{}' 已解析，片段需要在宿主刷新后才能附加",
                    host_decl.symbolic_name
                ));
            }
            self.resolve_unit(tx, host)?;
            return if tx.attached.contains_key(&generation) {
                Ok(())
            } else {
                Err(format!("片段无法附加到宿主 '{}'", host_decl.symbolic_name))
            };
        }

        if unit.resolved || tx.is_resolved(generation) {
            return Ok(());
        }

        self.check_singleton(tx, unit)?;
        tx.mark_resolved(generation);
        self.resolve_edges(tx, generation)?;

        for fragment in self.attachable_fragments(generation) {
            let snapshot = tx.clone();
            tx.attached.insert(fragment, generation);
            tx.mark_resolved(fragment);
            if let Err(reason) = self.resolve_edges(tx, fragment) {
                debug!(fragment = %fragment, host = %generation, reason = %reason, "片段依赖无法满足，不附加");
                tx.restore(snapshot);
            }
        }
        Ok(())
    }

    /// 解析一代的 bundle 依赖与导入
    fn resolve_edges(&self, tx: &mut Transaction, generation: GenerationId) -> Result<(), String> {
        let Some(unit) = self.units.get(&generation) else {
            return Ok(());
        };

        let mut missing_bundles = Vec::new();
        for (index, require) in unit.requires.iter().enumerate() {
            match self.resolve_require(tx, require) {
                Some(target) => {
                    tx.required.insert(
                        RequireKey {
                            owner: generation,
                            index,
                        },
                        target,
                    );
                }
                None if require.is_optional() => {
                    trace!(generation = %generation, bundle = %require.name, "可选 bundle 依赖未满足");
                }
                None => missing_bundles.push(require.bundle_string()),
            }
        }
        if !missing_bundles.is_empty() {
            return Err(format!("{}: {}", MISSING_BUNDLES, missing_bundles.join(", ")));
        }

        let mut missing = Vec::new();
        for (index, import) in unit.imports.iter().enumerate() {
            let key = ImportKey {
                owner: generation,
                index,
            };
            if import.provider.is_some() || tx.pinned.contains_key(&key) {
                continue;
            }
            match self.resolve_import(tx, import) {
                Some(export) => {
                    tx.pinned.insert(key, export);
                }
                None if import.is_optional() => {
                    trace!(generation = %generation, package = %import.name, "可选导入未满足");
                }
                None => missing.push(import.package_string()),
            }
        }
        if !missing.is_empty() {
            return Err(format!("{}: {}", MISSING_PACKAGES, missing.join(", ")));
        }
        Ok(())
    }

    fn check_singleton(&self, tx: &Transaction, unit: &BundlePackages) -> Result<(), String> {
        if !unit.singleton {
            return Ok(());
        }
        let Some(name) = unit.symbolic_name.as_deref() else {
            return Ok(());
        };

        let conflict = self.units.values().any(|other| {
            other.id.bundle != unit.id.bundle
                && self.is_current(other.id)
                && !self.is_uninstalled(other.id.bundle)
                && !other.is_fragment()
                && other.symbolic_name.as_deref() == Some(name)
                && (other.resolved || tx.is_resolved(other.id))
        });
        if conflict {
            Err(format!("单例 bundle 无法解析: 已有同名 bundle '{}' 处于已解析状态", name))
        } else {
            Ok(())
        }
    }

    /// 名称与版本匹配的非片段 bundle 当前代，按版本从高到低、安装顺序排序
    fn bundle_candidates(&self, name: &str, range: &VersionRange, requester: BundleId) -> Vec<GenerationId> {
        let mut candidates: Vec<&BundlePackages> = self
            .current
            .values()
            .filter_map(|g| self.units.get(g))
            .filter(|u| {
                u.id.bundle != requester
                    && !u.is_fragment()
                    && !self.is_uninstalled(u.id.bundle)
                    && u.symbolic_name.as_deref() == Some(name)
                    && range.within_range(&u.version)
            })
            .collect();
        candidates.sort_by(|a, b| b.version.cmp(&a.version).then(a.id.cmp(&b.id)));
        candidates.into_iter().map(|u| u.id).collect()
    }

    fn resolve_require(&self, tx: &mut Transaction, require: &RequireEdge) -> Option<GenerationId> {
        let candidates = self.bundle_candidates(&require.name, &require.version_range, require.owner.bundle);

        if let Some(found) = candidates.iter().find(|g| tx.is_resolved(**g)) {
            return Some(*found);
        }

        for candidate in candidates.iter().filter(|g| self.units[*g].resolved) {
            if self.check_bundle_uses(tx, *candidate) {
                return Some(*candidate);
            }
        }

        for candidate in candidates.iter().filter(|g| !self.units[*g].resolved) {
            if self.check_resolve(tx, *candidate) && tx.is_resolved(*candidate) {
                return Some(*candidate);
            }
        }
        None
    }

    /// 已解析 bundle 的全部提供中的导出是否与本次解析一致
    fn check_bundle_uses(&self, tx: &mut Transaction, generation: GenerationId) -> bool {
        let snapshot = tx.provider.clone();
        let Some(unit) = self.units.get(&generation) else {
            return false;
        };

        for (index, export) in unit.exports.iter().enumerate() {
            let key = ExportKey {
                owner: generation,
                index,
            };
            let offered = self
                .packages
                .get(&export.name)
                .map(|pkg| pkg.is_provider(key))
                .unwrap_or(false);
            if !offered {
                continue;
            }

            match tx.provider.get(&export.name).copied() {
                Some(existing) if existing != key => {
                    tx.provider = snapshot;
                    return false;
                }
                Some(_) => {}
                None => {
                    tx.provider.insert(export.name.clone(), key);
                }
            }

            let mut visited = BTreeSet::from([key]);
            if !self.check_uses(tx, key, &mut visited) {
                tx.provider = snapshot;
                return false;
            }
        }
        true
    }

    fn resolve_import(&self, tx: &mut Transaction, import: &ImportedPackage) -> Option<ExportKey> {
        if let Some(existing) = tx.provider.get(&import.name).copied() {
            return if self.export_matches(import, existing) {
                Some(existing)
            } else {
                trace!(package = %import.name, "本次解析已选定的提供者不满足导入约束");
                None
            };
        }
        self.pick_provider(tx, import)
    }

    fn pick_provider(&self, tx: &mut Transaction, import: &ImportedPackage) -> Option<ExportKey> {
        let pkg = self.packages.get(&import.name)?;

        let mut candidates = pkg.providers.clone();
        let mut others: Vec<ExportKey> = pkg
            .exporters
            .iter()
            .filter(|k| !candidates.contains(k))
            .copied()
            .collect();
        others.sort_by(|a, b| self.compare_exports(*a, *b));
        candidates.extend(others);

        let mut installed = Vec::new();
        for key in candidates {
            if tx.blacklist.contains(&key) {
                continue;
            }
            let Some(export) = self.export(key) else {
                continue;
            };
            // 僵尸代只保留已有的绑定
            if export.zombie || !self.is_current(key.owner) || self.is_uninstalled(key.owner.bundle) {
                continue;
            }
            if !self.export_matches(import, key) {
                continue;
            }

            if self.is_active(tx, key.owner) {
                if self.try_provider(tx, import, key) {
                    return Some(key);
                }
            } else {
                installed.push(key);
            }
        }

        for key in installed {
            if tx.blacklist.contains(&key) {
                continue;
            }
            if self.check_resolve(tx, key.owner)
                && self.is_active(tx, key.owner)
                && self.try_provider(tx, import, key)
            {
                return Some(key);
            }
        }
        None
    }

    /// 暂定选择提供者并做 uses 检查，失败时回滚并加入黑名单
    fn try_provider(&self, tx: &mut Transaction, import: &ImportedPackage, key: ExportKey) -> bool {
        let snapshot = tx.provider.clone();
        tx.provider.insert(import.name.clone(), key);

        let mut visited = BTreeSet::from([key]);
        if self.check_uses(tx, key, &mut visited) {
            trace!(package = %import.name, provider = %key.owner, "选定提供者");
            true
        } else {
            tx.provider = snapshot;
            tx.blacklist.insert(key);
            debug!(package = %import.name, provider = %key.owner, "uses 冲突，提供者加入黑名单");
            false
        }
    }

    /// 沿导出的 uses 递归检查：导出方看到的每个被使用包的提供者必须与本次解析一致
    fn check_uses(&self, tx: &mut Transaction, key: ExportKey, visited: &mut BTreeSet<ExportKey>) -> bool {
        let Some(export) = self.export(key) else {
            return true;
        };

        for used in &export.uses {
            let Some(binding) = self.binding_of(tx, key.owner, used) else {
                continue;
            };
            match tx.provider.get(used).copied() {
                Some(existing) if existing == binding => {}
                Some(existing) => {
                    trace!(package = %used, expected = %existing.owner, found = %binding.owner, "uses 不一致");
                    return false;
                }
                None => {
                    tx.provider.insert(used.clone(), binding);
                }
            }
            if visited.insert(binding) && !self.check_uses(tx, binding, visited) {
                return false;
            }
        }
        true
    }

    /// 某一代看到的包提供者：优先其导入的绑定，其次自身的导出
    fn binding_of(&self, tx: &Transaction, owner: GenerationId, package: &str) -> Option<ExportKey> {
        let unit = self.units.get(&owner)?;
        if let Some(index) = unit.import_index(package) {
            return unit.imports[index]
                .provider
                .or_else(|| tx.pinned_provider(ImportKey { owner, index }));
        }
        unit.export_index(package)
            .map(|index| ExportKey { owner, index })
    }

    /// 递归解析一个候选 bundle，失败时恢复事务但保留黑名单
    fn check_resolve(&self, tx: &mut Transaction, generation: GenerationId) -> bool {
        if tx.depth >= self.max_depth {
            debug!(generation = %generation, depth = tx.depth, "嵌套解析深度超限");
            return false;
        }

        let snapshot = tx.clone();
        tx.depth += 1;
        let result = self.resolve_unit(tx, generation);
        tx.depth -= 1;

        match result {
            Ok(()) => true,
            Err(reason) => {
                trace!(generation = %generation, reason = %reason, "候选 bundle 无法解析");
                tx.restore(snapshot);
                false
            }
        }
    }

    fn is_active(&self, tx: &Transaction, generation: GenerationId) -> bool {
        tx.is_resolved(generation)
            || self.units.get(&generation).map(|u| u.resolved).unwrap_or(false)
    }

    fn export_matches(&self, import: &ImportedPackage, key: ExportKey) -> bool {
        let (Some(export), Some(owner)) = (self.export(key), self.units.get(&key.owner)) else {
            return false;
        };
        import.matches(export, owner.symbolic_name.as_deref(), &owner.version)
    }

    /// 版本从高到低，版本相同时安装早的在前
    fn compare_exports(&self, a: ExportKey, b: ExportKey) -> Ordering {
        let version = |k: ExportKey| self.export(k).map(|e| e.version.clone());
        version(b).cmp(&version(a)).then(a.cmp(&b))
    }

    // ==================== 提交 ====================

    fn commit(&mut self, tx: Transaction) -> ResolveReport {
        let Transaction {
            resolved,
            pinned,
            required,
            attached,
            ..
        } = tx;

        for (fragment, host) in &attached {
            if let Some(unit) = self.units.get_mut(fragment) {
                unit.host = Some(*host);
            }
            if let Some(unit) = self.units.get_mut(host) {
                if !unit.fragments.contains(fragment) {
                    unit.fragments.push(*fragment);
                    unit.fragments.sort();
                }
            }
        }

        for (import, export) in &pinned {
            if let Some(unit) = self.units.get_mut(&import.owner) {
                unit.imports[import.index].provider = Some(*export);
            }
            self.add_provider(*export);
        }

        for (require, target) in &required {
            if let Some(unit) = self.units.get_mut(&require.owner) {
                unit.requires[require.index].provider = Some(*target);
            }
        }

        for generation in &resolved {
            let Some(unit) = self.units.get_mut(generation) else {
                continue;
            };
            unit.resolved = true;

            let offered: Vec<ExportKey> = unit
                .exports
                .iter()
                .enumerate()
                .filter(|(_, export)| {
                    // 自身导入同名包且绑定到其他提供者时，该导出被替代
                    unit.import_index(&export.name)
                        .and_then(|i| unit.imports[i].provider)
                        .map(|p| p.owner == *generation)
                        .unwrap_or(true)
                })
                .map(|(index, _)| ExportKey {
                    owner: *generation,
                    index,
                })
                .collect();
            for key in offered {
                self.add_provider(key);
            }
        }

        ResolveReport {
            resolved,
            attached: attached.into_iter().collect(),
        }
    }

    fn add_provider(&mut self, key: ExportKey) {
        let Some(name) = self.export(key).map(|e| e.name.clone()) else {
            return;
        };
        let mut providers = self
            .packages
            .get(&name)
            .map(|pkg| pkg.providers.clone())
            .unwrap_or_default();
        if providers.contains(&key) {
            return;
        }
        providers.push(key);
        providers.sort_by(|a, b| self.compare_exports(*a, *b));
        if let Some(pkg) = self.packages.get_mut(&name) {
            pkg.providers = providers;
        }
    }

    // ==================== 动态导入 ====================

    /// 为已解析的代动态导入一个包
    ///
    /// 包名需要匹配该代（或其片段）的 `DynamicImport-Package` 模式。使用与
    /// `resolve` 相同的一致性规则，事务以该代已有的绑定为初始状态；成功后立即
    /// 提交并永久绑定。已经导入过的包直接返回原有绑定。
    pub fn register_dynamic_import(
        &mut self,
        generation: GenerationId,
        package: &str,
    ) -> Option<(ExportKey, ResolveReport)> {
        let unit = self.units.get(&generation)?;
        if !unit.resolved {
            return None;
        }
        if let Some(index) = unit.import_index(package) {
            return unit.imports[index]
                .provider
                .map(|p| (p, ResolveReport::default()));
        }

        let space: Vec<&BundlePackages> = std::iter::once(unit)
            .chain(unit.fragments.iter().filter_map(|f| self.units.get(f)))
            .collect();
        let pattern = space
            .iter()
            .flat_map(|u| u.dynamic_imports.iter())
            .find(|p| p.matches(package))?;
        let import = pattern.instantiate(package, generation);

        let mut tx = Transaction::new();
        for import in space.iter().flat_map(|u| u.imports.iter()) {
            if let Some(provider) = import.provider {
                tx.provider.insert(import.name.clone(), provider);
            }
        }

        let Some(provider) = self.resolve_import(&mut tx, &import) else {
            debug!(generation = %generation, package = %package, "动态导入未找到提供者");
            return None;
        };

        let index = self.units.get(&generation)?.imports.len();
        let key = ImportKey {
            owner: generation,
            index,
        };
        if let Some(unit) = self.units.get_mut(&generation) {
            unit.imports.push(import);
        }
        self.packages
            .entry(package.to_string())
            .or_insert_with(|| Pkg::new(package))
            .add_importer(key);
        tx.pinned.insert(key, provider);
        let report = self.commit(tx);

        debug!(generation = %generation, package = %package, provider = %provider.owner, "动态导入已绑定");
        Some((provider, report))
    }

    // ==================== 刷新 ====================

    /// 取消 bundle 当前代（及其片段）的解析，返回受影响的代
    ///
    /// 调用方需要同时取消所有依赖它的 bundle 的解析（见 [`Packages::refresh_closure`]）。
    pub fn unresolve(&mut self, bundle: BundleId) -> Vec<GenerationId> {
        let Some(generation) = self.current_generation(bundle) else {
            return Vec::new();
        };
        let Some(unit) = self.units.get(&generation) else {
            return Vec::new();
        };
        if !unit.resolved {
            return Vec::new();
        }

        let mut affected = vec![generation];
        affected.extend(unit.fragments.iter().copied());
        if let Some(host) = unit.host {
            if let Some(host) = self.units.get_mut(&host) {
                host.fragments.retain(|f| *f != generation);
            }
        }
        for generation in &affected {
            self.reset_unit(*generation);
        }
        debug!(bundle_id = bundle, generations = affected.len(), "取消解析");
        affected
    }

    /// 把一代恢复到未解析状态：清除绑定、撤销提供者、移除动态导入、解除附加
    fn reset_unit(&mut self, generation: GenerationId) {
        let Some(unit) = self.units.get_mut(&generation) else {
            return;
        };
        unit.resolved = false;
        unit.host = None;
        unit.fragments.clear();
        for require in &mut unit.requires {
            require.provider = None;
        }

        let mut dynamic = Vec::new();
        for (index, import) in unit.imports.iter_mut().enumerate() {
            import.provider = None;
            if import.dynamic {
                dynamic.push((
                    ImportKey {
                        owner: generation,
                        index,
                    },
                    import.name.clone(),
                ));
            }
        }
        unit.imports.retain(|i| !i.dynamic);
        let exports: Vec<(ExportKey, String)> = unit
            .exports
            .iter()
            .enumerate()
            .map(|(index, e)| {
                (
                    ExportKey {
                        owner: generation,
                        index,
                    },
                    e.name.clone(),
                )
            })
            .collect();

        for (key, name) in dynamic {
            if let Some(pkg) = self.packages.get_mut(&name) {
                pkg.remove_importer(key);
            }
        }
        for (key, name) in exports {
            if let Some(pkg) = self.packages.get_mut(&name) {
                pkg.providers.retain(|p| *p != key);
            }
        }
        self.packages.retain(|_, pkg| !pkg.is_empty());
    }

    /// 解除所有其他代对某一代的绑定
    fn unpin_consumers_of(&mut self, generation: GenerationId) {
        for unit in self.units.values_mut() {
            if unit.id == generation {
                continue;
            }
            for import in &mut unit.imports {
                if import.provider.map(|p| p.owner) == Some(generation) {
                    import.provider = None;
                }
            }
            for require in &mut unit.requires {
                if require.provider == Some(generation) {
                    require.provider = None;
                }
            }
        }
    }

    /// 刷新闭包：给定 bundle，加上所有（传递地）绑定到它们的 bundle、它们的片段与宿主
    pub fn refresh_closure(&self, bundles: &[BundleId]) -> Vec<BundleId> {
        let mut closure: BTreeSet<BundleId> = bundles
            .iter()
            .copied()
            .filter(|b| *b != SYSTEM_BUNDLE_ID)
            .collect();

        loop {
            let before = closure.len();
            for unit in self.units.values() {
                let bundle = unit.id.bundle;
                if bundle == SYSTEM_BUNDLE_ID {
                    continue;
                }
                if closure.contains(&bundle) {
                    if let Some(host) = unit.host.filter(|h| h.bundle != SYSTEM_BUNDLE_ID) {
                        closure.insert(host.bundle);
                    }
                    closure.extend(unit.fragments.iter().map(|f| f.bundle));
                    continue;
                }

                let depends = unit
                    .imports
                    .iter()
                    .filter_map(|i| i.provider)
                    .any(|p| closure.contains(&p.owner.bundle))
                    || unit
                        .requires
                        .iter()
                        .filter_map(|r| r.provider)
                        .any(|p| closure.contains(&p.bundle));
                if depends {
                    closure.insert(bundle);
                }
            }
            if closure.len() == before {
                break;
            }
        }
        closure.into_iter().collect()
    }

    // ==================== 使用情况 ====================

    fn is_export_in_use(&self, key: ExportKey) -> bool {
        self.units.values().any(|u| {
            u.id != key.owner && u.imports.iter().any(|i| i.provider == Some(key))
        })
    }

    fn is_required_by_others(&self, generation: GenerationId) -> bool {
        self.units.values().any(|u| {
            u.id.bundle != generation.bundle
                && u.requires.iter().any(|r| r.provider == Some(generation))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::version::Version;

    fn unit(id: BundleId, name: &str, version: &str) -> BundlePackages {
        BundlePackages::new(
            GenerationId::new(id, 0),
            Some(name.to_string()),
            Version::parse(version).unwrap(),
        )
    }

    fn gen(id: BundleId) -> GenerationId {
        GenerationId::new(id, 0)
    }

    fn export_of(id: BundleId, index: usize) -> ExportKey {
        ExportKey {
            owner: gen(id),
            index,
        }
    }

    fn pinned(packages: &Packages, id: BundleId, package: &str) -> Option<ExportKey> {
        let unit = packages.current_unit(id)?;
        unit.imports[unit.import_index(package)?].provider
    }

    #[test]
    fn test_simple_import() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_exports("pkg.x;version=1.0").unwrap());
        packages.register_unit(unit(2, "b", "1.0").with_imports(r#"pkg.x;version="[1.0,2.0)""#).unwrap());

        let report = packages.resolve(2).unwrap();
        assert_eq!(report.bundles(), vec![2, 1]);
        assert!(packages.is_resolved(1));
        assert!(packages.is_resolved(2));
        assert_eq!(pinned(&packages, 2, "pkg.x"), Some(export_of(1, 0)));
        assert_eq!(packages.provider("pkg.x"), Some(export_of(1, 0)));
    }

    #[test]
    fn test_selects_version_in_range() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_exports("pkg.x;version=1.0").unwrap());
        packages.register_unit(unit(3, "c", "1.0").with_exports("pkg.x;version=2.0").unwrap());
        packages.resolve(1).unwrap();
        packages.resolve(3).unwrap();
        packages.register_unit(unit(2, "b", "1.0").with_imports(r#"pkg.x;version="[1.0,1.5)""#).unwrap());

        packages.resolve(2).unwrap();
        assert_eq!(pinned(&packages, 2, "pkg.x"), Some(export_of(1, 0)));
        assert_eq!(packages.provider("pkg.x"), Some(export_of(3, 0)));
    }

    #[test]
    fn test_prefers_highest_version() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_exports("pkg.x;version=1.0").unwrap());
        packages.register_unit(unit(3, "c", "1.0").with_exports("pkg.x;version=2.0").unwrap());
        packages.register_unit(unit(2, "b", "1.0").with_imports(r#"pkg.x;version="[1.0,3.0)""#).unwrap());

        packages.resolve(2).unwrap();
        assert_eq!(pinned(&packages, 2, "pkg.x"), Some(export_of(3, 0)));
        assert!(!packages.is_resolved(1));
    }

    #[test]
    fn test_missing_import_is_atomic() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_exports("pkg.x").unwrap());
        packages.register_unit(unit(5, "e", "1.0").with_imports("pkg.x, p").unwrap());
        let before = packages.snapshot();

        let failure = packages.resolve(5).unwrap_err();
        assert_eq!(failure.bundle, 5);
        assert!(failure.reason.contains('p'));
        assert!(failure.reason.contains(MISSING_PACKAGES));
        assert!(!packages.is_resolved(5));
        assert!(!packages.is_resolved(1));
        assert_eq!(packages.snapshot(), before);
    }

    #[test]
    fn test_optional_import_tolerated() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_imports("pkg.none;resolution:=optional").unwrap());

        packages.resolve(1).unwrap();
        assert!(packages.is_resolved(1));
        assert_eq!(pinned(&packages, 1, "pkg.none"), None);
    }

    #[test]
    fn test_singleton_exclusive() {
        let mut packages = Packages::default();
        let mut d1 = unit(1, "d", "1.0");
        d1.singleton = true;
        let mut d2 = unit(2, "d", "2.0");
        d2.singleton = true;
        packages.register_unit(d1);
        packages.resolve(1).unwrap();
        packages.register_unit(d2);
        let before = packages.snapshot();

        let failure = packages.resolve(2).unwrap_err();
        assert!(failure.reason.contains("单例"));
        assert!(packages.is_resolved(1));
        assert!(!packages.is_resolved(2));
        assert_eq!(packages.snapshot(), before);
    }

    #[test]
    fn test_uses_constraint_propagates() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "x1", "1.0").with_exports("pkg.x;version=1.0").unwrap());
        packages.register_unit(unit(2, "x2", "1.0").with_exports("pkg.x;version=2.0").unwrap());
        packages.register_unit(
            unit(3, "l", "1.0")
                .with_exports(r#"pkg.l;uses:="pkg.x""#)
                .unwrap()
                .with_imports(r#"pkg.x;version="[1.0,2.0)""#)
                .unwrap(),
        );
        packages.resolve(3).unwrap();
        packages.resolve(2).unwrap();
        assert_eq!(pinned(&packages, 3, "pkg.x"), Some(export_of(1, 0)));

        packages.register_unit(unit(4, "b", "1.0").with_imports("pkg.l, pkg.x").unwrap());
        packages.resolve(4).unwrap();
        assert_eq!(pinned(&packages, 4, "pkg.l"), Some(export_of(3, 0)));
        assert_eq!(pinned(&packages, 4, "pkg.x"), pinned(&packages, 3, "pkg.x"));
    }

    #[test]
    fn test_uses_conflict_fails_atomically() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "x1", "1.0").with_exports("pkg.x;version=1.0").unwrap());
        packages.register_unit(unit(2, "x2", "1.0").with_exports("pkg.x;version=2.0").unwrap());
        packages.register_unit(
            unit(3, "l", "1.0")
                .with_exports(r#"pkg.l;uses:="pkg.x""#)
                .unwrap()
                .with_imports(r#"pkg.x;version="[1.0,2.0)""#)
                .unwrap(),
        );
        packages.resolve(3).unwrap();
        packages.resolve(2).unwrap();

        packages.register_unit(
            unit(4, "b", "1.0")
                .with_imports(r#"pkg.x;version="[2.0,3.0)",pkg.l"#)
                .unwrap(),
        );
        let before = packages.snapshot();
        let failure = packages.resolve(4).unwrap_err();
        assert!(failure.reason.contains("pkg.l"));
        assert_eq!(packages.snapshot(), before);
    }

    #[test]
    fn test_pins_survive_unrelated_resolve() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a1", "1.0").with_exports("pkg.x;version=1.0").unwrap());
        packages.register_unit(unit(2, "b", "1.0").with_imports(r#"pkg.x;version="[1.0,3.0)""#).unwrap());
        packages.resolve(2).unwrap();
        let pins = packages.import_wires(2);

        packages.register_unit(unit(3, "a2", "1.0").with_exports("pkg.x;version=2.0").unwrap());
        packages.register_unit(unit(4, "f", "1.0").with_imports(r#"pkg.x;version="[2.0,3.0)""#).unwrap());
        packages.resolve(4).unwrap();

        assert_eq!(pinned(&packages, 4, "pkg.x"), Some(export_of(3, 0)));
        assert_eq!(packages.import_wires(2), pins);
        assert_eq!(packages.provider("pkg.x"), Some(export_of(3, 0)));
    }

    #[test]
    fn test_nested_failure_rolls_back_candidates() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_exports("pkg.x").unwrap());
        packages.register_unit(unit(2, "b", "1.0").with_imports("pkg.x, pkg.missing").unwrap());
        let before = packages.snapshot();

        assert!(packages.resolve(2).is_err());
        assert!(!packages.is_resolved(1));
        assert_eq!(packages.snapshot(), before);
    }

    #[test]
    fn test_require_bundle() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "base", "1.5").with_exports("base.api").unwrap());
        packages.register_unit(unit(2, "app", "1.0").with_requires(r#"base;bundle-version="[1.0,2.0)""#).unwrap());

        let report = packages.resolve(2).unwrap();
        assert_eq!(report.bundles(), vec![2, 1]);
        assert_eq!(packages.required_bundles(2)[0].provider, Some(gen(1)));

        packages.register_unit(unit(3, "other", "1.0").with_requires("nothing").unwrap());
        let failure = packages.resolve(3).unwrap_err();
        assert!(failure.reason.contains(MISSING_BUNDLES));
        assert!(failure.reason.contains("nothing"));
    }

    #[test]
    fn test_cyclic_imports_resolve() {
        let mut packages = Packages::default();
        packages.register_unit(
            unit(1, "a", "1.0").with_exports("pkg.a").unwrap().with_imports("pkg.b").unwrap(),
        );
        packages.register_unit(
            unit(2, "b", "1.0").with_exports("pkg.b").unwrap().with_imports("pkg.a").unwrap(),
        );

        packages.resolve(1).unwrap();
        assert!(packages.is_resolved(2));
        assert_eq!(pinned(&packages, 1, "pkg.b"), Some(export_of(2, 0)));
        assert_eq!(pinned(&packages, 2, "pkg.a"), Some(export_of(1, 0)));
    }

    #[test]
    fn test_max_depth() {
        let mut packages = Packages::new(2);
        packages.register_unit(unit(1, "b1", "1.0").with_exports("p1").unwrap());
        for id in 2..=5 {
            packages.register_unit(
                unit(id, &format!("b{}", id), "1.0")
                    .with_exports(&format!("p{}", id))
                    .unwrap()
                    .with_imports(&format!("p{}", id - 1))
                    .unwrap(),
            );
        }
        assert!(packages.resolve(5).is_err());
        assert!(packages.resolve(3).is_ok());
        assert!(packages.resolve(5).is_ok());
    }

    #[test]
    fn test_fragment_attaches_with_host() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "host", "1.0"));
        let mut fragment = unit(2, "frag", "1.0").with_exports("frag.api").unwrap();
        fragment.fragment_host = Some(crate::bundle::manifest::FragmentHost {
            symbolic_name: "host".into(),
            version_range: VersionRange::default(),
            extension: None,
        });
        packages.register_unit(fragment);
        assert_eq!(packages.fragment_target(gen(2)), Some(gen(1)));

        let report = packages.resolve(2).unwrap();
        assert_eq!(report.attached, vec![(gen(2), gen(1))]);
        assert_eq!(packages.loader_of(gen(2)), gen(1));
        assert_eq!(packages.unit(gen(1)).unwrap().fragments(), &[gen(2)]);
        assert_eq!(packages.provider("frag.api"), Some(export_of(2, 0)));
    }

    #[test]
    fn test_fragment_not_attached_to_resolved_host() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "host", "1.0"));
        packages.resolve(1).unwrap();

        let mut fragment = unit(2, "frag", "1.0");
        fragment.fragment_host = Some(crate::bundle::manifest::FragmentHost {
            symbolic_name: "host".into(),
            version_range: VersionRange::default(),
            extension: None,
        });
        packages.register_unit(fragment);
        assert!(packages.resolve(2).is_err());
        assert!(packages.unit(gen(2)).unwrap().host().is_none());
    }

    #[test]
    fn test_unregister_in_use_becomes_zombie() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_exports("pkg.x").unwrap());
        packages.register_unit(unit(2, "b", "1.0").with_imports("pkg.x").unwrap());
        packages.resolve(2).unwrap();

        assert!(!packages.unregister_unit(gen(1), false));
        assert_eq!(packages.zombies(), vec![gen(1)]);
        assert!(packages.export(export_of(1, 0)).unwrap().zombie);
        assert_eq!(pinned(&packages, 2, "pkg.x"), Some(export_of(1, 0)));

        assert!(packages.unregister_unit(gen(2), false));
        assert_eq!(packages.collect_unused_zombies(), vec![gen(1)]);
        assert!(packages.package("pkg.x").is_none());
    }

    #[test]
    fn test_uninstalled_zombie_not_selected() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_exports("pkg.x").unwrap());
        packages.register_unit(unit(2, "b", "1.0").with_imports("pkg.x").unwrap());
        packages.resolve(2).unwrap();

        packages.mark_uninstalled(1);
        assert!(!packages.unregister_unit(gen(1), false));

        packages.register_unit(unit(3, "c", "1.0").with_imports("pkg.x").unwrap());
        assert!(packages.resolve(3).is_err());
        assert_eq!(packages.pending_uninstalled(), vec![1]);
    }

    #[test]
    fn test_uninstalled_singleton_does_not_block() {
        let mut packages = Packages::default();
        let mut d1 = unit(1, "d", "1.0").with_exports("pkg.d").unwrap();
        d1.singleton = true;
        packages.register_unit(d1);
        packages.register_unit(unit(2, "b", "1.0").with_imports("pkg.d").unwrap());
        packages.resolve(2).unwrap();

        packages.mark_uninstalled(1);
        assert!(!packages.unregister_unit(gen(1), false));

        let mut d2 = unit(3, "d", "2.0");
        d2.singleton = true;
        packages.register_unit(d2);
        packages.resolve(3).unwrap();
        assert!(packages.is_resolved(3));
        assert_eq!(pinned(&packages, 2, "pkg.d"), Some(export_of(1, 0)));
    }

    #[test]
    fn test_zombie_export_keeps_pins_only() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_exports("pkg.x").unwrap());
        packages.register_unit(unit(2, "b", "1.0").with_imports("pkg.x").unwrap());
        packages.resolve(2).unwrap();

        let next = GenerationId::new(1, 1);
        packages.register_unit(
            BundlePackages::new(next, Some("a".to_string()), Version::parse("1.0").unwrap())
                .with_exports("pkg.x")
                .unwrap(),
        );
        assert!(!packages.unregister_unit(gen(1), false));

        packages.register_unit(unit(3, "c", "1.0").with_imports("pkg.x").unwrap());
        packages.resolve(3).unwrap();
        assert_eq!(pinned(&packages, 3, "pkg.x"), Some(ExportKey { owner: next, index: 0 }));
        assert_eq!(pinned(&packages, 2, "pkg.x"), Some(export_of(1, 0)));
    }

    #[test]
    fn test_uninstalled_mark_cleared_after_purge() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_exports("pkg.x").unwrap());
        packages.register_unit(unit(2, "b", "1.0").with_imports("pkg.x").unwrap());
        packages.resolve(2).unwrap();

        packages.mark_uninstalled(1);
        assert!(!packages.unregister_unit(gen(1), false));
        assert!(packages.is_uninstalled(1));

        packages.unresolve(2);
        assert_eq!(packages.collect_unused_zombies(), vec![gen(1)]);
        assert!(!packages.is_uninstalled(1));
        assert!(packages.pending_uninstalled().is_empty());

        packages.register_unit(unit(4, "e", "1.0"));
        assert!(packages.unregister_unit(GenerationId::new(4, 0), false));
        packages.mark_uninstalled(4);
        assert!(!packages.is_uninstalled(4));
    }

    #[test]
    fn test_force_unregister_unpins() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_exports("pkg.x").unwrap());
        packages.register_unit(unit(2, "b", "1.0").with_imports("pkg.x").unwrap());
        packages.resolve(2).unwrap();

        assert!(packages.unregister_unit(gen(1), true));
        assert_eq!(pinned(&packages, 2, "pkg.x"), None);
        assert!(packages.unit(gen(1)).is_none());
    }

    #[test]
    fn test_dynamic_import() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_exports("org.chips.util").unwrap());
        packages.register_unit(unit(2, "b", "1.0").with_dynamic_imports("org.chips.*").unwrap());
        packages.resolve(2).unwrap();
        assert!(!packages.is_resolved(1));

        let (provider, report) = packages.register_dynamic_import(gen(2), "org.chips.util").unwrap();
        assert_eq!(provider, export_of(1, 0));
        assert_eq!(report.bundles(), vec![1]);
        assert_eq!(pinned(&packages, 2, "org.chips.util"), Some(provider));

        let (again, report) = packages.register_dynamic_import(gen(2), "org.chips.util").unwrap();
        assert_eq!(again, provider);
        assert!(report.is_empty());

        assert!(packages.register_dynamic_import(gen(2), "other.pkg").is_none());
        assert!(packages.register_dynamic_import(gen(2), "org.chips.none").is_none());
    }

    #[test]
    fn test_unresolve_and_closure() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_exports("pkg.a").unwrap());
        packages.register_unit(
            unit(2, "b", "1.0").with_imports("pkg.a").unwrap().with_exports("pkg.b").unwrap(),
        );
        packages.register_unit(unit(3, "c", "1.0").with_requires("b").unwrap());
        packages.register_unit(unit(4, "d", "1.0"));
        packages.resolve(3).unwrap();
        packages.resolve(4).unwrap();

        assert_eq!(packages.refresh_closure(&[1]), vec![1, 2, 3]);

        for bundle in [3, 2, 1] {
            packages.unresolve(bundle);
        }
        assert!(!packages.is_resolved(1));
        assert!(packages.provider("pkg.a").is_none());
        assert_eq!(pinned(&packages, 2, "pkg.a"), None);
        assert!(packages.is_resolved(4));

        packages.resolve(3).unwrap();
        assert!(packages.is_resolved(1));
    }

    #[test]
    fn test_mandatory_attributes_through_resolver() {
        let mut packages = Packages::default();
        packages.register_unit(
            unit(1, "a", "1.0")
                .with_exports("pkg.x;vendor=chips;mandatory:=vendor")
                .unwrap(),
        );
        packages.register_unit(unit(2, "b", "1.0").with_imports("pkg.x").unwrap());
        packages.register_unit(unit(3, "c", "1.0").with_imports("pkg.x;vendor=chips").unwrap());

        assert!(packages.resolve(2).is_err());
        assert!(packages.resolve(3).is_ok());
    }

    #[test]
    fn test_substituted_export_not_offered() {
        let mut packages = Packages::default();
        packages.register_unit(unit(1, "a", "1.0").with_exports("pkg.x;version=2.0").unwrap());
        packages.resolve(1).unwrap();
        packages.register_unit(
            unit(2, "b", "1.0")
                .with_exports("pkg.x;version=1.0")
                .unwrap()
                .with_imports("pkg.x")
                .unwrap(),
        );
        packages.resolve(2).unwrap();
        assert_eq!(pinned(&packages, 2, "pkg.x"), Some(export_of(1, 0)));
        assert!(!packages.package("pkg.x").unwrap().is_provider(export_of(2, 0)));
    }
}
