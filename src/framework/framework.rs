//! 框架核心
//!
//! [`Framework`] 持有依赖图、bundle 表与类加载器表，并驱动 bundle 的生命周期。
//! 它是一个廉价可克隆的句柄，激活器通过 [`super::BundleContext`] 拿到同一个句柄。
//!
//! # 锁
//!
//! - 依赖图 `packages`：一把互斥锁，解析与动态导入在锁内完成，锁不跨越 `.await`
//! - bundle 表、类加载器表：读写锁
//! - 每个 bundle 的 `op_lock`：串行化同一 bundle 上的生命周期操作
//!
//! 需要同时持有时按 bundle 表、依赖图、类加载器表的顺序获取。
//!
//! # 示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chips_framework::{BundleContent, Framework, MemoryStorage};
//!
//! # async fn demo() -> chips_framework::Result<()> {
//! let storage = Arc::new(MemoryStorage::new());
//! storage.publish(
//!     "mem:api",
//!     BundleContent::new()
//!         .header("Bundle-SymbolicName", "org.chips.api")
//!         .header("Export-Package", "org.chips.api;version=1.0"),
//! );
//!
//! let framework = Framework::builder().storage(storage).build()?;
//! let bundle = framework.install("mem:api").await?;
//! framework.start(bundle.id()).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::services::{NoopServiceRegistry, ServiceRegistry};
use crate::bundle::manifest::constants::{BUNDLE_SYMBOLIC_NAME, EXPORT_PACKAGE};
use crate::bundle::{
    ActivatorFactory, ActivatorRegistry, Bundle, BundleArchive, BundleContent, BundleEvent,
    BundleEventKind, BundleListener, BundleManifest, BundleState, BundleStorage, FrameworkEvent,
    FrameworkEventKind, FrameworkListener, ListenerId, ListenerRegistry, MemoryArchive,
    MemoryStorage, SYSTEM_BUNDLE_NAME,
};
use crate::classloader::{BootDelegation, BundleClassLoader, ClassSpace, LoadedClass};
use crate::core::config::FrameworkConfig;
use crate::resolver::{
    BundleId, BundlePackages, ExportedPackage, GenerationId, GraphSnapshot, ImportedPackage,
    Packages, RequireEdge, ResolveReport, WireTarget, Wiring, SYSTEM_BUNDLE_ID,
};
use crate::utils::{FrameworkError, Result};

/// 系统 bundle 的安装位置
pub const SYSTEM_BUNDLE_LOCATION: &str = "System Bundle";

// ==================== 共享状态 ====================

pub(crate) struct Inner {
    pub(super) config: FrameworkConfig,
    pub(super) storage: Arc<dyn BundleStorage>,
    pub(super) services: Arc<dyn ServiceRegistry>,
    pub(super) activators: Arc<ActivatorRegistry>,
    pub(super) listeners: ListenerRegistry,
    pub(super) packages: Mutex<Packages>,
    /// 已安装的 bundle（含系统 bundle）
    pub(super) bundles: RwLock<BTreeMap<BundleId, Arc<Bundle>>>,
    /// 已卸载但仍有代等待清除的 bundle
    pub(super) removed: RwLock<BTreeMap<BundleId, Arc<Bundle>>>,
    /// 每个已解析（非片段）代的类加载器
    pub(super) loaders: RwLock<HashMap<GenerationId, Arc<BundleClassLoader>>>,
    /// 父加载器及其类路径（系统 bundle 与扩展片段）
    parent: RwLock<Arc<BundleClassLoader>>,
    parent_classpath: Mutex<Vec<Arc<dyn BundleArchive>>>,
    boot: Arc<BootDelegation>,
    pub(super) system: Arc<Bundle>,
    next_id: AtomicU64,
}

impl Inner {
    pub(super) fn bundle(&self, id: BundleId) -> Option<Arc<Bundle>> {
        self.bundles.read().get(&id).cloned()
    }

    pub(super) fn require_bundle(&self, id: BundleId) -> Result<Arc<Bundle>> {
        self.bundle(id).ok_or(FrameworkError::BundleNotFound(id))
    }

    pub(super) fn fire(&self, kind: BundleEventKind, bundle: BundleId) {
        self.listeners.fire_bundle_event(&BundleEvent::new(kind, bundle));
    }

    pub(super) fn fire_framework(
        &self,
        kind: FrameworkEventKind,
        bundle: Option<BundleId>,
        message: impl Into<String>,
    ) {
        self.listeners
            .fire_framework_event(&FrameworkEvent::new(kind, bundle, message));
    }

    /// 某一代的存档（当前代或仍保留的旧代）
    fn archive_of(&self, generation: GenerationId) -> Option<Arc<dyn BundleArchive>> {
        let bundle = self
            .bundle(generation.bundle)
            .or_else(|| self.removed.read().get(&generation.bundle).cloned())?;
        let data = bundle.read();
        if data.generation == generation {
            return Some(data.archive.clone());
        }
        data.zombies
            .iter()
            .find(|(g, _)| *g == generation.generation)
            .map(|(_, archive)| archive.clone())
    }

    // ==================== 解析 ====================

    /// 解析 bundle 并应用结果
    ///
    /// 失败时把原因记录到 bundle 上，bundle 保持 INSTALLED。
    pub(super) fn resolve(&self, id: BundleId) -> Result<ResolveReport> {
        let outcome = {
            let mut packages = self.packages.lock();
            packages.resolve(id).map(|report| {
                let wirings = wirings_for(&packages, &report);
                (report, wirings)
            })
        };

        match outcome {
            Ok((report, wirings)) => {
                self.apply_resolution(&report, wirings);
                Ok(report)
            }
            Err(failure) => {
                if let Some(bundle) = self.bundle(id) {
                    bundle.write().resolve_failure = Some(failure.reason.clone());
                }
                debug!(bundle_id = id, reason = %failure.reason, "bundle 解析失败");
                Err(failure.into())
            }
        }
    }

    /// 为新解析的代创建类加载器，更新 bundle 状态并分发 RESOLVED 事件
    fn apply_resolution(&self, report: &ResolveReport, wirings: Vec<Wiring>) {
        for wiring in wirings {
            self.install_loader(wiring);
        }

        for generation in &report.resolved {
            let Some(bundle) = self.bundle(generation.bundle) else {
                continue;
            };
            let changed = {
                let mut data = bundle.write();
                if data.generation == *generation && data.state == BundleState::Installed {
                    data.state = BundleState::Resolved;
                    data.resolve_failure = None;
                    data.last_modified = Utc::now();
                    true
                } else {
                    false
                }
            };
            if changed {
                info!(bundle_id = bundle.id(), generation = %generation, "bundle 已解析");
                self.fire(BundleEventKind::Resolved, bundle.id());
            }
        }
    }

    /// 把扩展片段附加到系统 bundle，并把它的内容加入父加载器
    fn attach_extension(&self, bundle: &Arc<Bundle>) {
        let generation = bundle.generation();
        let result = self.packages.lock().attach_extension(generation);
        match result {
            Ok(_) => {
                let parent = {
                    let mut classpath = self.parent_classpath.lock();
                    classpath.push(bundle.archive());
                    BundleClassLoader::parent(self.system.generation(), classpath.clone())
                };
                *self.parent.write() = Arc::new(parent);
                bundle.set_state(BundleState::Resolved);
                info!(bundle_id = bundle.id(), "扩展片段已附加到系统 bundle");
                self.fire(BundleEventKind::Resolved, bundle.id());
            }
            Err(failure) => {
                warn!(bundle_id = bundle.id(), reason = %failure.reason, "扩展片段附加失败");
                bundle.write().resolve_failure = Some(failure.reason);
            }
        }
    }

    /// 为一代创建类加载器；已有加载器时沿用已有的，保证每代只有一个加载器
    fn install_loader(&self, wiring: Wiring) -> Arc<BundleClassLoader> {
        let generation = wiring.generation;
        let classpath: Vec<_> = std::iter::once(generation)
            .chain(wiring.fragments.iter().copied())
            .filter_map(|g| self.archive_of(g))
            .collect();
        let loader = Arc::new(BundleClassLoader::new(wiring, classpath, self.boot.clone()));
        self.loaders
            .write()
            .entry(generation)
            .or_insert(loader)
            .clone()
    }

    /// 移除若干代的类加载器
    pub(super) fn drop_loaders(&self, generations: &[GenerationId]) {
        let mut loaders = self.loaders.write();
        for generation in generations {
            loaders.remove(generation);
        }
    }

    fn parent_loader(&self) -> Arc<BundleClassLoader> {
        self.parent.read().clone()
    }
}

impl ClassSpace for Inner {
    fn loader(&self, generation: GenerationId) -> Option<Arc<BundleClassLoader>> {
        if generation.bundle == SYSTEM_BUNDLE_ID {
            return Some(self.parent_loader());
        }
        if let Some(loader) = self.loaders.read().get(&generation) {
            return Some(loader.clone());
        }
        // 其他调用方刚完成解析、尚未建好加载器
        let wiring = self.packages.lock().wiring(generation)?;
        Some(self.install_loader(wiring))
    }

    fn parent(&self) -> Option<Arc<BundleClassLoader>> {
        Some(self.parent_loader())
    }

    fn resolve_dynamic(&self, generation: GenerationId, package: &str) -> Option<WireTarget> {
        if !self.config.framework.dynamic_imports {
            return None;
        }
        let (wire, report, wirings) = {
            let mut packages = self.packages.lock();
            let (key, report) = packages.register_dynamic_import(generation, package)?;
            let wire = WireTarget::from_export(&packages, key)?;
            let wirings = wirings_for(&packages, &report);
            (wire, report, wirings)
        };
        self.apply_resolution(&report, wirings);
        Some(wire)
    }
}

/// 报告中新解析的非片段代的绑定快照
fn wirings_for(packages: &Packages, report: &ResolveReport) -> Vec<Wiring> {
    report
        .resolved
        .iter()
        .filter(|g| packages.unit(**g).map(|u| !u.is_fragment()).unwrap_or(false))
        .filter_map(|g| packages.wiring(*g))
        .collect()
}

/// 检查符号名与版本是否与其他已安装 bundle 重复
pub(super) fn check_duplicate(
    bundles: &BTreeMap<BundleId, Arc<Bundle>>,
    except: Option<BundleId>,
    manifest: &BundleManifest,
) -> Result<()> {
    let Some(name) = &manifest.symbolic_name else {
        return Ok(());
    };
    let duplicate = bundles
        .values()
        .filter(|b| Some(b.id()) != except)
        .any(|b| {
            let other = b.manifest();
            other.symbolic_name.as_deref() == Some(name.as_str()) && other.version == manifest.version
        });
    if duplicate {
        return Err(FrameworkError::DuplicateBundle {
            symbolic_name: name.clone(),
            version: manifest.version.to_string(),
        });
    }
    Ok(())
}

// ==================== 框架句柄 ====================

/// 框架
#[derive(Clone)]
pub struct Framework {
    pub(super) inner: Arc<Inner>,
}

impl Framework {
    /// 创建构建器
    pub fn builder() -> FrameworkBuilder {
        FrameworkBuilder::new()
    }

    /// 使用内存存储创建框架
    pub fn new(config: FrameworkConfig) -> Result<Self> {
        FrameworkBuilder::new().config(config).build()
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.inner.config
    }

    /// 激活器注册表
    pub fn activators(&self) -> &ActivatorRegistry {
        &self.inner.activators
    }

    pub(crate) fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }

    // ==================== bundle 查询 ====================

    pub fn bundle(&self, id: BundleId) -> Option<Arc<Bundle>> {
        self.inner.bundle(id)
    }

    /// 所有已安装的 bundle，按 ID 排序
    pub fn bundles(&self) -> Vec<Arc<Bundle>> {
        self.inner.bundles.read().values().cloned().collect()
    }

    pub fn bundle_by_location(&self, location: &str) -> Option<Arc<Bundle>> {
        self.inner
            .bundles
            .read()
            .values()
            .find(|b| b.location() == location)
            .cloned()
    }

    pub fn system_bundle(&self) -> Arc<Bundle> {
        self.inner.system.clone()
    }

    // ==================== 安装 ====================

    /// 安装 bundle
    ///
    /// 同一位置已安装时返回已有的 bundle。扩展片段在安装时立即附加到系统 bundle，
    /// 其他 bundle 保持 INSTALLED，直到需要解析。
    #[instrument(skip(self))]
    pub async fn install(&self, location: &str) -> Result<Arc<Bundle>> {
        if let Some(existing) = self.bundle_by_location(location) {
            debug!(bundle_id = existing.id(), "位置已安装，返回已有 bundle");
            return Ok(existing);
        }

        let archive = self.inner.storage.open(location).await?;
        let manifest = BundleManifest::from_headers(archive.headers().clone())?;
        let is_extension = manifest.is_extension();

        let bundle = {
            let mut bundles = self.inner.bundles.write();
            if let Some(existing) = bundles.values().find(|b| b.location() == location) {
                return Ok(existing.clone());
            }
            check_duplicate(&bundles, None, &manifest)?;

            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
            let unit = BundlePackages::from_manifest(GenerationId::new(id, 0), &manifest)?;
            let bundle = Arc::new(Bundle::new(id, location, archive, manifest));
            self.inner.packages.lock().register_unit(unit);
            bundles.insert(id, bundle.clone());
            bundle
        };

        info!(bundle_id = bundle.id(), bundle = %bundle, "bundle 已安装");
        self.inner.fire(BundleEventKind::Installed, bundle.id());

        if is_extension {
            self.inner.attach_extension(&bundle);
        }
        Ok(bundle)
    }

    // ==================== 解析 ====================

    /// 按需解析并返回最新状态
    ///
    /// INSTALLED 的 bundle 会尝试解析；失败时保持 INSTALLED，原因记录在
    /// [`Bundle::resolve_failure`] 中。
    pub fn get_updated_state(&self, id: BundleId) -> Result<BundleState> {
        let bundle = self.inner.require_bundle(id)?;
        if bundle.state() == BundleState::Installed {
            if let Err(e) = self.inner.resolve(id) {
                debug!(bundle_id = id, error = %e, "按需解析未成功");
            }
        }
        Ok(bundle.state())
    }

    /// 批量解析
    ///
    /// `ids` 为 `None` 时解析所有 INSTALLED 的 bundle（片段优先，使其随宿主一起附加）。
    /// 单个 bundle 的失败不影响其他 bundle；全部解析成功时返回 `true`。
    pub fn resolve_bundles(&self, ids: Option<&[BundleId]>) -> bool {
        let targets: Vec<BundleId> = match ids {
            Some(ids) => ids.to_vec(),
            None => {
                let mut installed: Vec<Arc<Bundle>> = self
                    .bundles()
                    .into_iter()
                    .filter(|b| b.state() == BundleState::Installed)
                    .collect();
                installed.sort_by_key(|b| (!b.is_fragment(), b.id()));
                installed.iter().map(|b| b.id()).collect()
            }
        };

        let mut all_resolved = true;
        for id in targets {
            let Some(bundle) = self.bundle(id) else {
                all_resolved = false;
                continue;
            };
            if bundle.state() != BundleState::Installed {
                continue;
            }
            if let Err(e) = self.inner.resolve(id) {
                debug!(bundle_id = id, error = %e, "批量解析中的 bundle 解析失败");
                all_resolved = false;
            }
        }
        all_resolved
    }

    // ==================== 类加载 ====================

    /// 通过 bundle 的类空间加载类，必要时先解析 bundle
    pub fn load_class(&self, id: BundleId, name: &str) -> Result<Arc<LoadedClass>> {
        let bundle = self.inner.require_bundle(id)?;
        let loader = self
            .loader_for(&bundle)
            .ok_or_else(|| FrameworkError::ClassNotFound {
                bundle: id,
                class: name.to_string(),
            })?;
        loader.load_class(name, self.inner.as_ref())
    }

    /// 通过 bundle 的类空间查找资源
    pub fn get_resource(&self, id: BundleId, path: &str) -> Option<Arc<[u8]>> {
        let bundle = self.inner.bundle(id)?;
        self.loader_for(&bundle)?
            .get_resource(path, self.inner.as_ref())
    }

    /// bundle 当前代的类加载器，片段与无法解析的 bundle 没有加载器
    fn loader_for(&self, bundle: &Bundle) -> Option<Arc<BundleClassLoader>> {
        if bundle.id() == SYSTEM_BUNDLE_ID {
            return Some(self.inner.parent_loader());
        }
        if bundle.is_fragment() {
            return None;
        }
        if bundle.state() == BundleState::Installed {
            self.inner.resolve(bundle.id()).ok()?;
        }
        self.inner.loader(bundle.generation())
    }

    // ==================== 监听器 ====================

    pub fn add_bundle_listener(&self, listener: BundleListener) -> ListenerId {
        self.inner.listeners.add_bundle_listener(None, listener)
    }

    pub fn add_framework_listener(&self, listener: FrameworkListener) -> ListenerId {
        self.inner.listeners.add_framework_listener(None, listener)
    }

    /// 移除监听器，返回是否存在
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    // ==================== 包管理查询 ====================

    /// 某个包当前版本最高的提供者
    pub fn package_provider(&self, package: &str) -> Option<ExportedPackage> {
        let packages = self.inner.packages.lock();
        let key = packages.provider(package)?;
        packages.export(key).cloned()
    }

    /// bundle 当前代的导出
    pub fn exported_packages(&self, id: BundleId) -> Vec<ExportedPackage> {
        self.inner.packages.lock().exported_packages(id)
    }

    /// bundle 当前代的导入及其绑定的提供者
    pub fn import_wires(&self, id: BundleId) -> Vec<ImportedPackage> {
        self.inner.packages.lock().import_wires(id)
    }

    /// bundle 当前代的 bundle 依赖及其绑定
    pub fn required_bundles(&self, id: BundleId) -> Vec<RequireEdge> {
        self.inner.packages.lock().required_bundles(id)
    }

    /// 依赖图快照
    pub fn graph_snapshot(&self) -> GraphSnapshot {
        self.inner.packages.lock().snapshot()
    }
}

impl fmt::Debug for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framework")
            .field("bundles", &self.inner.bundles.read().len())
            .field("loaders", &self.inner.loaders.read().len())
            .finish()
    }
}

// ==================== 构建器 ====================

/// 框架构建器
pub struct FrameworkBuilder {
    config: FrameworkConfig,
    storage: Option<Arc<dyn BundleStorage>>,
    services: Option<Arc<dyn ServiceRegistry>>,
    activators: Arc<ActivatorRegistry>,
    system_content: BundleContent,
}

impl Default for FrameworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameworkBuilder {
    pub fn new() -> Self {
        Self {
            config: FrameworkConfig::default(),
            storage: None,
            services: None,
            activators: Arc::new(ActivatorRegistry::new()),
            system_content: BundleContent::new(),
        }
    }

    pub fn config(mut self, config: FrameworkConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置存储（默认使用空的内存存储）
    pub fn storage(mut self, storage: Arc<dyn BundleStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// 设置服务注册表
    pub fn services(mut self, services: Arc<dyn ServiceRegistry>) -> Self {
        self.services = Some(services);
        self
    }

    /// 注册激活器工厂
    pub fn activator(self, name: impl Into<String>, factory: ActivatorFactory) -> Self {
        self.activators.register(name, factory);
        self
    }

    /// 系统 bundle（父加载器）提供的类与资源
    pub fn system_content(mut self, content: BundleContent) -> Self {
        self.system_content = content;
        self
    }

    /// 创建框架，系统 bundle 立即处于 ACTIVE
    pub fn build(self) -> Result<Framework> {
        self.config.validate()?;

        let system_packages = self.config.framework.system_packages.trim().to_string();
        let mut content = self
            .system_content
            .header(BUNDLE_SYMBOLIC_NAME, SYSTEM_BUNDLE_NAME);
        if !system_packages.is_empty() {
            content = content.header(EXPORT_PACKAGE, system_packages.as_str());
        }
        let archive: Arc<dyn BundleArchive> =
            Arc::new(MemoryArchive::new(SYSTEM_BUNDLE_LOCATION, content));
        let manifest = BundleManifest::from_headers(archive.headers().clone())?;

        let generation = GenerationId::new(SYSTEM_BUNDLE_ID, 0);
        let unit = BundlePackages::from_manifest(generation, &manifest)?;
        let mut packages = Packages::new(self.config.framework.max_resolve_depth);
        packages.register_unit(unit);
        packages.resolve(SYSTEM_BUNDLE_ID)?;

        let system = Arc::new(Bundle::new(
            SYSTEM_BUNDLE_ID,
            SYSTEM_BUNDLE_LOCATION,
            archive.clone(),
            manifest,
        ));
        system.set_state(BundleState::Active);

        let parent = BundleClassLoader::parent(generation, vec![archive.clone()]);
        let boot = BootDelegation::new(&self.config.framework.boot_delegation);
        info!(
            system_packages = %system_packages,
            boot_delegation = ?self.config.framework.boot_delegation,
            "框架已创建"
        );

        let inner = Inner {
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
            services: self
                .services
                .unwrap_or_else(|| Arc::new(NoopServiceRegistry)),
            activators: self.activators,
            listeners: ListenerRegistry::new(),
            packages: Mutex::new(packages),
            bundles: RwLock::new(BTreeMap::from([(SYSTEM_BUNDLE_ID, system.clone())])),
            removed: RwLock::new(BTreeMap::new()),
            loaders: RwLock::new(HashMap::new()),
            parent: RwLock::new(Arc::new(parent)),
            parent_classpath: Mutex::new(vec![archive]),
            boot: Arc::new(boot),
            system,
            next_id: AtomicU64::new(SYSTEM_BUNDLE_ID + 1),
            config: self.config,
        };
        Ok(Framework {
            inner: Arc::new(inner),
        })
    }
}
