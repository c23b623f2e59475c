//! bundle 生命周期操作
//!
//! 启动、停止、更新、卸载、刷新以及框架级的启动与关闭。同一 bundle 上的操作
//! 通过 `op_lock` 串行执行；在 bundle 自己的激活器回调中对它再次执行生命周期
//! 操作会被拒绝。

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use super::context::BundleContext;
use super::framework::{check_duplicate, Framework};
use crate::bundle::{Bundle, BundleActivator, BundleEventKind, BundleManifest, BundleState, FrameworkEventKind};
use crate::resolver::{BundleId, BundlePackages, GenerationId, SYSTEM_BUNDLE_ID};
use crate::utils::{FrameworkError, Result};

tokio::task_local! {
    /// 当前任务中正在执行激活器回调的 bundle
    static ACTIVATION_STACK: Vec<BundleId>;
}

fn in_own_callback(id: BundleId) -> bool {
    ACTIVATION_STACK
        .try_with(|stack| stack.contains(&id))
        .unwrap_or(false)
}

/// 在激活栈中压入 bundle 后执行回调
async fn with_activation<F: Future>(id: BundleId, callback: F) -> F::Output {
    let mut stack = ACTIVATION_STACK.try_with(Clone::clone).unwrap_or_default();
    stack.push(id);
    ACTIVATION_STACK.scope(stack, callback).await
}

impl Framework {
    /// 取得 bundle 并检查操作是否允许
    fn lifecycle_target(&self, id: BundleId, operation: &str) -> Result<Arc<Bundle>> {
        let bundle = self.inner.require_bundle(id)?;
        if in_own_callback(id) {
            return Err(FrameworkError::IllegalState(format!(
                "不能在 bundle #{} 自己的激活器回调中{}",
                id, operation
            )));
        }
        Ok(bundle)
    }

    fn check_not_system(id: BundleId, operation: &str) -> Result<()> {
        if id == SYSTEM_BUNDLE_ID {
            return Err(FrameworkError::IllegalState(format!("系统 bundle 不能{}", operation)));
        }
        Ok(())
    }

    // ==================== 启动 ====================

    /// 启动 bundle
    ///
    /// 需要时先解析；激活器失败时回到 RESOLVED 并返回 `ActivatorFailed`。
    /// 成功后持久化"启动时自动启动"标记。
    #[instrument(skip(self))]
    pub async fn start(&self, id: BundleId) -> Result<()> {
        let bundle = self.lifecycle_target(id, "启动")?;
        if id == SYSTEM_BUNDLE_ID {
            return Ok(());
        }
        if bundle.is_fragment() {
            return Err(FrameworkError::IllegalState(format!(
                "片段 bundle #{} 不能启动",
                id
            )));
        }

        let _guard = bundle.op_lock.lock().await;
        match bundle.state() {
            BundleState::Uninstalled => {
                return Err(FrameworkError::IllegalState(format!("bundle #{} 已卸载", id)));
            }
            BundleState::Active => return Ok(()),
            BundleState::Starting | BundleState::Stopping => {
                return Err(FrameworkError::IllegalState(format!(
                    "bundle #{} 正处于 {} 状态",
                    id,
                    bundle.state()
                )));
            }
            BundleState::Installed => {
                self.inner.resolve(id)?;
            }
            BundleState::Resolved => {}
        }

        self.inner
            .storage
            .set_start_on_launch(bundle.location(), true)
            .await?;
        self.activate(&bundle).await
    }

    /// RESOLVED -> STARTING -> ACTIVE，失败时回到 RESOLVED
    pub(super) async fn activate(&self, bundle: &Arc<Bundle>) -> Result<()> {
        let id = bundle.id();
        bundle.set_state(BundleState::Starting);
        self.inner.fire(BundleEventKind::Starting, id);

        let context = BundleContext::new(id, self.clone());
        match self.invoke_start(bundle, &context).await {
            Ok(activator) => {
                bundle.write().activator = activator;
                bundle.set_state(BundleState::Active);
                info!(bundle_id = id, "bundle 已启动");
                self.inner.fire(BundleEventKind::Started, id);
                Ok(())
            }
            Err(e) => {
                self.release_resources(id);
                bundle.set_state(BundleState::Resolved);
                warn!(bundle_id = id, error = %e, "bundle 启动失败，回到 RESOLVED");
                self.inner.fire(BundleEventKind::Stopped, id);
                Err(e)
            }
        }
    }

    /// 创建并执行激活器
    async fn invoke_start(
        &self,
        bundle: &Arc<Bundle>,
        context: &BundleContext,
    ) -> Result<Option<Arc<dyn BundleActivator>>> {
        let id = bundle.id();
        let Some(name) = bundle.manifest().activator.clone() else {
            return Ok(None);
        };

        if let Err(e) = self.load_class(id, &name) {
            return Err(FrameworkError::ActivatorFailed {
                bundle: id,
                reason: format!("激活器类 '{}' 不可见: {}", name, e),
            });
        }
        let activator = self
            .inner
            .activators
            .create(&name)
            .ok_or_else(|| FrameworkError::ActivatorFailed {
                bundle: id,
                reason: format!("激活器 '{}' 没有注册工厂", name),
            })?;

        debug!(bundle_id = id, activator = %name, "调用激活器 start");
        with_activation(id, activator.start(context))
            .await
            .map_err(|e| FrameworkError::ActivatorFailed {
                bundle: id,
                reason: format!("{:#}", e),
            })?;
        Ok(Some(activator))
    }

    // ==================== 停止 ====================

    /// 停止 bundle 并清除"启动时自动启动"标记
    ///
    /// 激活器 stop 的错误在资源释放完成后才返回。
    #[instrument(skip(self))]
    pub async fn stop(&self, id: BundleId) -> Result<()> {
        let bundle = self.lifecycle_target(id, "停止")?;
        Self::check_not_system(id, "停止")?;
        if bundle.is_fragment() {
            return Err(FrameworkError::IllegalState(format!(
                "片段 bundle #{} 不能停止",
                id
            )));
        }

        let _guard = bundle.op_lock.lock().await;
        if bundle.state().is_uninstalled() {
            return Err(FrameworkError::IllegalState(format!("bundle #{} 已卸载", id)));
        }
        self.inner
            .storage
            .set_start_on_launch(bundle.location(), false)
            .await?;
        if bundle.state() != BundleState::Active {
            return Ok(());
        }
        self.deactivate(&bundle).await
    }

    /// ACTIVE -> STOPPING -> RESOLVED
    pub(super) async fn deactivate(&self, bundle: &Arc<Bundle>) -> Result<()> {
        let id = bundle.id();
        bundle.set_state(BundleState::Stopping);
        self.inner.fire(BundleEventKind::Stopping, id);

        let activator = bundle.write().activator.take();
        let result = match activator {
            Some(activator) => {
                debug!(bundle_id = id, "调用激活器 stop");
                let context = BundleContext::new(id, self.clone());
                with_activation(id, activator.stop(&context))
                    .await
                    .map_err(|e| FrameworkError::ActivatorFailed {
                        bundle: id,
                        reason: format!("{:#}", e),
                    })
            }
            None => Ok(()),
        };

        self.release_resources(id);
        bundle.set_state(BundleState::Resolved);
        match &result {
            Ok(()) => info!(bundle_id = id, "bundle 已停止"),
            Err(e) => warn!(bundle_id = id, error = %e, "激活器 stop 失败，资源已释放"),
        }
        self.inner.fire(BundleEventKind::Stopped, id);
        result
    }

    /// 释放 bundle 注册的监听器与服务
    fn release_resources(&self, id: BundleId) {
        let listeners = self.inner.listeners.remove_owned_by(id);
        self.inner.services.release_bundle(id);
        debug!(bundle_id = id, listeners, "已释放 bundle 资源");
    }

    // ==================== 更新 ====================

    /// 用存储中当前发布的内容更新 bundle
    ///
    /// 旧代的导出不再被使用时立即清除，否则保留为僵尸代，直到刷新。
    /// 更新前处于 ACTIVE 的 bundle 在更新后尽力重新启动，重启失败以框架事件
    /// 报告，不作为更新的错误。
    #[instrument(skip(self))]
    pub async fn update(&self, id: BundleId) -> Result<()> {
        let bundle = self.lifecycle_target(id, "更新")?;
        Self::check_not_system(id, "更新")?;

        let _guard = bundle.op_lock.lock().await;
        if bundle.state().is_uninstalled() {
            return Err(FrameworkError::IllegalState(format!("bundle #{} 已卸载", id)));
        }

        let was_active = bundle.state() == BundleState::Active;
        if was_active {
            if let Err(e) = self.deactivate(&bundle).await {
                warn!(bundle_id = id, error = %e, "更新前停止 bundle 失败");
            }
        }

        let prepared = self.prepare_update(&bundle).await;
        let (archive, manifest, unit) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(bundle_id = id, error = %e, "获取新内容失败，保留原内容");
                if was_active {
                    self.restart(&bundle).await;
                }
                return Err(e);
            }
        };

        let old = bundle.generation();
        let was_resolved = bundle.state().is_resolved();
        let (removed, orphaned) = {
            let mut packages = self.inner.packages.lock();
            let orphaned: Vec<GenerationId> = packages
                .unit(old)
                .map(|u| u.fragments().to_vec())
                .unwrap_or_default();
            packages.register_unit(unit);
            let removed = packages.unregister_unit(old, false);
            (removed, if removed { orphaned } else { Vec::new() })
        };

        {
            let mut data = bundle.write();
            if !removed {
                let stale = data.archive.clone();
                data.zombies.push((old.generation, stale));
            }
            data.generation = old.next();
            data.archive = archive;
            data.manifest = Arc::new(manifest);
            data.state = BundleState::Installed;
            data.resolve_failure = None;
            data.last_modified = chrono::Utc::now();
        }

        if removed {
            self.inner.drop_loaders(&[old]);
            if let Err(e) = self.inner.storage.purge(bundle.location(), old.generation).await {
                warn!(bundle_id = id, error = %e, "清除旧代失败");
            }
        } else {
            info!(bundle_id = id, generation = %old, "旧代仍被使用，保留为僵尸代");
        }
        self.mark_unresolved(&orphaned);

        info!(bundle_id = id, generation = %bundle.generation(), "bundle 已更新");
        if was_resolved {
            self.inner.fire(BundleEventKind::Unresolved, id);
        }
        self.inner.fire(BundleEventKind::Updated, id);

        if was_active {
            self.restart(&bundle).await;
        }
        Ok(())
    }

    /// 读取并校验新内容
    async fn prepare_update(
        &self,
        bundle: &Arc<Bundle>,
    ) -> Result<(Arc<dyn crate::bundle::BundleArchive>, BundleManifest, BundlePackages)> {
        let archive = self.inner.storage.open(bundle.location()).await?;
        let manifest = BundleManifest::from_headers(archive.headers().clone())?;
        if manifest.is_fragment() != bundle.is_fragment() {
            return Err(FrameworkError::InvalidManifest(
                "更新不能改变 bundle 是否为片段".to_string(),
            ));
        }
        check_duplicate(&self.inner.bundles.read(), Some(bundle.id()), &manifest)?;
        let unit = BundlePackages::from_manifest(bundle.generation().next(), &manifest)?;
        Ok((archive, manifest, unit))
    }

    /// 尽力重新启动，失败以框架事件报告
    async fn restart(&self, bundle: &Arc<Bundle>) {
        let id = bundle.id();
        let result = match bundle.state() {
            BundleState::Installed => match self.inner.resolve(id) {
                Ok(_) => self.activate(bundle).await,
                Err(e) => Err(e),
            },
            BundleState::Resolved => self.activate(bundle).await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            error!(bundle_id = id, error = %e, "重新启动 bundle 失败");
            self.inner
                .fire_framework(FrameworkEventKind::Error, Some(id), e.to_string());
        }
    }

    /// 片段所在宿主被替换后，片段回到 INSTALLED
    fn mark_unresolved(&self, generations: &[GenerationId]) {
        for generation in generations {
            let Some(bundle) = self.inner.bundle(generation.bundle) else {
                continue;
            };
            let changed = {
                let mut data = bundle.write();
                if data.generation == *generation && data.state.is_resolved() {
                    data.state = BundleState::Installed;
                    true
                } else {
                    false
                }
            };
            if changed {
                self.inner.fire(BundleEventKind::Unresolved, bundle.id());
            }
        }
    }

    // ==================== 卸载 ====================

    /// 卸载 bundle
    ///
    /// 未被其他 bundle 使用时立即清除内容，否则保留为僵尸代等待刷新。
    #[instrument(skip(self))]
    pub async fn uninstall(&self, id: BundleId) -> Result<()> {
        let bundle = self.lifecycle_target(id, "卸载")?;
        Self::check_not_system(id, "卸载")?;

        let _guard = bundle.op_lock.lock().await;
        if bundle.state().is_uninstalled() {
            return Err(FrameworkError::IllegalState(format!("bundle #{} 已卸载", id)));
        }
        if bundle.state() == BundleState::Active {
            if let Err(e) = self.deactivate(&bundle).await {
                warn!(bundle_id = id, error = %e, "卸载前停止 bundle 失败");
            }
        }
        if let Err(e) = self
            .inner
            .storage
            .set_start_on_launch(bundle.location(), false)
            .await
        {
            warn!(bundle_id = id, error = %e, "清除启动标记失败");
        }

        let generation = bundle.generation();
        let (removed, orphaned) = {
            let mut packages = self.inner.packages.lock();
            let orphaned: Vec<GenerationId> = packages
                .unit(generation)
                .map(|u| u.fragments().to_vec())
                .unwrap_or_default();
            packages.mark_uninstalled(id);
            let removed = packages.unregister_unit(generation, false);
            (removed, if removed { orphaned } else { Vec::new() })
        };

        {
            let mut data = bundle.write();
            if !removed {
                let stale = data.archive.clone();
                data.zombies.push((generation.generation, stale));
            }
            data.state = BundleState::Uninstalled;
            data.last_modified = chrono::Utc::now();
        }
        self.inner.bundles.write().remove(&id);

        if removed {
            self.inner.drop_loaders(&[generation]);
            if let Err(e) = self
                .inner
                .storage
                .purge(bundle.location(), generation.generation)
                .await
            {
                warn!(bundle_id = id, error = %e, "清除内容失败");
            }
        } else {
            info!(bundle_id = id, "bundle 内容仍被使用，等待刷新后清除");
        }
        if !bundle.read().zombies.is_empty() {
            self.inner.removed.write().insert(id, bundle.clone());
        }
        self.mark_unresolved(&orphaned);

        info!(bundle_id = id, "bundle 已卸载");
        self.inner.fire(BundleEventKind::Uninstalled, id);
        Ok(())
    }

    // ==================== 刷新 ====================

    /// 刷新包依赖
    ///
    /// `ids` 为 `None` 时刷新所有带僵尸代或等待清除的 bundle。计算依赖闭包后，
    /// 停止其中 ACTIVE 的 bundle、取消解析、清除不再使用的旧代，然后重新解析
    /// 并启动之前处于 ACTIVE 的 bundle。单个 bundle 的重启失败以框架事件报告，
    /// 不会中止整个刷新。
    #[instrument(skip(self))]
    pub async fn refresh_packages(&self, ids: Option<&[BundleId]>) -> Result<()> {
        let closure = {
            let packages = self.inner.packages.lock();
            let targets: Vec<BundleId> = match ids {
                Some(ids) => ids.to_vec(),
                None => {
                    let mut targets: Vec<BundleId> =
                        packages.zombies().into_iter().map(|g| g.bundle).collect();
                    targets.extend(packages.pending_uninstalled());
                    targets
                }
            };
            packages.refresh_closure(&targets)
        };
        info!(bundles = ?closure, "刷新包依赖");

        let affected: Vec<Arc<Bundle>> = closure.iter().filter_map(|id| self.inner.bundle(*id)).collect();

        let mut restart = Vec::new();
        for bundle in affected.iter().rev() {
            if in_own_callback(bundle.id()) {
                return Err(FrameworkError::IllegalState(format!(
                    "不能在 bundle #{} 自己的激活器回调中刷新它",
                    bundle.id()
                )));
            }
            let _guard = bundle.op_lock.lock().await;
            if bundle.state() == BundleState::Active {
                if let Err(e) = self.deactivate(bundle).await {
                    warn!(bundle_id = bundle.id(), error = %e, "刷新时停止 bundle 失败");
                }
                restart.push(bundle.clone());
            }
        }

        let (unresolved, purged) = {
            let mut packages = self.inner.packages.lock();
            let mut unresolved = Vec::new();
            for id in &closure {
                unresolved.extend(packages.unresolve(*id));
            }
            let purged = packages.collect_unused_zombies();
            (unresolved, purged)
        };
        self.inner.drop_loaders(&unresolved);
        self.inner.drop_loaders(&purged);
        self.mark_unresolved(&unresolved);

        for generation in &purged {
            self.purge_generation(*generation).await;
        }
        {
            let pending = self.inner.packages.lock().pending_uninstalled();
            self.inner.removed.write().retain(|id, _| pending.contains(id));
        }

        restart.reverse();
        for bundle in &restart {
            let _guard = bundle.op_lock.lock().await;
            self.restart(bundle).await;
        }

        info!(unresolved = unresolved.len(), purged = purged.len(), "包依赖刷新完成");
        self.inner
            .fire_framework(FrameworkEventKind::PackagesRefreshed, None, "包依赖刷新完成");
        Ok(())
    }

    /// 清除一个已从依赖图移除的旧代
    async fn purge_generation(&self, generation: GenerationId) {
        let bundle = self
            .inner
            .bundle(generation.bundle)
            .or_else(|| self.inner.removed.read().get(&generation.bundle).cloned());
        let Some(bundle) = bundle else {
            return;
        };
        bundle
            .write()
            .zombies
            .retain(|(g, _)| *g != generation.generation);
        debug!(generation = %generation, "清除旧代");
        if let Err(e) = self
            .inner
            .storage
            .purge(bundle.location(), generation.generation)
            .await
        {
            warn!(generation = %generation, error = %e, "清除旧代失败");
        }
    }

    // ==================== 框架启动与关闭 ====================

    /// 启动所有标记为"启动时自动启动"的 bundle
    ///
    /// 单个 bundle 启动失败以框架事件报告，完成后分发 `Started` 框架事件。
    pub async fn launch(&self) -> Result<()> {
        let candidates: Vec<Arc<Bundle>> = self
            .bundles()
            .into_iter()
            .filter(|b| b.id() != SYSTEM_BUNDLE_ID && !b.is_fragment())
            .collect();

        let mut started = 0;
        for bundle in candidates {
            if !self.inner.storage.start_on_launch(bundle.location()).await {
                continue;
            }
            match self.start(bundle.id()).await {
                Ok(()) => started += 1,
                Err(e) => {
                    error!(bundle_id = bundle.id(), error = %e, "启动时自动启动失败");
                    self.inner
                        .fire_framework(FrameworkEventKind::Error, Some(bundle.id()), e.to_string());
                }
            }
        }

        info!(started, "框架已启动");
        self.inner
            .fire_framework(FrameworkEventKind::Started, None, "框架已启动");
        Ok(())
    }

    /// 按安装顺序的逆序停止所有 ACTIVE 的 bundle
    ///
    /// 保留"启动时自动启动"标记，下次 `launch` 时会重新启动。
    pub async fn shutdown(&self) -> Result<()> {
        let mut active: Vec<Arc<Bundle>> = self
            .bundles()
            .into_iter()
            .filter(|b| b.id() != SYSTEM_BUNDLE_ID)
            .collect();
        active.reverse();

        for bundle in active {
            let _guard = bundle.op_lock.lock().await;
            if bundle.state() != BundleState::Active {
                continue;
            }
            if let Err(e) = self.deactivate(&bundle).await {
                warn!(bundle_id = bundle.id(), error = %e, "关闭时停止 bundle 失败");
            }
        }
        info!("框架已关闭");
        Ok(())
    }
}
