//! 服务注册表接口
//!
//! 服务注册与查找不参与依赖解析；生命周期层只在 bundle 停止（或启动失败回滚）
//! 时通知注册表释放该 bundle 注册和使用的服务。

use crate::resolver::BundleId;

/// 服务注册表
pub trait ServiceRegistry: Send + Sync {
    /// 释放 bundle 注册和使用的全部服务
    fn release_bundle(&self, bundle: BundleId);
}

/// 不保存任何服务的注册表
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopServiceRegistry;

impl ServiceRegistry for NoopServiceRegistry {
    fn release_bundle(&self, _bundle: BundleId) {}
}
