//! bundle 激活器
//!
//! 清单中的 `Bundle-Activator` 只是一个名称。框架在启动 bundle 时先确认该名称
//! 对应的类在 bundle 的类空间中可见，再从 [`ActivatorRegistry`] 中找到同名工厂
//! 创建激活器实例。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::framework::BundleContext;

/// bundle 激活器接口
///
/// `start` 返回错误时 bundle 回到 RESOLVED；`stop` 返回错误时
/// 框架仍会完成资源释放，然后再报告错误。
#[async_trait]
pub trait BundleActivator: Send + Sync {
    /// bundle 启动
    async fn start(&self, context: &BundleContext) -> anyhow::Result<()>;

    /// bundle 停止
    async fn stop(&self, context: &BundleContext) -> anyhow::Result<()>;
}

/// 激活器工厂
pub type ActivatorFactory = Arc<dyn Fn() -> Arc<dyn BundleActivator> + Send + Sync>;

/// 激活器注册表：激活器名称 -> 工厂
#[derive(Default)]
pub struct ActivatorRegistry {
    factories: RwLock<HashMap<String, ActivatorFactory>>,
}

impl ActivatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工厂，返回被替换的旧工厂是否存在
    pub fn register(&self, name: impl Into<String>, factory: ActivatorFactory) -> bool {
        self.factories.write().insert(name.into(), factory).is_some()
    }

    /// 注销工厂
    pub fn unregister(&self, name: &str) -> bool {
        self.factories.write().remove(name).is_some()
    }

    /// 创建激活器实例
    pub fn create(&self, name: &str) -> Option<Arc<dyn BundleActivator>> {
        let factory = self.factories.read().get(name).cloned()?;
        Some(factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl BundleActivator for Noop {
        async fn start(&self, _context: &BundleContext) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self, _context: &BundleContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry() {
        let registry = ActivatorRegistry::new();
        assert!(registry.create("a.Activator").is_none());

        assert!(!registry.register("a.Activator", Arc::new(|| Arc::new(Noop) as Arc<dyn BundleActivator>)));
        assert!(registry.contains("a.Activator"));
        assert!(registry.create("a.Activator").is_some());

        assert!(registry.unregister("a.Activator"));
        assert!(!registry.contains("a.Activator"));
    }
}
