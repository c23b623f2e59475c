//! bundle 上下文
//!
//! 激活器通过 [`BundleContext`] 访问框架。经由上下文注册的监听器归属于该
//! bundle，在 bundle 停止时自动移除。

use std::fmt;
use std::sync::Arc;

use super::Framework;
use crate::bundle::{Bundle, BundleListener, FrameworkListener, ListenerId};
use crate::classloader::LoadedClass;
use crate::resolver::BundleId;
use crate::utils::{FrameworkError, Result};

/// bundle 上下文
#[derive(Clone)]
pub struct BundleContext {
    bundle: BundleId,
    framework: Framework,
}

impl BundleContext {
    pub(crate) fn new(bundle: BundleId, framework: Framework) -> Self {
        Self { bundle, framework }
    }

    /// 所属 bundle 的 ID
    pub fn bundle_id(&self) -> BundleId {
        self.bundle
    }

    /// 所属 bundle
    pub fn bundle(&self) -> Result<Arc<Bundle>> {
        self.framework
            .bundle(self.bundle)
            .ok_or(FrameworkError::BundleNotFound(self.bundle))
    }

    /// 框架句柄
    pub fn framework(&self) -> &Framework {
        &self.framework
    }

    /// 注册归属于本 bundle 的 bundle 监听器
    pub fn add_bundle_listener(&self, listener: BundleListener) -> ListenerId {
        self.framework
            .listeners()
            .add_bundle_listener(Some(self.bundle), listener)
    }

    /// 注册归属于本 bundle 的框架监听器
    pub fn add_framework_listener(&self, listener: FrameworkListener) -> ListenerId {
        self.framework
            .listeners()
            .add_framework_listener(Some(self.bundle), listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.framework.remove_listener(id)
    }

    /// 通过本 bundle 的类空间加载类
    pub fn load_class(&self, name: &str) -> Result<Arc<LoadedClass>> {
        self.framework.load_class(self.bundle, name)
    }

    /// 通过本 bundle 的类空间查找资源
    pub fn get_resource(&self, path: &str) -> Option<Arc<[u8]>> {
        self.framework.get_resource(self.bundle, path)
    }
}

impl fmt::Debug for BundleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleContext")
            .field("bundle", &self.bundle)
            .finish()
    }
}
