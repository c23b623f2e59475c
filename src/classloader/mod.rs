//! 类加载模块
//!
//! 每个已解析的 bundle 代拥有一个 [`BundleClassLoader`]，按解析时固定的绑定
//! 把类与资源请求委派给提供者。加载器之间通过 [`ClassSpace`] 互相查找，
//! 查找过程不持有依赖图锁；只有动态导入需要短暂进入依赖图。

pub mod boot;
pub mod loader;

use std::fmt;
use std::sync::Arc;

pub use boot::BootDelegation;
pub use loader::BundleClassLoader;

use crate::resolver::{GenerationId, WireTarget};

/// 已定义的类
#[derive(Clone, PartialEq, Eq)]
pub struct LoadedClass {
    /// 全限定类名
    pub name: String,
    /// 类字节
    pub bytes: Arc<[u8]>,
    /// 定义该类的加载器所属代
    pub defined_by: GenerationId,
    /// 类字节所在存档的位置（宿主或片段）
    pub location: String,
}

impl fmt::Debug for LoadedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedClass")
            .field("name", &self.name)
            .field("defined_by", &self.defined_by)
            .field("location", &self.location)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// 类加载器之间的查找空间
pub trait ClassSpace: Send + Sync {
    /// 某一代的类加载器
    fn loader(&self, generation: GenerationId) -> Option<Arc<BundleClassLoader>>;

    /// 父加载器（系统 bundle）
    fn parent(&self) -> Option<Arc<BundleClassLoader>>;

    /// 为某一代动态导入一个包，成功时返回新的绑定
    fn resolve_dynamic(&self, generation: GenerationId, package: &str) -> Option<WireTarget>;
}
