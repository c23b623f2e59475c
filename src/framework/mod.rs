//! 框架模块
//!
//! 驱动 bundle 生命周期并连接依赖图与类加载器：
//! - [`Framework`]：安装、解析、类加载与包管理查询
//! - 生命周期：启动、停止、更新、卸载、刷新
//! - [`BundleContext`]：激活器访问框架的入口
//! - [`ServiceRegistry`]：停止 bundle 时释放其服务

pub mod context;
#[allow(clippy::module_inception)]
pub mod framework;
mod lifecycle;
pub mod services;

pub use context::BundleContext;
pub use framework::{Framework, FrameworkBuilder, SYSTEM_BUNDLE_LOCATION};
pub use services::{NoopServiceRegistry, ServiceRegistry};
