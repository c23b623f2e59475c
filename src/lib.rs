//! # Chips Framework - 薯片动态模块运行时
//!
//! 安装可独立更新的版本化代码单元（bundle），根据它们声明的包导入/导出与
//! bundle 依赖解析出一致的提供者，并只把解析结果暴露给每个 bundle 的类加载器。
//!
//! - **依赖解析**: 版本区间匹配、uses 一致性、单例互斥、可选/必需依赖，解析结果固定不变
//! - **生命周期**: INSTALLED → RESOLVED → STARTING → ACTIVE → STOPPING，更新与刷新
//! - **类可见性**: 启动委派、静态导入一跳委派、Require-Bundle、本地内容、动态导入
//! - **配置与日志**: YAML/JSON 配置，基于 tracing 的结构化日志
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chips_framework::{BundleContent, Framework, FrameworkConfig, MemoryStorage};
//!
//! #[tokio::main]
//! async fn main() -> chips_framework::Result<()> {
//!     let storage = Arc::new(MemoryStorage::new());
//!     storage.publish(
//!         "mem:api",
//!         BundleContent::new()
//!             .header("Bundle-SymbolicName", "org.chips.api")
//!             .header("Export-Package", "org.chips.api;version=1.0")
//!             .class("org.chips.api.Service", b"..."),
//!     );
//!     storage.publish(
//!         "mem:app",
//!         BundleContent::new()
//!             .header("Bundle-SymbolicName", "org.chips.app")
//!             .header("Import-Package", "org.chips.api;version=\"[1.0,2.0)\""),
//!     );
//!
//!     let framework = Framework::builder()
//!         .config(FrameworkConfig::default())
//!         .storage(storage)
//!         .build()?;
//!     framework.install("mem:api").await?;
//!     let app = framework.install("mem:app").await?;
//!     framework.start(app.id()).await?;
//!
//!     let class = framework.load_class(app.id(), "org.chips.api.Service")?;
//!     println!("{} 由 {} 定义", class.name, class.defined_by);
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `bundle` - 版本、清单、存档、状态、事件与激活器
//! - `resolver` - 依赖边模型、包依赖图与解析算法
//! - `classloader` - 类加载器与启动委派
//! - `framework` - 生命周期与框架入口
//! - `core` - 配置
//! - `utils` - 错误类型与日志

#![warn(rustdoc::missing_crate_level_docs)]

pub mod bundle;
pub mod classloader;
pub mod core;
pub mod framework;
pub mod resolver;
pub mod utils;

// 重导出常用类型
pub use bundle::{
    ActivatorFactory, ActivatorRegistry, Bundle, BundleActivator, BundleArchive, BundleContent,
    BundleEvent, BundleEventKind, BundleManifest, BundleState, BundleStorage, FrameworkEvent,
    FrameworkEventKind, ListenerId, MemoryArchive, MemoryStorage, Version, VersionRange,
};
pub use classloader::{BootDelegation, BundleClassLoader, ClassSpace, LoadedClass};
pub use self::core::config::{FrameworkConfig, FrameworkConfigBuilder, LogConfig, ResolverConfig};
pub use framework::{BundleContext, Framework, FrameworkBuilder, NoopServiceRegistry, ServiceRegistry};
pub use resolver::{
    BundleId, BundlePackages, ExportedPackage, GenerationId, GraphSnapshot, ImportedPackage,
    Packages, RequireEdge, ResolveFailure, ResolveReport, SYSTEM_BUNDLE_ID,
};
pub use utils::logger::{LogGuard, Logger, LoggerConfig, RotationStrategy};
pub use utils::{error_code, FrameworkError, Result};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
